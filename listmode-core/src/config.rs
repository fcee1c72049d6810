//! Decoder configuration and the physical constants of the list-mode format.

use thiserror::Error;

/// Duration of one fine time tick (200 ns).
pub const FINE_TICK_SECONDS: f64 = 200e-9;

/// Duration of one coarse time tick (10 ms).
pub const COARSE_TICK_SECONDS: f64 = 10e-3;

/// External file-time ticks per second (100 ns ticks).
pub const EXTERNAL_TICKS_PER_SECOND: u64 = 10_000_000;

/// Size of the file header preceding the word stream.
pub const HEADER_BYTE_LENGTH: usize = 256;

/// Size of one list-mode word.
pub const WORD_BYTES: usize = 4;

/// Largest energy channel an ADC word can carry.
pub const MAX_CHANNEL: u16 = 0x3FFF;

/// Default chunk size (2 MiB).
pub const DEFAULT_CHUNK_SIZE: usize = 2 * 1024 * 1024;

/// Largest chunk the decoder will allocate (1 GiB).
pub const MAX_CHUNK_SIZE: usize = 1024 * 1024 * 1024;

const MEBIBYTE: usize = 1024 * 1024;

/// Errors in a [`DecoderConfig`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("chunk size must be greater than zero")]
    ZeroChunkSize,

    #[error("chunk size {0} is not a multiple of the 4-byte word size")]
    MisalignedChunkSize(usize),

    #[error("chunk size {0} exceeds the 1 GiB limit")]
    ChunkTooLarge(usize),

    #[error("chunk size of {0} MiB overflows the address space")]
    ChunkSizeOverflow(usize),
}

/// Settings for the streaming decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderConfig {
    /// Bytes read from the input per chunk
    pub chunk_size: usize,
    /// Bytes skipped at the start of the input
    pub header_len: usize,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            header_len: HEADER_BYTE_LENGTH,
        }
    }
}

impl DecoderConfig {
    /// Creates a configuration with the given chunk size in bytes.
    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self {
            chunk_size,
            ..Self::default()
        }
    }

    /// Creates a validated configuration with the chunk size given in MiB.
    pub fn with_chunk_mebibytes(mebibytes: usize) -> Result<Self, ConfigError> {
        let chunk_size = mebibytes
            .checked_mul(MEBIBYTE)
            .ok_or(ConfigError::ChunkSizeOverflow(mebibytes))?;
        let config = Self::with_chunk_size(chunk_size);
        config.validate()?;
        Ok(config)
    }

    /// Checks that chunks hold a whole number of words and fit the allocation limit.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::ZeroChunkSize);
        }
        if self.chunk_size % WORD_BYTES != 0 {
            return Err(ConfigError::MisalignedChunkSize(self.chunk_size));
        }
        if self.chunk_size > MAX_CHUNK_SIZE {
            return Err(ConfigError::ChunkTooLarge(self.chunk_size));
        }
        Ok(())
    }
}
