//! Stateful list-mode decoder.
//!
//! This module implements the word decoding state machine: it carries the
//! coarse time register and the acquisition-timing accumulators across words
//! and chunks, and drives chunked decoding of files of any size.

use crate::config::{ConfigError, DecoderConfig, WORD_BYTES};
use crate::correlation::{AcquisitionTimeCorrelator, AcquisitionTiming, CorrelationError};
use crate::output::{EventSink, OutputError};
use crate::parser;
use crate::types::{DecodeResult, DecodeStats, Event, StreamSummary, TimeBase, WordTag};
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Errors that can occur during list-mode decoding.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    #[error("Output error: {0}")]
    Output(#[from] OutputError),
}

/// Stateful list-mode decoder.
///
/// Holds the coarse time register, the bytes of a word split across two
/// buffers and the acquisition-timing accumulators. None of this is reset
/// between chunks.
#[derive(Debug)]
pub struct ListModeDecoder {
    config: DecoderConfig,

    // Timestamp state
    time_base: TimeBase,

    // Partial word carried over from the previous buffer
    carry: [u8; WORD_BYTES],
    carry_len: usize,

    correlator: AcquisitionTimeCorrelator,
    stats: DecodeStats,
}

impl Default for ListModeDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ListModeDecoder {
    /// Creates a new decoder with the default configuration.
    pub fn new() -> Self {
        Self {
            config: DecoderConfig::default(),
            time_base: TimeBase::default(),
            carry: [0; WORD_BYTES],
            carry_len: 0,
            correlator: AcquisitionTimeCorrelator::new(),
            stats: DecodeStats::default(),
        }
    }

    /// Creates a decoder with a custom configuration.
    pub fn with_config(config: DecoderConfig) -> Result<Self, DecodeError> {
        config.validate()?;
        Ok(Self {
            config,
            ..Self::new()
        })
    }

    /// Resets the decoder state.
    pub fn reset(&mut self) {
        self.time_base = TimeBase::default();
        self.carry = [0; WORD_BYTES];
        self.carry_len = 0;
        self.correlator.clear();
        self.stats = DecodeStats::default();
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Current coarse time register.
    pub fn time_base(&self) -> TimeBase {
        self.time_base
    }

    pub fn correlator(&self) -> &AcquisitionTimeCorrelator {
        &self.correlator
    }

    pub fn stats(&self) -> &DecodeStats {
        &self.stats
    }

    /// Number of bytes of an incomplete word waiting for the next buffer.
    pub fn pending_bytes(&self) -> usize {
        self.carry_len
    }

    /// Decodes a single word.
    #[inline]
    pub fn decode_word(&mut self, word: u32, events: &mut Vec<Event>) {
        self.stats.words += 1;

        match parser::classify(word) {
            WordTag::Adc => {
                let channel = parser::adc_channel(word);
                let timestamp = self.time_base.absolute(parser::fine_time_ticks(word));
                events.push(Event::new(channel, timestamp));
                self.stats.events += 1;
            }

            WordTag::CoarseTime => {
                self.time_base.set(parser::coarse_time_ticks(word));
                self.stats.coarse_time_words += 1;
            }

            WordTag::HardwareReadout => {
                let readout = self.time_base.absolute(parser::fine_time_ticks(word));
                self.correlator.push_hardware_readout(readout);
                self.stats.hardware_readouts += 1;
            }

            WordTag::ExternalTime1 => {
                self.correlator
                    .push_part1(parser::external_time_fragment(word));
                self.stats.external_time_words[0] += 1;
            }

            WordTag::ExternalTime2 => {
                self.correlator
                    .push_part2(parser::external_time_fragment(word));
                self.stats.external_time_words[1] += 1;
            }

            WordTag::ExternalTime3 => {
                self.correlator.push_part3(parser::external_time_tail(word));
                self.stats.external_time_words[2] += 1;
            }

            WordTag::LiveTime => {
                trace!(word, "skipping live time word");
                self.stats.live_time_words += 1;
            }

            WordTag::Unknown(b3) => {
                trace!(word, b3, "skipping unknown word");
                self.stats.unknown_words += 1;
            }
        }
    }

    /// Decodes a buffer of words.
    pub fn decode_words(&mut self, words: &[u32], events: &mut Vec<Event>) {
        for &word in words {
            self.decode_word(word, events);
        }
    }

    /// Decodes a buffer of raw bytes.
    ///
    /// Buffers may split a word anywhere: the incomplete tail of one buffer
    /// is completed with the leading bytes of the next.
    pub fn decode_bytes(&mut self, mut bytes: &[u8], events: &mut Vec<Event>) {
        if self.carry_len > 0 {
            let needed = WORD_BYTES - self.carry_len;
            let take = needed.min(bytes.len());
            self.carry[self.carry_len..self.carry_len + take].copy_from_slice(&bytes[..take]);
            self.carry_len += take;
            bytes = &bytes[take..];

            if self.carry_len < WORD_BYTES {
                return;
            }
            let word = parser::word_from_bytes(&self.carry);
            self.carry_len = 0;
            self.decode_word(word, events);
        }

        let mut words = bytes.chunks_exact(WORD_BYTES);
        for chunk in words.by_ref() {
            self.decode_word(parser::word_from_bytes(chunk), events);
        }

        let tail = words.remainder();
        self.carry[..tail.len()].copy_from_slice(tail);
        self.carry_len = tail.len();
    }

    /// Ends the byte stream, dropping an incomplete trailing word.
    ///
    /// Returns the number of bytes dropped.
    pub fn finish_bytes(&mut self) -> usize {
        let dropped = self.carry_len;
        if dropped > 0 {
            warn!(bytes = dropped, "input ends with an incomplete word, dropping it");
            self.stats.trailing_bytes += dropped as u64;
            self.carry_len = 0;
        }
        dropped
    }

    /// Computes the acquisition timing from the cycles seen so far.
    ///
    /// Logs a warning when the cycles are inconsistent.
    pub fn acquisition_timing(&self) -> Result<AcquisitionTiming, CorrelationError> {
        let result = self.correlator.correlate();
        match &result {
            Ok(timing) => debug!(cycles = timing.cycles, "acquisition timing computed"),
            Err(CorrelationError::NoCycles) => debug!("no acquisition cycles found"),
            Err(e) => warn!("{}, skipping acquisition timing", e),
        }
        result
    }

    /// Decodes a whole list-mode stream, handing events to `sink` per chunk.
    ///
    /// Skips the file header, then reads chunks of `chunk_size` bytes until the
    /// reader is exhausted. Events are flushed to the sink and dropped after
    /// every chunk; the time base and acquisition accumulators live for the
    /// whole stream. The decoder is reset first.
    pub fn decode_reader<R: Read, S: EventSink>(
        &mut self,
        mut reader: R,
        mut sink: S,
    ) -> Result<StreamSummary, DecodeError> {
        self.config.validate()?;
        self.reset();

        let header_len = self.config.header_len as u64;
        let skipped = io::copy(&mut reader.by_ref().take(header_len), &mut io::sink())?;
        if skipped < header_len {
            warn!(
                expected = header_len,
                found = skipped,
                "input is shorter than the file header"
            );
        }

        let mut buffer = vec![0u8; self.config.chunk_size];
        let mut events = Vec::new();

        loop {
            let bytes_read = read_chunk(&mut reader, &mut buffer)?;
            if bytes_read == 0 {
                break;
            }

            self.decode_bytes(&buffer[..bytes_read], &mut events);
            self.stats.chunks += 1;
            debug!(
                chunk = self.stats.chunks,
                bytes = bytes_read,
                events = events.len(),
                "decoded chunk"
            );

            sink.write_events(&events)?;
            events.clear();
        }

        self.finish_bytes();
        sink.flush()?;

        Ok(StreamSummary {
            acquisition: self.acquisition_timing(),
            stats: self.stats,
        })
    }

    /// Decodes a list-mode file from disk, handing events to `sink` per chunk.
    pub fn decode_file_to<P: AsRef<Path>, S: EventSink>(
        &mut self,
        path: P,
        sink: S,
    ) -> Result<StreamSummary, DecodeError> {
        let file = File::open(path.as_ref())?;
        self.decode_reader(BufReader::new(file), sink)
    }

    /// Decodes a list-mode file from disk into memory.
    pub fn decode_file<P: AsRef<Path>>(&mut self, path: P) -> Result<DecodeResult, DecodeError> {
        let mut events = Vec::new();
        let summary = self.decode_file_to(path, &mut events)?;
        Ok(DecodeResult {
            events,
            acquisition: summary.acquisition,
            stats: summary.stats,
        })
    }
}

/// Fills `buffer` from `reader`, stopping early only at end of input.
fn read_chunk<R: Read>(reader: &mut R, buffer: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        match reader.read(&mut buffer[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{COARSE_TICK_SECONDS, FINE_TICK_SECONDS};

    fn adc(channel: u16, fine: u16) -> u32 {
        0xC000_0000 | ((channel as u32 & 0x3FFF) << 16) | fine as u32
    }

    fn coarse(ticks: u32) -> u32 {
        0x8000_0000 | (ticks & 0x3FFF_FFFF)
    }

    fn to_bytes(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    #[test]
    fn test_decoder_initial_state() {
        let decoder = ListModeDecoder::new();
        assert_eq!(decoder.time_base().seconds(), 0.0);
        assert_eq!(decoder.pending_bytes(), 0);
        assert_eq!(decoder.stats().words, 0);
    }

    #[test]
    fn test_decode_simple_sequence() {
        let mut decoder = ListModeDecoder::new();
        let mut events = Vec::new();

        let words = vec![
            adc(10, 5),      // before any coarse word
            coarse(100),     // 1 s
            adc(20, 1000),   // 1 s + 200 us
            0x4000_0000,     // live time, skipped
            adc(16383, 0),   // 1 s
        ];
        decoder.decode_words(&words, &mut events);

        assert_eq!(events.len(), 3);
        assert_eq!(events[0], Event::new(10, 5.0 * FINE_TICK_SECONDS));
        assert_eq!(
            events[1],
            Event::new(20, 1000.0 * FINE_TICK_SECONDS + 100.0 * COARSE_TICK_SECONDS)
        );
        assert_eq!(events[2], Event::new(16383, 100.0 * COARSE_TICK_SECONDS));
        assert_eq!(decoder.stats().live_time_words, 1);
    }

    #[test]
    fn test_coarse_time_replaces_not_adds() {
        let mut decoder = ListModeDecoder::new();
        let mut events = Vec::new();

        decoder.decode_words(&[coarse(500), coarse(200), adc(1, 0)], &mut events);
        assert_eq!(events[0].timestamp, 200.0 * COARSE_TICK_SECONDS);

        // A smaller coarse value later in the file is not corrected for
        decoder.decode_words(&[coarse(50), adc(2, 0)], &mut events);
        assert_eq!(events[1].timestamp, 50.0 * COARSE_TICK_SECONDS);
    }

    #[test]
    fn test_coarse_round_trip() {
        for ticks in [0u32, 1, 12345, (1 << 30) - 1] {
            let mut decoder = ListModeDecoder::new();
            let mut events = Vec::new();
            decoder.decode_words(&[coarse(ticks), adc(0, 0)], &mut events);
            assert_eq!(events[0].timestamp, ticks as f64 * COARSE_TICK_SECONDS);
        }
    }

    #[test]
    fn test_hardware_readout_uses_time_base() {
        let mut decoder = ListModeDecoder::new();
        let mut events = Vec::new();

        decoder.decode_words(&[coarse(300), 0x0000_0010, 0x00AB_0020], &mut events);

        assert!(events.is_empty());
        assert_eq!(
            decoder.correlator().hardware_readouts(),
            &[
                16.0 * FINE_TICK_SECONDS + 300.0 * COARSE_TICK_SECONDS,
                32.0 * FINE_TICK_SECONDS + 300.0 * COARSE_TICK_SECONDS,
            ]
        );
        assert_eq!(decoder.time_base().ticks(), 300);
    }

    #[test]
    fn test_external_parts_accumulate() {
        let mut decoder = ListModeDecoder::new();
        let mut events = Vec::new();

        decoder.decode_words(
            &[0x0112_3456, 0x0278_9ABC, 0x03FF_DEF0, 0x0100_0001],
            &mut events,
        );

        assert_eq!(decoder.correlator().parts().counts(), [2, 1, 1]);
        assert_eq!(decoder.stats().external_time_words, [2, 1, 1]);
    }

    #[test]
    fn test_unknown_words_are_counted() {
        let mut decoder = ListModeDecoder::new();
        let mut events = Vec::new();

        decoder.decode_words(&[0x0400_0000, 0x3FFF_FFFF, adc(1, 1)], &mut events);

        assert_eq!(events.len(), 1);
        assert_eq!(decoder.stats().unknown_words, 2);
        assert_eq!(decoder.stats().words, 3);
    }

    #[test]
    fn test_decode_bytes_carries_partial_words() {
        let words = [coarse(7), adc(1, 2), adc(3, 4), 0x0000_0005, adc(5, 6)];
        let bytes = to_bytes(&words);

        let mut whole = Vec::new();
        ListModeDecoder::new().decode_words(&words, &mut whole);

        for split in [1usize, 3, 5, 6, 7] {
            let mut decoder = ListModeDecoder::new();
            let mut events = Vec::new();
            for piece in bytes.chunks(split) {
                decoder.decode_bytes(piece, &mut events);
            }
            assert_eq!(events, whole, "split size {}", split);
            assert_eq!(decoder.pending_bytes(), 0);
            assert_eq!(decoder.correlator().hardware_readouts().len(), 1);
        }
    }

    #[test]
    fn test_finish_bytes_drops_partial_word() {
        let mut decoder = ListModeDecoder::new();
        let mut events = Vec::new();

        let mut bytes = to_bytes(&[adc(9, 9)]);
        bytes.extend_from_slice(&[0xAA, 0xBB]);
        decoder.decode_bytes(&bytes, &mut events);

        assert_eq!(events.len(), 1);
        assert_eq!(decoder.pending_bytes(), 2);
        assert_eq!(decoder.finish_bytes(), 2);
        assert_eq!(decoder.pending_bytes(), 0);
        assert_eq!(decoder.stats().trailing_bytes, 2);
    }

    #[test]
    fn test_decode_reader_skips_header() {
        let mut input = vec![0xC0u8; 256]; // header bytes that look like ADC words
        input.extend(to_bytes(&[coarse(1), adc(42, 0)]));

        let mut events = Vec::new();
        let summary = ListModeDecoder::new()
            .decode_reader(input.as_slice(), &mut events)
            .unwrap();

        assert_eq!(events, vec![Event::new(42, COARSE_TICK_SECONDS)]);
        assert_eq!(summary.stats.words, 2);
        assert_eq!(summary.stats.chunks, 1);
        assert_eq!(summary.acquisition, Err(CorrelationError::NoCycles));
    }

    #[test]
    fn test_decode_reader_short_input() {
        let input = vec![0u8; 100];
        let mut events = Vec::new();
        let summary = ListModeDecoder::new()
            .decode_reader(input.as_slice(), &mut events)
            .unwrap();

        assert!(events.is_empty());
        assert_eq!(summary.stats.chunks, 0);
    }

    #[test]
    fn test_decode_reader_resets_state() {
        let mut input = vec![0u8; 256];
        input.extend(to_bytes(&[coarse(10), adc(1, 0), 0x0000_0000]));

        let mut decoder = ListModeDecoder::new();
        let mut first = Vec::new();
        let mut second = Vec::new();
        decoder.decode_reader(input.as_slice(), &mut first).unwrap();
        decoder.decode_reader(input.as_slice(), &mut second).unwrap();

        assert_eq!(first, second);
        assert_eq!(decoder.correlator().hardware_readouts().len(), 1);
        assert_eq!(decoder.stats().words, 3);
    }

    #[test]
    fn test_invalid_config() {
        let result = ListModeDecoder::with_config(DecoderConfig::with_chunk_size(6));
        assert!(matches!(
            result,
            Err(DecodeError::InvalidConfig(ConfigError::MisalignedChunkSize(6)))
        ));
    }

    #[test]
    fn test_oversized_chunk_is_rejected() {
        let config = DecoderConfig::with_chunk_size(crate::config::MAX_CHUNK_SIZE + WORD_BYTES);
        let result = ListModeDecoder::with_config(config);
        assert!(matches!(
            result,
            Err(DecodeError::InvalidConfig(ConfigError::ChunkTooLarge(_)))
        ));

        // decode_reader checks the config again
        let mut decoder = ListModeDecoder::new();
        decoder.config.chunk_size = config.chunk_size;
        let mut input = vec![0u8; 256];
        input.extend(to_bytes(&[adc(1, 1), coarse(2)]));
        let result = decoder.decode_reader(input.as_slice(), Vec::new());
        assert!(matches!(
            result,
            Err(DecodeError::InvalidConfig(ConfigError::ChunkTooLarge(_)))
        ));
    }

    #[test]
    fn test_missing_file() {
        let result = ListModeDecoder::new().decode_file("/nonexistent/run.Lis");
        assert!(matches!(result, Err(DecodeError::Io(_))));
    }
}
