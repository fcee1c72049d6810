//! Core types for list-mode event data.
//!
//! This module defines the decoded event structure, the word classes found in
//! the list-mode stream and the coarse time register shared between them.

use crate::config::{COARSE_TICK_SECONDS, FINE_TICK_SECONDS};
use crate::correlation::{AcquisitionTiming, CorrelationError};

/// A decoded detection event.
///
/// Each event carries the 14-bit energy channel reported by the ADC and the
/// absolute timestamp in seconds since the first coarse-time word of the file.
#[derive(Debug, Clone, Copy, PartialEq)]
#[repr(C)]
pub struct Event {
    /// Energy channel (0-16383)
    pub channel: u16,
    /// Timestamp in seconds
    pub timestamp: f64,
}

impl Event {
    /// Creates a new event.
    #[inline]
    pub fn new(channel: u16, timestamp: f64) -> Self {
        Self { channel, timestamp }
    }
}

/// List-mode word classes.
///
/// The class of a 32-bit word is encoded in its most significant byte (B3, the
/// last byte of the word in file order). The two high bits select the data
/// word classes; when both are clear the whole byte selects a clock word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WordTag {
    /// ADC event: energy channel and fine time (`11xx_xxxx`)
    Adc,
    /// Coarse (real) time register update (`10xx_xxxx`)
    CoarseTime,
    /// Live time word (`01xx_xxxx`), not decoded
    LiveTime,
    /// Hardware clock readout at the end of an acquisition cycle (`0x00`)
    HardwareReadout,
    /// External file-time, low 24 bits (`0x01`)
    ExternalTime1,
    /// External file-time, middle 24 bits (`0x02`)
    ExternalTime2,
    /// External file-time, high 16 bits (`0x03`)
    ExternalTime3,
    /// Any other encoder byte; skipped
    Unknown(u8),
}

impl WordTag {
    /// Classifies a word from its encoder byte (B3).
    #[inline]
    pub fn from_encoder_byte(b3: u8) -> Self {
        match b3 >> 6 {
            0b11 => Self::Adc,
            0b10 => Self::CoarseTime,
            0b01 => Self::LiveTime,
            _ => match b3 {
                0x00 => Self::HardwareReadout,
                0x01 => Self::ExternalTime1,
                0x02 => Self::ExternalTime2,
                0x03 => Self::ExternalTime3,
                other => Self::Unknown(other),
            },
        }
    }

    /// Returns true for word classes the decoder skips.
    #[inline]
    pub fn is_ignored(&self) -> bool {
        matches!(self, Self::LiveTime | Self::Unknown(_))
    }
}

/// The coarse time register.
///
/// Set (never incremented) by every coarse-time word and added to the fine
/// time of every subsequent ADC and hardware-readout word. Starts at zero.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TimeBase {
    ticks: u32,
    seconds: f64,
}

impl TimeBase {
    /// Replaces the register with a new coarse tick count.
    #[inline]
    pub fn set(&mut self, ticks: u32) {
        self.ticks = ticks;
        self.seconds = ticks as f64 * COARSE_TICK_SECONDS;
    }

    /// Raw coarse tick count (10 ms units).
    #[inline]
    pub fn ticks(&self) -> u32 {
        self.ticks
    }

    /// Current coarse time in seconds.
    #[inline]
    pub fn seconds(&self) -> f64 {
        self.seconds
    }

    /// Absolute time of a fine tick count relative to this time base.
    #[inline]
    pub fn absolute(&self, fine_ticks: u16) -> f64 {
        fine_ticks as f64 * FINE_TICK_SECONDS + self.seconds
    }
}

/// Counters collected while decoding a stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeStats {
    /// Complete words decoded
    pub words: u64,
    /// ADC words, i.e. emitted events
    pub events: u64,
    /// Coarse-time words
    pub coarse_time_words: u64,
    /// Hardware-readout words
    pub hardware_readouts: u64,
    /// External-time words, per part
    pub external_time_words: [u64; 3],
    /// Live-time words (skipped)
    pub live_time_words: u64,
    /// Words with an unrecognised encoder byte (skipped)
    pub unknown_words: u64,
    /// Chunks read from the input
    pub chunks: u64,
    /// Bytes left over at the end of the stream that did not form a word
    pub trailing_bytes: u64,
}

/// Result of decoding a whole list-mode file into memory.
#[derive(Debug)]
pub struct DecodeResult {
    /// Decoded events in file order
    pub events: Vec<Event>,
    /// Acquisition timing, or the reason it could not be computed
    pub acquisition: Result<AcquisitionTiming, CorrelationError>,
    /// Word and chunk counters
    pub stats: DecodeStats,
}

/// Result of decoding a stream whose events went to an external sink.
#[derive(Debug)]
pub struct StreamSummary {
    /// Acquisition timing, or the reason it could not be computed
    pub acquisition: Result<AcquisitionTiming, CorrelationError>,
    /// Word and chunk counters
    pub stats: DecodeStats,
}
