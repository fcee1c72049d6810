#![allow(clippy::unusual_byte_groupings)]
//! Low-level parsing of 32-bit list-mode words.
//!
//! Words are stored as four bytes B0..B3 in file order. They are read as
//! little-endian `u32`, so B0 occupies bits 7:0 and the encoder byte B3
//! occupies bits 31:24.

use crate::config::MAX_CHANNEL;
use crate::types::WordTag;
use byteorder::{ByteOrder, LittleEndian};

/// Reads one word from the first four bytes of `bytes`.
///
/// Panics if fewer than four bytes are given.
#[inline]
pub fn word_from_bytes(bytes: &[u8]) -> u32 {
    LittleEndian::read_u32(bytes)
}

/// Extracts the encoder byte (B3) of a word.
#[inline]
pub fn encoder_byte(word: u32) -> u8 {
    (word >> 24) as u8
}

/// Classifies a word by its encoder byte.
#[inline]
pub fn classify(word: u32) -> WordTag {
    WordTag::from_encoder_byte(encoder_byte(word))
}

/// Extracts the 16-bit fine time tick count (B1:B0).
///
/// Shared by ADC and hardware-readout words.
#[inline]
pub fn fine_time_ticks(word: u32) -> u16 {
    (word & 0xFFFF) as u16 // bits 15:0
}

// ============================================================================
// ADC (B3 = 11xx_xxxx)
// Bits: [31:30] tag | [29:16] channel | [15:0] fine time
// ============================================================================

/// Extracts the 14-bit energy channel from an ADC word.
///
/// The low six bits of B3 are the high part of the channel, B2 the low part.
#[inline]
pub fn adc_channel(word: u32) -> u16 {
    (word >> 16) as u16 & MAX_CHANNEL // bits 29:16
}

// ============================================================================
// Coarse time (B3 = 10xx_xxxx)
// Bits: [31:30] tag | [29:0] coarse ticks (10 ms)
// ============================================================================

/// Extracts the 30-bit coarse tick count from a coarse-time word.
#[inline]
pub fn coarse_time_ticks(word: u32) -> u32 {
    word & 0x3FFF_FFFF // bits 29:0
}

// ============================================================================
// Hardware readout (B3 = 0x00)
// Bits: [31:24] tag | [23:16] unused | [15:0] fine time
// The fine time is read with `fine_time_ticks`.
// ============================================================================

// ============================================================================
// External time parts (B3 = 0x01, 0x02, 0x03)
// Part 1/2 bits: [31:24] tag | [23:0] fragment
// Part 3 bits:   [31:24] tag | [23:16] unused | [15:0] fragment
// ============================================================================

/// Extracts the 24-bit fragment (B0, B1, B2) of an external-time part 1 or 2 word.
#[inline]
pub fn external_time_fragment(word: u32) -> u32 {
    word & 0x00FF_FFFF // bits 23:0
}

/// Extracts the 16-bit fragment (B0, B1) of an external-time part 3 word.
#[inline]
pub fn external_time_tail(word: u32) -> u16 {
    (word & 0xFFFF) as u16 // bits 15:0
}
