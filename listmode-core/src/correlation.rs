//! Correlation of the instrument clock with the external file-time clock.
//!
//! At the start of every acquisition cycle the acquisition software stamps
//! the stream with a 64-bit file-time (100 ns ticks since 1601-01-01 UTC)
//! split over three words, and at the end of the cycle the instrument writes
//! a hardware readout of its own clock. Comparing the elapsed external time
//! with the hardware readout of each cycle gives the systematic delay
//! between the two clocks.

use crate::config::EXTERNAL_TICKS_PER_SECOND;
use byteorder::{ByteOrder, LittleEndian};
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::Serialize;
use thiserror::Error;

/// Reasons the acquisition timing cannot be computed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CorrelationError {
    #[error(
        "incomplete external timestamps ({part1} part-1, {part2} part-2, {part3} part-3 words)"
    )]
    IncompleteExternalTime {
        part1: usize,
        part2: usize,
        part3: usize,
    },

    #[error("unpaired external/hardware timestamps ({external} external, {hardware} hardware)")]
    UnpairedReadouts { external: usize, hardware: usize },

    #[error("no acquisition cycles recorded")]
    NoCycles,

    #[error("external timestamp of cycle {cycle} is out of range ({ticks} ticks)")]
    TimestampOutOfRange { cycle: usize, ticks: u64 },
}

/// Statistics of the offset between the external clock and the hardware clock.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OffsetStats {
    /// Mean offset in seconds
    pub mean: f64,
    /// Population standard deviation in seconds
    pub std_dev: f64,
    /// Smallest offset in seconds
    pub min: f64,
    /// Largest offset in seconds
    pub max: f64,
}

impl OffsetStats {
    /// Computes the statistics of a set of samples. Returns `None` if empty.
    pub fn from_samples(samples: &[f64]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }

        let n = samples.len() as f64;
        let mean = samples.iter().sum::<f64>() / n;
        let variance = samples.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n;
        let min = samples.iter().copied().fold(f64::INFINITY, f64::min);
        let max = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        Some(Self {
            mean,
            std_dev: variance.sqrt(),
            min,
            max,
        })
    }
}

/// Acquisition start time and hardware response statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AcquisitionTiming {
    /// External timestamp of the first acquisition cycle
    pub start: DateTime<Utc>,
    /// Offset of external elapsed time over hardware time
    pub offset: OffsetStats,
    /// Number of acquisition cycles used
    pub cycles: usize,
}

/// Raw external-time fragments, one entry per acquisition cycle and part.
#[derive(Debug, Clone, Default)]
pub struct ExternalTimeParts {
    part1: Vec<u32>,
    part2: Vec<u32>,
    part3: Vec<u16>,
}

impl ExternalTimeParts {
    /// Number of fragments collected for each part.
    pub fn counts(&self) -> [usize; 3] {
        [self.part1.len(), self.part2.len(), self.part3.len()]
    }

    /// Returns the common length, or an error if the parts disagree.
    fn aligned_len(&self) -> Result<usize, CorrelationError> {
        let [part1, part2, part3] = self.counts();
        if part1 == part2 && part2 == part3 {
            Ok(part1)
        } else {
            Err(CorrelationError::IncompleteExternalTime {
                part1,
                part2,
                part3,
            })
        }
    }

    /// Assembled file-time of cycle `i`.
    fn file_time(&self, i: usize) -> u64 {
        assemble_file_time(self.part1[i], self.part2[i], self.part3[i])
    }
}

/// Accumulates external-time parts and hardware readouts over a whole file.
#[derive(Debug, Clone, Default)]
pub struct AcquisitionTimeCorrelator {
    parts: ExternalTimeParts,
    hardware_readouts: Vec<f64>,
}

impl AcquisitionTimeCorrelator {
    /// Creates an empty correlator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears all accumulated cycles.
    pub fn clear(&mut self) {
        self.parts = ExternalTimeParts::default();
        self.hardware_readouts.clear();
    }

    #[inline]
    pub fn push_part1(&mut self, fragment: u32) {
        self.parts.part1.push(fragment);
    }

    #[inline]
    pub fn push_part2(&mut self, fragment: u32) {
        self.parts.part2.push(fragment);
    }

    #[inline]
    pub fn push_part3(&mut self, fragment: u16) {
        self.parts.part3.push(fragment);
    }

    /// Records a hardware readout (seconds, instrument clock).
    #[inline]
    pub fn push_hardware_readout(&mut self, seconds: f64) {
        self.hardware_readouts.push(seconds);
    }

    pub fn parts(&self) -> &ExternalTimeParts {
        &self.parts
    }

    pub fn hardware_readouts(&self) -> &[f64] {
        &self.hardware_readouts
    }

    /// Checks that every cycle has all three parts and one hardware readout.
    ///
    /// Returns the number of complete cycles.
    pub fn check_alignment(&self) -> Result<usize, CorrelationError> {
        let external = self.parts.aligned_len()?;
        let hardware = self.hardware_readouts.len();
        if external != hardware {
            return Err(CorrelationError::UnpairedReadouts { external, hardware });
        }
        if external == 0 {
            return Err(CorrelationError::NoCycles);
        }
        Ok(external)
    }

    /// Reconstructs the external timestamp of every cycle.
    pub fn external_timestamps(&self) -> Result<Vec<DateTime<Utc>>, CorrelationError> {
        let cycles = self.parts.aligned_len()?;
        (0..cycles)
            .map(|cycle| {
                let ticks = self.parts.file_time(cycle);
                file_time_to_utc(ticks)
                    .ok_or(CorrelationError::TimestampOutOfRange { cycle, ticks })
            })
            .collect()
    }

    /// Computes the acquisition start and the hardware offset statistics.
    pub fn correlate(&self) -> Result<AcquisitionTiming, CorrelationError> {
        let cycles = self.check_alignment()?;
        let timestamps = self.external_timestamps()?;
        let start = timestamps[0];

        let offsets: Vec<f64> = timestamps
            .iter()
            .zip(&self.hardware_readouts)
            .map(|(t, hardware)| elapsed_seconds(start, *t) - hardware)
            .collect();

        let offset = OffsetStats::from_samples(&offsets).ok_or(CorrelationError::NoCycles)?;

        Ok(AcquisitionTiming {
            start,
            offset,
            cycles,
        })
    }
}

/// Assembles a 64-bit file-time from its three fragments.
///
/// The fragments hold the file-time bytes least significant first:
/// part 1 carries bytes 0-2, part 2 bytes 3-5 and part 3 bytes 6-7.
pub fn assemble_file_time(part1: u32, part2: u32, part3: u16) -> u64 {
    let mut bytes = [0u8; 8];
    LittleEndian::write_u24(&mut bytes[0..3], part1 & 0x00FF_FFFF);
    LittleEndian::write_u24(&mut bytes[3..6], part2 & 0x00FF_FFFF);
    LittleEndian::write_u16(&mut bytes[6..8], part3);
    LittleEndian::read_u64(&bytes)
}

/// Converts a file-time tick count into a UTC timestamp.
///
/// The sub-second part is rounded to the millisecond (half to even) before
/// being applied, so tick noise below 1 ms does not reach the timestamp.
/// Returns `None` if the result is outside the supported calendar range.
pub fn file_time_to_utc(ticks: u64) -> Option<DateTime<Utc>> {
    const TICKS_PER_MILLI: u64 = EXTERNAL_TICKS_PER_SECOND / 1000;

    let seconds = ticks / EXTERNAL_TICKS_PER_SECOND;
    let remainder = ticks % EXTERNAL_TICKS_PER_SECOND;

    let mut millis = remainder / TICKS_PER_MILLI;
    let rest = remainder % TICKS_PER_MILLI;
    let half = TICKS_PER_MILLI / 2;
    if rest > half || (rest == half && millis % 2 == 1) {
        millis += 1;
    }

    file_time_epoch()?
        .checked_add_signed(Duration::seconds(i64::try_from(seconds).ok()?))?
        .checked_add_signed(Duration::microseconds(millis as i64 * 1000))
}

/// The file-time epoch, 1601-01-01T00:00:00 UTC.
pub fn file_time_epoch() -> Option<DateTime<Utc>> {
    Utc.with_ymd_and_hms(1601, 1, 1, 0, 0, 0).single()
}

/// Seconds from `from` to `to`, at microsecond resolution.
fn elapsed_seconds(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    let delta = to - from;
    match delta.num_microseconds() {
        Some(us) => us as f64 / 1e6,
        None => delta.num_milliseconds() as f64 / 1e3,
    }
}
