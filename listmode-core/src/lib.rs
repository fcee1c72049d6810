//! List-mode decoder library for spectrometer event streams.
//!
//! This crate decodes the binary list-mode (`.Lis`) stream written by a
//! multichannel analyzer into energy/timestamp events, and correlates the
//! instrument clock with the external file-time stamps of the acquisition
//! software to measure the hardware response delay.
//!
//! # Example
//!
//! ```no_run
//! use listmode_core::decoder::ListModeDecoder;
//!
//! let mut decoder = ListModeDecoder::new();
//! let result = decoder.decode_file("run.Lis").unwrap();
//!
//! println!("Decoded {} events", result.events.len());
//! if let Ok(timing) = &result.acquisition {
//!     println!("Acquisition started at {}", timing.start);
//! }
//! ```
//!
//! # Streaming
//!
//! Large files are decoded chunk by chunk with
//! [`ListModeDecoder::decode_file_to`], which hands each chunk's events to an
//! [`EventSink`] (for example a [`output::CsvWriter`]) and keeps only the
//! clock state and acquisition cycles in memory.

pub mod config;
pub mod correlation;
pub mod decoder;
pub mod output;
pub mod parser;
pub mod types;

// Re-export commonly used types
pub use config::{ConfigError, DecoderConfig};
pub use correlation::{AcquisitionTiming, CorrelationError, OffsetStats};
pub use decoder::{DecodeError, ListModeDecoder};
pub use output::{CsvWriter, EventSink, MetadataFormat, OutputError};
pub use types::{DecodeResult, DecodeStats, Event, StreamSummary, TimeBase, WordTag};
