//! Output writers for decoded list-mode data.
//!
//! Events are written as CSV (`ADC,TimeStamp`); acquisition timing goes to a
//! separate metadata file, either as text or as JSON.

use crate::correlation::{AcquisitionTiming, CorrelationError};
use crate::types::Event;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur during output writing.
#[derive(Error, Debug)]
pub enum OutputError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid format: {0}")]
    InvalidFormat(String),
}

/// Destination for decoded events.
///
/// The streaming decoder hands every chunk's events to the sink once, in file
/// order, and then discards them.
pub trait EventSink {
    /// Consumes one chunk of events.
    fn write_events(&mut self, events: &[Event]) -> Result<(), OutputError>;

    /// Called once after the last chunk.
    fn flush(&mut self) -> Result<(), OutputError> {
        Ok(())
    }
}

impl EventSink for Vec<Event> {
    fn write_events(&mut self, events: &[Event]) -> Result<(), OutputError> {
        self.extend_from_slice(events);
        Ok(())
    }
}

impl<S: EventSink + ?Sized> EventSink for &mut S {
    fn write_events(&mut self, events: &[Event]) -> Result<(), OutputError> {
        (**self).write_events(events)
    }

    fn flush(&mut self) -> Result<(), OutputError> {
        (**self).flush()
    }
}

/// Float formatted with the shortest round-trip digits, a trailing `.0` on
/// whole numbers and a signed two-digit exponent below 1e-4 or from 1e16,
/// so `2.0` and `1e-06` come out as in existing list-mode CSVs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReprFloat(pub f64);

impl fmt::Display for ReprFloat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = self.0;
        if value == 0.0 || !value.is_finite() || (1e-4..1e16).contains(&value.abs()) {
            return write!(f, "{:?}", value);
        }
        let scientific = format!("{:e}", value);
        let (mantissa, exponent) = scientific.split_once('e').unwrap_or((scientific.as_str(), "0"));
        let (sign, digits) = match exponent.strip_prefix('-') {
            Some(digits) => ('-', digits),
            None => ('+', exponent),
        };
        write!(f, "{}e{}{:0>2}", mantissa, sign, digits)
    }
}

/// Header row of the event CSV.
pub const CSV_HEADER: &str = "ADC,TimeStamp";

/// CSV writer for events.
///
/// The header row is written before the first batch (or on flush if no batch
/// was ever written).
pub struct CsvWriter<W: Write> {
    writer: BufWriter<W>,
    header_pending: bool,
}

impl<W: Write> CsvWriter<W> {
    /// Creates a new CSV writer that emits the header row.
    pub fn new(writer: W) -> Self {
        Self::with_header(writer, true)
    }

    /// Creates a CSV writer, optionally without a header row (for appending).
    pub fn with_header(writer: W, header: bool) -> Self {
        Self {
            writer: BufWriter::new(writer),
            header_pending: header,
        }
    }

    fn write_header_once(&mut self) -> Result<(), OutputError> {
        if self.header_pending {
            writeln!(self.writer, "{}", CSV_HEADER)?;
            self.header_pending = false;
        }
        Ok(())
    }

    /// Writes a single event.
    #[inline]
    fn write_event(&mut self, event: &Event) -> Result<(), OutputError> {
        writeln!(self.writer, "{},{}", event.channel, ReprFloat(event.timestamp))?;
        Ok(())
    }

    /// Consumes the writer and returns the underlying sink.
    pub fn into_inner(mut self) -> Result<W, OutputError> {
        self.write_header_once()?;
        self.writer
            .into_inner()
            .map_err(|e| OutputError::Io(e.into_error()))
    }
}

impl<W: Write> EventSink for CsvWriter<W> {
    fn write_events(&mut self, events: &[Event]) -> Result<(), OutputError> {
        self.write_header_once()?;
        for event in events {
            self.write_event(event)?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), OutputError> {
        self.write_header_once()?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Metadata file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MetadataFormat {
    /// Plain text, two lines
    #[default]
    Text,
    /// Pretty-printed JSON
    Json,
}

impl std::str::FromStr for MetadataFormat {
    type Err = OutputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "txt" | "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(OutputError::InvalidFormat(format!(
                "Unknown metadata format: {}. Use txt or json",
                other
            ))),
        }
    }
}

impl MetadataFormat {
    /// File extension used for this format.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Text => "txt",
            Self::Json => "json",
        }
    }
}

/// Path of the metadata file belonging to an event output file.
///
/// `run/data.csv` becomes `run/data_metaData.txt`.
pub fn metadata_path<P: AsRef<Path>>(output: P, format: MetadataFormat) -> PathBuf {
    let output = output.as_ref();
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    output.with_file_name(format!("{}_metaData.{}", stem, format.extension()))
}

/// Writes acquisition timing as text.
pub fn write_metadata_text<W: Write>(
    mut writer: W,
    timing: &AcquisitionTiming,
) -> Result<(), OutputError> {
    let start = if timing.start.timestamp_subsec_micros() == 0 {
        timing.start.format("%Y-%m-%d %H:%M:%S")
    } else {
        timing.start.format("%Y-%m-%d %H:%M:%S%.6f")
    };
    let offset = &timing.offset;
    writeln!(writer, "First UMCBI TimeStamp: {}", start)?;
    writeln!(
        writer,
        "Hardware Response Time: {} +/- {} s ({}, {}) (min, max)",
        ReprFloat(offset.mean),
        ReprFloat(offset.std_dev),
        ReprFloat(offset.min),
        ReprFloat(offset.max)
    )?;
    Ok(())
}

/// Writes acquisition timing as JSON.
pub fn write_metadata_json<W: Write>(
    mut writer: W,
    timing: &AcquisitionTiming,
) -> Result<(), OutputError> {
    serde_json::to_writer_pretty(&mut writer, timing)?;
    writeln!(writer)?;
    Ok(())
}

/// Writes acquisition timing to a file.
pub fn write_metadata<P: AsRef<Path>>(
    path: P,
    timing: &AcquisitionTiming,
    format: MetadataFormat,
    append: bool,
) -> Result<(), OutputError> {
    let file = open_output(path, append)?;
    let mut writer = BufWriter::new(file);
    match format {
        MetadataFormat::Text => write_metadata_text(&mut writer, timing)?,
        MetadataFormat::Json => write_metadata_json(&mut writer, timing)?,
    }
    writer.flush()?;
    Ok(())
}

/// Writes the metadata file next to `output` when acquisition timing is
/// available.
///
/// Returns the path written, or `None` when the timing was skipped.
pub fn write_acquisition<P: AsRef<Path>>(
    output: P,
    acquisition: &Result<AcquisitionTiming, CorrelationError>,
    format: MetadataFormat,
    append: bool,
) -> Result<Option<PathBuf>, OutputError> {
    let Ok(timing) = acquisition else {
        return Ok(None);
    };
    let path = metadata_path(output, format);
    write_metadata(&path, timing, format, append)?;
    Ok(Some(path))
}

/// Opens an output file, truncating it or appending to it.
pub fn open_output<P: AsRef<Path>>(path: P, append: bool) -> Result<File, OutputError> {
    let file = if append {
        OpenOptions::new().create(true).append(true).open(path)?
    } else {
        File::create(path)?
    };
    Ok(file)
}

/// Opens a CSV event writer on a file.
///
/// When appending to a non-empty file the header row is not repeated.
pub fn create_csv<P: AsRef<Path>>(path: P, append: bool) -> Result<CsvWriter<File>, OutputError> {
    let file = open_output(path, append)?;
    let header = !append || file.metadata()?.len() == 0;
    Ok(CsvWriter::with_header(file, header))
}

/// Writes events to a CSV file.
pub fn write_csv<P: AsRef<Path>>(path: P, events: &[Event]) -> Result<(), OutputError> {
    let mut writer = create_csv(path, false)?;
    writer.write_events(events)?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MAX_CHANNEL;
    use crate::correlation::OffsetStats;
    use chrono::{TimeZone, Utc};
    use std::str::FromStr;

    fn timing() -> AcquisitionTiming {
        AcquisitionTiming {
            start: Utc.with_ymd_and_hms(2024, 1, 1, 12, 30, 0).unwrap(),
            offset: OffsetStats {
                mean: 0.5,
                std_dev: 0.25,
                min: 0.25,
                max: 0.75,
            },
            cycles: 3,
        }
    }

    #[test]
    fn test_csv_writer() {
        let mut writer = CsvWriter::new(Vec::new());
        writer
            .write_events(&[Event::new(100, 0.5), Event::new(16383, 1.25)])
            .unwrap();
        writer.write_events(&[Event::new(7, 2.0)]).unwrap();

        let output = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        assert_eq!(output, "ADC,TimeStamp\n100,0.5\n16383,1.25\n7,2.0\n");
    }

    #[test]
    fn test_csv_writer_header_on_empty_output() {
        let mut writer = CsvWriter::new(Vec::new());
        writer.write_events(&[]).unwrap();
        writer.write_events(&[]).unwrap();
        let output = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        assert_eq!(output, "ADC,TimeStamp\n");
    }

    #[test]
    fn test_csv_writer_without_header() {
        let mut writer = CsvWriter::with_header(Vec::new(), false);
        writer.write_events(&[Event::new(1, 0.25)]).unwrap();
        let output = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        assert_eq!(output, "1,0.25\n");
    }

    #[test]
    fn test_repr_float() {
        assert_eq!(ReprFloat(0.0).to_string(), "0.0");
        assert_eq!(ReprFloat(2.0).to_string(), "2.0");
        assert_eq!(ReprFloat(0.5).to_string(), "0.5");
        assert_eq!(ReprFloat(0.0001).to_string(), "0.0001");
        assert_eq!(ReprFloat(1e-6).to_string(), "1e-06");
        assert_eq!(ReprFloat(2.5e-5).to_string(), "2.5e-05");
        assert_eq!(ReprFloat(-0.001).to_string(), "-0.001");
        assert_eq!(ReprFloat(1e16).to_string(), "1e+16");
        assert_eq!(ReprFloat(1.2345e-123).to_string(), "1.2345e-123");
        assert_eq!(ReprFloat(10737418.23).to_string(), "10737418.23");
    }

    #[test]
    fn test_write_csv_truncates_existing_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("data.csv");
        std::fs::write(&path, "stale contents\nfrom an earlier run\n").unwrap();

        write_csv(&path, &[Event::new(3, 0.75), Event::new(MAX_CHANNEL, 1.0)]).unwrap();

        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "ADC,TimeStamp\n3,0.75\n16383,1.0\n"
        );

        write_csv(&path, &[]).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "ADC,TimeStamp\n");
    }

    #[test]
    fn test_write_acquisition() {
        let dir = tempfile::TempDir::new().unwrap();
        let output = dir.path().join("data.csv");

        let skipped = write_acquisition(
            &output,
            &Err(CorrelationError::NoCycles),
            MetadataFormat::Text,
            false,
        )
        .unwrap();
        assert_eq!(skipped, None);
        assert!(!dir.path().join("data_metaData.txt").exists());

        let written = write_acquisition(&output, &Ok(timing()), MetadataFormat::Json, false)
            .unwrap()
            .expect("metadata path");
        assert_eq!(written, dir.path().join("data_metaData.json"));
        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&written).unwrap()).unwrap();
        assert_eq!(value["cycles"], 3);
    }

    #[test]
    fn test_vec_sink() {
        let mut sink: Vec<Event> = Vec::new();
        sink.write_events(&[Event::new(1, 0.0)]).unwrap();
        sink.write_events(&[Event::new(2, 1.0)]).unwrap();
        assert_eq!(sink, vec![Event::new(1, 0.0), Event::new(2, 1.0)]);
    }

    #[test]
    fn test_metadata_format_parsing() {
        assert_eq!(MetadataFormat::from_str("txt").unwrap(), MetadataFormat::Text);
        assert_eq!(MetadataFormat::from_str("JSON").unwrap(), MetadataFormat::Json);
        assert!(MetadataFormat::from_str("xml").is_err());
    }

    #[test]
    fn test_metadata_path() {
        assert_eq!(
            metadata_path("run/data.csv", MetadataFormat::Text),
            PathBuf::from("run/data_metaData.txt")
        );
        assert_eq!(
            metadata_path("data.csv", MetadataFormat::Json),
            PathBuf::from("data_metaData.json")
        );
    }

    #[test]
    fn test_metadata_text() {
        let mut output = Vec::new();
        write_metadata_text(&mut output, &timing()).unwrap();
        let output = String::from_utf8(output).unwrap();
        assert_eq!(
            output,
            "First UMCBI TimeStamp: 2024-01-01 12:30:00\n\
             Hardware Response Time: 0.5 +/- 0.25 s (0.25, 0.75) (min, max)\n"
        );
    }

    #[test]
    fn test_metadata_json() {
        let mut output = Vec::new();
        write_metadata_json(&mut output, &timing()).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&output).unwrap();
        assert_eq!(value["cycles"], 3);
        assert_eq!(value["offset"]["mean"], 0.5);
        assert_eq!(value["start"], "2024-01-01T12:30:00Z");
    }
}
