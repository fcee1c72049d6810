//! Python bindings for the list-mode decoder with numpy array output.
//!
//! This module provides Python bindings using PyO3 that decode list-mode
//! files into columnar numpy arrays of energy channels and timestamps.

use listmode_core::{
    AcquisitionTiming, DecodeError, DecodeStats, DecoderConfig, Event, ListModeDecoder,
};
use numpy::{IntoPyArray, PyArray1};
use pyo3::exceptions::{PyIOError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::PyDict;
use std::path::PathBuf;

/// Container for decoded events.
///
/// The data is stored in columnar format (separate arrays for channel and
/// timestamp) which maps directly onto numpy arrays.
#[pyclass]
pub struct Events {
    /// Energy channels
    channel: Vec<u16>,
    /// Timestamps in seconds
    timestamp: Vec<f64>,
    /// Acquisition timing, if it could be computed
    acquisition: Option<AcquisitionTiming>,
    /// Why acquisition timing is missing
    acquisition_error: Option<String>,
    /// Decode counters
    stats: DecodeStats,
}

#[pymethods]
impl Events {
    /// Returns the number of events.
    fn __len__(&self) -> usize {
        self.channel.len()
    }

    /// Returns a string representation.
    fn __repr__(&self) -> String {
        match &self.acquisition {
            Some(timing) => format!(
                "Events(count={}, start={}, cycles={})",
                self.channel.len(),
                timing.start,
                timing.cycles
            ),
            None => format!("Events(count={})", self.channel.len()),
        }
    }

    /// Returns the energy channels as a numpy array.
    #[getter]
    fn channel<'py>(&self, py: Python<'py>) -> &'py PyArray1<u16> {
        self.channel.clone().into_pyarray(py)
    }

    /// Alias for channel, matching the CSV column name.
    #[getter]
    fn adc<'py>(&self, py: Python<'py>) -> &'py PyArray1<u16> {
        self.channel.clone().into_pyarray(py)
    }

    /// Returns the timestamps as a numpy array (in seconds).
    #[getter]
    fn timestamp<'py>(&self, py: Python<'py>) -> &'py PyArray1<f64> {
        self.timestamp.clone().into_pyarray(py)
    }

    /// Alias for timestamp (shorter name).
    #[getter]
    fn t<'py>(&self, py: Python<'py>) -> &'py PyArray1<f64> {
        self.timestamp.clone().into_pyarray(py)
    }

    /// Returns the acquisition timing as a dictionary, or None.
    ///
    /// Keys: start (ISO 8601 string), mean, std, min, max (seconds), cycles.
    #[getter]
    fn acquisition<'py>(&self, py: Python<'py>) -> PyResult<Option<PyObject>> {
        let Some(timing) = &self.acquisition else {
            return Ok(None);
        };
        let dict = PyDict::new(py);
        dict.set_item("start", timing.start.to_rfc3339())?;
        dict.set_item("mean", timing.offset.mean)?;
        dict.set_item("std", timing.offset.std_dev)?;
        dict.set_item("min", timing.offset.min)?;
        dict.set_item("max", timing.offset.max)?;
        dict.set_item("cycles", timing.cycles)?;
        Ok(Some(dict.into()))
    }

    /// Returns the reason acquisition timing was skipped, or None.
    #[getter]
    fn acquisition_error(&self) -> Option<String> {
        self.acquisition_error.clone()
    }

    /// Returns the decode counters as a dictionary.
    fn stats<'py>(&self, py: Python<'py>) -> PyResult<PyObject> {
        let stats = &self.stats;
        let dict = PyDict::new(py);
        dict.set_item("words", stats.words)?;
        dict.set_item("events", stats.events)?;
        dict.set_item("coarse_time_words", stats.coarse_time_words)?;
        dict.set_item("hardware_readouts", stats.hardware_readouts)?;
        dict.set_item("external_time_words", stats.external_time_words.to_vec())?;
        dict.set_item("live_time_words", stats.live_time_words)?;
        dict.set_item("unknown_words", stats.unknown_words)?;
        dict.set_item("chunks", stats.chunks)?;
        dict.set_item("trailing_bytes", stats.trailing_bytes)?;
        Ok(dict.into())
    }

    /// Returns the event arrays as a dictionary.
    ///
    /// This is useful for creating a pandas DataFrame.
    fn to_dict<'py>(&self, py: Python<'py>) -> PyResult<PyObject> {
        let dict = PyDict::new(py);
        dict.set_item("ADC", self.channel.clone().into_pyarray(py))?;
        dict.set_item("TimeStamp", self.timestamp.clone().into_pyarray(py))?;
        Ok(dict.into())
    }
}

impl Events {
    /// Creates an Events container from decoded events and the decode summary.
    fn from_decoded(
        events: Vec<Event>,
        acquisition: Result<AcquisitionTiming, listmode_core::CorrelationError>,
        stats: DecodeStats,
    ) -> Self {
        let len = events.len();
        let mut channel = Vec::with_capacity(len);
        let mut timestamp = Vec::with_capacity(len);

        for event in events {
            channel.push(event.channel);
            timestamp.push(event.timestamp);
        }

        let (acquisition, acquisition_error) = match acquisition {
            Ok(timing) => (Some(timing), None),
            Err(e) => (None, Some(e.to_string())),
        };

        Self {
            channel,
            timestamp,
            acquisition,
            acquisition_error,
            stats,
        }
    }
}

fn to_py_err(e: DecodeError) -> PyErr {
    match e {
        DecodeError::InvalidConfig(e) => PyValueError::new_err(e.to_string()),
        other => PyIOError::new_err(format!("Failed to decode file: {}", other)),
    }
}

/// Decodes a list-mode .Lis file and returns the events.
///
/// Args:
///     path: Path to the .Lis file
///     chunk_size: Bytes read per chunk (default: 2 MiB, multiple of 4)
///
/// Returns:
///     Events: Container with channel and timestamp arrays
///
/// Example:
///     >>> import listmode
///     >>> events = listmode.decode_file("run.Lis")
///     >>> print(f"Decoded {len(events)} events")
///     >>> energy = events.channel
///     >>> print(events.acquisition)
#[pyfunction]
#[pyo3(signature = (path, chunk_size=2 * 1024 * 1024))]
fn decode_file(py: Python<'_>, path: &str, chunk_size: usize) -> PyResult<Py<Events>> {
    let path = PathBuf::from(path);

    let mut decoder =
        ListModeDecoder::with_config(DecoderConfig::with_chunk_size(chunk_size)).map_err(to_py_err)?;
    let result = py
        .allow_threads(|| decoder.decode_file(&path))
        .map_err(to_py_err)?;

    let events = Events::from_decoded(result.events, result.acquisition, result.stats);
    Py::new(py, events)
}

/// Decodes raw list-mode bytes and returns events.
///
/// Useful when the data is already in memory.
///
/// Args:
///     data: Raw bytes of a list-mode file
///     has_header: Whether `data` starts with the 256-byte file header
///         (default: True)
///
/// Returns:
///     Events: Container with decoded events
#[pyfunction]
#[pyo3(signature = (data, has_header=true))]
fn decode_bytes(py: Python<'_>, data: &[u8], has_header: bool) -> PyResult<Py<Events>> {
    let mut config = DecoderConfig::default();
    if !has_header {
        config.header_len = 0;
    }

    let mut decoder = ListModeDecoder::with_config(config).map_err(to_py_err)?;
    let mut events = Vec::new();
    let summary = decoder
        .decode_reader(data, &mut events)
        .map_err(to_py_err)?;

    let events = Events::from_decoded(events, summary.acquisition, summary.stats);
    Py::new(py, events)
}

/// List-mode decoder module for Python.
#[pymodule]
fn listmode(_py: Python<'_>, m: &PyModule) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(decode_file, m)?)?;
    m.add_function(wrap_pyfunction!(decode_bytes, m)?)?;
    m.add_class::<Events>()?;
    Ok(())
}
