//! Python bindings for the spectrum analyzer

use pyo3::prelude::*;
use pyo3::exceptions::{PyRuntimeError, PyValueError};
use numpy::PyArray1;
use crate::analyzer::{Analyzer, AnalyzerConfig};
use crate::scanner::SupervisorConfig;
use crate::settings::{FreqUnit, Settings};
use crate::spectrum::BaselineChannel;

fn runtime_error<E: ToString>(e: E) -> PyErr {
    PyErr::new::<PyRuntimeError, _>(e.to_string())
}

/// Scanner settings exposed to Python
///
/// Frequency units are indices: 0 = Hz, 1 = kHz, 2 = MHz, 3 = GHz.
#[pyclass(name = "Settings")]
#[derive(Clone)]
pub struct PySettings {
    #[pyo3(get, set)]
    sample_rate: f64,
    #[pyo3(get, set)]
    min_freq: f64,
    #[pyo3(get, set)]
    min_freq_unit: usize,
    #[pyo3(get, set)]
    max_freq: f64,
    #[pyo3(get, set)]
    max_freq_unit: usize,
    #[pyo3(get, set)]
    gain: f64,
    #[pyo3(get, set)]
    nbins: u32,
    #[pyo3(get, set)]
    overlap_percent: u32,
    #[pyo3(get, set)]
    use_nsamples: bool,
    #[pyo3(get, set)]
    nsamples: u32,
    #[pyo3(get, set)]
    sample_time: f64,
}

#[pymethods]
impl PySettings {
    /// Create settings with default values
    #[new]
    fn new() -> Self {
        Self::from(&Settings::default())
    }

    fn __repr__(&self) -> String {
        format!(
            "Settings(min_freq={} [{}], max_freq={} [{}], nbins={}, overlap={}%)",
            self.min_freq, self.min_freq_unit, self.max_freq, self.max_freq_unit,
            self.nbins, self.overlap_percent
        )
    }
}

impl From<&Settings> for PySettings {
    fn from(settings: &Settings) -> Self {
        Self {
            sample_rate: settings.sample_rate,
            min_freq: settings.min_freq,
            min_freq_unit: settings.min_freq_units.index(),
            max_freq: settings.max_freq,
            max_freq_unit: settings.max_freq_units.index(),
            gain: settings.gain,
            nbins: settings.nbins,
            overlap_percent: settings.overlap_percent,
            use_nsamples: settings.use_nsamples,
            nsamples: settings.nsamples,
            sample_time: settings.sample_time,
        }
    }
}

impl TryFrom<&PySettings> for Settings {
    type Error = PyErr;

    fn try_from(settings: &PySettings) -> PyResult<Self> {
        let unit = |index: usize| {
            FreqUnit::from_index(index).ok_or_else(|| {
                PyErr::new::<PyValueError, _>(format!("Unknown frequency unit index {}", index))
            })
        };

        Ok(Settings {
            sample_rate: settings.sample_rate,
            min_freq: settings.min_freq,
            min_freq_units: unit(settings.min_freq_unit)?,
            max_freq: settings.max_freq,
            max_freq_units: unit(settings.max_freq_unit)?,
            gain: settings.gain,
            nbins: settings.nbins,
            overlap_percent: settings.overlap_percent,
            use_nsamples: settings.use_nsamples,
            nsamples: settings.nsamples,
            sample_time: settings.sample_time,
        })
    }
}

/// Live spectrum analyzer exposed to Python
///
/// Acquisition runs in Rust threads; Python polls `update()` on its own
/// cadence and reads the measurement arrays.
#[pyclass(name = "Analyzer", unsendable)]
pub struct PyAnalyzer {
    analyzer: Analyzer,
}

#[pymethods]
impl PyAnalyzer {
    /// Create a new analyzer
    ///
    /// Args:
    ///     program: Scanner binary to run
    ///     num_average_hold: Sweeps kept for average/min/max
    #[new]
    #[pyo3(signature = (program="rtl_power_fftw", num_average_hold=10))]
    fn new(program: &str, num_average_hold: usize) -> PyResult<Self> {
        let config = AnalyzerConfig {
            supervisor: SupervisorConfig {
                program: program.into(),
                ..SupervisorConfig::default()
            },
            num_average_hold,
        };

        Ok(Self {
            analyzer: Analyzer::new(config).map_err(runtime_error)?,
        })
    }

    /// Start the scanner with the committed settings
    fn launch(&self) -> PyResult<()> {
        self.analyzer.launch().map_err(runtime_error)
    }

    /// Stop the scanner and wait for it to exit
    fn stop(&self) {
        self.analyzer.stop();
    }

    /// Get the settings being edited
    fn settings(&self) -> PySettings {
        PySettings::from(&self.analyzer.settings())
    }

    /// Replace the settings being edited
    fn set_settings(&self, settings: PyRef<PySettings>) -> PyResult<()> {
        self.analyzer.set_settings(Settings::try_from(&*settings)?);
        Ok(())
    }

    fn committed_settings(&self) -> PySettings {
        PySettings::from(&self.analyzer.committed_settings())
    }

    fn can_change_settings(&self) -> bool {
        self.analyzer.can_change_settings()
    }

    /// Apply the edited settings and restart the scanner
    fn commit_settings(&self) -> PyResult<()> {
        self.analyzer
            .commit_settings()
            .map_err(|e| PyErr::new::<PyValueError, _>(e.to_string()))
    }

    /// Consume pending scans
    ///
    /// Returns:
    ///     Number of scans written into the spectrum
    fn update(&self) -> usize {
        self.analyzer.update()
    }

    fn get_power_status(&self) -> bool {
        self.analyzer.get_power_status()
    }

    fn last_error(&self) -> Option<String> {
        self.analyzer.last_error()
    }

    fn measurement_count(&self) -> usize {
        self.analyzer.measurement_count()
    }

    fn num_average_hold(&self) -> usize {
        self.analyzer.num_average_hold()
    }

    fn set_num_average_hold(&self, num_average_hold: usize) {
        self.analyzer.set_num_average_hold(num_average_hold);
    }

    /// Get the live measurement
    ///
    /// Returns:
    ///     Dictionary with keys: 'frequencies', 'spectrum', 'average', 'max', 'min'
    fn get_measurement<'py>(&self, py: Python<'py>) -> PyResult<PyObject> {
        let frequencies = self.analyzer.frequencies();
        let measurement = self.analyzer.measurement();
        let dict = pyo3::types::PyDict::new(py);

        dict.set_item("frequencies", PyArray1::from_vec(py, frequencies))?;
        dict.set_item("spectrum", PyArray1::from_vec(py, measurement.spectrum))?;
        dict.set_item("average", PyArray1::from_vec(py, measurement.average))?;
        dict.set_item("max", PyArray1::from_vec(py, measurement.max))?;
        dict.set_item("min", PyArray1::from_vec(py, measurement.min))?;

        Ok(dict.into())
    }

    fn has_baseline(&self) -> bool {
        self.analyzer.has_baseline()
    }

    /// Select the baseline channel: "Spectrum", "Average", "Max" or "Min"
    fn set_baseline_mode(&self, mode: &str) -> PyResult<()> {
        let channel = BaselineChannel::from_name(mode).ok_or_else(|| {
            PyErr::new::<PyValueError, _>(format!("Unknown baseline mode '{}'", mode))
        })?;
        self.analyzer.set_baseline_channel(channel);
        Ok(())
    }

    fn baseline_mode(&self) -> &'static str {
        self.analyzer.baseline_channel().label()
    }

    /// Use the live measurement as baseline
    fn capture_baseline(&self) {
        self.analyzer.capture_baseline();
    }

    fn clear_baseline(&self) {
        self.analyzer.clear_baseline();
    }

    /// Export the live measurement to CSV
    ///
    /// Args:
    ///     path: Destination file
    ///     load_as_baseline: Also use the exported measurement as baseline
    #[pyo3(signature = (path, load_as_baseline=false))]
    fn export_csv(&self, path: &str, load_as_baseline: bool) -> PyResult<()> {
        self.analyzer
            .export_csv(path, load_as_baseline)
            .map_err(runtime_error)
    }

    /// Load a CSV measurement as baseline
    fn load_baseline_csv(&self, path: &str) -> PyResult<()> {
        self.analyzer.load_baseline_csv(path).map_err(runtime_error)
    }

    /// Load a `.met` + `.bin` capture as baseline
    fn load_baseline_binary(&self, met_path: &str, bin_path: &str) -> PyResult<()> {
        self.analyzer
            .load_baseline_binary(met_path, bin_path)
            .map_err(runtime_error)
    }
}
