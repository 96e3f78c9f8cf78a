//! Raw `.met` + `.bin` capture import
//!
//! The `.met` file holds `<value> # <key>` lines describing the matrix in the
//! `.bin` file: little-endian `f32` power values, one row of bins per scan.

use super::ImportError;
use crate::settings::{FreqUnit, Settings};
use crate::spectrum::Measurement;
use ndarray::{Array2, Axis};
use std::fs;
use std::path::Path;

/// Matrix description read from a `.met` file
#[derive(Debug, Clone, PartialEq)]
pub struct MetInfo {
    pub frequency_bins: usize,
    pub scans: usize,
    /// Start frequency in Hz
    pub start_freq: f64,
    /// End frequency in Hz
    pub end_freq: f64,
    /// Bin width in Hz
    pub step_freq: f64,
}

impl MetInfo {
    /// Parse `.met` text
    ///
    /// Keys are matched by prefix so annotated keys such as
    /// `frequency bins (columns)` are accepted. Unknown keys are ignored.
    pub fn parse(text: &str) -> Result<Self, ImportError> {
        let mut frequency_bins = None;
        let mut scans = None;
        let mut start_freq = None;
        let mut end_freq = None;
        let mut step_freq = None;

        for (index, line) in text.lines().enumerate() {
            let line_no = index + 1;
            if line.trim().is_empty() {
                continue;
            }

            let (value, key) = line.split_once('#').ok_or_else(|| ImportError::Format {
                line: line_no,
                message: format!("expected '<value> # <key>', got '{}'", line.trim()),
            })?;
            let (value, key) = (value.trim(), key.trim());

            let number = |what: &str| -> Result<f64, ImportError> {
                value.parse().map_err(|_| ImportError::Format {
                    line: line_no,
                    message: format!("invalid {} '{}'", what, value),
                })
            };

            if key.starts_with("frequency bins") {
                frequency_bins = Some(number("bin count")? as usize);
            } else if key.starts_with("scans") {
                scans = Some(number("scan count")? as usize);
            } else if key.starts_with("startFreq") {
                start_freq = Some(number("start frequency")?);
            } else if key.starts_with("endFreq") {
                end_freq = Some(number("end frequency")?);
            } else if key.starts_with("stepFreq") {
                step_freq = Some(number("step frequency")?);
            }
        }

        Ok(Self {
            frequency_bins: frequency_bins.ok_or(ImportError::MissingKey("frequency bins"))?,
            scans: scans.ok_or(ImportError::MissingKey("scans"))?,
            start_freq: start_freq.ok_or(ImportError::MissingKey("startFreq"))?,
            end_freq: end_freq.ok_or(ImportError::MissingKey("endFreq"))?,
            step_freq: step_freq.ok_or(ImportError::MissingKey("stepFreq"))?,
        })
    }

    /// Settings reproducing the file's bin layout
    ///
    /// The whole matrix width is treated as a single scan, so the sample
    /// rate equals the covered range and one bin is one step wide.
    pub fn settings(&self) -> Settings {
        let (min_freq, min_freq_units) = FreqUnit::best_for(self.start_freq);
        let (max_freq, max_freq_units) =
            FreqUnit::best_for(self.start_freq + self.step_freq * self.frequency_bins as f64);

        let mut settings = Settings {
            min_freq,
            min_freq_units,
            max_freq,
            max_freq_units,
            nbins: self.frequency_bins as u32,
            overlap_percent: 0,
            ..Settings::default()
        };
        // Use the range as converted, so it maps to exactly one scan
        settings.sample_rate = settings.high_freq().saturating_sub(settings.low_freq()) as f64;
        settings
    }
}

/// Decode the raw `.bin` matrix
pub fn decode_matrix(bytes: &[u8], info: &MetInfo) -> Result<Array2<f32>, ImportError> {
    let expected = info
        .scans
        .checked_mul(info.frequency_bins)
        .and_then(|values| values.checked_mul(4));
    if expected != Some(bytes.len()) {
        return Err(ImportError::Shape(format!(
            "{} scans of {} bins do not fit {} bytes",
            info.scans,
            info.frequency_bins,
            bytes.len()
        )));
    }

    let values: Vec<f32> = bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();

    Array2::from_shape_vec((info.scans, info.frequency_bins), values)
        .map_err(|err| ImportError::Shape(err.to_string()))
}

/// Build a measurement from a decoded matrix
///
/// The spectrum is the last scan, the average is taken over all scans and
/// min/max are the extrema over all scans.
pub fn measurement_from_matrix(
    info: &MetInfo,
    matrix: &Array2<f32>,
) -> Result<Measurement, ImportError> {
    let settings = info.settings();
    settings.validate()?;

    if matrix.nrows() == 0 {
        return Err(ImportError::Shape("capture holds no scans".to_string()));
    }

    let mut measurement = Measurement::new(settings);
    if matrix.ncols() != measurement.len() {
        return Err(ImportError::Shape(format!(
            "{} columns do not match {} bins",
            matrix.ncols(),
            measurement.len()
        )));
    }

    let matrix = matrix.mapv(f64::from);

    let last = matrix.row(matrix.nrows() - 1);
    let average = matrix.sum_axis(Axis(0)) / matrix.nrows() as f64;
    let max = matrix.fold_axis(Axis(0), f64::NEG_INFINITY, |acc, &v| acc.max(v));
    let min = matrix.fold_axis(Axis(0), f64::INFINITY, |acc, &v| acc.min(v));

    for (bin, slot) in measurement.spectrum.iter_mut().enumerate() {
        *slot = last[bin];
    }
    measurement.average = average.to_vec();
    measurement.max = max.to_vec();
    measurement.min = min.to_vec();

    Ok(measurement)
}

/// Import a `.met` + `.bin` capture pair
pub fn import_binary<P, Q>(met_path: P, bin_path: Q) -> Result<Measurement, ImportError>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    let (met_path, bin_path) = (met_path.as_ref(), bin_path.as_ref());
    if met_path.as_os_str().is_empty() || bin_path.as_os_str().is_empty() {
        return Err(ImportError::EmptyPath);
    }

    let info = MetInfo::parse(&fs::read_to_string(met_path)?)?;
    let matrix = decode_matrix(&fs::read(bin_path)?, &info)?;
    let measurement = measurement_from_matrix(&info, &matrix)?;

    log::info!(
        "Imported {} scans of {} bins from {}",
        info.scans,
        info.frequency_bins,
        bin_path.display()
    );
    Ok(measurement)
}
