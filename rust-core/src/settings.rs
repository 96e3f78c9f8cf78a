//! Acquisition settings
//!
//! Editable parameters for one scanner run. A committed copy travels with
//! every measurement and decides whether a stored baseline still applies.

use crate::spectrum::BinLayout;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Largest assembled spectrum a run may produce
pub const MAX_SPECTRUM_LEN: usize = 1 << 24;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Sample rate must be positive (got {0} Hz)")]
    SampleRate(f64),

    #[error("Bin count must be at least 2 (got {0})")]
    BinCount(u32),

    #[error("Overlap must be between 0 and 100 % (got {0} %)")]
    Overlap(u32),

    #[error("Frequency range is empty: {low} Hz to {high} Hz")]
    EmptyRange { low: u64, high: u64 },

    #[error("Spectrum size out of range ({bins:?} bins, limit {max})", max = MAX_SPECTRUM_LEN)]
    SpectrumSize { bins: Option<usize> },

    #[error("Sample count must be positive")]
    SampleCount,

    #[error("Sample time must be positive (got {0} s)")]
    SampleTime(f64),

    #[error("Failed to access settings file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse settings file: {0}")]
    Json(#[from] serde_json::Error),
}

/// Frequency unit selectable next to a frequency value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FreqUnit {
    Hz,
    KHz,
    MHz,
    GHz,
}

impl FreqUnit {
    pub const ALL: [FreqUnit; 4] = [FreqUnit::Hz, FreqUnit::KHz, FreqUnit::MHz, FreqUnit::GHz];

    /// Map a unit index (0 = Hz .. 3 = GHz) to a unit
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Index of this unit, as written to CSV preambles
    pub fn index(self) -> usize {
        match self {
            FreqUnit::Hz => 0,
            FreqUnit::KHz => 1,
            FreqUnit::MHz => 2,
            FreqUnit::GHz => 3,
        }
    }

    pub fn multiplier(self) -> f64 {
        match self {
            FreqUnit::Hz => 1.0,
            FreqUnit::KHz => 1e3,
            FreqUnit::MHz => 1e6,
            FreqUnit::GHz => 1e9,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            FreqUnit::Hz => "Hz",
            FreqUnit::KHz => "kHz",
            FreqUnit::MHz => "MHz",
            FreqUnit::GHz => "GHz",
        }
    }

    /// Convert a value in this unit to whole hertz
    ///
    /// Negative values map to 0 Hz. The fractional hertz part is truncated.
    pub fn to_hz(self, value: f64) -> u64 {
        if value < 0.0 {
            return 0;
        }
        (value * self.multiplier()) as u64
    }

    /// Pick the largest unit that keeps the value at or above 1
    ///
    /// # Returns
    /// The value expressed in the chosen unit, and the unit
    pub fn best_for(hz: f64) -> (f64, FreqUnit) {
        let unit = Self::ALL
            .iter()
            .rev()
            .copied()
            .find(|unit| hz >= unit.multiplier())
            .unwrap_or(FreqUnit::Hz);
        (hz / unit.multiplier(), unit)
    }
}

/// How long the scanner integrates each hop
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sampling {
    /// Fixed number of FFT frames per hop (`-n`)
    Count(u32),
    /// Integration time per hop in seconds (`-t`)
    Duration(f64),
}

/// Scanner settings
///
/// Frequencies are kept as value + unit pairs, the way they are edited.
/// Both sampling values are kept so switching modes does not lose the other.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Tuner sample rate in Hz (bandwidth covered by one scan)
    pub sample_rate: f64,
    pub min_freq: f64,
    pub min_freq_units: FreqUnit,
    pub max_freq: f64,
    pub max_freq_units: FreqUnit,
    /// Tuner gain in dB
    pub gain: f64,
    /// FFT bins per scan, forced even on commit
    pub nbins: u32,
    /// Percentage of each scan overlapping the previous one
    pub overlap_percent: u32,
    pub use_nsamples: bool,
    pub nsamples: u32,
    /// Integration time in seconds, used when `use_nsamples` is false
    pub sample_time: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            sample_rate: 2_400_000.0,
            min_freq: 100.0,
            min_freq_units: FreqUnit::MHz,
            max_freq: 110.0,
            max_freq_units: FreqUnit::MHz,
            gain: 0.0,
            nbins: 256,
            overlap_percent: 70,
            use_nsamples: true,
            nsamples: 20,
            sample_time: 0.01,
        }
    }
}

impl Settings {
    /// Lower edge of the requested range in Hz
    pub fn low_freq(&self) -> u64 {
        self.min_freq_units.to_hz(self.min_freq)
    }

    /// Upper edge of the requested range in Hz
    pub fn high_freq(&self) -> u64 {
        self.max_freq_units.to_hz(self.max_freq)
    }

    pub fn sampling(&self) -> Sampling {
        if self.use_nsamples {
            Sampling::Count(self.nsamples)
        } else {
            Sampling::Duration(self.sample_time)
        }
    }

    /// Round an odd bin count up to the next even number
    ///
    /// # Returns
    /// `true` if the bin count was changed
    pub fn force_even_bins(&mut self) -> bool {
        if self.nbins % 2 != 0 {
            self.nbins += 1;
            true
        } else {
            false
        }
    }

    /// Check that the settings describe a runnable scan
    pub fn validate(&self) -> Result<(), SettingsError> {
        if !(self.sample_rate > 0.0) {
            return Err(SettingsError::SampleRate(self.sample_rate));
        }
        if self.nbins < 2 {
            return Err(SettingsError::BinCount(self.nbins));
        }
        if self.overlap_percent > 100 {
            return Err(SettingsError::Overlap(self.overlap_percent));
        }

        let (low, high) = (self.low_freq(), self.high_freq());
        if high <= low {
            return Err(SettingsError::EmptyRange { low, high });
        }

        let bins = BinLayout::new(self).checked_spectrum_len();
        if !matches!(bins, Some(1..=MAX_SPECTRUM_LEN)) {
            return Err(SettingsError::SpectrumSize { bins });
        }

        match self.sampling() {
            Sampling::Count(0) => Err(SettingsError::SampleCount),
            Sampling::Duration(t) if !(t > 0.0) => Err(SettingsError::SampleTime(t)),
            _ => Ok(()),
        }
    }

    /// Load settings saved by [`Settings::save`]
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Save settings as pretty-printed JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), SettingsError> {
        let text = serde_json::to_string_pretty(self)?;
        fs::write(path, text)?;
        Ok(())
    }
}

/// Equality used to decide whether a baseline matches the live settings.
///
/// The minimum-frequency unit only has to be non-Hz on both sides; which unit
/// was picked is not compared. Sampling mode and sample time are not part of
/// an exported preamble and are not compared either.
impl PartialEq for Settings {
    fn eq(&self, other: &Self) -> bool {
        self.sample_rate == other.sample_rate
            && self.min_freq == other.min_freq
            && self.min_freq_units != FreqUnit::Hz
            && other.min_freq_units != FreqUnit::Hz
            && self.max_freq == other.max_freq
            && self.max_freq_units == other.max_freq_units
            && self.gain == other.gain
            && self.nbins == other.nbins
            && self.overlap_percent == other.overlap_percent
            && self.nsamples == other.nsamples
    }
}
