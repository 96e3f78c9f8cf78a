//! Bin layout calculator
//!
//! Derives the spectrum geometry from committed settings: how many scans a
//! sweep needs, how wide a bin is, and where a frequency lands.

use crate::settings::Settings;

/// Spectrum geometry for one settings snapshot
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BinLayout {
    low_freq: f64,
    high_freq: f64,
    sample_rate: f64,
    nbins: u32,
    overlap_percent: u32,
}

impl BinLayout {
    pub fn new(settings: &Settings) -> Self {
        Self {
            low_freq: settings.low_freq() as f64,
            high_freq: settings.high_freq() as f64,
            sample_rate: settings.sample_rate,
            nbins: settings.nbins,
            overlap_percent: settings.overlap_percent,
        }
    }

    /// Lower edge of the spectrum in Hz (frequency of bin 0)
    pub fn low_freq(&self) -> f64 {
        self.low_freq
    }

    pub fn high_freq(&self) -> f64 {
        self.high_freq
    }

    pub fn freq_range(&self) -> f64 {
        self.high_freq - self.low_freq
    }

    pub fn nbins(&self) -> u32 {
        self.nbins
    }

    pub fn hertz_per_bin(&self) -> f64 {
        self.sample_rate / self.nbins as f64
    }

    /// Number of tuner hops needed to cover the range once
    pub fn number_of_scans(&self) -> usize {
        let scans = (self.freq_range() / self.sample_rate).ceil();
        if scans.is_finite() && scans > 0.0 {
            scans as usize
        } else {
            0
        }
    }

    /// Length of the assembled spectrum, or `None` if it does not fit in memory
    pub fn checked_spectrum_len(&self) -> Option<usize> {
        (self.nbins as usize).checked_mul(self.number_of_scans())
    }

    /// Length of the assembled spectrum
    ///
    /// Zero for layouts whose length overflows; [`Settings::validate`]
    /// rejects those.
    pub fn spectrum_len(&self) -> usize {
        self.checked_spectrum_len().unwrap_or(0)
    }

    /// Nearest bin for a frequency, possibly outside the spectrum
    pub fn bin_for_freq(&self, freq: f64) -> i64 {
        ((freq - self.low_freq) / self.hertz_per_bin()).round() as i64
    }

    /// Bin for a frequency, or `None` if it falls outside the spectrum
    pub fn bin_index(&self, freq: f64) -> Option<usize> {
        let offset = (freq - self.low_freq) / self.hertz_per_bin();
        if !offset.is_finite() {
            return None;
        }

        let bin = self.bin_for_freq(freq);
        if bin >= 0 && (bin as usize) < self.spectrum_len() {
            Some(bin as usize)
        } else {
            None
        }
    }

    /// Frequency of a bin in Hz
    pub fn bin_center_freq(&self, bin: usize) -> f64 {
        self.low_freq + bin as f64 * self.hertz_per_bin()
    }

    /// Frequency of every bin in Hz
    pub fn frequencies(&self) -> Vec<f64> {
        (0..self.spectrum_len())
            .map(|bin| self.bin_center_freq(bin))
            .collect()
    }

    /// Leading readouts dropped from every scan that does not start a sweep
    pub fn trim_count(&self) -> usize {
        self.nbins as usize * self.overlap_percent as usize / 100
    }

    /// Extra bandwidth requested on each side of the range in Hz
    pub fn oversampling_margin(&self) -> f64 {
        self.overlap_percent as f64 / 100.0 * self.sample_rate
    }

    /// Range the scanner is asked to cover, in whole Hz
    pub fn oversampled_range(&self) -> (u64, u64) {
        let margin = self.oversampling_margin();
        let low = (self.low_freq - margin).max(0.0);
        let high = self.high_freq + margin;
        (low as u64, high as u64)
    }
}
