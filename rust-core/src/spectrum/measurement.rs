//! Measurement snapshot and baseline channels

use super::layout::BinLayout;
use crate::settings::Settings;

/// Channel of a measurement used as baseline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BaselineChannel {
    #[default]
    Spectrum,
    Average,
    Max,
    Min,
}

impl BaselineChannel {
    pub const ALL: [BaselineChannel; 4] = [
        BaselineChannel::Spectrum,
        BaselineChannel::Average,
        BaselineChannel::Max,
        BaselineChannel::Min,
    ];

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn label(self) -> &'static str {
        match self {
            BaselineChannel::Spectrum => "Spectrum",
            BaselineChannel::Average => "Average",
            BaselineChannel::Max => "Max",
            BaselineChannel::Min => "Min",
        }
    }

    /// Parse a channel name, case-insensitively
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|channel| channel.label().eq_ignore_ascii_case(name))
    }
}

/// Assembled spectrum with its aggregates
///
/// All four channels have one value per bin of the settings' layout.
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub settings: Settings,
    pub spectrum: Vec<f64>,
    pub average: Vec<f64>,
    pub max: Vec<f64>,
    pub min: Vec<f64>,
}

impl Measurement {
    /// Create a zero-filled measurement sized for the settings
    pub fn new(settings: Settings) -> Self {
        let len = BinLayout::new(&settings).spectrum_len();

        Self {
            settings,
            spectrum: vec![0.0; len],
            average: vec![0.0; len],
            max: vec![0.0; len],
            min: vec![0.0; len],
        }
    }

    pub fn layout(&self) -> BinLayout {
        BinLayout::new(&self.settings)
    }

    /// Number of bins
    pub fn len(&self) -> usize {
        self.spectrum.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spectrum.is_empty()
    }

    pub fn channel(&self, channel: BaselineChannel) -> &[f64] {
        match channel {
            BaselineChannel::Spectrum => &self.spectrum,
            BaselineChannel::Average => &self.average,
            BaselineChannel::Max => &self.max,
            BaselineChannel::Min => &self.min,
        }
    }

    /// Add per-bin offsets to all four channels
    pub fn offset_by(&mut self, offsets: &[f64]) {
        for values in [&mut self.spectrum, &mut self.average, &mut self.max, &mut self.min] {
            for (value, offset) in values.iter_mut().zip(offsets) {
                *value += offset;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_measurement_is_sized() {
        let measurement = Measurement::new(Settings::default());

        assert_eq!(measurement.len(), 1280);
        assert_eq!(measurement.average.len(), 1280);
        assert_eq!(measurement.max.len(), 1280);
        assert_eq!(measurement.min.len(), 1280);
    }

    #[test]
    fn test_channel_names() {
        assert_eq!(BaselineChannel::from_name("average"), Some(BaselineChannel::Average));
        assert_eq!(BaselineChannel::from_name("MIN"), Some(BaselineChannel::Min));
        assert_eq!(BaselineChannel::from_name("median"), None);
        assert_eq!(BaselineChannel::from_index(2), Some(BaselineChannel::Max));
    }

    #[test]
    fn test_offset_by() {
        let mut measurement = Measurement::new(Settings::default());
        let offsets = vec![1.5; measurement.len()];

        measurement.offset_by(&offsets);
        assert!(measurement.spectrum.iter().all(|&v| v == 1.5));
        assert!(measurement.min.iter().all(|&v| v == 1.5));
    }
}
