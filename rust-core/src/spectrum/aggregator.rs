//! Aggregation engine
//!
//! Writes incoming scans into the live spectrum and keeps the rolling
//! average, maximum and minimum per bin, optionally relative to a baseline.

use super::history::RollingHistory;
use super::layout::BinLayout;
use super::measurement::{BaselineChannel, Measurement};
use crate::scanner::Scan;
use crate::settings::Settings;

/// Default number of sweeps kept for average/min/max
pub const DEFAULT_AVERAGE_HOLD: usize = 10;

/// Live spectrum assembly
///
/// Owns the current measurement, its history and the optional baseline.
pub struct Aggregator {
    current: Measurement,
    layout: BinLayout,
    history: RollingHistory,
    num_average_hold: usize,
    measurement_count: usize,
    baseline: Option<Measurement>,
    baseline_channel: BaselineChannel,
}

impl Aggregator {
    /// Create engine for the given settings
    ///
    /// # Arguments
    /// * `settings` - Committed settings
    /// * `num_average_hold` - History depth (at least 1)
    pub fn new(settings: Settings, num_average_hold: usize) -> Self {
        let num_average_hold = num_average_hold.max(1);
        let current = Measurement::new(settings);
        let layout = current.layout();
        let history = RollingHistory::new(num_average_hold, current.len());

        Self {
            current,
            layout,
            history,
            num_average_hold,
            measurement_count: 0,
            baseline: None,
            baseline_channel: BaselineChannel::default(),
        }
    }

    /// Start over with newly committed settings
    ///
    /// The spectrum and history are re-sized and zeroed. The baseline is kept
    /// and becomes active again once the settings match it.
    pub fn reset(&mut self, settings: Settings) {
        self.current = Measurement::new(settings);
        self.layout = self.current.layout();
        self.history.resize(self.num_average_hold, self.current.len());
        self.measurement_count = 0;
    }

    /// Change the history depth
    ///
    /// A changed depth clears the history and restarts the sweep count.
    pub fn set_num_average_hold(&mut self, num_average_hold: usize) {
        let num_average_hold = num_average_hold.max(1);
        if num_average_hold == self.num_average_hold {
            return;
        }

        self.num_average_hold = num_average_hold;
        self.history.resize(num_average_hold, self.current.len());
        self.measurement_count = 0;
    }

    pub fn num_average_hold(&self) -> usize {
        self.num_average_hold
    }

    /// Number of sweeps held in history, up to `num_average_hold`
    pub fn measurement_count(&self) -> usize {
        self.measurement_count
    }

    pub fn measurement(&self) -> &Measurement {
        &self.current
    }

    pub fn settings(&self) -> &Settings {
        &self.current.settings
    }

    pub fn layout(&self) -> &BinLayout {
        &self.layout
    }

    /// Write a batch of scans into the spectrum
    ///
    /// # Returns
    /// Number of bins written
    pub fn ingest<I>(&mut self, scans: I) -> usize
    where
        I: IntoIterator<Item = Scan>,
    {
        scans.into_iter().map(|scan| self.ingest_scan(&scan)).sum()
    }

    /// Write one scan into the spectrum
    ///
    /// Scans that do not start a sweep lose their leading overlap readouts,
    /// which the previous scan already covered.
    pub fn ingest_scan(&mut self, scan: &Scan) -> usize {
        if scan.is_first_of_sweep && self.measurement_count < self.num_average_hold {
            self.measurement_count += 1;
        }

        let trim = if scan.is_first_of_sweep {
            0
        } else {
            self.layout.trim_count()
        };

        let baseline = if self.has_baseline() {
            self.baseline
                .as_ref()
                .map(|baseline| baseline.channel(self.baseline_channel))
        } else {
            None
        };

        let mut written = 0;
        for readout in scan.readouts.iter().skip(trim) {
            let Some(bin) = self.layout.bin_index(readout.frequency) else {
                continue;
            };

            let current = &mut self.current;
            current.spectrum[bin] = readout.power;

            let mut aggregated = false;
            if self.measurement_count > 0 {
                self.history.push(bin, readout.power);
                if let Some(stats) = self.history.stats(bin, self.measurement_count) {
                    current.average[bin] = stats.average;
                    current.max[bin] = stats.max;
                    current.min[bin] = stats.min;
                    aggregated = true;
                }
            }

            if let Some(offset) = baseline.and_then(|values| values.get(bin)) {
                current.spectrum[bin] -= offset;
                // Aggregates not recomputed above still hold a subtracted value
                if aggregated {
                    current.average[bin] -= offset;
                    current.max[bin] -= offset;
                    current.min[bin] -= offset;
                }
            }

            written += 1;
        }

        written
    }

    /// True if a baseline is stored and matches the current settings
    pub fn has_baseline(&self) -> bool {
        self.baseline
            .as_ref()
            .is_some_and(|baseline| baseline.settings == self.current.settings)
    }

    pub fn baseline(&self) -> Option<&Measurement> {
        self.baseline.as_ref()
    }

    pub fn baseline_channel(&self) -> BaselineChannel {
        self.baseline_channel
    }

    pub fn set_baseline_channel(&mut self, channel: BaselineChannel) {
        self.baseline_channel = channel;
    }

    /// Install a measurement as the new baseline
    ///
    /// A measurement recorded while the previous baseline was applied has
    /// that baseline subtracted already; it is added back first so the new
    /// baseline holds absolute values. Only an active baseline was applied,
    /// and only to measurements taken with its settings.
    pub fn replace_baseline(&mut self, mut measurement: Measurement) {
        let active = self.has_baseline();
        if let Some(previous) = self.baseline.as_ref().filter(|_| active) {
            if previous.settings == measurement.settings {
                measurement.offset_by(previous.channel(self.baseline_channel));
            }
        }

        log::info!(
            "Baseline set ({} bins, {} channel)",
            measurement.len(),
            self.baseline_channel.label()
        );
        self.baseline = Some(measurement);
    }

    /// Use the live measurement as baseline
    pub fn capture_baseline(&mut self) {
        let snapshot = self.current.clone();
        self.replace_baseline(snapshot);
    }

    pub fn clear_baseline(&mut self) -> Option<Measurement> {
        self.baseline.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::Readout;
    use crate::settings::FreqUnit;

    const LOW: f64 = 100_000_000.0;
    const HZ_PER_BIN: f64 = 20_000.0;

    // 100 bins of 20 kHz covering 100-102 MHz in one scan
    fn settings(overlap_percent: u32) -> Settings {
        Settings {
            sample_rate: 2_000_000.0,
            min_freq: 100.0,
            min_freq_units: FreqUnit::MHz,
            max_freq: 102.0,
            max_freq_units: FreqUnit::MHz,
            nbins: 100,
            overlap_percent,
            ..Settings::default()
        }
    }

    fn scan(first: bool, powers: &[f64]) -> Scan {
        Scan {
            readouts: powers
                .iter()
                .enumerate()
                .map(|(bin, &power)| Readout {
                    frequency: LOW + bin as f64 * HZ_PER_BIN,
                    power,
                })
                .collect(),
            is_first_of_sweep: first,
            is_last_of_sweep: true,
        }
    }

    #[test]
    fn test_constant_power_settles() {
        let mut engine = Aggregator::new(settings(0), 4);

        for _ in 0..4 {
            engine.ingest(vec![scan(true, &[-42.0; 100])]);
        }

        let m = engine.measurement();
        assert_eq!(engine.measurement_count(), 4);
        assert_eq!(m.average[17], -42.0);
        assert_eq!(m.max[17], -42.0);
        assert_eq!(m.min[17], -42.0);
    }

    #[test]
    fn test_history_window() {
        let mut engine = Aggregator::new(settings(0), 3);

        for power in [-1.0, -2.0, -3.0, -4.0] {
            engine.ingest_scan(&scan(true, &[power]));
        }

        let m = engine.measurement();
        assert_eq!(engine.measurement_count(), 3);
        assert_eq!(m.spectrum[0], -4.0);
        assert_eq!(m.average[0], -3.0);
        assert_eq!(m.max[0], -2.0);
        assert_eq!(m.min[0], -4.0);
    }

    #[test]
    fn test_count_only_grows_on_sweep_start() {
        let mut engine = Aggregator::new(settings(0), 5);

        engine.ingest_scan(&scan(false, &[-1.0]));
        assert_eq!(engine.measurement_count(), 0);
        assert_eq!(engine.measurement().spectrum[0], -1.0);
        assert_eq!(engine.measurement().average[0], 0.0);

        engine.ingest_scan(&scan(true, &[-1.0]));
        engine.ingest_scan(&scan(false, &[-1.0]));
        assert_eq!(engine.measurement_count(), 1);
    }

    #[test]
    fn test_edge_trim_skips_leading_overlap() {
        let mut engine = Aggregator::new(settings(20), 2);
        let powers = [-7.0; 100];

        let written = engine.ingest_scan(&scan(false, &powers));
        assert_eq!(written, 80);
        let m = engine.measurement();
        assert!(m.spectrum[..20].iter().all(|&v| v == 0.0));
        assert!(m.spectrum[20..].iter().all(|&v| v == -7.0));

        let mut engine = Aggregator::new(settings(20), 2);
        let written = engine.ingest_scan(&scan(true, &powers));
        assert_eq!(written, 100);
        assert!(engine.measurement().spectrum.iter().all(|&v| v == -7.0));
    }

    #[test]
    fn test_out_of_range_readouts_dropped() {
        let mut engine = Aggregator::new(settings(0), 2);
        let scan = Scan {
            readouts: vec![
                Readout { frequency: LOW - 1_000_000.0, power: -1.0 },
                Readout { frequency: LOW + 5_000_000.0, power: -1.0 },
                Readout { frequency: LOW, power: -3.0 },
            ],
            is_first_of_sweep: true,
            is_last_of_sweep: true,
        };

        assert_eq!(engine.ingest_scan(&scan), 1);
        assert_eq!(engine.measurement().spectrum[0], -3.0);
    }

    #[test]
    fn test_baseline_cancels_identical_spectrum() {
        let powers: Vec<f64> = (0..100).map(|bin| -60.0 + bin as f64 * 0.25).collect();
        let mut engine = Aggregator::new(settings(0), 3);

        engine.ingest_scan(&scan(true, &powers));
        engine.capture_baseline();
        assert!(engine.has_baseline());

        engine.ingest_scan(&scan(true, &powers));
        let m = engine.measurement();
        assert!(m.spectrum.iter().all(|v| v.abs() < 1e-9));
        assert!(m.average.iter().all(|v| v.abs() < 1e-9));
        assert!(m.max.iter().all(|v| v.abs() < 1e-9));
    }

    #[test]
    fn test_baseline_channel_selection() {
        let mut engine = Aggregator::new(settings(0), 2);
        engine.ingest_scan(&scan(true, &[-10.0]));
        engine.ingest_scan(&scan(true, &[-20.0]));
        engine.set_baseline_channel(BaselineChannel::Max);
        engine.capture_baseline();

        engine.ingest_scan(&scan(true, &[-30.0]));
        // Baseline max at bin 0 was -10
        assert_eq!(engine.measurement().spectrum[0], -20.0);
    }

    #[test]
    fn test_baseline_ignored_after_settings_change() {
        let mut engine = Aggregator::new(settings(0), 2);
        engine.ingest_scan(&scan(true, &[-10.0; 100]));
        engine.capture_baseline();

        engine.reset(settings(10));
        assert!(!engine.has_baseline());
        assert!(engine.baseline().is_some());

        engine.ingest_scan(&scan(true, &[-10.0; 100]));
        assert_eq!(engine.measurement().spectrum[5], -10.0);
    }

    #[test]
    fn test_inactive_baseline_not_added_back() {
        let mut engine = Aggregator::new(settings(0), 2);
        engine.ingest_scan(&scan(true, &[-10.0; 100]));
        engine.capture_baseline();
        engine.reset(settings(10));

        // Recorded with the old settings, but nothing was subtracted from it
        let mut imported = Measurement::new(settings(0));
        imported.spectrum.fill(-4.0);
        engine.replace_baseline(imported);

        assert_eq!(engine.baseline().unwrap().spectrum[0], -4.0);
        assert!(!engine.has_baseline());
    }

    #[test]
    fn test_active_baseline_added_back_to_loaded_measurement() {
        let mut engine = Aggregator::new(settings(0), 2);
        engine.ingest_scan(&scan(true, &[-10.0; 100]));
        engine.capture_baseline();

        let mut exported = Measurement::new(settings(0));
        exported.spectrum.fill(6.0);
        engine.replace_baseline(exported);

        assert_eq!(engine.baseline().unwrap().spectrum[0], -4.0);
    }

    #[test]
    fn test_recapture_adds_previous_baseline_back() {
        let mut engine = Aggregator::new(settings(0), 2);
        engine.ingest_scan(&scan(true, &[-10.0; 100]));
        engine.capture_baseline();

        // Live values are now relative to the first baseline
        engine.ingest_scan(&scan(true, &[-4.0; 100]));
        assert_eq!(engine.measurement().spectrum[0], 6.0);

        engine.capture_baseline();
        let baseline = engine.baseline().unwrap();
        assert_eq!(baseline.spectrum[0], -4.0);

        engine.ingest_scan(&scan(true, &[-4.0; 100]));
        assert_eq!(engine.measurement().spectrum[0], 0.0);
    }

    #[test]
    fn test_depth_change_resets_count() {
        let mut engine = Aggregator::new(settings(0), 2);
        engine.ingest_scan(&scan(true, &[-1.0]));
        engine.ingest_scan(&scan(true, &[-1.0]));
        engine.ingest_scan(&scan(true, &[-1.0]));
        assert_eq!(engine.measurement_count(), 2);

        engine.set_num_average_hold(2);
        assert_eq!(engine.measurement_count(), 2);

        engine.set_num_average_hold(6);
        assert_eq!(engine.measurement_count(), 0);
        assert_eq!(engine.num_average_hold(), 6);
    }

    #[test]
    fn test_reset_resizes_spectrum() {
        let mut engine = Aggregator::new(settings(0), 2);
        let wider = Settings { max_freq: 105.0, ..settings(0) };

        engine.reset(wider);
        assert_eq!(engine.measurement().len(), 300);
        assert_eq!(engine.measurement_count(), 0);
    }
}
