//! Spectrum analyzer
//!
//! Ties the scanner supervisor to the aggregation engine and owns the
//! settings commit protocol. Settings are edited on an exposed copy; a commit
//! validates it, stops the scanner and queues a relaunch with the new
//! parameters, which the supervisor performs once the old scanner is gone.

use crate::lock_unpoisoned;
use crate::persist::{self, ExportError, ImportError};
use crate::scanner::{
    ProcessLauncher, ProcessSupervisor, ScanCommand, SupervisorConfig, SupervisorError,
};
use crate::settings::{Settings, SettingsError};
use crate::spectrum::{Aggregator, BaselineChannel, Measurement, DEFAULT_AVERAGE_HOLD};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Analyzer configuration
#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    pub supervisor: SupervisorConfig,

    /// Sweeps kept for average/min/max
    pub num_average_hold: usize,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            supervisor: SupervisorConfig::default(),
            num_average_hold: DEFAULT_AVERAGE_HOLD,
        }
    }
}

/// Live spectrum analyzer
pub struct Analyzer {
    /// Settings as edited, applied by [`Analyzer::commit_settings`]
    exposed: Mutex<Settings>,

    /// Aggregation engine holding the committed settings
    engine: Mutex<Aggregator>,

    /// Scanner process and scan queue
    supervisor: ProcessSupervisor,
}

impl Analyzer {
    /// Create analyzer driving the real scanner binary
    pub fn new(config: AnalyzerConfig) -> Result<Self, SupervisorError> {
        Self::with_launcher(config, Arc::new(crate::scanner::NativeLauncher))
    }

    /// Create analyzer with a custom process launcher
    ///
    /// Starts the supervisor's control loop; the scanner itself is started
    /// by [`Analyzer::launch`].
    pub fn with_launcher(
        config: AnalyzerConfig,
        launcher: Arc<dyn ProcessLauncher>,
    ) -> Result<Self, SupervisorError> {
        let mut settings = Settings::default();
        settings.force_even_bins();

        let mut supervisor = ProcessSupervisor::new(config.supervisor, launcher);
        supervisor.start_control_loop()?;

        Ok(Self {
            exposed: Mutex::new(settings.clone()),
            engine: Mutex::new(Aggregator::new(settings, config.num_average_hold)),
            supervisor,
        })
    }

    /// Start scanning with the committed settings
    ///
    /// Takes over a relaunch still pending from [`Analyzer::commit_settings`].
    pub fn launch(&self) -> Result<(), SupervisorError> {
        let command = self.command_for(&self.committed_settings());
        self.supervisor.launch(&command)
    }

    /// Stop scanning and wait for the scanner to exit
    pub fn stop(&self) {
        self.supervisor.stop();
    }

    fn command_for(&self, settings: &Settings) -> ScanCommand {
        ScanCommand::from_settings(&self.supervisor.config().program, settings)
    }

    /// Settings as currently edited
    pub fn settings(&self) -> Settings {
        lock_unpoisoned(&self.exposed).clone()
    }

    /// Replace the edited settings
    ///
    /// Only allowed while [`Analyzer::can_change_settings`] holds; this is
    /// not enforced.
    pub fn set_settings(&self, settings: Settings) {
        *lock_unpoisoned(&self.exposed) = settings;
    }

    /// Edit the exposed settings in place
    pub fn edit_settings<F: FnOnce(&mut Settings)>(&self, edit: F) {
        edit(&mut lock_unpoisoned(&self.exposed));
    }

    /// Settings the running acquisition uses
    pub fn committed_settings(&self) -> Settings {
        lock_unpoisoned(&self.engine).settings().clone()
    }

    /// True unless a relaunch with committed settings is still pending
    pub fn can_change_settings(&self) -> bool {
        !self.supervisor.relaunch_queued()
    }

    /// Apply the edited settings
    ///
    /// Forces an even bin count, snapshots the settings, stops the scanner,
    /// queues a relaunch and resets the spectrum to the new layout. Invalid
    /// settings are rejected without touching the running acquisition.
    pub fn commit_settings(&self) -> Result<(), SettingsError> {
        let mut settings = self.settings();
        if settings.force_even_bins() {
            log::debug!("Bin count rounded up to {}", settings.nbins);
        }
        settings.validate()?;
        self.set_settings(settings.clone());

        let mut engine = lock_unpoisoned(&self.engine);
        self.supervisor.request_stop();
        self.supervisor.queue_relaunch(self.command_for(&settings));
        engine.reset(settings);

        log::info!(
            "Settings committed: {} bins over {} scans",
            engine.measurement().len(),
            engine.layout().number_of_scans()
        );
        Ok(())
    }

    /// Write all pending scans into the spectrum
    ///
    /// Never blocks on the scanner.
    ///
    /// # Returns
    /// Number of scans consumed
    pub fn update(&self) -> usize {
        let mut engine = lock_unpoisoned(&self.engine);
        let scans = self.supervisor.queue().drain();
        let count = scans.len();
        engine.ingest(scans);
        count
    }

    /// Wait up to `timeout` for scans, then update
    pub fn wait_and_update(&self, timeout: Duration) -> usize {
        self.supervisor.queue().wait_for_scans(timeout);
        self.update()
    }

    /// True while a scanner process is alive
    pub fn get_power_status(&self) -> bool {
        self.supervisor.is_running()
    }

    /// Last scanner failure, if any
    pub fn last_error(&self) -> Option<String> {
        self.supervisor.last_error()
    }

    /// Scans lost because updates fell behind the scanner
    pub fn dropped_scans(&self) -> u64 {
        self.supervisor.queue().dropped()
    }

    /// Copy of the live measurement
    pub fn measurement(&self) -> Measurement {
        lock_unpoisoned(&self.engine).measurement().clone()
    }

    /// Run a closure on the live measurement without copying it
    pub fn with_measurement<R, F: FnOnce(&Measurement) -> R>(&self, f: F) -> R {
        f(lock_unpoisoned(&self.engine).measurement())
    }

    /// Bin frequencies of the live spectrum in Hz
    pub fn frequencies(&self) -> Vec<f64> {
        lock_unpoisoned(&self.engine).layout().frequencies()
    }

    pub fn measurement_count(&self) -> usize {
        lock_unpoisoned(&self.engine).measurement_count()
    }

    pub fn num_average_hold(&self) -> usize {
        lock_unpoisoned(&self.engine).num_average_hold()
    }

    /// Change the number of sweeps kept for average/min/max
    pub fn set_num_average_hold(&self, num_average_hold: usize) {
        lock_unpoisoned(&self.engine).set_num_average_hold(num_average_hold);
    }

    pub fn has_baseline(&self) -> bool {
        lock_unpoisoned(&self.engine).has_baseline()
    }

    /// Copy of the stored baseline, active or not
    pub fn baseline(&self) -> Option<Measurement> {
        lock_unpoisoned(&self.engine).baseline().cloned()
    }

    pub fn baseline_channel(&self) -> BaselineChannel {
        lock_unpoisoned(&self.engine).baseline_channel()
    }

    pub fn set_baseline_channel(&self, channel: BaselineChannel) {
        lock_unpoisoned(&self.engine).set_baseline_channel(channel);
    }

    /// Use the live measurement as baseline
    pub fn capture_baseline(&self) {
        lock_unpoisoned(&self.engine).capture_baseline();
    }

    pub fn clear_baseline(&self) {
        if lock_unpoisoned(&self.engine).clear_baseline().is_some() {
            log::info!("Baseline cleared");
        }
    }

    /// Install a measurement as baseline
    pub fn load_baseline(&self, measurement: Measurement) {
        lock_unpoisoned(&self.engine).replace_baseline(measurement);
    }

    /// Load a CSV measurement as baseline
    pub fn load_baseline_csv<P: AsRef<Path>>(&self, path: P) -> Result<(), ImportError> {
        let measurement = persist::import_csv(path)?;
        self.load_baseline(measurement);
        Ok(())
    }

    /// Load a `.met` + `.bin` capture as baseline
    pub fn load_baseline_binary<P, Q>(&self, met_path: P, bin_path: Q) -> Result<(), ImportError>
    where
        P: AsRef<Path>,
        Q: AsRef<Path>,
    {
        let measurement = persist::import_binary(met_path, bin_path)?;
        self.load_baseline(measurement);
        Ok(())
    }

    /// Export the live measurement to CSV
    ///
    /// # Arguments
    /// * `path` - Destination file
    /// * `load_as_baseline` - Also install the exported measurement as baseline
    pub fn export_csv<P: AsRef<Path>>(
        &self,
        path: P,
        load_as_baseline: bool,
    ) -> Result<(), ExportError> {
        let snapshot = self.measurement();
        persist::export_csv(path, &snapshot)?;

        if load_as_baseline {
            self.load_baseline(snapshot);
        }
        Ok(())
    }
}
