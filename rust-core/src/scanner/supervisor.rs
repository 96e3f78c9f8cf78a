//! Scanner process supervisor
//!
//! Owns the lifecycle of the external scanner: spawns it, runs a worker
//! thread that feeds its stdout through the line parser into the scan queue,
//! stops it gracefully (escalating to a kill) and performs queued relaunches
//! from its own control thread once the previous process is gone.

use super::parser::{LineParser, Scan};
use super::process::{
    NativeLauncher, ProcessLauncher, ReadOutcome, ScanCommand, ScannerChild, SupervisorError,
};
use super::queue::ScanQueue;
use crate::lock_unpoisoned;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Supervisor configuration
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Scanner binary
    pub program: PathBuf,

    /// Longest wait for scanner output before re-checking control flags
    pub poll_interval: Duration,

    /// Time allowed for a graceful exit before the scanner is killed
    pub stop_grace: Duration,

    /// Control loop tick for queued relaunches
    pub control_interval: Duration,

    /// Maximum number of scans waiting for the consumer
    pub queue_capacity: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("rtl_power_fftw"),
            poll_interval: Duration::from_millis(100),
            stop_grace: Duration::from_secs(3),
            control_interval: Duration::from_millis(200),
            queue_capacity: 256,
        }
    }
}

/// Lifecycle of the current scanner generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    Launching,
    Running,
    Stopping,
    Stopped,
}

struct Inner {
    config: SupervisorConfig,
    launcher: Arc<dyn ProcessLauncher>,
    queue: Arc<ScanQueue>,

    state: Mutex<SupervisorState>,
    wake: Condvar,

    keep_running: AtomicBool,
    force_stop: AtomicBool,
    shutdown: AtomicBool,

    relaunch_queued: AtomicBool,
    pending: Mutex<Option<ScanCommand>>,

    last_error: Mutex<Option<String>>,

    /// Held across stop, spawn and store so only one worker ever exists
    launch_lock: Mutex<()>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Supervisor for the scanner subprocess
///
/// Failures never take the host down: they leave the supervisor stopped,
/// are kept in [`ProcessSupervisor::last_error`] and a later
/// [`ProcessSupervisor::launch`] may retry.
pub struct ProcessSupervisor {
    inner: Arc<Inner>,
    control: Option<JoinHandle<()>>,
}

impl ProcessSupervisor {
    /// Create supervisor using the given process launcher
    pub fn new(config: SupervisorConfig, launcher: Arc<dyn ProcessLauncher>) -> Self {
        let queue = Arc::new(ScanQueue::new(config.queue_capacity));

        Self {
            inner: Arc::new(Inner {
                config,
                launcher,
                queue,
                state: Mutex::new(SupervisorState::Idle),
                wake: Condvar::new(),
                keep_running: AtomicBool::new(false),
                force_stop: AtomicBool::new(false),
                shutdown: AtomicBool::new(false),
                relaunch_queued: AtomicBool::new(false),
                pending: Mutex::new(None),
                last_error: Mutex::new(None),
                launch_lock: Mutex::new(()),
                worker: Mutex::new(None),
            }),
            control: None,
        }
    }

    /// Create supervisor launching the real scanner binary
    pub fn native(config: SupervisorConfig) -> Self {
        Self::new(config, Arc::new(NativeLauncher))
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.inner.config
    }

    /// Queue the consumer drains scans from
    pub fn queue(&self) -> &Arc<ScanQueue> {
        &self.inner.queue
    }

    /// Start the scanner, stopping and joining any active worker first
    ///
    /// A relaunch queued before this call is dropped in favour of `command`.
    pub fn launch(&self, command: &ScanCommand) -> Result<(), SupervisorError> {
        self.inner.launch(command)
    }

    /// Ask the running scanner to stop without waiting for it
    pub fn request_stop(&self) {
        self.inner.request_stop();
    }

    /// Stop the scanner and wait until the worker has exited
    pub fn stop(&self) {
        self.inner.stop();
    }

    /// True once no scanner process is alive for the current generation
    pub fn is_stopped(&self) -> bool {
        self.inner.is_stopped()
    }

    pub fn is_running(&self) -> bool {
        !self.is_stopped()
    }

    pub fn state(&self) -> SupervisorState {
        *lock_unpoisoned(&self.inner.state)
    }

    /// Last spawn, read or reap failure
    pub fn last_error(&self) -> Option<String> {
        lock_unpoisoned(&self.inner.last_error).clone()
    }

    /// Queue a relaunch with new parameters
    ///
    /// The launch itself happens from the control loop (or
    /// [`ProcessSupervisor::poll_relaunch`]) once the current scanner has
    /// stopped. Scans still in flight from the current process are discarded.
    pub fn queue_relaunch(&self, command: ScanCommand) {
        self.inner.queue_relaunch(command);
    }

    pub fn relaunch_queued(&self) -> bool {
        self.inner.relaunch_queued.load(Ordering::SeqCst)
    }

    /// Perform a queued relaunch if the previous scanner has stopped
    ///
    /// # Returns
    /// `true` if a scanner was launched
    pub fn poll_relaunch(&self) -> Result<bool, SupervisorError> {
        self.inner.poll_relaunch()
    }

    /// Start the control thread that performs queued relaunches
    pub fn start_control_loop(&mut self) -> Result<(), SupervisorError> {
        if self.control.is_some() {
            return Ok(());
        }

        let inner = Arc::clone(&self.inner);
        let handle = std::thread::Builder::new()
            .name("scanner-control".to_string())
            .spawn(move || inner.run_control())
            .map_err(SupervisorError::Thread)?;

        self.control = Some(handle);
        Ok(())
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        self.inner.wake.notify_all();
        if let Some(handle) = self.control.take() {
            let _ = handle.join();
        }

        self.inner.force_stop.store(true, Ordering::SeqCst);
        self.inner.stop();
    }
}

impl Inner {
    fn set_state(&self, state: SupervisorState) {
        *lock_unpoisoned(&self.state) = state;
        self.wake.notify_all();
    }

    fn record_error(&self, err: &SupervisorError) {
        log::error!("{}", err);
        *lock_unpoisoned(&self.last_error) = Some(err.to_string());
    }

    fn is_stopped(&self) -> bool {
        matches!(
            *lock_unpoisoned(&self.state),
            SupervisorState::Idle | SupervisorState::Stopped
        )
    }

    fn launch(self: &Arc<Self>, command: &ScanCommand) -> Result<(), SupervisorError> {
        let _launching = lock_unpoisoned(&self.launch_lock);
        if lock_unpoisoned(&self.pending).take().is_some() {
            log::debug!("Queued relaunch replaced by explicit launch");
        }
        self.relaunch_queued.store(false, Ordering::SeqCst);

        self.spawn_worker(command)
    }

    /// Caller must hold `launch_lock`
    fn spawn_worker(self: &Arc<Self>, command: &ScanCommand) -> Result<(), SupervisorError> {
        self.join_worker();

        self.set_state(SupervisorState::Launching);
        self.keep_running.store(true, Ordering::SeqCst);
        self.force_stop.store(false, Ordering::SeqCst);
        let generation = self.queue.generation();

        log::info!("Launching scanner: {}", command);
        let child = match self.launcher.spawn(command) {
            Ok(child) => child,
            Err(err) => {
                self.record_error(&err);
                self.set_state(SupervisorState::Stopped);
                return Err(err);
            }
        };

        let pid = child.id();
        *lock_unpoisoned(&self.last_error) = None;
        self.set_state(SupervisorState::Running);

        let inner = Arc::clone(self);
        let spawned = std::thread::Builder::new()
            .name("scanner-worker".to_string())
            .spawn(move || inner.run_worker(child, generation));

        match spawned {
            Ok(handle) => {
                log::debug!("Scanner running (pid {}, generation {})", pid, generation);
                *lock_unpoisoned(&self.worker) = Some(handle);
                Ok(())
            }
            Err(err) => {
                // The child was dropped with the closure and has been killed
                let err = SupervisorError::Thread(err);
                self.record_error(&err);
                self.set_state(SupervisorState::Stopped);
                Err(err)
            }
        }
    }

    fn request_stop(&self) {
        self.keep_running.store(false, Ordering::SeqCst);
    }

    fn stop(&self) {
        let _launching = lock_unpoisoned(&self.launch_lock);
        self.join_worker();
    }

    fn join_worker(&self) {
        self.request_stop();

        let handle = lock_unpoisoned(&self.worker).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                log::error!("Scanner worker panicked");
                self.set_state(SupervisorState::Stopped);
            }
        }
    }

    fn queue_relaunch(&self, command: ScanCommand) {
        *lock_unpoisoned(&self.pending) = Some(command);
        let generation = self.queue.advance_generation();
        self.relaunch_queued.store(true, Ordering::SeqCst);
        self.wake.notify_all();

        log::debug!("Relaunch queued (generation {})", generation);
    }

    fn poll_relaunch(self: &Arc<Self>) -> Result<bool, SupervisorError> {
        if !self.relaunch_queued.load(Ordering::SeqCst) {
            return Ok(false);
        }

        // Re-check under the lock: an explicit launch may have taken over
        let _launching = lock_unpoisoned(&self.launch_lock);
        if !self.relaunch_queued.load(Ordering::SeqCst) || !self.is_stopped() {
            return Ok(false);
        }

        let command = lock_unpoisoned(&self.pending).take();
        let result = match command {
            Some(command) => {
                log::info!("Relaunching scanner with new settings");
                self.spawn_worker(&command).map(|_| true)
            }
            None => Ok(false),
        };

        self.relaunch_queued.store(false, Ordering::SeqCst);
        result
    }

    fn run_control(self: Arc<Self>) {
        while !self.shutdown.load(Ordering::SeqCst) {
            {
                let state = lock_unpoisoned(&self.state);
                let _ = self.wake.wait_timeout(state, self.config.control_interval);
            }

            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }

            // Errors are already recorded; a new launch() retries
            let _ = self.poll_relaunch();
        }
    }

    fn run_worker(self: Arc<Self>, mut child: Box<dyn ScannerChild>, generation: u64) {
        let pid = child.id();
        let queue = Arc::clone(&self.queue);
        let mut publish = |scan: Scan| {
            queue.publish(generation, scan);
        };

        let mut parser = LineParser::new();
        let mut buf = vec![0u8; 4096];
        let mut pipe_open = true;
        let mut terminate_sent: Option<Instant> = None;
        let mut killed = false;

        loop {
            let mut idle = true;
            if pipe_open {
                match child.read_output(&mut buf, self.config.poll_interval) {
                    Ok(ReadOutcome::Data(n)) => {
                        idle = false;
                        parser.feed(&buf[..n], &mut publish);
                    }
                    Ok(ReadOutcome::Timeout) => {}
                    Ok(ReadOutcome::Closed) => {
                        log::debug!("Scanner output closed (pid {})", pid);
                        pipe_open = false;
                    }
                    Err(err) => {
                        log::warn!("Failed to read scanner output: {}", err);
                        pipe_open = false;
                    }
                }
            } else {
                std::thread::sleep(self.config.poll_interval);
            }

            if !self.keep_running.load(Ordering::SeqCst) && terminate_sent.is_none() {
                log::info!("Stopping scanner (pid {})", pid);
                self.set_state(SupervisorState::Stopping);
                if let Err(err) = child.signal_terminate() {
                    log::warn!("Failed to signal scanner: {}", err);
                }
                terminate_sent = Some(Instant::now());
            }

            let grace_over =
                terminate_sent.is_some_and(|sent| sent.elapsed() >= self.config.stop_grace);
            if !killed && (self.force_stop.load(Ordering::SeqCst) || grace_over) {
                log::warn!("Scanner did not exit gracefully, killing (pid {})", pid);
                if let Err(err) = child.kill() {
                    log::warn!("Failed to kill scanner: {}", err);
                }
                killed = true;
            }

            match child.try_wait() {
                // Keep reading while the pipe still delivers buffered output
                Ok(Some(status)) if !pipe_open || idle => {
                    if terminate_sent.is_none() && !status.success() {
                        let message = format!("Scanner exited unexpectedly with {}", status);
                        log::error!("{}", message);
                        *lock_unpoisoned(&self.last_error) = Some(message);
                    } else {
                        log::info!("Scanner exited with {}", status);
                    }
                    break;
                }
                Ok(_) => {}
                Err(err) => {
                    self.record_error(&SupervisorError::Reap(err));
                    break;
                }
            }
        }

        parser.finish(&mut publish);
        if parser.malformed_lines() > 0 {
            log::warn!("Scanner produced {} malformed lines", parser.malformed_lines());
        }

        drop(child);
        self.set_state(SupervisorState::Stopped);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::testing::{
        init_logging, wait_until, Script, ScriptedChild, ScriptedLauncher,
    };
    use crate::settings::Settings;

    fn config() -> SupervisorConfig {
        SupervisorConfig {
            program: PathBuf::from("scripted"),
            poll_interval: Duration::from_millis(10),
            stop_grace: Duration::from_millis(200),
            control_interval: Duration::from_millis(20),
            queue_capacity: 16,
        }
    }

    fn command(nbins: u32) -> ScanCommand {
        let settings = Settings { nbins, ..Settings::default() };
        ScanCommand::from_settings("scripted", &settings)
    }

    #[test]
    fn test_worker_publishes_parsed_scans() {
        init_logging();
        let launcher = ScriptedLauncher::with_scripts(vec![Script {
            exit_when_drained: true,
            ..Script::emitting(["# header\n1000 -1\n10", "01 -2\n\n2000 -3\n", "\n\n"])
        }]);
        let supervisor = ProcessSupervisor::new(config(), launcher);

        supervisor.launch(&command(256)).unwrap();
        assert!(wait_until(Duration::from_secs(5), || supervisor.is_stopped()));

        let scans = supervisor.queue().drain();
        assert_eq!(scans.len(), 2);
        assert_eq!(scans[0].readouts.len(), 2);
        assert!(scans[0].is_first_of_sweep);
        assert!(scans[1].is_last_of_sweep);
        assert_eq!(supervisor.state(), SupervisorState::Stopped);
        assert!(supervisor.last_error().is_none());
    }

    #[test]
    fn test_stop_terminates_scanner() {
        init_logging();
        let launcher = ScriptedLauncher::with_scripts(vec![]);
        let supervisor = ProcessSupervisor::new(config(), launcher);

        supervisor.launch(&command(256)).unwrap();
        assert!(supervisor.is_running());

        supervisor.stop();
        assert!(supervisor.is_stopped());
    }

    #[test]
    fn test_stop_escalates_to_kill() {
        init_logging();
        let launcher = ScriptedLauncher::with_scripts(vec![Script {
            ignore_terminate: true,
            ..Script::default()
        }]);
        let supervisor = ProcessSupervisor::new(config(), launcher);

        supervisor.launch(&command(256)).unwrap();
        let start = Instant::now();
        supervisor.stop();

        assert!(supervisor.is_stopped());
        assert!(start.elapsed() >= Duration::from_millis(200));
    }

    #[test]
    fn test_spawn_failure_is_retryable() {
        init_logging();
        let launcher = ScriptedLauncher::with_scripts(vec![]);
        launcher.fail_next();
        let supervisor = ProcessSupervisor::new(config(), launcher.clone());

        let result = supervisor.launch(&command(256));
        assert!(matches!(result, Err(SupervisorError::Spawn { .. })));
        assert_eq!(supervisor.state(), SupervisorState::Stopped);
        assert!(supervisor.last_error().unwrap().contains("no such file"));

        supervisor.launch(&command(256)).unwrap();
        assert!(supervisor.is_running());
        assert!(supervisor.last_error().is_none());
        assert_eq!(launcher.launches().len(), 1);
    }

    #[test]
    fn test_unexpected_exit_reported() {
        init_logging();

        struct CrashingLauncher;
        impl ProcessLauncher for CrashingLauncher {
            fn spawn(&self, _: &ScanCommand) -> Result<Box<dyn ScannerChild>, SupervisorError> {
                Ok(Box::new(ScriptedChild::crashed()))
            }
        }

        let supervisor = ProcessSupervisor::new(config(), Arc::new(CrashingLauncher));
        supervisor.launch(&command(256)).unwrap();

        assert!(wait_until(Duration::from_secs(5), || supervisor.is_stopped()));
        assert!(supervisor.last_error().unwrap().contains("unexpectedly"));
    }

    #[test]
    fn test_relaunch_waits_for_stop() {
        init_logging();
        let launcher = ScriptedLauncher::with_scripts(vec![Script {
            ignore_terminate: true,
            ..Script::default()
        }]);
        let supervisor = ProcessSupervisor::new(config(), launcher.clone());
        supervisor.launch(&command(256)).unwrap();

        supervisor.request_stop();
        supervisor.queue_relaunch(command(512));
        assert!(supervisor.relaunch_queued());
        // Still inside the grace period
        assert!(!supervisor.poll_relaunch().unwrap());

        assert!(wait_until(Duration::from_secs(5), || supervisor
            .poll_relaunch()
            .unwrap_or(false)));
        assert!(!supervisor.relaunch_queued());
        assert!(supervisor.is_running());

        let launches = launcher.launches();
        assert_eq!(launches.len(), 2);
        assert_eq!(launches[1].nbins, 512);
    }

    #[test]
    fn test_control_loop_relaunches() {
        init_logging();
        let launcher = ScriptedLauncher::with_scripts(vec![]);
        let mut supervisor = ProcessSupervisor::new(config(), launcher.clone());
        supervisor.start_control_loop().unwrap();
        supervisor.launch(&command(256)).unwrap();

        supervisor.request_stop();
        supervisor.queue_relaunch(command(1024));

        assert!(wait_until(Duration::from_secs(5), || !supervisor.relaunch_queued()));
        assert!(supervisor.is_running());
        assert_eq!(launcher.launches()[1].nbins, 1024);
    }

    #[test]
    fn test_launch_absorbs_queued_relaunch() {
        init_logging();
        let launcher = ScriptedLauncher::with_scripts(vec![]);
        let supervisor = ProcessSupervisor::new(config(), launcher.clone());
        supervisor.launch(&command(256)).unwrap();

        supervisor.request_stop();
        supervisor.queue_relaunch(command(512));
        supervisor.launch(&command(1024)).unwrap();
        assert!(!supervisor.relaunch_queued());

        assert!(wait_until(Duration::from_secs(1), || supervisor.is_running()));
        assert!(!supervisor.poll_relaunch().unwrap());
        assert_eq!(launcher.live_children(), 1);
        assert_eq!(launcher.peak_live_children(), 1);

        let launches = launcher.launches();
        assert_eq!(launches.len(), 2);
        assert_eq!(launches[1].nbins, 1024);
    }

    #[test]
    fn test_concurrent_launches_keep_one_scanner() {
        init_logging();
        let launcher = ScriptedLauncher::with_scripts(vec![]);
        let mut supervisor = ProcessSupervisor::new(config(), launcher.clone());
        supervisor.start_control_loop().unwrap();

        for round in 0..20 {
            supervisor.launch(&command(256)).unwrap();
            supervisor.request_stop();
            supervisor.queue_relaunch(command(512));
            if round % 2 == 0 {
                std::thread::sleep(Duration::from_millis(5));
            }
            supervisor.launch(&command(256)).unwrap();
        }

        std::thread::sleep(Duration::from_millis(100));
        assert!(supervisor.is_running());
        assert_eq!(launcher.live_children(), 1);
        assert_eq!(launcher.peak_live_children(), 1);

        drop(supervisor);
        assert_eq!(launcher.live_children(), 0);
    }

    #[test]
    fn test_output_of_replaced_scanner_discarded() {
        init_logging();
        let launcher = ScriptedLauncher::with_scripts(vec![Script {
            ignore_terminate: true,
            ..Script::emitting(["1000 -1\n\n\n"])
        }]);
        let supervisor = ProcessSupervisor::new(config(), launcher);
        let queue = Arc::clone(supervisor.queue());

        supervisor.launch(&command(256)).unwrap();
        assert!(wait_until(Duration::from_secs(5), || !queue.is_empty()));

        supervisor.request_stop();
        supervisor.queue_relaunch(command(512));
        assert!(queue.is_empty());
        assert!(!queue.publish(0, Default::default()));
    }

    #[cfg(unix)]
    #[test]
    fn test_real_process_round_trip() {
        use crate::scanner::process::NativeChild;
        use std::process::Command;

        struct ShellLauncher;
        impl ProcessLauncher for ShellLauncher {
            fn spawn(&self, _: &ScanCommand) -> Result<Box<dyn ScannerChild>, SupervisorError> {
                let mut command = Command::new("sh");
                command
                    .arg("-c")
                    .arg("printf '# rtl_power_fftw\\n100000000 -10\\n100100000 -12\\n\\n100200000 -9\\n\\n\\n'");
                Ok(Box::new(NativeChild::spawn(command)?))
            }
        }

        init_logging();
        let supervisor = ProcessSupervisor::new(config(), Arc::new(ShellLauncher));
        supervisor.launch(&command(256)).unwrap();
        assert!(wait_until(Duration::from_secs(5), || supervisor.is_stopped()));

        let scans = supervisor.queue().drain();
        assert_eq!(scans.len(), 2);
        assert_eq!(scans[0].readouts.len(), 2);
        assert_eq!(scans[1].readouts.len(), 1);
        assert!(scans[1].is_last_of_sweep);
    }
}
