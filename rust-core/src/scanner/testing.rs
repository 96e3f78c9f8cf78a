//! Scripted scanner processes for tests

use super::process::{
    ExitStatus, ProcessLauncher, ReadOutcome, ScanCommand, ScannerChild, SupervisorError,
};
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Poll a condition until it holds or the timeout elapses
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// Behaviour of one scripted scanner process
#[derive(Debug, Clone, Default)]
pub struct Script {
    /// Chunks returned by successive reads
    pub output: Vec<String>,
    /// Exit on its own once all output was read
    pub exit_when_drained: bool,
    /// Keep running after the graceful stop signal
    pub ignore_terminate: bool,
}

impl Script {
    /// Process that prints the chunks and keeps running
    pub fn emitting<S: Into<String>>(chunks: impl IntoIterator<Item = S>) -> Self {
        Self {
            output: chunks.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }
}

pub struct ScriptedChild {
    chunks: VecDeque<Vec<u8>>,
    script: Script,
    terminated: bool,
    killed: bool,
    /// Count of children not yet dropped, shared with the launcher
    live: Option<Arc<AtomicUsize>>,
}

impl ScriptedChild {
    pub fn new(script: Script) -> Self {
        Self {
            chunks: script.output.iter().map(|s| s.as_bytes().to_vec()).collect(),
            script,
            terminated: false,
            killed: false,
            live: None,
        }
    }

    /// Child that has already died without output
    pub fn crashed() -> Self {
        let mut child = Self::new(Script::default());
        child.killed = true;
        child
    }
}

impl Drop for ScriptedChild {
    fn drop(&mut self) {
        if let Some(live) = &self.live {
            live.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl ScannerChild for ScriptedChild {
    fn id(&self) -> u32 {
        4242
    }

    fn read_output(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<ReadOutcome> {
        if let Some(mut chunk) = self.chunks.pop_front() {
            if chunk.len() > buf.len() {
                let rest = chunk.split_off(buf.len());
                self.chunks.push_front(rest);
            }
            buf[..chunk.len()].copy_from_slice(&chunk);
            return Ok(ReadOutcome::Data(chunk.len()));
        }

        let exited = self.killed
            || self.script.exit_when_drained
            || (self.terminated && !self.script.ignore_terminate);
        if exited {
            return Ok(ReadOutcome::Closed);
        }

        std::thread::sleep(timeout.min(Duration::from_millis(2)));
        Ok(ReadOutcome::Timeout)
    }

    fn signal_terminate(&mut self) -> io::Result<()> {
        self.terminated = true;
        Ok(())
    }

    fn kill(&mut self) -> io::Result<()> {
        self.killed = true;
        Ok(())
    }

    fn try_wait(&mut self) -> io::Result<Option<ExitStatus>> {
        if self.killed {
            Ok(Some(ExitStatus { code: None }))
        } else if (self.terminated && !self.script.ignore_terminate)
            || (self.script.exit_when_drained && self.chunks.is_empty())
        {
            Ok(Some(ExitStatus { code: Some(0) }))
        } else {
            Ok(None)
        }
    }
}

/// Launcher handing out scripted children in order
///
/// Once the scripts run out, further launches get a silent long-running
/// child.
#[derive(Default)]
pub struct ScriptedLauncher {
    scripts: Mutex<VecDeque<Script>>,
    commands: Mutex<Vec<ScanCommand>>,
    fail_next: AtomicBool,
    live: Arc<AtomicUsize>,
    peak_live: AtomicUsize,
}

impl ScriptedLauncher {
    pub fn with_scripts(scripts: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            ..Self::default()
        })
    }

    /// Make the next spawn fail as if the binary were missing
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Commands of every successful launch
    pub fn launches(&self) -> Vec<ScanCommand> {
        self.commands.lock().unwrap().clone()
    }

    /// Children spawned and not yet dropped
    pub fn live_children(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Most children ever alive at the same time
    pub fn peak_live_children(&self) -> usize {
        self.peak_live.load(Ordering::SeqCst)
    }
}

impl ProcessLauncher for ScriptedLauncher {
    fn spawn(&self, command: &ScanCommand) -> Result<Box<dyn ScannerChild>, SupervisorError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(SupervisorError::Spawn {
                program: command.program.display().to_string(),
                source: io::Error::new(io::ErrorKind::NotFound, "no such file"),
            });
        }

        self.commands.lock().unwrap().push(command.clone());
        let script = self.scripts.lock().unwrap().pop_front().unwrap_or_default();

        let alive = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_live.fetch_max(alive, Ordering::SeqCst);
        let mut child = ScriptedChild::new(script);
        child.live = Some(Arc::clone(&self.live));
        Ok(Box::new(child))
    }
}
