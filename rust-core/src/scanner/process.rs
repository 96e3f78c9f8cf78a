//! Scanner subprocess handling
//!
//! The supervisor only talks to the scanner through [`ProcessLauncher`] and
//! [`ScannerChild`]: spawn with arguments, read stdout with a bounded wait,
//! ask for termination, force termination and collect the exit status.

use crate::settings::{Sampling, Settings};
use crate::spectrum::layout::BinLayout;
use std::fmt;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("Failed to spawn scanner '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Scanner stdout could not be captured")]
    Pipe,

    #[error("Failed to start acquisition worker: {0}")]
    Thread(io::Error),

    #[error("Failed to collect scanner exit status: {0}")]
    Reap(io::Error),
}

/// Command line for one scanner run
#[derive(Debug, Clone, PartialEq)]
pub struct ScanCommand {
    pub program: PathBuf,
    pub nbins: u32,
    /// Lower edge of the oversampled range in Hz
    pub min_hz: u64,
    /// Upper edge of the oversampled range in Hz
    pub max_hz: u64,
    pub gain: f64,
    pub overlap_percent: u32,
    pub sampling: Sampling,
}

impl ScanCommand {
    /// Build the command for committed settings
    ///
    /// The scanner is asked for a range widened by the overlap margin on both
    /// sides so that trimmed scan edges never cost real spectrum.
    pub fn from_settings(program: impl Into<PathBuf>, settings: &Settings) -> Self {
        let (min_hz, max_hz) = BinLayout::new(settings).oversampled_range();

        Self {
            program: program.into(),
            nbins: settings.nbins,
            min_hz,
            max_hz,
            gain: settings.gain,
            overlap_percent: settings.overlap_percent,
            sampling: settings.sampling(),
        }
    }

    /// Arguments passed to the scanner binary
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            "-b".to_string(),
            self.nbins.to_string(),
            "-f".to_string(),
            format!("{}:{}", self.min_hz, self.max_hz),
            "-g".to_string(),
            self.gain.to_string(),
            "-o".to_string(),
            self.overlap_percent.to_string(),
            "-c".to_string(),
        ];

        match self.sampling {
            Sampling::Duration(seconds) => {
                args.push("-t".to_string());
                args.push(seconds.to_string());
            }
            Sampling::Count(count) => {
                args.push("-n".to_string());
                args.push(count.to_string());
            }
        }

        args
    }
}

impl fmt::Display for ScanCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in self.args() {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Exit status of a scanner process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus {
    /// Exit code, `None` when the process was ended by a signal
    pub code: Option<i32>,
}

impl ExitStatus {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<std::process::ExitStatus> for ExitStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        Self { code: status.code() }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "exit code {}", code),
            None => write!(f, "terminated by signal"),
        }
    }
}

/// Result of a bounded read on the scanner's output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Bytes were read into the buffer
    Data(usize),
    /// Nothing arrived within the wait
    Timeout,
    /// The output stream reached end of file
    Closed,
}

/// Handle to a running scanner process
pub trait ScannerChild: Send {
    /// Process id, for logging
    fn id(&self) -> u32;

    /// Read available output, waiting at most `timeout`
    fn read_output(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<ReadOutcome>;

    /// Ask the process to finish gracefully
    fn signal_terminate(&mut self) -> io::Result<()>;

    /// Terminate the process immediately
    fn kill(&mut self) -> io::Result<()>;

    /// Exit status if the process has exited, without blocking
    fn try_wait(&mut self) -> io::Result<Option<ExitStatus>>;
}

/// Starts scanner processes
pub trait ProcessLauncher: Send + Sync {
    fn spawn(&self, command: &ScanCommand) -> Result<Box<dyn ScannerChild>, SupervisorError>;
}

/// Launches the real scanner binary
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeLauncher;

impl ProcessLauncher for NativeLauncher {
    fn spawn(&self, command: &ScanCommand) -> Result<Box<dyn ScannerChild>, SupervisorError> {
        let mut process = Command::new(&command.program);
        process.args(command.args());

        let child = NativeChild::spawn(process)?;
        Ok(Box::new(child))
    }
}

/// OS process with its stdout redirected into a pipe
pub struct NativeChild {
    child: Child,
    stdout: ChildStdout,
}

impl NativeChild {
    /// Spawn a prepared command with stdout piped back to us
    pub fn spawn(mut command: Command) -> Result<Self, SupervisorError> {
        let program = command.get_program().to_string_lossy().into_owned();

        let mut child = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| SupervisorError::Spawn { program, source })?;

        let stdout = match child.stdout.take() {
            Some(stdout) => stdout,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(SupervisorError::Pipe);
            }
        };

        Ok(Self { child, stdout })
    }
}

impl ScannerChild for NativeChild {
    fn id(&self) -> u32 {
        self.child.id()
    }

    #[cfg(unix)]
    fn read_output(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<ReadOutcome> {
        use std::os::unix::io::AsRawFd;

        let mut pfd = libc::pollfd {
            fd: self.stdout.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        let timeout_ms = timeout.as_millis().min(i32::MAX as u128) as libc::c_int;

        // SAFETY: `pfd` is a single valid pollfd that outlives the call.
        let ready = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
        if ready < 0 {
            let err = io::Error::last_os_error();
            return if err.kind() == io::ErrorKind::Interrupted {
                Ok(ReadOutcome::Timeout)
            } else {
                Err(err)
            };
        }
        if ready == 0 || pfd.revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) == 0 {
            return Ok(ReadOutcome::Timeout);
        }

        match self.stdout.read(buf)? {
            0 => Ok(ReadOutcome::Closed),
            n => Ok(ReadOutcome::Data(n)),
        }
    }

    #[cfg(not(unix))]
    fn read_output(&mut self, buf: &mut [u8], _timeout: Duration) -> io::Result<ReadOutcome> {
        // No portable poll on pipes here; the scanner writes continuously
        match self.stdout.read(buf)? {
            0 => Ok(ReadOutcome::Closed),
            n => Ok(ReadOutcome::Data(n)),
        }
    }

    #[cfg(unix)]
    fn signal_terminate(&mut self) -> io::Result<()> {
        // SIGINT lets the scanner finish its current sweep and release the tuner
        // SAFETY: plain kill(2) on the pid of a child we have not reaped yet.
        let ret = unsafe { libc::kill(self.child.id() as libc::pid_t, libc::SIGINT) };
        if ret == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    #[cfg(not(unix))]
    fn signal_terminate(&mut self) -> io::Result<()> {
        self.child.kill()
    }

    fn kill(&mut self) -> io::Result<()> {
        self.child.kill()
    }

    fn try_wait(&mut self) -> io::Result<Option<ExitStatus>> {
        Ok(self.child.try_wait()?.map(ExitStatus::from))
    }
}

impl Drop for NativeChild {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}
