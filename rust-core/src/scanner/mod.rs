//! Scanner acquisition: subprocess, output parsing and scan handoff

pub mod parser;
pub mod process;
pub mod queue;
pub mod supervisor;

pub use parser::{LineParser, Readout, Scan};
pub use process::{NativeLauncher, ProcessLauncher, ScanCommand, ScannerChild, SupervisorError};
pub use queue::ScanQueue;
pub use supervisor::{ProcessSupervisor, SupervisorConfig, SupervisorState};

#[cfg(test)]
pub(crate) mod testing;
