//! RTL Spectrum - Spectrum Acquisition Core
//!
//! Drives an `rtl_power_fftw` scanner process, assembles its streamed output
//! into a live spectrum and keeps rolling average, min and max per bin.

// Suppress PyO3 non-local impl warnings (harmless macro-generated code)
#![cfg_attr(feature = "python", allow(non_local_definitions))]

pub mod analyzer;
pub mod persist;
pub mod scanner;
pub mod settings;
pub mod spectrum;

#[cfg(feature = "python")]
pub mod python_bindings;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use analyzer::{Analyzer, AnalyzerConfig};
pub use scanner::{ProcessSupervisor, Scan, SupervisorConfig};
pub use settings::{FreqUnit, Settings};
pub use spectrum::{Aggregator, BaselineChannel, Measurement};

/// Lock a mutex, recovering the data if a holder panicked
pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
