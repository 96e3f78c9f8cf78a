//! Measurement files
//!
//! CSV export/import of measurements and import of raw `.met` + `.bin`
//! captures. Failures abort only the file operation at hand.

pub mod binary;
pub mod csv;

use crate::settings::SettingsError;
use std::io;
use thiserror::Error;

pub use self::binary::{import_binary, MetInfo};
pub use self::csv::{export_csv, import_csv};

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("No file selected")]
    EmptyPath,

    #[error("Failed to read file: {0}")]
    Io(#[from] io::Error),

    #[error("Line {line}: {message}")]
    Format { line: usize, message: String },

    #[error("Metadata is missing '{0}'")]
    MissingKey(&'static str),

    #[error("Malformed CSV: {0}")]
    Csv(#[from] ::csv::Error),

    #[error("Unexpected data size: {0}")]
    Shape(String),

    #[error("Imported settings are invalid: {0}")]
    Settings(#[from] SettingsError),
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("No file selected")]
    EmptyPath,

    #[error("Failed to write file: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to write CSV: {0}")]
    Csv(#[from] ::csv::Error),
}
