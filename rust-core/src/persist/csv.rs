//! CSV measurement files
//!
//! Layout: nine single-value preamble lines with the settings (sample rate,
//! min freq, min freq unit index, max freq, max freq unit index, gain, bin
//! count, overlap percent, sample count), the header
//! `freq,spectrum,avg,max,min`, then one row per bin.

use super::{ExportError, ImportError};
use crate::settings::{FreqUnit, Settings};
use crate::spectrum::Measurement;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::str::FromStr;

const HEADER: [&str; 5] = ["freq", "spectrum", "avg", "max", "min"];
const PREAMBLE_LINES: usize = 9;

/// Write a measurement as CSV
pub fn write_measurement<W: Write>(
    writer: W,
    measurement: &Measurement,
) -> Result<(), ExportError> {
    let settings = &measurement.settings;
    let mut writer = ::csv::WriterBuilder::new().flexible(true).from_writer(writer);

    let preamble = [
        settings.sample_rate.to_string(),
        settings.min_freq.to_string(),
        settings.min_freq_units.index().to_string(),
        settings.max_freq.to_string(),
        settings.max_freq_units.index().to_string(),
        settings.gain.to_string(),
        settings.nbins.to_string(),
        settings.overlap_percent.to_string(),
        settings.nsamples.to_string(),
    ];
    for value in &preamble {
        writer.write_record([value])?;
    }

    writer.write_record(HEADER)?;

    let layout = measurement.layout();
    for bin in 0..measurement.len() {
        writer.write_record(&[
            layout.bin_center_freq(bin).to_string(),
            measurement.spectrum[bin].to_string(),
            measurement.average[bin].to_string(),
            measurement.max[bin].to_string(),
            measurement.min[bin].to_string(),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

/// Export a measurement to a CSV file
pub fn export_csv<P: AsRef<Path>>(path: P, measurement: &Measurement) -> Result<(), ExportError> {
    let path = path.as_ref();
    if path.as_os_str().is_empty() {
        return Err(ExportError::EmptyPath);
    }

    let file = File::create(path)?;
    write_measurement(file, measurement)?;

    log::info!("Exported {} bins to {}", measurement.len(), path.display());
    Ok(())
}

fn field<T: FromStr>(
    record: &::csv::StringRecord,
    index: usize,
    what: &str,
) -> Result<T, ImportError> {
    let line = record_line(record);
    let raw = record.get(index).ok_or_else(|| ImportError::Format {
        line,
        message: format!("missing {}", what),
    })?;

    raw.trim().parse().map_err(|_| ImportError::Format {
        line,
        message: format!("invalid {} '{}'", what, raw),
    })
}

fn record_line(record: &::csv::StringRecord) -> usize {
    record.position().map_or(0, |pos| pos.line() as usize)
}

fn unit(record: &::csv::StringRecord, what: &str) -> Result<FreqUnit, ImportError> {
    let index: usize = field(record, 0, what)?;
    FreqUnit::from_index(index).ok_or_else(|| ImportError::Format {
        line: record_line(record),
        message: format!("unknown {} {}", what, index),
    })
}

/// Read a measurement written by [`write_measurement`]
pub fn read_measurement<R: Read>(reader: R) -> Result<Measurement, ImportError> {
    let mut reader = ::csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);
    let mut records = reader.records();

    let mut preamble = Vec::with_capacity(PREAMBLE_LINES);
    for _ in 0..PREAMBLE_LINES {
        match records.next() {
            Some(record) => preamble.push(record?),
            None => {
                return Err(ImportError::Format {
                    line: preamble.len() + 1,
                    message: "settings preamble is incomplete".to_string(),
                })
            }
        }
    }

    let settings = Settings {
        sample_rate: field(&preamble[0], 0, "sample rate")?,
        min_freq: field(&preamble[1], 0, "min frequency")?,
        min_freq_units: unit(&preamble[2], "min frequency unit")?,
        max_freq: field(&preamble[3], 0, "max frequency")?,
        max_freq_units: unit(&preamble[4], "max frequency unit")?,
        gain: field(&preamble[5], 0, "gain")?,
        nbins: field(&preamble[6], 0, "bin count")?,
        overlap_percent: field(&preamble[7], 0, "overlap")?,
        nsamples: field(&preamble[8], 0, "sample count")?,
        ..Settings::default()
    };
    settings.validate()?;

    let header = records.next().transpose()?.ok_or_else(|| ImportError::Format {
        line: PREAMBLE_LINES + 1,
        message: "missing column header".to_string(),
    })?;
    if header.iter().map(str::trim).ne(HEADER) {
        return Err(ImportError::Format {
            line: record_line(&header),
            message: format!("expected header '{}'", HEADER.join(",")),
        });
    }

    let mut measurement = Measurement::new(settings);
    let expected = measurement.len();
    let mut rows = 0;
    for record in records {
        let record = record?;
        if rows < expected {
            measurement.spectrum[rows] = field(&record, 1, "spectrum")?;
            measurement.average[rows] = field(&record, 2, "average")?;
            measurement.max[rows] = field(&record, 3, "max")?;
            measurement.min[rows] = field(&record, 4, "min")?;
        }
        rows += 1;
    }

    if rows != expected {
        return Err(ImportError::Shape(format!(
            "settings describe {} bins, file has {} rows",
            expected, rows
        )));
    }

    Ok(measurement)
}

/// Import a measurement from a CSV file
pub fn import_csv<P: AsRef<Path>>(path: P) -> Result<Measurement, ImportError> {
    let path = path.as_ref();
    if path.as_os_str().is_empty() {
        return Err(ImportError::EmptyPath);
    }

    let measurement = read_measurement(File::open(path)?)?;
    log::info!("Imported {} bins from {}", measurement.len(), path.display());
    Ok(measurement)
}
