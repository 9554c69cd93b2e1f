//! Sweep result files: `<prefix>_<YYYY-MM-DD_HH_MM_SS>.csv` with a
//! `Voltage (V),Current (A)` header and one row per sample.

use std::path::Path;

use chrono::{DateTime, TimeZone};

use crate::error::Result;
use crate::sweep::Sample;

/// Timestamp layout embedded in result file names.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H_%M_%S";

pub fn result_file_name<Tz: TimeZone>(prefix: &str, at: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!("{}_{}.csv", prefix, at.format(TIMESTAMP_FORMAT))
}

/// Column names of the result file.
pub const HEADER: [&str; 2] = ["Voltage (V)", "Current (A)"];

pub fn write_samples(path: &Path, samples: &[Sample]) -> Result<()> {
    // Header written by hand so that an empty sweep still gets one.
    let mut writer = csv::WriterBuilder::new().has_headers(false).from_path(path)?;
    writer.write_record(HEADER)?;
    for sample in samples {
        writer.serialize(sample)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn read_samples(path: &Path) -> Result<Vec<Sample>> {
    let mut reader = csv::Reader::from_path(path)?;
    let samples = reader.deserialize().collect::<std::result::Result<Vec<Sample>, _>>()?;
    Ok(samples)
}
