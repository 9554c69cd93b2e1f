//! Delimiter fixer: rewrites whitespace-delimited `.csv` tables as real CSV.
//!
//! Every `*.csv` file directly inside a directory is parsed with runs of
//! whitespace as the delimiter and written next to it as `fixed_<name>`.
//! A file that fails to parse is reported and skipped; the rest of the batch
//! carries on.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::FileParseError;

/// Prefix given to every converted file.
pub const FIXED_PREFIX: &str = "fixed_";

/// A parsed table: a header row plus data rows of the same width.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// Outcome of a directory pass.
#[derive(Debug, Default)]
pub struct FixReport {
    /// Output files written.
    pub converted: Vec<PathBuf>,
    /// Input files that could not be converted, with the reason.
    pub failed: Vec<(PathBuf, FileParseError)>,
}

/// Parses whitespace-delimited text.
///
/// Blank lines are skipped and the first remaining line is the header. Rows
/// shorter than the header are padded with empty fields; longer rows are an
/// error.
pub fn parse_whitespace_table(text: &str) -> Result<Table, FileParseError> {
    let mut lines = text
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty());

    let header: Vec<String> = match lines.next() {
        Some((_, line)) => line.split_whitespace().map(String::from).collect(),
        None => return Err(FileParseError::Empty),
    };

    let mut rows = Vec::new();
    for (index, line) in lines {
        let mut fields: Vec<String> = line.split_whitespace().map(String::from).collect();
        if fields.len() > header.len() {
            return Err(FileParseError::FieldCount {
                line: index + 1,
                expected: header.len(),
                found: fields.len(),
            });
        }
        fields.resize(header.len(), String::new());
        rows.push(fields);
    }

    Ok(Table { header, rows })
}

/// Writes `table` comma-delimited with its header row.
pub fn write_table(path: &Path, table: &Table) -> Result<(), FileParseError> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(&table.header)?;
    for row in &table.rows {
        writer.write_record(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Converts one file, returning the path of the output.
pub fn fix_file(path: &Path) -> Result<PathBuf, FileParseError> {
    let text = fs::read_to_string(path)?;
    let table = parse_whitespace_table(&text)?;

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let output = path.with_file_name(format!("{}{}", FIXED_PREFIX, name));
    write_table(&output, &table)?;
    Ok(output)
}

/// Converts every `.csv` file directly inside `dir`.
///
/// Only a failure to list `dir` is returned as an error. The listing is taken
/// before anything is written, so outputs of this pass are not picked up again.
pub fn fix_directory(dir: &Path) -> io::Result<FixReport> {
    let mut inputs = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_csv = path.extension().is_some_and(|ext| ext == "csv");
        if is_csv && path.is_file() {
            inputs.push(path);
        }
    }
    inputs.sort();

    let mut report = FixReport::default();
    for input in inputs {
        let filename = input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        match fix_file(&input) {
            Ok(output) => {
                info!("Converted '{}' to comma-delimited format.", filename);
                report.converted.push(output);
            }
            Err(e) => {
                warn!("Could not parse '{}': {}", filename, e);
                report.failed.push((input, e));
            }
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn irregular_whitespace_is_one_delimiter() {
        let table = parse_whitespace_table("V   I\n0.1\t\t2e-6\n  0.2  4e-6  \n").unwrap();
        assert_eq!(table.header, ["V", "I"]);
        assert_eq!(table.rows, vec![vec!["0.1", "2e-6"], vec!["0.2", "4e-6"]]);
    }

    #[test]
    fn blank_lines_are_skipped() {
        let table = parse_whitespace_table("\n\na b\n\n1 2\n\n").unwrap();
        assert_eq!(table.rows.len(), 1);
    }

    #[test]
    fn short_rows_are_padded() {
        let table = parse_whitespace_table("a b c\n1 2\n").unwrap();
        assert_eq!(table.rows[0], ["1", "2", ""]);
    }

    #[test]
    fn long_rows_are_rejected_with_line_number() {
        let err = parse_whitespace_table("a b\n1 2\n1 2 3\n").unwrap_err();
        match err {
            FileParseError::FieldCount { line, expected, found } => {
                assert_eq!((line, expected, found), (3, 2, 3));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn empty_input_has_no_columns() {
        assert!(matches!(parse_whitespace_table(""), Err(FileParseError::Empty)));
        assert!(matches!(parse_whitespace_table(" \n\t\n"), Err(FileParseError::Empty)));
    }
}
