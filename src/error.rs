//! Error types for instrument sessions and the delimiter fixer.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while talking to an instrument or running a sweep.
#[derive(Error, Debug)]
pub enum SessionError {
    /// The transport could not be opened. The session stays closed.
    #[error("could not open '{port}': {source}")]
    Transport {
        port: String,
        #[source]
        source: serialport::Error,
    },

    /// An operation that needs an open link was attempted on a closed session.
    #[error("session on '{port}' is not connected")]
    NotConnected { port: String },

    /// A response did not decode into the expected numeric fields.
    #[error("malformed response {raw:?}: {reason}")]
    MalformedResponse { raw: String, reason: String },

    /// The instrument kept producing lines past the configured cap.
    #[error("response exceeded {limit} lines without the instrument going quiet")]
    ResponseTooLong { limit: usize },

    /// Every point was measured and saved, but the output could not be shut off.
    #[error("sweep saved to '{}' but teardown failed: {source}", .file.display())]
    TeardownFailed {
        file: PathBuf,
        #[source]
        source: Box<SessionError>,
    },

    /// Sweep parameters that cannot produce a ladder.
    #[error("invalid sweep: {0}")]
    InvalidSweep(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Per-file failures of the delimiter fixer.
#[derive(Error, Debug)]
pub enum FileParseError {
    /// No header row: the file is empty or only whitespace.
    #[error("no columns to parse from file")]
    Empty,

    /// A data row carries more fields than the header names.
    #[error("expected {expected} fields in line {line}, saw {found}")]
    FieldCount {
        line: usize,
        expected: usize,
        found: usize,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, SessionError>;
