//! Optional TOML configuration for the sweep front end.
//!
//! ```toml
//! [session]
//! port = "/dev/ttyUSB0"
//! baud_rate = 9600
//! timeout_ms = 1000
//! echo = false
//! max_response_lines = 64
//!
//! [sweep]
//! start_voltage = -0.001
//! stop_voltage = 0.001
//! steps = 5
//! filename_prefix = "scan_result_VA"
//! output_dir = "results"
//! settle_ms = 100
//! ```
//!
//! Every key is optional.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::session::SessionConfig;
use crate::sweep::{SweepPlan, DEFAULT_SETTLE};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub session: SessionSettings,
    pub sweep: SweepSettings,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionSettings {
    /// Left unset, the CLI asks which port to use.
    pub port: Option<String>,
    pub baud_rate: u32,
    pub timeout_ms: u64,
    pub echo: bool,
    pub max_response_lines: Option<usize>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        let defaults = SessionConfig::default();
        Self {
            port: None,
            baud_rate: defaults.baud_rate,
            timeout_ms: defaults.timeout.as_millis() as u64,
            echo: defaults.echo,
            max_response_lines: defaults.max_response_lines,
        }
    }
}

impl SessionSettings {
    /// Builds a session config for `port`.
    pub fn to_session_config(&self, port: &str) -> SessionConfig {
        SessionConfig {
            port: port.to_string(),
            baud_rate: self.baud_rate,
            timeout: Duration::from_millis(self.timeout_ms),
            echo: self.echo,
            max_response_lines: self.max_response_lines,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct SweepSettings {
    pub start_voltage: f64,
    pub stop_voltage: f64,
    pub steps: usize,
    pub filename_prefix: String,
    pub output_dir: PathBuf,
    pub settle_ms: u64,
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            start_voltage: 0.0,
            stop_voltage: 600.0,
            steps: 20,
            filename_prefix: String::from("scan_result_VA"),
            output_dir: PathBuf::from("."),
            settle_ms: DEFAULT_SETTLE.as_millis() as u64,
        }
    }
}

impl SweepSettings {
    pub fn to_plan(&self) -> SweepPlan {
        SweepPlan::new(
            self.start_voltage,
            self.stop_voltage,
            self.steps,
            self.filename_prefix.clone(),
        )
        .with_output_dir(self.output_dir.clone())
        .with_settle(Duration::from_millis(self.settle_ms))
    }
}

impl AppConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}
