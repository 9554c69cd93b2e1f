//! Linear voltage sweep with current readback.
//!
//! The instrument is put in voltage-source mode, stepped through an evenly
//! spaced ladder of set-points, and asked for a current measurement after
//! each step. Teardown (voltage to zero, output off) always runs once the
//! output has been switched on, whether the loop finished or not.

use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::error::{Result, SessionError};
use crate::results;
use crate::session::Session;
use crate::transport::Connector;

pub const SOURCE_VOLTAGE_FUNCTION: &str = ":SOUR:FUNC VOLT";
pub const OUTPUT_ON: &str = ":OUTP ON";
pub const OUTPUT_OFF: &str = ":OUTP OFF";
pub const MEASURE_CURRENT: &str = ":MEAS:CURR?";

/// Pause between a measurement and the next set-point.
pub const DEFAULT_SETTLE: Duration = Duration::from_millis(100);

/// The command that moves the source to `volts`.
pub fn set_voltage_command(volts: f64) -> String {
    format!(":SOUR:VOLT {}", volts)
}

/// One measured (voltage, current) pair as reported by the instrument.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    #[serde(rename = "Voltage (V)")]
    pub voltage: f64,
    #[serde(rename = "Current (A)")]
    pub current: f64,
}

/// What to sweep and where to put the result.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepPlan {
    pub start_voltage: f64,
    pub stop_voltage: f64,
    /// Number of set-points, both endpoints included. Must be at least 1.
    pub steps: usize,
    pub filename_prefix: String,
    pub output_dir: PathBuf,
    pub settle: Duration,
}

impl SweepPlan {
    pub fn new(start_voltage: f64, stop_voltage: f64, steps: usize, filename_prefix: impl Into<String>) -> Self {
        Self {
            start_voltage,
            stop_voltage,
            steps,
            filename_prefix: filename_prefix.into(),
            output_dir: PathBuf::from("."),
            settle: DEFAULT_SETTLE,
        }
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// The set-points this plan steps through.
    pub fn set_points(&self) -> Vec<f64> {
        linspace(self.start_voltage, self.stop_voltage, self.steps)
    }

    fn validate(&self) -> Result<()> {
        if self.steps == 0 {
            return Err(SweepPlan::invalid("steps must be at least 1"));
        }
        if !self.start_voltage.is_finite() || !self.stop_voltage.is_finite() {
            return Err(SweepPlan::invalid("start and stop voltages must be finite"));
        }
        Ok(())
    }

    fn invalid(reason: &str) -> SessionError {
        SessionError::InvalidSweep(String::from(reason))
    }
}

/// A completed sweep. Never modified after the result file is written.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepResult {
    pub start_voltage: f64,
    pub stop_voltage: f64,
    pub steps: usize,
    pub samples: Vec<Sample>,
    pub completed_at: DateTime<Local>,
    /// Where the samples were written.
    pub file: PathBuf,
}

impl SweepResult {
    /// The samples as a `steps x 2` array of `[voltage, current]` rows.
    pub fn as_array(&self) -> Vec<[f64; 2]> {
        self.samples.iter().map(|s| [s.voltage, s.current]).collect()
    }
}

/// `steps` evenly spaced points from `start` to `stop`, both inclusive.
///
/// A single step yields `[start]`; zero steps yield nothing.
pub fn linspace(start: f64, stop: f64, steps: usize) -> Vec<f64> {
    match steps {
        0 => Vec::new(),
        1 => vec![start],
        n => {
            let span = stop - start;
            let last = (n - 1) as f64;
            (0..n)
                .map(|i| {
                    // Pin the endpoint so it is exact rather than accumulated.
                    if i == n - 1 {
                        stop
                    } else {
                        start + (i as f64) * span / last
                    }
                })
                .collect()
        }
    }
}

/// Parses a measurement response into a sample.
///
/// The response must decode as UTF-8 and hold exactly two comma-separated
/// numbers once surrounding whitespace is trimmed.
pub fn parse_sample(response: &[u8]) -> Result<Sample> {
    let malformed = |reason: String| SessionError::MalformedResponse {
        raw: String::from_utf8_lossy(response).into_owned(),
        reason,
    };

    let text = std::str::from_utf8(response).map_err(|e| malformed(e.to_string()))?;
    let fields: Vec<&str> = text.trim().split(',').collect();
    if fields.len() != 2 {
        return Err(malformed(format!("expected 2 fields, found {}", fields.len())));
    }

    let number = |field: &str| {
        field
            .trim()
            .parse::<f64>()
            .map_err(|_| malformed(format!("'{}' is not a number", field.trim())))
    };
    Ok(Sample {
        voltage: number(fields[0])?,
        current: number(fields[1])?,
    })
}

impl<C: Connector> Session<C> {
    /// Runs `plan` against the open instrument and writes the result file.
    ///
    /// A malformed measurement aborts the loop; teardown still runs and the
    /// parse error is returned. No result file is written for an aborted sweep.
    /// When every point was measured but teardown fails, the samples are still
    /// written and [`SessionError::TeardownFailed`] names the file.
    pub fn sweep(&mut self, plan: &SweepPlan) -> Result<SweepResult> {
        plan.validate()?;
        if !self.is_open() {
            return Err(SessionError::NotConnected {
                port: self.config().port.clone(),
            });
        }

        let set_points = plan.set_points();
        let measured = self.energize().and_then(|()| self.step_through(&set_points, plan.settle));
        let teardown = self.teardown();

        let samples = match measured {
            Ok(samples) => samples,
            Err(e) => {
                if let Err(teardown_err) = teardown {
                    error!("sweep teardown failed after an aborted sweep: {}", teardown_err);
                }
                return Err(e);
            }
        };

        let completed_at = Local::now();
        let file = result_path(&plan.output_dir, &plan.filename_prefix, &completed_at);
        if let Err(e) = results::write_samples(&file, &samples) {
            if let Err(teardown_err) = &teardown {
                error!("sweep teardown failed as well: {}", teardown_err);
            }
            return Err(e);
        }
        info!("Sweep of {} points written to {}", samples.len(), file.display());

        if let Err(e) = teardown {
            error!("sweep teardown failed, output may still be on: {}", e);
            return Err(SessionError::TeardownFailed {
                file,
                source: Box::new(e),
            });
        }

        Ok(SweepResult {
            start_voltage: plan.start_voltage,
            stop_voltage: plan.stop_voltage,
            steps: plan.steps,
            samples,
            completed_at,
            file,
        })
    }

    fn energize(&mut self) -> Result<()> {
        self.send(SOURCE_VOLTAGE_FUNCTION)?;
        self.send(OUTPUT_ON)
    }

    fn step_through(&mut self, set_points: &[f64], settle: Duration) -> Result<Vec<Sample>> {
        let mut samples = Vec::with_capacity(set_points.len());
        for &volts in set_points {
            self.send(&set_voltage_command(volts))?;
            self.send(MEASURE_CURRENT)?;
            let sample = parse_sample(&self.read_response()?)?;
            info!("{}V, {}A", sample.voltage, sample.current);
            samples.push(sample);
            thread::sleep(settle);
        }
        Ok(samples)
    }

    // Both commands are attempted even if the first one fails.
    fn teardown(&mut self) -> Result<()> {
        let zeroed = self.send(&set_voltage_command(0.0));
        let off = self.send(OUTPUT_OFF);
        zeroed.and(off)
    }
}

fn result_path(dir: &Path, prefix: &str, at: &DateTime<Local>) -> PathBuf {
    dir.join(results::result_file_name(prefix, at))
}
