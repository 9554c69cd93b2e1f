//! # SMU Sweep Library
//!
//! Drives a bench source-measure unit over a serial link: opens a session,
//! exchanges command strings, steps the output voltage through a linear ramp
//! while recording current, and writes the result to a timestamped CSV file.
//!
//! ```no_run
//! use smu_sweep::{Session, SessionConfig, SweepPlan};
//!
//! let mut session = Session::new(SessionConfig::new("/dev/ttyUSB0"));
//! let plan = SweepPlan::new(-0.001, 0.001, 5, "scan_result_VA");
//! let result = session.scoped(|s| s.sweep(&plan))?;
//! println!("wrote {}", result.file.display());
//! # Ok::<(), smu_sweep::SessionError>(())
//! ```
//!
//! The [`fixer`] module is unrelated batch tooling that turns
//! whitespace-delimited tables into comma-delimited ones.

pub mod config;
pub mod error;
pub mod fixer;
pub mod logging;
pub mod plot;
pub mod results;
pub mod session;
pub mod simulator;
pub mod sweep;
pub mod transport;

pub use error::{FileParseError, SessionError};
pub use session::{Session, SessionConfig};
pub use simulator::{SimulatedSmu, SimulatorConfig, SimulatorConnector};
pub use sweep::{linspace, parse_sample, Sample, SweepPlan, SweepResult};
pub use transport::{Connector, SerialConnector, Transport};
