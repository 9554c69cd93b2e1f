//! # Simulated source-measure unit
//!
//! A software stand-in for a bench SMU driving a resistive load. It keeps the
//! instrument state that the sweep touches, answers the same command strings a
//! real unit would, and hands responses back one line at a time like a serial
//! port. Used for dry runs (`sweep_cli --simulate`) and by the tests.

use std::collections::VecDeque;
use std::io;

use tracing::{debug, warn};

use crate::error::SessionError;
use crate::session::SessionConfig;
use crate::transport::{Connector, Transport};

/// Identification string returned for `*IDN?`.
pub const IDENTITY: &str = "SIMULATED,SMU-1,0000001,1.0";

// Why a command was not executed.
#[derive(Debug, PartialEq)]
pub enum CommandError {
    /// Nothing but whitespace between terminators.
    Empty,
    /// The header is not one this instrument knows.
    UnknownCommand(String),
    /// The header is known but its parameter is not.
    InvalidParameter(String),
}

// Commands understood by the simulator.
#[derive(Debug, PartialEq)]
enum Command {
    Identify,
    SourceFunction(SourceFunction),
    SourceVoltage(f64),
    Output(bool),
    MeasureCurrent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFunction {
    Voltage,
    Current,
}

/// Tunables for the simulated instrument.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatorConfig {
    /// Resistance of the load across the output terminals.
    pub load_ohms: f64,
    /// After this many good measurements, answer with a single field.
    pub garble_after: Option<usize>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            load_ohms: 1_000.0,
            garble_after: None,
        }
    }
}

/// State of the simulated instrument.
#[derive(Debug, Clone)]
pub struct SimulatedSmu {
    pub config: SimulatorConfig,
    pub function: SourceFunction,
    pub output_enabled: bool,
    pub source_voltage: f64,
    // Every command received, terminators stripped.
    history: Vec<String>,
    // Bytes written that do not yet form a complete line.
    pending_input: Vec<u8>,
    // Response lines waiting to be read.
    outbox: VecDeque<Vec<u8>>,
    measurements: usize,
}

impl SimulatedSmu {
    pub fn new(config: SimulatorConfig) -> Self {
        Self {
            config,
            function: SourceFunction::Current,
            output_enabled: false,
            source_voltage: 0.0,
            history: Vec::new(),
            pending_input: Vec::new(),
            outbox: VecDeque::new(),
            measurements: 0,
        }
    }

    /// Every command received so far, in order.
    pub fn history(&self) -> &[String] {
        &self.history
    }

    /// Current through the load at the present state.
    pub fn load_current(&self) -> f64 {
        if self.output_enabled && self.function == SourceFunction::Voltage {
            self.source_voltage / self.config.load_ohms
        } else {
            0.0
        }
    }

    /// Parses one command line into a `Command`.
    fn parse_command(&self, line: &str) -> Result<Command, CommandError> {
        let mut parts = line.splitn(2, char::is_whitespace);
        let header = parts.next().unwrap_or_default().to_ascii_uppercase();
        let param = parts.next().map(str::trim).unwrap_or_default();

        match header.as_str() {
            "" => Err(CommandError::Empty),
            "*IDN?" => Ok(Command::Identify),
            ":SOUR:FUNC" => match param.to_ascii_uppercase().as_str() {
                "VOLT" => Ok(Command::SourceFunction(SourceFunction::Voltage)),
                "CURR" => Ok(Command::SourceFunction(SourceFunction::Current)),
                _ => Err(CommandError::InvalidParameter(param.to_string())),
            },
            ":SOUR:VOLT" => param
                .parse::<f64>()
                .map(Command::SourceVoltage)
                .map_err(|_| CommandError::InvalidParameter(param.to_string())),
            ":OUTP" => match param.to_ascii_uppercase().as_str() {
                "ON" | "1" => Ok(Command::Output(true)),
                "OFF" | "0" => Ok(Command::Output(false)),
                _ => Err(CommandError::InvalidParameter(param.to_string())),
            },
            ":MEAS:CURR?" => Ok(Command::MeasureCurrent),
            _ => Err(CommandError::UnknownCommand(header)),
        }
    }

    /// Processes one command line and returns the response, if it has one.
    pub fn process_command(&mut self, line: &str) -> Result<Option<String>, CommandError> {
        let line = line.trim();
        let command = self.parse_command(line)?;
        self.history.push(line.to_string());
        Ok(self.execute_command(command))
    }

    fn execute_command(&mut self, command: Command) -> Option<String> {
        match command {
            Command::Identify => Some(String::from(IDENTITY)),
            Command::SourceFunction(function) => {
                self.function = function;
                None
            }
            Command::SourceVoltage(volts) => {
                self.source_voltage = volts;
                None
            }
            Command::Output(on) => {
                self.output_enabled = on;
                None
            }
            Command::MeasureCurrent => {
                self.measurements += 1;
                let garbled = self
                    .config
                    .garble_after
                    .is_some_and(|n| self.measurements > n);
                if garbled {
                    Some(format!("{:+.6E}", self.source_voltage))
                } else {
                    Some(format!("{:+.6E},{:+.6E}", self.source_voltage, self.load_current()))
                }
            }
        }
    }
}

impl Transport for SimulatedSmu {
    fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.pending_input.extend_from_slice(bytes);
        while let Some(end) = self.pending_input.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.pending_input.drain(..=end).collect();
            let line = String::from_utf8_lossy(&raw);
            match self.process_command(&line) {
                Ok(Some(response)) => {
                    debug!("< {}", response);
                    self.outbox.push_back(format!("{}\r\n", response).into_bytes());
                }
                Ok(None) => {}
                Err(CommandError::Empty) => {}
                Err(e) => warn!("simulator ignored {:?}: {:?}", line.trim(), e),
            }
        }
        Ok(())
    }

    fn read_line(&mut self) -> io::Result<Vec<u8>> {
        // An empty outbox behaves like a read timeout.
        Ok(self.outbox.pop_front().unwrap_or_default())
    }
}

/// Opens a fresh simulated instrument for each session.
#[derive(Debug, Default, Clone)]
pub struct SimulatorConnector {
    pub config: SimulatorConfig,
}

impl SimulatorConnector {
    pub fn new(config: SimulatorConfig) -> Self {
        Self { config }
    }
}

impl Connector for SimulatorConnector {
    type Link = SimulatedSmu;

    fn open(&self, config: &SessionConfig) -> Result<SimulatedSmu, SessionError> {
        debug!(port = %config.port, "opening simulated instrument");
        Ok(SimulatedSmu::new(self.config.clone()))
    }
}
