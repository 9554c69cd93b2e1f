//! Byte-stream links to an instrument.
//!
//! A [`Connector`] knows how to open a link for a [`SessionConfig`]; the link it
//! returns implements [`Transport`]. Dropping the link releases the underlying
//! port, so closing a session is simply letting go of its link.

use std::io::{self, BufRead, BufReader, Write};

use serialport::{SerialPort, SerialPortInfo};
use tracing::debug;

use crate::error::SessionError;
use crate::session::SessionConfig;

/// A duplex byte stream with line-oriented reads.
pub trait Transport {
    /// Writes every byte of `bytes` to the instrument.
    fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Reads one line, terminator included.
    ///
    /// Returns an empty vector when nothing arrived before the per-line timeout.
    /// A timeout after some bytes arrived returns those bytes as a partial line.
    fn read_line(&mut self) -> io::Result<Vec<u8>>;
}

/// Opens links for a session.
pub trait Connector {
    type Link: Transport;

    fn open(&self, config: &SessionConfig) -> Result<Self::Link, SessionError>;
}

/// Opens real serial ports.
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialConnector;

impl Connector for SerialConnector {
    type Link = SerialLink;

    fn open(&self, config: &SessionConfig) -> Result<SerialLink, SessionError> {
        let port = serialport::new(config.port.as_str(), config.baud_rate)
            .timeout(config.timeout)
            .open()
            .map_err(|source| SessionError::Transport {
                port: config.port.clone(),
                source,
            })?;
        debug!(port = %config.port, baud = config.baud_rate, "serial port opened");
        Ok(SerialLink::new(port))
    }
}

/// An open serial port with a read buffer in front of it.
pub struct SerialLink {
    reader: BufReader<Box<dyn SerialPort>>,
}

impl SerialLink {
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        Self {
            reader: BufReader::new(port),
        }
    }
}

impl Transport for SerialLink {
    fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        let port = self.reader.get_mut();
        port.write_all(bytes)?;
        port.flush()
    }

    fn read_line(&mut self) -> io::Result<Vec<u8>> {
        let mut line = Vec::new();
        match self.reader.read_until(b'\n', &mut line) {
            Ok(_) => Ok(line),
            // The port timed out; whatever arrived so far is the line.
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(line),
            Err(e) => Err(e),
        }
    }
}

/// Lists the serial ports present on this machine.
pub fn list_ports() -> Result<Vec<SerialPortInfo>, serialport::Error> {
    serialport::available_ports()
}
