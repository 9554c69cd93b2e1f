//! Instrument session: connection lifecycle and the command/response protocol.
//!
//! A session owns at most one open link. Commands are opaque strings; the only
//! protocol knowledge here is the line terminator and the "read lines until
//! the instrument goes quiet" response convention.
//!
//! Pairing is the caller's job. A query (`...?`) should be followed by exactly
//! one [`Session::read_response`]; reading without a query, or issuing two
//! queries before reading, hands back whatever bytes the instrument happened to
//! produce. Nothing here detects that.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{Result, SessionError};
use crate::transport::{Connector, SerialConnector, Transport};

/// Terminator appended to commands that don't already end a line.
pub const LINE_TERMINATOR: &str = "\r\n";

/// Connection parameters, fixed for the life of a session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Port name, e.g. `/dev/ttyUSB0` or `COM4`.
    pub port: String,
    pub baud_rate: u32,
    /// Per-line read timeout.
    pub timeout: Duration,
    /// Log every payload at `info` instead of `debug`.
    pub echo: bool,
    /// Upper bound on lines accumulated by one `read_response`.
    ///
    /// `None` reads until the instrument goes quiet, however long that takes.
    pub max_response_lines: Option<usize>,
}

impl SessionConfig {
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            ..Self::default()
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            port: String::from("COM2"),
            baud_rate: 9600,
            timeout: Duration::from_secs(2),
            echo: false,
            max_response_lines: None,
        }
    }
}

/// One serial link to an instrument, open or closed.
pub struct Session<C: Connector = SerialConnector> {
    config: SessionConfig,
    connector: C,
    link: Option<C::Link>,
}

impl Session<SerialConnector> {
    /// Creates a closed session over a real serial port.
    pub fn new(config: SessionConfig) -> Self {
        Self::with_connector(config, SerialConnector)
    }
}

impl<C: Connector> Session<C> {
    /// Creates a closed session that opens its link through `connector`.
    pub fn with_connector(config: SessionConfig, connector: C) -> Self {
        Self {
            config,
            connector,
            link: None,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn is_open(&self) -> bool {
        self.link.is_some()
    }

    /// The open link, if any.
    pub fn link(&self) -> Option<&C::Link> {
        self.link.as_ref()
    }

    /// Opens the link. On failure the session stays closed; there is no retry.
    ///
    /// Opening an already open session keeps the existing link.
    pub fn open(&mut self) -> Result<()> {
        if self.link.is_some() {
            return Ok(());
        }
        let link = self.connector.open(&self.config)?;
        self.link = Some(link);
        info!("Connection to {} opened successfully.", self.config.port);
        Ok(())
    }

    /// Releases the link. Closing a closed session does nothing.
    pub fn close(&mut self) {
        if self.link.take().is_some() {
            if self.config.echo {
                info!("Connection to {} closed.", self.config.port);
            } else {
                debug!("Connection to {} closed.", self.config.port);
            }
        }
    }

    /// Opens the session, runs `f`, and closes the session on every exit path.
    pub fn scoped<R>(&mut self, f: impl FnOnce(&mut Self) -> Result<R>) -> Result<R> {
        self.open()?;
        let outcome = f(self);
        self.close();
        outcome
    }

    /// Writes `command`, appending [`LINE_TERMINATOR`] unless it already ends a line.
    ///
    /// Fails with [`SessionError::NotConnected`] on a closed session.
    pub fn send(&mut self, command: &str) -> Result<()> {
        let echo = self.config.echo;
        let link = self.open_link()?;

        let mut payload = String::with_capacity(command.len() + LINE_TERMINATOR.len());
        payload.push_str(command);
        if !command.ends_with('\n') {
            payload.push_str(LINE_TERMINATOR);
        }
        link.write_bytes(payload.as_bytes())?;

        if echo {
            info!("Sent data: {:?}", payload);
        } else {
            debug!("Sent data: {:?}", payload);
        }
        Ok(())
    }

    /// Reads lines until one comes back empty and returns everything read.
    ///
    /// Each line waits at most the configured timeout, but there is no overall
    /// deadline unless `max_response_lines` is set. The result is empty when
    /// nothing arrived in time. Fails immediately with
    /// [`SessionError::NotConnected`] on a closed session.
    pub fn read_response(&mut self) -> Result<Vec<u8>> {
        let echo = self.config.echo;
        let limit = self.config.max_response_lines;
        let link = self.open_link()?;

        let mut data = Vec::new();
        let mut lines = 0usize;
        loop {
            let line = link.read_line()?;
            if line.is_empty() {
                break;
            }
            // A full response is fine; only a line past the cap is rejected.
            if let Some(limit) = limit {
                if lines == limit {
                    warn!(limit, "instrument is still talking, giving up on response");
                    return Err(SessionError::ResponseTooLong { limit });
                }
            }
            data.extend_from_slice(&line);
            lines += 1;
        }

        if echo {
            info!("Received data: {:?}", String::from_utf8_lossy(&data));
        } else {
            debug!("Received data: {:?}", String::from_utf8_lossy(&data));
        }
        Ok(data)
    }

    /// Sends `command` and reads the response that follows it.
    pub fn query(&mut self, command: &str) -> Result<Vec<u8>> {
        self.send(command)?;
        self.read_response()
    }

    fn open_link(&mut self) -> Result<&mut C::Link> {
        match self.link.as_mut() {
            Some(link) => Ok(link),
            None => Err(SessionError::NotConnected {
                port: self.config.port.clone(),
            }),
        }
    }
}

impl<C: Connector> Drop for Session<C> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io;

    // A link that replays canned lines and remembers what was written.
    #[derive(Default)]
    struct ScriptedLink {
        written: Vec<u8>,
        lines: VecDeque<Vec<u8>>,
        endless: bool,
    }

    impl Transport for ScriptedLink {
        fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
            self.written.extend_from_slice(bytes);
            Ok(())
        }

        fn read_line(&mut self) -> io::Result<Vec<u8>> {
            if self.endless {
                return Ok(b"chatter\n".to_vec());
            }
            Ok(self.lines.pop_front().unwrap_or_default())
        }
    }

    struct ScriptedConnector {
        lines: Vec<&'static str>,
        endless: bool,
    }

    impl Connector for ScriptedConnector {
        type Link = ScriptedLink;

        fn open(&self, _config: &SessionConfig) -> Result<ScriptedLink> {
            Ok(ScriptedLink {
                written: Vec::new(),
                lines: self.lines.iter().map(|l| l.as_bytes().to_vec()).collect(),
                endless: self.endless,
            })
        }
    }

    fn session(lines: Vec<&'static str>) -> Session<ScriptedConnector> {
        Session::with_connector(
            SessionConfig::new("test0"),
            ScriptedConnector { lines, endless: false },
        )
    }

    // --- Lifecycle ---

    #[test]
    fn new_session_is_closed() {
        let s = session(vec![]);
        assert!(!s.is_open());
        assert!(s.link().is_none());
    }

    #[test]
    fn open_then_close() {
        let mut s = session(vec![]);
        s.open().unwrap();
        assert!(s.is_open());
        s.close();
        assert!(!s.is_open());
    }

    #[test]
    fn close_is_idempotent() {
        let mut s = session(vec![]);
        s.close();
        s.open().unwrap();
        s.close();
        s.close();
        assert!(!s.is_open());
    }

    #[test]
    fn failed_open_leaves_session_closed() {
        let mut s = Session::new(SessionConfig::new("/dev/this-port-does-not-exist"));
        let err = s.open().unwrap_err();
        assert!(matches!(err, SessionError::Transport { .. }));
        assert!(!s.is_open());
        // Closing after a failed open is harmless.
        s.close();
    }

    #[test]
    fn scoped_closes_on_error() {
        let mut s = session(vec![]);
        let result: Result<()> = s.scoped(|s| {
            assert!(s.is_open());
            Err(SessionError::InvalidSweep(String::from("boom")))
        });
        assert!(result.is_err());
        assert!(!s.is_open());
    }

    // --- Command/response ---

    #[test]
    fn send_appends_terminator() {
        let mut s = session(vec![]);
        s.open().unwrap();
        s.send(":OUTP ON").unwrap();
        assert_eq!(s.link().unwrap().written, b":OUTP ON\r\n");
    }

    #[test]
    fn send_keeps_existing_terminator() {
        let mut s = session(vec![]);
        s.open().unwrap();
        s.send(":OUTP OFF\r\n").unwrap();
        assert_eq!(s.link().unwrap().written, b":OUTP OFF\r\n");
    }

    #[test]
    fn read_response_accumulates_lines_until_quiet() {
        let mut s = session(vec!["1.0,", "2.0\r\n"]);
        s.open().unwrap();
        assert_eq!(s.read_response().unwrap(), b"1.0,2.0\r\n");
        // Nothing left: the next read is empty, not an error.
        assert!(s.read_response().unwrap().is_empty());
    }

    #[test]
    fn closed_session_rejects_io() {
        let mut s = session(vec!["never read\n"]);
        assert!(matches!(s.send("*IDN?"), Err(SessionError::NotConnected { .. })));
        assert!(matches!(s.read_response(), Err(SessionError::NotConnected { .. })));
    }

    #[test]
    fn query_sends_then_reads() {
        let mut s = session(vec!["KEITHLEY,2400\n"]);
        s.open().unwrap();
        assert_eq!(s.query("*IDN?").unwrap(), b"KEITHLEY,2400\n");
        assert_eq!(s.link().unwrap().written, b"*IDN?\r\n");
    }

    // Without a cap an endless stream never returns; the cap turns it into an error.
    #[test]
    fn response_line_cap_stops_chatty_instrument() {
        let mut config = SessionConfig::new("test0");
        config.max_response_lines = Some(16);
        let mut s = Session::with_connector(
            config,
            ScriptedConnector { lines: vec![], endless: true },
        );
        s.open().unwrap();
        let err = s.read_response().unwrap_err();
        assert!(matches!(err, SessionError::ResponseTooLong { limit: 16 }));
    }

    fn capped_session(lines: Vec<&'static str>, limit: usize) -> Session<ScriptedConnector> {
        let mut config = SessionConfig::new("test0");
        config.max_response_lines = Some(limit);
        Session::with_connector(config, ScriptedConnector { lines, endless: false })
    }

    #[test]
    fn response_line_cap_admits_exactly_that_many_lines() {
        let mut s = capped_session(vec!["1.0,\n", "2.0\n"], 2);
        s.open().unwrap();
        assert_eq!(s.read_response().unwrap(), b"1.0,\n2.0\n");
    }

    #[test]
    fn response_line_cap_rejects_one_line_over() {
        let mut s = capped_session(vec!["a\n", "b\n", "c\n"], 2);
        s.open().unwrap();
        let err = s.read_response().unwrap_err();
        assert!(matches!(err, SessionError::ResponseTooLong { limit: 2 }));
    }

    #[test]
    fn cap_of_one_allows_single_line_query() {
        let mut s = capped_session(vec!["KEITHLEY,2400\n"], 1);
        s.open().unwrap();
        assert_eq!(s.query("*IDN?").unwrap(), b"KEITHLEY,2400\n");
    }
}
