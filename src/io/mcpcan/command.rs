// src/io/mcpcan/command.rs
//
// Blocking request/response exchange over a serial transport.
//
// Commands are written with a `\r` terminator. Replies are read one byte at
// a time up to `\r`; the adapter's BELL (0x07) NACK arrives without a
// terminator and also ends a reply.

use std::time::{Duration, Instant};

use crate::io::error::IoError;
use crate::io::serial::SerialTransport;

pub const TERMINATOR: u8 = b'\r';
pub const BELL: u8 = 0x07;

/// Default wait for a reply.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);

const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// One reply line, terminator included.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResponseLine(Vec<u8>);

impl ResponseLine {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Reply text without terminator and surrounding whitespace.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.0)
            .trim_matches(|c: char| c.is_whitespace() || c == BELL as char)
            .to_string()
    }

    /// The adapter refused the command.
    pub fn is_nack(&self) -> bool {
        self.0.first() == Some(&BELL)
    }
}

/// Owns the transport and performs command exchanges on it.
pub struct CommandChannel<T: SerialTransport> {
    transport: T,
    timeout: Duration,
}

impl<T: SerialTransport> CommandChannel<T> {
    pub fn new(transport: T, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Send `command` and wait for the reply line.
    pub fn request(&mut self, command: &str) -> Result<ResponseLine, IoError> {
        self.write_command(command)?;

        let deadline = Instant::now() + self.timeout;
        while self.transport.bytes_available()? == 0 {
            if Instant::now() >= deadline {
                return Err(self.timeout_error());
            }
            std::thread::sleep(POLL_INTERVAL);
        }
        self.read_line(deadline)
    }

    /// Send `command` without waiting for a reply.
    pub fn write_command(&mut self, command: &str) -> Result<(), IoError> {
        self.ensure_open()?;
        let mut bytes = Vec::with_capacity(command.len() + 1);
        bytes.extend_from_slice(command.as_bytes());
        bytes.push(TERMINATOR);
        self.transport.write_all(&bytes)
    }

    /// Next received line if any bytes are waiting; never waits for the first byte.
    pub fn poll_line(&mut self) -> Result<Option<ResponseLine>, IoError> {
        let deadline = Instant::now() + self.timeout;
        self.poll_line_until(deadline)
    }

    /// Like `poll_line`, but gives up on an incomplete line at `deadline`.
    pub fn poll_line_until(&mut self, deadline: Instant) -> Result<Option<ResponseLine>, IoError> {
        self.ensure_open()?;
        if self.transport.bytes_available()? == 0 {
            return Ok(None);
        }
        self.read_line(deadline).map(Some)
    }

    pub fn clear_input(&mut self) -> Result<(), IoError> {
        self.transport.clear_input()
    }

    pub fn close(&mut self) {
        self.transport.close();
    }

    fn read_line(&mut self, deadline: Instant) -> Result<ResponseLine, IoError> {
        let mut line = Vec::with_capacity(32);
        loop {
            match self.transport.read_byte()? {
                Some(byte) => {
                    line.push(byte);
                    if byte == TERMINATOR || (byte == BELL && line.len() == 1) {
                        return Ok(ResponseLine(line));
                    }
                }
                None => {
                    if Instant::now() >= deadline {
                        return Err(self.timeout_error());
                    }
                    std::thread::sleep(POLL_INTERVAL);
                }
            }
        }
    }

    fn ensure_open(&self) -> Result<(), IoError> {
        if self.transport.is_open() {
            Ok(())
        } else {
            Err(IoError::not_open(self.transport.name()))
        }
    }

    fn timeout_error(&self) -> IoError {
        IoError::Timeout {
            device: self.transport.name().to_string(),
            timeout_ms: self.timeout.as_millis() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::serial::mock::MockTransport;

    fn channel(transport: MockTransport) -> CommandChannel<MockTransport> {
        CommandChannel::new(transport, Duration::from_millis(20))
    }

    #[test]
    fn test_request_returns_line_with_terminator() {
        let mock = MockTransport::adapter("DT2518", 2);
        let state = mock.handle();
        let mut ch = channel(mock);

        let reply = ch.request("V").unwrap();
        assert_eq!(reply.as_bytes(), b"DT2518\r");
        assert_eq!(reply.text(), "DT2518");
        assert!(!reply.is_nack());
        assert_eq!(state.lock().unwrap().written, b"V\r");
    }

    #[test]
    fn test_request_times_out_without_reply() {
        let mut ch = channel(MockTransport::new(Box::new(|_: &str| None)));
        let err = ch.request("V").unwrap_err();
        assert!(err.is_timeout(), "{}", err);
    }

    #[test]
    fn test_partial_reply_times_out() {
        let mut ch = channel(MockTransport::new(Box::new(|_: &str| Some(b"DT25".to_vec()))));
        assert!(ch.request("V").unwrap_err().is_timeout());
    }

    #[test]
    fn test_bell_ends_reply() {
        let mut ch = channel(MockTransport::new(Box::new(|_: &str| Some(vec![BELL]))));
        let reply = ch.request("S7F").unwrap();
        assert!(reply.is_nack());
        assert_eq!(reply.text(), "");
    }

    #[test]
    fn test_closed_transport_is_operation_error() {
        let mut ch = channel(MockTransport::adapter("DT2518", 2));
        ch.close();
        assert!(matches!(ch.request("V"), Err(IoError::NotOpen { .. })));
        assert!(matches!(ch.write_command("H"), Err(IoError::NotOpen { .. })));
        assert!(matches!(ch.poll_line(), Err(IoError::NotOpen { .. })));
    }

    #[test]
    fn test_poll_line() {
        let mock = MockTransport::new(Box::new(|_: &str| None));
        mock.inject(b"t12300\rz\r");
        let mut ch = channel(mock);
        assert_eq!(ch.poll_line().unwrap().unwrap().as_bytes(), b"t12300\r");
        assert_eq!(ch.poll_line().unwrap().unwrap().text(), "z");
        assert!(ch.poll_line().unwrap().is_none());
    }

    #[test]
    fn test_poll_line_until_bounds_partial_line() {
        let mock = MockTransport::new(Box::new(|_: &str| None));
        mock.inject(b"t123");
        let mut ch = CommandChannel::new(mock, Duration::from_secs(10));
        let start = Instant::now();
        let err = ch
            .poll_line_until(start + Duration::from_millis(20))
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(start.elapsed() < Duration::from_secs(2));
    }
}
