// src/io/serial/mock.rs
//
// Scripted in-memory transport for engine and session tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use super::transport::SerialTransport;
use crate::io::error::IoError;

/// Maps a command (without `\r`) to the bytes the adapter sends back.
pub(crate) type Responder = Box<dyn FnMut(&str) -> Option<Vec<u8>> + Send>;

#[derive(Default)]
pub(crate) struct MockState {
    /// Every byte written, in order
    pub(crate) written: Vec<u8>,
    /// Bytes waiting to be read by the engine
    pub(crate) rx: VecDeque<u8>,
    pub(crate) open: bool,
    pub(crate) clears: usize,
}

impl MockState {
    /// Written bytes split into `\r`-terminated commands.
    pub(crate) fn commands(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.written)
            .split_terminator('\r')
            .map(str::to_string)
            .collect()
    }
}

pub(crate) struct MockTransport {
    name: String,
    state: Arc<Mutex<MockState>>,
    pending: Vec<u8>,
    responder: Responder,
}

impl MockTransport {
    pub(crate) fn new(responder: Responder) -> Self {
        let state = MockState {
            open: true,
            ..MockState::default()
        };
        Self {
            name: "mock".to_string(),
            state: Arc::new(Mutex::new(state)),
            pending: Vec::new(),
            responder,
        }
    }

    /// A DT2518 adapter reporting `firmware`, acknowledging setup commands.
    pub(crate) fn adapter(model: &str, firmware: u32) -> Self {
        let model = model.to_string();
        Self::new(Box::new(move |cmd: &str| match cmd.chars().next() {
            Some('C') | Some('O') | Some('S') => Some(b"\r".to_vec()),
            Some('V') => Some(format!("{}\r", model).into_bytes()),
            Some('v') => Some(format!("{}\r", firmware).into_bytes()),
            _ => None,
        }))
    }

    pub(crate) fn handle(&self) -> Arc<Mutex<MockState>> {
        Arc::clone(&self.state)
    }

    /// Queue bytes as if the adapter had sent them unprompted.
    pub(crate) fn inject(&self, bytes: &[u8]) {
        self.state.lock().unwrap().rx.extend(bytes.iter().copied());
    }

    fn ensure_open(&self) -> Result<(), IoError> {
        if self.state.lock().unwrap().open {
            Ok(())
        } else {
            Err(IoError::not_open(&self.name))
        }
    }
}

impl SerialTransport for MockTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_open(&self) -> bool {
        self.state.lock().unwrap().open
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), IoError> {
        self.ensure_open()?;
        self.state.lock().unwrap().written.extend_from_slice(bytes);
        for &b in bytes {
            if b == b'\r' {
                let cmd = String::from_utf8_lossy(&self.pending).to_string();
                self.pending.clear();
                if let Some(reply) = (self.responder)(&cmd) {
                    self.state.lock().unwrap().rx.extend(reply);
                }
            } else {
                self.pending.push(b);
            }
        }
        Ok(())
    }

    fn bytes_available(&mut self) -> Result<usize, IoError> {
        self.ensure_open()?;
        Ok(self.state.lock().unwrap().rx.len())
    }

    fn read_byte(&mut self) -> Result<Option<u8>, IoError> {
        self.ensure_open()?;
        Ok(self.state.lock().unwrap().rx.pop_front())
    }

    fn clear_input(&mut self) -> Result<(), IoError> {
        self.ensure_open()?;
        let mut state = self.state.lock().unwrap();
        state.rx.clear();
        state.clears += 1;
        Ok(())
    }

    fn close(&mut self) {
        self.state.lock().unwrap().open = false;
    }
}
