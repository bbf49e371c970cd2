// src/io/serial/mod.rs
//
// Serial transport for the bridge engine.
//
// The engine only ever talks to a `SerialTransport`; `SerialPortTransport`
// is the production implementation on top of the serialport crate.

pub mod transport;
pub(crate) mod utils;

#[cfg(test)]
pub(crate) mod mock;

pub use transport::{
    detect_fd_capable, list_serial_ports, SerialPortInfo, SerialPortTransport, SerialTransport,
};
pub use utils::Parity;
