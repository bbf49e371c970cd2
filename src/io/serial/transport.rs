// src/io/serial/transport.rs
//
// Byte-stream transport used by the command engine, plus port enumeration.

use serde::Serialize;
use std::io::{Read, Write};
use std::time::Duration;

use super::utils::{device_label, to_serialport_data_bits, to_serialport_stop_bits};
use crate::io::error::IoError;
use crate::settings::BusConfig;

/// USB serial numbers of MCP2518FD adapters carry this marker.
const FD_SERIAL_MARKER: &str = "MFD";

/// Minimal byte transport the engine needs from a serial port.
///
/// Every operation on a closed transport fails with `IoError::NotOpen`.
pub trait SerialTransport {
    /// Port name, used in diagnostics.
    fn name(&self) -> &str;

    fn is_open(&self) -> bool;

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), IoError>;

    /// Number of received bytes waiting to be read. Never blocks.
    fn bytes_available(&mut self) -> Result<usize, IoError>;

    /// Read one byte, `None` if nothing arrived within the port's read timeout.
    fn read_byte(&mut self) -> Result<Option<u8>, IoError>;

    /// Drop everything in the receive buffer.
    fn clear_input(&mut self) -> Result<(), IoError>;

    /// Release the port. Closing twice is harmless.
    fn close(&mut self);
}

/// `SerialTransport` backed by the serialport crate.
pub struct SerialPortTransport {
    port_name: String,
    device: String,
    port: Option<Box<dyn serialport::SerialPort>>,
}

impl SerialPortTransport {
    /// Open the port described by `config` (name, baud rate, 8N1 framing by default).
    pub fn open(config: &BusConfig) -> Result<Self, IoError> {
        let device = device_label(&config.port);
        if config.port.is_empty() {
            return Err(IoError::configuration("Must specify a serial port."));
        }

        let port = serialport::new(&config.port, config.baud_rate)
            .data_bits(to_serialport_data_bits(config.data_bits))
            .stop_bits(to_serialport_stop_bits(config.stop_bits))
            .parity(config.parity.into())
            .flow_control(serialport::FlowControl::None)
            .timeout(Duration::from_millis(config.read_timeout_ms))
            .open()
            .map_err(|e| IoError::connection(&device, e.to_string()))?;

        Ok(Self {
            port_name: config.port.clone(),
            device,
            port: Some(port),
        })
    }

    fn port(&mut self) -> Result<&mut Box<dyn serialport::SerialPort>, IoError> {
        let device = &self.device;
        self.port.as_mut().ok_or_else(|| IoError::not_open(device))
    }
}

impl SerialTransport for SerialPortTransport {
    fn name(&self) -> &str {
        &self.port_name
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), IoError> {
        let device = self.device.clone();
        let port = self.port()?;
        port.write_all(bytes)
            .and_then(|_| port.flush())
            .map_err(|e| IoError::io(&device, e))
    }

    fn bytes_available(&mut self) -> Result<usize, IoError> {
        let device = self.device.clone();
        self.port()?
            .bytes_to_read()
            .map(|n| n as usize)
            .map_err(|e| IoError::protocol(&device, format!("bytes_to_read: {}", e)))
    }

    fn read_byte(&mut self) -> Result<Option<u8>, IoError> {
        let device = self.device.clone();
        let mut buf = [0u8; 1];
        match self.port()?.read(&mut buf) {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(buf[0])),
            Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(None),
            Err(e) => Err(IoError::io(&device, e)),
        }
    }

    fn clear_input(&mut self) -> Result<(), IoError> {
        let device = self.device.clone();
        self.port()?
            .clear(serialport::ClearBuffer::Input)
            .map_err(|e| IoError::protocol(&device, format!("clear input: {}", e)))
    }

    fn close(&mut self) {
        self.port = None;
    }
}

// ============================================================================
// Port Enumeration
// ============================================================================

/// Serial port info for host tooling
#[derive(Clone, Debug, Serialize)]
pub struct SerialPortInfo {
    pub port_name: String,
    pub port_type: String,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial_number: Option<String>,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
    /// USB serial number marks an MCP2518FD adapter
    pub fd_capable: bool,
}

/// List available serial ports
///
/// On macOS only /dev/cu.* devices are listed; the tty variants block on
/// open waiting for carrier detect.
pub fn list_serial_ports() -> Result<Vec<SerialPortInfo>, IoError> {
    let ports = serialport::available_ports()
        .map_err(|e| IoError::configuration(format!("Failed to enumerate ports: {}", e)))?;

    Ok(ports
        .into_iter()
        .filter(|_p| {
            #[cfg(target_os = "macos")]
            {
                !_p.port_name.starts_with("/dev/tty.")
            }
            #[cfg(not(target_os = "macos"))]
            {
                true
            }
        })
        .map(|p| {
            let (port_type, manufacturer, product, serial_number, vid, pid) = match p.port_type {
                serialport::SerialPortType::UsbPort(info) => (
                    "USB",
                    info.manufacturer,
                    info.product,
                    info.serial_number,
                    Some(info.vid),
                    Some(info.pid),
                ),
                serialport::SerialPortType::BluetoothPort => {
                    ("Bluetooth", None, None, None, None, None)
                }
                serialport::SerialPortType::PciPort => ("PCI", None, None, None, None, None),
                serialport::SerialPortType::Unknown => ("Unknown", None, None, None, None, None),
            };
            let fd_capable = is_fd_serial_number(serial_number.as_deref());
            SerialPortInfo {
                port_name: p.port_name,
                port_type: port_type.to_string(),
                manufacturer,
                product,
                serial_number,
                vid,
                pid,
                fd_capable,
            }
        })
        .collect())
}

/// Whether the adapter on `port` is the MCP2518FD variant.
///
/// Enumeration failures and unknown ports count as not FD-capable.
pub fn detect_fd_capable(port: &str) -> bool {
    list_serial_ports()
        .map(|ports| {
            ports
                .iter()
                .any(|p| p.port_name.contains(port) && p.fd_capable)
        })
        .unwrap_or(false)
}

fn is_fd_serial_number(serial_number: Option<&str>) -> bool {
    serial_number.is_some_and(|s| s.contains(FD_SERIAL_MARKER))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fd_serial_marker() {
        assert!(is_fd_serial_number(Some("MFD0042")));
        assert!(!is_fd_serial_number(Some("M150017")));
        assert!(!is_fd_serial_number(None));
    }

    #[test]
    fn test_open_rejects_empty_port_name() {
        let config = BusConfig::default();
        match SerialPortTransport::open(&config) {
            Err(IoError::Configuration(msg)) => assert!(msg.contains("serial port")),
            other => panic!("expected configuration error, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_open_missing_port_is_connection_error() {
        let config = BusConfig {
            port: "/dev/mcpcan-does-not-exist".to_string(),
            ..BusConfig::default()
        };
        let err = SerialPortTransport::open(&config).err().unwrap();
        assert!(matches!(err, IoError::Connection { .. }));
    }
}
