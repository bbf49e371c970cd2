// src/io/mod.rs
//
// Serial transport and the MCP-CAN bridge protocol engine.

mod error;
pub mod mcpcan;
pub mod serial;

pub use error::{ErrorCategory, IoError};

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

// ============================================================================
// Shared Types
// ============================================================================

/// Payload lengths a CAN FD frame may carry.
pub const FD_LENGTHS: [u8; 16] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 12, 16, 20, 24, 32, 48, 64];

/// Largest standard (11-bit) arbitration id.
pub const STANDARD_ID_MAX: u32 = 0x7FF;
/// Largest extended (29-bit) arbitration id.
pub const EXTENDED_ID_MAX: u32 = 0x1FFF_FFFF;

/// A CAN frame as exchanged with the adapter.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanFrame {
    /// 11-bit standard or 29-bit extended id
    pub arbitration_id: u32,
    pub is_extended: bool,
    /// Remote Transmission Request
    pub is_remote: bool,
    pub is_fd: bool,
    /// Payload length in bytes (also the requested length for remote frames)
    pub dlc: u8,
    /// Payload; always empty for remote frames
    pub data: Vec<u8>,
    /// Host UNIX timestamp in microseconds, set when an inbound frame is decoded.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub timestamp_us: Option<u64>,
}

impl CanFrame {
    /// Data frame with `dlc` taken from the payload length.
    pub fn data(arbitration_id: u32, is_extended: bool, data: &[u8]) -> Self {
        Self {
            arbitration_id,
            is_extended,
            is_remote: false,
            is_fd: false,
            dlc: data.len().min(u8::MAX as usize) as u8,
            data: data.to_vec(),
            timestamp_us: None,
        }
    }

    /// Remote frame requesting `dlc` bytes.
    pub fn remote(arbitration_id: u32, is_extended: bool, dlc: u8) -> Self {
        Self {
            arbitration_id,
            is_extended,
            is_remote: true,
            is_fd: false,
            dlc,
            data: Vec::new(),
            timestamp_us: None,
        }
    }

    /// Mark the frame as CAN FD.
    pub fn with_fd(mut self) -> Self {
        self.is_fd = true;
        self
    }

    /// Same frame without its receive timestamp.
    pub fn without_timestamp(mut self) -> Self {
        self.timestamp_us = None;
        self
    }
}

impl std::fmt::Display for CanFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_extended {
            write!(f, "{:08X}", self.arbitration_id)?;
        } else {
            write!(f, "{:03X}", self.arbitration_id)?;
        }
        if self.is_remote {
            return write!(f, "#R{}", self.dlc);
        }
        write!(f, "{}", if self.is_fd { "##" } else { "#" })?;
        for byte in &self.data {
            write!(f, "{:02X}", byte)?;
        }
        Ok(())
    }
}

/// Parse the `Display` notation: `123#DEAD`, `12345678#R4`, `010##01`.
///
/// Ids longer than three characters are extended.
impl std::str::FromStr for CanFrame {
    type Err = IoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (id, rest) = s
            .split_once('#')
            .ok_or_else(|| IoError::encode(format!("'{}': expected <id>#<data>", s)))?;
        let arbitration_id = u32::from_str_radix(id, 16)
            .map_err(|_| IoError::encode(format!("'{}': invalid hex id", id)))?;
        let is_extended = id.len() > 3;

        if let Some(dlc) = rest.strip_prefix('R') {
            let dlc = if dlc.is_empty() {
                0
            } else {
                dlc.parse::<u8>()
                    .map_err(|_| IoError::encode(format!("'{}': invalid remote length", dlc)))?
            };
            return Ok(CanFrame::remote(arbitration_id, is_extended, dlc));
        }

        let (is_fd, payload) = match rest.strip_prefix('#') {
            Some(payload) => (true, payload),
            None => (false, rest),
        };
        let data = hex::decode(payload)
            .map_err(|e| IoError::encode(format!("'{}': invalid data: {}", payload, e)))?;
        let frame = CanFrame::data(arbitration_id, is_extended, &data);
        Ok(if is_fd { frame.with_fd() } else { frame })
    }
}

/// Get current time in microseconds since UNIX epoch
pub fn now_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_constructors() {
        let f = CanFrame::data(0x123, false, &[0xDE, 0xAD]);
        assert_eq!(f.dlc, 2);
        assert!(!f.is_remote);
        assert!(f.timestamp_us.is_none());

        let r = CanFrame::remote(0x1234_5678, true, 4);
        assert!(r.is_remote);
        assert!(r.data.is_empty());
        assert_eq!(r.dlc, 4);
    }

    #[test]
    fn test_frame_display() {
        assert_eq!(CanFrame::data(0x123, false, &[0xDE, 0xAD]).to_string(), "123#DEAD");
        assert_eq!(CanFrame::remote(0x1F, true, 3).to_string(), "0000001F#R3");
        assert_eq!(
            CanFrame::data(0x10, false, &[1]).with_fd().to_string(),
            "010##01"
        );
    }

    #[test]
    fn test_frame_parse() {
        let f: CanFrame = "123#DEAD".parse().unwrap();
        assert_eq!(f, CanFrame::data(0x123, false, &[0xDE, 0xAD]));

        let f: CanFrame = "0000001F#R3".parse().unwrap();
        assert_eq!(f, CanFrame::remote(0x1F, true, 3));

        let f: CanFrame = "010##01".parse().unwrap();
        assert!(f.is_fd);
        assert_eq!(f.data, vec![1]);

        let f: CanFrame = "7E0#".parse().unwrap();
        assert!(f.data.is_empty());

        for bad in ["123", "XYZ#00", "123#ABC", "123#RX"] {
            assert!(bad.parse::<CanFrame>().is_err(), "{}", bad);
        }
    }

    #[test]
    fn test_frame_serializes_without_empty_timestamp() {
        let json = serde_json::to_string(&CanFrame::data(0x7FF, false, &[1, 2])).unwrap();
        assert!(!json.contains("timestamp_us"));
        let back: CanFrame = serde_json::from_str(&json).unwrap();
        assert_eq!(back.arbitration_id, 0x7FF);
    }
}
