// src/io/error.rs
//
// Error type shared by the serial transport, the command engine and the
// session controller.

use thiserror::Error;

/// Coarse classification used by callers deciding whether to retry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Setup failed; the session never became usable.
    Initialization,
    /// No response within the engine's wait bound.
    Timeout,
    /// A steady-state operation failed (closed port, write error, bad frame).
    Operation,
}

#[derive(Debug, Error)]
pub enum IoError {
    #[error("{device}: connection failed: {message}")]
    Connection { device: String, message: String },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("{device}: unsupported device '{model}'")]
    UnsupportedDevice { device: String, model: String },

    #[error("{device}: firmware query failed: {message}")]
    FirmwareQuery { device: String, message: String },

    #[error("{}", invalid_bitrate_message(*bitrate, *data_bitrate))]
    InvalidBitrate {
        bitrate: u32,
        data_bitrate: Option<u32>,
    },

    #[error("{device}: command '{command}' rejected by adapter")]
    Rejected { device: String, command: String },

    #[error("{device}: no response within {timeout_ms} ms")]
    Timeout { device: String, timeout_ms: u64 },

    #[error("{device}: writing to or reading from a closed port")]
    NotOpen { device: String },

    #[error("{device}: {source}")]
    Io {
        device: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot encode frame: {0}")]
    Encode(String),

    #[error("{device}: protocol error: {message}")]
    Protocol { device: String, message: String },
}

fn invalid_bitrate_message(bitrate: u32, data_bitrate: Option<u32>) -> String {
    match data_bitrate {
        Some(data) => format!(
            "bitrate {} and data bitrate {} combination not allowed",
            bitrate, data
        ),
        None => format!("invalid CAN bitrate {}", bitrate),
    }
}

impl IoError {
    pub fn connection(device: &str, message: impl Into<String>) -> Self {
        IoError::Connection {
            device: device.to_string(),
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        IoError::Configuration(message.into())
    }

    pub fn protocol(device: &str, message: impl Into<String>) -> Self {
        IoError::Protocol {
            device: device.to_string(),
            message: message.into(),
        }
    }

    pub fn io(device: &str, source: std::io::Error) -> Self {
        IoError::Io {
            device: device.to_string(),
            source,
        }
    }

    pub fn not_open(device: &str) -> Self {
        IoError::NotOpen {
            device: device.to_string(),
        }
    }

    pub fn encode(message: impl Into<String>) -> Self {
        IoError::Encode(message.into())
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            IoError::Connection { .. }
            | IoError::Configuration(_)
            | IoError::UnsupportedDevice { .. }
            | IoError::FirmwareQuery { .. }
            | IoError::InvalidBitrate { .. }
            | IoError::Rejected { .. } => ErrorCategory::Initialization,
            IoError::Timeout { .. } => ErrorCategory::Timeout,
            IoError::NotOpen { .. }
            | IoError::Io { .. }
            | IoError::Encode(_)
            | IoError::Protocol { .. } => ErrorCategory::Operation,
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.category() == ErrorCategory::Timeout
    }
}

impl From<IoError> for String {
    fn from(e: IoError) -> Self {
        e.to_string()
    }
}
