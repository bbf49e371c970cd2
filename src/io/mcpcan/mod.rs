// src/io/mcpcan/mod.rs
//
// MCP-CAN serial bridge protocol: DT2518 adapters built on the MCP2515
// (CAN 2.0) and MCP2518FD (CAN FD) controllers.
//
// The adapter speaks an slcan-like ASCII protocol at 250000 baud. Unlike
// Lawicel slcan the DLC is always a full byte, and the FD variant takes
// per-slot acceptance filters (`W`).

pub(crate) mod ascii;
pub mod bitrate;
pub mod codec;
pub mod command;
pub mod filter;
pub mod session;

pub use bitrate::{supported_bitrates, supported_fd_pairs, DeviceCode};
pub use codec::{DecodeError, McpCanCodec};
pub use filter::{FilterOutcome, FilterRule, FilterTable};
pub use session::{McpCanBus, SessionState, SUPPORTED_MODEL};
