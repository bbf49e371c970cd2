// src/io/mcpcan/bitrate.rs
//
// Bitrate -> device code table for the `S<code>` command.
//
// Classic (CAN 2.0) bitrates map to codes 18-36. FD settings are keyed by
// `(data_bitrate / bitrate) << 24 | bitrate` and map to codes 0-17.

use super::ascii;

/// Device code sent with the `S` command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceCode(pub u8);

impl DeviceCode {
    /// `S<code>` command text.
    pub fn command(self) -> String {
        format!("S{}", ascii::full_byte(self.0))
    }
}

/// No table entry for the requested bitrate(s).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NotFound;

/// CAN 2.0 bitrates (bit/s, code)
const CLASSIC_BITRATES: [(u32, u8); 19] = [
    (5_000, 18),
    (10_000, 19),
    (20_000, 20),
    (25_000, 21),
    (31_250, 22),
    (33_000, 23),
    (40_000, 24),
    (50_000, 25),
    (80_000, 26),
    (83_300, 27),
    (95_000, 28),
    (100_000, 29),
    (125_000, 30),
    (200_000, 31),
    (250_000, 32),
    (500_000, 33),
    (666_000, 34),
    (800_000, 35),
    (1_000_000, 36),
];

/// CAN FD settings (arbitration bit/s, data/arbitration ratio, code)
const FD_BITRATES: [(u32, u32, u8); 18] = [
    (125_000, 4, 0),
    (250_000, 2, 1),
    (250_000, 3, 2),
    (250_000, 4, 3),
    (250_000, 6, 4),
    (250_000, 8, 5),
    (250_000, 12, 6),
    (250_000, 16, 7),
    (500_000, 2, 8),
    (500_000, 4, 9),
    (500_000, 6, 10),
    (500_000, 8, 11),
    (500_000, 10, 12),
    (500_000, 13, 13), // 6.5 Mbit/s data phase
    (500_000, 16, 14),
    (500_000, 20, 15),
    (1_000_000, 4, 16),
    (1_000_000, 8, 17),
];

const fn fd_key(bitrate: u32, ratio: u32) -> u64 {
    ((ratio as u64) << 24) | bitrate as u64
}

/// Combined FD lookup key for a bitrate pair.
///
/// The ratio is truncated, so a data bitrate that is not an integer multiple
/// of the arbitration bitrate lands on the next lower ratio's entry. Kept as
/// the adapter firmware expects it; confirm against hardware before changing.
pub fn fd_combined_key(bitrate: u32, data_bitrate: u32) -> Option<u64> {
    if bitrate == 0 {
        return None;
    }
    Some(fd_key(bitrate, data_bitrate / bitrate))
}

/// Resolve a bitrate (and optional FD data bitrate) to its device code.
pub fn resolve(bitrate: u32, data_bitrate: Option<u32>) -> Result<DeviceCode, NotFound> {
    match data_bitrate {
        None => CLASSIC_BITRATES
            .iter()
            .find(|(rate, _)| *rate == bitrate)
            .map(|(_, code)| DeviceCode(*code))
            .ok_or(NotFound),
        Some(data) => {
            let key = fd_combined_key(bitrate, data).ok_or(NotFound)?;
            FD_BITRATES
                .iter()
                .find(|(rate, ratio, _)| fd_key(*rate, *ratio) == key)
                .map(|(_, _, code)| DeviceCode(*code))
                .ok_or(NotFound)
        }
    }
}

/// Classic bitrates the adapter accepts.
pub fn supported_bitrates() -> impl Iterator<Item = u32> {
    CLASSIC_BITRATES.iter().map(|(rate, _)| *rate)
}

/// (arbitration, data) bitrate pairs the adapter accepts in FD mode.
pub fn supported_fd_pairs() -> impl Iterator<Item = (u32, u32)> {
    FD_BITRATES
        .iter()
        .map(|(rate, ratio, _)| (*rate, rate * ratio))
}
