// src/io/mcpcan/codec.rs
//
// MCP-CAN ASCII frame codec.
//
// Frame formats (DLC is a full byte, bit 7 flags an FD frame):
//   Standard: t<ID:3hex><DLC:2hex><DATA:2hex*len>\r
//   Extended: T<ID:8hex><DLC:2hex><DATA:2hex*len>\r
//   RTR:      r<ID:3hex><DLC:2hex>\r / R<ID:8hex><DLC:2hex>\r
//
// The standard id's top three bits go out as a single hex character.

use super::ascii;
use crate::io::error::IoError;
use crate::io::{now_us, CanFrame, EXTENDED_ID_MAX, FD_LENGTHS, STANDARD_ID_MAX};

/// Firmware from this version on understands the FD flag in the DLC byte.
pub const FD_DLC_MIN_FIRMWARE: u32 = 2;

const FD_DLC_FLAG: u8 = 0x80;

const OFFSET_STD_LEN: usize = 4;
const OFFSET_STD_DATA: usize = 6;
const OFFSET_EXT_LEN: usize = 9;
const OFFSET_EXT_DATA: usize = 11;

/// Frame kind selected by the first character of a line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameKind {
    StandardData,
    ExtendedData,
    StandardRemote,
    ExtendedRemote,
}

impl FrameKind {
    pub fn from_opcode(c: u8) -> Option<Self> {
        match c {
            b't' => Some(FrameKind::StandardData),
            b'T' => Some(FrameKind::ExtendedData),
            b'r' => Some(FrameKind::StandardRemote),
            b'R' => Some(FrameKind::ExtendedRemote),
            _ => None,
        }
    }

    pub fn of(frame: &CanFrame) -> Self {
        match (frame.is_remote, frame.is_extended) {
            (false, false) => FrameKind::StandardData,
            (false, true) => FrameKind::ExtendedData,
            (true, false) => FrameKind::StandardRemote,
            (true, true) => FrameKind::ExtendedRemote,
        }
    }

    pub fn opcode(self) -> char {
        match self {
            FrameKind::StandardData => 't',
            FrameKind::ExtendedData => 'T',
            FrameKind::StandardRemote => 'r',
            FrameKind::ExtendedRemote => 'R',
        }
    }

    pub fn is_extended(self) -> bool {
        matches!(self, FrameKind::ExtendedData | FrameKind::ExtendedRemote)
    }

    pub fn is_remote(self) -> bool {
        matches!(self, FrameKind::StandardRemote | FrameKind::ExtendedRemote)
    }
}

/// Why a received line did not produce a frame.
///
/// Neither case is fatal: the receive loop drops the line and moves on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DecodeError {
    /// Not a frame line (acks, version replies, noise)
    Ignorable,
    /// Looked like a frame but could not be parsed
    Malformed(String),
}

/// Codec bound to the firmware version reported by the adapter.
#[derive(Clone, Copy, Debug, Default)]
pub struct McpCanCodec {
    firmware_version: u32,
}

impl McpCanCodec {
    pub fn new(firmware_version: u32) -> Self {
        Self { firmware_version }
    }

    pub fn supports_fd_dlc(&self) -> bool {
        self.firmware_version >= FD_DLC_MIN_FIRMWARE
    }

    /// Encode a frame as a command string (without the `\r` terminator).
    ///
    /// Examples:
    ///   id 0x123, data DE AD       -> `t12302DEAD`
    ///   id 0x12345678 remote dlc 4 -> `R1234567804`
    pub fn encode(&self, frame: &CanFrame) -> Result<String, IoError> {
        validate_outbound(frame)?;
        if frame.is_fd && frame.dlc > 8 && !self.supports_fd_dlc() {
            return Err(IoError::encode(format!(
                "firmware {} cannot send CAN FD frames longer than 8 bytes",
                self.firmware_version
            )));
        }

        let kind = FrameKind::of(frame);
        let mut cmd = String::with_capacity(12 + frame.data.len() * 2);
        cmd.push(kind.opcode());

        if kind.is_extended() {
            ascii::push_u32(&mut cmd, frame.arbitration_id);
        } else {
            ascii::push_half_byte(&mut cmd, (frame.arbitration_id >> 8) as u8);
            ascii::push_full_byte(&mut cmd, frame.arbitration_id as u8);
        }

        let dlc = if frame.is_fd && self.supports_fd_dlc() {
            frame.dlc | FD_DLC_FLAG
        } else {
            frame.dlc
        };
        ascii::push_full_byte(&mut cmd, dlc);

        if !kind.is_remote() {
            for &byte in &frame.data {
                ascii::push_full_byte(&mut cmd, byte);
            }
        }
        Ok(cmd)
    }

    /// Decode one received line (terminator optional).
    ///
    /// Examples:
    ///   `t12302DEAD\r`         -> standard frame, ID=0x123, data=DE AD
    ///   `T1234567801AA\r`      -> extended frame, ID=0x12345678, data=AA
    ///   `r12308\r`             -> standard RTR, ID=0x123, DLC=8
    ///   `t010C0<128 hex chars>` -> FD frame, ID=0x010, 64 bytes
    pub fn decode(line: &[u8]) -> Result<CanFrame, DecodeError> {
        let line = trim_terminator(line);
        let kind = line
            .first()
            .and_then(|&c| FrameKind::from_opcode(c))
            .ok_or(DecodeError::Ignorable)?;

        let (len_offset, data_offset) = if kind.is_extended() {
            (OFFSET_EXT_LEN, OFFSET_EXT_DATA)
        } else {
            (OFFSET_STD_LEN, OFFSET_STD_DATA)
        };
        if line.len() < data_offset {
            return Err(malformed(format!(
                "frame too short: {} bytes, need at least {}",
                line.len(),
                data_offset
            )));
        }

        let id_field = &line[1..len_offset];
        let parsed_id = if kind.is_extended() {
            ascii::parse_be(id_field)
        } else {
            ascii::parse_half_byte(id_field[0]).and_then(|high| {
                ascii::parse_full_byte(&id_field[1..]).map(|low| ((high as u32) << 8) | low as u32)
            })
        };
        let arbitration_id = parsed_id
            .ok_or_else(|| malformed(format!("invalid hex ID: {}", String::from_utf8_lossy(id_field))))?;

        let max_id = if kind.is_extended() { EXTENDED_ID_MAX } else { STANDARD_ID_MAX };
        if arbitration_id > max_id {
            return Err(malformed(format!("ID {:X} out of range", arbitration_id)));
        }

        let raw_dlc = ascii::parse_full_byte(&line[len_offset..data_offset]).ok_or_else(|| {
            malformed(format!(
                "invalid DLC: {}",
                String::from_utf8_lossy(&line[len_offset..data_offset])
            ))
        })?;
        let is_fd = raw_dlc & FD_DLC_FLAG != 0;
        let dlc = raw_dlc & !FD_DLC_FLAG;

        let length_ok = if is_fd {
            FD_LENGTHS.contains(&dlc) && !kind.is_remote()
        } else {
            dlc <= 8
        };
        if !length_ok {
            return Err(malformed(format!("invalid DLC: {:02X}", raw_dlc)));
        }

        let mut data = Vec::new();
        if !kind.is_remote() {
            let expected_len = data_offset + dlc as usize * 2;
            if line.len() < expected_len {
                return Err(malformed(format!(
                    "incomplete data: {} bytes, need {}",
                    line.len(),
                    expected_len
                )));
            }
            data = hex::decode(&line[data_offset..expected_len])
                .map_err(|e| malformed(format!("invalid data bytes: {}", e)))?;
        }

        Ok(CanFrame {
            arbitration_id,
            is_extended: kind.is_extended(),
            is_remote: kind.is_remote(),
            is_fd,
            dlc,
            data,
            timestamp_us: Some(now_us()),
        })
    }
}

fn malformed(reason: String) -> DecodeError {
    DecodeError::Malformed(reason)
}

fn trim_terminator(line: &[u8]) -> &[u8] {
    let mut end = line.len();
    while end > 0 && matches!(line[end - 1], b'\r' | b'\n') {
        end -= 1;
    }
    &line[..end]
}

fn validate_outbound(frame: &CanFrame) -> Result<(), IoError> {
    let max_id = if frame.is_extended { EXTENDED_ID_MAX } else { STANDARD_ID_MAX };
    if frame.arbitration_id > max_id {
        return Err(IoError::encode(format!(
            "ID {:X} does not fit a {} frame",
            frame.arbitration_id,
            if frame.is_extended { "29-bit extended" } else { "11-bit standard" }
        )));
    }

    if !frame.is_fd && frame.dlc > 8 {
        return Err(IoError::encode(
            "CAN2.0 does not support message dlc is greater than 8 bytes",
        ));
    }

    if frame.is_fd {
        if frame.is_remote {
            return Err(IoError::encode("CAN FD has no remote frames"));
        }
        if !FD_LENGTHS.contains(&frame.dlc) {
            return Err(IoError::encode(format!("invalid CAN FD length {}", frame.dlc)));
        }
    }

    if !frame.is_remote && frame.data.len() != frame.dlc as usize {
        return Err(IoError::encode(format!(
            "dlc {} does not match {} data bytes",
            frame.dlc,
            frame.data.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> McpCanCodec {
        McpCanCodec::new(2)
    }

    fn roundtrip(frame: CanFrame) {
        let encoded = codec().encode(&frame).unwrap();
        let decoded = McpCanCodec::decode(format!("{}\r", encoded).as_bytes()).unwrap();
        assert!(decoded.timestamp_us.is_some());
        assert_eq!(decoded.without_timestamp(), frame, "via {}", encoded);
    }

    #[test]
    fn test_encode_standard_frame() {
        let frame = CanFrame::data(0x123, false, &[0xDE, 0xAD]);
        assert_eq!(codec().encode(&frame).unwrap(), "t12302DEAD");
    }

    #[test]
    fn test_encode_extended_frame() {
        let frame = CanFrame::data(0x1234_5678, true, &[0xAA, 0xBB]);
        assert_eq!(codec().encode(&frame).unwrap(), "T1234567802AABB");
    }

    #[test]
    fn test_encode_remote_frames_carry_no_data() {
        let frame = CanFrame::remote(0x7FF, false, 8);
        assert_eq!(codec().encode(&frame).unwrap(), "r7FF08");
        let frame = CanFrame::remote(0x1F, true, 0);
        assert_eq!(codec().encode(&frame).unwrap(), "R0000001F00");
    }

    #[test]
    fn test_encode_fd_flag_depends_on_firmware() {
        let frame = CanFrame::data(0x10, false, &[0u8; 12]).with_fd();
        let new_fw = codec().encode(&frame).unwrap();
        assert!(new_fw.starts_with("t0108C"), "{}", new_fw);
        assert!(matches!(
            McpCanCodec::new(1).encode(&frame),
            Err(IoError::Encode(_))
        ));

        // Short FD frames still go out on old firmware, unflagged
        let short = CanFrame::data(0x10, false, &[0xAA; 8]).with_fd();
        let old_fw = McpCanCodec::new(1).encode(&short).unwrap();
        assert!(old_fw.starts_with("t01008AA"), "{}", old_fw);
    }

    #[test]
    fn test_encode_rejects_invalid_frames() {
        let mut long = CanFrame::data(0x10, false, &[0u8; 12]);
        assert!(codec().encode(&long).is_err());
        long.is_fd = true;
        assert!(codec().encode(&long).is_ok());

        assert!(codec().encode(&CanFrame::data(0x800, false, &[])).is_err());
        assert!(codec().encode(&CanFrame::data(0x2000_0000, true, &[])).is_err());
        assert!(codec().encode(&CanFrame::data(0x1, false, &[0u8; 10]).with_fd()).is_err());
        assert!(codec().encode(&CanFrame::remote(0x1, false, 9)).is_err());
        assert!(codec().encode(&CanFrame::remote(0x1, false, 2).with_fd()).is_err());

        let mut mismatch = CanFrame::data(0x1, false, &[1, 2, 3]);
        mismatch.dlc = 2;
        assert!(codec().encode(&mismatch).is_err());
    }

    #[test]
    fn test_decode_standard_frame() {
        let frame = McpCanCodec::decode(b"t12304AABBCCDD\r").unwrap();
        assert_eq!(frame.arbitration_id, 0x123);
        assert_eq!(frame.dlc, 4);
        assert_eq!(frame.data, vec![0xAA, 0xBB, 0xCC, 0xDD]);
        assert!(!frame.is_extended);
        assert!(!frame.is_remote);
        assert!(!frame.is_fd);
    }

    #[test]
    fn test_decode_extended_rtr() {
        let frame = McpCanCodec::decode(b"R1234567803\r").unwrap();
        assert_eq!(frame.arbitration_id, 0x1234_5678);
        assert_eq!(frame.dlc, 3);
        assert!(frame.is_extended);
        assert!(frame.is_remote);
        assert!(frame.data.is_empty());
    }

    #[test]
    fn test_decode_fd_frame() {
        let mut line = String::from("t1FF90");
        for i in 0..16u8 {
            line.push_str(&format!("{:02X}", i));
        }
        let frame = McpCanCodec::decode(line.as_bytes()).unwrap();
        assert!(frame.is_fd);
        assert_eq!(frame.dlc, 16);
        assert_eq!(frame.data.len(), 16);
        assert_eq!(frame.data[15], 15);
    }

    #[test]
    fn test_decode_ignorable_lines() {
        for line in [&b"\r"[..], b"", b"z\r", b"\x07", b"DT2518\r", b"x12302AABB"] {
            assert_eq!(McpCanCodec::decode(line), Err(DecodeError::Ignorable));
        }
    }

    #[test]
    fn test_decode_malformed_lines() {
        let cases: [&[u8]; 8] = [
            b"t12",            // truncated id
            b"t123",           // missing DLC
            b"t12304AABB",     // missing data bytes
            b"t1G302AABB",     // non-hex id
            b"t1230ZAABB",     // non-hex DLC
            b"t12302AAXY",     // non-hex data
            b"t12309",         // classic DLC above 8
            b"t9FF00",         // standard id above 11 bits
        ];
        for line in cases {
            assert!(
                matches!(McpCanCodec::decode(line), Err(DecodeError::Malformed(_))),
                "{}",
                String::from_utf8_lossy(line)
            );
        }
        assert!(matches!(
            McpCanCodec::decode(b"T20000000\r00"),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn test_decode_ignores_trailing_characters() {
        let frame = McpCanCodec::decode(b"t12301AA1234\r\n").unwrap();
        assert_eq!(frame.data, vec![0xAA]);
    }

    #[test]
    fn test_roundtrips() {
        roundtrip(CanFrame::data(0x123, false, &[0xDE, 0xAD]));
        roundtrip(CanFrame::data(0x000, false, &[]));
        roundtrip(CanFrame::data(0x7FF, false, &[1, 2, 3, 4, 5, 6, 7, 8]));
        roundtrip(CanFrame::data(0x1FFF_FFFF, true, &[0x55; 8]));
        roundtrip(CanFrame::remote(0x42, false, 5));
        roundtrip(CanFrame::remote(0x0ABC_DEF0, true, 8));
        roundtrip(CanFrame::data(0x18DA_F110, true, &[0xA5; 64]).with_fd());
    }
}
