// src/io/mcpcan/ascii.rs
//
// ASCII field encodings used on the wire.
//
//   full byte: two upper-case hex characters ("%02X")
//   half byte: one hex character, for values below 0x10
//
// Multi-byte fields are written most-significant byte first.

/// Append `value` as a full byte.
pub fn push_full_byte(out: &mut String, value: u8) {
    out.push_str(&hex::encode_upper([value]));
}

/// Append the low nibble of `value` as a half byte.
pub fn push_half_byte(out: &mut String, value: u8) {
    out.push(HEX_DIGITS[(value & 0x0F) as usize] as char);
}

/// Append a 32-bit value as four full bytes, big-endian.
pub fn push_u32(out: &mut String, value: u32) {
    out.push_str(&hex::encode_upper(value.to_be_bytes()));
}

/// Render `value` as a full byte.
pub fn full_byte(value: u8) -> String {
    hex::encode_upper([value])
}

/// Parse a two-character full-byte field.
pub fn parse_full_byte(field: &[u8]) -> Option<u8> {
    let mut out = [0u8; 1];
    hex::decode_to_slice(field, &mut out).ok()?;
    Some(out[0])
}

/// Parse a single hex character.
pub fn parse_half_byte(c: u8) -> Option<u8> {
    (c as char).to_digit(16).map(|d| d as u8)
}

/// Parse an even-length run of full bytes into a big-endian integer.
pub fn parse_be(field: &[u8]) -> Option<u32> {
    if field.is_empty() || field.len() > 8 {
        return None;
    }
    let bytes = hex::decode(field).ok()?;
    Some(bytes.iter().fold(0u32, |acc, &b| (acc << 8) | b as u32))
}

const HEX_DIGITS: &[u8; 16] = b"0123456789ABCDEF";
