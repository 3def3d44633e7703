//! UTF-16 text encoding used on the wire.
//!
//! Payloads in both directions are little-endian UTF-16 code units with no
//! byte-order mark, which is what existing client tools already speak.

/// Encode text as little-endian UTF-16 bytes.
#[must_use]
pub fn encode_utf16le(text: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(text.len() * 2);
    for unit in text.encode_utf16() {
        buf.extend_from_slice(&unit.to_le_bytes());
    }
    buf
}

/// Decode little-endian UTF-16 bytes into text.
///
/// Unpaired surrogates and a dangling odd byte are replaced with
/// `U+FFFD` rather than rejected.
#[must_use]
pub fn decode_utf16le(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();

    let mut text = String::from_utf16_lossy(&units);
    if bytes.len() % 2 != 0 {
        text.push(char::REPLACEMENT_CHARACTER);
    }
    text
}

/// Length of a string in UTF-16 code units.
///
/// Length prefixes in List records count code units, not bytes or chars.
#[must_use]
pub fn utf16_len(text: &str) -> usize {
    text.encode_utf16().count()
}
