use crate::error::{Error, Result};

pub fn encode(text: &str) -> Vec<u16> {
    text.encode_utf16().collect()
}

pub fn decode(units: &[u16]) -> Result<String> {
    String::from_utf16(units).map_err(|_| Error::InvalidUtf16)
}

pub fn units_to_le_bytes(units: &[u16]) -> Vec<u8> {
    units.iter().flat_map(|u| u.to_le_bytes()).collect()
}

pub fn le_bytes_to_units(bytes: &[u8]) -> Vec<u16> {
    bytes
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect()
}
