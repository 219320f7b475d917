//! Shared helpers for logging and port listing

pub mod ports;

pub use ports::*;

/// Space-separated lowercase hex, as used in frame dumps.
pub fn hex_string(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_string() {
        assert_eq!(hex_string(&[0x01, 0x03, 0xC5, 0xCD]), "01 03 c5 cd");
        assert_eq!(hex_string(&[]), "");
    }
}
