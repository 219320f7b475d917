//! RTU framing: request/response headers, checksum handling and the
//! step-by-step length computation used while reading an ADU.

use super::{
    crc::crc16, RTU_CHECKSUM_LENGTH, RTU_HEADER_LENGTH, RTU_PRESET_REQ_LENGTH,
    RTU_PRESET_RSP_LENGTH,
};

/// Which side of an exchange a frame comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// A request sent by the master
    Indication,
    /// A reply sent by a slave
    Confirmation,
}

/// `[slave][function][addr_hi][addr_lo][qty_hi][qty_lo]`
pub fn build_request_basis(
    slave: u8,
    function: u8,
    address: u16,
    quantity: u16,
) -> [u8; RTU_PRESET_REQ_LENGTH] {
    let [addr_hi, addr_lo] = address.to_be_bytes();
    let [qty_hi, qty_lo] = quantity.to_be_bytes();
    [slave, function, addr_hi, addr_lo, qty_hi, qty_lo]
}

/// `[slave][function]`
pub fn build_response_basis(slave: u8, function: u8) -> [u8; RTU_PRESET_RSP_LENGTH] {
    [slave, function]
}

/// Truncate `frame` to `length`, append the CRC (high byte first) and return
/// the new length.
pub fn append_checksum(frame: &mut Vec<u8>, length: usize) -> usize {
    frame.truncate(length);
    let crc = crc16(frame);
    frame.extend_from_slice(&crc.to_be_bytes());
    frame.len()
}

/// RTU carries no transaction id. Returns `(0, length - checksum)`.
pub fn strip_checksum_for_tid(length: usize) -> (u16, usize) {
    (0, length.saturating_sub(RTU_CHECKSUM_LENGTH))
}

/// Bytes to read after the function code, before any variable-length data.
pub fn meta_length_after_function(function: u8, kind: MessageKind) -> usize {
    match kind {
        MessageKind::Indication => match function {
            0x00..=0x06 => 4,
            0x0F | 0x10 => 5,
            0x16 => 6,
            0x17 => 9,
            // Read exception status, report server id, unknown codes
            _ => 0,
        },
        MessageKind::Confirmation => match function {
            0x05 | 0x06 | 0x0F | 0x10 => 4,
            0x16 => 6,
            _ => 1,
        },
    }
}

/// Bytes still missing once the meta block is in, checksum included.
///
/// `msg` must hold at least the function and meta blocks.
pub fn data_length_after_meta(msg: &[u8], kind: MessageKind) -> usize {
    let function = msg[RTU_HEADER_LENGTH];
    let length = match kind {
        MessageKind::Indication => match function {
            0x0F | 0x10 => msg[RTU_HEADER_LENGTH + 5] as usize,
            0x17 => msg[RTU_HEADER_LENGTH + 9] as usize,
            _ => 0,
        },
        MessageKind::Confirmation => match function {
            0x00..=0x04 | 0x11 | 0x17 => msg[RTU_HEADER_LENGTH + 1] as usize,
            _ => 0,
        },
    };
    length + RTU_CHECKSUM_LENGTH
}
