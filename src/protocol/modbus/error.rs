use thiserror::Error;

use super::storage::Bank;

/// Errors produced by the RTU protocol engine.
///
/// Frame-level failures (`BadCrc`, `BadData`, `UnexpectedSlave`, `Timeout`) are
/// per-cycle outcomes: the context stays usable after any of them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RtuError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("failed to allocate {requested} entries for {bank}")]
    AllocationFailure { bank: Bank, requested: usize },

    #[error("illegal data address {address} for {bank}")]
    IllegalAddress { bank: Bank, address: u16 },

    #[error("bad CRC: received 0x{received:04X} != calculated 0x{calculated:04X}")]
    BadCrc { received: u16, calculated: u16 },

    #[error("the responding slave {response} isn't the requested slave {request}")]
    UnexpectedSlave { request: u8, response: u8 },

    #[error("timed out waiting for {expected} byte(s)")]
    Timeout { expected: usize },

    #[error("bad data: {0}")]
    BadData(String),

    #[error("short write: {written} of {expected} byte(s) sent")]
    ShortWrite { written: usize, expected: usize },

    #[error("server not started")]
    NotStarted,
}

impl RtuError {
    /// Modbus exception code a reply dispatcher should answer with, if any.
    pub fn exception_code(&self) -> Option<u8> {
        match self {
            RtuError::IllegalAddress { .. } => Some(0x02),
            RtuError::InvalidArgument(_) => Some(0x03),
            _ => None,
        }
    }

    /// True for failures that only concern the frame on the wire.
    pub fn is_frame_error(&self) -> bool {
        matches!(
            self,
            RtuError::BadCrc { .. }
                | RtuError::BadData(_)
                | RtuError::UnexpectedSlave { .. }
                | RtuError::Timeout { .. }
        )
    }
}

pub type RtuResult<T> = std::result::Result<T, RtuError>;
