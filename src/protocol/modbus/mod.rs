mod context;
mod crc;
mod error;
mod filter;
mod frame;
mod reply;
mod storage;

pub use context::{
    validate_slave_id, LinkOptions, Reception, RtuContext, Timeouts, ValidatedRequest,
};
pub use crc::crc16;
pub use error::{RtuError, RtuResult};
pub use filter::{
    pre_check_confirmation, verify_integrity, ConfirmationState, CycleOutcome, SuppressionPolicy,
};
pub use frame::{
    append_checksum, build_request_basis, build_response_basis, data_length_after_meta,
    meta_length_after_function, strip_checksum_for_tid, MessageKind,
};
pub use reply::{
    exception_response, ExceptionCode, FunctionCode, MappingDispatcher, ReplyDispatcher,
    MAX_READ_BITS, MAX_READ_REGISTERS, MAX_WRITE_BITS, MAX_WRITE_READ_REGISTERS,
    MAX_WRITE_REGISTERS,
};
pub use storage::{new_shared_register_map, Bank, RegisterMap, SharedRegisterMap, Table};

/// Slave id byte.
pub const RTU_HEADER_LENGTH: usize = 1;
/// Slave id, function, address and quantity.
pub const RTU_PRESET_REQ_LENGTH: usize = 6;
/// Slave id and function.
pub const RTU_PRESET_RSP_LENGTH: usize = 2;
pub const RTU_CHECKSUM_LENGTH: usize = 2;
pub const RTU_MAX_ADU_LENGTH: usize = 256;

pub const BROADCAST_ADDRESS: u8 = 0;
pub const MAX_SLAVE_ID: u8 = 247;
