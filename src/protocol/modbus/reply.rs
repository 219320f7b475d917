//! Turning a validated request into a reply against the register map.

use num_enum::TryFromPrimitive;

use super::{
    context::ValidatedRequest,
    error::RtuError,
    frame::build_response_basis,
    storage::{RegisterMap, Table},
    RTU_CHECKSUM_LENGTH, RTU_MAX_ADU_LENGTH, RTU_PRESET_RSP_LENGTH,
};
use crate::utils::hex_string;

pub const MAX_READ_BITS: usize = 2000;
pub const MAX_READ_REGISTERS: usize = 125;
pub const MAX_WRITE_BITS: usize = 1968;
pub const MAX_WRITE_REGISTERS: usize = 123;
pub const MAX_WRITE_READ_REGISTERS: usize = 121;

const COIL_ON: u16 = 0xFF00;
const COIL_OFF: u16 = 0x0000;
const RUN_INDICATOR_ON: u8 = 0xFF;

/// Function codes answered by [`MappingDispatcher`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum FunctionCode {
    ReadCoils = 0x01,
    ReadDiscreteInputs = 0x02,
    ReadHoldingRegisters = 0x03,
    ReadInputRegisters = 0x04,
    WriteSingleCoil = 0x05,
    WriteSingleRegister = 0x06,
    WriteMultipleCoils = 0x0F,
    WriteMultipleRegisters = 0x10,
    ReportServerId = 0x11,
    MaskWriteRegister = 0x16,
    WriteAndReadRegisters = 0x17,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum ExceptionCode {
    IllegalFunction = 0x01,
    IllegalDataAddress = 0x02,
    IllegalDataValue = 0x03,
    ServerDeviceFailure = 0x04,
}

impl From<RtuError> for ExceptionCode {
    fn from(err: RtuError) -> Self {
        err.exception_code()
            .and_then(|code| ExceptionCode::try_from(code).ok())
            .unwrap_or(ExceptionCode::ServerDeviceFailure)
    }
}

/// `[slave][function | 0x80][code]`, checksum not included.
pub fn exception_response(slave: u8, function: u8, code: ExceptionCode) -> Vec<u8> {
    vec![slave, function | 0x80, code as u8]
}

/// Produces the reply to a validated request.
///
/// The returned frame carries no checksum; `None` means nothing is sent.
pub trait ReplyDispatcher: Send {
    fn reply(&mut self, request: &ValidatedRequest, registers: &mut RegisterMap)
        -> Option<Vec<u8>>;
}

impl<F> ReplyDispatcher for F
where
    F: FnMut(&ValidatedRequest, &mut RegisterMap) -> Option<Vec<u8>> + Send,
{
    fn reply(
        &mut self,
        request: &ValidatedRequest,
        registers: &mut RegisterMap,
    ) -> Option<Vec<u8>> {
        self(request, registers)
    }
}

/// Answers the standard data-access function codes from the register map.
#[derive(Debug, Clone)]
pub struct MappingDispatcher {
    identity: Vec<u8>,
}

impl Default for MappingDispatcher {
    fn default() -> Self {
        Self {
            identity: concat!(env!("CARGO_PKG_NAME"), " ", env!("CARGO_PKG_VERSION"))
                .as_bytes()
                .to_vec(),
        }
    }
}

type Reply = Result<Vec<u8>, ExceptionCode>;

impl MappingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Additional bytes reported by "report server id" (0x11).
    pub fn with_identity(mut self, identity: impl Into<Vec<u8>>) -> Self {
        let mut identity = identity.into();
        // byte count, slave id and run indicator precede the identity
        identity.truncate(RTU_MAX_ADU_LENGTH - RTU_PRESET_RSP_LENGTH - 3 - RTU_CHECKSUM_LENGTH);
        self.identity = identity;
        self
    }

    pub fn identity(&self) -> &[u8] {
        &self.identity
    }

    fn execute(
        &self,
        function: FunctionCode,
        slave: u8,
        data: &[u8],
        registers: &mut RegisterMap,
    ) -> Reply {
        match function {
            FunctionCode::ReadCoils => read_bits(data, registers.coils()),
            FunctionCode::ReadDiscreteInputs => read_bits(data, registers.discrete_inputs()),
            FunctionCode::ReadHoldingRegisters => read_words(data, registers.holding_registers()),
            FunctionCode::ReadInputRegisters => read_words(data, registers.input_registers()),
            FunctionCode::WriteSingleCoil => {
                let address = word(data, 0)?;
                let value = match word(data, 2)? {
                    COIL_ON => true,
                    COIL_OFF => false,
                    _ => return Err(ExceptionCode::IllegalDataValue),
                };
                registers.coils_mut().write(address, value)?;
                Ok(data[..4].to_vec())
            }
            FunctionCode::WriteSingleRegister => {
                let address = word(data, 0)?;
                let value = word(data, 2)?;
                registers.holding_registers_mut().write(address, value)?;
                Ok(data[..4].to_vec())
            }
            FunctionCode::WriteMultipleCoils => {
                let address = word(data, 0)?;
                let quantity = word(data, 2)? as usize;
                let values = payload(data, 4)?;
                if !(1..=MAX_WRITE_BITS).contains(&quantity) || values.len() != quantity.div_ceil(8)
                {
                    return Err(ExceptionCode::IllegalDataValue);
                }
                let bits = unpack_bits(values, quantity);
                registers.coils_mut().write_range(address, &bits)?;
                Ok(data[..4].to_vec())
            }
            FunctionCode::WriteMultipleRegisters => {
                let address = word(data, 0)?;
                let quantity = word(data, 2)? as usize;
                let values = payload(data, 4)?;
                if !(1..=MAX_WRITE_REGISTERS).contains(&quantity) || values.len() != quantity * 2 {
                    return Err(ExceptionCode::IllegalDataValue);
                }
                registers
                    .holding_registers_mut()
                    .write_range(address, &unpack_words(values))?;
                Ok(data[..4].to_vec())
            }
            FunctionCode::ReportServerId => {
                let mut reply = Vec::with_capacity(3 + self.identity.len());
                reply.push((2 + self.identity.len()) as u8);
                reply.push(slave);
                reply.push(RUN_INDICATOR_ON);
                reply.extend_from_slice(&self.identity);
                Ok(reply)
            }
            FunctionCode::MaskWriteRegister => {
                let address = word(data, 0)?;
                let and_mask = word(data, 2)?;
                let or_mask = word(data, 4)?;
                registers.mask_write(address, and_mask, or_mask)?;
                Ok(data[..6].to_vec())
            }
            FunctionCode::WriteAndReadRegisters => {
                let read_address = word(data, 0)?;
                let read_quantity = word(data, 2)? as usize;
                let write_address = word(data, 4)?;
                let write_quantity = word(data, 6)? as usize;
                let values = payload(data, 8)?;
                if !(1..=MAX_READ_REGISTERS).contains(&read_quantity)
                    || !(1..=MAX_WRITE_READ_REGISTERS).contains(&write_quantity)
                    || values.len() != write_quantity * 2
                {
                    return Err(ExceptionCode::IllegalDataValue);
                }

                let holdings = registers.holding_registers_mut();
                holdings.read_range(write_address, write_quantity)?;
                holdings.read_range(read_address, read_quantity)?;
                holdings.write_range(write_address, &unpack_words(values))?;
                Ok(pack_words(holdings.read_range(read_address, read_quantity)?))
            }
        }
    }
}

impl ReplyDispatcher for MappingDispatcher {
    fn reply(
        &mut self,
        request: &ValidatedRequest,
        registers: &mut RegisterMap,
    ) -> Option<Vec<u8>> {
        let slave = request.slave();
        let raw_function = request.function();

        let result = match FunctionCode::try_from(raw_function) {
            Ok(function) => self.execute(function, slave, request.data(), registers),
            Err(_) => Err(ExceptionCode::IllegalFunction),
        };

        if request.is_broadcast() {
            if let Err(code) = result {
                log::debug!("Broadcast function 0x{raw_function:02X} failed: {code:?}");
            }
            return None;
        }

        let reply = match result {
            Ok(body) => {
                let mut reply = build_response_basis(slave, raw_function).to_vec();
                reply.extend_from_slice(&body);
                reply
            }
            Err(code) => {
                log::debug!(
                    "Exception {code:?} for request {}",
                    hex_string(request.adu())
                );
                exception_response(slave, raw_function, code)
            }
        };
        Some(reply)
    }
}

fn read_bits(data: &[u8], table: &Table<bool>) -> Reply {
    let address = word(data, 0)?;
    let quantity = word(data, 2)? as usize;
    if !(1..=MAX_READ_BITS).contains(&quantity) {
        return Err(ExceptionCode::IllegalDataValue);
    }
    let packed = pack_bits(table.read_range(address, quantity)?);
    let mut reply = Vec::with_capacity(1 + packed.len());
    reply.push(packed.len() as u8);
    reply.extend_from_slice(&packed);
    Ok(reply)
}

fn read_words(data: &[u8], table: &Table<u16>) -> Reply {
    let address = word(data, 0)?;
    let quantity = word(data, 2)? as usize;
    if !(1..=MAX_READ_REGISTERS).contains(&quantity) {
        return Err(ExceptionCode::IllegalDataValue);
    }
    Ok(pack_words(table.read_range(address, quantity)?))
}

fn word(data: &[u8], offset: usize) -> Result<u16, ExceptionCode> {
    match data.get(offset..offset + 2) {
        Some(bytes) => Ok(u16::from_be_bytes([bytes[0], bytes[1]])),
        None => Err(ExceptionCode::IllegalDataValue),
    }
}

/// Bytes announced by the byte count at `data[offset]`.
fn payload(data: &[u8], offset: usize) -> Result<&[u8], ExceptionCode> {
    let count = *data.get(offset).ok_or(ExceptionCode::IllegalDataValue)? as usize;
    data.get(offset + 1..)
        .filter(|rest| rest.len() == count)
        .ok_or(ExceptionCode::IllegalDataValue)
}

/// LSB of the first byte is the first bit.
fn pack_bits(bits: &[bool]) -> Vec<u8> {
    bits.chunks(8)
        .map(|chunk| {
            chunk
                .iter()
                .enumerate()
                .fold(0u8, |byte, (i, &bit)| byte | ((bit as u8) << i))
        })
        .collect()
}

fn unpack_bits(bytes: &[u8], quantity: usize) -> Vec<bool> {
    (0..quantity)
        .map(|i| bytes[i / 8] & (1 << (i % 8)) != 0)
        .collect()
}

/// Byte count followed by big-endian words.
fn pack_words(words: &[u16]) -> Vec<u8> {
    let mut reply = Vec::with_capacity(1 + words.len() * 2);
    reply.push((words.len() * 2) as u8);
    for value in words {
        reply.extend_from_slice(&value.to_be_bytes());
    }
    reply
}

fn unpack_words(bytes: &[u8]) -> Vec<u16> {
    bytes
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect()
}
