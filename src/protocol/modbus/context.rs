use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{
    error::{RtuError, RtuResult},
    filter::{verify_integrity, ConfirmationState, CycleOutcome, SuppressionPolicy},
    frame::{
        append_checksum, build_request_basis, build_response_basis, data_length_after_meta,
        meta_length_after_function, strip_checksum_for_tid, MessageKind,
    },
    BROADCAST_ADDRESS, MAX_SLAVE_ID, RTU_HEADER_LENGTH, RTU_MAX_ADU_LENGTH,
    RTU_PRESET_REQ_LENGTH, RTU_PRESET_RSP_LENGTH,
};
use crate::{
    protocol::tty::{receive_exact, wait_for_bytes, Transport},
    utils::hex_string,
};

/// Wait windows used by the step reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeouts {
    /// First byte of a request; zero checks once and returns
    pub indication: Duration,
    /// First byte of a reply being skipped
    pub response: Duration,
    /// Every later chunk of a frame
    pub byte: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            indication: Duration::ZERO,
            response: Duration::from_millis(500),
            byte: Duration::from_millis(500),
        }
    }
}

/// Tunables of a protocol context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkOptions {
    pub timeouts: Timeouts,
    pub suppression: SuppressionPolicy,
    /// Drain the line after a CRC or framing failure
    pub flush_on_error: bool,
}

/// A request that passed address filtering and the CRC check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedRequest {
    adu: Bytes,
}

impl ValidatedRequest {
    #[cfg(test)]
    pub(crate) fn from_frame(adu: Vec<u8>) -> Self {
        Self {
            adu: Bytes::from(adu),
        }
    }

    /// Full ADU, checksum included.
    pub fn adu(&self) -> &[u8] {
        &self.adu
    }

    /// Validated length, checksum included.
    pub fn len(&self) -> usize {
        self.adu.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adu.is_empty()
    }

    pub fn slave(&self) -> u8 {
        self.adu[0]
    }

    pub fn function(&self) -> u8 {
        self.adu[RTU_HEADER_LENGTH]
    }

    pub fn is_broadcast(&self) -> bool {
        self.slave() == BROADCAST_ADDRESS
    }

    /// Function code and data, without slave id and checksum.
    pub fn pdu(&self) -> &[u8] {
        let (_, length) = strip_checksum_for_tid(self.adu.len());
        &self.adu[RTU_HEADER_LENGTH..length]
    }

    /// Bytes after the function code, without checksum.
    pub fn data(&self) -> &[u8] {
        &self.pdu()[1..]
    }
}

/// Result of one receive cycle that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reception {
    Request(ValidatedRequest),
    /// A complete frame addressed to `slave`
    NotForUs { slave: u8 },
    /// The cycle was a confirmation to ignore
    Discarded,
}

/// Unicast ids are 1..=247; 0 is broadcast.
pub fn validate_slave_id(slave: u8) -> RtuResult<()> {
    if slave == BROADCAST_ADDRESS || slave > MAX_SLAVE_ID {
        return Err(RtuError::InvalidArgument(format!(
            "slave id {slave} outside 1..={MAX_SLAVE_ID}"
        )));
    }
    Ok(())
}

/// RTU protocol context of one slave on one transport.
pub struct RtuContext<T: Transport> {
    transport: T,
    slave: u8,
    state: ConfirmationState,
    options: LinkOptions,
}

impl<T: Transport> RtuContext<T> {
    /// Create a context answering as `slave` (1..=247).
    pub fn new(transport: T, slave: u8, options: LinkOptions) -> RtuResult<Self> {
        let mut context = Self {
            transport,
            slave: 0,
            state: ConfirmationState::default(),
            options,
        };
        context.set_slave(slave)?;
        Ok(context)
    }

    pub fn set_slave(&mut self, slave: u8) -> RtuResult<()> {
        validate_slave_id(slave)?;
        self.slave = slave;
        Ok(())
    }

    pub fn slave(&self) -> u8 {
        self.slave
    }

    pub fn state(&self) -> ConfirmationState {
        self.state
    }

    pub fn options(&self) -> &LinkOptions {
        &self.options
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Enter receive mode.
    pub fn connect(&mut self) {
        self.transport.receive_mode();
    }

    /// Leave receive mode and hand the transport back.
    pub fn close(mut self) -> T {
        self.transport.no_receive_mode();
        self.transport
    }

    pub fn build_request_basis(
        &self,
        function: u8,
        address: u16,
        quantity: u16,
    ) -> [u8; RTU_PRESET_REQ_LENGTH] {
        build_request_basis(self.slave, function, address, quantity)
    }

    pub fn build_response_basis(&self, function: u8) -> [u8; RTU_PRESET_RSP_LENGTH] {
        build_response_basis(self.slave, function)
    }

    /// One poll iteration: yields a validated request or nothing.
    pub fn poll(&mut self) -> Option<ValidatedRequest> {
        match self.receive() {
            Ok(Reception::Request(request)) => Some(request),
            Ok(_) => None,
            Err(RtuError::Timeout { .. }) => None,
            Err(err) => {
                log::warn!("Dropped frame for slave {}: {err}", self.slave);
                None
            }
        }
    }

    /// One receive cycle, advancing the confirmation state machine by one step.
    pub fn receive(&mut self) -> RtuResult<Reception> {
        if self.state.is_suppressing() {
            let outcome = self
                .receive_msg(MessageKind::Confirmation)
                .and_then(|msg| verify_integrity(&msg, msg.len(), self.slave));
            log::debug!("Confirmation to ignore ({outcome:?})");
            self.advance(CycleOutcome::Rejected);
            return Ok(Reception::Discarded);
        }

        let msg = match self.receive_msg(MessageKind::Indication) {
            Ok(msg) => msg,
            Err(err) => {
                let outcome = match err {
                    RtuError::Timeout { .. } => CycleOutcome::TimedOut,
                    _ => CycleOutcome::Rejected,
                };
                self.advance(outcome);
                self.recover(&err);
                return Err(err);
            }
        };

        match verify_integrity(&msg, msg.len(), self.slave) {
            Ok(0) => {
                self.advance(CycleOutcome::SlaveMismatch);
                Ok(Reception::NotForUs { slave: msg[0] })
            }
            Ok(length) => {
                self.advance(CycleOutcome::Yielded);
                log::debug!("Received request: {}", hex_string(&msg[..length]));
                Ok(Reception::Request(ValidatedRequest {
                    adu: Bytes::from(msg),
                }))
            }
            Err(err) => {
                self.advance(CycleOutcome::Rejected);
                self.recover(&err);
                Err(err)
            }
        }
    }

    fn advance(&mut self, outcome: CycleOutcome) {
        let next = self.state.next(outcome, self.options.suppression);
        if next != self.state {
            log::debug!("Slave {}: {:?} -> {next:?}", self.slave, self.state);
        }
        self.state = next;
    }

    fn recover(&mut self, err: &RtuError) {
        if !matches!(err, RtuError::BadCrc { .. } | RtuError::BadData(_)) {
            return;
        }
        log::warn!("Slave {}: {err}", self.slave);
        if self.options.flush_on_error {
            let flushed = self.flush();
            log::debug!("Flushed {flushed} byte(s) after error");
        }
    }

    /// Read one ADU in function/meta/data steps.
    fn receive_msg(&mut self, kind: MessageKind) -> RtuResult<Vec<u8>> {
        #[derive(Clone, Copy)]
        enum Step {
            Function,
            Meta,
            Data,
        }

        let mut msg = Vec::with_capacity(RTU_MAX_ADU_LENGTH);
        let mut step = Step::Function;
        let mut length_to_read = RTU_HEADER_LENGTH + 1;
        let mut timeout = match kind {
            MessageKind::Indication => self.options.timeouts.indication,
            MessageKind::Confirmation => self.options.timeouts.response,
        };

        while length_to_read != 0 {
            let available = wait_for_bytes(&mut self.transport, length_to_read, timeout)?;
            let chunk = receive_exact(&mut self.transport, available.min(length_to_read))?;
            length_to_read -= chunk.len();
            msg.extend_from_slice(&chunk);

            if length_to_read == 0 {
                if let Step::Function = step {
                    length_to_read = meta_length_after_function(msg[RTU_HEADER_LENGTH], kind);
                    step = Step::Meta;
                }
                if length_to_read == 0 {
                    if let Step::Meta = step {
                        length_to_read = data_length_after_meta(&msg, kind);
                        if msg.len() + length_to_read > RTU_MAX_ADU_LENGTH {
                            return Err(RtuError::BadData(format!(
                                "frame of {} bytes exceeds {RTU_MAX_ADU_LENGTH}",
                                msg.len() + length_to_read
                            )));
                        }
                        step = Step::Data;
                    }
                }
            }

            timeout = self.options.timeouts.byte;
        }

        Ok(msg)
    }

    /// Append the checksum and write `frame` under direction control.
    pub fn send(&mut self, frame: &mut Vec<u8>) -> RtuResult<usize> {
        let length = append_checksum(frame, frame.len());
        log::debug!("Sending: {}", hex_string(frame));

        self.transport.no_receive_mode();
        self.transport.begin_transmission();
        let written = self.transport.write(frame);
        self.transport.end_transmission();
        self.transport.receive_mode();

        if written != length {
            return Err(RtuError::ShortWrite {
                written,
                expected: length,
            });
        }
        Ok(written)
    }

    /// Drain every byte currently available; returns how many were dropped.
    pub fn flush(&mut self) -> usize {
        let mut flushed = 0;
        while self.transport.available() > 0 {
            if self.transport.read_byte().is_none() {
                break;
            }
            flushed += 1;
        }
        flushed
    }
}
