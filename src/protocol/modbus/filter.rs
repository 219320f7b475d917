//! Slave-address filtering, integrity checking and the confirmation
//! suppression state machine used on multi-drop lines.

use serde::{Deserialize, Serialize};

use super::{
    crc::crc16,
    error::{RtuError, RtuResult},
    BROADCAST_ADDRESS, RTU_CHECKSUM_LENGTH,
};

/// Check that `msg[..msg_length]` belongs to `slave` and carries a valid CRC.
///
/// Returns `Ok(0)` without touching the checksum when the frame is addressed
/// to another slave; returns `Ok(msg_length)` when the frame is ours (or
/// broadcast) and intact.
pub fn verify_integrity(msg: &[u8], msg_length: usize, slave: u8) -> RtuResult<usize> {
    if msg_length < RTU_CHECKSUM_LENGTH + 1 || msg.len() < msg_length {
        return Err(RtuError::BadData(format!(
            "frame of {msg_length} byte(s) cannot carry a checksum"
        )));
    }

    let target = msg[0];
    if target != slave && target != BROADCAST_ADDRESS {
        log::debug!("Request for slave {target} ignored (not {slave})");
        return Ok(0);
    }

    let calculated = crc16(&msg[..msg_length - RTU_CHECKSUM_LENGTH]);
    let received = u16::from_be_bytes([msg[msg_length - 2], msg[msg_length - 1]]);

    if calculated == received {
        Ok(msg_length)
    } else {
        Err(RtuError::BadCrc {
            received,
            calculated,
        })
    }
}

/// Check that the reply to `request` came from the slave it was sent to.
pub fn pre_check_confirmation(request: &[u8], response: &[u8]) -> RtuResult<()> {
    let (Some(&requested), Some(&responding)) = (request.first(), response.first()) else {
        return Err(RtuError::BadData("empty frame".to_string()));
    };
    if requested != responding && requested != BROADCAST_ADDRESS {
        return Err(RtuError::UnexpectedSlave {
            request: requested,
            response: responding,
        });
    }
    Ok(())
}

/// When the next receive cycle is treated as a confirmation to ignore.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuppressionPolicy {
    /// A timeout or a frame for another slave arms the suppression.
    #[default]
    AfterAnyMiss,
    /// Only a frame for another slave arms the suppression.
    AfterSlaveMismatch,
}

/// What one indication cycle produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// A frame for this slave (or broadcast) passed the checks
    Yielded,
    /// No bytes, or not enough of them, within the wait window
    TimedOut,
    /// A complete frame addressed to another slave
    SlaveMismatch,
    /// A frame failed the CRC or framing checks
    Rejected,
}

/// Receive-side state of a protocol context.
///
/// Heuristic: after a miss the following frame is assumed to be another
/// slave's reply and is dropped, even when the miss was plain line silence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConfirmationState {
    #[default]
    AwaitingIndication,
    AwaitingConfirmationToIgnore,
}

impl ConfirmationState {
    /// State after an indication cycle ended with `outcome`. A suppressed
    /// cycle always returns to `AwaitingIndication`, whatever it read.
    pub fn next(self, outcome: CycleOutcome, policy: SuppressionPolicy) -> Self {
        match self {
            ConfirmationState::AwaitingConfirmationToIgnore => {
                ConfirmationState::AwaitingIndication
            }
            ConfirmationState::AwaitingIndication => match (outcome, policy) {
                (CycleOutcome::SlaveMismatch, _)
                | (CycleOutcome::TimedOut, SuppressionPolicy::AfterAnyMiss) => {
                    ConfirmationState::AwaitingConfirmationToIgnore
                }
                _ => ConfirmationState::AwaitingIndication,
            },
        }
    }

    pub fn is_suppressing(self) -> bool {
        self == ConfirmationState::AwaitingConfirmationToIgnore
    }
}
