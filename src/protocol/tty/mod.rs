//! Half-duplex byte transports and the bounded wait used by the poll loop.

mod memory;
mod ports;
mod serial;

pub use memory::{LineEvent, MemoryLine, MemoryTransport};
pub use ports::available_ports_sorted;
pub use serial::{DirectionControl, SerialTransport};

use std::time::{Duration, Instant};

use crate::protocol::modbus::{RtuError, RtuResult};

/// A half-duplex byte stream with explicit direction control.
///
/// Implementations own their line-turnaround timing: `begin_transmission`
/// must not return before the driver is enabled, and `end_transmission` must
/// flush and release the driver before returning.
pub trait Transport {
    fn begin_transmission(&mut self);
    fn end_transmission(&mut self);
    fn receive_mode(&mut self);
    fn no_receive_mode(&mut self);
    /// Number of bytes that can be read without blocking.
    fn available(&mut self) -> usize;
    fn read_byte(&mut self) -> Option<u8>;
    /// Returns how many bytes were accepted.
    fn write(&mut self, bytes: &[u8]) -> usize;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn begin_transmission(&mut self) {
        (**self).begin_transmission()
    }
    fn end_transmission(&mut self) {
        (**self).end_transmission()
    }
    fn receive_mode(&mut self) {
        (**self).receive_mode()
    }
    fn no_receive_mode(&mut self) {
        (**self).no_receive_mode()
    }
    fn available(&mut self) -> usize {
        (**self).available()
    }
    fn read_byte(&mut self) -> Option<u8> {
        (**self).read_byte()
    }
    fn write(&mut self, bytes: &[u8]) -> usize {
        (**self).write(bytes)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn begin_transmission(&mut self) {
        (**self).begin_transmission()
    }
    fn end_transmission(&mut self) {
        (**self).end_transmission()
    }
    fn receive_mode(&mut self) {
        (**self).receive_mode()
    }
    fn no_receive_mode(&mut self) {
        (**self).no_receive_mode()
    }
    fn available(&mut self) -> usize {
        (**self).available()
    }
    fn read_byte(&mut self) -> Option<u8> {
        (**self).read_byte()
    }
    fn write(&mut self, bytes: &[u8]) -> usize {
        (**self).write(bytes)
    }
}

/// Busy-poll until `min_count` bytes are available or `timeout` elapses.
///
/// Returns the available count, which can be lower than `min_count` if the
/// window closed with a partial frame, or higher if more has arrived. Fails
/// with `Timeout` only when nothing arrived at all. A zero timeout checks once.
pub fn wait_for_bytes<T: Transport + ?Sized>(
    transport: &mut T,
    min_count: usize,
    timeout: Duration,
) -> RtuResult<usize> {
    let start = Instant::now();
    let mut available;
    loop {
        available = transport.available();
        if available >= min_count || start.elapsed() >= timeout {
            break;
        }
        std::hint::spin_loop();
    }

    if available == 0 {
        return Err(RtuError::Timeout {
            expected: min_count,
        });
    }
    Ok(available)
}

/// Read exactly `count` bytes whose availability was already confirmed.
pub fn receive_exact<T: Transport + ?Sized>(transport: &mut T, count: usize) -> RtuResult<Vec<u8>> {
    let mut bytes = Vec::with_capacity(count);
    while bytes.len() < count {
        match transport.read_byte() {
            Some(byte) => bytes.push(byte),
            None => {
                return Err(RtuError::Timeout {
                    expected: count - bytes.len(),
                })
            }
        }
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::thread;

    #[test]
    fn test_zero_timeout_checks_once() {
        let (mut transport, _line) = MemoryTransport::pair();
        let started = Instant::now();
        assert_eq!(
            wait_for_bytes(&mut transport, 2, Duration::ZERO),
            Err(RtuError::Timeout { expected: 2 })
        );
        assert!(started.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn test_returns_everything_available() -> Result<()> {
        let (mut transport, line) = MemoryTransport::pair();
        line.inject(&[1, 2, 3, 4, 5]);
        assert_eq!(wait_for_bytes(&mut transport, 2, Duration::ZERO)?, 5);
        Ok(())
    }

    #[test]
    fn test_partial_data_after_timeout() -> Result<()> {
        let (mut transport, line) = MemoryTransport::pair();
        line.inject(&[1]);
        assert_eq!(
            wait_for_bytes(&mut transport, 4, Duration::from_millis(5))?,
            1
        );
        Ok(())
    }

    #[test]
    fn test_waits_for_late_bytes() -> Result<()> {
        let (mut transport, line) = MemoryTransport::pair();
        let writer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            line.inject(&[0xAA, 0xBB]);
        });

        let available = wait_for_bytes(&mut transport, 2, Duration::from_secs(2))?;
        writer.join().expect("writer thread panicked");
        assert_eq!(available, 2);
        assert_eq!(receive_exact(&mut transport, 2)?, vec![0xAA, 0xBB]);
        Ok(())
    }

    #[test]
    fn test_timeout_is_bounded() {
        let (mut transport, _line) = MemoryTransport::pair();
        let started = Instant::now();
        assert!(wait_for_bytes(&mut transport, 1, Duration::from_millis(30)).is_err());
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(30));
        assert!(elapsed < Duration::from_secs(1));
    }

    #[test]
    fn test_receive_exact_runs_dry() {
        let (mut transport, line) = MemoryTransport::pair();
        line.inject(&[1, 2]);
        assert_eq!(
            receive_exact(&mut transport, 3),
            Err(RtuError::Timeout { expected: 1 })
        );
    }
}
