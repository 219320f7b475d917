use parking_lot::Mutex;
use std::{
    collections::VecDeque,
    sync::Arc,
    time::{Duration, Instant},
};

use super::Transport;

/// Direction-control calls observed on a [`MemoryTransport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEvent {
    BeginTransmission,
    EndTransmission,
    Receive,
    NoReceive,
}

#[derive(Debug, Default)]
struct LineState {
    inbound: VecDeque<u8>,
    outbound: Vec<u8>,
    events: Vec<LineEvent>,
    transmitting: bool,
}

/// Server side of an in-memory half-duplex line.
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    state: Arc<Mutex<LineState>>,
}

/// Far side of the line: injects bytes for the server and collects what it
/// wrote.
#[derive(Debug, Clone)]
pub struct MemoryLine {
    state: Arc<Mutex<LineState>>,
}

impl MemoryTransport {
    pub fn pair() -> (MemoryTransport, MemoryLine) {
        let state = Arc::new(Mutex::new(LineState::default()));
        (
            MemoryTransport {
                state: state.clone(),
            },
            MemoryLine { state },
        )
    }
}

impl Transport for MemoryTransport {
    fn begin_transmission(&mut self) {
        let mut state = self.state.lock();
        state.transmitting = true;
        state.events.push(LineEvent::BeginTransmission);
    }

    fn end_transmission(&mut self) {
        let mut state = self.state.lock();
        state.transmitting = false;
        state.events.push(LineEvent::EndTransmission);
    }

    fn receive_mode(&mut self) {
        self.state.lock().events.push(LineEvent::Receive);
    }

    fn no_receive_mode(&mut self) {
        self.state.lock().events.push(LineEvent::NoReceive);
    }

    fn available(&mut self) -> usize {
        self.state.lock().inbound.len()
    }

    fn read_byte(&mut self) -> Option<u8> {
        self.state.lock().inbound.pop_front()
    }

    fn write(&mut self, bytes: &[u8]) -> usize {
        let mut state = self.state.lock();
        // The driver is disabled outside a transmission
        if !state.transmitting {
            return 0;
        }
        state.outbound.extend_from_slice(bytes);
        bytes.len()
    }
}

impl MemoryLine {
    /// Queue bytes for the server to read.
    pub fn inject(&self, bytes: &[u8]) {
        self.state.lock().inbound.extend(bytes.iter().copied());
    }

    /// Bytes the server has not read yet.
    pub fn pending(&self) -> usize {
        self.state.lock().inbound.len()
    }

    /// Drain everything the server wrote so far.
    pub fn take_written(&self) -> Vec<u8> {
        std::mem::take(&mut self.state.lock().outbound)
    }

    /// Wait until the server wrote something, then drain it. Returns an empty
    /// vector if nothing showed up within `timeout`.
    pub fn wait_written(&self, timeout: Duration) -> Vec<u8> {
        let start = Instant::now();
        loop {
            let written = self.take_written();
            if !written.is_empty() || start.elapsed() >= timeout {
                return written;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    pub fn events(&self) -> Vec<LineEvent> {
        self.state.lock().events.clone()
    }

    pub fn clear_events(&self) {
        self.state.lock().events.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_requires_transmission() {
        let (mut transport, line) = MemoryTransport::pair();
        assert_eq!(transport.write(&[1, 2, 3]), 0);

        transport.begin_transmission();
        assert_eq!(transport.write(&[1, 2, 3]), 3);
        transport.end_transmission();

        assert_eq!(line.take_written(), vec![1, 2, 3]);
        assert_eq!(
            line.events(),
            vec![LineEvent::BeginTransmission, LineEvent::EndTransmission]
        );
    }

    #[test]
    fn test_inject_and_read() {
        let (mut transport, line) = MemoryTransport::pair();
        line.inject(&[9, 8]);
        assert_eq!(transport.available(), 2);
        assert_eq!(transport.read_byte(), Some(9));
        assert_eq!(line.pending(), 1);
        assert_eq!(transport.read_byte(), Some(8));
        assert_eq!(transport.read_byte(), None);
    }
}
