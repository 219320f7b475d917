use serde::{Deserialize, Serialize};
use std::{
    io::{Read, Write},
    time::Duration,
};

use super::Transport;

/// How the RS-485 driver enable line is driven.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectionControl {
    /// The adapter switches direction by itself
    None,
    /// RTS high while transmitting
    #[default]
    Rts,
}

/// RS-485 transport over a host serial port.
pub struct SerialTransport {
    port: Box<dyn serialport::SerialPort>,
    direction: DirectionControl,
    turnaround: Duration,
    transmitting: bool,
}

impl SerialTransport {
    pub fn new(
        port: Box<dyn serialport::SerialPort>,
        direction: DirectionControl,
        turnaround: Duration,
    ) -> Self {
        Self {
            port,
            direction,
            turnaround,
            transmitting: false,
        }
    }

    pub fn port_name(&self) -> String {
        self.port.name().unwrap_or_default()
    }

    fn set_driver(&mut self, enabled: bool) {
        if self.direction != DirectionControl::Rts {
            return;
        }
        if let Err(err) = self.port.write_request_to_send(enabled) {
            log::warn!("Failed to set RTS on {}: {err}", self.port_name());
        }
        spin_sleep(self.turnaround);
    }
}

/// Sleep for short turnaround delays; the OS scheduler overshoots
/// microsecond sleeps by far.
fn spin_sleep(duration: Duration) {
    if duration >= Duration::from_millis(2) {
        std::thread::sleep(duration);
        return;
    }
    let start = std::time::Instant::now();
    while start.elapsed() < duration {
        std::hint::spin_loop();
    }
}

impl Transport for SerialTransport {
    fn begin_transmission(&mut self) {
        self.set_driver(true);
        self.transmitting = true;
    }

    fn end_transmission(&mut self) {
        if let Err(err) = self.port.flush() {
            log::warn!("Failed to flush {}: {err}", self.port_name());
        }
        self.set_driver(false);
        self.transmitting = false;
    }

    fn receive_mode(&mut self) {
        // Receiver enable is tied to the inverted driver line on RTS adapters
        if self.direction == DirectionControl::Rts && !self.transmitting {
            if let Err(err) = self.port.write_request_to_send(false) {
                log::warn!("Failed to clear RTS on {}: {err}", self.port_name());
            }
        }
    }

    fn no_receive_mode(&mut self) {}

    fn available(&mut self) -> usize {
        match self.port.bytes_to_read() {
            Ok(count) => count as usize,
            Err(err) => {
                log::warn!("Failed to query {}: {err}", self.port_name());
                0
            }
        }
    }

    fn read_byte(&mut self) -> Option<u8> {
        let mut byte = [0u8; 1];
        match self.port.read(&mut byte) {
            Ok(1) => Some(byte[0]),
            Ok(_) => None,
            Err(err) => {
                log::debug!("Read on {} failed: {err}", self.port_name());
                None
            }
        }
    }

    fn write(&mut self, bytes: &[u8]) -> usize {
        if !self.transmitting {
            log::warn!("Write on {} outside a transmission dropped", self.port_name());
            return 0;
        }
        match self.port.write_all(bytes) {
            Ok(()) => bytes.len(),
            Err(err) => {
                log::warn!("Write on {} failed: {err}", self.port_name());
                0
            }
        }
    }
}
