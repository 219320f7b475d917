use anyhow::{anyhow, Result};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use super::server::{ModbusRtuServer, ServedRequest};
use crate::protocol::{
    modbus::{RtuError, SharedRegisterMap},
    tty::Transport,
};

/// Pause between cycles that served nothing, so a zero indication timeout
/// does not spin a core.
const IDLE_BACKOFF: Duration = Duration::from_millis(1);

/// Handle to a server polling on a background thread.
pub struct ServerHandle<T: Transport + Send + 'static> {
    receiver: flume::Receiver<ServedRequest>,
    registers: SharedRegisterMap,
    stop: Arc<AtomicBool>,
    handle: thread::JoinHandle<ModbusRtuServer<T>>,
}

impl<T: Transport + Send + 'static> ModbusRtuServer<T> {
    /// Move the server to a background thread that polls until stopped.
    ///
    /// The server must have been started with `begin`.
    pub fn spawn(self) -> Result<ServerHandle<T>> {
        let station_id = self
            .station_id()
            .ok_or_else(|| anyhow!("Server must be started before it is spawned"))?;
        let registers = self.registers();
        let (sender, receiver) = flume::unbounded();
        let stop = Arc::new(AtomicBool::new(false));

        let handle = thread::Builder::new()
            .name(format!("modbus-rtu-{station_id}"))
            .spawn({
                let stop = stop.clone();
                move || run_server_loop(self, sender, stop)
            })?;

        Ok(ServerHandle {
            receiver,
            registers,
            stop,
            handle,
        })
    }
}

fn run_server_loop<T: Transport>(
    mut server: ModbusRtuServer<T>,
    sender: flume::Sender<ServedRequest>,
    stop: Arc<AtomicBool>,
) -> ModbusRtuServer<T> {
    while !stop.load(Ordering::Relaxed) {
        match server.poll() {
            Ok(Some(served)) => {
                if sender.send(served).is_err() {
                    log::warn!("Receiver dropped, stopping server loop");
                    break;
                }
            }
            Ok(None) => thread::sleep(IDLE_BACKOFF),
            Err(RtuError::NotStarted) => break,
            Err(err) => log::warn!("Failed to serve request: {err}"),
        }
    }
    server
}

impl<T: Transport + Send + 'static> ServerHandle<T> {
    /// Try to receive an event without blocking
    pub fn try_recv(&self) -> Option<ServedRequest> {
        self.receiver.try_recv().ok()
    }

    /// Receive an event with timeout
    pub fn recv_timeout(&self, timeout: Duration) -> Option<ServedRequest> {
        self.receiver.recv_timeout(timeout).ok()
    }

    pub fn receiver(&self) -> &flume::Receiver<ServedRequest> {
        &self.receiver
    }

    /// Register map of the running server.
    pub fn registers(&self) -> SharedRegisterMap {
        self.registers.clone()
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Stop polling, join the thread and hand the server back (still started).
    pub fn stop(self) -> Result<ModbusRtuServer<T>> {
        self.stop.store(true, Ordering::Relaxed);
        self.handle
            .join()
            .map_err(|_| anyhow!("Modbus RTU server thread panicked"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{
        modbus::{append_checksum, LinkOptions, SuppressionPolicy},
        tty::MemoryTransport,
    };

    fn framed(bytes: &[u8]) -> Vec<u8> {
        let mut frame = bytes.to_vec();
        append_checksum(&mut frame, bytes.len());
        frame
    }

    #[test]
    fn test_spawn_requires_begin() {
        let (transport, _line) = MemoryTransport::pair();
        assert!(ModbusRtuServer::new(transport).spawn().is_err());
    }

    #[test]
    fn test_background_server_publishes_events() -> Result<()> {
        let (transport, line) = MemoryTransport::pair();
        let mut server = ModbusRtuServer::new(transport).with_options(LinkOptions {
            suppression: SuppressionPolicy::AfterSlaveMismatch,
            ..Default::default()
        });
        server.begin(6)?;
        server.configure_holding_registers(0, 4)?;

        let handle = server.spawn()?;
        assert!(handle.is_running());

        line.inject(&framed(&[6, 0x06, 0x00, 0x03, 0x00, 0x2A]));
        let served = handle
            .recv_timeout(Duration::from_secs(5))
            .ok_or_else(|| anyhow!("no event published"))?;
        assert_eq!(served.function, 0x06);
        assert_eq!(handle.registers().lock().holding_registers().read(3)?, 0x2A);
        assert_eq!(
            line.wait_written(Duration::from_secs(1)),
            framed(&[6, 0x06, 0x00, 0x03, 0x00, 0x2A])
        );

        let server = handle.stop()?;
        assert!(server.is_started());
        assert_eq!(server.holding_register_read(3)?, 0x2A);
        Ok(())
    }
}
