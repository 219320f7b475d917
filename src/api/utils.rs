use anyhow::{anyhow, Result};
use std::time::Duration;

use crate::{
    cli::config::ServerConfig,
    protocol::tty::SerialTransport,
};

/// Open a serial port with the configured framing, enabling exclusive access on Unix systems.
pub fn open_serial_port(
    config: &ServerConfig,
    timeout: Duration,
) -> Result<Box<dyn serialport::SerialPort>> {
    let port = config.port_name.as_str();
    if port.is_empty() {
        return Err(anyhow!("No serial port configured"));
    }

    let builder = serialport::new(port, config.baud_rate)
        .data_bits(config.serial_data_bits()?)
        .parity(config.parity.into())
        .stop_bits(config.serial_stop_bits()?)
        .flow_control(serialport::FlowControl::None)
        .timeout(timeout);

    #[cfg(unix)]
    {
        let mut handle = builder.open_native().map_err(|err| {
            let known = crate::protocol::tty::available_ports_sorted()
                .into_iter()
                .map(|p| p.port_name)
                .collect::<Vec<_>>()
                .join(", ");
            anyhow!("Failed to open port {port}: {err} (available: {known})")
        })?;
        handle
            .set_exclusive(true)
            .map_err(|err| anyhow!("Failed to acquire exclusive access to {port}: {err}"))?;
        Ok(Box::new(handle))
    }

    #[cfg(not(unix))]
    {
        builder
            .open()
            .map_err(|err| anyhow!("Failed to open port {port}: {err}"))
    }
}

/// Open the configured port as an RS-485 transport.
pub fn open_serial_transport(config: &ServerConfig) -> Result<SerialTransport> {
    let timeout = Duration::from_millis(config.timeouts.byte_ms.max(1));
    let port = open_serial_port(config, timeout)?;
    log::info!(
        "Opened {} at {} baud ({} data bits, parity {:?}, {} stop bit(s))",
        config.port_name,
        config.baud_rate,
        config.data_bits,
        config.parity,
        config.stop_bits
    );
    Ok(SerialTransport::new(
        port,
        config.direction_control,
        config.turnaround(),
    ))
}
