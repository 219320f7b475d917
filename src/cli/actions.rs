use anyhow::{anyhow, Result};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use super::config::ServerConfig;
use crate::{
    api::{
        modbus::{ModbusRtuServer, ServedRequest},
        utils::open_serial_transport,
    },
    utils::{enumerate_ports, hex_string},
};

/// Print the host serial ports, one per line (or as a JSON array).
pub fn list_ports(want_json: bool) -> Result<()> {
    let ports = enumerate_ports();
    if want_json {
        println!("{}", serde_json::to_string_pretty(&ports)?);
    } else {
        for port in &ports {
            println!("{}\t{}", port.port_name, port.port_type);
        }
    }
    Ok(())
}

/// Serve `config` until Ctrl-C.
pub fn serve(config: &ServerConfig, want_json: bool) -> Result<()> {
    let transport = open_serial_transport(config)?;
    let mut server = ModbusRtuServer::new(transport).with_options(config.link_options());
    server.begin(config.station_id)?;
    config.registers.apply(&mut server.registers().lock())?;

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        ctrlc::set_handler(move || running.store(false, Ordering::SeqCst))
            .map_err(|err| anyhow!("Failed to install Ctrl-C handler: {err}"))?;
    }

    let handle = server.spawn()?;
    log::info!(
        "Serving station {} on {} (Ctrl-C to stop)",
        config.station_id,
        config.port_name
    );

    while running.load(Ordering::SeqCst) && handle.is_running() {
        if let Some(served) = handle.recv_timeout(Duration::from_millis(200)) {
            report(&served, want_json)?;
        }
    }

    let mut server = handle.stop()?;
    server.end();
    Ok(())
}

fn report(served: &ServedRequest, want_json: bool) -> Result<()> {
    if want_json {
        println!("{}", serde_json::to_string(served)?);
        return Ok(());
    }
    log::info!(
        "{} function 0x{:02X}{}: {} -> {}",
        served.timestamp.format("%H:%M:%S%.3f"),
        served.function,
        if served.broadcast { " (broadcast)" } else { "" },
        hex_string(&served.request),
        served
            .response
            .as_deref()
            .map(hex_string)
            .unwrap_or_else(|| "no reply".to_string())
    );
    Ok(())
}
