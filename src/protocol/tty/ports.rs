use serialport::{SerialPortInfo, SerialPortType};
use std::collections::HashSet;

/// Host serial ports, deduplicated, USB adapters first.
pub fn available_ports_sorted() -> Vec<SerialPortInfo> {
    let raw_ports = serialport::available_ports().unwrap_or_default();
    sort_and_dedup_ports(raw_ports)
}

fn sort_and_dedup_ports(raw_ports: Vec<SerialPortInfo>) -> Vec<SerialPortInfo> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut ports: Vec<SerialPortInfo> = raw_ports
        .into_iter()
        .filter(|p| seen.insert(p.port_name.to_lowercase()))
        .collect();

    fn priority(port: &SerialPortInfo) -> i32 {
        let n = port.port_name.to_lowercase();
        if matches!(port.port_type, SerialPortType::UsbPort(_)) || n.contains("ttyusb") {
            0
        } else if n.contains("acm") {
            1
        } else if n.contains("ttys") || n.contains("serial") {
            2
        } else {
            3
        }
    }

    ports.sort_by(|a, b| {
        priority(a)
            .cmp(&priority(b))
            .then_with(|| a.port_name.cmp(&b.port_name))
    });
    ports
}
