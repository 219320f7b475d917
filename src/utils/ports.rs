use serde::Serialize;

/// A host serial port as printed by `--list-ports`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortInfo {
    pub port_name: String,
    pub port_type: String,
}

/// Available ports, USB adapters first, as (name, type) pairs.
pub fn enumerate_ports() -> Vec<PortInfo> {
    crate::protocol::tty::available_ports_sorted()
        .into_iter()
        .map(|p| PortInfo {
            port_type: describe_port_type(&p.port_type),
            port_name: p.port_name,
        })
        .collect()
}

fn describe_port_type(port_type: &serialport::SerialPortType) -> String {
    match port_type {
        serialport::SerialPortType::UsbPort(info) => {
            let mut description = format!("usb {:04x}:{:04x}", info.vid, info.pid);
            if let Some(product) = &info.product {
                description.push(' ');
                description.push_str(product);
            }
            description
        }
        serialport::SerialPortType::PciPort => "pci".to_string(),
        serialport::SerialPortType::BluetoothPort => "bluetooth".to_string(),
        serialport::SerialPortType::Unknown => "unknown".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_port_type() {
        assert_eq!(
            describe_port_type(&serialport::SerialPortType::PciPort),
            "pci"
        );
        assert_eq!(
            describe_port_type(&serialport::SerialPortType::Unknown),
            "unknown"
        );
    }
}
