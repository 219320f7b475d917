use std::process::Command;

const BIN: &str = env!("CARGO_BIN_EXE_modbus-rtu-server");

/// Basic smoke tests for CLI functionality
#[test]
fn test_cli_help() {
    let output = Command::new(BIN)
        .arg("--help")
        .output()
        .expect("Failed to execute modbus-rtu-server binary");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Usage: modbus-rtu-server"));
    assert!(stdout.contains("--station-id"));
}

#[test]
fn test_cli_list_ports_json() {
    let output = Command::new(BIN)
        .arg("--list-ports")
        .arg("--json")
        .output()
        .expect("Failed to execute modbus-rtu-server binary");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    let ports: serde_json::Value =
        serde_json::from_str(&stdout).expect("port list is not valid JSON");
    assert!(ports.is_array());
}

#[test]
fn test_cli_requires_port() {
    let output = Command::new(BIN)
        .args(["--holding", "0:10"])
        .output()
        .expect("Failed to execute modbus-rtu-server binary");

    assert!(!output.status.success());
}

#[test]
fn test_cli_rejects_missing_config_file() {
    let output = Command::new(BIN)
        .args(["--config", "/nonexistent/server.toml"])
        .output()
        .expect("Failed to execute modbus-rtu-server binary");

    assert!(!output.status.success());
}
