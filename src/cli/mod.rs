pub mod actions;
pub mod config;

use anyhow::{bail, Result};
use clap::{Arg, ArgMatches, Command};

use crate::protocol::modbus::Bank;
use config::{BankConfig, ServerConfig};

/// Parse command line arguments and return ArgMatches.
pub fn parse_args() -> ArgMatches {
    command().get_matches()
}

pub fn command() -> Command {
    Command::new(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .help("Configuration file (.toml or .json)")
                .value_name("FILE"),
        )
        .arg(
            Arg::new("port")
                .long("port")
                .short('p')
                .help("Serial port to serve on")
                .value_name("PORT"),
        )
        .arg(
            Arg::new("baud-rate")
                .long("baud-rate")
                .help("Serial port baud rate")
                .value_name("BAUD")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new("station-id")
                .long("station-id")
                .help("Modbus station ID (slave address, 1-247)")
                .value_name("ID")
                .value_parser(clap::value_parser!(u8)),
        )
        .arg(bank_arg("coils", "Coil bank"))
        .arg(bank_arg("discrete-inputs", "Discrete input bank"))
        .arg(bank_arg("holding", "Holding register bank"))
        .arg(bank_arg("input", "Input register bank"))
        .arg(
            Arg::new("list-ports")
                .long("list-ports")
                .short('l')
                .help("List all available serial ports and exit")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .short('j')
                .help("Print served requests (and port lists) as JSON lines")
                .action(clap::ArgAction::SetTrue),
        )
}

fn bank_arg(name: &'static str, help: &'static str) -> Arg {
    Arg::new(name)
        .long(name)
        .help(format!("{help} as START:COUNT"))
        .value_name("START:COUNT")
        .value_parser(|s: &str| s.parse::<BankConfig>().map_err(|err| err.to_string()))
}

/// Configuration file (if any) with command line overrides applied.
pub fn resolve_config(matches: &ArgMatches) -> Result<ServerConfig> {
    let mut config = match matches.get_one::<String>("config") {
        Some(path) => ServerConfig::from_file(path)?,
        None => ServerConfig::default(),
    };

    if let Some(port) = matches.get_one::<String>("port") {
        config.port_name = port.clone();
    }
    if let Some(&baud_rate) = matches.get_one::<u32>("baud-rate") {
        config.baud_rate = baud_rate;
    }
    if let Some(&station_id) = matches.get_one::<u8>("station-id") {
        config.station_id = station_id;
    }
    for (flag, bank) in [
        ("coils", Bank::Coils),
        ("discrete-inputs", Bank::DiscreteInputs),
        ("holding", Bank::HoldingRegisters),
        ("input", Bank::InputRegisters),
    ] {
        if let Some(bank_config) = matches.get_one::<BankConfig>(flag) {
            config.registers.set(bank, bank_config.clone());
        }
    }

    config.validate()?;
    if config.port_name.is_empty() {
        bail!("No serial port given; use --port or set port_name in the configuration file");
    }
    Ok(config)
}

/// Entry point shared by the binary.
pub fn run(matches: &ArgMatches) -> Result<()> {
    if matches.get_flag("list-ports") {
        return actions::list_ports(matches.get_flag("json"));
    }

    let config = resolve_config(matches)?;
    actions::serve(&config, matches.get_flag("json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(args: &[&str]) -> Result<ArgMatches> {
        Ok(command().try_get_matches_from(
            std::iter::once("modbus-rtu-server").chain(args.iter().copied()),
        )?)
    }

    #[test]
    fn test_overrides_without_config_file() -> Result<()> {
        let config = resolve_config(&matches(&[
            "--port",
            "/dev/ttyUSB1",
            "--baud-rate",
            "115200",
            "--station-id",
            "12",
            "--holding",
            "0:10",
            "--coils",
            "0x20:16",
        ])?)?;

        assert_eq!(config.port_name, "/dev/ttyUSB1");
        assert_eq!(config.baud_rate, 115200);
        assert_eq!(config.station_id, 12);
        assert_eq!(
            config.registers.holding_registers,
            Some(BankConfig::new(0, 10))
        );
        assert_eq!(config.registers.coils, Some(BankConfig::new(0x20, 16)));
        assert_eq!(config.registers.input_registers, None);
        Ok(())
    }

    #[test]
    fn test_port_is_required() -> Result<()> {
        assert!(resolve_config(&matches(&["--holding", "0:10"])?).is_err());
        Ok(())
    }

    #[test]
    fn test_invalid_station_rejected() -> Result<()> {
        let args = matches(&["--port", "COM1", "--station-id", "0"])?;
        assert!(resolve_config(&args).is_err());
        Ok(())
    }

    #[test]
    fn test_malformed_bank_flag() {
        assert!(matches(&["--input", "10"]).is_err());
    }
}
