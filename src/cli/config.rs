use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::{path::Path, str::FromStr, time::Duration};
use strum::IntoEnumIterator;

use crate::protocol::{
    modbus::{
        validate_slave_id, Bank, LinkOptions, RegisterMap, RtuError, RtuResult, SuppressionPolicy,
        Timeouts,
    },
    tty::DirectionControl,
};

/// Serial parity, as written in configuration files
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parity {
    #[default]
    None,
    Even,
    Odd,
}

impl From<Parity> for serialport::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => serialport::Parity::None,
            Parity::Even => serialport::Parity::Even,
            Parity::Odd => serialport::Parity::Odd,
        }
    }
}

/// Wait windows in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// First byte of a request (0 = check once)
    #[serde(default)]
    pub indication_ms: u64,
    #[serde(default = "default_response_ms")]
    pub response_ms: u64,
    #[serde(default = "default_byte_ms")]
    pub byte_ms: u64,
}

fn default_response_ms() -> u64 {
    500
}

fn default_byte_ms() -> u64 {
    500
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            indication_ms: 0,
            response_ms: default_response_ms(),
            byte_ms: default_byte_ms(),
        }
    }
}

impl From<TimeoutConfig> for Timeouts {
    fn from(config: TimeoutConfig) -> Self {
        Timeouts {
            indication: Duration::from_millis(config.indication_ms),
            response: Duration::from_millis(config.response_ms),
            byte: Duration::from_millis(config.byte_ms),
        }
    }
}

/// One register bank: `count` addresses from `start_address`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankConfig {
    #[serde(default)]
    pub start_address: u16,
    pub count: usize,
    /// Values for the first addresses; bits are nonzero = on
    #[serde(default)]
    pub initial_values: Vec<u16>,
}

impl BankConfig {
    pub fn new(start_address: u16, count: usize) -> Self {
        Self {
            start_address,
            count,
            initial_values: Vec::new(),
        }
    }

    fn validate(&self, bank: Bank) -> Result<()> {
        if self.count == 0 {
            bail!("{bank}: count must be at least 1");
        }
        if self.start_address as usize + self.count > 0x10000 {
            bail!(
                "{bank}: {} addresses from {} run past 0xFFFF",
                self.count,
                self.start_address
            );
        }
        if self.initial_values.len() > self.count {
            bail!(
                "{bank}: {} initial values for {} addresses",
                self.initial_values.len(),
                self.count
            );
        }
        Ok(())
    }
}

/// `START:COUNT`, e.g. `0:100` or `0x10:8`
impl FromStr for BankConfig {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (start, count) = s
            .split_once(':')
            .ok_or_else(|| anyhow!("expected START:COUNT, got '{s}'"))?;
        let start = parse_u16(start.trim()).with_context(|| format!("bad start in '{s}'"))?;
        let count = count
            .trim()
            .parse::<usize>()
            .with_context(|| format!("bad count in '{s}'"))?;
        Ok(Self::new(start, count))
    }
}

fn parse_u16(s: &str) -> Result<u16> {
    let value = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16)?,
        None => s.parse::<u16>()?,
    };
    Ok(value)
}

/// Banks served by the station; missing banks stay unconfigured
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterLayout {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coils: Option<BankConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discrete_inputs: Option<BankConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub holding_registers: Option<BankConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_registers: Option<BankConfig>,
}

impl RegisterLayout {
    pub fn get(&self, bank: Bank) -> Option<&BankConfig> {
        match bank {
            Bank::Coils => self.coils.as_ref(),
            Bank::DiscreteInputs => self.discrete_inputs.as_ref(),
            Bank::HoldingRegisters => self.holding_registers.as_ref(),
            Bank::InputRegisters => self.input_registers.as_ref(),
        }
    }

    pub fn set(&mut self, bank: Bank, config: BankConfig) {
        let slot = match bank {
            Bank::Coils => &mut self.coils,
            Bank::DiscreteInputs => &mut self.discrete_inputs,
            Bank::HoldingRegisters => &mut self.holding_registers,
            Bank::InputRegisters => &mut self.input_registers,
        };
        *slot = Some(config);
    }

    /// Configured banks in protocol order.
    pub fn banks(&self) -> impl Iterator<Item = (Bank, &BankConfig)> {
        Bank::iter().filter_map(move |bank| self.get(bank).map(|config| (bank, config)))
    }

    /// Configure every listed bank and load its initial values.
    pub fn apply(&self, registers: &mut RegisterMap) -> RtuResult<()> {
        for (bank, config) in self.banks() {
            registers.configure(bank, config.start_address, config.count)?;
            for (offset, &value) in config.initial_values.iter().enumerate() {
                let address = u16::try_from(config.start_address as usize + offset).map_err(|_| {
                    RtuError::IllegalAddress {
                        bank,
                        address: u16::MAX,
                    }
                })?;
                registers.write(bank, address, value)?;
            }
            log::info!(
                "Configured {bank}: {} address(es) from {}",
                config.count,
                config.start_address
            );
        }
        Ok(())
    }
}

/// Complete server configuration, loaded from TOML or JSON
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub port_name: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    #[serde(default)]
    pub parity: Parity,
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    #[serde(default = "default_station_id")]
    pub station_id: u8,
    #[serde(default)]
    pub direction_control: DirectionControl,
    /// Driver-enable settle delay in microseconds
    #[serde(default = "default_turnaround_us")]
    pub turnaround_us: u64,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default = "default_suppression")]
    pub suppression: SuppressionPolicy,
    #[serde(default)]
    pub flush_on_error: bool,
    #[serde(default)]
    pub registers: RegisterLayout,
}

fn default_baud_rate() -> u32 {
    19200
}

fn default_data_bits() -> u8 {
    8
}

fn default_stop_bits() -> u8 {
    1
}

fn default_station_id() -> u8 {
    1
}

fn default_turnaround_us() -> u64 {
    50
}

/// A host polls continuously, so line silence alone must not cost the
/// next request.
fn default_suppression() -> SuppressionPolicy {
    SuppressionPolicy::AfterSlaveMismatch
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: default_baud_rate(),
            data_bits: default_data_bits(),
            parity: Parity::default(),
            stop_bits: default_stop_bits(),
            station_id: default_station_id(),
            direction_control: DirectionControl::default(),
            turnaround_us: default_turnaround_us(),
            timeouts: TimeoutConfig::default(),
            suppression: default_suppression(),
            flush_on_error: false,
            registers: RegisterLayout::default(),
        }
    }
}

impl ServerConfig {
    /// Parse configuration from a JSON string
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str).context("Invalid JSON configuration")
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).context("Invalid TOML configuration")
    }

    /// Read configuration from a file; `.json` files are JSON, anything else TOML
    pub fn from_file(file_path: impl AsRef<Path>) -> Result<Self> {
        let path = file_path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            Self::from_json(&content)
        } else {
            Self::from_toml(&content)
        }
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }

    pub fn validate(&self) -> Result<()> {
        validate_slave_id(self.station_id)?;
        if self.baud_rate == 0 {
            bail!("baud_rate must be positive");
        }
        self.serial_data_bits()?;
        self.serial_stop_bits()?;
        for (bank, config) in self.registers.banks() {
            config.validate(bank)?;
        }
        Ok(())
    }

    pub fn serial_data_bits(&self) -> Result<serialport::DataBits> {
        Ok(match self.data_bits {
            5 => serialport::DataBits::Five,
            6 => serialport::DataBits::Six,
            7 => serialport::DataBits::Seven,
            8 => serialport::DataBits::Eight,
            other => bail!("data_bits must be 5..=8, got {other}"),
        })
    }

    pub fn serial_stop_bits(&self) -> Result<serialport::StopBits> {
        Ok(match self.stop_bits {
            1 => serialport::StopBits::One,
            2 => serialport::StopBits::Two,
            other => bail!("stop_bits must be 1 or 2, got {other}"),
        })
    }

    pub fn turnaround(&self) -> Duration {
        Duration::from_micros(self.turnaround_us)
    }

    pub fn link_options(&self) -> LinkOptions {
        LinkOptions {
            timeouts: self.timeouts.into(),
            suppression: self.suppression,
            flush_on_error: self.flush_on_error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_toml() -> Result<()> {
        let config = ServerConfig::from_toml("")?;
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.baud_rate, 19200);
        assert_eq!(config.turnaround(), Duration::from_micros(50));
        assert_eq!(config.link_options().timeouts, Timeouts::default());
        Ok(())
    }

    #[test]
    fn test_toml_configuration() -> Result<()> {
        let config = ServerConfig::from_toml(
            r#"
port_name = "/dev/ttyUSB0"
baud_rate = 9600
parity = "even"
station_id = 17
direction_control = "none"
suppression = "after_any_miss"
flush_on_error = true

[timeouts]
indication_ms = 1000

[registers.holding_registers]
start_address = 100
count = 4
initial_values = [1, 2]

[registers.coils]
count = 16
"#,
        )?;
        config.validate()?;

        assert_eq!(config.parity, Parity::Even);
        assert_eq!(config.direction_control, DirectionControl::None);
        assert_eq!(config.timeouts.response_ms, 500);

        let options = config.link_options();
        assert_eq!(options.timeouts.indication, Duration::from_secs(1));
        assert_eq!(options.suppression, SuppressionPolicy::AfterAnyMiss);
        assert!(options.flush_on_error);

        let banks: Vec<_> = config.registers.banks().map(|(bank, _)| bank).collect();
        assert_eq!(banks, vec![Bank::Coils, Bank::HoldingRegisters]);
        Ok(())
    }

    #[test]
    fn test_json_configuration() -> Result<()> {
        let config = ServerConfig::from_json(
            r#"{
                "port_name": "COM3",
                "station_id": 2,
                "registers": {
                    "input_registers": { "start_address": 0, "count": 8 }
                }
            }"#,
        )?;
        config.validate()?;
        assert_eq!(config.suppression, SuppressionPolicy::AfterSlaveMismatch);
        assert_eq!(
            config.registers.input_registers,
            Some(BankConfig::new(0, 8))
        );
        Ok(())
    }

    #[test]
    fn test_validation_failures() {
        let mut config = ServerConfig {
            station_id: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        config.station_id = 248;
        assert!(config.validate().is_err());

        config.station_id = 1;
        config.registers.set(Bank::Coils, BankConfig::new(0, 0));
        assert!(config.validate().is_err());

        config.registers.set(Bank::Coils, BankConfig::new(0xFFFF, 2));
        assert!(config.validate().is_err());

        config.registers.set(
            Bank::Coils,
            BankConfig {
                start_address: 0,
                count: 1,
                initial_values: vec![1, 1],
            },
        );
        assert!(config.validate().is_err());

        config.registers.set(Bank::Coils, BankConfig::new(0xFFFF, 1));
        assert!(config.validate().is_ok());

        config.data_bits = 9;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bank_spec_parsing() -> Result<()> {
        assert_eq!("0:100".parse::<BankConfig>()?, BankConfig::new(0, 100));
        assert_eq!("0x10:8".parse::<BankConfig>()?, BankConfig::new(16, 8));
        assert!("100".parse::<BankConfig>().is_err());
        assert!("a:1".parse::<BankConfig>().is_err());
        assert!("1:-1".parse::<BankConfig>().is_err());
        Ok(())
    }

    #[test]
    fn test_layout_apply_loads_initial_values() -> Result<()> {
        let mut layout = RegisterLayout::default();
        layout.set(
            Bank::HoldingRegisters,
            BankConfig {
                start_address: 10,
                count: 3,
                initial_values: vec![7, 8],
            },
        );
        layout.set(
            Bank::DiscreteInputs,
            BankConfig {
                start_address: 0,
                count: 2,
                initial_values: vec![0, 5],
            },
        );

        let mut registers = RegisterMap::new();
        layout.apply(&mut registers)?;
        assert_eq!(registers.holding_registers().values(), &[7, 8, 0]);
        assert_eq!(registers.read(Bank::DiscreteInputs, 1)?, 1);
        assert!(!registers.coils().is_configured());
        Ok(())
    }

    #[test]
    fn test_toml_round_trip() -> Result<()> {
        let mut config = ServerConfig {
            port_name: "/dev/ttyS1".to_string(),
            ..Default::default()
        };
        config.registers.set(Bank::Coils, BankConfig::new(0, 8));
        assert_eq!(ServerConfig::from_toml(&config.to_toml()?)?, config);
        Ok(())
    }
}
