//! Modbus RTU slave engine for half-duplex serial lines.
//!
//! The protocol core lives in [`protocol::modbus`]: CRC16, RTU framing,
//! slave filtering with confirmation suppression, the register map and the
//! reply dispatcher. [`protocol::tty`] provides the transports (an in-memory
//! line for simulation and an RS-485 adapter over a host serial port), and
//! [`api::modbus::ModbusRtuServer`] ties them together behind a
//! `begin`/`poll`/`end` interface.

pub mod api;
#[doc(hidden)]
pub mod cli;
pub mod protocol;
#[doc(hidden)]
pub mod utils;

pub use api::*;
