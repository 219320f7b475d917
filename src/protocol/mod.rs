pub mod modbus;
pub mod tty;
