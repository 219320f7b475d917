mod runner;
mod server;

pub use runner::ServerHandle;
pub use server::{ModbusRtuServer, ServedRequest};
