fn main() -> anyhow::Result<()> {
    env_logger::init();
    let matches = modbus_rtu_server::cli::parse_args();
    modbus_rtu_server::cli::run(&matches)
}
