use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::protocol::{
    modbus::{
        new_shared_register_map, validate_slave_id, Bank, ConfirmationState, LinkOptions,
        MappingDispatcher, ReplyDispatcher, RtuContext, RtuError, RtuResult, SharedRegisterMap,
    },
    tty::Transport,
};

/// One request answered (or executed, for broadcasts) by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServedRequest {
    pub station_id: u8,
    pub function: u8,
    pub broadcast: bool,
    pub request: Vec<u8>,
    /// Reply as written to the line, checksum included
    pub response: Option<Vec<u8>>,
    pub timestamp: DateTime<Local>,
}

/// Modbus RTU slave bound to one transport.
///
/// The register map is shared: clones of [`ModbusRtuServer::registers`] can
/// be used from other threads while the server polls.
pub struct ModbusRtuServer<T: Transport> {
    transport: Option<T>,
    context: Option<RtuContext<T>>,
    registers: SharedRegisterMap,
    dispatcher: Box<dyn ReplyDispatcher>,
    options: LinkOptions,
}

impl<T: Transport> ModbusRtuServer<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport: Some(transport),
            context: None,
            registers: new_shared_register_map(),
            dispatcher: Box::new(MappingDispatcher::new()),
            options: LinkOptions::default(),
        }
    }

    /// Takes effect on the next `begin`.
    pub fn with_options(mut self, options: LinkOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_dispatcher(mut self, dispatcher: impl ReplyDispatcher + 'static) -> Self {
        self.dispatcher = Box::new(dispatcher);
        self
    }

    /// Start answering as `station_id`. Any running session is ended first,
    /// which also releases the register banks.
    pub fn begin(&mut self, station_id: u8) -> RtuResult<()> {
        self.end();
        validate_slave_id(station_id)?;

        let transport = self.transport.take().ok_or(RtuError::NotStarted)?;
        let mut context = RtuContext::new(transport, station_id, self.options)?;
        context.connect();
        self.context = Some(context);

        log::info!("Modbus RTU server started as station {station_id}");
        Ok(())
    }

    /// Stop answering and release every register bank. Safe to call twice.
    pub fn end(&mut self) {
        if let Some(context) = self.context.take() {
            log::info!("Modbus RTU server station {} stopped", context.slave());
            self.transport = Some(context.close());
        }
        self.registers.lock().clear();
    }

    pub fn is_started(&self) -> bool {
        self.context.is_some()
    }

    pub fn station_id(&self) -> Option<u8> {
        self.context.as_ref().map(|context| context.slave())
    }

    pub fn confirmation_state(&self) -> Option<ConfirmationState> {
        self.context.as_ref().map(|context| context.state())
    }

    pub fn registers(&self) -> SharedRegisterMap {
        self.registers.clone()
    }

    /// One protocol cycle. Returns the served request, if any.
    ///
    /// The register map is locked only while the dispatcher runs.
    pub fn poll(&mut self) -> RtuResult<Option<ServedRequest>> {
        let context = self.context.as_mut().ok_or(RtuError::NotStarted)?;
        let Some(request) = context.poll() else {
            return Ok(None);
        };

        let reply = {
            let mut registers = self.registers.lock();
            self.dispatcher.reply(&request, &mut registers)
        };

        let response = match reply {
            Some(mut frame) => {
                context.send(&mut frame)?;
                Some(frame)
            }
            None => None,
        };

        Ok(Some(ServedRequest {
            station_id: context.slave(),
            function: request.function(),
            broadcast: request.is_broadcast(),
            request: request.adu().to_vec(),
            response,
            timestamp: Local::now(),
        }))
    }

    pub fn configure(&self, bank: Bank, start_address: u16, count: usize) -> RtuResult<()> {
        self.registers.lock().configure(bank, start_address, count)
    }

    pub fn configure_coils(&self, start_address: u16, count: usize) -> RtuResult<()> {
        self.configure(Bank::Coils, start_address, count)
    }

    pub fn configure_discrete_inputs(&self, start_address: u16, count: usize) -> RtuResult<()> {
        self.configure(Bank::DiscreteInputs, start_address, count)
    }

    pub fn configure_holding_registers(&self, start_address: u16, count: usize) -> RtuResult<()> {
        self.configure(Bank::HoldingRegisters, start_address, count)
    }

    pub fn configure_input_registers(&self, start_address: u16, count: usize) -> RtuResult<()> {
        self.configure(Bank::InputRegisters, start_address, count)
    }

    pub fn coil_read(&self, address: u16) -> RtuResult<bool> {
        self.registers.lock().coils().read(address)
    }

    pub fn coil_write(&self, address: u16, value: bool) -> RtuResult<()> {
        self.registers.lock().coils_mut().write(address, value)
    }

    pub fn discrete_input_read(&self, address: u16) -> RtuResult<bool> {
        self.registers.lock().discrete_inputs().read(address)
    }

    pub fn discrete_input_write(&self, address: u16, value: bool) -> RtuResult<()> {
        self.registers.lock().discrete_inputs_mut().write(address, value)
    }

    pub fn holding_register_read(&self, address: u16) -> RtuResult<u16> {
        self.registers.lock().holding_registers().read(address)
    }

    pub fn holding_register_write(&self, address: u16, value: u16) -> RtuResult<()> {
        self.registers
            .lock()
            .holding_registers_mut()
            .write(address, value)
    }

    pub fn input_register_read(&self, address: u16) -> RtuResult<u16> {
        self.registers.lock().input_registers().read(address)
    }

    pub fn input_register_write(&self, address: u16, value: u16) -> RtuResult<()> {
        self.registers.lock().input_registers_mut().write(address, value)
    }

    pub fn register_mask_write(&self, address: u16, and_mask: u16, or_mask: u16) -> RtuResult<()> {
        self.registers.lock().mask_write(address, and_mask, or_mask)
    }
}

impl<T: Transport> Drop for ModbusRtuServer<T> {
    fn drop(&mut self) {
        if let Some(context) = self.context.take() {
            context.close();
        }
    }
}
