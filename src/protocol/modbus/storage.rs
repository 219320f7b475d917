use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::{ops::Range, sync::Arc};
use strum::{Display, EnumIter};

use super::error::{RtuError, RtuResult};

/// The four data banks addressed by Modbus function codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumIter)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Bank {
    /// Read/write bits
    Coils,
    /// Read-only bits (writable through this API for simulation)
    DiscreteInputs,
    /// Read/write words
    HoldingRegisters,
    /// Read-only words (writable through this API for simulation)
    InputRegisters,
}

impl Bank {
    pub fn is_bit_bank(self) -> bool {
        matches!(self, Bank::Coils | Bank::DiscreteInputs)
    }
}

/// One contiguous, zero-initialised block of values starting at `start_address`.
///
/// A table is either unconfigured (empty) or holds exactly `count` values.
#[derive(Debug, Clone)]
pub struct Table<V> {
    bank: Bank,
    start_address: u16,
    values: Vec<V>,
}

impl<V: Copy + Default> Table<V> {
    pub fn new(bank: Bank) -> Self {
        Self {
            bank,
            start_address: 0,
            values: Vec::new(),
        }
    }

    /// Replace the table with `count` zeroed values starting at `start_address`.
    ///
    /// Argument errors leave the previous contents untouched; an allocation
    /// failure leaves the table unconfigured.
    pub fn configure(&mut self, start_address: u16, count: usize) -> RtuResult<()> {
        if count < 1 {
            return Err(RtuError::InvalidArgument(format!(
                "{} count must be at least 1",
                self.bank
            )));
        }
        if start_address as usize + count > 0x1_0000 {
            return Err(RtuError::InvalidArgument(format!(
                "{} range {start_address}+{count} exceeds the address space",
                self.bank
            )));
        }

        let mut values = Vec::new();
        if values.try_reserve_exact(count).is_err() {
            self.clear();
            return Err(RtuError::AllocationFailure {
                bank: self.bank,
                requested: count,
            });
        }
        values.resize(count, V::default());

        self.start_address = start_address;
        self.values = values;
        log::debug!(
            "Configured {} at {start_address} with {count} entries",
            self.bank
        );
        Ok(())
    }

    /// Release the storage, leaving the table unconfigured.
    pub fn clear(&mut self) {
        self.start_address = 0;
        self.values = Vec::new();
    }

    pub fn bank(&self) -> Bank {
        self.bank
    }

    pub fn start_address(&self) -> u16 {
        self.start_address
    }

    pub fn count(&self) -> usize {
        self.values.len()
    }

    pub fn is_configured(&self) -> bool {
        !self.values.is_empty()
    }

    pub fn values(&self) -> &[V] {
        &self.values
    }

    fn slots(&self, address: u16, quantity: usize) -> RtuResult<Range<usize>> {
        let illegal = RtuError::IllegalAddress {
            bank: self.bank,
            address,
        };
        if address < self.start_address {
            return Err(illegal);
        }
        let offset = (address - self.start_address) as usize;
        match offset.checked_add(quantity) {
            Some(end) if end <= self.values.len() => Ok(offset..end),
            _ => Err(illegal),
        }
    }

    pub fn read(&self, address: u16) -> RtuResult<V> {
        let slot = self.slots(address, 1)?;
        Ok(self.values[slot.start])
    }

    pub fn write(&mut self, address: u16, value: V) -> RtuResult<()> {
        let slot = self.slots(address, 1)?;
        self.values[slot.start] = value;
        Ok(())
    }

    /// Borrow `quantity` consecutive values; the whole block must be in range.
    pub fn read_range(&self, address: u16, quantity: usize) -> RtuResult<&[V]> {
        let slots = self.slots(address, quantity)?;
        Ok(&self.values[slots])
    }

    pub fn write_range(&mut self, address: u16, values: &[V]) -> RtuResult<()> {
        let slots = self.slots(address, values.len())?;
        self.values[slots].copy_from_slice(values);
        Ok(())
    }
}

/// The register map owned by a server: coils, discrete inputs, holding
/// registers and input registers, each independently sized.
#[derive(Debug, Clone)]
pub struct RegisterMap {
    coils: Table<bool>,
    discrete_inputs: Table<bool>,
    holding_registers: Table<u16>,
    input_registers: Table<u16>,
}

impl Default for RegisterMap {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterMap {
    pub fn new() -> Self {
        Self {
            coils: Table::new(Bank::Coils),
            discrete_inputs: Table::new(Bank::DiscreteInputs),
            holding_registers: Table::new(Bank::HoldingRegisters),
            input_registers: Table::new(Bank::InputRegisters),
        }
    }

    pub fn configure(&mut self, bank: Bank, start_address: u16, count: usize) -> RtuResult<()> {
        match bank {
            Bank::Coils => self.coils.configure(start_address, count),
            Bank::DiscreteInputs => self.discrete_inputs.configure(start_address, count),
            Bank::HoldingRegisters => self.holding_registers.configure(start_address, count),
            Bank::InputRegisters => self.input_registers.configure(start_address, count),
        }
    }

    /// Release every bank.
    pub fn clear(&mut self) {
        self.coils.clear();
        self.discrete_inputs.clear();
        self.holding_registers.clear();
        self.input_registers.clear();
    }

    /// Read one value; bits come back as 0 or 1.
    pub fn read(&self, bank: Bank, address: u16) -> RtuResult<u16> {
        match bank {
            Bank::Coils => self.coils.read(address).map(u16::from),
            Bank::DiscreteInputs => self.discrete_inputs.read(address).map(u16::from),
            Bank::HoldingRegisters => self.holding_registers.read(address),
            Bank::InputRegisters => self.input_registers.read(address),
        }
    }

    /// Write one value; for bit banks any non-zero value sets the bit.
    pub fn write(&mut self, bank: Bank, address: u16, value: u16) -> RtuResult<()> {
        match bank {
            Bank::Coils => self.coils.write(address, value != 0),
            Bank::DiscreteInputs => self.discrete_inputs.write(address, value != 0),
            Bank::HoldingRegisters => self.holding_registers.write(address, value),
            Bank::InputRegisters => self.input_registers.write(address, value),
        }
    }

    /// `(value & and_mask) | or_mask` on a holding register.
    pub fn mask_write(&mut self, address: u16, and_mask: u16, or_mask: u16) -> RtuResult<()> {
        let value = self.holding_registers.read(address)?;
        self.holding_registers
            .write(address, (value & and_mask) | or_mask)
    }

    pub fn coils(&self) -> &Table<bool> {
        &self.coils
    }

    pub fn coils_mut(&mut self) -> &mut Table<bool> {
        &mut self.coils
    }

    pub fn discrete_inputs(&self) -> &Table<bool> {
        &self.discrete_inputs
    }

    pub fn discrete_inputs_mut(&mut self) -> &mut Table<bool> {
        &mut self.discrete_inputs
    }

    pub fn holding_registers(&self) -> &Table<u16> {
        &self.holding_registers
    }

    pub fn holding_registers_mut(&mut self) -> &mut Table<u16> {
        &mut self.holding_registers
    }

    pub fn input_registers(&self) -> &Table<u16> {
        &self.input_registers
    }

    pub fn input_registers_mut(&mut self) -> &mut Table<u16> {
        &mut self.input_registers
    }
}

/// Register map shared between the poll loop and other threads. Lock per
/// operation only.
pub type SharedRegisterMap = Arc<Mutex<RegisterMap>>;

pub fn new_shared_register_map() -> SharedRegisterMap {
    Arc::new(Mutex::new(RegisterMap::new()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use strum::IntoEnumIterator;

    #[test]
    fn test_configure_rejects_zero_count() {
        let mut map = RegisterMap::new();
        for bank in Bank::iter() {
            assert!(matches!(
                map.configure(bank, 0, 0),
                Err(RtuError::InvalidArgument(_))
            ));
        }
    }

    #[test]
    fn test_rejected_configure_keeps_previous_values() -> Result<()> {
        let mut map = RegisterMap::new();
        map.configure(Bank::HoldingRegisters, 10, 4)?;
        map.write(Bank::HoldingRegisters, 11, 0xBEEF)?;

        assert!(map.configure(Bank::HoldingRegisters, 10, 0).is_err());
        assert_eq!(map.read(Bank::HoldingRegisters, 11)?, 0xBEEF);
        Ok(())
    }

    #[test]
    fn test_configure_past_address_space() {
        let mut map = RegisterMap::new();
        assert!(map.configure(Bank::Coils, 0xFFFF, 2).is_err());
        assert!(map.configure(Bank::Coils, 0xFFFF, 1).is_ok());
        assert!(map.configure(Bank::InputRegisters, 0, 0x1_0000).is_ok());
    }

    #[test]
    fn test_round_trip_every_address() -> Result<()> {
        let mut map = RegisterMap::new();
        for bank in Bank::iter() {
            map.configure(bank, 100, 16)?;
            for address in 100..116u16 {
                let value = if bank.is_bit_bank() { address % 2 } else { address * 3 };
                map.write(bank, address, value)?;
                assert_eq!(map.read(bank, address)?, value, "{bank} @ {address}");
            }
        }
        Ok(())
    }

    #[test]
    fn test_out_of_range_is_illegal_address() -> Result<()> {
        let mut map = RegisterMap::new();
        for bank in Bank::iter() {
            // Unconfigured bank rejects everything
            assert_eq!(
                map.read(bank, 0),
                Err(RtuError::IllegalAddress { bank, address: 0 })
            );

            map.configure(bank, 20, 5)?;
            for address in [0u16, 19, 25, 26, 0xFFFF] {
                assert_eq!(
                    map.read(bank, address),
                    Err(RtuError::IllegalAddress { bank, address })
                );
                assert_eq!(
                    map.write(bank, address, 1),
                    Err(RtuError::IllegalAddress { bank, address })
                );
            }
        }
        Ok(())
    }

    #[test]
    fn test_reconfigure_zeroes_values() -> Result<()> {
        let mut map = RegisterMap::new();
        map.configure(Bank::Coils, 0, 8)?;
        map.write(Bank::Coils, 3, 1)?;
        map.configure(Bank::Coils, 0, 8)?;
        assert_eq!(map.read(Bank::Coils, 3)?, 0);

        map.configure(Bank::InputRegisters, 0, 4)?;
        map.write(Bank::InputRegisters, 2, 77)?;
        map.configure(Bank::InputRegisters, 2, 10)?;
        assert!(map.input_registers().values().iter().all(|v| *v == 0));
        Ok(())
    }

    #[test]
    fn test_mask_write() -> Result<()> {
        let mut map = RegisterMap::new();
        map.configure(Bank::HoldingRegisters, 0, 2)?;
        map.write(Bank::HoldingRegisters, 1, 0x1234)?;
        map.mask_write(1, 0xFF00, 0x00AA)?;
        assert_eq!(map.read(Bank::HoldingRegisters, 1)?, 0x12AA);

        assert!(matches!(
            map.mask_write(2, 0xFFFF, 0),
            Err(RtuError::IllegalAddress { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_range_access() -> Result<()> {
        let mut map = RegisterMap::new();
        map.configure(Bank::HoldingRegisters, 0x10, 4)?;
        map.holding_registers_mut().write_range(0x11, &[1, 2, 3])?;
        assert_eq!(map.holding_registers().read_range(0x10, 4)?, &[0, 1, 2, 3]);

        // A block that straddles the end is rejected as a whole
        assert!(map.holding_registers().read_range(0x12, 3).is_err());
        assert!(map.holding_registers_mut().write_range(0x0F, &[9, 9]).is_err());
        assert_eq!(map.holding_registers().read(0x10)?, 0);
        Ok(())
    }

    #[test]
    fn test_clear_releases_everything() -> Result<()> {
        let mut map = RegisterMap::new();
        for bank in Bank::iter() {
            map.configure(bank, 0, 3)?;
        }
        map.clear();
        assert!(!map.coils().is_configured());
        assert!(!map.discrete_inputs().is_configured());
        assert_eq!(map.holding_registers().count(), 0);
        assert_eq!(map.input_registers().count(), 0);
        Ok(())
    }
}
