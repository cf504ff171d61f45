// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! System Management Bus emulation.
//!
//! [`SmbusBus`] connects slave devices ([`SmbusDevice`]) at 7-bit addresses
//! and implements the SMBus protocols on top of them. A host controller (see
//! [`pm_smbus`]) owns the bus; other device models get a [`SmbusHandle`] to
//! attach their own slaves, e.g. the SPD EEPROMs of [`eeprom`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod eeprom;
pub mod pm_smbus;

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Weak;
use thiserror::Error;

/// Maximum payload of a block transfer.
pub const SMBUS_BLOCK_MAX: usize = 32;

/// Errors from SMBus operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SmbusError {
    /// No slave answered at the address.
    #[error("no smbus device at address {0:#04x}")]
    NoDevice(u8),
    /// The bus a handle refers to has been torn down.
    #[error("smbus has been removed")]
    BusGone,
    /// A slave is already attached at the address.
    #[error("smbus address {0:#04x} is already in use")]
    AddressInUse(u8),
    /// Addresses are 7 bits.
    #[error("invalid smbus address {0:#04x}")]
    InvalidAddress(u8),
    /// Block transfers carry at most [`SMBUS_BLOCK_MAX`] bytes.
    #[error("block transfer of {0} bytes is too long")]
    BlockTooLong(usize),
    /// More memory modules than SPD addresses.
    #[error("{0} spd modules do not fit on one smbus")]
    TooManySpdModules(usize),
}

/// A slave device on an SMBus.
///
/// Commands arrive as the first byte of a write; `read_data` is called once
/// per byte the host reads after sending `cmd`, with `index` counting from
/// zero.
pub trait SmbusDevice: Send {
    /// Quick command: the R/W bit is the only payload.
    fn quick_command(&mut self, read: bool) {
        let _ = read;
    }

    /// A single byte write with no command.
    fn send_byte(&mut self, data: u8) {
        self.write_data(data, &[]);
    }

    /// A single byte read with no command.
    fn receive_byte(&mut self) -> u8 {
        0xff
    }

    /// A write of `data` following the command byte `cmd`.
    fn write_data(&mut self, cmd: u8, data: &[u8]);

    /// Byte `index` of a read following the command byte `cmd`.
    fn read_data(&mut self, cmd: u8, index: usize) -> u8;
}

/// An SMBus segment and the slaves attached to it.
#[derive(Default)]
pub struct SmbusBus {
    devices: BTreeMap<u8, Box<dyn SmbusDevice>>,
}

impl std::fmt::Debug for SmbusBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmbusBus")
            .field("addresses", &self.devices.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl SmbusBus {
    /// Creates an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a slave at the 7-bit `address`.
    pub fn attach(&mut self, address: u8, device: Box<dyn SmbusDevice>) -> Result<(), SmbusError> {
        if address >= 0x80 {
            return Err(SmbusError::InvalidAddress(address));
        }
        let std::collections::btree_map::Entry::Vacant(entry) = self.devices.entry(address) else {
            return Err(SmbusError::AddressInUse(address));
        };
        tracing::debug!(address, "attached smbus device");
        entry.insert(device);
        Ok(())
    }

    /// Detaches and returns the slave at `address`.
    pub fn detach(&mut self, address: u8) -> Option<Box<dyn SmbusDevice>> {
        self.devices.remove(&address)
    }

    /// Whether a slave answers at `address`.
    pub fn is_attached(&self, address: u8) -> bool {
        self.devices.contains_key(&address)
    }

    fn device(&mut self, address: u8) -> Result<&mut dyn SmbusDevice, SmbusError> {
        match self.devices.get_mut(&address) {
            Some(device) => Ok(&mut **device),
            None => Err(SmbusError::NoDevice(address)),
        }
    }

    /// Quick command.
    pub fn quick_command(&mut self, address: u8, read: bool) -> Result<(), SmbusError> {
        self.device(address)?.quick_command(read);
        Ok(())
    }

    /// Send byte.
    pub fn send_byte(&mut self, address: u8, data: u8) -> Result<(), SmbusError> {
        self.device(address)?.send_byte(data);
        Ok(())
    }

    /// Receive byte.
    pub fn receive_byte(&mut self, address: u8) -> Result<u8, SmbusError> {
        Ok(self.device(address)?.receive_byte())
    }

    /// Write byte data.
    pub fn write_byte_data(&mut self, address: u8, cmd: u8, data: u8) -> Result<(), SmbusError> {
        self.device(address)?.write_data(cmd, &[data]);
        Ok(())
    }

    /// Read byte data.
    pub fn read_byte_data(&mut self, address: u8, cmd: u8) -> Result<u8, SmbusError> {
        Ok(self.device(address)?.read_data(cmd, 0))
    }

    /// Write word data, low byte first.
    pub fn write_word_data(&mut self, address: u8, cmd: u8, data: u16) -> Result<(), SmbusError> {
        self.device(address)?.write_data(cmd, &data.to_le_bytes());
        Ok(())
    }

    /// Read word data, low byte first.
    pub fn read_word_data(&mut self, address: u8, cmd: u8) -> Result<u16, SmbusError> {
        let device = self.device(address)?;
        let lo = device.read_data(cmd, 0);
        let hi = device.read_data(cmd, 1);
        Ok(u16::from_le_bytes([lo, hi]))
    }

    /// Block write: a byte count followed by `data`.
    pub fn write_block_data(&mut self, address: u8, cmd: u8, data: &[u8]) -> Result<(), SmbusError> {
        if data.len() > SMBUS_BLOCK_MAX {
            return Err(SmbusError::BlockTooLong(data.len()));
        }
        let mut buf = Vec::with_capacity(data.len() + 1);
        buf.push(data.len() as u8);
        buf.extend_from_slice(data);
        self.device(address)?.write_data(cmd, &buf);
        Ok(())
    }

    /// Block read: the slave sends a byte count, then that many bytes. The
    /// count is clamped to the size of `data`.
    pub fn read_block_data(
        &mut self,
        address: u8,
        cmd: u8,
        data: &mut [u8; SMBUS_BLOCK_MAX],
    ) -> Result<usize, SmbusError> {
        let device = self.device(address)?;
        let len = (device.read_data(cmd, 0) as usize).min(SMBUS_BLOCK_MAX);
        for (i, b) in data[..len].iter_mut().enumerate() {
            *b = device.read_data(cmd, i + 1);
        }
        Ok(len)
    }
}

/// A shared, non-owning reference to an [`SmbusBus`].
///
/// The host controller that owns the bus hands these out to sibling device
/// models. Once the owner is dropped, every operation fails with
/// [`SmbusError::BusGone`].
#[derive(Debug, Clone)]
pub struct SmbusHandle {
    bus: Weak<Mutex<SmbusBus>>,
}

impl SmbusHandle {
    /// Creates a handle to an owned bus.
    pub fn new(bus: &Arc<Mutex<SmbusBus>>) -> Self {
        Self {
            bus: Arc::downgrade(bus),
        }
    }

    /// Runs `f` with the bus locked.
    pub fn with_bus<R>(&self, f: impl FnOnce(&mut SmbusBus) -> R) -> Result<R, SmbusError> {
        let bus = self.bus.upgrade().ok_or(SmbusError::BusGone)?;
        let mut bus = bus.lock();
        Ok(f(&mut bus))
    }

    /// Attaches a slave at `address`.
    pub fn attach(&self, address: u8, device: Box<dyn SmbusDevice>) -> Result<(), SmbusError> {
        self.with_bus(|bus| bus.attach(address, device))?
    }

    /// Whether the bus still exists.
    pub fn is_alive(&self) -> bool {
        self.bus.strong_count() != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Remembers the last write and echoes `cmd + index` on reads.
    #[derive(Default)]
    struct Probe {
        log: Arc<Mutex<Vec<(u8, Vec<u8>)>>>,
        quick: Arc<Mutex<Option<bool>>>,
    }

    impl SmbusDevice for Probe {
        fn quick_command(&mut self, read: bool) {
            *self.quick.lock() = Some(read);
        }

        fn receive_byte(&mut self) -> u8 {
            0x42
        }

        fn write_data(&mut self, cmd: u8, data: &[u8]) {
            self.log.lock().push((cmd, data.to_vec()));
        }

        fn read_data(&mut self, cmd: u8, index: usize) -> u8 {
            if index == 0 {
                // doubles as the block length
                4
            } else {
                cmd.wrapping_add(index as u8)
            }
        }
    }

    #[test_with_tracing::test]
    fn attach_rules() {
        let mut bus = SmbusBus::new();
        bus.attach(0x50, Box::new(Probe::default())).unwrap();
        assert_eq!(
            bus.attach(0x50, Box::new(Probe::default())),
            Err(SmbusError::AddressInUse(0x50))
        );
        assert_eq!(
            bus.attach(0x80, Box::new(Probe::default())),
            Err(SmbusError::InvalidAddress(0x80))
        );
        assert!(bus.is_attached(0x50));
        assert!(bus.detach(0x50).is_some());
        assert!(!bus.is_attached(0x50));
    }

    #[test_with_tracing::test]
    fn protocols_reach_the_slave() {
        let probe = Probe::default();
        let log = probe.log.clone();
        let quick = probe.quick.clone();

        let mut bus = SmbusBus::new();
        bus.attach(0x10, Box::new(probe)).unwrap();

        bus.quick_command(0x10, true).unwrap();
        assert_eq!(*quick.lock(), Some(true));

        bus.send_byte(0x10, 0x07).unwrap();
        bus.write_byte_data(0x10, 0x01, 0xaa).unwrap();
        bus.write_word_data(0x10, 0x02, 0x1234).unwrap();
        bus.write_block_data(0x10, 0x03, &[1, 2, 3]).unwrap();
        assert_eq!(
            *log.lock(),
            [
                (0x07, vec![]),
                (0x01, vec![0xaa]),
                (0x02, vec![0x34, 0x12]),
                (0x03, vec![3, 1, 2, 3]),
            ]
        );

        assert_eq!(bus.receive_byte(0x10).unwrap(), 0x42);
        assert_eq!(bus.read_byte_data(0x10, 0x20).unwrap(), 4);
        assert_eq!(bus.read_word_data(0x10, 0x20).unwrap(), 0x2104);

        let mut block = [0; SMBUS_BLOCK_MAX];
        assert_eq!(bus.read_block_data(0x10, 0x20, &mut block).unwrap(), 4);
        assert_eq!(block[..4], [0x21, 0x22, 0x23, 0x24]);
    }

    #[test_with_tracing::test]
    fn missing_slave() {
        let mut bus = SmbusBus::new();
        assert_eq!(bus.read_byte_data(0x50, 0), Err(SmbusError::NoDevice(0x50)));
        assert_eq!(bus.quick_command(0x50, false), Err(SmbusError::NoDevice(0x50)));
    }

    #[test_with_tracing::test]
    fn block_write_too_long() {
        let mut bus = SmbusBus::new();
        bus.attach(0x10, Box::new(Probe::default())).unwrap();
        assert_eq!(
            bus.write_block_data(0x10, 0, &[0; 33]),
            Err(SmbusError::BlockTooLong(33))
        );
    }

    #[test_with_tracing::test]
    fn handle_outlives_bus() {
        let bus = Arc::new(Mutex::new(SmbusBus::new()));
        let handle = SmbusHandle::new(&bus);
        handle.attach(0x50, Box::new(Probe::default())).unwrap();
        assert!(bus.lock().is_attached(0x50));
        assert!(handle.is_alive());

        drop(bus);
        assert!(!handle.is_alive());
        assert_eq!(
            handle.attach(0x51, Box::new(Probe::default())),
            Err(SmbusError::BusGone)
        );
    }
}
