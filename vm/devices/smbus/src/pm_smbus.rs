// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! PIIX4/ICH compatible SMBus host controller.
//!
//! The controller exposes a small port IO register window. The guest loads
//! the slave address, command and data registers, then writes `HST_CNT` with
//! the START bit set to run one transaction on the bus. Transactions complete
//! synchronously, so `HOST_BUSY` is never observed set.

use crate::SMBUS_BLOCK_MAX;
use crate::SmbusBus;
use crate::SmbusError;
use crate::SmbusHandle;
use bitfield_struct::bitfield;
use chipset_device::pio::PortIoRegion;
use parking_lot::Mutex;
use std::sync::Arc;

/// Size of the register window.
pub const PM_SMBUS_IO_LEN: u16 = 64;

/// Register offsets within the window.
#[expect(missing_docs)] // self explanatory constants
pub mod regs {
    pub const HST_STS: u16 = 0x00;
    pub const HST_CNT: u16 = 0x02;
    pub const HST_CMD: u16 = 0x03;
    pub const XMIT_SLVA: u16 = 0x04;
    pub const HST_D0: u16 = 0x05;
    pub const HST_D1: u16 = 0x06;
    pub const HOST_BLOCK_DB: u16 = 0x07;
}

/// Host status register (`HST_STS`).
#[bitfield(u8)]
#[derive(PartialEq, Eq)]
pub struct HostStatus {
    /// A transaction is in progress.
    pub host_busy: bool,
    /// The last transaction completed successfully.
    pub intr: bool,
    /// The last transaction failed: no slave acknowledged, or the
    /// protocol is not supported.
    pub dev_err: bool,
    /// Bus collision.
    pub bus_err: bool,
    /// The transaction was killed.
    pub failed: bool,
    /// SMBALERT# asserted.
    pub smbalert: bool,
    /// Host semaphore.
    pub inuse: bool,
    /// A byte of a block transfer has been sent or received.
    pub byte_done: bool,
}

/// Host control register (`HST_CNT`).
#[bitfield(u8)]
pub struct HostControl {
    /// Interrupt on completion.
    pub intr_en: bool,
    /// Abort the current transaction.
    pub kill: bool,
    /// Transaction type.
    #[bits(3)]
    pub protocol: Protocol,
    /// The next byte read is the last of a block.
    pub last_byte: bool,
    /// Write 1 to run a transaction.
    pub start: bool,
    /// Append a packet error code.
    pub pec_en: bool,
}

/// Transaction type selected by `HST_CNT` bits 2..4.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Protocol {
    /// Quick command.
    Quick,
    /// Send/receive byte.
    Byte,
    /// Read/write byte data.
    ByteData,
    /// Read/write word data.
    WordData,
    /// Read/write block data.
    BlockData,
    /// Any encoding the controller doesn't implement.
    Unsupported(u8),
}

impl Protocol {
    const fn from_bits(bits: u8) -> Self {
        match bits {
            0 => Self::Quick,
            1 => Self::Byte,
            2 => Self::ByteData,
            3 => Self::WordData,
            5 => Self::BlockData,
            n => Self::Unsupported(n),
        }
    }

    const fn into_bits(self) -> u8 {
        match self {
            Self::Quick => 0,
            Self::Byte => 1,
            Self::ByteData => 2,
            Self::WordData => 3,
            Self::BlockData => 5,
            Self::Unsupported(n) => n,
        }
    }
}

#[derive(Debug, Default)]
struct Registers {
    status: HostStatus,
    control: HostControl,
    command: u8,
    address: u8,
    data0: u8,
    data1: u8,
    block: [u8; SMBUS_BLOCK_MAX],
    index: usize,
}

impl Registers {
    fn next_index(&mut self) -> usize {
        let index = self.index;
        self.index = (self.index + 1) % SMBUS_BLOCK_MAX;
        index
    }
}

/// The SMBus host controller and the bus it owns.
#[derive(Debug)]
pub struct PmSmbus {
    // Runtime glue
    io: PortIoRegion,
    bus: Arc<Mutex<SmbusBus>>,

    // Volatile state
    regs: Registers,
}

impl Default for PmSmbus {
    fn default() -> Self {
        Self::new()
    }
}

impl PmSmbus {
    /// Creates a controller with an empty bus and a hidden register window.
    pub fn new() -> Self {
        Self {
            io: PortIoRegion::new("smbus", PM_SMBUS_IO_LEN),
            bus: Arc::new(Mutex::new(SmbusBus::new())),
            regs: Registers::default(),
        }
    }

    /// Resets the registers and hides the register window. Attached slaves
    /// stay attached.
    pub fn reset(&mut self) {
        self.regs = Registers::default();
        self.io.set_enabled(false);
    }

    /// The register window.
    pub fn io(&self) -> &PortIoRegion {
        &self.io
    }

    /// The register window, mutably.
    pub fn io_mut(&mut self) -> &mut PortIoRegion {
        &mut self.io
    }

    /// A handle to the bus, for attaching slaves.
    pub fn handle(&self) -> SmbusHandle {
        SmbusHandle::new(&self.bus)
    }

    /// Reads registers starting at `offset`, one byte at a time.
    pub fn read(&mut self, offset: u16, data: &mut [u8]) {
        for (i, b) in data.iter_mut().enumerate() {
            *b = self.read_reg(offset + i as u16);
        }
    }

    /// Writes registers starting at `offset`, one byte at a time.
    pub fn write(&mut self, offset: u16, data: &[u8]) {
        for (i, &b) in data.iter().enumerate() {
            self.write_reg(offset + i as u16, b);
        }
    }

    fn read_reg(&mut self, offset: u16) -> u8 {
        let value = match offset {
            regs::HST_STS => self.regs.status.into_bits(),
            regs::HST_CNT => {
                self.regs.index = 0;
                self.regs.control.into_bits() & 0x1f
            }
            regs::HST_CMD => self.regs.command,
            regs::XMIT_SLVA => self.regs.address,
            regs::HST_D0 => self.regs.data0,
            regs::HST_D1 => self.regs.data1,
            regs::HOST_BLOCK_DB => {
                let index = self.regs.next_index();
                self.regs.block[index]
            }
            _ => {
                tracing::debug!(offset, "read from unimplemented smbus register");
                0xff
            }
        };
        tracing::trace!(offset, value, "smbus register read");
        value
    }

    fn write_reg(&mut self, offset: u16, value: u8) {
        tracing::trace!(offset, value, "smbus register write");
        match offset {
            regs::HST_STS => {
                self.regs.status = HostStatus::new();
                self.regs.index = 0;
            }
            regs::HST_CNT => {
                self.regs.control = HostControl::from_bits(value);
                if self.regs.control.start() {
                    self.transaction();
                }
            }
            regs::HST_CMD => self.regs.command = value,
            regs::XMIT_SLVA => self.regs.address = value,
            regs::HST_D0 => self.regs.data0 = value,
            regs::HST_D1 => self.regs.data1 = value,
            regs::HOST_BLOCK_DB => {
                let index = self.regs.next_index();
                self.regs.block[index] = value;
            }
            _ => tracing::debug!(offset, value, "write to unimplemented smbus register"),
        }
    }

    fn transaction(&mut self) {
        let protocol = self.regs.control.protocol();
        let read = self.regs.address & 1 != 0;
        let address = self.regs.address >> 1;
        let cmd = self.regs.command;

        let result = self.run(protocol, address, read, cmd);
        match result {
            Ok(()) => {
                self.regs.status.set_intr(true);
                if protocol == Protocol::Quick {
                    self.regs.status.set_byte_done(true);
                }
            }
            Err(err) => {
                tracing::debug!(
                    ?protocol,
                    address,
                    read,
                    cmd,
                    error = &err as &dyn std::error::Error,
                    "smbus transaction failed"
                );
                self.regs.status.set_dev_err(true);
            }
        }
    }

    fn run(
        &mut self,
        protocol: Protocol,
        address: u8,
        read: bool,
        cmd: u8,
    ) -> Result<(), TransactionError> {
        let mut bus = self.bus.lock();
        let regs = &mut self.regs;
        match (protocol, read) {
            (Protocol::Quick, _) => bus.quick_command(address, read)?,
            (Protocol::Byte, true) => regs.data0 = bus.receive_byte(address)?,
            (Protocol::Byte, false) => bus.send_byte(address, cmd)?,
            (Protocol::ByteData, true) => regs.data0 = bus.read_byte_data(address, cmd)?,
            (Protocol::ByteData, false) => bus.write_byte_data(address, cmd, regs.data0)?,
            (Protocol::WordData, true) => {
                [regs.data0, regs.data1] = bus.read_word_data(address, cmd)?.to_le_bytes();
            }
            (Protocol::WordData, false) => {
                let data = u16::from_le_bytes([regs.data0, regs.data1]);
                bus.write_word_data(address, cmd, data)?
            }
            (Protocol::BlockData, true) => {
                regs.data0 = bus.read_block_data(address, cmd, &mut regs.block)? as u8;
            }
            (Protocol::BlockData, false) => {
                let len = (regs.data0 as usize).min(SMBUS_BLOCK_MAX);
                bus.write_block_data(address, cmd, &regs.block[..len])?
            }
            (Protocol::Unsupported(n), _) => return Err(TransactionError::Protocol(n)),
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
enum TransactionError {
    #[error(transparent)]
    Bus(#[from] SmbusError),
    #[error("unsupported protocol {0}")]
    Protocol(u8),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eeprom::SmbusEeprom;

    const START: u8 = 0x40;

    fn control(protocol: Protocol) -> u8 {
        HostControl::new()
            .with_protocol(protocol)
            .with_start(true)
            .into_bits()
    }

    fn eeprom_contents() -> [u8; 256] {
        std::array::from_fn(|i| i as u8)
    }

    fn controller_with_eeprom() -> PmSmbus {
        let smbus = PmSmbus::new();
        smbus
            .handle()
            .attach(0x50, Box::new(SmbusEeprom::new(eeprom_contents())))
            .unwrap();
        smbus
    }

    fn read_reg(smbus: &mut PmSmbus, offset: u16) -> u8 {
        let mut data = [0];
        smbus.read(offset, &mut data);
        data[0]
    }

    #[test_with_tracing::test]
    fn control_encoding() {
        assert_eq!(control(Protocol::ByteData), START | 0x08);
        assert_eq!(control(Protocol::BlockData), START | 0x14);
        assert_eq!(
            HostControl::from_bits(START | 0x10).protocol(),
            Protocol::Unsupported(4)
        );
    }

    #[test_with_tracing::test]
    fn read_byte_data() {
        let mut smbus = controller_with_eeprom();
        smbus.write(regs::XMIT_SLVA, &[(0x50 << 1) | 1]);
        smbus.write(regs::HST_CMD, &[0x12]);
        smbus.write(regs::HST_CNT, &[control(Protocol::ByteData)]);

        let status = HostStatus::from_bits(read_reg(&mut smbus, regs::HST_STS));
        assert!(status.intr());
        assert!(!status.dev_err());
        assert_eq!(read_reg(&mut smbus, regs::HST_D0), 0x12);
    }

    #[test_with_tracing::test]
    fn write_then_read_word_data() {
        let mut smbus = controller_with_eeprom();
        smbus.write(regs::XMIT_SLVA, &[0x50 << 1]);
        smbus.write(regs::HST_CMD, &[0x80]);
        smbus.write(regs::HST_D0, &[0xcd, 0xab]);
        smbus.write(regs::HST_CNT, &[control(Protocol::WordData)]);
        smbus.write(regs::HST_STS, &[0xff]);

        smbus.write(regs::HST_D0, &[0, 0]);
        smbus.write(regs::XMIT_SLVA, &[(0x50 << 1) | 1]);
        smbus.write(regs::HST_CNT, &[control(Protocol::WordData)]);
        let mut data = [0; 2];
        smbus.read(regs::HST_D0, &mut data);
        assert_eq!(data, [0xcd, 0xab]);
    }

    #[test_with_tracing::test]
    fn quick_command_sets_byte_done() {
        let mut smbus = controller_with_eeprom();
        smbus.write(regs::XMIT_SLVA, &[0x50 << 1]);
        smbus.write(regs::HST_CNT, &[control(Protocol::Quick)]);
        let status = HostStatus::from_bits(read_reg(&mut smbus, regs::HST_STS));
        assert!(status.intr());
        assert!(status.byte_done());
    }

    #[test_with_tracing::test]
    fn missing_slave_sets_dev_err() {
        let mut smbus = controller_with_eeprom();
        smbus.write(regs::XMIT_SLVA, &[(0x51 << 1) | 1]);
        smbus.write(regs::HST_CNT, &[control(Protocol::ByteData)]);
        let status = HostStatus::from_bits(read_reg(&mut smbus, regs::HST_STS));
        assert!(status.dev_err());
        assert!(!status.intr());

        // any write to HST_STS clears it
        smbus.write(regs::HST_STS, &[0]);
        assert_eq!(read_reg(&mut smbus, regs::HST_STS), 0);
    }

    #[test_with_tracing::test]
    fn unsupported_protocol_sets_dev_err() {
        let mut smbus = controller_with_eeprom();
        smbus.write(regs::XMIT_SLVA, &[(0x50 << 1) | 1]);
        smbus.write(regs::HST_CNT, &[START | (4 << 2)]);
        let status = HostStatus::from_bits(read_reg(&mut smbus, regs::HST_STS));
        assert!(status.dev_err());
    }

    #[test_with_tracing::test]
    fn control_reads_low_bits_only() {
        let mut smbus = controller_with_eeprom();
        smbus.write(regs::HST_CNT, &[0x88]);
        assert_eq!(read_reg(&mut smbus, regs::HST_CNT), 0x08);
    }

    #[test_with_tracing::test]
    fn block_buffer_index_wraps() {
        let mut smbus = PmSmbus::new();
        for i in 0..=SMBUS_BLOCK_MAX as u8 {
            smbus.write(regs::HOST_BLOCK_DB, &[i]);
        }
        // the 33rd write landed back in slot 0; reading HST_CNT rewinds
        let _ = read_reg(&mut smbus, regs::HST_CNT);
        assert_eq!(read_reg(&mut smbus, regs::HOST_BLOCK_DB), 32);
        assert_eq!(read_reg(&mut smbus, regs::HOST_BLOCK_DB), 1);
    }

    #[test_with_tracing::test]
    fn block_read_from_eeprom() {
        let mut smbus = controller_with_eeprom();
        smbus.write(regs::XMIT_SLVA, &[(0x50 << 1) | 1]);
        // byte 4 of the eeprom is the block count
        smbus.write(regs::HST_CMD, &[4]);
        smbus.write(regs::HST_CNT, &[control(Protocol::BlockData)]);
        assert_eq!(read_reg(&mut smbus, regs::HST_D0), 4);

        let _ = read_reg(&mut smbus, regs::HST_CNT);
        let block: Vec<u8> = (0..4)
            .map(|_| read_reg(&mut smbus, regs::HOST_BLOCK_DB))
            .collect();
        assert_eq!(block, [5, 6, 7, 8]);
    }

    #[test_with_tracing::test]
    fn unknown_offsets() {
        let mut smbus = PmSmbus::new();
        smbus.write(0x01, &[0x12]);
        smbus.write(0x3f, &[0x34]);
        assert_eq!(read_reg(&mut smbus, 0x01), 0xff);
        assert_eq!(read_reg(&mut smbus, 0x3f), 0xff);
    }

    #[test_with_tracing::test]
    fn reset_hides_window_and_keeps_slaves() {
        let mut smbus = controller_with_eeprom();
        smbus.io_mut().set_enabled(true);
        smbus.write(regs::HST_CMD, &[0x55]);
        smbus.reset();
        assert!(!smbus.io().is_enabled());
        assert_eq!(read_reg(&mut smbus, regs::HST_CMD), 0);
        assert!(smbus.handle().with_bus(|bus| bus.is_attached(0x50)).unwrap());
    }
}
