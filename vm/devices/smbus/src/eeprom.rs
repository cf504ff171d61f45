// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! 256-byte SMBus EEPROM, as found on memory modules for serial presence
//! detect (SPD).

use crate::SmbusDevice;
use crate::SmbusError;
use crate::SmbusHandle;

/// Size of the EEPROM.
pub const EEPROM_SIZE: usize = 256;

/// SMBus address of the first memory module's SPD EEPROM.
pub const SPD_BASE_ADDRESS: u8 = 0x50;

/// Number of SPD EEPROM addresses (`0x50..0x58`).
pub const MAX_SPD_MODULES: usize = 8;

/// A byte-addressed EEPROM with an auto-incrementing address pointer.
///
/// The part is not write protected.
pub struct SmbusEeprom {
    data: Box<[u8; EEPROM_SIZE]>,
    offset: u8,
}

impl SmbusEeprom {
    /// Creates an EEPROM with the given contents.
    pub fn new(contents: [u8; EEPROM_SIZE]) -> Self {
        Self {
            data: Box::new(contents),
            offset: 0,
        }
    }
}

impl SmbusDevice for SmbusEeprom {
    fn receive_byte(&mut self) -> u8 {
        let value = self.data[self.offset as usize];
        self.offset = self.offset.wrapping_add(1);
        value
    }

    fn write_data(&mut self, cmd: u8, data: &[u8]) {
        self.offset = cmd;
        for &b in data {
            self.data[self.offset as usize] = b;
            self.offset = self.offset.wrapping_add(1);
        }
    }

    fn read_data(&mut self, cmd: u8, index: usize) -> u8 {
        self.offset = cmd.wrapping_add(index as u8);
        self.receive_byte()
    }
}

/// Attaches one SPD EEPROM per entry of `modules` at `0x50`, `0x51`, ...
///
/// At most [`MAX_SPD_MODULES`] modules fit; extra entries are an error.
pub fn attach_spd_eeproms(
    handle: &SmbusHandle,
    modules: &[[u8; EEPROM_SIZE]],
) -> Result<(), SmbusError> {
    if modules.len() > MAX_SPD_MODULES {
        return Err(SmbusError::TooManySpdModules(modules.len()));
    }
    for (i, contents) in modules.iter().enumerate() {
        let address = SPD_BASE_ADDRESS + i as u8;
        handle.attach(address, Box::new(SmbusEeprom::new(*contents)))?;
        tracing::debug!(address, "attached spd eeprom");
    }
    Ok(())
}
