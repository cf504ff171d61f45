// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Intel ICH9 south bridge device models.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod ich9_smbus;

use ich9_smbus::AttachError;
use pci_bus::DevFn;
use pci_bus::PciBus;
use pci_bus::registry::DeviceTypeRegistry;
use smbus::SmbusHandle;
use smbus::eeprom::EEPROM_SIZE;

/// Registers the ICH9 device types. Call once at startup.
pub fn register(registry: &mut DeviceTypeRegistry) {
    registry.register(&ich9_smbus::ICH9_SMB_TYPE);
}

/// How to wire up the ICH9 SMBus controller.
#[derive(Debug, Clone)]
pub struct Ich9SmbusConfig {
    /// Slot on the root bus.
    pub devfn: DevFn,
    /// Suggested IO base for the register window. Unused: firmware
    /// programs `SMB_BASE`.
    pub io_base: u16,
    /// SPD EEPROM contents, one per memory module, attached at `0x50` and up.
    pub spd: Vec<[u8; EEPROM_SIZE]>,
}

impl Default for Ich9SmbusConfig {
    /// Q35 placement, no memory modules.
    fn default() -> Self {
        Self {
            devfn: ich9_smbus::ICH9_SMB_DEVFN,
            io_base: ich9_smbus::ICH9_SMB_DEFAULT_IO_BASE,
            spd: Vec::new(),
        }
    }
}

impl Ich9SmbusConfig {
    /// Creates the controller on `bus` and attaches the configured SPD
    /// EEPROMs to its SMBus.
    pub fn build(
        &self,
        registry: &DeviceTypeRegistry,
        bus: &mut PciBus,
    ) -> Result<SmbusHandle, AttachError> {
        let handle = ich9_smbus::create_and_attach(registry, bus, self.devfn, self.io_base)?;
        smbus::eeprom::attach_spd_eeproms(&handle, &self.spd)?;
        tracing::debug!(
            devfn = %self.devfn,
            modules = self.spd.len(),
            "ich9 smbus ready"
        );
        Ok(handle)
    }
}
