// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! ICH9 (PCI device 31 function 3) - SMBus controller
//!
//! See section 18 (SMBus Controller Registers) in the ICH9 data sheet.

use bitfield_struct::bitfield;
use chipset_device::ChipsetDevice;
use chipset_device::io::IoResult;
use chipset_device::pio::PortIoIntercept;
use pci_bus::DevFn;
use pci_bus::PciBus;
use pci_bus::PciBusError;
use pci_bus::registry::DeviceTypeRegistry;
use pci_core::DeviceTypeDescriptor;
use pci_core::DeviceTypeInfo;
use pci_core::PciFunction;
use pci_core::PciInterruptPin;
use pci_core::cfg_space_emu::BarKind;
use pci_core::cfg_space_emu::ConfigSpace;
use pci_core::range_covers_byte;
use pci_core::spec::hwid::ClassCode;
use pci_core::spec::hwid::HardwareIds;
use pci_core::spec::hwid::ProgrammingInterface;
use pci_core::spec::hwid::Subclass;
use smbus::SmbusHandle;
use smbus::pm_smbus::PmSmbus;
use thiserror::Error;

/// Registered type name.
pub const ICH9_SMB_TYPE_NAME: &str = "ICH9 SMB";

/// Where the controller lives on a Q35 machine.
pub const ICH9_SMB_DEVFN: DevFn = DevFn::new(31, 3);

/// Conventional IO base for the register window.
pub const ICH9_SMB_DEFAULT_IO_BASE: u16 = 0xb100;

/// `SMB_BASE`, the IO BAR the register window is decoded through.
pub const SMB_BASE_BAR: u8 = 4;

/// Host configuration register offset.
pub const ICH9_SMB_HOSTC: u16 = 0x40;

const ICH9_SMB_IDS: HardwareIds = HardwareIds {
    vendor_id: 0x8086,
    device_id: 0x2930,
    // A2 stepping
    revision_id: 0x02,
    prog_if: ProgrammingInterface::NONE,
    sub_class: Subclass::SERIAL_BUS_SMBUS,
    base_class: ClassCode::SERIAL_BUS_CONTROLLER,
    type0_sub_vendor_id: 0,
    type0_sub_system_id: 0,
};

/// Type descriptor for the ICH9 SMBus controller.
///
/// The controller only makes sense as part of the ICH9 south bridge, so it
/// can't be created standalone.
pub static ICH9_SMB_TYPE: DeviceTypeDescriptor = DeviceTypeDescriptor {
    info: DeviceTypeInfo {
        name: ICH9_SMB_TYPE_NAME,
        description: "ICH9 SMBUS Bridge",
        hardware_ids: ICH9_SMB_IDS,
        user_creatable: false,
    },
    instantiate,
};

fn instantiate() -> Box<dyn PciFunction> {
    Box::new(Ich9Smbus::new())
}

/// HOSTC: host configuration register.
#[bitfield(u8)]
pub struct HostConfig {
    /// SMBus host enable.
    pub hst_en: bool,
    /// Route SMBus interrupts to SMI# instead of INTx.
    pub smb_smi_en: bool,
    /// I2C mode: the controller talks I2C rather than SMBus.
    pub i2c_en: bool,
    /// Soft SMBus reset.
    pub ssreset: bool,
    #[bits(4)]
    _reserved: u8,
}

impl HostConfig {
    /// The register window responds only with the host enabled, and only in
    /// SMBus mode.
    pub fn io_visible(&self) -> bool {
        self.hst_en() && !self.i2c_en()
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Lifecycle {
    Uninitialized,
    Active,
}

/// ICH9 SMBus controller (PCI device 31 function 3).
#[derive(Debug)]
pub struct Ich9Smbus {
    // Sub-emulators
    cfg_space: ConfigSpace,
    smb: PmSmbus,

    // Volatile state
    lifecycle: Lifecycle,

    #[cfg(test)]
    visibility_updates: usize,
}

impl Default for Ich9Smbus {
    fn default() -> Self {
        Self::new()
    }
}

impl Ich9Smbus {
    /// Creates an uninitialized controller. Call
    /// [`PciFunction::initialize`] before use.
    pub fn new() -> Self {
        Self {
            cfg_space: ConfigSpace::new(ICH9_SMB_IDS),
            smb: PmSmbus::new(),
            lifecycle: Lifecycle::Uninitialized,
            #[cfg(test)]
            visibility_updates: 0,
        }
    }

    /// A handle to the SMBus the controller drives.
    pub fn smbus_handle(&self) -> SmbusHandle {
        self.smb.handle()
    }

    /// The current HOSTC value.
    pub fn host_config(&self) -> HostConfig {
        HostConfig::from_bits(self.cfg_space.byte(ICH9_SMB_HOSTC))
    }

    /// Whether the SMBus register window currently responds to IO.
    pub fn io_region_visible(&self) -> bool {
        self.smb.io().is_enabled()
    }

    /// System reset: guest-programmed header state, HOSTC and the controller
    /// registers return to their initial values.
    pub fn reset(&mut self) {
        self.cfg_space.reset();
        self.cfg_space.set_byte(ICH9_SMB_HOSTC, 0);
        self.smb.reset();
        self.update_io_visibility();
    }

    fn update_io_visibility(&mut self) {
        #[cfg(test)]
        {
            self.visibility_updates += 1;
        }
        let hostc = self.host_config();
        let visible = self.lifecycle == Lifecycle::Active && hostc.io_visible();
        if visible != self.smb.io().is_enabled() {
            tracing::trace!(
                region = self.smb.io().region_name(),
                visible,
                hostc = hostc.into_bits(),
                "io region visibility"
            );
        }
        self.smb.io_mut().set_enabled(visible);
    }

    fn smb_offset(&self, io_port: u16, len: usize) -> Option<u16> {
        let base = self.cfg_space.io_bar_base(SMB_BASE_BAR)?;
        self.smb.io().offset_of(base, io_port, len)
    }
}

impl ChipsetDevice for Ich9Smbus {
    fn supports_pio(&mut self) -> Option<&mut dyn PortIoIntercept> {
        Some(self)
    }
}

impl PortIoIntercept for Ich9Smbus {
    fn io_read(&mut self, io_port: u16, data: &mut [u8]) -> Option<IoResult> {
        let offset = self.smb_offset(io_port, data.len())?;
        self.smb.read(offset, data);
        Some(IoResult::Ok)
    }

    fn io_write(&mut self, io_port: u16, data: &[u8]) -> Option<IoResult> {
        let offset = self.smb_offset(io_port, data.len())?;
        self.smb.write(offset, data);
        Some(IoResult::Ok)
    }
}

impl PciFunction for Ich9Smbus {
    fn metadata(&self) -> &'static DeviceTypeInfo {
        &ICH9_SMB_TYPE.info
    }

    fn initialize(&mut self) {
        assert_eq!(
            self.lifecycle,
            Lifecycle::Uninitialized,
            "ich9 smbus initialized twice"
        );

        // TODO: D31IP.SMIP in chipset configuration space selects the pin.
        self.cfg_space.set_interrupt_pin(PciInterruptPin::IntA);
        self.cfg_space.set_byte(ICH9_SMB_HOSTC, 0);

        // TODO: SMBMBAR0/1 (BARs 0 and 1) are 64-bit memory BARs.
        self.smb.reset();
        let len = self.smb.io().len();
        self.cfg_space
            .register_bar(SMB_BASE_BAR, BarKind::Io, len.into());

        self.lifecycle = Lifecycle::Active;
    }

    fn config_space(&self) -> &ConfigSpace {
        &self.cfg_space
    }

    fn config_space_mut(&mut self) -> &mut ConfigSpace {
        &mut self.cfg_space
    }

    fn write_config(&mut self, offset: u16, data: &[u8]) -> IoResult {
        self.cfg_space.default_write(offset, data);
        if range_covers_byte(offset, data.len(), ICH9_SMB_HOSTC) {
            self.update_io_visibility();
        }
        IoResult::Ok
    }
}

/// Errors from [`create_and_attach`].
#[derive(Debug, Error)]
pub enum AttachError {
    /// [`crate::register`] was never called on the registry.
    #[error("pci device type {0:?} is not registered")]
    UnknownType(&'static str),
    /// The function could not be attached to the bus.
    #[error("failed to attach ich9 smbus")]
    Bus(#[from] PciBusError),
    /// A configured SMBus slave could not be attached.
    #[error("failed to attach smbus device")]
    Smbus(#[from] smbus::SmbusError),
}

/// Creates an initialized ICH9 SMBus controller at `devfn` on `bus`, as a
/// function of a multi-function device, and returns the handle to its SMBus.
///
/// `io_base` is ignored: the register window is placed by whoever programs
/// `SMB_BASE` (firmware or the guest).
pub fn create_and_attach(
    registry: &DeviceTypeRegistry,
    bus: &mut PciBus,
    devfn: DevFn,
    _io_base: u16,
) -> Result<SmbusHandle, AttachError> {
    if registry.get(ICH9_SMB_TYPE_NAME).is_none() {
        return Err(AttachError::UnknownType(ICH9_SMB_TYPE_NAME));
    }

    let mut dev = Ich9Smbus::new();
    dev.initialize();
    let handle = dev.smbus_handle();
    bus.add_function(devfn, true, Box::new(dev))?;
    Ok(handle)
}

mod save_restore {
    use super::*;
    use vmcore::save_restore::RestoreError;
    use vmcore::save_restore::SaveError;
    use vmcore::save_restore::SaveRestore;
    use vmcore::save_restore::SavedStateBlob;

    mod state {
        use pci_core::cfg_space_emu::ConfigSpace;
        use serde::Deserialize;
        use serde::Serialize;
        use vmcore::save_restore::SaveRestore;
        use vmcore::save_restore::SavedStateRoot;

        /// Only the config space is saved. The SMBus controller registers
        /// start over from reset.
        #[derive(Debug, Serialize, Deserialize)]
        pub struct SavedState {
            pub cfg_space: <ConfigSpace as SaveRestore>::SavedState,
        }

        impl SavedStateRoot for SavedState {
            const PACKAGE: &'static str = "chipset.ich9.smb";
            const VERSION: u32 = 1;
        }
    }

    impl SaveRestore for Ich9Smbus {
        type SavedState = state::SavedState;

        fn save(&mut self) -> Result<Self::SavedState, SaveError> {
            Ok(state::SavedState {
                cfg_space: self.cfg_space.save()?,
            })
        }

        fn restore(&mut self, state: Self::SavedState) -> Result<(), RestoreError> {
            let state::SavedState { cfg_space } = state;
            self.cfg_space.restore(cfg_space)?;
            self.update_io_visibility();
            Ok(())
        }
    }

    impl Ich9Smbus {
        /// Saves the device into a tagged, versioned blob.
        pub fn save_blob(&mut self) -> Result<SavedStateBlob, SaveError> {
            SavedStateBlob::new(self.save()?)
        }

        /// Restores the device from a blob produced by
        /// [`Ich9Smbus::save_blob`].
        pub fn restore_blob(&mut self, blob: &SavedStateBlob) -> Result<(), RestoreError> {
            self.restore(blob.parse()?)
        }
    }
}
