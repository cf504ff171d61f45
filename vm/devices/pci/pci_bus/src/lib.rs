// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Generic PCI Bus infrastructure.
//!
//! [`PciBus`] holds a set of [`PciFunction`]s at device/function slots and
//! routes configuration space and port IO accesses to them. How config space
//! accesses reach the bus (legacy `0xCF8`/`0xCFC` ports, ECAM, ...) is up to
//! the chipset that owns it.
//!
//! [`registry::DeviceTypeRegistry`] is the table of device types that chipset
//! assembly code (and ad-hoc device creation tooling) instantiates from.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod registry;

use chipset_device::io::IoError;
use chipset_device::io::IoResult;
use pci_core::PciFunction;
use pci_core::spec::cfg_space::CONFIG_SPACE_SIZE;
use registry::DeviceTypeRegistry;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// A device/function pair identifying a slot on a PCI bus.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DevFn(u8);

impl DevFn {
    /// Number of device numbers on a bus.
    pub const DEVICES: u8 = 32;
    /// Number of functions per device.
    pub const FUNCTIONS: u8 = 8;

    /// Panics if `device` or `function` is out of range.
    pub const fn new(device: u8, function: u8) -> Self {
        assert!(device < Self::DEVICES, "pci device number out of range");
        assert!(function < Self::FUNCTIONS, "pci function number out of range");
        Self((device << 3) | function)
    }

    /// Decodes the 8-bit devfn encoding used in config address registers.
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    /// The 8-bit encoding.
    pub const fn into_bits(self) -> u8 {
        self.0
    }

    /// The device number.
    pub const fn device(self) -> u8 {
        self.0 >> 3
    }

    /// The function number.
    pub const fn function(self) -> u8 {
        self.0 & 7
    }
}

impl fmt::Display for DevFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02x}.{:x}", self.device(), self.function())
    }
}

impl fmt::Debug for DevFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Errors returned when wiring functions onto a [`PciBus`].
#[derive(Debug, Error)]
pub enum PciBusError {
    /// Something is already attached at the slot.
    #[error("pci slot {0} is already occupied")]
    SlotOccupied(DevFn),
    /// No device type with the given name is registered.
    #[error("unknown pci device type {0:?}")]
    UnknownType(String),
}

/// A PCI bus.
#[derive(Debug)]
pub struct PciBus {
    bus_number: u8,
    functions: BTreeMap<DevFn, Box<dyn PciFunction>>,
}

impl PciBus {
    /// Creates an empty bus.
    pub fn new(bus_number: u8) -> Self {
        Self {
            bus_number,
            functions: BTreeMap::new(),
        }
    }

    /// The bus number.
    pub fn bus_number(&self) -> u8 {
        self.bus_number
    }

    /// Attaches an initialized function at `devfn`.
    ///
    /// If `multifunction` is set, the function reports itself as part of a
    /// multi-function device (Header Type bit 7).
    pub fn add_function(
        &mut self,
        devfn: DevFn,
        multifunction: bool,
        mut function: Box<dyn PciFunction>,
    ) -> Result<(), PciBusError> {
        let std::collections::btree_map::Entry::Vacant(entry) = self.functions.entry(devfn) else {
            return Err(PciBusError::SlotOccupied(devfn));
        };
        if multifunction {
            function.config_space_mut().set_multi_function(true);
        }
        tracing::debug!(
            bus = self.bus_number,
            %devfn,
            device_type = function.metadata().name,
            multifunction,
            "attached pci function"
        );
        entry.insert(function);
        Ok(())
    }

    /// Instantiates and initializes a function of a registered type, then
    /// attaches it at `devfn`.
    ///
    /// This is the chipset wiring path, so types that are not user creatable
    /// are allowed.
    pub fn create_function(
        &mut self,
        registry: &DeviceTypeRegistry,
        type_name: &str,
        devfn: DevFn,
        multifunction: bool,
    ) -> Result<(), PciBusError> {
        if self.functions.contains_key(&devfn) {
            return Err(PciBusError::SlotOccupied(devfn));
        }
        let descriptor = registry
            .get(type_name)
            .ok_or_else(|| PciBusError::UnknownType(type_name.to_owned()))?;
        let mut function = (descriptor.instantiate)();
        function.initialize();
        self.add_function(devfn, multifunction, function)
    }

    /// The function at `devfn`, if any.
    pub fn function(&self, devfn: DevFn) -> Option<&dyn PciFunction> {
        self.functions.get(&devfn).map(|f| &**f)
    }

    /// Dispatches a config space read to the function at `devfn`.
    ///
    /// Reads from an empty slot return all-ones.
    pub fn cfg_read(&mut self, devfn: DevFn, offset: u16, data: &mut [u8]) -> IoResult {
        if let Err(err) = check_cfg_access(offset, data.len()) {
            tracing::debug!(%devfn, offset, len = data.len(), ?err, "invalid pci config read");
            return IoResult::Err(err);
        }
        match self.functions.get_mut(&devfn) {
            Some(function) => function.read_config(offset, data),
            None => {
                data.fill(!0);
                IoResult::Ok
            }
        }
    }

    /// Dispatches a config space write to the function at `devfn`.
    ///
    /// Writes to an empty slot are dropped.
    pub fn cfg_write(&mut self, devfn: DevFn, offset: u16, data: &[u8]) -> IoResult {
        if let Err(err) = check_cfg_access(offset, data.len()) {
            tracing::debug!(%devfn, offset, len = data.len(), ?err, "invalid pci config write");
            return IoResult::Err(err);
        }
        match self.functions.get_mut(&devfn) {
            Some(function) => function.write_config(offset, data),
            None => IoResult::Ok,
        }
    }

    /// Dispatches a port IO read to the first function decoding `io_port`.
    ///
    /// Unclaimed reads return all-ones.
    pub fn io_read(&mut self, io_port: u16, data: &mut [u8]) -> IoResult {
        for function in self.functions.values_mut() {
            if let Some(pio) = function.supports_pio() {
                if let Some(result) = pio.io_read(io_port, data) {
                    return result;
                }
            }
        }
        tracing::trace!(io_port, len = data.len(), "unclaimed io read");
        data.fill(!0);
        IoResult::Ok
    }

    /// Dispatches a port IO write to the first function decoding `io_port`.
    ///
    /// Unclaimed writes are dropped.
    pub fn io_write(&mut self, io_port: u16, data: &[u8]) -> IoResult {
        for function in self.functions.values_mut() {
            if let Some(pio) = function.supports_pio() {
                if let Some(result) = pio.io_write(io_port, data) {
                    return result;
                }
            }
        }
        tracing::trace!(io_port, len = data.len(), "unclaimed io write");
        IoResult::Ok
    }
}

fn check_cfg_access(offset: u16, len: usize) -> Result<(), IoError> {
    if !matches!(len, 1 | 2 | 4) {
        return Err(IoError::InvalidAccessSize);
    }
    if offset as usize % len != 0 {
        return Err(IoError::UnalignedAccess);
    }
    if offset as usize + len > CONFIG_SPACE_SIZE {
        return Err(IoError::InvalidRegister);
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_helpers {
    use chipset_device::ChipsetDevice;
    use chipset_device::io::IoResult;
    use chipset_device::pio::PortIoIntercept;
    use pci_core::DeviceTypeDescriptor;
    use pci_core::DeviceTypeInfo;
    use pci_core::PciFunction;
    use pci_core::cfg_space_emu::BarKind;
    use pci_core::cfg_space_emu::ConfigSpace;
    use pci_core::spec::hwid::ClassCode;
    use pci_core::spec::hwid::HardwareIds;
    use pci_core::spec::hwid::ProgrammingInterface;
    use pci_core::spec::hwid::Subclass;

    pub const TEST_IDS: HardwareIds = HardwareIds {
        vendor_id: 0x1414,
        device_id: 0x0001,
        revision_id: 0,
        prog_if: ProgrammingInterface::NONE,
        sub_class: Subclass::NONE,
        base_class: ClassCode::BASE_SYSTEM_PERIPHERAL,
        type0_sub_vendor_id: 0,
        type0_sub_system_id: 0,
    };

    pub const TEST_INFO: DeviceTypeInfo = DeviceTypeInfo {
        name: "test-function",
        description: "Scratch register function",
        hardware_ids: TEST_IDS,
        user_creatable: true,
    };

    pub static TEST_TYPE: DeviceTypeDescriptor = DeviceTypeDescriptor {
        info: TEST_INFO,
        instantiate: new_scratch,
    };

    pub fn new_scratch() -> Box<dyn PciFunction> {
        Box::new(ScratchFunction::new())
    }

    /// A function with a 16-byte IO BAR 0 of scratch registers.
    pub struct ScratchFunction {
        cfg: ConfigSpace,
        regs: [u8; 16],
        initialized: bool,
    }

    impl ScratchFunction {
        pub fn new() -> Self {
            Self {
                cfg: ConfigSpace::new(TEST_IDS),
                regs: [0; 16],
                initialized: false,
            }
        }
    }

    impl ChipsetDevice for ScratchFunction {
        fn supports_pio(&mut self) -> Option<&mut dyn PortIoIntercept> {
            Some(self)
        }
    }

    impl PortIoIntercept for ScratchFunction {
        fn io_read(&mut self, io_port: u16, data: &mut [u8]) -> Option<IoResult> {
            let (_, offset) = self.cfg.find_io_bar(io_port)?;
            for (i, b) in data.iter_mut().enumerate() {
                *b = self.regs[(offset as usize + i) % 16];
            }
            Some(IoResult::Ok)
        }

        fn io_write(&mut self, io_port: u16, data: &[u8]) -> Option<IoResult> {
            let (_, offset) = self.cfg.find_io_bar(io_port)?;
            for (i, &b) in data.iter().enumerate() {
                self.regs[(offset as usize + i) % 16] = b;
            }
            Some(IoResult::Ok)
        }
    }

    impl PciFunction for ScratchFunction {
        fn metadata(&self) -> &'static DeviceTypeInfo {
            &TEST_INFO
        }

        fn initialize(&mut self) {
            assert!(!self.initialized);
            self.initialized = true;
            self.cfg.register_bar(0, BarKind::Io, 16);
        }

        fn config_space(&self) -> &ConfigSpace {
            &self.cfg
        }

        fn config_space_mut(&mut self) -> &mut ConfigSpace {
            &mut self.cfg
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::ScratchFunction;
    use crate::test_helpers::TEST_TYPE;
    use pci_core::spec::cfg_space::HeaderType00;

    fn bus_with_scratch(devfn: DevFn) -> PciBus {
        let mut bus = PciBus::new(0);
        let mut function = Box::new(ScratchFunction::new());
        function.initialize();
        bus.add_function(devfn, false, function).unwrap();
        bus
    }

    fn cfg_read_u32(bus: &mut PciBus, devfn: DevFn, offset: u16) -> u32 {
        let mut data = [0; 4];
        bus.cfg_read(devfn, offset, &mut data).unwrap();
        u32::from_le_bytes(data)
    }

    #[test]
    fn devfn_encoding() {
        let devfn = DevFn::new(31, 3);
        assert_eq!(devfn.into_bits(), 0xfb);
        assert_eq!(DevFn::from_bits(0xfb), devfn);
        assert_eq!(devfn.device(), 31);
        assert_eq!(devfn.function(), 3);
        assert_eq!(devfn.to_string(), "1f.3");
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn devfn_out_of_range() {
        let _ = DevFn::new(32, 0);
    }

    #[test_with_tracing::test]
    fn empty_slot_reads_all_ones() {
        let mut bus = PciBus::new(0);
        assert_eq!(cfg_read_u32(&mut bus, DevFn::new(3, 0), 0), !0);
        bus.cfg_write(DevFn::new(3, 0), 0x40, &[1]).unwrap();
    }

    #[test_with_tracing::test]
    fn cfg_access_validation() {
        let devfn = DevFn::new(1, 0);
        let mut bus = bus_with_scratch(devfn);
        let mut three = [0; 3];
        assert_eq!(
            bus.cfg_read(devfn, 0, &mut three),
            IoResult::Err(IoError::InvalidAccessSize)
        );
        assert_eq!(
            bus.cfg_write(devfn, 0x41, &[0, 0]),
            IoResult::Err(IoError::UnalignedAccess)
        );
        assert_eq!(
            bus.cfg_write(devfn, 0x3e, &[0; 4]),
            IoResult::Err(IoError::UnalignedAccess)
        );
        assert_eq!(
            bus.cfg_write(devfn, 0x100, &[0]),
            IoResult::Err(IoError::InvalidRegister)
        );
        bus.cfg_write(devfn, 0xfc, &[0; 4]).unwrap();
    }

    #[test_with_tracing::test]
    fn repeated_invalid_access_changes_nothing() {
        let devfn = DevFn::new(1, 0);
        let mut bus = bus_with_scratch(devfn);
        bus.cfg_write(devfn, 0x40, &[0x5a]).unwrap();
        for _ in 0..1000 {
            assert_eq!(
                bus.cfg_write(devfn, 0x41, &[0xff, 0xff]),
                IoResult::Err(IoError::UnalignedAccess)
            );
        }
        let mut data = [0; 4];
        bus.cfg_read(devfn, 0x40, &mut data).unwrap();
        assert_eq!(data, [0x5a, 0, 0, 0]);
    }

    #[test_with_tracing::test]
    fn slot_occupied() {
        let devfn = DevFn::new(1, 0);
        let mut bus = bus_with_scratch(devfn);
        let err = bus
            .add_function(devfn, false, Box::new(ScratchFunction::new()))
            .unwrap_err();
        assert!(matches!(err, PciBusError::SlotOccupied(d) if d == devfn));
    }

    #[test_with_tracing::test]
    fn create_function_from_registry() {
        let mut registry = DeviceTypeRegistry::new();
        registry.register(&TEST_TYPE);

        let mut bus = PciBus::new(0);
        let devfn = DevFn::new(2, 1);
        bus.create_function(&registry, "test-function", devfn, true)
            .unwrap();
        assert_eq!(cfg_read_u32(&mut bus, devfn, 0), 0x0001_1414);
        assert!(bus.function(devfn).unwrap().config_space().is_multi_function());

        assert!(matches!(
            bus.create_function(&registry, "test-function", devfn, true),
            Err(PciBusError::SlotOccupied(_))
        ));
        assert!(matches!(
            bus.create_function(&registry, "missing", DevFn::new(3, 0), false),
            Err(PciBusError::UnknownType(_))
        ));
    }

    #[test_with_tracing::test]
    fn io_dispatch_follows_bar() {
        let devfn = DevFn::new(1, 0);
        let mut bus = bus_with_scratch(devfn);

        // not decoded yet
        bus.io_write(0xc000, &[0x5a]).unwrap();
        let mut data = [0];
        bus.io_read(0xc000, &mut data).unwrap();
        assert_eq!(data, [0xff]);

        bus.cfg_write(devfn, HeaderType00::BAR0.0, &0xc000u32.to_le_bytes())
            .unwrap();
        bus.cfg_write(devfn, HeaderType00::COMMAND.0, &[0x01, 0x00])
            .unwrap();

        bus.io_write(0xc004, &[0x12, 0x34]).unwrap();
        let mut data = [0; 2];
        bus.io_read(0xc004, &mut data).unwrap();
        assert_eq!(data, [0x12, 0x34]);

        let mut data = [0];
        bus.io_read(0xc010, &mut data).unwrap();
        assert_eq!(data, [0xff]);
    }
}
