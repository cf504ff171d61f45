// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Types and constants specified by the PCI spec.
//!
//! This module MUST NOT contain any vendor-specific constants!

pub mod hwid {
    //! Hardware ID types and constants

    #![expect(missing_docs)] // constants/fields are self-explanatory

    use core::fmt;

    /// A collection of hard-coded hardware IDs specific to a particular PCI
    /// device, as reflected in their corresponding PCI configuration space
    /// registers.
    ///
    /// See PCI 2.3 Spec - 6.2.1 for details on each of these fields.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct HardwareIds {
        pub vendor_id: u16,
        pub device_id: u16,
        pub revision_id: u8,
        pub prog_if: ProgrammingInterface,
        pub sub_class: Subclass,
        pub base_class: ClassCode,
        pub type0_sub_vendor_id: u16,
        pub type0_sub_system_id: u16,
    }

    impl HardwareIds {
        /// The 16-bit (base class, subclass) pair, e.g. `0x0c05` for an SMBus
        /// controller.
        pub fn class_id(&self) -> u16 {
            (self.base_class.0 as u16) << 8 | self.sub_class.0 as u16
        }
    }

    open_enum! {
        /// ClassCode identifies the PCI device's type.
        ///
        /// Values pulled from <https://wiki.osdev.org/PCI#Class_Codes>.
        pub enum ClassCode: u8 {
            UNCLASSIFIED = 0x00,
            MASS_STORAGE_CONTROLLER = 0x01,
            NETWORK_CONTROLLER = 0x02,
            DISPLAY_CONTROLLER = 0x03,
            MULTIMEDIA_CONTROLLER = 0x04,
            MEMORY_CONTROLLER = 0x05,
            BRIDGE = 0x06,
            SIMPLE_COMMUNICATION_CONTROLLER = 0x07,
            BASE_SYSTEM_PERIPHERAL = 0x08,
            INPUT_DEVICE_CONTROLLER = 0x09,
            DOCKING_STATION = 0x0A,
            PROCESSOR = 0x0B,
            SERIAL_BUS_CONTROLLER = 0x0C,
            WIRELESS_CONTROLLER = 0x0D,
            /// Vendor specific
            UNASSIGNED = 0xFF,
        }
    }

    impl fmt::Display for ClassCode {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            fmt::Debug::fmt(self, f)
        }
    }

    // Most subclass/programming interface values aren't used, so only add
    // values as needed.

    open_enum! {
        /// Subclass identifies the PCI device's function.
        ///
        /// Values pulled from <https://wiki.osdev.org/PCI#Class_Codes>.
        pub enum Subclass: u8 {
            NONE = 0x00,

            // Bridge (Class code: 0x06)
            BRIDGE_ISA = 0x01,
            BRIDGE_PCI_TO_PCI = 0x04,
            BRIDGE_OTHER = 0x80,

            // Serial Bus Controller (Class code: 0x0C)
            // Other values: 0x00 - 0x02, 0x04, 0x06 - 0x0A, 0x80
            SERIAL_BUS_USB = 0x03,
            SERIAL_BUS_SMBUS = 0x05,
        }
    }

    open_enum! {
        /// ProgrammingInterface (aka, program interface byte) identifies the
        /// PCI device's register-level programming interface.
        pub enum ProgrammingInterface: u8 {
            NONE = 0x00,
        }
    }
}

/// Configuration Space
///
/// Sources: PCI 2.3 Spec - Chapter 6
#[expect(missing_docs)] // primarily enums/structs with self-explanatory variants
pub mod cfg_space {
    use bitfield_struct::bitfield;

    open_enum! {
        /// Byte offsets of the fields in the type 00h configuration space
        /// header.
        ///
        /// | Offset | Bits 31-24                 | Bits 23-16  | Bits 15-8           | Bits 7-0             |
        /// |--------|----------------------------|-------------|---------------------|--------------------- |
        /// | 0x0    | Device ID                  |             | Vendor ID           |                      |
        /// | 0x4    | Status                     |             | Command             |                      |
        /// | 0x8    | Class code                 |             |                     | Revision ID          |
        /// | 0xC    | BIST                       | Header type | Latency Timer       | Cache Line Size      |
        /// | 0x10   | Base address #0 (BAR0)     |             |                     |                      |
        /// | ...    | ...                        |             |                     |                      |
        /// | 0x24   | Base address #5 (BAR5)     |             |                     |                      |
        /// | 0x28   | Cardbus CIS Pointer        |             |                     |                      |
        /// | 0x2C   | Subsystem ID               |             | Subsystem Vendor ID |                      |
        /// | 0x30   | Expansion ROM base address |             |                     |                      |
        /// | 0x34   | Reserved                   |             |                     | Capabilities Pointer |
        /// | 0x38   | Reserved                   |             |                     |                      |
        /// | 0x3C   | Max latency                | Min Grant   | Interrupt PIN       | Interrupt Line       |
        pub enum HeaderType00: u16 {
            VENDOR_ID           = 0x00,
            DEVICE_ID           = 0x02,
            COMMAND             = 0x04,
            STATUS              = 0x06,
            REVISION_ID         = 0x08,
            PROG_IF             = 0x09,
            SUB_CLASS           = 0x0A,
            BASE_CLASS          = 0x0B,
            CACHE_LINE_SIZE     = 0x0C,
            LATENCY_TIMER       = 0x0D,
            HEADER_TYPE         = 0x0E,
            BIST                = 0x0F,
            BAR0                = 0x10,
            BAR1                = 0x14,
            BAR2                = 0x18,
            BAR3                = 0x1C,
            BAR4                = 0x20,
            BAR5                = 0x24,
            CARDBUS_CIS_PTR     = 0x28,
            SUBSYSTEM_VENDOR_ID = 0x2C,
            SUBSYSTEM_ID        = 0x2E,
            EXPANSION_ROM_BASE  = 0x30,
            CAPABILITIES_PTR    = 0x34,
            INTERRUPT_LINE      = 0x3C,
            INTERRUPT_PIN       = 0x3D,
            MIN_GNT             = 0x3E,
            MAX_LAT             = 0x3F,
        }
    }

    impl HeaderType00 {
        /// Offset of the BAR at `index`.
        pub const fn bar(index: u8) -> Self {
            Self(Self::BAR0.0 + 4 * index as u16)
        }
    }

    pub const HEADER_TYPE_00_SIZE: u16 = 0x40;

    /// Size of the conventional (non-extended) configuration space.
    pub const CONFIG_SPACE_SIZE: usize = 0x100;

    pub const NUM_BARS: usize = 6;

    /// Header type register bit marking a multi-function device.
    pub const HEADER_TYPE_MULTI_FUNCTION: u8 = 0x80;

    /// BAR in-band encoding bits.
    ///
    /// The low bits of the BAR are not actually part of the address.
    /// Instead, they are used to in-band encode various bits of
    /// metadata about the BAR, and are masked off when determining the
    /// actual address.
    #[bitfield(u32)]
    pub struct BarEncodingBits {
        pub use_pio: bool,

        _reserved: bool,

        /// False indicates 32 bit.
        /// Only used in MMIO
        pub type_64_bit: bool,
        pub prefetchable: bool,

        #[bits(28)]
        _reserved2: u32,
    }

    /// Command Register
    #[bitfield(u16)]
    #[derive(PartialEq, Eq)]
    pub struct Command {
        pub pio_enabled: bool,
        pub mmio_enabled: bool,
        pub bus_master: bool,
        pub special_cycles: bool,
        pub enable_memory_write_invalidate: bool,
        pub vga_palette_snoop: bool,
        pub parity_error_response: bool,
        /// must be 0
        #[bits(1)]
        _reserved: u16,
        pub enable_serr: bool,
        pub enable_fast_b2b: bool,
        pub intx_disable: bool,
        #[bits(5)]
        _reserved2: u16,
    }

    /// Status Register
    #[bitfield(u16)]
    #[derive(PartialEq, Eq)]
    pub struct Status {
        #[bits(3)]
        _reserved: u16,
        pub interrupt_status: bool,
        pub capabilities_list: bool,
        pub capable_mhz_66: bool,
        _reserved2: bool,
        pub capable_fast_b2b: bool,
        pub err_master_parity: bool,

        #[bits(2)]
        pub devsel: u16,

        pub abort_target_signaled: bool,
        pub abort_target_received: bool,
        pub abort_master_received: bool,
        pub err_signaled: bool,
        pub err_detected_parity: bool,
    }

    /// Status bits that are cleared by writing a 1 to them.
    pub const STATUS_W1C_BITS: u16 = Status::new()
        .with_err_master_parity(true)
        .with_abort_target_signaled(true)
        .with_abort_target_received(true)
        .with_abort_master_received(true)
        .with_err_signaled(true)
        .with_err_detected_parity(true)
        .into_bits();
}
