// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Core PCI infrastructure.
//!
//! A collection of constants, types, and helpers related to PCI devices:
//! the PCI-defined register layouts, a byte-granular configuration space
//! emulator, and the [`PciFunction`] trait through which a PCI bus drives
//! the device models plugged into it.

#![forbid(unsafe_code)]

/// Declares a newtype over an integer with a set of named values.
///
/// Unlike a Rust `enum`, any value of the underlying integer is valid, which
/// is what you want when the value comes straight from a guest-visible
/// register.
macro_rules! open_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident: $ty:ty {
            $(
                $(#[$vmeta:meta])*
                $variant:ident = $value:expr,
            )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        $vis struct $name(pub $ty);

        #[allow(missing_docs)]
        impl $name {
            $(
                $(#[$vmeta])*
                pub const $variant: $name = $name($value);
            )*
        }

        impl From<$ty> for $name {
            fn from(v: $ty) -> Self {
                Self(v)
            }
        }

        impl From<$name> for $ty {
            fn from(v: $name) -> Self {
                v.0
            }
        }

        impl ::core::fmt::Debug for $name {
            #[allow(unreachable_patterns)]
            fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
                match *self {
                    $(Self::$variant => f.pad(stringify!($variant)),)*
                    _ => write!(f, "{}({:#x})", stringify!($name), self.0),
                }
            }
        }
    };
}

pub mod cfg_space_emu;
pub mod spec;

use crate::cfg_space_emu::ConfigSpace;
use crate::spec::hwid::HardwareIds;
use chipset_device::ChipsetDevice;
use chipset_device::io::IoResult;

/// Returns true if the access `[offset, offset + len)` touches `byte`.
///
/// Config space accesses may be 1, 2 or 4 bytes wide, so a register that
/// lives in a single byte can be hit by a wider access that starts before
/// it.
pub fn range_covers_byte(offset: u16, len: usize, byte: u16) -> bool {
    let offset = offset as usize;
    let byte = byte as usize;
    offset <= byte && byte < offset + len
}

/// PCI INTx interrupt pins.
///
/// Note that the value of the pin as reported in the Interrupt Pin register
/// is one greater than the enum discriminant (0 means "no pin").
#[expect(missing_docs)] // self explanatory variants
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PciInterruptPin {
    IntA = 0,
    IntB,
    IntC,
    IntD,
}

impl PciInterruptPin {
    /// The value reported in the Interrupt Pin register.
    pub fn register_value(self) -> u8 {
        self as u8 + 1
    }
}

/// Static description of a PCI device type.
#[derive(Debug, Copy, Clone)]
pub struct DeviceTypeInfo {
    /// Unique type name, used as the registry key.
    pub name: &'static str,
    /// Human readable description.
    pub description: &'static str,
    /// The IDs reported in configuration space.
    pub hardware_ids: HardwareIds,
    /// Whether generic, ad-hoc device creation tooling may instantiate this
    /// type on its own. Chipset functions that must be wired up as part of a
    /// larger assembly set this to `false`.
    pub user_creatable: bool,
}

/// A registrable device type: its metadata plus a constructor.
///
/// The returned device has not been initialized yet; the caller runs
/// [`PciFunction::initialize`] exactly once before attaching it to a bus.
#[derive(Debug)]
pub struct DeviceTypeDescriptor {
    /// Type metadata.
    pub info: DeviceTypeInfo,
    /// Allocates a fresh, uninitialized instance.
    pub instantiate: fn() -> Box<dyn PciFunction>,
}

/// A single PCI function, as seen by the PCI bus that hosts it.
///
/// Config space reads and writes are byte-granular: `data.len()` is the
/// access width (1, 2 or 4 bytes). The bus validates width and alignment
/// before calling in.
pub trait PciFunction: ChipsetDevice {
    /// The static type metadata of this function.
    fn metadata(&self) -> &'static DeviceTypeInfo;

    /// One-time setup, run after construction and before the function is
    /// attached to a bus.
    fn initialize(&mut self);

    /// The function's configuration space.
    fn config_space(&self) -> &ConfigSpace;

    /// The function's configuration space, mutably.
    fn config_space_mut(&mut self) -> &mut ConfigSpace;

    /// Dispatch a config space read.
    fn read_config(&mut self, offset: u16, data: &mut [u8]) -> IoResult {
        self.config_space().read(offset, data);
        IoResult::Ok
    }

    /// Dispatch a config space write.
    ///
    /// Devices that need to react to writes override this, typically calling
    /// [`ConfigSpace::default_write`] first.
    fn write_config(&mut self, offset: u16, data: &[u8]) -> IoResult {
        self.config_space_mut().default_write(offset, data);
        IoResult::Ok
    }
}

impl std::fmt::Debug for dyn PciFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PciFunction")
            .field("name", &self.metadata().name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn covers_single_byte() {
        assert!(range_covers_byte(0x40, 1, 0x40));
        assert!(!range_covers_byte(0x41, 1, 0x40));
        assert!(!range_covers_byte(0x3f, 1, 0x40));
    }

    #[test]
    fn covers_straddling_access() {
        // dword write starting two bytes before the target
        assert!(range_covers_byte(0x3e, 4, 0x40));
        // word write ending right before the target
        assert!(!range_covers_byte(0x3e, 2, 0x40));
        assert!(range_covers_byte(0x3f, 2, 0x40));
    }

    #[test]
    fn interrupt_pin_register_values() {
        assert_eq!(PciInterruptPin::IntA.register_value(), 1);
        assert_eq!(PciInterruptPin::IntD.register_value(), 4);
    }
}
