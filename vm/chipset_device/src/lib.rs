// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Types and traits to model chipset devices.

/// Implemented by any device that is considered part of the guest's "chipset"
/// (insofar as it exists on one or more system busses).
//
// DEVNOTE: keep this trait free of bounds beyond `Send`. Config space access
// lives in `pci_core::PciFunction`, which builds on top of this trait.
pub trait ChipsetDevice: 'static + Send {
    /// Optionally returns a trait object to send IO port intercepts to.
    #[inline(always)]
    fn supports_pio(&mut self) -> Option<&mut dyn pio::PortIoIntercept> {
        None
    }
}

pub mod io;
pub mod pio;
