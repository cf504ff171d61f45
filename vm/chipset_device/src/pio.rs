// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Port IO intercepts

use crate::ChipsetDevice;
use crate::io::IoResult;

/// Implemented by devices which use port IO intercepts.
pub trait PortIoIntercept: ChipsetDevice {
    /// Dispatch an IO port read to the device with the given address.
    ///
    /// Returns `None` if the device does not currently decode `io_port`.
    fn io_read(&mut self, io_port: u16, data: &mut [u8]) -> Option<IoResult>;
    /// Dispatch an IO port write to the device with the given address.
    ///
    /// Returns `None` if the device does not currently decode `io_port`.
    fn io_write(&mut self, io_port: u16, data: &[u8]) -> Option<IoResult>;
}

/// A device-owned port IO register window.
///
/// The window itself only knows its name, length and whether it is enabled.
/// Where it lives in the guest's IO space is decided by whoever decodes it
/// (e.g. a PCI BAR), so an enabled window may still be unreachable.
#[derive(Debug)]
pub struct PortIoRegion {
    name: &'static str,
    len: u16,
    enabled: bool,
}

impl PortIoRegion {
    /// Creates a new, disabled, region of the given length.
    pub fn new(name: &'static str, len: u16) -> Self {
        Self {
            name,
            len,
            enabled: false,
        }
    }

    /// Return the region's name.
    pub fn region_name(&self) -> &str {
        self.name
    }

    /// Return the length of the region.
    pub fn len(&self) -> u16 {
        self.len
    }

    /// Enables or disables the region. Setting the current value again is a
    /// no-op.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Whether the region currently responds to accesses.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Return the offset of `io_port` from `base`, if the region is enabled
    /// and the whole access of `access_len` bytes falls inside it.
    ///
    /// # Example
    ///
    /// ```
    /// # use chipset_device::pio::PortIoRegion;
    /// let mut region = PortIoRegion::new("foo", 0x10);
    /// assert_eq!(region.offset_of(0x1000, 0x1003, 1), None);
    /// region.set_enabled(true);
    /// assert_eq!(region.offset_of(0x1000, 0x1003, 1), Some(3));
    /// assert_eq!(region.offset_of(0x1000, 0x100f, 2), None);
    /// assert_eq!(region.offset_of(0x1000, 0x900, 1), None);
    /// ```
    pub fn offset_of(&self, base: u16, io_port: u16, access_len: usize) -> Option<u16> {
        if !self.enabled {
            return None;
        }
        let offset = io_port.checked_sub(base)?;
        let end = offset as usize + access_len;
        (end <= self.len as usize).then_some(offset)
    }
}
