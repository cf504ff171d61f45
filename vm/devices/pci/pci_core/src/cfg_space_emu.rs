// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Helpers that implement standardized PCI configuration space functionality.
//!
//! [`ConfigSpace`] keeps the 256-byte conventional configuration space as raw
//! bytes, together with a writable-bits mask and a write-1-to-clear mask.
//! Guest writes go through [`ConfigSpace::default_write`], which applies both
//! masks byte by byte, so accesses of any width (and any overlap with
//! device-specific registers) behave the same way.

use crate::PciInterruptPin;
use crate::spec::cfg_space;
use crate::spec::cfg_space::BarEncodingBits;
use crate::spec::cfg_space::CONFIG_SPACE_SIZE;
use crate::spec::cfg_space::HeaderType00;
use crate::spec::cfg_space::NUM_BARS;
use crate::spec::hwid::HardwareIds;

/// Command bits the guest may change.
const WRITABLE_COMMAND_BITS: u16 = cfg_space::Command::new()
    .with_pio_enabled(true)
    .with_mmio_enabled(true)
    .with_bus_master(true)
    .with_intx_disable(true)
    .into_bits();

/// IO BARs must not decode addresses at or above this limit.
const IO_SPACE_LIMIT: u32 = 0x1_0000;

/// The address space a BAR decodes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BarKind {
    /// Port IO space.
    Io,
    /// 32-bit, non-prefetchable memory space.
    //
    // TODO: 64-bit BARs need two consecutive slots and a 64-bit decode.
    Memory32,
}

#[derive(Debug, Copy, Clone)]
struct BarInfo {
    kind: BarKind,
    len: u32,
}

/// Emulator for the standard Type 0 PCI configuration space header, plus the
/// device-specific area that follows it.
#[derive(Debug)]
pub struct ConfigSpace {
    // Fixed configuration
    hardware_ids: HardwareIds,
    wmask: [u8; CONFIG_SPACE_SIZE],
    w1cmask: [u8; CONFIG_SPACE_SIZE],
    bars: [Option<BarInfo>; NUM_BARS],

    // Volatile state
    config: [u8; CONFIG_SPACE_SIZE],
}

impl ConfigSpace {
    /// Create a new [`ConfigSpace`] reporting the given IDs.
    ///
    /// The device-specific area (`0x40..0x100`) starts zeroed and fully
    /// writable.
    pub fn new(hardware_ids: HardwareIds) -> Self {
        let mut this = Self {
            hardware_ids,
            wmask: [0; CONFIG_SPACE_SIZE],
            w1cmask: [0; CONFIG_SPACE_SIZE],
            bars: [None; NUM_BARS],
            config: [0; CONFIG_SPACE_SIZE],
        };

        this.set_word(HeaderType00::VENDOR_ID.0, hardware_ids.vendor_id);
        this.set_word(HeaderType00::DEVICE_ID.0, hardware_ids.device_id);
        this.set_byte(HeaderType00::REVISION_ID.0, hardware_ids.revision_id);
        this.set_byte(HeaderType00::PROG_IF.0, hardware_ids.prog_if.0);
        this.set_byte(HeaderType00::SUB_CLASS.0, hardware_ids.sub_class.0);
        this.set_byte(HeaderType00::BASE_CLASS.0, hardware_ids.base_class.0);
        this.set_word(
            HeaderType00::SUBSYSTEM_VENDOR_ID.0,
            hardware_ids.type0_sub_vendor_id,
        );
        this.set_word(HeaderType00::SUBSYSTEM_ID.0, hardware_ids.type0_sub_system_id);

        set_le(&mut this.wmask, HeaderType00::COMMAND.0, &WRITABLE_COMMAND_BITS.to_le_bytes());
        set_le(
            &mut this.w1cmask,
            HeaderType00::STATUS.0,
            &cfg_space::STATUS_W1C_BITS.to_le_bytes(),
        );
        for reg in [
            HeaderType00::CACHE_LINE_SIZE,
            HeaderType00::LATENCY_TIMER,
            HeaderType00::INTERRUPT_LINE,
        ] {
            this.wmask[reg.0 as usize] = 0xff;
        }
        this.wmask[cfg_space::HEADER_TYPE_00_SIZE as usize..].fill(0xff);

        this
    }

    /// The IDs this config space reports.
    pub fn hardware_ids(&self) -> &HardwareIds {
        &self.hardware_ids
    }

    /// Reads `data.len()` bytes starting at `offset`. Bytes past the end of
    /// config space read as all-ones.
    pub fn read(&self, offset: u16, data: &mut [u8]) {
        for (i, b) in data.iter_mut().enumerate() {
            *b = self
                .config
                .get(offset as usize + i)
                .copied()
                .unwrap_or(0xff);
        }
    }

    /// Applies the standard write semantics to `data.len()` bytes starting at
    /// `offset`: only writable bits change, and write-1-to-clear bits are
    /// cleared where the written value has a 1. Bytes past the end of config
    /// space are dropped.
    pub fn default_write(&mut self, offset: u16, data: &[u8]) {
        let old_command = self.command();

        for (i, &val) in data.iter().enumerate() {
            let addr = offset as usize + i;
            if addr >= CONFIG_SPACE_SIZE {
                tracing::debug!(offset, len = data.len(), "config write past end of config space");
                break;
            }
            let wmask = self.wmask[addr];
            let w1cmask = self.w1cmask[addr];
            let mut new = (self.config[addr] & !wmask) | (val & wmask);
            new &= !(val & w1cmask);
            self.config[addr] = new;
        }

        let command = self.command();
        if command != old_command {
            tracing::debug!(?old_command, ?command, "command register updated");
        }
    }

    /// Reads a config space byte.
    pub fn byte(&self, offset: u16) -> u8 {
        self.config[offset as usize]
    }

    /// Reads a little-endian config space word.
    pub fn word(&self, offset: u16) -> u16 {
        let offset = offset as usize;
        u16::from_le_bytes([self.config[offset], self.config[offset + 1]])
    }

    /// Reads a little-endian config space dword.
    pub fn dword(&self, offset: u16) -> u32 {
        let mut bytes = [0; 4];
        self.read(offset, &mut bytes);
        u32::from_le_bytes(bytes)
    }

    /// Sets a config space byte directly, bypassing the write masks. For use
    /// by the device model itself, not for guest writes.
    pub fn set_byte(&mut self, offset: u16, value: u8) {
        self.config[offset as usize] = value;
    }

    /// Sets a little-endian config space word directly, bypassing the write
    /// masks.
    pub fn set_word(&mut self, offset: u16, value: u16) {
        set_le(&mut self.config, offset, &value.to_le_bytes());
    }

    /// Sets a little-endian config space dword directly, bypassing the write
    /// masks.
    pub fn set_dword(&mut self, offset: u16, value: u32) {
        set_le(&mut self.config, offset, &value.to_le_bytes());
    }

    /// Reports the given INTx pin in the Interrupt Pin register.
    pub fn set_interrupt_pin(&mut self, pin: PciInterruptPin) {
        self.set_byte(HeaderType00::INTERRUPT_PIN.0, pin.register_value());
    }

    /// Sets or clears the multi-function bit in the Header Type register.
    pub fn set_multi_function(&mut self, multi_function: bool) {
        let offset = HeaderType00::HEADER_TYPE.0;
        let header = self.byte(offset);
        let header = if multi_function {
            header | cfg_space::HEADER_TYPE_MULTI_FUNCTION
        } else {
            header & !cfg_space::HEADER_TYPE_MULTI_FUNCTION
        };
        self.set_byte(offset, header);
    }

    /// Whether the multi-function bit is set.
    pub fn is_multi_function(&self) -> bool {
        self.byte(HeaderType00::HEADER_TYPE.0) & cfg_space::HEADER_TYPE_MULTI_FUNCTION != 0
    }

    /// Declares BAR `index` as decoding a `len` byte window of the given
    /// kind.
    ///
    /// `len` is rounded up to a power of two (and to at least 4 bytes for IO
    /// BARs). The address bits become writable by the guest; the encoding
    /// bits are read-only.
    ///
    /// Panics if `index` is out of range or the BAR was already registered.
    pub fn register_bar(&mut self, index: u8, kind: BarKind, len: u32) {
        let slot = &mut self.bars[index as usize];
        assert!(slot.is_none(), "bar {index} registered twice");

        let min = match kind {
            BarKind::Io => 4,
            BarKind::Memory32 => 16,
        };
        let len = len.max(min).next_power_of_two();
        *slot = Some(BarInfo { kind, len });

        let encoding = BarEncodingBits::new()
            .with_use_pio(kind == BarKind::Io)
            .into_bits();
        let offset = HeaderType00::bar(index).0;
        self.set_dword(offset, encoding);
        set_le(&mut self.wmask, offset, &(!(len - 1)).to_le_bytes());
    }

    /// The size of BAR `index`, if registered.
    pub fn bar_len(&self, index: u8) -> Option<u32> {
        self.bars.get(index as usize)?.map(|bar| bar.len)
    }

    /// The current Command register.
    pub fn command(&self) -> cfg_space::Command {
        cfg_space::Command::from_bits(self.word(HeaderType00::COMMAND.0))
    }

    /// The address BAR `index` currently decodes, if any.
    ///
    /// Returns `None` if the BAR is not registered, decoding of its address
    /// space is disabled in the Command register, or the programmed address
    /// is not usable (zero, still holding the size-probe pattern, or past the
    /// end of IO space).
    pub fn bar_base(&self, index: u8) -> Option<u32> {
        let bar = (*self.bars.get(index as usize)?)?;
        let command = self.command();
        let raw = self.dword(HeaderType00::bar(index).0);
        let mask = !(bar.len - 1);
        let base = raw & mask;

        let enabled = match bar.kind {
            BarKind::Io => command.pio_enabled(),
            BarKind::Memory32 => command.mmio_enabled(),
        };
        if !enabled || base == 0 || base == mask {
            return None;
        }
        if bar.kind == BarKind::Io && base as u64 + bar.len as u64 > IO_SPACE_LIMIT as u64 {
            return None;
        }
        Some(base)
    }

    /// The IO port base BAR `index` currently decodes, if it is a registered
    /// IO BAR with a usable address and IO decode enabled.
    pub fn io_bar_base(&self, index: u8) -> Option<u16> {
        if self.bars.get(index as usize)?.as_ref()?.kind != BarKind::Io {
            return None;
        }
        self.bar_base(index).map(|base| base as u16)
    }

    /// Finds the IO BAR decoding `io_port`, returning the BAR index and the
    /// offset of the port within it.
    pub fn find_io_bar(&self, io_port: u16) -> Option<(u8, u16)> {
        (0..NUM_BARS as u8).find_map(|index| {
            let bar = self.bars[index as usize]?;
            if bar.kind != BarKind::Io {
                return None;
            }
            let base = self.bar_base(index)?;
            let offset = (io_port as u32).checked_sub(base)?;
            (offset < bar.len).then_some((index, offset as u16))
        })
    }

    /// Resets the guest-controlled header state: Command, Status error bits,
    /// cache line size, interrupt line and BAR addresses.
    ///
    /// Device-specific registers are left alone; the device model resets
    /// those itself.
    pub fn reset(&mut self) {
        let command = HeaderType00::COMMAND.0;
        let reset = self.word(command) & !WRITABLE_COMMAND_BITS;
        self.set_word(command, reset);

        let status = HeaderType00::STATUS.0;
        let reset = self.word(status) & !cfg_space::STATUS_W1C_BITS;
        self.set_word(status, reset);

        self.set_byte(HeaderType00::CACHE_LINE_SIZE.0, 0);
        self.set_byte(HeaderType00::INTERRUPT_LINE.0, 0);

        for index in 0..NUM_BARS as u8 {
            if let Some(bar) = self.bars[index as usize] {
                let encoding = BarEncodingBits::new()
                    .with_use_pio(bar.kind == BarKind::Io)
                    .into_bits();
                self.set_dword(HeaderType00::bar(index).0, encoding);
            }
        }
    }
}

fn set_le(bytes: &mut [u8; CONFIG_SPACE_SIZE], offset: u16, value: &[u8]) {
    let offset = offset as usize;
    bytes[offset..offset + value.len()].copy_from_slice(value);
}

mod save_restore {
    use super::*;
    use vmcore::save_restore::RestoreError;
    use vmcore::save_restore::SaveError;
    use vmcore::save_restore::SaveRestore;

    mod state {
        use serde::Deserialize;
        use serde::Serialize;

        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        pub struct SavedState {
            pub config: Vec<u8>,
        }
    }

    impl SaveRestore for ConfigSpace {
        type SavedState = state::SavedState;

        fn save(&mut self) -> Result<Self::SavedState, SaveError> {
            Ok(state::SavedState {
                config: self.config.to_vec(),
            })
        }

        fn restore(&mut self, state: Self::SavedState) -> Result<(), RestoreError> {
            let state::SavedState { config } = state;

            let config: [u8; CONFIG_SPACE_SIZE] = config.try_into().map_err(|v: Vec<u8>| {
                RestoreError::InvalidSavedState(anyhow::anyhow!(
                    "config space is {} bytes, expected {CONFIG_SPACE_SIZE}",
                    v.len()
                ))
            })?;

            // Bits the guest can't change must match what this device
            // reports, otherwise the state belongs to a different device.
            for (offset, (&saved, &current)) in config.iter().zip(&self.config).enumerate() {
                let fixed = !self.wmask[offset] & !self.w1cmask[offset];
                if (saved ^ current) & fixed != 0 {
                    return Err(RestoreError::InvalidSavedState(anyhow::anyhow!(
                        "read-only config byte {offset:#x} mismatch: saved {saved:#04x}, device {current:#04x}"
                    )));
                }
            }

            self.config = config;
            Ok(())
        }
    }
}
