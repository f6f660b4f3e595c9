//! Register capability trait and the device time register map.
//!
//! The time block sits at a base address in the device register space:
//!
//! | Address         | Description                          | Access |
//! |-----------------|--------------------------------------|--------|
//! | base + 0..      | Current device timestamp             | Read   |
//! | base + 3..      | Staged host timestamp                | Write  |
//! | base + 3 + n-1  | Sync trigger, last word of the block | Write  |
//!
//! `n` is the layout word count, so the trigger is `base + 5` for
//! [`TimestampLayout::ThreeWord`] and `base + 6` for
//! [`TimestampLayout::FourWord`]. Firmware runs its sync handler whenever
//! that register is written, including as the tail of a full block write.
//!
//! Bit 1 of the exception status word is set while the device wants the
//! host to push its time.

use timesync_common::{SyncError, SyncResult, TimestampLayout, DEFAULT_TIME_BASE_ADDRESS};

/// Offset of the staged timestamp write block from the time base.
pub const TIME_WRITE_OFFSET: u16 = 3;

/// Highest register offset used by any layout, the four-word trigger.
const MAX_BLOCK_OFFSET: u16 = TIME_WRITE_OFFSET + TimestampLayout::FourWord.word_count() - 1;

/// Exception status bit raised when the device requests a time sync.
pub const TIME_SYNC_REQUEST_BIT: u16 = 1 << 1;

/// Value written to the trigger register.
pub const TRIGGER_WORD: u16 = 0x0000;

/// Register operations the time subsystem needs from a device.
///
/// Implemented by the transport. Every method blocks until the device
/// answers or the transport times out, and every failure is reported as
/// [`SyncError::DeviceCommunication`].
pub trait RegisterAccess {
    /// Read `count` holding registers starting at `address`.
    ///
    /// # Errors
    ///
    /// Transport failure or device exception response.
    fn read_holding_registers(&mut self, address: u16, count: u16) -> SyncResult<Vec<u16>>;

    /// Write `values` to consecutive registers starting at `address`.
    ///
    /// # Errors
    ///
    /// Transport failure or device exception response.
    fn write_registers(&mut self, address: u16, values: &[u16]) -> SyncResult<()>;

    /// Write `values` at `write_address` and read `read_count` registers at
    /// `address` in one atomic transaction.
    ///
    /// # Errors
    ///
    /// Transport failure or device exception response.
    fn readwrite_registers(
        &mut self,
        address: u16,
        read_count: u16,
        write_address: u16,
        values: &[u16],
    ) -> SyncResult<Vec<u16>>;

    /// Read the device exception status bitmask.
    ///
    /// # Errors
    ///
    /// Transport failure or device exception response.
    fn read_exception_status(&mut self) -> SyncResult<u16>;
}

impl<T: RegisterAccess + ?Sized> RegisterAccess for &mut T {
    fn read_holding_registers(&mut self, address: u16, count: u16) -> SyncResult<Vec<u16>> {
        (**self).read_holding_registers(address, count)
    }

    fn write_registers(&mut self, address: u16, values: &[u16]) -> SyncResult<()> {
        (**self).write_registers(address, values)
    }

    fn readwrite_registers(
        &mut self,
        address: u16,
        read_count: u16,
        write_address: u16,
        values: &[u16],
    ) -> SyncResult<Vec<u16>> {
        (**self).readwrite_registers(address, read_count, write_address, values)
    }

    fn read_exception_status(&mut self) -> SyncResult<u16> {
        (**self).read_exception_status()
    }
}

impl<T: RegisterAccess + ?Sized> RegisterAccess for Box<T> {
    fn read_holding_registers(&mut self, address: u16, count: u16) -> SyncResult<Vec<u16>> {
        (**self).read_holding_registers(address, count)
    }

    fn write_registers(&mut self, address: u16, values: &[u16]) -> SyncResult<()> {
        (**self).write_registers(address, values)
    }

    fn readwrite_registers(
        &mut self,
        address: u16,
        read_count: u16,
        write_address: u16,
        values: &[u16],
    ) -> SyncResult<Vec<u16>> {
        (**self).readwrite_registers(address, read_count, write_address, values)
    }

    fn read_exception_status(&mut self) -> SyncResult<u16> {
        (**self).read_exception_status()
    }
}

/// Addresses of the time block in the device register space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterMap {
    base: u16,
}

impl RegisterMap {
    /// Create a register map rooted at `base`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] if the block of the widest layout would
    /// run past the end of the address space.
    pub fn new(base: u16) -> SyncResult<Self> {
        if base.checked_add(MAX_BLOCK_OFFSET).is_none() {
            return Err(SyncError::Config(format!(
                "time base address {base} leaves no room for the trigger register"
            )));
        }
        Ok(Self { base })
    }

    /// Address of the current device timestamp.
    pub fn time_block(&self) -> u16 {
        self.base
    }

    /// Address of the staged timestamp write block.
    pub fn write_block(&self) -> u16 {
        self.base + TIME_WRITE_OFFSET
    }

    /// Address of the trigger register for `layout`, the last register of
    /// its write block.
    pub fn trigger(&self, layout: TimestampLayout) -> u16 {
        self.write_block() + layout.word_count() - 1
    }
}

impl Default for RegisterMap {
    fn default() -> Self {
        Self {
            base: DEFAULT_TIME_BASE_ADDRESS,
        }
    }
}
