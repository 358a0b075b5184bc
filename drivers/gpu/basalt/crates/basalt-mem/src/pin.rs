//! # Pin Tracking
//!
//! A pinned buffer object may not be evicted or moved. The backing store
//! of an object whose count drops to zero is kept until space pressure
//! evicts it.

use basalt_core::{Error, Result};

/// Pin reference count
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PinCount(u32);

impl PinCount {
    /// Unpinned
    pub const fn new() -> Self {
        Self(0)
    }

    /// Current count
    pub const fn get(&self) -> u32 {
        self.0
    }

    /// Whether eviction is forbidden
    pub const fn is_pinned(&self) -> bool {
        self.0 > 0
    }

    /// Take a pin, returning the new count
    pub fn pin(&mut self) -> Result<u32> {
        self.0 = self.0.checked_add(1).ok_or(Error::InvalidArgument)?;
        Ok(self.0)
    }

    /// Drop a pin, returning the new count
    ///
    /// Unpinning an unpinned object is a caller bug and leaves the count
    /// at zero.
    pub fn unpin(&mut self) -> Result<u32> {
        if self.0 == 0 {
            return Err(Error::MapMisuse);
        }
        self.0 -= 1;
        Ok(self.0)
    }
}
