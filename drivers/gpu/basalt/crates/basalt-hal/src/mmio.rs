//! # Register Access
//!
//! The register collaborator contract plus two implementations: a
//! volatile MMIO window and a host-memory register file.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use spin::Mutex;

use crate::regs::CRTC_PIPE_STRIDE;

// =============================================================================
// REGISTER IO TRAIT
// =============================================================================

/// 32-bit register access
pub trait RegisterIo: Send + Sync {
    /// Read a register
    fn read32(&self, offset: u32) -> u32;

    /// Write a register
    fn write32(&self, offset: u32, value: u32);

    /// Read a per-pipe register given its pipe 0 offset
    #[inline]
    fn read32_pipe(&self, offset: u32, pipe: usize) -> u32 {
        self.read32(offset + pipe as u32 * CRTC_PIPE_STRIDE)
    }

    /// Write a per-pipe register given its pipe 0 offset
    #[inline]
    fn write32_pipe(&self, offset: u32, pipe: usize, value: u32) {
        self.write32(offset + pipe as u32 * CRTC_PIPE_STRIDE, value)
    }

    /// Read-modify-write: clear `mask`, then set `value & mask`
    #[inline]
    fn write32_masked(&self, offset: u32, value: u32, mask: u32) {
        let current = self.read32(offset);
        self.write32(offset, (current & !mask) | (value & mask));
    }

    /// Set bits
    #[inline]
    fn set_bits(&self, offset: u32, bits: u32) {
        self.write32_masked(offset, bits, bits);
    }

    /// Clear bits
    #[inline]
    fn clear_bits(&self, offset: u32, bits: u32) {
        self.write32_masked(offset, 0, bits);
    }
}

impl<T: RegisterIo + ?Sized> RegisterIo for &T {
    fn read32(&self, offset: u32) -> u32 {
        (**self).read32(offset)
    }

    fn write32(&self, offset: u32, value: u32) {
        (**self).write32(offset, value)
    }
}

// =============================================================================
// MMIO REGION
// =============================================================================

/// Volatile register window mapped by the platform
#[derive(Debug)]
pub struct MmioRegion {
    base: *mut u8,
    size: usize,
}

// SAFETY: register accesses are single volatile loads and stores; the
// window stays mapped for the region's lifetime (constructor contract).
unsafe impl Send for MmioRegion {}
// SAFETY: see above
unsafe impl Sync for MmioRegion {}

impl MmioRegion {
    /// Wrap a mapped register window
    ///
    /// # Safety
    /// - `base` must point to `size` bytes of device registers mapped
    ///   uncached for the lifetime of the region
    /// - `base` must be 4-byte aligned
    pub unsafe fn new(base: *mut u8, size: usize) -> Self {
        Self { base, size }
    }

    /// Window size in bytes
    pub fn size(&self) -> usize {
        self.size
    }
}

impl RegisterIo for MmioRegion {
    fn read32(&self, offset: u32) -> u32 {
        let offset = offset as usize;
        debug_assert!(offset % 4 == 0 && offset + 4 <= self.size);
        // SAFETY: constructor guarantees the mapping, debug_assert the bounds
        let value = unsafe { core::ptr::read_volatile(self.base.add(offset) as *const u32) };
        barrier::mmio_read();
        value
    }

    fn write32(&self, offset: u32, value: u32) {
        let offset = offset as usize;
        debug_assert!(offset % 4 == 0 && offset + 4 <= self.size);
        barrier::mmio_write();
        // SAFETY: constructor guarantees the mapping, debug_assert the bounds
        unsafe { core::ptr::write_volatile(self.base.add(offset) as *mut u32, value) }
    }
}

// =============================================================================
// REGISTER FILE
// =============================================================================

/// Register window backed by host memory
///
/// Unwritten registers read as zero. Every write is recorded so the
/// programming order can be inspected.
#[derive(Debug, Default)]
pub struct RegisterFile {
    values: Mutex<BTreeMap<u32, u32>>,
    writes: Mutex<Vec<(u32, u32)>>,
}

impl RegisterFile {
    /// Empty register file
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a register without recording a write
    pub fn preset(&self, offset: u32, value: u32) {
        self.values.lock().insert(offset, value);
    }

    /// Writes in issue order
    pub fn writes(&self) -> Vec<(u32, u32)> {
        self.writes.lock().clone()
    }

    /// Forget recorded writes
    pub fn clear_writes(&self) {
        self.writes.lock().clear();
    }
}

impl RegisterIo for RegisterFile {
    fn read32(&self, offset: u32) -> u32 {
        self.values.lock().get(&offset).copied().unwrap_or(0)
    }

    fn write32(&self, offset: u32, value: u32) {
        self.values.lock().insert(offset, value);
        self.writes.lock().push((offset, value));
    }
}

// =============================================================================
// FIELD HELPERS
// =============================================================================

/// Extract bits `low_bit..=high_bit`
pub const fn extract_field(value: u32, low_bit: u8, high_bit: u8) -> u32 {
    let mask = ((1u32 << (high_bit - low_bit + 1)) - 1) << low_bit;
    (value & mask) >> low_bit
}

/// Replace bits `low_bit..=high_bit` with `field`
pub const fn insert_field(value: u32, field: u32, low_bit: u8, high_bit: u8) -> u32 {
    let mask = ((1u32 << (high_bit - low_bit + 1)) - 1) << low_bit;
    (value & !mask) | ((field << low_bit) & mask)
}

// =============================================================================
// BARRIERS
// =============================================================================

mod barrier {
    use core::sync::atomic::{compiler_fence, Ordering};

    #[inline(always)]
    pub fn mmio_write() {
        compiler_fence(Ordering::SeqCst);
    }

    #[inline(always)]
    pub fn mmio_read() {
        compiler_fence(Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regs::{CRTC0_CFG, CRTC0_STRIDE};

    #[test]
    fn test_pipe_indexing() {
        let regs = RegisterFile::new();
        regs.write32_pipe(CRTC0_STRIDE, 1, 7680);
        assert_eq!(regs.read32(0x1290), 7680);
        assert_eq!(regs.read32_pipe(CRTC0_STRIDE, 1), 7680);
        assert_eq!(regs.read32_pipe(CRTC0_STRIDE, 0), 0);
    }

    #[test]
    fn test_masked_updates() {
        let regs = RegisterFile::new();
        regs.preset(CRTC0_CFG, 0xF0);
        regs.set_bits(CRTC0_CFG, 0x1);
        regs.clear_bits(CRTC0_CFG, 0x10);
        regs.write32_masked(CRTC0_CFG, 0x4, 0x7);
        assert_eq!(regs.read32(CRTC0_CFG), 0xE4);
        assert_eq!(regs.writes().len(), 3);
    }

    #[test]
    fn test_mmio_region_volatile() {
        let mut backing = [0u32; 4];
        // SAFETY: backing outlives the region and is 4-byte aligned
        let region = unsafe { MmioRegion::new(backing.as_mut_ptr() as *mut u8, 16) };
        region.write32(8, 0xDEAD_BEEF);
        assert_eq!(region.read32(8), 0xDEAD_BEEF);
        drop(region);
        assert_eq!(backing[2], 0xDEAD_BEEF);
    }

    #[test]
    fn test_fields() {
        let v = insert_field(0, 49, 21, 29);
        assert_eq!(extract_field(v, 21, 29), 49);
        assert_eq!(extract_field(insert_field(v, 11, 0, 6), 0, 6), 11);
    }
}
