//! # VRAM Apertures
//!
//! CPU view of the VRAM pool. Buffer objects placed in VRAM are mapped and
//! copied through the aperture at `base_ptr() + (start_page << PAGE_SHIFT)`.

use alloc::alloc::{alloc_zeroed, dealloc, Layout};

use basalt_core::types::PAGE_SIZE;
use basalt_core::{Error, Result};

// =============================================================================
// APERTURE TRAIT
// =============================================================================

/// CPU-accessible window onto VRAM
///
/// # Safety
/// `base_ptr()` must stay valid for reads and writes of `size()` bytes for
/// as long as the aperture exists, and must not move.
pub unsafe trait Aperture: Send + Sync {
    /// CPU address of the first VRAM byte
    fn base_ptr(&self) -> *mut u8;

    /// Window size in bytes
    fn size(&self) -> u64;
}

// =============================================================================
// MMIO APERTURE
// =============================================================================

/// Platform-mapped VRAM window
#[derive(Debug)]
pub struct MmioAperture {
    base: *mut u8,
    size: u64,
}

// SAFETY: the mapping is shared device memory; concurrent access to
// disjoint ranges is serialized by buffer object reservations.
unsafe impl Send for MmioAperture {}
// SAFETY: see above
unsafe impl Sync for MmioAperture {}

impl MmioAperture {
    /// Wrap an existing write-combined mapping
    ///
    /// # Safety
    /// `base` must map `size` bytes of VRAM for the lifetime of the
    /// aperture.
    pub unsafe fn new(base: *mut u8, size: u64) -> Self {
        Self { base, size }
    }
}

// SAFETY: constructor contract
unsafe impl Aperture for MmioAperture {
    fn base_ptr(&self) -> *mut u8 {
        self.base
    }

    fn size(&self) -> u64 {
        self.size
    }
}

// =============================================================================
// HOST APERTURE
// =============================================================================

/// VRAM carved out of host memory
///
/// Used on parts without dedicated VRAM and to run the driver core on a
/// host.
#[derive(Debug)]
pub struct HostAperture {
    base: *mut u8,
    layout: Layout,
}

// SAFETY: owned allocation; see MmioAperture
unsafe impl Send for HostAperture {}
// SAFETY: see above
unsafe impl Sync for HostAperture {}

impl HostAperture {
    /// Allocate a zeroed, page-aligned window of `size` bytes
    pub fn new(size: u64) -> Result<Self> {
        if size == 0 || size % PAGE_SIZE != 0 {
            return Err(Error::InvalidArgument);
        }
        let size = usize::try_from(size).map_err(|_| Error::OutOfMemory)?;
        let layout =
            Layout::from_size_align(size, PAGE_SIZE as usize).map_err(|_| Error::InvalidArgument)?;
        // SAFETY: layout has non-zero size
        let base = unsafe { alloc_zeroed(layout) };
        if base.is_null() {
            return Err(Error::OutOfMemory);
        }
        Ok(Self { base, layout })
    }
}

impl Drop for HostAperture {
    fn drop(&mut self) {
        // SAFETY: allocated in new() with this layout
        unsafe { dealloc(self.base, self.layout) }
    }
}

// SAFETY: the allocation lives until drop
unsafe impl Aperture for HostAperture {
    fn base_ptr(&self) -> *mut u8 {
        self.base
    }

    fn size(&self) -> u64 {
        self.layout.size() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_aperture() {
        let ap = HostAperture::new(4 * PAGE_SIZE).unwrap();
        assert_eq!(ap.size(), 4 * PAGE_SIZE);
        assert_eq!(ap.base_ptr() as usize % PAGE_SIZE as usize, 0);
        // SAFETY: within the allocation
        unsafe {
            assert_eq!(*ap.base_ptr().add(100), 0);
            *ap.base_ptr().add(100) = 7;
            assert_eq!(*ap.base_ptr().add(100), 7);
        }
    }

    #[test]
    fn test_host_aperture_rejects() {
        assert_eq!(HostAperture::new(0).err(), Some(Error::InvalidArgument));
        assert_eq!(HostAperture::new(100).err(), Some(Error::InvalidArgument));
    }
}
