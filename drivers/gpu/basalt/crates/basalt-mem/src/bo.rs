//! # Buffer Objects
//!
//! A buffer object owns its backing store and the pin/map bookkeeping that
//! governs when that store may move. Placement decisions are made by the
//! manager; this module only performs them.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;
use core::ptr::NonNull;

use arrayvec::ArrayVec;

use basalt_core::types::PAGE_SHIFT;
use basalt_core::{BoHandle, Error, Result};

use crate::aperture::Aperture;
use crate::domain::{Domain, DomainFlags, Placement};
use crate::mapping::{Caching, CpuMap, MapState, MappingCache, MoveNotice};
use crate::pin::PinCount;
use crate::range::PageRange;

// =============================================================================
// BACKING STORE
// =============================================================================

/// Memory holding a buffer object's bytes
#[derive(Debug)]
pub enum Backing {
    /// Pages of the VRAM pool
    Vram(PageRange),
    /// Host pages
    Host(Box<[u8]>),
}

impl Backing {
    /// Zeroed host pages
    pub fn host(size: u64) -> Result<Self> {
        let size = usize::try_from(size).map_err(|_| Error::OutOfMemory)?;
        let mut pages = Vec::new();
        pages
            .try_reserve_exact(size)
            .map_err(|_| Error::OutOfMemory)?;
        pages.resize(size, 0u8);
        Ok(Self::Host(pages.into_boxed_slice()))
    }

    /// VRAM range, if any
    pub fn vram_range(&self) -> Option<PageRange> {
        match self {
            Self::Vram(range) => Some(*range),
            Self::Host(_) => None,
        }
    }

    /// Whether the store can hold `size` bytes
    fn holds(&self, size: u64) -> bool {
        match self {
            Self::Vram(range) => range.pages() << PAGE_SHIFT >= size,
            Self::Host(pages) => pages.len() as u64 >= size,
        }
    }

    /// CPU address of the first byte
    fn cpu_ptr(&mut self, aperture: &dyn Aperture) -> Result<NonNull<u8>> {
        let ptr = match self {
            Self::Vram(range) => {
                let offset = range.start << PAGE_SHIFT;
                let end = range.end << PAGE_SHIFT;
                if end > aperture.size() {
                    return Err(Error::InvalidArgument);
                }
                // SAFETY: offset lies inside the aperture (checked above)
                unsafe { aperture.base_ptr().add(offset as usize) }
            }
            Self::Host(pages) => pages.as_mut_ptr(),
        };
        NonNull::new(ptr).ok_or(Error::InvalidArgument)
    }
}

/// Where a buffer object currently lives
#[derive(Debug)]
pub struct Resident {
    /// Domain
    pub domain: Domain,
    /// Backing store
    pub backing: Backing,
}

// =============================================================================
// MOVE REPORT
// =============================================================================

/// Outcome of a move
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoveReport {
    /// Previous domain, `None` for the first placement
    pub from: Option<Domain>,
    /// New domain
    pub to: Domain,
    /// Bytes copied from the old store
    pub bytes_copied: u64,
    /// A pending mapping was torn down
    pub released_pending_map: bool,
    /// The object was still mapped by a user
    pub live_map: bool,
}

// =============================================================================
// BUFFER OBJECT
// =============================================================================

/// A buffer object
#[derive(Debug)]
pub struct BufferObject {
    handle: BoHandle,
    size: u64,
    alignment_pages: u64,
    placement: Placement,
    resident: Option<Resident>,
    pins: PinCount,
    map: MappingCache,
    /// Old store kept alive for a mapping that outlived a move
    stale_backing: Option<Backing>,
    refs: u32,
    shared: u32,
    name: Option<String>,
}

impl BufferObject {
    /// Unplaced object with one handle reference
    pub fn new(handle: BoHandle, size: u64, alignment_pages: u64, placement: Placement) -> Self {
        Self {
            handle,
            size,
            alignment_pages,
            placement,
            resident: None,
            pins: PinCount::new(),
            map: MappingCache::new(),
            stale_backing: None,
            refs: 1,
            shared: 0,
            name: None,
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Handle
    pub fn handle(&self) -> BoHandle {
        self.handle
    }

    /// Size in bytes (page multiple)
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Size in pages
    pub fn pages(&self) -> u64 {
        self.size >> PAGE_SHIFT
    }

    /// Alignment in pages
    pub fn alignment_pages(&self) -> u64 {
        self.alignment_pages
    }

    /// Requested placement
    pub fn placement(&self) -> &Placement {
        &self.placement
    }

    /// Replace the requested placement without moving
    pub fn set_placement(&mut self, placement: Placement) {
        self.placement = placement;
    }

    /// Current domain
    pub fn domain(&self) -> Option<Domain> {
        self.resident.as_ref().map(|r| r.domain)
    }

    /// VRAM range, if resident in VRAM
    pub fn vram_range(&self) -> Option<PageRange> {
        self.resident.as_ref().and_then(|r| r.backing.vram_range())
    }

    /// Whether the current placement satisfies the requested one
    pub fn is_placed_acceptably(&self) -> bool {
        self.domain().is_some_and(|d| self.placement.accepts(d))
    }

    /// Pin count
    pub fn pin_count(&self) -> u32 {
        self.pins.get()
    }

    /// Pinned
    pub fn is_pinned(&self) -> bool {
        self.pins.is_pinned()
    }

    /// Mapping users
    pub fn vmap_count(&self) -> u32 {
        self.map.use_count()
    }

    /// Mapping state
    pub fn map_state(&self) -> MapState {
        self.map.state()
    }

    /// Handle references
    pub fn refs(&self) -> u32 {
        self.refs
    }

    /// Outstanding shared pins
    pub fn shared_count(&self) -> u32 {
        self.shared
    }

    /// Debug name
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Set debug name
    pub fn set_name(&mut self, name: &str) {
        self.name = Some(String::from(name));
    }

    // =========================================================================
    // Counts
    // =========================================================================

    pub(crate) fn pins_mut(&mut self) -> &mut PinCount {
        &mut self.pins
    }

    pub(crate) fn add_ref(&mut self) -> Result<u32> {
        self.refs = self.refs.checked_add(1).ok_or(Error::InvalidArgument)?;
        Ok(self.refs)
    }

    pub(crate) fn drop_ref(&mut self) -> u32 {
        self.refs = self.refs.saturating_sub(1);
        self.refs
    }

    pub(crate) fn add_share(&mut self) {
        self.shared = self.shared.saturating_add(1);
    }

    pub(crate) fn drop_share(&mut self) {
        self.shared = self.shared.saturating_sub(1);
    }

    // =========================================================================
    // Mapping
    // =========================================================================

    /// Map for the CPU, reusing the cached mapping
    pub fn vmap(&mut self, aperture: &dyn Aperture, host_caching: Caching) -> Result<CpuMap> {
        if !self.pins.is_pinned() {
            return Err(Error::MapMisuse);
        }
        if self.map.is_stale() {
            log::warn!("bo {:?}: handing out a mapping of a moved store", self.handle);
        }
        let resident = self.resident.as_mut().ok_or(Error::MapMisuse)?;
        let domain = resident.domain;
        let backing = &mut resident.backing;
        self.map.acquire(|| {
            let ptr = backing.cpu_ptr(aperture)?;
            Ok(match domain {
                Domain::Vram => CpuMap::new(ptr, true, Caching::WriteCombined),
                Domain::Gtt | Domain::System => CpuMap::new(ptr, false, host_caching),
            })
        })
    }

    /// Drop a mapping user
    ///
    /// Returns the remaining users and, once a stale mapping is gone, the
    /// VRAM range it kept reserved.
    pub fn vunmap(&mut self, map: &CpuMap) -> Result<(u32, Option<PageRange>)> {
        let remaining = self.map.release(map)?;
        let mut released = None;
        if self.map.state() == MapState::Unmapped {
            released = self.stale_backing.take().and_then(|b| b.vram_range());
        }
        Ok((remaining, released))
    }

    // =========================================================================
    // Moves
    // =========================================================================

    /// Move into `backing` in `domain`, copying the current contents
    ///
    /// Returns the VRAM range the object left, for the caller to free. A
    /// mapping still in use is reported and left pointing at the previous
    /// store, which stays reserved until the mapping's last user is gone.
    pub fn relocate(
        &mut self,
        domain: Domain,
        mut backing: Backing,
        aperture: &dyn Aperture,
    ) -> Result<(Option<PageRange>, MoveReport)> {
        if !backing.holds(self.size) {
            return Err(Error::InvalidArgument);
        }
        let dst = backing.cpu_ptr(aperture)?;
        let src = match self.resident.as_mut() {
            Some(old) => Some(old.backing.cpu_ptr(aperture)?),
            None => None,
        };

        let notice: MoveNotice = self.map.notify_move();
        if notice.live {
            log::warn!(
                "bo {:?}: moved to {} while mapped by {} user(s)",
                self.handle,
                domain,
                self.map.use_count()
            );
        }

        let size = self.size as usize;
        let bytes_copied = match src {
            Some(src) => {
                // SAFETY: both stores hold `size` bytes and are distinct
                // (a VRAM range is freed only after its replacement exists)
                unsafe { core::ptr::copy_nonoverlapping(src.as_ptr(), dst.as_ptr(), size) };
                self.size
            }
            None => {
                if let Backing::Vram(_) = backing {
                    // SAFETY: dst covers `size` bytes of the aperture
                    unsafe { core::ptr::write_bytes(dst.as_ptr(), 0, size) };
                }
                0
            }
        };

        let from = self.domain();
        let old = self.resident.replace(Resident { domain, backing });
        let mut freed = None;
        if let Some(old) = old {
            if notice.live && self.stale_backing.is_none() {
                self.stale_backing = Some(old.backing);
            } else {
                freed = old.backing.vram_range();
            }
        }

        Ok((
            freed,
            MoveReport {
                from,
                to: domain,
                bytes_copied,
                released_pending_map: notice.released_pending,
                live_map: notice.live,
            },
        ))
    }

    /// Release the backing store and any mapping before destruction
    ///
    /// Returns the VRAM ranges to free.
    pub fn teardown(&mut self) -> ArrayVec<PageRange, 2> {
        self.map.teardown();
        let mut ranges = ArrayVec::new();
        let stale = self.stale_backing.take().and_then(|b| b.vram_range());
        let current = self.resident.take().and_then(|r| r.backing.vram_range());
        ranges.extend(stale.into_iter().chain(current));
        ranges
    }

    /// Snapshot for debugging
    pub fn info(&self) -> BoInfo {
        BoInfo {
            handle: self.handle,
            size: self.size,
            requested: self.placement.set(),
            domain: self.domain(),
            vram_range: self.vram_range(),
            pin_count: self.pins.get(),
            vmap_count: self.map.use_count(),
            map_state: self.map.state(),
            shared_count: self.shared,
            refs: self.refs,
            name: self.name.clone(),
        }
    }
}

/// Point-in-time view of a buffer object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoInfo {
    /// Handle
    pub handle: BoHandle,
    /// Size in bytes
    pub size: u64,
    /// Requested domains
    pub requested: DomainFlags,
    /// Current domain
    pub domain: Option<Domain>,
    /// VRAM pages
    pub vram_range: Option<PageRange>,
    /// Pin count
    pub pin_count: u32,
    /// Mapping users
    pub vmap_count: u32,
    /// Mapping state
    pub map_state: MapState,
    /// Shared pins
    pub shared_count: u32,
    /// Handle references
    pub refs: u32,
    /// Debug name
    pub name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aperture::{Aperture, HostAperture};
    use basalt_core::types::PAGE_SIZE;

    fn bo(pages: u64) -> BufferObject {
        BufferObject::new(
            BoHandle::new(1),
            pages * PAGE_SIZE,
            1,
            Placement::only(Domain::System),
        )
    }

    fn fill(map: &CpuMap, len: usize, byte: u8) {
        // SAFETY: test mappings cover at least `len` bytes
        unsafe { core::ptr::write_bytes(map.as_ptr(), byte, len) }
    }

    fn read(map: &CpuMap, at: usize) -> u8 {
        // SAFETY: see fill
        unsafe { *map.as_ptr().add(at) }
    }

    #[test]
    fn test_vmap_requires_pin() {
        let ap = HostAperture::new(4 * PAGE_SIZE).unwrap();
        let mut b = bo(1);
        b.relocate(Domain::System, Backing::host(PAGE_SIZE).unwrap(), &ap)
            .unwrap();
        assert_eq!(b.vmap(&ap, Caching::Cached), Err(Error::MapMisuse));
        b.pins_mut().pin().unwrap();
        let m = b.vmap(&ap, Caching::Cached).unwrap();
        assert!(!m.is_iomem());
        assert_eq!(b.vmap_count(), 1);
    }

    #[test]
    fn test_relocate_copies_and_releases_pending_map() {
        let ap = HostAperture::new(8 * PAGE_SIZE).unwrap();
        let mut b = bo(2);
        let (_, first) = b
            .relocate(Domain::System, Backing::host(2 * PAGE_SIZE).unwrap(), &ap)
            .unwrap();
        assert_eq!(first.from, None);
        assert_eq!(first.bytes_copied, 0);

        b.pins_mut().pin().unwrap();
        let m = b.vmap(&ap, Caching::Cached).unwrap();
        fill(&m, 2 * PAGE_SIZE as usize, 0x5A);
        assert_eq!(b.vunmap(&m), Ok((0, None)));
        b.pins_mut().unpin().unwrap();

        let (freed, report) = b
            .relocate(Domain::Vram, Backing::Vram(PageRange::new(3, 2)), &ap)
            .unwrap();
        assert_eq!(freed, None);
        assert_eq!(report.from, Some(Domain::System));
        assert_eq!(report.bytes_copied, 2 * PAGE_SIZE);
        assert!(report.released_pending_map);
        assert!(!report.live_map);
        assert_eq!(b.map_state(), MapState::Unmapped);

        b.pins_mut().pin().unwrap();
        let v = b.vmap(&ap, Caching::Cached).unwrap();
        assert!(v.is_iomem());
        assert_eq!(v.caching(), Caching::WriteCombined);
        assert_eq!(v.as_ptr() as usize - ap.base_ptr() as usize, 3 * PAGE_SIZE as usize);
        assert_eq!(read(&v, 0), 0x5A);
        assert_eq!(read(&v, 2 * PAGE_SIZE as usize - 1), 0x5A);
    }

    #[test]
    fn test_relocate_with_live_map_is_flagged() {
        let ap = HostAperture::new(8 * PAGE_SIZE).unwrap();
        let mut b = bo(1);
        b.relocate(Domain::Vram, Backing::Vram(PageRange::new(0, 1)), &ap)
            .unwrap();
        b.pins_mut().pin().unwrap();
        let m = b.vmap(&ap, Caching::Cached).unwrap();
        fill(&m, 16, 0x11);

        let (freed, report) = b
            .relocate(Domain::System, Backing::host(PAGE_SIZE).unwrap(), &ap)
            .unwrap();
        assert!(report.live_map);
        assert_eq!(report.bytes_copied, PAGE_SIZE);
        // the cached mapping still points at the old store, which stays reserved
        assert_eq!(freed, None);
        assert_eq!(b.vmap_count(), 1);
        assert_eq!(b.map_state(), MapState::Mapped { map: m, use_count: 1 });
        assert_eq!(read(&m, 0), 0x11);

        assert_eq!(b.vunmap(&m), Ok((0, Some(PageRange::new(0, 1)))));
        assert_eq!(b.map_state(), MapState::Unmapped);
        let fresh = b.vmap(&ap, Caching::Cached).unwrap();
        assert_ne!(fresh, m);
        assert_eq!(read(&fresh, 0), 0x11);
    }

    #[test]
    fn test_first_vram_placement_is_zeroed() {
        let ap = HostAperture::new(2 * PAGE_SIZE).unwrap();
        // SAFETY: within the aperture
        unsafe { core::ptr::write_bytes(ap.base_ptr(), 0xFF, PAGE_SIZE as usize) };
        let mut b = bo(1);
        b.relocate(Domain::Vram, Backing::Vram(PageRange::new(0, 1)), &ap)
            .unwrap();
        b.pins_mut().pin().unwrap();
        let m = b.vmap(&ap, Caching::Cached).unwrap();
        assert_eq!(read(&m, 17), 0);
    }

    #[test]
    fn test_range_outside_aperture() {
        let ap = HostAperture::new(PAGE_SIZE).unwrap();
        let mut b = bo(1);
        assert_eq!(
            b.relocate(Domain::Vram, Backing::Vram(PageRange::new(1, 1)), &ap)
                .err(),
            Some(Error::InvalidArgument)
        );
        assert_eq!(b.domain(), None);
    }

    #[test]
    fn test_teardown() {
        let ap = HostAperture::new(4 * PAGE_SIZE).unwrap();
        let mut b = bo(1);
        b.relocate(Domain::Vram, Backing::Vram(PageRange::new(2, 1)), &ap)
            .unwrap();
        assert_eq!(b.teardown().as_slice(), [PageRange::new(2, 1)]);
        assert_eq!(b.domain(), None);
        assert!(b.teardown().is_empty());
    }

    #[test]
    fn test_teardown_returns_stale_vram() {
        let ap = HostAperture::new(4 * PAGE_SIZE).unwrap();
        let mut b = bo(1);
        b.relocate(Domain::Vram, Backing::Vram(PageRange::new(0, 1)), &ap)
            .unwrap();
        b.pins_mut().pin().unwrap();
        let _m = b.vmap(&ap, Caching::Cached).unwrap();
        let (freed, _) = b
            .relocate(Domain::Vram, Backing::Vram(PageRange::new(2, 1)), &ap)
            .unwrap();
        assert_eq!(freed, None);

        assert_eq!(
            b.teardown().as_slice(),
            [PageRange::new(0, 1), PageRange::new(2, 1)]
        );
    }
}
