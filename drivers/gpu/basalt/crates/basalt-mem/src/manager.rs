//! # Buffer Object Manager
//!
//! Arbitrates the VRAM pool against host memory.
//!
//! ## Locking
//!
//! - every buffer object sits behind its own reservation mutex
//! - the object arena is only held to look up, insert or remove an entry
//! - the VRAM allocator is taken while holding the requester's reservation;
//!   eviction victims are reserved with `try_lock` and skipped if contended
//! - the LRU list is always taken last

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use spin::{Mutex, MutexGuard, RwLock};

use basalt_core::types::{pages_for, PAGE_SHIFT, PAGE_SIZE};
use basalt_core::{BoHandle, BusAddr, DeviceConfig, Error, Fences, Result};

use crate::aperture::Aperture;
use crate::bo::{Backing, BoInfo, BufferObject, MoveReport};
use crate::domain::{Domain, DomainFlags, Placement, PlacementFlags};
use crate::evict::{Candidate, EvictionOrder, LeastRecentlyUsed};
use crate::mapping::{Caching, CpuMap};
use crate::range::{RangeAllocator, RangeRequest, RangeStats};

// =============================================================================
// REQUESTS
// =============================================================================

/// Buffer object creation parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoDesc<'a> {
    /// Size in bytes, rounded up to pages
    pub size: u64,
    /// Alignment in bytes (power of two, 0 means page aligned)
    pub alignment: u64,
    /// Acceptable domains
    pub domains: DomainFlags,
    /// Placement modifiers
    pub flags: PlacementFlags,
    /// Debug name
    pub name: Option<&'a str>,
}

impl<'a> BoDesc<'a> {
    /// Page-aligned object of `size` bytes in `domains`
    pub const fn new(size: u64, domains: DomainFlags) -> Self {
        Self {
            size,
            alignment: 0,
            domains,
            flags: PlacementFlags::empty(),
            name: None,
        }
    }

    /// Set alignment in bytes
    pub const fn aligned(mut self, alignment: u64) -> Self {
        self.alignment = alignment;
        self
    }

    /// Set placement modifiers
    pub const fn flags(mut self, flags: PlacementFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Set debug name
    pub const fn named(mut self, name: &'a str) -> Self {
        self.name = Some(name);
        self
    }
}

/// How an operation may wait
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpCtx {
    /// Fail with `Busy` instead of waiting for a contended reservation
    pub no_wait: bool,
}

impl OpCtx {
    /// Wait for reservations
    pub const BLOCKING: Self = Self { no_wait: false };
    /// Never wait
    pub const NO_WAIT: Self = Self { no_wait: true };
}

// =============================================================================
// STATISTICS
// =============================================================================

#[derive(Debug, Default)]
struct Counters {
    created: AtomicU64,
    destroyed: AtomicU64,
    moves: AtomicU64,
    evictions: AtomicU64,
    live_map_moves: AtomicU64,
}

/// Manager statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagerStats {
    /// Live objects
    pub objects: u64,
    /// Objects created
    pub created: u64,
    /// Objects destroyed
    pub destroyed: u64,
    /// Moves, eviction included
    pub moves: u64,
    /// Evictions
    pub evictions: u64,
    /// Moves performed while a mapping was in use
    pub live_map_moves: u64,
    /// VRAM pool in pages
    pub vram_total_pages: u64,
    /// Free VRAM pages
    pub vram_free_pages: u64,
    /// VRAM allocator counters
    pub vram: RangeStats,
}

// =============================================================================
// BO MANAGER
// =============================================================================

type BoRef = Arc<Mutex<BufferObject>>;

/// Buffer object manager
pub struct BoManager {
    config: DeviceConfig,
    objects: RwLock<BTreeMap<BoHandle, BoRef>>,
    vram: Mutex<RangeAllocator>,
    /// VRAM-resident objects, least recently used first
    lru: Mutex<Vec<Candidate>>,
    aperture: Box<dyn Aperture>,
    fences: Arc<dyn Fences>,
    eviction: Box<dyn EvictionOrder>,
    next_id: AtomicU64,
    counters: Counters,
}

impl core::fmt::Debug for BoManager {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BoManager")
            .field("config", &self.config)
            .field("objects", &self.objects.read().len())
            .field("vram", &*self.vram.lock())
            .finish_non_exhaustive()
    }
}

impl BoManager {
    /// Manager over the VRAM described by `config`
    pub fn new(
        config: DeviceConfig,
        aperture: Box<dyn Aperture>,
        fences: Arc<dyn Fences>,
    ) -> Result<Self> {
        config.validate()?;
        if aperture.size() < config.vram_size {
            log::warn!(
                "aperture of {} bytes cannot cover {} bytes of VRAM",
                aperture.size(),
                config.vram_size
            );
            return Err(Error::InvalidArgument);
        }

        Ok(Self {
            config,
            objects: RwLock::new(BTreeMap::new()),
            vram: Mutex::new(RangeAllocator::new(config.vram_pages())),
            lru: Mutex::new(Vec::new()),
            aperture,
            fences,
            eviction: Box::new(LeastRecentlyUsed),
            next_id: AtomicU64::new(1),
            counters: Counters::default(),
        })
    }

    /// Replace the eviction order
    pub fn with_eviction_order(mut self, order: Box<dyn EvictionOrder>) -> Self {
        self.eviction = order;
        self
    }

    /// Device configuration
    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// VRAM aperture
    pub fn aperture(&self) -> &dyn Aperture {
        &*self.aperture
    }

    fn host_caching(&self) -> Caching {
        if self.config.cached_coherent {
            Caching::Cached
        } else {
            Caching::WriteCombined
        }
    }

    // =========================================================================
    // Object lookup
    // =========================================================================

    fn lookup(&self, handle: BoHandle) -> Result<BoRef> {
        self.objects
            .read()
            .get(&handle)
            .cloned()
            .ok_or(Error::NotFound)
    }

    /// Reserve a live object
    fn reserve<'a>(&self, bo: &'a BoRef, ctx: OpCtx) -> Result<MutexGuard<'a, BufferObject>> {
        let guard = if ctx.no_wait {
            bo.try_lock().ok_or(Error::Busy)?
        } else {
            bo.lock()
        };
        // destroyed between lookup and reservation
        if guard.refs() == 0 {
            return Err(Error::NotFound);
        }
        Ok(guard)
    }

    fn with_bo<T, F>(&self, handle: BoHandle, ctx: OpCtx, f: F) -> Result<T>
    where
        F: FnOnce(&mut BufferObject) -> Result<T>,
    {
        let bo = self.lookup(handle)?;
        let mut guard = self.reserve(&bo, ctx)?;
        f(&mut *guard)
    }

    fn misuse(&self, handle: BoHandle, what: &str) -> Error {
        log::error!("bo {:?}: {}", handle, what);
        Error::MapMisuse
    }

    // =========================================================================
    // Creation & destruction
    // =========================================================================

    /// Create and place a buffer object
    pub fn create_bo(&self, domains: DomainFlags, size: u64, alignment: u64) -> Result<BoHandle> {
        self.create_bo_with(BoDesc::new(size, domains).aligned(alignment))
    }

    /// Create and place a buffer object from a description
    pub fn create_bo_with(&self, desc: BoDesc<'_>) -> Result<BoHandle> {
        self.create_inner(desc, 0)
    }

    /// Wrap an externally shared buffer, placed in GTT
    pub fn import_shared(&self, size: u64) -> Result<BoHandle> {
        let handle = self.create_inner(BoDesc::new(size, DomainFlags::GTT), 1)?;
        log::info!("imported shared buffer of {:#x} bytes as {:?}", size, handle);
        Ok(handle)
    }

    fn create_inner(&self, desc: BoDesc<'_>, shared: u32) -> Result<BoHandle> {
        if desc.size == 0 || desc.size > u64::MAX - PAGE_SIZE {
            return Err(Error::InvalidArgument);
        }
        let alignment = desc.alignment.max(1);
        if !alignment.is_power_of_two() {
            return Err(Error::InvalidArgument);
        }
        let placement = Placement::new(desc.domains, desc.flags)?;
        let size = pages_for(desc.size) << PAGE_SHIFT;

        let handle = BoHandle::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut bo = BufferObject::new(handle, size, pages_for(alignment).max(1), placement);
        if let Some(name) = desc.name {
            bo.set_name(name);
        }
        for _ in 0..shared {
            bo.add_share();
        }

        // not yet visible to anyone else
        if let Err(e) = self.validate_locked(&mut bo) {
            log::debug!("bo {:?}: creation failed: {}", handle, e);
            return Err(e);
        }

        self.objects.write().insert(handle, Arc::new(Mutex::new(bo)));
        self.counters.created.fetch_add(1, Ordering::Relaxed);
        Ok(handle)
    }

    /// Take another handle reference
    pub fn reference(&self, handle: BoHandle) -> Result<()> {
        self.with_bo(handle, OpCtx::BLOCKING, |bo| bo.add_ref().map(|_| ()))
    }

    /// Drop a handle reference, destroying the object on the last one
    ///
    /// The last reference of a pinned object cannot be dropped.
    pub fn release(&self, handle: BoHandle) -> Result<()> {
        let arc = self.lookup(handle)?;
        let mut bo = self.reserve(&arc, OpCtx::BLOCKING)?;

        if bo.refs() > 1 {
            bo.drop_ref();
            return Ok(());
        }
        if bo.is_pinned() {
            return Err(self.misuse(handle, "destroyed while pinned"));
        }
        if bo.domain().is_some() {
            self.fences.wait_idle(handle)?;
        }

        bo.drop_ref();
        let ranges = bo.teardown();
        self.objects.write().remove(&handle);
        self.lru_remove(handle);
        self.counters.destroyed.fetch_add(1, Ordering::Relaxed);

        let freed = {
            let mut vram = self.vram.lock();
            ranges
                .into_iter()
                .fold(Ok(()), |acc, range| acc.and(vram.free(range)))
        };
        if let Err(e) = freed {
            log::error!("bo {:?}: destroyed holding an untracked VRAM range", handle);
            return Err(e);
        }
        log::debug!("bo {:?}: destroyed", handle);
        Ok(())
    }

    // =========================================================================
    // Placement
    // =========================================================================

    /// Replace the requested placement without moving
    pub fn set_placement(
        &self,
        handle: BoHandle,
        domains: DomainFlags,
        flags: PlacementFlags,
    ) -> Result<()> {
        let placement = Placement::new(domains, flags)?;
        self.with_bo(handle, OpCtx::BLOCKING, |bo| {
            bo.set_placement(placement);
            Ok(())
        })
    }

    /// Make sure the object sits in one of its requested domains
    ///
    /// Returns the move report if the object had to move.
    pub fn validate(&self, handle: BoHandle, ctx: OpCtx) -> Result<Option<MoveReport>> {
        self.with_bo(handle, ctx, |bo| self.validate_locked(bo))
    }

    fn validate_locked(&self, bo: &mut BufferObject) -> Result<Option<MoveReport>> {
        if bo.is_placed_acceptably() {
            return Ok(None);
        }
        if bo.is_pinned() {
            log::error!(
                "bo {:?}: pinned in {:?}, cannot move to {:?}",
                bo.handle(),
                bo.domain(),
                bo.placement().set()
            );
            return Err(Error::InvalidArgument);
        }
        if bo.domain().is_some() {
            self.fences.wait_idle(bo.handle())?;
        }

        let placement = bo.placement().clone();
        for &domain in placement.domains() {
            match self.place_in(bo, domain, placement.top_down()) {
                Ok(report) => return Ok(Some(report)),
                Err(Error::OutOfMemory) => {
                    log::debug!("bo {:?}: no room in {}", bo.handle(), domain);
                }
                Err(e) => return Err(e),
            }
        }
        Err(Error::OutOfMemory)
    }

    fn place_in(&self, bo: &mut BufferObject, domain: Domain, top_down: bool) -> Result<MoveReport> {
        let handle = bo.handle();
        let (freed, report) = match domain {
            Domain::Vram => {
                let mut vram = self.vram.lock();
                let req = RangeRequest::new(bo.pages())
                    .aligned(bo.alignment_pages())
                    .top_down(top_down);
                let candidates = self.eviction.order(&self.lru.lock());
                let range = vram.allocate_or_evict(req, candidates, |alloc, victim| {
                    victim != handle && self.evict_one(alloc, victim)
                })?;

                match bo.relocate(Domain::Vram, Backing::Vram(range), &*self.aperture) {
                    Ok((freed, report)) => {
                        if let Some(old) = freed {
                            vram.free(old)?;
                        }
                        drop(vram);
                        self.lru_touch(handle, bo.pages());
                        (None, report)
                    }
                    Err(e) => {
                        vram.free(range)?;
                        return Err(e);
                    }
                }
            }
            Domain::Gtt | Domain::System => {
                let backing = Backing::host(bo.size())?;
                bo.relocate(domain, backing, &*self.aperture)?
            }
        };

        if let Some(old) = freed {
            self.vram.lock().free(old)?;
            self.lru_remove(handle);
        }
        self.record_move(handle, &report);
        Ok(report)
    }

    /// Move one unpinned VRAM object to SYSTEM, freeing its range
    fn evict_one(&self, alloc: &mut RangeAllocator, victim: BoHandle) -> bool {
        let Ok(arc) = self.lookup(victim) else {
            return false;
        };
        let Some(mut bo) = arc.try_lock() else {
            log::warn!("evict: bo {:?} is reserved, skipping", victim);
            return false;
        };
        if bo.refs() == 0 || bo.is_pinned() || bo.domain() != Some(Domain::Vram) {
            return false;
        }
        if let Err(e) = self.fences.wait_idle(victim) {
            log::warn!("evict: bo {:?} still busy ({}), skipping", victim, e);
            return false;
        }

        let Ok(backing) = Backing::host(bo.size()) else {
            return false;
        };
        match bo.relocate(Domain::System, backing, &*self.aperture) {
            Ok((freed, report)) => {
                if let Some(range) = freed {
                    if alloc.free(range).is_err() {
                        log::error!("evict: bo {:?} held untracked range {:?}", victim, range);
                    }
                }
                self.lru_remove(victim);
                self.counters.evictions.fetch_add(1, Ordering::Relaxed);
                self.record_move(victim, &report);
                true
            }
            Err(e) => {
                log::warn!("evict: bo {:?} could not move ({})", victim, e);
                false
            }
        }
    }

    fn record_move(&self, handle: BoHandle, report: &MoveReport) {
        if report.from.is_some() {
            self.counters.moves.fetch_add(1, Ordering::Relaxed);
        }
        if report.live_map {
            self.counters.live_map_moves.fetch_add(1, Ordering::Relaxed);
        }
        log::debug!(
            "bo {:?}: {:?} -> {} ({} bytes copied)",
            handle,
            report.from,
            report.to,
            report.bytes_copied
        );
    }

    fn lru_touch(&self, handle: BoHandle, pages: u64) {
        let mut lru = self.lru.lock();
        lru.retain(|c| c.handle != handle);
        lru.push(Candidate::new(handle, pages));
    }

    fn lru_remove(&self, handle: BoHandle) {
        self.lru.lock().retain(|c| c.handle != handle);
    }

    // =========================================================================
    // Pinning
    // =========================================================================

    /// Pin, placing the object first if needed
    pub fn pin(&self, handle: BoHandle) -> Result<()> {
        self.with_bo(handle, OpCtx::BLOCKING, |bo| self.pin_locked(bo))
    }

    fn pin_locked(&self, bo: &mut BufferObject) -> Result<()> {
        if !bo.is_pinned() {
            self.validate_locked(bo)?;
        }
        bo.pins_mut().pin()?;
        Ok(())
    }

    /// Drop a pin
    ///
    /// The object keeps its placement until evicted or destroyed.
    pub fn unpin(&self, handle: BoHandle) -> Result<()> {
        self.with_bo(handle, OpCtx::BLOCKING, |bo| self.unpin_locked(bo))
    }

    fn unpin_locked(&self, bo: &mut BufferObject) -> Result<()> {
        let handle = bo.handle();
        match bo.pin_count() {
            0 => return Err(self.misuse(handle, "unpin without pin")),
            1 if bo.vmap_count() > 0 => {
                return Err(self.misuse(handle, "last unpin while mapped"));
            }
            _ => {}
        }
        if bo.pins_mut().unpin()? == 0 && bo.domain() == Some(Domain::Vram) {
            self.lru_touch(handle, bo.pages());
        }
        Ok(())
    }

    /// Pin into GTT for sharing with another device
    pub fn pin_shared(&self, handle: BoHandle) -> Result<()> {
        self.with_bo(handle, OpCtx::BLOCKING, |bo| {
            let previous = bo.placement().clone();
            bo.set_placement(Placement::new(DomainFlags::GTT, previous.flags())?);
            if let Err(e) = self.pin_locked(bo) {
                bo.set_placement(previous);
                return Err(e);
            }
            bo.add_share();
            log::info!("bo {:?}: shared pin, count {}", bo.handle(), bo.shared_count());
            Ok(())
        })
    }

    /// Drop a shared pin
    pub fn unpin_shared(&self, handle: BoHandle) -> Result<()> {
        self.with_bo(handle, OpCtx::BLOCKING, |bo| {
            self.unpin_locked(bo)?;
            bo.drop_share();
            log::info!("bo {:?}: shared unpin, count {}", bo.handle(), bo.shared_count());
            Ok(())
        })
    }

    // =========================================================================
    // CPU mapping
    // =========================================================================

    /// Map a pinned object for the CPU
    pub fn vmap(&self, handle: BoHandle) -> Result<CpuMap> {
        let caching = self.host_caching();
        self.with_bo(handle, OpCtx::BLOCKING, |bo| {
            bo.vmap(&*self.aperture, caching).map_err(|e| match e {
                Error::MapMisuse => self.misuse(handle, "vmap while unpinned"),
                e => e,
            })
        })
    }

    /// Drop a mapping user
    pub fn vunmap(&self, handle: BoHandle, map: &CpuMap) -> Result<()> {
        self.with_bo(handle, OpCtx::BLOCKING, |bo| match bo.vunmap(map) {
            Ok((_, Some(stale))) => self.vram.lock().free(stale),
            Ok((_, None)) => Ok(()),
            Err(_) => Err(self.misuse(handle, "vunmap without matching vmap")),
        })
    }

    // =========================================================================
    // Addresses
    // =========================================================================

    /// Bus address of a pinned VRAM object
    pub fn gpu_offset(&self, handle: BoHandle) -> Result<BusAddr> {
        self.with_bo(handle, OpCtx::BLOCKING, |bo| {
            if !bo.is_pinned() {
                return Err(self.misuse(handle, "gpu offset of an unpinned object"));
            }
            let range = bo.vram_range().ok_or(Error::InvalidArgument)?;
            Ok(self.config.vram_base + (range.start << PAGE_SHIFT))
        })
    }

    // =========================================================================
    // Observers
    // =========================================================================

    /// Set an object's debug name
    pub fn set_name(&self, handle: BoHandle, name: &str) -> Result<()> {
        self.with_bo(handle, OpCtx::BLOCKING, |bo| {
            bo.set_name(name);
            Ok(())
        })
    }

    /// Snapshot of one object
    pub fn bo_info(&self, handle: BoHandle) -> Result<BoInfo> {
        self.with_bo(handle, OpCtx::BLOCKING, |bo| Ok(bo.info()))
    }

    /// Snapshot of every object, by handle
    pub fn list_bos(&self) -> Vec<BoInfo> {
        let objects: Vec<BoRef> = self.objects.read().values().cloned().collect();
        objects
            .iter()
            .filter_map(|bo| self.reserve(bo, OpCtx::BLOCKING).ok().map(|g| g.info()))
            .collect()
    }

    /// VRAM-resident objects, least recently used first
    pub fn lru_snapshot(&self) -> Vec<BoHandle> {
        self.lru.lock().iter().map(|c| c.handle).collect()
    }

    /// Whether the VRAM allocator's bookkeeping is consistent
    pub fn vram_consistent(&self) -> bool {
        self.vram.lock().is_consistent()
    }

    /// Statistics
    pub fn stats(&self) -> ManagerStats {
        let (vram_total_pages, vram_free_pages, vram) = {
            let v = self.vram.lock();
            (v.total_pages(), v.free_pages(), *v.stats())
        };
        ManagerStats {
            objects: self.objects.read().len() as u64,
            created: self.counters.created.load(Ordering::Relaxed),
            destroyed: self.counters.destroyed.load(Ordering::Relaxed),
            moves: self.counters.moves.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            live_map_moves: self.counters.live_map_moves.load(Ordering::Relaxed),
            vram_total_pages,
            vram_free_pages,
            vram,
        }
    }
}

static_assertions::assert_impl_all!(BoManager: Send, Sync);

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use crate::aperture::HostAperture;
    use crate::evict::LargestFirst;
    use crate::mapping::MapState;
    use crate::range::PageRange;
    use core::sync::atomic::AtomicBool;
    use std::thread;

    const VRAM_BASE: u64 = 0x4000_0000;

    #[derive(Debug, Default)]
    struct TestFences {
        busy: AtomicBool,
        waits: AtomicU64,
    }

    impl Fences for TestFences {
        fn wait_idle(&self, _bo: BoHandle) -> Result<()> {
            self.waits.fetch_add(1, Ordering::Relaxed);
            if self.busy.load(Ordering::Relaxed) {
                Err(Error::Busy)
            } else {
                Ok(())
            }
        }
    }

    fn manager_with(pages: u64, fences: Arc<TestFences>) -> BoManager {
        let config = DeviceConfig::new(BusAddr::new(VRAM_BASE), pages * PAGE_SIZE);
        let aperture = HostAperture::new(pages * PAGE_SIZE).unwrap();
        BoManager::new(config, Box::new(aperture), fences).unwrap()
    }

    fn manager(pages: u64) -> BoManager {
        manager_with(pages, Arc::new(TestFences::default()))
    }

    fn vram_bo(m: &BoManager, pages: u64) -> Result<BoHandle> {
        m.create_bo(DomainFlags::VRAM, pages * PAGE_SIZE, 0)
    }

    #[test]
    fn test_create_validates() {
        let m = manager(16);
        assert_eq!(m.create_bo(DomainFlags::VRAM, 0, 0), Err(Error::InvalidArgument));
        assert_eq!(
            m.create_bo(DomainFlags::VRAM, PAGE_SIZE, 3 * PAGE_SIZE),
            Err(Error::InvalidArgument)
        );
        assert_eq!(
            m.create_bo(DomainFlags::empty(), PAGE_SIZE, 0),
            Err(Error::InvalidArgument)
        );

        let h = m.create_bo(DomainFlags::VRAM, 100, 0).unwrap();
        let info = m.bo_info(h).unwrap();
        assert_eq!(info.size, PAGE_SIZE);
        assert_eq!(info.domain, Some(Domain::Vram));
        assert_eq!(info.refs, 1);
        assert_eq!(m.stats().vram_free_pages, 15);
    }

    #[test]
    fn test_pinned_blocks_eviction_then_unpin_allows_it() {
        let m = manager(16);
        let big = vram_bo(&m, 12).unwrap();
        m.pin(big).unwrap();

        assert_eq!(vram_bo(&m, 8), Err(Error::OutOfMemory));
        assert_eq!(m.bo_info(big).unwrap().domain, Some(Domain::Vram));

        m.unpin(big).unwrap();
        let small = vram_bo(&m, 8).unwrap();

        let big_info = m.bo_info(big).unwrap();
        assert_eq!(big_info.domain, Some(Domain::System));
        // eviction keeps the requested placement
        assert_eq!(big_info.requested, DomainFlags::VRAM);
        assert_eq!(m.bo_info(small).unwrap().domain, Some(Domain::Vram));

        let stats = m.stats();
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.vram_free_pages, 8);
        assert!(m.vram_consistent());
    }

    #[test]
    fn test_evicted_bo_returns_on_pin() {
        let m = manager(16);
        let a = vram_bo(&m, 12).unwrap();
        let b = vram_bo(&m, 8).unwrap();
        assert_eq!(m.bo_info(a).unwrap().domain, Some(Domain::System));

        m.pin(a).unwrap();
        assert_eq!(m.bo_info(a).unwrap().domain, Some(Domain::Vram));
        assert_eq!(m.bo_info(b).unwrap().domain, Some(Domain::System));
        assert_eq!(m.stats().evictions, 2);
    }

    #[test]
    fn test_unpin_without_pin() {
        let m = manager(4);
        let h = vram_bo(&m, 1).unwrap();
        assert_eq!(m.unpin(h), Err(Error::MapMisuse));
        assert_eq!(m.bo_info(h).unwrap().pin_count, 0);
    }

    #[test]
    fn test_vmap_requires_pin() {
        let m = manager(4);
        let h = vram_bo(&m, 1).unwrap();
        assert_eq!(m.vmap(h).err(), Some(Error::MapMisuse));
    }

    #[test]
    fn test_vmap_refcount_keeps_pointer() {
        let m = manager(4);
        let h = vram_bo(&m, 1).unwrap();
        m.pin(h).unwrap();

        let first = m.vmap(h).unwrap();
        let second = m.vmap(h).unwrap();
        assert_eq!(first, second);
        assert_eq!(m.bo_info(h).unwrap().vmap_count, 2);

        m.vunmap(h, &first).unwrap();
        assert_eq!(m.bo_info(h).unwrap().vmap_count, 1);
        let third = m.vmap(h).unwrap();
        assert_eq!(third.as_ptr(), first.as_ptr());
        assert!(third.is_iomem());
        assert_eq!(third.caching(), Caching::WriteCombined);
    }

    #[test]
    fn test_vunmap_misuse() {
        let m = manager(4);
        let a = vram_bo(&m, 1).unwrap();
        let b = vram_bo(&m, 1).unwrap();
        m.pin(a).unwrap();
        m.pin(b).unwrap();
        let map_b = m.vmap(b).unwrap();
        assert_eq!(m.vunmap(a, &map_b), Err(Error::MapMisuse));
        let map_a = m.vmap(a).unwrap();
        m.vunmap(a, &map_a).unwrap();
        assert_eq!(m.vunmap(a, &map_a), Err(Error::MapMisuse));
    }

    #[test]
    fn test_last_unpin_while_mapped() {
        let m = manager(4);
        let h = vram_bo(&m, 1).unwrap();
        m.pin(h).unwrap();
        let map = m.vmap(h).unwrap();
        assert_eq!(m.unpin(h), Err(Error::MapMisuse));
        m.vunmap(h, &map).unwrap();
        m.unpin(h).unwrap();
        assert_eq!(
            m.bo_info(h).unwrap().map_state,
            MapState::PendingUnmapOnEvict { map }
        );
    }

    #[test]
    fn test_eviction_preserves_contents_and_drops_pending_map() {
        let m = manager(8);
        let a = m
            .create_bo(DomainFlags::VRAM | DomainFlags::SYSTEM, 4 * PAGE_SIZE, 0)
            .unwrap();
        assert_eq!(m.bo_info(a).unwrap().domain, Some(Domain::Vram));
        m.pin(a).unwrap();
        let map = m.vmap(a).unwrap();
        // SAFETY: the mapping covers 4 pages
        unsafe { core::ptr::write_bytes(map.as_ptr(), 0xA5, 4 * PAGE_SIZE as usize) };
        m.vunmap(a, &map).unwrap();
        m.unpin(a).unwrap();

        let b = vram_bo(&m, 6).unwrap();
        let info = m.bo_info(a).unwrap();
        assert_eq!(info.domain, Some(Domain::System));
        assert_eq!(info.map_state, MapState::Unmapped);

        // SYSTEM is acceptable, so pinning does not move it back
        m.pin(a).unwrap();
        let host = m.vmap(a).unwrap();
        assert!(!host.is_iomem());
        assert_eq!(host.caching(), Caching::Cached);
        // SAFETY: the mapping covers 4 pages
        unsafe {
            assert_eq!(*host.as_ptr(), 0xA5);
            assert_eq!(*host.as_ptr().add(4 * PAGE_SIZE as usize - 1), 0xA5);
        }
        m.vunmap(a, &host).unwrap();
        m.unpin(a).unwrap();

        m.release(b).unwrap();
        m.set_placement(a, DomainFlags::VRAM, PlacementFlags::empty())
            .unwrap();
        let report = m.validate(a, OpCtx::BLOCKING).unwrap().unwrap();
        assert_eq!(report.from, Some(Domain::System));
        assert_eq!(report.to, Domain::Vram);
        assert_eq!(report.bytes_copied, 4 * PAGE_SIZE);

        m.pin(a).unwrap();
        let back = m.vmap(a).unwrap();
        assert!(back.is_iomem());
        // SAFETY: the mapping covers 4 pages
        unsafe { assert_eq!(*back.as_ptr().add(PAGE_SIZE as usize), 0xA5) };
        assert_eq!(m.stats().live_map_moves, 0);
    }

    #[test]
    fn test_gpu_offset() {
        let m = manager(16);
        let low = vram_bo(&m, 2).unwrap();
        let top = m
            .create_bo_with(
                BoDesc::new(PAGE_SIZE, DomainFlags::VRAM).flags(PlacementFlags::TOPDOWN),
            )
            .unwrap();
        let sys = m.create_bo(DomainFlags::SYSTEM, PAGE_SIZE, 0).unwrap();

        assert_eq!(m.gpu_offset(low), Err(Error::MapMisuse));
        m.pin(low).unwrap();
        m.pin(top).unwrap();
        m.pin(sys).unwrap();
        assert_eq!(m.gpu_offset(low), Ok(BusAddr::new(VRAM_BASE)));
        assert_eq!(m.gpu_offset(top), Ok(BusAddr::new(VRAM_BASE + 15 * PAGE_SIZE)));
        assert_eq!(m.gpu_offset(sys), Err(Error::InvalidArgument));
    }

    #[test]
    fn test_alignment_in_bytes() {
        let m = manager(16);
        vram_bo(&m, 1).unwrap();
        let h = m.create_bo(DomainFlags::VRAM, PAGE_SIZE, 4 * PAGE_SIZE).unwrap();
        assert_eq!(m.bo_info(h).unwrap().vram_range.map(|r| r.start), Some(4));
    }

    #[test]
    fn test_fallback_domain() {
        let m = manager(4);
        let h = m
            .create_bo(DomainFlags::VRAM | DomainFlags::SYSTEM, 8 * PAGE_SIZE, 0)
            .unwrap();
        assert_eq!(m.bo_info(h).unwrap().domain, Some(Domain::System));
    }

    #[test]
    fn test_validate_pinned_outside_placement() {
        let m = manager(4);
        let h = vram_bo(&m, 1).unwrap();
        m.pin(h).unwrap();
        m.set_placement(h, DomainFlags::SYSTEM, PlacementFlags::empty())
            .unwrap();
        assert_eq!(m.validate(h, OpCtx::BLOCKING), Err(Error::InvalidArgument));

        m.unpin(h).unwrap();
        let report = m.validate(h, OpCtx::BLOCKING).unwrap().unwrap();
        assert_eq!(report.from, Some(Domain::Vram));
        assert_eq!(report.to, Domain::System);
        assert_eq!(m.stats().vram_free_pages, 4);
        assert!(m.lru_snapshot().is_empty());
    }

    #[test]
    fn test_validate_no_wait() {
        let m = manager(4);
        let h = vram_bo(&m, 1).unwrap();
        let arc = m.lookup(h).unwrap();
        let guard = arc.lock();
        assert_eq!(m.validate(h, OpCtx::NO_WAIT), Err(Error::Busy));
        drop(guard);
        assert_eq!(m.validate(h, OpCtx::NO_WAIT), Ok(None));
    }

    #[test]
    fn test_busy_fence_blocks_eviction() {
        let fences = Arc::new(TestFences::default());
        let m = manager_with(8, fences.clone());
        vram_bo(&m, 6).unwrap();
        fences.busy.store(true, Ordering::Relaxed);
        assert_eq!(vram_bo(&m, 4), Err(Error::OutOfMemory));
        fences.busy.store(false, Ordering::Relaxed);
        assert!(vram_bo(&m, 4).is_ok());
        assert!(fences.waits.load(Ordering::Relaxed) >= 2);
    }

    #[test]
    fn test_reserved_victim_is_skipped() {
        let m = manager(8);
        let a = vram_bo(&m, 6).unwrap();
        let arc = m.lookup(a).unwrap();
        let guard = arc.lock();
        assert_eq!(vram_bo(&m, 4), Err(Error::OutOfMemory));
        drop(guard);
        assert!(vram_bo(&m, 4).is_ok());
    }

    #[test]
    fn test_release() {
        let m = manager(8);
        let h = vram_bo(&m, 4).unwrap();
        m.reference(h).unwrap();
        m.pin(h).unwrap();

        m.release(h).unwrap();
        assert_eq!(m.release(h), Err(Error::MapMisuse));
        assert_eq!(m.bo_info(h).unwrap().refs, 1);

        m.unpin(h).unwrap();
        m.release(h).unwrap();
        assert_eq!(m.bo_info(h).err(), Some(Error::NotFound));
        assert_eq!(m.release(h), Err(Error::NotFound));
        assert_eq!(m.stats().vram_free_pages, 8);
        assert_eq!(m.stats().destroyed, 1);
        assert!(m.lru_snapshot().is_empty());
    }

    #[test]
    fn test_release_frees_arena_when_range_is_untracked() {
        let m = manager(8);
        let h = vram_bo(&m, 2).unwrap();
        let range = m.bo_info(h).unwrap().vram_range.unwrap();
        m.vram.lock().free(range).unwrap();

        assert_eq!(m.release(h), Err(Error::NotFound));
        assert_eq!(m.bo_info(h).err(), Some(Error::NotFound));
        assert!(m.lru_snapshot().is_empty());
        assert_eq!(m.stats().objects, 0);
        assert!(m.vram_consistent());
    }

    #[test]
    fn test_eviction_order_picks_victim() {
        let fill = |m: &BoManager| {
            let small = vram_bo(m, 2).unwrap();
            let big = vram_bo(m, 8).unwrap();
            vram_bo(m, 6).unwrap();
            (small, big)
        };

        let lru = manager(16);
        let (small, big) = fill(&lru);
        vram_bo(&lru, 2).unwrap();
        assert_eq!(lru.bo_info(small).unwrap().domain, Some(Domain::System));
        assert_eq!(lru.bo_info(big).unwrap().domain, Some(Domain::Vram));

        let largest = manager(16).with_eviction_order(Box::new(LargestFirst));
        let (small, big) = fill(&largest);
        let fresh = vram_bo(&largest, 2).unwrap();
        assert_eq!(largest.bo_info(small).unwrap().domain, Some(Domain::Vram));
        assert_eq!(largest.bo_info(big).unwrap().domain, Some(Domain::System));
        assert_eq!(
            largest.bo_info(fresh).unwrap().vram_range,
            Some(PageRange::new(2, 2))
        );
        assert_eq!(largest.stats().evictions, 1);
    }

    #[test]
    fn test_shared_pin() {
        let m = manager(8);
        let h = vram_bo(&m, 2).unwrap();
        m.pin_shared(h).unwrap();
        let info = m.bo_info(h).unwrap();
        assert_eq!(info.domain, Some(Domain::Gtt));
        assert_eq!(info.shared_count, 1);
        assert_eq!(info.pin_count, 1);

        m.unpin_shared(h).unwrap();
        let info = m.bo_info(h).unwrap();
        assert_eq!(info.shared_count, 0);
        assert_eq!(info.pin_count, 0);
        assert_eq!(m.unpin_shared(h), Err(Error::MapMisuse));
    }

    #[test]
    fn test_failed_shared_pin_keeps_placement() {
        let fences = Arc::new(TestFences::default());
        let m = manager_with(8, fences.clone());
        let h = vram_bo(&m, 2).unwrap();

        fences.busy.store(true, Ordering::Relaxed);
        assert_eq!(m.pin_shared(h), Err(Error::Busy));
        let info = m.bo_info(h).unwrap();
        assert_eq!(info.requested, DomainFlags::VRAM);
        assert_eq!(info.domain, Some(Domain::Vram));
        assert_eq!(info.pin_count, 0);
        assert_eq!(info.shared_count, 0);

        fences.busy.store(false, Ordering::Relaxed);
        m.pin_shared(h).unwrap();
        assert_eq!(m.bo_info(h).unwrap().requested, DomainFlags::GTT);
    }

    #[test]
    fn test_import_shared() {
        let m = manager(8);
        let h = m.import_shared(3 * PAGE_SIZE).unwrap();
        let info = m.bo_info(h).unwrap();
        assert_eq!(info.domain, Some(Domain::Gtt));
        assert_eq!(info.shared_count, 1);
        assert_eq!(info.requested, DomainFlags::GTT);
    }

    #[test]
    fn test_uncached_host_mapping() {
        let config = DeviceConfig::new(BusAddr::new(VRAM_BASE), 4 * PAGE_SIZE)
            .with_cached_coherent(false);
        let aperture = HostAperture::new(4 * PAGE_SIZE).unwrap();
        let m = BoManager::new(config, Box::new(aperture), Arc::new(TestFences::default()))
            .unwrap();
        let h = m.create_bo(DomainFlags::GTT, PAGE_SIZE, 0).unwrap();
        m.pin(h).unwrap();
        assert_eq!(m.vmap(h).unwrap().caching(), Caching::WriteCombined);
    }

    #[test]
    fn test_list_and_names() {
        let m = manager(8);
        let a = m
            .create_bo_with(BoDesc::new(PAGE_SIZE, DomainFlags::VRAM).named("scanout"))
            .unwrap();
        let b = m.create_bo(DomainFlags::SYSTEM, PAGE_SIZE, 0).unwrap();
        m.set_name(b, "staging").unwrap();

        let list = m.list_bos();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].handle, a);
        assert_eq!(list[0].name.as_deref(), Some("scanout"));
        assert_eq!(list[1].name.as_deref(), Some("staging"));
    }

    #[test]
    fn test_aperture_too_small() {
        let config = DeviceConfig::new(BusAddr::new(VRAM_BASE), 8 * PAGE_SIZE);
        let aperture = HostAperture::new(4 * PAGE_SIZE).unwrap();
        assert_eq!(
            BoManager::new(config, Box::new(aperture), Arc::new(TestFences::default())).err(),
            Some(Error::InvalidArgument)
        );
    }

    #[test]
    fn test_concurrent_pin_unpin() {
        let m = Arc::new(manager(64));
        let handles: Vec<BoHandle> = (0..8).map(|_| vram_bo(&m, 4).unwrap()).collect();

        let workers: Vec<_> = handles
            .iter()
            .copied()
            .map(|h| {
                let m = Arc::clone(&m);
                thread::spawn(move || {
                    for _ in 0..200 {
                        m.pin(h).unwrap();
                        let map = m.vmap(h).unwrap();
                        m.vunmap(h, &map).unwrap();
                        m.unpin(h).unwrap();
                    }
                })
            })
            .collect();
        for w in workers {
            w.join().unwrap();
        }

        for h in handles {
            let info = m.bo_info(h).unwrap();
            assert_eq!(info.pin_count, 0);
            assert_eq!(info.vmap_count, 0);
        }
        assert!(m.vram_consistent());
        assert_eq!(m.stats().vram_free_pages, 32);
    }
}
