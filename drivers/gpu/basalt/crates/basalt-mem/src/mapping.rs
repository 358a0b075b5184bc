//! # CPU Mapping Cache
//!
//! A buffer object's CPU mapping is reference counted. When the last user
//! releases it the mapping is kept; it is torn down only when the backing
//! store moves or the object is destroyed.
//!
//! ```text
//!             acquire                    release (count -> 0)
//!  Unmapped ───────────► Mapped{n} ─────────────────────────► PendingUnmapOnEvict
//!      ▲                   ▲   │ acquire/release (n > 0)              │
//!      │                   │   └──────────────┘                       │
//!      │                   └──────────── acquire ─────────────────────┤
//!      └──────────────────────────── move / destroy ──────────────────┘
//! ```

use core::ptr::NonNull;

use basalt_core::{Error, Result};

// =============================================================================
// CPU MAP
// =============================================================================

/// CPU caching of a mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Caching {
    /// Normal cached memory
    Cached,
    /// Write-combined
    WriteCombined,
}

/// An established CPU mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuMap {
    addr: NonNull<u8>,
    is_iomem: bool,
    caching: Caching,
}

// SAFETY: a CpuMap is an address plus attributes; access through it is
// governed by the owning buffer object's pin and map counts.
unsafe impl Send for CpuMap {}
// SAFETY: see above
unsafe impl Sync for CpuMap {}

impl CpuMap {
    /// Describe a mapping at `addr`
    pub const fn new(addr: NonNull<u8>, is_iomem: bool, caching: Caching) -> Self {
        Self {
            addr,
            is_iomem,
            caching,
        }
    }

    /// CPU address
    pub const fn as_ptr(&self) -> *mut u8 {
        self.addr.as_ptr()
    }

    /// Device memory (use I/O accessors)
    pub const fn is_iomem(&self) -> bool {
        self.is_iomem
    }

    /// Caching mode
    pub const fn caching(&self) -> Caching {
        self.caching
    }
}

// =============================================================================
// MAP STATE
// =============================================================================

/// Mapping lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MapState {
    /// No mapping
    #[default]
    Unmapped,
    /// Mapping in use
    Mapped {
        /// The mapping
        map: CpuMap,
        /// Outstanding users
        use_count: u32,
    },
    /// Unused mapping kept until the backing store moves
    PendingUnmapOnEvict {
        /// The mapping
        map: CpuMap,
    },
}

/// What a move did to the mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MoveNotice {
    /// A pending mapping was torn down
    pub released_pending: bool,
    /// A mapping was still in use
    pub live: bool,
}

// =============================================================================
// MAPPING CACHE
// =============================================================================

/// Per-object mapping cache
#[derive(Debug, Default)]
pub struct MappingCache {
    state: MapState,
    stale: bool,
}

impl MappingCache {
    /// No mapping
    pub const fn new() -> Self {
        Self {
            state: MapState::Unmapped,
            stale: false,
        }
    }

    /// Current state
    pub const fn state(&self) -> MapState {
        self.state
    }

    /// Outstanding users
    pub const fn use_count(&self) -> u32 {
        match self.state {
            MapState::Mapped { use_count, .. } => use_count,
            _ => 0,
        }
    }

    /// Whether the cached mapping outlived a move of the backing store
    pub const fn is_stale(&self) -> bool {
        self.stale
    }

    /// Take a user of the mapping, establishing it if needed
    pub fn acquire<F>(&mut self, establish: F) -> Result<CpuMap>
    where
        F: FnOnce() -> Result<CpuMap>,
    {
        let (map, use_count) = match self.state {
            MapState::Unmapped => (establish()?, 1),
            MapState::PendingUnmapOnEvict { map } => (map, 1),
            MapState::Mapped { map, use_count } => {
                (map, use_count.checked_add(1).ok_or(Error::InvalidArgument)?)
            }
        };
        self.state = MapState::Mapped { map, use_count };
        Ok(map)
    }

    /// Drop a user of `map`
    ///
    /// The last user leaves the mapping pending, unless it went stale in
    /// which case it is dropped.
    pub fn release(&mut self, map: &CpuMap) -> Result<u32> {
        match self.state {
            MapState::Mapped {
                map: cached,
                use_count,
            } if cached == *map => {
                let remaining = use_count - 1;
                self.state = if remaining > 0 {
                    MapState::Mapped {
                        map: cached,
                        use_count: remaining,
                    }
                } else if self.stale {
                    self.stale = false;
                    MapState::Unmapped
                } else {
                    MapState::PendingUnmapOnEvict { map: cached }
                };
                Ok(remaining)
            }
            _ => Err(Error::MapMisuse),
        }
    }

    /// The backing store is about to move
    pub fn notify_move(&mut self) -> MoveNotice {
        match self.state {
            MapState::Unmapped => MoveNotice::default(),
            MapState::PendingUnmapOnEvict { .. } => {
                self.state = MapState::Unmapped;
                MoveNotice {
                    released_pending: true,
                    live: false,
                }
            }
            MapState::Mapped { .. } => {
                self.stale = true;
                MoveNotice {
                    released_pending: false,
                    live: true,
                }
            }
        }
    }

    /// The object is being destroyed
    pub fn teardown(&mut self) {
        self.state = MapState::Unmapped;
        self.stale = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map_at(addr: usize) -> CpuMap {
        CpuMap::new(NonNull::new(addr as *mut u8).unwrap(), false, Caching::Cached)
    }

    #[test]
    fn test_refcounted_reuse() {
        let mut cache = MappingCache::new();
        let mut established = 0;
        let a = cache
            .acquire(|| {
                established += 1;
                Ok(map_at(0x1000))
            })
            .unwrap();
        let b = cache.acquire(|| Ok(map_at(0x2000))).unwrap();
        assert_eq!(a, b);
        assert_eq!(established, 1);
        assert_eq!(cache.use_count(), 2);

        assert_eq!(cache.release(&a), Ok(1));
        let c = cache.acquire(|| Ok(map_at(0x3000))).unwrap();
        assert_eq!(c, a);
    }

    #[test]
    fn test_deferred_unmap() {
        let mut cache = MappingCache::new();
        let a = cache.acquire(|| Ok(map_at(0x1000))).unwrap();
        assert_eq!(cache.release(&a), Ok(0));
        assert_eq!(cache.state(), MapState::PendingUnmapOnEvict { map: a });

        // reused without re-establishing
        let b = cache.acquire(|| Err(Error::OutOfMemory)).unwrap();
        assert_eq!(a, b);
        cache.release(&b).unwrap();

        let notice = cache.notify_move();
        assert!(notice.released_pending);
        assert_eq!(cache.state(), MapState::Unmapped);
    }

    #[test]
    fn test_misuse() {
        let mut cache = MappingCache::new();
        assert_eq!(cache.release(&map_at(0x1000)), Err(Error::MapMisuse));
        let a = cache.acquire(|| Ok(map_at(0x1000))).unwrap();
        assert_eq!(cache.release(&map_at(0x2000)), Err(Error::MapMisuse));
        assert_eq!(cache.use_count(), 1);
        cache.release(&a).unwrap();
        assert_eq!(cache.release(&a), Err(Error::MapMisuse));
    }

    #[test]
    fn test_live_move_goes_stale() {
        let mut cache = MappingCache::new();
        let a = cache.acquire(|| Ok(map_at(0x1000))).unwrap();
        let notice = cache.notify_move();
        assert!(notice.live);
        assert!(cache.is_stale());
        assert_eq!(cache.use_count(), 1);

        cache.release(&a).unwrap();
        assert_eq!(cache.state(), MapState::Unmapped);
        assert!(!cache.is_stale());
    }
}
