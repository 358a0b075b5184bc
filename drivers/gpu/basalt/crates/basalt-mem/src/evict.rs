//! # Eviction Order
//!
//! Which VRAM-resident objects to try first when VRAM runs out. The
//! manager filters out pinned and contended objects itself.

use alloc::vec::Vec;

use basalt_core::BoHandle;

/// A VRAM-resident object offered for eviction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    /// Object
    pub handle: BoHandle,
    /// VRAM pages it holds
    pub pages: u64,
}

impl Candidate {
    /// Candidate holding `pages`
    pub const fn new(handle: BoHandle, pages: u64) -> Self {
        Self { handle, pages }
    }
}

/// Eviction candidate ordering
pub trait EvictionOrder: Send + Sync {
    /// Order `resident` (least recently used first) for eviction
    fn order(&self, resident: &[Candidate]) -> Vec<BoHandle>;
}

/// Least recently used first
#[derive(Debug, Default, Clone, Copy)]
pub struct LeastRecentlyUsed;

impl EvictionOrder for LeastRecentlyUsed {
    fn order(&self, resident: &[Candidate]) -> Vec<BoHandle> {
        resident.iter().map(|c| c.handle).collect()
    }
}

/// Largest objects first, recency breaking ties
#[derive(Debug, Default, Clone, Copy)]
pub struct LargestFirst;

impl EvictionOrder for LargestFirst {
    fn order(&self, resident: &[Candidate]) -> Vec<BoHandle> {
        let mut v = resident.to_vec();
        v.sort_by_key(|c| core::cmp::Reverse(c.pages));
        v.into_iter().map(|c| c.handle).collect()
    }
}

static_assertions::assert_impl_all!(LeastRecentlyUsed: EvictionOrder);
static_assertions::assert_impl_all!(LargestFirst: EvictionOrder);
