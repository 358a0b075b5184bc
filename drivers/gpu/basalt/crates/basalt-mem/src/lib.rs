//! # BASALT Memory Management
//!
//! Buffer objects and the VRAM pool they compete for.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        BoManager                            │
//! │   create / validate / pin / vmap / evict / release          │
//! ├──────────────┬──────────────┬───────────────┬───────────────┤
//! │ RangeAlloc   │  PinCount    │ MappingCache  │ EvictionOrder │
//! │ (VRAM pages) │ (per object) │ (per object)  │  (policy)     │
//! ├──────────────┴──────────────┴───────────────┴───────────────┤
//! │        Aperture (VRAM CPU window)   │   host pages          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Domains are tried in the fixed order VRAM, GTT, SYSTEM. VRAM pressure
//! evicts unpinned objects to SYSTEM; an unpinned object keeps its VRAM
//! range until then.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]

extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

// =============================================================================
// MODULE EXPORTS
// =============================================================================

pub mod aperture;
pub mod bo;
pub mod domain;
pub mod evict;
pub mod manager;
pub mod mapping;
pub mod pin;
pub mod range;

pub use aperture::{Aperture, HostAperture, MmioAperture};
pub use bo::{BoInfo, MoveReport};
pub use domain::{Domain, DomainFlags, Placement, PlacementFlags};
pub use evict::{Candidate, EvictionOrder, LargestFirst, LeastRecentlyUsed};
pub use manager::{BoDesc, BoManager, ManagerStats, OpCtx};
pub use mapping::{Caching, CpuMap, MapState};
pub use range::{PageRange, RangeAllocator, RangeRequest};
