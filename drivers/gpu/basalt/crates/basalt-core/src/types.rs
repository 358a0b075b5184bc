//! # BASALT Core Types
//!
//! Fundamental type definitions used across the driver stack.
//!
//! These types provide:
//! - Strong typing for bus addresses (as seen by the display controller)
//! - Page-size math shared by the allocator and the placement policy
//! - Typed handles that replace pointer-based object lookup

use core::cmp::Ordering;
use core::fmt;
use core::hash::{Hash, Hasher};
use core::marker::PhantomData;
use core::ops::Add;

// =============================================================================
// PAGE GEOMETRY
// =============================================================================

/// Page shift used by the VRAM range manager and buffer sizing
pub const PAGE_SHIFT: u32 = 12;

/// Page size in bytes
pub const PAGE_SIZE: u64 = 1 << PAGE_SHIFT;

/// Number of pages needed to hold `bytes`
#[inline]
pub const fn pages_for(bytes: u64) -> u64 {
    (bytes + PAGE_SIZE - 1) >> PAGE_SHIFT
}

/// Round `value` up to a multiple of `alignment` (a power of two)
#[inline]
pub const fn align_up(value: u64, alignment: u64) -> u64 {
    let mask = alignment - 1;
    (value + mask) & !mask
}

/// Round `value` down to a multiple of `alignment` (a power of two)
#[inline]
pub const fn align_down(value: u64, alignment: u64) -> u64 {
    value & !(alignment - 1)
}

// =============================================================================
// BUS ADDRESS
// =============================================================================

/// Address as seen by the display controller's DMA engine
///
/// This is NOT a CPU pointer and cannot be dereferenced directly.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct BusAddr(u64);

impl BusAddr {
    /// Create a new bus address
    #[inline]
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    /// Get the raw u64 value
    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Low 32 bits (framebuffer address register)
    #[inline]
    pub const fn lo32(self) -> u32 {
        self.0 as u32
    }

    /// Bits above 32, truncated to the controller's address bus width
    #[inline]
    pub const fn hi_bits(self, bus_bits: u32) -> u32 {
        let mask = (1u64 << (bus_bits - 32)) - 1;
        ((self.0 >> 32) & mask) as u32
    }

    /// Offset by bytes
    #[inline]
    pub const fn offset(self, bytes: u64) -> Self {
        Self(self.0.wrapping_add(bytes))
    }
}

impl Add<u64> for BusAddr {
    type Output = Self;

    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0.wrapping_add(rhs))
    }
}

impl fmt::Debug for BusAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BusAddr(0x{:010x})", self.0)
    }
}

impl fmt::Display for BusAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:010x}", self.0)
    }
}

// =============================================================================
// HANDLE TYPES
// =============================================================================

/// Opaque handle to a driver object
///
/// Handles index an arena owned by the object's manager. They are
/// type-safe wrappers that prevent mixing different resource types.
#[repr(transparent)]
pub struct Handle<T> {
    id: u64,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    /// Create a new handle
    #[inline]
    pub const fn new(id: u64) -> Self {
        Self {
            id,
            _marker: PhantomData,
        }
    }

    /// Create a null handle
    #[inline]
    pub const fn null() -> Self {
        Self::new(0)
    }

    /// Get the raw ID
    #[inline]
    pub const fn id(self) -> u64 {
        self.id
    }

    /// Check if null
    #[inline]
    pub const fn is_null(self) -> bool {
        self.id == 0
    }
}

// Manual impls: derives would require the marker itself to implement them.
impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for Handle<T> {}

impl<T> PartialOrd for Handle<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Handle<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = core::any::type_name::<T>();
        let short = name.rsplit("::").next().unwrap_or(name);
        write!(f, "Handle<{}>({})", short, self.id)
    }
}

/// Marker for buffer object handles
#[derive(Debug)]
pub enum BufferObjectMarker {}

/// Handle to a buffer object
pub type BoHandle = Handle<BufferObjectMarker>;

// =============================================================================
// STATIC ASSERTIONS
// =============================================================================

static_assertions::assert_impl_all!(BusAddr: Send, Sync, Copy);
static_assertions::assert_impl_all!(BoHandle: Send, Sync, Copy, Ord);
