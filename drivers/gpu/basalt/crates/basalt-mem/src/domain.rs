//! # Memory Domains & Placement
//!
//! Where a buffer object may live, in priority order.

use arrayvec::ArrayVec;
use bitflags::bitflags;
use core::fmt;

use basalt_core::{Error, Result};

// =============================================================================
// DOMAIN
// =============================================================================

/// A memory domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Domain {
    /// Dedicated video memory
    Vram,
    /// Host memory reachable through the system aperture
    Gtt,
    /// Plain host memory
    System,
}

impl Domain {
    /// Priority order for placement
    pub const PRIORITY: [Domain; 3] = [Domain::Vram, Domain::Gtt, Domain::System];

    /// Flag bit of the domain
    pub const fn flag(self) -> DomainFlags {
        match self {
            Self::Vram => DomainFlags::VRAM,
            Self::Gtt => DomainFlags::GTT,
            Self::System => DomainFlags::SYSTEM,
        }
    }

    /// Backed by host pages
    pub const fn is_host(self) -> bool {
        !matches!(self, Self::Vram)
    }

    /// Short name
    pub const fn name(self) -> &'static str {
        match self {
            Self::Vram => "VRAM",
            Self::Gtt => "GTT",
            Self::System => "SYSTEM",
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

bitflags! {
    /// Set of domains, with the userspace bit values
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DomainFlags: u32 {
        /// Plain host memory
        const SYSTEM = 0x1;
        /// System aperture
        const GTT = 0x2;
        /// Video memory
        const VRAM = 0x4;
    }
}

bitflags! {
    /// Placement modifiers
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PlacementFlags: u32 {
        /// Allocate from the top of VRAM
        const TOPDOWN = 1 << 0;
        /// Physically contiguous (always true for VRAM ranges)
        const CONTIGUOUS = 1 << 1;
    }
}

// =============================================================================
// PLACEMENT
// =============================================================================

/// Ordered list of acceptable domains
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    domains: ArrayVec<Domain, 3>,
    flags: PlacementFlags,
}

impl Placement {
    /// Build from raw domain bits
    ///
    /// Empty sets and unknown bits are rejected.
    pub fn from_bits(bits: u32, flags: PlacementFlags) -> Result<Self> {
        let set = DomainFlags::from_bits(bits).ok_or(Error::InvalidArgument)?;
        Self::new(set, flags)
    }

    /// Build from a domain set
    pub fn new(set: DomainFlags, flags: PlacementFlags) -> Result<Self> {
        if set.is_empty() {
            return Err(Error::InvalidArgument);
        }
        let domains = Domain::PRIORITY
            .iter()
            .copied()
            .filter(|d| set.contains(d.flag()))
            .collect();
        Ok(Self { domains, flags })
    }

    /// Single domain placement
    pub fn only(domain: Domain) -> Self {
        let mut domains = ArrayVec::new();
        domains.push(domain);
        Self {
            domains,
            flags: PlacementFlags::empty(),
        }
    }

    /// Domains in priority order
    pub fn domains(&self) -> &[Domain] {
        &self.domains
    }

    /// Domain set
    pub fn set(&self) -> DomainFlags {
        self.domains
            .iter()
            .fold(DomainFlags::empty(), |acc, d| acc | d.flag())
    }

    /// Modifiers
    pub fn flags(&self) -> PlacementFlags {
        self.flags
    }

    /// Whether `domain` is acceptable
    pub fn accepts(&self, domain: Domain) -> bool {
        self.domains.contains(&domain)
    }

    /// Highest-priority domain
    pub fn preferred(&self) -> Domain {
        self.domains.first().copied().unwrap_or(Domain::System)
    }

    /// Allocate VRAM from the top
    pub fn top_down(&self) -> bool {
        self.flags.contains(PlacementFlags::TOPDOWN)
    }
}
