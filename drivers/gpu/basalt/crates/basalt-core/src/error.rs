//! # BASALT Error Handling
//!
//! Error types for the display driver stack.
//!
//! Error handling in BASALT follows these principles:
//! - Errors are typed and categorized
//! - No panics in production code paths
//! - Programmer errors are reported, never absorbed
//! - Errors are `no_std` compatible

use core::fmt;

// =============================================================================
// RESULT TYPE
// =============================================================================

/// BASALT Result type alias
pub type Result<T> = core::result::Result<T, Error>;

// =============================================================================
// ERROR ENUM
// =============================================================================

/// BASALT unified error type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Error {
    // =========================================================================
    // Generic Errors
    // =========================================================================
    /// Zero size, bad alignment, empty or unsupported domain set
    InvalidArgument,
    /// Handle or range does not name a live object
    NotFound,
    /// Reservation contended; the caller should retry
    Busy,
    /// Operation not supported on this hardware
    NotSupported,

    // =========================================================================
    // Memory Errors
    // =========================================================================
    /// Allocation failed even after exhausting eviction candidates
    OutOfMemory,
    /// Pin/map discipline violated by the caller
    MapMisuse,

    // =========================================================================
    // Hardware Errors
    // =========================================================================
    /// A bounded hardware poll expired
    HardwareTimeout,

    // =========================================================================
    // Clock Errors
    // =========================================================================
    /// No PLL divider triple within tolerance of the requested clock
    PllOutOfTolerance,
}

impl Error {
    /// Subsystem the error belongs to
    pub const fn category(&self) -> &'static str {
        match self {
            Self::InvalidArgument | Self::NotFound | Self::Busy | Self::NotSupported => "General",
            Self::OutOfMemory | Self::MapMisuse => "Memory",
            Self::HardwareTimeout => "Hardware",
            Self::PllOutOfTolerance => "Clock",
        }
    }

    /// Whether the error reports a caller contract violation
    ///
    /// These are not recoverable at runtime; retrying the same call
    /// sequence fails the same way.
    pub const fn is_programmer_error(&self) -> bool {
        matches!(self, Self::MapMisuse)
    }

    /// Whether retrying the same operation later may succeed
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Busy | Self::HardwareTimeout)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // Generic
            Self::InvalidArgument => write!(f, "invalid argument"),
            Self::NotFound => write!(f, "object not found"),
            Self::Busy => write!(f, "reservation busy"),
            Self::NotSupported => write!(f, "operation not supported"),

            // Memory
            Self::OutOfMemory => write!(f, "out of memory"),
            Self::MapMisuse => write!(f, "pin/map discipline violated"),

            // Hardware
            Self::HardwareTimeout => write!(f, "hardware poll timed out"),

            // Clock
            Self::PllOutOfTolerance => write!(f, "no PLL parameters within tolerance"),
        }
    }
}
