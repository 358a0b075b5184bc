//! # BASALT HAL
//!
//! Register-level access to the display controller.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        basalt-hal                           │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────┐  │
//! │  │    Chip     │  │   PixPll    │  │       Regs          │  │
//! │  │ (families,  │  │ (program,   │  │  (offsets, bits,    │  │
//! │  │  limits)    │  │  read-back) │  │   pipe stride)      │  │
//! │  └─────────────┘  └──────┬──────┘  └─────────────────────┘  │
//! │  ┌───────────────────────▼───────────────────────────────┐  │
//! │  │   RegisterIo  (MmioRegion | RegisterFile)             │  │
//! │  └───────────────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//! ```

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

pub mod chip;
pub mod mmio;
pub mod pixpll;
pub mod regs;

pub use chip::{ChipDesc, ChipFamily};
pub use mmio::{MmioRegion, RegisterFile, RegisterIo};
pub use pixpll::PixPll;
