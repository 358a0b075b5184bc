//! # BASALT Core
//!
//! Foundational types shared by every layer of the BASALT display driver.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      basalt-core                            │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────┐  │
//! │  │   Types     │  │   Config    │  │     Error           │  │
//! │  │ (BusAddr,   │  │ (Device     │  │   Handling          │  │
//! │  │  Handle)    │  │  Config)    │  │                     │  │
//! │  └─────────────┘  └─────────────┘  └─────────────────────┘  │
//! │  ┌───────────────────────────────────────────────────────┐  │
//! │  │        Sync (fence collaborator contract)             │  │
//! │  └───────────────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//! ```

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]

#[cfg(feature = "std")]
extern crate std;

// =============================================================================
// MODULE EXPORTS
// =============================================================================

pub mod config;
pub mod error;
pub mod sync;
pub mod types;

// Re-exports for convenience
pub use config::DeviceConfig;
pub use error::{Error, Result};
pub use sync::{Fences, NoFences};
pub use types::*;
