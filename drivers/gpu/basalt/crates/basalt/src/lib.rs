//! # BASALT
//!
//! Display controller driver core: buffer object memory management and
//! pixel clock synthesis for LS7A-class display controllers.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Device<R>                            │
//! │   dumb buffers · cursors · scanout · pixel clocks           │
//! ├──────────────────────┬──────────────────────┬───────────────┤
//! │     basalt-mem       │     basalt-pll       │  basalt-hal   │
//! │  BoManager, VRAM,    │  table + search      │  registers,   │
//! │  pin/map/evict       │                      │  chips, PLLs  │
//! ├──────────────────────┴──────────────────────┴───────────────┤
//! │                       basalt-core                           │
//! │          errors · handles · bus addresses · config          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! let dev = Device::new(config, ChipFamily::Ls7a1000, dc, cfg, aperture, fences)?;
//! let fb = dev.dumb_create(1920, 1080, 32)?;
//! dev.pin(fb.handle)?;
//! dev.set_pixel_clock(0, 148_500)?;
//! dev.set_scanout(0, fb.handle, 0, fb.pitch)?;
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

pub mod device;

pub use device::{ClockStatus, Device, DumbBuffer};

// Re-export the layers
pub use basalt_core as core_types;
pub use basalt_hal as hal;
pub use basalt_mem as mem;
pub use basalt_pll as pll;

pub use basalt_core::{BoHandle, BusAddr, DeviceConfig, Error, Fences, NoFences, Result};
pub use basalt_pll::{compute_pll, PllParams};

/// Driver version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
