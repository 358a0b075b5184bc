//! # BASALT PLL
//!
//! Pixel clock synthesis for the display controller's pixel PLLs.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        basalt-pll                           │
//! │                                                             │
//! │   desired kHz ──► ┌────────────┐  hit ──► PllParams         │
//! │                   │ Fast-path  │                            │
//! │                   │   table    │                            │
//! │                   └─────┬──────┘                            │
//! │                         │ miss                              │
//! │                   ┌─────▼──────┐                            │
//! │                   │ Exhaustive │ ──► best triple            │
//! │                   │   search   │                            │
//! │                   └─────┬──────┘                            │
//! │                   ┌─────▼──────┐                            │
//! │                   │ Tolerance  │ ──► PllOutOfTolerance      │
//! │                   │    gate    │                            │
//! │                   └────────────┘                            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The synthesizer is pure and reentrant. Programming the resulting
//! dividers into hardware lives in `basalt-hal`.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]

#[cfg(feature = "std")]
extern crate std;

// =============================================================================
// MODULE EXPORTS
// =============================================================================

pub mod params;
pub mod synth;
pub mod table;

pub use params::PllParams;
pub use synth::{compute_pll, PllOrigin, PllSolution, PllSynth, TOLERANCE_KHZ};
