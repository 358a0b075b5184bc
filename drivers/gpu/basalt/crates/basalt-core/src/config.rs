//! # Device Configuration
//!
//! Everything the driver core needs to know about one display controller
//! instance, threaded explicitly through device construction.

use crate::error::{Error, Result};
use crate::types::{BusAddr, PAGE_SIZE};

/// Board oscillator feeding the pixel PLLs, in kHz
pub const DEFAULT_REF_CLOCK_KHZ: u32 = 100_000;

/// Iterations spent polling a PLL's locked bit before giving up
pub const DEFAULT_PLL_LOCK_POLL_LIMIT: u32 = 2000;

// =============================================================================
// DEVICE CONFIG
// =============================================================================

/// Per-device configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Bus address of the first VRAM byte
    pub vram_base: BusAddr,
    /// VRAM size in bytes (page multiple)
    pub vram_size: u64,
    /// PLL reference clock in kHz
    pub ref_clock_khz: u32,
    /// Host memory is cache coherent with the display controller
    ///
    /// When false, host mappings are write-combined.
    pub cached_coherent: bool,
    /// Lock-bit poll iterations per PLL programming
    pub pll_lock_poll_limit: u32,
}

impl DeviceConfig {
    /// Configuration for a VRAM window with default clocking
    pub const fn new(vram_base: BusAddr, vram_size: u64) -> Self {
        Self {
            vram_base,
            vram_size,
            ref_clock_khz: DEFAULT_REF_CLOCK_KHZ,
            cached_coherent: true,
            pll_lock_poll_limit: DEFAULT_PLL_LOCK_POLL_LIMIT,
        }
    }

    /// Override the PLL reference clock
    pub const fn with_ref_clock(mut self, khz: u32) -> Self {
        self.ref_clock_khz = khz;
        self
    }

    /// Override host caching
    pub const fn with_cached_coherent(mut self, coherent: bool) -> Self {
        self.cached_coherent = coherent;
        self
    }

    /// Override the PLL lock poll limit
    pub const fn with_pll_lock_poll_limit(mut self, limit: u32) -> Self {
        self.pll_lock_poll_limit = limit;
        self
    }

    /// VRAM size in pages
    pub const fn vram_pages(&self) -> u64 {
        self.vram_size / PAGE_SIZE
    }

    /// Check the configuration is usable
    pub fn validate(&self) -> Result<()> {
        if self.vram_size == 0 || self.vram_size % PAGE_SIZE != 0 {
            return Err(Error::InvalidArgument);
        }
        if self.vram_base.raw() % PAGE_SIZE != 0 {
            return Err(Error::InvalidArgument);
        }
        if self.ref_clock_khz == 0 || self.pll_lock_poll_limit == 0 {
            return Err(Error::InvalidArgument);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = DeviceConfig::new(BusAddr::new(0x1000_0000), 16 * PAGE_SIZE);
        assert_eq!(cfg.ref_clock_khz, 100_000);
        assert_eq!(cfg.pll_lock_poll_limit, 2000);
        assert_eq!(cfg.vram_pages(), 16);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects() {
        let base = BusAddr::new(0);
        assert_eq!(
            DeviceConfig::new(base, 0).validate(),
            Err(Error::InvalidArgument)
        );
        assert_eq!(
            DeviceConfig::new(base, PAGE_SIZE + 1).validate(),
            Err(Error::InvalidArgument)
        );
        assert_eq!(
            DeviceConfig::new(base, PAGE_SIZE).with_ref_clock(0).validate(),
            Err(Error::InvalidArgument)
        );
        assert_eq!(
            DeviceConfig::new(base, PAGE_SIZE)
                .with_pll_lock_poll_limit(0)
                .validate(),
            Err(Error::InvalidArgument)
        );
    }
}
