//! # PLL Synthesizer
//!
//! `output_khz = ref_clock_khz / div_ref * loopc / div_out`
//!
//! The table holds triples for the 100 MHz board oscillator and is only
//! consulted for that reference clock, and only a hit within tolerance is
//! taken. Otherwise every triple in the hardware
//! ranges is evaluated in a fixed nested order (div_out, then div_ref,
//! then loopc, all ascending) and the first triple reaching the smallest
//! error is kept; an exact match ends the search.

use basalt_core::config::DEFAULT_REF_CLOCK_KHZ;
use basalt_core::{Error, Result};

use crate::params::{
    loopc_bounds, PllParams, DIV_OUT_MAX, DIV_OUT_MIN, DIV_REF_MAX, DIV_REF_MIN, LOOPC_MAX,
    LOOPC_MIN,
};
use crate::table;

/// Largest acceptable error, exclusive, in kHz
pub const TOLERANCE_KHZ: u32 = 1000;

// =============================================================================
// SOLUTION
// =============================================================================

/// Where a triple came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PllOrigin {
    /// Fast-path table hit
    Table,
    /// Exhaustive search
    Search,
}

/// Triple plus how it was found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PllSolution {
    /// Divider triple
    pub params: PllParams,
    /// Table or search
    pub origin: PllOrigin,
    /// |desired - achieved| in kHz
    ///
    /// Table entries report the error of their own formula evaluation.
    pub error_khz: u32,
}

// =============================================================================
// SYNTHESIZER
// =============================================================================

/// Pixel PLL synthesizer for one reference clock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PllSynth {
    ref_clock_khz: u32,
}

impl Default for PllSynth {
    fn default() -> Self {
        Self::new(DEFAULT_REF_CLOCK_KHZ)
    }
}

impl PllSynth {
    /// Synthesizer for the given reference clock in kHz
    pub const fn new(ref_clock_khz: u32) -> Self {
        Self { ref_clock_khz }
    }

    /// Reference clock in kHz
    pub const fn ref_clock_khz(&self) -> u32 {
        self.ref_clock_khz
    }

    /// Dividers for `desired_khz`
    pub fn compute(&self, desired_khz: u32) -> Result<PllParams> {
        self.solve(desired_khz).map(|s| s.params)
    }

    /// Dividers for `desired_khz`, with origin and error
    pub fn solve(&self, desired_khz: u32) -> Result<PllSolution> {
        if let Some(hit) = self.table_hit(desired_khz) {
            return Ok(hit);
        }
        log::debug!("pixel clock {} kHz: table miss", desired_khz);

        match self.search(desired_khz) {
            Some((params, error_khz)) => Ok(PllSolution {
                params,
                origin: PllOrigin::Search,
                error_khz,
            }),
            None => {
                log::debug!(
                    "pixel clock {} kHz: no triple within {} kHz",
                    desired_khz,
                    TOLERANCE_KHZ
                );
                Err(Error::PllOutOfTolerance)
            }
        }
    }

    fn table_hit(&self, desired_khz: u32) -> Option<PllSolution> {
        if self.ref_clock_khz != DEFAULT_REF_CLOCK_KHZ {
            return None;
        }
        let hit = table::lookup(desired_khz)?;
        let error_khz = desired_khz.abs_diff(hit.params.output_khz(self.ref_clock_khz));
        if error_khz >= TOLERANCE_KHZ {
            return None;
        }
        Some(PllSolution {
            params: hit.params,
            origin: PllOrigin::Table,
            error_khz,
        })
    }

    fn search(&self, desired_khz: u32) -> Option<(PllParams, u32)> {
        let mut best: Option<(PllParams, u32)> = None;
        let mut min = TOLERANCE_KHZ;

        for div_out in DIV_OUT_MIN..=DIV_OUT_MAX {
            for div_ref in DIV_REF_MIN..=DIV_REF_MAX {
                let (lo, hi) = loopc_bounds(div_ref);
                for loopc in lo.max(LOOPC_MIN)..=hi.min(LOOPC_MAX) {
                    let params = PllParams::new(div_ref, div_out, loopc);
                    let diff = desired_khz.abs_diff(params.output_khz(self.ref_clock_khz));
                    if diff < min {
                        min = diff;
                        best = Some((params, diff));
                        if diff == 0 {
                            return best;
                        }
                    }
                }
            }
        }

        best
    }
}

/// Dividers for `desired_khz` from the default 100 MHz reference
pub fn compute_pll(desired_khz: u32) -> Result<PllParams> {
    PllSynth::default().compute(desired_khz)
}
