//! # PLL Parameters
//!
//! The divider triple programmed into a pixel PLL.

use core::fmt;

// =============================================================================
// SEARCH RANGES
// =============================================================================

/// Smallest reference divider the search considers
pub const DIV_REF_MIN: u32 = 3;
/// Largest reference divider the search considers
pub const DIV_REF_MAX: u32 = 5;
/// Smallest output divider the search considers
pub const DIV_OUT_MIN: u32 = 6;
/// Largest output divider the search considers
pub const DIV_OUT_MAX: u32 = 63;
/// Smallest loop multiplier
pub const LOOPC_MIN: u32 = 6;
/// Largest loop multiplier
pub const LOOPC_MAX: u32 = 160;

/// Loop multiplier bounds tied to the reference divider
#[inline]
pub const fn loopc_bounds(div_ref: u32) -> (u32, u32) {
    (12 * div_ref, 32 * div_ref)
}

// =============================================================================
// REGISTER FIELD WIDTHS
// =============================================================================

/// Width of the div_ref and div_out register fields
pub const DIVIDER_FIELD_BITS: u32 = 7;
/// Width of the loopc register field
pub const LOOPC_FIELD_BITS: u32 = 9;

// =============================================================================
// PLL PARAMS
// =============================================================================

/// Divider triple of a pixel PLL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PllParams {
    /// Input (reference) clock divider
    pub div_ref: u32,
    /// Output clock divider
    pub div_out: u32,
    /// Feedback loop multiplier
    pub loopc: u32,
}

impl PllParams {
    /// Create a triple
    pub const fn new(div_ref: u32, div_out: u32, loopc: u32) -> Self {
        Self {
            div_ref,
            div_out,
            loopc,
        }
    }

    /// Output frequency for a reference clock, in kHz
    ///
    /// Evaluated left to right with truncating division, the way the
    /// hardware documentation states it. Returns 0 for a zero divider.
    pub const fn output_khz(&self, ref_clock_khz: u32) -> u32 {
        if self.div_ref == 0 || self.div_out == 0 {
            return 0;
        }
        ref_clock_khz / self.div_ref * self.loopc / self.div_out
    }

    /// Whether the triple lies inside the search ranges
    pub const fn in_search_range(&self) -> bool {
        let (lo, hi) = loopc_bounds(self.div_ref);
        self.div_ref >= DIV_REF_MIN
            && self.div_ref <= DIV_REF_MAX
            && self.div_out >= DIV_OUT_MIN
            && self.div_out <= DIV_OUT_MAX
            && self.loopc >= LOOPC_MIN
            && self.loopc <= LOOPC_MAX
            && self.loopc >= lo
            && self.loopc <= hi
    }

    /// Whether the triple can be written into the PLL register fields
    pub const fn fits_registers(&self) -> bool {
        self.div_ref != 0
            && self.div_out != 0
            && self.div_ref < (1 << DIVIDER_FIELD_BITS)
            && self.div_out < (1 << DIVIDER_FIELD_BITS)
            && self.loopc < (1 << LOOPC_FIELD_BITS)
    }
}

impl fmt::Display for PllParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "div_ref={} div_out={} loopc={}",
            self.div_ref, self.div_out, self.loopc
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_khz() {
        let p = PllParams::new(3, 11, 49);
        // 100000 / 3 = 33333, * 49 = 1633317, / 11 = 148483
        assert_eq!(p.output_khz(100_000), 148_483);
        assert_eq!(PllParams::new(0, 6, 48).output_khz(100_000), 0);
    }

    #[test]
    fn test_ranges() {
        assert!(PllParams::new(4, 6, 48).in_search_range());
        assert!(!PllParams::new(3, 6, 35).in_search_range());
        assert!(!PllParams::new(5, 6, 161).in_search_range());
        assert!(!PllParams::new(5, 85, 107).in_search_range());
        assert!(PllParams::new(5, 85, 107).fits_registers());
        assert!(!PllParams::new(5, 128, 107).fits_registers());
        assert!(!PllParams::new(3, 6, 512).fits_registers());
    }
}
