//! # Fast-Path Table
//!
//! Divider triples for common display timings, precomputed for clocks
//! where the search would not pick the preferred combination.

use crate::params::PllParams;

/// One precomputed timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableEntry {
    /// Pixel clock in kHz
    pub clock_khz: u32,
    /// Nominal horizontal resolution
    pub width: u16,
    /// Nominal vertical resolution
    pub height: u16,
    /// Nominal refresh rate in Hz
    pub refresh: u16,
    /// Dividers for the clock
    pub params: PllParams,
}

const fn entry(
    clock_khz: u32,
    width: u16,
    height: u16,
    refresh: u16,
    div_out: u32,
    loopc: u32,
    div_ref: u32,
) -> TableEntry {
    TableEntry {
        clock_khz,
        width,
        height,
        refresh,
        params: PllParams::new(div_ref, div_out, loopc),
    }
}

/// Precomputed timings, looked up by exact clock
pub static PLL_TABLE: [TableEntry; 28] = [
    entry(148_500, 1920, 1080, 60, 11, 49, 3),
    entry(174_500, 1920, 1080, 75, 17, 89, 3),
    entry(181_250, 2560, 1080, 75, 8, 58, 4),
    // 3840x2160@30
    entry(297_000, 2560, 1080, 30, 8, 95, 4),
    entry(301_992, 1920, 1080, 100, 10, 151, 5),
    entry(146_250, 1680, 1050, 60, 16, 117, 5),
    entry(135_000, 1280, 1024, 75, 10, 54, 4),
    entry(119_000, 1680, 1050, 60, 20, 119, 5),
    // also 1280x1024@60, 1280x960@60, 1152x864@75
    entry(108_000, 1600, 900, 60, 15, 81, 5),
    entry(106_500, 1440, 900, 60, 19, 81, 4),
    entry(88_750, 1440, 900, 60, 16, 71, 5),
    entry(83_500, 1280, 800, 60, 17, 71, 5),
    entry(71_000, 1280, 800, 60, 20, 71, 5),
    entry(74_250, 1280, 720, 60, 22, 49, 3),
    entry(78_750, 1024, 768, 75, 16, 63, 5),
    entry(75_000, 1024, 768, 70, 29, 87, 4),
    entry(65_000, 1024, 768, 60, 20, 39, 3),
    entry(51_200, 1024, 600, 60, 25, 64, 5),
    entry(57_284, 832, 624, 75, 24, 55, 4),
    entry(49_500, 800, 600, 75, 40, 99, 5),
    entry(50_000, 800, 600, 72, 44, 88, 4),
    entry(40_000, 800, 600, 60, 30, 36, 3),
    entry(36_000, 800, 600, 56, 50, 72, 4),
    entry(31_500, 640, 480, 75, 40, 63, 5),
    entry(30_240, 640, 480, 67, 62, 75, 4),
    entry(27_000, 720, 576, 50, 50, 54, 4),
    entry(25_175, 640, 480, 60, 85, 107, 5),
    entry(25_200, 640, 480, 60, 50, 63, 5),
];

/// Exact lookup of a clock in the table
pub fn lookup(clock_khz: u32) -> Option<&'static TableEntry> {
    PLL_TABLE.iter().find(|e| e.clock_khz == clock_khz)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_hit_and_miss() {
        let e = lookup(148_500).unwrap();
        assert_eq!((e.width, e.height, e.refresh), (1920, 1080, 60));
        assert_eq!(e.params, PllParams::new(3, 11, 49));
        assert!(lookup(148_501).is_none());
    }

    #[test]
    fn test_entries_fit_registers() {
        for e in PLL_TABLE.iter() {
            assert!(e.params.fits_registers(), "{} kHz", e.clock_khz);
        }
    }

    #[test]
    fn test_clocks_unique() {
        for (i, a) in PLL_TABLE.iter().enumerate() {
            for b in PLL_TABLE.iter().skip(i + 1) {
                assert_ne!(a.clock_khz, b.clock_khz);
            }
        }
    }
}
