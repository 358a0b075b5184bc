//! # Pixel PLL Programming
//!
//! Register layout (two dwords):
//!
//! ```text
//! reg + 0:  [6:0] div_out               [29:21] loopc
//! reg + 4:  [6:0] div_ref  [7] locked  [8] sel_out  [11] set_param
//!           [12] bypass    [13] powerdown
//! ```
//!
//! The update sequence switches the pipe to the reference clock, powers the
//! PLL down, loads the new dividers, powers it up, waits a bounded number of
//! polls for lock and switches the pipe back to the PLL output.

use basalt_core::{Error, Result};
use basalt_pll::PllParams;
use bitflags::bitflags;

use crate::mmio::{extract_field, insert_field, RegisterIo};

bitflags! {
    /// Control and status bits of the second PLL dword
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PllCtrl: u32 {
        /// PLL locked
        const LOCKED = 1 << 7;
        /// Pipe clocked from the PLL instead of the reference clock
        const SEL_OUT = 1 << 8;
        /// Latch the divider fields
        const SET_PARAM = 1 << 11;
        /// Bypass
        const BYPASS = 1 << 12;
        /// Power down
        const POWERDOWN = 1 << 13;
    }
}

const PARAM_REG: u32 = 0x0;
const CTRL_REG: u32 = 0x4;

// =============================================================================
// PIXEL PLL
// =============================================================================

/// One pipe's pixel PLL inside a register window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixPll {
    offset: u32,
    ref_clock_khz: u32,
}

impl PixPll {
    /// PLL at `offset` fed by `ref_clock_khz`
    pub const fn new(offset: u32, ref_clock_khz: u32) -> Self {
        Self {
            offset,
            ref_clock_khz,
        }
    }

    /// Register offset of the first dword
    pub const fn offset(&self) -> u32 {
        self.offset
    }

    /// Load a divider triple and wait for lock
    ///
    /// Returns the number of polls spent before lock. If the PLL does not
    /// lock within `poll_limit` polls the pipe is still switched to the PLL
    /// output and `HardwareTimeout` is returned.
    pub fn program<R: RegisterIo + ?Sized>(
        &self,
        io: &R,
        params: &PllParams,
        poll_limit: u32,
    ) -> Result<u32> {
        if !params.fits_registers() {
            return Err(Error::InvalidArgument);
        }
        let param = self.offset + PARAM_REG;
        let ctrl = self.offset + CTRL_REG;

        io.clear_bits(ctrl, PllCtrl::SEL_OUT.bits());
        io.set_bits(ctrl, PllCtrl::POWERDOWN.bits());
        io.clear_bits(ctrl, PllCtrl::SET_PARAM.bits());

        let val = io.read32(ctrl);
        io.write32(ctrl, insert_field(val, params.div_ref, 0, 6));

        let val = io.read32(param);
        let val = insert_field(val, params.div_out, 0, 6);
        io.write32(param, insert_field(val, params.loopc, 21, 29));

        io.set_bits(ctrl, PllCtrl::SET_PARAM.bits());
        io.clear_bits(ctrl, PllCtrl::POWERDOWN.bits());

        let mut counter = 0;
        let mut locked = false;
        while counter < poll_limit {
            if PllCtrl::from_bits_truncate(io.read32(ctrl)).contains(PllCtrl::LOCKED) {
                locked = true;
                break;
            }
            counter += 1;
            core::hint::spin_loop();
        }
        log::debug!("pixpll@{:#x}: {} loop waited", self.offset, counter);

        io.set_bits(ctrl, PllCtrl::SEL_OUT.bits());

        if locked {
            Ok(counter)
        } else {
            log::warn!(
                "pixpll@{:#x}: not locked after {} polls ({})",
                self.offset,
                poll_limit,
                params
            );
            Err(Error::HardwareTimeout)
        }
    }

    /// Dividers currently in the registers
    pub fn params<R: RegisterIo + ?Sized>(&self, io: &R) -> PllParams {
        let param = io.read32(self.offset + PARAM_REG);
        let ctrl = io.read32(self.offset + CTRL_REG);
        PllParams::new(
            extract_field(ctrl, 0, 6),
            extract_field(param, 0, 6),
            extract_field(param, 21, 29),
        )
    }

    /// Current output rate in kHz, 0 when unprogrammed
    pub fn clock_rate<R: RegisterIo + ?Sized>(&self, io: &R) -> u32 {
        self.params(io).output_khz(self.ref_clock_khz)
    }

    /// Whether the PLL reports lock
    pub fn is_locked<R: RegisterIo + ?Sized>(&self, io: &R) -> bool {
        PllCtrl::from_bits_truncate(io.read32(self.offset + CTRL_REG)).contains(PllCtrl::LOCKED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mmio::RegisterFile;

    const PLL0: u32 = 0x4B0;

    #[test]
    fn test_program_locked() {
        let regs = RegisterFile::new();
        regs.preset(PLL0 + 4, PllCtrl::LOCKED.bits());
        let pll = PixPll::new(PLL0, 100_000);
        let params = PllParams::new(3, 11, 49);

        assert_eq!(pll.program(&regs, &params, 2000), Ok(0));
        assert_eq!(pll.params(&regs), params);
        assert_eq!(pll.clock_rate(&regs), 148_483);

        let ctrl = PllCtrl::from_bits_truncate(regs.read32(PLL0 + 4));
        assert!(ctrl.contains(PllCtrl::SEL_OUT | PllCtrl::SET_PARAM));
        assert!(!ctrl.contains(PllCtrl::POWERDOWN));
    }

    #[test]
    fn test_program_sequence() {
        let regs = RegisterFile::new();
        regs.preset(PLL0 + 4, PllCtrl::LOCKED.bits() | PllCtrl::SEL_OUT.bits());
        PixPll::new(PLL0, 100_000)
            .program(&regs, &PllParams::new(4, 6, 48), 10)
            .unwrap();

        let writes = regs.writes();
        assert_eq!(writes.len(), 8);
        // output deselected first, reselected last
        assert_eq!(writes[0].1 & PllCtrl::SEL_OUT.bits(), 0);
        assert_ne!(writes[1].1 & PllCtrl::POWERDOWN.bits(), 0);
        assert_eq!(writes[4].0, PLL0);
        assert_eq!(writes[4].1, 6 | (48 << 21));
        assert_ne!(writes[7].1 & PllCtrl::SEL_OUT.bits(), 0);
    }

    #[test]
    fn test_program_timeout() {
        let regs = RegisterFile::new();
        let pll = PixPll::new(PLL0, 100_000);
        let params = PllParams::new(4, 6, 48);

        assert_eq!(pll.program(&regs, &params, 2000), Err(Error::HardwareTimeout));
        // dividers stay written and the output is still selected
        assert_eq!(pll.params(&regs), params);
        assert_eq!(pll.clock_rate(&regs), 200_000);
        assert!(!pll.is_locked(&regs));
        assert_ne!(regs.read32(PLL0 + 4) & PllCtrl::SEL_OUT.bits(), 0);
    }

    #[test]
    fn test_unprogrammed_rate() {
        let regs = RegisterFile::new();
        assert_eq!(PixPll::new(PLL0, 100_000).clock_rate(&regs), 0);
    }

    #[test]
    fn test_rejects_oversized_fields() {
        let regs = RegisterFile::new();
        let pll = PixPll::new(PLL0, 100_000);
        assert_eq!(
            pll.program(&regs, &PllParams::new(3, 200, 49), 10),
            Err(Error::InvalidArgument)
        );
        assert!(regs.writes().is_empty());
    }
}
