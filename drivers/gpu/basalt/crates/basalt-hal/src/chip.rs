//! # Chip Families
//!
//! Limits and register placement of the supported display controllers.
//! The family is detected once from the PCI ID and everything
//! chip-specific is resolved through it.

use basalt_core::{Error, Result};

use crate::regs::{LS7A1000_PIX_PLL0, LS7A1000_PIX_PLL1, NUM_PIPES};

/// PCI vendor ID of the display controller
pub const PCI_VENDOR_LOONGSON: u16 = 0x0014;

// =============================================================================
// CHIP DESCRIPTION
// =============================================================================

/// Static description of one controller family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChipDesc {
    /// Marketing name
    pub name: &'static str,
    /// PCI device ID of the display controller
    pub pci_device: u16,
    /// PCI device ID of the companion GPU whose BAR 2 describes VRAM
    pub gpu_pci_device: u16,
    /// Display pipes
    pub num_pipes: usize,
    /// Highest pixel clock in kHz
    pub max_pixel_clock_khz: u32,
    /// Widest mode per pipe
    pub max_width: u32,
    /// Tallest mode per pipe
    pub max_height: u32,
    /// Hardware cursors
    pub num_cursors: u32,
    /// Cursor edge in pixels (square)
    pub cursor_size: u32,
    /// Scanout pitch alignment in bytes
    pub pitch_align: u32,
    /// Address bus width in bits
    pub mc_bits: u32,
    /// Dedicated VRAM present
    pub has_vram: bool,
}

impl ChipDesc {
    /// Bytes of a 32 bpp cursor image
    pub const fn cursor_bytes(&self) -> u64 {
        (self.cursor_size as u64) * (self.cursor_size as u64) * 4
    }

    /// Whether a mode can be driven
    ///
    /// Besides the per-pipe limits, three XRGB8888 framebuffers of the mode
    /// must fit in VRAM.
    pub fn mode_valid(&self, width: u32, height: u32, clock_khz: u32, vram_size: u64) -> Result<()> {
        if width == 0 || height == 0 {
            return Err(Error::InvalidArgument);
        }
        if width > self.max_width || height > self.max_height {
            return Err(Error::NotSupported);
        }
        if clock_khz > self.max_pixel_clock_khz {
            return Err(Error::NotSupported);
        }
        let fb_size = width as u64 * 4 * height as u64;
        if fb_size * 3 > vram_size {
            return Err(Error::OutOfMemory);
        }
        Ok(())
    }
}

const LS7A1000_DESC: ChipDesc = ChipDesc {
    name: "LS7A1000",
    pci_device: 0x7a06,
    gpu_pci_device: 0x7a15,
    num_pipes: NUM_PIPES,
    max_pixel_clock_khz: 200_000,
    max_width: 2048,
    max_height: 2048,
    num_cursors: 1,
    cursor_size: 32,
    pitch_align: 256,
    mc_bits: 40,
    has_vram: true,
};

const LS7A2000_DESC: ChipDesc = ChipDesc {
    name: "LS7A2000",
    pci_device: 0x7a36,
    gpu_pci_device: 0x7a25,
    num_pipes: NUM_PIPES,
    max_pixel_clock_khz: 350_000,
    max_width: 4096,
    max_height: 4096,
    num_cursors: 2,
    cursor_size: 64,
    pitch_align: 64,
    // Supports 48, kept at 40 for older firmware
    mc_bits: 40,
    has_vram: true,
};

// =============================================================================
// CHIP FAMILY
// =============================================================================

/// Supported controller families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChipFamily {
    /// LS7A1000 bridge (and LS2K1000)
    Ls7a1000,
    /// LS7A2000 bridge (and LS2K2000)
    Ls7a2000,
}

impl ChipFamily {
    /// Every supported family
    pub const ALL: [ChipFamily; 2] = [Self::Ls7a1000, Self::Ls7a2000];

    /// Detect the family from the display controller's PCI vendor/device pair
    pub fn from_pci_id(vendor: u16, device: u16) -> Result<Self> {
        Self::find(vendor, |d| d.pci_device == device).ok_or_else(|| {
            log::warn!("unknown display controller {:04x}:{:04x}", vendor, device);
            Error::NotSupported
        })
    }

    /// Detect the family from the companion GPU that exposes VRAM
    ///
    /// Families without dedicated VRAM have no such device.
    pub fn from_gpu_pci_id(vendor: u16, device: u16) -> Result<Self> {
        Self::find(vendor, |d| d.has_vram && d.gpu_pci_device == device)
            .ok_or(Error::NotSupported)
    }

    fn find(vendor: u16, matches: impl Fn(&ChipDesc) -> bool) -> Option<Self> {
        if vendor != PCI_VENDOR_LOONGSON {
            return None;
        }
        Self::ALL.into_iter().find(|f| matches(f.desc()))
    }

    /// Static description
    pub const fn desc(self) -> &'static ChipDesc {
        match self {
            Self::Ls7a1000 => &LS7A1000_DESC,
            Self::Ls7a2000 => &LS7A2000_DESC,
        }
    }

    /// Offset of a pipe's pixel PLL inside the configuration window
    ///
    /// Both families share the LS7A1000 PLL layout.
    pub fn pix_pll_offset(self, pipe: usize) -> Result<u32> {
        match (self, pipe) {
            (Self::Ls7a1000 | Self::Ls7a2000, 0) => Ok(LS7A1000_PIX_PLL0),
            (Self::Ls7a1000 | Self::Ls7a2000, 1) => Ok(LS7A1000_PIX_PLL1),
            _ => Err(Error::NotSupported),
        }
    }
}
