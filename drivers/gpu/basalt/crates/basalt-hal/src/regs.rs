//! # Display Controller Registers
//!
//! Offsets are relative to the register window they live in. Per-CRTC
//! registers are given for pipe 0; pipe N sits `N * CRTC_PIPE_STRIDE`
//! bytes further.

// =============================================================================
// PIPES
// =============================================================================

/// Display pipes per controller
pub const NUM_PIPES: usize = 2;

/// Address distance between the same register of adjacent pipes
pub const CRTC_PIPE_STRIDE: u32 = 0x10;

// =============================================================================
// CRTC REGISTERS (DC WINDOW)
// =============================================================================

/// CRTC configuration
pub const CRTC0_CFG: u32 = 0x1240;
/// Framebuffer 0 address, low 32 bits
pub const CRTC0_FB0_LO_ADDR: u32 = 0x1260;
/// Framebuffer 0 address, high bits
pub const CRTC0_FB0_HI_ADDR: u32 = 0x15A0;
/// Framebuffer 1 address, low 32 bits
pub const CRTC0_FB1_LO_ADDR: u32 = 0x1580;
/// Framebuffer 1 address, high bits
pub const CRTC0_FB1_HI_ADDR: u32 = 0x15C0;
/// Line stride in bytes
pub const CRTC0_STRIDE: u32 = 0x1280;

/// Pixel format field of the CFG register
pub const CFG_PIX_FMT_MASK: u32 = 0x7;
/// Set when the pipe scans out of framebuffer 1
pub const CFG_FB_IN_USING: u32 = 1 << 11;

/// Scanout pixel formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum PixelFormat {
    /// Plane disabled
    None = 0,
    /// 16 bpp, 4 bits per channel
    Argb4444 = 1,
    /// 16 bpp, 1-bit alpha
    Argb1555 = 2,
    /// 16 bpp
    Rgb565 = 3,
    /// 32 bpp, alpha ignored
    Xrgb8888 = 4,
    /// 32 bpp
    Rgba8888 = 5,
}

impl PixelFormat {
    /// Bytes per pixel
    pub const fn cpp(self) -> u32 {
        match self {
            Self::None => 0,
            Self::Argb4444 | Self::Argb1555 | Self::Rgb565 => 2,
            Self::Xrgb8888 | Self::Rgba8888 => 4,
        }
    }
}

// =============================================================================
// PIXEL PLL REGISTERS (CONFIG WINDOW)
// =============================================================================

/// Pixel PLL of pipe 0, relative to the configuration window
pub const LS7A1000_PIX_PLL0: u32 = 0x04B0;
/// Pixel PLL of pipe 1, relative to the configuration window
pub const LS7A1000_PIX_PLL1: u32 = 0x04C0;
