//! # Display Device
//!
//! One display controller: its register windows, its VRAM and the pixel
//! PLLs of every pipe. Buffer object operations go straight to the
//! [`BoManager`]; the display paths (dumb buffers, cursors, scanout and
//! pixel clocks) are built on top of it here.

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;

use basalt_core::{
    align_up, BoHandle, BusAddr, DeviceConfig, Error, Fences, Result, PAGE_SIZE,
};
use basalt_hal::regs::{
    PixelFormat, CFG_FB_IN_USING, CFG_PIX_FMT_MASK, CRTC0_CFG, CRTC0_FB0_HI_ADDR,
    CRTC0_FB0_LO_ADDR, CRTC0_FB1_HI_ADDR, CRTC0_FB1_LO_ADDR, CRTC0_STRIDE,
};
use basalt_hal::{ChipDesc, ChipFamily, PixPll, RegisterIo};
use basalt_mem::{
    Aperture, BoDesc, BoInfo, BoManager, CpuMap, DomainFlags, EvictionOrder, ManagerStats,
    MoveReport, OpCtx, PlacementFlags,
};
use basalt_pll::{PllParams, PllSynth};
use spin::Mutex;

/// Outcome of a pixel clock change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockStatus {
    /// PLL reported lock
    Locked,
    /// PLL did not lock in time, the pipe runs from it anyway
    Unlocked,
}

/// A freshly created scanout buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DumbBuffer {
    /// Buffer object
    pub handle: BoHandle,
    /// Bytes per line
    pub pitch: u32,
    /// Bytes allocated
    pub size: u64,
}

// =============================================================================
// DEVICE
// =============================================================================

/// A display controller instance
pub struct Device<R: RegisterIo> {
    chip: ChipFamily,
    dc: R,
    cfg: R,
    bos: BoManager,
    synth: PllSynth,
    plls: Vec<PixPll>,
    // serializes read-modify-write register sequences
    display: Mutex<()>,
}

impl<R: RegisterIo> core::fmt::Debug for Device<R> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Device")
            .field("chip", &self.chip)
            .field("bos", &self.bos)
            .field("synth", &self.synth)
            .field("plls", &self.plls)
            .finish_non_exhaustive()
    }
}

impl<R: RegisterIo> Device<R> {
    /// Bring up a device
    ///
    /// `dc` is the display controller register window, `cfg` the chip
    /// configuration window holding the pixel PLLs.
    pub fn new(
        config: DeviceConfig,
        chip: ChipFamily,
        dc: R,
        cfg: R,
        aperture: Box<dyn Aperture>,
        fences: Arc<dyn Fences>,
    ) -> Result<Self> {
        let desc = chip.desc();
        let bos = BoManager::new(config, aperture, fences)?;
        let synth = PllSynth::new(config.ref_clock_khz);

        let mut plls = Vec::with_capacity(desc.num_pipes);
        for pipe in 0..desc.num_pipes {
            plls.push(PixPll::new(chip.pix_pll_offset(pipe)?, config.ref_clock_khz));
        }

        log::info!(
            "basalt: {} with {} MiB VRAM at {}, {} pipes",
            desc.name,
            config.vram_size >> 20,
            config.vram_base,
            desc.num_pipes
        );

        Ok(Self {
            chip,
            dc,
            cfg,
            bos,
            synth,
            plls,
            display: Mutex::new(()),
        })
    }

    /// Replace the VRAM eviction order
    pub fn with_eviction_order(mut self, order: Box<dyn EvictionOrder>) -> Self {
        self.bos = self.bos.with_eviction_order(order);
        self
    }

    /// Controller family
    pub fn chip(&self) -> ChipFamily {
        self.chip
    }

    /// Controller limits
    pub fn desc(&self) -> &'static ChipDesc {
        self.chip.desc()
    }

    /// Device configuration
    pub fn config(&self) -> &DeviceConfig {
        self.bos.config()
    }

    /// Buffer object manager
    pub fn bos(&self) -> &BoManager {
        &self.bos
    }

    /// Display controller registers
    pub fn dc_regs(&self) -> &R {
        &self.dc
    }

    /// Configuration window registers
    pub fn cfg_regs(&self) -> &R {
        &self.cfg
    }

    fn check_pipe(&self, pipe: usize) -> Result<()> {
        if pipe >= self.desc().num_pipes {
            log::warn!("pipe {} does not exist on {}", pipe, self.desc().name);
            return Err(Error::NotSupported);
        }
        Ok(())
    }

    // =========================================================================
    // Buffer objects
    // =========================================================================

    /// Create and place a buffer object
    pub fn create_bo(&self, domains: DomainFlags, size: u64, alignment: u64) -> Result<BoHandle> {
        self.bos.create_bo(domains, size, alignment)
    }

    /// Create a buffer object from a full description
    pub fn create_bo_with(&self, desc: BoDesc<'_>) -> Result<BoHandle> {
        self.bos.create_bo_with(desc)
    }

    /// Take another reference
    pub fn reference(&self, handle: BoHandle) -> Result<()> {
        self.bos.reference(handle)
    }

    /// Drop a reference, destroying the object on the last one
    pub fn release(&self, handle: BoHandle) -> Result<()> {
        self.bos.release(handle)
    }

    /// Change the requested domains
    pub fn set_placement(
        &self,
        handle: BoHandle,
        domains: DomainFlags,
        flags: PlacementFlags,
    ) -> Result<()> {
        self.bos.set_placement(handle, domains, flags)
    }

    /// Move the object into its requested placement if needed
    pub fn validate(&self, handle: BoHandle, ctx: OpCtx) -> Result<Option<MoveReport>> {
        self.bos.validate(handle, ctx)
    }

    /// Pin in place
    pub fn pin(&self, handle: BoHandle) -> Result<()> {
        self.bos.pin(handle)
    }

    /// Drop one pin
    pub fn unpin(&self, handle: BoHandle) -> Result<()> {
        self.bos.unpin(handle)
    }

    /// Pin for sharing with another device
    pub fn pin_shared(&self, handle: BoHandle) -> Result<()> {
        self.bos.pin_shared(handle)
    }

    /// Drop a sharing pin
    pub fn unpin_shared(&self, handle: BoHandle) -> Result<()> {
        self.bos.unpin_shared(handle)
    }

    /// Wrap a buffer shared by another device
    pub fn import_shared(&self, size: u64) -> Result<BoHandle> {
        self.bos.import_shared(size)
    }

    /// CPU mapping of a pinned object
    pub fn vmap(&self, handle: BoHandle) -> Result<CpuMap> {
        self.bos.vmap(handle)
    }

    /// Drop a CPU mapping
    pub fn vunmap(&self, handle: BoHandle, map: &CpuMap) -> Result<()> {
        self.bos.vunmap(handle, map)
    }

    /// Bus address of a pinned VRAM object
    pub fn gpu_offset(&self, handle: BoHandle) -> Result<BusAddr> {
        self.bos.gpu_offset(handle)
    }

    /// Snapshot of one object
    pub fn bo_info(&self, handle: BoHandle) -> Result<BoInfo> {
        self.bos.bo_info(handle)
    }

    /// Snapshot of every object
    pub fn list_bos(&self) -> Vec<BoInfo> {
        self.bos.list_bos()
    }

    /// Manager counters
    pub fn stats(&self) -> ManagerStats {
        self.bos.stats()
    }

    // =========================================================================
    // Display buffers
    // =========================================================================

    /// Create a contiguous VRAM buffer able to scan out `width`x`height`
    pub fn dumb_create(&self, width: u32, height: u32, bpp: u32) -> Result<DumbBuffer> {
        if width == 0 || height == 0 || bpp == 0 {
            return Err(Error::InvalidArgument);
        }
        let cpp = u64::from(bpp).div_ceil(8);
        let pitch = align_up(u64::from(width) * cpp, u64::from(self.desc().pitch_align));
        let pitch = u32::try_from(pitch).map_err(|_| Error::InvalidArgument)?;
        let size = align_up(u64::from(pitch) * u64::from(height), PAGE_SIZE);

        let handle = self.bos.create_bo_with(
            BoDesc::new(size, DomainFlags::VRAM)
                .flags(PlacementFlags::CONTIGUOUS)
                .named("dumb"),
        )?;
        log::debug!(
            "dumb buffer {:?}: {}x{}x{} pitch {} size {}",
            handle,
            width,
            height,
            bpp,
            pitch,
            size
        );
        Ok(DumbBuffer {
            handle,
            pitch,
            size,
        })
    }

    /// Create a cursor image at the top of VRAM
    pub fn create_cursor_bo(&self) -> Result<BoHandle> {
        self.bos.create_bo_with(
            BoDesc::new(self.desc().cursor_bytes(), DomainFlags::VRAM)
                .flags(PlacementFlags::TOPDOWN)
                .named("cursor"),
        )
    }

    /// Whether a mode can be driven
    pub fn mode_valid(&self, width: u32, height: u32, clock_khz: u32) -> Result<()> {
        self.desc()
            .mode_valid(width, height, clock_khz, self.config().vram_size)
    }

    /// Point a pipe at a pinned VRAM buffer
    ///
    /// The address goes to whichever framebuffer slot the pipe is not
    /// currently scanning out of. The pipe is switched to XRGB8888.
    pub fn set_scanout(&self, pipe: usize, bo: BoHandle, fb_offset: u64, stride: u32) -> Result<()> {
        self.check_pipe(pipe)?;
        let addr = self.bos.gpu_offset(bo)?.offset(fb_offset);
        let lo = addr.lo32();
        let hi = addr.hi_bits(self.desc().mc_bits);

        let _guard = self.display.lock();
        let cfg = self.dc.read32_pipe(CRTC0_CFG, pipe);
        if cfg & CFG_FB_IN_USING != 0 {
            self.dc.write32_pipe(CRTC0_FB1_LO_ADDR, pipe, lo);
            self.dc.write32_pipe(CRTC0_FB1_HI_ADDR, pipe, hi);
        } else {
            self.dc.write32_pipe(CRTC0_FB0_LO_ADDR, pipe, lo);
            self.dc.write32_pipe(CRTC0_FB0_HI_ADDR, pipe, hi);
        }
        self.dc.write32_pipe(CRTC0_STRIDE, pipe, stride);

        let cfg = (cfg & !CFG_PIX_FMT_MASK) | PixelFormat::Xrgb8888 as u32;
        self.dc.write32_pipe(CRTC0_CFG, pipe, cfg);

        log::debug!("pipe {}: scanout at {} stride {}", pipe, addr, stride);
        Ok(())
    }

    // =========================================================================
    // Pixel clocks
    // =========================================================================

    /// Dividers for `khz` from this device's reference clock
    pub fn compute_pll(&self, khz: u32) -> Result<PllParams> {
        self.synth.compute(khz)
    }

    /// Program a pipe's pixel PLL
    pub fn set_pixel_clock(&self, pipe: usize, khz: u32) -> Result<ClockStatus> {
        self.check_pipe(pipe)?;
        if khz > self.desc().max_pixel_clock_khz {
            return Err(Error::NotSupported);
        }
        let params = self.synth.compute(khz)?;
        let pll = &self.plls[pipe];

        let _guard = self.display.lock();
        match pll.program(&self.cfg, &params, self.config().pll_lock_poll_limit) {
            Ok(_) => Ok(ClockStatus::Locked),
            Err(Error::HardwareTimeout) => {
                log::warn!("pipe {}: pixel clock {} kHz set without lock", pipe, khz);
                Ok(ClockStatus::Unlocked)
            }
            Err(e) => Err(e),
        }
    }

    /// Current pixel clock of a pipe in kHz
    pub fn pixel_clock(&self, pipe: usize) -> Result<u32> {
        self.check_pipe(pipe)?;
        Ok(self.plls[pipe].clock_rate(&self.cfg))
    }
}
