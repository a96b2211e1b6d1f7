//! Interfaces between the VDP core and its host emulator.
//!
//! The host drives the core through a single scheduled phase event (see
//! [`crate::vdp::Vdp::phase_step`]) and receives interrupt edges through the
//! [`VdpInterrupts`] trait. Completed frames are delivered through a
//! [`FrameSink`], which may be invoked from a render worker thread.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum VideoStandard {
    Ntsc,
    Pal,
}

/// Construction-time options for the VDP core.
#[derive(Debug, Clone)]
pub struct VdpOptions {
    pub video_standard: VideoStandard,
    /// Run VDP1 command rasterization on a dedicated worker thread.
    pub threaded_vdp1: bool,
    /// Run VDP2 line rendering and composition on a dedicated worker thread.
    pub threaded_vdp2: bool,
    /// Render the alternate field on a dedicated worker when deinterlacing.
    /// Only effective together with `threaded_vdp2` and `deinterlace`.
    pub threaded_deinterlacer: bool,
    /// Render both fields every frame to produce progressive output from
    /// interlaced modes.
    pub deinterlace: bool,
    /// Replace mesh stippling with real alpha blending at composition time.
    pub transparent_meshes: bool,
    /// Charge a stall penalty for VDP1 VRAM writes while drawing.
    pub stall_vdp1_on_vram_writes: bool,
    /// Honor the CRAM mode 1/2 restriction on extended color calculation
    /// (palette-sourced bottom layers don't blend). Off matches observed
    /// behavior of commercial titles.
    pub restrict_extended_color_calc: bool,
    /// Apply bitmap data access delays in normal (non-hi-res) modes.
    /// Off by default; turning this on breaks Baku Baku Animal.
    pub apply_bitmap_delay_in_normal_modes: bool,
    /// Use the provisional exclusive-monitor timing tables. When off,
    /// exclusive HRES modes reuse the Normal Graphic A timings.
    pub exclusive_monitor_timings: bool,
}

impl Default for VdpOptions {
    fn default() -> Self {
        VdpOptions {
            video_standard: VideoStandard::Ntsc,
            threaded_vdp1: false,
            threaded_vdp2: false,
            threaded_deinterlacer: false,
            deinterlace: false,
            transparent_meshes: false,
            stall_vdp1_on_vram_writes: true,
            restrict_extended_color_calc: false,
            apply_bitmap_delay_in_normal_modes: false,
            exclusive_monitor_timings: true,
        }
    }
}

/// Interrupt and timing edges raised by the core on the host thread.
///
/// Handlers are invoked from within [`crate::vdp::Vdp::phase_step`] and
/// [`crate::vdp::Vdp::advance`].
pub trait VdpInterrupts {
    fn hblank_state_change(&mut self, in_hblank: bool, in_vblank: bool);
    fn vblank_state_change(&mut self, in_vblank: bool);
    fn trigger_smpc_vblank_in(&mut self);
    /// Raised ~1ms before VBlank IN as an INTBACK optimization hint for SMPC.
    fn trigger_optimized_intback_read(&mut self);
    fn trigger_sprite_draw_end(&mut self);
    /// VDP1 reached the end of its command list.
    fn vdp1_draw_finished(&mut self) {}
    /// The sprite framebuffers were swapped.
    fn vdp1_framebuffer_swap(&mut self) {}
}

/// Receiver for completed frames and renderer notifications.
///
/// When VDP2 threading is enabled these are invoked from the render worker,
/// so implementations must be `Send` and thread-safe or hop back to the host
/// thread themselves.
pub trait FrameSink: Send {
    /// A full frame is ready. `framebuffer` holds ABGR8888 rows with
    /// pitch == `width`.
    fn frame_complete(&mut self, framebuffer: &[u32], width: u32, height: u32);
    fn resolution_changed(&mut self, _width: u32, _height: u32) {}
    fn vdp2_draw_finished(&mut self) {}
}

/// Frame sink that discards everything. Useful for tests and headless runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullFrameSink;

impl FrameSink for NullFrameSink {
    fn frame_complete(&mut self, _framebuffer: &[u32], _width: u32, _height: u32) {}
}

#[derive(Debug, Error)]
pub enum VdpInitError {
    #[error("failed to spawn {name} worker thread: {source}")]
    WorkerSpawn {
        name: &'static str,
        source: std::io::Error,
    },
}
