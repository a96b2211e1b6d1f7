use std::sync::{Arc, Mutex};

use saturnine_core::host::{FrameSink, VdpInterrupts, VdpOptions};
use saturnine_core::vdp::Vdp;

/// Interrupt sink recording every edge the core raises.
#[derive(Debug, Default)]
pub struct TestInterrupts {
    pub hblank_in: u32,
    pub hblank_out: u32,
    pub vblank_in: u32,
    pub vblank_out: u32,
    pub smpc_vblank_in: u32,
    pub intback_hints: u32,
    pub sprite_draw_end: u32,
    pub vdp1_draw_finished: u32,
    pub framebuffer_swaps: u32,
    /// VCNT captured at the most recent VBlank IN / OUT edge.
    pub vcnt_at_vblank_in: u16,
    pub vcnt_at_vblank_out: u16,
    vblank_edge: Option<bool>,
}

impl TestInterrupts {
    fn take_vblank_edge(&mut self) -> Option<bool> {
        self.vblank_edge.take()
    }
}

impl VdpInterrupts for TestInterrupts {
    fn hblank_state_change(&mut self, in_hblank: bool, _in_vblank: bool) {
        if in_hblank {
            self.hblank_in += 1;
        } else {
            self.hblank_out += 1;
        }
    }

    fn vblank_state_change(&mut self, in_vblank: bool) {
        if in_vblank {
            self.vblank_in += 1;
        } else {
            self.vblank_out += 1;
        }
        self.vblank_edge = Some(in_vblank);
    }

    fn trigger_smpc_vblank_in(&mut self) {
        self.smpc_vblank_in += 1;
    }

    fn trigger_optimized_intback_read(&mut self) {
        self.intback_hints += 1;
    }

    fn trigger_sprite_draw_end(&mut self) {
        self.sprite_draw_end += 1;
    }

    fn vdp1_draw_finished(&mut self) {
        self.vdp1_draw_finished += 1;
    }

    fn vdp1_framebuffer_swap(&mut self) {
        self.framebuffer_swaps += 1;
    }
}

#[derive(Debug, Default)]
pub struct SinkData {
    pub frames: u32,
    pub last_width: u32,
    pub last_height: u32,
    pub last_frame: Vec<u32>,
}

/// Frame sink capturing the most recent frame.
pub struct TestSink(pub Arc<Mutex<SinkData>>);

impl FrameSink for TestSink {
    fn frame_complete(&mut self, framebuffer: &[u32], width: u32, height: u32) {
        let mut data = self.0.lock().unwrap();
        data.frames += 1;
        data.last_width = width;
        data.last_height = height;
        data.last_frame = framebuffer.to_vec();
    }
}

pub fn build_vdp(options: VdpOptions) -> (Vdp, Arc<Mutex<SinkData>>) {
    let sink_data = Arc::new(Mutex::new(SinkData::default()));
    let vdp = Vdp::new(options, Box::new(TestSink(Arc::clone(&sink_data))))
        .expect("failed to construct VDP");
    (vdp, sink_data)
}

/// Runs the phase machine for the given number of scanlines, feeding the
/// returned cycle budget back into the VDP1 command engine like the host
/// scheduler would.
pub fn run_lines(vdp: &mut Vdp, intr: &mut TestInterrupts, lines: u32) {
    for _ in 0..lines * 4 {
        let cycles = vdp.phase_step(intr);
        if let Some(in_vblank) = intr.take_vblank_edge() {
            if in_vblank {
                intr.vcnt_at_vblank_in = vdp.vcnt();
            } else {
                intr.vcnt_at_vblank_out = vdp.vcnt();
            }
        }
        vdp.advance(cycles, intr);
    }
}

/// Runs one full NTSC progressive frame (263 lines).
pub fn run_frame(vdp: &mut Vdp, intr: &mut TestInterrupts) {
    run_lines(vdp, intr, 263);
}
