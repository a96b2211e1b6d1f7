//! The VDP core: VDP1 sprite rasterizer and VDP2 background compositor.
//!
//! The host drives this through a single scheduled phase event
//! ([`Vdp::phase_step`], which returns the delay until the next call) and
//! feeds elapsed cycles to the VDP1 command engine via [`Vdp::advance`].
//! Memory-mapped accesses go through the `read_*`/`write_*` bus surface.

pub mod color;
pub mod memory;
pub mod phase;
pub mod regs1;
pub mod regs2;
pub mod sprite;
pub mod threading;
pub mod vdp1;
pub mod vdp2;

use std::sync::{Arc, Mutex};

use crate::host::{FrameSink, VdpInitError, VdpInterrupts, VdpOptions, VideoStandard};
use crate::vdp::memory::{Cram, SpriteFramebuffers, Vdp1Vram, Vdp2Vram};
use crate::vdp::phase::{HorizontalPhase, PhaseTimings, VerticalPhase};
use crate::vdp::regs1::{Vdp1RegEffect, Vdp1Regs, NO_RETURN};
use crate::vdp::regs2::{InterlaceMode, Vdp2Regs};
use crate::vdp::threading::{Vdp1Backend, Vdp1Event, Vdp2Backend, Vdp2Event};
use crate::vdp::vdp1::{estimate_command_cycles, Control, JumpType};

/// Memory map base addresses, as decoded from the SH-2 bus.
pub const VDP1_VRAM_START: u32 = 0x5C0_0000;
pub const VDP1_FB_START: u32 = 0x5C8_0000;
pub const VDP1_REGS_START: u32 = 0x5D0_0000;
pub const VDP2_VRAM_START: u32 = 0x5E0_0000;
pub const VDP2_CRAM_START: u32 = 0x5F0_0000;
pub const VDP2_REGS_START: u32 = 0x5F8_0000;

/// Extra VDP1 cycles charged per VRAM write while a frame is being drawn.
const VDP1_WRITE_STALL_CYCLES: u64 = 30;
/// Delay before the first command after a PTMR=01 plot trigger.
const VDP1_PLOT_TRIGGER_DELAY: u64 = 1500;

/// VDP1 command engine bookkeeping, host-thread only.
#[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize)]
pub struct Vdp1Pipeline {
    pub drawing: bool,
    pub do_display_erase: bool,
    pub do_vblank_erase: bool,
    pub spillover_cycles: u64,
    pub timing_penalty_cycles: u64,
}

pub struct Vdp {
    // Host-authoritative memory; the CPU always reads from these
    vram1: Vdp1Vram,
    vram2: Vdp2Vram,
    cram: Cram,
    regs1: Vdp1Regs,
    regs2: Vdp2Regs,
    fbs: Arc<Mutex<SpriteFramebuffers>>,

    timings: PhaseTimings,
    h_phase: HorizontalPhase,
    v_phase: VerticalPhase,
    pipeline: Vdp1Pipeline,

    vdp1: Vdp1Backend,
    vdp2: Vdp2Backend,

    options: VdpOptions,
}

impl Vdp {
    pub fn new(options: VdpOptions, sink: Box<dyn FrameSink>) -> Result<Self, VdpInitError> {
        let fbs = Arc::new(Mutex::new(SpriteFramebuffers::new()));
        let vdp1 = Vdp1Backend::new(&options, Arc::clone(&fbs))?;
        let vdp2 = Vdp2Backend::new(&options, Arc::clone(&fbs), sink)?;

        let pal = options.video_standard == VideoStandard::Pal;
        let mut vdp = Vdp {
            vram1: Vdp1Vram::new(),
            vram2: Vdp2Vram::new(),
            cram: Cram::new(),
            regs1: Vdp1Regs::new(),
            regs2: Vdp2Regs::new(pal),
            fbs,
            timings: PhaseTimings::new(),
            h_phase: HorizontalPhase::Active,
            v_phase: VerticalPhase::Active,
            pipeline: Vdp1Pipeline::default(),
            vdp1,
            vdp2,
            options,
        };
        vdp.reset(true);
        Ok(vdp)
    }

    /// Resets the core. The host must reschedule the phase event with
    /// [`Vdp::current_phase_cycles`] afterwards.
    pub fn reset(&mut self, hard: bool) {
        if hard {
            self.vram1.fill(0);
            self.vram2.fill(0);
            self.cram.fill(0);
        }
        self.regs1.reset();
        let pal = self.regs2.pal;
        self.regs2.reset();
        self.regs2.pal = pal;

        self.pipeline = Vdp1Pipeline::default();
        self.h_phase = HorizontalPhase::Active;
        self.v_phase = VerticalPhase::Active;

        self.vdp1.send(&self.fbs, Vdp1Event::Reset);
        self.vdp2.send(Vdp2Event::Reset);

        self.timings = PhaseTimings::new();
        self.update_resolution();
    }

    pub fn set_video_standard(&mut self, standard: VideoStandard) {
        let pal = standard == VideoStandard::Pal;
        if self.regs2.pal != pal {
            self.regs2.pal = pal;
            self.regs2.tvmd_dirty = true;
        }
    }

    #[inline]
    pub fn resolution(&self) -> (u32, u32) {
        (self.timings.hres, self.timings.vres)
    }

    #[inline]
    pub fn interlace_mode(&self) -> InterlaceMode {
        self.regs2.interlace
    }

    /// Cycles until the next phase event, for (re)scheduling.
    #[inline]
    pub fn current_phase_cycles(&self) -> u64 {
        self.timings.phase_cycles(self.h_phase)
    }

    // -------------------------------------------------------------------------
    // Phase state machine

    /// Advances to the next horizontal phase and performs its side effects.
    /// Returns the number of host cycles until the next call.
    #[profiling::function]
    pub fn phase_step(&mut self, intr: &mut dyn VdpInterrupts) -> u64 {
        self.h_phase = self.h_phase.next();
        match self.h_phase {
            HorizontalPhase::Active => self.begin_hphase_active(intr),
            HorizontalPhase::RightBorder => self.begin_hphase_right_border(intr),
            // The sync phase only inserts a gap between the border phases
            HorizontalPhase::Sync => {}
            HorizontalPhase::LeftBorder => self.begin_hphase_left_border(intr),
        }
        self.timings.phase_cycles(self.h_phase)
    }

    fn begin_hphase_active(&mut self, intr: &mut dyn VdpInterrupts) {
        if self.v_phase == VerticalPhase::Active {
            // ~1ms before VBlank IN
            if self.regs2.vcnt == self.timings.active_lines() - 16 {
                intr.trigger_optimized_intback_read();
            }

            self.vdp2.send(Vdp2Event::DrawLine {
                vcnt: self.regs2.vcnt as u32,
            });
        }
    }

    fn begin_hphase_right_border(&mut self, intr: &mut dyn VdpInterrupts) {
        self.regs2.hblank = true;
        intr.hblank_state_change(true, self.regs2.vblank);

        // Just entered VBlank IN on this line
        if self.regs2.vcnt == self.timings.active_lines() {
            self.pipeline.do_vblank_erase = self.regs1.vblank_erase;

            if self.regs2.interlace.is_interlaced() {
                self.regs2.odd = !self.regs2.odd;
                self.timings.v_field = self.regs2.odd as usize;
                self.vdp2.send(Vdp2Event::OddField(self.regs2.odd));
            } else if !self.regs2.odd {
                self.regs2.odd = true;
                self.timings.v_field = 0;
                self.vdp2.send(Vdp2Event::OddField(true));
            }
        }
    }

    fn begin_hphase_left_border(&mut self, intr: &mut dyn VdpInterrupts) {
        if self.v_phase == VerticalPhase::LastLine {
            let mut erase = false;
            let mut swap = false;

            if !self.regs1.fb_swap_mode {
                // 1-cycle framebuffer erase+swap
                erase = true;
                swap = true;
            } else if self.regs1.fb_params_changed {
                if self.regs1.fb_swap_trigger {
                    swap = true;
                } else {
                    erase = true;
                }
            }
            self.regs1.fb_params_changed = false;

            // Finish a VBlank erase under its cycle budget
            if self.pipeline.do_vblank_erase {
                self.pipeline.do_vblank_erase = false;
                let budget = self.timings.vblank_erase_cycles_per_line
                    * self.timings.vblank_erase_lines[self.timings.v_field] as u64;
                self.erase_framebuffer(Some(budget));
            }

            if erase {
                self.pipeline.do_display_erase = true;
            }
            if swap {
                self.swap_framebuffer(intr);
            }
        }

        self.regs2.hblank = false;
        if self.v_phase == VerticalPhase::Active {
            intr.hblank_state_change(false, self.regs2.vblank);
        }

        self.increment_vcounter(intr);
    }

    fn increment_vcounter(&mut self, intr: &mut dyn VdpInterrupts) {
        self.regs2.vcnt += 1;
        while self.regs2.vcnt >= self.timings.vcnt_threshold(self.v_phase) {
            let mut next = self.v_phase.next();
            if next == VerticalPhase::Active {
                self.regs2.vcnt = 0;
                next = VerticalPhase::Active;
            }
            self.v_phase = next;
            match self.v_phase {
                VerticalPhase::Active => {
                    self.regs2.vcnt_skip = 0;
                }
                VerticalPhase::BottomBorder => {
                    self.regs2.vblank = true;
                    intr.vblank_state_change(true);
                    intr.trigger_smpc_vblank_in();
                }
                VerticalPhase::BlankingAndSync => {
                    // Flush the finished frame to the sink
                    self.vdp2.send_and_wait(Vdp2Event::EndFrame);

                    // Erase the display framebuffer during the blanking area;
                    // there are always enough cycles there for a full clear
                    if self.pipeline.do_display_erase {
                        self.pipeline.do_display_erase = false;
                        self.erase_framebuffer(None);
                    }
                }
                VerticalPhase::VCounterSkip => {
                    self.regs2.vcnt_skip = self.timings.vcounter_skip;
                }
                VerticalPhase::TopBorder => {
                    self.update_resolution();
                    self.regs2.latch_tvmd();
                    self.vdp2.send(Vdp2Event::LatchTvmd);
                }
                VerticalPhase::LastLine => {
                    self.vdp2.send(Vdp2Event::BeginFrame);
                    self.regs2.vblank = false;
                    intr.vblank_state_change(false);
                }
            }
        }
    }

    fn update_resolution(&mut self) {
        if !self.regs2.tvmd_dirty {
            return;
        }
        let changed = self
            .timings
            .update(&mut self.regs2, self.options.exclusive_monitor_timings);
        self.vdp2.send(Vdp2Event::SetResolution {
            hres: self.timings.hres,
            vres: self.timings.vres,
            exclusive: self.timings.exclusive_monitor,
        });
        if changed {
            crate::vdp2_log!(
                "Screen resolution set to {}x{}",
                self.timings.hres,
                self.timings.vres
            );
        }
    }

    // -------------------------------------------------------------------------
    // VDP1 command engine

    fn vdp1_begin_frame(&mut self) {
        self.regs1.return_address = NO_RETURN;
        self.regs1.curr_command_address = 0;
        self.regs1.curr_frame_ended = false;
        self.vdp1.send(&self.fbs, Vdp1Event::BeginFrame);
        self.pipeline.drawing = true;
    }

    fn vdp1_end_frame(&mut self, intr: &mut dyn VdpInterrupts) {
        self.pipeline.drawing = false;
        self.pipeline.timing_penalty_cycles = 0;
        self.regs1.curr_frame_ended = true;
        intr.trigger_sprite_draw_end();
        intr.vdp1_draw_finished();
    }

    fn swap_framebuffer(&mut self, intr: &mut dyn VdpInterrupts) {
        // Both pipelines must observe the swap at a quiescent point
        self.vdp1.barrier();
        self.vdp2.send_and_wait(Vdp2Event::SwapBarrier);

        self.fbs.lock().unwrap().swap();

        self.regs1.prev_command_address = self.regs1.curr_command_address;
        self.regs1.prev_frame_ended = self.regs1.curr_frame_ended;
        self.regs1.curr_frame_ended = false;

        intr.vdp1_framebuffer_swap();

        if self.regs1.plot_trigger & 0b10 != 0 {
            self.vdp1_begin_frame();
        }

        self.regs1.latch_erase_parameters();
    }

    fn erase_framebuffer(&mut self, cycles: Option<u64>) {
        self.vdp1.barrier();
        self.vdp2.send_and_wait(Vdp2Event::EraseBarrier);

        let mut fbs = self.fbs.lock().unwrap();
        vdp1::erase_framebuffer(
            &mut fbs,
            &self.regs1,
            self.regs2.interlace,
            self.regs2.hres,
            self.timings.vres,
            self.options.deinterlace,
            self.options.transparent_meshes,
            cycles,
        );
    }

    /// Runs the VDP1 command engine for the given number of host cycles.
    #[profiling::function]
    pub fn advance(&mut self, cycles: u64, intr: &mut dyn VdpInterrupts) {
        if !self.pipeline.drawing {
            return;
        }

        // Coarse cost estimates under-account texture and VRAM penalties;
        // the command engine runs with a compensating budget
        let cycles = cycles << 2;

        if cycles <= self.pipeline.spillover_cycles {
            self.pipeline.spillover_cycles -= cycles;
            return;
        }

        let mut cycles = cycles;
        if self.pipeline.timing_penalty_cycles > 0 {
            if cycles <= self.pipeline.timing_penalty_cycles {
                self.pipeline.timing_penalty_cycles -= cycles;
                return;
            }
            cycles -= self.pipeline.timing_penalty_cycles;
            self.pipeline.timing_penalty_cycles = 0;
        }

        let mut budget = cycles - self.pipeline.spillover_cycles;
        self.pipeline.spillover_cycles = 0;
        while budget > 0 && self.pipeline.drawing {
            let spent = self.process_command(intr);
            if spent >= budget {
                self.pipeline.spillover_cycles = spent - budget;
                break;
            }
            budget -= spent;
        }
    }

    /// Fetches and executes one command. Returns the cycles charged.
    fn process_command(&mut self, intr: &mut dyn VdpInterrupts) -> u64 {
        if !self.pipeline.drawing {
            return 0;
        }

        let cmd_address = self.regs1.curr_command_address;
        let control = Control::from(self.vram1.read_16(cmd_address as usize));

        // Every command costs 16 cycles to fetch, even when skipped
        let mut cycles: u64 = 16;

        crate::vdp1_log!("Processing command {:04X} @ {:05X}", u16::from(control), cmd_address);

        if control.end() {
            self.vdp1_end_frame(intr);
        } else if !control.skip() {
            if control.command_type().is_none() {
                log::debug!(
                    "Invalid VDP1 command {:X}; aborting",
                    control.command()
                );
                self.vdp1_end_frame(intr);
                return cycles;
            }
            self.vdp1.send(
                &self.fbs,
                Vdp1Event::Command {
                    addr: cmd_address,
                    control,
                },
            );
            cycles += estimate_command_cycles(&self.vram1, cmd_address, control);
        }

        let mut address = cmd_address;
        match JumpType::from_bits(control.jump_mode()) {
            JumpType::Next => address += 0x20,
            JumpType::Assign => {
                address = ((self.vram1.read_16(cmd_address as usize + 0x02) as u32) << 3) & !0x1F;
                if address == 0 {
                    // Jumping back to the start of the list would loop forever
                    log::warn!("Possible infinite VDP1 command loop detected; aborting");
                    self.vdp1_end_frame(intr);
                    self.regs1.curr_command_address = 0;
                    return cycles;
                }
            }
            JumpType::Call => {
                // Nested calls do not update the return address
                if self.regs1.return_address == NO_RETURN {
                    self.regs1.return_address = cmd_address + 0x20;
                }
                address = ((self.vram1.read_16(cmd_address as usize + 0x02) as u32) << 3) & !0x1F;
            }
            JumpType::Return => {
                if self.regs1.return_address != NO_RETURN {
                    address = self.regs1.return_address;
                    self.regs1.return_address = NO_RETURN;
                } else {
                    address += 0x20;
                }
            }
        }
        self.regs1.curr_command_address = address & 0x7_FFFF;

        cycles
    }

    // -------------------------------------------------------------------------
    // Host bus: VDP1 VRAM

    #[inline]
    pub fn vdp1_read_vram_8(&self, address: u32) -> u8 {
        self.vram1.read_8(address as usize)
    }

    #[inline]
    pub fn vdp1_read_vram_16(&self, address: u32) -> u16 {
        self.vram1.read_16(address as usize)
    }

    pub fn vdp1_write_vram_8(&mut self, address: u32, value: u8) {
        self.vram1.write_8(address as usize, value);
        self.vdp1.send(
            &self.fbs,
            Vdp1Event::VramWrite8 {
                addr: address & 0x7_FFFF,
                value,
            },
        );
        self.charge_vram_write_stall();
    }

    pub fn vdp1_write_vram_16(&mut self, address: u32, value: u16) {
        self.vram1.write_16(address as usize, value);
        self.vdp1.send(
            &self.fbs,
            Vdp1Event::VramWrite16 {
                addr: address & 0x7_FFFE,
                value,
            },
        );
        self.charge_vram_write_stall();
    }

    #[inline]
    fn charge_vram_write_stall(&mut self) {
        if self.options.stall_vdp1_on_vram_writes && self.pipeline.drawing {
            self.pipeline.timing_penalty_cycles += VDP1_WRITE_STALL_CYCLES;
        }
    }

    // -------------------------------------------------------------------------
    // Host bus: VDP1 framebuffer (display side reads, draw side writes)

    pub fn vdp1_read_fb_8(&self, address: u32) -> u8 {
        let fbs = self.fbs.lock().unwrap();
        fbs.fb[fbs.display_index()].read_8(address as usize)
    }

    pub fn vdp1_read_fb_16(&self, address: u32) -> u16 {
        let fbs = self.fbs.lock().unwrap();
        fbs.fb[fbs.display_index()].read_16(address as usize)
    }

    pub fn vdp1_write_fb_8(&mut self, address: u32, value: u8) {
        let mut fbs = self.fbs.lock().unwrap();
        let index = fbs.draw_index();
        fbs.fb[index].write_8(address as usize, value);
    }

    pub fn vdp1_write_fb_16(&mut self, address: u32, value: u16) {
        let mut fbs = self.fbs.lock().unwrap();
        let index = fbs.draw_index();
        fbs.fb[index].write_16(address as usize, value);
    }

    // -------------------------------------------------------------------------
    // Host bus: VDP1 registers

    #[inline]
    pub fn vdp1_read_reg_16(&self, address: u32) -> u16 {
        self.regs1.read(address)
    }

    /// 8-bit register accesses are performed read-modify-write.
    pub fn vdp1_read_reg_8(&self, address: u32) -> u8 {
        let value = self.regs1.read(address & !1);
        (value >> ((!address & 1) * 8)) as u8
    }

    pub fn vdp1_write_reg_16(&mut self, address: u32, value: u16) {
        let effect = self.regs1.write(address, value);
        self.vdp1.send(
            &self.fbs,
            Vdp1Event::RegWrite {
                addr: address & 0x1E,
                value,
            },
        );
        self.vdp2.send(Vdp2Event::Vdp1RegWrite {
            addr: address & 0x1E,
            value,
        });

        match effect {
            Vdp1RegEffect::None => {}
            Vdp1RegEffect::PlotTriggerImmediate => {
                self.vdp1_begin_frame();
                // Some titles trigger drawing before their tables are ready
                self.pipeline.timing_penalty_cycles += VDP1_PLOT_TRIGGER_DELAY;
            }
            Vdp1RegEffect::DrawTermination => {
                self.pipeline.drawing = false;
                self.pipeline.timing_penalty_cycles = 0;
            }
        }
    }

    pub fn vdp1_write_reg_8(&mut self, address: u32, value: u8) {
        let current = self.regs1.read(address & !1);
        let shift = (!address & 1) * 8;
        let mask = !(0xFFu16 << shift);
        let merged = (current & mask) | ((value as u16) << shift);
        self.vdp1_write_reg_16(address & !1, merged);
    }

    // -------------------------------------------------------------------------
    // Host bus: VDP2 VRAM / CRAM / registers

    #[inline]
    pub fn vdp2_read_vram_8(&self, address: u32) -> u8 {
        self.vram2.read_8(address as usize)
    }

    #[inline]
    pub fn vdp2_read_vram_16(&self, address: u32) -> u16 {
        self.vram2.read_16(address as usize)
    }

    pub fn vdp2_write_vram_8(&mut self, address: u32, value: u8) {
        self.vram2.write_8(address as usize, value);
        self.vdp2.send(Vdp2Event::VramWrite8 {
            addr: address & 0x7_FFFF,
            value,
        });
    }

    pub fn vdp2_write_vram_16(&mut self, address: u32, value: u16) {
        self.vram2.write_16(address as usize, value);
        self.vdp2.send(Vdp2Event::VramWrite16 {
            addr: address & 0x7_FFFE,
            value,
        });
    }

    #[inline]
    pub fn vdp2_read_cram_8(&self, address: u32) -> u8 {
        self.cram.read_8(address as usize)
    }

    #[inline]
    pub fn vdp2_read_cram_16(&self, address: u32) -> u16 {
        self.cram.read_16(address as usize)
    }

    pub fn vdp2_write_cram_8(&mut self, address: u32, value: u8) {
        self.cram.write_8(address as usize, value);
        self.vdp2.send(Vdp2Event::CramWrite8 {
            addr: address & 0xFFF,
            value,
        });
    }

    pub fn vdp2_write_cram_16(&mut self, address: u32, value: u16) {
        self.cram.write_16(address as usize, value);
        self.vdp2.send(Vdp2Event::CramWrite16 {
            addr: address & 0xFFE,
            value,
        });
    }

    #[inline]
    pub fn vdp2_read_reg_16(&self, address: u32) -> u16 {
        self.regs2.read(address)
    }

    pub fn vdp2_write_reg_16(&mut self, address: u32, value: u16) {
        self.regs2.write(address, value);
        self.vdp2.send(Vdp2Event::RegWrite {
            addr: address & 0x1FF,
            value,
        });

        // The rasterizer's pixel contract depends on the interlace mode
        if address & 0x1FF == regs2::TVMD {
            self.vdp1
                .send(&self.fbs, Vdp1Event::SetInterlace(self.regs2.interlace));
        }
    }

    // -------------------------------------------------------------------------
    // Memory-mapped bus dispatch

    pub fn read_8(&self, address: u32) -> u8 {
        match address >> 19 {
            0xB8 => self.vdp1_read_vram_8(address),
            0xB9 => self.vdp1_read_fb_8(address),
            0xBA | 0xBB => self.vdp1_read_reg_8(address),
            0xBC | 0xBD => self.vdp2_read_vram_8(address),
            0xBE => self.vdp2_read_cram_8(address),
            0xBF => {
                log::debug!("Illegal 8-bit VDP2 register read from {:05X}", address & 0x1FF);
                0
            }
            _ => 0,
        }
    }

    pub fn read_16(&self, address: u32) -> u16 {
        match address >> 19 {
            0xB8 => self.vdp1_read_vram_16(address),
            0xB9 => self.vdp1_read_fb_16(address),
            0xBA | 0xBB => self.vdp1_read_reg_16(address),
            0xBC | 0xBD => self.vdp2_read_vram_16(address),
            0xBE => self.vdp2_read_cram_16(address),
            0xBF => self.vdp2_read_reg_16(address),
            _ => 0,
        }
    }

    /// 32-bit accesses are two 16-bit accesses, high word first.
    pub fn read_32(&self, address: u32) -> u32 {
        ((self.read_16(address) as u32) << 16) | self.read_16(address.wrapping_add(2)) as u32
    }

    pub fn write_8(&mut self, address: u32, value: u8) {
        match address >> 19 {
            0xB8 => self.vdp1_write_vram_8(address, value),
            0xB9 => self.vdp1_write_fb_8(address, value),
            0xBA | 0xBB => self.vdp1_write_reg_8(address, value),
            0xBC | 0xBD => self.vdp2_write_vram_8(address, value),
            0xBE => self.vdp2_write_cram_8(address, value),
            0xBF => {
                log::debug!(
                    "Illegal 8-bit VDP2 register write to {:05X} = {:02X}",
                    address & 0x1FF,
                    value
                );
            }
            _ => {}
        }
    }

    pub fn write_16(&mut self, address: u32, value: u16) {
        match address >> 19 {
            0xB8 => self.vdp1_write_vram_16(address, value),
            0xB9 => self.vdp1_write_fb_16(address, value),
            0xBA | 0xBB => self.vdp1_write_reg_16(address, value),
            0xBC | 0xBD => self.vdp2_write_vram_16(address, value),
            0xBE => self.vdp2_write_cram_16(address, value),
            0xBF => self.vdp2_write_reg_16(address, value),
            _ => {}
        }
    }

    pub fn write_32(&mut self, address: u32, value: u32) {
        self.write_16(address, (value >> 16) as u16);
        self.write_16(address.wrapping_add(2), value as u16);
    }

    // -------------------------------------------------------------------------
    // External latch

    /// Latches the HV counters from an external trigger (SMPC).
    pub fn external_latch(&mut self, x: u16, y: u16) {
        if !self.regs2.external_latch_enable {
            return;
        }
        self.regs2.write_hcnt((x + 64) << 2);
        self.regs2.vcnt_latch = Some((y + 16) & 0x3FF);
        self.regs2.exltfg =
            (x as u32) < self.timings.hres && (y as u32) < self.timings.vres;
    }

    // -------------------------------------------------------------------------
    // Save states

    pub fn save_state(&mut self) -> VdpState {
        // Let the workers reach a quiescent point before serializing
        self.vdp1.barrier();
        self.vdp2.send_and_wait(Vdp2Event::PreSaveBarrier);

        let fbs = self.fbs.lock().unwrap();
        VdpState {
            regs1: self.regs1.clone(),
            regs2: self.regs2.clone(),
            vram1: self.vram1.as_bytes().to_vec(),
            vram2: self.vram2.as_bytes().to_vec(),
            cram: self.cram.as_bytes().to_vec(),
            sprite_fb: [fbs.fb[0].as_bytes().to_vec(), fbs.fb[1].as_bytes().to_vec()],
            display_fb: fbs.display,
            h_phase: self.h_phase,
            v_phase: self.v_phase,
            pipeline: self.pipeline.clone(),
        }
    }

    pub fn validate_state(&self, state: &VdpState) -> bool {
        state.vram1.len() == memory::VDP1_VRAM_SIZE
            && state.vram2.len() == memory::VDP2_VRAM_SIZE
            && state.cram.len() == memory::CRAM_SIZE
            && state.sprite_fb[0].len() == memory::SPRITE_FB_SIZE
            && state.sprite_fb[1].len() == memory::SPRITE_FB_SIZE
            && state.display_fb <= 1
    }

    pub fn load_state(&mut self, state: &VdpState) {
        self.regs1 = state.regs1.clone();
        self.regs2 = state.regs2.clone();
        self.vram1.copy_from(&state.vram1);
        self.vram2.copy_from(&state.vram2);
        self.cram.copy_from(&state.cram);
        self.h_phase = state.h_phase;
        self.v_phase = state.v_phase;
        self.pipeline = state.pipeline.clone();

        {
            let mut fbs = self.fbs.lock().unwrap();
            fbs.fb[0].copy_from(&state.sprite_fb[0]);
            fbs.fb[1].copy_from(&state.sprite_fb[1]);
            fbs.display = state.display_fb;
        }

        self.regs2.tvmd_dirty = true;
        self.regs2.access_patterns_dirty = true;
        self.update_resolution();

        // Mirror everything into the worker shadows; the post-load barrier
        // also rebuilds the CRAM cache and re-derives enabled BGs
        self.vdp1.send(
            &self.fbs,
            Vdp1Event::PostLoadSync(Box::new(threading::Vdp1SyncData {
                vram: self.vram1.clone(),
                regs: self.regs1.clone(),
                interlace: self.regs2.interlace,
            })),
        );
        self.vdp1.barrier();

        self.vdp2
            .send_and_wait(Vdp2Event::PostLoadSync(Box::new(threading::Vdp2SyncData {
                vram: self.vram2.clone(),
                cram: self.cram.clone(),
                regs2: self.regs2.clone(),
                regs1: self.regs1.clone(),
            })));
    }

    // -------------------------------------------------------------------------
    // Debug helpers

    #[cfg(feature = "debug-functionality")]
    pub fn dump_vdp1_vram(&self, out: &mut dyn std::io::Write) -> std::io::Result<()> {
        out.write_all(self.vram1.as_bytes())
    }

    #[cfg(feature = "debug-functionality")]
    pub fn dump_vdp2_vram(&self, out: &mut dyn std::io::Write) -> std::io::Result<()> {
        out.write_all(self.vram2.as_bytes())
    }

    #[cfg(feature = "debug-functionality")]
    pub fn dump_vdp2_cram(&self, out: &mut dyn std::io::Write) -> std::io::Result<()> {
        out.write_all(self.cram.as_bytes())
    }

    #[cfg(feature = "debug-functionality")]
    pub fn dump_vdp1_framebuffers(&self, out: &mut dyn std::io::Write) -> std::io::Result<()> {
        let fbs = self.fbs.lock().unwrap();
        out.write_all(fbs.fb[fbs.draw_index()].as_bytes())?;
        out.write_all(fbs.fb[fbs.display_index()].as_bytes())
    }

    // Test-facing accessors

    /// Reads the draw-side framebuffer. The real bus only exposes the
    /// display side; this exists for debuggers and tests.
    pub fn vdp1_read_draw_fb_16(&self, address: u32) -> u16 {
        let fbs = self.fbs.lock().unwrap();
        fbs.fb[fbs.draw_index()].read_16(address as usize)
    }

    #[inline]
    pub fn vcnt(&self) -> u16 {
        self.regs2.vcnt
    }

    #[inline]
    pub fn vdp1_frame_ended(&self) -> bool {
        self.regs1.curr_frame_ended
    }

    #[inline]
    pub fn vdp1_drawing(&self) -> bool {
        self.pipeline.drawing
    }

    #[inline]
    pub fn display_fb_index(&self) -> u8 {
        self.fbs.lock().unwrap().display
    }
}

/// Serializable snapshot of the VDP state. The encoded format is up to the
/// host; everything derives serde.
#[derive(Clone, serde::Serialize, serde::Deserialize)]
pub struct VdpState {
    pub regs1: Vdp1Regs,
    pub regs2: Vdp2Regs,
    pub vram1: Vec<u8>,
    pub vram2: Vec<u8>,
    pub cram: Vec<u8>,
    pub sprite_fb: [Vec<u8>; 2],
    pub display_fb: u8,
    pub h_phase: HorizontalPhase,
    pub v_phase: VerticalPhase,
    pub pipeline: Vdp1Pipeline,
}
