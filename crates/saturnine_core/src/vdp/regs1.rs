//! VDP1 register bank.
//!
//! Registers decode into plain fields at write time so the command engine and
//! rasterizer never re-parse raw words on the hot path.

use modular_bitfield::bitfield;
use modular_bitfield::prelude::{B1, B11, B12, B6, B7, B9};

pub const TVMR: u32 = 0x00;
pub const FBCR: u32 = 0x02;
pub const PTMR: u32 = 0x04;
pub const EWDR: u32 = 0x06;
pub const EWLR: u32 = 0x08;
pub const EWRR: u32 = 0x0A;
pub const ENDR: u32 = 0x0C;
pub const EDSR: u32 = 0x10;
pub const LOPR: u32 = 0x12;
pub const COPR: u32 = 0x14;
pub const MODR: u32 = 0x16;

/// Sentinel for "no pending RETURN address".
pub const NO_RETURN: u32 = 0xFFFF_FFFF;

/// Mode register (TVMR).
#[bitfield(bits = 16)]
#[repr(u16)]
#[allow(dead_code)]
#[derive(Debug, Copy, Clone)]
pub struct TvModeSelect {
    /// TVM0: framebuffer pixel depth (0 = 16bpp, 1 = 8bpp)
    pub pixel_8bits: bool,
    /// TVM1: rotation framebuffer
    pub fb_rot_enable: bool,
    /// TVM2: HDTV mode
    pub hdtv_enable: bool,
    /// VBE: erase the framebuffer during VBlank
    pub vblank_erase: bool,
    #[skip]
    unused: B12,
}

/// Frame buffer change register (FBCR).
#[bitfield(bits = 16)]
#[repr(u16)]
#[allow(dead_code)]
#[derive(Debug, Copy, Clone)]
pub struct FbSwapControl {
    /// FCT: manual swap (1) or manual erase (0) when FCM is set
    pub fb_swap_trigger: bool,
    /// FCM: 0 = swap every frame, 1 = manual swap/erase
    pub fb_swap_mode: bool,
    /// DIL: which field to draw in double-interlace mode
    pub dbl_interlace_draw_line: bool,
    /// DIE: double-interlace draw enable
    pub dbl_interlace_enable: bool,
    /// EOS: even/odd coordinate select for high-speed shrink sampling
    pub even_odd_select: bool,
    #[skip]
    unused: B11,
}

/// Erase/write upper-left coordinate (EWLR).
#[bitfield(bits = 16)]
#[repr(u16)]
#[allow(dead_code)]
#[derive(Debug, Copy, Clone)]
pub struct EraseUpperLeft {
    pub y1: B9,
    pub x1: B6,
    #[skip]
    unused: B1,
}

/// Erase/write lower-right coordinate (EWRR).
#[bitfield(bits = 16)]
#[repr(u16)]
#[allow(dead_code)]
#[derive(Debug, Copy, Clone)]
pub struct EraseLowerRight {
    pub y3: B9,
    pub x3: B7,
}

/// Side effect of a VDP1 register write that the command engine must act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vdp1RegEffect {
    None,
    /// PTMR was written with mode 01: start drawing immediately.
    PlotTriggerImmediate,
    /// ENDR was written: terminate drawing.
    DrawTermination,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Vdp1Regs {
    // TVMR
    pub pixel_8bits: bool,
    pub fb_rot_enable: bool,
    pub hdtv_enable: bool,
    pub vblank_erase: bool,

    // FBCR
    pub fb_swap_trigger: bool,
    pub fb_swap_mode: bool,
    pub dbl_interlace_draw_line: bool,
    pub dbl_interlace_enable: bool,
    pub even_odd_select: bool,
    /// Set on FBCR writes; consumed at the end-of-frame swap decision.
    pub fb_params_changed: bool,

    /// PTMR: 00 = idle, 01 = draw on write, 10 = draw on swap
    pub plot_trigger: u8,

    // Erase parameters; the live values latch at swap time
    pub erase_write_value: u16,
    pub erase_x1: u16,
    pub erase_y1: u16,
    pub erase_x3: u16,
    pub erase_y3: u16,
    pub erase_write_value_latch: u16,
    pub erase_x1_latch: u16,
    pub erase_y1_latch: u16,
    pub erase_x3_latch: u16,
    pub erase_y3_latch: u16,

    // Command list state
    pub curr_command_address: u32,
    pub prev_command_address: u32,
    pub return_address: u32,
    pub curr_frame_ended: bool,
    pub prev_frame_ended: bool,

    // Derived framebuffer geometry
    pub fb_size_h: u32,
    pub fb_size_v: u32,
    /// Left shift converting a framebuffer row to a 16-bit word offset.
    pub erase_offset_shift: u32,
}

impl Vdp1Regs {
    pub fn new() -> Self {
        let mut regs = Vdp1Regs {
            pixel_8bits: false,
            fb_rot_enable: false,
            hdtv_enable: false,
            vblank_erase: false,
            fb_swap_trigger: false,
            fb_swap_mode: false,
            dbl_interlace_draw_line: false,
            dbl_interlace_enable: false,
            even_odd_select: false,
            fb_params_changed: false,
            plot_trigger: 0,
            erase_write_value: 0,
            erase_x1: 0,
            erase_y1: 0,
            erase_x3: 0,
            erase_y3: 0,
            erase_write_value_latch: 0,
            erase_x1_latch: 0,
            erase_y1_latch: 0,
            erase_x3_latch: 0,
            erase_y3_latch: 0,
            curr_command_address: 0,
            prev_command_address: 0,
            return_address: NO_RETURN,
            curr_frame_ended: false,
            prev_frame_ended: false,
            fb_size_h: 0,
            fb_size_v: 0,
            erase_offset_shift: 0,
        };
        regs.update_fb_geometry();
        regs
    }

    pub fn reset(&mut self) {
        *self = Vdp1Regs::new();
    }

    pub fn write(&mut self, address: u32, value: u16) -> Vdp1RegEffect {
        match address & 0x1E {
            TVMR => {
                let tvmr = TvModeSelect::from(value);
                self.pixel_8bits = tvmr.pixel_8bits();
                self.fb_rot_enable = tvmr.fb_rot_enable();
                self.hdtv_enable = tvmr.hdtv_enable();
                self.vblank_erase = tvmr.vblank_erase();
                self.update_fb_geometry();
                Vdp1RegEffect::None
            }
            FBCR => {
                let fbcr = FbSwapControl::from(value);
                self.fb_swap_trigger = fbcr.fb_swap_trigger();
                self.fb_swap_mode = fbcr.fb_swap_mode();
                self.dbl_interlace_draw_line = fbcr.dbl_interlace_draw_line();
                self.dbl_interlace_enable = fbcr.dbl_interlace_enable();
                self.even_odd_select = fbcr.even_odd_select();
                self.fb_params_changed = true;
                Vdp1RegEffect::None
            }
            PTMR => {
                self.plot_trigger = (value & 0b11) as u8;
                if self.plot_trigger == 0b01 {
                    Vdp1RegEffect::PlotTriggerImmediate
                } else {
                    Vdp1RegEffect::None
                }
            }
            EWDR => {
                self.erase_write_value = value;
                Vdp1RegEffect::None
            }
            EWLR => {
                let ewlr = EraseUpperLeft::from(value);
                self.erase_x1 = (ewlr.x1() as u16) << 3;
                self.erase_y1 = ewlr.y1();
                Vdp1RegEffect::None
            }
            EWRR => {
                let ewrr = EraseLowerRight::from(value);
                self.erase_x3 = (ewrr.x3() as u16) << 3;
                self.erase_y3 = ewrr.y3();
                Vdp1RegEffect::None
            }
            ENDR => Vdp1RegEffect::DrawTermination,
            _ => Vdp1RegEffect::None,
        }
    }

    pub fn read(&self, address: u32) -> u16 {
        match address & 0x1E {
            EDSR => ((self.curr_frame_ended as u16) << 1) | self.prev_frame_ended as u16,
            LOPR => (self.prev_command_address >> 3) as u16,
            COPR => (self.curr_command_address >> 3) as u16,
            MODR => {
                // Version 1 in bits 12-15, mode flags below
                (0b0001 << 12)
                    | ((self.even_odd_select as u16) << 9)
                    | ((self.dbl_interlace_enable as u16) << 8)
                    | ((self.dbl_interlace_draw_line as u16) << 7)
                    | ((self.fb_swap_mode as u16) << 4)
                    | ((self.vblank_erase as u16) << 3)
                    | ((self.hdtv_enable as u16) << 2)
                    | ((self.fb_rot_enable as u16) << 1)
                    | self.pixel_8bits as u16
            }
            // Write-only registers read back as 0
            _ => 0,
        }
    }

    /// Erase parameters only take effect on the next framebuffer swap.
    pub fn latch_erase_parameters(&mut self) {
        self.erase_write_value_latch = self.erase_write_value;
        self.erase_x1_latch = self.erase_x1;
        self.erase_y1_latch = self.erase_y1;
        self.erase_x3_latch = self.erase_x3;
        self.erase_y3_latch = self.erase_y3;
    }

    fn update_fb_geometry(&mut self) {
        let (h, v) = if self.fb_rot_enable {
            if self.pixel_8bits {
                (512, 512)
            } else {
                (512, 256)
            }
        } else if self.pixel_8bits {
            (1024, 256)
        } else {
            (512, 256)
        };
        self.fb_size_h = h;
        self.fb_size_v = v;
        // Row offset in 16-bit words: 8bpp rows pack two pixels per word
        self.erase_offset_shift = if self.pixel_8bits { 9 } else { h.trailing_zeros() };
    }
}

impl Default for Vdp1Regs {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tvmr_decode() {
        let mut regs = Vdp1Regs::new();
        regs.write(TVMR, 0b1001);
        assert!(regs.pixel_8bits);
        assert!(!regs.fb_rot_enable);
        assert!(regs.vblank_erase);
        assert_eq!(regs.fb_size_h, 1024);
    }

    #[test]
    fn test_fbcr_marks_params_changed() {
        let mut regs = Vdp1Regs::new();
        assert!(!regs.fb_params_changed);
        regs.write(FBCR, 0b10);
        assert!(regs.fb_swap_mode);
        assert!(regs.fb_params_changed);
    }

    #[test]
    fn test_ptmr_effects() {
        let mut regs = Vdp1Regs::new();
        assert_eq!(regs.write(PTMR, 0b01), Vdp1RegEffect::PlotTriggerImmediate);
        assert_eq!(regs.write(PTMR, 0b10), Vdp1RegEffect::None);
        assert_eq!(regs.plot_trigger, 0b10);
        assert_eq!(regs.write(ENDR, 0), Vdp1RegEffect::DrawTermination);
    }

    #[test]
    fn test_erase_coordinates_latch_on_demand() {
        let mut regs = Vdp1Regs::new();
        regs.write(EWDR, 0x1234);
        regs.write(EWLR, (2 << 9) | 10);
        regs.write(EWRR, (40 << 9) | 200);

        assert_eq!(regs.erase_x1, 16);
        assert_eq!(regs.erase_y1, 10);
        assert_eq!(regs.erase_x3, 320);
        assert_eq!(regs.erase_y3, 200);

        // Live values do not affect the latches until a swap
        assert_eq!(regs.erase_write_value_latch, 0);
        regs.latch_erase_parameters();
        assert_eq!(regs.erase_write_value_latch, 0x1234);
        assert_eq!(regs.erase_x3_latch, 320);
    }

    #[test]
    fn test_status_reads() {
        let mut regs = Vdp1Regs::new();
        regs.curr_frame_ended = true;
        regs.prev_command_address = 0x100;
        regs.curr_command_address = 0x2A0;
        assert_eq!(regs.read(EDSR), 0b10);
        assert_eq!(regs.read(LOPR), 0x20);
        assert_eq!(regs.read(COPR), 0x54);
    }
}
