//! VDP1: command words, the rasterizer state, and cycle cost estimation.
//!
//! The command *engine* (fetch/jump/budget loop) lives with the rest of the
//! host-thread state in [`crate::vdp::Vdp`]; everything here runs wherever
//! the rendering happens, which may be a worker thread.

pub mod raster;

use modular_bitfield::bitfield;
use modular_bitfield::prelude::{B2, B3, B4, B6};
use num_traits::FromPrimitive;

use crate::vdp::memory::{SpriteFramebuffers, Vdp1Vram};
use crate::vdp::regs1::Vdp1Regs;
use crate::vdp::regs2::InterlaceMode;
use crate::vdp::vdp1::raster::{sign_extend_13, QuadStepper};

/// Command control word (CMDCTRL).
#[bitfield(bits = 16)]
#[repr(u16)]
#[allow(dead_code)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Control {
    pub command: B4,
    pub flip_h: bool,
    pub flip_v: bool,
    #[skip]
    unused0: B2,
    pub zoom_point: B4,
    pub jump_mode: B2,
    pub skip: bool,
    pub end: bool,
}

impl Control {
    #[inline]
    pub fn command_type(&self) -> Option<CommandType> {
        CommandType::from_u8(self.command())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, num_derive::FromPrimitive)]
#[repr(u8)]
pub enum CommandType {
    DrawNormalSprite = 0x0,
    DrawScaledSprite = 0x1,
    DrawDistortedSprite = 0x2,
    DrawDistortedSpriteAlt = 0x3,
    DrawPolygon = 0x4,
    DrawPolylines = 0x5,
    DrawLine = 0x6,
    DrawPolylinesAlt = 0x7,
    UserClipping = 0x8,
    SystemClipping = 0x9,
    SetLocalCoordinates = 0xA,
    UserClippingAlt = 0xB,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JumpType {
    Next = 0,
    Assign = 1,
    Call = 2,
    Return = 3,
}

impl JumpType {
    #[inline]
    pub fn from_bits(value: u8) -> JumpType {
        match value & 3 {
            0 => JumpType::Next,
            1 => JumpType::Assign,
            2 => JumpType::Call,
            _ => JumpType::Return,
        }
    }
}

/// Draw mode word (CMDPMOD).
#[bitfield(bits = 16)]
#[repr(u16)]
#[allow(dead_code)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DrawMode {
    /// 0 = replace, 1 = shadow, 2 = half-luminance, 3 = half-transparency
    pub color_calc_bits: B2,
    pub gouraud_enable: bool,
    /// 0-4 = palette variants, 5 = RGB555
    pub color_mode: B3,
    pub end_code_disable: bool,
    pub transparent_pixel_disable: bool,
    pub mesh_enable: bool,
    pub user_clipping_enable: bool,
    /// false = draw inside the user clip area, true = draw outside
    pub clipping_mode: bool,
    pub pre_clipping_disable: bool,
    pub high_speed_shrink: bool,
    #[skip]
    unused: B2,
    pub msb_on: bool,
}

/// Character size word (CMDSIZE).
#[bitfield(bits = 16)]
#[repr(u16)]
#[allow(dead_code)]
#[derive(Debug, Copy, Clone)]
pub struct CharSize {
    pub v: u8,
    pub h: B6,
    #[skip]
    unused: B2,
}

/// Rasterizer-side state: the VRAM/register shadows and the clip/local
/// coordinate state established by control commands.
#[derive(Debug)]
pub struct Vdp1RenderState {
    pub vram: Vdp1Vram,
    pub regs: Vdp1Regs,
    /// Shadow of the VDP2 interlace mode, needed by the pixel contract.
    pub interlace: InterlaceMode,

    pub sys_clip_h: i32,
    pub sys_clip_v: i32,
    pub user_clip_x0: i32,
    pub user_clip_y0: i32,
    pub user_clip_x1: i32,
    pub user_clip_y1: i32,
    pub local_coord_x: i32,
    pub local_coord_y: i32,
    /// 1 when command Y coordinates are doubled (double-density interlace).
    pub double_v: u32,
}

impl Vdp1RenderState {
    pub fn new() -> Self {
        Vdp1RenderState {
            vram: Vdp1Vram::new(),
            regs: Vdp1Regs::new(),
            interlace: InterlaceMode::None,
            sys_clip_h: 0,
            sys_clip_v: 0,
            user_clip_x0: 0,
            user_clip_y0: 0,
            user_clip_x1: 0,
            user_clip_y1: 0,
            local_coord_x: 0,
            local_coord_y: 0,
            double_v: 0,
        }
    }

    pub fn reset(&mut self) {
        self.vram.fill(0);
        self.regs.reset();
        self.interlace = InterlaceMode::None;
        self.sys_clip_h = 0;
        self.sys_clip_v = 0;
        self.user_clip_x0 = 0;
        self.user_clip_y0 = 0;
        self.user_clip_x1 = 0;
        self.user_clip_y1 = 0;
        self.local_coord_x = 0;
        self.local_coord_y = 0;
        self.double_v = 0;
    }
}

impl Default for Vdp1RenderState {
    fn default() -> Self {
        Self::new()
    }
}

/// The software VDP1 rasterizer. Owns its state shadows; the sprite
/// framebuffers are borrowed per command.
#[derive(Debug)]
pub struct Vdp1Renderer {
    pub state: Vdp1RenderState,
    pub deinterlace: bool,
    pub transparent_meshes: bool,
}

impl Vdp1Renderer {
    pub fn new(deinterlace: bool, transparent_meshes: bool) -> Self {
        Vdp1Renderer {
            state: Vdp1RenderState::new(),
            deinterlace,
            transparent_meshes,
        }
    }

    pub fn begin_frame(&mut self) {
        let dd = self.state.interlace == InterlaceMode::DoubleDensity;
        self.state.double_v =
            (dd && (self.state.regs.dbl_interlace_enable || self.deinterlace)) as u32;
    }

    pub fn execute_command(
        &mut self,
        fbs: &mut SpriteFramebuffers,
        cmd_address: u32,
        control: Control,
    ) {
        let Some(command) = control.command_type() else {
            return;
        };

        crate::vdp1_log!("[{:05X}] Executing {:?}", cmd_address, command);

        match command {
            CommandType::DrawNormalSprite => self.cmd_draw_normal_sprite(fbs, cmd_address, control),
            CommandType::DrawScaledSprite => self.cmd_draw_scaled_sprite(fbs, cmd_address, control),
            CommandType::DrawDistortedSprite | CommandType::DrawDistortedSpriteAlt => {
                self.cmd_draw_distorted_sprite(fbs, cmd_address, control)
            }
            CommandType::DrawPolygon => self.cmd_draw_polygon(fbs, cmd_address, control),
            CommandType::DrawPolylines | CommandType::DrawPolylinesAlt => {
                self.cmd_draw_polylines(fbs, cmd_address, control)
            }
            CommandType::DrawLine => self.cmd_draw_line(fbs, cmd_address, control),
            CommandType::UserClipping | CommandType::UserClippingAlt => {
                self.cmd_set_user_clipping(cmd_address)
            }
            CommandType::SystemClipping => self.cmd_set_system_clipping(cmd_address),
            CommandType::SetLocalCoordinates => self.cmd_set_local_coordinates(cmd_address),
        }
    }

    fn cmd_set_system_clipping(&mut self, cmd_address: u32) {
        let state = &mut self.state;
        state.sys_clip_h = (state.vram.read_16(cmd_address as usize + 0x14) & 0x3FF) as i32;
        state.sys_clip_v = (state.vram.read_16(cmd_address as usize + 0x16) & 0x1FF) as i32;
    }

    fn cmd_set_user_clipping(&mut self, cmd_address: u32) {
        let state = &mut self.state;
        state.user_clip_x0 = (state.vram.read_16(cmd_address as usize + 0x0C) & 0x3FF) as i32;
        state.user_clip_y0 = (state.vram.read_16(cmd_address as usize + 0x0E) & 0x1FF) as i32;
        state.user_clip_x1 = (state.vram.read_16(cmd_address as usize + 0x14) & 0x3FF) as i32;
        state.user_clip_y1 = (state.vram.read_16(cmd_address as usize + 0x16) & 0x1FF) as i32;
    }

    fn cmd_set_local_coordinates(&mut self, cmd_address: u32) {
        let state = &mut self.state;
        state.local_coord_x = sign_extend_13(state.vram.read_16(cmd_address as usize + 0x0C));
        state.local_coord_y = sign_extend_13(state.vram.read_16(cmd_address as usize + 0x0E));
    }

    fn read_vertex(&self, cmd_address: u32, offset: u32) -> (i32, i32) {
        let x = sign_extend_13(self.state.vram.read_16((cmd_address + offset) as usize));
        let y = sign_extend_13(self.state.vram.read_16((cmd_address + offset + 2) as usize));
        (x, y)
    }

    fn local_vertex(&self, cmd_address: u32, offset: u32) -> (i32, i32) {
        let (x, y) = self.read_vertex(cmd_address, offset);
        (
            x + self.state.local_coord_x,
            (y + self.state.local_coord_y) << self.state.double_v,
        )
    }

    fn cmd_draw_normal_sprite(
        &mut self,
        fbs: &mut SpriteFramebuffers,
        cmd_address: u32,
        control: Control,
    ) {
        let size = CharSize::from(self.state.vram.read_16(cmd_address as usize + 0x0A));
        let char_size_h = (size.h() as i32 * 8).max(1);
        let char_size_v = (size.v() as i32).max(1);

        let (x, y) = self.read_vertex(cmd_address, 0x0C);
        let lx = x + self.state.local_coord_x;
        let ty = y + self.state.local_coord_y;
        let rx = lx + char_size_h - 1;
        let by = ty + char_size_v - 1;

        let dv = self.state.double_v;
        self.plot_textured_quad(
            fbs,
            cmd_address,
            control,
            size,
            (lx, ty << dv),
            (rx, ty << dv),
            (rx, by << dv),
            (lx, by << dv),
        );
    }

    fn cmd_draw_scaled_sprite(
        &mut self,
        fbs: &mut SpriteFramebuffers,
        cmd_address: u32,
        control: Control,
    ) {
        let size = CharSize::from(self.state.vram.read_16(cmd_address as usize + 0x0A));
        let (xa, ya) = self.read_vertex(cmd_address, 0x0C);

        let mut qx = [xa; 4];
        let mut qy = [ya; 4];

        let zoom_point_h = control.zoom_point() & 3;
        let zoom_point_v = (control.zoom_point() >> 2) & 3;

        if zoom_point_h == 0 {
            let xc = sign_extend_13(self.state.vram.read_16(cmd_address as usize + 0x14));
            qx[1] = xc;
            qx[2] = xc;
        } else {
            let xb = sign_extend_13(self.state.vram.read_16(cmd_address as usize + 0x10));
            match zoom_point_h {
                1 => {
                    qx[1] += xb;
                    qx[2] += xb;
                }
                2 => {
                    qx[0] -= xb >> 1;
                    qx[1] += (xb + 1) >> 1;
                    qx[2] += (xb + 1) >> 1;
                    qx[3] -= xb >> 1;
                }
                _ => {
                    qx[0] -= xb;
                    qx[3] -= xb;
                }
            }
        }

        if zoom_point_v == 0 {
            let yc = sign_extend_13(self.state.vram.read_16(cmd_address as usize + 0x16));
            qy[2] = yc;
            qy[3] = yc;
        } else {
            let yb = sign_extend_13(self.state.vram.read_16(cmd_address as usize + 0x12));
            match zoom_point_v {
                1 => {
                    qy[2] += yb;
                    qy[3] += yb;
                }
                2 => {
                    qy[0] -= yb >> 1;
                    qy[1] -= yb >> 1;
                    qy[2] += (yb + 1) >> 1;
                    qy[3] += (yb + 1) >> 1;
                }
                _ => {
                    qy[0] -= yb;
                    qy[1] -= yb;
                }
            }
        }

        let dv = self.state.double_v;
        let lx = self.state.local_coord_x;
        let ly = self.state.local_coord_y;
        self.plot_textured_quad(
            fbs,
            cmd_address,
            control,
            size,
            (qx[0] + lx, (qy[0] + ly) << dv),
            (qx[1] + lx, (qy[1] + ly) << dv),
            (qx[2] + lx, (qy[2] + ly) << dv),
            (qx[3] + lx, (qy[3] + ly) << dv),
        );
    }

    fn cmd_draw_distorted_sprite(
        &mut self,
        fbs: &mut SpriteFramebuffers,
        cmd_address: u32,
        control: Control,
    ) {
        let size = CharSize::from(self.state.vram.read_16(cmd_address as usize + 0x0A));
        let a = self.local_vertex(cmd_address, 0x0C);
        let b = self.local_vertex(cmd_address, 0x10);
        let c = self.local_vertex(cmd_address, 0x14);
        let d = self.local_vertex(cmd_address, 0x18);
        self.plot_textured_quad(fbs, cmd_address, control, size, a, b, c, d);
    }

    fn cmd_draw_polygon(
        &mut self,
        fbs: &mut SpriteFramebuffers,
        cmd_address: u32,
        _control: Control,
    ) {
        let a = self.local_vertex(cmd_address, 0x0C);
        let b = self.local_vertex(cmd_address, 0x10);
        let c = self.local_vertex(cmd_address, 0x14);
        let d = self.local_vertex(cmd_address, 0x18);
        self.plot_solid_quad(fbs, cmd_address, a, b, c, d);
    }

    fn cmd_draw_polylines(
        &mut self,
        fbs: &mut SpriteFramebuffers,
        cmd_address: u32,
        _control: Control,
    ) {
        let a = self.local_vertex(cmd_address, 0x0C);
        let b = self.local_vertex(cmd_address, 0x10);
        let c = self.local_vertex(cmd_address, 0x14);
        let d = self.local_vertex(cmd_address, 0x18);
        // Gouraud colors A-D apply to each line's endpoints in order
        self.plot_solid_line(fbs, cmd_address, a, b, 0, 1);
        self.plot_solid_line(fbs, cmd_address, b, c, 1, 2);
        self.plot_solid_line(fbs, cmd_address, c, d, 2, 3);
        self.plot_solid_line(fbs, cmd_address, d, a, 3, 0);
    }

    fn cmd_draw_line(&mut self, fbs: &mut SpriteFramebuffers, cmd_address: u32, _control: Control) {
        let a = self.local_vertex(cmd_address, 0x0C);
        let b = self.local_vertex(cmd_address, 0x10);
        self.plot_solid_line(fbs, cmd_address, a, b, 0, 1);
    }
}

/// Rough per-command cycle cost used by the host-side command engine.
pub fn estimate_command_cycles(vram: &Vdp1Vram, cmd_address: u32, control: Control) -> u64 {
    let addr = cmd_address as usize;

    let vertex = |offset: usize| -> (i32, i32) {
        (
            sign_extend_13(vram.read_16(addr + offset)),
            sign_extend_13(vram.read_16(addr + offset + 2)),
        )
    };

    let line_cycles = |a: (i32, i32), b: (i32, i32)| -> u64 {
        let width = (b.0 - a.0).unsigned_abs();
        let height = (b.1 - a.1).unsigned_abs();
        width.max(height) as u64
    };

    let quad_cycles = |a, b, c, d| -> u64 {
        let mut cycles = 0;
        let mut quad = QuadStepper::new(a, b, c, d);
        while quad.can_step() {
            cycles += line_cycles(quad.left_coord(), quad.right_coord());
            quad.step();
        }
        cycles
    };

    let Some(command) = control.command_type() else {
        return 0;
    };

    match command {
        CommandType::DrawNormalSprite => {
            let size = CharSize::from(vram.read_16(addr + 0x0A));
            (size.h() as u64 * 8).max(1) * (size.v() as u64).max(1)
        }
        CommandType::DrawScaledSprite => {
            let zoom_point_h = control.zoom_point() & 3;
            let width = if zoom_point_h == 0 {
                let xa = sign_extend_13(vram.read_16(addr + 0x0C));
                let xc = sign_extend_13(vram.read_16(addr + 0x14));
                (xc - xa).unsigned_abs()
            } else {
                sign_extend_13(vram.read_16(addr + 0x10)).unsigned_abs()
            };

            let zoom_point_v = (control.zoom_point() >> 2) & 3;
            let height = if zoom_point_v == 0 {
                let ya = sign_extend_13(vram.read_16(addr + 0x0E));
                let yc = sign_extend_13(vram.read_16(addr + 0x16));
                (yc - ya).unsigned_abs()
            } else {
                sign_extend_13(vram.read_16(addr + 0x12)).unsigned_abs()
            };

            width as u64 * height as u64
        }
        CommandType::DrawDistortedSprite
        | CommandType::DrawDistortedSpriteAlt
        | CommandType::DrawPolygon => {
            quad_cycles(vertex(0x0C), vertex(0x10), vertex(0x14), vertex(0x18))
        }
        CommandType::DrawPolylines | CommandType::DrawPolylinesAlt => {
            let (a, b, c, d) = (vertex(0x0C), vertex(0x10), vertex(0x14), vertex(0x18));
            line_cycles(a, b) + line_cycles(b, c) + line_cycles(c, d) + line_cycles(d, a)
        }
        CommandType::DrawLine => line_cycles(vertex(0x0C), vertex(0x10)),
        _ => 0,
    }
}

/// Erases the display-side framebuffer using the latched erase parameters.
/// `cycles` limits the number of pixel writes when the erase happens inside
/// VBlank; `None` means the whole rectangle is always cleared.
#[allow(clippy::too_many_arguments)]
pub fn erase_framebuffer(
    fbs: &mut SpriteFramebuffers,
    regs: &Vdp1Regs,
    interlace: InterlaceMode,
    hres_on: u8,
    vres: u32,
    deinterlace: bool,
    transparent_meshes: bool,
    cycles: Option<u64>,
) {
    let fb_index = fbs.display_index();

    crate::vdp1_log!(
        "Erasing framebuffer {} - {}x{} to {}x{} -> {:04X}",
        fb_index,
        regs.erase_x1_latch,
        regs.erase_y1_latch,
        regs.erase_x3_latch,
        regs.erase_y3_latch,
        regs.erase_write_value_latch
    );

    let double_density = interlace == InterlaceMode::DoubleDensity;
    let scale_v = double_density as u32;

    // The erase area is constrained by the current display mode
    let max_h: u32 = if hres_on & 1 != 0 { 428 } else { 400 };
    let max_v: u32 = vres >> scale_v;

    let x1 = (regs.erase_x1_latch as u32).min(max_h);
    let x3 = (regs.erase_x3_latch as u32).min(max_h);
    let y1 = (regs.erase_y1_latch as u32).min(max_v) << scale_v;
    let y3 = (regs.erase_y3_latch as u32).min(max_v) << scale_v;

    let mirror = deinterlace && double_density;
    let mut budget = cycles;

    for y in y1..=y3 {
        let fb_offset = y << regs.erase_offset_shift;
        for x in x1..x3 {
            let address = ((fb_offset + x) * 2) as usize & 0x3FFFE;
            fbs.fb[fb_index].write_16(address, regs.erase_write_value_latch);
            if mirror {
                fbs.alt_fb[fb_index].write_16(address, regs.erase_write_value_latch);
            }
            if transparent_meshes {
                fbs.mesh_fb[0][fb_index].write_16(address, 0);
                if mirror {
                    fbs.mesh_fb[1][fb_index].write_16(address, 0);
                }
            }

            if let Some(remaining) = &mut budget {
                if *remaining == 0 {
                    crate::vdp1_log!("Erase process ran out of cycles");
                    return;
                }
                *remaining -= 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_word_decode() {
        let control = Control::from(0b1_0_01_0101_00_11_0001u16);
        assert!(control.end());
        assert!(!control.skip());
        assert_eq!(control.jump_mode(), 0b01);
        assert_eq!(control.zoom_point(), 0b0101);
        assert!(control.flip_h());
        assert!(control.flip_v());
        assert_eq!(control.command_type(), Some(CommandType::DrawScaledSprite));
    }

    #[test]
    fn test_invalid_command_detected() {
        let control = Control::from(0x000Fu16);
        assert_eq!(control.command_type(), None);
    }

    #[test]
    fn test_draw_mode_decode() {
        let mode = DrawMode::from(0x8000u16 | (1 << 12) | (5 << 3) | 0b100 | 0b11);
        assert!(mode.msb_on());
        assert!(mode.high_speed_shrink());
        assert_eq!(mode.color_mode(), 5);
        assert!(mode.gouraud_enable());
        assert_eq!(mode.color_calc_bits(), 0b11);
    }

    #[test]
    fn test_line_cost_is_chebyshev() {
        let mut vram = Vdp1Vram::new();
        // Line from (0, 0) to (100, 40)
        vram.write_16(0x10, 100);
        vram.write_16(0x12, 40);
        let control = Control::new().with_command(CommandType::DrawLine as u8);
        assert_eq!(estimate_command_cycles(&vram, 0, control), 100);
    }

    #[test]
    fn test_normal_sprite_cost_is_area() {
        let mut vram = Vdp1Vram::new();
        // 16x32 texture
        vram.write_16(0x0A, (2 << 8) | 32);
        let control = Control::new().with_command(CommandType::DrawNormalSprite as u8);
        assert_eq!(estimate_command_cycles(&vram, 0, control), 16 * 32);
    }
}
