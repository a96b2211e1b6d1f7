//! VDP1 rasterizer: line/texture/Gouraud/quad steppers and the pixel write
//! contract.

use crate::vdp::color::Color555;
use crate::vdp::memory::SpriteFramebuffers;
use crate::vdp::regs2::InterlaceMode;
use crate::vdp::vdp1::{CharSize, Control, DrawMode, Vdp1Renderer};

#[inline(always)]
pub fn sign_extend_13(value: u16) -> i32 {
    ((value << 3) as i16 >> 3) as i32
}

#[inline]
pub fn line_length(a: (i32, i32), b: (i32, i32)) -> i32 {
    (b.0 - a.0).abs().max((b.1 - a.1).abs())
}

/// Bresenham-style line interpolator with an optional anti-alias companion
/// pixel filling the corner of diagonal steps.
#[derive(Debug, Clone)]
pub struct LineStepper {
    x: i32,
    y: i32,
    sx: i32,
    sy: i32,
    dx: i32,
    dy: i32,
    err: i32,
    remaining: i32,
    length: i32,
    horizontal_major: bool,
    anti_alias: bool,
    aa_valid: bool,
    aa_x: i32,
    aa_y: i32,
}

impl LineStepper {
    pub fn new(a: (i32, i32), b: (i32, i32), anti_alias: bool) -> Self {
        let dx = (b.0 - a.0).abs();
        let dy = -(b.1 - a.1).abs();
        let length = dx.max(-dy);
        LineStepper {
            x: a.0,
            y: a.1,
            sx: if b.0 >= a.0 { 1 } else { -1 },
            sy: if b.1 >= a.1 { 1 } else { -1 },
            dx,
            dy,
            err: dx + dy,
            remaining: length + 1,
            length,
            horizontal_major: dx >= -dy,
            anti_alias,
            aa_valid: false,
            aa_x: a.0,
            aa_y: a.1,
        }
    }

    #[inline]
    pub fn length(&self) -> i32 {
        self.length
    }

    #[inline]
    pub fn can_step(&self) -> bool {
        self.remaining > 0
    }

    #[inline]
    pub fn coord(&self) -> (i32, i32) {
        (self.x, self.y)
    }

    #[inline]
    pub fn aa_coord(&self) -> (i32, i32) {
        (self.aa_x, self.aa_y)
    }

    /// Advances one pixel. Returns `true` when the step was diagonal and the
    /// anti-alias companion pixel is valid for the new position.
    pub fn step(&mut self) -> bool {
        self.remaining -= 1;
        self.aa_valid = false;
        if self.remaining <= 0 {
            return false;
        }

        let e2 = 2 * self.err;
        let mut moved_x = false;
        let mut moved_y = false;
        if e2 >= self.dy {
            self.err += self.dy;
            self.x += self.sx;
            moved_x = true;
        }
        if e2 <= self.dx {
            self.err += self.dx;
            self.y += self.sy;
            moved_y = true;
        }

        if self.anti_alias && moved_x && moved_y {
            self.aa_valid = true;
            if self.horizontal_major {
                self.aa_x = self.x;
                self.aa_y = self.y - self.sy;
            } else {
                self.aa_x = self.x - self.sx;
                self.aa_y = self.y;
            }
        }
        self.aa_valid
    }

    /// Advances past pixels outside `[0, max_h] x [0, max_v]` so the first
    /// yielded pixel is in bounds. Returns the number of pixels skipped.
    pub fn system_clip(&mut self, max_h: i32, max_v: i32) -> u32 {
        let mut skipped = 0;
        while self.can_step()
            && (self.x < 0 || self.x > max_h || self.y < 0 || self.y > max_v)
        {
            self.step();
            skipped += 1;
        }
        self.aa_valid = false;
        skipped
    }
}

/// Per-channel linear interpolator producing 5:5:5 Gouraud values.
#[derive(Debug, Clone, Copy, Default)]
pub struct GouraudStepper {
    r: i64,
    g: i64,
    b: i64,
    dr: i64,
    dg: i64,
    db: i64,
}

impl GouraudStepper {
    pub fn setup(&mut self, count: i32, from: Color555, to: Color555) {
        let steps = (count - 1).max(1) as i64;
        self.r = (from.r() as i64) << 16;
        self.g = (from.g() as i64) << 16;
        self.b = (from.b() as i64) << 16;
        self.dr = (((to.r() as i64) - (from.r() as i64)) << 16) / steps;
        self.dg = (((to.g() as i64) - (from.g() as i64)) << 16) / steps;
        self.db = (((to.b() as i64) - (from.b() as i64)) << 16) / steps;
    }

    #[inline]
    pub fn step(&mut self) {
        self.r += self.dr;
        self.g += self.dg;
        self.b += self.db;
    }

    #[inline]
    pub fn skip(&mut self, count: u32) {
        self.r += self.dr * count as i64;
        self.g += self.dg * count as i64;
        self.b += self.db * count as i64;
    }

    #[inline]
    pub fn value(&self) -> Color555 {
        Color555::from_parts(
            (self.r >> 16).clamp(0, 31) as u8,
            (self.g >> 16).clamp(0, 31) as u8,
            (self.b >> 16).clamp(0, 31) as u8,
            false,
        )
    }
}

/// Applies a Gouraud value to a source color: each channel is offset by
/// `gouraud - 16` and clamped to the 5-bit range.
#[inline]
pub fn gouraud_blend(src: Color555, gouraud: Color555) -> Color555 {
    let blend = |c: u8, g: u8| -> u8 { (c as i32 + g as i32 - 16).clamp(0, 31) as u8 };
    Color555::from_parts(
        blend(src.r(), gouraud.r()),
        blend(src.g(), gouraud.g()),
        blend(src.b(), gouraud.b()),
        src.msb(),
    )
}

/// Maps pixel positions along a line to texel indices. Supports reverse
/// stepping (flip), skipped texels ("high-speed shrink" sampling only even
/// or odd texels), and exposes each traversed texel so end codes can be
/// detected on every one of them.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextureStepper {
    pos: i64,
    delta: i64,
    value: i32,
    dir: i32,
    hss: bool,
    parity: i32,
}

impl TextureStepper {
    pub fn setup(&mut self, count: i32, from: i32, to: i32, hss: bool, even_odd: bool) {
        let steps = (count - 1).max(1) as i64;
        self.pos = (from as i64) << 16;
        self.delta = (((to - from) as i64) << 16) / steps;
        self.dir = if to >= from { 1 } else { -1 };
        self.value = from;
        self.hss = hss;
        self.parity = even_odd as i32;
        if hss && (self.value & 1) != self.parity {
            self.value += self.dir;
        }
    }

    #[inline]
    fn target(&self) -> i32 {
        let mut target = (self.pos >> 16) as i32;
        if self.hss && (target & 1) != self.parity {
            target -= self.dir;
        }
        target
    }

    #[inline]
    pub fn should_step_texel(&self) -> bool {
        if self.dir >= 0 {
            self.value < self.target()
        } else {
            self.value > self.target()
        }
    }

    #[inline]
    pub fn step_texel(&mut self) {
        self.value += self.dir * if self.hss { 2 } else { 1 };
    }

    #[inline]
    pub fn step_pixel(&mut self) {
        self.pos += self.delta;
    }

    pub fn skip_pixels(&mut self, count: u32) {
        self.pos += self.delta * count as i64;
        self.value = self.target();
    }

    #[inline]
    pub fn value(&self) -> u32 {
        self.value.max(0) as u32
    }
}

/// Interpolates the left (A-D) and right (B-C) edges of a quad in lockstep,
/// yielding one span per row.
#[derive(Debug, Clone)]
pub struct QuadStepper {
    left: EdgeInterp,
    right: EdgeInterp,
    rows: i32,
    row: i32,
}

#[derive(Debug, Clone)]
struct EdgeInterp {
    line: LineStepper,
    len: i32,
    stepped: i32,
}

impl EdgeInterp {
    fn new(from: (i32, i32), to: (i32, i32)) -> Self {
        let line = LineStepper::new(from, to, false);
        let len = line.length();
        EdgeInterp { line, len, stepped: 0 }
    }

    fn advance_to(&mut self, target: i32) {
        while self.stepped < target {
            self.line.step();
            self.stepped += 1;
        }
    }
}

impl QuadStepper {
    pub fn new(a: (i32, i32), b: (i32, i32), c: (i32, i32), d: (i32, i32)) -> Self {
        let left = EdgeInterp::new(a, d);
        let right = EdgeInterp::new(b, c);
        let rows = left.len.max(right.len) + 1;
        QuadStepper {
            left,
            right,
            rows,
            row: 0,
        }
    }

    #[inline]
    pub fn rows(&self) -> i32 {
        self.rows
    }

    #[inline]
    pub fn can_step(&self) -> bool {
        self.row < self.rows
    }

    pub fn step(&mut self) {
        self.row += 1;
        if self.row < self.rows {
            let denominator = self.rows - 1;
            let left_target = self.left.len * self.row / denominator;
            let right_target = self.right.len * self.row / denominator;
            self.left.advance_to(left_target);
            self.right.advance_to(right_target);
        }
    }

    #[inline]
    pub fn left_coord(&self) -> (i32, i32) {
        self.left.line.coord()
    }

    #[inline]
    pub fn right_coord(&self) -> (i32, i32) {
        self.right.line.coord()
    }
}

struct TexturedLineParams {
    control: Control,
    mode: DrawMode,
    color_bank: u16,
    char_addr: u32,
    char_size_h: u32,
    tex_v: u32,
    gouraud_left: Color555,
    gouraud_right: Color555,
}

struct Texel {
    color: u16,
    transparent: bool,
    end_code: bool,
}

/// Samples one texel through the command's color mode, resolving bank or
/// lookup-table palettes on the spot.
fn read_texel(
    state: &super::Vdp1RenderState,
    mode: DrawMode,
    params: &TexturedLineParams,
    char_addr: u32,
    u: u32,
    v: u32,
) -> Texel {
    let char_index = u + v * params.char_size_h;
    let end_code = |is_end_code: bool| is_end_code && !mode.end_code_disable();

    match mode.color_mode() {
        // 4 bpp, 16 colors, bank mode
        0 => {
            let byte = state.vram.read_8((char_addr + (char_index >> 1)) as usize);
            let raw = (byte >> ((!u & 1) * 4)) & 0xF;
            Texel {
                color: raw as u16 | (params.color_bank & 0xFFF0),
                transparent: raw == 0,
                end_code: end_code(raw == 0xF),
            }
        }
        // 4 bpp, 16 colors, lookup table mode
        1 => {
            let byte = state.vram.read_8((char_addr + (char_index >> 1)) as usize);
            let raw = (byte >> ((!u & 1) * 4)) & 0xF;
            Texel {
                color: state
                    .vram
                    .read_16((raw as u32 * 2 + params.color_bank as u32 * 8) as usize),
                transparent: raw == 0,
                end_code: end_code(raw == 0xF),
            }
        }
        // 8 bpp, 64 colors, bank mode
        2 => {
            let raw = state.vram.read_8((char_addr + char_index) as usize);
            Texel {
                color: (raw as u16 & 0x3F) | (params.color_bank & 0xFFC0),
                transparent: raw == 0,
                end_code: end_code(raw == 0xFF),
            }
        }
        // 8 bpp, 128 colors, bank mode
        3 => {
            let raw = state.vram.read_8((char_addr + char_index) as usize);
            Texel {
                color: (raw as u16 & 0x7F) | (params.color_bank & 0xFF80),
                transparent: raw == 0,
                end_code: end_code(raw == 0xFF),
            }
        }
        // 8 bpp, 256 colors, bank mode
        4 => {
            let raw = state.vram.read_8((char_addr + char_index) as usize);
            Texel {
                color: raw as u16 | (params.color_bank & 0xFF00),
                transparent: raw == 0,
                end_code: end_code(raw == 0xFF),
            }
        }
        // 16 bpp, 32768 colors, RGB mode
        _ => {
            let raw = state.vram.read_16((char_addr + char_index * 2) as usize);
            Texel {
                color: raw,
                transparent: raw & 0x8000 == 0,
                end_code: end_code(raw == 0x7FFF),
            }
        }
    }
}

impl Vdp1Renderer {
    #[inline]
    fn is_pixel_system_clipped(&self, x: i32, y: i32) -> bool {
        let state = &self.state;
        x < 0 || x > state.sys_clip_h || y < 0 || y > (state.sys_clip_v << state.double_v)
    }

    #[inline]
    fn is_pixel_user_clipped(&self, x: i32, y: i32) -> bool {
        let state = &self.state;
        x < state.user_clip_x0
            || x > state.user_clip_x1
            || y < (state.user_clip_y0 << state.double_v)
            || y > (state.user_clip_y1 << state.double_v)
    }

    #[inline]
    fn is_pixel_clipped(&self, x: i32, y: i32, user_enable: bool, clip_outside: bool) -> bool {
        if self.is_pixel_system_clipped(x, y) {
            return true;
        }
        // clip_outside = false: draw inside the user area, reject outside.
        // clip_outside = true: draw outside, reject inside.
        if user_enable && self.is_pixel_user_clipped(x, y) != clip_outside {
            return true;
        }
        false
    }

    fn is_line_system_clipped(&self, a: (i32, i32), b: (i32, i32)) -> bool {
        let state = &self.state;
        let max_v = state.sys_clip_v << state.double_v;
        (a.0 < 0 && b.0 < 0)
            || (a.0 > state.sys_clip_h && b.0 > state.sys_clip_h)
            || (a.1 < 0 && b.1 < 0)
            || (a.1 > max_v && b.1 > max_v)
    }

    fn is_quad_system_clipped(
        &self,
        a: (i32, i32),
        b: (i32, i32),
        c: (i32, i32),
        d: (i32, i32),
    ) -> bool {
        let state = &self.state;
        let max_v = state.sys_clip_v << state.double_v;
        let all = |f: &dyn Fn((i32, i32)) -> bool| f(a) && f(b) && f(c) && f(d);
        all(&|p| p.0 < 0)
            || all(&|p| p.0 > state.sys_clip_h)
            || all(&|p| p.1 < 0)
            || all(&|p| p.1 > max_v)
    }

    /// The pixel write contract. Returns `true` when the pixel was accepted
    /// (either written or intentionally dropped by mesh/field selection);
    /// `false` means it was clipped.
    fn plot_pixel(
        &self,
        fbs: &mut SpriteFramebuffers,
        coord: (i32, i32),
        mode: DrawMode,
        color: u16,
        gouraud: Option<Color555>,
    ) -> bool {
        let (x, mut y) = coord;
        let regs = &self.state.regs;

        if self.is_pixel_clipped(x, y, mode.user_clipping_enable(), mode.clipping_mode()) {
            return false;
        }

        if !self.transparent_meshes && mode.mesh_enable() && ((x ^ y) & 1) != 0 {
            return true;
        }

        let double_density = self.state.interlace == InterlaceMode::DoubleDensity;
        let alt_fb = self.deinterlace && double_density && (y & 1) != 0;
        if double_density
            && !self.deinterlace
            && regs.dbl_interlace_enable
            && ((y & 1) != 0) != regs.dbl_interlace_draw_line
        {
            return true;
        }
        if (self.deinterlace && double_density) || regs.dbl_interlace_enable {
            y >>= 1;
        }

        let fb_index = fbs.draw_index();
        let alt_index = alt_fb as usize;
        let fb_offset = (y as u32).wrapping_mul(regs.fb_size_h).wrapping_add(x as u32);

        if regs.pixel_8bits {
            let addr = (fb_offset as usize) & 0x3FFFF;
            let target = if alt_fb {
                &mut fbs.alt_fb[fb_index]
            } else {
                &mut fbs.fb[fb_index]
            };
            if mode.msb_on() {
                let value = target.read_8(addr) | 0x80;
                target.write_8(addr, value);
            } else if self.transparent_meshes && mode.mesh_enable() {
                fbs.mesh_fb[alt_index][fb_index].write_8(addr, color as u8);
            } else {
                target.write_8(addr, color as u8);
                if self.transparent_meshes {
                    fbs.mesh_fb[alt_index][fb_index].write_8(addr, 0);
                }
            }
        } else {
            let addr = ((fb_offset as usize) * 2) & 0x3FFFE;
            let target = if alt_fb {
                &mut fbs.alt_fb[fb_index]
            } else {
                &mut fbs.fb[fb_index]
            };

            if mode.msb_on() {
                let value = target.read_8(addr) | 0x80;
                target.write_8(addr, value);
            } else {
                let mut src = Color555(color);
                let dst = Color555(target.read_16(addr));

                if let Some(gouraud) = gouraud {
                    src = gouraud_blend(src, gouraud);
                }

                let result = match mode.color_calc_bits() {
                    // Replace
                    0 => src,
                    // Shadow: halve destination luminosity if not transparent
                    1 => {
                        if dst.msb() {
                            Color555::from_parts(dst.r() >> 1, dst.g() >> 1, dst.b() >> 1, true)
                        } else {
                            dst
                        }
                    }
                    // Half-luminance
                    2 => Color555::from_parts(src.r() >> 1, src.g() >> 1, src.b() >> 1, src.msb()),
                    // Half-transparency against a non-transparent background
                    _ => {
                        if dst.msb() {
                            Color555::from_parts(
                                (src.r() + dst.r()) >> 1,
                                (src.g() + dst.g()) >> 1,
                                (src.b() + dst.b()) >> 1,
                                dst.msb(),
                            )
                        } else {
                            src
                        }
                    }
                };

                if self.transparent_meshes && mode.mesh_enable() {
                    fbs.mesh_fb[alt_index][fb_index].write_16(addr, result.0);
                } else {
                    target.write_16(addr, result.0);
                    if self.transparent_meshes {
                        fbs.mesh_fb[alt_index][fb_index].write_16(addr, 0);
                    }
                }
            }
        }
        true
    }

    /// Plots an untextured line with anti-aliasing and Gouraud shading.
    /// Returns `true` if any pixel landed in bounds.
    fn plot_line(
        &self,
        fbs: &mut SpriteFramebuffers,
        coord1: (i32, i32),
        coord2: (i32, i32),
        mode: DrawMode,
        color: u16,
        gouraud_from: Color555,
        gouraud_to: Color555,
    ) -> bool {
        if self.is_line_system_clipped(coord1, coord2) {
            return false;
        }

        let mut line = LineStepper::new(coord1, coord2, true);
        let max_v = (self.state.sys_clip_v << self.state.double_v) | self.state.double_v as i32;
        let skipped = line.system_clip(self.state.sys_clip_h, max_v);

        let mut gouraud = GouraudStepper::default();
        if mode.gouraud_enable() {
            gouraud.setup(line.length() + 1, gouraud_from, gouraud_to);
            gouraud.skip(skipped);
        }

        let mut aa = false;
        let mut plotted = false;
        while line.can_step() {
            let gouraud_value = mode.gouraud_enable().then(|| gouraud.value());
            let mut plotted_pixel = self.plot_pixel(fbs, line.coord(), mode, color, gouraud_value);
            if aa {
                plotted_pixel |= self.plot_pixel(fbs, line.aa_coord(), mode, color, gouraud_value);
            }
            if plotted_pixel {
                plotted = true;
            } else if plotted {
                // Every remaining pixel is out of bounds in this direction
                break;
            }

            if mode.gouraud_enable() {
                gouraud.step();
            }
            aa = line.step();
        }

        plotted
    }

    fn plot_textured_line(
        &self,
        fbs: &mut SpriteFramebuffers,
        coord1: (i32, i32),
        coord2: (i32, i32),
        params: &TexturedLineParams,
    ) -> bool {
        if self.is_line_system_clipped(coord1, coord2) {
            return false;
        }

        let mode = params.mode;
        let state = &self.state;
        let char_size_h = params.char_size_h;
        let mut char_addr = params.char_addr;
        if mode.color_mode() == 5 {
            // 16 bpp RGB textures are force-aligned
            char_addr &= !0xF;
        }
        let v = params.tex_v;

        let mut line = LineStepper::new(coord1, coord2, true);
        let max_v = (state.sys_clip_v << state.double_v) | state.double_v as i32;
        let skipped = line.system_clip(state.sys_clip_h, max_v);

        let mut gouraud = GouraudStepper::default();
        if mode.gouraud_enable() {
            gouraud.setup(line.length() + 1, params.gouraud_left, params.gouraud_right);
            gouraud.skip(skipped);
        }

        let (mut u_start, mut u_end) = (0i32, char_size_h as i32 - 1);
        if params.control.flip_h() {
            std::mem::swap(&mut u_start, &mut u_end);
        }
        let use_hss = mode.high_speed_shrink() && line.length() < char_size_h as i32 - 1;

        let mut u_stepper = TextureStepper::default();
        u_stepper.setup(
            line.length() + 1,
            u_start,
            u_end,
            use_hss,
            state.regs.even_odd_select,
        );
        u_stepper.skip_pixels(skipped);

        let mut texel = read_texel(&self.state, mode, params, char_addr, u_stepper.value(), v);
        let mut has_end_code = texel.end_code;
        let mut end_code_count: i32 = if use_hss {
            // High-speed shrink skips texels, so the two-in-a-row abort
            // cannot trigger reliably
            i32::MIN
        } else {
            has_end_code as i32
        };

        let mut aa = false;
        let mut plotted = false;
        'pixels: while line.can_step() {
            // Load new texels whenever the U coordinate advanced
            while u_stepper.should_step_texel() {
                u_stepper.step_texel();
                texel = read_texel(&self.state, mode, params, char_addr, u_stepper.value(), v);
                if texel.end_code {
                    has_end_code = true;
                    end_code_count += 1;
                } else {
                    has_end_code = false;
                }

                if end_code_count == 2 {
                    break 'pixels;
                }
            }
            u_stepper.step_pixel();

            if has_end_code || (texel.transparent && !mode.transparent_pixel_disable()) {
                // Transparent pixels still count for the early-exit check
                let in_bounds = !self.is_pixel_clipped(
                    line.coord().0,
                    line.coord().1,
                    mode.user_clipping_enable(),
                    mode.clipping_mode(),
                ) || (aa
                    && !self.is_pixel_clipped(
                        line.aa_coord().0,
                        line.aa_coord().1,
                        mode.user_clipping_enable(),
                        mode.clipping_mode(),
                    ));
                if in_bounds {
                    plotted = true;
                } else if plotted {
                    break;
                }
                if mode.gouraud_enable() {
                    gouraud.step();
                }
                aa = line.step();
                continue;
            }

            let gouraud_value = mode.gouraud_enable().then(|| gouraud.value());
            let mut plotted_pixel =
                self.plot_pixel(fbs, line.coord(), mode, texel.color, gouraud_value);
            if aa {
                plotted_pixel |=
                    self.plot_pixel(fbs, line.aa_coord(), mode, texel.color, gouraud_value);
            }
            if plotted_pixel {
                plotted = true;
            } else if plotted {
                break;
            }

            if mode.gouraud_enable() {
                gouraud.step();
            }
            aa = line.step();
        }

        if end_code_count == 2 && !plotted {
            // End codes cut the line short; make sure the remainder really is
            // out of bounds before letting the quad early-exit trigger.
            while line.can_step() {
                if !self.is_pixel_clipped(
                    line.coord().0,
                    line.coord().1,
                    mode.user_clipping_enable(),
                    mode.clipping_mode(),
                ) {
                    plotted = true;
                    break;
                }
                line.step();
            }
        }

        plotted
    }

    pub(super) fn plot_textured_quad(
        &mut self,
        fbs: &mut SpriteFramebuffers,
        cmd_address: u32,
        control: Control,
        size: CharSize,
        a: (i32, i32),
        b: (i32, i32),
        c: (i32, i32),
        d: (i32, i32),
    ) {
        if self.is_quad_system_clipped(a, b, c, d) {
            return;
        }

        let addr = cmd_address as usize;
        let mode = DrawMode::from(self.state.vram.read_16(addr + 0x04));
        let color_bank = self.state.vram.read_16(addr + 0x06);
        let char_addr = self.state.vram.read_16(addr + 0x08) as u32 * 8;
        let char_size_h = size.h() as u32 * 8;
        let char_size_v = size.v() as u32;

        let mut quad = QuadStepper::new(a, b, c, d);
        let rows = quad.rows();

        let mut gouraud_left = GouraudStepper::default();
        let mut gouraud_right = GouraudStepper::default();
        if mode.gouraud_enable() {
            let table = (self.state.vram.read_16(addr + 0x1C) as u32) << 3;
            let color_a = Color555(self.state.vram.read_16(table as usize));
            let color_b = Color555(self.state.vram.read_16(table as usize + 2));
            let color_c = Color555(self.state.vram.read_16(table as usize + 4));
            let color_d = Color555(self.state.vram.read_16(table as usize + 6));
            gouraud_left.setup(rows, color_a, color_d);
            gouraud_right.setup(rows, color_b, color_c);
        }

        let (mut v_start, mut v_end) = (0i32, char_size_v as i32 - 1);
        if control.flip_v() {
            std::mem::swap(&mut v_start, &mut v_end);
        }
        let mut v_stepper = TextureStepper::default();
        v_stepper.setup(rows, v_start.max(0), v_end.max(0), false, false);

        let mut plotted_line = false;
        while quad.can_step() {
            while v_stepper.should_step_texel() {
                v_stepper.step_texel();
            }

            let params = TexturedLineParams {
                control,
                mode,
                color_bank,
                char_addr,
                char_size_h,
                tex_v: v_stepper.value(),
                gouraud_left: gouraud_left.value(),
                gouraud_right: gouraud_right.value(),
            };

            if self.plot_textured_line(fbs, quad.left_coord(), quad.right_coord(), &params) {
                plotted_line = true;
            } else if plotted_line {
                // No further span can land inside the clip area
                break;
            }

            v_stepper.step_pixel();
            if mode.gouraud_enable() {
                gouraud_left.step();
                gouraud_right.step();
            }
            quad.step();
        }
    }

    pub(super) fn plot_solid_quad(
        &mut self,
        fbs: &mut SpriteFramebuffers,
        cmd_address: u32,
        a: (i32, i32),
        b: (i32, i32),
        c: (i32, i32),
        d: (i32, i32),
    ) {
        if self.is_quad_system_clipped(a, b, c, d) {
            return;
        }

        let addr = cmd_address as usize;
        let mode = DrawMode::from(self.state.vram.read_16(addr + 0x04));
        let color = self.state.vram.read_16(addr + 0x06);

        let mut quad = QuadStepper::new(a, b, c, d);
        let rows = quad.rows();

        let mut gouraud_left = GouraudStepper::default();
        let mut gouraud_right = GouraudStepper::default();
        if mode.gouraud_enable() {
            let table = (self.state.vram.read_16(addr + 0x1C) as u32) << 3;
            let color_a = Color555(self.state.vram.read_16(table as usize));
            let color_b = Color555(self.state.vram.read_16(table as usize + 2));
            let color_c = Color555(self.state.vram.read_16(table as usize + 4));
            let color_d = Color555(self.state.vram.read_16(table as usize + 6));
            gouraud_left.setup(rows, color_a, color_d);
            gouraud_right.setup(rows, color_b, color_c);
        }

        let mut plotted_line = false;
        while quad.can_step() {
            let plotted = self.plot_line(
                fbs,
                quad.left_coord(),
                quad.right_coord(),
                mode,
                color,
                gouraud_left.value(),
                gouraud_right.value(),
            );
            if plotted {
                plotted_line = true;
            } else if plotted_line {
                break;
            }

            if mode.gouraud_enable() {
                gouraud_left.step();
                gouraud_right.step();
            }
            quad.step();
        }
    }

    pub(super) fn plot_solid_line(
        &mut self,
        fbs: &mut SpriteFramebuffers,
        cmd_address: u32,
        a: (i32, i32),
        b: (i32, i32),
        gouraud_index_a: u32,
        gouraud_index_b: u32,
    ) {
        let addr = cmd_address as usize;
        let mode = DrawMode::from(self.state.vram.read_16(addr + 0x04));
        let color = self.state.vram.read_16(addr + 0x06);

        let (gouraud_from, gouraud_to) = if mode.gouraud_enable() {
            let table = (self.state.vram.read_16(addr + 0x1C) as u32) << 3;
            (
                Color555(self.state.vram.read_16((table + gouraud_index_a * 2) as usize)),
                Color555(self.state.vram.read_16((table + gouraud_index_b * 2) as usize)),
            )
        } else {
            (Color555(0), Color555(0))
        };

        self.plot_line(fbs, a, b, mode, color, gouraud_from, gouraud_to);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_extend_13() {
        assert_eq!(sign_extend_13(0x0000), 0);
        assert_eq!(sign_extend_13(0x0FFF), -1);
        assert_eq!(sign_extend_13(0x07FF), 2047);
        assert_eq!(sign_extend_13(0x1800), -2048);
    }

    #[test]
    fn test_line_stepper_covers_chebyshev_length() {
        let mut line = LineStepper::new((0, 0), (7, 3), false);
        assert_eq!(line.length(), 7);

        let mut pixels = Vec::new();
        while line.can_step() {
            pixels.push(line.coord());
            line.step();
        }
        assert_eq!(pixels.len(), 8);
        assert_eq!(pixels.first(), Some(&(0, 0)));
        assert_eq!(pixels.last(), Some(&(7, 3)));
    }

    #[test]
    fn test_line_stepper_system_clip_skips_leading_pixels() {
        let mut line = LineStepper::new((-4, 0), (5, 0), false);
        let skipped = line.system_clip(1000, 1000);
        assert_eq!(skipped, 4);
        assert_eq!(line.coord(), (0, 0));
    }

    #[test]
    fn test_gouraud_interpolation_endpoints() {
        let mut gouraud = GouraudStepper::default();
        let from = Color555::from_parts(0, 16, 31, false);
        let to = Color555::from_parts(31, 16, 0, false);
        gouraud.setup(8, from, to);
        assert_eq!(gouraud.value(), from);
        for _ in 0..7 {
            gouraud.step();
        }
        assert_eq!(gouraud.value(), to);
    }

    #[test]
    fn test_gouraud_blend_is_offset_by_16() {
        let src = Color555::from_parts(10, 10, 10, true);
        // A gouraud value of 16 leaves the color unchanged
        let neutral = Color555::from_parts(16, 16, 16, false);
        assert_eq!(gouraud_blend(src, neutral), src);

        let brighter = Color555::from_parts(31, 16, 0, false);
        let result = gouraud_blend(src, brighter);
        assert_eq!(result.r(), 25);
        assert_eq!(result.g(), 10);
        assert_eq!(result.b(), 0);
        assert!(result.msb());
    }

    #[test]
    fn test_texture_stepper_spans_full_range() {
        let mut stepper = TextureStepper::default();
        stepper.setup(8, 0, 7, false, false);
        let mut texels = vec![stepper.value()];
        for _ in 0..7 {
            stepper.step_pixel();
            while stepper.should_step_texel() {
                stepper.step_texel();
            }
            texels.push(stepper.value());
        }
        assert_eq!(texels, vec![0, 1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn test_texture_stepper_flipped() {
        let mut stepper = TextureStepper::default();
        stepper.setup(4, 7, 0, false, false);
        assert_eq!(stepper.value(), 7);
        for _ in 0..3 {
            stepper.step_pixel();
            while stepper.should_step_texel() {
                stepper.step_texel();
            }
        }
        assert_eq!(stepper.value(), 0);
    }

    #[test]
    fn test_texture_stepper_high_speed_shrink_parity() {
        let mut stepper = TextureStepper::default();
        // 16 texels collapsing onto 4 pixels, sampling odd texels
        stepper.setup(4, 0, 15, true, true);
        assert_eq!(stepper.value() & 1, 1);
        let mut texels = vec![stepper.value()];
        for _ in 0..3 {
            stepper.step_pixel();
            while stepper.should_step_texel() {
                stepper.step_texel();
            }
            texels.push(stepper.value());
        }
        for texel in texels {
            assert_eq!(texel & 1, 1);
        }
    }

    #[test]
    fn test_quad_stepper_interpolates_edges() {
        // A square: A(0,0) B(7,0) C(7,7) D(0,7)
        let mut quad = QuadStepper::new((0, 0), (7, 0), (7, 7), (0, 7));
        assert_eq!(quad.rows(), 8);
        let mut row = 0;
        while quad.can_step() {
            assert_eq!(quad.left_coord(), (0, row));
            assert_eq!(quad.right_coord(), (7, row));
            quad.step();
            row += 1;
        }
        assert_eq!(row, 8);
    }
}
