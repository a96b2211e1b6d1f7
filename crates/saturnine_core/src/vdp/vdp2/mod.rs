//! VDP2: scanline renderer state and per-line orchestration.
//!
//! The renderer owns shadow copies of VRAM/CRAM and both register banks,
//! updated through the event stream, so it can run on a worker thread
//! without touching host-owned memory. Everything mutated during the
//! parallel alternate-field draw lives in a per-field [`FieldContext`].

pub mod access;
pub mod compose;
pub mod layers;
pub mod rotation;
pub mod window;

use crate::host::VdpOptions;
use crate::vdp::color::{convert_555_to_888, Color555, Color888};
use crate::vdp::memory::{Cram, CramCache, Vdp2Vram};
use crate::vdp::regs1::Vdp1Regs;
use crate::vdp::regs2::{InterlaceMode, Vdp2Regs};
use crate::{FRAMEBUFFER_SIZE, MAX_RES_H};

/// One decoded background dot.
#[derive(Debug, Default, Clone, Copy)]
pub struct Pixel {
    pub color: Color888,
    pub transparent: bool,
    pub priority: u8,
    pub special_color_calc: bool,
}

/// Structure-of-arrays pixel row for one layer.
#[derive(Debug)]
pub struct LayerPixels {
    pub color: Box<[Color888; MAX_RES_H]>,
    pub transparent: Box<[bool; MAX_RES_H]>,
    pub priority: Box<[u8; MAX_RES_H]>,
    pub special_color_calc: Box<[bool; MAX_RES_H]>,
}

impl LayerPixels {
    pub fn new() -> Self {
        LayerPixels {
            color: crate::box_array![Color888::default(); MAX_RES_H],
            transparent: crate::box_array![true; MAX_RES_H],
            priority: crate::box_array![0; MAX_RES_H],
            special_color_calc: crate::box_array![false; MAX_RES_H],
        }
    }

    #[inline(always)]
    pub fn set_pixel(&mut self, x: usize, pixel: Pixel) {
        self.color[x] = pixel.color;
        self.transparent[x] = pixel.transparent;
        self.priority[x] = pixel.priority;
        self.special_color_calc[x] = pixel.special_color_calc;
    }

    #[inline(always)]
    pub fn copy_pixel(&mut self, from: usize, to: usize) {
        self.color[to] = self.color[from];
        self.transparent[to] = self.transparent[from];
        self.priority[to] = self.priority[from];
        self.special_color_calc[to] = self.special_color_calc[from];
    }
}

impl Default for LayerPixels {
    fn default() -> Self {
        Self::new()
    }
}

/// Extra sprite layer attributes needed by the compositor.
#[derive(Debug)]
pub struct SpriteAttrs {
    pub color_calc_ratio: Box<[u8; MAX_RES_H]>,
    pub shadow_or_window: Box<[bool; MAX_RES_H]>,
    pub normal_shadow: Box<[bool; MAX_RES_H]>,
    pub window: Box<[bool; MAX_RES_H]>,
}

impl SpriteAttrs {
    pub fn new() -> Self {
        SpriteAttrs {
            color_calc_ratio: crate::box_array![0; MAX_RES_H],
            shadow_or_window: crate::box_array![false; MAX_RES_H],
            normal_shadow: crate::box_array![false; MAX_RES_H],
            window: crate::box_array![false; MAX_RES_H],
        }
    }

    #[inline(always)]
    pub fn copy_attrs(&mut self, from: usize, to: usize) {
        self.color_calc_ratio[to] = self.color_calc_ratio[from];
        self.shadow_or_window[to] = self.shadow_or_window[from];
        self.normal_shadow[to] = self.normal_shadow[from];
    }
}

impl Default for SpriteAttrs {
    fn default() -> Self {
        Self::new()
    }
}

/// Pattern name entry for a character (tile).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Character {
    pub char_num: u32,
    pub pal_num: u8,
    pub spec_color_calc: bool,
    pub spec_priority: bool,
    pub flip_h: bool,
    pub flip_v: bool,
}

/// Pipelined VRAM fetcher state, used by tile and bitmap data.
#[derive(Debug, Clone)]
pub struct VramFetcher {
    pub curr_char: Character,
    pub next_char: Character,
    pub last_char_index: u32,
    pub last_cell_x: u8,
    pub bitmap_data: [u8; 8],
    pub bitmap_data_address: u32,
    pub last_vcell_scroll: u32,
}

impl VramFetcher {
    pub fn new() -> Self {
        VramFetcher {
            curr_char: Character::default(),
            next_char: Character::default(),
            last_char_index: u32::MAX,
            last_cell_x: 0xFF,
            bitmap_data: [0; 8],
            bitmap_data_address: u32::MAX,
            last_vcell_scroll: u32::MAX,
        }
    }

    /// Resets the per-line caches so the first access always fetches.
    pub fn reset_line(&mut self) {
        self.last_char_index = u32::MAX;
        self.last_cell_x = 0xFF;
        self.bitmap_data_address = u32::MAX;
    }

    /// Returns `true` when `address` selects a different 8-byte chunk than
    /// the cached one.
    pub fn update_bitmap_data_address(&mut self, address: u32) -> bool {
        let address = address & !7;
        if address != self.bitmap_data_address {
            self.bitmap_data_address = address;
            true
        } else {
            false
        }
    }
}

impl Default for VramFetcher {
    fn default() -> Self {
        Self::new()
    }
}

/// NBG scroll state accumulated over the frame.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct NormBgLayerState {
    pub frac_scroll_x: u32,
    pub frac_scroll_y: u32,
    pub scroll_inc_h: u32,
    pub line_scroll_table_address: u32,
    pub vert_cell_scroll_offset: u32,
    pub vert_cell_scroll_delay: bool,
    pub vert_cell_scroll_repeat: bool,
    pub mosaic_counter_y: u8,
}

/// Rotation parameter accumulators, updated every line.
#[derive(Debug, Clone, Copy, Default, serde::Serialize, serde::Deserialize)]
pub struct RotationParamState {
    /// Base screen coordinates, signed 13.10 fixed point.
    pub xst: i32,
    pub yst: i32,
    /// Base coefficient address, unsigned 16.10 fixed point.
    pub ka: u32,
}

/// Per-column data precomputed from the rotation parameter tables.
#[derive(Debug)]
pub struct RotationParamLineState {
    pub screen_coords: Box<[(i32, i32); MAX_RES_H]>,
    pub sprite_coords: Box<[(i32, i32); MAX_RES_H]>,
    pub transparent: Box<[bool; MAX_RES_H]>,
    pub line_color: Box<[Color888; MAX_RES_H]>,
}

impl RotationParamLineState {
    pub fn new() -> Self {
        RotationParamLineState {
            screen_coords: crate::box_array![(0, 0); MAX_RES_H],
            sprite_coords: crate::box_array![(0, 0); MAX_RES_H],
            transparent: crate::box_array![false; MAX_RES_H],
            line_color: crate::box_array![Color888::default(); MAX_RES_H],
        }
    }
}

impl Default for RotationParamLineState {
    fn default() -> Self {
        Self::new()
    }
}

/// LNCL and BACK screen colors for the current scanline.
#[derive(Debug, Default, Clone, Copy)]
pub struct LineBackLayerState {
    pub line_color: Color888,
    pub back_color: Color888,
}

/// Renderer-owned state: memory shadows, register shadows, and everything
/// derived per line that both field draws read.
pub struct Vdp2RenderState {
    pub vram: Vdp2Vram,
    pub cram: Cram,
    pub cram_cache: CramCache,
    pub regs2: Vdp2Regs,
    pub regs1: Vdp1Regs,

    pub norm_bg_states: [NormBgLayerState; 4],
    pub rot_param_states: [RotationParamState; 2],
    pub rot_param_line_states: [RotationParamLineState; 2],
    pub line_back_state: LineBackLayerState,
    pub vert_cell_scroll_inc: u32,

    pub hres: u32,
    pub vres: u32,
    pub exclusive_monitor: bool,

    pub deinterlace: bool,
    pub transparent_meshes: bool,
    pub restrict_extended_color_calc: bool,
    pub apply_bitmap_delay_in_normal_modes: bool,
}

impl Vdp2RenderState {
    pub fn new(options: &VdpOptions) -> Self {
        Vdp2RenderState {
            vram: Vdp2Vram::new(),
            cram: Cram::new(),
            cram_cache: CramCache::new(),
            regs2: Vdp2Regs::new(matches!(
                options.video_standard,
                crate::host::VideoStandard::Pal
            )),
            regs1: Vdp1Regs::new(),
            norm_bg_states: Default::default(),
            rot_param_states: Default::default(),
            rot_param_line_states: Default::default(),
            line_back_state: LineBackLayerState::default(),
            vert_cell_scroll_inc: 0,
            hres: crate::vdp::phase::DEFAULT_RES_H,
            vres: crate::vdp::phase::DEFAULT_RES_V,
            exclusive_monitor: false,
            deinterlace: options.deinterlace,
            transparent_meshes: options.transparent_meshes,
            restrict_extended_color_calc: options.restrict_extended_color_calc,
            apply_bitmap_delay_in_normal_modes: options.apply_bitmap_delay_in_normal_modes,
        }
    }

    /// Reads a CRAM color through the cache (modes 0/1) or directly (mode 2).
    #[inline]
    pub fn cram_color(&self, cram_offset: u32, color_index: u32) -> Color888 {
        match self.regs2.vram_control.color_ram_mode {
            0 => {
                let address = ((cram_offset + color_index) * 2) & 0x7FE;
                self.cram_cache.color_at(address as usize)
            }
            1 => {
                let address = ((cram_offset + color_index) * 2) & 0xFFE;
                self.cram_cache.color_at(address as usize)
            }
            _ => {
                let address = ((cram_offset + color_index) * 4) & 0xFFC;
                let data = self.cram.read_32(address as usize);
                Color888::from_rgb888(data)
            }
        }
    }

    /// Reads a raw CRAM address as a 5:5:5 color expanded to 8:8:8.
    #[inline]
    pub fn cram_color_5to8(&self, byte_address: u32) -> Color888 {
        convert_555_to_888(Color555(self.cram.read_16(byte_address as usize & 0xFFE)))
    }

    /// Output row for the given VCNT value.
    #[inline]
    pub fn output_y(&self, y: u32, alt_field: bool) -> u32 {
        if self.regs2.interlace.is_interlaced() && !self.exclusive_monitor {
            let base = (y << 1) | (self.regs2.odd && !self.deinterlace) as u32;
            base ^ alt_field as u32
        } else {
            y
        }
    }

    /// Columns rendered per line; halved when the dot clock doubles pixels.
    #[inline]
    pub fn rotation_columns(&self) -> u32 {
        let double_res_h = self.regs2.hres & 0b010 != 0;
        self.hres >> (double_res_h as u32)
    }

    pub fn rebuild_cram_cache(&mut self) {
        let Vdp2RenderState {
            cram, cram_cache, ..
        } = self;
        cram_cache.rebuild(cram);
    }

    /// Per-frame scroll state initialization, run at VBlank OUT.
    pub fn init_frame(&mut self) {
        for (i, state) in self.norm_bg_states.iter_mut().enumerate() {
            let bg = &self.regs2.bg_params[i + 1];
            state.frac_scroll_x = 0;
            state.frac_scroll_y = 0;
            state.scroll_inc_h = bg.scroll_inc_h;
            state.line_scroll_table_address = bg.line_scroll_table_address;
            state.mosaic_counter_y = 0;
        }
    }

    /// End-of-line bookkeeping: advance vertical scroll and mosaic counters.
    pub fn finish_line(&mut self) {
        let double_density = self.regs2.interlace == InterlaceMode::DoubleDensity;
        for (i, state) in self.norm_bg_states.iter_mut().enumerate() {
            let bg = &self.regs2.bg_params[i + 1];
            state.frac_scroll_y += bg.scroll_inc_v;
            if double_density {
                state.frac_scroll_y += bg.scroll_inc_v;
            }

            if bg.mosaic_enable {
                state.mosaic_counter_y += 1;
                if state.mosaic_counter_y >= self.regs2.mosaic_v {
                    state.mosaic_counter_y = 0;
                }
            }
        }
    }

    /// Reads line color and back screen colors for this line.
    pub fn fetch_line_back_colors(&mut self, y: u32) {
        let line_params = self.regs2.line_screen_params;
        if line_params.per_line || y == 0 {
            let address = line_params.base_address + y * 2;
            let cram_address = self.vram.read_16(address as usize) as u32 * 2;
            self.line_back_state.line_color = self.cram_color_5to8(cram_address);
        }

        let back_params = self.regs2.back_screen_params;
        if back_params.per_line || y == 0 {
            let address = back_params.base_address + y * 2;
            let color = Color555(self.vram.read_16(address as usize));
            self.line_back_state.back_color = convert_555_to_888(color);
        }
    }

    /// Consumes line scroll table entries for NBG0/NBG1 on matching lines.
    pub fn update_line_screen_scroll(&mut self, y: u32) {
        for i in 0..2 {
            let bg = self.regs2.bg_params[i + 1].clone();
            if (y & ((1 << bg.line_scroll_interval) - 1)) != 0 {
                continue;
            }

            let state = &mut self.norm_bg_states[i];
            let mut address = state.line_scroll_table_address;

            let double_density = self.regs2.interlace == InterlaceMode::DoubleDensity;
            let count = if double_density && (y > 0 || (!self.deinterlace && self.regs2.odd)) {
                2
            } else {
                1
            };

            for _ in 0..count {
                if bg.line_scroll_x_enable {
                    let value = self.vram.read_32(address as usize);
                    address += 4;
                    state.frac_scroll_x = (value >> 8) & 0x7FFFF;
                }
                if bg.line_scroll_y_enable {
                    let value = self.vram.read_32(address as usize);
                    address += 4;
                    state.frac_scroll_y = (value >> 8) & 0x7FFFF;
                }
                if bg.line_zoom_enable {
                    let value = self.vram.read_32(address as usize);
                    address += 4;
                    state.scroll_inc_h = (value >> 8) & 0x7FF;
                }
            }
            state.line_scroll_table_address = address;
        }
    }

    /// Per-line setup: access analysis, rotation tables, line colors, line
    /// scroll.
    pub fn prepare_line(&mut self, y: u32) {
        if !self.regs2.display_enable_latch {
            return;
        }

        access::calc_access_patterns(self);
        if self.regs2.bg_enabled[4] || self.regs2.bg_enabled[5] {
            rotation::calc_rotation_parameter_tables(self, y);
        }
        self.fetch_line_back_colors(y);
        self.update_line_screen_scroll(y);
    }
}

/// Mutable per-field rendering context: layer outputs, window
/// classifications and fetcher pipelines. The deinterlace worker owns its
/// own instance for the alternate field.
pub struct FieldContext {
    pub layers: [LayerPixels; 6],
    pub sprite_attrs: SpriteAttrs,
    pub mesh_layer: LayerPixels,
    pub mesh_attrs: SpriteAttrs,
    /// Windows for RBG0, NBG0/RBG1, NBG1, NBG2, NBG3 (bg param order).
    pub bg_windows: [Box<[bool; MAX_RES_H]>; 5],
    pub rot_params_window: Box<[bool; MAX_RES_H]>,
    pub color_calc_window: Box<[bool; MAX_RES_H]>,
    /// 0-3 = NBG0-3, 4 = rotation param A, 5 = rotation param B.
    pub fetchers: [VramFetcher; 6],
    pub rbg_line_colors: [Box<[Color888; MAX_RES_H]>; 2],
}

impl FieldContext {
    pub fn new() -> Self {
        FieldContext {
            layers: Default::default(),
            sprite_attrs: SpriteAttrs::new(),
            mesh_layer: LayerPixels::new(),
            mesh_attrs: SpriteAttrs::new(),
            bg_windows: [
                crate::box_array![false; MAX_RES_H],
                crate::box_array![false; MAX_RES_H],
                crate::box_array![false; MAX_RES_H],
                crate::box_array![false; MAX_RES_H],
                crate::box_array![false; MAX_RES_H],
            ],
            rot_params_window: crate::box_array![false; MAX_RES_H],
            color_calc_window: crate::box_array![false; MAX_RES_H],
            fetchers: Default::default(),
            rbg_line_colors: [
                crate::box_array![Color888::default(); MAX_RES_H],
                crate::box_array![Color888::default(); MAX_RES_H],
            ],
        }
    }

    pub fn reset_fetchers(&mut self) {
        for fetcher in &mut self.fetchers {
            fetcher.reset_line();
        }
    }
}

impl Default for FieldContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Composed output frame, ABGR8888 with pitch = `width`.
pub struct FrameOutput {
    pub data: Box<[u32; FRAMEBUFFER_SIZE]>,
    pub width: u32,
    pub height: u32,
}

impl FrameOutput {
    pub fn new() -> Self {
        FrameOutput {
            data: crate::box_array![0xFF00_0000; FRAMEBUFFER_SIZE],
            width: crate::vdp::phase::DEFAULT_RES_H,
            height: crate::vdp::phase::DEFAULT_RES_V,
        }
    }

    #[inline]
    pub fn row_mut(&mut self, y: u32) -> &mut [u32] {
        let width = self.width as usize;
        let start = (y as usize) * width;
        &mut self.data[start..start + width]
    }
}

impl Default for FrameOutput {
    fn default() -> Self {
        Self::new()
    }
}

/// Draws one field of one scanline: windows, sprite layer, BG layers, and
/// the final composition into `frame`.
pub fn draw_line(
    shared: &Vdp2RenderState,
    ctx: &mut FieldContext,
    fbs: &std::sync::Mutex<crate::vdp::memory::SpriteFramebuffers>,
    frame: &std::sync::Mutex<FrameOutput>,
    y: u32,
    alt_field: bool,
) {
    let hres = shared.hres as usize;
    let window_y = shared.output_y(y, alt_field);

    ctx.reset_fetchers();

    // Sprite layer window and pixels
    {
        let sprite_window_set = shared.regs2.sprite_params.window_set;
        window::calc_window(
            shared,
            window_y,
            &sprite_window_set,
            None,
            &mut ctx.sprite_attrs.window[..hres],
        );
    }
    {
        let fbs = fbs.lock().unwrap();
        layers::draw_sprite_layer(shared, ctx, &fbs, y, alt_field);
    }

    // Windows for the BG layers, rotation parameters and color calculation
    window::calc_all_windows(shared, ctx, window_y);

    // Background layers
    layers::draw_rotation_bg(shared, ctx, 0, y, alt_field);
    layers::draw_rotation_bg(shared, ctx, 1, y, alt_field);
    if !(shared.regs2.bg_enabled[4] && shared.regs2.bg_enabled[5]) {
        for bg in 0..4 {
            layers::draw_normal_bg(shared, ctx, bg, alt_field);
        }
    }

    // Compose into the output frame
    let mut frame = frame.lock().unwrap();
    let out_y = shared.output_y(y, alt_field);
    let row = frame.row_mut(out_y);
    compose::compose_line(shared, ctx, row, alt_field);
}
