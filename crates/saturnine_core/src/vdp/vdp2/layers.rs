//! Layer renderers: the sprite layer fed from the VDP1 framebuffer, the
//! four normal scroll backgrounds and the two rotation backgrounds.

use crate::vdp::color::{convert_555_to_888, Color555};
use crate::vdp::memory::{SpriteFb, SpriteFramebuffers};
use crate::vdp::regs2::{
    BgParams, CharacterMode, ColorFormat, InterlaceMode, PriorityMode, RotationParamMode,
    ScreenOverProcess, SpecialColorCalcMode, LYR_NBG0_RBG1, LYR_RBG0,
};
use crate::vdp::sprite::{SpriteData, SpriteSpecial};
use crate::vdp::vdp2::rotation::select_rotation_parameter;
use crate::vdp::vdp2::{Character, FieldContext, Pixel, Vdp2RenderState, VramFetcher};

// -----------------------------------------------------------------------------
// Sprite layer

/// Decodes one framebuffer pixel into sprite data, honoring the readout
/// width mismatches some titles rely on (8-bit data with a 16-bit type and
/// the reverse).
fn fetch_sprite_data(
    shared: &Vdp2RenderState,
    fb: &SpriteFb,
    fb_offset: u32,
    apply_mesh: bool,
) -> SpriteData {
    let sprite_type = shared.regs2.sprite_params.sprite_type;

    let raw = if shared.regs1.pixel_8bits {
        let mut raw = fb.read_8(fb_offset as usize & 0x3FFFF) as u16;
        if sprite_type.is_word_sized() && (!apply_mesh || raw != 0) {
            // 8-bit data read through a word-sized type: treat the missing
            // high byte as set
            raw |= 0xFF00;
        }
        raw
    } else {
        let mut offset = (fb_offset as usize * 2) & 0x3FFFE;
        if !sprite_type.is_word_sized() {
            // Byte-sized types read the low byte of the stored word
            offset += 1;
        }
        ((fb.read_8(offset) as u16) << 8) | fb.read_8(offset + 1) as u16
    };

    SpriteData::decode(sprite_type, raw)
}

#[allow(clippy::too_many_arguments)]
fn draw_sprite_pixel(
    shared: &Vdp2RenderState,
    layer: &mut crate::vdp::vdp2::LayerPixels,
    attrs: &mut crate::vdp::vdp2::SpriteAttrs,
    in_window: bool,
    x: usize,
    fb: &SpriteFb,
    fb_offset: u32,
    apply_mesh: bool,
) {
    let params = &shared.regs2.sprite_params;

    if in_window {
        layer.transparent[x] = true;
        attrs.shadow_or_window[x] = false;
        return;
    }

    if params.mixed_format {
        let word_offset = (fb_offset as usize * 2) & 0x3FFFE;
        let raw = fb.read_16(word_offset);
        if raw & 0x8000 != 0 {
            // RGB data. Transparency rules depend on the type class:
            // byte-sized types check the low byte, word-sized types with a
            // shadow/window bit check the low 15 bits under sprite window
            if !params.sprite_type.is_word_sized() {
                if raw & 0xFF == 0 {
                    layer.transparent[x] = true;
                    attrs.shadow_or_window[x] = false;
                    return;
                }
            } else if params.sprite_type as u8 >= 2
                && params.use_sprite_window
                && raw & 0x7FFF == 0
            {
                layer.transparent[x] = true;
                attrs.shadow_or_window[x] = false;
                return;
            }

            layer.color[x] = convert_555_to_888(Color555(raw));
            layer.transparent[x] = false;
            layer.priority[x] = params.priorities[0];
            attrs.color_calc_ratio[x] = params.color_calc_ratios[0];
            attrs.shadow_or_window[x] = false;
            attrs.normal_shadow[x] = false;
            return;
        }
    }

    let sprite_data = fetch_sprite_data(shared, fb, fb_offset, apply_mesh);

    // Shadow/window pixels feed the sprite window instead of the display
    if params.use_sprite_window
        && params.window_set.enabled[2]
        && sprite_data.shadow_or_window != params.window_set.inverted[2]
    {
        layer.transparent[x] = true;
        attrs.shadow_or_window[x] = true;
        return;
    }

    let color_index = params.color_data_offset + sprite_data.color_data as u32;
    let color = shared.cram_color(0, color_index);

    layer.color[x] = color;
    layer.transparent[x] = sprite_data.special == SpriteSpecial::Transparent;
    layer.priority[x] = params.priorities[sprite_data.priority as usize & 7];
    attrs.color_calc_ratio[x] = params.color_calc_ratios[sprite_data.color_calc_ratio as usize & 7];
    attrs.shadow_or_window[x] = sprite_data.shadow_or_window;
    attrs.normal_shadow[x] = sprite_data.special == SpriteSpecial::Shadow;
}

pub fn draw_sprite_layer(
    shared: &Vdp2RenderState,
    ctx: &mut FieldContext,
    fbs: &SpriteFramebuffers,
    y: u32,
    alt_field: bool,
) {
    let regs1 = &shared.regs1;
    let regs2 = &shared.regs2;

    // VDP1 scaling: hi-res VDP2 doubles 16-bit sprite pixels; 8-bit
    // framebuffers in normal modes read out at half rate
    let plain = !regs1.hdtv_enable && !regs1.fb_rot_enable;
    let double_res_h = plain && !regs1.pixel_8bits && (regs2.hres & 0b110) == 0b010;
    let half_res_h = plain && regs1.pixel_8bits && (regs2.hres & 0b110) == 0b000;
    let x_shift = double_res_h as u32;
    let x_sprite_shift = half_res_h as u32;
    let max_x = shared.hres >> x_shift;

    let double_density = regs2.interlace == InterlaceMode::DoubleDensity;
    let fb_index = fbs.display_index();
    let sprite_fb = if double_density && alt_field {
        &fbs.alt_fb[fb_index]
    } else {
        &fbs.fb[fb_index]
    };
    let mesh_fb = &fbs.mesh_fb[alt_field as usize][fb_index];

    for x in 0..max_x as usize {
        let xx = x << x_shift;

        let fb_offset = if regs1.fb_rot_enable {
            let (cx, cy) = shared.rot_param_line_states[0].sprite_coords[x];
            if cx < 0 || cx >= regs1.fb_size_h as i32 || cy < 0 || cy >= regs1.fb_size_v as i32 {
                ctx.layers[0].transparent[xx] = true;
                ctx.sprite_attrs.shadow_or_window[xx] = false;
                if double_res_h {
                    ctx.layers[0].copy_pixel(xx, xx + 1);
                    ctx.sprite_attrs.copy_attrs(xx, xx + 1);
                }
                if shared.transparent_meshes {
                    ctx.mesh_layer.transparent[xx] = true;
                    ctx.mesh_attrs.shadow_or_window[xx] = false;
                    if double_res_h {
                        ctx.mesh_layer.copy_pixel(xx, xx + 1);
                        ctx.mesh_attrs.copy_attrs(xx, xx + 1);
                    }
                }
                continue;
            }
            (cx + cy * regs1.fb_size_h as i32) as u32
        } else {
            ((x as u32) << x_sprite_shift) + y * regs1.fb_size_h
        };

        let in_window = ctx.sprite_attrs.window[xx];
        draw_sprite_pixel(
            shared,
            &mut ctx.layers[0],
            &mut ctx.sprite_attrs,
            in_window,
            xx,
            sprite_fb,
            fb_offset,
            false,
        );
        if double_res_h {
            ctx.layers[0].copy_pixel(xx, xx + 1);
            ctx.sprite_attrs.copy_attrs(xx, xx + 1);
        }

        if shared.transparent_meshes {
            draw_sprite_pixel(
                shared,
                &mut ctx.mesh_layer,
                &mut ctx.mesh_attrs,
                in_window,
                xx,
                mesh_fb,
                fb_offset,
                true,
            );
            if double_res_h {
                ctx.mesh_layer.copy_pixel(xx, xx + 1);
                ctx.mesh_attrs.copy_attrs(xx, xx + 1);
            }
        }
    }
}

// -----------------------------------------------------------------------------
// Character and dot fetching

fn fetch_two_word_character(
    shared: &Vdp2RenderState,
    bg: &BgParams,
    page_base_address: u32,
    char_index: u32,
) -> Character {
    let char_address = page_base_address + char_index * 4;
    let bank = ((char_address >> 17) & 3) as usize;
    if !bg.pat_name_access[bank] {
        return Character::default();
    }

    let data = shared.vram.read_32(char_address as usize);
    Character {
        char_num: data & 0x7FFF,
        pal_num: ((data >> 16) & 0x7F) as u8,
        spec_color_calc: data & (1 << 28) != 0,
        spec_priority: data & (1 << 29) != 0,
        flip_h: data & (1 << 30) != 0,
        flip_v: data & (1 << 31) != 0,
    }
}

/// Expands one-word pattern name data using the supplementary register
/// bits. `four_cell`, `large_palette` and `ext_char` select how the
/// character number and palette are assembled.
pub fn extract_one_word_character(
    bg: &BgParams,
    char_data: u16,
    four_cell: bool,
    large_palette: bool,
    ext_char: bool,
) -> Character {
    let base_char_bits = if ext_char { 12 } else { 10 };
    let base_char_num = (char_data & ((1 << base_char_bits) - 1)) as u32;
    let base_char_pos = if four_cell { 2 } else { 0 };

    let suppl_start = base_char_pos + if ext_char { 2 } else { 0 };
    let suppl = (bg.suppl_scroll_char_num as u32 >> suppl_start) & ((1 << (5 - suppl_start)) - 1);
    let suppl_pos = 10 + suppl_start;

    let mut char_num = (base_char_num << base_char_pos) | (suppl << suppl_pos);
    if four_cell {
        char_num |= bg.suppl_scroll_char_num as u32 & 0b11;
    }

    let pal_num = if large_palette {
        (((char_data >> 12) & 0x7) as u8) << 4
    } else {
        ((char_data >> 12) & 0xF) as u8 | bg.suppl_scroll_pal_num
    };

    Character {
        char_num,
        pal_num,
        spec_color_calc: bg.suppl_scroll_special_color_calc,
        spec_priority: bg.suppl_scroll_special_priority,
        flip_h: !ext_char && char_data & (1 << 10) != 0,
        flip_v: !ext_char && char_data & (1 << 11) != 0,
    }
}

fn fetch_one_word_character(
    shared: &Vdp2RenderState,
    bg: &BgParams,
    page_base_address: u32,
    char_index: u32,
) -> Character {
    let char_address = page_base_address + char_index * 2;
    let bank = ((char_address >> 17) & 3) as usize;
    if !bg.pat_name_access[bank] {
        return Character::default();
    }

    let char_data = shared.vram.read_16(char_address as usize);
    extract_one_word_character(
        bg,
        char_data,
        bg.cell_size_shift != 0,
        bg.color_format != ColorFormat::Palette16,
        bg.char_mode == CharacterMode::OneWordExtended,
    )
}

#[inline]
fn special_color_calc_flag(
    shared: &Vdp2RenderState,
    bg: &BgParams,
    spec_source: bool,
    spec_color_code: u8,
    color_msb: bool,
) -> bool {
    let codes = &shared.regs2.special_function_codes[bg.special_function_select];
    match bg.special_color_calc_mode {
        SpecialColorCalcMode::PerScreen => bg.color_calc_enable,
        SpecialColorCalcMode::PerCharacter => bg.color_calc_enable && spec_source,
        SpecialColorCalcMode::PerDot => {
            bg.color_calc_enable && spec_source && codes.color_matches[spec_color_code as usize & 7]
        }
        SpecialColorCalcMode::ColorDataMsb => bg.color_calc_enable && color_msb,
    }
}

/// Fetches one dot from a character's cell data.
pub fn fetch_character_pixel(
    shared: &Vdp2RenderState,
    bg: &BgParams,
    ch: Character,
    dot: (u32, u32),
    cell_index: u32,
) -> Pixel {
    let (mut dot_x, mut dot_y) = dot;
    let mut cell_index = cell_index;

    if ch.flip_h {
        dot_x ^= 7;
        if bg.cell_size_shift > 0 {
            cell_index ^= 1;
        }
    }
    if ch.flip_v {
        dot_y ^= 7;
        if bg.cell_size_shift > 0 {
            cell_index ^= 2;
        }
    }

    // Cell data strides grow with the color depth
    cell_index <<= match bg.color_format {
        ColorFormat::Rgb888 => 3,
        ColorFormat::Rgb555 => 2,
        ColorFormat::Palette256 | ColorFormat::Palette2048 => 1,
        ColorFormat::Palette16 => 0,
    };

    let cell_address = (ch.char_num + cell_index) * 0x20;
    let dot_offset = dot_x + dot_y * 8;

    let mut pixel = Pixel::default();
    let spec_color_code: u8;

    match bg.color_format {
        ColorFormat::Palette16 => {
            let dot_address = cell_address + (dot_offset >> 1);
            let bank = ((dot_address >> 17) & 3) as usize;
            let dot_data = if bg.char_pat_access[bank] {
                (shared.vram.read_8(dot_address as usize) >> ((!dot_x & 1) * 4)) & 0xF
            } else {
                0
            };
            let color_index = ((ch.pal_num as u32) << 4) | dot_data as u32;
            spec_color_code = (dot_data >> 1) & 7;
            pixel.color = shared.cram_color(bg.cram_offset, color_index);
            pixel.transparent = bg.enable_transparency && dot_data == 0;
        }
        ColorFormat::Palette256 => {
            let dot_address = cell_address + dot_offset;
            let bank = ((dot_address >> 17) & 3) as usize;
            let dot_data = if bg.char_pat_access[bank] {
                shared.vram.read_8(dot_address as usize)
            } else {
                0
            };
            let color_index = (((ch.pal_num & 0x70) as u32) << 4) | dot_data as u32;
            spec_color_code = (dot_data >> 1) & 7;
            pixel.color = shared.cram_color(bg.cram_offset, color_index);
            pixel.transparent = bg.enable_transparency && dot_data == 0;
        }
        ColorFormat::Palette2048 => {
            let dot_address = cell_address + dot_offset * 2;
            let bank = ((dot_address >> 17) & 3) as usize;
            let dot_data = if bg.char_pat_access[bank] {
                shared.vram.read_16(dot_address as usize)
            } else {
                0
            };
            spec_color_code = ((dot_data >> 1) & 7) as u8;
            pixel.color = shared.cram_color(bg.cram_offset, (dot_data & 0x7FF) as u32);
            pixel.transparent = bg.enable_transparency && dot_data & 0x7FF == 0;
        }
        ColorFormat::Rgb555 => {
            let dot_address = cell_address + dot_offset * 2;
            let bank = ((dot_address >> 17) & 3) as usize;
            let dot_data = if bg.char_pat_access[bank] {
                shared.vram.read_16(dot_address as usize)
            } else {
                0
            };
            spec_color_code = 7;
            pixel.color = convert_555_to_888(Color555(dot_data));
            pixel.color.msb = true;
            pixel.transparent = bg.enable_transparency && dot_data & 0x8000 == 0;
        }
        ColorFormat::Rgb888 => {
            let dot_address = cell_address + dot_offset * 4;
            let bank = ((dot_address >> 17) & 3) as usize;
            let dot_data = if bg.char_pat_access[bank] {
                shared.vram.read_32(dot_address as usize)
            } else {
                0
            };
            spec_color_code = 7;
            pixel.color = crate::vdp::color::Color888::from_rgb888(dot_data);
            pixel.color.msb = true;
            pixel.transparent = bg.enable_transparency && dot_data & 0x8000_0000 == 0;
        }
    }

    pixel.special_color_calc = special_color_calc_flag(
        shared,
        bg,
        ch.spec_color_calc,
        spec_color_code,
        pixel.color.msb,
    );

    pixel.priority = bg.priority_number;
    match bg.priority_mode {
        PriorityMode::PerScreen => {}
        PriorityMode::PerCharacter => {
            pixel.priority = (pixel.priority & !1) | ch.spec_priority as u8;
        }
        PriorityMode::PerDot => {
            pixel.priority &= !1;
            if bg.color_format.is_palette() && ch.spec_priority {
                let codes = &shared.regs2.special_function_codes[bg.special_function_select];
                pixel.priority |= codes.color_matches[spec_color_code as usize & 7] as u8;
            }
        }
    }

    pixel
}

/// Fetches one dot of bitmap data through the 8-byte fetcher pipeline.
pub fn fetch_bitmap_pixel(
    shared: &Vdp2RenderState,
    bg: &BgParams,
    bitmap_base_address: u32,
    coord: (u32, u32),
    fetcher: &mut VramFetcher,
) -> Pixel {
    let (mut dot_x, mut dot_y) = coord;
    // Bitmap data wraps around infinitely
    dot_x &= bg.bitmap_size_h - 1;
    dot_y &= bg.bitmap_size_v - 1;

    let dot_offset = dot_x + dot_y * bg.bitmap_size_h;
    let pal_num = bg.suppl_bitmap_pal_num;

    let fetch = |address: u32, fetcher: &mut VramFetcher| {
        let bank = ((address >> 17) & 3) as usize;
        if !bg.char_pat_access[bank] {
            fetcher.bitmap_data.fill(0);
            return;
        }
        let offset = bg.vram_data_offset[bank];
        if fetcher.update_bitmap_data_address(address) {
            let base = ((address & !7) + offset) as usize & 0x7_FFF8;
            for (i, byte) in fetcher.bitmap_data.iter_mut().enumerate() {
                *byte = shared.vram.read_8(base + i);
            }
        }
    };

    let mut pixel = Pixel::default();
    let spec_color_code: u8;

    match bg.color_format {
        ColorFormat::Palette16 => {
            let dot_address = bitmap_base_address + (dot_offset >> 1);
            fetch(dot_address, fetcher);
            let byte = fetcher.bitmap_data[(dot_address & 7) as usize];
            let dot_data = (byte >> ((!dot_x & 1) * 4)) & 0xF;
            spec_color_code = (dot_data >> 1) & 7;
            pixel.color = shared.cram_color(bg.cram_offset, pal_num | dot_data as u32);
            pixel.transparent = bg.enable_transparency && dot_data == 0;
        }
        ColorFormat::Palette256 => {
            let dot_address = bitmap_base_address + dot_offset;
            fetch(dot_address, fetcher);
            let dot_data = fetcher.bitmap_data[(dot_address & 7) as usize];
            spec_color_code = (dot_data >> 1) & 7;
            pixel.color = shared.cram_color(bg.cram_offset, pal_num | dot_data as u32);
            pixel.transparent = bg.enable_transparency && dot_data == 0;
        }
        ColorFormat::Palette2048 => {
            let dot_address = bitmap_base_address + dot_offset * 2;
            fetch(dot_address, fetcher);
            let index = (dot_address & 6) as usize;
            let dot_data = ((fetcher.bitmap_data[index] as u16) << 8)
                | fetcher.bitmap_data[index + 1] as u16;
            spec_color_code = ((dot_data >> 1) & 7) as u8;
            pixel.color = shared.cram_color(bg.cram_offset, (dot_data & 0x7FF) as u32);
            pixel.transparent = bg.enable_transparency && dot_data & 0x7FF == 0;
        }
        ColorFormat::Rgb555 => {
            let dot_address = bitmap_base_address + dot_offset * 2;
            fetch(dot_address, fetcher);
            let index = (dot_address & 6) as usize;
            let dot_data = ((fetcher.bitmap_data[index] as u16) << 8)
                | fetcher.bitmap_data[index + 1] as u16;
            spec_color_code = 7;
            pixel.color = convert_555_to_888(Color555(dot_data));
            pixel.color.msb = true;
            pixel.transparent = bg.enable_transparency && dot_data & 0x8000 == 0;
        }
        ColorFormat::Rgb888 => {
            let dot_address = bitmap_base_address + dot_offset * 4;
            fetch(dot_address, fetcher);
            let index = (dot_address & 4) as usize;
            let dot_data = u32::from_be_bytes([
                fetcher.bitmap_data[index],
                fetcher.bitmap_data[index + 1],
                fetcher.bitmap_data[index + 2],
                fetcher.bitmap_data[index + 3],
            ]);
            spec_color_code = 7;
            pixel.color = crate::vdp::color::Color888::from_rgb888(dot_data);
            pixel.color.msb = true;
            pixel.transparent = bg.enable_transparency && dot_data & 0x8000_0000 == 0;
        }
    }

    pixel.special_color_calc = special_color_calc_flag(
        shared,
        bg,
        bg.suppl_bitmap_special_color_calc,
        spec_color_code,
        pixel.color.msb,
    );

    pixel.priority = bg.priority_number;
    match bg.priority_mode {
        PriorityMode::PerScreen => {}
        PriorityMode::PerCharacter => {
            pixel.priority = (pixel.priority & !1) | bg.suppl_bitmap_special_priority as u8;
        }
        PriorityMode::PerDot => {
            if bg.color_format.is_palette() && bg.suppl_bitmap_special_priority {
                let codes = &shared.regs2.special_function_codes[bg.special_function_select];
                pixel.priority = (pixel.priority & !1)
                    | codes.color_matches[spec_color_code as usize & 7] as u8;
            }
        }
    }

    pixel
}

/// Walks the plane/page/character/cell hierarchy for a scroll coordinate
/// and fetches the dot, keeping the one-character fetch pipeline.
pub fn fetch_scroll_bg_pixel(
    shared: &Vdp2RenderState,
    bg: &BgParams,
    page_base_addresses: &[u32],
    page_shift_h: u32,
    page_shift_v: u32,
    scroll: (u32, u32),
    fetcher: &mut VramFetcher,
    rot: bool,
) -> Pixel {
    let (mut scroll_x, scroll_y) = scroll;

    let plane_width: u32 = if rot { 4 } else { 2 };
    let plane_mask = plane_width - 1;
    let plane_bits = if rot { 11 } else { 10 };

    let extract = |value: u32, low: u32, high: u32| (value >> low) & ((1 << (high - low + 1)) - 1);

    let plane_x = (extract(scroll_x, 9, plane_bits) >> page_shift_h) & plane_mask;
    let plane_y = (extract(scroll_y, 9, plane_bits) >> page_shift_v) & plane_mask;
    let plane = (plane_x + plane_y * plane_width) as usize;
    let page_base_address = page_base_addresses[plane];

    // Bitmap data offsets also shift out-of-phase character reads
    let bank = ((page_base_address >> 17) & 3) as usize;
    scroll_x += bg.vram_data_offset[bank];

    let four_cell = bg.cell_size_shift;
    let two_word = bg.char_mode == CharacterMode::TwoWord;

    let page_x = extract(scroll_x, 9, 9) & page_shift_h;
    let page_y = extract(scroll_y, 9, 9) & page_shift_v;
    let page = page_x + page_y * 2;
    let page_offset = page << crate::vdp::regs2::page_size_shift(four_cell, bg.char_mode);

    let char_pat_x = extract(scroll_x, 3, 8) >> four_cell;
    let char_pat_y = extract(scroll_y, 3, 8) >> four_cell;
    let char_index = char_pat_x + char_pat_y * (64 >> four_cell);

    let cell_x = extract(scroll_x, 3, 3) & four_cell;
    let cell_y = extract(scroll_y, 3, 3) & four_cell;
    let cell_index = cell_x + cell_y * 2;

    let dot = (scroll_x & 7, scroll_y & 7);

    // Fetch the character if the coordinate crossed into a new one
    if fetcher.last_char_index != char_index {
        fetcher.last_char_index = char_index;
        let page_address = page_base_address + page_offset;
        let ch = if two_word {
            fetch_two_word_character(shared, bg, page_address, char_index)
        } else {
            fetch_one_word_character(shared, bg, page_address, char_index)
        };

        // The delay pipeline draws the previously fetched character
        fetcher.curr_char = if bg.char_pat_delay {
            fetcher.next_char
        } else {
            ch
        };
        fetcher.next_char = ch;
    } else if four_cell != 0 && bg.char_pat_delay && fetcher.last_cell_x != cell_x as u8 {
        // Each cell of a 2x2 character is fetched separately; the delayed
        // fetch completes between the two halves
        fetcher.last_cell_x = cell_x as u8;
        if cell_x == 1 {
            fetcher.curr_char = fetcher.next_char;
        }
    }

    fetch_character_pixel(shared, bg, fetcher.curr_char, dot, cell_index)
}

// -----------------------------------------------------------------------------
// Normal (scroll/bitmap) backgrounds

pub fn draw_normal_bg(shared: &Vdp2RenderState, ctx: &mut FieldContext, bg: usize, alt_field: bool) {
    let layer = LYR_NBG0_RBG1 + bg;
    if !shared.regs2.layer_enabled[layer] {
        return;
    }
    // The NBG0 slot belongs to RBG1 when that one is active
    if bg == 0 && shared.regs2.bg_enabled[5] {
        return;
    }

    let bg_params = &shared.regs2.bg_params[bg + 1];
    let bg_state = &shared.norm_bg_states[bg];
    let regs = &shared.regs2;

    let double_density = regs.interlace == InterlaceMode::DoubleDensity;
    let alt_line = shared.deinterlace && alt_field && double_density;

    let mut frac_scroll_x = bg_state.frac_scroll_x.wrapping_add(bg_params.scroll_amount_h);
    let frac_scroll_y = bg_state
        .frac_scroll_y
        .wrapping_add(bg_params.scroll_amount_v)
        .wrapping_add(if alt_line { bg_params.scroll_inc_v } else { 0 });

    let mut cell_scroll_table_address =
        regs.vertical_cell_scroll_table_address + bg_state.vert_cell_scroll_offset;
    let vertical_cell_scroll = bg < 2 && bg_params.vertical_cell_scroll_enable;

    let (layers, fetchers) = (&mut ctx.layers, &mut ctx.fetchers);
    let layer_state = &mut layers[layer];
    let fetcher = &mut fetchers[bg];
    let window_state = &ctx.bg_windows[bg + 1];

    let read_cell_scroll_y = |fetcher: &mut VramFetcher,
                              address: &mut u32,
                              check_repeat: bool|
     -> u32 {
        if check_repeat && bg_state.vert_cell_scroll_repeat && bg_state.vert_cell_scroll_delay {
            return fetcher.last_vcell_scroll;
        }
        let value = shared.vram.read_32(*address as usize);
        if !check_repeat || !bg_state.vert_cell_scroll_repeat {
            *address += shared.vert_cell_scroll_inc;
        }
        let prev = fetcher.last_vcell_scroll;
        fetcher.last_vcell_scroll = (value >> 8) & 0x7FFFF;
        if bg_state.vert_cell_scroll_delay {
            prev
        } else {
            fetcher.last_vcell_scroll
        }
    };

    let mut mosaic_counter_x: u32 = 0;
    let mut cell_scroll_y: u32 = 0;
    let mut vcell_scroll_x = frac_scroll_x >> (8 + 3);

    if vertical_cell_scroll {
        cell_scroll_y = read_cell_scroll_y(fetcher, &mut cell_scroll_table_address, true);
    }

    for x in 0..shared.hres as usize {
        // Horizontal mosaic takes priority over vertical cell scroll
        if bg_params.mosaic_enable {
            let current = mosaic_counter_x;
            mosaic_counter_x += 1;
            if mosaic_counter_x >= regs.mosaic_h as u32 {
                mosaic_counter_x = 0;
            }
            if current > 0 {
                layer_state.copy_pixel(x - 1, x);
                frac_scroll_x = frac_scroll_x.wrapping_add(bg_state.scroll_inc_h);
                continue;
            }
        } else if vertical_cell_scroll && (frac_scroll_x >> (8 + 3)) != vcell_scroll_x {
            vcell_scroll_x = frac_scroll_x >> (8 + 3);
            cell_scroll_y = read_cell_scroll_y(fetcher, &mut cell_scroll_table_address, false);
        }

        if window_state[x] {
            layer_state.transparent[x] = true;
        } else {
            let scroll_x = frac_scroll_x >> 8;
            let scroll_y = (frac_scroll_y.wrapping_add(cell_scroll_y) >> 8)
                .wrapping_sub(bg_state.mosaic_counter_y as u32);

            let pixel = if bg_params.bitmap {
                fetch_bitmap_pixel(
                    shared,
                    bg_params,
                    bg_params.bitmap_base_address,
                    (scroll_x, scroll_y),
                    fetcher,
                )
            } else {
                fetch_scroll_bg_pixel(
                    shared,
                    bg_params,
                    &bg_params.page_base_addresses,
                    bg_params.page_shift_h,
                    bg_params.page_shift_v,
                    (scroll_x, scroll_y),
                    fetcher,
                    false,
                )
            };
            layer_state.set_pixel(x, pixel);
        }

        frac_scroll_x = frac_scroll_x.wrapping_add(bg_state.scroll_inc_h);
    }
}

// -----------------------------------------------------------------------------
// Rotation backgrounds

fn store_rotation_line_color(
    shared: &Vdp2RenderState,
    ctx_line_colors: &mut [crate::vdp::color::Color888],
    x: usize,
    bg: &BgParams,
    selector: usize,
) {
    if !bg.line_color_screen_enable {
        return;
    }

    // Whether coefficient line color data applies depends on the rotation
    // parameter mode and which parameter drew the pixel; with RBG1 active,
    // coefficient data A covers both backgrounds
    let has_rbg1 = shared.regs2.bg_enabled[5];

    let (use_coeff, coeff_sel) = match shared.regs2.common_rot_params.rot_param_mode {
        RotationParamMode::ParamA => (selector == 0, 0),
        RotationParamMode::ParamB => (selector == 1, if has_rbg1 { 0 } else { 1 }),
        RotationParamMode::Coefficient => (true, 0),
        RotationParamMode::Window => (true, if has_rbg1 { 0 } else { selector }),
    };

    ctx_line_colors[x] = shared.line_back_state.line_color;

    if use_coeff {
        let params = &shared.regs2.rot_params[coeff_sel];
        if params.coeff_table_enable && params.coeff_use_line_color {
            ctx_line_colors[x] = shared.rot_param_line_states[coeff_sel].line_color[x];
        }
    }
}

pub fn draw_rotation_bg(
    shared: &Vdp2RenderState,
    ctx: &mut FieldContext,
    bg_index: usize,
    _y: u32,
    _alt_field: bool,
) {
    let (layer, bgp, window_index, enabled) = if bg_index == 0 {
        (LYR_RBG0, 0usize, 0usize, shared.regs2.bg_enabled[4])
    } else {
        (LYR_NBG0_RBG1, 1, 1, shared.regs2.bg_enabled[5])
    };
    if !enabled {
        return;
    }

    let bg_params = &shared.regs2.bg_params[bgp];
    let regs = &shared.regs2;

    let double_res_h = regs.hres & 0b010 != 0;
    let x_shift = double_res_h as u32;
    let max_x = shared.hres >> x_shift;

    let mut mosaic_counter_x: u32 = 0;

    for x in 0..max_x as usize {
        let xx = x << x_shift;
        let layer_state = &mut ctx.layers[layer];

        if bg_params.mosaic_enable {
            let current = mosaic_counter_x;
            mosaic_counter_x += 1;
            if mosaic_counter_x >= regs.mosaic_h as u32 {
                mosaic_counter_x = 0;
            }
            if current > 0 {
                layer_state.copy_pixel(xx - 1, xx);
                if double_res_h {
                    layer_state.copy_pixel(xx, xx + 1);
                }
                continue;
            }
        }

        // RBG0 selects its parameter set per mode; RBG1 always uses B
        let selector = if bg_index == 0 {
            select_rotation_parameter(shared, &ctx.rot_params_window[..], x)
        } else {
            1
        };

        let rot_params = &regs.rot_params[selector];
        let line_state = &shared.rot_param_line_states[selector];

        if rot_params.coeff_table_enable && line_state.transparent[x] {
            layer_state.transparent[xx] = true;
            if double_res_h {
                layer_state.transparent[xx + 1] = true;
            }
            continue;
        }

        let (scroll_x, scroll_y) = line_state.screen_coords[x];
        let (scroll_x, scroll_y) = (scroll_x as u32, scroll_y as u32);

        let fixed512 = rot_params.screen_over_process == ScreenOverProcess::Fixed512;
        let repeat = rot_params.screen_over_process == ScreenOverProcess::Repeat;
        let (max_scroll_x, max_scroll_y) = if bg_params.bitmap {
            if fixed512 {
                (512, 512)
            } else {
                (bg_params.bitmap_size_h, bg_params.bitmap_size_v)
            }
        } else if fixed512 {
            (512, 512)
        } else {
            (
                (512 * 4) << rot_params.page_shift_h,
                (512 * 4) << rot_params.page_shift_v,
            )
        };

        let window_state = &ctx.bg_windows[window_index];
        if window_state[xx] && (!double_res_h || window_state[xx + 1]) {
            layer_state.transparent[xx] = true;
            if double_res_h {
                layer_state.transparent[xx + 1] = true;
            }
        } else if (scroll_x < max_scroll_x && scroll_y < max_scroll_y) || repeat {
            let pixel = if bg_params.bitmap {
                fetch_bitmap_pixel(
                    shared,
                    bg_params,
                    rot_params.bitmap_base_address,
                    (scroll_x, scroll_y),
                    &mut ctx.fetchers[4 + selector],
                )
            } else {
                fetch_scroll_bg_pixel(
                    shared,
                    bg_params,
                    &rot_params.page_base_addresses[bg_index],
                    rot_params.page_shift_h,
                    rot_params.page_shift_v,
                    (scroll_x, scroll_y),
                    &mut ctx.fetchers[4 + selector],
                    true,
                )
            };

            let layer_state = &mut ctx.layers[layer];
            if !double_res_h || !window_state[xx] {
                layer_state.set_pixel(xx, pixel);
            }
            if double_res_h && !window_state[xx + 1] {
                layer_state.set_pixel(xx + 1, pixel);
            }

            store_rotation_line_color(
                shared,
                &mut ctx.rbg_line_colors[bg_index][..],
                x,
                bg_params,
                selector,
            );
        } else if !bg_params.bitmap
            && rot_params.screen_over_process == ScreenOverProcess::RepeatChar
        {
            // Out of bounds: repeat the screen-over character
            let ch = extract_one_word_character(
                bg_params,
                rot_params.screen_over_pattern_name,
                bg_params.cell_size_shift != 0,
                bg_params.color_format != ColorFormat::Palette16,
                bg_params.char_mode == CharacterMode::OneWordExtended,
            );
            let dot = (scroll_x & 7, scroll_y & 7);
            let pixel = fetch_character_pixel(shared, bg_params, ch, dot, 0);

            let layer_state = &mut ctx.layers[layer];
            if !double_res_h || !window_state[xx] {
                layer_state.set_pixel(xx, pixel);
            }
            if double_res_h && !window_state[xx + 1] {
                layer_state.set_pixel(xx + 1, pixel);
            }

            store_rotation_line_color(
                shared,
                &mut ctx.rbg_line_colors[bg_index][..],
                x,
                bg_params,
                selector,
            );
        } else {
            let layer_state = &mut ctx.layers[layer];
            layer_state.transparent[xx] = true;
            if double_res_h {
                layer_state.transparent[xx + 1] = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::VdpOptions;
    use crate::vdp::regs2;

    #[test]
    fn test_extract_one_word_character_standard() {
        let mut bg = BgParams::default();
        bg.suppl_scroll_char_num = 0b11111;
        bg.suppl_scroll_pal_num = 0x30;

        // FCC=0, LP=0, EC=0: palette in bits 12-15, flips in 10-11,
        // char number in 0-9
        let ch = extract_one_word_character(&bg, 0b0101_11_0110011001, false, false, false);
        assert_eq!(ch.char_num & 0x3FF, 0b0110011001);
        // Supplement provides char number bits 10-14
        assert_eq!(ch.char_num >> 10, 0b11111);
        assert_eq!(ch.pal_num, 0x5 | 0x30);
        assert!(ch.flip_h);
        assert!(ch.flip_v);
    }

    #[test]
    fn test_extract_one_word_character_extended() {
        let bg = BgParams::default();
        // Extended mode: no flips, 12-bit char number
        let ch = extract_one_word_character(&bg, 0x0FFF, false, false, true);
        assert_eq!(ch.char_num & 0xFFF, 0xFFF);
        assert!(!ch.flip_h);
        assert!(!ch.flip_v);
    }

    #[test]
    fn test_fetch_character_pixel_palette16() {
        let mut shared = Vdp2RenderState::new(&VdpOptions::default());
        shared.regs2.write(regs2::BGON, 0x0001);

        let mut bg = BgParams::default();
        bg.color_format = ColorFormat::Palette16;
        bg.char_pat_access = [true; 4];
        bg.priority_number = 5;

        // Character 0, dot (0,0) = palette index 3; (1,0) = 0 (transparent)
        shared.vram.write_8(0, 0x30);
        // CRAM entry 3 = pure red
        shared.cram.write_16(3 * 2, 0x001F);
        shared.rebuild_cram_cache();

        let ch = Character::default();
        let opaque = fetch_character_pixel(&shared, &bg, ch, (0, 0), 0);
        assert!(!opaque.transparent);
        assert_eq!(opaque.color.r, 0xFF);
        assert_eq!(opaque.priority, 5);

        let transparent = fetch_character_pixel(&shared, &bg, ch, (1, 0), 0);
        assert!(transparent.transparent);
    }

    #[test]
    fn test_character_pixel_flip() {
        let mut shared = Vdp2RenderState::new(&VdpOptions::default());
        let mut bg = BgParams::default();
        bg.color_format = ColorFormat::Palette16;
        bg.char_pat_access = [true; 4];

        // Top-left dot has index 7, everything else 0
        shared.vram.write_8(0, 0x70);
        shared.rebuild_cram_cache();

        let flipped = Character {
            flip_h: true,
            flip_v: true,
            ..Character::default()
        };
        // With both flips the value appears at (7,7)
        let pixel = fetch_character_pixel(&shared, &bg, flipped, (7, 7), 0);
        assert!(!pixel.transparent);
    }

    #[test]
    fn test_denied_bank_reads_as_transparent() {
        let mut shared = Vdp2RenderState::new(&VdpOptions::default());
        let mut bg = BgParams::default();
        bg.color_format = ColorFormat::Palette16;
        bg.char_pat_access = [false; 4];

        shared.vram.write_8(0, 0x77);
        let pixel = fetch_character_pixel(&shared, &bg, Character::default(), (0, 0), 0);
        assert!(pixel.transparent);
    }
}
