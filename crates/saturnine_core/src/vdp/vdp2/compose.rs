//! Scanline composition: priority stacking, color calculation, shadow and
//! color offset, producing the final ABGR8888 row.

use crate::vdp::color::Color888;
use crate::vdp::regs2::{
    SpriteColorCalcCondition, LYR_BACK, LYR_NBG0_RBG1, LYR_RBG0, LYR_SPRITE,
};
use crate::vdp::vdp2::{FieldContext, Vdp2RenderState};
use crate::MAX_RES_H;

/// Masked pixel primitives used by the compositor.
///
/// Each operates on whole spans with a boolean mask so the scalar bodies can
/// later be swapped for SIMD implementations without touching the callers.
pub mod pixelops {
    use crate::vdp::color::Color888;

    #[inline(always)]
    fn avg(a: u8, b: u8) -> u8 {
        ((a as u16 + b as u16) >> 1) as u8
    }

    /// dst = average(a, b) where masked.
    pub fn average_masked(dst: &mut [Color888], mask: &[bool], a: &[Color888], b: &[Color888]) {
        for x in 0..dst.len() {
            if mask[x] {
                dst[x] = Color888 {
                    r: avg(a[x].r, b[x].r),
                    g: avg(a[x].g, b[x].g),
                    b: avg(a[x].b, b[x].b),
                    msb: a[x].msb,
                };
            }
        }
    }

    /// dst = b where masked, a elsewhere.
    pub fn select_masked(dst: &mut [Color888], mask: &[bool], a: &[Color888], b: &[Color888]) {
        for x in 0..dst.len() {
            dst[x] = if mask[x] { b[x] } else { a[x] };
        }
    }

    /// dst = saturate(top + bottom) where masked, top elsewhere.
    pub fn saturating_add_masked(
        dst: &mut [Color888],
        mask: &[bool],
        top: &[Color888],
        bottom: &[Color888],
    ) {
        for x in 0..dst.len() {
            dst[x] = if mask[x] {
                Color888 {
                    r: top[x].r.saturating_add(bottom[x].r),
                    g: top[x].g.saturating_add(bottom[x].g),
                    b: top[x].b.saturating_add(bottom[x].b),
                    msb: top[x].msb,
                }
            } else {
                top[x]
            };
        }
    }

    /// dst = top*(32-ratio)/32 + bottom*ratio/32 where masked, top elsewhere.
    /// A ratio of zero leaves the top layer untouched.
    pub fn composite_ratio_masked(
        dst: &mut [Color888],
        mask: &[bool],
        top: &[Color888],
        bottom: &[Color888],
        ratio: &[u8],
    ) {
        for x in 0..dst.len() {
            dst[x] = if mask[x] {
                let r = (ratio[x] & 0x1F) as u16;
                let mix = |t: u8, b: u8| -> u8 {
                    ((t as u16 * (32 - r) + b as u16 * r) >> 5) as u8
                };
                Color888 {
                    r: mix(top[x].r, bottom[x].r),
                    g: mix(top[x].g, bottom[x].g),
                    b: mix(top[x].b, bottom[x].b),
                    msb: top[x].msb,
                }
            } else {
                top[x]
            };
        }
    }

    /// Halves each channel where masked.
    pub fn shadow_masked(dst: &mut [Color888], mask: &[bool]) {
        for x in 0..dst.len() {
            if mask[x] {
                dst[x].r >>= 1;
                dst[x].g >>= 1;
                dst[x].b >>= 1;
            }
        }
    }
}

#[inline]
fn layer_color(shared: &Vdp2RenderState, ctx: &FieldContext, layer: usize, x: usize) -> Color888 {
    if layer == LYR_BACK {
        shared.line_back_state.back_color
    } else {
        ctx.layers[layer].color[x]
    }
}

fn is_color_calc_enabled(
    shared: &Vdp2RenderState,
    ctx: &FieldContext,
    layer: usize,
    x: usize,
) -> bool {
    let regs = &shared.regs2;
    if layer == LYR_SPRITE {
        let params = &regs.sprite_params;
        if !params.color_calc_enable {
            return false;
        }
        let priority = ctx.layers[LYR_SPRITE].priority[x];
        match params.color_calc_cond {
            SpriteColorCalcCondition::PriorityLessOrEqual => priority <= params.color_calc_value,
            SpriteColorCalcCondition::PriorityEqual => priority == params.color_calc_value,
            SpriteColorCalcCondition::PriorityGreaterOrEqual => priority >= params.color_calc_value,
            SpriteColorCalcCondition::MsbOne => ctx.layers[LYR_SPRITE].color[x].msb,
        }
    } else if layer == LYR_BACK {
        regs.back_screen_params.color_calc_enable
    } else {
        regs.bg_params[layer - LYR_RBG0].color_calc_enable
    }
}

pub fn compose_line(
    shared: &Vdp2RenderState,
    ctx: &mut FieldContext,
    row: &mut [u32],
    _alt_field: bool,
) {
    let regs = &shared.regs2;
    let hres = row.len();

    if !regs.display_enable_latch {
        let mut color = Color888::default();
        if regs.border_color_mode_latch {
            color = shared.line_back_state.back_color;
        }
        row.fill(color.to_abgr8888());
        return;
    }

    // Build the per-pixel stack of the top three layers.
    // Higher priority wins; ties go to the lower layer index.
    let mut stack = [[LYR_BACK as u8; 3]; MAX_RES_H];
    let mut stack_prios = [[0u8; 3]; MAX_RES_H];

    for layer in 0..6usize {
        if !regs.layer_enabled[layer] {
            continue;
        }

        let state = &ctx.layers[layer];
        for x in 0..hres {
            if state.transparent[x] {
                continue;
            }
            let priority = state.priority[x];
            if priority == 0 {
                continue;
            }
            // Normal-shadow sprite pixels darken what's below instead of
            // occupying a stack slot
            if layer == LYR_SPRITE && ctx.sprite_attrs.normal_shadow[x] {
                continue;
            }

            for slot in 0..3 {
                if priority > stack_prios[x][slot]
                    || (priority == stack_prios[x][slot] && (layer as u8) < stack[x][slot])
                {
                    for push in (slot + 1..3).rev() {
                        stack[x][push] = stack[x][push - 1];
                        stack_prios[x][push] = stack_prios[x][push - 1];
                    }
                    stack[x][slot] = layer as u8;
                    stack_prios[x][slot] = priority;
                    break;
                }
            }
        }
    }

    // Find the stack position the transparent-mesh pixels blend into.
    // Mesh pixels sit on top of equal-priority sprite pixels by definition.
    let mut mesh_slots = [0xFFu8; MAX_RES_H];
    if shared.transparent_meshes && regs.layer_enabled[LYR_SPRITE] {
        for x in 0..hres {
            if ctx.mesh_layer.transparent[x] {
                continue;
            }
            let priority = ctx.mesh_layer.priority[x];
            if priority == 0 || ctx.mesh_attrs.normal_shadow[x] {
                continue;
            }
            for slot in 0..3 {
                if priority >= stack_prios[x][slot] {
                    mesh_slots[x] = slot as u8;
                    break;
                }
            }
        }
    }

    // Top layer colors
    let mut layer0 = [Color888::default(); MAX_RES_H];
    for x in 0..hres {
        layer0[x] = layer_color(shared, ctx, stack[x][0] as usize, x);
    }

    // Color calculation enable per pixel
    let mut layer0_cc = [false; MAX_RES_H];
    let mut layer0_mesh = [false; MAX_RES_H];
    let mut any_cc = false;
    for x in 0..hres {
        let layer = stack[x][0] as usize;
        layer0_mesh[x] = mesh_slots[x] == 0;
        if ctx.color_calc_window[x] || !is_color_calc_enabled(shared, ctx, layer, x) {
            continue;
        }
        layer0_cc[x] = match layer {
            LYR_BACK | LYR_SPRITE => true,
            _ => ctx.layers[layer].special_color_calc[x],
        };
        any_cc |= layer0_cc[x];
    }

    let mut output = [Color888::default(); MAX_RES_H];

    if any_cc {
        // Second layer colors
        let mut layer1 = [Color888::default(); MAX_RES_H];
        let mut layer1_mesh = [false; MAX_RES_H];
        for x in 0..hres {
            layer1[x] = layer_color(shared, ctx, stack[x][1] as usize, x);
            layer1_mesh[x] = mesh_slots[x] == 1;
        }

        // Extended color calculation only applies in normal TV modes
        let use_extended =
            regs.color_calc_params.extended_color_calc_enable && regs.hres < 2;
        let x_shift = (regs.hres & 0b010 != 0) as u32;

        // Line color insertion for the second screen
        let mut line_color_enabled = [false; MAX_RES_H];
        let mut line_colors = [Color888::default(); MAX_RES_H];
        for x in 0..hres {
            let layer = stack[x][0] as usize;
            match layer {
                LYR_SPRITE => {
                    line_color_enabled[x] = regs.sprite_params.line_color_screen_enable;
                    if line_color_enabled[x] {
                        line_colors[x] = shared.line_back_state.line_color;
                    }
                }
                LYR_BACK => {}
                _ => {
                    line_color_enabled[x] =
                        regs.bg_params[layer - LYR_RBG0].line_color_screen_enable;
                    if line_color_enabled[x] {
                        if layer == LYR_RBG0 || (layer == LYR_NBG0_RBG1 && regs.bg_enabled[5]) {
                            line_colors[x] =
                                ctx.rbg_line_colors[layer - LYR_RBG0][x >> x_shift];
                        } else {
                            line_colors[x] = shared.line_back_state.line_color;
                        }
                    }
                }
            }
        }

        if use_extended {
            // In CRAM modes 1/2 the hardware refuses to blend palette-based
            // bottom layers; honoring that is optional
            let restricted = shared.restrict_extended_color_calc
                && regs.vram_control.color_ram_mode != 0;

            if !restricted {
                let mut layer1_cc = [false; MAX_RES_H];
                let mut layer2 = [Color888::default(); MAX_RES_H];
                let mut layer2_mesh = [false; MAX_RES_H];
                for x in 0..hres {
                    layer1_cc[x] = is_color_calc_enabled(shared, ctx, stack[x][1] as usize, x);
                    if layer1_cc[x] {
                        layer2[x] = layer_color(shared, ctx, stack[x][2] as usize, x);
                    }
                    layer2_mesh[x] = mesh_slots[x] == 2;
                }

                if shared.transparent_meshes {
                    let layer2_src = layer2;
                    pixelops::average_masked(
                        &mut layer2[..hres],
                        &layer2_mesh[..hres],
                        &layer2_src[..hres],
                        &ctx.mesh_layer.color[..hres],
                    );
                }

                let layer1_src = layer1;
                pixelops::average_masked(
                    &mut layer1[..hres],
                    &layer1_cc[..hres],
                    &layer1_src[..hres],
                    &layer2[..hres],
                );
            }

            let layer1_src = layer1;
            if regs.line_screen_params.color_calc_enable {
                pixelops::average_masked(
                    &mut layer1[..hres],
                    &line_color_enabled[..hres],
                    &layer1_src[..hres],
                    &line_colors[..hres],
                );
            } else {
                pixelops::select_masked(
                    &mut layer1[..hres],
                    &line_color_enabled[..hres],
                    &layer1_src[..hres],
                    &line_colors[..hres],
                );
            }
        } else {
            for x in 0..hres {
                if line_color_enabled[x] {
                    layer1[x] = line_colors[x];
                }
            }
        }

        if shared.transparent_meshes {
            let layer1_src = layer1;
            pixelops::average_masked(
                &mut layer1[..hres],
                &layer1_mesh[..hres],
                &layer1_src[..hres],
                &ctx.mesh_layer.color[..hres],
            );
        }

        if regs.color_calc_params.use_additive_blend {
            pixelops::saturating_add_masked(
                &mut output[..hres],
                &layer0_cc[..hres],
                &layer0[..hres],
                &layer1[..hres],
            );
        } else {
            // Per-pixel ratio from the top or second layer of the stack
            let ratio_slot = regs.color_calc_params.use_second_screen_ratio as usize;
            let mut ratios = [0u8; MAX_RES_H];
            for x in 0..hres {
                if !layer0_cc[x] {
                    continue;
                }
                let layer = stack[x][ratio_slot] as usize;
                ratios[x] = match layer {
                    LYR_SPRITE => ctx.sprite_attrs.color_calc_ratio[x],
                    LYR_BACK => {
                        if line_color_enabled[x] {
                            regs.line_screen_params.color_calc_ratio
                        } else {
                            regs.back_screen_params.color_calc_ratio
                        }
                    }
                    _ => regs.bg_params[layer - LYR_RBG0].color_calc_ratio,
                };
            }

            pixelops::composite_ratio_masked(
                &mut output[..hres],
                &layer0_cc[..hres],
                &layer0[..hres],
                &layer1[..hres],
                &ratios[..hres],
            );
        }
    } else {
        output[..hres].copy_from_slice(&layer0[..hres]);
    }

    // Mesh pixels blending directly over the top layer
    if shared.transparent_meshes {
        let output_src = output;
        pixelops::average_masked(
            &mut output[..hres],
            &layer0_mesh[..hres],
            &output_src[..hres],
            &ctx.mesh_layer.color[..hres],
        );
    }

    // Sprite shadow: normal shadow pixels and MSB shadows darken the top
    // layer when the sprite sits at or above its priority
    let mut shadow = [false; MAX_RES_H];
    let mut any_shadow = false;
    for x in 0..hres {
        if ctx.layers[LYR_SPRITE].priority[x] < stack_prios[x][0] {
            continue;
        }
        let normal_shadow = ctx.sprite_attrs.normal_shadow[x];
        let msb_shadow =
            !regs.sprite_params.use_sprite_window && ctx.sprite_attrs.shadow_or_window[x];
        if !normal_shadow && !msb_shadow {
            continue;
        }

        let layer = stack[x][0] as usize;
        shadow[x] = match layer {
            LYR_SPRITE => ctx.sprite_attrs.shadow_or_window[x],
            LYR_BACK => regs.back_screen_params.shadow_enable,
            _ => regs.bg_params[layer - LYR_RBG0].shadow_enable,
        };
        any_shadow |= shadow[x];
    }
    if any_shadow {
        pixelops::shadow_masked(&mut output[..hres], &shadow[..hres]);
    }

    // Color offsets
    for x in 0..hres {
        let layer = stack[x][0] as usize;
        if regs.color_offset_enable[layer] {
            let offset = &regs.color_offset[regs.color_offset_select[layer]];
            if offset.non_zero {
                let color = &mut output[x];
                color.r = (color.r as i16 + offset.r).clamp(0, 255) as u8;
                color.g = (color.g as i16 + offset.g).clamp(0, 255) as u8;
                color.b = (color.b as i16 + offset.b).clamp(0, 255) as u8;
            }
        }
    }

    for x in 0..hres {
        row[x] = output[x].to_abgr8888();
    }
}

#[cfg(test)]
mod tests {
    use super::pixelops::*;
    use crate::vdp::color::Color888;

    fn color(r: u8, g: u8, b: u8) -> Color888 {
        Color888 { r, g, b, msb: false }
    }

    #[test]
    fn test_ratio_zero_keeps_top() {
        let top = [color(100, 150, 200); 4];
        let bottom = [color(10, 20, 30); 4];
        let mut dst = [Color888::default(); 4];
        composite_ratio_masked(&mut dst, &[true; 4], &top, &bottom, &[0; 4]);
        assert_eq!(dst, top);
    }

    #[test]
    fn test_additive_with_black_top_is_bottom() {
        let top = [color(0, 0, 0); 4];
        let bottom = [color(10, 220, 130); 4];
        let mut dst = [Color888::default(); 4];
        saturating_add_masked(&mut dst, &[true; 4], &top, &bottom);
        for (out, expected) in dst.iter().zip(&bottom) {
            assert_eq!(out.r, expected.r);
            assert_eq!(out.g, expected.g);
            assert_eq!(out.b, expected.b);
        }
    }

    #[test]
    fn test_additive_saturates() {
        let top = [color(200, 200, 200); 1];
        let bottom = [color(100, 100, 100); 1];
        let mut dst = [Color888::default(); 1];
        saturating_add_masked(&mut dst, &[true], &top, &bottom);
        assert_eq!(dst[0].r, 255);
    }

    #[test]
    fn test_average_is_commutative() {
        let a = [color(11, 97, 201); 2];
        let b = [color(250, 3, 78); 2];
        let mut ab = [Color888::default(); 2];
        let mut ba = [Color888::default(); 2];
        average_masked(&mut ab, &[true; 2], &a, &b);
        average_masked(&mut ba, &[true; 2], &b, &a);
        for (x, y) in ab.iter().zip(&ba) {
            assert_eq!(x.r, y.r);
            assert_eq!(x.g, y.g);
            assert_eq!(x.b, y.b);
        }
    }

    #[test]
    fn test_unmasked_pixels_pass_through() {
        let top = [color(50, 60, 70); 2];
        let bottom = [color(1, 2, 3); 2];
        let mut dst = [Color888::default(); 2];
        composite_ratio_masked(&mut dst, &[false, true], &top, &bottom, &[31, 31]);
        assert_eq!(dst[0], top[0]);
        assert_ne!(dst[1], top[1]);
    }

    #[test]
    fn test_shadow_halves_channels() {
        let mut dst = [color(100, 50, 255); 2];
        shadow_masked(&mut dst, &[true, false]);
        assert_eq!(dst[0].r, 50);
        assert_eq!(dst[0].g, 25);
        assert_eq!(dst[0].b, 127);
        assert_eq!(dst[1].r, 100);
    }
}
