//! Window classification.
//!
//! For every layer the two normal windows and the sprite window combine
//! through AND or OR logic into a per-pixel mask; `true` means the pixel is
//! inside the active window area and must not be drawn by that layer.

use crate::vdp::regs2::{InterlaceMode, WindowLogic, WindowParams, WindowSet};
use crate::vdp::vdp2::{FieldContext, Vdp2RenderState};

/// Computes the window mask for one layer on one line.
///
/// `sprite_shadow_or_window` supplies the sprite window term for layers that
/// may use it; `None` treats the sprite window as disabled.
pub fn calc_window(
    shared: &Vdp2RenderState,
    y: u32,
    window_set: &WindowSet,
    sprite_shadow_or_window: Option<&[bool]>,
    out: &mut [bool],
) {
    // With no enabled windows every pixel is outside
    if !window_set.any_enabled() {
        out.fill(false);
        return;
    }

    match window_set.logic {
        WindowLogic::And => calc_window_logic::<false>(shared, y, window_set, sprite_shadow_or_window, out),
        WindowLogic::Or => calc_window_logic::<true>(shared, y, window_set, sprite_shadow_or_window, out),
    }
}

fn calc_window_logic<const LOGIC_OR: bool>(
    shared: &Vdp2RenderState,
    y: u32,
    window_set: &WindowSet,
    sprite_shadow_or_window: Option<&[bool]>,
    out: &mut [bool],
) {
    // AND logic starts all-inside, OR logic starts all-outside
    out.fill(!LOGIC_OR);

    let regs = &shared.regs2;
    let double_v = (regs.interlace == InterlaceMode::SingleDensity) as i16;

    for i in 0..2 {
        if !window_set.enabled[i] {
            continue;
        }

        let params: &WindowParams = &regs.window_params[i];
        let inverted = window_set.inverted[i];

        // Lines outside the vertical range either saturate the result or
        // leave this window without effect:
        //   AND + not inverted -> all outside
        //   AND + inverted     -> window has no effect on this line
        //   OR  + not inverted -> window has no effect on this line
        //   OR  + inverted     -> all inside
        let sy = y as i16;
        let start_y = params.start_y << double_v;
        let end_y = params.end_y << double_v;
        if sy < start_y || sy > end_y {
            if LOGIC_OR == inverted {
                out.fill(LOGIC_OR);
                return;
            }
            continue;
        }

        let mut start_x = params.start_x;
        let mut end_x = params.end_x;

        if params.line_window_enable {
            let address = params.line_window_address + y * 4;
            start_x = shared.vram.read_16(address as usize) as i16;
            end_x = shared.vram.read_16(address as usize + 2) as i16;
        }

        // Games set out-of-range coordinates and expect them to behave as
        // signed values: a negative end collapses or saturates the window
        if start_x < 0 {
            start_x = 0;
        }
        if end_x < 0 {
            if start_x >= end_x {
                start_x = 0x3FF;
            }
            end_x = 0;
        }

        // In normal screen modes the X coordinates don't use bit 0
        if regs.hres < 2 {
            start_x >>= 1;
            end_x >>= 1;
        }

        let width = out.len() as i16;
        if inverted != LOGIC_OR {
            // Fill [startX..endX] with outside (AND+inverted) or inside
            // (OR, not inverted)
            if start_x < width {
                let end_x = end_x.min(width - 1);
                if start_x <= end_x {
                    out[start_x as usize..=end_x as usize].fill(LOGIC_OR);
                }
            }
        } else {
            // Fill the complement of [startX..endX]
            let clamped_start = start_x.min(width) as usize;
            out[..clamped_start].fill(LOGIC_OR);
            if end_x < width - 1 {
                out[(end_x + 1).max(0) as usize..].fill(LOGIC_OR);
            }
        }
    }

    // Sprite window term
    if window_set.enabled[2] {
        if let Some(shadow_or_window) = sprite_shadow_or_window {
            let inverted = window_set.inverted[2];
            for (state, &sw) in out.iter_mut().zip(shadow_or_window) {
                if LOGIC_OR {
                    *state |= sw != inverted;
                } else {
                    *state &= sw != inverted;
                }
            }
        }
    }
}

/// Computes the window masks for all BG layers, the rotation parameter
/// window and the color calculation window.
pub fn calc_all_windows(shared: &Vdp2RenderState, ctx: &mut FieldContext, y: u32) {
    let hres = shared.hres as usize;

    for i in 0..5 {
        let window_set = shared.regs2.bg_params[i].window_set;
        let sprite_term = &ctx.sprite_attrs.shadow_or_window[..hres];
        calc_window(
            shared,
            y,
            &window_set,
            Some(sprite_term),
            &mut ctx.bg_windows[i][..hres],
        );
    }

    let rot_set = shared.regs2.common_rot_params.window_set;
    calc_window(
        shared,
        y,
        &rot_set,
        None,
        &mut ctx.rot_params_window[..hres],
    );

    let cc_set = shared.regs2.color_calc_params.window_set;
    let sprite_term = &ctx.sprite_attrs.shadow_or_window[..hres];
    calc_window(
        shared,
        y,
        &cc_set,
        Some(sprite_term),
        &mut ctx.color_calc_window[..hres],
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::VdpOptions;
    use crate::vdp::regs2;

    fn state_with_window(start_x: u16, start_y: u16, end_x: u16, end_y: u16) -> Vdp2RenderState {
        let mut shared = Vdp2RenderState::new(&VdpOptions::default());
        shared.regs2.write(regs2::WPSX0, start_x);
        shared.regs2.write(regs2::WPSX0 + 2, start_y);
        shared.regs2.write(regs2::WPSX0 + 4, end_x);
        shared.regs2.write(regs2::WPSX0 + 6, end_y);
        shared
    }

    fn window_set(enabled: bool, inverted: bool, logic: WindowLogic) -> WindowSet {
        WindowSet {
            enabled: [enabled, false, false],
            inverted: [inverted, false, false],
            logic,
        }
    }

    #[test]
    fn test_all_disabled_is_all_outside() {
        let shared = Vdp2RenderState::new(&VdpOptions::default());
        let set = WindowSet::default();
        let mut out = [true; 64];
        calc_window(&shared, 10, &set, None, &mut out);
        assert!(out.iter().all(|&w| !w));
    }

    #[test]
    fn test_window_inside_range() {
        // Window covering X 32..=95 (register values are doubled for
        // normal-resolution modes), Y 8..=32
        let shared = state_with_window(64, 8, 191, 32);
        let set = window_set(true, false, WindowLogic::Or);

        let mut out = [false; 320];
        calc_window(&shared, 16, &set, None, &mut out);
        assert!(!out[31]);
        assert!(out[32]);
        assert!(out[95]);
        assert!(!out[96]);
    }

    #[test]
    fn test_window_outside_vertical_range() {
        let shared = state_with_window(64, 8, 191, 32);
        let set = window_set(true, false, WindowLogic::Or);

        let mut out = [true; 320];
        calc_window(&shared, 40, &set, None, &mut out);
        assert!(out.iter().all(|&w| !w), "window must not apply outside its Y range");
    }

    #[test]
    fn test_inverting_flips_classification() {
        let shared = state_with_window(64, 0, 191, 255);
        let normal = window_set(true, false, WindowLogic::Or);
        let inverted = window_set(true, true, WindowLogic::And);

        let mut out_normal = [false; 320];
        let mut out_inverted = [false; 320];
        calc_window(&shared, 10, &normal, None, &mut out_normal);
        calc_window(&shared, 10, &inverted, None, &mut out_inverted);

        for x in 0..320 {
            assert_eq!(out_normal[x], !out_inverted[x], "x = {x}");
        }
    }

    #[test]
    fn test_negative_end_collapses_window() {
        // 0x0000 to 0xFFFE reads as an empty window
        let shared = state_with_window(0, 0, 0x3FE, 255);
        let mut shared = shared;
        // Force the raw value to be negative after sign extension
        shared.regs2.write(regs2::WPSX0 + 4, 0x3FE);
        let set = window_set(true, false, WindowLogic::Or);
        let mut out = [false; 320];
        calc_window(&shared, 10, &set, None, &mut out);
        // end = 0x3FE sign-extends to -2: collapses to empty
        assert!(out.iter().all(|&w| !w));
    }

    #[test]
    fn test_sprite_window_term() {
        let shared = Vdp2RenderState::new(&VdpOptions::default());
        let set = WindowSet {
            enabled: [false, false, true],
            inverted: [false, false, false],
            logic: WindowLogic::Or,
        };
        let mut sprite_term = [false; 8];
        sprite_term[3] = true;
        let mut out = [false; 8];
        calc_window(&shared, 0, &set, Some(&sprite_term), &mut out);
        assert!(out[3]);
        assert!(!out[2]);
    }
}
