use saturnine_core::host::VdpOptions;
use saturnine_core::vdp::{VDP1_REGS_START, VDP1_VRAM_START};

use super::setup::{build_vdp, TestInterrupts};

const PTMR: u32 = VDP1_REGS_START + 0x04;
const ENDR: u32 = VDP1_REGS_START + 0x0C;
const EDSR: u32 = VDP1_REGS_START + 0x10;

/// Writes a "set system clipping" command covering the whole screen.
fn write_system_clip(vdp: &mut saturnine_core::vdp::Vdp, addr: u32) {
    vdp.write_16(VDP1_VRAM_START + addr, 0x0009);
    vdp.write_16(VDP1_VRAM_START + addr + 0x14, 511);
    vdp.write_16(VDP1_VRAM_START + addr + 0x16, 255);
}

#[test]
fn test_empty_command_list() {
    let (mut vdp, _) = build_vdp(VdpOptions::default());
    let mut intr = TestInterrupts::default();

    // A single end-flagged control word
    vdp.write_16(VDP1_VRAM_START, 0x8000);
    vdp.write_16(PTMR, 0b01);
    assert!(vdp.vdp1_drawing());

    vdp.advance(1000, &mut intr);

    assert!(vdp.vdp1_frame_ended());
    assert!(!vdp.vdp1_drawing());
    assert_eq!(intr.sprite_draw_end, 1);
    assert_eq!(intr.vdp1_draw_finished, 1);
    // CEF is visible through EDSR
    assert_eq!(vdp.read_16(EDSR) & 0b10, 0b10);
}

#[test]
fn test_single_normal_sprite() {
    let (mut vdp, _) = build_vdp(VdpOptions::default());
    let mut intr = TestInterrupts::default();

    write_system_clip(&mut vdp, 0x00);

    // Local coordinates (10, 20)
    vdp.write_16(VDP1_VRAM_START + 0x20, 0x000A);
    vdp.write_16(VDP1_VRAM_START + 0x20 + 0x0C, 10);
    vdp.write_16(VDP1_VRAM_START + 0x20 + 0x0E, 20);

    // 8x8 normal sprite at (0,0), RGB texture, transparent pixels drawn
    vdp.write_16(VDP1_VRAM_START + 0x40, 0x0000);
    vdp.write_16(VDP1_VRAM_START + 0x40 + 0x04, (1 << 7) | (5 << 3));
    vdp.write_16(VDP1_VRAM_START + 0x40 + 0x08, 0x1000 / 8);
    vdp.write_16(VDP1_VRAM_START + 0x40 + 0x0A, (1 << 8) | 8);
    vdp.write_16(VDP1_VRAM_START + 0x40 + 0x0C, 0);
    vdp.write_16(VDP1_VRAM_START + 0x40 + 0x0E, 0);

    vdp.write_16(VDP1_VRAM_START + 0x60, 0x8000);

    // Texture: 8x8 texels of the target color
    for i in 0..64 {
        vdp.write_16(VDP1_VRAM_START + 0x1000 + i * 2, 0x1234);
    }

    vdp.write_16(PTMR, 0b01);
    vdp.advance(2000, &mut intr);
    assert!(vdp.vdp1_frame_ended());

    // All 64 pixels land at (10..18, 20..28) in the draw framebuffer
    for y in 20..28u32 {
        for x in 10..18u32 {
            let offset = (y * 512 + x) * 2;
            assert_eq!(
                vdp.vdp1_read_draw_fb_16(offset),
                0x1234,
                "pixel ({x},{y})"
            );
        }
        assert_eq!(vdp.vdp1_read_draw_fb_16((y * 512 + 9) * 2), 0);
        assert_eq!(vdp.vdp1_read_draw_fb_16((y * 512 + 18) * 2), 0);
    }
}

fn draw_polygon_over(vdp: &mut saturnine_core::vdp::Vdp, color: u16, color_calc: u16) {
    let mut intr = TestInterrupts::default();

    write_system_clip(vdp, 0x00);

    // Polygon covering (4..=8, 4..=8)
    vdp.write_16(VDP1_VRAM_START + 0x20, 0x0004);
    vdp.write_16(VDP1_VRAM_START + 0x20 + 0x04, color_calc);
    vdp.write_16(VDP1_VRAM_START + 0x20 + 0x06, color);
    vdp.write_16(VDP1_VRAM_START + 0x20 + 0x0C, 4);
    vdp.write_16(VDP1_VRAM_START + 0x20 + 0x0E, 4);
    vdp.write_16(VDP1_VRAM_START + 0x20 + 0x10, 8);
    vdp.write_16(VDP1_VRAM_START + 0x20 + 0x12, 4);
    vdp.write_16(VDP1_VRAM_START + 0x20 + 0x14, 8);
    vdp.write_16(VDP1_VRAM_START + 0x20 + 0x16, 8);
    vdp.write_16(VDP1_VRAM_START + 0x20 + 0x18, 4);
    vdp.write_16(VDP1_VRAM_START + 0x20 + 0x1A, 8);

    vdp.write_16(VDP1_VRAM_START + 0x40, 0x8000);

    vdp.write_16(PTMR, 0b01);
    vdp.advance(2000, &mut intr);
    assert!(vdp.vdp1_frame_ended());
}

#[test]
fn test_color_calc_replace() {
    let (mut vdp, _) = build_vdp(VdpOptions::default());

    let offset = (5 * 512 + 5) * 2;
    vdp.vdp1_write_fb_16(offset, 0xA108); // RGB(8,8,8) with MSB set

    let src = 0x4210; // RGB(16,16,16)
    draw_polygon_over(&mut vdp, src, 0);
    assert_eq!(vdp.vdp1_read_draw_fb_16(offset), src);
}

#[test]
fn test_color_calc_half_transparency() {
    let (mut vdp, _) = build_vdp(VdpOptions::default());

    // Destination with MSB set blends; destination without passes the
    // source through
    let blend_offset = (5 * 512 + 5) * 2;
    let clear_offset = (6 * 512 + 5) * 2;
    vdp.vdp1_write_fb_16(blend_offset, 0xA108); // RGB(8,8,8), MSB set
    vdp.vdp1_write_fb_16(clear_offset, 0x0000);

    draw_polygon_over(&mut vdp, 0x4210, 3);

    // (16+8)/2 = 12 per channel, destination MSB preserved
    let blended = 0x8000 | (12 << 10) | (12 << 5) | 12;
    assert_eq!(vdp.vdp1_read_draw_fb_16(blend_offset), blended);
    assert_eq!(vdp.vdp1_read_draw_fb_16(clear_offset), 0x4210);
}

#[test]
fn test_runaway_assign_to_zero_terminates() {
    let (mut vdp, _) = build_vdp(VdpOptions::default());
    let mut intr = TestInterrupts::default();

    // Command at 0: skip + assign-jump to 0
    vdp.write_16(VDP1_VRAM_START, (0b100 << 12) | (0b01 << 12));
    vdp.write_16(VDP1_VRAM_START + 0x02, 0);

    vdp.write_16(PTMR, 0b01);
    vdp.advance(10_000, &mut intr);
    assert!(!vdp.vdp1_drawing());
    assert!(vdp.vdp1_frame_ended());
}

#[test]
fn test_invalid_command_terminates() {
    let (mut vdp, _) = build_vdp(VdpOptions::default());
    let mut intr = TestInterrupts::default();

    vdp.write_16(VDP1_VRAM_START, 0x000F);
    vdp.write_16(PTMR, 0b01);
    vdp.advance(10_000, &mut intr);
    assert!(!vdp.vdp1_drawing());
    assert_eq!(intr.sprite_draw_end, 1);
}

#[test]
fn test_call_and_return() {
    let (mut vdp, _) = build_vdp(VdpOptions::default());
    let mut intr = TestInterrupts::default();

    // 0x000: skip command, CALL -> 0x100
    vdp.write_16(VDP1_VRAM_START, (0b100 << 12) | (0b10 << 12));
    vdp.write_16(VDP1_VRAM_START + 0x02, (0x100 >> 3) as u16);
    // 0x100: skip command, RETURN -> 0x020
    vdp.write_16(VDP1_VRAM_START + 0x100, (0b100 << 12) | (0b11 << 12));
    // 0x020: end
    vdp.write_16(VDP1_VRAM_START + 0x20, 0x8000);

    vdp.write_16(PTMR, 0b01);
    vdp.advance(10_000, &mut intr);
    assert!(vdp.vdp1_frame_ended());
    assert_eq!(intr.sprite_draw_end, 1);
}

#[test]
fn test_endr_terminates_drawing() {
    let (mut vdp, _) = build_vdp(VdpOptions::default());
    let mut intr = TestInterrupts::default();

    // An endless list of skip commands
    for i in 0..16 {
        vdp.write_16(VDP1_VRAM_START + i * 0x20, 0b100 << 12);
    }
    vdp.write_16(PTMR, 0b01);
    vdp.advance(400, &mut intr);
    assert!(vdp.vdp1_drawing());

    vdp.write_16(ENDR, 0);
    assert!(!vdp.vdp1_drawing());
}

#[test]
fn test_spillover_accounting() {
    let (mut vdp, _) = build_vdp(VdpOptions::default());
    let mut intr = TestInterrupts::default();

    // One large polygon then end
    write_system_clip(&mut vdp, 0x00);
    vdp.write_16(VDP1_VRAM_START + 0x20, 0x0004);
    vdp.write_16(VDP1_VRAM_START + 0x20 + 0x0C, 0);
    vdp.write_16(VDP1_VRAM_START + 0x20 + 0x0E, 0);
    vdp.write_16(VDP1_VRAM_START + 0x20 + 0x10, 255);
    vdp.write_16(VDP1_VRAM_START + 0x20 + 0x12, 0);
    vdp.write_16(VDP1_VRAM_START + 0x20 + 0x14, 255);
    vdp.write_16(VDP1_VRAM_START + 0x20 + 0x16, 200);
    vdp.write_16(VDP1_VRAM_START + 0x20 + 0x18, 0);
    vdp.write_16(VDP1_VRAM_START + 0x20 + 0x1A, 200);
    vdp.write_16(VDP1_VRAM_START + 0x40, 0x8000);

    vdp.write_16(PTMR, 0b01);

    // Starve the engine: the first advances only cover the trigger penalty
    // and part of the polygon; drawing must survive across calls and finish
    // eventually
    let mut calls = 0;
    while vdp.vdp1_drawing() && calls < 1000 {
        vdp.advance(100, &mut intr);
        calls += 1;
    }
    assert!(!vdp.vdp1_drawing());
    assert!(calls > 1, "a large polygon cannot finish in one tiny budget");
}
