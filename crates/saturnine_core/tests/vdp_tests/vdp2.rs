use std::sync::Mutex;

use saturnine_core::host::VdpOptions;
use saturnine_core::vdp::color::Color888;
use saturnine_core::vdp::memory::SpriteFramebuffers;
use saturnine_core::vdp::regs2::{self, LYR_NBG0_RBG1};
use saturnine_core::vdp::vdp2::rotation::{
    calc_rotation_parameter_tables, select_rotation_parameter,
};
use saturnine_core::vdp::vdp2::{compose, layers, FieldContext, Pixel, Vdp2RenderState};
use saturnine_core::vdp::VDP2_REGS_START;

use super::setup::{build_vdp, run_frame, TestInterrupts};

fn displayed_state() -> Vdp2RenderState {
    let mut shared = Vdp2RenderState::new(&VdpOptions::default());
    shared.regs2.write(regs2::TVMD, 0x8000);
    shared.regs2.latch_tvmd();
    shared
}

#[test]
fn test_sprite_shadow_halves_underlying_layer() {
    let mut shared = displayed_state();
    // Sprite type 2, NBG0 enabled at priority 1, sprite priority 2,
    // NBG0 accepts shadows
    shared.regs2.write(regs2::SPCTL, 0x0002);
    shared.regs2.write(regs2::BGON, 0x0001);
    shared.regs2.write(regs2::PRINA, 0x0001);
    shared.regs2.write(regs2::PRISA, 0x0002);
    shared.regs2.write(regs2::SDCTL, 0x0001);

    // Normal shadow pattern for 11-bit color data: LSB clear, rest set
    let fbs = Mutex::new(SpriteFramebuffers::new());
    {
        let mut fbs = fbs.lock().unwrap();
        let display = fbs.display_index();
        fbs.fb[display].write_16(3 * 2, 0x07FE);
    }

    let mut ctx = FieldContext::new();
    {
        let fbs = fbs.lock().unwrap();
        layers::draw_sprite_layer(&shared, &mut ctx, &fbs, 0, false);
    }

    assert!(ctx.sprite_attrs.normal_shadow[3]);
    assert!(!ctx.sprite_attrs.normal_shadow[2]);

    // Put an opaque NBG0 pixel underneath
    ctx.layers[LYR_NBG0_RBG1].set_pixel(
        3,
        Pixel {
            color: Color888 {
                r: 100,
                g: 100,
                b: 100,
                msb: false,
            },
            transparent: false,
            priority: 1,
            special_color_calc: false,
        },
    );

    let mut row = vec![0u32; 320];
    compose::compose_line(&shared, &mut ctx, &mut row, false);

    // The sprite shadow halves the background instead of drawing a color
    assert_eq!(row[3], 0xFF32_3232);
}

#[test]
fn test_rotation_parameter_switch_on_transparent_coefficient() {
    let mut shared = displayed_state();
    shared.regs2.write(regs2::BGON, 0x0010); // RBG0
    shared.regs2.write(regs2::RPMD, 0x0002); // coefficient-switched
    // Parameter A: coefficient table enabled, one-word data
    shared.regs2.write(regs2::KTCTL, 0x0009);
    // Bank A0 holds coefficient data
    shared.regs2.write(regs2::RAMCTL, 0x0001);

    // Parameter table at 0: dKAx = 1.0 so each column reads its own entry
    shared.vram.write_16(0x5C, 0x0001);
    shared.vram.write_16(0x5E, 0x0000);

    // One-word coefficients: entry 5 transparent, the rest opaque
    for entry in 0..16u32 {
        let value = if entry == 5 { 0x8000 } else { 0x0100 };
        shared.vram.write_16((entry * 2) as usize, value);
    }

    calc_rotation_parameter_tables(&mut shared, 0);

    let line_state = &shared.rot_param_line_states[0];
    assert!(line_state.transparent[5]);
    assert!(!line_state.transparent[4]);

    let window = vec![false; 320];
    assert_eq!(select_rotation_parameter(&shared, &window, 4), 0);
    assert_eq!(
        select_rotation_parameter(&shared, &window, 5),
        1,
        "transparent coefficient must fall back to parameter B"
    );
}

#[test]
fn test_back_screen_fills_frame() {
    let (mut vdp, sink) = build_vdp(VdpOptions::default());
    let mut intr = TestInterrupts::default();

    // Back color table at VRAM 0x100, single white entry
    vdp.write_16(saturnine_core::vdp::VDP2_VRAM_START + 0x100, 0x7FFF);
    vdp.write_16(VDP2_REGS_START + 0x0AC, 0); // BKTAU
    vdp.write_16(VDP2_REGS_START + 0x0AE, 0x80); // BKTAL
    vdp.write_16(VDP2_REGS_START, 0x8000); // display on

    // The DISP latch takes effect at the top border, so run two frames
    run_frame(&mut vdp, &mut intr);
    run_frame(&mut vdp, &mut intr);

    let sink = sink.lock().unwrap();
    assert_eq!(sink.last_width, 320);
    let center = (100 * 320 + 160) as usize;
    assert_eq!(sink.last_frame[center], 0xFFFF_FFFF);
}

#[test]
fn test_nbg0_cell_rendering_end_to_end() {
    let (mut vdp, sink) = build_vdp(VdpOptions::default());
    let mut intr = TestInterrupts::default();

    let vram = saturnine_core::vdp::VDP2_VRAM_START;
    let cram = saturnine_core::vdp::VDP2_CRAM_START;

    // NBG0: 16-color cells, 1-word pattern names, priority 7
    vdp.write_16(VDP2_REGS_START + 0x020, 0x0001); // BGON
    vdp.write_16(VDP2_REGS_START + 0x028, 0x0000); // CHCTLA
    vdp.write_16(VDP2_REGS_START + 0x030, 0x8000); // PNCN0: 1-word
    vdp.write_16(VDP2_REGS_START + 0x0F8, 0x0007); // PRINA
    // 1.0x zoom in both directions
    vdp.write_16(VDP2_REGS_START + 0x078, 0x0001); // ZMXIN0
    vdp.write_16(VDP2_REGS_START + 0x07C, 0x0001); // ZMYIN0
    // Bank A0: pattern names on T0, character patterns on T1
    vdp.write_16(VDP2_REGS_START + 0x010, 0x04FF);
    vdp.write_16(VDP2_REGS_START + 0x012, 0xFFFF);

    // Page at 0 filled with character 1; cell data for character 1 is a
    // solid palette index 1
    for entry in 0..(64 * 64) {
        vdp.write_16(vram + 0x2000 + entry * 2, 0x0001);
    }
    // Map register 0 points plane A at the page... plane index 1 selects
    // page base 0x2000 for 1-word 1x1 characters
    vdp.write_16(VDP2_REGS_START + 0x040, 0x0001);
    // Character 1 cell data lives at 0x20; 16-color packs two dots per byte
    for i in 0..32 {
        vdp.write_8(vram + 0x20 + i, 0x11);
    }
    // CRAM entry 1: pure green
    vdp.write_16(cram + 2, 0x03E0);

    vdp.write_16(VDP2_REGS_START, 0x8000); // display on

    run_frame(&mut vdp, &mut intr);
    run_frame(&mut vdp, &mut intr);

    let sink = sink.lock().unwrap();
    let center = (100 * 320 + 160) as usize;
    assert_eq!(sink.last_frame[center], 0xFF00_FF00);
}

#[test]
fn test_display_disabled_outputs_black() {
    let (mut vdp, sink) = build_vdp(VdpOptions::default());
    let mut intr = TestInterrupts::default();

    run_frame(&mut vdp, &mut intr);
    run_frame(&mut vdp, &mut intr);

    let sink = sink.lock().unwrap();
    assert!(sink.frames >= 1);
    let center = (100 * 320 + 160) as usize;
    assert_eq!(sink.last_frame[center], 0xFF00_0000);
}

#[test]
fn test_save_and_load_state_round_trip() {
    let (mut vdp, _) = build_vdp(VdpOptions::default());
    let mut intr = TestInterrupts::default();

    vdp.write_16(saturnine_core::vdp::VDP1_VRAM_START + 0x40, 0xBEEF);
    vdp.write_16(saturnine_core::vdp::VDP2_VRAM_START + 0x40, 0xCAFE);
    vdp.write_16(saturnine_core::vdp::VDP2_CRAM_START + 0x10, 0x1234);
    vdp.write_16(VDP2_REGS_START, 0x8000);
    run_frame(&mut vdp, &mut intr);

    let state = vdp.save_state();
    assert!(vdp.validate_state(&state));

    let (mut restored, sink) = build_vdp(VdpOptions::default());
    restored.load_state(&state);

    assert_eq!(
        restored.read_16(saturnine_core::vdp::VDP1_VRAM_START + 0x40),
        0xBEEF
    );
    assert_eq!(
        restored.read_16(saturnine_core::vdp::VDP2_VRAM_START + 0x40),
        0xCAFE
    );
    assert_eq!(
        restored.read_16(saturnine_core::vdp::VDP2_CRAM_START + 0x10),
        0x1234
    );
    assert_eq!(restored.vcnt(), vdp.vcnt());

    // The restored core keeps producing frames
    run_frame(&mut restored, &mut intr);
    assert!(sink.lock().unwrap().frames >= 1);
}

#[test]
fn test_illegal_8bit_register_access_is_ignored() {
    let (mut vdp, _) = build_vdp(VdpOptions::default());

    vdp.write_8(VDP2_REGS_START, 0xFF);
    assert_eq!(vdp.read_16(VDP2_REGS_START), 0);
    assert_eq!(vdp.read_8(VDP2_REGS_START), 0);
}
