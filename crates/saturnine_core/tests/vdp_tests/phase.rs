use saturnine_core::host::VdpOptions;
use saturnine_core::vdp::VDP2_REGS_START;

use super::setup::{build_vdp, run_frame, run_lines, TestInterrupts};

#[test]
fn test_full_ntsc_progressive_frame() {
    let (mut vdp, sink) = build_vdp(VdpOptions::default());
    let mut intr = TestInterrupts::default();

    // 320x224, progressive, display on
    vdp.write_16(VDP2_REGS_START, 0x8000);
    run_frame(&mut vdp, &mut intr);

    assert_eq!(intr.vblank_in, 1);
    assert_eq!(intr.vcnt_at_vblank_in, 224);
    assert_eq!(intr.vblank_out, 1);
    assert_eq!(intr.vcnt_at_vblank_out, 262);
    assert_eq!(intr.hblank_in, 263);
    assert_eq!(intr.smpc_vblank_in, 1);
    assert_eq!(intr.intback_hints, 1);

    let sink = sink.lock().unwrap();
    assert_eq!(sink.frames, 1);
    assert_eq!(sink.last_width, 320);
    assert_eq!(sink.last_height, 224);
    assert_eq!(sink.last_frame.len(), 320 * 224);
}

#[test]
fn test_vcnt_monotonic_within_frame() {
    let (mut vdp, _) = build_vdp(VdpOptions::default());
    let mut intr = TestInterrupts::default();

    let mut last_vcnt = vdp.vcnt();
    let mut wraps = 0;
    for _ in 0..263 * 4 * 2 {
        vdp.phase_step(&mut intr);
        let vcnt = vdp.vcnt();
        if vcnt < last_vcnt {
            wraps += 1;
            assert_eq!(vcnt, 0, "VCNT must only go backwards by wrapping to 0");
        }
        last_vcnt = vcnt;
    }
    assert_eq!(wraps, 2);
}

#[test]
fn test_odd_constant_in_progressive_mode() {
    let (mut vdp, _) = build_vdp(VdpOptions::default());
    let mut intr = TestInterrupts::default();

    for _ in 0..3 {
        run_frame(&mut vdp, &mut intr);
        // ODD stays set in non-interlaced modes; VCNT reads through the
        // external counter which is unaffected here
        assert_eq!(vdp.read_16(VDP2_REGS_START + 0x004) & 0b10, 0b10);
    }
}

#[test]
fn test_odd_toggles_when_interlaced() {
    let (mut vdp, _) = build_vdp(VdpOptions::default());
    let mut intr = TestInterrupts::default();

    // Single-density interlace
    vdp.write_16(VDP2_REGS_START, 0x8000 | (0b10 << 6));
    let mut odd_states = Vec::new();
    for _ in 0..4 {
        run_frame(&mut vdp, &mut intr);
        odd_states.push(vdp.read_16(VDP2_REGS_START + 0x004) & 0b10 != 0);
    }
    // The field flips every frame
    for pair in odd_states.windows(2) {
        assert_ne!(pair[0], pair[1]);
    }
}

#[test]
fn test_swap_happens_once_per_frame() {
    let (mut vdp, _) = build_vdp(VdpOptions::default());
    let mut intr = TestInterrupts::default();

    let initial = vdp.display_fb_index();
    run_frame(&mut vdp, &mut intr);
    assert_eq!(intr.framebuffer_swaps, 1);
    assert_eq!(vdp.display_fb_index(), initial ^ 1);

    run_frame(&mut vdp, &mut intr);
    assert_eq!(intr.framebuffer_swaps, 2);
    assert_eq!(vdp.display_fb_index(), initial);
}

#[test]
fn test_manual_swap_mode_defers_to_trigger() {
    let (mut vdp, _) = build_vdp(VdpOptions::default());
    let mut intr = TestInterrupts::default();

    // FCM=1, FCT=0: manual erase only; run a frame first to clear the
    // initial fb_params_changed latch
    run_frame(&mut vdp, &mut intr);
    let swaps = intr.framebuffer_swaps;

    vdp.write_16(saturnine_core::vdp::VDP1_REGS_START + 0x02, 0b10);
    run_frame(&mut vdp, &mut intr);
    assert_eq!(intr.framebuffer_swaps, swaps, "erase-only must not swap");

    // FCM=1, FCT=1: manual swap
    vdp.write_16(saturnine_core::vdp::VDP1_REGS_START + 0x02, 0b11);
    run_frame(&mut vdp, &mut intr);
    assert_eq!(intr.framebuffer_swaps, swaps + 1);

    // Without re-arming the trigger, no further swap happens
    run_frame(&mut vdp, &mut intr);
    assert_eq!(intr.framebuffer_swaps, swaps + 1);
}

#[test]
fn test_hblank_edges_only_in_active_display() {
    let (mut vdp, _) = build_vdp(VdpOptions::default());
    let mut intr = TestInterrupts::default();

    run_frame(&mut vdp, &mut intr);
    // HBlank OUT is reported only while in the vertical active area
    assert_eq!(intr.hblank_out, 224);
}

#[test]
fn test_external_latch_sets_flag_within_resolution() {
    let (mut vdp, _) = build_vdp(VdpOptions::default());

    // EXLTEN
    vdp.write_16(VDP2_REGS_START + 0x002, 0x0200);

    vdp.external_latch(100, 100);
    assert_eq!(vdp.read_16(VDP2_REGS_START + 0x004) & 0x0200, 0x0200);
    assert_eq!(vdp.read_16(VDP2_REGS_START + 0x00A), 116);

    let (mut vdp, _) = build_vdp(VdpOptions::default());
    vdp.write_16(VDP2_REGS_START + 0x002, 0x0200);
    vdp.external_latch(400, 100);
    assert_eq!(vdp.read_16(VDP2_REGS_START + 0x004) & 0x0200, 0);
}

#[test]
fn test_run_lines_keeps_frames_flowing() {
    let (mut vdp, sink) = build_vdp(VdpOptions::default());
    let mut intr = TestInterrupts::default();

    vdp.write_16(VDP2_REGS_START, 0x8000);
    for _ in 0..5 {
        run_lines(&mut vdp, &mut intr, 263);
    }
    assert_eq!(sink.lock().unwrap().frames, 5);
}
