use criterion::{black_box, criterion_group, criterion_main, Criterion};

use saturnine_core::host::{NullFrameSink, VdpInterrupts, VdpOptions};
use saturnine_core::vdp::Vdp;

struct NullInterrupts;

impl VdpInterrupts for NullInterrupts {
    fn hblank_state_change(&mut self, _: bool, _: bool) {}
    fn vblank_state_change(&mut self, _: bool) {}
    fn trigger_smpc_vblank_in(&mut self) {}
    fn trigger_optimized_intback_read(&mut self) {}
    fn trigger_sprite_draw_end(&mut self) {}
}

pub fn phase_benchmark(c: &mut Criterion) {
    let mut vdp = Vdp::new(VdpOptions::default(), Box::new(NullFrameSink)).unwrap();
    let mut intr = NullInterrupts;

    // Display enabled so the per-line render path is exercised
    vdp.write_16(saturnine_core::vdp::VDP2_REGS_START, 0x8000);

    c.bench_function("ntsc frame", |b| {
        b.iter(|| {
            for _ in 0..263 * 4 {
                let cycles = vdp.phase_step(&mut intr);
                black_box(cycles);
            }
        })
    });
}

criterion_group!(benches, phase_benchmark);
criterion_main!(benches);
