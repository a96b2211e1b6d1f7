//! Display phase state machines and timing tables.
//!
//! The horizontal machine advances once per scheduled phase event; the
//! vertical machine advances when the horizontal machine wraps past the left
//! border. All durations are expressed in host scheduler cycles after the
//! dot clock multiplier is applied.

use crate::vdp::regs2::{InterlaceMode, Vdp2Regs};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum HorizontalPhase {
    Active = 0,
    RightBorder = 1,
    Sync = 2,
    LeftBorder = 3,
}

impl HorizontalPhase {
    #[inline]
    pub fn next(self) -> HorizontalPhase {
        match self {
            HorizontalPhase::Active => HorizontalPhase::RightBorder,
            HorizontalPhase::RightBorder => HorizontalPhase::Sync,
            HorizontalPhase::Sync => HorizontalPhase::LeftBorder,
            HorizontalPhase::LeftBorder => HorizontalPhase::Active,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum VerticalPhase {
    Active = 0,
    BottomBorder = 1,
    BlankingAndSync = 2,
    VCounterSkip = 3,
    TopBorder = 4,
    LastLine = 5,
}

impl VerticalPhase {
    #[inline]
    pub fn next(self) -> VerticalPhase {
        match self {
            VerticalPhase::Active => VerticalPhase::BottomBorder,
            VerticalPhase::BottomBorder => VerticalPhase::BlankingAndSync,
            VerticalPhase::BlankingAndSync => VerticalPhase::VCounterSkip,
            VerticalPhase::VCounterSkip => VerticalPhase::TopBorder,
            VerticalPhase::TopBorder => VerticalPhase::LastLine,
            VerticalPhase::LastLine => VerticalPhase::Active,
        }
    }
}

// Horizontal phase durations in HCNT ticks, keyed by HRESOn:
// active display, right border, horizontal sync, left border.
// The exclusive monitor rows are provisional.
const H_TIMINGS: [[u32; 4]; 8] = [
    [320, 54, 26, 27],  // Normal Graphic A
    [352, 51, 29, 23],  // Normal Graphic B
    [640, 108, 52, 54], // Hi-Res Graphic A
    [704, 102, 58, 46], // Hi-Res Graphic B
    [160, 27, 13, 13],  // Exclusive Normal Graphic A
    [176, 11, 13, 12],  // Exclusive Normal Graphic B
    [320, 54, 26, 26],  // Exclusive Hi-Res Graphic A
    [352, 22, 26, 24],  // Exclusive Hi-Res Graphic B
];

// Vertical timings: VCNT values at which each phase begins:
// bottom border, blanking/sync, VCNT skip, top border, last line, active.
// Indexed by [pal][VRESOn][field].
const V_TIMINGS_NORMAL: [[[[u16; 6]; 2]; 4]; 2] = [
    // NTSC
    [
        [
            [224, 232, 237, 255, 262, 263], // even/progressive
            [224, 232, 237, 255, 261, 262], // odd
        ],
        [
            [240, 240, 245, 255, 262, 263],
            [240, 240, 245, 255, 261, 262],
        ],
        [
            [224, 232, 237, 255, 262, 263],
            [224, 232, 237, 255, 261, 262],
        ],
        [
            [240, 240, 245, 255, 262, 263],
            [240, 240, 245, 255, 261, 262],
        ],
    ],
    // PAL
    [
        [
            [224, 256, 259, 281, 312, 313],
            [224, 256, 259, 281, 311, 312],
        ],
        [
            [240, 264, 267, 289, 312, 313],
            [240, 264, 267, 289, 311, 312],
        ],
        [
            [256, 272, 275, 297, 312, 313],
            [256, 272, 275, 297, 311, 312],
        ],
        [
            [256, 272, 275, 297, 312, 313],
            [256, 272, 275, 297, 311, 312],
        ],
    ],
];

// Provisional exclusive monitor vertical timings, indexed by [HRESOn & 1][field].
const V_TIMINGS_EXCLUSIVE: [[[u16; 6]; 2]; 2] = [
    [
        [480, 496, 506, 509, 524, 525],
        [480, 496, 506, 509, 526, 527],
    ],
    [
        [480, 496, 506, 546, 561, 562],
        [480, 496, 506, 546, 563, 564],
    ],
];

// Cycles available per line for the VBlank erase, keyed by HRESOn. The
// horizontal retrace penalty is already subtracted.
const VBLANK_ERASE_PENALTY: u32 = 113;
const VBLANK_ERASE_LINE_CYCLES: [u32; 8] = [
    1708 - VBLANK_ERASE_PENALTY,
    1820 - VBLANK_ERASE_PENALTY,
    1708 - VBLANK_ERASE_PENALTY,
    1820 - VBLANK_ERASE_PENALTY,
    852 - VBLANK_ERASE_PENALTY,
    848 - VBLANK_ERASE_PENALTY,
    852 - VBLANK_ERASE_PENALTY,
    848 - VBLANK_ERASE_PENALTY,
];

const H_RES_PIXELS: [u32; 4] = [320, 352, 640, 704];
const V_RES_PIXELS: [u32; 4] = [224, 240, 256, 256];

pub const DEFAULT_RES_H: u32 = 320;
pub const DEFAULT_RES_V: u32 = 224;

/// Timing state recomputed whenever TVMD is latched dirty.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PhaseTimings {
    /// Host cycles per horizontal phase (dot clock multiplier applied).
    pub h_cycles: [u64; 4],
    /// VCNT thresholds per field (0 = even/progressive, 1 = odd).
    pub v_timings: [[u16; 6]; 2],
    pub v_field: usize,
    pub vcounter_skip: u16,
    pub vblank_erase_cycles_per_line: u64,
    pub vblank_erase_lines: [u16; 2],
    pub hres: u32,
    pub vres: u32,
    pub exclusive_monitor: bool,
}

impl PhaseTimings {
    pub fn new() -> Self {
        PhaseTimings {
            h_cycles: [0; 4],
            v_timings: [[0; 6]; 2],
            v_field: 0,
            vcounter_skip: 0,
            vblank_erase_cycles_per_line: 0,
            vblank_erase_lines: [0; 2],
            hres: DEFAULT_RES_H,
            vres: DEFAULT_RES_V,
            exclusive_monitor: false,
        }
    }

    #[inline]
    pub fn phase_cycles(&self, phase: HorizontalPhase) -> u64 {
        self.h_cycles[phase as usize]
    }

    #[inline]
    pub fn vcnt_threshold(&self, phase: VerticalPhase) -> u16 {
        self.v_timings[self.v_field][phase as usize]
    }

    #[inline]
    pub fn active_lines(&self) -> u16 {
        self.v_timings[self.v_field][VerticalPhase::Active as usize]
    }

    #[inline]
    pub fn lines_per_field(&self) -> u16 {
        self.v_timings[self.v_field][VerticalPhase::LastLine as usize]
            - self.v_timings[self.v_field][VerticalPhase::Active as usize]
    }

    /// Recomputes resolution and timing tables from the latched TVMD state.
    /// Returns `true` if the output resolution changed.
    pub fn update(&mut self, regs: &mut Vdp2Regs, exclusive_timings: bool) -> bool {
        if !regs.tvmd_dirty {
            return false;
        }
        regs.tvmd_dirty = false;

        let mut hres_on = regs.hres as usize;
        if hres_on >= 4 && !exclusive_timings {
            hres_on &= 3;
        }
        let exclusive = hres_on >= 4;
        let interlaced = regs.interlace.is_interlaced();

        let old_res = (self.hres, self.vres);
        self.hres = H_RES_PIXELS[hres_on & 3];
        self.vres = if exclusive {
            480
        } else {
            let vres_mask = if regs.pal { 3 } else { 1 };
            let mut v = V_RES_PIXELS[(regs.vres as usize) & vres_mask];
            if interlaced {
                v *= 2;
            }
            v
        };
        self.exclusive_monitor = exclusive;

        // Apply the dot clock: hi-res and exclusive hi-res modes tick twice
        // as fast as the normal modes.
        let dot_clock_mult: u64 = if hres_on & 2 != 0 { 2 } else { 4 };
        for (slot, raw) in H_TIMINGS[hres_on].into_iter().enumerate() {
            self.h_cycles[slot] = raw as u64 * dot_clock_mult;
        }

        regs.hcnt_shift = if hres_on <= 1 {
            0
        } else if hres_on >= 6 {
            2
        } else {
            1
        };
        regs.hcnt_mask = if hres_on <= 1 {
            0x3FE
        } else if hres_on >= 6 {
            0x1FF
        } else {
            0x3FF
        };

        self.v_timings = if exclusive {
            V_TIMINGS_EXCLUSIVE[hres_on & 1]
        } else {
            let vres_mask = if regs.pal { 3 } else { 1 };
            V_TIMINGS_NORMAL[regs.pal as usize][(regs.vres as usize) & vres_mask]
        };
        self.v_field = (interlaced && regs.odd) as usize;

        self.vblank_erase_cycles_per_line = VBLANK_ERASE_LINE_CYCLES[hres_on] as u64;
        self.vblank_erase_lines = [
            self.v_timings[0][VerticalPhase::LastLine as usize]
                - self.v_timings[0][VerticalPhase::Active as usize],
            self.v_timings[1][VerticalPhase::LastLine as usize]
                - self.v_timings[1][VerticalPhase::Active as usize],
        ];

        regs.vcnt_shift = (regs.interlace == InterlaceMode::DoubleDensity) as u32;

        let field_skip = (!regs.odd && interlaced) as u16;
        self.vcounter_skip = if exclusive {
            let base_skip: u16 = if hres_on & 1 != 0 { 562 } else { 525 };
            ((0x400 - base_skip) >> 1) - field_skip
        } else {
            let base_skip: u16 = if regs.pal { 313 } else { 263 };
            0x200 - base_skip + field_skip
        };

        (self.hres, self.vres) != old_res
    }
}

impl Default for PhaseTimings {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vdp::regs2::Vdp2Regs;

    fn timings_for(pal: bool, tvmd: u16) -> (PhaseTimings, Vdp2Regs) {
        let mut regs = Vdp2Regs::new(pal);
        regs.write(crate::vdp::regs2::TVMD, tvmd);
        let mut timings = PhaseTimings::new();
        timings.update(&mut regs, true);
        (timings, regs)
    }

    #[test]
    fn test_phase_totals_match_dot_clock() {
        for hres in 0..8u16 {
            let (timings, _) = timings_for(false, hres);
            let mult = if hres & 2 != 0 { 2 } else { 4 };
            let raw_total: u64 = H_TIMINGS[hres as usize].iter().map(|&c| c as u64).sum();
            let total: u64 = timings.h_cycles.iter().sum();
            assert_eq!(total, raw_total * mult, "HRESOn = {hres}");
        }
    }

    #[test]
    fn test_ntsc_progressive_timings() {
        let (timings, regs) = timings_for(false, 0);
        assert_eq!(timings.hres, 320);
        assert_eq!(timings.vres, 224);
        assert_eq!(timings.active_lines(), 224);
        assert_eq!(timings.vcnt_threshold(VerticalPhase::LastLine), 262);
        assert_eq!(timings.vcounter_skip, 0x200 - 263);
        assert_eq!(regs.hcnt_mask, 0x3FE);
    }

    #[test]
    fn test_pal_and_interlace_resolution() {
        let (timings, regs) = timings_for(true, (0b11 << 6) | (0b10 << 4));
        assert_eq!(timings.vres, 512);
        assert_eq!(regs.vcnt_shift, 1);
        assert_eq!(timings.vcounter_skip, 0x200 - 313 + 1 - 1); // odd field
    }

    #[test]
    fn test_exclusive_fallback_without_provisional_timings() {
        let mut regs = Vdp2Regs::new(false);
        regs.write(crate::vdp::regs2::TVMD, 4);
        let mut timings = PhaseTimings::new();
        timings.update(&mut regs, false);
        assert_eq!(timings.hres, 320);
        assert!(!timings.exclusive_monitor);
    }

    #[test]
    fn test_lines_per_field() {
        let (timings, _) = timings_for(false, 0);
        assert_eq!(timings.lines_per_field(), 262 - 224);
    }

    #[test]
    fn test_update_is_latched_by_dirty_flag() {
        let mut regs = Vdp2Regs::new(false);
        regs.write(crate::vdp::regs2::TVMD, 0);
        let mut timings = PhaseTimings::new();
        assert!(!timings.update(&mut regs, true)); // resolution unchanged (320x224)
        assert!(!regs.tvmd_dirty);
        // No further recompute until the next TVMD write
        regs.hres = 3;
        assert!(!timings.update(&mut regs, true));
        assert_eq!(timings.hres, 320);
    }
}
