//! VRAM access pattern analysis.
//!
//! The CYCxn cycle pattern registers assign VRAM access slots per bank.
//! This derives, per background: which banks may serve pattern name and
//! character pattern reads, whether character fetches run one tile late,
//! bitmap data offsets for out-of-phase reads, and the vertical cell scroll
//! table layout for NBG0/NBG1.

use crate::vdp::regs2::{
    ColorFormat, RotDataBankSel, CYC_CPU, CYC_CP_NBG0, CYC_PN_NBG0, CYC_VCSC_NBG0, CYC_VCSC_NBG1,
};
use crate::vdp::vdp2::Vdp2RenderState;

// Valid character pattern access masks relative to the pattern name slot.
// An access outside these masks delays the character fetch by one tile.
const HIRES_PATTERNS: [[u8; 4]; 2] = [
    // 1x1 character patterns     T0      T1      T2      T3
    [0b0111, 0b1110, 0b1101, 0b1011],
    // 2x2 character patterns
    [0b0111, 0b1110, 0b1100, 0b1000],
];

const NORMAL_PATTERNS: [u8; 8] = [
    //   T0          T1          T2          T3
    0b1111_0111,
    0b1110_1111,
    0b1100_1111,
    0b1000_1111,
    //   T4          T5          T6          T7
    0b0000_1111,
    0b0000_1110,
    0b0000_1100,
    0b0000_1000,
];

pub fn calc_access_patterns(shared: &mut Vdp2RenderState) {
    if !shared.regs2.access_patterns_dirty {
        return;
    }
    shared.regs2.access_patterns_dirty = false;

    let regs = &mut shared.regs2;
    let hires = regs.hres & 6 != 0;
    let apply_bitmap_delay = hires || shared.apply_bitmap_delay_in_normal_modes;

    for bg_index in 0..4 {
        regs.bg_params[bg_index + 1].vram_data_offset = [0; 4];
    }

    // Access masks per NBG, bits 0-7 = slots T0-T7
    let mut pn = [0u8; 4];
    let mut cp = [0u8; 4];

    // Bitmap data offset detection: out-of-phase character pattern reads on
    // a different VRAM chip than the first one shift the data by 8 bytes
    let mut first_cp_timing = [0xFFu8; 4];
    let mut first_cp_vram_chip = [0xFFu8; 4];
    let mut first_cp_found = [[false; 4]; 4];

    let slot_count = if hires { 4 } else { 8 };
    for slot in 0..slot_count {
        for bank in 0..4usize {
            if bank == 1 && !regs.vram_control.partition_vram_a {
                continue;
            }
            if bank == 3 && !regs.vram_control.partition_vram_b {
                continue;
            }

            let timing = regs.cycle_patterns[bank][slot];
            if (CYC_PN_NBG0..CYC_PN_NBG0 + 4).contains(&timing) {
                let bg_index = (timing - CYC_PN_NBG0) as usize;
                pn[bg_index] |= 1 << slot;
            } else if (CYC_CP_NBG0..CYC_CP_NBG0 + 4).contains(&timing) {
                let bg_index = (timing - CYC_CP_NBG0) as usize;
                cp[bg_index] |= 1 << slot;

                let bg = &mut regs.bg_params[bg_index + 1];
                if !bg.bitmap || apply_bitmap_delay {
                    let chip = (bank >> 1) as u8;
                    if first_cp_timing[bg_index] == 0xFF {
                        first_cp_timing[bg_index] = slot as u8;
                        first_cp_vram_chip[bg_index] = chip;
                    } else if !first_cp_found[bg_index][bank]
                        && slot as u8 > first_cp_timing[bg_index]
                        && chip != first_cp_vram_chip[bg_index]
                    {
                        bg.vram_data_offset[bank] = 8;
                    }
                    first_cp_found[bg_index][bank] = true;
                }
            }
        }
    }

    // Character pattern delays
    for bg_index in 0..4 {
        let cell_size_shift = regs.bg_params[bg_index + 1].cell_size_shift as usize;
        let bg = &mut regs.bg_params[bg_index + 1];
        bg.char_pat_delay = false;
        let bg_cp = cp[bg_index];
        let bg_pn = pn[bg_index];

        // Bitmaps were handled above; NBGs without assigned accesses render
        // nothing anyway
        if bg.bitmap || bg_pn == 0 || bg_cp == 0 {
            continue;
        }

        // NBG0/NBG1 with a pattern name access on T0 are never delayed
        if bg_index < 2 && bg_pn & 1 != 0 {
            continue;
        }

        if hires {
            for pn_slot in 0..4 {
                // Delay when the CP access happens entirely before the PN
                // access, or in an illegal slot
                if bg_pn & (1 << pn_slot) != 0
                    && (bg_cp < bg_pn || bg_cp & HIRES_PATTERNS[cell_size_shift][pn_slot] != bg_cp)
                {
                    bg.char_pat_delay = true;
                    break;
                }
            }
        } else {
            for pn_slot in 0..8 {
                if bg_pn & (1 << pn_slot) != 0 {
                    bg.char_pat_delay = bg_cp & NORMAL_PATTERNS[pn_slot] == 0;
                    break;
                }
            }
        }
    }

    // Translate access slots and rotation data bank selectors into per-bank
    // read permissions
    let rbg0_enabled = regs.bg_enabled[4];
    let rbg1_enabled = regs.bg_enabled[5];

    for bank in 0..4usize {
        let rot_sel = regs.vram_control.rot_data_bank(bank);

        // RBG0 claims banks designated as rotation data; with RBG1 active it
        // is restricted to VRAM-A
        if rbg0_enabled && (!rbg1_enabled || bank < 2) {
            regs.bg_params[0].pat_name_access[bank] = rot_sel == RotDataBankSel::PatternName;
            regs.bg_params[0].char_pat_access[bank] = rot_sel == RotDataBankSel::Character;
        } else {
            regs.bg_params[0].pat_name_access[bank] = false;
            regs.bg_params[0].char_pat_access[bank] = false;
        }

        // RBG1 uses fixed banks: B1 for pattern names, B0 for characters
        if rbg1_enabled {
            regs.bg_params[1].pat_name_access[bank] = bank == 3;
            regs.bg_params[1].char_pat_access[bank] = bank == 2;
        } else if !regs.bg_enabled[0] {
            regs.bg_params[1].pat_name_access[bank] = false;
            regs.bg_params[1].char_pat_access[bank] = false;
        }

        for nbg in 0..4usize {
            // NBG0's slot doubles as RBG1; leave RBG1's assignment alone
            if nbg == 0 && rbg1_enabled {
                continue;
            }
            let color_format = regs.bg_params[nbg + 1].color_format;
            let bitmap = regs.bg_params[nbg + 1].bitmap;
            let enabled = regs.bg_enabled[nbg];
            let bg = &mut regs.bg_params[nbg + 1];
            bg.pat_name_access[bank] = false;
            bg.char_pat_access[bank] = false;

            if !enabled {
                continue;
            }
            // NBG2/NBG3 lose their banks to RBG1
            if rbg1_enabled && bank >= 2 {
                continue;
            }
            // Banks assigned to RBG0 are unavailable
            if rbg0_enabled && rot_sel != RotDataBankSel::Unused {
                continue;
            }

            // Character pattern slots required per access
            let expected_count: u32 = match color_format {
                ColorFormat::Palette16 => 1,
                ColorFormat::Palette256 => 2,
                ColorFormat::Palette2048 | ColorFormat::Rgb555 => 4,
                ColorFormat::Rgb888 => 8,
            };

            let max_slots: u32 = if hires { 4 } else { 8 };
            if expected_count > max_slots {
                continue;
            }
            if (cp[nbg].count_ones()) < expected_count {
                continue;
            }

            for slot in 0..max_slots as usize {
                let timing = regs.cycle_patterns[bank][slot];
                if timing == CYC_PN_NBG0 + nbg as u8 {
                    bg.pat_name_access[bank] = true;
                } else if timing == CYC_CP_NBG0 + nbg as u8
                    // Bitmap data may also ride on CPU access slots; several
                    // FMV-heavy titles depend on this
                    || (bitmap && timing == CYC_CPU)
                {
                    bg.char_pat_access[bank] = true;
                }
            }
        }
    }

    // Unpartitioned banks mirror the first half's permissions
    if !regs.vram_control.partition_vram_a {
        for i in 0..5 {
            regs.bg_params[i].char_pat_access[1] = regs.bg_params[i].char_pat_access[0];
            regs.bg_params[i].pat_name_access[1] = regs.bg_params[i].pat_name_access[0];
            regs.bg_params[i].vram_data_offset[1] = regs.bg_params[i].vram_data_offset[0];
        }
    }
    if !regs.vram_control.partition_vram_b {
        for i in 0..5 {
            regs.bg_params[i].char_pat_access[3] = regs.bg_params[i].char_pat_access[2];
            regs.bg_params[i].pat_name_access[3] = regs.bg_params[i].pat_name_access[2];
            regs.bg_params[i].vram_data_offset[3] = regs.bg_params[i].vram_data_offset[2];
        }
    }

    // Vertical cell scroll slots define the table stride, per-BG offsets and
    // the delay/repeat quirks of illegal slot placements
    shared.vert_cell_scroll_inc = 0;
    let mut vcell_offset = 0;

    for bank in 0..4usize {
        for slot in 0..8usize {
            match regs.cycle_patterns[bank][slot] {
                CYC_VCSC_NBG0 => {
                    if regs.bg_params[1].vertical_cell_scroll_enable {
                        shared.vert_cell_scroll_inc += 4;
                        shared.norm_bg_states[0].vert_cell_scroll_offset = vcell_offset;
                        shared.norm_bg_states[0].vert_cell_scroll_delay = slot >= 3;
                        shared.norm_bg_states[0].vert_cell_scroll_repeat = slot >= 2;
                        vcell_offset += 4;
                    }
                }
                CYC_VCSC_NBG1 => {
                    if regs.bg_params[2].vertical_cell_scroll_enable {
                        shared.vert_cell_scroll_inc += 4;
                        shared.norm_bg_states[1].vert_cell_scroll_offset = vcell_offset;
                        shared.norm_bg_states[1].vert_cell_scroll_delay = slot >= 4;
                        vcell_offset += 4;
                    }
                }
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::VdpOptions;
    use crate::vdp::regs2;

    fn setup() -> Vdp2RenderState {
        let mut shared = Vdp2RenderState::new(&VdpOptions::default());
        shared.regs2.write(regs2::BGON, 0x0001); // NBG0 on
        shared.regs2.write(regs2::CHCTLA, 0x0000); // 16-color palette
        shared
    }

    #[test]
    fn test_nbg0_gains_bank_permissions() {
        let mut shared = setup();
        // Bank A0: T0 = PN NBG0, T1 = CP NBG0
        shared.regs2.write(regs2::CYCA0L, 0x04FF);
        calc_access_patterns(&mut shared);

        let bg = &shared.regs2.bg_params[regs2::BGP_NBG0];
        assert!(bg.pat_name_access[0]);
        assert!(bg.char_pat_access[0]);
        // Unpartitioned VRAM A mirrors into bank A1
        assert!(bg.pat_name_access[1]);
        assert!(!bg.pat_name_access[2]);
        assert!(!bg.char_pat_delay);
    }

    #[test]
    fn test_missing_cp_slots_deny_access() {
        let mut shared = setup();
        shared.regs2.write(regs2::CHCTLA, 0x0010); // 256 colors: needs 2 CP slots
        shared.regs2.write(regs2::CYCA0L, 0x04FF); // only one CP slot
        calc_access_patterns(&mut shared);
        assert!(!shared.regs2.bg_params[regs2::BGP_NBG0].char_pat_access[0]);
    }

    #[test]
    fn test_char_pattern_delay_for_late_pn() {
        let mut shared = setup();
        shared.regs2.write(regs2::BGON, 0x0004); // NBG2
        // NBG2: PN on T1 with CP only on T4 is an illegal slot assignment
        shared.regs2.write(regs2::CYCA0L, 0xF2FF);
        shared.regs2.write(regs2::CYCA0L + 2, 0x6FFF);
        calc_access_patterns(&mut shared);
        assert!(shared.regs2.bg_params[regs2::BGP_NBG2].char_pat_delay);
    }

    #[test]
    fn test_vertical_cell_scroll_layout() {
        let mut shared = setup();
        shared.regs2.write(regs2::BGON, 0x0003);
        shared.regs2.write(regs2::SCRCTL, 0x0101); // vcell scroll on both
        // NBG0 scroll on T0, NBG1 scroll on T1
        shared.regs2.write(regs2::CYCA0L, 0xCDFF);
        calc_access_patterns(&mut shared);

        assert_eq!(shared.vert_cell_scroll_inc, 8);
        assert_eq!(shared.norm_bg_states[0].vert_cell_scroll_offset, 0);
        assert_eq!(shared.norm_bg_states[1].vert_cell_scroll_offset, 4);
        assert!(!shared.norm_bg_states[0].vert_cell_scroll_delay);
        assert!(!shared.norm_bg_states[1].vert_cell_scroll_delay);
    }

    #[test]
    fn test_rbg0_claims_rotation_banks() {
        let mut shared = setup();
        shared.regs2.write(regs2::BGON, 0x0010); // RBG0
        // Bank A0 = coefficients, A1 = pattern names, B0 = characters
        shared
            .regs2
            .write(regs2::RAMCTL, 0x0300 | 0b00_11_10_01);
        calc_access_patterns(&mut shared);

        let rbg0 = &shared.regs2.bg_params[regs2::BGP_RBG0];
        assert!(!rbg0.pat_name_access[0]);
        assert!(rbg0.pat_name_access[1]);
        assert!(rbg0.char_pat_access[2]);
        assert!(!rbg0.char_pat_access[3]);
    }
}
