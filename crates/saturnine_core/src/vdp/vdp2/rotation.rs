//! Rotation parameter table processing.
//!
//! Each line, up to two 0x80-byte parameter tables are fetched from VRAM and
//! expanded into per-column screen coordinates, coefficient transparency and
//! line color data consumed by the rotation BG renderers.

use crate::vdp::memory::{Cram, Vdp2Vram};
use crate::vdp::regs2::{
    CoefficientDataMode, RotDataBankSel, RotationParamMode, RotationParams, Vdp2Regs,
};
use crate::vdp::vdp2::Vdp2RenderState;

/// One decoded coefficient table entry.
#[derive(Debug, Default, Clone, Copy)]
pub struct Coefficient {
    pub value: i64,
    pub line_color_data: u8,
    pub transparent: bool,
}

/// Rotation parameter table contents. Fixed-point layouts follow the
/// hardware table format; all values carry 10 fractional bits unless noted.
#[derive(Debug, Default, Clone, Copy)]
pub struct RotationParamTable {
    pub xst: i32,
    pub yst: i32,
    pub zst: i32,
    pub delta_xst: i32,
    pub delta_yst: i32,
    pub delta_x: i32,
    pub delta_y: i32,
    /// Rotation matrix, signed 4.10.
    pub a: i32,
    pub b: i32,
    pub c: i32,
    pub d: i32,
    pub e: i32,
    pub f: i32,
    /// View point, signed 14-bit integers.
    pub px: i32,
    pub py: i32,
    pub pz: i32,
    /// Center point, signed 14-bit integers.
    pub cx: i32,
    pub cy: i32,
    pub cz: i32,
    /// Parallel shift, signed 14.10.
    pub mx: i32,
    pub my: i32,
    /// Scaling factors, signed 8.16.
    pub kx: i64,
    pub ky: i64,
    /// Coefficient table start, unsigned 16.10.
    pub kast: u32,
    pub delta_kast: i32,
    pub delta_kax: i32,
}

// Signed 13.10 stored with the fraction starting at bit 6, sign at bit 28
#[inline]
fn fixed_13_10(raw: u32) -> i32 {
    ((raw as i32) << 3) >> 9
}

// Signed 4.10 matrix parameter, sign at bit 19
#[inline]
fn fixed_4_10(raw: u32) -> i32 {
    ((raw as i32) << 12) >> 18
}

// Signed 14-bit integer in a 16-bit word
#[inline]
fn int_14(raw: u16) -> i32 {
    (((raw << 2) as i16) >> 2) as i32
}

// Signed 14.10 parallel shift, sign at bit 29
#[inline]
fn fixed_14_10(raw: u32) -> i32 {
    ((raw as i32) << 2) >> 8
}

// Signed 8.16 scaling factor, sign at bit 23
#[inline]
fn fixed_8_16(raw: u32) -> i64 {
    (((raw as i32) << 8) >> 8) as i64
}

impl RotationParamTable {
    pub fn read_from(vram: &Vdp2Vram, address: u32) -> Self {
        let addr = address as usize;
        RotationParamTable {
            xst: fixed_13_10(vram.read_32(addr)),
            yst: fixed_13_10(vram.read_32(addr + 0x04)),
            zst: fixed_13_10(vram.read_32(addr + 0x08)),
            delta_xst: fixed_13_10(vram.read_32(addr + 0x0C)),
            delta_yst: fixed_13_10(vram.read_32(addr + 0x10)),
            delta_x: fixed_13_10(vram.read_32(addr + 0x14)),
            delta_y: fixed_13_10(vram.read_32(addr + 0x18)),
            a: fixed_4_10(vram.read_32(addr + 0x1C)),
            b: fixed_4_10(vram.read_32(addr + 0x20)),
            c: fixed_4_10(vram.read_32(addr + 0x24)),
            d: fixed_4_10(vram.read_32(addr + 0x28)),
            e: fixed_4_10(vram.read_32(addr + 0x2C)),
            f: fixed_4_10(vram.read_32(addr + 0x30)),
            px: int_14(vram.read_16(addr + 0x34)),
            py: int_14(vram.read_16(addr + 0x36)),
            pz: int_14(vram.read_16(addr + 0x38)),
            cx: int_14(vram.read_16(addr + 0x3C)),
            cy: int_14(vram.read_16(addr + 0x3E)),
            cz: int_14(vram.read_16(addr + 0x40)),
            mx: fixed_14_10(vram.read_32(addr + 0x44)),
            my: fixed_14_10(vram.read_32(addr + 0x48)),
            kx: fixed_8_16(vram.read_32(addr + 0x4C)),
            ky: fixed_8_16(vram.read_32(addr + 0x50)),
            kast: (vram.read_32(addr + 0x54) & 0xFFFF_FFC0) >> 6,
            delta_kast: (vram.read_32(addr + 0x58) as i32) >> 6,
            delta_kax: (vram.read_32(addr + 0x5C) as i32) >> 6,
        }
    }
}

/// Checks whether the VRAM bank holding the coefficient entry at `ka` is
/// designated for coefficient data.
pub fn can_fetch_coefficient(regs: &Vdp2Regs, params: &RotationParams, ka: u32) -> bool {
    // Coefficients in CRAM are always reachable
    if regs.vram_control.color_ram_coeff_table_enable {
        return true;
    }

    let entry = ka >> 10;
    let address = (entry * 4) >> params.coeff_data_size;

    let mut bank = (address >> 17) & 3;
    // Unpartitioned banks collapse onto their first half
    if bank < 2 {
        bank &= !((!regs.vram_control.partition_vram_a) as u32);
    } else {
        bank &= !((!regs.vram_control.partition_vram_b) as u32);
    }

    regs.vram_control.rot_data_bank(bank as usize) == RotDataBankSel::Coefficients
}

/// Fetches and decodes a coefficient entry at the 16.10 address `ka`.
pub fn fetch_rotation_coefficient(
    vram: &Vdp2Vram,
    cram: &Cram,
    regs: &Vdp2Regs,
    params: &RotationParams,
    ka: u32,
) -> Coefficient {
    let entry = ka >> 10;
    let from_cram = regs.vram_control.color_ram_coeff_table_enable;

    if params.coeff_data_size == 1 {
        // One-word data: sign bit 14, transparency bit 15
        let address = entry * 2;
        let data = if from_cram {
            cram.read_16((address | 0x800) as usize)
        } else {
            vram.read_16(address as usize)
        };
        let mut value = (((data << 1) as i16) >> 1) as i64;
        value <<= if params.coeff_data_mode == CoefficientDataMode::ViewpointX {
            14
        } else {
            6
        };
        Coefficient {
            value,
            line_color_data: 0,
            transparent: data & 0x8000 != 0,
        }
    } else {
        // Two-word data: 24-bit value, 7 bits of line color, transparency
        // bit 31
        let address = entry * 4;
        let data = if from_cram {
            cram.read_32((address | 0x800) as usize)
        } else {
            vram.read_32(address as usize)
        };
        let mut value = (((data as i32) << 8) >> 8) as i64;
        if params.coeff_data_mode == CoefficientDataMode::ViewpointX {
            value <<= 8;
        }
        Coefficient {
            value,
            line_color_data: ((data >> 24) & 0x7F) as u8,
            transparent: data & 0x8000_0000 != 0,
        }
    }
}

/// Fetches both parameter tables and precomputes the per-column transforms
/// for this line.
pub fn calc_rotation_parameter_tables(shared: &mut Vdp2RenderState, y: u32) {
    let max_x = shared.rotation_columns();

    let Vdp2RenderState {
        vram,
        cram,
        regs1,
        regs2,
        rot_param_states,
        rot_param_line_states,
        ..
    } = shared;

    let base_address = regs2.common_rot_params.base_address;
    let read_all = y == 0;

    for i in 0..2 {
        let params = regs2.rot_params[i].clone();
        let state = &mut rot_param_states[i];
        let line_state = &mut rot_param_line_states[i];

        let read_xst = read_all || params.read_xst;
        let read_yst = read_all || params.read_yst;
        let read_kast = read_all || params.read_kast;

        // Tables sit 0x80 bytes apart
        let table = RotationParamTable::read_from(vram, (base_address + i as u32 * 0x80) & 0x7_FFFF);

        if read_xst {
            state.xst = table.xst;
            regs2.rot_params[i].read_xst = false;
        } else {
            state.xst += table.delta_xst;
        }
        if read_yst {
            state.yst = table.yst;
            regs2.rot_params[i].read_yst = false;
        } else {
            state.yst += table.delta_yst;
        }
        if read_kast {
            state.ka = params.coeff_table_address_offset.wrapping_add(table.kast);
            regs2.rot_params[i].read_kast = false;
        } else {
            state.ka = state.ka.wrapping_add(table.delta_kast as u32);
        }

        // Transformed starting screen coordinates, reduced to 10 fractional
        // bits
        let xsp = ((table.a as i64 * (state.xst - (table.px << 10)) as i64
            + table.b as i64 * (state.yst - (table.py << 10)) as i64
            + table.c as i64 * (table.zst - (table.pz << 10)) as i64)
            >> 10) as i32;
        let ysp = ((table.d as i64 * (state.xst - (table.px << 10)) as i64
            + table.e as i64 * (state.yst - (table.py << 10)) as i64
            + table.f as i64 * (table.zst - (table.pz << 10)) as i64)
            >> 10) as i32;

        // Transformed view coordinates
        let mut xp = table.a * (table.px - table.cx)
            + table.b * (table.py - table.cy)
            + table.c * (table.pz - table.cz)
            + (table.cx << 10)
            + table.mx;
        let yp = table.d * (table.px - table.cx)
            + table.e * (table.py - table.cy)
            + table.f * (table.pz - table.cz)
            + (table.cy << 10)
            + table.my;

        // Screen coordinate increments per HCNT
        let scr_x_inc = (table.a * table.delta_x + table.b * table.delta_y) >> 10;
        let scr_y_inc = (table.d * table.delta_x + table.e * table.delta_y) >> 10;

        let mut kx = table.kx;
        let mut ky = table.ky;

        let mut scr_x = xsp;
        let mut scr_y = ysp;
        let mut ka = state.ka;

        // Sprite feed coordinates when the VDP1 framebuffer is rotated
        let mut spr_x = table.xst + y as i32 * table.delta_xst;
        let mut spr_y = table.yst + y as i32 * table.delta_yst;

        let per_dot_coeff = regs2.vram_control.color_ram_coeff_table_enable
            || (0..4).any(|bank| {
                regs2.vram_control.rot_data_bank(bank) == RotDataBankSel::Coefficients
            });

        // Line color base comes from the line screen table
        let line_params = regs2.line_screen_params;
        let line = if line_params.per_line { y } else { 0 };
        let line_color_address = line_params.base_address + line * 2;
        let base_line_color_data =
            ((vram.read_16(line_color_address as usize) >> 7) & 0xF) << 7;

        let mut coeff = fetch_rotation_coefficient(vram, cram, regs2, &params, ka);

        for x in 0..max_x as usize {
            if params.coeff_table_enable {
                line_state.transparent[x] = coeff.transparent;

                match params.coeff_data_mode {
                    CoefficientDataMode::ScaleCoeffXY => {
                        kx = coeff.value;
                        ky = coeff.value;
                    }
                    CoefficientDataMode::ScaleCoeffX => kx = coeff.value,
                    CoefficientDataMode::ScaleCoeffY => ky = coeff.value,
                    CoefficientDataMode::ViewpointX => xp = (coeff.value << 2) as i32,
                }

                if params.coeff_use_line_color {
                    let cram_address = (base_line_color_data | coeff.line_color_data as u16) as u32;
                    line_state.line_color[x] = {
                        let address = (cram_address * 2) & 0xFFE;
                        crate::vdp::color::convert_555_to_888(crate::vdp::color::Color555(
                            cram.read_16(address as usize),
                        ))
                    };
                }

                if per_dot_coeff {
                    ka = ka.wrapping_add(table.delta_kax as u32);
                    if can_fetch_coefficient(regs2, &params, ka) {
                        coeff = fetch_rotation_coefficient(vram, cram, regs2, &params, ka);
                    }
                }
            } else {
                line_state.transparent[x] = false;
            }

            // Apply scaling and the view transform, dropping fractional bits
            line_state.screen_coords[x] = (
                ((((kx * scr_x as i64) >> 16) as i32 + xp) >> 10),
                ((((ky * scr_y as i64) >> 16) as i32 + yp) >> 10),
            );

            scr_x += scr_x_inc;
            scr_y += scr_y_inc;

            if regs1.fb_rot_enable {
                line_state.sprite_coords[x] = (spr_x >> 10, spr_y >> 10);
                spr_x += table.delta_x;
                spr_y += table.delta_y;
            }
        }
    }
}

/// Chooses the rotation parameter set for a column of RBG0.
#[inline]
pub fn select_rotation_parameter(
    shared: &Vdp2RenderState,
    rot_window: &[bool],
    x: usize,
) -> usize {
    match shared.regs2.common_rot_params.rot_param_mode {
        RotationParamMode::ParamA => 0,
        RotationParamMode::ParamB => 1,
        RotationParamMode::Coefficient => {
            let params = &shared.regs2.rot_params[0];
            if params.coeff_table_enable && shared.rot_param_line_states[0].transparent[x] {
                1
            } else {
                0
            }
        }
        RotationParamMode::Window => rot_window[x] as usize,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::VdpOptions;
    use crate::vdp::regs2;

    #[test]
    fn test_fixed_point_parsers() {
        assert_eq!(fixed_13_10(0x10000), 1024); // 1.0 in 13.10 stored << 6
        assert_eq!(fixed_13_10(1 << 28), -(1 << 22));
        assert_eq!(int_14(0x2000), -8192);
        assert_eq!(int_14(0x1FFF), 8191);
        assert_eq!(fixed_8_16(0x0001_0000), 0x1_0000);
        assert_eq!(fixed_8_16(0x0080_0000), -(0x80_0000));
    }

    #[test]
    fn test_identity_transform_produces_linear_coords() {
        let mut shared = Vdp2RenderState::new(&VdpOptions::default());
        shared.regs2.write(regs2::BGON, 0x0010); // RBG0 enabled

        // Identity matrix: A = E = 1.0 (4.10 stored << 6), kx = ky = 1.0
        shared.vram.write_16(0x1C, 0x0001); // A = 1.0: 0x400 << 6 = 0x10000
        shared.vram.write_16(0x1E, 0x0000);
        shared.vram.write_16(0x2C, 0x0001); // E = 1.0
        shared.vram.write_16(0x2E, 0x0000);
        shared.vram.write_16(0x4C, 0x0001); // kx = 1.0 (8.16)
        shared.vram.write_16(0x4E, 0x0000);
        shared.vram.write_16(0x50, 0x0001); // ky = 1.0
        shared.vram.write_16(0x52, 0x0000);
        shared.vram.write_16(0x14, 0x0001); // deltaX = 1.0 (13.10 stored << 6)
        shared.vram.write_16(0x16, 0x0000);

        calc_rotation_parameter_tables(&mut shared, 0);

        let coords = &shared.rot_param_line_states[0].screen_coords;
        assert_eq!(coords[0].0 + 1, coords[1].0);
        assert_eq!(coords[0].1, coords[1].1);
        assert_eq!(coords[10].0, coords[0].0 + 10);
    }

    #[test]
    fn test_coefficient_transparency() {
        let shared = Vdp2RenderState::new(&VdpOptions::default());
        let mut params = shared.regs2.rot_params[0].clone();
        params.coeff_data_size = 1;

        let mut vram = Vdp2Vram::new();
        vram.write_16(0, 0x8000); // transparent
        vram.write_16(2, 0x0400); // opaque, value 1.0 (5.10)

        let cram = Cram::new();
        let coeff0 = fetch_rotation_coefficient(&vram, &cram, &shared.regs2, &params, 0);
        assert!(coeff0.transparent);
        let coeff1 = fetch_rotation_coefficient(&vram, &cram, &shared.regs2, &params, 1 << 10);
        assert!(!coeff1.transparent);
        assert_eq!(coeff1.value, 0x400 << 6);
    }
}
