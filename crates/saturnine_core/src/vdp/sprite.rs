//! Sprite framebuffer data decoding.
//!
//! The VDP2 side reads VDP1 framebuffer pixels through one of sixteen sprite
//! data types, each carving the 16-bit (types 0x0-0x7) or 8-bit (types
//! 0x8-0xF) pixel into color data, color calculation ratio, priority and
//! shadow/window fields.

use enum_iterator::Sequence;
use num_traits::FromPrimitive;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    num_derive::FromPrimitive,
    Sequence,
    serde::Serialize,
    serde::Deserialize,
)]
#[repr(u8)]
pub enum SpriteType {
    Type0 = 0x0,
    Type1 = 0x1,
    Type2 = 0x2,
    Type3 = 0x3,
    Type4 = 0x4,
    Type5 = 0x5,
    Type6 = 0x6,
    Type7 = 0x7,
    Type8 = 0x8,
    Type9 = 0x9,
    TypeA = 0xA,
    TypeB = 0xB,
    TypeC = 0xC,
    TypeD = 0xD,
    TypeE = 0xE,
    TypeF = 0xF,
}

impl SpriteType {
    #[inline]
    pub fn from_bits(value: u8) -> SpriteType {
        SpriteType::from_u8(value & 0xF).unwrap()
    }

    /// Types 0x0-0x7 read 16-bit framebuffer data; 0x8-0xF read bytes.
    #[inline]
    pub const fn is_word_sized(self) -> bool {
        (self as u8) < 8
    }

    #[inline]
    const fn layout(self) -> &'static SpriteTypeLayout {
        &SPRITE_TYPE_LAYOUTS[self as usize]
    }
}

/// Bit-field layout of one sprite data type. A field with zero width does not
/// exist for that type.
struct SpriteTypeLayout {
    color_bits: u32,
    ccr_shift: u32,
    ccr_bits: u32,
    priority_shift: u32,
    priority_bits: u32,
    shadow_or_window: bool,
}

const fn layout(
    color_bits: u32,
    ccr_shift: u32,
    ccr_bits: u32,
    priority_shift: u32,
    priority_bits: u32,
    shadow_or_window: bool,
) -> SpriteTypeLayout {
    SpriteTypeLayout {
        color_bits,
        ccr_shift,
        ccr_bits,
        priority_shift,
        priority_bits,
        shadow_or_window,
    }
}

const SPRITE_TYPE_LAYOUTS: [SpriteTypeLayout; 16] = [
    layout(11, 11, 3, 14, 2, false), // 0x0
    layout(11, 11, 2, 13, 3, false), // 0x1
    layout(11, 11, 3, 14, 1, true),  // 0x2
    layout(11, 11, 2, 13, 2, true),  // 0x3
    layout(10, 10, 3, 13, 2, true),  // 0x4
    layout(11, 11, 1, 12, 3, true),  // 0x5
    layout(10, 10, 2, 12, 3, true),  // 0x6
    layout(9, 9, 3, 12, 3, true),    // 0x7
    layout(7, 0, 0, 7, 1, false),    // 0x8
    layout(6, 6, 1, 7, 1, false),    // 0x9
    layout(6, 0, 0, 6, 2, false),    // 0xA
    layout(6, 6, 2, 0, 0, false),    // 0xB
    layout(8, 0, 0, 7, 1, false),    // 0xC
    layout(8, 6, 1, 7, 1, false),    // 0xD
    layout(8, 0, 0, 6, 2, false),    // 0xE
    layout(8, 6, 2, 0, 0, false),    // 0xF
];

/// Special pixel patterns recognized within the color data field.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum SpriteSpecial {
    #[default]
    Normal,
    /// All color data bits are zero.
    Transparent,
    /// LSB of the color data is zero, all other color data bits are one.
    Shadow,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SpriteData {
    pub color_data: u16,
    pub color_calc_ratio: u8,
    pub priority: u8,
    pub shadow_or_window: bool,
    pub special: SpriteSpecial,
}

#[inline]
const fn special_pattern(raw: u16, color_bits: u32) -> SpriteSpecial {
    let mask = (1u16 << color_bits) - 1;
    if raw & 0x7FFF == 0 {
        SpriteSpecial::Transparent
    } else if raw & mask == mask & !1 {
        SpriteSpecial::Shadow
    } else {
        SpriteSpecial::Normal
    }
}

#[inline]
const fn field_mask(bits: u32) -> u16 {
    if bits == 0 {
        0
    } else {
        (1u16 << bits) - 1
    }
}

impl SpriteData {
    /// Decodes raw framebuffer data through the given sprite type.
    #[inline]
    pub fn decode(ty: SpriteType, raw: u16) -> SpriteData {
        let layout = ty.layout();

        SpriteData {
            color_data: raw & field_mask(layout.color_bits),
            color_calc_ratio: ((raw >> layout.ccr_shift) & field_mask(layout.ccr_bits)) as u8,
            priority: ((raw >> layout.priority_shift) & field_mask(layout.priority_bits)) as u8,
            shadow_or_window: layout.shadow_or_window && (raw >> 15) != 0,
            special: special_pattern(raw, layout.color_bits),
        }
    }

    /// Packs the fields back into raw framebuffer data. Fields the type does
    /// not define are ignored. Overlapping fields (types 0xC-0xF share bits
    /// between color data and priority/ratio) are OR'd together.
    pub fn encode(&self, ty: SpriteType) -> u16 {
        let layout = ty.layout();

        let mut raw = self.color_data & field_mask(layout.color_bits);
        raw |= ((self.color_calc_ratio as u16) & field_mask(layout.ccr_bits)) << layout.ccr_shift;
        raw |= ((self.priority as u16) & field_mask(layout.priority_bits)) << layout.priority_shift;
        if layout.shadow_or_window && self.shadow_or_window {
            raw |= 1 << 15;
        }
        raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type0_decode() {
        let data = SpriteData::decode(SpriteType::Type0, 0b10_110_10101010101);
        assert_eq!(data.color_data, 0b10101010101);
        assert_eq!(data.color_calc_ratio, 0b110);
        assert_eq!(data.priority, 0b10);
        assert!(!data.shadow_or_window);
        assert_eq!(data.special, SpriteSpecial::Normal);
    }

    #[test]
    fn test_special_patterns() {
        // Type 2 has 11 color data bits: normal shadow = 0x7FE
        let shadow = SpriteData::decode(SpriteType::Type2, 0x07FE);
        assert_eq!(shadow.special, SpriteSpecial::Shadow);

        let transparent = SpriteData::decode(SpriteType::Type2, 0x0000);
        assert_eq!(transparent.special, SpriteSpecial::Transparent);

        // MSB-only data is not transparent: the lower 15 bits decide
        let window_only = SpriteData::decode(SpriteType::Type2, 0x8000);
        assert_eq!(window_only.special, SpriteSpecial::Transparent);

        // 3-bit color data shadow pattern on an 8-bit type
        let shadow8 = SpriteData::decode(SpriteType::Type8, 0b0111_1110);
        assert_eq!(shadow8.special, SpriteSpecial::Shadow);
    }

    #[test]
    fn test_encode_decode_round_trip() {
        for ty in enum_iterator::all::<SpriteType>() {
            let layout = ty.layout();
            // Skip overlapping layouts (color field shares bits with
            // priority/ratio); they cannot round-trip arbitrary values.
            if layout.color_bits > layout.priority_shift && layout.priority_bits > 0 {
                continue;
            }
            if layout.color_bits > layout.ccr_shift && layout.ccr_bits > 0 {
                continue;
            }

            let input = SpriteData {
                color_data: 0b101 & field_mask(layout.color_bits),
                color_calc_ratio: (0b101 & field_mask(layout.ccr_bits)) as u8,
                priority: (0b11 & field_mask(layout.priority_bits)) as u8,
                shadow_or_window: layout.shadow_or_window,
                special: SpriteSpecial::Normal,
            };

            let decoded = SpriteData::decode(ty, input.encode(ty));
            assert_eq!(decoded.color_data, input.color_data, "type {ty:?}");
            assert_eq!(decoded.color_calc_ratio, input.color_calc_ratio, "type {ty:?}");
            assert_eq!(decoded.priority, input.priority, "type {ty:?}");
            assert_eq!(decoded.shadow_or_window, input.shadow_or_window, "type {ty:?}");
        }
    }

    #[test]
    fn test_word_sized_split() {
        assert!(SpriteType::Type7.is_word_sized());
        assert!(!SpriteType::Type8.is_word_sized());
    }
}
