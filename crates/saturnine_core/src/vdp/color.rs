//! 15-bit and 24-bit color types shared by both pixel pipelines.

/// 15-bit BGR color with the transparency/MSB flag in bit 15.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[repr(transparent)]
pub struct Color555(pub u16);

impl Color555 {
    #[inline(always)]
    pub const fn r(self) -> u8 {
        (self.0 & 0x1F) as u8
    }

    #[inline(always)]
    pub const fn g(self) -> u8 {
        ((self.0 >> 5) & 0x1F) as u8
    }

    #[inline(always)]
    pub const fn b(self) -> u8 {
        ((self.0 >> 10) & 0x1F) as u8
    }

    #[inline(always)]
    pub const fn msb(self) -> bool {
        (self.0 >> 15) != 0
    }

    #[inline(always)]
    pub const fn from_parts(r: u8, g: u8, b: u8, msb: bool) -> Self {
        Color555(
            (r as u16 & 0x1F) | ((g as u16 & 0x1F) << 5) | ((b as u16 & 0x1F) << 10) | ((msb as u16) << 15),
        )
    }
}

/// 8:8:8 RGB color. The `msb` flag mirrors bit 15/31 of the source data and
/// drives MSB-based color calculation and half-transparency checks.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[repr(C)]
pub struct Color888 {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub msb: bool,
}

impl Color888 {
    #[inline(always)]
    pub const fn from_rgb888(value: u32) -> Self {
        Color888 {
            r: (value & 0xFF) as u8,
            g: ((value >> 8) & 0xFF) as u8,
            b: ((value >> 16) & 0xFF) as u8,
            msb: (value >> 31) != 0,
        }
    }

    /// Output format: alpha forced opaque, little-endian byte order R,G,B,A.
    #[inline(always)]
    pub const fn to_abgr8888(self) -> u32 {
        0xFF00_0000 | ((self.b as u32) << 16) | ((self.g as u32) << 8) | (self.r as u32)
    }
}

/// Expands a 5-bit channel to 8 bits, replicating the upper bits into the
/// lower ones so that 0x1F maps to 0xFF.
#[inline(always)]
pub const fn expand_5_to_8(value: u8) -> u8 {
    (value << 3) | (value >> 2)
}

#[inline(always)]
pub const fn convert_555_to_888(color: Color555) -> Color888 {
    Color888 {
        r: expand_5_to_8(color.r()),
        g: expand_5_to_8(color.g()),
        b: expand_5_to_8(color.b()),
        msb: color.msb(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_expansion() {
        assert_eq!(expand_5_to_8(0x00), 0x00);
        assert_eq!(expand_5_to_8(0x1F), 0xFF);
        assert_eq!(expand_5_to_8(0x10), 0x84);
    }

    #[test]
    fn test_color555_round_trip() {
        let color = Color555::from_parts(0x12, 0x05, 0x1F, true);
        assert_eq!(color.r(), 0x12);
        assert_eq!(color.g(), 0x05);
        assert_eq!(color.b(), 0x1F);
        assert!(color.msb());
    }

    #[test]
    fn test_abgr_output_order() {
        let color = Color888 {
            r: 0x11,
            g: 0x22,
            b: 0x33,
            msb: false,
        };
        assert_eq!(color.to_abgr8888(), 0xFF33_2211);
    }
}
