//! VDP2 register bank and the derived per-BG state.
//!
//! The register file fans out into plain-old-data parameter structs
//! (`BgParams`, `RotationParams`, `SpriteParams`, ...) recomputed at write
//! time, so the per-pixel renderers only touch contiguous precomputed state.

use modular_bitfield::bitfield;
use modular_bitfield::prelude::{B2, B3, B6, BitfieldSpecifier};

use crate::vdp::sprite::SpriteType;

// Register offsets (word addresses within the 0x120-byte bank)
pub const TVMD: u32 = 0x000;
pub const EXTEN: u32 = 0x002;
pub const TVSTAT: u32 = 0x004;
pub const VRSIZE: u32 = 0x006;
pub const HCNT: u32 = 0x008;
pub const VCNT: u32 = 0x00A;
pub const RAMCTL: u32 = 0x00E;
pub const CYCA0L: u32 = 0x010;
pub const CYCB1U: u32 = 0x01E;
pub const BGON: u32 = 0x020;
pub const MZCTL: u32 = 0x022;
pub const SFSEL: u32 = 0x024;
pub const SFCODE: u32 = 0x026;
pub const CHCTLA: u32 = 0x028;
pub const CHCTLB: u32 = 0x02A;
pub const BMPNA: u32 = 0x02C;
pub const BMPNB: u32 = 0x02E;
pub const PNCN0: u32 = 0x030;
pub const PNCR: u32 = 0x038;
pub const PLSZ: u32 = 0x03A;
pub const MPOFN: u32 = 0x03C;
pub const MPOFR: u32 = 0x03E;
pub const SCXIN0: u32 = 0x070;
pub const SCYN3: u32 = 0x096;
pub const ZMCTL: u32 = 0x098;
pub const SCRCTL: u32 = 0x09A;
pub const VCSTAU: u32 = 0x09C;
pub const VCSTAL: u32 = 0x09E;
pub const LSTA0U: u32 = 0x0A0;
pub const LCTAU: u32 = 0x0A8;
pub const LCTAL: u32 = 0x0AA;
pub const BKTAU: u32 = 0x0AC;
pub const BKTAL: u32 = 0x0AE;
pub const RPMD: u32 = 0x0B0;
pub const RPRCTL: u32 = 0x0B2;
pub const KTCTL: u32 = 0x0B4;
pub const KTAOF: u32 = 0x0B6;
pub const OVPNRA: u32 = 0x0B8;
pub const OVPNRB: u32 = 0x0BA;
pub const RPTAU: u32 = 0x0BC;
pub const RPTAL: u32 = 0x0BE;
pub const WPSX0: u32 = 0x0C0;
pub const WCTLA: u32 = 0x0D0;
pub const WCTLB: u32 = 0x0D2;
pub const WCTLC: u32 = 0x0D4;
pub const WCTLD: u32 = 0x0D6;
pub const LWTA0U: u32 = 0x0D8;
pub const LWTA1U: u32 = 0x0DC;
pub const SPCTL: u32 = 0x0E0;
pub const SDCTL: u32 = 0x0E2;
pub const CRAOFA: u32 = 0x0E4;
pub const CRAOFB: u32 = 0x0E6;
pub const LNCLEN: u32 = 0x0E8;
pub const SFPRMD: u32 = 0x0EA;
pub const CCCTL: u32 = 0x0EC;
pub const SFCCMD: u32 = 0x0EE;
pub const PRISA: u32 = 0x0F0;
pub const PRINA: u32 = 0x0F8;
pub const PRINB: u32 = 0x0FA;
pub const PRIR: u32 = 0x0FC;
pub const CCRSA: u32 = 0x100;
pub const CCRNA: u32 = 0x108;
pub const CCRNB: u32 = 0x10A;
pub const CCRR: u32 = 0x10C;
pub const CCRLB: u32 = 0x10E;
pub const CLOFEN: u32 = 0x110;
pub const CLOFSL: u32 = 0x112;
pub const COAR: u32 = 0x114;
pub const COBB: u32 = 0x11E;

pub const REG_BANK_WORDS: usize = 0x120 / 2;

// Compositor layer indices. The stack insertion sort relies on this order for
// tie-breaking (lower index wins).
pub const LYR_SPRITE: usize = 0;
pub const LYR_RBG0: usize = 1;
pub const LYR_NBG0_RBG1: usize = 2;
pub const LYR_NBG1: usize = 3;
pub const LYR_NBG2: usize = 4;
pub const LYR_NBG3: usize = 5;
pub const LYR_BACK: usize = 6;

/// Index into `bg_params`: 0 = RBG0, 1 = NBG0/RBG1, 2 = NBG1, 3 = NBG2,
/// 4 = NBG3. Offset by one from the compositor layer index.
pub const BGP_RBG0: usize = 0;
pub const BGP_NBG0: usize = 1;
pub const BGP_NBG1: usize = 2;
pub const BGP_NBG2: usize = 3;
pub const BGP_NBG3: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, BitfieldSpecifier, serde::Serialize, serde::Deserialize)]
#[bits = 2]
pub enum InterlaceMode {
    None = 0b00,
    Invalid = 0b01,
    SingleDensity = 0b10,
    DoubleDensity = 0b11,
}

impl InterlaceMode {
    #[inline]
    pub fn is_interlaced(self) -> bool {
        matches!(self, InterlaceMode::SingleDensity | InterlaceMode::DoubleDensity)
    }
}

/// TV screen mode register (TVMD).
#[bitfield(bits = 16)]
#[repr(u16)]
#[allow(dead_code)]
#[derive(Debug, Copy, Clone)]
pub struct TvScreenMode {
    /// HRESOn: horizontal resolution (4 normal + 4 exclusive values)
    pub hres: B3,
    #[skip]
    unused0: modular_bitfield::prelude::B1,
    /// VRESOn: vertical resolution (224/240/256)
    pub vres: B2,
    /// LSMDn: interlace mode
    pub interlace: InterlaceMode,
    /// BDCLMD: border color mode (0 = black, 1 = back screen color)
    pub border_color_mode: bool,
    #[skip]
    unused1: B6,
    /// DISP: display enable; latched at the top border
    pub display: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ColorFormat {
    Palette16 = 0,
    Palette256 = 1,
    Palette2048 = 2,
    Rgb555 = 3,
    Rgb888 = 4,
}

impl ColorFormat {
    #[inline]
    pub fn from_bits(value: u16) -> ColorFormat {
        match value & 7 {
            0 => ColorFormat::Palette16,
            1 => ColorFormat::Palette256,
            2 => ColorFormat::Palette2048,
            3 => ColorFormat::Rgb555,
            _ => ColorFormat::Rgb888,
        }
    }

    #[inline]
    pub fn is_palette(self) -> bool {
        matches!(
            self,
            ColorFormat::Palette16 | ColorFormat::Palette256 | ColorFormat::Palette2048
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum CharacterMode {
    OneWordStandard,
    OneWordExtended,
    TwoWord,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum PriorityMode {
    PerScreen,
    PerCharacter,
    PerDot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SpecialColorCalcMode {
    PerScreen,
    PerCharacter,
    PerDot,
    ColorDataMsb,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ScreenOverProcess {
    /// The scroll surface repeats outside its bounds.
    Repeat = 0,
    /// Outside areas show the character named by OVPNRA/OVPNRB.
    RepeatChar = 1,
    /// Outside areas are transparent.
    Transparent = 2,
    /// The surface is clamped to 512x512 dots; outside is transparent.
    Fixed512 = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum RotationParamMode {
    ParamA = 0,
    ParamB = 1,
    Coefficient = 2,
    Window = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum CoefficientDataMode {
    ScaleCoeffXY = 0,
    ScaleCoeffX = 1,
    ScaleCoeffY = 2,
    ViewpointX = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum RotDataBankSel {
    Unused = 0,
    Coefficients = 1,
    PatternName = 2,
    Character = 3,
}

impl RotDataBankSel {
    #[inline]
    fn from_bits(value: u16) -> RotDataBankSel {
        match value & 3 {
            1 => RotDataBankSel::Coefficients,
            2 => RotDataBankSel::PatternName,
            3 => RotDataBankSel::Character,
            _ => RotDataBankSel::Unused,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum WindowLogic {
    Or,
    And,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SpriteColorCalcCondition {
    PriorityLessOrEqual = 0,
    PriorityEqual = 1,
    PriorityGreaterOrEqual = 2,
    MsbOne = 3,
}

// VRAM cycle pattern slot values (CYCxn nibbles)
pub const CYC_PN_NBG0: u8 = 0x0;
pub const CYC_CP_NBG0: u8 = 0x4;
pub const CYC_VCSC_NBG0: u8 = 0xC;
pub const CYC_VCSC_NBG1: u8 = 0xD;
pub const CYC_CPU: u8 = 0xE;
pub const CYC_NOP: u8 = 0xF;

/// Window participation of one layer: two normal windows plus the sprite
/// window, each with an invert flag, combined by AND or OR.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct WindowSet {
    pub enabled: [bool; 3],
    pub inverted: [bool; 3],
    pub logic: WindowLogic,
}

impl Default for WindowSet {
    fn default() -> Self {
        WindowSet {
            enabled: [false; 3],
            inverted: [false; 3],
            logic: WindowLogic::Or,
        }
    }
}

impl WindowSet {
    fn from_byte(byte: u8, sprite_window: bool) -> WindowSet {
        WindowSet {
            enabled: [
                byte & 0x02 != 0,
                byte & 0x08 != 0,
                sprite_window && byte & 0x20 != 0,
            ],
            inverted: [byte & 0x01 != 0, byte & 0x04 != 0, byte & 0x10 != 0],
            logic: if byte & 0x80 != 0 { WindowLogic::And } else { WindowLogic::Or },
        }
    }

    #[inline]
    pub fn any_enabled(&self) -> bool {
        self.enabled.iter().any(|&e| e)
    }
}

#[derive(Debug, Clone, Copy, Default, serde::Serialize, serde::Deserialize)]
pub struct WindowParams {
    pub start_x: i16,
    pub start_y: i16,
    pub end_x: i16,
    pub end_y: i16,
    pub line_window_enable: bool,
    pub line_window_address: u32,
}

/// Per-background derived parameters, rebuilt whenever a register affecting
/// the BG is written.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct BgParams {
    pub enabled: bool,
    pub enable_transparency: bool,

    pub bitmap: bool,
    pub bitmap_size_h: u32,
    pub bitmap_size_v: u32,
    pub bitmap_base_address: u32,

    pub color_format: ColorFormat,
    /// 0 = 1x1 cell characters, 1 = 2x2
    pub cell_size_shift: u32,
    pub char_mode: CharacterMode,
    pub suppl_scroll_char_num: u16,
    pub suppl_scroll_pal_num: u8,
    pub suppl_scroll_special_color_calc: bool,
    pub suppl_scroll_special_priority: bool,
    pub suppl_bitmap_pal_num: u32,
    pub suppl_bitmap_special_color_calc: bool,
    pub suppl_bitmap_special_priority: bool,

    pub page_base_addresses: [u32; 4],
    pub page_shift_h: u32,
    pub page_shift_v: u32,

    pub scroll_amount_h: u32,
    pub scroll_amount_v: u32,
    pub scroll_inc_h: u32,
    pub scroll_inc_v: u32,

    pub line_scroll_table_address: u32,
    pub line_scroll_x_enable: bool,
    pub line_scroll_y_enable: bool,
    pub line_zoom_enable: bool,
    /// Shift: the table advances every `1 << interval` lines.
    pub line_scroll_interval: u32,
    pub vertical_cell_scroll_enable: bool,

    pub priority_number: u8,
    pub priority_mode: PriorityMode,
    pub color_calc_enable: bool,
    pub color_calc_ratio: u8,
    pub special_color_calc_mode: SpecialColorCalcMode,
    pub special_function_select: usize,
    pub line_color_screen_enable: bool,
    pub shadow_enable: bool,
    pub cram_offset: u32,

    pub window_set: WindowSet,
    pub mosaic_enable: bool,

    // Derived from the cycle pattern analysis
    pub pat_name_access: [bool; 4],
    pub char_pat_access: [bool; 4],
    pub vram_data_offset: [u32; 4],
    pub char_pat_delay: bool,
}

impl Default for BgParams {
    fn default() -> Self {
        BgParams {
            enabled: false,
            enable_transparency: true,
            bitmap: false,
            bitmap_size_h: 512,
            bitmap_size_v: 256,
            bitmap_base_address: 0,
            color_format: ColorFormat::Palette16,
            cell_size_shift: 0,
            char_mode: CharacterMode::TwoWord,
            suppl_scroll_char_num: 0,
            suppl_scroll_pal_num: 0,
            suppl_scroll_special_color_calc: false,
            suppl_scroll_special_priority: false,
            suppl_bitmap_pal_num: 0,
            suppl_bitmap_special_color_calc: false,
            suppl_bitmap_special_priority: false,
            page_base_addresses: [0; 4],
            page_shift_h: 0,
            page_shift_v: 0,
            scroll_amount_h: 0,
            scroll_amount_v: 0,
            scroll_inc_h: 0x100,
            scroll_inc_v: 0x100,
            line_scroll_table_address: 0,
            line_scroll_x_enable: false,
            line_scroll_y_enable: false,
            line_zoom_enable: false,
            line_scroll_interval: 0,
            vertical_cell_scroll_enable: false,
            priority_number: 0,
            priority_mode: PriorityMode::PerScreen,
            color_calc_enable: false,
            color_calc_ratio: 0,
            special_color_calc_mode: SpecialColorCalcMode::PerScreen,
            special_function_select: 0,
            line_color_screen_enable: false,
            shadow_enable: false,
            cram_offset: 0,
            window_set: WindowSet::default(),
            mosaic_enable: false,
            pat_name_access: [false; 4],
            char_pat_access: [false; 4],
            vram_data_offset: [0; 4],
            char_pat_delay: false,
        }
    }
}

/// Derived state for one rotation parameter set (A or B).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RotationParams {
    /// Re-read Xst/Yst/KAst from the parameter table on the next line.
    pub read_xst: bool,
    pub read_yst: bool,
    pub read_kast: bool,

    pub coeff_table_enable: bool,
    /// 0 = two-word coefficients, 1 = one-word.
    pub coeff_data_size: u32,
    pub coeff_data_mode: CoefficientDataMode,
    pub coeff_use_line_color: bool,
    /// Coefficient table address offset in 16.10 fixed-point entry units.
    pub coeff_table_address_offset: u32,

    pub screen_over_process: ScreenOverProcess,
    pub screen_over_pattern_name: u16,
    pub page_shift_h: u32,
    pub page_shift_v: u32,
    pub bitmap_base_address: u32,
    /// Plane base addresses per rendered rotation BG (RBG0, RBG1).
    pub page_base_addresses: [[u32; 16]; 2],
}

impl Default for RotationParams {
    fn default() -> Self {
        RotationParams {
            read_xst: false,
            read_yst: false,
            read_kast: false,
            coeff_table_enable: false,
            coeff_data_size: 0,
            coeff_data_mode: CoefficientDataMode::ScaleCoeffXY,
            coeff_use_line_color: false,
            coeff_table_address_offset: 0,
            screen_over_process: ScreenOverProcess::Repeat,
            screen_over_pattern_name: 0,
            page_shift_h: 0,
            page_shift_v: 0,
            bitmap_base_address: 0,
            page_base_addresses: [[0; 16]; 2],
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CommonRotationParams {
    pub rot_param_mode: RotationParamMode,
    /// Rotation parameter table base address (bit 6 forced clear).
    pub base_address: u32,
    pub window_set: WindowSet,
}

impl Default for CommonRotationParams {
    fn default() -> Self {
        CommonRotationParams {
            rot_param_mode: RotationParamMode::ParamA,
            base_address: 0,
            window_set: WindowSet::default(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SpriteParams {
    pub sprite_type: SpriteType,
    /// SPCLMD: MSB=1 framebuffer pixels are raw 5:5:5 RGB.
    pub mixed_format: bool,
    /// SPWINEN: sprite shadow/window bit feeds the sprite window.
    pub use_sprite_window: bool,
    pub priorities: [u8; 8],
    pub color_calc_ratios: [u8; 8],
    pub color_calc_enable: bool,
    pub color_calc_cond: SpriteColorCalcCondition,
    pub color_calc_value: u8,
    pub line_color_screen_enable: bool,
    pub color_data_offset: u32,
    pub window_set: WindowSet,
}

impl Default for SpriteParams {
    fn default() -> Self {
        SpriteParams {
            sprite_type: SpriteType::Type0,
            mixed_format: false,
            use_sprite_window: false,
            priorities: [0; 8],
            color_calc_ratios: [0; 8],
            color_calc_enable: false,
            color_calc_cond: SpriteColorCalcCondition::PriorityLessOrEqual,
            color_calc_value: 0,
            line_color_screen_enable: false,
            color_data_offset: 0,
            window_set: WindowSet::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, serde::Serialize, serde::Deserialize)]
pub struct LineBackScreenParams {
    pub base_address: u32,
    pub per_line: bool,
    pub color_calc_enable: bool,
    pub color_calc_ratio: u8,
    pub shadow_enable: bool,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ColorCalcParams {
    pub use_additive_blend: bool,
    pub extended_color_calc_enable: bool,
    pub use_second_screen_ratio: bool,
    pub window_set: WindowSet,
}

impl Default for ColorCalcParams {
    fn default() -> Self {
        ColorCalcParams {
            use_additive_blend: false,
            extended_color_calc_enable: false,
            use_second_screen_ratio: false,
            window_set: WindowSet::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, serde::Serialize, serde::Deserialize)]
pub struct ColorOffset {
    pub r: i16,
    pub g: i16,
    pub b: i16,
    pub non_zero: bool,
}

#[derive(Debug, Clone, Copy, Default, serde::Serialize, serde::Deserialize)]
pub struct SpecialFunctionCodes {
    /// Indexed by the lower three bits of the dot color data.
    pub color_matches: [bool; 8],
}

#[derive(Debug, Clone, Copy, Default, serde::Serialize, serde::Deserialize)]
pub struct VramControl {
    pub partition_vram_a: bool,
    pub partition_vram_b: bool,
    /// Color RAM mode: 0/1 = 5:5:5 (1024/2048 words), 2 = 8:8:8.
    pub color_ram_mode: u8,
    pub color_ram_coeff_table_enable: bool,
    pub rot_data_bank_sel: [u8; 4],
}

impl VramControl {
    #[inline]
    pub fn rot_data_bank(&self, bank: usize) -> RotDataBankSel {
        RotDataBankSel::from_bits(self.rot_data_bank_sel[bank] as u16)
    }
}

/// The whole VDP2 register bank: raw word storage for readback plus all the
/// derived parameter structs.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Vdp2Regs {
    raw: Vec<u16>,

    // TVMD
    pub hres: u8,
    pub vres: u8,
    pub interlace: InterlaceMode,
    pub border_color_mode: bool,
    pub display_enable: bool,
    pub tvmd_dirty: bool,
    // Latched at the top border
    pub display_enable_latch: bool,
    pub border_color_mode_latch: bool,

    // TVSTAT
    pub pal: bool,
    pub hblank: bool,
    pub vblank: bool,
    pub odd: bool,
    pub exltfg: bool,

    // EXTEN
    pub external_latch_enable: bool,

    // Counters
    pub vcnt: u16,
    pub vcnt_skip: u16,
    pub vcnt_shift: u32,
    pub hcnt_latch: u16,
    /// Right shift applied to `hcnt << 1` when read on the bus.
    pub hcnt_shift: u32,
    pub hcnt_mask: u16,
    /// VCNT value captured by the external latch, if any.
    pub vcnt_latch: Option<u16>,

    pub vram_control: VramControl,
    /// CYCxn slots: [bank][timing slot T0-T7].
    pub cycle_patterns: [[u8; 8]; 4],
    pub access_patterns_dirty: bool,

    /// NBG0-3, RBG0, RBG1 raw enable bits from BGON.
    pub bg_enabled: [bool; 6],
    /// Derived per-compositor-layer display state (sprite always on).
    pub layer_enabled: [bool; 6],

    pub mosaic_h: u8,
    pub mosaic_v: u8,

    pub special_function_codes: [SpecialFunctionCodes; 2],

    /// RBG0, NBG0/RBG1, NBG1, NBG2, NBG3 (see `BGP_*`).
    pub bg_params: [BgParams; 5],
    pub rot_params: [RotationParams; 2],
    pub common_rot_params: CommonRotationParams,
    pub window_params: [WindowParams; 2],
    pub sprite_params: SpriteParams,
    pub line_screen_params: LineBackScreenParams,
    pub back_screen_params: LineBackScreenParams,
    pub color_calc_params: ColorCalcParams,
    pub vertical_cell_scroll_table_address: u32,

    pub color_offset: [ColorOffset; 2],
    /// Indexed by compositor layer (`LYR_*`).
    pub color_offset_enable: [bool; 7],
    pub color_offset_select: [usize; 7],
}

impl Vdp2Regs {
    pub fn new(pal: bool) -> Self {
        Vdp2Regs {
            raw: vec![0; REG_BANK_WORDS],
            hres: 0,
            vres: 0,
            interlace: InterlaceMode::None,
            border_color_mode: false,
            display_enable: false,
            tvmd_dirty: true,
            display_enable_latch: false,
            border_color_mode_latch: false,
            pal,
            hblank: false,
            vblank: false,
            odd: true,
            exltfg: false,
            external_latch_enable: false,
            vcnt: 0,
            vcnt_skip: 0,
            vcnt_shift: 0,
            hcnt_latch: 0,
            hcnt_shift: 0,
            hcnt_mask: 0x3FE,
            vcnt_latch: None,
            vram_control: VramControl::default(),
            cycle_patterns: [[CYC_NOP; 8]; 4],
            access_patterns_dirty: true,
            bg_enabled: [false; 6],
            layer_enabled: [true, false, false, false, false, false],
            mosaic_h: 1,
            mosaic_v: 1,
            special_function_codes: [SpecialFunctionCodes::default(); 2],
            bg_params: Default::default(),
            rot_params: Default::default(),
            common_rot_params: CommonRotationParams::default(),
            window_params: [WindowParams::default(); 2],
            sprite_params: SpriteParams::default(),
            line_screen_params: LineBackScreenParams::default(),
            back_screen_params: LineBackScreenParams::default(),
            color_calc_params: ColorCalcParams::default(),
            vertical_cell_scroll_table_address: 0,
            color_offset: [ColorOffset::default(); 2],
            color_offset_enable: [false; 7],
            color_offset_select: [0; 7],
        }
    }

    pub fn reset(&mut self) {
        *self = Vdp2Regs::new(self.pal);
    }

    /// Latches the TVMD display flags; only effective from the top border on.
    pub fn latch_tvmd(&mut self) {
        self.display_enable_latch = self.display_enable;
        self.border_color_mode_latch = self.border_color_mode;
    }

    #[inline]
    pub fn raw_reg(&self, address: u32) -> u16 {
        self.raw[((address as usize) / 2) % REG_BANK_WORDS]
    }

    pub fn read(&self, address: u32) -> u16 {
        let address = address & 0x1FF;
        match address {
            TVSTAT => {
                ((self.exltfg as u16) << 9)
                    | ((self.vblank as u16) << 3)
                    | ((self.hblank as u16) << 2)
                    | ((self.odd as u16) << 1)
                    | self.pal as u16
            }
            HCNT => self.hcnt_latch,
            VCNT => self.vcnt_latch.unwrap_or_else(|| self.external_vcnt()),
            _ => self.raw_reg(address),
        }
    }

    /// VCNT as exposed on the bus: shifted for double-density interlace and
    /// offset by the counter skip.
    #[inline]
    pub fn external_vcnt(&self) -> u16 {
        (self.vcnt >> self.vcnt_shift).wrapping_add(self.vcnt_skip) & 0x3FF
    }

    /// Stores a new HCNT latch value, applying the per-mode shift and mask.
    #[inline]
    pub fn write_hcnt(&mut self, value: u16) {
        self.hcnt_latch = ((value << 1) >> self.hcnt_shift) & self.hcnt_mask;
    }

    pub fn write(&mut self, address: u32, value: u16) {
        let address = address & 0x1FF;
        if address >= 0x120 {
            return;
        }
        self.raw[(address as usize) / 2] = value;

        match address {
            TVMD => {
                let tvmd = TvScreenMode::from(value);
                self.hres = tvmd.hres();
                self.vres = tvmd.vres();
                self.interlace = tvmd.interlace();
                self.border_color_mode = tvmd.border_color_mode();
                self.display_enable = tvmd.display();
                self.tvmd_dirty = true;
                self.access_patterns_dirty = true;
            }
            EXTEN => {
                self.external_latch_enable = value & 0x0200 != 0;
            }
            RAMCTL => {
                self.vram_control.rot_data_bank_sel = [
                    (value & 3) as u8,
                    ((value >> 2) & 3) as u8,
                    ((value >> 4) & 3) as u8,
                    ((value >> 6) & 3) as u8,
                ];
                self.vram_control.partition_vram_a = value & 0x0100 != 0;
                self.vram_control.partition_vram_b = value & 0x0200 != 0;
                self.vram_control.color_ram_mode = (((value >> 12) & 3) as u8).min(2);
                self.vram_control.color_ram_coeff_table_enable = value & 0x8000 != 0;
                self.access_patterns_dirty = true;
            }
            0x010..=0x01E => {
                let bank = ((address - CYCA0L) / 4) as usize;
                let upper = address & 2 != 0;
                let base = if upper { 4 } else { 0 };
                for slot in 0..4 {
                    self.cycle_patterns[bank][base + slot] =
                        ((value >> (12 - slot * 4)) & 0xF) as u8;
                }
                self.access_patterns_dirty = true;
            }
            BGON => {
                for bg in 0..6 {
                    self.bg_enabled[bg] = value & (1 << bg) != 0;
                }
                // Transparency disable bits
                self.bg_params[BGP_NBG0].enable_transparency = value & 0x0100 == 0;
                self.bg_params[BGP_NBG1].enable_transparency = value & 0x0200 == 0;
                self.bg_params[BGP_NBG2].enable_transparency = value & 0x0400 == 0;
                self.bg_params[BGP_NBG3].enable_transparency = value & 0x0800 == 0;
                self.bg_params[BGP_RBG0].enable_transparency = value & 0x1000 == 0;
                self.access_patterns_dirty = true;
                self.update_derived();
            }
            MZCTL => {
                self.mosaic_h = ((value >> 8) & 0xF) as u8 + 1;
                self.mosaic_v = ((value >> 12) & 0xF) as u8 + 1;
                self.update_derived();
            }
            SFCODE => {
                for (select, byte) in [(0usize, value & 0xFF), (1, value >> 8)] {
                    for i in 0..8 {
                        self.special_function_codes[select].color_matches[i] = byte & (1 << i) != 0;
                    }
                }
            }
            0x024 | 0x028..=0x09E | 0x0A0..=0x0BE | 0x0C0..=0x0DE | 0x0E0..=0x11E => {
                self.access_patterns_dirty = true;
                self.update_derived();
            }
            _ => {}
        }
    }

    // -------------------------------------------------------------------------
    // Derived state

    /// Rebuilds every derived parameter struct from the raw register file.
    /// Register writes are rare compared to pixels, so a full re-derivation
    /// keeps the decode logic in one place.
    fn update_derived(&mut self) {
        self.update_bg_formats();
        self.update_scroll_params();
        self.update_page_addresses();
        self.update_priorities_and_color_calc();
        self.update_windows();
        self.update_sprite_params();
        self.update_rotation_params();
        self.update_line_back_params();
        self.update_color_offsets();
        self.update_enabled_layers();
    }

    fn update_bg_formats(&mut self) {
        let chctla = self.raw_reg(CHCTLA);
        let chctlb = self.raw_reg(CHCTLB);
        let bmpna = self.raw_reg(BMPNA);
        let bmpnb = self.raw_reg(BMPNB);

        // NBG0: CHCTLA low byte
        {
            let bg = &mut self.bg_params[BGP_NBG0];
            bg.cell_size_shift = (chctla & 0x01) as u32;
            bg.bitmap = chctla & 0x02 != 0;
            let bmsz = (chctla >> 2) & 3;
            bg.bitmap_size_h = if bmsz & 1 != 0 { 1024 } else { 512 };
            bg.bitmap_size_v = if bmsz & 2 != 0 { 512 } else { 256 };
            bg.color_format = ColorFormat::from_bits((chctla >> 4) & 7);
            bg.suppl_bitmap_pal_num = (((bmpna) & 7) as u32) << 8;
            bg.suppl_bitmap_special_color_calc = bmpna & 0x10 != 0;
            bg.suppl_bitmap_special_priority = bmpna & 0x20 != 0;
        }
        // NBG1: CHCTLA high byte
        {
            let bg = &mut self.bg_params[BGP_NBG1];
            bg.cell_size_shift = ((chctla >> 8) & 0x01) as u32;
            bg.bitmap = chctla & 0x0200 != 0;
            let bmsz = (chctla >> 10) & 3;
            bg.bitmap_size_h = if bmsz & 1 != 0 { 1024 } else { 512 };
            bg.bitmap_size_v = if bmsz & 2 != 0 { 512 } else { 256 };
            bg.color_format = ColorFormat::from_bits((chctla >> 12) & 3);
            bg.suppl_bitmap_pal_num = (((bmpna >> 8) & 7) as u32) << 8;
            bg.suppl_bitmap_special_color_calc = bmpna & 0x1000 != 0;
            bg.suppl_bitmap_special_priority = bmpna & 0x2000 != 0;
        }
        // NBG2/NBG3: CHCTLB low byte
        {
            let bg = &mut self.bg_params[BGP_NBG2];
            bg.cell_size_shift = (chctlb & 0x01) as u32;
            bg.bitmap = false;
            bg.color_format = ColorFormat::from_bits((chctlb >> 1) & 1);
        }
        {
            let bg = &mut self.bg_params[BGP_NBG3];
            bg.cell_size_shift = ((chctlb >> 4) & 0x01) as u32;
            bg.bitmap = false;
            bg.color_format = ColorFormat::from_bits((chctlb >> 5) & 1);
        }
        // RBG0: CHCTLB high byte
        {
            let bg = &mut self.bg_params[BGP_RBG0];
            bg.cell_size_shift = ((chctlb >> 8) & 0x01) as u32;
            bg.bitmap = chctlb & 0x0200 != 0;
            let bmsz = (chctlb >> 10) & 1;
            bg.bitmap_size_h = 512;
            bg.bitmap_size_v = if bmsz != 0 { 512 } else { 256 };
            bg.color_format = ColorFormat::from_bits((chctlb >> 12) & 7);
            bg.suppl_bitmap_pal_num = ((bmpnb & 7) as u32) << 8;
            bg.suppl_bitmap_special_color_calc = bmpnb & 0x10 != 0;
            bg.suppl_bitmap_special_priority = bmpnb & 0x20 != 0;
        }

        // Pattern name supplement registers: PNCN0-3, PNCR
        let pnc_addrs = [PNCR, PNCN0, PNCN0 + 2, PNCN0 + 4, PNCN0 + 6];
        for (bgp, addr) in pnc_addrs.into_iter().enumerate() {
            let pnc = self.raw_reg(addr);
            let bg = &mut self.bg_params[bgp];
            bg.char_mode = if pnc & 0x8000 == 0 {
                CharacterMode::TwoWord
            } else if pnc & 0x4000 != 0 {
                CharacterMode::OneWordExtended
            } else {
                CharacterMode::OneWordStandard
            };
            bg.suppl_scroll_char_num = pnc & 0x1F;
            bg.suppl_scroll_pal_num = (((pnc >> 5) & 7) as u8) << 4;
            bg.suppl_scroll_special_color_calc = pnc & 0x0100 != 0;
            bg.suppl_scroll_special_priority = pnc & 0x0200 != 0;
        }

        // CRAM offsets: CRAOFA (NBG0-3), CRAOFB (RBG0, sprite)
        let craofa = self.raw_reg(CRAOFA);
        let craofb = self.raw_reg(CRAOFB);
        self.bg_params[BGP_NBG0].cram_offset = ((craofa & 7) as u32) << 8;
        self.bg_params[BGP_NBG1].cram_offset = (((craofa >> 4) & 7) as u32) << 8;
        self.bg_params[BGP_NBG2].cram_offset = (((craofa >> 8) & 7) as u32) << 8;
        self.bg_params[BGP_NBG3].cram_offset = (((craofa >> 12) & 7) as u32) << 8;
        self.bg_params[BGP_RBG0].cram_offset = ((craofb & 7) as u32) << 8;
        self.sprite_params.color_data_offset = (((craofb >> 4) & 7) as u32) << 8;
    }

    fn update_scroll_params(&mut self) {
        // NBG0 and NBG1 have fractional scroll and zoom registers
        for (i, bgp) in [BGP_NBG0, BGP_NBG1].into_iter().enumerate() {
            let base = SCXIN0 + (i as u32) * 0x10;
            let scxin = self.raw_reg(base);
            let scxdn = self.raw_reg(base + 2);
            let scyin = self.raw_reg(base + 4);
            let scydn = self.raw_reg(base + 6);
            let zmxin = self.raw_reg(base + 8);
            let zmxdn = self.raw_reg(base + 10);
            let zmyin = self.raw_reg(base + 12);
            let zmydn = self.raw_reg(base + 14);

            let bg = &mut self.bg_params[bgp];
            bg.scroll_amount_h = (((scxin & 0x7FF) as u32) << 8) | (scxdn >> 8) as u32;
            bg.scroll_amount_v = (((scyin & 0x7FF) as u32) << 8) | (scydn >> 8) as u32;
            bg.scroll_inc_h = (((zmxin & 0x7) as u32) << 8) | (zmxdn >> 8) as u32;
            bg.scroll_inc_v = (((zmyin & 0x7) as u32) << 8) | (zmydn >> 8) as u32;
        }
        // NBG2 and NBG3 scroll in whole dots, no zoom
        for (i, bgp) in [BGP_NBG2, BGP_NBG3].into_iter().enumerate() {
            let base = 0x090 + (i as u32) * 4;
            let bg = &mut self.bg_params[bgp];
            bg.scroll_amount_h = ((self.raw[(base as usize) / 2] & 0x7FF) as u32) << 8;
            bg.scroll_amount_v = ((self.raw[(base as usize) / 2 + 1] & 0x7FF) as u32) << 8;
            bg.scroll_inc_h = 0x100;
            bg.scroll_inc_v = 0x100;
        }

        // Line/vertical-cell scroll control (SCRCTL)
        let scrctl = self.raw_reg(SCRCTL);
        for (i, bgp) in [BGP_NBG0, BGP_NBG1].into_iter().enumerate() {
            let bits = (scrctl >> (i * 8)) & 0xFF;
            let bg = &mut self.bg_params[bgp];
            bg.vertical_cell_scroll_enable = bits & 0x01 != 0;
            bg.line_scroll_x_enable = bits & 0x02 != 0;
            bg.line_scroll_y_enable = bits & 0x04 != 0;
            bg.line_zoom_enable = bits & 0x08 != 0;
            bg.line_scroll_interval = ((bits >> 4) & 3) as u32;
        }
        // Line scroll table addresses
        for (i, bgp) in [BGP_NBG0, BGP_NBG1].into_iter().enumerate() {
            let base = LSTA0U + (i as u32) * 4;
            let upper = self.raw_reg(base);
            let lower = self.raw_reg(base + 2);
            self.bg_params[bgp].line_scroll_table_address =
                ((((upper & 7) as u32) << 16 | lower as u32) << 1) & 0x7_FFFE;
        }

        let vcsta_u = self.raw_reg(VCSTAU);
        let vcsta_l = self.raw_reg(VCSTAL);
        self.vertical_cell_scroll_table_address =
            ((((vcsta_u & 7) as u32) << 16 | vcsta_l as u32) << 1) & 0x7_FFFE;
    }

    fn update_page_addresses(&mut self) {
        let plsz = self.raw_reg(PLSZ);
        let mpofn = self.raw_reg(MPOFN);

        for bgp in [BGP_NBG0, BGP_NBG1, BGP_NBG2, BGP_NBG3] {
            let nbg = bgp - 1;
            let size = (plsz >> (nbg * 2)) & 3;
            let map_offset = ((mpofn >> (nbg * 4)) & 7) as u32;

            let bg = &mut self.bg_params[bgp];
            bg.page_shift_h = (size & 1) as u32;
            bg.page_shift_v = if size == 3 { 1 } else { 0 };
            bg.bitmap_base_address = (map_offset << 17) & 0x7_FFFF;

            let page_size_shift = page_size_shift(bg.cell_size_shift, bg.char_mode);
            let plane_size_shift = page_size_shift + bg.page_shift_h + bg.page_shift_v;

            for plane in 0..4 {
                let reg = self.raw[(0x040 + nbg * 4) / 2 + plane / 2];
                let index = ((reg >> ((plane & 1) * 8)) & 0x3F) as u32;
                self.bg_params[bgp].page_base_addresses[plane] =
                    (((map_offset << 6) | index) << plane_size_shift) & 0x7_FFFF;
            }
        }
    }

    fn update_priorities_and_color_calc(&mut self) {
        let prina = self.raw_reg(PRINA);
        let prinb = self.raw_reg(PRINB);
        let prir = self.raw_reg(PRIR);
        self.bg_params[BGP_NBG0].priority_number = (prina & 7) as u8;
        self.bg_params[BGP_NBG1].priority_number = ((prina >> 8) & 7) as u8;
        self.bg_params[BGP_NBG2].priority_number = (prinb & 7) as u8;
        self.bg_params[BGP_NBG3].priority_number = ((prinb >> 8) & 7) as u8;
        self.bg_params[BGP_RBG0].priority_number = (prir & 7) as u8;

        let ccrna = self.raw_reg(CCRNA);
        let ccrnb = self.raw_reg(CCRNB);
        let ccrr = self.raw_reg(CCRR);
        self.bg_params[BGP_NBG0].color_calc_ratio = (ccrna & 0x1F) as u8;
        self.bg_params[BGP_NBG1].color_calc_ratio = ((ccrna >> 8) & 0x1F) as u8;
        self.bg_params[BGP_NBG2].color_calc_ratio = (ccrnb & 0x1F) as u8;
        self.bg_params[BGP_NBG3].color_calc_ratio = ((ccrnb >> 8) & 0x1F) as u8;
        self.bg_params[BGP_RBG0].color_calc_ratio = (ccrr & 0x1F) as u8;

        let ccctl = self.raw_reg(CCCTL);
        self.bg_params[BGP_NBG0].color_calc_enable = ccctl & 0x01 != 0;
        self.bg_params[BGP_NBG1].color_calc_enable = ccctl & 0x02 != 0;
        self.bg_params[BGP_NBG2].color_calc_enable = ccctl & 0x04 != 0;
        self.bg_params[BGP_NBG3].color_calc_enable = ccctl & 0x08 != 0;
        self.bg_params[BGP_RBG0].color_calc_enable = ccctl & 0x10 != 0;
        self.line_screen_params.color_calc_enable = ccctl & 0x20 != 0;
        self.sprite_params.color_calc_enable = ccctl & 0x40 != 0;
        self.back_screen_params.color_calc_enable = ccctl & 0x80 != 0;
        self.color_calc_params.use_additive_blend = ccctl & 0x0100 != 0;
        self.color_calc_params.use_second_screen_ratio = ccctl & 0x0200 != 0;
        self.color_calc_params.extended_color_calc_enable = ccctl & 0x0400 != 0;

        // Special priority / special color calc modes
        let sfprmd = self.raw_reg(SFPRMD);
        let sfccmd = self.raw_reg(SFCCMD);
        let sfsel = self.raw_reg(SFSEL);
        let lnclen = self.raw_reg(LNCLEN);
        let sdctl = self.raw_reg(SDCTL);
        let mzctl = self.raw_reg(MZCTL);
        for (i, bgp) in [BGP_NBG0, BGP_NBG1, BGP_NBG2, BGP_NBG3, BGP_RBG0].into_iter().enumerate() {
            let bg = &mut self.bg_params[bgp];
            bg.priority_mode = match (sfprmd >> (i * 2)) & 3 {
                1 => PriorityMode::PerCharacter,
                2 => PriorityMode::PerDot,
                _ => PriorityMode::PerScreen,
            };
            bg.special_color_calc_mode = match (sfccmd >> (i * 2)) & 3 {
                1 => SpecialColorCalcMode::PerCharacter,
                2 => SpecialColorCalcMode::PerDot,
                3 => SpecialColorCalcMode::ColorDataMsb,
                _ => SpecialColorCalcMode::PerScreen,
            };
            bg.special_function_select = ((sfsel >> i) & 1) as usize;
            bg.line_color_screen_enable = lnclen & (1 << i) != 0;
            bg.shadow_enable = sdctl & (1 << i) != 0;
            bg.mosaic_enable = mzctl & (1 << i) != 0;
        }
        self.sprite_params.line_color_screen_enable = lnclen & 0x20 != 0;
        self.back_screen_params.shadow_enable = sdctl & 0x20 != 0;

        let ccrlb = self.raw_reg(CCRLB);
        self.line_screen_params.color_calc_ratio = (ccrlb & 0x1F) as u8;
        self.back_screen_params.color_calc_ratio = ((ccrlb >> 8) & 0x1F) as u8;
    }

    fn update_windows(&mut self) {
        for i in 0..2 {
            let base = WPSX0 + (i as u32) * 8;
            self.window_params[i] = WindowParams {
                start_x: (self.raw_reg(base) & 0x3FF) as i16,
                start_y: (self.raw_reg(base + 2) & 0x1FF) as i16,
                end_x: (self.raw_reg(base + 4) & 0x3FF) as i16,
                end_y: (self.raw_reg(base + 6) & 0x1FF) as i16,
                line_window_enable: self.window_params[i].line_window_enable,
                line_window_address: self.window_params[i].line_window_address,
            };
            let lwta_base = if i == 0 { LWTA0U } else { LWTA1U };
            let upper = self.raw_reg(lwta_base);
            let lower = self.raw_reg(lwta_base + 2);
            self.window_params[i].line_window_enable = upper & 0x8000 != 0;
            self.window_params[i].line_window_address =
                ((((upper & 7) as u32) << 16 | lower as u32) << 1) & 0x7_FFFE;
        }

        // Negative X coordinates (sign-extend from 10/9 bits)
        for params in &mut self.window_params {
            params.start_x = sign_extend(params.start_x as u16, 10);
            params.end_x = sign_extend(params.end_x as u16, 10);
        }

        let wctla = self.raw_reg(WCTLA);
        let wctlb = self.raw_reg(WCTLB);
        let wctlc = self.raw_reg(WCTLC);
        let wctld = self.raw_reg(WCTLD);
        self.bg_params[BGP_NBG0].window_set = WindowSet::from_byte((wctla & 0xFF) as u8, false);
        self.bg_params[BGP_NBG1].window_set = WindowSet::from_byte((wctla >> 8) as u8, false);
        self.bg_params[BGP_NBG2].window_set = WindowSet::from_byte((wctlb & 0xFF) as u8, false);
        self.bg_params[BGP_NBG3].window_set = WindowSet::from_byte((wctlb >> 8) as u8, false);
        self.bg_params[BGP_RBG0].window_set = WindowSet::from_byte((wctlc & 0xFF) as u8, true);
        self.sprite_params.window_set = WindowSet::from_byte((wctlc >> 8) as u8, true);
        self.common_rot_params.window_set = WindowSet::from_byte((wctld & 0xFF) as u8, false);
        self.color_calc_params.window_set = WindowSet::from_byte((wctld >> 8) as u8, true);
    }

    fn update_sprite_params(&mut self) {
        let spctl = self.raw_reg(SPCTL);

        let mut priorities = [0u8; 8];
        let mut ratios = [0u8; 8];
        for i in 0..4 {
            let pris = self.raw_reg(PRISA + (i as u32) * 2);
            priorities[i * 2] = (pris & 7) as u8;
            priorities[i * 2 + 1] = ((pris >> 8) & 7) as u8;
            let ccrs = self.raw_reg(CCRSA + (i as u32) * 2);
            ratios[i * 2] = (ccrs & 0x1F) as u8;
            ratios[i * 2 + 1] = ((ccrs >> 8) & 0x1F) as u8;
        }

        let sp = &mut self.sprite_params;
        sp.sprite_type = SpriteType::from_bits((spctl & 0xF) as u8);
        sp.mixed_format = spctl & 0x10 != 0;
        sp.use_sprite_window = spctl & 0x20 != 0;
        sp.color_calc_value = ((spctl >> 8) & 7) as u8;
        sp.color_calc_cond = match (spctl >> 12) & 3 {
            0 => SpriteColorCalcCondition::PriorityLessOrEqual,
            1 => SpriteColorCalcCondition::PriorityEqual,
            2 => SpriteColorCalcCondition::PriorityGreaterOrEqual,
            _ => SpriteColorCalcCondition::MsbOne,
        };
        sp.priorities = priorities;
        sp.color_calc_ratios = ratios;
    }

    fn update_rotation_params(&mut self) {
        let rpmd = self.raw_reg(RPMD);
        self.common_rot_params.rot_param_mode = match rpmd & 3 {
            0 => RotationParamMode::ParamA,
            1 => RotationParamMode::ParamB,
            2 => RotationParamMode::Coefficient,
            _ => RotationParamMode::Window,
        };
        let rptau = self.raw_reg(RPTAU);
        let rptal = self.raw_reg(RPTAL);
        self.common_rot_params.base_address =
            (((((rptau & 7) as u32) << 16) | rptal as u32) << 1) & 0x7_FF7C;

        let rprctl = self.raw_reg(RPRCTL);
        let ktctl = self.raw_reg(KTCTL);
        let ktaof = self.raw_reg(KTAOF);
        let plsz = self.raw_reg(PLSZ);
        let mpofr = self.raw_reg(MPOFR);
        let ovpnra = self.raw_reg(OVPNRA);
        let ovpnrb = self.raw_reg(OVPNRB);

        for i in 0..2 {
            let shift = (i as u32) * 8;
            let rp = &mut self.rot_params[i];
            // RPRCTL flags are sticky until the next parameter table read
            rp.read_xst |= (rprctl >> shift) & 0x01 != 0;
            rp.read_yst |= (rprctl >> shift) & 0x02 != 0;
            rp.read_kast |= (rprctl >> shift) & 0x04 != 0;

            let kt = (ktctl >> shift) & 0xFF;
            rp.coeff_table_enable = kt & 0x01 != 0;
            rp.coeff_data_mode = match (kt >> 1) & 3 {
                0 => CoefficientDataMode::ScaleCoeffXY,
                1 => CoefficientDataMode::ScaleCoeffX,
                2 => CoefficientDataMode::ScaleCoeffY,
                _ => CoefficientDataMode::ViewpointX,
            };
            rp.coeff_data_size = (((kt >> 3) & 1) as u32) & 1;
            rp.coeff_use_line_color = kt & 0x10 != 0;
            rp.coeff_table_address_offset = (((ktaof >> shift) & 7) as u32) << 26;

            let (size, over) = if i == 0 {
                ((plsz >> 8) & 3, (plsz >> 10) & 3)
            } else {
                ((plsz >> 12) & 3, (plsz >> 14) & 3)
            };
            rp.page_shift_h = (size & 1) as u32;
            rp.page_shift_v = if size == 3 { 1 } else { 0 };
            rp.screen_over_process = match over {
                0 => ScreenOverProcess::Repeat,
                1 => ScreenOverProcess::RepeatChar,
                2 => ScreenOverProcess::Transparent,
                _ => ScreenOverProcess::Fixed512,
            };
            rp.screen_over_pattern_name = if i == 0 { ovpnra } else { ovpnrb };

            let map_offset = ((mpofr >> (i * 4)) & 7) as u32;
            rp.bitmap_base_address = (map_offset << 17) & 0x7_FFFF;

            // Plane base addresses: RBG0 uses its own character layout,
            // RBG1 borrows NBG0's.
            for (slot, bgp) in [BGP_RBG0, BGP_NBG0].into_iter().enumerate() {
                let bg = &self.bg_params[bgp];
                let page_size_shift = page_size_shift(bg.cell_size_shift, bg.char_mode);
                let plane_size_shift = page_size_shift + rp.page_shift_h + rp.page_shift_v;
                for plane in 0..16 {
                    let reg = self.raw[(0x050 + i * 0x10 + (plane / 2) * 2) / 2];
                    let index = ((reg >> ((plane & 1) * 8)) & 0x3F) as u32;
                    rp.page_base_addresses[slot][plane] =
                        (((map_offset << 6) | index) << plane_size_shift) & 0x7_FFFF;
                }
            }
        }
    }

    fn update_line_back_params(&mut self) {
        let lctau = self.raw_reg(LCTAU);
        let lctal = self.raw_reg(LCTAL);
        self.line_screen_params.per_line = lctau & 0x8000 != 0;
        self.line_screen_params.base_address =
            ((((lctau & 7) as u32) << 16 | lctal as u32) << 1) & 0x7_FFFE;

        let bktau = self.raw_reg(BKTAU);
        let bktal = self.raw_reg(BKTAL);
        self.back_screen_params.per_line = bktau & 0x8000 != 0;
        self.back_screen_params.base_address =
            ((((bktau & 7) as u32) << 16 | bktal as u32) << 1) & 0x7_FFFE;
    }

    fn update_color_offsets(&mut self) {
        let clofen = self.raw_reg(CLOFEN);
        let clofsl = self.raw_reg(CLOFSL);
        // Register bit order: NBG0-3, RBG0, BACK, SPRITE
        const LAYER_OF_BIT: [usize; 7] = [
            LYR_NBG0_RBG1,
            LYR_NBG1,
            LYR_NBG2,
            LYR_NBG3,
            LYR_RBG0,
            LYR_BACK,
            LYR_SPRITE,
        ];
        for (bit, layer) in LAYER_OF_BIT.into_iter().enumerate() {
            self.color_offset_enable[layer] = clofen & (1 << bit) != 0;
            self.color_offset_select[layer] = ((clofsl >> bit) & 1) as usize;
        }

        for i in 0..2 {
            let base = COAR + (i as u32) * 6;
            let r = sign_extend(self.raw_reg(base) & 0x1FF, 9);
            let g = sign_extend(self.raw_reg(base + 2) & 0x1FF, 9);
            let b = sign_extend(self.raw_reg(base + 4) & 0x1FF, 9);
            self.color_offset[i] = ColorOffset {
                r,
                g,
                b,
                non_zero: r != 0 || g != 0 || b != 0,
            };
        }
    }

    /// Derives the compositor layer enable set from BGON and the hardware
    /// color-format sharing constraints.
    fn update_enabled_layers(&mut self) {
        let rbg1 = self.bg_enabled[5];
        let nbg0_fmt = self.bg_params[BGP_NBG0].color_format;
        let nbg1_fmt = self.bg_params[BGP_NBG1].color_format;

        self.bg_params[BGP_RBG0].enabled = self.bg_enabled[4];
        self.bg_params[BGP_NBG0].enabled = self.bg_enabled[0] || rbg1;
        self.bg_params[BGP_NBG1].enabled = self.bg_enabled[1] && !rbg1 && nbg0_fmt != ColorFormat::Rgb888;
        self.bg_params[BGP_NBG2].enabled = self.bg_enabled[2]
            && !rbg1
            && matches!(nbg0_fmt, ColorFormat::Palette16 | ColorFormat::Palette256);
        self.bg_params[BGP_NBG3].enabled = self.bg_enabled[3]
            && !rbg1
            && nbg0_fmt != ColorFormat::Rgb888
            && matches!(nbg1_fmt, ColorFormat::Palette16 | ColorFormat::Palette256);

        self.layer_enabled = [
            true,
            self.bg_params[BGP_RBG0].enabled,
            self.bg_params[BGP_NBG0].enabled,
            self.bg_params[BGP_NBG1].enabled,
            self.bg_params[BGP_NBG2].enabled,
            self.bg_params[BGP_NBG3].enabled,
        ];
    }
}

/// Page size shift: a page is 64x64 cells; 2x2-cell characters quarter the
/// entry count, two-word characters double the entry size.
#[inline]
pub const fn page_size_shift(cell_size_shift: u32, char_mode: CharacterMode) -> u32 {
    let two_word = matches!(char_mode, CharacterMode::TwoWord);
    13 - 2 * cell_size_shift + two_word as u32
}

#[inline]
fn sign_extend(value: u16, bits: u32) -> i16 {
    let shift = 16 - bits;
    ((value << shift) as i16) >> shift
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tvmd_decode() {
        let mut regs = Vdp2Regs::new(false);
        regs.tvmd_dirty = false;
        regs.write(TVMD, 0x8000 | (0b11 << 6) | (0b01 << 4) | 0b010);
        assert!(regs.display_enable);
        assert_eq!(regs.hres, 2);
        assert_eq!(regs.vres, 1);
        assert_eq!(regs.interlace, InterlaceMode::DoubleDensity);
        assert!(regs.tvmd_dirty);

        // DISP only becomes visible after the top-border latch
        assert!(!regs.display_enable_latch);
        regs.latch_tvmd();
        assert!(regs.display_enable_latch);
    }

    #[test]
    fn test_cycle_pattern_decode() {
        let mut regs = Vdp2Regs::new(false);
        regs.write(CYCA0L, 0x0F44);
        assert_eq!(regs.cycle_patterns[0][0], 0x0);
        assert_eq!(regs.cycle_patterns[0][1], 0xF);
        assert_eq!(regs.cycle_patterns[0][2], 0x4);
        assert_eq!(regs.cycle_patterns[0][3], 0x4);
        regs.write(CYCA0L + 2, 0xEEEE);
        assert_eq!(regs.cycle_patterns[0][4], 0xE);
        assert_eq!(regs.cycle_patterns[0][7], 0xE);
    }

    #[test]
    fn test_bgon_and_priorities() {
        let mut regs = Vdp2Regs::new(false);
        regs.write(BGON, 0x0001);
        regs.write(PRINA, 0x0605);
        regs.write(CHCTLA, 0x0010); // NBG0: 256-color palette
        assert!(regs.bg_enabled[0]);
        assert!(regs.bg_params[BGP_NBG0].enabled);
        assert_eq!(regs.bg_params[BGP_NBG0].priority_number, 5);
        assert_eq!(regs.bg_params[BGP_NBG1].priority_number, 6);
        assert_eq!(regs.bg_params[BGP_NBG0].color_format, ColorFormat::Palette256);
    }

    #[test]
    fn test_nbg2_disabled_by_nbg0_color_format() {
        let mut regs = Vdp2Regs::new(false);
        regs.write(BGON, 0b0101); // NBG0 + NBG2
        assert!(regs.bg_params[BGP_NBG2].enabled);

        // NBG0 in 2048-color mode steals NBG2's resources
        regs.write(CHCTLA, 0x0020);
        assert!(!regs.bg_params[BGP_NBG2].enabled);
    }

    #[test]
    fn test_page_base_addresses() {
        let mut regs = Vdp2Regs::new(false);
        // NBG0: 1-word characters, 1x1 cells, plane size 1x1
        regs.write(PNCN0, 0x8000);
        regs.write(0x040, 0x0201); // planes A=1, B=2
        let bg = &regs.bg_params[BGP_NBG0];
        // 1-word 1x1 page = 0x2000 bytes
        assert_eq!(bg.page_base_addresses[0], 0x2000);
        assert_eq!(bg.page_base_addresses[1], 0x4000);
    }

    #[test]
    fn test_color_offset_sign_extension() {
        let mut regs = Vdp2Regs::new(false);
        regs.write(COAR, 0x1FF); // -1
        regs.write(COAR + 2, 0x0FF); // +255
        assert_eq!(regs.color_offset[0].r, -1);
        assert_eq!(regs.color_offset[0].g, 255);
        assert!(regs.color_offset[0].non_zero);
    }

    #[test]
    fn test_window_set_decode() {
        let mut regs = Vdp2Regs::new(false);
        // NBG0: W0 enabled inverted, logic AND
        regs.write(WCTLA, 0x0083);
        let set = regs.bg_params[BGP_NBG0].window_set;
        assert!(set.enabled[0]);
        assert!(set.inverted[0]);
        assert!(!set.enabled[1]);
        assert_eq!(set.logic, WindowLogic::And);
    }

    #[test]
    fn test_external_vcnt_applies_skip_and_shift() {
        let mut regs = Vdp2Regs::new(false);
        regs.vcnt = 100;
        regs.vcnt_skip = 0;
        assert_eq!(regs.external_vcnt(), 100);
        regs.vcnt_shift = 1;
        assert_eq!(regs.external_vcnt(), 50);
        regs.vcnt_skip = 0x1C9;
        assert_eq!(regs.external_vcnt(), 50 + 0x1C9);
    }
}
