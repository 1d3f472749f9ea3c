//! MPEG-4 Part 2 头部模板: VOS/VO/VOL 序列头与 VOP 头.
//!
//! VOP 头有两种形式: 主机解析版本直接写入时间增量;
//! 固件版本用 MODULO_TIME_BASE 与 VOP_TIME_INCREMENT 令牌占位.
//! 未编码 VOP 仍输出字节对齐的最小头部.

use log::debug;
use topaz_core::{ElementStream, FrameType, StartCodeKind, Standard, TokenKind, TopazError, TopazResult};

use crate::assembler::HeaderAssembler;
use crate::template::{HeaderKind, HeaderTemplate};

/// visual_object_sequence_start_code
const VOS_START_CODE: u32 = 0x1B0;
/// vop_start_code
const VOP_START_CODE: u32 = 0x1B6;

/// MPEG-4 Profile
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Mpeg4Profile {
    #[default]
    Simple,
    AdvancedSimple,
}

impl Mpeg4Profile {
    /// (video_object_type_indication, video_object_layer_verid)
    const fn object_type(self) -> (u8, u32) {
        match self {
            Self::Simple => (1, 1),
            Self::AdvancedSimple => (3, 5),
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "simple" | "sp" => Some(Self::Simple),
            "advanced-simple" | "asp" => Some(Self::AdvancedSimple),
            _ => None,
        }
    }
}

/// VBV 参数, 各字段按语法拆分为高低两段
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VbvParams {
    /// 15 位
    pub first_half_bit_rate: u32,
    /// 15 位
    pub latter_half_bit_rate: u32,
    /// 15 位
    pub first_half_vbv_buffer_size: u32,
    /// 3 位
    pub latter_half_vbv_buffer_size: u32,
    /// 11 位
    pub first_half_vbv_occupancy: u32,
    /// 15 位
    pub latter_half_vbv_occupancy: u32,
}

impl VbvParams {
    /// 由码率 (400 bit/s 单位), 缓冲区 (16384 bit 单位) 与占用 (64 bit 单位) 拆分
    pub fn new(bit_rate: u32, vbv_buffer_size: u32, vbv_occupancy: u32) -> Self {
        Self {
            first_half_bit_rate: (bit_rate >> 15) & 0x7FFF,
            latter_half_bit_rate: bit_rate & 0x7FFF,
            first_half_vbv_buffer_size: (vbv_buffer_size >> 3) & 0x7FFF,
            latter_half_vbv_buffer_size: vbv_buffer_size & 0x7,
            first_half_vbv_occupancy: (vbv_occupancy >> 15) & 0x7FF,
            latter_half_vbv_occupancy: vbv_occupancy & 0x7FFF,
        }
    }
}

/// VOL 参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolParams {
    pub profile: Mpeg4Profile,
    pub profile_and_level_indication: u8,
    pub width: u32,
    pub height: u32,
    pub vop_time_increment_resolution: u32,
    /// 存在 B-VOP 时 low_delay = 0
    pub b_frames: bool,
    pub vbv: Option<VbvParams>,
}

/// 写入 VOS, VO 与 VOL 头
pub fn write_vol_header(es: &mut ElementStream, params: &VolParams) -> TopazResult<()> {
    // visual_object_sequence
    es.begin_start_code(StartCodeKind::Raw)?;
    es.write_bits(VOS_START_CODE, 32)?;
    es.write_byte(params.profile_and_level_indication)?;

    // visual_object: is_visual_object_identifier = 0, visual_object_type = video,
    // video_signal_type = 0, next_start_code 填充
    es.begin_start_code(StartCodeKind::Raw)?;
    for byte in [0, 0, 1, 0xB5] {
        es.write_byte(byte)?;
    }
    es.write_flag(false)?;
    es.write_bits(1, 4)?;
    es.write_flag(false)?;
    es.write_bits(1, 2)?;

    // video_object_start_code
    es.begin_start_code(StartCodeKind::Raw)?;
    for byte in [0, 0, 1, 0] {
        es.write_byte(byte)?;
    }

    // video_object_layer_start_code
    es.begin_start_code(StartCodeKind::Raw)?;
    for byte in [0, 0, 1, 0x20] {
        es.write_byte(byte)?;
    }
    // random_accessible_vol
    es.write_flag(false)?;
    let (object_type, verid) = params.profile.object_type();
    es.write_byte(object_type)?;
    // is_object_layer_identifier, video_object_layer_verid, video_object_layer_priority
    es.write_flag(true)?;
    es.write_bits(verid, 4)?;
    es.write_bits(1, 3)?;

    // aspect_ratio_info = 1:1
    es.write_bits(1, 4)?;
    // vol_control_parameters, chroma_format = 4:2:0, low_delay
    es.write_flag(true)?;
    es.write_bits(1, 2)?;
    es.write_flag(!params.b_frames)?;

    match &params.vbv {
        Some(vbv) => {
            es.write_flag(true)?;
            es.write_bits(vbv.first_half_bit_rate, 15)?;
            es.write_flag(true)?;
            es.write_bits(vbv.latter_half_bit_rate, 15)?;
            es.write_flag(true)?;
            es.write_bits(vbv.first_half_vbv_buffer_size, 15)?;
            es.write_flag(true)?;
            es.write_bits(vbv.latter_half_vbv_buffer_size, 3)?;
            es.write_bits(vbv.first_half_vbv_occupancy, 11)?;
            es.write_flag(true)?;
            es.write_bits(vbv.latter_half_vbv_occupancy, 15)?;
            es.write_flag(true)?;
        }
        None => es.write_flag(false)?,
    }

    // video_object_layer_shape = rectangular
    es.write_bits(0, 2)?;
    es.write_flag(true)?;
    es.write_bits(params.vop_time_increment_resolution, 16)?;
    es.write_flag(true)?;
    // fixed_vop_rate
    es.write_flag(false)?;

    es.write_flag(true)?;
    es.write_bits(params.width, 13)?;
    es.write_flag(true)?;
    es.write_bits(params.height, 13)?;
    es.write_flag(true)?;

    // interlaced, obmc_disable, sprite_enable, not_8_bit, quant_type
    es.write_flag(false)?;
    es.write_flag(true)?;
    es.write_flag(false)?;
    es.write_flag(false)?;
    es.write_flag(false)?;
    if params.profile == Mpeg4Profile::AdvancedSimple {
        // quarter_sample
        es.write_flag(false)?;
    }
    // complexity_estimation_disable, resync_marker_disable, data_partitioned
    es.write_flag(true)?;
    es.write_flag(true)?;
    es.write_flag(false)?;
    if params.profile == Mpeg4Profile::AdvancedSimple {
        // newpred_enable, reduced_resolution_vop_enable
        es.write_flag(false)?;
        es.write_flag(false)?;
    }
    // scalability
    es.write_flag(false)?;
    es.write_token(TokenKind::InsertByteAlignMpg4)
}

/// VOP 编码类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VopCodingType {
    I = 0,
    P = 1,
}

/// P-VOP 运动搜索范围 (vop_fcode_forward)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SearchRange {
    #[default]
    PlusMinus32 = 2,
    PlusMinus64 = 3,
    FcodeEq4 = 4,
}

/// 表示 `value` 需要的位数, 0 需要 1 位
pub fn bits_to_code(value: u32) -> u32 {
    if value == 0 {
        1
    } else {
        32 - value.leading_zeros()
    }
}

/// 主机解析 VOP 头参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostVopParams {
    pub coding_type: VopCodingType,
    pub vop_coded: bool,
    pub vop_time_increment: u32,
    pub vop_time_increment_resolution: u32,
    pub search_range: SearchRange,
}

/// 写入主机解析的 VOP 头
pub fn write_host_vop_header(es: &mut ElementStream, params: &HostVopParams) -> TopazResult<()> {
    let resolution = params.vop_time_increment_resolution;
    if resolution == 0 {
        return Err(TopazError::config("vop_time_increment_resolution 不能为 0"));
    }
    es.begin_start_code(StartCodeKind::Raw)?;
    es.write_bits(VOP_START_CODE, 32)?;
    es.write_bits(params.coding_type as u32, 2)?;

    let increment = params.vop_time_increment;
    if increment > 1 && increment % resolution == 0 {
        // modulo_time_base: 跨过一秒边界
        es.write_bits(0b10, 2)?;
    } else {
        es.write_flag(false)?;
    }
    es.write_flag(true)?;
    es.write_bits(increment % resolution, bits_to_code(resolution - 1))?;
    es.write_flag(true)?;

    write_vop_tail(es, params.coding_type, params.vop_coded, params.search_range)
}

/// 写入固件解析的 VOP 头
pub fn write_vop_header(
    es: &mut ElementStream,
    coding_type: VopCodingType,
    vop_coded: bool,
    search_range: SearchRange,
) -> TopazResult<()> {
    es.begin_start_code(StartCodeKind::Raw)?;
    es.write_bits(VOP_START_CODE, 32)?;
    es.write_bits(coding_type as u32, 2)?;
    es.write_token(TokenKind::ModuloTimeBase)?;
    es.begin_raw()?;
    es.write_flag(true)?;
    es.write_token(TokenKind::VopTimeIncrement)?;
    es.begin_raw()?;
    es.write_flag(true)?;

    write_vop_tail(es, coding_type, vop_coded, search_range)
}

fn write_vop_tail(
    es: &mut ElementStream,
    coding_type: VopCodingType,
    vop_coded: bool,
    search_range: SearchRange,
) -> TopazResult<()> {
    if !vop_coded {
        es.write_flag(false)?;
        return es.write_token(TokenKind::InsertByteAlignMpg4);
    }
    es.write_flag(true)?;
    if coding_type == VopCodingType::P {
        // vop_rounding_type
        es.write_flag(false)?;
    }
    // intra_dc_vlc_thr
    es.write_bits(0, 3)?;
    es.write_token(TokenKind::FrameQScale)?;
    if coding_type == VopCodingType::P {
        es.begin_raw()?;
        es.write_bits(search_range as u32, 3)?;
    }
    Ok(())
}

/// MPEG-4 会话设置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mpeg4Settings {
    pub width: u32,
    pub height: u32,
    pub profile: Mpeg4Profile,
    pub profile_and_level_indication: u8,
    pub vop_time_increment_resolution: u32,
    pub b_frames: bool,
    pub vbv: Option<VbvParams>,
    pub search_range: SearchRange,
}

impl Mpeg4Settings {
    /// 默认: Simple profile, level 3, 时间分辨率 15
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            profile: Mpeg4Profile::Simple,
            profile_and_level_indication: 3,
            vop_time_increment_resolution: 15,
            b_frames: false,
            vbv: None,
            search_range: SearchRange::PlusMinus32,
        }
    }
}

/// MPEG-4 头部组装器
#[derive(Debug, Clone)]
pub struct Mpeg4Assembler {
    settings: Mpeg4Settings,
}

impl Mpeg4Assembler {
    pub fn new(settings: Mpeg4Settings) -> TopazResult<Self> {
        if settings.width == 0
            || settings.height == 0
            || settings.width >= 1 << 13
            || settings.height >= 1 << 13
        {
            return Err(TopazError::config(format!(
                "MPEG-4 图像尺寸超出 13 位: {}x{}",
                settings.width, settings.height
            )));
        }
        if settings.vop_time_increment_resolution == 0
            || settings.vop_time_increment_resolution > 0xFFFF
        {
            return Err(TopazError::config(format!(
                "vop_time_increment_resolution 超出范围: {}",
                settings.vop_time_increment_resolution
            )));
        }
        debug!(
            "MPEG-4 组装器: {:?} PLI {}, {}x{}",
            settings.profile, settings.profile_and_level_indication, settings.width, settings.height
        );
        Ok(Self { settings })
    }

    pub fn settings(&self) -> &Mpeg4Settings {
        &self.settings
    }

    fn vol_params(&self) -> VolParams {
        VolParams {
            profile: self.settings.profile,
            profile_and_level_indication: self.settings.profile_and_level_indication,
            width: self.settings.width,
            height: self.settings.height,
            vop_time_increment_resolution: self.settings.vop_time_increment_resolution,
            b_frames: self.settings.b_frames,
            vbv: self.settings.vbv,
        }
    }
}

impl HeaderAssembler for Mpeg4Assembler {
    fn standard(&self) -> Standard {
        Standard::Mpeg4
    }

    fn name(&self) -> &str {
        "mpeg4"
    }

    fn sequence_headers(&self) -> TopazResult<Vec<HeaderTemplate>> {
        let params = self.vol_params();
        Ok(vec![HeaderTemplate::build(HeaderKind::Sequence, |es| {
            write_vol_header(es, &params)
        })?])
    }

    /// B 帧位置使用未编码的 P-VOP 模板
    fn frame_headers(&self, frame_type: FrameType) -> TopazResult<Vec<HeaderTemplate>> {
        let (coding_type, coded) = match frame_type {
            FrameType::Idr | FrameType::Intra => (VopCodingType::I, true),
            FrameType::InterP | FrameType::InterPIdr => (VopCodingType::P, true),
            FrameType::InterB => (VopCodingType::P, false),
        };
        let search_range = self.settings.search_range;
        Ok(vec![HeaderTemplate::build(HeaderKind::Slice(frame_type), |es| {
            write_vop_header(es, coding_type, coded, search_range)
        })?])
    }

    fn frame_types(&self) -> Vec<FrameType> {
        let mut types = vec![FrameType::Idr, FrameType::Intra, FrameType::InterP];
        if self.settings.b_frames {
            types.push(FrameType::InterB);
        }
        types
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use topaz_core::bitreader::BitReader;

    #[test]
    fn test_bits_to_code() {
        assert_eq!(bits_to_code(0), 1);
        assert_eq!(bits_to_code(1), 1);
        assert_eq!(bits_to_code(14), 4);
        assert_eq!(bits_to_code(29_999), 15);
    }

    #[test]
    fn test_vol_start_codes() {
        let assembler = Mpeg4Assembler::new(Mpeg4Settings::new(352, 288)).unwrap();
        let seq = assembler.sequence_headers().unwrap();
        let es = seq[0].stream();
        assert_eq!(es.len(), 5);
        assert_eq!(es.elements()[0].raw_bits().unwrap().payload(), &[0, 0, 1, 0xB0, 3]);
        assert_eq!(&es.elements()[2].raw_bits().unwrap().payload()[..], &[0, 0, 1, 0]);
        assert_eq!(es.tokens().last(), Some(TokenKind::InsertByteAlignMpg4));

        let vol = es.elements()[3].raw_bits().unwrap();
        let mut br = BitReader::new(vol.payload());
        assert_eq!(br.read_bits(32).unwrap(), 0x120);
        assert_eq!(br.read_bit().unwrap(), 0);
        assert_eq!(br.read_bits(8).unwrap(), 1, "Simple 对象类型");
        br.skip_bits(1 + 4 + 3 + 4 + 1 + 2).unwrap();
        assert_eq!(br.read_bit().unwrap(), 1, "无 B 帧时 low_delay");
        assert_eq!(br.read_bit().unwrap(), 0, "无 VBV 参数");
        br.skip_bits(3).unwrap();
        assert_eq!(br.read_bits(16).unwrap(), 15);
        br.skip_bits(3).unwrap();
        assert_eq!(br.read_bits(13).unwrap(), 352);
        br.skip_bits(1).unwrap();
        assert_eq!(br.read_bits(13).unwrap(), 288);
    }

    #[test]
    fn test_vbv_split() {
        let vbv = VbvParams::new(0x4_0001, 0x1F, 0x8_0002);
        assert_eq!(vbv.first_half_bit_rate, 8);
        assert_eq!(vbv.latter_half_bit_rate, 1);
        assert_eq!(vbv.first_half_vbv_buffer_size, 3);
        assert_eq!(vbv.latter_half_vbv_buffer_size, 7);
        assert_eq!(vbv.first_half_vbv_occupancy, 16);
        assert_eq!(vbv.latter_half_vbv_occupancy, 2);
    }

    #[test]
    fn test_host_vop_modulo_time_base() {
        let params = HostVopParams {
            coding_type: VopCodingType::P,
            vop_coded: true,
            vop_time_increment: 30,
            vop_time_increment_resolution: 15,
            search_range: SearchRange::PlusMinus64,
        };
        let mut es = ElementStream::new();
        write_host_vop_header(&mut es, &params).unwrap();
        let head = es.elements()[0].raw_bits().unwrap();
        let mut br = BitReader::new(head.payload());
        assert_eq!(br.read_bits(32).unwrap(), VOP_START_CODE);
        assert_eq!(br.read_bits(2).unwrap(), 1);
        assert_eq!(br.read_bits(2).unwrap(), 0b10, "跨秒边界");
        assert_eq!(br.read_bit().unwrap(), 1);
        assert_eq!(br.read_bits(4).unwrap(), 0);
        assert_eq!(br.read_bit().unwrap(), 1);
        assert_eq!(br.read_bit().unwrap(), 1, "vop_coded");

        let fcode = es.elements().last().unwrap().raw_bits().unwrap();
        assert_eq!(fcode.size_bits(), 3);
        assert_eq!(fcode.payload()[0] >> 5, 3);
    }

    #[test]
    fn test_host_vop_without_wrap() {
        let params = HostVopParams {
            coding_type: VopCodingType::I,
            vop_coded: true,
            vop_time_increment: 7,
            vop_time_increment_resolution: 15,
            search_range: SearchRange::PlusMinus32,
        };
        let mut es = ElementStream::new();
        write_host_vop_header(&mut es, &params).unwrap();
        let head = es.elements()[0].raw_bits().unwrap();
        let mut br = BitReader::new(head.payload());
        br.skip_bits(34).unwrap();
        assert_eq!(br.read_bit().unwrap(), 0);
        assert_eq!(br.read_bit().unwrap(), 1);
        assert_eq!(br.read_bits(4).unwrap(), 7);
        assert_eq!(es.tokens().collect::<Vec<_>>(), vec![TokenKind::FrameQScale]);
    }

    #[test]
    fn test_firmware_vop_tokens() {
        let mut es = ElementStream::new();
        write_vop_header(&mut es, VopCodingType::P, true, SearchRange::PlusMinus32).unwrap();
        assert_eq!(
            es.tokens().collect::<Vec<_>>(),
            vec![
                TokenKind::ModuloTimeBase,
                TokenKind::VopTimeIncrement,
                TokenKind::FrameQScale
            ]
        );
    }

    #[test]
    fn test_b_frame_maps_to_uncoded_vop() {
        let mut settings = Mpeg4Settings::new(176, 144);
        settings.b_frames = true;
        let assembler = Mpeg4Assembler::new(settings).unwrap();
        let headers = assembler.frame_headers(FrameType::InterB).unwrap();
        let es = headers[0].stream();
        assert_eq!(es.tokens().last(), Some(TokenKind::InsertByteAlignMpg4));
        assert!(!es.tokens().any(|t| t == TokenKind::FrameQScale));
        assert!(assembler.frame_types().contains(&FrameType::InterB));
    }

    #[test]
    fn test_invalid_dimensions() {
        assert!(Mpeg4Assembler::new(Mpeg4Settings::new(8192, 64)).unwrap_err().is_config());
    }
}
