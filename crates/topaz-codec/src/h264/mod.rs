//! H.264 头部模板.
//!
//! 子模块:
//! - `sequence`: SPS, VUI/HRD, MVC 子集 SPS, 量化矩阵
//! - `picture`: PPS
//! - `slice`: 固件解析与主机解析的切片头, MVC 前缀 NAL 与切片扩展
//! - `sei`: AUD, SEI 缓冲周期与图像定时
//!
//! `H264Assembler` 把会话级设置推导为各参数集记录并编译模板.

pub mod picture;
pub mod sei;
pub mod sequence;
pub mod slice;

use log::debug;
use topaz_core::{FrameType, Standard, TopazError, TopazResult};

use crate::assembler::HeaderAssembler;
use crate::template::{HeaderKind, HeaderTemplate};

pub use picture::PictureParams;
pub use sei::{BufferingPeriodSei, ClockTimestamp, PictureTimingSei};
pub use sequence::{CropParams, ScalingMatrix, SequenceParams, VuiParams};
pub use slice::{FirmwareSliceParams, HostSliceParams, MvcView, SliceType, WeightedPrediction};

/// NAL 起始码前缀长度 (00 00 00 01)
pub const START_CODE_PREFIX_BYTES: u32 = 4;
/// MVC 从属视图的 SPS 编号
pub const MVC_SPS_ID: u32 = 1;
/// MVC 从属视图的 PPS 编号
pub const MVC_PPS_ID: u32 = 1;
/// MVC 视图数
pub const MAX_MVC_VIEWS: u32 = 2;

/// H.264 Profile
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum H264Profile {
    Baseline,
    #[default]
    Main,
    High,
    High444,
}

impl H264Profile {
    /// profile_idc
    pub const fn profile_idc(self) -> u8 {
        match self {
            Self::Baseline => 66,
            Self::Main => 77,
            Self::High => 100,
            Self::High444 => 244,
        }
    }

    /// 由 profile_idc 解析
    pub fn from_idc(idc: u8) -> TopazResult<Self> {
        match idc {
            66 => Ok(Self::Baseline),
            77 => Ok(Self::Main),
            100 => Ok(Self::High),
            244 => Ok(Self::High444),
            _ => Err(TopazError::Unsupported(format!(
                "不支持的 H.264 profile_idc: {}",
                idc
            ))),
        }
    }

    /// 由名称解析 (baseline, main, high, high444)
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "baseline" | "bp" => Some(Self::Baseline),
            "main" | "mp" => Some(Self::Main),
            "high" | "hp" => Some(Self::High),
            "high444" | "h444p" => Some(Self::High444),
            _ => None,
        }
    }

    /// constraint_set 标志字节 (含 6 位保留零)
    ///
    /// Baseline 置 constraint_set0, Main 置 constraint_set1, 1b 级别额外置 constraint_set3.
    pub const fn constraint_flags(self, level: H264Level) -> u8 {
        let set3 = if level.is_1b() { 0x10 } else { 0 };
        match self {
            Self::Baseline => 0x80 | set3,
            Self::Main => 0x40 | set3,
            _ => 0,
        }
    }

    /// High 系列需要写入色度格式与量化矩阵块
    pub const fn is_high(self) -> bool {
        matches!(self, Self::High | Self::High444)
    }
}

/// H.264 Level
///
/// 内部编码与 level_idc 一致, 1b 级别编码为 9 (配置中也接受 111).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct H264Level(u8);

impl H264Level {
    const LEVEL_1B: u8 = 9;
    const VALID: [u8; 15] = [10, 11, 12, 13, 20, 21, 22, 30, 31, 32, 40, 41, 42, 50, 51];

    /// 由配置值解析
    pub fn from_idc(idc: u32) -> TopazResult<Self> {
        match idc {
            111 | 9 => Ok(Self(Self::LEVEL_1B)),
            v if v <= u32::from(u8::MAX) && Self::VALID.contains(&(v as u8)) => Ok(Self(v as u8)),
            _ => Err(TopazError::config(format!("无效的 H.264 level: {}", idc))),
        }
    }

    pub const fn is_1b(self) -> bool {
        self.0 == Self::LEVEL_1B
    }

    /// 写入码流的 level_idc (1b 写作 11)
    pub const fn level_idc(self) -> u8 {
        if self.is_1b() { 11 } else { self.0 }
    }

    /// 内部编码
    pub const fn code(self) -> u8 {
        self.0
    }
}

impl Default for H264Level {
    fn default() -> Self {
        Self(40)
    }
}

/// H.264 会话级设置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct H264Settings {
    pub width: u32,
    pub height: u32,
    pub profile: H264Profile,
    /// level_idc, 1b 写作 9 或 111
    pub level_idc: u32,
    /// 场编码
    pub interlaced: bool,
    pub max_num_ref_frames: u32,
    pub cabac: bool,
    pub transform_8x8: bool,
    pub constrained_intra: bool,
    pub chroma_qp_offset: i32,
    /// 自定义量化矩阵掩码, 非零时 SPS 携带量化矩阵
    pub custom_quant_mask: u32,
    /// 量化矩阵改由 PPS 携带
    pub pps_scaling: bool,
    pub use_default_scaling_list: bool,
    /// 主机提供的量化矩阵, `None` 时由固件填充
    pub scaling_matrix: Option<ScalingMatrix>,
    pub lossless: bool,
    pub vui: Option<VuiParams>,
    pub deblock_idc: u8,
    /// 双视图 MVC 码流
    pub mvc: bool,
    /// 本编码实例负责的视图
    pub view: MvcView,
    /// 每帧前插入访问单元分隔符
    pub aud: bool,
    /// 插入 SEI 缓冲周期与图像定时 (需要 VUI)
    pub hrd_sei: bool,
    pub long_term_reference: bool,
    /// 编译 B 帧模板
    pub b_frames: bool,
}

impl H264Settings {
    /// 默认设置: Main, level 4.0, CABAC, 单参考帧
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            profile: H264Profile::Main,
            level_idc: 40,
            interlaced: false,
            max_num_ref_frames: 1,
            cabac: true,
            transform_8x8: false,
            constrained_intra: false,
            chroma_qp_offset: 0,
            custom_quant_mask: 0,
            pps_scaling: false,
            use_default_scaling_list: false,
            scaling_matrix: None,
            lossless: false,
            vui: None,
            deblock_idc: 0,
            mvc: false,
            view: MvcView::None,
            aud: true,
            hrd_sei: false,
            long_term_reference: false,
            b_frames: false,
        }
    }

    /// 检查设置组合
    pub fn validate(&self) -> TopazResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(TopazError::config("H.264 图像尺寸不能为 0"));
        }
        if self.profile == H264Profile::Baseline && (self.cabac || self.b_frames) {
            return Err(TopazError::config("Baseline 不支持 CABAC 与 B 帧"));
        }
        if self.transform_8x8 && !self.profile.is_high() {
            return Err(TopazError::config("8x8 变换需要 High profile"));
        }
        if self.hrd_sei && self.vui.is_none() {
            return Err(TopazError::config("SEI 缓冲周期与图像定时需要 VUI/HRD 参数"));
        }
        if self.mvc == (self.view == MvcView::None) {
            return Err(TopazError::config("MVC 码流必须指定视图, 非 MVC 码流不能指定视图"));
        }
        if self.deblock_idc > 2 {
            return Err(TopazError::config(format!(
                "disable_deblocking_filter_idc 超出范围: {}",
                self.deblock_idc
            )));
        }
        Ok(())
    }

    /// 宏块总数
    pub fn macroblock_count(&self) -> u32 {
        self.width.div_ceil(16) * self.height.div_ceil(16)
    }
}

/// H.264 头部组装器
#[derive(Debug, Clone)]
pub struct H264Assembler {
    settings: H264Settings,
    sequence: SequenceParams,
    picture: PictureParams,
}

impl H264Assembler {
    /// 校验设置并推导 SPS/PPS 记录
    pub fn new(settings: H264Settings) -> TopazResult<Self> {
        settings.validate()?;
        let level = H264Level::from_idc(settings.level_idc)?;
        let mut sequence = SequenceParams::derive(
            settings.profile,
            level,
            settings.width,
            settings.height,
            settings.interlaced,
            settings.max_num_ref_frames,
            settings.custom_quant_mask,
            settings.pps_scaling,
            settings.use_default_scaling_list,
            settings.lossless,
        )?;
        sequence.vui = settings.vui;
        sequence.scaling = settings.scaling_matrix.clone();

        let picture = PictureParams::derive(
            settings.cabac,
            settings.transform_8x8,
            settings.constrained_intra,
            settings.chroma_qp_offset,
            settings.view == MvcView::Dependent,
        );
        debug!(
            "H.264 组装器: {:?} level {}, 视图 {:?}",
            settings.profile,
            level.level_idc(),
            settings.view
        );
        Ok(Self {
            settings,
            sequence,
            picture,
        })
    }

    pub fn settings(&self) -> &H264Settings {
        &self.settings
    }

    pub fn sequence_params(&self) -> &SequenceParams {
        &self.sequence
    }

    pub fn picture_params(&self) -> &PictureParams {
        &self.picture
    }

    /// 固件解析切片头参数
    pub fn slice_params(&self, frame_type: FrameType) -> FirmwareSliceParams {
        let mut params = FirmwareSliceParams::new(
            frame_type,
            self.settings.deblock_idc,
            self.settings.cabac,
            self.settings.interlaced,
        );
        params.view = self.settings.view;
        params.long_term_reference = self.settings.long_term_reference;
        params
    }

    /// 预计算的跳过 P 切片, 覆盖整帧宏块
    pub fn skip_slice_header(
        &self,
        display_frame_number: u32,
        frame_num_id: u32,
    ) -> TopazResult<HeaderTemplate> {
        let params = HostSliceParams::prepare(
            false,
            false,
            false,
            self.settings.deblock_idc,
            display_frame_number,
            frame_num_id,
            self.settings.cabac,
            self.settings.interlaced,
            0,
            None,
            false,
        );
        let mb_count = self.settings.macroblock_count();
        HeaderTemplate::build(HeaderKind::SkipSlice, |es| {
            slice::write_skip_p_slice(es, &params, mb_count)
        })
    }

    fn emits_aud(&self) -> bool {
        self.settings.aud && self.settings.view != MvcView::Dependent
    }
}

impl HeaderAssembler for H264Assembler {
    fn standard(&self) -> Standard {
        Standard::H264
    }

    fn name(&self) -> &str {
        "h264"
    }

    fn sequence_headers(&self) -> TopazResult<Vec<HeaderTemplate>> {
        let mut headers = Vec::with_capacity(3);
        headers.push(HeaderTemplate::build(HeaderKind::Sequence, |es| {
            sequence::write_sequence_header(es, &self.sequence)
        })?);
        if self.settings.mvc {
            headers.push(HeaderTemplate::build(HeaderKind::MvcSequence, |es| {
                sequence::write_mvc_sequence_header(es, &self.sequence)
            })?);
        }
        headers.push(HeaderTemplate::build(HeaderKind::Picture, |es| {
            picture::write_picture_header(es, &self.picture)
        })?);
        Ok(headers)
    }

    fn frame_headers(&self, frame_type: FrameType) -> TopazResult<Vec<HeaderTemplate>> {
        if frame_type == FrameType::InterB && !self.settings.b_frames {
            return Err(TopazError::config("未启用 B 帧"));
        }
        let mut headers = Vec::with_capacity(4);
        if self.emits_aud() {
            headers.push(HeaderTemplate::build(HeaderKind::Aud, sei::write_aud_header)?);
        }
        if self.settings.hrd_sei {
            if frame_type.is_intra() {
                let bp = BufferingPeriodSei {
                    initial_delay_length: self
                        .sequence
                        .vui
                        .map_or(sequence::INITIAL_CPB_REMOVAL_DELAY_SIZE, |v| {
                            v.initial_cpb_removal_delay_length_minus1 + 1
                        }),
                    ..Default::default()
                };
                headers.push(HeaderTemplate::build(HeaderKind::SeiBufferingPeriod, |es| {
                    sei::write_buffering_period_sei(es, &bp)
                })?);
            }
            let pt = PictureTimingSei::default();
            headers.push(HeaderTemplate::build(HeaderKind::SeiPictureTiming, |es| {
                sei::write_picture_timing_sei(es, &pt)
            })?);
        }
        let params = self.slice_params(frame_type);
        headers.push(HeaderTemplate::build(HeaderKind::Slice(frame_type), |es| {
            slice::write_slice_header(es, &params)
        })?);
        Ok(headers)
    }

    fn frame_types(&self) -> Vec<FrameType> {
        let mut types = vec![FrameType::Idr, FrameType::Intra, FrameType::InterP];
        if self.settings.b_frames {
            types.push(FrameType::InterB);
        }
        if self.settings.view == MvcView::Dependent {
            types.push(FrameType::InterPIdr);
        }
        types
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_mapping() {
        let level = H264Level::from_idc(111).unwrap();
        assert!(level.is_1b());
        assert_eq!(level.level_idc(), 11);
        assert_eq!(level.code(), 9);
        assert!(!H264Level::from_idc(11).unwrap().is_1b());
        assert!(H264Level::from_idc(14).unwrap_err().is_config());
    }

    #[test]
    fn test_constraint_flags() {
        let l40 = H264Level::from_idc(40).unwrap();
        let l1b = H264Level::from_idc(9).unwrap();
        assert_eq!(H264Profile::Baseline.constraint_flags(l40), 0x80);
        assert_eq!(H264Profile::Baseline.constraint_flags(l1b), 0x90);
        assert_eq!(H264Profile::Main.constraint_flags(l1b), 0x50);
        assert_eq!(H264Profile::High.constraint_flags(l40), 0);
    }

    #[test]
    fn test_profile_parse() {
        assert_eq!(H264Profile::from_idc(100).unwrap(), H264Profile::High);
        assert!(H264Profile::from_idc(88).unwrap_err().is_config());
        assert_eq!(H264Profile::from_name("Baseline"), Some(H264Profile::Baseline));
    }

    #[test]
    fn test_default_assembly() {
        let assembler = H264Assembler::new(H264Settings::new(1920, 1080)).unwrap();
        let seq = assembler.sequence_headers().unwrap();
        let kinds: Vec<_> = seq.iter().map(HeaderTemplate::kind).collect();
        assert_eq!(kinds, vec![HeaderKind::Sequence, HeaderKind::Picture]);

        let frame = assembler.frame_headers(FrameType::Idr).unwrap();
        let kinds: Vec<_> = frame.iter().map(HeaderTemplate::kind).collect();
        assert_eq!(kinds, vec![HeaderKind::Aud, HeaderKind::Slice(FrameType::Idr)]);
    }

    #[test]
    fn test_b_frames_disabled() {
        let assembler = H264Assembler::new(H264Settings::new(320, 240)).unwrap();
        assert!(assembler.frame_headers(FrameType::InterB).is_err());
        assert!(!assembler.frame_types().contains(&FrameType::InterB));
    }

    #[test]
    fn test_hrd_sei_headers() {
        let mut settings = H264Settings::new(640, 480);
        settings.vui = Some(VuiParams::from_rate_control(30, 2_000_000, 4_000_000, true));
        settings.hrd_sei = true;
        let assembler = H264Assembler::new(settings).unwrap();

        let idr: Vec<_> = assembler
            .frame_headers(FrameType::Idr)
            .unwrap()
            .iter()
            .map(HeaderTemplate::kind)
            .collect();
        assert_eq!(
            idr,
            vec![
                HeaderKind::Aud,
                HeaderKind::SeiBufferingPeriod,
                HeaderKind::SeiPictureTiming,
                HeaderKind::Slice(FrameType::Idr),
            ]
        );
        let p = assembler.frame_headers(FrameType::InterP).unwrap();
        assert_eq!(p.len(), 3, "P 帧不携带缓冲周期");
    }

    #[test]
    fn test_mvc_dependent_view() {
        let mut settings = H264Settings::new(1280, 720);
        settings.mvc = true;
        settings.view = MvcView::Dependent;
        let assembler = H264Assembler::new(settings).unwrap();
        assert_eq!(assembler.picture_params().pps_id, MVC_PPS_ID);

        let seq = assembler.sequence_headers().unwrap();
        assert_eq!(seq[1].kind(), HeaderKind::MvcSequence);
        assert!(assembler.frame_types().contains(&FrameType::InterPIdr));

        let frame = assembler.frame_headers(FrameType::InterP).unwrap();
        assert_eq!(frame.len(), 1, "从属视图不插入 AUD");
    }

    #[test]
    fn test_invalid_settings() {
        let mut settings = H264Settings::new(640, 480);
        settings.profile = H264Profile::Baseline;
        assert!(H264Assembler::new(settings.clone()).unwrap_err().is_config());

        settings.cabac = false;
        settings.hrd_sei = true;
        assert!(H264Assembler::new(settings.clone()).is_err());

        settings.hrd_sei = false;
        settings.mvc = true;
        assert!(H264Assembler::new(settings).is_err());
    }

    #[test]
    fn test_skip_slice_template() {
        let assembler = H264Assembler::new(H264Settings::new(176, 144)).unwrap();
        assert_eq!(assembler.settings().macroblock_count(), 99);
        let tpl = assembler.skip_slice_header(1, 1).unwrap();
        assert_eq!(tpl.kind(), HeaderKind::SkipSlice);
        assert!(tpl.to_bytes().is_ok());
    }
}
