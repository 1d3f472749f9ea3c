//! H.263 头部模板: 序列包装头, 图像头与 GOB 头.
//!
//! 标准源格式使用 PTYPE 中的 3 位格式码; 其他尺寸使用 PLUSPTYPE,
//! 仅在 UFEP 置位 (帧内图像) 时携带自定义图像格式块.

use log::debug;
use topaz_core::{ElementStream, FrameType, StartCodeKind, Standard, TokenKind, TopazError, TopazResult};

use crate::assembler::HeaderAssembler;
use crate::template::{HeaderKind, HeaderTemplate};

/// 图像起始码 (22 位: 0000 0000 0000 0000 1 00000)
const PICTURE_START_CODE: u32 = 32;
/// GOB 起始码 (17 位)
const GOB_START_CODE: u32 = 1;

/// 源格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceFormat {
    SubQcif = 1,
    Qcif = 2,
    Cif = 3,
    FourCif = 4,
    /// 自定义格式, 经由 PLUSPTYPE
    Custom = 7,
}

impl SourceFormat {
    pub fn from_dimensions(width: u32, height: u32) -> Self {
        match (width, height) {
            (128, 96) => Self::SubQcif,
            (176, 144) => Self::Qcif,
            (352, 288) => Self::Cif,
            (704, 576) => Self::FourCif,
            _ => Self::Custom,
        }
    }

    /// 每帧的 GOB 数 (自定义格式按 16 行一个 GOB)
    pub fn gob_count(self, height: u32) -> u32 {
        match self {
            Self::SubQcif => 6,
            Self::Qcif => 9,
            Self::Cif => 18,
            Self::FourCif => 18,
            Self::Custom => height.div_ceil(16),
        }
    }
}

/// 图像编码类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PictureCodingType {
    Intra = 0,
    Inter = 1,
}

/// 图像头参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PictureParams {
    pub coding_type: PictureCodingType,
    pub source_format: SourceFormat,
    pub width: u32,
    pub height: u32,
    /// 主机解析时写入的时间参考
    pub temporal_reference: u8,
    /// 像素宽高比码 (PAR)
    pub aspect_ratio: u32,
}

impl PictureParams {
    pub fn new(coding_type: PictureCodingType, width: u32, height: u32) -> Self {
        Self {
            coding_type,
            source_format: SourceFormat::from_dimensions(width, height),
            width,
            height,
            temporal_reference: 0,
            aspect_ratio: 1,
        }
    }

    /// UFEP: 帧内图像更新完整的 PLUSPTYPE 选项
    pub fn ufep(&self) -> bool {
        self.coding_type == PictureCodingType::Intra
    }
}

/// 写入序列包装头 (VOS 与 VO 起始码, 短头模式)
pub fn write_sequence_header(es: &mut ElementStream, profile_and_level: u8) -> TopazResult<()> {
    es.begin_start_code(StartCodeKind::Raw)?;
    es.write_bits(0x1B0, 32)?;
    es.write_byte(profile_and_level)?;
    es.write_bits(0x1B5, 32)?;
    es.write_flag(false)?;
    es.write_bits(1, 4)?;
    es.write_flag(false)?;
    es.write_bits(1, 2)?;
    es.write_bits(0x100, 32)
}

/// 写入主机解析的图像头
pub fn write_host_picture_header(es: &mut ElementStream, params: &PictureParams) -> TopazResult<()> {
    es.begin_start_code(StartCodeKind::Raw)?;
    es.write_bits(PICTURE_START_CODE, 22)?;
    es.write_byte(params.temporal_reference)?;
    write_ptype(es, params, params.aspect_ratio)
}

/// 写入固件解析的图像头, 时间参考由 TEMPORAL_REFERENCE 令牌填充
pub fn write_picture_header(es: &mut ElementStream, params: &PictureParams) -> TopazResult<()> {
    es.begin_start_code(StartCodeKind::Raw)?;
    es.write_bits(PICTURE_START_CODE, 22)?;
    es.write_token(TokenKind::TemporalReference)?;
    es.begin_raw()?;
    write_ptype(es, params, 2)
}

fn write_ptype(es: &mut ElementStream, params: &PictureParams, aspect_ratio: u32) -> TopazResult<()> {
    // 标记位, 分隔位 0, split_screen, document_camera, freeze_release
    es.write_flag(true)?;
    es.write_bits(0, 4)?;
    es.write_bits(params.source_format as u32, 3)?;

    let custom = params.source_format == SourceFormat::Custom;
    if !custom {
        es.write_bits(params.coding_type as u32, 1)?;
        // UMV, SAC, AP, PB
        es.write_bits(0, 4)?;
    } else {
        let ufep = params.ufep();
        es.write_bits(u32::from(ufep), 3)?;
        if ufep {
            // OPPTYPE: 自定义源格式, 无自定义 PCF, 可选模式全关
            es.write_bits(6, 3)?;
            es.write_flag(false)?;
            es.write_bits(0, 10)?;
            es.write_bits(8, 4)?;
        }
        // MPPTYPE
        es.write_bits(params.coding_type as u32, 3)?;
        es.write_bits(0, 2)?;
        // RTYPE
        es.write_flag(false)?;
        es.write_bits(0, 2)?;
        es.write_flag(true)?;
        es.write_flag(false)?;
        if ufep {
            // CPFMT: PAR, 宽度 (PWI = w/4 - 1), 标记位, 高度 (PHI = h/4)
            es.write_bits(aspect_ratio, 4)?;
            es.write_bits((params.width >> 2).saturating_sub(1), 9)?;
            es.write_flag(true)?;
            es.write_bits(params.height >> 2, 9)?;
        }
    }

    es.write_token(TokenKind::FrameQScale)?;
    es.begin_raw()?;
    if !custom {
        // CPM
        es.write_flag(false)?;
    }
    // PEI
    es.write_flag(false)
}

/// 写入主机解析的 GOB 头
pub fn write_host_gob_header(es: &mut ElementStream, gob_number: u8, frame_id: u8) -> TopazResult<()> {
    es.begin_start_code(StartCodeKind::Raw)?;
    es.write_bits(GOB_START_CODE, 17)?;
    es.write_bits(u32::from(gob_number), 5)?;
    es.write_bits(u32::from(frame_id), 2)?;
    es.write_token(TokenKind::SliceQScale)
}

/// 写入固件解析的 GOB 头
pub fn write_gob_header(es: &mut ElementStream) -> TopazResult<()> {
    es.begin_start_code(StartCodeKind::Raw)?;
    es.write_bits(GOB_START_CODE, 17)?;
    es.write_token(TokenKind::SliceNum)?;
    es.write_token(TokenKind::GobFrameId)?;
    es.begin_raw()?;
    es.write_token(TokenKind::SliceQScale)
}

/// H.263 会话设置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct H263Settings {
    pub width: u32,
    pub height: u32,
    pub profile_and_level: u8,
}

impl H263Settings {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            profile_and_level: 8,
        }
    }
}

/// H.263 头部组装器
#[derive(Debug, Clone)]
pub struct H263Assembler {
    settings: H263Settings,
    source_format: SourceFormat,
}

impl H263Assembler {
    pub fn new(settings: H263Settings) -> TopazResult<Self> {
        let source_format = SourceFormat::from_dimensions(settings.width, settings.height);
        if source_format == SourceFormat::Custom {
            let (w, h) = (settings.width, settings.height);
            if w % 4 != 0 || h % 4 != 0 || !(4..=2048).contains(&w) || !(4..=1152).contains(&h) {
                return Err(TopazError::config(format!(
                    "H.263 自定义图像尺寸无效: {}x{}",
                    w, h
                )));
            }
        }
        debug!(
            "H.263 组装器: {}x{}, 源格式 {:?}",
            settings.width, settings.height, source_format
        );
        Ok(Self {
            settings,
            source_format,
        })
    }

    pub fn source_format(&self) -> SourceFormat {
        self.source_format
    }

    pub fn gob_count(&self) -> u32 {
        self.source_format.gob_count(self.settings.height)
    }
}

impl HeaderAssembler for H263Assembler {
    fn standard(&self) -> Standard {
        Standard::H263
    }

    fn name(&self) -> &str {
        "h263"
    }

    fn sequence_headers(&self) -> TopazResult<Vec<HeaderTemplate>> {
        let level = self.settings.profile_and_level;
        Ok(vec![HeaderTemplate::build(HeaderKind::Sequence, |es| {
            write_sequence_header(es, level)
        })?])
    }

    fn frame_headers(&self, frame_type: FrameType) -> TopazResult<Vec<HeaderTemplate>> {
        let coding_type = match frame_type {
            FrameType::Idr | FrameType::Intra => PictureCodingType::Intra,
            FrameType::InterP | FrameType::InterPIdr => PictureCodingType::Inter,
            FrameType::InterB => {
                return Err(TopazError::Unsupported("H.263 不支持 B 帧".into()));
            }
        };
        let params = PictureParams::new(coding_type, self.settings.width, self.settings.height);
        Ok(vec![
            HeaderTemplate::build(HeaderKind::Slice(frame_type), |es| {
                write_picture_header(es, &params)
            })?,
            HeaderTemplate::build(HeaderKind::Gob, write_gob_header)?,
        ])
    }
}
