//! 编码会话的 JSON 配置.
//!
//! 所有段落都带 `#[serde(default)]`, 最小配置只需给出标准与尺寸:
//!
//! ```json
//! { "standard": "h264", "width": 1280, "height": 720 }
//! ```
//!
//! 名称类字段 (标准, profile, 码率控制模式...) 在 [`SessionConfig::validate`]
//! 中统一解析, 编译任何模板之前即可报告配置错误.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use topaz_codec::bias::BiasOverrides;
use topaz_codec::gop::{MAX_B_FRAMES, MiniGopKind};
use topaz_codec::h264::{H264Level, H264Profile, MvcView};
use topaz_codec::jpeg::JpegFormat;
use topaz_codec::mpeg4::{Mpeg4Profile, SearchRange};
use topaz_codec::rc::RcMode;
use topaz_core::{Standard, TopazError, TopazResult};

/// 完整的编码会话配置
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// h264, h263, mpeg4, jpeg
    pub standard: String,
    pub width: u32,
    pub height: u32,
    pub rate_control: RateControlConfig,
    pub gop: GopConfig,
    pub h264: H264Config,
    pub mpeg4: Mpeg4Config,
    pub h263: H263Config,
    pub jpeg: JpegConfig,
    pub bias: BiasConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            standard: "h264".into(),
            width: 1280,
            height: 720,
            rate_control: RateControlConfig::default(),
            gop: GopConfig::default(),
            h264: H264Config::default(),
            mpeg4: Mpeg4Config::default(),
            h263: H263Config::default(),
            jpeg: JpegConfig::default(),
            bias: BiasConfig::default(),
        }
    }
}

/// 码率控制段
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct RateControlConfig {
    /// none, cbr, vbr, erc, vcm
    pub mode: String,
    /// 0 表示按分辨率推导
    pub bits_per_second: u32,
    pub frame_rate: u32,
    pub intra_period: u32,
    /// 0 表示自动推导
    pub initial_qp: u32,
    /// 0 表示自动推导
    pub min_qp: u32,
    /// 缓冲区长度, 0.1 秒单位
    pub buffer_tenths: u32,
    /// 每个基本单元的宏块数, 0 表示整帧
    pub bu_size: u32,
    pub scene_detect_disable: bool,
}

impl Default for RateControlConfig {
    fn default() -> Self {
        Self {
            mode: "cbr".into(),
            bits_per_second: 0,
            frame_rate: 30,
            intra_period: 30,
            initial_qp: 0,
            min_qp: 0,
            buffer_tenths: 0,
            bu_size: 0,
            scene_detect_disable: false,
        }
    }
}

/// GOP 段
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct GopConfig {
    /// flat, hierarchical
    pub kind: String,
    pub b_frames: u8,
    pub ref_spacing: u8,
}

impl Default for GopConfig {
    fn default() -> Self {
        Self {
            kind: "flat".into(),
            b_frames: 0,
            ref_spacing: 1,
        }
    }
}

/// H.264 段
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct H264Config {
    pub profile: String,
    /// level_idc, 1b 写作 9 或 111
    pub level: u32,
    pub cabac: bool,
    pub transform_8x8: bool,
    pub interlaced: bool,
    pub max_num_ref_frames: u32,
    pub constrained_intra: bool,
    pub chroma_qp_offset: i32,
    pub deblock_idc: u8,
    /// SPS 携带由码率控制推导的 VUI/HRD 参数
    pub vui: bool,
    /// 插入 SEI 缓冲周期与图像定时
    pub hrd_sei: bool,
    pub aud: bool,
    /// none, base, dependent
    pub mvc_view: String,
    pub long_term_reference: bool,
}

impl Default for H264Config {
    fn default() -> Self {
        Self {
            profile: "main".into(),
            level: 40,
            cabac: true,
            transform_8x8: false,
            interlaced: false,
            max_num_ref_frames: 1,
            constrained_intra: false,
            chroma_qp_offset: 0,
            deblock_idc: 0,
            vui: false,
            hrd_sei: false,
            aud: true,
            mvc_view: "none".into(),
            long_term_reference: false,
        }
    }
}

/// MPEG-4 段
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Mpeg4Config {
    /// simple, advanced-simple
    pub profile: String,
    pub profile_and_level_indication: u8,
    /// vop_fcode_forward: 2, 3, 4
    pub fcode: u32,
    /// VOL 携带由码率控制推导的 VBV 参数
    pub vbv: bool,
}

impl Default for Mpeg4Config {
    fn default() -> Self {
        Self {
            profile: "simple".into(),
            profile_and_level_indication: 3,
            fcode: 2,
            vbv: false,
        }
    }
}

/// H.263 段
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct H263Config {
    pub profile_and_level: u8,
}

impl Default for H263Config {
    fn default() -> Self {
        Self {
            profile_and_level: 8,
        }
    }
}

/// JPEG 段
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct JpegConfig {
    /// nv12, planar
    pub format: String,
    /// 1..=100, 缺省使用基础量化表
    pub quality: Option<u32>,
    pub cores: u32,
    pub huffman_tables: bool,
}

impl Default for JpegConfig {
    fn default() -> Self {
        Self {
            format: "nv12".into(),
            quality: None,
            cores: 2,
            huffman_tables: true,
        }
    }
}

/// 偏置表段
///
/// 覆盖值缺省为未设置; 码率控制关闭且 `rc_biases` 为 false 时,
/// 各标准要求的覆盖值必须给出.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct BiasConfig {
    pub rc_biases: bool,
    pub lambda_sad: u32,
    pub lambda_satd: u32,
    pub satd_table: usize,
    pub intra16: Option<u32>,
    pub inter_mb: Option<u32>,
    pub inter_mb_b: Option<u32>,
    pub direct_vec: Option<u32>,
    pub ipe_skip_vec: Option<u32>,
    pub zero_detection_disable: bool,
    /// 逐帧写入偏置寄存器的流水线数
    pub pipes: u8,
}

impl Default for BiasConfig {
    fn default() -> Self {
        Self {
            rc_biases: true,
            lambda_sad: 0,
            lambda_satd: 0,
            satd_table: 0,
            intra16: None,
            inter_mb: None,
            inter_mb_b: None,
            direct_vec: None,
            ipe_skip_vec: None,
            zero_detection_disable: false,
            pipes: 1,
        }
    }
}

impl BiasConfig {
    pub fn overrides(&self) -> BiasOverrides {
        // 历史哨兵值同样视为未设置
        let raw = |v: Option<u32>| v.and_then(BiasOverrides::from_raw);
        BiasOverrides {
            intra16: raw(self.intra16),
            inter_mb: raw(self.inter_mb),
            inter_mb_b: raw(self.inter_mb_b),
            direct_vec: raw(self.direct_vec),
            ipe_skip_vec: raw(self.ipe_skip_vec),
        }
    }
}

impl SessionConfig {
    /// 从 JSON 文本解析
    pub fn from_json_str(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("解析会话配置 JSON 失败")
    }

    /// 从文件加载
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("读取会话配置失败, path={}", path.display()))?;
        Self::from_json_str(&text).with_context(|| format!("会话配置无效, path={}", path.display()))
    }

    /// 序列化为格式化 JSON
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("序列化会话配置失败")
    }

    pub fn standard(&self) -> TopazResult<Standard> {
        self.standard.parse()
    }

    pub fn rc_mode(&self) -> TopazResult<RcMode> {
        RcMode::from_name(&self.rate_control.mode)
    }

    pub fn gop_kind(&self) -> TopazResult<MiniGopKind> {
        match self.gop.kind.to_ascii_lowercase().as_str() {
            "flat" => Ok(MiniGopKind::Flat),
            "hierarchical" | "hier" => Ok(MiniGopKind::Hierarchical),
            other => Err(TopazError::config(format!("未知 mini-GOP 类型: {other}"))),
        }
    }

    pub fn h264_profile(&self) -> TopazResult<H264Profile> {
        H264Profile::from_name(&self.h264.profile).ok_or_else(|| {
            TopazError::Unsupported(format!("不支持的 H.264 profile: {}", self.h264.profile))
        })
    }

    pub fn mvc_view(&self) -> TopazResult<MvcView> {
        match self.h264.mvc_view.to_ascii_lowercase().as_str() {
            "none" | "" => Ok(MvcView::None),
            "base" => Ok(MvcView::Base),
            "dependent" => Ok(MvcView::Dependent),
            other => Err(TopazError::config(format!("未知 MVC 视图: {other}"))),
        }
    }

    pub fn mpeg4_profile(&self) -> TopazResult<Mpeg4Profile> {
        Mpeg4Profile::from_name(&self.mpeg4.profile).ok_or_else(|| {
            TopazError::Unsupported(format!("不支持的 MPEG-4 profile: {}", self.mpeg4.profile))
        })
    }

    pub fn mpeg4_search_range(&self) -> TopazResult<SearchRange> {
        match self.mpeg4.fcode {
            2 => Ok(SearchRange::PlusMinus32),
            3 => Ok(SearchRange::PlusMinus64),
            4 => Ok(SearchRange::FcodeEq4),
            other => Err(TopazError::config(format!("vop_fcode_forward 超出范围: {other}"))),
        }
    }

    pub fn jpeg_format(&self) -> TopazResult<JpegFormat> {
        JpegFormat::from_name(&self.jpeg.format)
    }

    /// 检查配置
    ///
    /// 只解析与所选标准相关的段落, 其余段落保持默认即可.
    pub fn validate(&self) -> TopazResult<()> {
        let standard = self.standard()?;
        if self.width == 0 || self.height == 0 {
            return Err(TopazError::config(format!(
                "图像尺寸无效: {}x{}",
                self.width, self.height
            )));
        }

        if standard == Standard::Jpeg {
            self.jpeg_format()?;
            match self.jpeg.quality {
                Some(quality) if !(1..=100).contains(&quality) => {
                    return Err(TopazError::config(format!("JPEG 质量超出范围: {quality}")));
                }
                _ => {}
            }
            if self.jpeg.cores == 0 {
                return Err(TopazError::config("JPEG 编码核数不能为 0"));
            }
            return Ok(());
        }

        self.rc_mode()?;
        self.gop_kind()?;
        if self.gop.b_frames > MAX_B_FRAMES {
            return Err(TopazError::config(format!(
                "B 帧数超出范围: {} (最大 {MAX_B_FRAMES})",
                self.gop.b_frames
            )));
        }
        if self.bias.pipes == 0 {
            return Err(TopazError::config("流水线数不能为 0"));
        }

        match standard {
            Standard::H264 => {
                self.h264_profile()?;
                self.mvc_view()?;
                H264Level::from_idc(self.h264.level)?;
                if self.h264.hrd_sei && !self.h264.vui {
                    return Err(TopazError::config("hrd_sei 需要同时开启 vui"));
                }
            }
            Standard::Mpeg4 => {
                self.mpeg4_profile()?;
                self.mpeg4_search_range()?;
            }
            Standard::H263 => {
                if self.gop.b_frames > 0 {
                    return Err(TopazError::Unsupported("H.263 不支持 B 帧".into()));
                }
            }
            Standard::Jpeg => {}
        }
        Ok(())
    }
}
