//! 编码会话编排.
//!
//! 会话建立时依次完成:
//! 1. 推导码率控制参数
//! 2. 生成偏置/lambda 表
//! 3. 生成 mini-GOP 结构
//! 4. 编译序列级模板 (只编译一次)
//!
//! 逐帧模板在首次请求时编译并缓存. 某个帧类型编译失败不会影响已有的
//! 序列级模板与其他帧类型的缓存. 会话之间不共享任何状态, 丢弃会话即取消.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use log::{debug, info};
use serde::Serialize;
use topaz_codec::bias::{BiasParams, BiasTables, RegisterWrite};
use topaz_codec::gop::MiniGop;
use topaz_codec::h263::{H263Assembler, H263Settings};
use topaz_codec::h264::{H264Assembler, H264Settings, MvcView, VuiParams};
use topaz_codec::jpeg::{JpegHeader, JpegHeaderWriter, JpegSettings};
use topaz_codec::mpeg4::{Mpeg4Assembler, Mpeg4Settings, VbvParams};
use topaz_codec::rc::{RcInput, RcMode, RcParams};
use topaz_codec::{HeaderAssembler, HeaderTemplate};
use topaz_core::{FrameType, Standard, TopazError, TopazResult};

use crate::config::SessionConfig;

/// 模板编译器: 视频标准走元素流组装器, JPEG 走字节级写入
enum Compiler {
    Video(Box<dyn HeaderAssembler>),
    Jpeg {
        writer: JpegHeaderWriter,
        header: JpegHeader,
    },
}

/// 码率控制与偏置表 (JPEG 会话没有这两项)
struct VideoTables {
    rc: RcParams,
    bias: BiasTables,
    gop: MiniGop,
}

/// 单个编码会话
pub struct EncodeSession {
    config: SessionConfig,
    standard: Standard,
    tables: Option<VideoTables>,
    compiler: Compiler,
    sequence: Vec<HeaderTemplate>,
    frames: BTreeMap<FrameType, Vec<HeaderTemplate>>,
}

impl EncodeSession {
    /// 校验配置并建立会话
    pub fn new(config: SessionConfig) -> TopazResult<Self> {
        config.validate()?;
        let standard = config.standard()?;

        let (tables, compiler) = if standard == Standard::Jpeg {
            let writer = JpegHeaderWriter::new(jpeg_settings(&config)?)?;
            let header = writer.header()?;
            debug!("JPEG 头部: {} 段, {} 字节", header.segments().len(), header.len());
            (None, Compiler::Jpeg { writer, header })
        } else {
            let rc = RcParams::derive(&rc_input(&config, standard)?)?;
            let bias = BiasTables::generate(standard, &bias_params(&config, &rc))?;
            let gop = MiniGop::new(config.gop_kind()?, config.gop.b_frames, config.gop.ref_spacing)?;
            let assembler = video_assembler(&config, standard, &rc, &gop)?;
            (Some(VideoTables { rc, bias, gop }), Compiler::Video(assembler))
        };

        let sequence = match &compiler {
            Compiler::Video(assembler) => assembler.sequence_headers()?,
            Compiler::Jpeg { .. } => Vec::new(),
        };
        info!(
            "编码会话建立: {} {}x{}, 序列模板 {} 个",
            standard,
            config.width,
            config.height,
            sequence.len()
        );

        Ok(Self {
            config,
            standard,
            tables,
            compiler,
            sequence,
            frames: BTreeMap::new(),
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn standard(&self) -> Standard {
        self.standard
    }

    pub fn rc_params(&self) -> Option<&RcParams> {
        self.tables.as_ref().map(|t| &t.rc)
    }

    pub fn bias_tables(&self) -> Option<&BiasTables> {
        self.tables.as_ref().map(|t| &t.bias)
    }

    pub fn mini_gop(&self) -> Option<&MiniGop> {
        self.tables.as_ref().map(|t| &t.gop)
    }

    /// 序列级模板, 按码流顺序
    pub fn sequence_headers(&self) -> &[HeaderTemplate] {
        &self.sequence
    }

    pub fn jpeg_header(&self) -> Option<&JpegHeader> {
        match &self.compiler {
            Compiler::Jpeg { header, .. } => Some(header),
            Compiler::Video(_) => None,
        }
    }

    pub fn jpeg_writer(&self) -> Option<&JpegHeaderWriter> {
        match &self.compiler {
            Compiler::Jpeg { writer, .. } => Some(writer),
            Compiler::Video(_) => None,
        }
    }

    /// 本会话需要的帧类型
    pub fn frame_types(&self) -> Vec<FrameType> {
        match &self.compiler {
            Compiler::Video(assembler) => assembler.frame_types(),
            Compiler::Jpeg { .. } => Vec::new(),
        }
    }

    /// 获取帧类型的逐帧模板, 首次请求时编译
    pub fn frame_headers(&mut self, frame_type: FrameType) -> TopazResult<&[HeaderTemplate]> {
        let Compiler::Video(assembler) = &self.compiler else {
            return Err(TopazError::Unsupported("JPEG 没有逐帧模板".into()));
        };
        match self.frames.entry(frame_type) {
            Entry::Occupied(entry) => Ok(entry.into_mut().as_slice()),
            Entry::Vacant(entry) => {
                let headers = assembler.frame_headers(frame_type)?;
                debug!(
                    "{} 帧模板编译完成: {} 个, 元素 {}",
                    frame_type,
                    headers.len(),
                    headers.iter().map(HeaderTemplate::element_count).sum::<usize>()
                );
                Ok(entry.insert(headers).as_slice())
            }
        }
    }

    /// 编译全部需要的帧类型
    pub fn compile_all_frames(&mut self) -> TopazResult<()> {
        for frame_type in self.frame_types() {
            self.frame_headers(frame_type)?;
        }
        Ok(())
    }

    /// 已缓存的逐帧模板
    pub fn cached_frames(&self) -> impl Iterator<Item = (FrameType, &[HeaderTemplate])> {
        self.frames.iter().map(|(ft, headers)| (*ft, headers.as_slice()))
    }

    /// 帧类型对应的偏置寄存器写入序列
    pub fn register_writes(&self, frame_type: FrameType) -> TopazResult<Vec<RegisterWrite>> {
        let tables = self
            .tables
            .as_ref()
            .ok_or_else(|| TopazError::Unsupported("JPEG 没有偏置表".into()))?;
        Ok(tables.bias.register_writes(frame_type, self.config.bias.pipes))
    }

    /// 生成会话摘要 (仅包含已编译的逐帧模板)
    pub fn report(&self) -> TopazResult<SessionReport> {
        let mut templates = Vec::with_capacity(self.sequence.len() + self.frames.len());
        for template in &self.sequence {
            templates.push(TemplateSummary::new(template, None)?);
        }
        for (frame_type, headers) in &self.frames {
            for template in headers {
                templates.push(TemplateSummary::new(template, Some(*frame_type))?);
            }
        }

        Ok(SessionReport {
            version: crate::version().to_string(),
            standard: self.standard.name().to_string(),
            width: self.config.width,
            height: self.config.height,
            rate_control: self.tables.as_ref().map(|t| RcSummary::new(&t.rc)),
            gop: self.tables.as_ref().map(|t| GopSummary::new(&t.gop)),
            bias: self
                .tables
                .as_ref()
                .map(|t| BiasSummary::new(&t.bias, self.config.bias.pipes)),
            templates,
            jpeg: self.jpeg_header().map(|header| JpegSummary {
                segments: header
                    .segments()
                    .iter()
                    .map(|segment| segment.kind.name())
                    .collect(),
                bytes: header.len(),
                hex: to_hex(&header.to_bytes()),
            }),
        })
    }
}

fn aligned16(value: u32) -> u32 {
    value.div_ceil(16) * 16
}

fn rc_input(config: &SessionConfig, standard: Standard) -> TopazResult<RcInput> {
    let rc = &config.rate_control;
    let mut input = RcInput::new(standard, aligned16(config.width), aligned16(config.height));
    input.mode = config.rc_mode()?;
    input.bits_per_second = rc.bits_per_second;
    input.frame_rate = rc.frame_rate;
    input.intra_period = rc.intra_period;
    input.b_frames = u32::from(config.gop.b_frames);
    input.initial_qp = rc.initial_qp;
    input.min_qp = rc.min_qp;
    input.buffer_tenths = rc.buffer_tenths;
    input.bu_size = rc.bu_size;
    input.scene_detect_disable = rc.scene_detect_disable;
    input.hierarchical = config.gop_kind()? == topaz_codec::MiniGopKind::Hierarchical;
    Ok(input)
}

fn bias_params(config: &SessionConfig, rc: &RcParams) -> BiasParams {
    let bias = &config.bias;
    let mut params = BiasParams::new(rc.mode.is_enabled());
    params.rc_biases = bias.rc_biases;
    params.lambda_sad = bias.lambda_sad;
    params.lambda_satd = bias.lambda_satd;
    params.satd_table = bias.satd_table;
    params.overrides = bias.overrides();
    params.zero_detection_disable = bias.zero_detection_disable;
    params.fcode = config.mpeg4.fcode;
    params
}

fn video_assembler(
    config: &SessionConfig,
    standard: Standard,
    rc: &RcParams,
    gop: &MiniGop,
) -> TopazResult<Box<dyn HeaderAssembler>> {
    let (width, height) = (config.width, config.height);
    let b_frames = gop.b_frames() > 0;
    let assembler: Box<dyn HeaderAssembler> = match standard {
        Standard::H264 => {
            let h264 = &config.h264;
            let view = config.mvc_view()?;
            let mut settings = H264Settings::new(width, height);
            settings.profile = config.h264_profile()?;
            settings.level_idc = h264.level;
            settings.interlaced = h264.interlaced;
            // B 帧需要前后两个参考
            settings.max_num_ref_frames = if b_frames {
                h264.max_num_ref_frames.max(2)
            } else {
                h264.max_num_ref_frames
            };
            settings.cabac = h264.cabac;
            settings.transform_8x8 = h264.transform_8x8;
            settings.constrained_intra = h264.constrained_intra;
            settings.chroma_qp_offset = h264.chroma_qp_offset;
            settings.deblock_idc = h264.deblock_idc;
            settings.aud = h264.aud;
            settings.hrd_sei = h264.hrd_sei;
            settings.long_term_reference = h264.long_term_reference;
            settings.b_frames = b_frames;
            settings.mvc = view != MvcView::None;
            settings.view = view;
            if h264.vui {
                settings.vui = Some(VuiParams::from_rate_control(
                    rc.frame_rate,
                    rc.bits_per_second,
                    rc.buffer_size,
                    rc.mode == RcMode::Cbr,
                ));
            }
            Box::new(H264Assembler::new(settings)?)
        }
        Standard::Mpeg4 => {
            let mut settings = Mpeg4Settings::new(width, height);
            settings.profile = config.mpeg4_profile()?;
            settings.profile_and_level_indication = config.mpeg4.profile_and_level_indication;
            settings.vop_time_increment_resolution = rc.frame_rate;
            settings.b_frames = b_frames;
            settings.search_range = config.mpeg4_search_range()?;
            if config.mpeg4.vbv {
                // 起始占用取初始延迟对应的比特数
                let occupancy = u32::try_from(rc.initial_delay.max(0)).unwrap_or(0);
                settings.vbv = Some(VbvParams::new(
                    rc.bits_per_second / 400,
                    rc.buffer_size / 16384,
                    occupancy / 64,
                ));
            }
            Box::new(Mpeg4Assembler::new(settings)?)
        }
        Standard::H263 => {
            let mut settings = H263Settings::new(width, height);
            settings.profile_and_level = config.h263.profile_and_level;
            Box::new(H263Assembler::new(settings)?)
        }
        Standard::Jpeg => {
            return Err(TopazError::Internal("JPEG 不使用元素流组装器".into()));
        }
    };
    Ok(assembler)
}

fn jpeg_settings(config: &SessionConfig) -> TopazResult<JpegSettings> {
    let mut settings = JpegSettings::new(config.width, config.height);
    settings.format = config.jpeg_format()?;
    settings.quality = config.jpeg.quality;
    settings.cores = config.jpeg.cores;
    settings.include_huffman_tables = config.jpeg.huffman_tables;
    Ok(settings)
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// 会话摘要, 供 CLI 输出
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub version: String,
    pub standard: String,
    pub width: u32,
    pub height: u32,
    pub rate_control: Option<RcSummary>,
    pub gop: Option<GopSummary>,
    pub bias: Option<BiasSummary>,
    pub templates: Vec<TemplateSummary>,
    pub jpeg: Option<JpegSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RcSummary {
    pub mode: String,
    pub bits_per_second: u32,
    pub frame_rate: u32,
    pub intra_period: u32,
    pub buffer_size: u32,
    pub initial_level: i32,
    pub initial_delay: i32,
    pub initial_qp: u32,
    pub min_qp: u32,
    pub max_qp: u32,
    pub bits_per_frame: i32,
    pub bu_per_frame: u32,
    pub scale_factor: u8,
    pub rc_scale_factor: u32,
    pub half_frame_rate: bool,
    pub flags: u32,
}

impl RcSummary {
    fn new(rc: &RcParams) -> Self {
        Self {
            mode: rc.mode.name().to_string(),
            bits_per_second: rc.bits_per_second,
            frame_rate: rc.frame_rate,
            intra_period: rc.intra_period,
            buffer_size: rc.buffer_size,
            initial_level: rc.initial_level,
            initial_delay: rc.initial_delay,
            initial_qp: rc.initial_qp,
            min_qp: rc.min_qp,
            max_qp: rc.max_qp,
            bits_per_frame: rc.bits_per_frame,
            bu_per_frame: rc.bu_per_frame,
            scale_factor: rc.scale_factor,
            rc_scale_factor: rc.rc_scale_factor,
            half_frame_rate: rc.half_frame_rate,
            flags: rc.flags.bits(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GopSummary {
    pub kind: String,
    pub b_frames: u8,
    pub words: Vec<u16>,
    pub pic_on_level: Vec<u8>,
}

impl GopSummary {
    fn new(gop: &MiniGop) -> Self {
        Self {
            kind: gop.kind().name().to_string(),
            b_frames: gop.b_frames(),
            words: gop.words(),
            pic_on_level: gop.pic_on_level().to_vec(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BiasSummary {
    pub lambda: Vec<u32>,
    pub intra: Vec<u32>,
    pub inter_p: Vec<u32>,
    pub direct_p: Vec<u32>,
    pub sz1: u32,
    pub reject_threshold: u32,
    pub cache_chunk_config: u32,
    pub seq_config_init: u32,
    /// P 帧寄存器写入次数
    pub register_writes: usize,
}

impl BiasSummary {
    fn new(bias: &BiasTables, pipes: u8) -> Self {
        Self {
            lambda: bias.lambda.to_vec(),
            intra: bias.intra.to_vec(),
            inter_p: bias.inter_p.to_vec(),
            direct_p: bias.direct_p.to_vec(),
            sz1: bias.sz1,
            reject_threshold: bias.reject_threshold,
            cache_chunk_config: bias.cache_chunk_config,
            seq_config_init: bias.seq_config_init,
            register_writes: bias.register_writes(FrameType::InterP, pipes).len(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TemplateSummary {
    pub kind: String,
    pub frame_type: Option<String>,
    pub elements: usize,
    /// 固件布局字节数
    pub bytes: usize,
    pub hex: String,
}

impl TemplateSummary {
    fn new(template: &HeaderTemplate, frame_type: Option<FrameType>) -> TopazResult<Self> {
        let wire = template.to_bytes()?;
        Ok(Self {
            kind: template.kind().name(),
            frame_type: frame_type.map(|ft| ft.name().to_string()),
            elements: template.element_count(),
            bytes: wire.len(),
            hex: to_hex(&wire),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JpegSummary {
    pub segments: Vec<String>,
    pub bytes: usize,
    pub hex: String,
}
