//! JPEG 头部与扫描规划.
//!
//! JPEG 不经过元素流, 头部按字节直接写入编码缓冲区开头的固定区域
//! (`HEADER_MAX_SIZE` 字节). 写入顺序:
//! SOI, DQT (亮度/色度), 可选 DHT (附录 K 固定表), 多扫描时的 DRI, SOF0, SOS.
//!
//! 图像按 MCU 行切分为若干扫描, 各扫描分配到编码核心, 输出时扫描之间插入
//! RST 标记, 最后追加 EOI.

pub mod tables;

use bytes::{BufMut, Bytes, BytesMut};
use log::{debug, trace};
use topaz_core::{TopazError, TopazResult};

use crate::template::HeaderKind;
use tables::{
    HUFFMAN_CHROMA_AC, HUFFMAN_CHROMA_DC, HUFFMAN_LUMA_AC, HUFFMAN_LUMA_DC, QUANT_CHROMA,
    QUANT_LUMA, QUANT_TABLE_SIZE, ZIGZAG,
};

/// 每个扫描的 MCU 上限 (重启间隔为 16 位字段, 另留余量)
pub const MAX_MCU_PER_SCAN: u32 = 0x4000;
/// 单幅图像的扫描数上限 (固件的编码缓冲区表按此定长)
pub const MAX_SCANS: u32 = 7;
/// 编码缓冲区中为头部预留的字节数
pub const HEADER_MAX_SIZE: usize = 1024;

const SOI: u16 = 0xFFD8;
const SOF0: u16 = 0xFFC0;
const DHT: u16 = 0xFFC4;
const DQT: u16 = 0xFFDB;
const DRI: u16 = 0xFFDD;
const SOS: u16 = 0xFFDA;
const EOI: u16 = 0xFFD9;

/// DHT 段长度 (DC / AC)
const LH_DC: u16 = 0x1F;
const LH_AC: u16 = 0xB5;
/// DQT 段长度 (2 + 1 + 64)
const LQPQ: u16 = 0x43;

/// 图像分量数
const COMPONENTS: u8 = 3;

/// 输入表面格式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum JpegFormat {
    /// YUV 4:2:0 三平面
    Planar420,
    /// Y 平面加 UV 交织平面
    #[default]
    Nv12,
}

impl JpegFormat {
    /// 由名称解析, 其他打包格式不支持
    pub fn from_name(name: &str) -> TopazResult<Self> {
        match name.to_ascii_lowercase().as_str() {
            "planar" | "yuv420p" | "i420" => Ok(Self::Planar420),
            "nv12" | "pl12" => Ok(Self::Nv12),
            other => Err(TopazError::Unsupported(format!("不支持的 JPEG 输入格式: {}", other))),
        }
    }

    /// SOF0 中各分量的采样因子字节 (水平 << 4 | 垂直)
    ///
    /// 交织色度的 MCU 宽度按两个分量合计, 水平因子因此按 16 折算, 结果与三平面相同.
    fn sampling_factors(self) -> [u8; 3] {
        let (luma_w, luma_h) = (16u32, 16u32);
        let (chroma_w, chroma_h, shift) = match self {
            Self::Planar420 => (8u32, 8u32, 3),
            Self::Nv12 => (16u32, 8u32, 4),
        };
        let luma = (((luma_w >> 3) << 4) | (luma_h >> 3)) as u8;
        let chroma = (((chroma_w >> shift) << 4) | (chroma_h >> 3)) as u8;
        [luma, chroma, chroma]
    }
}

/// 亮度与色度量化表 (光栅序)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuantTables {
    pub luma: [u8; QUANT_TABLE_SIZE],
    pub chroma: [u8; QUANT_TABLE_SIZE],
}

impl Default for QuantTables {
    fn default() -> Self {
        Self {
            luma: QUANT_LUMA,
            chroma: QUANT_CHROMA,
        }
    }
}

impl QuantTables {
    /// 按质量 (1-100) 缩放基础量化表
    ///
    /// 质量低于 50 时比例为 5000/q, 否则为 200-2q; 结果限定在 1..=255.
    pub fn for_quality(quality: u32) -> TopazResult<Self> {
        if !(1..=100).contains(&quality) {
            return Err(TopazError::config(format!(
                "JPEG 质量超出范围 1-100: {}",
                quality
            )));
        }
        let scale = if quality < 50 {
            5000 / quality
        } else {
            200 - quality * 2
        };
        let scaled = |base: &[u8; QUANT_TABLE_SIZE]| {
            let mut out = [0u8; QUANT_TABLE_SIZE];
            for (dst, &q) in out.iter_mut().zip(base) {
                *dst = ((u32::from(q) * scale + 50) / 100).clamp(1, 255) as u8;
            }
            out
        };
        Ok(Self {
            luma: scaled(&QUANT_LUMA),
            chroma: scaled(&QUANT_CHROMA),
        })
    }
}

/// MCU 与扫描规划
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanPlan {
    pub mcus_x: u32,
    pub mcus_y: u32,
    pub total_mcus: u32,
    /// 每个扫描的 MCU 数, 总是整行
    pub mcus_per_scan: u32,
    pub scans: u32,
}

impl ScanPlan {
    /// 按 16x16 MCU 与核心数规划扫描
    ///
    /// 每个扫描从 MCU 行首开始, 以满足色度 DMA 的起始对齐.
    pub fn new(width: u32, height: u32, cores: u32) -> TopazResult<Self> {
        if width == 0 || height == 0 || width > 0xFFFF || height > 0xFFFF {
            return Err(TopazError::config(format!(
                "JPEG 图像尺寸无效: {}x{}",
                width, height
            )));
        }
        if cores == 0 {
            return Err(TopazError::config("JPEG 编码核心数不能为 0"));
        }
        let mcus_x = width.div_ceil(16);
        let mcus_y = height.div_ceil(16);
        if mcus_x > MAX_MCU_PER_SCAN {
            return Err(TopazError::capacity("JPEG 每行 MCU", MAX_MCU_PER_SCAN as usize, mcus_x as usize));
        }
        let total_mcus = mcus_x * mcus_y;

        let mut mcus_per_scan = mcus_y.div_ceil(cores) * mcus_x;
        let upper_limit = (MAX_MCU_PER_SCAN / mcus_x) * mcus_x;
        if mcus_per_scan > upper_limit {
            mcus_per_scan = upper_limit;
        }
        let scans = total_mcus.div_ceil(mcus_per_scan);
        if scans > MAX_SCANS {
            return Err(TopazError::capacity("JPEG 扫描数", MAX_SCANS as usize, scans as usize));
        }
        debug!(
            "JPEG 规划: {}x{} MCU, 每扫描 {} MCU, {} 个扫描",
            mcus_x, mcus_y, mcus_per_scan, scans
        );
        Ok(Self {
            mcus_x,
            mcus_y,
            total_mcus,
            mcus_per_scan,
            scans,
        })
    }

    /// 是否需要重启间隔
    pub fn needs_restart_interval(&self) -> bool {
        self.scans > 1
    }
}

/// 编码缓冲区划分
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodedBufferLayout {
    /// 每个扫描缓冲区的字节数 (16 字节对齐)
    pub size_per_buffer: usize,
    /// 各扫描缓冲区相对编码缓冲区起点的偏移
    pub offsets: Vec<usize>,
}

impl CodedBufferLayout {
    /// 头部区域之后按扫描数均分编码缓冲区
    pub fn partition(coded_size: usize, buffers: u32) -> TopazResult<Self> {
        if buffers == 0 {
            return Err(TopazError::config("编码缓冲区数不能为 0"));
        }
        let available = coded_size.saturating_sub(HEADER_MAX_SIZE);
        let size_per_buffer = (available / buffers as usize) & !0xF;
        if size_per_buffer == 0 {
            return Err(TopazError::capacity(
                "JPEG 编码缓冲区",
                coded_size,
                HEADER_MAX_SIZE + 16 * buffers as usize,
            ));
        }
        let offsets = (0..buffers as usize)
            .map(|i| HEADER_MAX_SIZE + i * size_per_buffer)
            .collect();
        Ok(Self {
            size_per_buffer,
            offsets,
        })
    }
}

/// JPEG 会话设置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JpegSettings {
    pub width: u32,
    pub height: u32,
    pub format: JpegFormat,
    /// `None` 使用基础量化表
    pub quality: Option<u32>,
    pub cores: u32,
    /// 写入附录 K 的固定 Huffman 表
    pub include_huffman_tables: bool,
}

impl JpegSettings {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            format: JpegFormat::Nv12,
            quality: None,
            cores: 2,
            include_huffman_tables: true,
        }
    }
}

/// 头部中的一个段
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JpegSegment {
    pub kind: HeaderKind,
    pub bytes: Bytes,
}

/// 完整的 JPEG 头部
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JpegHeader {
    segments: Vec<JpegSegment>,
}

impl JpegHeader {
    pub fn segments(&self) -> &[JpegSegment] {
        &self.segments
    }

    /// 头部总字节数
    pub fn len(&self) -> usize {
        self.segments.iter().map(|s| s.bytes.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// 拼接全部段
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.len());
        for segment in &self.segments {
            buf.put_slice(&segment.bytes);
        }
        buf.freeze()
    }
}

/// JPEG 头部生成器
#[derive(Debug, Clone)]
pub struct JpegHeaderWriter {
    settings: JpegSettings,
    tables: QuantTables,
    plan: ScanPlan,
}

impl JpegHeaderWriter {
    pub fn new(settings: JpegSettings) -> TopazResult<Self> {
        let tables = match settings.quality {
            Some(quality) => QuantTables::for_quality(quality)?,
            None => QuantTables::default(),
        };
        let plan = ScanPlan::new(settings.width, settings.height, settings.cores)?;
        Ok(Self {
            settings,
            tables,
            plan,
        })
    }

    pub fn settings(&self) -> &JpegSettings {
        &self.settings
    }

    pub fn tables(&self) -> &QuantTables {
        &self.tables
    }

    pub fn plan(&self) -> &ScanPlan {
        &self.plan
    }

    /// 生成完整头部
    pub fn header(&self) -> TopazResult<JpegHeader> {
        let mut marker = BytesMut::with_capacity(HEADER_MAX_SIZE);
        write_marker_segment(
            &mut marker,
            &self.tables,
            self.settings.include_huffman_tables,
            &self.plan,
        );
        let mut frame = BytesMut::with_capacity(8 + 3 * usize::from(COMPONENTS));
        write_frame_header(
            &mut frame,
            self.settings.width as u16,
            self.settings.height as u16,
            self.settings.format,
        );
        let mut scan = BytesMut::with_capacity(6 + 2 * usize::from(COMPONENTS));
        write_scan_header(&mut scan, COMPONENTS);

        let header = JpegHeader {
            segments: vec![
                JpegSegment {
                    kind: HeaderKind::JpegMarker,
                    bytes: marker.freeze(),
                },
                JpegSegment {
                    kind: HeaderKind::JpegFrame,
                    bytes: frame.freeze(),
                },
                JpegSegment {
                    kind: HeaderKind::JpegScan,
                    bytes: scan.freeze(),
                },
            ],
        };
        if header.len() > HEADER_MAX_SIZE {
            return Err(TopazError::capacity("JPEG 头部", HEADER_MAX_SIZE, header.len()));
        }
        debug!("JPEG 头部: {} 字节", header.len());
        Ok(header)
    }
}

/// SOI, DQT, DHT 与 DRI
pub fn write_marker_segment(
    buf: &mut BytesMut,
    tables: &QuantTables,
    include_huffman_tables: bool,
    plan: &ScanPlan,
) {
    buf.put_u16(SOI);

    for (id, table) in [(0u8, &tables.luma), (1u8, &tables.chroma)] {
        buf.put_u16(DQT);
        buf.put_u16(LQPQ);
        // Pq = 0 (8 位精度), Tq = 表号
        buf.put_u8(id);
        for &pos in &ZIGZAG {
            buf.put_u8(table[usize::from(pos)]);
        }
    }

    if include_huffman_tables {
        for (length, table) in [
            (LH_DC, &HUFFMAN_LUMA_DC[..]),
            (LH_AC, &HUFFMAN_LUMA_AC[..]),
            (LH_DC, &HUFFMAN_CHROMA_DC[..]),
            (LH_AC, &HUFFMAN_CHROMA_AC[..]),
        ] {
            buf.put_u16(DHT);
            buf.put_u16(length);
            buf.put_slice(table);
        }
    }

    if plan.needs_restart_interval() {
        buf.put_u16(DRI);
        buf.put_u16(4);
        buf.put_u16(plan.mcus_per_scan as u16);
    }
}

/// SOF0 帧头
pub fn write_frame_header(buf: &mut BytesMut, width: u16, height: u16, format: JpegFormat) {
    buf.put_u16(SOF0);
    buf.put_u16(8 + 3 * u16::from(COMPONENTS));
    // 采样精度
    buf.put_u8(8);
    buf.put_u16(height);
    buf.put_u16(width);
    buf.put_u8(COMPONENTS);
    for (i, sampling) in format.sampling_factors().into_iter().enumerate() {
        buf.put_u8(i as u8 + 1);
        buf.put_u8(sampling);
        // 量化表: 亮度 0, 色度 1
        buf.put_u8(u8::from(i != 0));
    }
}

/// SOS 扫描头
pub fn write_scan_header(buf: &mut BytesMut, components: u8) {
    buf.put_u16(SOS);
    buf.put_u16(6 + 2 * u16::from(components));
    buf.put_u8(components);
    for i in 0..components {
        buf.put_u8(i + 1);
        // DC/AC Huffman 表: 亮度 0, 色度 1
        let table = u8::from(i != 0);
        buf.put_u8((table << 4) | table);
    }
    // Ss = 0, Se = 63, Ah/Al = 0
    buf.put_u8(0);
    buf.put_u8(63);
    buf.put_u8(0);
}

/// 拼接头部与各扫描的熵编码数据
///
/// 除最后一个扫描外, 每个扫描后追加 RSTm (m 按 0-7 循环), 最后追加 EOI.
pub fn assemble(header: &JpegHeader, scans: &[&[u8]]) -> Bytes {
    let payload: usize = scans.iter().map(|s| s.len() + 2).sum();
    let mut buf = BytesMut::with_capacity(header.len() + payload);
    for segment in header.segments() {
        buf.put_slice(&segment.bytes);
    }
    let last = scans.len().saturating_sub(1);
    for (i, scan) in scans.iter().enumerate() {
        buf.put_slice(scan);
        if i < last {
            buf.put_u8(0xFF);
            buf.put_u8(0xD0 | (i as u8 & 7));
            trace!("扫描 {} 后插入 RST{}", i, i & 7);
        }
    }
    buf.put_u16(EOI);
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count_marker(bytes: &[u8], marker: u16) -> usize {
        bytes
            .windows(2)
            .filter(|w| u16::from_be_bytes([w[0], w[1]]) == marker)
            .count()
    }

    #[test]
    fn test_quality_scaling() {
        let q50 = QuantTables::for_quality(50).unwrap();
        assert_eq!(q50, QuantTables::default(), "质量 50 等于基础表");

        let q100 = QuantTables::for_quality(100).unwrap();
        assert!(q100.luma.iter().all(|&v| v == 1));

        let q1 = QuantTables::for_quality(1).unwrap();
        assert!(q1.chroma.iter().all(|&v| v == 255));

        assert!(QuantTables::for_quality(0).unwrap_err().is_config());
        assert!(QuantTables::for_quality(101).is_err());
    }

    #[test]
    fn test_quality_90_values() {
        let q = QuantTables::for_quality(90).unwrap();
        // 比例 20: (16 * 20 + 50) / 100 = 3
        assert_eq!(q.luma[0], 3);
        assert_eq!(q.chroma[63], 20);
    }

    #[test]
    fn test_single_scan_has_no_dri() {
        let writer = JpegHeaderWriter::new(JpegSettings::new(640, 480)).unwrap();
        assert_eq!(writer.plan().scans, 2, "两核时按行分成两个扫描");

        let mut settings = JpegSettings::new(640, 480);
        settings.cores = 1;
        let writer = JpegHeaderWriter::new(settings).unwrap();
        assert_eq!(writer.plan().scans, 1);
        let bytes = writer.header().unwrap().to_bytes();
        assert_eq!(count_marker(&bytes, DRI), 0);
    }

    #[test]
    fn test_three_scans_with_cap() {
        let mut settings = JpegSettings::new(2048, 4800);
        settings.quality = Some(90);
        let writer = JpegHeaderWriter::new(settings).unwrap();
        let plan = *writer.plan();
        assert_eq!(plan.mcus_x, 128);
        assert_eq!(plan.mcus_per_scan, MAX_MCU_PER_SCAN);
        assert_eq!(plan.scans, plan.total_mcus.div_ceil(plan.mcus_per_scan));
        assert_eq!(plan.scans, 3);

        let header = writer.header().unwrap();
        let marker = &header.segments()[0].bytes;
        assert_eq!(count_marker(marker, DRI), 1);
        let dri = marker.len() - 6;
        assert_eq!(&marker[dri..], &[0xFF, 0xDD, 0, 4, 0x40, 0x00]);
    }

    #[test]
    fn test_scan_count_limit() {
        let err = ScanPlan::new(1920, 1080, 16).unwrap_err();
        assert!(err.is_capacity(), "14 个扫描超出固件表长度");

        let mut settings = JpegSettings::new(1920, 1080);
        settings.cores = 16;
        assert!(JpegHeaderWriter::new(settings).unwrap_err().is_capacity());

        let plan = ScanPlan::new(1920, 1080, 7).unwrap();
        assert!(plan.scans <= MAX_SCANS);
    }

    #[test]
    fn test_header_layout() {
        let mut settings = JpegSettings::new(176, 144);
        settings.cores = 1;
        let header = JpegHeaderWriter::new(settings).unwrap().header().unwrap();
        let bytes = header.to_bytes();

        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        assert_eq!(&bytes[2..7], &[0xFF, 0xDB, 0x00, 0x43, 0x00]);
        // 之字形首项与第三项 (光栅 8)
        assert_eq!(bytes[7], 16);
        assert_eq!(bytes[9], 12);
        assert_eq!(count_marker(&bytes, DHT), 4);

        let frame = &header.segments()[1].bytes;
        assert_eq!(
            &frame[..],
            &[
                0xFF, 0xC0, 0, 17, 8, 0, 144, 0, 176, 3, 1, 0x22, 0, 2, 0x11, 1, 3, 0x11, 1
            ]
        );
        let scan = &header.segments()[2].bytes;
        assert_eq!(
            &scan[..],
            &[0xFF, 0xDA, 0, 12, 3, 1, 0x00, 2, 0x11, 3, 0x11, 0, 63, 0]
        );
        // SOI + 2 * 69 + 2 * 33 + 2 * 183 + 19 + 14
        assert_eq!(header.len(), 2 + 138 + 66 + 366 + 19 + 14);
    }

    #[test]
    fn test_planar_matches_nv12_sampling() {
        assert_eq!(
            JpegFormat::Planar420.sampling_factors(),
            JpegFormat::Nv12.sampling_factors()
        );
        assert!(JpegFormat::from_name("yuyv").unwrap_err().is_config());
    }

    #[test]
    fn test_partition() {
        let layout = CodedBufferLayout::partition(1024 + 3000, 3).unwrap();
        assert_eq!(layout.size_per_buffer, 992);
        assert_eq!(layout.offsets, vec![1024, 2016, 3008]);
        assert!(CodedBufferLayout::partition(1030, 1).unwrap_err().is_capacity());
    }

    #[test]
    fn test_assemble_restart_markers() {
        let header = JpegHeaderWriter::new(JpegSettings::new(64, 64))
            .unwrap()
            .header()
            .unwrap();
        let scans: [&[u8]; 3] = [&[1, 2], &[3], &[4, 5, 6]];
        let out = assemble(&header, &scans);
        let body = &out[header.len()..];
        assert_eq!(body, &[1, 2, 0xFF, 0xD0, 3, 0xFF, 0xD1, 4, 5, 6, 0xFF, 0xD9]);
    }
}
