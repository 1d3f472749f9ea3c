//! 头部模板.
//!
//! 模板是一段已编译的元素流加上用途标识. 模板在序列/GOP 建立时生成,
//! 之后只读地交给固件; 参数变化时整体替换, 不做原地修改.

use std::fmt;

use log::debug;
use topaz_core::{ElementStream, FrameType, TopazResult};

/// 模板用途
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeaderKind {
    /// 序列头 (H.264 SPS, MPEG-4 VOL, H.263 VOS)
    Sequence,
    /// MVC 从属视图的子集 SPS
    MvcSequence,
    /// 图像参数 (H.264 PPS)
    Picture,
    /// 按帧类型的图像/切片头
    Slice(FrameType),
    /// 预计算的跳过切片
    SkipSlice,
    /// H.263 GOB 头
    Gob,
    /// 访问单元分隔符
    Aud,
    /// SEI 缓冲周期
    SeiBufferingPeriod,
    /// SEI 图像定时
    SeiPictureTiming,
    /// JPEG 标记段 (SOI, DQT, DHT, DRI)
    JpegMarker,
    /// JPEG 帧头 (SOF0)
    JpegFrame,
    /// JPEG 扫描头 (SOS)
    JpegScan,
}

impl HeaderKind {
    /// 名称
    pub fn name(&self) -> String {
        match self {
            Self::Sequence => "sequence".into(),
            Self::MvcSequence => "mvc-sequence".into(),
            Self::Picture => "picture".into(),
            Self::Slice(ft) => format!("slice-{}", ft.name()),
            Self::SkipSlice => "skip-slice".into(),
            Self::Gob => "gob".into(),
            Self::Aud => "aud".into(),
            Self::SeiBufferingPeriod => "sei-bp".into(),
            Self::SeiPictureTiming => "sei-pt".into(),
            Self::JpegMarker => "jpeg-marker".into(),
            Self::JpegFrame => "jpeg-frame".into(),
            Self::JpegScan => "jpeg-scan".into(),
        }
    }
}

impl fmt::Display for HeaderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// 已编译的头部模板
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderTemplate {
    kind: HeaderKind,
    stream: ElementStream,
}

impl HeaderTemplate {
    /// 由完整的元素流创建模板
    pub fn new(kind: HeaderKind, stream: ElementStream) -> Self {
        debug!(
            "模板 {}: {} 个元素, {} 位, {} 字节",
            kind,
            stream.len(),
            stream.total_bits(),
            stream.wire_len()
        );
        Self { kind, stream }
    }

    /// 用写入闭包构建模板
    ///
    /// 闭包失败时不产生模板, 调用方持有的旧模板保持不变.
    pub fn build<F>(kind: HeaderKind, write: F) -> TopazResult<Self>
    where
        F: FnOnce(&mut ElementStream) -> TopazResult<()>,
    {
        let mut stream = ElementStream::new();
        write(&mut stream)?;
        Ok(Self::new(kind, stream))
    }

    /// 用途
    pub fn kind(&self) -> HeaderKind {
        self.kind
    }

    /// 元素流
    pub fn stream(&self) -> &ElementStream {
        &self.stream
    }

    /// 元素数量
    pub fn element_count(&self) -> usize {
        self.stream.len()
    }

    /// 序列化为固件头部结构
    pub fn to_bytes(&self) -> TopazResult<Vec<u8>> {
        self.stream.to_bytes()
    }
}
