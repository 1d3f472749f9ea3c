//! 头部元素定义.
//!
//! 元素流由三类元素组成:
//! - 起始码元素: 标记紧随其后的字节对齐起始码前缀 (流起始 / 头部中间)
//! - 原始数据元素: 最多 120 位的字面比特, MSB first
//! - 令牌: 不携带比特, 由固件在提交或编码时填入具体值
//!
//! 令牌的数值编码是主机与固件之间的线协议, 集中在 [`TokenKind::wire_code`] 中定义.

use std::fmt;

/// 单个原始数据元素可容纳的最大位数
pub const RAW_ELEMENT_MAX_BITS: u8 = 120;

/// 原始数据元素载荷的最大字节数
pub const RAW_ELEMENT_MAX_BYTES: usize = (RAW_ELEMENT_MAX_BITS / 8) as usize;

/// 起始码元素类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StartCodeKind {
    /// 头部起始处的起始码 (ELEMENT_STARTCODE_RAWDATA)
    Raw,
    /// 头部中间的起始码, 例如前缀 NAL 之后的切片 (ELEMENT_STARTCODE_MIDHDR)
    Mid,
}

/// 固件填充的令牌类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    /// 当前图像 QP
    Qp,
    /// 当前切片 QP
    SliceQp,
    /// MPEG-4 / H.263 帧级量化步长
    FrameQScale,
    /// H.263 GOB 级量化步长
    SliceQScale,
    /// H.264 字节对齐 (rbsp_trailing_bits)
    InsertByteAlignH264,
    /// MPEG-4 字节对齐
    InsertByteAlignMpg4,
    /// MPEG-2 字节对齐
    InsertByteAlignMpg2,
    /// MPEG-2 VBV 延迟
    VbvMpg2,
    /// MPEG-2 时间参考
    TemporalRefMpg2,
    /// 当前宏块地址 (first_mb_in_slice)
    CurrMbNr,
    /// frame_num
    FrameNum,
    /// H.263 时间参考
    TemporalReference,
    /// H.263 扩展时间参考
    ExtendedTr,
    /// idr_pic_id
    IdrPicId,
    /// pic_order_cnt_lsb
    PicOrderCnt,
    /// H.263 GOB 帧标识
    GobFrameId,
    /// MPEG-4 vop_time_increment
    VopTimeIncrement,
    /// MPEG-4 modulo_time_base
    ModuloTimeBase,
    /// bottom_field_flag
    BottomField,
    /// 切片号 (H.263 GOB 号)
    SliceNum,
    /// MPEG-2 切片垂直位置
    Mpeg2SliceVerticalPos,
    /// MPEG-2 帧内切片标志
    Mpeg2IsIntraSlice,
    /// MPEG-2 图像结构
    Mpeg2PictureStructure,
    /// nal_ref_idc
    Reference,
    /// dec_ref_pic_marking (自适应标记)
    Adaptive,
    /// direct_spatial_mv_pred_flag
    DirectSpatialMvFlag,
    /// num_ref_idx_active_override
    NumRefIdxActive,
    /// 参考列表 L0 重排序
    ReorderL0,
    /// 参考列表 L1 重排序
    ReorderL1,
    /// MVC temporal_id
    TemporalId,
    /// MVC anchor_pic_flag
    AnchorPicFlag,
    /// SEI 缓冲周期: initial_cpb_removal_delay
    BphSeiNalInitialCpbRemovalDelay,
    /// SEI 缓冲周期: initial_cpb_removal_delay_offset
    BphSeiNalInitialCpbRemovalDelayOffset,
    /// SEI 图像定时: cpb_removal_delay
    PthSeiNalCpbRemovalDelay,
    /// SEI 图像定时: dpb_output_delay
    PthSeiNalDpbOutputDelay,
    /// 加权预测表
    SliceWeightedPredictionStruct,
    /// 自定义量化矩阵
    CustomQuant,
}

impl TokenKind {
    /// 全部令牌类型, 按线协议编码升序
    pub const ALL: [TokenKind; 37] = [
        Self::Qp,
        Self::SliceQp,
        Self::FrameQScale,
        Self::SliceQScale,
        Self::InsertByteAlignH264,
        Self::InsertByteAlignMpg4,
        Self::InsertByteAlignMpg2,
        Self::VbvMpg2,
        Self::TemporalRefMpg2,
        Self::CurrMbNr,
        Self::FrameNum,
        Self::TemporalReference,
        Self::ExtendedTr,
        Self::IdrPicId,
        Self::PicOrderCnt,
        Self::GobFrameId,
        Self::VopTimeIncrement,
        Self::ModuloTimeBase,
        Self::BottomField,
        Self::SliceNum,
        Self::Mpeg2SliceVerticalPos,
        Self::Mpeg2IsIntraSlice,
        Self::Mpeg2PictureStructure,
        Self::Reference,
        Self::Adaptive,
        Self::DirectSpatialMvFlag,
        Self::NumRefIdxActive,
        Self::ReorderL0,
        Self::ReorderL1,
        Self::TemporalId,
        Self::AnchorPicFlag,
        Self::BphSeiNalInitialCpbRemovalDelay,
        Self::BphSeiNalInitialCpbRemovalDelayOffset,
        Self::PthSeiNalCpbRemovalDelay,
        Self::PthSeiNalDpbOutputDelay,
        Self::SliceWeightedPredictionStruct,
        Self::CustomQuant,
    ];

    /// 固件约定的元素类型编码
    pub const fn wire_code(self) -> u32 {
        match self {
            Self::Qp => 3,
            Self::SliceQp => 4,
            Self::FrameQScale => 5,
            Self::SliceQScale => 6,
            Self::InsertByteAlignH264 => 7,
            Self::InsertByteAlignMpg4 => 8,
            Self::InsertByteAlignMpg2 => 9,
            Self::VbvMpg2 => 10,
            Self::TemporalRefMpg2 => 11,
            Self::CurrMbNr => 12,
            Self::FrameNum => 13,
            Self::TemporalReference => 14,
            Self::ExtendedTr => 15,
            Self::IdrPicId => 16,
            Self::PicOrderCnt => 17,
            Self::GobFrameId => 18,
            Self::VopTimeIncrement => 19,
            Self::ModuloTimeBase => 20,
            Self::BottomField => 21,
            Self::SliceNum => 22,
            Self::Mpeg2SliceVerticalPos => 23,
            Self::Mpeg2IsIntraSlice => 24,
            Self::Mpeg2PictureStructure => 25,
            Self::Reference => 26,
            Self::Adaptive => 27,
            Self::DirectSpatialMvFlag => 28,
            Self::NumRefIdxActive => 29,
            Self::ReorderL0 => 30,
            Self::ReorderL1 => 31,
            Self::TemporalId => 32,
            Self::AnchorPicFlag => 33,
            Self::BphSeiNalInitialCpbRemovalDelay => 34,
            Self::BphSeiNalInitialCpbRemovalDelayOffset => 35,
            Self::PthSeiNalCpbRemovalDelay => 36,
            Self::PthSeiNalDpbOutputDelay => 37,
            Self::SliceWeightedPredictionStruct => 38,
            Self::CustomQuant => 39,
        }
    }

    /// 由线协议编码查找令牌类型
    pub fn from_wire_code(code: u32) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.wire_code() == code)
    }

    /// 固件侧的名称
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Qp => "QP",
            Self::SliceQp => "SQP",
            Self::FrameQScale => "FRAMEQSCALE",
            Self::SliceQScale => "SLICEQSCALE",
            Self::InsertByteAlignH264 => "INSERTBYTEALIGN_H264",
            Self::InsertByteAlignMpg4 => "INSERTBYTEALIGN_MPG4",
            Self::InsertByteAlignMpg2 => "INSERTBYTEALIGN_MPG2",
            Self::VbvMpg2 => "VBV_MPG2",
            Self::TemporalRefMpg2 => "TEMPORAL_REF_MPG2",
            Self::CurrMbNr => "CURRMBNR",
            Self::FrameNum => "FRAME_NUM",
            Self::TemporalReference => "TEMPORAL_REFERENCE",
            Self::ExtendedTr => "EXTENDED_TR",
            Self::IdrPicId => "IDR_PIC_ID",
            Self::PicOrderCnt => "PIC_ORDER_CNT",
            Self::GobFrameId => "GOB_FRAME_ID",
            Self::VopTimeIncrement => "VOP_TIME_INCREMENT",
            Self::ModuloTimeBase => "MODULO_TIME_BASE",
            Self::BottomField => "BOTTOM_FIELD",
            Self::SliceNum => "SLICE_NUM",
            Self::Mpeg2SliceVerticalPos => "MPEG2_SLICE_VERTICAL_POS",
            Self::Mpeg2IsIntraSlice => "MPEG2_IS_INTRA_SLICE",
            Self::Mpeg2PictureStructure => "MPEG2_PICTURE_STRUCTURE",
            Self::Reference => "REFERENCE",
            Self::Adaptive => "ADAPTIVE",
            Self::DirectSpatialMvFlag => "DIRECT_SPATIAL_MV_FLAG",
            Self::NumRefIdxActive => "NUM_REF_IDX_ACTIVE",
            Self::ReorderL0 => "REORDER_L0",
            Self::ReorderL1 => "REORDER_L1",
            Self::TemporalId => "TEMPORAL_ID",
            Self::AnchorPicFlag => "ANCHOR_PIC_FLAG",
            Self::BphSeiNalInitialCpbRemovalDelay => "BPH_SEI_NAL_INITIAL_CPB_REMOVAL_DELAY",
            Self::BphSeiNalInitialCpbRemovalDelayOffset => {
                "BPH_SEI_NAL_INITIAL_CPB_REMOVAL_DELAY_OFFSET"
            }
            Self::PthSeiNalCpbRemovalDelay => "PTH_SEI_NAL_CPB_REMOVAL_DELAY",
            Self::PthSeiNalDpbOutputDelay => "PTH_SEI_NAL_DPB_OUTPUT_DELAY",
            Self::SliceWeightedPredictionStruct => "SLICEWEIGHTEDPREDICTIONSTRUCT",
            Self::CustomQuant => "CUSTOM_QUANT",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// 原始比特载荷
///
/// 最多 120 位, MSB first 打包. 写满后由元素流自动开启后继元素.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RawBits {
    /// 已写入位数
    size: u8,
    /// 载荷字节
    bytes: [u8; RAW_ELEMENT_MAX_BYTES],
}

impl RawBits {
    /// 创建空载荷
    pub fn new() -> Self {
        Self::default()
    }

    /// 已写入位数
    pub fn size_bits(&self) -> u8 {
        self.size
    }

    /// 是否已达到 120 位上限
    pub fn is_full(&self) -> bool {
        self.size >= RAW_ELEMENT_MAX_BITS
    }

    /// 当前字节中剩余的空闲位数 (1-8)
    pub fn free_bits_in_byte(&self) -> u32 {
        8 - u32::from(self.size & 7)
    }

    /// 有效载荷字节 (末字节低位补零)
    pub fn payload(&self) -> &[u8] {
        &self.bytes[..usize::from(self.size).div_ceil(8)]
    }

    /// 向当前字节追加 `n` 位
    ///
    /// 调用方保证 `n` 不超过当前字节的空闲位数且元素未满.
    pub(crate) fn push(&mut self, bits: u8, n: u32) {
        let index = usize::from(self.size / 8);
        let shift = self.free_bits_in_byte() - n;
        self.bytes[index] |= bits << shift;
        self.size += n as u8;
    }
}

/// 元素流中的单个元素
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Element {
    /// 起始码元素, 自身携带起始码前缀及后续比特
    StartCode(StartCodeKind, RawBits),
    /// 原始数据元素
    Raw(RawBits),
    /// 固件填充的令牌
    Token(TokenKind),
}

impl Element {
    /// 固件约定的元素类型编码
    pub const fn wire_code(&self) -> u32 {
        match self {
            Self::StartCode(StartCodeKind::Raw, _) => 0,
            Self::StartCode(StartCodeKind::Mid, _) => 1,
            Self::Raw(_) => 2,
            Self::Token(kind) => kind.wire_code(),
        }
    }

    /// 携带比特的元素返回载荷
    pub fn raw_bits(&self) -> Option<&RawBits> {
        match self {
            Self::StartCode(_, bits) | Self::Raw(bits) => Some(bits),
            Self::Token(_) => None,
        }
    }

    /// 令牌元素返回其类型
    pub fn token(&self) -> Option<TokenKind> {
        match self {
            Self::Token(kind) => Some(*kind),
            _ => None,
        }
    }

    /// 序列化后占用的字节数 (按 32 位字对齐)
    ///
    /// 比特元素: 4 字节类型 + 1 字节位数 + 载荷, 向上取整到字.
    /// 令牌: 4 字节类型.
    pub fn wire_len(&self) -> usize {
        match self.raw_bits() {
            Some(bits) => (usize::from(bits.size_bits()) + 8 + 31) / 32 * 4 + 4,
            None => 4,
        }
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StartCode(StartCodeKind::Raw, bits) => {
                write!(f, "STARTCODE_RAWDATA({} 位)", bits.size_bits())
            }
            Self::StartCode(StartCodeKind::Mid, bits) => {
                write!(f, "STARTCODE_MIDHDR({} 位)", bits.size_bits())
            }
            Self::Raw(bits) => write!(f, "RAWDATA({} 位)", bits.size_bits()),
            Self::Token(kind) => write!(f, "{kind}"),
        }
    }
}
