//! 帧类型.
//!
//! 帧类型决定切片/VOP 头部模板的选择, 数值与固件的帧模板编号一致.

use std::fmt;

/// 帧类型 (固件帧模板编号)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FrameType {
    /// IDR 帧
    Idr = 0,
    /// 帧内编码帧
    Intra = 1,
    /// P 帧
    InterP = 2,
    /// B 帧
    InterB = 3,
    /// 以 P 帧语法编码的 IDR (MVC 从属视图)
    InterPIdr = 4,
}

impl FrameType {
    /// 全部帧类型
    pub const ALL: [FrameType; 5] = [
        Self::Idr,
        Self::Intra,
        Self::InterP,
        Self::InterB,
        Self::InterPIdr,
    ];

    /// 是否为帧内类型
    pub const fn is_intra(&self) -> bool {
        matches!(self, Self::Idr | Self::Intra)
    }

    /// 是否需要 IDR 语义
    pub const fn is_idr(&self) -> bool {
        matches!(self, Self::Idr | Self::InterPIdr)
    }

    /// 帧模板编号
    pub const fn template_index(&self) -> u32 {
        *self as u32
    }

    /// 获取帧类型名称
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Idr => "IDR",
            Self::Intra => "I",
            Self::InterP => "P",
            Self::InterB => "B",
            Self::InterPIdr => "P-IDR",
        }
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
