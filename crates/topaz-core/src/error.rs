//! 统一错误类型定义.
//!
//! 所有 Topaz crate 共用的错误类型. 按调用方的处理方式分为三类:
//! - 配置错误: 参数越界, 组合不支持, 缺少必需的偏置覆盖值
//! - 容量错误: 元素数量或缓冲区大小超限, 调用方可以扩大空间或拒绝请求
//! - 内部错误: 不变量被破坏, 属于缺陷, 必须显式失败

use thiserror::Error;

/// Topaz 统一错误类型
#[derive(Debug, Error)]
pub enum TopazError {
    /// 配置参数无效或互相矛盾
    #[error("配置错误: {0}")]
    Config(String),

    /// 不支持的编码特性组合 (属于配置错误)
    #[error("不支持的操作: {0}")]
    Unsupported(String),

    /// 容量超限
    #[error("容量超限: {what} 上限 {limit}, 需要 {requested}")]
    Capacity {
        /// 超限的资源名称
        what: &'static str,
        /// 允许的上限
        limit: usize,
        /// 实际需要的数量
        requested: usize,
    },

    /// 读取越过数据末尾 (仅校验用的比特读取器产生)
    #[error("已到达数据末尾")]
    Eof,

    /// I/O 错误
    #[error("I/O 错误: {0}")]
    Io(#[from] std::io::Error),

    /// 内部错误 (不应发生)
    #[error("内部错误: {0}")]
    Internal(String),
}

impl TopazError {
    /// 创建配置错误
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// 创建容量错误
    pub fn capacity(what: &'static str, limit: usize, requested: usize) -> Self {
        Self::Capacity {
            what,
            limit,
            requested,
        }
    }

    /// 是否为配置类错误
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Unsupported(_))
    }

    /// 是否为容量类错误
    pub fn is_capacity(&self) -> bool {
        matches!(self, Self::Capacity { .. })
    }

    /// 是否为内部不变量错误
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Internal(_))
    }
}

/// Topaz 统一 Result 类型
pub type TopazResult<T> = Result<T, TopazError>;
