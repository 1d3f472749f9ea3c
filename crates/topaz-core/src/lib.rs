//! # topaz-core
//!
//! Topaz 编码器主机侧核心库, 提供错误类型, 头部元素与元素流写入器.
//!
//! 元素流是所有码流头部模板的基础: 字面比特与固件填充的令牌按码流顺序排列,
//! 最终序列化为固件读取的头部结构.

pub mod bitreader;
pub mod element;
pub mod error;
pub mod frame_type;
pub mod standard;
pub mod stream;

// 重导出常用类型
pub use element::{Element, StartCodeKind, TokenKind};
pub use error::{TopazError, TopazResult};
pub use frame_type::FrameType;
pub use standard::Standard;
pub use stream::ElementStream;
