//! # Topaz
//!
//! Topaz 视频编码器主机侧的码流头部模板编译器与硬件参数表引擎.
//!
//! 主机在编码会话建立时把码流头部编译成 "元素流" 模板: 字面比特与固件在
//! 每帧编码时填充的令牌 (QP, frame_num, POC...) 交错排列. 同时派生码率控制
//! 参数, 按 QP 的 lambda/偏置表, 以及 mini-GOP 依赖结构.
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use topaz::config::SessionConfig;
//! use topaz::core::FrameType;
//! use topaz::session::EncodeSession;
//!
//! let config = SessionConfig::from_json_str(r#"{ "standard": "h264", "width": 1920, "height": 1080 }"#)?;
//! let mut session = EncodeSession::new(config)?;
//! let slice = session.frame_headers(FrameType::InterP)?;
//! println!("P 帧模板数: {}", slice.len());
//! # Ok::<(), anyhow::Error>(())
//! ```
//!
//! # Crate 结构
//!
//! | Crate | 功能 |
//! |-------|------|
//! | `topaz-core` | 错误类型, 元素流, 令牌, 比特读取器 |
//! | `topaz-codec` | 头部组装器, 偏置表, GOP, 码率控制 |

/// 核心类型与元素流
pub use topaz_core as core;

/// 头部组装与参数表
pub use topaz_codec as codec;

pub mod config;
pub mod session;

/// 获取 Topaz 版本号
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
