//! # topaz-codec
//!
//! Topaz 编码器主机侧的头部模板编译器与硬件表生成器.
//!
//! 本 crate 在 `topaz-core` 的元素流之上实现各编码标准的头部组装,
//! 并派生固件与硬件代价函数使用的参数表.
//!
//! ## 模块
//!
//! - **头部模板**: H.264 (SPS/VUI/MVC SPS/PPS/切片/AUD/SEI), MPEG-4 (VOL/VOP),
//!   H.263 (序列/图像/GOB), JPEG (标记段, 字节级写入)
//! - **偏置表**: 按 QP 生成的 lambda 与偏置表, 以及对应的寄存器写入序列
//! - **GOP**: 平坦与分层的 mini-GOP 依赖结构
//! - **码率控制**: 初始 QP, 缓冲区大小, 比例因子
//!
//! ## 使用示例
//!
//! ```rust
//! use topaz_codec::h264::{H264Assembler, H264Settings};
//! use topaz_codec::HeaderAssembler;
//! use topaz_core::FrameType;
//!
//! let settings = H264Settings::new(1280, 720);
//! let assembler = H264Assembler::new(settings).unwrap();
//! let sequence = assembler.sequence_headers().unwrap();
//! assert!(!sequence.is_empty());
//! let frame = assembler.frame_headers(FrameType::InterP).unwrap();
//! assert!(!frame.is_empty());
//! ```

pub mod assembler;
pub mod bias;
pub mod gop;
pub mod h263;
pub mod h264;
pub mod jpeg;
pub mod mpeg4;
pub mod rc;
pub mod template;

// 重导出常用类型
pub use assembler::HeaderAssembler;
pub use bias::{BiasOverrides, BiasParams, BiasTables};
pub use gop::{GopEntry, MiniGop, MiniGopKind};
pub use rc::{RcFlags, RcInput, RcMode, RcParams};
pub use template::{HeaderKind, HeaderTemplate};
