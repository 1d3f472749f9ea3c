//! 头部组装器 trait 定义.
//!
//! H.264, MPEG-4 与 H.263 的组装器都实现 `HeaderAssembler`, 会话据此
//! 统一编译序列级模板与逐帧模板. JPEG 使用字节级写入, 不经过此 trait.

use topaz_core::{FrameType, Standard, TopazResult};

use crate::template::HeaderTemplate;

/// 头部组装器 trait
///
/// 组装器是从静态参数到模板的纯函数集合:
/// 1. `sequence_headers()` 在会话建立时调用一次
/// 2. `frame_headers()` 按帧类型调用, 结果由会话缓存
///
/// 任何一步失败都不会产生部分模板.
pub trait HeaderAssembler {
    /// 编码标准
    fn standard(&self) -> Standard;

    /// 组装器名称
    fn name(&self) -> &str;

    /// 序列级模板 (序列头, 图像参数集等), 按码流顺序
    fn sequence_headers(&self) -> TopazResult<Vec<HeaderTemplate>>;

    /// 指定帧类型的逐帧模板, 按码流顺序
    fn frame_headers(&self, frame_type: FrameType) -> TopazResult<Vec<HeaderTemplate>>;

    /// 需要预先编译模板的帧类型
    fn frame_types(&self) -> Vec<FrameType> {
        vec![FrameType::Idr, FrameType::Intra, FrameType::InterP]
    }
}
