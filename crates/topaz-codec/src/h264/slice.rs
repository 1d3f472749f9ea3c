//! H.264 切片头.
//!
//! 切片头有两种生成方式:
//! - 固件解析: 帧号, POC, 参考列表重排与标记等由令牌占位, 模板按帧类型预先编译
//! - 主机解析: 全部字段由主机写入, 用于预计算的跳过切片
//!
//! MVC 基础视图的切片前附加前缀 NAL (类型 14), 从属视图使用编码切片扩展 (类型 20).

use log::trace;
use topaz_core::{ElementStream, FrameType, StartCodeKind, TokenKind, TopazResult};

use super::{MVC_PPS_ID, START_CODE_PREFIX_BYTES};

/// 切片类型 (slice_type 语法值)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SliceType {
    P = 0,
    B = 1,
    I = 2,
    /// IDR 切片, 语法上按 I 切片编码
    Idr = 5,
}

impl SliceType {
    /// 帧模板类型对应的切片类型
    ///
    /// 以 P 语法编码的 IDR 仍为 P 切片, IDR 语义单独由帧类型给出.
    pub const fn from_frame_type(frame_type: FrameType) -> Self {
        match frame_type {
            FrameType::Idr => Self::Idr,
            FrameType::Intra => Self::I,
            FrameType::InterP | FrameType::InterPIdr => Self::P,
            FrameType::InterB => Self::B,
        }
    }

    /// 写入码流的 slice_type
    pub const fn syntax_value(self) -> u32 {
        match self {
            Self::Idr => Self::I as u32,
            other => other as u32,
        }
    }

    /// NAL 单元类型 (5 = IDR 切片, 1 = 非 IDR 切片)
    pub const fn nal_unit_type(self) -> u32 {
        match self {
            Self::Idr => 5,
            _ => 1,
        }
    }

    pub const fn is_intra(self) -> bool {
        matches!(self, Self::I | Self::Idr)
    }

    pub const fn is_inter(self) -> bool {
        matches!(self, Self::P | Self::B)
    }
}

/// MVC 视图
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum MvcView {
    /// 非 MVC 码流
    #[default]
    None,
    /// 基础视图 (view 0)
    Base,
    /// 从属视图 (view 1)
    Dependent,
}

/// 固件解析切片头参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareSliceParams {
    /// 帧模板类型
    pub frame_type: FrameType,
    /// disable_deblocking_filter_idc
    pub deblock_idc: u8,
    /// slice_alpha_c0_offset_div2
    pub alpha_offset_div2: i32,
    /// slice_beta_offset_div2
    pub beta_offset_div2: i32,
    pub cabac: bool,
    /// 场编码
    pub interlaced: bool,
    pub view: MvcView,
    /// 当前帧作为长期参考
    pub long_term_reference: bool,
}

impl FirmwareSliceParams {
    /// 按帧类型准备参数, 去块偏移为 0
    pub fn new(frame_type: FrameType, deblock_idc: u8, cabac: bool, interlaced: bool) -> Self {
        Self {
            frame_type,
            deblock_idc,
            alpha_offset_div2: 0,
            beta_offset_div2: 0,
            cabac,
            interlaced,
            view: MvcView::None,
            long_term_reference: false,
        }
    }

    pub fn slice_type(&self) -> SliceType {
        SliceType::from_frame_type(self.frame_type)
    }

    /// B 帧不作参考
    pub fn is_reference(&self) -> bool {
        self.frame_type != FrameType::InterB
    }
}

/// 写入固件解析的切片头
pub fn write_slice_header(es: &mut ElementStream, params: &FirmwareSliceParams) -> TopazResult<()> {
    match params.view {
        MvcView::None => es.begin_start_code(StartCodeKind::Raw)?,
        MvcView::Base => {
            write_prefix_nal(es, params)?;
            es.begin_start_code(StartCodeKind::Mid)?;
        }
        MvcView::Dependent => return write_extension_slice_header(es, params),
    }
    let slice_type = params.slice_type();

    es.write_start_code_prefix(START_CODE_PREFIX_BYTES)?;
    // forbidden_zero_bit, nal_ref_idc 由固件填充
    es.write_flag(false)?;
    es.write_token(TokenKind::Reference)?;
    es.begin_raw()?;
    es.write_bits(slice_type.nal_unit_type(), 5)?;
    es.write_token(TokenKind::CurrMbNr)?;
    es.begin_raw()?;
    es.write_ue(slice_type.syntax_value())?;
    // pic_parameter_set_id
    es.write_ue(0)?;
    es.write_token(TokenKind::FrameNum)?;

    if params.interlaced || slice_type == SliceType::Idr {
        es.begin_raw()?;
        if params.interlaced {
            // field_pic_flag
            es.write_flag(true)?;
            es.write_token(TokenKind::BottomField)?;
            es.begin_raw()?;
        }
        if slice_type == SliceType::Idr {
            es.write_token(TokenKind::IdrPicId)?;
        }
    }
    es.write_token(TokenKind::PicOrderCnt)?;

    match slice_type {
        SliceType::B => {
            es.write_token(TokenKind::DirectSpatialMvFlag)?;
            es.begin_raw()?;
            // num_ref_idx_active_override_flag
            es.write_flag(false)?;
        }
        SliceType::P => es.write_token(TokenKind::NumRefIdxActive)?,
        _ => {}
    }
    if slice_type.is_inter() {
        es.write_token(TokenKind::ReorderL0)?;
        if slice_type == SliceType::B {
            es.write_token(TokenKind::ReorderL1)?;
        }
    }

    es.write_token(TokenKind::SliceWeightedPredictionStruct)?;
    es.begin_raw()?;
    write_firmware_marking(es, params, slice_type)?;

    if params.cabac && slice_type.is_inter() {
        // cabac_init_idc
        es.write_ue(0)?;
    }
    write_deblocking(es, params.deblock_idc, params.alpha_offset_div2, params.beta_offset_div2)
}

/// dec_ref_pic_marking()
///
/// 长期参考帧写入完整的 MMCO 序列: 清除全部长期参考, 允许一个长期参考,
/// 将当前帧设为长期参考, 结束. IDR 帧改用 long_term_reference_flag.
fn write_firmware_marking(
    es: &mut ElementStream,
    params: &FirmwareSliceParams,
    slice_type: SliceType,
) -> TopazResult<()> {
    if !(params.is_reference() && params.long_term_reference) {
        es.write_token(TokenKind::Adaptive)?;
        return es.begin_raw();
    }
    if slice_type == SliceType::Idr {
        // no_output_of_prior_pics_flag, long_term_reference_flag
        es.write_flag(false)?;
        return es.write_flag(true);
    }
    // adaptive_ref_pic_marking_mode_flag
    es.write_flag(true)?;
    for mmco in [5, 4, 1, 6, 0, 0] {
        es.write_ue(mmco)?;
    }
    Ok(())
}

/// 写入 MVC 基础视图的前缀 NAL 单元 (类型 14)
pub fn write_prefix_nal(es: &mut ElementStream, params: &FirmwareSliceParams) -> TopazResult<()> {
    let slice_type = params.slice_type();

    es.begin_start_code(StartCodeKind::Raw)?;
    es.write_start_code_prefix(START_CODE_PREFIX_BYTES)?;
    es.begin_raw()?;
    es.write_flag(false)?;
    es.write_token(TokenKind::Reference)?;
    es.begin_raw()?;
    es.write_bits(14, 5)?;
    // svc_extension_flag
    es.write_flag(false)?;
    // nal_unit_header_mvc_extension(): non_idr_flag, priority_id, view_id
    es.write_flag(slice_type != SliceType::Idr)?;
    es.write_bits(0, 6)?;
    es.write_bits(0, 10)?;
    es.write_token(TokenKind::TemporalId)?;
    es.write_token(TokenKind::AnchorPicFlag)?;
    es.begin_raw()?;
    // inter_view_flag, reserved_one_bit
    es.write_flag(slice_type != SliceType::B)?;
    es.write_flag(true)
}

/// 写入 MVC 从属视图的编码切片扩展 (NAL 类型 20)
///
/// 从属视图固定 view_id = 1, 不作视图间参考.
pub fn write_extension_slice_header(
    es: &mut ElementStream,
    params: &FirmwareSliceParams,
) -> TopazResult<()> {
    let slice_type = params.slice_type();
    let is_idr = params.frame_type.is_idr();

    es.begin_start_code(StartCodeKind::Raw)?;
    es.write_start_code_prefix(START_CODE_PREFIX_BYTES)?;
    es.write_flag(false)?;
    es.write_token(TokenKind::Reference)?;
    es.begin_raw()?;
    es.write_bits(20, 5)?;
    es.write_flag(false)?;
    es.write_flag(!is_idr)?;
    es.write_bits(0, 6)?;
    es.write_bits(1, 10)?;
    es.write_token(TokenKind::TemporalId)?;
    es.write_token(TokenKind::AnchorPicFlag)?;
    es.begin_raw()?;
    es.write_flag(false)?;
    es.write_flag(true)?;

    es.write_token(TokenKind::CurrMbNr)?;
    es.begin_raw()?;
    es.write_ue(slice_type.syntax_value())?;
    es.write_ue(MVC_PPS_ID)?;
    es.write_token(TokenKind::FrameNum)?;

    if params.interlaced {
        es.write_flag(true)?;
        es.write_token(TokenKind::BottomField)?;
    }
    if is_idr {
        // idr_pic_id = ue(0)
        es.write_flag(true)?;
    }
    es.write_token(TokenKind::PicOrderCnt)?;

    match slice_type {
        SliceType::B => {
            es.write_token(TokenKind::DirectSpatialMvFlag)?;
            es.write_flag(false)?;
        }
        SliceType::P => es.write_token(TokenKind::NumRefIdxActive)?,
        _ => {}
    }
    if slice_type.is_inter() {
        es.write_token(TokenKind::ReorderL0)?;
    }
    if slice_type == SliceType::B {
        // ref_pic_list_modification_flag_l1
        es.write_flag(false)?;
    }

    if is_idr {
        es.write_flag(false)?;
        es.write_flag(false)?;
    } else {
        es.write_token(TokenKind::Adaptive)?;
    }
    if params.cabac && slice_type.is_inter() {
        es.write_ue(0)?;
    }
    write_deblocking(es, params.deblock_idc, params.alpha_offset_div2, params.beta_offset_div2)
}

/// SQP 令牌与去块参数
fn write_deblocking(
    es: &mut ElementStream,
    deblock_idc: u8,
    alpha_offset_div2: i32,
    beta_offset_div2: i32,
) -> TopazResult<()> {
    es.write_token(TokenKind::SliceQp)?;
    es.begin_raw()?;
    es.write_ue(u32::from(deblock_idc))?;
    if deblock_idc != 1 {
        es.write_se(alpha_offset_div2)?;
        es.write_se(beta_offset_div2)?;
    }
    Ok(())
}

// ============================================================================
// 主机解析切片头
// ============================================================================

/// 单个参考帧的加权预测系数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WeightEntry {
    pub luma_weight_flag: bool,
    pub luma_weight: i32,
    pub luma_offset: i32,
    pub chroma_weight_flag: bool,
    pub cb_weight: i32,
    pub cb_offset: i32,
    pub cr_weight: i32,
    pub cr_offset: i32,
}

/// 加权预测设置 (P 帧最多两个参考, B 帧每个方向一个)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WeightedPrediction {
    pub weighted_pred: bool,
    pub weighted_bipred_idc: u8,
    pub luma_log2_weight_denom: u32,
    pub chroma_log2_weight_denom: u32,
    pub entries: [WeightEntry; 2],
}

/// 主机解析切片头参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostSliceParams {
    pub slice_type: SliceType,
    /// nal_ref_idc 非零
    pub reference: bool,
    /// frame_num (5 位)
    pub frame_num: u32,
    pub idr_pic_id: u32,
    /// pic_order_cnt_lsb 基值 (逐帧为显示序号的两倍)
    pub picture_num: u32,
    pub log2_max_pic_order_cnt: u32,
    pub interlaced: bool,
    pub bottom_field: bool,
    pub direct_spatial_mv_pred: bool,
    pub num_ref_idx_l0_active_minus1: u32,
    /// 参考帧号差值, 非零时写入重排命令
    pub diff_ref_pic_num: [i32; 2],
    pub ref_is_long_term: [bool; 2],
    pub ref_long_term_num: [u32; 2],
    pub long_term_reference: bool,
    pub long_term_ref_num: u32,
    pub weighted: WeightedPrediction,
    pub deblock_idc: u8,
    pub alpha_offset_div2: i32,
    pub beta_offset_div2: i32,
    pub cabac: bool,
}

impl HostSliceParams {
    /// 由帧分类与帧计数准备参数
    ///
    /// 帧内帧在 frame_num 回绕到 0 时为 IDR. POC 按显示序号取模 32 后乘 2.
    #[allow(clippy::too_many_arguments)]
    pub fn prepare(
        intra: bool,
        inter_b: bool,
        multi_ref: bool,
        deblock_idc: u8,
        display_frame_number: u32,
        frame_num_id: u32,
        cabac: bool,
        interlaced: bool,
        field_num: u8,
        weighted: Option<WeightedPrediction>,
        long_term_reference: bool,
    ) -> Self {
        let slice_type = if intra {
            if frame_num_id % 32 == 0 {
                SliceType::Idr
            } else {
                SliceType::I
            }
        } else if inter_b {
            SliceType::B
        } else {
            SliceType::P
        };
        Self {
            slice_type,
            reference: slice_type != SliceType::B,
            frame_num: frame_num_id % 32,
            idr_pic_id: display_frame_number & 1,
            picture_num: (display_frame_number % 32) * 2,
            log2_max_pic_order_cnt: super::sequence::LOG2_MAX_PIC_ORDER_CNT,
            interlaced,
            bottom_field: field_num != 0,
            direct_spatial_mv_pred: false,
            num_ref_idx_l0_active_minus1: u32::from(multi_ref),
            diff_ref_pic_num: [0; 2],
            ref_is_long_term: [false; 2],
            ref_long_term_num: [0; 2],
            long_term_reference,
            long_term_ref_num: 0,
            weighted: weighted.unwrap_or_default(),
            deblock_idc,
            alpha_offset_div2: 0,
            beta_offset_div2: 0,
            cabac,
        }
    }
}

/// 写入主机解析的切片头
pub fn write_host_slice_header(es: &mut ElementStream, params: &HostSliceParams) -> TopazResult<()> {
    let slice_type = params.slice_type;

    es.begin_start_code(StartCodeKind::Raw)?;
    es.write_start_code_prefix(START_CODE_PREFIX_BYTES)?;
    es.write_byte(((u8::from(params.reference)) << 5) | slice_type.nal_unit_type() as u8)?;
    es.write_token(TokenKind::CurrMbNr)?;
    es.begin_raw()?;
    es.write_ue(slice_type.syntax_value())?;
    // pic_parameter_set_id = ue(0) 与 5 位 frame_num
    es.write_bits((1 << 5) | (params.frame_num & 0x1F), 6)?;

    if params.interlaced {
        es.write_flag(true)?;
        es.write_flag(params.bottom_field)?;
    }
    if slice_type == SliceType::Idr {
        es.write_ue(params.idr_pic_id)?;
    }
    let poc = if params.interlaced {
        params.picture_num + u32::from(params.bottom_field)
    } else {
        params.picture_num
    };
    es.write_bits(poc, params.log2_max_pic_order_cnt)?;

    if slice_type == SliceType::B {
        es.write_flag(params.direct_spatial_mv_pred)?;
    }
    if slice_type.is_inter() {
        if slice_type == SliceType::P && params.num_ref_idx_l0_active_minus1 > 0 {
            es.write_flag(true)?;
            es.write_ue(params.num_ref_idx_l0_active_minus1)?;
        } else {
            es.write_flag(false)?;
        }
        write_reordering(es, params)?;
    }

    let w = &params.weighted;
    if w.weighted_pred && slice_type.is_inter() && w.weighted_bipred_idc == 1 {
        es.write_ue(w.luma_log2_weight_denom)?;
        es.write_ue(w.chroma_log2_weight_denom)?;
        let count = if slice_type == SliceType::B {
            2
        } else {
            (params.num_ref_idx_l0_active_minus1 as usize + 1).min(2)
        };
        for entry in &w.entries[..count] {
            es.write_flag(entry.luma_weight_flag)?;
            if entry.luma_weight_flag {
                es.write_se(entry.luma_weight)?;
                es.write_se(entry.luma_offset)?;
            }
            es.write_flag(entry.chroma_weight_flag)?;
            if entry.chroma_weight_flag {
                es.write_se(entry.cb_weight)?;
                es.write_se(entry.cb_offset)?;
                es.write_se(entry.cr_weight)?;
                es.write_se(entry.cr_offset)?;
            }
        }
    }

    if slice_type == SliceType::Idr {
        es.write_flag(false)?;
        es.write_flag(params.long_term_reference)?;
    } else if params.reference {
        if params.long_term_reference {
            es.write_flag(true)?;
            // 允许两个长期参考, 当前帧设为长期参考, 结束
            es.write_ue(4)?;
            es.write_ue(2)?;
            es.write_ue(6)?;
            es.write_ue(params.long_term_ref_num)?;
            es.write_ue(0)?;
        } else {
            es.write_flag(false)?;
        }
    }

    if params.cabac && slice_type.is_inter() {
        es.write_ue(0)?;
    }
    write_deblocking(es, params.deblock_idc, params.alpha_offset_div2, params.beta_offset_div2)
}

/// ref_pic_list_modification()
fn write_reordering(es: &mut ElementStream, params: &HostSliceParams) -> TopazResult<()> {
    let slice_type = params.slice_type;
    let second = params.diff_ref_pic_num[1] != 0 || params.ref_is_long_term[1];
    let first = params.diff_ref_pic_num[0] != 0 || params.ref_is_long_term[0];

    if first || (second && params.num_ref_idx_l0_active_minus1 > 0) {
        es.write_flag(true)?;
        if params.ref_is_long_term[0] {
            es.write_ue(2)?;
            es.write_ue(params.ref_long_term_num[0])?;
        } else if params.diff_ref_pic_num[0] == 0 {
            // 差值为 0 时写入 abs_diff_pic_num_minus1 = 31
            es.write_ue(1)?;
            es.write_ue(31)?;
        } else {
            write_reorder_entry(es, params.diff_ref_pic_num[0])?;
        }
        if second && slice_type != SliceType::B {
            if params.ref_is_long_term[1] {
                es.write_ue(2)?;
                es.write_ue(params.ref_long_term_num[1])?;
            } else {
                write_reorder_entry(es, params.diff_ref_pic_num[1])?;
            }
        }
        es.write_ue(3)?;
    } else {
        es.write_flag(false)?;
    }

    if slice_type == SliceType::B {
        if second {
            es.write_flag(true)?;
            if params.ref_is_long_term[1] {
                es.write_ue(2)?;
                es.write_ue(params.ref_long_term_num[1])?;
            } else {
                write_reorder_entry(es, params.diff_ref_pic_num[1])?;
            }
            es.write_ue(3)?;
        } else {
            es.write_flag(false)?;
        }
    }
    Ok(())
}

/// 短期参考重排: 负差值减, 正差值加
fn write_reorder_entry(es: &mut ElementStream, diff: i32) -> TopazResult<()> {
    if diff < 0 {
        es.write_ue(0)?;
        es.write_ue(diff.unsigned_abs() - 1)
    } else {
        es.write_ue(1)?;
        es.write_ue(diff.unsigned_abs().saturating_sub(1))
    }
}

/// 写入跳过 P 切片: 主机切片头后接 mb_skip_run 与字节对齐令牌
pub fn write_skip_p_slice(
    es: &mut ElementStream,
    params: &HostSliceParams,
    mb_skip_run: u32,
) -> TopazResult<()> {
    write_host_slice_header(es, params)?;
    trace!("跳过切片: mb_skip_run = {}", mb_skip_run);
    es.write_ue(mb_skip_run)?;
    es.write_token(TokenKind::InsertByteAlignH264)
}
