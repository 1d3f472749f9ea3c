//! H.264 序列参数集 (SPS) 与 MVC 子集 SPS.
//!
//! 序列头完全由主机确定, 除末尾的字节对齐令牌外不含固件令牌.
//! 高档次 (High / High 4:4:4) 额外写入色度格式与量化矩阵.

use log::debug;
use topaz_core::{ElementStream, StartCodeKind, TokenKind, TopazError, TopazResult};

use super::{H264Level, H264Profile, MAX_MVC_VIEWS, MVC_SPS_ID, START_CODE_PREFIX_BYTES};

/// SEI 缓冲周期中 initial_cpb_removal_delay 的位宽
pub const INITIAL_CPB_REMOVAL_DELAY_SIZE: u8 = 23;
/// SEI 图像定时中 cpb_removal_delay 的位宽
pub const CPB_REMOVAL_DELAY_SIZE: u8 = 23;
/// SEI 图像定时中 dpb_output_delay 的位宽
pub const DPB_OUTPUT_DELAY_SIZE: u8 = 7;

/// 固定的 log2(MaxPicOrderCntLsb)
pub const LOG2_MAX_PIC_ORDER_CNT: u32 = 6;

/// VUI 与 NAL HRD 参数
///
/// 只写入定时信息与单个 CPB 的 HRD, 其余 VUI 子结构恒为不存在.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VuiParams {
    /// num_units_in_tick
    pub num_units_in_tick: u32,
    /// time_scale
    pub time_scale: u32,
    /// bit_rate_value_minus1 (bit_rate_scale = 0)
    pub bit_rate_value_minus1: u32,
    /// cpb_size_value_minus1 (cpb_size_scale = 2)
    pub cpb_size_value_minus1: u32,
    /// cbr_flag
    pub cbr: bool,
    /// initial_cpb_removal_delay_length_minus1
    pub initial_cpb_removal_delay_length_minus1: u8,
    /// cpb_removal_delay_length_minus1
    pub cpb_removal_delay_length_minus1: u8,
    /// dpb_output_delay_length_minus1
    pub dpb_output_delay_length_minus1: u8,
    /// time_offset_length
    pub time_offset_length: u8,
}

impl VuiParams {
    /// 由码率控制结果推导 VUI
    ///
    /// 时间刻度取帧率的两倍 (场频), 码率与缓冲区以 64 为单位.
    pub fn from_rate_control(
        frame_rate: u32,
        bits_per_second: u32,
        buffer_size: u32,
        cbr: bool,
    ) -> Self {
        Self {
            num_units_in_tick: 1,
            time_scale: frame_rate * 2,
            bit_rate_value_minus1: (bits_per_second / 64).saturating_sub(1),
            cpb_size_value_minus1: (buffer_size / 64).saturating_sub(1),
            cbr,
            initial_cpb_removal_delay_length_minus1: INITIAL_CPB_REMOVAL_DELAY_SIZE - 1,
            cpb_removal_delay_length_minus1: CPB_REMOVAL_DELAY_SIZE - 1,
            dpb_output_delay_length_minus1: DPB_OUTPUT_DELAY_SIZE - 1,
            time_offset_length: 24,
        }
    }
}

/// 帧裁剪偏移 (以裁剪单位计)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CropParams {
    pub left: u32,
    pub right: u32,
    pub top: u32,
    pub bottom: u32,
}

impl CropParams {
    /// 按宏块对齐补齐的尺寸推导裁剪
    ///
    /// 4:2:0 下水平裁剪单位为 2, 垂直单位为 2 (逐帧) 或 4 (场编码).
    /// 尺寸已对齐时返回 `None`.
    pub fn for_dimensions(width: u32, height: u32, frame_mbs_only: bool) -> Option<Self> {
        let aligned_w = width.div_ceil(16) * 16;
        let row_unit = if frame_mbs_only { 16 } else { 32 };
        let aligned_h = height.div_ceil(row_unit) * row_unit;
        if aligned_w == width && aligned_h == height {
            return None;
        }
        let crop_unit_y = if frame_mbs_only { 2 } else { 4 };
        Some(Self {
            left: 0,
            right: (aligned_w - width) / 2,
            top: 0,
            bottom: (aligned_h - height) / crop_unit_y,
        })
    }
}

/// 自定义量化矩阵
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScalingMatrix {
    /// 位 i 置位表示第 i 个列表存在 (0-5 为 4x4, 6-7 为 8x8)
    pub list_mask: u32,
    /// 6 个 4x4 列表
    pub lists_4x4: [[u8; 16]; 6],
    /// 2 个 8x8 列表 (帧内亮度, 帧间亮度)
    pub lists_8x8: [[u8; 64]; 2],
}

impl Default for ScalingMatrix {
    fn default() -> Self {
        Self {
            list_mask: 0,
            lists_4x4: [[16; 16]; 6],
            lists_8x8: [[16; 64]; 2],
        }
    }
}

/// 序列头参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceParams {
    pub profile: H264Profile,
    pub level: H264Level,
    /// pic_width_in_mbs_minus1
    pub width_in_mbs_minus1: u32,
    /// pic_height_in_map_units_minus1
    pub height_in_map_units_minus1: u32,
    pub gaps_in_frame_num_allowed: bool,
    /// frame_mbs_only_flag (场编码时为 false)
    pub frame_mbs_only: bool,
    pub max_num_ref_frames: u32,
    /// seq_scaling_matrix_present_flag
    pub scaling_matrix_present: bool,
    /// 使用标准默认量化矩阵
    pub use_default_scaling_list: bool,
    /// qpprime_y_zero_transform_bypass_flag
    pub lossless: bool,
    pub log2_max_pic_order_cnt: u32,
    pub vui: Option<VuiParams>,
    pub crop: Option<CropParams>,
    /// 为 `None` 且需要列表时由固件填充 (CUSTOM_QUANT 令牌)
    pub scaling: Option<ScalingMatrix>,
}

impl SequenceParams {
    /// 由图像尺寸与编码选项推导
    #[allow(clippy::too_many_arguments)]
    pub fn derive(
        profile: H264Profile,
        level: H264Level,
        width: u32,
        height: u32,
        interlaced: bool,
        max_num_ref_frames: u32,
        custom_quant_mask: u32,
        pps_scaling: bool,
        use_default_scaling_list: bool,
        lossless: bool,
    ) -> TopazResult<Self> {
        if width < 16 || height < 16 {
            return Err(TopazError::config(format!(
                "H.264 图像尺寸过小: {}x{}",
                width, height
            )));
        }
        let frame_mbs_only = !interlaced;
        let width_in_mbs = width.div_ceil(16);
        let map_unit_rows = if frame_mbs_only { 16 } else { 32 };
        let height_in_map_units = height.div_ceil(map_unit_rows);

        let params = Self {
            profile,
            level,
            width_in_mbs_minus1: width_in_mbs - 1,
            height_in_map_units_minus1: height_in_map_units - 1,
            gaps_in_frame_num_allowed: false,
            frame_mbs_only,
            max_num_ref_frames,
            scaling_matrix_present: custom_quant_mask != 0 && !pps_scaling,
            use_default_scaling_list: use_default_scaling_list && !pps_scaling,
            lossless,
            log2_max_pic_order_cnt: LOG2_MAX_PIC_ORDER_CNT,
            vui: None,
            crop: CropParams::for_dimensions(width, height, frame_mbs_only),
            scaling: None,
        };
        debug!(
            "SPS: {:?} level {} {}x{} MB, 参考帧 {}",
            params.profile,
            params.level.level_idc(),
            width_in_mbs,
            height_in_map_units,
            max_num_ref_frames
        );
        Ok(params)
    }
}

/// 写入序列参数集 (NAL 类型 7)
pub fn write_sequence_header(es: &mut ElementStream, params: &SequenceParams) -> TopazResult<()> {
    es.begin_start_code(StartCodeKind::Raw)?;
    es.write_start_code_prefix(START_CODE_PREFIX_BYTES)?;
    // forbidden_zero_bit = 0, nal_ref_idc = 3, nal_unit_type = 7
    es.write_byte((3 << 5) | 7)?;
    es.write_byte(params.profile.profile_idc())?;
    es.write_byte(params.profile.constraint_flags(params.level))?;
    es.write_byte(params.level.level_idc())?;
    // seq_parameter_set_id
    es.write_ue(0)?;

    if params.profile.is_high() {
        write_high_profile_block(es, params)?;
    }

    // log2_max_frame_num_minus4, pic_order_cnt_type
    es.write_ue(1)?;
    es.write_ue(0)?;
    es.write_ue(params.log2_max_pic_order_cnt - 4)?;
    es.write_ue(params.max_num_ref_frames)?;
    es.write_flag(params.gaps_in_frame_num_allowed)?;
    write_picture_geometry(es, params)?;

    es.write_flag(params.vui.is_some())?;
    if let Some(vui) = &params.vui {
        write_vui(es, vui)?;
    }
    es.write_token(TokenKind::InsertByteAlignH264)
}

/// 写入 MVC 子集序列参数集 (NAL 类型 15)
///
/// 固定两路视图, 视图 1 的锚点与非锚点帧都参考视图 0. 子集 SPS 不携带 VUI.
pub fn write_mvc_sequence_header(
    es: &mut ElementStream,
    params: &SequenceParams,
) -> TopazResult<()> {
    es.begin_start_code(StartCodeKind::Raw)?;
    es.write_start_code_prefix(START_CODE_PREFIX_BYTES)?;
    es.write_byte((3 << 5) | 15)?;
    // profile_idc = 118 (Multiview High), 约束标志全 0
    es.write_byte(118)?;
    es.write_byte(0)?;
    es.write_byte(params.level.level_idc())?;
    es.write_ue(MVC_SPS_ID)?;

    write_high_profile_block(es, params)?;

    es.write_ue(1)?;
    es.write_ue(0)?;
    es.write_ue(params.log2_max_pic_order_cnt - 4)?;
    es.write_ue(params.max_num_ref_frames)?;
    es.write_flag(params.gaps_in_frame_num_allowed)?;
    write_picture_geometry(es, params)?;
    // vui_parameters_present_flag
    es.write_flag(false)?;

    // bit_equal_to_one
    es.write_flag(true)?;
    // seq_parameter_set_mvc_extension()
    es.write_ue(MAX_MVC_VIEWS - 1)?;
    for view_id in 0..MAX_MVC_VIEWS {
        es.write_ue(view_id)?;
    }
    // 锚点参考: num_anchor_refs_l0 = 1, anchor_ref_l0 = 0, num_anchor_refs_l1 = 0
    for _ in 1..MAX_MVC_VIEWS {
        es.write_ue(1)?;
        es.write_ue(0)?;
        es.write_ue(0)?;
    }
    // 非锚点参考
    for _ in 1..MAX_MVC_VIEWS {
        es.write_ue(1)?;
        es.write_ue(0)?;
        es.write_ue(0)?;
    }
    // num_level_values_signaled_minus1
    es.write_ue(0)?;
    es.write_byte(params.level.level_idc())?;
    // num_applicable_ops_minus1
    es.write_ue(0)?;
    // applicable_op_temporal_id
    es.write_bits(0, 3)?;
    // applicable_op_num_target_views_minus1, target_view_id, num_views_minus1
    es.write_ue(0)?;
    es.write_ue(0)?;
    es.write_ue(0)?;
    // mvc_vui_parameters_present_flag, additional_extension2_flag
    es.write_flag(false)?;
    es.write_flag(false)?;
    es.write_token(TokenKind::InsertByteAlignH264)
}

/// 色度格式, 位深, 无损标志与量化矩阵
fn write_high_profile_block(es: &mut ElementStream, params: &SequenceParams) -> TopazResult<()> {
    // chroma_format_idc = 1, bit_depth_luma_minus8 = 0, bit_depth_chroma_minus8 = 0
    es.write_ue(1)?;
    es.write_ue(0)?;
    es.write_ue(0)?;
    es.write_flag(params.lossless)?;

    if params.use_default_scaling_list || params.scaling_matrix_present {
        es.write_flag(true)?;
        if params.use_default_scaling_list {
            // seq_scaling_list_present_flag[0..8] = 0
            es.write_bits(0, 8)?;
        } else {
            write_scaling_lists(es, params.scaling.as_ref(), true)?;
            es.begin_raw()?;
        }
    } else {
        es.write_flag(false)?;
    }
    Ok(())
}

/// 尺寸, 场标志, direct_8x8 与裁剪
fn write_picture_geometry(es: &mut ElementStream, params: &SequenceParams) -> TopazResult<()> {
    es.write_ue(params.width_in_mbs_minus1)?;
    es.write_ue(params.height_in_map_units_minus1)?;
    es.write_flag(params.frame_mbs_only)?;
    if !params.frame_mbs_only {
        // mb_adaptive_frame_field_flag
        es.write_flag(false)?;
    }
    // direct_8x8_inference_flag
    es.write_flag(true)?;
    match &params.crop {
        Some(crop) => {
            es.write_flag(true)?;
            es.write_ue(crop.left)?;
            es.write_ue(crop.right)?;
            es.write_ue(crop.top)?;
            es.write_ue(crop.bottom)?;
        }
        None => es.write_flag(false)?,
    }
    Ok(())
}

/// 写入量化矩阵列表
///
/// 矩阵未知时只插入 CUSTOM_QUANT 令牌, 由固件写入列表.
/// 列表按差分 se(v) 编码, 起始值为 8.
pub fn write_scaling_lists(
    es: &mut ElementStream,
    scaling: Option<&ScalingMatrix>,
    write_8x8: bool,
) -> TopazResult<()> {
    let Some(matrix) = scaling else {
        return es.write_token(TokenKind::CustomQuant);
    };

    for (list, values) in matrix.lists_4x4.iter().enumerate() {
        write_scaling_list(es, matrix.list_mask & (1 << list) != 0, values)?;
    }
    if !write_8x8 {
        return Ok(());
    }
    for (i, values) in matrix.lists_8x8.iter().enumerate() {
        write_scaling_list(es, matrix.list_mask & (1 << (6 + i)) != 0, values)?;
    }
    Ok(())
}

fn write_scaling_list(es: &mut ElementStream, present: bool, values: &[u8]) -> TopazResult<()> {
    es.write_flag(present)?;
    if !present {
        return Ok(());
    }
    let mut current = 8i32;
    for &value in values {
        let delta = i32::from(value) - current;
        current += delta;
        es.write_se(delta)?;
    }
    Ok(())
}

/// 写入 VUI (仅定时信息与 NAL HRD)
fn write_vui(es: &mut ElementStream, vui: &VuiParams) -> TopazResult<()> {
    // aspect_ratio / overscan / video_signal / chroma_loc 不存在, timing_info_present_flag = 1
    es.write_bits(1, 5)?;
    es.write_bits(vui.num_units_in_tick, 32)?;
    es.write_bits(vui.time_scale, 32)?;
    // fixed_frame_rate_flag, nal_hrd_parameters_present_flag
    es.write_flag(true)?;
    es.write_flag(true)?;
    // cpb_cnt_minus1 = ue(0)
    es.write_flag(true)?;
    // bit_rate_scale = 0, cpb_size_scale = 2
    es.write_bits(0, 4)?;
    es.write_bits(2, 4)?;
    es.write_ue(vui.bit_rate_value_minus1)?;
    es.write_ue(vui.cpb_size_value_minus1)?;
    es.write_flag(vui.cbr)?;
    es.write_bits(u32::from(vui.initial_cpb_removal_delay_length_minus1), 5)?;
    es.write_bits(u32::from(vui.cpb_removal_delay_length_minus1), 5)?;
    es.write_bits(u32::from(vui.dpb_output_delay_length_minus1), 5)?;
    es.write_bits(u32::from(vui.time_offset_length), 5)?;
    // vcl_hrd, low_delay_hrd, pic_struct_present, bitstream_restriction
    es.write_bits(0, 4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use topaz_core::bitreader::BitReader;
    use topaz_core::Element;

    fn params(profile: H264Profile) -> SequenceParams {
        SequenceParams::derive(
            profile,
            H264Level::from_idc(40).unwrap(),
            1920,
            1080,
            false,
            1,
            0,
            false,
            false,
            false,
        )
        .unwrap()
    }

    fn payload(es: &ElementStream, index: usize) -> Vec<u8> {
        es.elements()[index].raw_bits().unwrap().payload().to_vec()
    }

    #[test]
    fn test_main_profile_header_bytes() {
        let mut es = ElementStream::new();
        write_sequence_header(&mut es, &params(H264Profile::Main)).unwrap();

        let bytes = payload(&es, 0);
        assert_eq!(&bytes[..8], &[0, 0, 0, 1, 0x67, 77, 0x40, 40]);
        assert!(matches!(es.elements()[0], Element::StartCode(StartCodeKind::Raw, _)));
        assert_eq!(es.tokens().collect::<Vec<_>>(), vec![TokenKind::InsertByteAlignH264]);
    }

    #[test]
    fn test_geometry_and_crop() {
        let p = params(H264Profile::Main);
        assert_eq!(p.width_in_mbs_minus1, 119);
        assert_eq!(p.height_in_map_units_minus1, 67);
        assert_eq!(
            p.crop,
            Some(CropParams {
                left: 0,
                right: 0,
                top: 0,
                bottom: 4
            })
        );

        let mut es = ElementStream::new();
        write_sequence_header(&mut es, &p).unwrap();
        let bytes = payload(&es, 0);
        let mut br = BitReader::new(&bytes[8..]);
        assert_eq!(br.read_ue().unwrap(), 0, "sps id");
        assert_eq!(br.read_ue().unwrap(), 1, "log2_max_frame_num_minus4");
        assert_eq!(br.read_ue().unwrap(), 0, "poc type");
        assert_eq!(br.read_ue().unwrap(), 2, "log2_max_poc_lsb_minus4");
        assert_eq!(br.read_ue().unwrap(), 1, "num_ref_frames");
        assert_eq!(br.read_bit().unwrap(), 0, "gaps");
        assert_eq!(br.read_ue().unwrap(), 119);
        assert_eq!(br.read_ue().unwrap(), 67);
        assert_eq!(br.read_bit().unwrap(), 1, "frame_mbs_only");
        assert_eq!(br.read_bit().unwrap(), 1, "direct_8x8");
        assert_eq!(br.read_bit().unwrap(), 1, "裁剪");
        assert_eq!(br.read_ue().unwrap(), 0);
        assert_eq!(br.read_ue().unwrap(), 0);
        assert_eq!(br.read_ue().unwrap(), 0);
        assert_eq!(br.read_ue().unwrap(), 4);
        assert_eq!(br.read_bit().unwrap(), 0, "vui");
    }

    #[test]
    fn test_level_1b_constraint_flag() {
        let mut p = params(H264Profile::Baseline);
        p.level = H264Level::from_idc(111).unwrap();
        let mut es = ElementStream::new();
        write_sequence_header(&mut es, &p).unwrap();
        let bytes = payload(&es, 0);
        assert_eq!(bytes[5], 66);
        assert_eq!(bytes[6], 0x90);
        assert_eq!(bytes[7], 11);
    }

    #[test]
    fn test_high_profile_custom_quant_token() {
        let mut p = params(H264Profile::High);
        p.scaling_matrix_present = true;
        let mut es = ElementStream::new();
        write_sequence_header(&mut es, &p).unwrap();
        let tokens: Vec<_> = es.tokens().collect();
        assert_eq!(
            tokens,
            vec![TokenKind::CustomQuant, TokenKind::InsertByteAlignH264]
        );
        // 令牌之后强制开启新的原始数据元素
        assert!(matches!(es.elements()[2], Element::Raw(_)));
    }

    #[test]
    fn test_scaling_lists_delta_coding() {
        let mut matrix = ScalingMatrix {
            list_mask: 1,
            ..ScalingMatrix::default()
        };
        matrix.lists_4x4[0] = [6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21];
        let mut es = ElementStream::new();
        write_scaling_lists(&mut es, Some(&matrix), false).unwrap();

        let bytes = payload(&es, 0);
        let mut br = BitReader::new(&bytes);
        assert_eq!(br.read_bit().unwrap(), 1);
        assert_eq!(br.read_se().unwrap(), -2);
        for _ in 1..16 {
            assert_eq!(br.read_se().unwrap(), 1);
        }
        for _ in 1..6 {
            assert_eq!(br.read_bit().unwrap(), 0);
        }
    }

    #[test]
    fn test_vui_from_rate_control() {
        let vui = VuiParams::from_rate_control(30, 4_000_000, 10_000_000, true);
        assert_eq!(vui.time_scale, 60);
        assert_eq!(vui.bit_rate_value_minus1, 62_499);
        assert_eq!(vui.cpb_size_value_minus1, 156_249);
        assert_eq!(vui.initial_cpb_removal_delay_length_minus1, 22);
        assert_eq!(vui.dpb_output_delay_length_minus1, 6);
    }

    #[test]
    fn test_mvc_sequence_header() {
        let p = params(H264Profile::High);
        let mut es = ElementStream::new();
        write_mvc_sequence_header(&mut es, &p).unwrap();
        let bytes = payload(&es, 0);
        assert_eq!(&bytes[..8], &[0, 0, 0, 1, 0x6F, 118, 0, 40]);
        let mut br = BitReader::new(&bytes[8..]);
        assert_eq!(br.read_ue().unwrap(), MVC_SPS_ID);
    }
}
