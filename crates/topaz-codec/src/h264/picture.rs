//! H.264 图像参数集 (PPS).

use topaz_core::{ElementStream, StartCodeKind, TokenKind, TopazResult};

use super::{MVC_PPS_ID, MVC_SPS_ID, START_CODE_PREFIX_BYTES};

/// 图像参数集参数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PictureParams {
    /// pic_parameter_set_id
    pub pps_id: u32,
    /// seq_parameter_set_id
    pub sps_id: u32,
    /// entropy_coding_mode_flag
    pub cabac: bool,
    /// weighted_pred_flag
    pub weighted_pred: bool,
    /// weighted_bipred_idc (0-2)
    pub weighted_bipred_idc: u8,
    /// chroma_qp_index_offset
    pub chroma_qp_offset: i32,
    /// constrained_intra_pred_flag
    pub constrained_intra: bool,
    /// transform_8x8_mode_flag
    pub transform_8x8: bool,
    /// pic_scaling_matrix_present_flag
    pub scaling_matrix_present: bool,
    /// second_chroma_qp_index_offset
    pub second_chroma_qp_offset: i32,
}

impl PictureParams {
    /// 推导 PPS 参数, MVC 从属视图使用独立的参数集编号
    pub fn derive(
        cabac: bool,
        transform_8x8: bool,
        constrained_intra: bool,
        chroma_qp_offset: i32,
        mvc_dependent_view: bool,
    ) -> Self {
        let (pps_id, sps_id) = if mvc_dependent_view {
            (MVC_PPS_ID, MVC_SPS_ID)
        } else {
            (0, 0)
        };
        Self {
            pps_id,
            sps_id,
            cabac,
            weighted_pred: false,
            weighted_bipred_idc: 0,
            chroma_qp_offset,
            constrained_intra,
            transform_8x8,
            scaling_matrix_present: false,
            second_chroma_qp_offset: chroma_qp_offset,
        }
    }

    /// 是否需要写入 8x8 变换与第二色度偏移扩展块
    pub fn has_extension(&self) -> bool {
        self.transform_8x8
            || self.second_chroma_qp_offset != self.chroma_qp_offset
            || self.scaling_matrix_present
    }
}

/// 写入图像参数集 (NAL 类型 8)
///
/// pic_init_qp_minus26 由固件通过 QP 令牌写入.
pub fn write_picture_header(es: &mut ElementStream, params: &PictureParams) -> TopazResult<()> {
    es.begin_start_code(StartCodeKind::Raw)?;
    es.write_start_code_prefix(START_CODE_PREFIX_BYTES)?;
    es.write_byte((3 << 5) | 8)?;
    es.write_ue(params.pps_id)?;
    es.write_ue(params.sps_id)?;
    // entropy_coding_mode_flag, bottom_field_pic_order_in_frame_present_flag = 0,
    // num_slice_groups_minus1 = ue(0), num_ref_idx_l0/l1_default_active_minus1 = ue(0)
    es.write_bits((u32::from(params.cabac) << 4) | 0b111, 5)?;
    es.write_bits(
        (u32::from(params.weighted_pred) << 2) | u32::from(params.weighted_bipred_idc & 3),
        3,
    )?;

    es.write_token(TokenKind::Qp)?;
    es.begin_raw()?;
    // pic_init_qs_minus26
    es.write_se(0)?;
    es.write_se(params.chroma_qp_offset)?;
    // deblocking_filter_control_present_flag = 1, redundant_pic_cnt_present_flag = 0
    es.write_bits(4 | (u32::from(params.constrained_intra) << 1), 3)?;

    if params.has_extension() {
        es.write_flag(params.transform_8x8)?;
        // pic_scaling_matrix_present_flag, 图像级量化矩阵不由主机写入
        es.write_flag(false)?;
        es.write_se(params.second_chroma_qp_offset)?;
    }
    es.write_token(TokenKind::InsertByteAlignH264)
}

#[cfg(test)]
mod tests {
    use super::*;
    use topaz_core::bitreader::BitReader;

    #[test]
    fn test_pps_layout() {
        let params = PictureParams::derive(true, false, false, 0, false);
        let mut es = ElementStream::new();
        write_picture_header(&mut es, &params).unwrap();

        assert_eq!(es.len(), 4);
        let tokens: Vec<_> = es.tokens().collect();
        assert_eq!(tokens, vec![TokenKind::Qp, TokenKind::InsertByteAlignH264]);

        let head = es.elements()[0].raw_bits().unwrap();
        // 32 + 8 + 1 + 1 + 5 + 3
        assert_eq!(head.size_bits(), 50);
        assert_eq!(&head.payload()[..5], &[0, 0, 0, 1, 0x68]);
        // ue(0) ue(0) 10111 0..
        assert_eq!(head.payload()[5], 0b1110_1110);

        let tail = es.elements()[2].raw_bits().unwrap();
        // se(0) se(0) 100
        assert_eq!(tail.size_bits(), 5);
    }

    #[test]
    fn test_pps_transform_extension() {
        let params = PictureParams::derive(false, true, true, -2, true);
        assert_eq!(params.pps_id, MVC_PPS_ID);
        assert!(params.has_extension());

        let mut es = ElementStream::new();
        write_picture_header(&mut es, &params).unwrap();
        let tail = es.elements()[2].raw_bits().unwrap();
        let mut br = BitReader::new(tail.payload());
        assert_eq!(br.read_se().unwrap(), 0);
        assert_eq!(br.read_se().unwrap(), -2);
        assert_eq!(br.read_bits(3).unwrap(), 0b110);
        assert_eq!(br.read_bit().unwrap(), 1, "transform_8x8_mode_flag");
        assert_eq!(br.read_bit().unwrap(), 0);
        assert_eq!(br.read_se().unwrap(), -2);
    }

    #[test]
    fn test_no_extension_by_default() {
        let params = PictureParams::derive(false, false, false, 3, false);
        assert!(!params.has_extension());
    }
}
