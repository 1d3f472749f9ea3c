//! 偏置与 lambda 查找表.
//!
//! 表值是经验数据, 与硬件代价函数一一对应, 不可随意调整.

/// MPEG-4 QP → SAD lambda (下标 QP-1)
pub const MPEG4_QP_LAMBDA: [u8; 31] = [
    0, 0, 1, 2, 3, //
    3, 4, 4, 5, 5, //
    6, 6, 7, 7, 8, //
    8, 9, 9, 10, 10, //
    11, 11, 11, 11, 12, //
    12, 12, 12, 13, 13, 13,
];

/// H.263 QP → SAD lambda (下标 QP-1)
pub const H263_QP_LAMBDA: [u8; 31] = [
    0, 0, 1, 1, 2, //
    2, 3, 3, 4, 4, //
    4, 5, 5, 5, 6, //
    6, 6, 7, 7, 7, //
    7, 8, 8, 8, 8, //
    9, 9, 9, 9, 10, 10,
];

/// H.264 SAD lambda, 下标 max(QP-12, 0)
pub const H264_QP_LAMBDA_SAD: [u8; 40] = [
    2, 2, 2, 2, 3, 3, 4, 4, //
    4, 5, 5, 5, 5, 5, 6, 6, //
    6, 7, 7, 7, 8, 8, 9, 11, //
    13, 14, 15, 17, 20, 23, 27, 31, //
    36, 41, 51, 62, 74, 79, 85, 91,
];

/// H.264 SATD lambda 表组, 下标 QP
pub const H264_QP_LAMBDA_SATD: [[u8; 52]; 1] = [[
    8, 8, 8, 8, 8, 8, 8, //
    8, 8, 8, 8, 8, 8, 8, //
    8, 8, 8, 9, 9, 10, 10, //
    11, 11, 12, 12, 13, 13, 14, //
    14, 15, 15, 16, 17, 18, 20, //
    21, 23, 25, 27, 30, 32, 38, //
    44, 50, 56, 63, 67, 72, 77, //
    82, 87, 92,
]];

/// H.264 直接/跳过向量偏置, 下标 QP/2
pub const H264_DIRECT_BIAS: [u32; 27] = [
    24, 24, 24, 24, 24, 24, 24, 24, 36, //
    48, 48, 60, 60, 72, 72, 84, 96, 108, //
    200, 324, 384, 528, 672, 804, 924, 1044, 1104,
];

const fn round_sixteenth(x: u32) -> u32 {
    (x + 8) >> 4
}

/// H.264 8x8 帧内代价缩放, 下标 QP/2
pub const H264_INTRA8_SCALE: [u32; 27] = [
    round_sixteenth(234),
    round_sixteenth(231),
    round_sixteenth(226),
    round_sixteenth(221),
    round_sixteenth(217),
    round_sixteenth(213),
    round_sixteenth(210),
    round_sixteenth(207),
    round_sixteenth(204),
    round_sixteenth(202),
    round_sixteenth(200),
    round_sixteenth(199),
    round_sixteenth(197),
    round_sixteenth(197),
    round_sixteenth(196),
    round_sixteenth(196),
    round_sixteenth(197),
    round_sixteenth(197),
    round_sixteenth(198),
    round_sixteenth(200),
    round_sixteenth(202),
    round_sixteenth(204),
    round_sixteenth(207),
    round_sixteenth(210),
    round_sixteenth(213),
    round_sixteenth(217),
    round_sixteenth(217),
];

/// H.264 帧间宏块偏置, 下标 (QP+1)/2
pub const H264_INTER_BIAS: [u32; 27] = [
    20, 20, 20, 20, 20, 20, 50, //
    100, 210, 420, 420, 445, 470, //
    495, 520, 535, 550, 570, 715, //
    860, 900, 1000, 1200, 1400, //
    1600, 1800, 2000,
];

/// 亮度 QP → 色度 QP (H.264 表 8-15, 含 chroma_qp_index_offset = 0)
pub const QP_SCALE_CR: [u8; 52] = [
    0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25,
    26, 27, 28, 29, 29, 30, 31, 32, 32, 33, 34, 34, 35, 35, 36, 36, 37, 37, 37, 38, 38, 38, 39, 39,
    39, 39,
];

/// H.264 帧间偏置, QP 钳位到 1..=51
pub fn h264_inter_bias(qp: u32) -> u32 {
    let qp = qp.clamp(1, 51);
    H264_INTER_BIAS[((qp + 1) >> 1) as usize]
}

/// lambda 多项式系数 (alpha, beta, gamma)
pub type LambdaCoeffs = (i32, i32, i32);

/// H.264: SATD 高段, SATD 低段, SAD 高段, SAD 低段
pub const H264_LAMBDA_COEFFS: [LambdaCoeffs; 4] = [
    (175, -10166, 163244),
    (16, -236, 8693),
    (198, -12240, 198865),
    (12, -176, 1402),
];

pub const MPEG4_LAMBDA_COEFFS: LambdaCoeffs = (0, 458, 1030);

pub const H263_LAMBDA_COEFFS: LambdaCoeffs = (0, 333, 716);

/// H.264 多项式分段点 (SATD 与 SAD 各 6 位)
pub const H264_POLYNOM_CUTOFF: u32 = 29 | (29 << 6);

pub const MPEG_POLYNOM_CUTOFF: u32 = 0x3F;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inter_bias_clamp() {
        assert_eq!(h264_inter_bias(0), 20);
        assert_eq!(h264_inter_bias(51), 2000);
        assert_eq!(h264_inter_bias(99), 2000);
        assert_eq!(h264_inter_bias(16), H264_INTER_BIAS[8]);
    }

    #[test]
    fn test_intra8_scale_rounding() {
        assert_eq!(H264_INTRA8_SCALE[0], 15);
        assert_eq!(H264_INTRA8_SCALE[14], 12);
        assert!(H264_INTRA8_SCALE.iter().all(|&v| v >= 8), "缩放值需不小于 8");
    }

    #[test]
    fn test_chroma_qp_monotonic() {
        assert!(QP_SCALE_CR.windows(2).all(|w| w[0] <= w[1]), "色度 QP 表应单调");
        assert_eq!(QP_SCALE_CR[51], 39);
    }
}
