//! 偏置/lambda 表生成器.
//!
//! 每次重新生成都覆盖全部 QP 项: lambda 按 QP 降序逐项计算,
//! 偏置按 QP 降序隔项计算 (硬件每两个 QP 共用一项).
//! 启用码率控制 (或 `rc_biases`) 时偏置来自经验公式与查表,
//! 否则全部取自调用方覆盖值, 缺失覆盖值是配置错误.
//!
//! 生成结果可转换为固件执行的寄存器写入序列 ([`BiasTables::register_writes`]).

pub mod tables;

use log::{debug, trace};
use topaz_core::{FrameType, Standard, TopazError, TopazResult};

use tables::{
    H263_LAMBDA_COEFFS, H263_QP_LAMBDA, H264_DIRECT_BIAS, H264_INTRA8_SCALE, H264_LAMBDA_COEFFS,
    H264_POLYNOM_CUTOFF, H264_QP_LAMBDA_SAD, H264_QP_LAMBDA_SATD, LambdaCoeffs,
    MPEG_POLYNOM_CUTOFF, MPEG4_LAMBDA_COEFFS, MPEG4_QP_LAMBDA, QP_SCALE_CR, h264_inter_bias,
};

/// 历史接口中 "未设置" 的哨兵值
pub const UNSET_OVERRIDE: u32 = 0xCDCD_CDCD;

/// 表长度 (H.264 QP 0..=52)
pub const TABLE_LEN: usize = 53;

/// 序列器配置初始值
pub const SEQUENCER_CONFIG_INIT: u32 = 0x4003_8412;

/// 偏置覆盖值
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BiasOverrides {
    /// 帧内 16x16 偏置
    pub intra16: Option<u32>,
    /// P 帧帧间宏块偏置
    pub inter_mb: Option<u32>,
    /// B 帧帧间宏块偏置
    pub inter_mb_b: Option<u32>,
    /// B 帧直接向量偏置
    pub direct_vec: Option<u32>,
    /// P 帧 IPE 跳过向量偏置
    pub ipe_skip_vec: Option<u32>,
}

impl BiasOverrides {
    /// 将哨兵值转换为未设置
    pub fn from_raw(value: u32) -> Option<u32> {
        (value != UNSET_OVERRIDE).then_some(value)
    }

    fn required(value: Option<u32>, name: &str) -> TopazResult<u32> {
        value.ok_or_else(|| TopazError::config(format!("码率控制关闭时必须设置偏置覆盖值 {name}")))
    }
}

/// 偏置生成参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BiasParams {
    pub rc_enable: bool,
    /// 码率控制关闭时仍使用公式偏置
    pub rc_biases: bool,
    /// 非零时替换查表 SAD lambda
    pub lambda_sad: u32,
    /// 非零时替换查表 SATD lambda
    pub lambda_satd: u32,
    pub satd_table: usize,
    pub overrides: BiasOverrides,
    pub th_skip_ipe: u32,
    pub th_inter: u32,
    pub th_inter_qp: u32,
    pub th_inter_max_level: u32,
    pub th_skip_spe: u32,
    pub sz1: u32,
    pub sz2: u32,
    pub zero_detection_disable: bool,
    pub zb4: u32,
    pub zb8: u32,
    /// MPEG-4 运动向量 fcode
    pub fcode: u32,
    pub chunks_per_mb: u32,
    pub max_chunks: u32,
    pub priority_chunks: u32,
}

impl BiasParams {
    pub fn new(rc_enable: bool) -> Self {
        Self {
            rc_enable,
            rc_biases: true,
            lambda_sad: 0,
            lambda_satd: 0,
            satd_table: 0,
            overrides: BiasOverrides::default(),
            th_skip_ipe: 6,
            th_inter: 60,
            th_inter_qp: 10,
            th_inter_max_level: 1500,
            th_skip_spe: 6,
            sz1: 6,
            sz2: 6,
            zero_detection_disable: false,
            zb4: 6,
            zb8: 4,
            fcode: 4,
            chunks_per_mb: 0x40,
            max_chunks: 0xA0,
            priority_chunks: 0xA0 - 0x60,
        }
    }

    fn formula_biases(&self) -> bool {
        self.rc_enable || self.rc_biases
    }

    /// LRITC 缓存块配置 (PM 16..23, MX 8..15, PY 0..7)
    pub fn cache_chunk_config(&self) -> u32 {
        ((self.chunks_per_mb & 0xFF) << 16)
            | ((self.max_chunks & 0xFF) << 8)
            | (self.max_chunks.wrapping_sub(self.priority_chunks) & 0xFF)
    }

    /// H.264 零块拒绝阈值 (zb4 0..4, zb8 8..13)
    pub fn reject_threshold(&self) -> u32 {
        if self.zero_detection_disable {
            0
        } else {
            (self.zb4 & 0x1F) | ((self.zb8 << 8) & 0x3F00)
        }
    }
}

impl Default for BiasParams {
    fn default() -> Self {
        Self::new(true)
    }
}

/// MPEG-4/H.263 DC 缩放因子
pub fn dc_scaler(qp: u32, chroma: bool) -> u32 {
    if chroma {
        match qp {
            1..=4 => 8,
            5..=24 => (qp + 13) / 2,
            _ => qp.wrapping_sub(6),
        }
    } else {
        match qp {
            1..=4 => 8,
            5..=8 => 2 * qp,
            9..=24 => qp + 8,
            _ => (2 * qp).wrapping_sub(16),
        }
    }
}

/// 偏置相关的硬件寄存器
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BiasRegister {
    SequencerConfig,
    PolynomAlpha(u8),
    PolynomGamma(u8),
    PolynomCutoff(u8),
    IntraBias,
    InterBias,
    DirectBias,
    IntraScale,
    Sz,
    H264RejectThreshold,
    VlcMpeg4Config,
    CacheChunkConfig,
}

impl BiasRegister {
    /// 已知的寄存器偏移
    pub const fn offset(&self) -> Option<u32> {
        match self {
            Self::DirectBias => Some(0x0124),
            Self::IntraBias => Some(0x0128),
            Self::InterBias => Some(0x012C),
            Self::Sz => Some(0x0344),
            Self::CacheChunkConfig => Some(0x0050),
            Self::H264RejectThreshold => Some(0x0184),
            _ => None,
        }
    }

    /// 是否按流水线 (编码核) 逐个写入
    pub const fn is_per_pipe(&self) -> bool {
        matches!(
            self,
            Self::SequencerConfig
                | Self::Sz
                | Self::H264RejectThreshold
                | Self::VlcMpeg4Config
                | Self::CacheChunkConfig
        )
    }

    pub fn name(&self) -> String {
        match self {
            Self::SequencerConfig => "SEQUENCER_CONFIG".into(),
            Self::PolynomAlpha(core) => format!("POLYNOM_ALPHA_COEFF_CORE_{core}"),
            Self::PolynomGamma(core) => format!("POLYNOM_GAMMA_COEFF_CORE_{core}"),
            Self::PolynomCutoff(core) => format!("POLYNOM_CUTOFF_CORE_{core}"),
            Self::IntraBias => "INTRA_BIAS_TABLE".into(),
            Self::InterBias => "INTER_BIAS_TABLE".into(),
            Self::DirectBias => "DIRECT_BIAS_TABLE".into(),
            Self::IntraScale => "INTRA_SCALE_TABLE".into(),
            Self::Sz => "SZ".into(),
            Self::H264RejectThreshold => "H264_RT".into(),
            Self::VlcMpeg4Config => "VLC_MPEG4_CFG".into(),
            Self::CacheChunkConfig => "CHCF".into(),
        }
    }
}

/// 单次寄存器写入
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterWrite {
    pub register: BiasRegister,
    /// 逐流水线寄存器的流水线编号
    pub pipe: Option<u8>,
    pub value: u32,
}

impl RegisterWrite {
    fn shared(register: BiasRegister, value: u32) -> Self {
        Self {
            register,
            pipe: None,
            value,
        }
    }

    fn pipe(register: BiasRegister, pipe: u8, value: u32) -> Self {
        Self {
            register,
            pipe: Some(pipe),
            value,
        }
    }
}

/// alpha 在 0..7, beta 在 8..23
fn polynom_alpha_word(coeffs: LambdaCoeffs) -> u32 {
    let (alpha, beta, _) = coeffs;
    (alpha as u32 & 0xFF) | (((beta as u32) << 8) & 0x00FF_FF00)
}

/// gamma 在 0..23
fn polynom_gamma_word(coeffs: LambdaCoeffs) -> u32 {
    coeffs.2 as u32 & 0x00FF_FFFF
}

/// 生成的偏置/lambda 表
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BiasTables {
    pub standard: Standard,
    /// 每 QP 的 lambda 寄存器值
    pub lambda: [u32; TABLE_LEN],
    pub intra: [u32; TABLE_LEN],
    pub inter_p: [u32; TABLE_LEN],
    pub direct_p: [u32; TABLE_LEN],
    pub inter_b: [u32; TABLE_LEN],
    pub direct_b: [u32; TABLE_LEN],
    pub intra_scale: [u32; TABLE_LEN],
    pub sz1: u32,
    pub reject_threshold: u32,
    pub cache_chunk_config: u32,
    pub seq_config_init: u32,
    pub fcode: u32,
}

impl BiasTables {
    fn empty(standard: Standard, params: &BiasParams) -> Self {
        Self {
            standard,
            lambda: [0; TABLE_LEN],
            intra: [0; TABLE_LEN],
            inter_p: [0; TABLE_LEN],
            direct_p: [0; TABLE_LEN],
            inter_b: [0; TABLE_LEN],
            direct_b: [0; TABLE_LEN],
            intra_scale: [0; TABLE_LEN],
            sz1: if params.formula_biases() {
                params.sz1
            } else {
                params.sz2
            },
            reject_threshold: 0,
            cache_chunk_config: params.cache_chunk_config(),
            seq_config_init: SEQUENCER_CONFIG_INIT,
            fcode: params.fcode,
        }
    }

    /// 按编码标准生成全部表
    pub fn generate(standard: Standard, params: &BiasParams) -> TopazResult<Self> {
        if params.satd_table >= H264_QP_LAMBDA_SATD.len() {
            return Err(TopazError::config(format!(
                "SATD lambda 表编号越界: {}",
                params.satd_table
            )));
        }
        let tables = match standard {
            Standard::H264 => Self::generate_h264(params)?,
            Standard::Mpeg4 => Self::generate_mpeg(standard, &MPEG4_QP_LAMBDA, params)?,
            Standard::H263 => Self::generate_mpeg(standard, &H263_QP_LAMBDA, params)?,
            Standard::Jpeg => {
                return Err(TopazError::Unsupported("JPEG 不使用偏置表".into()));
            }
        };
        debug!(
            "偏置表生成完成: standard={}, rc={}, sz1={}, lritc={:#x}",
            standard,
            params.formula_biases(),
            tables.sz1,
            tables.cache_chunk_config
        );
        Ok(tables)
    }

    fn generate_h264(params: &BiasParams) -> TopazResult<Self> {
        let mut t = Self::empty(Standard::H264, params);
        let satd_table = &H264_QP_LAMBDA_SATD[params.satd_table];

        for n in (0..=51usize).rev() {
            let sad_index = n.saturating_sub(12);
            let mut sad = u32::from(H264_QP_LAMBDA_SAD[sad_index]);
            let mut satd = u32::from(satd_table[n]);
            if params.lambda_sad != 0 {
                sad = params.lambda_sad;
            }
            if params.lambda_satd != 0 {
                satd = params.lambda_satd;
            }
            t.lambda[n] = u32::from(QP_SCALE_CR[n]) | (satd << 8) | (sad << 16);
        }

        let ov = &params.overrides;
        // 非公式模式下的覆盖值在进入循环前校验, 失败时不产生任何表
        let manual = if params.formula_biases() {
            None
        } else {
            Some((
                BiasOverrides::required(ov.direct_vec, "direct_vec")?,
                BiasOverrides::required(ov.inter_mb_b, "inter_mb_b")?,
                BiasOverrides::required(ov.ipe_skip_vec, "ipe_skip_vec")?,
                BiasOverrides::required(ov.inter_mb, "inter_mb")?,
            ))
        };

        for n in (0..=52usize).rev().step_by(2) {
            let qp = n.min(51) as u32;
            // 帧内 8x8 缩放只随公式偏置写入, 手动模式下保持 0
            let (inter_p, direct_p, inter_b, direct_b, intra16, intra8_scale) = match manual {
                None => {
                    let inter = h264_inter_bias(qp);
                    let direct = H264_DIRECT_BIAS[n / 2];
                    (
                        ov.inter_mb.unwrap_or(inter),
                        ov.ipe_skip_vec.unwrap_or(direct),
                        ov.inter_mb_b.unwrap_or(inter),
                        ov.direct_vec.unwrap_or(direct),
                        ov.intra16.unwrap_or(0),
                        H264_INTRA8_SCALE[n / 2] - 8,
                    )
                }
                Some((direct_b, inter_b, direct_p, inter_p)) => {
                    (inter_p, direct_p, inter_b, direct_b, ov.intra16.unwrap_or(0), 0)
                }
            };
            t.intra[n] = intra16;
            t.inter_p[n] = inter_p;
            t.direct_p[n] = direct_p;
            t.inter_b[n] = inter_b;
            t.direct_b[n] = direct_b;
            t.intra_scale[n] = intra8_scale;
            trace!("H.264 偏置 qp={n}: inter={inter_p}, direct={direct_p}, intra={intra16}");
        }

        t.reject_threshold = params.reject_threshold();
        Ok(t)
    }

    fn generate_mpeg(
        standard: Standard,
        lambda_map: &[u8; 31],
        params: &BiasParams,
    ) -> TopazResult<Self> {
        let mut t = Self::empty(standard, params);
        let ov = &params.overrides;
        let manual = if params.formula_biases() {
            None
        } else {
            Some((
                BiasOverrides::required(ov.ipe_skip_vec, "ipe_skip_vec")?,
                BiasOverrides::required(ov.inter_mb, "inter_mb")?,
            ))
        };

        // 循环结束时保留 QP=1 的 lambda, 直接向量偏置沿用该值
        let mut last_lambda = 0u32;
        for n in (1..=31u32).rev() {
            let dc_luma = dc_scaler(n, false) & 0xFF;
            let dc_chroma = dc_scaler(n, true) & 0xFF;
            let lambda = if params.lambda_sad != 0 {
                params.lambda_sad & 0xFF
            } else {
                u32::from(lambda_map[(n - 1) as usize])
            };
            t.lambda[n as usize] = dc_luma | (dc_chroma << 8) | (lambda << 16);
            last_lambda = lambda;
        }

        for n in (1..=31u32).rev().step_by(2) {
            let (direct, inter, intra) = match manual {
                None => {
                    let direct = params.th_skip_ipe.wrapping_mul(last_lambda);
                    // 无符号运算: QP 小于阈值时回绕后被钳位到上限
                    let inter = params
                        .th_inter
                        .wrapping_mul(n.wrapping_sub(params.th_inter_qp))
                        .min(params.th_inter_max_level);
                    (direct, inter, 0)
                }
                Some((direct, inter)) => (direct, inter, ov.intra16.unwrap_or(0)),
            };
            t.intra[n as usize] = intra;
            t.inter_p[n as usize] = inter;
            t.direct_p[n as usize] = direct;
        }
        Ok(t)
    }

    /// lambda 多项式系数组
    pub fn lambda_coeffs(&self) -> &'static [LambdaCoeffs] {
        match self.standard {
            Standard::H264 => &H264_LAMBDA_COEFFS,
            Standard::Mpeg4 => std::slice::from_ref(&MPEG4_LAMBDA_COEFFS),
            _ => std::slice::from_ref(&H263_LAMBDA_COEFFS),
        }
    }

    /// 固件加载偏置表时执行的寄存器写入序列
    pub fn register_writes(&self, frame_type: FrameType, pipes: u8) -> Vec<RegisterWrite> {
        let mut writes = Vec::new();
        for pipe in 0..pipes {
            writes.push(RegisterWrite::pipe(
                BiasRegister::SequencerConfig,
                pipe,
                self.seq_config_init,
            ));
        }

        let h264 = self.standard == Standard::H264;
        let cores: u8 = if h264 { 3 } else { 1 };
        for &coeffs in self.lambda_coeffs() {
            let alpha = polynom_alpha_word(coeffs);
            let gamma = polynom_gamma_word(coeffs);
            for core in 0..cores {
                writes.push(RegisterWrite::shared(BiasRegister::PolynomAlpha(core), alpha));
            }
            for core in 0..cores {
                writes.push(RegisterWrite::shared(BiasRegister::PolynomGamma(core), gamma));
            }
        }
        let cutoff = if h264 {
            H264_POLYNOM_CUTOFF
        } else {
            MPEG_POLYNOM_CUTOFF
        };
        for core in 0..cores {
            writes.push(RegisterWrite::shared(BiasRegister::PolynomCutoff(core), cutoff));
        }

        if h264 {
            let b_frame = frame_type == FrameType::InterB;
            for n in (0..=52usize).rev().step_by(2) {
                let (inter, direct) = if b_frame {
                    (self.inter_b[n], self.direct_b[n])
                } else {
                    (self.inter_p[n], self.direct_p[n])
                };
                writes.push(RegisterWrite::shared(BiasRegister::InterBias, inter));
                writes.push(RegisterWrite::shared(BiasRegister::DirectBias, direct));
                writes.push(RegisterWrite::shared(BiasRegister::IntraBias, self.intra[n]));
                writes.push(RegisterWrite::shared(
                    BiasRegister::IntraScale,
                    self.intra_scale[n],
                ));
            }
        } else {
            for n in (1..=31usize).rev().step_by(2) {
                writes.push(RegisterWrite::shared(BiasRegister::IntraBias, self.intra[n]));
                writes.push(RegisterWrite::shared(BiasRegister::InterBias, self.inter_p[n]));
                writes.push(RegisterWrite::shared(BiasRegister::DirectBias, self.direct_p[n]));
            }
        }

        for pipe in 0..pipes {
            writes.push(RegisterWrite::pipe(BiasRegister::Sz, pipe, self.sz1));
            match self.standard {
                Standard::H264 => writes.push(RegisterWrite::pipe(
                    BiasRegister::H264RejectThreshold,
                    pipe,
                    self.reject_threshold,
                )),
                Standard::Mpeg4 => writes.push(RegisterWrite::pipe(
                    BiasRegister::VlcMpeg4Config,
                    pipe,
                    self.fcode.saturating_sub(1) & 0x7,
                )),
                _ => {}
            }
        }
        for pipe in 0..pipes {
            writes.push(RegisterWrite::pipe(
                BiasRegister::CacheChunkConfig,
                pipe,
                self.cache_chunk_config,
            ));
        }

        debug!(
            "偏置寄存器序列: standard={}, frame={}, pipes={}, writes={}",
            self.standard,
            frame_type,
            pipes,
            writes.len()
        );
        writes
    }
}

#[cfg(test)]
mod tests {
    use super::tables::{H264_INTER_BIAS, H264_QP_LAMBDA_SATD};
    use super::*;

    #[test]
    fn test_h264_defaults_follow_tables() {
        let t = BiasTables::generate(Standard::H264, &BiasParams::default()).unwrap();
        for n in 0..=51usize {
            let sad = u32::from(H264_QP_LAMBDA_SAD[n.saturating_sub(12)]);
            let satd = u32::from(H264_QP_LAMBDA_SATD[0][n]);
            assert_eq!(t.lambda[n] >> 16, sad, "qp {n} 的 SAD lambda 不一致");
            assert_eq!((t.lambda[n] >> 8) & 0xFF, satd, "qp {n} 的 SATD lambda 不一致");
            assert_eq!(t.lambda[n] & 0xFF, u32::from(QP_SCALE_CR[n]));
        }
        for n in (0..=52usize).step_by(2) {
            assert_eq!(t.direct_p[n], H264_DIRECT_BIAS[n / 2]);
            assert_eq!(t.inter_p[n], h264_inter_bias(n.min(51) as u32));
            assert_eq!(t.inter_b[n], t.inter_p[n]);
            assert_eq!(t.intra[n], 0);
        }
        assert_eq!(t.inter_p[52], H264_INTER_BIAS[26]);
        assert_eq!(t.intra_scale[0], 7);
        // 奇数 QP 不写偏置
        assert_eq!(t.inter_p[1], 0);
        assert_eq!(t.reject_threshold, 0x0406);
        assert_eq!(t.cache_chunk_config, 0x40A060);
        assert_eq!(t.sz1, 6);
    }

    #[test]
    fn test_h264_overrides() {
        let mut params = BiasParams::default();
        params.lambda_sad = 33;
        params.overrides.inter_mb = Some(777);
        params.overrides.direct_vec = Some(12);
        let t = BiasTables::generate(Standard::H264, &params).unwrap();
        assert!((0..=51).all(|n| t.lambda[n] >> 16 == 33), "SAD lambda 应被覆盖");
        assert!((0..=52).step_by(2).all(|n| t.inter_p[n] == 777));
        assert!((0..=52).step_by(2).all(|n| t.direct_b[n] == 12));
        assert_eq!(t.direct_p[10], H264_DIRECT_BIAS[5], "未覆盖项保持查表值");
    }

    #[test]
    fn test_manual_biases_require_overrides() {
        let mut params = BiasParams::new(false);
        params.rc_biases = false;
        let err = BiasTables::generate(Standard::H264, &params).unwrap_err();
        assert!(err.is_config(), "缺少覆盖值应为配置错误");
        assert!(err.to_string().contains("direct_vec"));

        params.overrides = BiasOverrides {
            intra16: None,
            inter_mb: Some(100),
            inter_mb_b: Some(200),
            direct_vec: Some(30),
            ipe_skip_vec: Some(40),
        };
        params.sz2 = 3;
        let t = BiasTables::generate(Standard::H264, &params).unwrap();
        assert_eq!(t.inter_b[20], 200);
        assert_eq!(t.direct_p[20], 40);
        assert_eq!(t.sz1, 3, "非公式模式使用 sz2");
        assert!(t.intra_scale.iter().all(|&v| v == 0), "手动偏置不写帧内缩放");

        let formula = BiasTables::generate(Standard::H264, &BiasParams::default()).unwrap();
        assert!(formula.intra_scale.iter().step_by(2).any(|&v| v != 0));

        let err = BiasTables::generate(Standard::Mpeg4, &BiasParams {
            overrides: BiasOverrides::default(),
            ..params
        })
        .unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_mpeg4_tables() {
        let t = BiasTables::generate(Standard::Mpeg4, &BiasParams::default()).unwrap();
        for n in 1..=31usize {
            assert_eq!(t.lambda[n] >> 16, u32::from(MPEG4_QP_LAMBDA[n - 1]));
        }
        assert_eq!(t.lambda[1] & 0xFFFF, 8 | (8 << 8));
        assert_eq!(t.lambda[31] & 0xFF, 46);
        // QP=1 的 lambda 为 0, 直接向量偏置随之为 0
        assert!((1..=31).step_by(2).all(|n| t.direct_p[n] == 0));
        assert_eq!(t.inter_p[11], 60);
        assert_eq!(t.inter_p[31], 1260);
        assert_eq!(t.inter_p[9], 1500, "回绕后的负值钳位到上限");
        assert_eq!(t.inter_p[1], 1500);
        assert_eq!(t.inter_p[10], 0, "偶数 QP 不写偏置");
    }

    #[test]
    fn test_h263_lambda_override_feeds_direct_bias() {
        let mut params = BiasParams::default();
        params.lambda_sad = 5;
        let t = BiasTables::generate(Standard::H263, &params).unwrap();
        assert_eq!(t.direct_p[31], 30);
        assert_eq!(t.lambda[2] >> 16, 5);
    }

    #[test]
    fn test_dc_scaler() {
        assert_eq!(dc_scaler(3, false), 8);
        assert_eq!(dc_scaler(6, false), 12);
        assert_eq!(dc_scaler(20, false), 28);
        assert_eq!(dc_scaler(31, false), 46);
        assert_eq!(dc_scaler(10, true), 11);
        assert_eq!(dc_scaler(31, true), 25);
    }

    #[test]
    fn test_jpeg_rejected() {
        let err = BiasTables::generate(Standard::Jpeg, &BiasParams::default()).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_h264_register_order() {
        let t = BiasTables::generate(Standard::H264, &BiasParams::default()).unwrap();
        let writes = t.register_writes(FrameType::InterP, 2);
        // 2 序列器 + 4*6 系数 + 3 分段点 + 27*4 偏置 + 2*2 + 2
        assert_eq!(writes.len(), 2 + 24 + 3 + 108 + 4 + 2);
        assert_eq!(writes[0].register, BiasRegister::SequencerConfig);
        assert_eq!(writes[0].value, SEQUENCER_CONFIG_INIT);
        assert_eq!(writes[2].register, BiasRegister::PolynomAlpha(0));
        assert_eq!(writes[2].value, 175 | ((-10166i32 as u32) << 8 & 0xFFFF00));
        assert_eq!(writes[5].register, BiasRegister::PolynomGamma(0));
        assert_eq!(writes[5].value, 163244);
        assert_eq!(writes[26].register, BiasRegister::PolynomCutoff(0));
        assert_eq!(writes[26].value, 29 | (29 << 6));

        let first_bias = &writes[29..33];
        assert_eq!(first_bias[0].register, BiasRegister::InterBias);
        assert_eq!(first_bias[0].value, t.inter_p[52]);
        assert_eq!(first_bias[1].register, BiasRegister::DirectBias);
        assert_eq!(first_bias[2].register, BiasRegister::IntraBias);
        assert_eq!(first_bias[3].register, BiasRegister::IntraScale);

        let tail = &writes[writes.len() - 6..];
        assert_eq!(tail[0].register, BiasRegister::Sz);
        assert_eq!(tail[1].register, BiasRegister::H264RejectThreshold);
        assert_eq!(tail[1].value, 0x0406);
        assert_eq!(tail[5].register, BiasRegister::CacheChunkConfig);
        assert_eq!(tail[5].pipe, Some(1));
    }

    #[test]
    fn test_b_frame_uses_b_tables() {
        let mut params = BiasParams::default();
        params.overrides.inter_mb_b = Some(999);
        let t = BiasTables::generate(Standard::H264, &params).unwrap();
        let writes = t.register_writes(FrameType::InterB, 1);
        let inter: Vec<u32> = writes
            .iter()
            .filter(|w| w.register == BiasRegister::InterBias)
            .map(|w| w.value)
            .collect();
        assert_eq!(inter.len(), 27);
        assert!(inter.iter().all(|&v| v == 999), "B 帧应加载 B 偏置表");
    }

    #[test]
    fn test_mpeg4_register_order() {
        let t = BiasTables::generate(Standard::Mpeg4, &BiasParams::default()).unwrap();
        let writes = t.register_writes(FrameType::InterP, 1);
        assert_eq!(writes.len(), 1 + 3 + 16 * 3 + 2 + 1);
        assert_eq!(writes[1].value, 458 << 8);
        assert_eq!(writes[2].value, 1030);
        assert_eq!(writes[3].value, 0x3F);
        assert_eq!(writes[4].register, BiasRegister::IntraBias);
        assert_eq!(writes[5].register, BiasRegister::InterBias);
        assert_eq!(writes[5].value, t.inter_p[31]);
        let vlc = writes
            .iter()
            .find(|w| w.register == BiasRegister::VlcMpeg4Config)
            .unwrap();
        assert_eq!(vlc.value, 3, "RSIZE 为 fcode-1");
    }

    #[test]
    fn test_regeneration_is_complete() {
        let params = BiasParams::default();
        let a = BiasTables::generate(Standard::H264, &params).unwrap();
        let b = BiasTables::generate(Standard::H264, &params).unwrap();
        assert_eq!(a, b);
        assert_eq!(BiasOverrides::from_raw(UNSET_OVERRIDE), None);
        assert_eq!(BiasOverrides::from_raw(7), Some(7));
    }
}
