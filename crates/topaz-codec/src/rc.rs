//! 码率控制参数推导.
//!
//! 由会话级码率设置推导固件码率控制的输入: 每帧/每 BU 比特数, 缓冲区大小,
//! 初始与最小 QP (按每像素比特数分段的经验公式), 以及按码率分档的比例因子.
//! 推导是纯函数, 相同输入总得到相同结果.

use bitflags::bitflags;
use log::{debug, warn};
use topaz_core::{FrameType, Standard, TopazError, TopazResult};

/// 未指定码率时的默认值 (MPEG-4/H.263)
pub const DEFAULT_BITS_PER_SECOND: u32 = 640_000;

/// 未指定帧率时的默认值
pub const DEFAULT_FRAME_RATE: u32 = 30;

/// MPEG-4/H.263 默认缓冲区长度 (0.1 秒单位)
pub const DEFAULT_BUFFER_TENTHS: u32 = 10;

bitflags! {
    /// 图像级码率控制标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RcFlags: u32 {
        const MPEG2          = 0x0000_0002;
        const MPEG4          = 0x0000_0004;
        const H263           = 0x0000_0008;
        /// 启用码率控制
        const RC             = 0x0000_0010;
        /// 低码率下偏向帧内 16x16
        const I16BIAS        = 0x0000_0020;
        /// B 帧
        const INTERB         = 0x0000_0080;
        /// 关闭场景切换检测
        const SCENE_DISABLED = 0x0000_0100;
    }
}

/// 码率控制模式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum RcMode {
    /// 固定 QP
    #[default]
    None,
    Cbr,
    Vbr,
    /// 增强型 CBR
    Erc,
    /// 视频会议模式, 缓冲区以帧为单位
    Vcm,
}

impl RcMode {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Cbr => "cbr",
            Self::Vbr => "vbr",
            Self::Erc => "erc",
            Self::Vcm => "vcm",
        }
    }

    pub fn from_name(name: &str) -> TopazResult<Self> {
        match name.to_ascii_lowercase().as_str() {
            "none" | "cqp" => Ok(Self::None),
            "cbr" => Ok(Self::Cbr),
            "vbr" => Ok(Self::Vbr),
            "erc" => Ok(Self::Erc),
            "vcm" => Ok(Self::Vcm),
            other => Err(TopazError::Unsupported(format!("未知码率控制模式: {other}"))),
        }
    }

    pub const fn is_enabled(&self) -> bool {
        !matches!(self, Self::None)
    }
}

/// HRD 缓冲区设置 (H.264 插入 HRD 参数时使用)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HrdBuffer {
    pub buffer_size: u32,
    pub initial_fullness: u32,
}

/// 码率控制输入
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RcInput {
    pub standard: Standard,
    pub mode: RcMode,
    pub width: u32,
    /// 编码帧高度 (16 对齐)
    pub height: u32,
    /// 0 表示使用默认值
    pub bits_per_second: u32,
    /// 0 表示使用默认值
    pub frame_rate: u32,
    pub intra_period: u32,
    pub b_frames: u32,
    /// 0 表示自动推导
    pub initial_qp: u32,
    /// 0 表示自动推导
    pub min_qp: u32,
    /// 缓冲区长度 (0.1 秒单位), 0 表示按码率推导
    pub buffer_tenths: u32,
    /// 每个基本单元的宏块数, 0 表示整帧
    pub bu_size: u32,
    pub scene_detect_disable: bool,
    pub hierarchical: bool,
    /// 传输码率, None 时等于编码码率
    pub transfer_bits_per_second: Option<u32>,
    pub hrd: Option<HrdBuffer>,
}

impl RcInput {
    pub fn new(standard: Standard, width: u32, height: u32) -> Self {
        Self {
            standard,
            mode: RcMode::Cbr,
            width,
            height,
            bits_per_second: 0,
            frame_rate: DEFAULT_FRAME_RATE,
            intra_period: 30,
            b_frames: 0,
            initial_qp: 0,
            min_qp: 0,
            buffer_tenths: 0,
            bu_size: 0,
            scene_detect_disable: false,
            hierarchical: false,
            transfer_bits_per_second: None,
            hrd: None,
        }
    }

    fn validate(&self) -> TopazResult<()> {
        if self.standard == Standard::Jpeg {
            return Err(TopazError::Unsupported("JPEG 不使用码率控制".into()));
        }
        if self.width < 16 || self.height < 16 {
            return Err(TopazError::config(format!(
                "码率控制需要至少一个宏块: {}x{}",
                self.width, self.height
            )));
        }
        let max_qp = self.standard.max_qp();
        if self.initial_qp > max_qp || self.min_qp > max_qp {
            return Err(TopazError::config(format!(
                "QP 超出范围: initial={}, min={}, max={max_qp}",
                self.initial_qp, self.min_qp
            )));
        }
        if self.mode.is_enabled() && self.intra_period == 0 {
            return Err(TopazError::config("帧内周期不能为 0"));
        }
        Ok(())
    }
}

/// 推导出的码率控制参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RcParams {
    pub mode: RcMode,
    pub bits_per_second: u32,
    pub frame_rate: u32,
    pub intra_period: u32,
    pub buffer_size: u32,
    pub initial_level: i32,
    pub initial_delay: i32,
    pub initial_qp: u32,
    pub min_qp: u32,
    pub max_qp: u32,
    pub mb_per_row: u32,
    pub mb_per_frame: u32,
    pub mb_per_bu: u32,
    pub bu_per_frame: u32,
    pub bits_per_frame: i32,
    pub bits_per_bu: i32,
    /// 缓冲区可容纳的帧数
    pub buffer_size_in_frames: i32,
    /// 固件使用的缓冲区大小 (VCM 模式下为帧数)
    pub firmware_buffer_size: i32,
    /// H.264 每帧传输比特数
    pub transfer_rate: i32,
    /// MPEG-4/H.263 每 GOP 比特数
    pub bits_per_gop: i32,
    /// 定点运算防溢出的比例因子
    pub scale_factor: u8,
    /// H.264 大帧反应速度因子
    pub rc_scale_factor: u32,
    /// MPEG-4/H.263 低码率半帧率模式
    pub half_frame_rate: bool,
    pub hierarchical: bool,
    /// 首帧图像标志
    pub flags: RcFlags,
}

impl RcParams {
    /// 推导码率控制参数
    pub fn derive(input: &RcInput) -> TopazResult<Self> {
        input.validate()?;
        let standard = input.standard;
        let h264 = standard == Standard::H264;
        let frame_rate = if input.frame_rate == 0 {
            DEFAULT_FRAME_RATE
        } else {
            input.frame_rate
        };

        let mut bits_per_second = input.bits_per_second;
        if bits_per_second > standard.max_bitrate() {
            warn!(
                "码率 {} 超过 {} 上限, 钳位到 {}",
                bits_per_second,
                standard,
                standard.max_bitrate()
            );
            bits_per_second = standard.max_bitrate();
        }
        if bits_per_second == 0 {
            bits_per_second = if h264 {
                // 表 A-1: 625SD 以上最小压缩比 4, 否则 2
                let raw = u64::from(input.width * input.height * 3 / 2) * 8 * u64::from(frame_rate);
                let ratio = if input.width > 720 { 4 } else { 2 };
                u32::try_from(raw / ratio).unwrap_or(u32::MAX).min(standard.max_bitrate())
            } else {
                DEFAULT_BITS_PER_SECOND
            };
        }

        let buffer_tenths = if input.buffer_tenths == 0 && !h264 {
            DEFAULT_BUFFER_TENTHS
        } else {
            input.buffer_tenths
        };
        let mut buffer_size = if buffer_tenths != 0 {
            (f64::from(bits_per_second) * f64::from(buffer_tenths) / 10.0) as u32
        } else if bits_per_second < 256_000 {
            ((9 * u64::from(bits_per_second)) >> 1) as u32
        } else {
            ((5 * u64::from(bits_per_second)) >> 1) as u32
        };

        let mut initial_delay = ((13 * u64::from(buffer_size)) >> 4) as i32;
        let mut initial_level = ((3 * u64::from(buffer_size)) >> 4) as i32;
        if h264 {
            // 初始水位取每帧比特数的整数倍
            let per_frame = (bits_per_second / frame_rate).max(1) as i32;
            initial_level = ((initial_level + per_frame / 2) / per_frame) * per_frame;
            initial_level = initial_level.max(per_frame);
            initial_delay = buffer_size as i32 - initial_level;
        }
        if let (true, Some(hrd)) = (h264, input.hrd) {
            buffer_size = hrd.buffer_size;
            initial_level = hrd.buffer_size as i32 - hrd.initial_fullness as i32;
            initial_delay = hrd.initial_fullness as i32;
        }

        let mb_per_row = input.width >> 4;
        let mb_per_frame = mb_per_row * (input.height >> 4);
        let mut mb_per_bu = if input.bu_size == 0 {
            mb_per_frame
        } else {
            input.bu_size.min(mb_per_frame)
        };
        let mut bu_per_frame = mb_per_frame / mb_per_bu;

        let bits_per_frame = ((bits_per_second + frame_rate / 2) / frame_rate) as i32;
        let bits_per_bu = bits_per_frame / (4 * bu_per_frame as i32);

        // 小分辨率按 30 帧计算每像素比特数
        let bpp_rate = if input.width <= 176 { 30 } else { frame_rate };
        let bpp = f64::from(bits_per_second)
            / (f64::from(bpp_rate) * f64::from(input.width) * f64::from(input.height));

        let transfer_bps = input.transfer_bits_per_second.unwrap_or(bits_per_second);
        let transfer_rate = ((u64::from(transfer_bps) + u64::from(frame_rate / 2))
            / u64::from(frame_rate)) as i32;
        let bits_per_gop = ((bits_per_second / frame_rate) * input.intra_period) as i32;

        let buffer_size_in_frames = if bits_per_frame != 0 {
            (buffer_size as i32 + bits_per_frame / 2) / bits_per_frame
        } else {
            30
        };

        let mut flags = RcFlags::empty();
        let max_qp = standard.max_qp();
        let (mut initial_qp, min_qp) = if h264 {
            let (initial, min) = h264_qp(input, bpp, buffer_size_in_frames, mb_per_frame);
            if bpp <= 0.3 {
                flags |= RcFlags::I16BIAS;
            }
            (initial, min)
        } else {
            mpeg_qp(input, bpp, buffer_size_in_frames)
        };

        let mut firmware_buffer_size = buffer_size as i32;
        let mut half_frame_rate = false;
        let scale_factor;
        if input.mode == RcMode::Vbr {
            mb_per_bu = mb_per_frame;
            bu_per_frame = 1;
            scale_factor = match bits_per_second {
                0..=639_999 => 2,
                640_000..=1_999_999 => 4,
                2_000_000..=7_999_999 => 6,
                _ => 8,
            };
        } else if h264 {
            scale_factor = match bits_per_second {
                0..=999_999 => 0,
                1_000_000..=1_999_999 => 1,
                2_000_000..=3_999_999 => 2,
                4_000_000..=7_999_999 => 3,
                _ => 4,
            };
            if input.mode == RcMode::Vcm {
                firmware_buffer_size = buffer_size_in_frames;
            }
        } else {
            scale_factor = 0;
            let bpp256 = f64::from(256 * (bits_per_second / input.width))
                / f64::from(input.height * frame_rate);
            half_frame_rate = (mb_per_frame > 1024 && bpp256 < 16.0)
                || (mb_per_frame <= 1024 && bpp256 < 24.0);
            if half_frame_rate {
                initial_qp = max_qp;
            }
        }

        if input.scene_detect_disable {
            flags |= RcFlags::SCENE_DISABLED;
        }
        if input.mode.is_enabled() {
            flags |= RcFlags::RC;
        }

        let rc_scale_factor = if h264 && bits_per_frame != 0 {
            let denominator = i64::from(firmware_buffer_size) - i64::from(initial_level);
            if denominator > 0 {
                u32::try_from(i64::from(bits_per_gop) * 256 / denominator).unwrap_or(u32::MAX)
            } else {
                0
            }
        } else {
            0
        };

        let params = Self {
            mode: input.mode,
            bits_per_second,
            frame_rate,
            intra_period: input.intra_period,
            buffer_size,
            initial_level,
            initial_delay,
            initial_qp,
            min_qp,
            max_qp,
            mb_per_row,
            mb_per_frame,
            mb_per_bu,
            bu_per_frame,
            bits_per_frame,
            bits_per_bu,
            buffer_size_in_frames,
            firmware_buffer_size,
            transfer_rate,
            bits_per_gop,
            scale_factor,
            rc_scale_factor,
            half_frame_rate,
            hierarchical: input.hierarchical,
            flags,
        };
        debug!(
            "码率控制推导: {} {} bps={}, buffer={}, bpp={:.4}, qp={} (min {}), scale={}",
            standard,
            input.mode.name(),
            bits_per_second,
            buffer_size,
            bpp,
            initial_qp,
            min_qp,
            scale_factor
        );
        Ok(params)
    }

    /// 某一帧的图像标志: 码率控制标志只随首帧下发, 标准标志每帧都带
    pub fn picture_flags(&self, standard: Standard, frame_type: FrameType, first_picture: bool) -> RcFlags {
        let mut flags = if self.mode.is_enabled() && first_picture {
            self.flags
        } else {
            RcFlags::empty()
        };
        match standard {
            Standard::H263 => flags |= RcFlags::H263,
            Standard::Mpeg4 => flags |= RcFlags::MPEG4,
            _ => {}
        }
        if frame_type == FrameType::InterB {
            flags |= RcFlags::INTERB;
        }
        flags
    }
}

/// H.264 初始与最小 QP
fn h264_qp(input: &RcInput, bpp: f64, buffer_frames: i32, mb_per_frame: u32) -> (u32, u32) {
    let mut min = if input.min_qp == 0 {
        let mut qp = if bpp >= 0.50 {
            4
        } else if bpp > 0.133 {
            (22.0 - 40.0 * bpp) as i32
        } else {
            (30.0 - 100.0 * bpp) as i32
        };
        // 小缓冲区抬高, 大缓冲区降低
        if buffer_frames < 5 {
            qp += 2;
        }
        if buffer_frames > 40 && qp >= 1 {
            qp -= 1;
        }
        // 高清内容码率更易控制, 允许更低的最小 QP
        if mb_per_frame > 2000 {
            qp -= 6;
        }
        qp
    } else {
        input.min_qp as i32
    };
    min = min.max(2);

    let mut initial = input.initial_qp as i32;
    if input.initial_qp == 0 {
        const BREAKPOINTS: [(f64, f64, f64); 6] = [
            (0.050568, 45.0, 78.10),
            (0.202272, 44.0, 72.51),
            (0.40454321, 34.0, 24.72),
            (0.80908642, 32.0, 19.78),
            (1.011358025, 25.0, 9.89),
            (f64::INFINITY, 18.0, 4.95),
        ];
        let (_, base, slope) = BREAKPOINTS
            .iter()
            .copied()
            .find(|&(limit, _, _)| bpp < limit)
            .unwrap_or(BREAKPOINTS[5]);
        initial = (base - slope * bpp) as i32;

        if buffer_frames < 20 || input.intra_period < 20 {
            initial += 2;
        }
        if buffer_frames < 5 {
            initial += 8;
        }
        if mb_per_frame > 2000 {
            initial -= 2;
        }
        if input.intra_period == 1 {
            initial += 12;
        } else if input.intra_period < 5 {
            initial += 6;
        }
    }
    let initial = initial.min(49).max(min);
    (initial as u32, min as u32)
}

/// MPEG-4/H.263 初始与最小 QP
fn mpeg_qp(input: &RcInput, bpp: f64, buffer_frames: i32) -> (u32, u32) {
    let limits: [f64; 6] = match input.width {
        176 => [0.042, 0.084, 0.126, 0.168, 0.336, 0.505],
        352 => [0.064, 0.084, 0.106, 0.126, 0.168, 0.210],
        _ => [0.050, 0.0760, 0.096, 0.145, 0.193, 0.289],
    };
    const QPS: [u32; 7] = [31, 26, 22, 18, 14, 10, 8];

    let mut initial = input.initial_qp;
    if initial == 0 {
        let bracket = limits.iter().position(|&l| bpp < l).unwrap_or(limits.len());
        initial = QPS[bracket];
        if buffer_frames < 20 || input.intra_period < 20 {
            initial += 2;
        }
        initial = initial.min(31);
    }
    let mut min = 2;
    if buffer_frames < 20 {
        min += 1;
    }
    (initial, min)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hd_input() -> RcInput {
        let mut input = RcInput::new(Standard::H264, 1920, 1088);
        input.bits_per_second = 4_000_000;
        input.frame_rate = 30;
        input.intra_period = 30;
        input
    }

    #[test]
    fn test_hd_scenario() {
        let rc = RcParams::derive(&hd_input()).unwrap();
        assert!((2..=49).contains(&rc.initial_qp), "初始 QP 越界: {}", rc.initial_qp);
        assert_eq!(rc.mb_per_frame, 8160);
        // 30 - 6.38 => 23, 大缓冲 -1, 高清 -6
        assert_eq!(rc.min_qp, 16, "高清内容应下调最小 QP");
        assert_eq!(rc.initial_qp, 37);
        assert_eq!(rc.buffer_size, 10_000_000);
        assert_eq!(rc.bits_per_frame, 133_333);
        assert_eq!(rc.buffer_size_in_frames, 75);
        assert_eq!(rc.scale_factor, 3);
        assert!(rc.flags.contains(RcFlags::I16BIAS | RcFlags::RC));
        assert_eq!(rc.initial_level % (4_000_000 / 30), 0, "初始水位应为每帧比特数的整数倍");
        assert_eq!(rc.initial_delay + rc.initial_level, rc.buffer_size as i32);
    }

    #[test]
    fn test_derivation_is_idempotent() {
        let input = hd_input();
        let first = RcParams::derive(&input).unwrap();
        assert_eq!(first, RcParams::derive(&input).unwrap());

        let mut again = input;
        again.initial_qp = first.initial_qp;
        again.min_qp = first.min_qp;
        again.bits_per_second = first.bits_per_second;
        let second = RcParams::derive(&again).unwrap();
        assert_eq!(second.initial_qp, first.initial_qp);
        assert_eq!(second.min_qp, first.min_qp);
        assert_eq!(second.buffer_size, first.buffer_size);
    }

    #[test]
    fn test_bitrate_clamp_and_default() {
        let mut input = hd_input();
        input.bits_per_second = 500_000_000;
        assert_eq!(RcParams::derive(&input).unwrap().bits_per_second, 135_000_000);

        let mut mpeg = RcInput::new(Standard::Mpeg4, 352, 288);
        let rc = RcParams::derive(&mpeg).unwrap();
        assert_eq!(rc.bits_per_second, DEFAULT_BITS_PER_SECOND);
        assert_eq!(rc.buffer_size, 640_000, "默认缓冲区为 1 秒");
        mpeg.bits_per_second = 20_000_000;
        assert_eq!(RcParams::derive(&mpeg).unwrap().bits_per_second, 16_000_000);

        let mut zero = RcInput::new(Standard::H264, 640, 480);
        zero.bits_per_second = 0;
        let rc = RcParams::derive(&zero).unwrap();
        assert_eq!(rc.bits_per_second, 640 * 480 * 3 / 2 * 8 * 30 / 2);
    }

    #[test]
    fn test_mpeg4_qcif_half_frame_rate() {
        let mut input = RcInput::new(Standard::Mpeg4, 176, 144);
        input.bits_per_second = 64_000;
        let rc = RcParams::derive(&input).unwrap();
        assert!(rc.half_frame_rate, "低码率应进入半帧率模式");
        assert_eq!(rc.initial_qp, 31);
        assert_eq!(rc.max_qp, 31);
        assert_eq!(rc.min_qp, 2);
    }

    #[test]
    fn test_mpeg4_bpp_brackets() {
        let mut input = RcInput::new(Standard::H263, 352, 288);
        input.bits_per_second = 2_000_000;
        input.intra_period = 60;
        let rc = RcParams::derive(&input).unwrap();
        // bpp ≈ 0.657 超过最高分档
        assert_eq!(rc.initial_qp, 8);
        assert!(!rc.half_frame_rate);
        assert_eq!(rc.bits_per_gop, 2_000_000 / 30 * 60);
    }

    #[test]
    fn test_vbr_and_vcm_modes() {
        let mut input = hd_input();
        input.mode = RcMode::Vbr;
        input.bu_size = 120;
        let rc = RcParams::derive(&input).unwrap();
        assert_eq!(rc.bu_per_frame, 1);
        assert_eq!(rc.mb_per_bu, rc.mb_per_frame);
        assert_eq!(rc.scale_factor, 6);

        input.mode = RcMode::Vcm;
        let rc = RcParams::derive(&input).unwrap();
        assert_eq!(rc.firmware_buffer_size, rc.buffer_size_in_frames);
        assert_eq!(rc.rc_scale_factor, 0, "VCM 缓冲区小于初始水位时不计算");
    }

    #[test]
    fn test_small_gop_raises_initial_qp() {
        let mut input = hd_input();
        input.intra_period = 1;
        let rc = RcParams::derive(&input).unwrap();
        assert_eq!(rc.initial_qp, 49);
    }

    #[test]
    fn test_picture_flags() {
        let mut input = RcInput::new(Standard::Mpeg4, 352, 288);
        input.scene_detect_disable = true;
        let rc = RcParams::derive(&input).unwrap();
        let first = rc.picture_flags(Standard::Mpeg4, FrameType::Intra, true);
        assert!(first.contains(RcFlags::MPEG4 | RcFlags::RC | RcFlags::SCENE_DISABLED));
        let later = rc.picture_flags(Standard::Mpeg4, FrameType::InterP, false);
        assert_eq!(later, RcFlags::MPEG4);
        let b = rc.picture_flags(Standard::H264, FrameType::InterB, false);
        assert_eq!(b, RcFlags::INTERB);
    }

    #[test]
    fn test_invalid_inputs() {
        assert!(RcParams::derive(&RcInput::new(Standard::Jpeg, 64, 64)).unwrap_err().is_config());
        let mut input = hd_input();
        input.initial_qp = 60;
        assert!(RcParams::derive(&input).unwrap_err().is_config());
        assert!(RcMode::from_name("abr").unwrap_err().is_config());
        assert_eq!(RcMode::from_name("VBR").unwrap(), RcMode::Vbr);
    }
}
