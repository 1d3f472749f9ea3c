//! H.264 访问单元分隔符与 SEI 消息.
//!
//! 缓冲周期与图像定时中的 NAL HRD 延迟值由固件按帧填充 (令牌),
//! VCL HRD 与时钟时间戳由主机直接写入.

use topaz_core::{ElementStream, StartCodeKind, TokenKind, TopazError, TopazResult};

use super::START_CODE_PREFIX_BYTES;
use super::sequence::{CPB_REMOVAL_DELAY_SIZE, DPB_OUTPUT_DELAY_SIZE, INITIAL_CPB_REMOVAL_DELAY_SIZE};

/// SEI 使用的起始码前缀长度 (00 00 01)
const SEI_START_CODE_PREFIX_BYTES: u32 = 3;

/// 写入访问单元分隔符 (NAL 类型 9)
///
/// primary_pic_type = 2, 允许任意切片类型.
pub fn write_aud_header(es: &mut ElementStream) -> TopazResult<()> {
    es.begin_start_code(StartCodeKind::Raw)?;
    es.write_start_code_prefix(START_CODE_PREFIX_BYTES)?;
    es.write_byte(9)?;
    es.write_bits(2, 3)?;
    // rbsp_stop_one_bit 与对齐位
    es.write_bits(0x10, 5)?;
    es.write_byte(0x80)
}

/// 缓冲周期中单个 CPB 的初始延迟
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpbInitialDelay {
    pub initial_cpb_removal_delay: u32,
    pub initial_cpb_removal_delay_offset: u32,
}

/// SEI 缓冲周期参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferingPeriodSei {
    pub nal_hrd_present: bool,
    pub vcl_hrd_present: bool,
    /// cpb_cnt_minus1
    pub cpb_cnt_minus1: u32,
    /// initial_cpb_removal_delay_length_minus1 + 1
    pub initial_delay_length: u8,
    /// VCL HRD 的初始延迟, 每个 CPB 一项
    pub vcl_delays: Vec<CpbInitialDelay>,
}

impl Default for BufferingPeriodSei {
    fn default() -> Self {
        Self {
            nal_hrd_present: true,
            vcl_hrd_present: false,
            cpb_cnt_minus1: 0,
            initial_delay_length: INITIAL_CPB_REMOVAL_DELAY_SIZE,
            vcl_delays: Vec::new(),
        }
    }
}

impl BufferingPeriodSei {
    /// 载荷位数 (含 seq_parameter_set_id)
    fn payload_bits(&self) -> u32 {
        let per_hrd = (self.cpb_cnt_minus1 + 1) * u32::from(self.initial_delay_length) * 2;
        let mut bits = 1;
        if self.nal_hrd_present {
            bits += per_hrd;
        }
        if self.vcl_hrd_present {
            bits += per_hrd;
        }
        bits
    }
}

/// 写入 SEI 缓冲周期 (payloadType 0)
pub fn write_buffering_period_sei(
    es: &mut ElementStream,
    params: &BufferingPeriodSei,
) -> TopazResult<()> {
    let cpb_count = params.cpb_cnt_minus1 as usize + 1;
    if params.vcl_hrd_present && params.vcl_delays.len() < cpb_count {
        return Err(TopazError::config(format!(
            "VCL HRD 初始延迟不足: 需要 {} 项, 实际 {} 项",
            cpb_count,
            params.vcl_delays.len()
        )));
    }

    es.begin_start_code(StartCodeKind::Raw)?;
    es.write_start_code_prefix(SEI_START_CODE_PREFIX_BYTES)?;
    // nal_unit_type = 6, payloadType = 0
    es.write_byte(6)?;
    es.write_byte(0)?;
    es.write_byte(params.payload_bits().div_ceil(8) as u8)?;
    // seq_parameter_set_id
    es.write_ue(0)?;

    if params.nal_hrd_present {
        for _ in 0..cpb_count {
            es.write_token(TokenKind::BphSeiNalInitialCpbRemovalDelay)?;
            es.write_token(TokenKind::BphSeiNalInitialCpbRemovalDelayOffset)?;
        }
    }
    if params.vcl_hrd_present {
        let length = u32::from(params.initial_delay_length);
        for delay in &params.vcl_delays[..cpb_count] {
            es.begin_start_code(StartCodeKind::Raw)?;
            es.write_bits(delay.initial_cpb_removal_delay, length)?;
            es.write_bits(delay.initial_cpb_removal_delay_offset, length)?;
        }
    }

    es.write_token(TokenKind::InsertByteAlignH264)?;
    es.begin_start_code(StartCodeKind::Raw)?;
    es.write_byte(0x80)
}

/// 时钟时间戳 (clock_timestamp)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClockTimestamp {
    /// clock_timestamp_flag, 为 false 时其余字段不写入
    pub present: bool,
    pub ct_type: u8,
    pub nuit_field_based: bool,
    pub counting_type: u8,
    pub full_timestamp: bool,
    pub discontinuity: bool,
    pub cnt_dropped: bool,
    pub n_frames: u8,
    /// 非完整时间戳时各字段按需写入
    pub seconds: Option<u8>,
    pub minutes: Option<u8>,
    pub hours: Option<u8>,
    /// time_offset, 负值按补码写入
    pub time_offset: i32,
}

/// SEI 图像定时参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PictureTimingSei {
    /// CpbDpbDelaysPresentFlag
    pub cpb_dpb_delays_present: bool,
    pub cpb_removal_delay_length: u8,
    pub dpb_output_delay_length: u8,
    /// pic_struct_present_flag 对应的 pic_struct, `None` 表示不写入
    pub pic_struct: Option<u8>,
    pub timestamps: Vec<ClockTimestamp>,
    pub time_offset_length: u8,
}

impl Default for PictureTimingSei {
    fn default() -> Self {
        Self {
            cpb_dpb_delays_present: true,
            cpb_removal_delay_length: CPB_REMOVAL_DELAY_SIZE,
            dpb_output_delay_length: DPB_OUTPUT_DELAY_SIZE,
            pic_struct: None,
            timestamps: Vec::new(),
            time_offset_length: 24,
        }
    }
}

impl PictureTimingSei {
    fn payload_bits(&self) -> u32 {
        let mut bits = 0;
        if self.cpb_dpb_delays_present {
            bits += u32::from(self.cpb_removal_delay_length)
                + u32::from(self.dpb_output_delay_length);
        }
        if self.pic_struct.is_some() {
            bits += 4;
            for ts in &self.timestamps {
                bits += 1;
                if !ts.present {
                    continue;
                }
                bits += 19;
                if ts.full_timestamp {
                    bits += 17;
                } else {
                    bits += 1;
                    if ts.seconds.is_some() {
                        bits += 7;
                        if ts.minutes.is_some() {
                            bits += 7;
                            if ts.hours.is_some() {
                                bits += 5;
                            }
                        }
                    }
                }
                bits += u32::from(self.time_offset_length);
            }
        }
        bits
    }
}

/// 写入 SEI 图像定时 (payloadType 1)
pub fn write_picture_timing_sei(
    es: &mut ElementStream,
    params: &PictureTimingSei,
) -> TopazResult<()> {
    if params.time_offset_length > 31 {
        return Err(TopazError::config(format!(
            "time_offset_length 超出范围: {}",
            params.time_offset_length
        )));
    }

    es.begin_start_code(StartCodeKind::Raw)?;
    es.write_start_code_prefix(SEI_START_CODE_PREFIX_BYTES)?;
    es.write_byte(6)?;
    es.write_byte(1)?;
    es.write_byte(params.payload_bits().div_ceil(8) as u8)?;

    if params.cpb_dpb_delays_present {
        es.write_token(TokenKind::PthSeiNalCpbRemovalDelay)?;
        es.write_token(TokenKind::PthSeiNalDpbOutputDelay)?;
    }

    if let Some(pic_struct) = params.pic_struct {
        es.begin_start_code(StartCodeKind::Raw)?;
        es.write_bits(u32::from(pic_struct), 4)?;
        for ts in &params.timestamps {
            write_clock_timestamp(es, ts, params.time_offset_length)?;
        }
    }

    es.write_token(TokenKind::InsertByteAlignH264)?;
    es.begin_start_code(StartCodeKind::Raw)?;
    es.write_byte(0x80)
}

fn write_clock_timestamp(
    es: &mut ElementStream,
    ts: &ClockTimestamp,
    time_offset_length: u8,
) -> TopazResult<()> {
    es.write_flag(ts.present)?;
    if !ts.present {
        return Ok(());
    }
    es.write_bits(u32::from(ts.ct_type), 2)?;
    es.write_flag(ts.nuit_field_based)?;
    es.write_bits(u32::from(ts.counting_type), 5)?;
    es.write_flag(ts.full_timestamp)?;
    es.write_flag(ts.discontinuity)?;
    es.write_flag(ts.cnt_dropped)?;
    es.write_bits(u32::from(ts.n_frames), 8)?;

    if ts.full_timestamp {
        es.write_bits(u32::from(ts.seconds.unwrap_or(0)), 6)?;
        es.write_bits(u32::from(ts.minutes.unwrap_or(0)), 6)?;
        es.write_bits(u32::from(ts.hours.unwrap_or(0)), 5)?;
    } else {
        es.write_flag(ts.seconds.is_some())?;
        if let Some(seconds) = ts.seconds {
            es.write_bits(u32::from(seconds), 6)?;
            es.write_flag(ts.minutes.is_some())?;
            if let Some(minutes) = ts.minutes {
                es.write_bits(u32::from(minutes), 6)?;
                es.write_flag(ts.hours.is_some())?;
                if let Some(hours) = ts.hours {
                    es.write_bits(u32::from(hours), 5)?;
                }
            }
        }
    }

    if time_offset_length > 0 {
        let length = u32::from(time_offset_length);
        let value = if ts.time_offset < 0 {
            ((1i64 << length) + i64::from(ts.time_offset)) as u32
        } else {
            ts.time_offset as u32
        };
        es.write_bits(value, length)?;
    }
    Ok(())
}

/// HRD 初始延迟 (90 kHz 时钟)
///
/// 返回 (initial_cpb_removal_delay, initial_cpb_removal_delay_offset).
pub fn hrd_initial_delays(bits_per_second: u32, buffer_size: u32, initial_delay: u32) -> (u32, u32) {
    if bits_per_second == 0 {
        return (0, 0);
    }
    let bps = u64::from(bits_per_second);
    let delay = 90_000 * u64::from(initial_delay) / bps;
    let total = 90_000 * u64::from(buffer_size) / bps;
    (delay as u32, total.saturating_sub(delay) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use topaz_core::bitreader::BitReader;

    #[test]
    fn test_aud_bytes() {
        let mut es = ElementStream::new();
        write_aud_header(&mut es).unwrap();
        assert_eq!(es.len(), 1);
        let bits = es.elements()[0].raw_bits().unwrap();
        assert_eq!(bits.payload(), &[0, 0, 0, 1, 9, 0x50, 0x80]);
    }

    #[test]
    fn test_buffering_period_nal_only() {
        let mut es = ElementStream::new();
        write_buffering_period_sei(&mut es, &BufferingPeriodSei::default()).unwrap();

        let head = es.elements()[0].raw_bits().unwrap();
        // 1 + 23 * 2 = 47 位 -> 6 字节
        assert_eq!(head.payload(), &[0, 0, 1, 6, 0, 6, 0x80]);
        assert_eq!(head.size_bits(), 49);
        let tokens: Vec<_> = es.tokens().collect();
        assert_eq!(
            tokens,
            vec![
                TokenKind::BphSeiNalInitialCpbRemovalDelay,
                TokenKind::BphSeiNalInitialCpbRemovalDelayOffset,
                TokenKind::InsertByteAlignH264,
            ]
        );
        let tail = es.elements().last().unwrap().raw_bits().unwrap();
        assert_eq!(tail.payload(), &[0x80]);
    }

    #[test]
    fn test_buffering_period_vcl_requires_delays() {
        let params = BufferingPeriodSei {
            vcl_hrd_present: true,
            ..Default::default()
        };
        let mut es = ElementStream::new();
        let err = write_buffering_period_sei(&mut es, &params).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_buffering_period_vcl_values() {
        let params = BufferingPeriodSei {
            nal_hrd_present: false,
            vcl_hrd_present: true,
            vcl_delays: vec![CpbInitialDelay {
                initial_cpb_removal_delay: 1234,
                initial_cpb_removal_delay_offset: 56,
            }],
            ..Default::default()
        };
        let mut es = ElementStream::new();
        write_buffering_period_sei(&mut es, &params).unwrap();
        let vcl = es.elements()[1].raw_bits().unwrap();
        let mut br = BitReader::new(vcl.payload());
        assert_eq!(br.read_bits(23).unwrap(), 1234);
        assert_eq!(br.read_bits(23).unwrap(), 56);
    }

    #[test]
    fn test_picture_timing_default() {
        let mut es = ElementStream::new();
        write_picture_timing_sei(&mut es, &PictureTimingSei::default()).unwrap();
        let head = es.elements()[0].raw_bits().unwrap();
        // 23 + 7 = 30 位 -> 4 字节
        assert_eq!(head.payload(), &[0, 0, 1, 6, 1, 4]);
        assert_eq!(es.tokens().count(), 3);
    }

    #[test]
    fn test_clock_timestamp_negative_offset() {
        let params = PictureTimingSei {
            cpb_dpb_delays_present: false,
            pic_struct: Some(0),
            timestamps: vec![ClockTimestamp {
                present: true,
                n_frames: 12,
                seconds: Some(5),
                time_offset: -1,
                ..Default::default()
            }],
            time_offset_length: 4,
            ..Default::default()
        };
        let mut es = ElementStream::new();
        write_picture_timing_sei(&mut es, &params).unwrap();

        let head = es.elements()[0].raw_bits().unwrap();
        // 4 + 1 + 19 + 1 + 7 + 4 = 36 位 -> 5 字节
        assert_eq!(head.payload()[5], 5);

        let body = es.elements()[1].raw_bits().unwrap();
        let mut br = BitReader::new(body.payload());
        assert_eq!(br.read_bits(4).unwrap(), 0, "pic_struct");
        assert_eq!(br.read_bit().unwrap(), 1);
        br.skip_bits(2 + 1 + 5 + 1 + 1 + 1).unwrap();
        assert_eq!(br.read_bits(8).unwrap(), 12, "n_frames");
        assert_eq!(br.read_bit().unwrap(), 1, "seconds_flag");
        assert_eq!(br.read_bits(6).unwrap(), 5);
        assert_eq!(br.read_bit().unwrap(), 0, "minutes_flag");
        assert_eq!(br.read_bits(4).unwrap(), 0xF, "time_offset = -1");
    }

    #[test]
    fn test_hrd_initial_delays() {
        let (delay, offset) = hrd_initial_delays(1_000_000, 2_000_000, 1_000_000);
        assert_eq!(delay, 90_000);
        assert_eq!(offset, 90_000);
        assert_eq!(hrd_initial_delays(0, 1, 1), (0, 0));
    }
}
