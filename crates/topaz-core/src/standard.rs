//! 编码标准标识.
//!
//! 硬件支持的码流标准. 头部模板, 偏置表与码率控制都按标准分支.

use std::fmt;
use std::str::FromStr;

use crate::TopazError;

/// 编码标准
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Standard {
    /// H.264 / AVC (含 MVC 扩展)
    H264,
    /// H.263 (含 PLUSPTYPE 自定义图像格式)
    H263,
    /// MPEG-4 Part 2 (Simple / Advanced Simple)
    Mpeg4,
    /// JPEG 基线
    Jpeg,
}

impl Standard {
    /// 获取标准的名称
    pub const fn name(&self) -> &'static str {
        match self {
            Self::H264 => "h264",
            Self::H263 => "h263",
            Self::Mpeg4 => "mpeg4",
            Self::Jpeg => "jpeg",
        }
    }

    /// 允许的最大 QP
    pub const fn max_qp(&self) -> u32 {
        match self {
            Self::H264 => 51,
            Self::H263 | Self::Mpeg4 => 31,
            Self::Jpeg => 0,
        }
    }

    /// 码率上限 (bps)
    pub const fn max_bitrate(&self) -> u32 {
        match self {
            Self::H264 => 135_000_000,
            Self::H263 | Self::Mpeg4 | Self::Jpeg => 16_000_000,
        }
    }
}

impl fmt::Display for Standard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Standard {
    type Err = TopazError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "h264" | "avc" => Ok(Self::H264),
            "h263" => Ok(Self::H263),
            "mpeg4" | "mp4v" => Ok(Self::Mpeg4),
            "jpeg" | "mjpeg" => Ok(Self::Jpeg),
            other => Err(TopazError::Unsupported(format!("未知编码标准: {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_standard() {
        assert_eq!("H264".parse::<Standard>().unwrap(), Standard::H264);
        assert_eq!("mjpeg".parse::<Standard>().unwrap(), Standard::Jpeg);
        assert!("hevc".parse::<Standard>().unwrap_err().is_config());
        assert_eq!(Standard::Mpeg4.to_string(), "mpeg4");
    }
}
