//! 元素流载荷读取器.
//!
//! 本库只生成码流, 读取器把元素流中的字面比特按写入顺序解码回来.
//! 比特元素在 120 位处自动拆分, 令牌不带载荷, 因此读取器把所有 `RawBits`
//! 载荷按各自的实际位数首尾相接, 跳过令牌, 对外表现为一条连续的比特流.

use crate::element::Element;
use crate::stream::ElementStream;
use crate::{TopazError, TopazResult};

/// 一段待读取的载荷: 字节与其中的有效位数
#[derive(Debug, Clone, Copy)]
struct Segment<'a> {
    bytes: &'a [u8],
    bits: usize,
}

/// 跨元素的 MSB-first 比特读取器
///
/// # 示例
/// ```
/// use topaz_core::bitreader::BitReader;
/// use topaz_core::{ElementStream, TokenKind};
///
/// let mut es = ElementStream::new();
/// es.write_ue(5).unwrap();
/// es.write_token(TokenKind::Qp).unwrap();
/// es.write_bits(0b101, 3).unwrap();
///
/// let mut br = BitReader::from_stream(&es);
/// assert_eq!(br.read_ue().unwrap(), 5);
/// assert_eq!(br.read_bits(3).unwrap(), 0b101);
/// assert!(br.is_eof());
/// ```
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    segments: Vec<Segment<'a>>,
    /// 当前段索引
    segment: usize,
    /// 段内位偏移
    offset: usize,
}

impl<'a> BitReader<'a> {
    /// 读取一段完整字节
    pub fn new(data: &'a [u8]) -> Self {
        Self::from_segments(vec![Segment {
            bytes: data,
            bits: data.len() * 8,
        }])
    }

    /// 依次读取元素流中所有比特元素 (含起始码元素) 的有效位
    pub fn from_stream(stream: &'a ElementStream) -> Self {
        Self::from_elements(stream.elements())
    }

    /// 依次读取给定元素中的有效位, 令牌被跳过
    pub fn from_elements(elements: &'a [Element]) -> Self {
        let segments = elements
            .iter()
            .filter_map(Element::raw_bits)
            .map(|raw| Segment {
                bytes: raw.payload(),
                bits: usize::from(raw.size_bits()),
            })
            .collect();
        Self::from_segments(segments)
    }

    fn from_segments(mut segments: Vec<Segment<'a>>) -> Self {
        segments.retain(|s| s.bits > 0);
        Self {
            segments,
            segment: 0,
            offset: 0,
        }
    }

    /// 剩余可读位数
    pub fn bits_left(&self) -> usize {
        let rest: usize = self
            .segments
            .iter()
            .skip(self.segment)
            .map(|s| s.bits)
            .sum();
        rest - self.offset
    }

    pub fn is_eof(&self) -> bool {
        self.segment >= self.segments.len()
    }

    /// 读取 1 位
    pub fn read_bit(&mut self) -> TopazResult<u32> {
        let Some(seg) = self.segments.get(self.segment) else {
            return Err(TopazError::Eof);
        };
        let bit = (seg.bytes[self.offset / 8] >> (7 - self.offset % 8)) & 1;
        self.offset += 1;
        if self.offset == seg.bits {
            self.segment += 1;
            self.offset = 0;
        }
        Ok(u32::from(bit))
    }

    /// 读取 n 位 (n <= 32), 可跨越元素边界
    pub fn read_bits(&mut self, n: u32) -> TopazResult<u32> {
        if n > 32 {
            return Err(TopazError::Internal(format!("read_bits: n={n} 超过 32 位")));
        }
        if n as usize > self.bits_left() {
            return Err(TopazError::Eof);
        }
        (0..n).try_fold(0u32, |acc, _| Ok((acc << 1) | self.read_bit()?))
    }

    /// ue(v)
    pub fn read_ue(&mut self) -> TopazResult<u32> {
        let mut zeros = 0u32;
        while self.read_bit()? == 0 {
            zeros += 1;
            if zeros > 31 {
                return Err(TopazError::Internal("ue(v) 前导零超过 31 个".into()));
            }
        }
        let suffix = u64::from(self.read_bits(zeros)?);
        Ok(((1u64 << zeros) - 1 + suffix) as u32)
    }

    /// se(v): 码字 k 映射为 (-1)^(k+1) * ceil(k/2)
    pub fn read_se(&mut self) -> TopazResult<i32> {
        let code = self.read_ue()?;
        let magnitude = code.div_ceil(2) as i32;
        Ok(if code & 1 == 1 { magnitude } else { -magnitude })
    }

    pub fn skip_bits(&mut self, n: u32) -> TopazResult<()> {
        if n as usize > self.bits_left() {
            return Err(TopazError::Eof);
        }
        for _ in 0..n {
            self.read_bit()?;
        }
        Ok(())
    }
}
