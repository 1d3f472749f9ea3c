//! 元素流写入器.
//!
//! 在比特写入器的基础上增加"元素"层: 字面比特写入原始数据元素,
//! 固件填充的值以令牌占位. 按大端位序 (MSB first) 写入.
//!
//! 原始数据元素写满 120 位后, 后续比特自动进入新的原始数据元素;
//! 令牌之后的比特同样自动进入新的原始数据元素. 需要空原始元素
//! (例如两个令牌之间) 或在比特元素之后强制分段时, 调用 [`ElementStream::begin_raw`].
//!
//! 元素以列表保存, 固件使用的按字节偏移布局只在 [`ElementStream::to_bytes`] 中生成.

use byteorder::{LittleEndian, WriteBytesExt};
use log::trace;

use crate::element::{Element, RawBits, StartCodeKind, TokenKind};
use crate::{TopazError, TopazResult};

/// 单个头部允许的最大元素数
pub const MAX_ELEMENTS: usize = 31;

/// 序列化后头部结构的最大字节数 (含 4 字节元素计数)
pub const MAX_WIRE_BYTES: usize = 4 + MAX_ELEMENTS * 8;

/// 元素流写入器
///
/// # 示例
/// ```
/// use topaz_core::element::TokenKind;
/// use topaz_core::stream::ElementStream;
///
/// let mut es = ElementStream::new();
/// es.write_bits(0b101, 3).unwrap();
/// es.write_token(TokenKind::Qp).unwrap();
/// es.write_ue(0).unwrap();
/// assert_eq!(es.len(), 3);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ElementStream {
    /// 已生成的元素, 顺序即码流顺序
    elements: Vec<Element>,
}

impl ElementStream {
    /// 创建空元素流
    pub fn new() -> Self {
        Self {
            elements: Vec::with_capacity(MAX_ELEMENTS),
        }
    }

    /// 元素数量
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// 全部元素
    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    /// 取出元素列表
    pub fn into_elements(self) -> Vec<Element> {
        self.elements
    }

    /// 全部令牌, 按出现顺序
    pub fn tokens(&self) -> impl Iterator<Item = TokenKind> + '_ {
        self.elements.iter().filter_map(Element::token)
    }

    /// 所有比特元素的总位数
    pub fn total_bits(&self) -> usize {
        self.elements
            .iter()
            .filter_map(Element::raw_bits)
            .map(|bits| usize::from(bits.size_bits()))
            .sum()
    }

    /// 开始一个起始码元素
    pub fn begin_start_code(&mut self, kind: StartCodeKind) -> TopazResult<()> {
        self.push(Element::StartCode(kind, RawBits::new()))
    }

    /// 开始一个新的原始数据元素
    pub fn begin_raw(&mut self) -> TopazResult<()> {
        self.push(Element::Raw(RawBits::new()))
    }

    /// 插入固件填充的令牌
    pub fn write_token(&mut self, kind: TokenKind) -> TopazResult<()> {
        self.push(Element::Token(kind))
    }

    /// 写入 N 个位 (最多 32 位)
    ///
    /// 值的低 N 位被写入, 高位在前. `n == 0` 为空操作.
    pub fn write_bits(&mut self, value: u32, n: u32) -> TopazResult<()> {
        if n == 0 {
            return Ok(());
        }
        if n > 32 {
            return Err(TopazError::Internal(format!(
                "write_bits: n={} 超过 32 位",
                n
            )));
        }

        let mut remaining = n;
        while remaining > 0 {
            self.ensure_writable()?;
            let bits = self.last_bits_mut()?;
            let to_write = remaining.min(bits.free_bits_in_byte());
            let shift = remaining - to_write;
            let chunk = ((value >> shift) & ((1u32 << to_write) - 1)) as u8;
            bits.push(chunk, to_write);
            remaining -= to_write;
        }

        let total = self.wire_len();
        if total > MAX_WIRE_BYTES {
            return Err(TopazError::capacity("头部字节", MAX_WIRE_BYTES, total));
        }
        Ok(())
    }

    /// 写入 1 个位
    pub fn write_flag(&mut self, flag: bool) -> TopazResult<()> {
        self.write_bits(u32::from(flag), 1)
    }

    /// 写入完整字节
    pub fn write_byte(&mut self, byte: u8) -> TopazResult<()> {
        self.write_bits(u32::from(byte), 8)
    }

    /// 写入字节对齐的起始码前缀: `size - 1` 个 0x00 后跟 0x01
    pub fn write_start_code_prefix(&mut self, size: u32) -> TopazResult<()> {
        for _ in 1..size {
            self.write_byte(0)?;
        }
        self.write_byte(1)
    }

    /// 写入无符号 Exp-Golomb 编码 ue(v)
    pub fn write_ue(&mut self, value: u32) -> TopazResult<()> {
        let mut rest = u64::from(value);
        let mut step = 1u64;
        let mut zeros = 0u32;
        while step - 1 < rest {
            rest -= step;
            step += step;
            zeros += 1;
        }

        // 前导零
        let mut pending = zeros;
        while pending > 8 {
            self.write_bits(0, 8)?;
            pending -= 8;
        }
        // 剩余前导零与分隔位 1
        self.write_bits(1, pending + 1)?;
        // 数值部分
        self.write_bits(rest as u32, zeros)
    }

    /// 写入有符号 Exp-Golomb 编码 se(v)
    ///
    /// 映射: v > 0 → 2v - 1, v <= 0 → -2v
    pub fn write_se(&mut self, value: i32) -> TopazResult<()> {
        let v = i64::from(value);
        let code = if v > 0 { 2 * v - 1 } else { -2 * v };
        self.write_ue(code as u32)
    }

    /// 序列化后占用的字节数 (含元素计数)
    pub fn wire_len(&self) -> usize {
        4 + self.elements.iter().map(Element::wire_len).sum::<usize>()
    }

    /// 序列化为固件使用的头部结构
    ///
    /// 布局: u32 元素数, 然后逐个元素: u32 类型, 比特元素附加 u8 位数与载荷,
    /// 每个元素按 32 位字对齐. 全部为小端.
    pub fn to_bytes(&self) -> TopazResult<Vec<u8>> {
        let total = self.wire_len();
        if total > MAX_WIRE_BYTES {
            return Err(TopazError::capacity("头部字节", MAX_WIRE_BYTES, total));
        }

        let mut out = Vec::with_capacity(total);
        out.write_u32::<LittleEndian>(self.elements.len() as u32)?;
        for element in &self.elements {
            let start = out.len();
            out.write_u32::<LittleEndian>(element.wire_code())?;
            if let Some(bits) = element.raw_bits() {
                out.write_u8(bits.size_bits())?;
                out.extend_from_slice(bits.payload());
            }
            out.resize(start + element.wire_len(), 0);
        }
        Ok(out)
    }

    /// 追加元素, 检查数量与字节容量
    fn push(&mut self, element: Element) -> TopazResult<()> {
        if self.elements.len() >= MAX_ELEMENTS {
            return Err(TopazError::capacity(
                "头部元素",
                MAX_ELEMENTS,
                self.elements.len() + 1,
            ));
        }
        let total = self.wire_len() + element.wire_len();
        if total > MAX_WIRE_BYTES {
            return Err(TopazError::capacity("头部字节", MAX_WIRE_BYTES, total));
        }
        trace!("元素 #{}: {}", self.elements.len(), element);
        self.elements.push(element);
        Ok(())
    }

    /// 保证末尾元素可以继续写入比特
    ///
    /// 空流或末尾为令牌时开启原始数据元素; 末尾比特元素已满 120 位时开启后继元素.
    fn ensure_writable(&mut self) -> TopazResult<()> {
        let needs_new = match self.elements.last() {
            None | Some(Element::Token(_)) => true,
            Some(Element::Raw(bits)) | Some(Element::StartCode(_, bits)) => bits.is_full(),
        };
        if needs_new {
            self.begin_raw()?;
        }
        Ok(())
    }

    fn last_bits_mut(&mut self) -> TopazResult<&mut RawBits> {
        match self.elements.last_mut() {
            Some(Element::Raw(bits)) | Some(Element::StartCode(_, bits)) => Ok(bits),
            _ => Err(TopazError::Internal("末尾元素不可写入比特".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitreader::BitReader;

    /// 拼接所有比特元素的载荷 (逐位)
    fn collect_bits(es: &ElementStream) -> Vec<u8> {
        let mut br = BitReader::from_stream(es);
        let mut out = Vec::new();
        while !br.is_eof() {
            out.push(br.read_bit().unwrap() as u8);
        }
        out
    }

    #[test]
    fn test_write_bits_basic() {
        let mut es = ElementStream::new();
        es.write_bits(0b1011, 4).unwrap();
        es.write_bits(0b0001, 4).unwrap();
        es.write_bits(0x155, 9).unwrap();
        assert_eq!(es.len(), 1);
        let bits = es.elements()[0].raw_bits().unwrap();
        assert_eq!(bits.size_bits(), 17);
        assert_eq!(bits.payload(), &[0b1011_0001, 0b1010_1010, 0b1000_0000]);
    }

    #[test]
    fn test_write_zero_bits_is_noop() {
        let mut es = ElementStream::new();
        es.write_bits(0xFF, 0).unwrap();
        assert!(es.is_empty());
    }

    #[test]
    fn test_token_then_bits_opens_raw() {
        let mut es = ElementStream::new();
        es.begin_start_code(StartCodeKind::Raw).unwrap();
        es.write_start_code_prefix(4).unwrap();
        es.write_token(TokenKind::Qp).unwrap();
        es.write_token(TokenKind::CurrMbNr).unwrap();
        es.write_flag(true).unwrap();
        let codes: Vec<u32> = es.elements().iter().map(Element::wire_code).collect();
        assert_eq!(codes, vec![0, 3, 12, 2]);
        assert_eq!(
            es.elements()[0].raw_bits().unwrap().payload(),
            &[0, 0, 0, 1]
        );
    }

    #[test]
    fn test_ue_zero_is_single_one_bit() {
        let mut es = ElementStream::new();
        es.write_ue(0).unwrap();
        assert_eq!(es.total_bits(), 1);
        assert_eq!(es.elements()[0].raw_bits().unwrap().payload(), &[0x80]);
    }

    #[test]
    fn test_ue_roundtrip() {
        let values = [0u32, 1, 2, 3, 7, 8, 254, 255, 256, 2047, 65535, 1 << 20, u32::MAX - 1];
        for value in values {
            let mut es = ElementStream::new();
            es.write_ue(value).unwrap();
            let payload = es.elements()[0].raw_bits().unwrap().payload().to_vec();
            let mut br = BitReader::new(&payload);
            assert_eq!(br.read_ue().unwrap(), value, "ue 往返失败: value={}", value);
        }
    }

    #[test]
    fn test_se_mapping() {
        for value in [0i32, 1, -1, 2, -2, 26, -26, 2047, -2048] {
            let mut es = ElementStream::new();
            es.write_se(value).unwrap();
            let payload = es.elements()[0].raw_bits().unwrap().payload().to_vec();
            let mut br = BitReader::new(&payload);
            assert_eq!(br.read_se().unwrap(), value, "se 往返失败: value={}", value);
        }
    }

    #[test]
    fn test_split_at_120_bits() {
        let mut es = ElementStream::new();
        es.begin_start_code(StartCodeKind::Raw).unwrap();
        // 116 位 + 8 位: 跨越 120 位上限
        for _ in 0..14 {
            es.write_bits(0xA5, 8).unwrap();
        }
        es.write_bits(0b1100, 4).unwrap();
        es.write_bits(0b1011_0110, 8).unwrap();

        assert_eq!(es.len(), 2, "应该拆分为 2 个元素");
        let first = es.elements()[0].raw_bits().unwrap();
        let second = es.elements()[1];
        assert_eq!(first.size_bits(), 120);
        assert!(matches!(second, Element::Raw(_)), "后继元素应为原始数据");
        assert_eq!(second.raw_bits().unwrap().size_bits(), 4);

        let mut expected = Vec::new();
        for _ in 0..14 {
            for i in (0..8).rev() {
                expected.push((0xA5u8 >> i) & 1);
            }
        }
        expected.extend_from_slice(&[1, 1, 0, 0, 1, 0, 1, 1, 0, 1, 1, 0]);
        assert_eq!(collect_bits(&es), expected, "拼接后的比特序列应保持不变");

        // 后继元素紧跟在前驱 15 字节载荷之后: 前驱起始 + 20, 即位数字段 + 16
        let bytes = es.to_bytes().unwrap();
        assert_eq!(bytes.len(), 4 + 20 + 8);
        let successor = 4 + 20;
        assert_eq!(bytes[successor], 2, "后继元素类型应为 RAWDATA");
        assert_eq!(bytes[4 + 4], 120);
        assert_eq!(successor - (4 + 4), 16);
        assert_eq!(bytes[successor + 4], 4);
        assert_eq!(bytes[successor + 5], 0b0110_0000);
    }

    #[test]
    fn test_wire_layout() {
        let mut es = ElementStream::new();
        es.begin_start_code(StartCodeKind::Raw).unwrap();
        es.write_byte(0x67).unwrap();
        es.write_token(TokenKind::InsertByteAlignH264).unwrap();
        let bytes = es.to_bytes().unwrap();
        assert_eq!(
            bytes,
            vec![2, 0, 0, 0, 0, 0, 0, 0, 8, 0x67, 0, 0, 7, 0, 0, 0]
        );
        assert_eq!(es.wire_len(), bytes.len());
    }

    #[test]
    fn test_element_capacity_error() {
        let mut es = ElementStream::new();
        for _ in 0..MAX_ELEMENTS {
            es.write_token(TokenKind::Qp).unwrap();
        }
        let err = es.write_token(TokenKind::Qp).unwrap_err();
        assert!(err.is_capacity(), "超出元素上限应返回容量错误");
        assert_eq!(es.len(), MAX_ELEMENTS, "失败的写入不应截断或追加元素");
    }

    #[test]
    fn test_byte_capacity_error() {
        let mut es = ElementStream::new();
        let mut result = Ok(());
        for _ in 0..MAX_ELEMENTS {
            result = es.write_bits(0xFFFF_FFFF, 32);
            if result.is_err() {
                break;
            }
        }
        let err = result.unwrap_err();
        assert!(err.is_capacity(), "超出字节上限应返回容量错误");
    }
}
