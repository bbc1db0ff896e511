//! 入站数据包字段解码
//!
//! 所有整数均为大端序；UTF-8 字符串以 4 字节有符号长度作前缀。
//! 缓冲区在字段中间结束时返回 [`DecodeError::Incomplete`]，
//! 不可能合法的数据（负长度、超长、非法 UTF-8）返回 [`DecodeError::Malformed`]。

use super::DecodeError;

/// 默认的字符串长度上限
pub const DEFAULT_MAX_STRING_LENGTH: usize = 64 * 1024;

/// 在一段已接收数据上移动的解码游标
#[derive(Debug)]
pub struct PacketReader<'a> {
    buf: &'a [u8],
    pos: usize,
    max_string_length: usize,
}

impl<'a> PacketReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self::with_max_string_length(buf, DEFAULT_MAX_STRING_LENGTH)
    }

    pub fn with_max_string_length(buf: &'a [u8], max_string_length: usize) -> Self {
        Self {
            buf,
            pos: 0,
            max_string_length,
        }
    }

    /// 已消费的字节数
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let remaining = self.remaining();
        if remaining < n {
            return Err(DecodeError::Incomplete { needed: n - remaining });
        }
        let bytes = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut array = [0u8; N];
        array.copy_from_slice(self.take(N)?);
        Ok(array)
    }

    pub fn skip(&mut self, n: usize) -> Result<(), DecodeError> {
        self.take(n).map(|_| ())
    }

    pub fn decode_byte(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take_array::<1>()?[0])
    }

    pub fn decode_sbyte(&mut self) -> Result<i8, DecodeError> {
        Ok(i8::from_be_bytes(self.take_array()?))
    }

    pub fn decode_bool(&mut self) -> Result<bool, DecodeError> {
        Ok(self.decode_byte()? != 0)
    }

    pub fn decode_short(&mut self) -> Result<i16, DecodeError> {
        Ok(i16::from_be_bytes(self.take_array()?))
    }

    pub fn decode_ushort(&mut self) -> Result<u16, DecodeError> {
        Ok(u16::from_be_bytes(self.take_array()?))
    }

    pub fn decode_int(&mut self) -> Result<i32, DecodeError> {
        Ok(i32::from_be_bytes(self.take_array()?))
    }

    pub fn decode_uint(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_be_bytes(self.take_array()?))
    }

    pub fn decode_bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        self.take(len)
    }

    /// 长度前缀的 UTF-8 字符串
    pub fn decode_utf8_string(&mut self) -> Result<String, DecodeError> {
        let len = self.decode_int()?;
        if len < 0 {
            return Err(DecodeError::Malformed(format!("negative string length {}", len)));
        }
        let len = len as usize;
        if len > self.max_string_length {
            return Err(DecodeError::Malformed(format!(
                "string length {} exceeds limit {}",
                len, self.max_string_length
            )));
        }
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| DecodeError::Malformed(format!("invalid UTF-8 string: {}", e)))
    }

    /// 定长 ASCII 字符串，遇到第一个 NUL 截断
    pub fn decode_ascii_string(&mut self, len: usize) -> Result<String, DecodeError> {
        let bytes = self.take(len)?;
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        Ok(String::from_utf8_lossy(&bytes[..end]).into_owned())
    }

    /// 以 NUL 结尾的 ASCII 字符串（结尾的 NUL 一并消费）
    pub fn decode_terminated_ascii_string(&mut self) -> Result<String, DecodeError> {
        let rest = &self.buf[self.pos..];
        match rest.iter().position(|&b| b == 0) {
            Some(end) => {
                let value = String::from_utf8_lossy(&rest[..end]).into_owned();
                self.pos += end + 1;
                Ok(value)
            }
            None => Err(DecodeError::Incomplete { needed: 1 }),
        }
    }
}
