//! 出站数据包字段编码，与 [`PacketReader`](super::PacketReader) 对称

use bytes::{BufMut, BytesMut};

/// 向出站缓冲追加字段
#[derive(Debug)]
pub struct PacketWriter<'a> {
    buf: &'a mut BytesMut,
    start: usize,
    longest_string: usize,
}

impl<'a> PacketWriter<'a> {
    pub fn new(buf: &'a mut BytesMut) -> Self {
        let start = buf.len();
        Self {
            buf,
            start,
            longest_string: 0,
        }
    }

    /// 本写入器写入的字节数
    pub fn written(&self) -> usize {
        self.buf.len() - self.start
    }

    /// 已写入的最长 UTF-8 字符串字节数
    pub fn longest_string(&self) -> usize {
        self.longest_string
    }

    pub fn encode_byte(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    pub fn encode_sbyte(&mut self, value: i8) {
        self.buf.put_i8(value);
    }

    pub fn encode_bool(&mut self, value: bool) {
        self.buf.put_u8(u8::from(value));
    }

    pub fn encode_short(&mut self, value: i16) {
        self.buf.put_i16(value);
    }

    pub fn encode_ushort(&mut self, value: u16) {
        self.buf.put_u16(value);
    }

    pub fn encode_int(&mut self, value: i32) {
        self.buf.put_i32(value);
    }

    pub fn encode_uint(&mut self, value: u32) {
        self.buf.put_u32(value);
    }

    pub fn encode_bytes(&mut self, bytes: &[u8]) {
        self.buf.put_slice(bytes);
    }

    pub fn encode_zeros(&mut self, count: usize) {
        self.buf.put_bytes(0, count);
    }

    /// 长度前缀的 UTF-8 字符串
    pub fn encode_utf8_string(&mut self, value: &str) {
        debug_assert!(value.len() <= i32::MAX as usize);
        self.longest_string = self.longest_string.max(value.len());
        self.buf.put_i32(value.len() as i32);
        self.buf.put_slice(value.as_bytes());
    }

    /// 定长 ASCII 字符串：超长截断，不足补零
    pub fn encode_ascii_string(&mut self, value: &str, len: usize) {
        let bytes = value.as_bytes();
        let written = bytes.len().min(len);
        self.buf.put_slice(&bytes[..written]);
        self.encode_zeros(len - written);
    }

    /// 以 NUL 结尾的 ASCII 字符串
    pub fn encode_terminated_ascii_string(&mut self, value: &str) {
        self.buf.put_slice(value.as_bytes());
        self.buf.put_u8(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::PacketReader;

    #[test]
    fn test_writer_matches_reader() {
        let mut buf = BytesMut::new();
        let mut writer = PacketWriter::new(&mut buf);
        writer.encode_byte(0x02);
        writer.encode_int(-7);
        writer.encode_utf8_string("");
        writer.encode_utf8_string("consoleA");
        writer.encode_bool(true);
        writer.encode_ushort(0xBEEF);
        writer.encode_ascii_string("toolongname", 4);
        writer.encode_ascii_string("ab", 4);
        assert_eq!(writer.written(), 1 + 4 + 4 + 12 + 1 + 2 + 4 + 4);
        assert_eq!(writer.longest_string(), "consoleA".len());

        let mut reader = PacketReader::new(&buf);
        assert_eq!(reader.decode_byte().unwrap(), 0x02);
        assert_eq!(reader.decode_int().unwrap(), -7);
        assert_eq!(reader.decode_utf8_string().unwrap(), "");
        assert_eq!(reader.decode_utf8_string().unwrap(), "consoleA");
        assert!(reader.decode_bool().unwrap());
        assert_eq!(reader.decode_ushort().unwrap(), 0xBEEF);
        assert_eq!(reader.decode_ascii_string(4).unwrap(), "tool");
        assert_eq!(reader.decode_ascii_string(4).unwrap(), "ab");
        assert!(reader.is_empty());
    }

    #[test]
    fn test_writer_appends_after_existing_data() {
        let mut buf = BytesMut::from(&b"xyz"[..]);
        let mut writer = PacketWriter::new(&mut buf);
        writer.encode_terminated_ascii_string("hi");
        assert_eq!(writer.written(), 3);
        assert_eq!(&buf[..], b"xyzhi\0");
    }
}
