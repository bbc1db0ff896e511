//! 数据包组：按顺序编码好的出站数据包，作为一个整体写出

use bytes::{Bytes, BytesMut};

use super::{OutgoingPacket, PacketWriter};
use crate::pool::Pooled;

/// 一次性数据包组，发送时被消费
#[derive(Debug, Default)]
pub struct PacketGroup {
    buffer: BytesMut,
    count: usize,
    longest_string: usize,
}

impl PacketGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
            count: 0,
            longest_string: 0,
        }
    }

    /// 只含一个数据包的组
    pub fn single<P: OutgoingPacket>(packet: Pooled<P>) -> Self {
        let mut group = Self::new();
        group.add_packet(packet);
        group
    }

    /// 编码并追加池化数据包；编码后数据包立即归还到池中
    pub fn add_packet<P: OutgoingPacket>(&mut self, packet: Pooled<P>) -> &mut Self {
        self.add(&*packet)
    }

    /// 编码并追加数据包
    pub fn add<P: OutgoingPacket>(&mut self, packet: &P) -> &mut Self {
        let start = self.buffer.len();
        let mut writer = PacketWriter::new(&mut self.buffer);
        writer.encode_byte(P::ID);
        packet.write(&mut writer);
        self.longest_string = self.longest_string.max(writer.longest_string());
        self.count += 1;
        tracing::trace!(
            "📦 编码数据包 {} (0x{:02X}): {} bytes",
            packet.name(),
            P::ID,
            self.buffer.len() - start
        );
        self
    }

    /// 组内数据包数量
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// 编码后的总字节数
    pub fn byte_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// 组内最长 UTF-8 字符串的字节数，发送前与对端的解码上限比较
    pub fn longest_string(&self) -> usize {
        self.longest_string
    }

    /// 转为可重复发送的持久组
    pub fn free(self) -> FreePacketGroup {
        FreePacketGroup {
            count: self.count,
            longest_string: self.longest_string,
            bytes: self.buffer.freeze(),
        }
    }

    pub(crate) fn into_bytes(self) -> Bytes {
        self.buffer.freeze()
    }
}

/// 持久数据包组：只编码一次，克隆代价低，可发往任意多个连接
#[derive(Debug, Clone, Default)]
pub struct FreePacketGroup {
    bytes: Bytes,
    count: usize,
    longest_string: usize,
}

impl FreePacketGroup {
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn byte_len(&self) -> usize {
        self.bytes.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn longest_string(&self) -> usize {
        self.longest_string
    }

    pub(crate) fn bytes(&self) -> Bytes {
        self.bytes.clone()
    }
}
