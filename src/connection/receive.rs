//! 接收管线与解码循环
//!
//! 读取到的字节先经过解密、解压，追加到待解码缓冲 `pending`；
//! 解码循环从头部逐个取出完整的数据包并分发，不完整的尾部留在缓冲中等待下一次读取。

use std::panic::{catch_unwind, AssertUnwindSafe};

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use super::transform::{EncryptionMode, Transforms};
use super::Connection;
use crate::buffer::BufferPool;
use crate::config::ConnectionConfig;
use crate::error::CloseReason;
use crate::packet::{DecodeError, PacketReader, ReadPacketResult};
use crate::protocol::{Protocol, UnknownPacketPolicy};
use crate::state::{ConnectionState, EncryptionInit};

const BUFFER_FULL: &str = "Incoming data buffer full";

/// 读取前至少保留的空闲空间
const MIN_READ_SPACE: usize = 512;

pub(crate) struct ReceivePipeline {
    transforms: Transforms,
    /// 未经转换的原始字节（仅在启用加密或压缩时使用）
    raw: BytesMut,
    scratch: BytesMut,
    /// 待解码的明文
    pending: BytesMut,
    receive_buffer_size: usize,
    max_receive_buffer: usize,
    max_string_length: usize,
}

impl ReceivePipeline {
    pub(crate) fn new(transforms: Transforms, buffers: &BufferPool, config: &ConnectionConfig) -> Self {
        let passthrough = transforms.is_passthrough();
        let raw = if passthrough {
            BytesMut::new()
        } else {
            buffers.get_for_len(config.receive_buffer_size)
        };
        Self {
            transforms,
            raw,
            scratch: BytesMut::new(),
            pending: buffers.get_for_len(config.receive_buffer_size),
            receive_buffer_size: config.receive_buffer_size,
            max_receive_buffer: config.max_receive_buffer,
            max_string_length: config.max_string_length,
        }
    }

    /// 发起一次读取；返回 0 表示对端已关闭
    pub(crate) async fn fill<R: AsyncRead + Unpin>(&mut self, reader: &mut R) -> std::io::Result<usize> {
        let target = if self.transforms.is_passthrough() {
            &mut self.pending
        } else {
            &mut self.raw
        };
        if target.capacity() - target.len() < MIN_READ_SPACE {
            target.reserve(self.receive_buffer_size);
        }
        reader.read_buf(target).await
    }

    /// 转换新到的字节并解码所有完整的数据包
    pub(crate) fn process<S: ConnectionState>(
        &mut self,
        protocol: &dyn Protocol<S>,
        conn: &Connection<S>,
        state: &mut S,
    ) -> Result<(), CloseReason> {
        self.ingest()?;
        decode_pending(&mut self.pending, protocol, conn, state, self.max_string_length)?;
        if self.pending.len() >= self.max_receive_buffer {
            return Err(CloseReason::Protocol(BUFFER_FULL.to_string()));
        }
        Ok(())
    }

    fn ingest(&mut self) -> Result<(), CloseReason> {
        if self.transforms.is_passthrough() || self.raw.is_empty() {
            return Ok(());
        }

        let mut decrypted = false;
        if let Some(encryption) = &self.transforms.encryption {
            let mut slot = encryption.lock();
            if slot.mode == EncryptionMode::Pending {
                match slot.cipher.init(&self.raw) {
                    EncryptionInit::NeedMoreData => {
                        if self.raw.len() >= self.max_receive_buffer {
                            return Err(CloseReason::Protocol(BUFFER_FULL.to_string()));
                        }
                        return Ok(());
                    }
                    EncryptionInit::Invalid => {
                        return Err(CloseReason::Protocol("Invalid encryption handshake".to_string()));
                    }
                    EncryptionInit::UseEncryption { consumed } => {
                        tracing::debug!("🔐 加密握手完成，启用加密");
                        slot.mode = EncryptionMode::Active;
                        self.raw.advance(consumed.min(self.raw.len()));
                    }
                    EncryptionInit::NoEncryption { consumed } => {
                        tracing::debug!("🔓 对端未启用加密");
                        slot.mode = EncryptionMode::Disabled;
                        self.raw.advance(consumed.min(self.raw.len()));
                    }
                }
            }
            if slot.mode == EncryptionMode::Active {
                self.scratch.clear();
                slot.cipher.decrypt(&self.raw, &mut self.scratch);
                decrypted = true;
            }
        }

        let plain: &[u8] = if decrypted { &self.scratch } else { &self.raw };
        match &self.transforms.compression {
            Some(compression) => compression
                .lock()
                .decompress(plain, &mut self.pending)
                .map_err(|e| CloseReason::Decode(format!("decompression failed: {}", e)))?,
            None => self.pending.extend_from_slice(plain),
        }
        self.raw.clear();
        Ok(())
    }

    /// 归还接收缓冲
    pub(crate) fn release(self, buffers: &BufferPool) {
        buffers.return_buffer(self.pending);
        if self.raw.capacity() > 0 {
            buffers.return_buffer(self.raw);
        }
    }
}

/// 解码循环
///
/// 处理器关闭连接后立即停止；返回 `Err` 表示连接必须关闭。
pub(crate) fn decode_pending<S: ConnectionState>(
    pending: &mut BytesMut,
    protocol: &dyn Protocol<S>,
    conn: &Connection<S>,
    state: &mut S,
    max_string_length: usize,
) -> Result<(), CloseReason> {
    while !pending.is_empty() && conn.is_open() {
        let id = pending[0];
        let mut packet = match protocol.resolve(id, conn, state) {
            Some(packet) => packet,
            None => match protocol.unknown_packet_policy() {
                UnknownPacketPolicy::DiscardAll => {
                    tracing::debug!(
                        "❓ 未知数据包 0x{:02X} ({})，丢弃 {} bytes: {:02X?}",
                        id,
                        conn.id(),
                        pending.len(),
                        &pending[..pending.len().min(64)]
                    );
                    pending.clear();
                    return Ok(());
                }
                UnknownPacketPolicy::Close => {
                    return Err(CloseReason::Protocol(format!("Unknown packet id 0x{:02X}", id)));
                }
            },
        };

        let (result, consumed) = {
            let mut reader = PacketReader::with_max_string_length(&pending[1..], max_string_length);
            let result = packet.read(&mut reader);
            (result, 1 + reader.position())
        };

        match result {
            Ok(ReadPacketResult::Success) => {
                pending.advance(consumed);
                conn.record_packet_received();
                tracing::debug!("📥 处理数据包 0x{:02X} {} ({})", id, packet.name(), conn.id());
                dispatch(packet, conn, state)?;
            }
            Ok(ReadPacketResult::DiscardSingle) => {
                tracing::debug!("🗑️ 丢弃数据包 0x{:02X} {}: {} bytes", id, packet.name(), consumed);
                pending.advance(consumed);
            }
            Ok(ReadPacketResult::DiscardAll) => {
                tracing::debug!("🗑️ {} 要求丢弃全部缓冲: {} bytes", packet.name(), pending.len());
                pending.clear();
                return Ok(());
            }
            Ok(ReadPacketResult::NeedMoreData) | Err(DecodeError::Incomplete { .. }) => {
                tracing::trace!("⏳ 数据包 0x{:02X} 不完整，已缓冲 {} bytes", id, pending.len());
                return Ok(());
            }
            Err(DecodeError::Malformed(reason)) => {
                return Err(CloseReason::Decode(format!("{} (0x{:02X}): {}", packet.name(), id, reason)));
            }
        }
    }
    Ok(())
}

fn dispatch<S: ConnectionState>(
    packet: Box<dyn crate::packet::DynIncomingPacket<S>>,
    conn: &Connection<S>,
    state: &mut S,
) -> Result<(), CloseReason> {
    let name = packet.name();
    match catch_unwind(AssertUnwindSafe(|| packet.handle(conn, state))) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            tracing::error!("❌ 数据包 {} 处理失败 ({}): {:#}", name, conn.id(), e);
            Err(CloseReason::HandlerFailed(format!("{}: {:#}", name, e)))
        }
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            tracing::error!("💥 数据包 {} 处理时 panic ({}): {}", name, conn.id(), message);
            Err(CloseReason::HandlerFailed(format!("{} panicked: {}", name, message)))
        }
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
