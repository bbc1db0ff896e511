//! 连接
//!
//! [`Connection`] 是可克隆的句柄，应用层通过它发送数据包和关闭连接。
//! 真正的读写由两个后台任务完成：
//! - 驱动任务：读取、解码、分发，关闭时负责收尾
//! - 写任务：按入队顺序逐个写出发送单元
//!
//! 生命周期：`Connecting → Open → Closing → Closed`，不会离开 `Closed`。

pub(crate) mod driver;
pub(crate) mod receive;
pub(crate) mod send;
pub(crate) mod transform;

use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{CloseReason, TransportError};
use crate::packet::{DecodeError, FreePacketGroup, OutgoingPacket, PacketGroup};
use crate::pool::{Poolable, Pooled, Pools};
use crate::state::ConnectionState;
use crate::transport::Endpoint;
use crate::ConnectionId;

/// 连接生命周期
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Lifecycle {
    /// 主动连接，初始化尚未完成
    Connecting = 0,
    Open = 1,
    /// 已决定关闭，收尾进行中
    Closing = 2,
    Closed = 3,
}

impl Lifecycle {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Lifecycle::Connecting,
            1 => Lifecycle::Open,
            2 => Lifecycle::Closing,
            _ => Lifecycle::Closed,
        }
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lifecycle::Connecting => f.write_str("connecting"),
            Lifecycle::Open => f.write_str("open"),
            Lifecycle::Closing => f.write_str("closing"),
            Lifecycle::Closed => f.write_str("closed"),
        }
    }
}

#[derive(Default)]
struct StatsCounters {
    bytes_received: AtomicU64,
    bytes_sent: AtomicU64,
    packets_received: AtomicU64,
    packets_sent: AtomicU64,
}

/// 连接统计快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub packets_received: u64,
    /// 已入队的出站数据包数
    pub packets_sent: u64,
}

struct ConnectionInner {
    id: ConnectionId,
    peer: Endpoint,
    lifecycle: AtomicU8,
    close_reason: Mutex<Option<CloseReason>>,
    token: CancellationToken,
    closed: CancellationToken,
    send_tx: mpsc::UnboundedSender<Bytes>,
    pools: Pools,
    joining: AtomicBool,
    max_string_length: usize,
    stats: StatsCounters,
}

/// 连接句柄
pub struct Connection<S: ConnectionState> {
    inner: Arc<ConnectionInner>,
    _state: PhantomData<fn() -> S>,
}

impl<S: ConnectionState> Clone for Connection<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            _state: PhantomData,
        }
    }
}

impl<S: ConnectionState> Connection<S> {
    pub(crate) fn new(
        id: ConnectionId,
        peer: Endpoint,
        initial: Lifecycle,
        token: CancellationToken,
        send_tx: mpsc::UnboundedSender<Bytes>,
        pools: Pools,
        max_string_length: usize,
    ) -> Self {
        Self {
            inner: Arc::new(ConnectionInner {
                id,
                peer,
                lifecycle: AtomicU8::new(initial as u8),
                close_reason: Mutex::new(None),
                token,
                closed: CancellationToken::new(),
                send_tx,
                pools,
                joining: AtomicBool::new(false),
                max_string_length,
                stats: StatsCounters::default(),
            }),
            _state: PhantomData,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    pub fn peer_addr(&self) -> &Endpoint {
        &self.inner.peer
    }

    pub fn lifecycle(&self) -> Lifecycle {
        Lifecycle::from_u8(self.inner.lifecycle.load(Ordering::Acquire))
    }

    /// `Connecting` 或 `Open`
    pub fn is_open(&self) -> bool {
        matches!(self.lifecycle(), Lifecycle::Connecting | Lifecycle::Open)
    }

    pub fn is_closed(&self) -> bool {
        self.lifecycle() == Lifecycle::Closed
    }

    /// 开始关闭连接
    ///
    /// 只有第一次调用生效（其原因会传给 `on_close`），返回是否由本次调用触发关闭。
    /// 重复关闭直接忽略。
    pub fn close(&self, reason: CloseReason) -> bool {
        let mut slot = self.inner.close_reason.lock();
        if !self.is_open() {
            tracing::trace!("🔁 忽略重复关闭 {}: {}", self.inner.id, reason);
            return false;
        }
        tracing::debug!("🔌 关闭连接 {}: {}", self.inner.id, reason);
        self.inner.lifecycle.store(Lifecycle::Closing as u8, Ordering::Release);
        *slot = Some(reason);
        drop(slot);
        self.inner.token.cancel();
        true
    }

    /// 生效的关闭原因
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.inner.close_reason.lock().clone()
    }

    /// 等待连接完全关闭（`on_close` 已调用）
    pub async fn closed(&self) {
        self.inner.closed.cancelled().await
    }

    pub fn pools(&self) -> &Pools {
        &self.inner.pools
    }

    /// 从共享池中取出一个数据包
    pub fn acquire<P: Poolable>(&self) -> Pooled<P> {
        self.inner.pools.acquire::<P>()
    }

    /// 发送单个数据包
    pub fn send_single_packet<P: OutgoingPacket>(&self, packet: Pooled<P>) -> Result<(), TransportError> {
        self.send_packet_group(PacketGroup::single(packet))
    }

    /// 把整个组作为一个发送单元入队，组内数据包在线上连续出现
    ///
    /// 组内字符串超过 `max_string_length` 时整组被拒绝，连接保持打开。
    pub fn send_packet_group(&self, group: PacketGroup) -> Result<(), TransportError> {
        self.check_string_length(group.longest_string())?;
        let count = group.len();
        self.enqueue(group.into_bytes(), count)
    }

    /// 重发已编码好的持久组
    pub fn send_free_group(&self, group: &FreePacketGroup) -> Result<(), TransportError> {
        self.check_string_length(group.longest_string())?;
        self.enqueue(group.bytes(), group.len())
    }

    /// 对端会以同样的上限解码，超长的字符串在发送前拒绝
    fn check_string_length(&self, longest: usize) -> Result<(), TransportError> {
        if longest <= self.inner.max_string_length {
            return Ok(());
        }
        tracing::warn!(
            "⚠️ 拒绝发送 ({}): 字符串长度 {} 超过上限 {}",
            self.inner.id,
            longest,
            self.inner.max_string_length
        );
        Err(DecodeError::Malformed(format!(
            "string length {} exceeds limit {}",
            longest, self.inner.max_string_length
        ))
        .into())
    }

    fn enqueue(&self, unit: Bytes, packets: usize) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed {
                connection: self.inner.id,
            });
        }
        if unit.is_empty() {
            tracing::warn!("⚠️ 忽略空数据包组 ({})", self.inner.id);
            return Ok(());
        }

        let len = unit.len();
        self.inner.send_tx.send(unit).map_err(|_| TransportError::Closed {
            connection: self.inner.id,
        })?;
        self.inner.stats.packets_sent.fetch_add(packets as u64, Ordering::Relaxed);
        tracing::trace!("📤 入队 {} 个数据包, {} bytes ({})", packets, len, self.inner.id);
        Ok(())
    }

    /// 打开或关闭发送合并
    pub fn set_packet_groups_joining(&self, allowed: bool) {
        self.inner.joining.store(allowed, Ordering::Relaxed);
    }

    pub fn packet_groups_joining(&self) -> bool {
        self.inner.joining.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> ConnectionStats {
        let stats = &self.inner.stats;
        ConnectionStats {
            bytes_received: stats.bytes_received.load(Ordering::Relaxed),
            bytes_sent: stats.bytes_sent.load(Ordering::Relaxed),
            packets_received: stats.packets_received.load(Ordering::Relaxed),
            packets_sent: stats.packets_sent.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn cancellation_token(&self) -> &CancellationToken {
        &self.inner.token
    }

    /// `Connecting → Open`；已关闭时不变
    pub(crate) fn mark_open(&self) {
        let _guard = self.inner.close_reason.lock();
        let _ = self.inner.lifecycle.compare_exchange(
            Lifecycle::Connecting as u8,
            Lifecycle::Open as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    pub(crate) fn mark_closed(&self) {
        self.inner.lifecycle.store(Lifecycle::Closed as u8, Ordering::Release);
        self.inner.closed.cancel();
    }

    pub(crate) fn record_received(&self, bytes: usize) {
        self.inner.stats.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_packet_received(&self) {
        self.inner.stats.packets_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_sent(&self, bytes: usize) {
        self.inner.stats.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }
}

impl<S: ConnectionState> fmt::Debug for Connection<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("peer", &self.inner.peer)
            .field("lifecycle", &self.lifecycle())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Idle;

    impl ConnectionState for Idle {}

    fn detached(initial: Lifecycle) -> (Connection<Idle>, mpsc::UnboundedReceiver<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = Connection::new(
            ConnectionId::new(1),
            Endpoint::Memory("test".into()),
            initial,
            CancellationToken::new(),
            tx,
            Pools::default(),
            8,
        );
        (conn, rx)
    }

    #[test]
    fn test_first_close_reason_wins() {
        let (conn, _rx) = detached(Lifecycle::Open);
        assert!(conn.close(CloseReason::Requested("first".into())));
        assert!(!conn.close(CloseReason::ConnectionLost));
        assert_eq!(conn.lifecycle(), Lifecycle::Closing);
        assert_eq!(conn.close_reason(), Some(CloseReason::Requested("first".into())));
        assert!(conn.cancellation_token().is_cancelled());
    }

    #[test]
    fn test_send_after_close_is_rejected() {
        let (conn, mut rx) = detached(Lifecycle::Open);
        conn.send_free_group(&PacketGroup::new().free()).unwrap();
        assert!(rx.try_recv().is_err());

        conn.close(CloseReason::Shutdown);
        let err = conn.send_packet_group(PacketGroup::new()).unwrap_err();
        assert!(matches!(err, TransportError::Closed { .. }));
    }

    #[derive(Default)]
    struct Motd {
        text: String,
    }

    impl Poolable for Motd {
        fn reset(&mut self) {
            self.text.clear();
        }
    }

    impl OutgoingPacket for Motd {
        const ID: u8 = 0x07;

        fn write(&self, writer: &mut crate::packet::PacketWriter<'_>) {
            writer.encode_utf8_string(&self.text);
        }
    }

    #[test]
    fn test_oversized_string_is_refused() {
        let (conn, mut rx) = detached(Lifecycle::Open);

        let mut fits = conn.acquire::<Motd>();
        fits.text.push_str("12345678");
        conn.send_single_packet(fits).unwrap();
        assert_eq!(rx.try_recv().unwrap().len(), 1 + 4 + 8);

        let mut group = PacketGroup::new();
        group.add(&Motd { text: "short".into() });
        group.add(&Motd { text: "123456789".into() });
        let free = group.free();
        let err = conn.send_free_group(&free).unwrap_err();
        assert_eq!(err.error_code(), "PROTOCOL_ERROR");
        assert!(err.to_string().contains("string length 9 exceeds limit 8"), "{}", err);
        assert!(rx.try_recv().is_err());

        // 拒绝发送不影响连接
        assert!(conn.is_open());
        assert_eq!(conn.stats().packets_sent, 1);
    }

    #[test]
    fn test_mark_open_only_from_connecting() {
        let (conn, _rx) = detached(Lifecycle::Connecting);
        assert!(conn.is_open());
        conn.mark_open();
        assert_eq!(conn.lifecycle(), Lifecycle::Open);

        let (conn, _rx) = detached(Lifecycle::Connecting);
        conn.close(CloseReason::Shutdown);
        conn.mark_open();
        assert_eq!(conn.lifecycle(), Lifecycle::Closing);
        conn.mark_closed();
        assert!(conn.is_closed());
    }
}
