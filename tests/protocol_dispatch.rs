/// 协议分发集成测试
///
/// 测试目标：
/// 1. 分阶段协议按连接状态选择数据包类型
/// 2. 处理器失败、panic、主动关闭时解码循环立即停止
/// 3. 处理器可以保留数据包，延迟处理结束后才归还到池中
mod common;

use std::sync::Arc;

use anyhow::anyhow;
use bytes::BytesMut;
use common::*;
use packetlink::{
    CloseReason, Connection, ConnectionState, Connector, Core, DecodeError, Endpoint, IncomingPacket, PacketReader,
    PacketTable, PacketWriter, PhasedProtocol, Poolable, Pooled, Pools, ReadPacketResult, TransportError,
    UnknownPacketPolicy,
};
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::sync::{mpsc, Notify};

struct LobbyState {
    logged_in: bool,
    events: mpsc::UnboundedSender<String>,
    release: Arc<Notify>,
}

impl ConnectionState for LobbyState {
    fn on_close(&mut self, reason: &CloseReason) {
        let _ = self.events.send(format!("closed:{}", reason));
    }
}

#[derive(Default)]
struct LoginPacket {
    name: String,
}

impl Poolable for LoginPacket {
    fn reset(&mut self) {
        self.name.clear();
    }
}

impl IncomingPacket<LobbyState> for LoginPacket {
    fn read(&mut self, reader: &mut PacketReader<'_>) -> Result<ReadPacketResult, DecodeError> {
        self.name = reader.decode_utf8_string()?;
        Ok(ReadPacketResult::Success)
    }

    fn handle(packet: Pooled<Self>, _conn: &Connection<LobbyState>, state: &mut LobbyState) -> anyhow::Result<()> {
        state.logged_in = true;
        let _ = state.events.send(format!("login:{}", packet.name));
        Ok(())
    }
}

#[derive(Default)]
struct ChatPacket {
    text: String,
}

impl Poolable for ChatPacket {
    fn reset(&mut self) {
        self.text.clear();
    }
}

impl IncomingPacket<LobbyState> for ChatPacket {
    fn read(&mut self, reader: &mut PacketReader<'_>) -> Result<ReadPacketResult, DecodeError> {
        self.text = reader.decode_utf8_string()?;
        Ok(ReadPacketResult::Success)
    }

    fn handle(packet: Pooled<Self>, conn: &Connection<LobbyState>, state: &mut LobbyState) -> anyhow::Result<()> {
        let _ = state.events.send(format!("chat:{}", packet.text));
        match packet.text.as_str() {
            "boom" => Err(anyhow!("boom")),
            "panic" => panic!("chat handler exploded"),
            "bye" => {
                conn.close(CloseReason::Requested("bye".into()));
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// 长度前缀的填充数据，读取后整体跳过
#[derive(Default)]
struct PaddingPacket;

impl Poolable for PaddingPacket {
    fn reset(&mut self) {}
}

impl IncomingPacket<LobbyState> for PaddingPacket {
    fn read(&mut self, reader: &mut PacketReader<'_>) -> Result<ReadPacketResult, DecodeError> {
        let len = reader.decode_byte()? as usize;
        reader.skip(len)?;
        Ok(ReadPacketResult::DiscardSingle)
    }

    fn handle(_packet: Pooled<Self>, _conn: &Connection<LobbyState>, state: &mut LobbyState) -> anyhow::Result<()> {
        let _ = state.events.send("padding".into());
        Ok(())
    }
}

/// 处理器把数据包交给延迟任务
#[derive(Default)]
struct DeferredPacket {
    value: i32,
}

impl Poolable for DeferredPacket {
    fn reset(&mut self) {
        self.value = 0;
    }
}

impl IncomingPacket<LobbyState> for DeferredPacket {
    fn read(&mut self, reader: &mut PacketReader<'_>) -> Result<ReadPacketResult, DecodeError> {
        self.value = reader.decode_int()?;
        Ok(ReadPacketResult::Success)
    }

    fn handle(packet: Pooled<Self>, _conn: &Connection<LobbyState>, state: &mut LobbyState) -> anyhow::Result<()> {
        let events = state.events.clone();
        let release = state.release.clone();
        let _ = events.send(format!("deferred:{}", packet.value));
        tokio::spawn(async move {
            release.notified().await;
            let _ = events.send(format!("late:{}", packet.value));
        });
        Ok(())
    }
}

struct Lobby {
    conn: Connection<LobbyState>,
    pools: Pools,
    events: mpsc::UnboundedReceiver<String>,
    release: Arc<Notify>,
    peer: DuplexStream,
}

fn lobby_protocol(pools: &Pools) -> PhasedProtocol<LobbyState> {
    let before_login = PacketTable::builder(pools)
        .register::<LoginPacket>(0x01)
        .register::<PaddingPacket>(0x02)
        .build();
    let after_login = PacketTable::builder(pools)
        .register::<ChatPacket>(0x01)
        .register::<PaddingPacket>(0x02)
        .register::<DeferredPacket>(0x03)
        .build();
    PhasedProtocol::new(vec![before_login, after_login], |state: &LobbyState| {
        usize::from(state.logged_in)
    })
}

fn lobby(policy: UnknownPacketPolicy) -> Lobby {
    let pools = Pools::default();
    let (tx, events) = mpsc::unbounded_channel();
    let release = Arc::new(Notify::new());
    let shared = release.clone();
    let protocol = lobby_protocol(&pools).with_unknown_packet_policy(policy);
    let core = Core::builder(protocol, move || LobbyState {
        logged_in: false,
        events: tx.clone(),
        release: shared.clone(),
    })
    .with_pools(pools.clone())
    .build()
    .expect("core 构建失败");

    let (local, peer) = tokio::io::duplex(64 * 1024);
    let conn = Connector::new(core)
        .connect_with(local, Endpoint::Memory("lobby".into()))
        .expect("接管内存管道失败");
    Lobby {
        conn,
        pools,
        events,
        release,
        peer,
    }
}

fn string_packet(id: u8, text: &str) -> Vec<u8> {
    let mut buf = BytesMut::new();
    let mut writer = PacketWriter::new(&mut buf);
    writer.encode_byte(id);
    writer.encode_utf8_string(text);
    buf.to_vec()
}

fn int_packet(id: u8, value: i32) -> Vec<u8> {
    let mut buf = BytesMut::new();
    let mut writer = PacketWriter::new(&mut buf);
    writer.encode_byte(id);
    writer.encode_int(value);
    buf.to_vec()
}

#[tokio::test]
async fn test_phase_switch_after_login() -> Result<(), TransportError> {
    println!("🧪 测试登录前后的协议阶段");

    let mut lobby = lobby(UnknownPacketPolicy::DiscardAll);
    // 同一次写入：登录后同一缓冲中的下一个 0x01 按聊天解析
    let mut wire = string_packet(0x01, "alice");
    wire.extend(string_packet(0x01, "hello"));
    lobby.peer.write_all(&wire).await?;

    assert_eq!(next_event(&mut lobby.events).await, "login:alice");
    assert_eq!(next_event(&mut lobby.events).await, "chat:hello");
    assert!(lobby.conn.is_open());

    println!("✅ 协议阶段测试通过");
    Ok(())
}

#[tokio::test]
async fn test_discard_single_skips_packet() -> Result<(), TransportError> {
    println!("🧪 测试跳过单个数据包");

    let mut lobby = lobby(UnknownPacketPolicy::DiscardAll);
    let mut wire = string_packet(0x01, "bob");
    wire.extend_from_slice(&[0x02, 3, 0xAA, 0xBB, 0xCC]);
    wire.extend(string_packet(0x01, "after padding"));
    lobby.peer.write_all(&wire).await?;

    assert_eq!(next_event(&mut lobby.events).await, "login:bob");
    assert_eq!(next_event(&mut lobby.events).await, "chat:after padding");
    assert_eq!(lobby.conn.stats().packets_received, 2);

    println!("✅ 跳过单个数据包测试通过");
    Ok(())
}

#[tokio::test]
async fn test_unknown_packet_closes_under_close_policy() -> Result<(), TransportError> {
    println!("🧪 测试未知数据包关闭连接");

    let mut lobby = lobby(UnknownPacketPolicy::Close);
    // 0x03 只在登录后有效
    lobby.peer.write_all(&int_packet(0x03, 1)).await?;

    assert_eq!(next_event(&mut lobby.events).await, "closed:Unknown packet id 0x03");
    lobby.conn.closed().await;
    assert_eq!(
        lobby.conn.close_reason(),
        Some(CloseReason::Protocol("Unknown packet id 0x03".into()))
    );

    println!("✅ 未知数据包关闭测试通过");
    Ok(())
}

#[tokio::test]
async fn test_handler_error_closes_connection() -> Result<(), TransportError> {
    println!("🧪 测试处理器返回错误");

    let mut lobby = lobby(UnknownPacketPolicy::DiscardAll);
    let mut wire = string_packet(0x01, "carol");
    wire.extend(string_packet(0x01, "boom"));
    wire.extend(string_packet(0x01, "never"));
    lobby.peer.write_all(&wire).await?;

    assert_eq!(next_event(&mut lobby.events).await, "login:carol");
    assert_eq!(next_event(&mut lobby.events).await, "chat:boom");
    let closed = next_event(&mut lobby.events).await;
    assert!(closed.starts_with("closed:Packet handler failed"), "{}", closed);
    assert!(matches!(lobby.conn.close_reason(), Some(CloseReason::HandlerFailed(_))));

    println!("✅ 处理器错误测试通过");
    Ok(())
}

#[tokio::test]
async fn test_handler_panic_closes_connection() -> Result<(), TransportError> {
    println!("🧪 测试处理器 panic");

    let mut lobby = lobby(UnknownPacketPolicy::DiscardAll);
    let mut wire = string_packet(0x01, "dave");
    wire.extend(string_packet(0x01, "panic"));
    lobby.peer.write_all(&wire).await?;

    assert_eq!(next_event(&mut lobby.events).await, "login:dave");
    assert_eq!(next_event(&mut lobby.events).await, "chat:panic");
    let closed = next_event(&mut lobby.events).await;
    assert!(closed.contains("panicked"), "{}", closed);
    assert!(closed.contains("chat handler exploded"), "{}", closed);

    println!("✅ 处理器 panic 测试通过");
    Ok(())
}

#[tokio::test]
async fn test_handler_close_stops_decoding() -> Result<(), TransportError> {
    println!("🧪 测试处理器主动关闭");

    let mut lobby = lobby(UnknownPacketPolicy::DiscardAll);
    let mut wire = string_packet(0x01, "erin");
    wire.extend(string_packet(0x01, "bye"));
    wire.extend(string_packet(0x01, "after bye"));
    lobby.peer.write_all(&wire).await?;

    assert_eq!(next_event(&mut lobby.events).await, "login:erin");
    assert_eq!(next_event(&mut lobby.events).await, "chat:bye");
    assert_eq!(next_event(&mut lobby.events).await, "closed:bye");
    lobby.conn.closed().await;
    assert!(lobby.events.try_recv().is_err(), "关闭后不应再处理数据包");

    println!("✅ 处理器主动关闭测试通过");
    Ok(())
}

#[tokio::test]
async fn test_retained_packet_returns_to_pool_later() -> Result<(), TransportError> {
    println!("🧪 测试处理器保留数据包");

    let mut lobby = lobby(UnknownPacketPolicy::DiscardAll);
    let mut wire = string_packet(0x01, "frank");
    wire.extend(int_packet(0x03, 42));
    lobby.peer.write_all(&wire).await?;

    assert_eq!(next_event(&mut lobby.events).await, "login:frank");
    assert_eq!(next_event(&mut lobby.events).await, "deferred:42");
    let pool = lobby.pools.pool::<DeferredPacket>();
    assert_eq!(pool.cached(), 0, "延迟任务持有期间不应归还");

    lobby.release.notify_one();
    assert_eq!(next_event(&mut lobby.events).await, "late:42");
    wait_until(|| {
        let pool = pool.clone();
        async move { pool.cached() == 1 }
    })
    .await;

    println!("✅ 保留数据包测试通过");
    Ok(())
}
