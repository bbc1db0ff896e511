//! 集成测试共用的辅助函数
#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use packetlink::auxiliary::{game_link_protocol, GameLink, GameLinkEvent, GameLinkState};
use packetlink::{Connection, ConnectionConfig, Connector, Core, Endpoint, OutgoingPacket, PacketGroup, Pools};
use tokio::io::{AsyncReadExt, DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub const WAIT: Duration = Duration::from_secs(5);

/// 把单个数据包编码成线上字节（含 id）
pub fn encode<P: OutgoingPacket>(packet: &P) -> Vec<u8> {
    let mut group = PacketGroup::new();
    group.add(packet);
    group.as_bytes().to_vec()
}

/// 等待下一个事件，超时视为测试失败
pub async fn next_event<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("等待事件超时")
        .expect("事件通道已关闭")
}

/// 在超时内轮询直到条件成立
pub async fn wait_until<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    tokio::time::timeout(WAIT, async {
        while !condition().await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("等待条件超时");
}

/// 一条内存管道上的游戏服务器端连接，测试扮演对端
pub struct GameHarness {
    pub core: Arc<Core<GameLinkState>>,
    pub conn: Connection<GameLinkState>,
    pub link: GameLink,
    pub events: mpsc::UnboundedReceiver<GameLinkEvent>,
    pub peer: WriteHalf<DuplexStream>,
    /// 持续读取对端收到的字节，直到连接写端关闭
    pub received: JoinHandle<Vec<u8>>,
}

pub fn game_core(config: ConnectionConfig) -> (Arc<Core<GameLinkState>>, mpsc::UnboundedReceiver<GameLinkEvent>) {
    let pools = Pools::default();
    let (tx, rx) = mpsc::unbounded_channel();
    let core = Core::builder(game_link_protocol(&pools), move || GameLinkState::new("/srv/game", tx.clone()))
        .with_pools(pools)
        .with_config(config)
        .build()
        .expect("core 构建失败");
    (core, rx)
}

pub async fn game_harness(capacity: usize, config: ConnectionConfig) -> GameHarness {
    let (core, mut events) = game_core(config);
    let (local, remote) = tokio::io::duplex(capacity);
    let conn = Connector::new(core.clone())
        .connect_with(local, Endpoint::Memory("harness".into()))
        .expect("接管内存管道失败");

    let link = match next_event(&mut events).await {
        GameLinkEvent::Connected(link) => link,
        other => panic!("第一个事件应当是 Connected: {:?}", other),
    };
    assert_eq!(link.connection().id(), conn.id());

    let (peer_reader, peer) = tokio::io::split(remote);
    let received = tokio::spawn(drain(peer_reader));
    GameHarness {
        core,
        conn,
        link,
        events,
        peer,
        received,
    }
}

async fn drain(mut reader: ReadHalf<DuplexStream>) -> Vec<u8> {
    let mut buf = Vec::new();
    let _ = reader.read_to_end(&mut buf).await;
    buf
}
