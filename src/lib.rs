//! packetlink - 异步数据包连接框架
//!
//! 在 TCP 与本地 IPC 之上提供统一的连接抽象：
//! - 从字节流中重组数据包，按协议表分发给数据包自身的处理器
//! - 类型化对象池，数据包与缓冲区用完即归还
//! - 数据包组整体写出，组内数据包在线上保持相邻
//!
//! 应用层只需实现 [`ConnectionState`]、[`IncomingPacket`] / [`OutgoingPacket`]，
//! 再把协议表交给 [`Core`]，由 [`Listener`] 或 [`Connector`] 建立连接。

pub mod auxiliary;
pub mod buffer;
#[cfg(feature = "zlib")]
pub mod compression;
pub mod config;
pub mod connection;
pub mod connector;
pub mod engine;
pub mod error;
pub mod listener;
pub mod packet;
pub mod pool;
pub mod protocol;
pub mod state;
pub mod transport;

/// 连接ID的类型安全包装器
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// 获取原始ID值
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

impl From<u64> for ConnectionId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl From<ConnectionId> for u64 {
    fn from(id: ConnectionId) -> Self {
        id.0
    }
}

// 重新导出核心类型
pub use buffer::{BufferPool, BufferPoolStats, BufferSize};
#[cfg(feature = "zlib")]
pub use compression::ZlibCompression;
pub use config::{ConfigError, ConnectionConfig, ListenerConfig};
pub use connection::{Connection, ConnectionStats, Lifecycle};
pub use connector::Connector;
pub use engine::{ConnectionRegistry, Core, CoreBuilder};
pub use error::{CloseReason, TransportError};
pub use listener::Listener;
pub use packet::{
    DecodeError, DynIncomingPacket, FreePacketGroup, IncomingPacket, OutgoingPacket, PacketGroup, PacketReader,
    PacketWriter, ReadPacketResult, DEFAULT_MAX_STRING_LENGTH,
};
pub use pool::{Pool, PoolStats, Poolable, Pooled, Pools};
pub use protocol::{PacketTable, PacketTableBuilder, PhasedProtocol, Protocol, UnknownPacketPolicy};
pub use state::{Compression, ConnectionState, Encryption, EncryptionInit};
pub use transport::{Acceptor, Endpoint, Transport};

/// 统一结果类型
pub type Result<T> = std::result::Result<T, TransportError>;
