//! 协议：数据包 id 到入站数据包构造器的映射
//!
//! 协议对象在构建后不可变，由同一个 [`Core`](crate::engine::Core) 下的所有连接共享。

use std::fmt;

use crate::connection::Connection;
use crate::packet::{DynIncomingPacket, IncomingPacket};
use crate::pool::Pools;
use crate::state::ConnectionState;

/// 收到未注册 id 时的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnknownPacketPolicy {
    /// 丢弃当前缓冲中的全部数据
    #[default]
    DiscardAll,
    /// 视为帧错误，关闭连接
    Close,
}

/// 按 id 解析入站数据包
pub trait Protocol<S: ConnectionState>: Send + Sync + 'static {
    /// 为 `id` 取出一个池化的数据包实例；未知 id 返回 `None`
    fn resolve(&self, id: u8, conn: &Connection<S>, state: &S) -> Option<Box<dyn DynIncomingPacket<S>>>;

    fn unknown_packet_policy(&self) -> UnknownPacketPolicy {
        UnknownPacketPolicy::DiscardAll
    }
}

type Constructor<S> = Box<dyn Fn() -> Box<dyn DynIncomingPacket<S>> + Send + Sync>;

/// 固定的 id 表，最多 256 项
pub struct PacketTable<S: ConnectionState> {
    entries: Vec<Option<(&'static str, Constructor<S>)>>,
    unknown_policy: UnknownPacketPolicy,
}

impl<S: ConnectionState> PacketTable<S> {
    pub fn builder(pools: &Pools) -> PacketTableBuilder<S> {
        PacketTableBuilder {
            pools: pools.clone(),
            entries: (0..=u8::MAX).map(|_| None).collect(),
            unknown_policy: UnknownPacketPolicy::default(),
        }
    }

    pub fn contains(&self, id: u8) -> bool {
        self.entries[id as usize].is_some()
    }

    /// 已注册的 id 数量
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|entry| entry.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn construct(&self, id: u8) -> Option<Box<dyn DynIncomingPacket<S>>> {
        self.entries[id as usize].as_ref().map(|(_, constructor)| constructor())
    }
}

impl<S: ConnectionState> Protocol<S> for PacketTable<S> {
    fn resolve(&self, id: u8, _conn: &Connection<S>, _state: &S) -> Option<Box<dyn DynIncomingPacket<S>>> {
        self.construct(id)
    }

    fn unknown_packet_policy(&self) -> UnknownPacketPolicy {
        self.unknown_policy
    }
}

impl<S: ConnectionState> fmt::Debug for PacketTable<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (id, entry) in self.entries.iter().enumerate() {
            if let Some((name, _)) = entry {
                map.entry(&format_args!("0x{:02X}", id), name);
            }
        }
        map.finish()
    }
}

/// [`PacketTable`] 构建器
pub struct PacketTableBuilder<S: ConnectionState> {
    pools: Pools,
    entries: Vec<Option<(&'static str, Constructor<S>)>>,
    unknown_policy: UnknownPacketPolicy,
}

impl<S: ConnectionState> PacketTableBuilder<S> {
    /// 把 `id` 映射到数据包类型 `P`，实例从 `P` 的池中取出
    pub fn register<P: IncomingPacket<S>>(mut self, id: u8) -> Self {
        let pool = self.pools.pool::<P>();
        let name = crate::packet::short_type_name::<P>();
        if let Some((previous, _)) = &self.entries[id as usize] {
            tracing::warn!("⚠️ 数据包 id 0x{:02X} 重复注册: {} 覆盖 {}", id, name, previous);
        }
        let constructor: Constructor<S> =
            Box::new(move || -> Box<dyn DynIncomingPacket<S>> { Box::new(pool.acquire()) });
        self.entries[id as usize] = Some((name, constructor));
        self
    }

    pub fn unknown_packet_policy(mut self, policy: UnknownPacketPolicy) -> Self {
        self.unknown_policy = policy;
        self
    }

    pub fn build(self) -> PacketTable<S> {
        PacketTable {
            entries: self.entries,
            unknown_policy: self.unknown_policy,
        }
    }
}

/// 按连接阶段切换的协议
///
/// 选择器读取连接状态返回阶段下标，同一个 id 在不同阶段可以对应不同的数据包
/// （例如登录前后）。下标越界按未知 id 处理。
pub struct PhasedProtocol<S: ConnectionState> {
    phases: Vec<PacketTable<S>>,
    selector: Box<dyn Fn(&S) -> usize + Send + Sync>,
    unknown_policy: UnknownPacketPolicy,
}

impl<S: ConnectionState> PhasedProtocol<S> {
    pub fn new<F>(phases: Vec<PacketTable<S>>, selector: F) -> Self
    where
        F: Fn(&S) -> usize + Send + Sync + 'static,
    {
        Self {
            phases,
            selector: Box::new(selector),
            unknown_policy: UnknownPacketPolicy::default(),
        }
    }

    pub fn with_unknown_packet_policy(mut self, policy: UnknownPacketPolicy) -> Self {
        self.unknown_policy = policy;
        self
    }

    pub fn phase_count(&self) -> usize {
        self.phases.len()
    }
}

impl<S: ConnectionState> Protocol<S> for PhasedProtocol<S> {
    fn resolve(&self, id: u8, _conn: &Connection<S>, state: &S) -> Option<Box<dyn DynIncomingPacket<S>>> {
        let phase = (self.selector)(state);
        match self.phases.get(phase) {
            Some(table) => table.construct(id),
            None => {
                tracing::debug!("❓ 未知的协议阶段 {} (共 {} 个)", phase, self.phases.len());
                None
            }
        }
    }

    fn unknown_packet_policy(&self) -> UnknownPacketPolicy {
        self.unknown_policy
    }
}

impl<S: ConnectionState> fmt::Debug for PhasedProtocol<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhasedProtocol")
            .field("phases", &self.phases)
            .field("unknown_policy", &self.unknown_policy)
            .finish()
    }
}
