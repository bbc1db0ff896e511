//! 共享内核
//!
//! [`Core`] 把协议、状态工厂、池和连接注册表组合在一起，
//! 由同一个 core 派生的监听器、连接器和连接共享这些对象。

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::buffer::BufferPool;
use crate::config::ConnectionConfig;
use crate::connection::receive::ReceivePipeline;
use crate::connection::send::{run_writer, WriterConfig};
use crate::connection::transform::Transforms;
use crate::connection::{driver, Connection, Lifecycle};
use crate::error::{CloseReason, TransportError};
use crate::pool::Pools;
use crate::protocol::Protocol;
use crate::state::ConnectionState;
use crate::transport::{Endpoint, Transport};
use crate::ConnectionId;

/// 连接注册表
///
/// 同一个 core 下的监听器、连接器与所有连接共用这一把粗粒度锁，锁从不跨越 I/O。
pub struct ConnectionRegistry<S: ConnectionState> {
    connections: Mutex<HashMap<ConnectionId, Connection<S>>>,
}

impl<S: ConnectionState> ConnectionRegistry<S> {
    fn new() -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
        }
    }

    fn insert(&self, conn: Connection<S>) {
        self.connections.lock().insert(conn.id(), conn);
    }

    pub(crate) fn remove(&self, id: ConnectionId) -> Option<Connection<S>> {
        self.connections.lock().remove(&id)
    }

    pub fn get(&self, id: ConnectionId) -> Option<Connection<S>> {
        self.connections.lock().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 当前所有连接的快照
    pub fn snapshot(&self) -> Vec<Connection<S>> {
        self.connections.lock().values().cloned().collect()
    }
}

type StateFactory<S> = Box<dyn Fn() -> S + Send + Sync>;

/// 共享内核
pub struct Core<S: ConnectionState> {
    protocol: Arc<dyn Protocol<S>>,
    state_factory: StateFactory<S>,
    config: ConnectionConfig,
    pools: Pools,
    buffers: BufferPool,
    registry: ConnectionRegistry<S>,
    next_id: AtomicU64,
    token: CancellationToken,
}

impl<S: ConnectionState> Core<S> {
    pub fn builder<P, F>(protocol: P, state_factory: F) -> CoreBuilder<S>
    where
        P: Protocol<S>,
        F: Fn() -> S + Send + Sync + 'static,
    {
        CoreBuilder {
            protocol: Arc::new(protocol),
            state_factory: Box::new(state_factory),
            config: ConnectionConfig::default(),
            pools: None,
            buffers: None,
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn pools(&self) -> &Pools {
        &self.pools
    }

    pub fn buffer_pool(&self) -> &BufferPool {
        &self.buffers
    }

    pub fn registry(&self) -> &ConnectionRegistry<S> {
        &self.registry
    }

    pub(crate) fn protocol(&self) -> &Arc<dyn Protocol<S>> {
        &self.protocol
    }

    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    /// 监听器与连接各自持有的子令牌
    pub(crate) fn child_token(&self) -> CancellationToken {
        self.token.child_token()
    }

    pub(crate) fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }

    /// 关闭所有连接并停止所有监听器
    pub fn shutdown(&self, reason: CloseReason) {
        let connections = self.registry.snapshot();
        tracing::info!("🛑 关闭 core: {} 个连接 - {}", connections.len(), reason);
        for conn in connections {
            conn.close(reason.clone());
        }
        self.token.cancel();
    }

    /// 接管一条已建立的传输流
    ///
    /// 创建状态对象并调用 `on_init`，注册连接，然后启动驱动任务与写任务。
    /// 返回时 `on_init` 已经执行完毕。
    pub(crate) fn adopt<T: Transport>(
        self: &Arc<Self>,
        stream: T,
        peer: Endpoint,
        initial: Lifecycle,
    ) -> Result<Connection<S>, TransportError> {
        if self.is_shutdown() {
            return Err(TransportError::connection_error("core is shut down", false));
        }

        let id = ConnectionId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (reader, writer) = tokio::io::split(stream);
        let (send_tx, send_rx) = mpsc::unbounded_channel();
        let conn = Connection::new(
            id,
            peer,
            initial,
            self.child_token(),
            send_tx,
            self.pools.clone(),
            self.config.max_string_length,
        );

        let mut state = (self.state_factory)();
        state.on_init(&conn);
        let transforms = Transforms::from_state(&mut state);
        conn.set_packet_groups_joining(state.packet_groups_joining_allowed());

        self.registry.insert(conn.clone());
        conn.mark_open();

        let pipeline = ReceivePipeline::new(transforms.clone(), &self.buffers, &self.config);
        let writer = tokio::spawn(run_writer(
            conn.clone(),
            writer,
            send_rx,
            transforms,
            self.buffers.clone(),
            WriterConfig::from(&self.config),
        ));
        tokio::spawn(driver::drive(self.clone(), conn.clone(), state, reader, pipeline, writer));

        tracing::info!("🔗 连接已建立: {} ({})", id, conn.peer_addr());
        Ok(conn)
    }
}

impl<S: ConnectionState> fmt::Debug for Core<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Core")
            .field("connections", &self.registry.len())
            .field("pools", &self.pools)
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

/// [`Core`] 构建器
///
/// 协议表注册数据包时使用的 [`Pools`] 应当通过 [`CoreBuilder::with_pools`] 传入，
/// 这样连接上的出站数据包与入站数据包来自同一组池。
pub struct CoreBuilder<S: ConnectionState> {
    protocol: Arc<dyn Protocol<S>>,
    state_factory: StateFactory<S>,
    config: ConnectionConfig,
    pools: Option<Pools>,
    buffers: Option<BufferPool>,
}

impl<S: ConnectionState> CoreBuilder<S> {
    pub fn with_config(mut self, config: ConnectionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_pools(mut self, pools: Pools) -> Self {
        self.pools = Some(pools);
        self
    }

    pub fn with_buffer_pool(mut self, buffers: BufferPool) -> Self {
        self.buffers = Some(buffers);
        self
    }

    pub fn build(self) -> Result<Arc<Core<S>>, TransportError> {
        self.config.validate()?;
        let pools = self
            .pools
            .unwrap_or_else(|| Pools::new(self.config.max_cached_per_type));
        Ok(Arc::new(Core {
            protocol: self.protocol,
            state_factory: self.state_factory,
            pools,
            buffers: self.buffers.unwrap_or_default(),
            registry: ConnectionRegistry::new(),
            next_id: AtomicU64::new(1),
            token: CancellationToken::new(),
            config: self.config,
        }))
    }
}
