//! 连接器：主动建立连接

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::connection::{Connection, Lifecycle};
use crate::engine::Core;
use crate::error::TransportError;
use crate::state::ConnectionState;
use crate::transport::{ipc, tcp, Endpoint, Transport};

/// 建立出站连接并接入 [`Core`]
///
/// 连接在初始化完成前处于 `Connecting`；各 `connect_*` 返回时 `on_init` 已经执行。
pub struct Connector<S: ConnectionState> {
    core: Arc<Core<S>>,
}

impl<S: ConnectionState> Clone for Connector<S> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
        }
    }
}

impl<S: ConnectionState> Connector<S> {
    pub fn new(core: Arc<Core<S>>) -> Self {
        Self { core }
    }

    pub async fn connect_tcp(&self, addr: SocketAddr) -> Result<Connection<S>, TransportError> {
        let nodelay = self.core.config().nodelay;
        let stream = self.establish(&addr.to_string(), tcp::connect(addr, nodelay)).await?;
        self.connect_with(stream, Endpoint::Tcp(addr))
    }

    pub async fn connect_ipc(&self, name: &str) -> Result<Connection<S>, TransportError> {
        let stream = self.establish(name, ipc::connect(name)).await?;
        self.connect_with(stream, Endpoint::Ipc(name.to_string()))
    }

    /// 接入一条已建立的流
    pub fn connect_with<T: Transport>(&self, stream: T, peer: Endpoint) -> Result<Connection<S>, TransportError> {
        let target = peer.to_string();
        self.core
            .adopt(stream, peer, Lifecycle::Connecting)
            .map_err(|e| TransportError::connect_error(target, e))
    }

    async fn establish<T, F>(&self, target: &str, connect: F) -> Result<T, TransportError>
    where
        F: Future<Output = io::Result<T>>,
    {
        tracing::debug!("🔌 正在连接: {}", target);
        let timeout = self.core.config().connect_timeout;
        let attempt = async {
            match timeout {
                Some(limit) => match tokio::time::timeout(limit, connect).await {
                    Ok(result) => result.map_err(|e| TransportError::connect_error(target, e)),
                    Err(_) => Err(TransportError::connect_error(
                        target,
                        format!("timed out after {:?}", limit),
                    )),
                },
                None => connect.await.map_err(|e| TransportError::connect_error(target, e)),
            }
        };

        tokio::select! {
            _ = self.core.cancellation_token().cancelled() => {
                Err(TransportError::connect_error(target, "core is shut down"))
            }
            result = attempt => result,
        }
    }
}
