//! 监听器
//!
//! 接受循环在独立任务中运行：每接受一个流就交给新任务去初始化连接，
//! 然后立即发起下一次接受，应用层的初始化不会阻塞接受。

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ListenerConfig;
use crate::connection::Lifecycle;
use crate::engine::Core;
use crate::error::TransportError;
use crate::state::ConnectionState;
use crate::transport::{ipc, tcp, Acceptor, Endpoint};

struct Bound {
    endpoint: Endpoint,
    token: CancellationToken,
    task: JoinHandle<()>,
}

/// 把接受到的流接入 [`Core`]
pub struct Listener<S: ConnectionState> {
    core: Arc<Core<S>>,
    config: ListenerConfig,
    bound: Mutex<Option<Bound>>,
}

impl<S: ConnectionState> Listener<S> {
    pub fn new(core: Arc<Core<S>>) -> Self {
        Self::with_config(core, ListenerConfig::default())
    }

    pub fn with_config(core: Arc<Core<S>>, config: ListenerConfig) -> Self {
        Self {
            core,
            config,
            bound: Mutex::new(None),
        }
    }

    /// 绑定 TCP 地址并开始接受；返回实际绑定的端点
    pub fn bind_tcp(&self, addr: SocketAddr) -> Result<Endpoint, TransportError> {
        self.ensure_unbound(&addr.to_string())?;
        self.config.validate()?;
        let acceptor = tcp::TcpAcceptor::bind(addr, &self.config, self.core.config().nodelay)?;
        self.bind_with(acceptor)
    }

    /// 绑定本地 IPC 名称并开始接受
    pub fn bind_ipc(&self, name: &str) -> Result<Endpoint, TransportError> {
        self.ensure_unbound(name)?;
        let acceptor = ipc::IpcAcceptor::bind(name)?;
        self.bind_with(acceptor)
    }

    /// 使用自定义的接受端开始接受
    pub fn bind_with<A: Acceptor>(&self, acceptor: A) -> Result<Endpoint, TransportError> {
        let endpoint = acceptor.local_endpoint();
        let mut bound = self.bound.lock();
        if bound.is_some() {
            return Err(TransportError::bind_error(&endpoint, "listener is already bound"));
        }
        if self.core.is_shutdown() {
            return Err(TransportError::bind_error(&endpoint, "core is shut down"));
        }

        let token = self.core.child_token();
        let task = tokio::spawn(accept_loop(
            self.core.clone(),
            acceptor,
            token.clone(),
            self.config.accept_error_backoff,
        ));
        tracing::info!("✅ 开始监听: {}", endpoint);
        *bound = Some(Bound {
            endpoint: endpoint.clone(),
            token,
            task,
        });
        Ok(endpoint)
    }

    fn ensure_unbound(&self, target: &str) -> Result<(), TransportError> {
        match &*self.bound.lock() {
            Some(bound) => Err(TransportError::bind_error(
                target,
                format!("listener is already bound to {}", bound.endpoint),
            )),
            None => Ok(()),
        }
    }

    /// 接受循环是否仍在运行
    pub fn is_bound(&self) -> bool {
        self.bound
            .lock()
            .as_ref()
            .map_or(false, |bound| !bound.token.is_cancelled() && !bound.task.is_finished())
    }

    pub fn bound_to(&self) -> Option<Endpoint> {
        self.bound.lock().as_ref().map(|bound| bound.endpoint.clone())
    }

    /// 停止接受并释放底层资源；已建立的连接不受影响
    pub async fn unbind(&self) {
        let bound = self.bound.lock().take();
        if let Some(bound) = bound {
            bound.token.cancel();
            if let Err(e) = bound.task.await {
                if e.is_panic() {
                    tracing::error!("💥 接受循环 panic: {}", bound.endpoint);
                }
            }
            tracing::info!("🛑 已解除绑定: {}", bound.endpoint);
        }
    }
}

impl<S: ConnectionState> Drop for Listener<S> {
    fn drop(&mut self) {
        if let Some(bound) = self.bound.get_mut().take() {
            bound.token.cancel();
        }
    }
}

async fn accept_loop<S, A>(core: Arc<Core<S>>, mut acceptor: A, token: CancellationToken, backoff: Duration)
where
    S: ConnectionState,
    A: Acceptor,
{
    let endpoint = acceptor.local_endpoint();
    loop {
        let accepted = tokio::select! {
            _ = token.cancelled() => break,
            accepted = acceptor.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer)) => {
                let core = core.clone();
                tokio::spawn(async move {
                    if let Err(e) = core.adopt(stream, peer.clone(), Lifecycle::Open) {
                        tracing::debug!("🚫 放弃新连接 {}: {}", peer, e);
                    }
                });
            }
            Err(e) => {
                if token.is_cancelled() {
                    break;
                }
                tracing::warn!("⚠️ 接受连接失败 ({}): {}，{:?} 后重试", endpoint, e, backoff);
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(backoff) => {}
                }
            }
        }
    }
    tracing::debug!("🛑 接受循环结束: {}", endpoint);
}
