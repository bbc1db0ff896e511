//! TCP 传输

use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpSocket, TcpStream};

use super::{Acceptor, Endpoint};
use crate::config::ListenerConfig;
use crate::error::TransportError;

/// TCP 监听端
#[derive(Debug)]
pub struct TcpAcceptor {
    listener: TcpListener,
    local_addr: SocketAddr,
    nodelay: bool,
}

impl TcpAcceptor {
    /// 绑定并开始监听；必须在 Tokio 运行时内调用
    ///
    /// 绑定前关闭 `SO_LINGER` 并按配置设置地址复用。
    pub fn bind(addr: SocketAddr, config: &ListenerConfig, nodelay: bool) -> Result<Self, TransportError> {
        let bind_error = |e: io::Error| TransportError::bind_error(addr, e);

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(bind_error)?;
        socket.set_reuseaddr(config.reuse_addr).map_err(bind_error)?;
        // tokio 已弃用 set_linger，这里只用它关闭 SO_LINGER
        #[allow(deprecated)]
        socket.set_linger(None).map_err(bind_error)?;
        socket.bind(addr).map_err(bind_error)?;

        let listener = socket.listen(config.backlog).map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;
        tracing::debug!("🚀 TCP监听已绑定: {} (backlog {})", local_addr, config.backlog);

        Ok(Self {
            listener,
            local_addr,
            nodelay,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

#[async_trait]
impl Acceptor for TcpAcceptor {
    type Stream = TcpStream;

    async fn accept(&mut self) -> io::Result<(TcpStream, Endpoint)> {
        let (stream, peer) = self.listener.accept().await?;
        if self.nodelay {
            stream.set_nodelay(true)?;
        }
        tracing::debug!("🔗 TCP新连接来自: {}", peer);
        Ok((stream, Endpoint::Tcp(peer)))
    }

    fn local_endpoint(&self) -> Endpoint {
        Endpoint::Tcp(self.local_addr)
    }
}

/// 建立出站 TCP 流
pub async fn connect(addr: SocketAddr, nodelay: bool) -> io::Result<TcpStream> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(nodelay)?;
    Ok(stream)
}
