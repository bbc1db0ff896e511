//! 本地 IPC 传输
//!
//! - unix：Unix 域套接字。名称不含路径分隔符时放在系统临时目录下（`<name>.sock`）
//! - windows：命名管道 `\\.\pipe\<name>`。管道实例只能服务一个连接，
//!   因此每次等待连接都会重新创建服务端实例

use std::io;

use async_trait::async_trait;

use super::{Acceptor, Endpoint};
use crate::error::TransportError;

#[cfg(unix)]
pub use self::unix::{connect, IpcAcceptor, IpcStream};
#[cfg(windows)]
pub use self::windows::{connect, IpcAcceptor, IpcStream};

#[cfg(unix)]
mod unix {
    use super::*;
    use std::path::{Path, PathBuf};
    use tokio::net::{UnixListener, UnixStream};

    pub type IpcStream = UnixStream;

    pub(super) fn socket_path(name: &str) -> PathBuf {
        if name.contains('/') {
            PathBuf::from(name)
        } else {
            std::env::temp_dir().join(format!("{}.sock", name))
        }
    }

    /// Unix 域套接字监听端；释放时删除套接字文件
    #[derive(Debug)]
    pub struct IpcAcceptor {
        listener: UnixListener,
        name: String,
        path: PathBuf,
    }

    impl IpcAcceptor {
        /// 绑定；必须在 Tokio 运行时内调用
        pub fn bind(name: &str) -> Result<Self, TransportError> {
            let path = socket_path(name);
            // 清理上次遗留的套接字文件
            if path.exists() {
                std::fs::remove_file(&path).map_err(|e| TransportError::bind_error(path.display(), e))?;
            }
            let listener = UnixListener::bind(&path).map_err(|e| TransportError::bind_error(path.display(), e))?;
            tracing::debug!("🚀 IPC监听已绑定: {}", path.display());
            Ok(Self {
                listener,
                name: name.to_string(),
                path,
            })
        }

        pub fn path(&self) -> &Path {
            &self.path
        }
    }

    impl Drop for IpcAcceptor {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.path);
        }
    }

    #[async_trait]
    impl Acceptor for IpcAcceptor {
        type Stream = UnixStream;

        async fn accept(&mut self) -> io::Result<(UnixStream, Endpoint)> {
            let (stream, _) = self.listener.accept().await?;
            tracing::debug!("🔗 IPC新连接: {}", self.name);
            Ok((stream, Endpoint::Ipc(self.name.clone())))
        }

        fn local_endpoint(&self) -> Endpoint {
            Endpoint::Ipc(self.name.clone())
        }
    }

    /// 建立出站 IPC 流
    pub async fn connect(name: &str) -> io::Result<UnixStream> {
        UnixStream::connect(socket_path(name)).await
    }
}

#[cfg(windows)]
mod windows {
    use super::*;
    use std::time::Duration;
    use tokio::net::windows::named_pipe::{ClientOptions, NamedPipeClient, NamedPipeServer, ServerOptions};

    pub type IpcStream = NamedPipeClient;

    const ERROR_PIPE_BUSY: i32 = 231;
    const PIPE_BUSY_RETRY: Duration = Duration::from_millis(50);

    fn pipe_name(name: &str) -> String {
        format!(r"\\.\pipe\{}", name)
    }

    /// 命名管道监听端
    #[derive(Debug)]
    pub struct IpcAcceptor {
        server: NamedPipeServer,
        name: String,
        pipe_name: String,
    }

    impl IpcAcceptor {
        /// 创建第一个管道实例；必须在 Tokio 运行时内调用
        pub fn bind(name: &str) -> Result<Self, TransportError> {
            let pipe_name = pipe_name(name);
            let server = ServerOptions::new()
                .first_pipe_instance(true)
                .create(&pipe_name)
                .map_err(|e| TransportError::bind_error(&pipe_name, e))?;
            tracing::debug!("🚀 IPC监听已绑定: {}", pipe_name);
            Ok(Self {
                server,
                name: name.to_string(),
                pipe_name,
            })
        }
    }

    #[async_trait]
    impl Acceptor for IpcAcceptor {
        type Stream = NamedPipeServer;

        async fn accept(&mut self) -> io::Result<(NamedPipeServer, Endpoint)> {
            self.server.connect().await?;
            // 已连接的实例交给连接，下一轮等待使用新实例
            let next = ServerOptions::new().create(&self.pipe_name)?;
            let connected = std::mem::replace(&mut self.server, next);
            tracing::debug!("🔗 IPC新连接: {}", self.name);
            Ok((connected, Endpoint::Ipc(self.name.clone())))
        }

        fn local_endpoint(&self) -> Endpoint {
            Endpoint::Ipc(self.name.clone())
        }
    }

    /// 建立出站 IPC 流；所有实例都忙时稍后重试
    pub async fn connect(name: &str) -> io::Result<NamedPipeClient> {
        let pipe_name = pipe_name(name);
        loop {
            match ClientOptions::new().open(&pipe_name) {
                Ok(client) => return Ok(client),
                Err(e) if e.raw_os_error() == Some(ERROR_PIPE_BUSY) => {}
                Err(e) => return Err(e),
            }
            tokio::time::sleep(PIPE_BUSY_RETRY).await;
        }
    }
}
