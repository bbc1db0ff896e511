//! 驱动任务：读取循环与关闭收尾

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncRead;
use tokio::task::JoinHandle;

use super::receive::{panic_message, ReceivePipeline};
use super::send::FLUSH_TIMEOUT;
use super::Connection;
use crate::engine::Core;
use crate::error::CloseReason;
use crate::state::ConnectionState;

/// 对端长时间不读取时，写任务可能阻塞在写出上
const WRITER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(FLUSH_TIMEOUT.as_secs() * 2);

/// 任意时刻只有一个读取在进行；连接的状态对象只在本任务内访问
pub(crate) async fn drive<S, R>(
    core: Arc<Core<S>>,
    conn: Connection<S>,
    mut state: S,
    mut reader: R,
    mut pipeline: ReceivePipeline,
    writer: JoinHandle<()>,
) where
    S: ConnectionState,
    R: AsyncRead + Unpin + Send,
{
    let token = conn.cancellation_token().clone();
    let protocol = core.protocol().clone();

    loop {
        let read = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            read = pipeline.fill(&mut reader) => read,
        };

        match read {
            Ok(0) => {
                conn.close(CloseReason::ConnectionLost);
                break;
            }
            Ok(n) => {
                conn.record_received(n);
                tracing::trace!("📥 收到 {} bytes ({})", n, conn.id());
                if let Err(reason) = pipeline.process(protocol.as_ref(), &conn, &mut state) {
                    conn.close(reason);
                    break;
                }
            }
            Err(e) => {
                conn.close(CloseReason::Io(e.to_string()));
                break;
            }
        }
    }

    // 由 core 关闭触发时连接尚未记录原因
    conn.close(CloseReason::Shutdown);

    let mut writer = writer;
    match tokio::time::timeout(WRITER_SHUTDOWN_TIMEOUT, &mut writer).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            if e.is_panic() {
                tracing::error!("💥 写任务 panic ({})", conn.id());
            }
        }
        Err(_) => {
            tracing::warn!("⏱️ 写任务未能按时结束，强制终止 ({})", conn.id());
            writer.abort();
        }
    }

    let reason = conn.close_reason().unwrap_or(CloseReason::Shutdown);
    if let Err(panic) = catch_unwind(AssertUnwindSafe(|| state.on_close(&reason))) {
        tracing::error!("💥 on_close panic ({}): {}", conn.id(), panic_message(panic.as_ref()));
    }

    core.registry().remove(conn.id());
    pipeline.release(core.buffer_pool());
    conn.mark_closed();
    tracing::info!("🔌 连接已关闭: {} ({}) - {}", conn.id(), conn.peer_addr(), reason);
}
