//! 写任务
//!
//! 每个连接一个写任务，按入队顺序逐个写出发送单元，一个单元一次 `write_all`，
//! 单元之间不会交错。允许合并时，连续的单元先追加到合并缓冲，
//! 缓冲中第一个单元入队 `join_interval` 之后，或缓冲将超过 `max_joined_size` 时写出。

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};

use super::transform::Transforms;
use super::Connection;
use crate::buffer::BufferPool;
use crate::config::ConnectionConfig;
use crate::error::CloseReason;
use crate::state::ConnectionState;

/// 关闭时写出剩余单元的时间上限
pub(crate) const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy)]
pub(crate) struct WriterConfig {
    pub(crate) join_interval: Duration,
    pub(crate) max_joined_size: usize,
}

impl From<&ConnectionConfig> for WriterConfig {
    fn from(config: &ConnectionConfig) -> Self {
        Self {
            join_interval: config.join_interval,
            max_joined_size: config.max_joined_size,
        }
    }
}

struct UnitWriter<'a, S: ConnectionState, W> {
    io: W,
    transforms: Transforms,
    buffers: BufferPool,
    conn: &'a Connection<S>,
}

impl<S: ConnectionState, W: AsyncWrite + Unpin> UnitWriter<'_, S, W> {
    async fn write_unit(&mut self, unit: &[u8]) -> Result<(), CloseReason> {
        if self.transforms.is_passthrough() {
            self.io.write_all(unit).await.map_err(|e| CloseReason::Io(e.to_string()))?;
            self.conn.record_sent(unit.len());
            return Ok(());
        }

        let mut scratch = self.buffers.get_for_len(unit.len());
        let mut transformed = self.buffers.get_for_len(unit.len());
        let result = match self.transforms.encode_outbound(unit, &mut scratch, &mut transformed) {
            Ok(()) => self
                .io
                .write_all(&transformed)
                .await
                .map(|()| self.conn.record_sent(transformed.len()))
                .map_err(|e| CloseReason::Io(e.to_string())),
            Err(reason) => Err(reason),
        };
        self.buffers.return_buffer(scratch);
        self.buffers.return_buffer(transformed);
        result
    }
}

pub(crate) async fn run_writer<S, W>(
    conn: Connection<S>,
    io: W,
    mut rx: mpsc::UnboundedReceiver<Bytes>,
    transforms: Transforms,
    buffers: BufferPool,
    config: WriterConfig,
) where
    S: ConnectionState,
    W: AsyncWrite + Unpin + Send,
{
    let token = conn.cancellation_token().clone();
    let mut writer = UnitWriter {
        io,
        transforms,
        buffers,
        conn: &conn,
    };
    let mut joined = BytesMut::new();
    let mut ticker = tokio::time::interval_at(Instant::now() + config.join_interval, config.join_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let outcome = loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break Ok(()),
            unit = rx.recv() => {
                let Some(unit) = unit else { break Ok(()) };
                let result = if conn.packet_groups_joining() {
                    let was_empty = joined.is_empty();
                    let result = join_unit(&mut writer, &mut joined, &unit, config.max_joined_size).await;
                    // 计时从缓冲里的第一个单元开始
                    if was_empty && !joined.is_empty() {
                        ticker.reset();
                    }
                    result
                } else {
                    match flush_joined(&mut writer, &mut joined).await {
                        Ok(()) => writer.write_unit(&unit).await,
                        Err(reason) => Err(reason),
                    }
                };
                if let Err(reason) = result {
                    break Err(reason);
                }
            }
            _ = ticker.tick(), if !joined.is_empty() => {
                if let Err(reason) = flush_joined(&mut writer, &mut joined).await {
                    break Err(reason);
                }
            }
        }
    };

    match outcome {
        Ok(()) => {
            // 关闭前把已入队的单元写完
            let drain = async {
                flush_joined(&mut writer, &mut joined).await?;
                while let Ok(unit) = rx.try_recv() {
                    writer.write_unit(&unit).await?;
                }
                Ok::<(), CloseReason>(())
            };
            match tokio::time::timeout(FLUSH_TIMEOUT, drain).await {
                Ok(Ok(())) => {}
                Ok(Err(reason)) => tracing::debug!("📤 关闭时写出剩余数据失败 ({}): {}", conn.id(), reason),
                Err(_) => tracing::debug!("📤 关闭时写出剩余数据超时 ({})", conn.id()),
            }
        }
        Err(reason) => {
            tracing::debug!("📤 写出失败 ({}): {}", conn.id(), reason);
            conn.close(reason);
        }
    }

    let _ = tokio::time::timeout(FLUSH_TIMEOUT, writer.io.shutdown()).await;
    tracing::trace!("✅ 写任务结束 ({})", conn.id());
}

async fn join_unit<S: ConnectionState, W: AsyncWrite + Unpin>(
    writer: &mut UnitWriter<'_, S, W>,
    joined: &mut BytesMut,
    unit: &[u8],
    max_joined_size: usize,
) -> Result<(), CloseReason> {
    if !joined.is_empty() && joined.len() + unit.len() > max_joined_size {
        flush_joined(writer, joined).await?;
    }
    joined.extend_from_slice(unit);
    if joined.len() >= max_joined_size {
        flush_joined(writer, joined).await?;
    }
    Ok(())
}

async fn flush_joined<S: ConnectionState, W: AsyncWrite + Unpin>(
    writer: &mut UnitWriter<'_, S, W>,
    joined: &mut BytesMut,
) -> Result<(), CloseReason> {
    if joined.is_empty() {
        return Ok(());
    }
    tracing::trace!("📤 写出合并缓冲 {} bytes", joined.len());
    let result = writer.write_unit(joined).await;
    joined.clear();
    result
}
