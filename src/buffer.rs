//! 分级字节缓冲池
//!
//! 接收缓冲、解密/解压中间缓冲以及发送时的临时缓冲都从这里取用，
//! 用完后归还，避免热路径上的重复分配。

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use crossbeam_channel::{unbounded, Receiver, Sender};

/// 缓冲区大小档位
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferSize {
    Small,  // 1KB
    Medium, // 8KB
    Large,  // 64KB
}

impl BufferSize {
    /// 获取缓冲区容量
    pub const fn capacity(self) -> usize {
        match self {
            BufferSize::Small => 1024,
            BufferSize::Medium => 8192,
            BufferSize::Large => 65536,
        }
    }

    /// 能容纳 `len` 字节的最小档位
    pub const fn for_len(len: usize) -> Self {
        if len <= BufferSize::Small.capacity() {
            BufferSize::Small
        } else if len <= BufferSize::Medium.capacity() {
            BufferSize::Medium
        } else {
            BufferSize::Large
        }
    }

    /// 按实际容量归档；小于 1KB 的缓冲不回收
    const fn for_capacity(capacity: usize) -> Option<Self> {
        if capacity >= BufferSize::Large.capacity() {
            Some(BufferSize::Large)
        } else if capacity >= BufferSize::Medium.capacity() {
            Some(BufferSize::Medium)
        } else if capacity >= BufferSize::Small.capacity() {
            Some(BufferSize::Small)
        } else {
            None
        }
    }

    pub const fn description(self) -> &'static str {
        match self {
            BufferSize::Small => "Small(1KB)",
            BufferSize::Medium => "Medium(8KB)",
            BufferSize::Large => "Large(64KB)",
        }
    }
}

/// 超过此容量的缓冲直接释放，不进缓存
const MAX_RETURNED_CAPACITY: usize = 4 * 1024 * 1024;

struct Tier {
    sender: Sender<BytesMut>,
    receiver: Receiver<BytesMut>,
    cached: AtomicUsize,
    max_cached: usize,
}

impl Tier {
    fn new(max_cached: usize) -> Self {
        let (sender, receiver) = unbounded();
        Self {
            sender,
            receiver,
            cached: AtomicUsize::new(0),
            max_cached,
        }
    }
}

#[derive(Default)]
struct BufferStats {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    returned: AtomicU64,
    dropped: AtomicU64,
}

/// 分级缓冲池，克隆后共享
#[derive(Clone)]
pub struct BufferPool {
    small: Arc<Tier>,
    medium: Arc<Tier>,
    large: Arc<Tier>,
    stats: Arc<BufferStats>,
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferPool {
    pub fn new() -> Self {
        Self {
            small: Arc::new(Tier::new(500)),
            medium: Arc::new(Tier::new(200)),
            large: Arc::new(Tier::new(50)),
            stats: Arc::new(BufferStats::default()),
        }
    }

    fn tier(&self, size: BufferSize) -> &Tier {
        match size {
            BufferSize::Small => &self.small,
            BufferSize::Medium => &self.medium,
            BufferSize::Large => &self.large,
        }
    }

    /// 取出一个已清空、容量不小于该档位的缓冲
    pub fn get_buffer(&self, size: BufferSize) -> BytesMut {
        let tier = self.tier(size);

        if let Ok(mut buffer) = tier.receiver.try_recv() {
            tier.cached.fetch_sub(1, Ordering::Relaxed);
            self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
            buffer.clear();
            tracing::trace!("🎯 缓存命中: {} 容量={}", size.description(), buffer.capacity());
            return buffer;
        }

        self.stats.cache_misses.fetch_add(1, Ordering::Relaxed);
        tracing::trace!("🆕 新分配: {}", size.description());
        BytesMut::with_capacity(size.capacity())
    }

    /// 取出能容纳 `len` 字节的缓冲
    pub fn get_for_len(&self, len: usize) -> BytesMut {
        let mut buffer = self.get_buffer(BufferSize::for_len(len));
        buffer.reserve(len);
        buffer
    }

    /// 归还缓冲
    pub fn return_buffer(&self, mut buffer: BytesMut) {
        let capacity = buffer.capacity();
        let size = match BufferSize::for_capacity(capacity) {
            Some(size) if capacity <= MAX_RETURNED_CAPACITY => size,
            _ => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        let tier = self.tier(size);
        if tier.cached.load(Ordering::Relaxed) >= tier.max_cached {
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::trace!("💧 缓存已满，丢弃 {} 缓冲区", size.description());
            return;
        }

        buffer.clear();
        if tier.sender.send(buffer).is_ok() {
            tier.cached.fetch_add(1, Ordering::Relaxed);
            self.stats.returned.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn stats(&self) -> BufferPoolStats {
        BufferPoolStats {
            cache_hits: self.stats.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.stats.cache_misses.load(Ordering::Relaxed),
            returned: self.stats.returned.load(Ordering::Relaxed),
            dropped: self.stats.dropped.load(Ordering::Relaxed),
            small_cached: self.small.cached.load(Ordering::Relaxed),
            medium_cached: self.medium.cached.load(Ordering::Relaxed),
            large_cached: self.large.cached.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool").field("stats", &self.stats()).finish()
    }
}

/// 缓冲池统计快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferPoolStats {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub returned: u64,
    pub dropped: u64,
    pub small_cached: usize,
    pub medium_cached: usize,
    pub large_cached: usize,
}

impl BufferPoolStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BufMut;

    #[test]
    fn test_size_selection() {
        assert_eq!(BufferSize::for_len(10), BufferSize::Small);
        assert_eq!(BufferSize::for_len(1025), BufferSize::Medium);
        assert_eq!(BufferSize::for_len(100_000), BufferSize::Large);
    }

    #[test]
    fn test_returned_buffer_is_reused_cleared() {
        let pool = BufferPool::new();
        let mut buffer = pool.get_buffer(BufferSize::Medium);
        buffer.put_slice(b"leftover");
        pool.return_buffer(buffer);
        assert_eq!(pool.stats().medium_cached, 1);

        let buffer = pool.get_buffer(BufferSize::Medium);
        assert!(buffer.is_empty());
        assert!(buffer.capacity() >= BufferSize::Medium.capacity());

        let stats = pool.stats();
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.cache_misses, 1);
        assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_tiny_buffers_are_not_cached() {
        let pool = BufferPool::new();
        pool.return_buffer(BytesMut::with_capacity(16));
        assert_eq!(pool.stats().dropped, 1);
        assert_eq!(pool.stats().small_cached, 0);
    }
}
