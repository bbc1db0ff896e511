//! 类型化对象池
//!
//! 每个类型一条空闲链表（crossbeam 无锁队列）：
//! - `acquire` 优先复用已重置的实例，链表为空时才分配
//! - `Pooled<T>` 被丢弃时先 `reset` 再归还，超过缓存上限则直接释放
//! - `Pools` 按 `TypeId` 管理多个 `Pool<T>`，由组合根显式持有，不使用全局静态

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::RwLock;

/// 可池化对象
///
/// `reset` 必须把所有字段恢复为默认值，归还后的实例不能再被外部使用。
pub trait Poolable: Default + Send + 'static {
    fn reset(&mut self);
}

/// 默认每种类型最多缓存的实例数
pub const DEFAULT_MAX_CACHED: usize = 1024;

struct PoolShared<T> {
    sender: Sender<T>,
    receiver: Receiver<T>,
    max_cached: usize,
    created: AtomicU64,
    acquired: AtomicU64,
    released: AtomicU64,
    discarded: AtomicU64,
    cached: AtomicUsize,
}

impl<T: Poolable> PoolShared<T> {
    fn release(&self, mut value: T) {
        value.reset();
        self.released.fetch_add(1, Ordering::Relaxed);

        if self.cached.load(Ordering::Relaxed) >= self.max_cached {
            self.discarded.fetch_add(1, Ordering::Relaxed);
            tracing::trace!("💧 池已满，丢弃 {}", std::any::type_name::<T>());
            return;
        }

        // 接收端与发送端同在 PoolShared 内，send 不会失败
        if self.sender.send(value).is_ok() {
            self.cached.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// 单一类型的对象池，克隆后共享同一条空闲链表
pub struct Pool<T: Poolable> {
    shared: Arc<PoolShared<T>>,
}

impl<T: Poolable> Clone for Pool<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Poolable> Default for Pool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Poolable> Pool<T> {
    pub fn new() -> Self {
        Self::with_max_cached(DEFAULT_MAX_CACHED)
    }

    pub fn with_max_cached(max_cached: usize) -> Self {
        let (sender, receiver) = unbounded();
        Self {
            shared: Arc::new(PoolShared {
                sender,
                receiver,
                max_cached,
                created: AtomicU64::new(0),
                acquired: AtomicU64::new(0),
                released: AtomicU64::new(0),
                discarded: AtomicU64::new(0),
                cached: AtomicUsize::new(0),
            }),
        }
    }

    /// 预分配 `count` 个实例
    pub fn prefill(&self, count: usize) {
        for _ in 0..count {
            self.shared.created.fetch_add(1, Ordering::Relaxed);
            self.shared.release(T::default());
        }
    }

    /// 取出一个已重置的实例
    pub fn acquire(&self) -> Pooled<T> {
        self.shared.acquired.fetch_add(1, Ordering::Relaxed);

        let value = match self.shared.receiver.try_recv() {
            Ok(value) => {
                self.shared.cached.fetch_sub(1, Ordering::Relaxed);
                value
            }
            Err(_) => {
                self.shared.created.fetch_add(1, Ordering::Relaxed);
                T::default()
            }
        };

        Pooled {
            value,
            pool: self.shared.clone(),
            detached: false,
        }
    }

    /// 当前空闲实例数
    pub fn cached(&self) -> usize {
        self.shared.cached.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            created: self.shared.created.load(Ordering::Relaxed),
            acquired: self.shared.acquired.load(Ordering::Relaxed),
            released: self.shared.released.load(Ordering::Relaxed),
            discarded: self.shared.discarded.load(Ordering::Relaxed),
            cached: self.cached(),
        }
    }
}

impl<T: Poolable> fmt::Debug for Pool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("type", &std::any::type_name::<T>())
            .field("stats", &self.stats())
            .finish()
    }
}

/// 池统计快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub created: u64,
    pub acquired: u64,
    pub released: u64,
    pub discarded: u64,
    pub cached: usize,
}

/// 从池中取出的实例；丢弃时自动重置并归还
pub struct Pooled<T: Poolable> {
    value: T,
    pool: Arc<PoolShared<T>>,
    detached: bool,
}

impl<T: Poolable> Pooled<T> {
    /// 把实例从池中脱离出来，不再归还
    pub fn detach(mut this: Self) -> T {
        this.detached = true;
        this.pool.discarded.fetch_add(1, Ordering::Relaxed);
        std::mem::take(&mut this.value)
    }
}

impl<T: Poolable> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T: Poolable> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

impl<T: Poolable> Drop for Pooled<T> {
    fn drop(&mut self) {
        if !self.detached {
            self.pool.release(std::mem::take(&mut self.value));
        }
    }
}

impl<T: Poolable + fmt::Debug> fmt::Debug for Pooled<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

impl<T: Poolable + PartialEq> PartialEq<T> for Pooled<T> {
    fn eq(&self, other: &T) -> bool {
        **self == *other
    }
}

/// 按类型索引的对象池集合
#[derive(Clone)]
pub struct Pools {
    inner: Arc<PoolsInner>,
}

struct PoolsInner {
    pools: RwLock<HashMap<TypeId, Box<dyn Any + Send + Sync>>>,
    max_cached: usize,
}

impl Default for Pools {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CACHED)
    }
}

impl Pools {
    pub fn new(max_cached_per_type: usize) -> Self {
        Self {
            inner: Arc::new(PoolsInner {
                pools: RwLock::new(HashMap::new()),
                max_cached: max_cached_per_type,
            }),
        }
    }

    /// 获取（必要时创建）类型 `T` 的池
    pub fn pool<T: Poolable>(&self) -> Pool<T> {
        let key = TypeId::of::<T>();

        if let Some(pool) = self.inner.pools.read().get(&key) {
            if let Some(pool) = pool.downcast_ref::<Pool<T>>() {
                return pool.clone();
            }
        }

        let mut pools = self.inner.pools.write();
        let entry = pools
            .entry(key)
            .or_insert_with(|| Box::new(Pool::<T>::with_max_cached(self.inner.max_cached)));
        match entry.downcast_ref::<Pool<T>>() {
            Some(pool) => pool.clone(),
            // TypeId 相同则类型必然相同
            None => unreachable!("pool registry corrupted for {}", std::any::type_name::<T>()),
        }
    }

    pub fn acquire<T: Poolable>(&self) -> Pooled<T> {
        self.pool::<T>().acquire()
    }

    /// 已注册的类型数量
    pub fn len(&self) -> usize {
        self.inner.pools.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for Pools {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pools")
            .field("types", &self.len())
            .field("max_cached", &self.inner.max_cached)
            .finish()
    }
}
