use core::{fmt, mem};
#[cfg(not(any(loom, spark_loom)))]
use std::sync::OnceLock;

use crate::block::SIZE;
use crate::segment::Segment;
use crate::sync::{AtomicU64, Mutex, Ordering};

/// 池默认最多缓存的字节数（64 KiB，即 8 个段落）。
pub const MAX_SIZE: usize = 64 * 1024;

/// 段落池配置。
///
/// # 契约说明（What）
/// - `max_bytes`：自由链表最多保留的字节数，默认 [`MAX_SIZE`]；
///   小于 [`SIZE`] 时池不会缓存任何段落，每次 `take` 都重新分配。
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SegmentPoolConfig {
    max_bytes: usize,
}

impl SegmentPoolConfig {
    /// 默认配置，等价于 `max_bytes = MAX_SIZE`。
    pub const fn new() -> Self {
        Self {
            max_bytes: MAX_SIZE,
        }
    }

    /// 设置自由链表的字节上限。
    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// 字节上限。
    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// 字节上限折算的段落数。
    pub fn max_segments(&self) -> usize {
        self.max_bytes / SIZE
    }
}

impl Default for SegmentPoolConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// 池拒绝回收的原因。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DeclineReason {
    /// 段落底层块被共享过，不能再交给其他使用者。
    Shared,
    /// 池已达字节上限。
    PoolFull,
}

/// [`SegmentPool::recycle`] 的结果。
///
/// 拒绝不是错误：被拒绝的段落原样交还调用方，直接丢弃即交给常规内存回收。
#[derive(Debug)]
pub enum Recycle {
    /// 段落已进入自由链表。
    Pooled,
    /// 段落未被接收，字段保持原样。
    Declined {
        reason: DeclineReason,
        segment: Segment,
    },
}

impl Recycle {
    /// 是否进入了自由链表。
    pub fn is_pooled(&self) -> bool {
        matches!(self, Recycle::Pooled)
    }

    /// 被拒绝时返回原因。
    pub fn decline_reason(&self) -> Option<DeclineReason> {
        match self {
            Recycle::Pooled => None,
            Recycle::Declined { reason, .. } => Some(*reason),
        }
    }

    /// 取回被拒绝的段落。
    pub fn into_declined(self) -> Option<Segment> {
        match self {
            Recycle::Pooled => None,
            Recycle::Declined { segment, .. } => Some(segment),
        }
    }
}

/// 池的统计快照。
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SegmentPoolStats {
    /// 自由链表当前持有的字节数。
    pub pooled_bytes: usize,
    /// 自由链表当前持有的段落数。
    pub pooled_segments: usize,
    /// `take` 命中自由链表的次数。
    pub reused: u64,
    /// `take` 未命中、新分配段落的次数。
    pub fresh_allocations: u64,
    /// 成功入池的次数。
    pub recycled: u64,
    /// 因共享被拒绝的次数。
    pub declined_shared: u64,
    /// 因池满被拒绝的次数。
    pub declined_full: u64,
}

/// `SegmentPool` 是段落的有界、线程安全复用池。
///
/// # 模块角色（Why）
/// - 缓冲频繁创建和释放 8 KiB 段落，复用可以省去分配与清零开销；
/// - 上限保证闲置内存不会无界增长。
///
/// # 核心机制（How）
/// - 自由链表是 LIFO 栈，最近回收的段落最先被取出，缓存更热；
/// - 栈的存储在构造时按上限预留，取还只移动段落值，命中路径不触发堆分配；
/// - 栈与字节计数只在一把锁内修改，临界区仅包含压栈/出栈与计数，
///   新段落的分配与清零在锁外完成；
/// - 统计计数器为松散原子量，在锁外更新。
///
/// # 契约说明（What）
/// - [`take`](Self::take) 总是立即成功，返回 `owner && !shared && pos == limit == 0` 的段落；
///   复用段落 `limit` 之后可能残留旧数据，调用方不得读取；
/// - [`recycle`](Self::recycle) 总是立即返回：共享段落或池满时拒绝，不视为错误；
/// - 始终满足 `pooled_bytes == pooled_segments * SIZE <= max_bytes`，
///   其中字节计数与栈长度各自维护。
///
/// # 使用方式
/// - 显式构造实例并传递给使用者，便于测试隔离；
/// - 需要进程级共享时使用 [`SegmentPool::global`]。
pub struct SegmentPool {
    free_list: Mutex<FreeList>,
    config: SegmentPoolConfig,
    metrics: PoolMetrics,
}

impl SegmentPool {
    /// 以默认配置创建空池。
    pub fn new() -> Self {
        Self::with_config(SegmentPoolConfig::default())
    }

    /// 以指定配置创建空池，并为自由链表预留 `max_segments` 个槽位。
    pub fn with_config(config: SegmentPoolConfig) -> Self {
        Self {
            free_list: Mutex::new(FreeList::with_capacity(reserved_slots(&config))),
            config,
            metrics: PoolMetrics::new(),
        }
    }

    /// 进程级共享池，首次访问时以默认配置初始化。
    #[cfg(not(any(loom, spark_loom)))]
    pub fn global() -> &'static SegmentPool {
        static GLOBAL: OnceLock<SegmentPool> = OnceLock::new();
        GLOBAL.get_or_init(SegmentPool::new)
    }

    /// 池配置。
    pub fn config(&self) -> &SegmentPoolConfig {
        &self.config
    }

    /// 字节上限。
    pub fn max_bytes(&self) -> usize {
        self.config.max_bytes
    }

    /// 取出一个可写段落：优先复用栈顶，否则在锁外新分配。
    pub fn take(&self) -> Segment {
        let reused = self.free_list.lock().pop();
        match reused {
            Some(segment) => {
                self.metrics.reused.fetch_add(1, Ordering::Relaxed);
                segment
            }
            None => {
                self.metrics.fresh_allocations.fetch_add(1, Ordering::Relaxed);
                tracing::trace!("segment pool empty, allocating a fresh segment");
                Segment::new()
            }
        }
    }

    /// 交还一个已脱链的段落。
    ///
    /// # 教案式说明
    /// - **前置条件**：段落必须已脱离任何环；独立持有的 `Segment` 值天然满足，
    ///   环中段落需先经 [`SegmentRing::pop`](crate::SegmentRing::pop) 取出；
    /// - **逻辑 (How)**：共享段落直接拒绝；否则在锁内先检查上限，未满则压栈并计数，
    ///   入栈的段落游标复位为 0；
    /// - **后置条件**：拒绝时段落原样经 [`Recycle::Declined`] 交还，池状态不变。
    pub fn recycle(&self, segment: Segment) -> Recycle {
        if segment.is_shared() {
            self.metrics.declined_shared.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(?segment, "declined shared segment");
            return Recycle::Declined {
                reason: DeclineReason::Shared,
                segment,
            };
        }
        debug_assert!(segment.is_exclusive());

        let rejected = {
            let mut list = self.free_list.lock();
            if list.byte_count + SIZE > self.config.max_bytes {
                Some(segment)
            } else {
                list.push(segment);
                None
            }
        };

        match rejected {
            None => {
                self.metrics.recycled.fetch_add(1, Ordering::Relaxed);
                Recycle::Pooled
            }
            Some(segment) => {
                self.metrics.declined_full.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    max_bytes = self.config.max_bytes,
                    "segment pool full, declining segment"
                );
                Recycle::Declined {
                    reason: DeclineReason::PoolFull,
                    segment,
                }
            }
        }
    }

    /// 自由链表当前持有的字节数。
    pub fn pooled_bytes(&self) -> usize {
        self.free_list.lock().byte_count
    }

    /// 自由链表当前持有的段落数，按栈长度计数。
    pub fn pooled_segments(&self) -> usize {
        self.free_list.lock().len()
    }

    /// 清空自由链表，返回释放的字节数。替换用的空栈在锁外预留，旧段落在锁外释放。
    pub fn shrink(&self) -> usize {
        let empty = FreeList::with_capacity(reserved_slots(&self.config));
        let drained = mem::replace(&mut *self.free_list.lock(), empty);
        let released = drained.byte_count;
        drop(drained);
        tracing::debug!(released, "segment pool shrunk");
        released
    }

    /// 统计快照。字节数与段落数在同一次加锁中读取。
    pub fn stats(&self) -> SegmentPoolStats {
        let (pooled_bytes, pooled_segments) = {
            let list = self.free_list.lock();
            (list.byte_count, list.len())
        };
        SegmentPoolStats {
            pooled_bytes,
            pooled_segments,
            reused: self.metrics.reused.load(Ordering::Relaxed),
            fresh_allocations: self.metrics.fresh_allocations.load(Ordering::Relaxed),
            recycled: self.metrics.recycled.load(Ordering::Relaxed),
            declined_shared: self.metrics.declined_shared.load(Ordering::Relaxed),
            declined_full: self.metrics.declined_full.load(Ordering::Relaxed),
        }
    }
}

impl Default for SegmentPool {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SegmentPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SegmentPool")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}

/// 构造时最多预留的槽位数；上限更大的池超出部分按需增长。
const RESERVE_LIMIT: usize = 1024;

fn reserved_slots(config: &SegmentPoolConfig) -> usize {
    config.max_segments().min(RESERVE_LIMIT)
}

/// 池内段落的 LIFO 栈与独立维护的字节计数。
struct FreeList {
    stack: Vec<Segment>,
    byte_count: usize,
}

impl FreeList {
    fn with_capacity(slots: usize) -> Self {
        Self {
            stack: Vec::with_capacity(slots),
            byte_count: 0,
        }
    }

    fn push(&mut self, mut segment: Segment) {
        segment.reset();
        self.stack.push(segment);
        self.byte_count += SIZE;
    }

    fn pop(&mut self) -> Option<Segment> {
        let segment = self.stack.pop()?;
        self.byte_count -= SIZE;
        Some(segment)
    }

    fn len(&self) -> usize {
        self.stack.len()
    }
}

struct PoolMetrics {
    reused: AtomicU64,
    fresh_allocations: AtomicU64,
    recycled: AtomicU64,
    declined_shared: AtomicU64,
    declined_full: AtomicU64,
}

impl PoolMetrics {
    fn new() -> Self {
        Self {
            reused: AtomicU64::new(0),
            fresh_allocations: AtomicU64::new(0),
            recycled: AtomicU64::new(0),
            declined_shared: AtomicU64::new(0),
            declined_full: AtomicU64::new(0),
        }
    }
}
