//! 同步原语适配层：生产构建使用 `spin`，Loom 模型检查时切换为 `loom::sync`。
//!
//! 池内只有一个互斥域（自由链表头 + 字节计数），统计计数器为松散原子量，
//! 两者都经由本模块取得，保证 `cfg(loom)` 下的模型能覆盖全部共享状态。

#[cfg(not(any(loom, spark_loom)))]
pub(crate) use core::sync::atomic::{AtomicU64, Ordering};

#[cfg(any(loom, spark_loom))]
pub(crate) use loom::sync::atomic::{AtomicU64, Ordering};

/// 统一的互斥锁外壳，`lock` 直接返回守卫。
#[cfg(not(any(loom, spark_loom)))]
pub(crate) struct Mutex<T>(spin::Mutex<T>);

#[cfg(not(any(loom, spark_loom)))]
impl<T> Mutex<T> {
    pub(crate) const fn new(value: T) -> Self {
        Self(spin::Mutex::new(value))
    }

    pub(crate) fn lock(&self) -> spin::MutexGuard<'_, T> {
        self.0.lock()
    }
}

#[cfg(any(loom, spark_loom))]
pub(crate) struct Mutex<T>(loom::sync::Mutex<T>);

#[cfg(any(loom, spark_loom))]
impl<T> Mutex<T> {
    pub(crate) fn new(value: T) -> Self {
        Self(loom::sync::Mutex::new(value))
    }

    pub(crate) fn lock(&self) -> loom::sync::MutexGuard<'_, T> {
        // 临界区内不会 panic，中毒仅可能来自测试线程本身的断言失败。
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
