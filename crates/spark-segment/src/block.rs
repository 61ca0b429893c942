//! 定长字节块及其两种访问句柄。
//!
//! # 设计概要（How）
//! - [`Block`] 是引用计数的 `SIZE` 字节存储，由 `Arc` 管理生命周期：最后一个别名释放时归还内存；
//! - [`OwnerBlock`] 是唯一的写入路径，每个块至多存在一个；
//! - [`SharedView`] 只读，记录创建时可见的上界 `end`，读取永远不会越过该上界。
//!
//! # 契约说明（What）
//! - 所有者只在 `frozen` 之后写入，`frozen` 是已交给视图的最大上界；
//! - 视图只在 `end` 之前读取，且 `end <= frozen`；
//! - 左移等改写已有字节的操作要求块已不存在任何别名（`Arc::get_mut` 成功）。
//!
//! 读写区间因此互不重叠，跨线程并发访问同一块不会产生数据竞争。

use core::cell::UnsafeCell;
use core::ops::Range;
use core::slice;
use std::sync::Arc;

/// 每个段落的固定容量（字节）。
pub const SIZE: usize = 8192;

pub(crate) struct Block {
    cells: Box<[UnsafeCell<u8>]>,
}

// SAFETY: 并发访问只发生在互不重叠的区间上：视图读取 `[.., end)`，所有者写入 `[frozen, SIZE)`，
// 且 `end <= frozen`；改写 `frozen` 之前字节的路径要求独占 `&mut Block`。
unsafe impl Sync for Block {}

impl Block {
    fn zeroed() -> Self {
        let bytes: Box<[u8]> = vec![0u8; SIZE].into_boxed_slice();
        // SAFETY: `UnsafeCell<u8>` 与 `u8` 为 `repr(transparent)`，切片布局与长度元数据一致。
        let cells = unsafe { Box::from_raw(Box::into_raw(bytes) as *mut [UnsafeCell<u8>]) };
        Self { cells }
    }

    fn base(&self) -> *mut u8 {
        UnsafeCell::raw_get(self.cells.as_ptr())
    }

    /// # Safety
    /// 调用方保证 `range` 在返回引用存活期间不会被写入。
    unsafe fn bytes(&self, range: Range<usize>) -> &[u8] {
        assert!(range.start <= range.end && range.end <= SIZE);
        // SAFETY: 区间已做边界检查，写入互斥由调用方保证。
        unsafe { slice::from_raw_parts(self.base().add(range.start), range.len()) }
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: `&mut self` 说明不存在其他访问者。
        unsafe { slice::from_raw_parts_mut(self.base(), SIZE) }
    }
}

/// 块的唯一写入句柄。
pub(crate) struct OwnerBlock {
    block: Arc<Block>,
    frozen: usize,
}

impl OwnerBlock {
    pub(crate) fn allocate() -> Self {
        Self {
            block: Arc::new(Block::zeroed()),
            frozen: 0,
        }
    }

    /// 创建覆盖 `[.., end)` 的只读视图；此后 `end` 之前的字节对所有者也不可改写。
    pub(crate) fn share(&mut self, end: usize) -> SharedView {
        assert!(end <= SIZE);
        self.frozen = self.frozen.max(end);
        SharedView {
            block: Arc::clone(&self.block),
            end,
        }
    }

    pub(crate) fn read(&self, range: Range<usize>) -> &[u8] {
        // SAFETY: 写入需要 `&mut self`，借用期间所有者不会写；视图从不写入。
        unsafe { self.block.bytes(range) }
    }

    /// 返回 `[from, SIZE)` 的可写切片。
    pub(crate) fn tail_mut(&mut self, from: usize) -> &mut [u8] {
        if Arc::get_mut(&mut self.block).is_some() {
            self.frozen = 0;
        }
        assert!(
            from >= self.frozen && from <= SIZE,
            "write at {from} overlaps shared bytes below {}",
            self.frozen
        );
        // SAFETY: 视图只读 `frozen` 之前的字节，`[from, SIZE)` 仅此句柄可达，
        // 且 `&mut self` 阻止在返回切片存活期间创建新视图。
        unsafe { slice::from_raw_parts_mut(self.block.base().add(from), SIZE - from) }
    }

    /// 将 `src` 写入 `offset` 处。`src` 若来自同一块，必然位于已冻结区间内，与目标区间不重叠。
    pub(crate) fn write_at(&mut self, offset: usize, src: &[u8]) {
        let tail = self.tail_mut(offset);
        tail[..src.len()].copy_from_slice(src);
    }

    /// 将 `range` 内字节左移到下标 0；块仍有别名时拒绝并返回 `false`。
    pub(crate) fn shift_to_front(&mut self, range: Range<usize>) -> bool {
        match Arc::get_mut(&mut self.block) {
            Some(block) => {
                self.frozen = 0;
                block.as_mut_slice().copy_within(range, 0);
                true
            }
            None => false,
        }
    }

    pub(crate) fn block(&self) -> &Arc<Block> {
        &self.block
    }

    /// 块当前是否没有任何视图别名。
    pub(crate) fn is_unique(&self) -> bool {
        Arc::strong_count(&self.block) == 1
    }
}

/// 块的只读别名。
pub(crate) struct SharedView {
    block: Arc<Block>,
    end: usize,
}

impl SharedView {
    pub(crate) fn share(&self, end: usize) -> SharedView {
        assert!(end <= self.end);
        SharedView {
            block: Arc::clone(&self.block),
            end,
        }
    }

    pub(crate) fn read(&self, range: Range<usize>) -> &[u8] {
        assert!(
            range.end <= self.end,
            "view read up to {} beyond its bound {}",
            range.end,
            self.end
        );
        // SAFETY: 所有者只在 `frozen >= end` 之后写入，左移需要块无别名。
        unsafe { self.block.bytes(range) }
    }

    pub(crate) fn block(&self) -> &Arc<Block> {
        &self.block
    }
}
