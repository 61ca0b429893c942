use core::fmt;
use core::ops::Range;
use std::sync::Arc;

use crate::block::{Block, OwnerBlock, SIZE, SharedView};
use crate::error::{Result, SegmentError};

/// 段落对底层块的访问方式：所有者可写，视图只读。
enum Handle {
    Owner(OwnerBlock),
    View(SharedView),
}

/// `Segment` 是缓冲环中的一个定长字节块节点。
///
/// # 设计动机（Why）
/// - 缓冲在读写时以段落为单位链接成环，段落之间可以共享同一底层块，
///   从而在搬运部分数据（`split`）时避免复制；
/// - 写权限只挂在唯一的所有者句柄上，非所有者无法获得任何写入路径，
///   “视图不可写”由类型而非运行期标志保证。
///
/// # 结构说明（How）
/// - `pos`：下一个未读字节；`limit`：最后一个已写字节之后；
/// - `shared`：块一旦被第二个段落引用即置位，且永不复位；
/// - 所有者身份由内部句柄类型决定，见 [`is_owner`](Self::is_owner)。
///
/// # 契约说明（What）
/// - 始终满足 `0 <= pos <= limit <= SIZE`；
/// - 非所有者必然 `shared == true`；
/// - 段落值本身不携带任何链接，环与池各自维护自己的链接结构，
///   因此一个独立持有的 `Segment` 总是处于“已脱链”状态。
///
/// # 风险提示（Trade-offs）
/// - 从池中复用的段落不会清零：`limit` 之后可能残留上一位使用者的字节，
///   任何调用方都不得读取 `limit` 之后的内容。
pub struct Segment {
    handle: Handle,
    pos: usize,
    limit: usize,
    shared: bool,
}

impl Segment {
    /// 每个段落的容量。
    pub const SIZE: usize = SIZE;

    /// 分配一个全新的、零填充的所有者段落。
    pub fn new() -> Self {
        Self {
            handle: Handle::Owner(OwnerBlock::allocate()),
            pos: 0,
            limit: 0,
            shared: false,
        }
    }

    /// 创建一个与本段落共享底层块的只读视图，复制当前的 `pos`/`limit`。
    ///
    /// 调用后本段落的 `shared` 永久为 `true`。
    pub fn share(&mut self) -> Segment {
        let view = match &mut self.handle {
            Handle::Owner(owner) => owner.share(self.limit),
            Handle::View(view) => view.share(self.limit),
        };
        self.shared = true;
        Segment {
            handle: Handle::View(view),
            pos: self.pos,
            limit: self.limit,
            shared: true,
        }
    }

    /// 下一个未读字节的下标。
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// 最后一个已写字节之后的下标。
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// 可读字节数，即 `limit - pos`。
    pub fn len(&self) -> usize {
        self.limit - self.pos
    }

    /// 是否没有可读字节。
    pub fn is_empty(&self) -> bool {
        self.pos == self.limit
    }

    /// 底层块是否被多个段落引用过。
    pub fn is_shared(&self) -> bool {
        self.shared
    }

    /// 本段落是否持有底层块的写权限。
    pub fn is_owner(&self) -> bool {
        matches!(self.handle, Handle::Owner(_))
    }

    /// 所有者在 `limit` 之后还能追加的字节数；视图恒为 0。
    pub fn writable_len(&self) -> usize {
        if self.is_owner() { SIZE - self.limit } else { 0 }
    }

    /// 两个段落是否引用同一底层块。
    pub fn same_block(&self, other: &Segment) -> bool {
        Arc::ptr_eq(self.block(), other.block())
    }

    /// 可读区间 `[pos, limit)`。
    pub fn readable(&self) -> &[u8] {
        self.bytes(self.pos..self.limit)
    }

    /// 消费 `byte_count` 个可读字节。
    pub fn consume(&mut self, byte_count: usize) -> Result<()> {
        if byte_count > self.len() {
            return Err(SegmentError::CursorOutOfRange {
                requested: byte_count,
                available: self.len(),
            });
        }
        self.pos += byte_count;
        Ok(())
    }

    /// 返回 `[limit, SIZE)` 的可写区间，仅所有者可用。
    ///
    /// 复用段落的该区间可能残留旧数据；写入后需调用 [`commit`](Self::commit) 推进 `limit`。
    pub fn writable_mut(&mut self) -> Result<&mut [u8]> {
        match &mut self.handle {
            Handle::Owner(owner) => Ok(owner.tail_mut(self.limit)),
            Handle::View(_) => Err(SegmentError::NotOwner),
        }
    }

    /// 将 `limit` 推进 `byte_count`，声明这些字节已写入。
    pub fn commit(&mut self, byte_count: usize) -> Result<()> {
        if !self.is_owner() {
            return Err(SegmentError::NotOwner);
        }
        let available = SIZE - self.limit;
        if byte_count > available {
            return Err(SegmentError::CursorOutOfRange {
                requested: byte_count,
                available,
            });
        }
        self.limit += byte_count;
        Ok(())
    }

    /// 追加尽可能多的 `src` 字节，返回实际写入数。
    pub fn write(&mut self, src: &[u8]) -> Result<usize> {
        let written = {
            let tail = self.writable_mut()?;
            let n = tail.len().min(src.len());
            tail[..n].copy_from_slice(&src[..n]);
            n
        };
        self.limit += written;
        Ok(written)
    }

    /// 将可读数据拆成前缀与剩余两部分，返回覆盖前 `byte_count` 字节的共享视图。
    ///
    /// # 契约说明（What）
    /// - **前置条件**：`0 < byte_count <= len()`，否则返回 [`SegmentError::SplitOutOfRange`]；
    /// - **后置条件**：前缀为 `[pos, pos + byte_count)`，本段落只保留剩余部分，
    ///   两者引用同一底层块，本段落 `shared == true`；所有者身份不变。
    ///
    /// 将前缀插回环中的工作由 [`SegmentRing::split`](crate::SegmentRing::split) 完成。
    pub fn split_prefix(&mut self, byte_count: usize) -> Result<Segment> {
        let available = self.len();
        if byte_count == 0 || byte_count > available {
            return Err(SegmentError::SplitOutOfRange {
                requested: byte_count,
                available,
            });
        }
        let mut prefix = self.share();
        prefix.limit = prefix.pos + byte_count;
        self.pos += byte_count;
        Ok(prefix)
    }

    /// 将本段落的 `byte_count` 个未读字节按序搬运到 `sink` 的可写区间。
    ///
    /// # 教案式说明
    /// - **前置条件**：`sink` 必须是所有者（[`SegmentError::SinkNotOwner`]）；
    ///   本段落至少有 `byte_count` 个可读字节（[`SegmentError::InsufficientData`]）。
    /// - **逻辑 (How)**：若 `sink.limit` 之后放不下，先把 `sink` 的未读字节左移到下标 0；
    ///   共享块不能左移（其他视图依赖字节位置），左移后仍放不下则拒绝。
    /// - **后置条件**：`self.pos` 与 `sink.limit` 各推进 `byte_count`。
    pub fn write_to(&mut self, sink: &mut Segment, byte_count: usize) -> Result<()> {
        let Handle::Owner(owner) = &mut sink.handle else {
            return Err(SegmentError::SinkNotOwner);
        };
        if byte_count > self.len() {
            return Err(SegmentError::InsufficientData {
                requested: byte_count,
                available: self.len(),
            });
        }
        if sink.limit + byte_count > SIZE {
            let unread = sink.limit - sink.pos;
            if sink.shared {
                return Err(SegmentError::SharedSinkShift {
                    requested: byte_count,
                    unread,
                });
            }
            if unread + byte_count > SIZE {
                return Err(SegmentError::SinkOverflow {
                    requested: byte_count,
                    unread,
                });
            }
            // 未共享的所有者从未产生过视图，块必然无别名。
            let shifted = owner.shift_to_front(sink.pos..sink.limit);
            debug_assert!(shifted, "unshared owner block must be unaliased");
            sink.limit = unread;
            sink.pos = 0;
        }

        let src = match &self.handle {
            Handle::Owner(source) => source.read(self.pos..self.pos + byte_count),
            Handle::View(source) => source.read(self.pos..self.pos + byte_count),
        };
        owner.write_at(sink.limit, src);
        sink.limit += byte_count;
        self.pos += byte_count;
        Ok(())
    }

    /// 作为环中后继时，前驱段落还能吸收的字节数：尾部空闲加上（未共享时）可左移回收的前部空间。
    pub fn compact_capacity(&self) -> usize {
        let reclaimable = if self.shared { 0 } else { self.pos };
        SIZE - self.limit + reclaimable
    }

    /// 池回收时重置游标。
    pub(crate) fn reset(&mut self) {
        self.pos = 0;
        self.limit = 0;
    }

    /// 是否为无别名的所有者，池只接收这类段落。
    pub(crate) fn is_exclusive(&self) -> bool {
        match &self.handle {
            Handle::Owner(owner) => !self.shared && owner.is_unique(),
            Handle::View(_) => false,
        }
    }

    fn bytes(&self, range: Range<usize>) -> &[u8] {
        match &self.handle {
            Handle::Owner(owner) => owner.read(range),
            Handle::View(view) => view.read(range),
        }
    }

    fn block(&self) -> &Arc<Block> {
        match &self.handle {
            Handle::Owner(owner) => owner.block(),
            Handle::View(view) => view.block(),
        }
    }
}

impl Default for Segment {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Segment")
            .field("pos", &self.pos)
            .field("limit", &self.limit)
            .field("shared", &self.shared)
            .field("owner", &self.is_owner())
            .finish()
    }
}
