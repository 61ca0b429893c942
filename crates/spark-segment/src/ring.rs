//! 缓冲环：段落在缓冲内部的循环双向链表角色。
//!
//! # 模块定位（Why）
//! - 缓冲以环的形式串联段落，头部为最早写入的数据，`prev(head)` 即尾部；
//! - 链接字段 `prev`/`next` 存放在环自己的槽位中，与池的单向链表互不复用，
//!   段落离开环时不会留下悬挂链接。
//!
//! # 实现策略（How）
//! - 槽位数组 + 空闲槽位栈，标识 [`SegmentId`] 携带代数（generation），
//!   弹出后旧标识立即失效，不会误指向复用后的槽位；
//! - 单个段落自成一环：`prev == next == self`。
//!
//! # 契约说明（What）
//! - 环不做内部同步，`&mut self` 即保证同一时刻只有一个修改者；
//! - 所有接收 [`SegmentId`] 的操作对失效标识返回 [`SegmentError::UnknownSegment`]。

use crate::error::{Result, SegmentError};
use crate::pool::SegmentPool;
use crate::segment::Segment;

/// 环内段落的标识。
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct SegmentId {
    index: u32,
    generation: u32,
}

struct RingNode {
    segment: Segment,
    prev: u32,
    next: u32,
}

struct Slot {
    generation: u32,
    node: Option<RingNode>,
}

/// 一个缓冲拥有的段落环。
#[derive(Default)]
pub struct SegmentRing {
    slots: Vec<Slot>,
    vacant: Vec<u32>,
    head: Option<u32>,
    len: usize,
}

impl SegmentRing {
    /// 创建空环。
    pub fn new() -> Self {
        Self::default()
    }

    /// 环中段落数量。
    pub fn len(&self) -> usize {
        self.len
    }

    /// 环是否为空。
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// 环头。
    pub fn head(&self) -> Option<SegmentId> {
        self.head.map(|index| self.id_of(index))
    }

    /// 环尾，即 `prev(head)`。
    pub fn tail(&self) -> Option<SegmentId> {
        let head = self.head?;
        Some(self.id_of(self.node(head).prev))
    }

    /// 后继段落；单段落环返回自身。
    pub fn next(&self, id: SegmentId) -> Result<SegmentId> {
        let index = self.resolve(id)?;
        Ok(self.id_of(self.node(index).next))
    }

    /// 前驱段落；单段落环返回自身。
    pub fn prev(&self, id: SegmentId) -> Result<SegmentId> {
        let index = self.resolve(id)?;
        Ok(self.id_of(self.node(index).prev))
    }

    /// 读取段落。
    pub fn get(&self, id: SegmentId) -> Option<&Segment> {
        let index = self.resolve(id).ok()?;
        Some(&self.node(index).segment)
    }

    /// 可变访问段落。
    pub fn get_mut(&mut self, id: SegmentId) -> Option<&mut Segment> {
        let index = self.resolve(id).ok()?;
        Some(&mut self.node_mut(index).segment)
    }

    /// 所有段落的可读字节总数。
    pub fn readable_len(&self) -> usize {
        self.iter().map(|(_, segment)| segment.len()).sum()
    }

    /// 从环头开始按环序遍历。
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            ring: self,
            cursor: self.head,
            remaining: self.len,
        }
    }

    /// 把段落追加为环尾；空环时成为自链接的环头。
    pub fn push_back(&mut self, segment: Segment) -> SegmentId {
        match self.tail() {
            Some(tail) => self.link_after(tail.index, segment),
            None => {
                let index = self.occupy(segment);
                {
                    let node = self.node_mut(index);
                    node.prev = index;
                    node.next = index;
                }
                self.head = Some(index);
                self.id_of(index)
            }
        }
    }

    /// 在 `after` 之后插入段落并返回其标识。
    pub fn push(&mut self, after: SegmentId, segment: Segment) -> Result<SegmentId> {
        let after = self.resolve(after)?;
        Ok(self.link_after(after, segment))
    }

    /// 将段落从环中摘下。
    ///
    /// 返回脱链后的段落以及原后继；若它是环中唯一成员则后继为 `None`。
    /// 摘下环头时，环头移动到后继。
    pub fn pop(&mut self, id: SegmentId) -> Result<(Segment, Option<SegmentId>)> {
        let index = self.resolve(id)?;
        let (prev, next) = {
            let node = self.node(index);
            (node.prev, node.next)
        };
        let successor = if next == index {
            None
        } else {
            self.node_mut(prev).next = next;
            self.node_mut(next).prev = prev;
            Some(next)
        };
        if self.head == Some(index) {
            self.head = successor;
        }
        let segment = self.vacate(index);
        Ok((segment, successor.map(|next| self.id_of(next))))
    }

    /// 把 `id` 的前 `byte_count` 个可读字节拆为独立段落，插在 `id` 之前，返回前缀标识。
    ///
    /// # 契约说明（What）
    /// - 参数约束同 [`Segment::split_prefix`]；
    /// - 前缀与原段落共享底层块，数据顺序保持为“前缀在前、剩余在后”；
    /// - 若 `id` 是环头，前缀成为新环头。
    pub fn split(&mut self, id: SegmentId, byte_count: usize) -> Result<SegmentId> {
        let index = self.resolve(id)?;
        let prefix = self.node_mut(index).segment.split_prefix(byte_count)?;
        let prev = self.node(index).prev;
        let prefix_index = self.link_after(prev, prefix).index;
        if self.head == Some(index) {
            self.head = Some(prefix_index);
        }
        Ok(self.id_of(prefix_index))
    }

    /// 尝试把 `id` 的数据并入其前驱，成功后将 `id` 摘下并交还 `pool`。
    ///
    /// # 教案式说明
    /// - **前置条件**：`id` 不是环中唯一成员，否则返回 [`SegmentError::CompactSoleSegment`]；
    /// - **逻辑 (How)**：前驱不是所有者、或其 [`compact_capacity`](Segment::compact_capacity)
    ///   容不下 `id` 的可读字节时，不做任何事并返回 `false`；否则搬运字节、摘下段落并回收；
    /// - **后置条件**：返回 `true` 时环长度减一，`id` 失效。
    pub fn compact(&mut self, id: SegmentId, pool: &SegmentPool) -> Result<bool> {
        let index = self.resolve(id)?;
        let prev = self.node(index).prev;
        if prev == index {
            return Err(SegmentError::CompactSoleSegment);
        }
        {
            let predecessor = &self.node(prev).segment;
            if !predecessor.is_owner() {
                return Ok(false);
            }
            let byte_count = self.node(index).segment.len();
            if byte_count > predecessor.compact_capacity() {
                return Ok(false);
            }
        }

        let (source, sink) = self.pair_mut(index, prev);
        let byte_count = source.len();
        source.write_to(sink, byte_count)?;
        let (segment, _) = self.pop(id)?;
        tracing::trace!(byte_count, "compacted segment into predecessor");
        let _ = pool.recycle(segment);
        Ok(true)
    }

    /// 摘下全部段落并逐个交还 `pool`；共享段落被池拒绝后直接释放。
    pub fn clear(&mut self, pool: &SegmentPool) {
        while let Some(head) = self.head() {
            if let Ok((segment, _)) = self.pop(head) {
                let _ = pool.recycle(segment);
            }
        }
    }

    fn link_after(&mut self, after: u32, segment: Segment) -> SegmentId {
        let index = self.occupy(segment);
        let next = self.node(after).next;
        {
            let node = self.node_mut(index);
            node.prev = after;
            node.next = next;
        }
        self.node_mut(next).prev = index;
        self.node_mut(after).next = index;
        self.id_of(index)
    }

    fn occupy(&mut self, segment: Segment) -> u32 {
        let node = RingNode {
            segment,
            prev: 0,
            next: 0,
        };
        self.len += 1;
        match self.vacant.pop() {
            Some(index) => {
                self.slots[index as usize].node = Some(node);
                index
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    node: Some(node),
                });
                index
            }
        }
    }

    fn vacate(&mut self, index: u32) -> Segment {
        let slot = &mut self.slots[index as usize];
        slot.generation = slot.generation.wrapping_add(1);
        let node = slot.node.take().expect("vacated slot must be occupied");
        self.vacant.push(index);
        self.len -= 1;
        node.segment
    }

    fn resolve(&self, id: SegmentId) -> Result<u32> {
        match self.slots.get(id.index as usize) {
            Some(slot) if slot.generation == id.generation && slot.node.is_some() => Ok(id.index),
            _ => Err(SegmentError::UnknownSegment),
        }
    }

    fn id_of(&self, index: u32) -> SegmentId {
        SegmentId {
            index,
            generation: self.slots[index as usize].generation,
        }
    }

    fn node(&self, index: u32) -> &RingNode {
        self.slots[index as usize]
            .node
            .as_ref()
            .expect("ring links only reference occupied slots")
    }

    fn node_mut(&mut self, index: u32) -> &mut RingNode {
        self.slots[index as usize]
            .node
            .as_mut()
            .expect("ring links only reference occupied slots")
    }

    /// 同时可变借用两个不同槽位的段落。
    fn pair_mut(&mut self, first: u32, second: u32) -> (&mut Segment, &mut Segment) {
        debug_assert_ne!(first, second);
        let (first, second) = (first as usize, second as usize);
        let (low, high) = (first.min(second), first.max(second));
        let (head, tail) = self.slots.split_at_mut(high);
        let low_node = head[low].node.as_mut().expect("occupied");
        let high_node = tail[0].node.as_mut().expect("occupied");
        if first < second {
            (&mut low_node.segment, &mut high_node.segment)
        } else {
            (&mut high_node.segment, &mut low_node.segment)
        }
    }
}

/// [`SegmentRing::iter`] 的迭代器。
pub struct Iter<'a> {
    ring: &'a SegmentRing,
    cursor: Option<u32>,
    remaining: usize,
}

impl<'a> Iterator for Iter<'a> {
    type Item = (SegmentId, &'a Segment);

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let index = self.cursor?;
        let node = self.ring.node(index);
        self.remaining -= 1;
        self.cursor = Some(node.next);
        Some((self.ring.id_of(index), &node.segment))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl core::fmt::Debug for SegmentRing {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_list()
            .entries(self.iter().map(|(_, segment)| segment))
            .finish()
    }
}

#[cfg(all(test, not(any(loom, spark_loom))))]
mod tests {
    use super::*;

    fn segment_with(bytes: &[u8]) -> Segment {
        let mut segment = Segment::new();
        segment.write(bytes).expect("写入");
        segment
    }

    fn ring_bytes(ring: &SegmentRing) -> Vec<u8> {
        ring.iter()
            .flat_map(|(_, segment)| segment.readable().to_vec())
            .collect()
    }

    #[test]
    fn lone_segment_links_to_itself() {
        let mut ring = SegmentRing::new();
        let id = ring.push_back(segment_with(b"a"));
        assert_eq!(ring.next(id), Ok(id));
        assert_eq!(ring.prev(id), Ok(id));
        assert_eq!(ring.head(), Some(id));
        assert_eq!(ring.tail(), Some(id));
    }

    #[test]
    fn pop_returns_successor_and_invalidates_id() {
        let mut ring = SegmentRing::new();
        let a = ring.push_back(segment_with(b"a"));
        let b = ring.push_back(segment_with(b"b"));
        let (segment, successor) = ring.pop(a).expect("弹出");
        assert_eq!(segment.readable(), b"a");
        assert_eq!(successor, Some(b));
        assert_eq!(ring.head(), Some(b));
        assert_eq!(ring.next(b), Ok(b));
        assert_eq!(ring.pop(a).unwrap_err(), SegmentError::UnknownSegment);

        let (_, successor) = ring.pop(b).expect("弹出最后一个");
        assert_eq!(successor, None);
        assert!(ring.is_empty());
        assert_eq!(ring.head(), None);
    }

    #[test]
    fn reused_slot_does_not_revive_stale_id() {
        let mut ring = SegmentRing::new();
        let a = ring.push_back(segment_with(b"a"));
        ring.pop(a).expect("弹出");
        let b = ring.push_back(segment_with(b"b"));
        assert_ne!(a, b);
        assert!(ring.get(a).is_none());
        assert_eq!(ring.get(b).map(Segment::readable), Some(&b"b"[..]));
    }

    #[test]
    fn push_inserts_after_anchor() {
        let mut ring = SegmentRing::new();
        let a = ring.push_back(segment_with(b"a"));
        ring.push_back(segment_with(b"c"));
        let b = ring.push(a, segment_with(b"b")).expect("插入");
        assert_eq!(ring.next(a), Ok(b));
        assert_eq!(ring_bytes(&ring), b"abc");
    }

    #[test]
    fn split_of_head_moves_head_to_prefix() {
        let mut ring = SegmentRing::new();
        let original = ring.push_back(segment_with(b"hello world"));
        let prefix = ring.split(original, 5).expect("拆分");
        assert_eq!(ring.head(), Some(prefix));
        assert_eq!(ring.next(prefix), Ok(original));
        assert_eq!(ring_bytes(&ring), b"hello world");
    }

    #[test]
    fn compact_on_sole_segment_is_a_state_fault() {
        let pool = SegmentPool::new();
        let mut ring = SegmentRing::new();
        let id = ring.push_back(segment_with(b"x"));
        assert_eq!(
            ring.compact(id, &pool),
            Err(SegmentError::CompactSoleSegment)
        );
    }

    #[test]
    fn compact_skips_view_predecessor() {
        let pool = SegmentPool::new();
        let mut ring = SegmentRing::new();
        let original = ring.push_back(segment_with(b"abcdef"));
        ring.split(original, 3).expect("拆分");
        assert_eq!(ring.compact(original, &pool), Ok(false));
        assert_eq!(ring.len(), 2);
        assert_eq!(pool.pooled_segments(), 0);
    }

    #[test]
    fn clear_recycles_unshared_segments() {
        let pool = SegmentPool::new();
        let mut ring = SegmentRing::new();
        let first = ring.push_back(segment_with(b"0123456789"));
        ring.push_back(segment_with(b"tail"));
        ring.split(first, 4).expect("拆分");
        ring.clear(&pool);
        assert!(ring.is_empty());
        assert_eq!(pool.pooled_segments(), 1, "只有未共享的尾段可以入池");
    }
}
