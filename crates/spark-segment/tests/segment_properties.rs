#![cfg(not(any(loom, spark_loom)))]

//! 段落环与段落池的性质测试。
//!
//! # 教案级注释概览
//!
//! - **核心目标 (Why)**：对“缓冲层”常见的操作序列（追加、消费、拆分、尾部压缩）进行随机驱动，
//!   验证任意序列下段落游标、共享标志与池计数的不变量始终成立，并且环中字节流与影子模型一致。
//! - **设计手法 (How)**：以 `Vec<u8>` 作为影子模型记录逻辑字节流；`RingDriver` 按缓冲层的惯用方式
//!   组合 `take`/`write`/`split`/`compact`/`pop`/`recycle`，每一步之后做整体校验。
//! - **合同与边界 (What)**：
//!   - 每个段落满足 `pos <= limit <= SIZE`，非所有者必然 `shared`；
//!   - 一旦观测到 `shared == true`，同一段落此后不会变回 `false`；
//!   - 池计数满足 `pooled_bytes == pooled_segments * SIZE <= max_bytes`。
//! - **设计考量 (Trade-offs)**：压缩只作用于环尾（与缓冲层的写入路径一致），对环头压缩会把数据挪到环尾，
//!   不属于缓冲层的合法用法。

use std::collections::HashSet;

use proptest::prelude::*;
use spark_segment::{SIZE, SegmentId, SegmentPool, SegmentPoolConfig, SegmentRing};

#[derive(Clone, Debug)]
enum Op {
    Append(Vec<u8>),
    Consume(usize),
    Split { slot: usize, byte_count: usize },
    CompactTail,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => prop::collection::vec(any::<u8>(), 0..3000).prop_map(Op::Append),
        2 => (0usize..12_000).prop_map(Op::Consume),
        2 => (any::<usize>(), 1usize..4000)
            .prop_map(|(slot, byte_count)| Op::Split { slot, byte_count }),
        1 => Just(Op::CompactTail),
    ]
}

/// 以缓冲层的方式驱动环，并维护影子字节流。
struct RingDriver {
    pool: SegmentPool,
    ring: SegmentRing,
    shadow: Vec<u8>,
    shared_seen: HashSet<SegmentId>,
}

impl RingDriver {
    fn new(max_bytes: usize) -> Self {
        Self {
            pool: SegmentPool::with_config(SegmentPoolConfig::new().with_max_bytes(max_bytes)),
            ring: SegmentRing::new(),
            shadow: Vec::new(),
            shared_seen: HashSet::new(),
        }
    }

    fn apply(&mut self, op: &Op) -> Result<(), TestCaseError> {
        match op {
            Op::Append(bytes) => self.append(bytes),
            Op::Consume(byte_count) => self.consume(*byte_count),
            Op::Split { slot, byte_count } => self.split(*slot, *byte_count),
            Op::CompactTail => self.compact_tail(),
        }
    }

    fn append(&mut self, mut bytes: &[u8]) -> Result<(), TestCaseError> {
        self.shadow.extend_from_slice(bytes);
        while !bytes.is_empty() {
            let tail = self
                .ring
                .tail()
                .filter(|id| self.ring.get(*id).is_some_and(|s| s.writable_len() > 0));
            let tail = match tail {
                Some(id) => id,
                None => {
                    let fresh = self.pool.take();
                    prop_assert!(fresh.is_owner() && !fresh.is_shared());
                    prop_assert_eq!((fresh.pos(), fresh.limit()), (0, 0));
                    self.ring.push_back(fresh)
                }
            };
            let segment = self.ring.get_mut(tail).expect("tail exists");
            let written = segment.write(bytes).expect("tail is an owner");
            prop_assert!(written > 0);
            bytes = &bytes[written..];
        }
        Ok(())
    }

    fn consume(&mut self, byte_count: usize) -> Result<(), TestCaseError> {
        let mut remaining = byte_count.min(self.shadow.len());
        self.shadow.drain(..remaining);
        while let Some(head) = self.ring.head() {
            let segment = self.ring.get_mut(head).expect("head exists");
            let step = remaining.min(segment.len());
            segment.consume(step).expect("step is within readable bytes");
            remaining -= step;
            if !segment.is_empty() {
                break;
            }
            let (segment, _) = self.ring.pop(head).expect("head is linked");
            self.shared_seen.remove(&head);
            let _ = self.pool.recycle(segment);
        }
        prop_assert_eq!(remaining, 0);
        Ok(())
    }

    fn split(&mut self, slot: usize, byte_count: usize) -> Result<(), TestCaseError> {
        if self.ring.is_empty() {
            return Ok(());
        }
        let (id, len) = self
            .ring
            .iter()
            .nth(slot % self.ring.len())
            .map(|(id, segment)| (id, segment.len()))
            .expect("slot within ring");
        match self.ring.split(id, byte_count) {
            Ok(prefix) => {
                prop_assert!(byte_count <= len);
                prop_assert_eq!(self.ring.next(prefix), Ok(id));
                prop_assert_eq!(self.ring.get(prefix).map(|s| s.len()), Some(byte_count));
            }
            Err(_) => prop_assert!(byte_count > len),
        }
        Ok(())
    }

    fn compact_tail(&mut self) -> Result<(), TestCaseError> {
        let Some(tail) = self.ring.tail() else {
            return Ok(());
        };
        let before = self.ring.len();
        match self.ring.compact(tail, &self.pool) {
            Ok(true) => {
                prop_assert_eq!(self.ring.len(), before - 1);
                self.shared_seen.remove(&tail);
            }
            Ok(false) => prop_assert_eq!(self.ring.len(), before),
            Err(_) => prop_assert_eq!(before, 1),
        }
        Ok(())
    }

    fn check(&mut self) -> Result<(), TestCaseError> {
        let mut bytes = Vec::with_capacity(self.shadow.len());
        for (id, segment) in self.ring.iter() {
            prop_assert!(segment.pos() <= segment.limit());
            prop_assert!(segment.limit() <= SIZE);
            if !segment.is_owner() {
                prop_assert!(segment.is_shared());
            }
            if self.shared_seen.contains(&id) {
                prop_assert!(segment.is_shared(), "shared 标志不可复位");
            }
            if segment.is_shared() {
                self.shared_seen.insert(id);
            }
            bytes.extend_from_slice(segment.readable());
        }
        prop_assert_eq!(&bytes, &self.shadow);

        let stats = self.pool.stats();
        prop_assert_eq!(stats.pooled_bytes, stats.pooled_segments * SIZE);
        prop_assert!(stats.pooled_bytes <= self.pool.max_bytes());
        Ok(())
    }
}

proptest! {
    #[test]
    fn prop_ring_matches_shadow_stream(ops in prop::collection::vec(op_strategy(), 1..64)) {
        let mut driver = RingDriver::new(spark_segment::MAX_SIZE);
        for op in &ops {
            driver.apply(op)?;
            driver.check()?;
        }
        driver.ring.clear(&driver.pool);
        prop_assert!(driver.ring.is_empty());
        prop_assert!(driver.pool.pooled_bytes() <= spark_segment::MAX_SIZE);
    }

    #[test]
    fn prop_small_pool_never_exceeds_its_bound(
        ops in prop::collection::vec(op_strategy(), 1..48),
        max_segments in 0usize..4,
    ) {
        let mut driver = RingDriver::new(max_segments * SIZE);
        for op in &ops {
            driver.apply(op)?;
            driver.check()?;
        }
        driver.ring.clear(&driver.pool);
        prop_assert!(driver.pool.pooled_segments() <= max_segments);
    }

    #[test]
    fn prop_write_to_preserves_byte_order(
        sink_bytes in prop::collection::vec(any::<u8>(), 0..SIZE),
        source_bytes in prop::collection::vec(any::<u8>(), 1..SIZE),
        consumed in 0usize..SIZE,
        moved in 1usize..SIZE,
    ) {
        let mut sink = spark_segment::Segment::new();
        sink.write(&sink_bytes).expect("owner");
        let consumed = consumed.min(sink.len());
        sink.consume(consumed).expect("within readable");
        let mut source = spark_segment::Segment::new();
        source.write(&source_bytes).expect("owner");
        let moved = moved.min(source.len());

        let expected: Vec<u8> = sink
            .readable()
            .iter()
            .chain(&source.readable()[..moved])
            .copied()
            .collect();
        let fits = sink.len() + moved <= SIZE;
        match source.write_to(&mut sink, moved) {
            Ok(()) => {
                prop_assert!(fits);
                prop_assert_eq!(sink.readable(), &expected[..]);
                prop_assert_eq!(source.pos(), moved);
            }
            Err(_) => {
                prop_assert!(!fits);
                prop_assert_eq!(source.pos(), 0);
            }
        }
    }
}
