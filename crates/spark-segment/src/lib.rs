//! `spark-segment` 提供字节缓冲底层的定长段落与有界复用池。
//!
//! # 模块定位（Why）
//! - 缓冲把数据存放在一串 8 KiB 段落组成的环里；段落可以被拆分后在两个环位置共享同一底层块，
//!   也可以被压缩合并以释放多余段落；
//! - 闲置段落回到线程安全的有界池中，避免反复分配与清零。
//!
//! # 设计概要（How）
//! - [`Segment`]：带 `pos`/`limit` 游标的段落；写权限只存在于所有者句柄上，
//!   共享视图在类型上不可写；
//! - [`SegmentRing`]：段落在缓冲内的循环双向链表角色，提供 `push`/`pop`/`split`/`compact`；
//! - [`SegmentPool`]：段落在池内的 LIFO 栈角色，提供 `take`/`recycle`，
//!   可显式构造，也可通过 [`SegmentPool::global`] 取得进程级实例；
//! - 契约违例以 [`SegmentError`] 返回；池拒绝回收属于正常控制流，见 [`Recycle`]。
//!
//! # 命名约定（Consistency）
//! - `SIZE`、`MAX_SIZE` 分别是段落容量与默认池容量；
//! - 段落层不解释字节内容，也不执行 I/O。
//!
//! ```
//! use spark_segment::{SegmentPool, SegmentRing};
//!
//! let pool = SegmentPool::new();
//! let mut ring = SegmentRing::new();
//!
//! let mut segment = pool.take();
//! segment.write(b"hello world").unwrap();
//! let id = ring.push_back(segment);
//!
//! let prefix = ring.split(id, 5).unwrap();
//! assert_eq!(ring.get(prefix).unwrap().readable(), b"hello");
//! assert_eq!(ring.get(id).unwrap().readable(), b" world");
//!
//! ring.clear(&pool);
//! ```

mod block;
mod error;
mod pool;
mod ring;
mod segment;
mod sync;

pub use block::SIZE;
pub use error::{FaultKind, Result, SegmentError};
pub use pool::{
    DeclineReason, MAX_SIZE, Recycle, SegmentPool, SegmentPoolConfig, SegmentPoolStats,
};
pub use ring::{Iter, SegmentId, SegmentRing};
pub use segment::Segment;
