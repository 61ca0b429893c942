//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 集中定义段落层对外暴露的故障语义：所有变体都代表调用方（缓冲层）违反了契约，
//!   不存在可重试的部分失败状态；
//! - 为日志与告警提供稳定错误码（`spark.segment.*`），与传输层的 `<域>.<语义>` 命名保持一致。
//!
//! ## 设计要求（What）
//! - 每个变体携带触发故障时的具体数值，便于排障；
//! - [`SegmentError::kind`] 将变体归入两类：参数非法与状态非法；
//! - “池已满”“段落已共享”等回收拒绝属于正常控制流，不在本模块建模，
//!   见 [`Recycle`](crate::Recycle)。

use thiserror::Error;

/// 段落层结果别名。
pub type Result<T, E = SegmentError> = core::result::Result<T, E>;

/// 故障大类。
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum FaultKind {
    /// 调用参数不满足前置条件。
    InvalidArgument,
    /// 对象当前状态不允许该操作。
    InvalidState,
}

/// 段落、环与池操作的契约违例。
///
/// # 教案式说明
/// - **意图 (Why)**：缓冲层在拆分、压缩、搬运字节时若传入越界参数，应得到可观测的错误而不是
///   损坏共享数据；错误以 `Result` 返回，由上层决定是否视为编程错误直接终止。
/// - **契约 (What)**：
///   - 所有变体均为 `Copy`，可跨线程移动；
///   - [`code`](Self::code) 返回的字符串稳定，可作为指标标签；
///   - 同一条件只会映射到唯一变体。
#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
pub enum SegmentError {
    /// `split` 的字节数为 0 或超过可读字节。
    #[error("split byte count {requested} is outside 1..={available}")]
    SplitOutOfRange { requested: usize, available: usize },

    /// 对环中唯一的段落调用 `compact`。
    #[error("cannot compact a segment that is alone in its ring")]
    CompactSoleSegment,

    /// `write_to` 的目标段落不持有底层块的写权限。
    #[error("sink segment does not own its block")]
    SinkNotOwner,

    /// 目标段落尾部空间不足且已被共享，禁止整体左移。
    #[error("sink segment is shared; cannot shift {unread} unread bytes to make room for {requested}")]
    SharedSinkShift { requested: usize, unread: usize },

    /// 左移后仍无法容纳请求的字节数。
    #[error("{requested} bytes do not fit in sink holding {unread} unread bytes")]
    SinkOverflow { requested: usize, unread: usize },

    /// 源段落可读字节少于请求数量。
    #[error("requested {requested} bytes but only {available} are readable")]
    InsufficientData { requested: usize, available: usize },

    /// 通过只读视图尝试写入。
    #[error("segment is a shared view and cannot be written")]
    NotOwner,

    /// 游标推进越过允许的上界。
    #[error("cursor advance of {requested} exceeds the {available} bytes available")]
    CursorOutOfRange { requested: usize, available: usize },

    /// 环中不存在该标识（段落已被弹出）。
    #[error("segment id does not refer to a live ring member")]
    UnknownSegment,
}

impl SegmentError {
    /// 返回故障大类。
    pub fn kind(&self) -> FaultKind {
        match self {
            SegmentError::CompactSoleSegment => FaultKind::InvalidState,
            _ => FaultKind::InvalidArgument,
        }
    }

    /// 返回稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            SegmentError::SplitOutOfRange { .. } => "spark.segment.split_out_of_range",
            SegmentError::CompactSoleSegment => "spark.segment.compact_sole_segment",
            SegmentError::SinkNotOwner => "spark.segment.sink_not_owner",
            SegmentError::SharedSinkShift { .. } => "spark.segment.shared_sink_shift",
            SegmentError::SinkOverflow { .. } => "spark.segment.sink_overflow",
            SegmentError::InsufficientData { .. } => "spark.segment.insufficient_data",
            SegmentError::NotOwner => "spark.segment.not_owner",
            SegmentError::CursorOutOfRange { .. } => "spark.segment.cursor_out_of_range",
            SegmentError::UnknownSegment => "spark.segment.unknown_segment",
        }
    }
}
