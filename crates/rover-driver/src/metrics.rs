//! 流水线性能指标模块
//!
//! 提供零开销的原子计数器，用于监控各个环节的健康状态。
//! 所有计数器都使用原子操作，可以在任何线程安全地读取，不会引入锁竞争。

use std::sync::atomic::{AtomicU64, Ordering};

/// 流水线实时指标
///
/// # 使用示例
///
/// ```rust
/// use rover_driver::RoverMetrics;
/// use std::sync::Arc;
/// use std::sync::atomic::Ordering;
///
/// let metrics = Arc::new(RoverMetrics::default());
///
/// // 在控制线程中更新指标
/// metrics.frames_decoded.fetch_add(1, Ordering::Relaxed);
///
/// // 在主线程中读取快照
/// let snapshot = metrics.snapshot();
/// assert_eq!(snapshot.frames_decoded, 1);
/// ```
#[derive(Debug, Default)]
pub struct RoverMetrics {
    /// 成功解码的帧数
    pub frames_decoded: AtomicU64,

    /// 因元数据非法被丢弃的帧数
    pub frames_rejected: AtomicU64,

    /// 分帧缓冲区溢出次数（未等到结束字节）
    pub framing_overflows: AtomicU64,

    /// 每帧之后丢弃的积压字节总数
    pub bytes_discarded: AtomicU64,

    /// 成功进入持久化队列的记录数
    pub records_enqueued: AtomicU64,

    /// 写入线程已写出的记录数
    pub records_written: AtomicU64,

    /// 写入线程遇到的存储错误次数
    pub storage_errors: AtomicU64,

    /// 环形缓冲区成功追加的帧数
    pub ring_appends: AtomicU64,

    /// 因锁竞争跳过的追加/请求次数
    pub ring_contention: AtomicU64,

    /// 发出的推理请求数
    pub inference_requests: AtomicU64,

    /// 成功完成的推理次数
    pub inference_runs: AtomicU64,

    /// 推理调用失败次数
    pub inference_failures: AtomicU64,

    /// 模式切换次数
    pub mode_transitions: AtomicU64,
}

impl RoverMetrics {
    /// 创建新的指标实例（所有计数器初始化为 0）
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取指标快照
    ///
    /// 使用 `Ordering::Relaxed`，不同计数器之间可能有微小的时间差。
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            frames_decoded: self.frames_decoded.load(Ordering::Relaxed),
            frames_rejected: self.frames_rejected.load(Ordering::Relaxed),
            framing_overflows: self.framing_overflows.load(Ordering::Relaxed),
            bytes_discarded: self.bytes_discarded.load(Ordering::Relaxed),
            records_enqueued: self.records_enqueued.load(Ordering::Relaxed),
            records_written: self.records_written.load(Ordering::Relaxed),
            storage_errors: self.storage_errors.load(Ordering::Relaxed),
            ring_appends: self.ring_appends.load(Ordering::Relaxed),
            ring_contention: self.ring_contention.load(Ordering::Relaxed),
            inference_requests: self.inference_requests.load(Ordering::Relaxed),
            inference_runs: self.inference_runs.load(Ordering::Relaxed),
            inference_failures: self.inference_failures.load(Ordering::Relaxed),
            mode_transitions: self.mode_transitions.load(Ordering::Relaxed),
        }
    }
}

/// 指标快照（普通数值，便于打印和比较）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub frames_decoded: u64,
    pub frames_rejected: u64,
    pub framing_overflows: u64,
    pub bytes_discarded: u64,
    pub records_enqueued: u64,
    pub records_written: u64,
    pub storage_errors: u64,
    pub ring_appends: u64,
    pub ring_contention: u64,
    pub inference_requests: u64,
    pub inference_runs: u64,
    pub inference_failures: u64,
    pub mode_transitions: u64,
}
