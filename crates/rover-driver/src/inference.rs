//! 推理调度
//!
//! 控制线程（核心 A）追加帧并请求推理；推理线程（核心 B）在请求挂起时
//! 取走快照并调用推理引擎。两者之间只有一把短持有的互斥锁：
//!
//! - 生产者用 `try_lock_for` 有界等待，拿不到锁就跳过本帧（只计数，不阻塞）
//! - 快照在锁内**按值**复制，推理在锁外进行，生产者可继续覆盖环形缓冲区
//! - 窗口未攒满或已有请求挂起时，新的请求直接忽略（不重复推理同一窗口）

use crate::metrics::RoverMetrics;
use crate::ring::{ModelFrame, RingFrameBuffer};
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

/// 推理错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InferenceError {
    #[error("Invocation failed: {0}")]
    InvocationFailed(String),
    #[error("Input shape mismatch: expected {expected} frames, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },
}

/// 推理窗口快照（最旧的帧在前）
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// 请求序号，单调递增
    pub sequence: u64,
    pub frames: Vec<ModelFrame>,
}

/// 量化模型输出
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuantizedOutput {
    pub steering: i8,
    pub throttle: i8,
    pub scale: f32,
    pub zero_point: i32,
}

impl QuantizedOutput {
    /// 反量化：`(q - zero_point) * scale`
    pub fn dequantize(&self) -> (f32, f32) {
        let deq = |q: i8| (i32::from(q) - self.zero_point) as f32 * self.scale;
        (deq(self.steering), deq(self.throttle))
    }
}

/// 最近一次成功推理的结果
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct InferenceOutput {
    /// 对应快照的序号（0 表示尚无结果）
    pub sequence: u64,
    pub steering: f32,
    pub throttle: f32,
}

/// 推理引擎
///
/// 只在推理线程中调用。
pub trait InferenceEngine: Send {
    fn invoke(&mut self, snapshot: &Snapshot) -> Result<QuantizedOutput, InferenceError>;
}

impl<T: InferenceEngine + ?Sized> InferenceEngine for Box<T> {
    fn invoke(&mut self, snapshot: &Snapshot) -> Result<QuantizedOutput, InferenceError> {
        (**self).invoke(snapshot)
    }
}

/// 未配置模型时使用的引擎：每次调用都返回错误，输出保持不变
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledEngine;

impl InferenceEngine for DisabledEngine {
    fn invoke(&mut self, _snapshot: &Snapshot) -> Result<QuantizedOutput, InferenceError> {
        Err(InferenceError::InvocationFailed(
            "no model loaded".to_string(),
        ))
    }
}

#[derive(Debug)]
struct RingState {
    ring: RingFrameBuffer,
    /// 最近一次请求时复制的快照，推理线程取走后置空
    snapshot: Option<Snapshot>,
}

/// 推理调度器（两个核心之间共享）
#[derive(Debug)]
pub struct InferenceScheduler {
    state: Mutex<RingState>,
    pending: AtomicBool,
    sequence: AtomicU64,
    output: ArcSwap<InferenceOutput>,
    lock_wait: Duration,
}

impl InferenceScheduler {
    /// # 参数
    ///
    /// - `capacity`: 环形缓冲区容量（推理窗口帧数）
    /// - `lock_wait`: 生产者获取锁的最长等待时间
    pub fn new(capacity: usize, lock_wait: Duration) -> Self {
        Self {
            state: Mutex::new(RingState {
                ring: RingFrameBuffer::new(capacity),
                snapshot: None,
            }),
            pending: AtomicBool::new(false),
            sequence: AtomicU64::new(0),
            output: ArcSwap::from_pointee(InferenceOutput::default()),
            lock_wait,
        }
    }

    /// 追加一帧
    ///
    /// 返回 false 表示等锁超时，本帧被跳过。
    pub fn append(&self, frame: ModelFrame) -> bool {
        match self.state.try_lock_for(self.lock_wait) {
            Some(mut state) => {
                state.ring.push(frame);
                true
            },
            None => {
                trace!("Ring append skipped: lock contended");
                false
            },
        }
    }

    /// 请求一次推理
    ///
    /// 缓冲区未攒满一个完整窗口、已有请求挂起或等锁超时时返回 false。
    pub fn request(&self) -> bool {
        if self.pending.load(Ordering::Acquire) {
            return false;
        }
        let Some(mut state) = self.state.try_lock_for(self.lock_wait) else {
            trace!("Inference request skipped: lock contended");
            return false;
        };
        if !state.ring.is_full() {
            return false;
        }

        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        state.snapshot = Some(Snapshot {
            sequence,
            frames: state.ring.window(),
        });
        self.pending.store(true, Ordering::Release);
        true
    }

    /// 清空环形缓冲区和未取走的快照（进入/离开推理模式时调用）
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.ring.clear();
        state.snapshot = None;
        debug!("Inference ring reset");
    }

    /// 推理线程：取走挂起的快照
    ///
    /// 请求已挂起但快照已被 `reset()` 清除时，清除挂起标志并返回 None。
    pub fn take_snapshot(&self) -> Option<Snapshot> {
        if !self.pending.load(Ordering::Acquire) {
            return None;
        }
        let snapshot = self.state.lock().snapshot.take();
        if snapshot.is_none() {
            self.pending.store(false, Ordering::Release);
        }
        snapshot
    }

    /// 推理线程：完成一次推理
    ///
    /// `result` 为 None 表示推理失败，上一次的输出保持不变。
    pub fn complete(&self, result: Option<InferenceOutput>) {
        if let Some(output) = result {
            self.output.store(Arc::new(output));
        }
        self.pending.store(false, Ordering::Release);
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// 最近一次成功推理的输出
    pub fn latest(&self) -> Arc<InferenceOutput> {
        self.output.load_full()
    }

    /// 当前缓冲区帧数
    pub fn buffered(&self) -> usize {
        self.state.lock().ring.len()
    }
}

/// 推理线程主循环
///
/// 没有挂起请求时按 `idle` 间隔休眠。推理失败只记录日志，上一次输出保持不变。
pub fn inference_loop(
    mut engine: impl InferenceEngine,
    scheduler: Arc<InferenceScheduler>,
    is_running: Arc<AtomicBool>,
    metrics: Arc<RoverMetrics>,
    idle: Duration,
) {
    info!("Inference loop started");
    while is_running.load(Ordering::Acquire) {
        let Some(snapshot) = scheduler.take_snapshot() else {
            spin_sleep::sleep(idle);
            continue;
        };
        run_once(&mut engine, &scheduler, &metrics, &snapshot);
    }
    info!("Inference loop exited");
}

/// 对一个快照执行推理并发布结果
pub fn run_once(
    engine: &mut impl InferenceEngine,
    scheduler: &InferenceScheduler,
    metrics: &RoverMetrics,
    snapshot: &Snapshot,
) {
    match engine.invoke(snapshot) {
        Ok(quantized) => {
            let (steering, throttle) = quantized.dequantize();
            trace!(
                "Inference #{}: steering={:.3} throttle={:.3}",
                snapshot.sequence, steering, throttle
            );
            metrics.inference_runs.fetch_add(1, Ordering::Relaxed);
            scheduler.complete(Some(InferenceOutput {
                sequence: snapshot.sequence,
                steering,
                throttle,
            }));
        },
        Err(e) => {
            warn!("Inference #{} failed: {}", snapshot.sequence, e);
            metrics.inference_failures.fetch_add(1, Ordering::Relaxed);
            scheduler.complete(None);
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WAIT: Duration = Duration::from_millis(2);

    fn marker(i: usize) -> ModelFrame {
        ModelFrame::new(1, vec![i as f32])
    }

    fn fill(scheduler: &InferenceScheduler, count: usize) {
        for i in 1..=count {
            assert!(scheduler.append(marker(i)));
        }
    }

    struct FixedEngine(QuantizedOutput);

    impl InferenceEngine for FixedEngine {
        fn invoke(&mut self, _snapshot: &Snapshot) -> Result<QuantizedOutput, InferenceError> {
            Ok(self.0)
        }
    }

    #[test]
    fn test_dequantize() {
        let q = QuantizedOutput {
            steering: 10,
            throttle: -20,
            scale: 0.5,
            zero_point: -10,
        };
        assert_eq!(q.dequantize(), (10.0, -5.0));
    }

    #[test]
    fn test_request_snapshots_window_by_value() {
        let scheduler = InferenceScheduler::new(20, WAIT);
        for i in 1..=25 {
            assert!(scheduler.append(marker(i)));
        }
        assert!(scheduler.request());
        assert!(scheduler.is_pending());

        // 快照之后继续写入不影响快照
        scheduler.append(marker(26));

        let snapshot = scheduler.take_snapshot().unwrap();
        assert_eq!(snapshot.sequence, 1);
        let ids: Vec<usize> = snapshot.frames.iter().map(|f| f.data()[0] as usize).collect();
        assert_eq!(ids, (6..=25).collect::<Vec<_>>());
    }

    #[test]
    fn test_request_requires_full_window() {
        let scheduler = InferenceScheduler::new(20, WAIT);
        fill(&scheduler, 19);
        assert!(!scheduler.request());
        assert!(!scheduler.is_pending());
        assert!(scheduler.take_snapshot().is_none());

        assert!(scheduler.append(marker(20)));
        assert!(scheduler.request());
        let snapshot = scheduler.take_snapshot().unwrap();
        let ids: Vec<usize> = snapshot.frames.iter().map(|f| f.data()[0] as usize).collect();
        assert_eq!(ids, (1..=20).collect::<Vec<_>>());
    }

    #[test]
    fn test_request_ignored_while_pending() {
        let scheduler = InferenceScheduler::new(4, WAIT);
        assert!(!scheduler.request(), "empty ring cannot be requested");

        fill(&scheduler, 4);
        assert!(scheduler.request());
        assert!(!scheduler.request());

        let snapshot = scheduler.take_snapshot().unwrap();
        // 取走之后、完成之前仍然挂起
        assert!(!scheduler.request());
        scheduler.complete(Some(InferenceOutput {
            sequence: snapshot.sequence,
            steering: 0.1,
            throttle: 0.2,
        }));
        assert!(scheduler.request());
        assert_eq!(scheduler.latest().sequence, 1);
    }

    #[test]
    fn test_reset_drops_pending_snapshot() {
        let scheduler = InferenceScheduler::new(4, WAIT);
        fill(&scheduler, 4);
        assert!(scheduler.request());

        scheduler.reset();
        assert_eq!(scheduler.buffered(), 0);
        assert!(scheduler.take_snapshot().is_none());
        assert!(!scheduler.is_pending());
    }

    #[test]
    fn test_append_skips_when_lock_held() {
        let scheduler = Arc::new(InferenceScheduler::new(4, Duration::from_millis(1)));
        let guard = scheduler.state.lock();
        assert!(!scheduler.append(marker(1)));
        drop(guard);
        assert!(scheduler.append(marker(1)));
    }

    #[test]
    fn test_failure_keeps_previous_output() {
        let scheduler = InferenceScheduler::new(4, WAIT);
        let metrics = RoverMetrics::new();
        let mut good = FixedEngine(QuantizedOutput {
            steering: 4,
            throttle: 2,
            scale: 0.25,
            zero_point: 0,
        });

        fill(&scheduler, 4);
        assert!(scheduler.request());
        let snapshot = scheduler.take_snapshot().unwrap();
        run_once(&mut good, &scheduler, &metrics, &snapshot);
        assert_eq!(*scheduler.latest(), InferenceOutput {
            sequence: 1,
            steering: 1.0,
            throttle: 0.5,
        });

        assert!(scheduler.request());
        let snapshot = scheduler.take_snapshot().unwrap();
        run_once(&mut DisabledEngine, &scheduler, &metrics, &snapshot);
        assert_eq!(scheduler.latest().sequence, 1);
        assert!(!scheduler.is_pending());

        let m = metrics.snapshot();
        assert_eq!(m.inference_runs, 1);
        assert_eq!(m.inference_failures, 1);
    }

    #[test]
    fn test_inference_loop_runs_in_background() {
        let scheduler = Arc::new(InferenceScheduler::new(4, WAIT));
        let metrics = Arc::new(RoverMetrics::new());
        let is_running = Arc::new(AtomicBool::new(true));

        let handle = {
            let (scheduler, metrics, is_running) =
                (scheduler.clone(), metrics.clone(), is_running.clone());
            std::thread::spawn(move || {
                let engine = FixedEngine(QuantizedOutput {
                    steering: 1,
                    throttle: 1,
                    scale: 1.0,
                    zero_point: 0,
                });
                inference_loop(engine, scheduler, is_running, metrics, Duration::from_millis(1));
            })
        };

        fill(&scheduler, 4);
        assert!(scheduler.request());

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while scheduler.latest().sequence == 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(scheduler.latest().sequence, 1);

        is_running.store(false, Ordering::Release);
        handle.join().unwrap();
    }
}
