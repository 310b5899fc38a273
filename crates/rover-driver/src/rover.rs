//! Rover 句柄
//!
//! 持有控制线程、推理线程和写入线程；对外只暴露只读查询。
//! Drop 时清除运行标志并按 控制 → 推理 → 写入 的顺序等待线程退出。

use crate::control::ControlSample;
use crate::inference::{InferenceOutput, InferenceScheduler};
use crate::metrics::{MetricsSnapshot, RoverMetrics};
use crate::mode::Mode;
use crate::pipeline::RoverContext;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{JoinHandle, spawn};
use std::time::{Duration, Instant};
use tracing::{error, info};

/// Extension trait for timeout-capable thread joins
trait JoinTimeout {
    fn join_timeout(self, timeout: Duration) -> std::thread::Result<()>;
}

impl<T: Send + 'static> JoinTimeout for JoinHandle<T> {
    fn join_timeout(self, timeout: Duration) -> std::thread::Result<()> {
        use std::sync::mpsc;

        let (tx, rx) = mpsc::channel();

        // 看门狗线程负责 join，主线程只做有超时的等待
        spawn(move || {
            let result = self.join();
            let _ = tx.send(result);
        });

        match rx.recv_timeout(timeout) {
            Ok(join_result) => join_result.map(|_| ()),
            Err(mpsc::RecvTimeoutError::Timeout) => Err(Box::new(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "Thread join timeout",
            ))),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(Box::new(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "Thread panicked during join",
            ))),
        }
    }
}

/// 运行中的深度流水线
pub struct Rover {
    ctx: Arc<RoverContext>,
    scheduler: Arc<InferenceScheduler>,
    metrics: Arc<RoverMetrics>,
    /// 持久化丢弃计数（不持有队列发送端，写入线程才能在关闭时退出）
    persistence_dropped: Arc<AtomicU64>,
    is_running: Arc<AtomicBool>,
    control_thread: Option<JoinHandle<()>>,
    inference_thread: Option<JoinHandle<()>>,
    writer_thread: Option<JoinHandle<()>>,
}

impl Rover {
    /// 由 [`crate::RoverBuilder`] 调用
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        ctx: Arc<RoverContext>,
        scheduler: Arc<InferenceScheduler>,
        metrics: Arc<RoverMetrics>,
        persistence_dropped: Arc<AtomicU64>,
        is_running: Arc<AtomicBool>,
        control_thread: JoinHandle<()>,
        inference_thread: JoinHandle<()>,
        writer_thread: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            ctx,
            scheduler,
            metrics,
            persistence_dropped,
            is_running,
            control_thread: Some(control_thread),
            inference_thread: Some(inference_thread),
            writer_thread,
        }
    }

    /// 当前模式
    pub fn mode(&self) -> Mode {
        self.ctx.mode.get(Ordering::Relaxed)
    }

    /// 指标快照
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// 最近一次成功推理的输出
    pub fn latest_inference(&self) -> Arc<InferenceOutput> {
        self.scheduler.latest()
    }

    /// 最近一次遥控采样
    pub fn latest_controls(&self) -> ControlSample {
        **self.ctx.controls.load()
    }

    /// 会话日志文件名（存储不可用时为 None）
    pub fn log_file_name(&self) -> Option<&str> {
        self.ctx.log_file_name.as_deref()
    }

    /// 持久化队列累计丢弃条数
    pub fn persistence_dropped(&self) -> u64 {
        self.persistence_dropped.load(Ordering::Relaxed)
    }

    /// 控制线程是否仍在运行
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
    }

    /// 请求停止（不等待）
    pub fn stop(&self) {
        self.is_running.store(false, Ordering::Release);
    }

    /// 等待控制线程自行结束（例如回放数据读完）
    ///
    /// 返回 true 表示已结束，false 表示超时。
    pub fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.is_running() {
            if Instant::now() >= deadline {
                return false;
            }
            spin_sleep::sleep(Duration::from_millis(5));
        }
        true
    }
}

impl Drop for Rover {
    fn drop(&mut self) {
        self.is_running.store(false, Ordering::Release);

        let join_timeout = Duration::from_secs(2);
        let threads = [
            ("Control", self.control_thread.take()),
            ("Inference", self.inference_thread.take()),
            ("Writer", self.writer_thread.take()),
        ];
        for (name, handle) in threads {
            if let Some(handle) = handle
                && let Err(_e) = handle.join_timeout(join_timeout)
            {
                error!(
                    "{} thread panicked or failed to shut down within {:?}",
                    name, join_timeout
                );
            }
        }
        info!("Rover stopped");
    }
}
