//! Builder 模式实现
//!
//! 提供链式构造 [`Rover`] 实例的便捷方式。

use crate::control::ControlSource;
use crate::error::DriverError;
use crate::indicator::IndicatorDevice;
use crate::inference::{InferenceEngine, InferenceScheduler, inference_loop};
use crate::metrics::RoverMetrics;
use crate::persistence::{FileLog, LogStorage, PersistenceQueue, writer_loop};
use crate::pipeline::{ControlLoop, LoopHandles, PipelineConfig, RoverContext, control_loop};
use crate::rover::Rover;
use rover_io::ByteSource;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::Builder as ThreadBuilder;
use std::time::Duration;
use tracing::warn;

/// 日志存储来源
enum StorageSpec {
    /// 没有存储（启动即进入 Faulted）
    None,
    /// 存储根目录，启动时分配新的会话日志
    Directory(PathBuf),
    /// 调用方提供的存储
    Custom {
        storage: Box<dyn LogStorage>,
        name: String,
    },
}

/// Rover Builder（链式构造）
///
/// # Example
///
/// ```no_run
/// use rover_driver::{DisabledEngine, RoverBuilder, SharedControls, SoftIndicator};
/// use rover_io::{ReaderConfig, ReaderSource};
///
/// let port = std::fs::File::open("/dev/ttyUSB0").unwrap();
/// let rover = RoverBuilder::new()
///     .storage_root("/mnt/sdcard")
///     .build(
///         ReaderSource::spawn(port, ReaderConfig::default()),
///         SharedControls::default(),
///         SoftIndicator::new(),
///         DisabledEngine,
///     )
///     .unwrap();
/// println!("mode: {:?}", rover.mode());
/// ```
pub struct RoverBuilder {
    config: PipelineConfig,
    storage: StorageSpec,
    console: Option<Box<dyn Write + Send>>,
}

impl RoverBuilder {
    pub fn new() -> Self {
        Self {
            config: PipelineConfig::default(),
            storage: StorageSpec::None,
            console: None,
        }
    }

    /// 设置流水线配置
    pub fn pipeline_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// 设置存储根目录
    pub fn storage_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.storage = StorageSpec::Directory(root.into());
        self
    }

    /// 使用自定义存储（测试或非文件系统存储）
    pub fn log_storage(mut self, storage: impl LogStorage + 'static, name: impl Into<String>) -> Self {
        self.storage = StorageSpec::Custom {
            storage: Box::new(storage),
            name: name.into(),
        };
        self
    }

    /// 终端回显输出（默认 stdout）
    pub fn console(mut self, console: impl Write + Send + 'static) -> Self {
        self.console = Some(Box::new(console));
        self
    }

    /// 打开存储、启动全部线程
    ///
    /// 存储打不开不算错误：流水线以 Faulted 模式启动。
    pub fn build<S, C, D, E>(
        self,
        source: S,
        controls: C,
        device: D,
        engine: E,
    ) -> Result<Rover, DriverError>
    where
        S: ByteSource + Send + 'static,
        C: ControlSource + Send + 'static,
        D: IndicatorDevice + Send + 'static,
        E: InferenceEngine + 'static,
    {
        let config = self.config;
        config.validate()?;

        let (storage, log_file_name): (Option<Box<dyn LogStorage>>, Option<String>) =
            match self.storage {
                StorageSpec::None => (None, None),
                StorageSpec::Directory(root) => {
                    match FileLog::open_session(&root, config.binning_factor) {
                        Ok(log) => {
                            let name = log.file_name();
                            (Some(Box::new(log) as Box<dyn LogStorage>), Some(name))
                        },
                        Err(e) => {
                            warn!("Storage unavailable at {}: {}", root.display(), e);
                            (None, None)
                        },
                    }
                },
                StorageSpec::Custom { storage, name } => (Some(storage), Some(name)),
            };

        let (persistence, rx) = PersistenceQueue::new(
            config.persistence_queue_capacity,
            Duration::from_millis(config.sentinel_timeout_ms),
        );
        let handles = LoopHandles {
            scheduler: Arc::new(InferenceScheduler::new(
                config.ring_capacity,
                Duration::from_micros(config.ring_lock_wait_us),
            )),
            persistence,
            ctx: Arc::new(RoverContext::new(log_file_name)),
            metrics: Arc::new(RoverMetrics::new()),
        };
        let is_running = Arc::new(AtomicBool::new(true));

        let writer_thread = match storage {
            Some(storage) => {
                let metrics = handles.metrics.clone();
                let flush_every = config.flush_every;
                Some(
                    ThreadBuilder::new()
                        .name("rover-writer".into())
                        .spawn(move || writer_loop(rx, storage, flush_every, metrics))
                        .map_err(|e| spawn_failed(&is_running, e))?,
                )
            },
            None => {
                drop(rx);
                None
            },
        };

        let inference_thread = {
            let scheduler = handles.scheduler.clone();
            let stop = is_running.clone();
            let is_running = is_running.clone();
            let metrics = handles.metrics.clone();
            let idle = Duration::from_micros(config.inference_idle_us);
            ThreadBuilder::new()
                .name("rover-inference".into())
                .spawn(move || inference_loop(engine, scheduler, is_running, metrics, idle))
                .map_err(|e| spawn_failed(&stop, e))?
        };

        let console = self
            .console
            .unwrap_or_else(|| Box::new(std::io::stdout()) as Box<dyn Write + Send>);
        let persistence_dropped = handles.persistence.dropped_counter().clone();
        let (ctx, scheduler, metrics) = (
            handles.ctx.clone(),
            handles.scheduler.clone(),
            handles.metrics.clone(),
        );
        let pipeline = ControlLoop::new(source, controls, device, console, handles, config);

        let control_thread = {
            let stop = is_running.clone();
            let is_running = is_running.clone();
            ThreadBuilder::new()
                .name("rover-control".into())
                .spawn(move || control_loop(pipeline, is_running))
                .map_err(|e| spawn_failed(&stop, e))?
        };

        Ok(Rover::from_parts(
            ctx,
            scheduler,
            metrics,
            persistence_dropped,
            is_running,
            control_thread,
            inference_thread,
            writer_thread,
        ))
    }
}

/// 线程创建失败：通知已启动的线程退出
fn spawn_failed(is_running: &AtomicBool, e: std::io::Error) -> DriverError {
    is_running.store(false, Ordering::Release);
    DriverError::IoThread(e.to_string())
}

impl Default for RoverBuilder {
    fn default() -> Self {
        Self::new()
    }
}
