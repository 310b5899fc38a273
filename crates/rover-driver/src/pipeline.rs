//! 控制线程流水线（核心 A）
//!
//! 每个周期：
//!
//! 1. 采样遥控输入，提交行驶状态指示灯命令
//! 2. 零超时轮询字节源，直到分帧器产出一个完整数据包
//! 3. 丢弃积压字节，解析帧（非法元数据 → 跳过本周期）
//! 4. 把 ch3 送入模式状态机
//! 5. 按当前模式分发：终端回显 / 持久化入队 / 追加到推理窗口
//! 6. 更新周期统计与指示灯仲裁器
//!
//! 流水线本身不分配线程，[`crate::Rover`] 负责在专用线程中运行 [`control_loop`]。

use crate::control::{ControlSample, ControlSource};
use crate::error::DriverError;
use crate::indicator::{IndicatorArbiter, IndicatorCommand, IndicatorDevice};
use crate::inference::InferenceScheduler;
use crate::metrics::RoverMetrics;
use crate::mode::{AtomicMode, Mode, ModeController, TransitionEffects, fault_indicator};
use crate::persistence::{PersistenceQueue, PersistenceRecord};
use crate::render::render_ascii;
use crate::ring::{ModelInputConfig, to_model_input};
use crate::stats::CycleStats;
use arc_swap::ArcSwap;
use rover_io::{ByteSource, TransportError};
use rover_protocol::{FrameDecoder, Progress, SensorFrame, UnitLaw, log_format, parse_frame};
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// 流水线配置
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// 分帧缓冲区容量（字节）
    pub decoder_capacity: usize,
    /// 行/列上限
    pub max_frame_size: usize,
    /// 字节到毫米的换算律
    pub unit: UnitLaw,
    /// 传感器像素合并系数（写入日志文件头）
    pub binning_factor: u32,
    /// 模式切换后的冷却周期数
    pub mode_cooldown_cycles: u32,
    /// 推理窗口帧数
    pub ring_capacity: usize,
    /// 模型输入转换参数
    pub model_input: ModelInputConfig,
    /// 控制线程获取环形缓冲区锁的最长等待（微秒）
    pub ring_lock_wait_us: u64,
    /// 持久化队列容量（条）
    pub persistence_queue_capacity: usize,
    /// 写入线程每写入多少条刷新一次
    pub flush_every: usize,
    /// 指示灯等待队列容量
    pub indicator_queue_capacity: usize,
    /// 等待数据包时的轮询间隔（微秒）
    pub packet_poll_interval_us: u64,
    /// 推理线程空闲时的休眠（微秒）
    pub inference_idle_us: u64,
    /// 发送持久化哨兵的最长等待（毫秒）
    pub sentinel_timeout_ms: u64,
    /// 周期统计窗口（毫秒）
    pub stats_window_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            decoder_capacity: rover_protocol::DEFAULT_BUFFER_CAPACITY,
            max_frame_size: rover_protocol::MAX_SIZE,
            unit: UnitLaw::default(),
            binning_factor: 4,
            mode_cooldown_cycles: 10,
            ring_capacity: 20,
            model_input: ModelInputConfig::default(),
            ring_lock_wait_us: 2_000,
            persistence_queue_capacity: 16,
            flush_every: 20,
            indicator_queue_capacity: 10,
            packet_poll_interval_us: 1_000,
            inference_idle_us: 2_000,
            sentinel_timeout_ms: 100,
            stats_window_ms: 1_000,
        }
    }
}

impl PipelineConfig {
    /// 检查配置是否可用
    pub fn validate(&self) -> Result<(), DriverError> {
        let fail = |msg: &str| Err(DriverError::InvalidInput(msg.to_string()));
        if self.max_frame_size == 0 || self.max_frame_size > usize::from(u8::MAX) {
            return fail("max_frame_size must be in 1..=255");
        }
        if self.decoder_capacity < rover_protocol::HEADER_SIZE + rover_protocol::TRAILER_SIZE + 1 {
            return fail("decoder_capacity is smaller than an empty packet");
        }
        if self.ring_capacity == 0 {
            return fail("ring_capacity must be positive");
        }
        if self.model_input.side == 0 {
            return fail("model input side must be positive");
        }
        if self.model_input.max_depth_mm.is_nan() || self.model_input.max_depth_mm <= 0.0 {
            return fail("max_depth_mm must be positive");
        }
        if self.persistence_queue_capacity == 0 || self.indicator_queue_capacity == 0 {
            return fail("queue capacities must be positive");
        }
        Ok(())
    }
}

/// 线程间共享的运行状态
#[derive(Debug)]
pub struct RoverContext {
    /// 当前模式（控制线程写，任意线程读）
    pub mode: AtomicMode,
    /// 最近一次遥控采样
    pub controls: ArcSwap<ControlSample>,
    /// 会话日志文件名；None 表示存储不可用
    pub log_file_name: Option<String>,
}

impl RoverContext {
    pub fn new(log_file_name: Option<String>) -> Self {
        let mode = if log_file_name.is_some() {
            Mode::Idle
        } else {
            Mode::Faulted
        };
        Self {
            mode: AtomicMode::new(mode),
            controls: ArcSwap::from_pointee(ControlSample::default()),
            log_file_name,
        }
    }

    pub fn storage_available(&self) -> bool {
        self.log_file_name.is_some()
    }
}

/// 控制线程与其他线程共享的句柄
#[derive(Debug, Clone)]
pub struct LoopHandles {
    pub scheduler: Arc<InferenceScheduler>,
    pub persistence: PersistenceQueue,
    pub ctx: Arc<RoverContext>,
    pub metrics: Arc<RoverMetrics>,
}

/// 单个周期的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// 帧已按该模式处理
    Processed(Mode),
    /// 帧元数据非法，本周期跳过
    Rejected,
    /// 收到停止信号
    Stopped,
}

/// 模式切换副作用的实现
struct LoopEffects<'a, D> {
    arbiter: &'a mut IndicatorArbiter<D>,
    scheduler: &'a InferenceScheduler,
    persistence: &'a PersistenceQueue,
}

impl<D: IndicatorDevice> TransitionEffects for LoopEffects<'_, D> {
    fn flush_persistence(&mut self) {
        if let Err(e) = self.persistence.request_flush() {
            warn!("Failed to enqueue persistence sentinel: {}", e);
        }
    }

    fn reset_inference(&mut self) {
        self.scheduler.reset();
    }

    fn indicate(&mut self, command: IndicatorCommand) {
        self.arbiter.clear();
        self.arbiter.submit(command);
    }
}

/// 控制线程状态
pub struct ControlLoop<S, C, D, W> {
    source: S,
    controls: C,
    arbiter: IndicatorArbiter<D>,
    console: W,
    decoder: FrameDecoder,
    modes: ModeController,
    handles: LoopHandles,
    config: PipelineConfig,
    stats: CycleStats,
    frame_index: u64,
}

impl<S, C, D, W> ControlLoop<S, C, D, W>
where
    S: ByteSource,
    C: ControlSource,
    D: IndicatorDevice,
    W: Write,
{
    /// # 参数
    ///
    /// - `source`: 传感器字节源
    /// - `controls`: 遥控输入
    /// - `device`: 指示灯设备
    /// - `console`: 终端回显输出
    /// - `handles`: 共享句柄（存储是否可用由 `handles.ctx` 决定）
    /// - `config`: 流水线配置
    pub fn new(
        source: S,
        controls: C,
        device: D,
        console: W,
        handles: LoopHandles,
        config: PipelineConfig,
    ) -> Self {
        let storage_available = handles.ctx.storage_available();
        let mut arbiter = IndicatorArbiter::with_capacity(device, config.indicator_queue_capacity);
        if !storage_available {
            warn!("Storage not available, starting in Faulted mode");
            arbiter.submit(fault_indicator());
            arbiter.update(Instant::now());
        }

        let modes = ModeController::new(config.mode_cooldown_cycles, storage_available);
        handles.ctx.mode.set(modes.mode(), Ordering::Relaxed);

        Self {
            source,
            controls,
            arbiter,
            console,
            decoder: FrameDecoder::with_capacity(config.decoder_capacity),
            modes,
            handles,
            stats: CycleStats::new(Duration::from_millis(config.stats_window_ms)),
            config,
            frame_index: 0,
        }
    }

    pub fn mode(&self) -> Mode {
        self.modes.mode()
    }

    pub fn arbiter(&self) -> &IndicatorArbiter<D> {
        &self.arbiter
    }

    pub fn console(&self) -> &W {
        &self.console
    }

    /// 已格式化的持久化记录数（含被丢弃的）
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// 执行一个完整周期
    ///
    /// 只有传输层错误会返回 `Err`；帧错误、队列满、锁竞争都在周期内消化。
    pub fn cycle(&mut self, is_running: &AtomicBool) -> Result<CycleOutcome, DriverError> {
        let metrics = self.handles.metrics.clone();

        let sample = self.controls.sample();
        self.handles.ctx.controls.store(Arc::new(sample));
        self.arbiter.submit(sample.drive_status());

        let wait_start = Instant::now();
        if !self.wait_for_packet(is_running)? {
            return Ok(CycleOutcome::Stopped);
        }
        let wait = wait_start.elapsed();

        // 只处理最新数据
        let discarded = self.source.discard_pending();
        if discarded > 0 {
            metrics
                .bytes_discarded
                .fetch_add(discarded as u64, Ordering::Relaxed);
        }

        let decode_start = Instant::now();
        let parsed = parse_frame(
            self.decoder.packet(),
            self.config.unit,
            self.config.max_frame_size,
        );
        self.decoder.reset();
        let frame = match parsed {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Dropping frame: {}", e);
                metrics.frames_rejected.fetch_add(1, Ordering::Relaxed);
                self.arbiter.update(Instant::now());
                return Ok(CycleOutcome::Rejected);
            },
        };
        let decode = decode_start.elapsed();
        metrics.frames_decoded.fetch_add(1, Ordering::Relaxed);

        let mut effects = LoopEffects {
            arbiter: &mut self.arbiter,
            scheduler: &self.handles.scheduler,
            persistence: &self.handles.persistence,
        };
        if self.modes.step(sample.mode_signal, &mut effects).is_some() {
            metrics.mode_transitions.fetch_add(1, Ordering::Relaxed);
        }
        let mode = self.modes.mode();
        self.handles.ctx.mode.set(mode, Ordering::Relaxed);

        let dispatch_start = Instant::now();
        self.dispatch(mode, &sample, &frame);
        let dispatch = dispatch_start.elapsed();

        self.stats.record(wait, decode, dispatch);
        let now = Instant::now();
        if let Some(report) = self.stats.tick(now, self.handles.persistence.dropped())
            && mode == Mode::Persisting
        {
            info!(
                "FPS: {:.1} | wait: {}us  decode: {}us  persist: {}us  dropped: {}",
                report.fps,
                report.avg_wait.as_micros(),
                report.avg_decode.as_micros(),
                report.avg_dispatch.as_micros(),
                report.dropped
            );
        }

        self.arbiter.update(now);
        Ok(CycleOutcome::Processed(mode))
    }

    /// 轮询字节源直到得到完整数据包
    ///
    /// 返回 `Ok(false)` 表示收到停止信号。
    fn wait_for_packet(&mut self, is_running: &AtomicBool) -> Result<bool, DriverError> {
        let poll = Duration::from_micros(self.config.packet_poll_interval_us);
        loop {
            if !is_running.load(Ordering::Acquire) {
                return Ok(false);
            }
            match self.source.try_read()? {
                Some(byte) => match self.decoder.push(byte) {
                    Progress::Complete => return Ok(true),
                    Progress::Overflow => {
                        warn!(
                            "Framing buffer overflow ({} bytes without end byte)",
                            self.decoder.capacity()
                        );
                        self.handles
                            .metrics
                            .framing_overflows
                            .fetch_add(1, Ordering::Relaxed);
                    },
                    Progress::Pending => {},
                },
                None => spin_sleep::sleep(poll),
            }
        }
    }

    fn dispatch(&mut self, mode: Mode, sample: &ControlSample, frame: &SensorFrame) {
        let metrics = &self.handles.metrics;
        match mode {
            Mode::TerminalEcho => {
                if let Err(e) = render_ascii(frame, &mut self.console) {
                    warn!("Terminal echo failed: {}", e);
                }
            },
            Mode::Persisting => {
                let line =
                    log_format::format_row(self.frame_index, sample.steering, sample.throttle, frame);
                self.frame_index += 1;
                match self.handles.persistence.enqueue(PersistenceRecord::new(line)) {
                    Ok(()) => {
                        metrics.records_enqueued.fetch_add(1, Ordering::Relaxed);
                    },
                    Err(e) => trace!("Persistence record dropped: {}", e),
                }
            },
            Mode::Inferring => {
                let input = to_model_input(frame, &self.config.model_input);
                if self.handles.scheduler.append(input) {
                    metrics.ring_appends.fetch_add(1, Ordering::Relaxed);
                } else {
                    metrics.ring_contention.fetch_add(1, Ordering::Relaxed);
                }
                if self.handles.scheduler.request() {
                    metrics.inference_requests.fetch_add(1, Ordering::Relaxed);
                }
            },
            Mode::Idle | Mode::Faulted => {},
        }
    }
}

/// 控制线程主循环
///
/// 字节源断开（例如回放结束）时退出并清除运行标志，其他线程随之退出。
pub fn control_loop<S, C, D, W>(mut pipeline: ControlLoop<S, C, D, W>, is_running: Arc<AtomicBool>)
where
    S: ByteSource,
    C: ControlSource,
    D: IndicatorDevice,
    W: Write,
{
    // 设置线程优先级（可选 feature）
    #[cfg(feature = "realtime")]
    {
        use thread_priority::*;

        match set_current_thread_priority(ThreadPriority::Max) {
            Ok(_) => {
                info!("Control thread priority set to MAX (realtime)");
            },
            Err(e) => {
                warn!(
                    "Failed to set control thread priority: {}. \
                    On Linux, you may need to run with CAP_SYS_NICE or use rtkit.",
                    e
                );
            },
        }
    }

    info!("Control loop started in {:?} mode", pipeline.mode());
    loop {
        match pipeline.cycle(&is_running) {
            Ok(CycleOutcome::Stopped) => break,
            Ok(_) => {},
            Err(DriverError::Transport(TransportError::Disconnected)) => {
                info!("Sensor stream ended");
                break;
            },
            Err(e) => {
                error!("Control loop transport failure: {}", e);
                break;
            },
        }
    }

    // 确保最后一段持久化数据落盘
    if pipeline.mode() == Mode::Persisting
        && let Err(e) = pipeline.handles.persistence.request_flush()
    {
        debug!("Final persistence flush not enqueued: {}", e);
    }

    is_running.store(false, Ordering::Release);
    info!("Control loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicator::{Color, SoftIndicator};
    use crate::inference::InferenceScheduler;
    use rover_io::ScriptedSource;
    use rover_protocol::{FrameHeader, encode_packet};

    fn handles(storage: bool) -> (LoopHandles, crossbeam_channel::Receiver<PersistenceRecord>) {
        let (persistence, rx) = PersistenceQueue::new(16, Duration::from_millis(10));
        (
            LoopHandles {
                scheduler: Arc::new(InferenceScheduler::new(20, Duration::from_millis(2))),
                persistence,
                ctx: Arc::new(RoverContext::new(
                    storage.then(|| "revised_log_0001.csv".to_string()),
                )),
                metrics: Arc::new(RoverMetrics::new()),
            },
            rx,
        )
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(PipelineConfig::default().validate().is_ok());

        let bad = PipelineConfig {
            ring_capacity: 0,
            ..Default::default()
        };
        assert!(matches!(bad.validate(), Err(DriverError::InvalidInput(_))));
    }

    #[test]
    fn test_boot_without_storage_is_faulted() {
        let (source, _feed) = ScriptedSource::new();
        let (handles, _rx) = handles(false);
        let pipeline = ControlLoop::new(
            source,
            crate::SharedControls::default(),
            SoftIndicator::new(),
            Vec::new(),
            handles.clone(),
            PipelineConfig::default(),
        );
        assert_eq!(pipeline.mode(), Mode::Faulted);
        assert_eq!(handles.ctx.mode.get(Ordering::Relaxed), Mode::Faulted);
        assert_eq!(pipeline.arbiter().active().color, Color::RED);
    }

    #[test]
    fn test_cycle_stops_when_not_running() {
        let (source, _feed) = ScriptedSource::new();
        let (handles, _rx) = handles(true);
        let mut pipeline = ControlLoop::new(
            source,
            crate::SharedControls::default(),
            SoftIndicator::new(),
            Vec::new(),
            handles,
            PipelineConfig::default(),
        );
        let stopped = AtomicBool::new(false);
        assert_eq!(pipeline.cycle(&stopped).unwrap(), CycleOutcome::Stopped);
    }

    #[test]
    fn test_cycle_discards_backlog() {
        let (source, feed) = ScriptedSource::new();
        let (handles, _rx) = handles(true);
        let metrics = handles.metrics.clone();
        let mut pipeline = ControlLoop::new(
            source,
            crate::SharedControls::default(),
            SoftIndicator::new(),
            Vec::new(),
            handles,
            PipelineConfig::default(),
        );

        let packet = encode_packet(&FrameHeader::with_resolution(1, 1), &[5], [0, 0]);
        feed.push(&packet);
        feed.push(&packet);

        let running = AtomicBool::new(true);
        assert_eq!(
            pipeline.cycle(&running).unwrap(),
            CycleOutcome::Processed(Mode::Idle)
        );
        assert_eq!(feed.pending(), 0);
        let m = metrics.snapshot();
        assert_eq!(m.frames_decoded, 1);
        assert_eq!(m.bytes_discarded, packet.len() as u64);
    }
}
