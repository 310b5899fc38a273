//! 运行命令
//!
//! 启动完整流水线，直到 Ctrl+C、数据源结束或达到时长限制。

use crate::settings::CliConfig;
use anyhow::{Context, Result};
use clap::Args;
use rover_driver::{
    CommandContext, CommandProcessor, DisabledEngine, MetricsSnapshot, Mode, RoverBuilder,
    SharedControls, SoftIndicator,
};
use rover_io::{ReaderConfig, ReaderSource};
use std::fs::File;
use std::io::{self, ErrorKind, Read};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// 运行命令参数
#[derive(Args, Debug)]
pub struct RunCommand {
    /// 传感器串口设备或录制文件（覆盖配置）
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// 存储根目录（覆盖配置）
    #[arg(short, long)]
    pub storage: Option<PathBuf>,

    /// 按波特率限速读取输入（回放录制文件时使用）
    #[arg(long)]
    pub baud: Option<u32>,

    /// 运行时长（秒），0 表示直到 Ctrl+C 或输入结束
    #[arg(short, long, default_value_t = 0)]
    pub duration: u64,

    /// 不从 stdin 读取操作台命令
    #[arg(long)]
    pub no_console: bool,
}

impl RunCommand {
    pub fn execute(&self, config: &CliConfig) -> Result<()> {
        let pipeline = config.pipeline_config()?;

        let input = self
            .input
            .clone()
            .or_else(|| config.sensor.device.clone())
            .context("未指定传感器输入（--input 或 [sensor].device）")?;
        let file =
            File::open(&input).with_context(|| format!("打开传感器输入失败: {}", input.display()))?;
        let baud = self.baud.or(config.sensor.baud);
        let source = ReaderSource::spawn(
            file,
            ReaderConfig {
                // 8N1：每字节 10 位
                bytes_per_sec: baud.map(|b| b / 10),
                ..Default::default()
            },
        );

        let storage_root = self.storage.clone().or_else(|| config.storage.root.clone());
        let controls = SharedControls::default();

        let mut builder = RoverBuilder::new().pipeline_config(pipeline);
        if let Some(root) = &storage_root {
            builder = builder.storage_root(root);
        }
        let rover = builder.build(source, controls.clone(), SoftIndicator::new(), DisabledEngine)?;

        let interrupted = Arc::new(AtomicBool::new(false));
        {
            let interrupted = interrupted.clone();
            ctrlc::set_handler(move || {
                eprintln!("\n收到中断信号，正在停止...");
                interrupted.store(true, Ordering::SeqCst);
            })
            .context("设置信号处理失败")?;
        }

        if !self.no_console {
            spawn_console(CommandContext {
                storage_root: rover.log_file_name().and(storage_root.clone()),
                log_file_name: rover.log_file_name().map(str::to_string),
                controls,
            })?;
        }

        info!(
            "Running from {} (storage: {})",
            input.display(),
            rover.log_file_name().unwrap_or("unavailable")
        );

        let start = Instant::now();
        let limit = (self.duration > 0).then(|| Duration::from_secs(self.duration));
        while rover.is_running() && !interrupted.load(Ordering::SeqCst) {
            if limit.is_some_and(|limit| start.elapsed() >= limit) {
                info!("Duration limit reached");
                break;
            }
            std::thread::sleep(Duration::from_millis(50));
        }

        let mode = rover.mode();
        let metrics = rover.metrics();
        let log_file = rover.log_file_name().map(str::to_string);
        // Drop 等待全部线程退出，写入线程在此之前完成最后的同步
        drop(rover);

        print_summary(mode, &metrics, log_file.as_deref(), start.elapsed());
        Ok(())
    }
}

/// 操作台线程：从 stdin 逐字节读取命令，响应写到 stdout
///
/// 线程阻塞在 stdin 上，不 join，随进程退出。
fn spawn_console(ctx: CommandContext) -> Result<()> {
    std::thread::Builder::new()
        .name("rover-console".into())
        .spawn(move || {
            let mut processor = CommandProcessor::new();
            let mut stdin = io::stdin().lock();
            let mut buf = [0u8; 256];
            loop {
                let n = match stdin.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => {
                        warn!("Console input error: {}", e);
                        break;
                    },
                };
                for &byte in &buf[..n] {
                    if let Some(command) = processor.feed(byte)
                        && let Err(e) = ctx.execute(&command, &mut io::stdout().lock())
                    {
                        warn!("Console command {:?} failed: {}", command, e);
                    }
                }
            }
        })
        .context("启动操作台线程失败")?;
    Ok(())
}

fn print_summary(mode: Mode, m: &MetricsSnapshot, log_file: Option<&str>, elapsed: Duration) {
    println!();
    println!("📊 运行统计 ({:.1}s)", elapsed.as_secs_f64());
    println!("  最终模式: {:?}", mode);
    println!("  日志文件: {}", log_file.unwrap_or("(存储不可用)"));
    println!(
        "  帧: 解码 {}  拒绝 {}  分帧溢出 {}  丢弃积压 {} 字节",
        m.frames_decoded, m.frames_rejected, m.framing_overflows, m.bytes_discarded
    );
    println!(
        "  持久化: 入队 {}  写入 {}  存储错误 {}",
        m.records_enqueued, m.records_written, m.storage_errors
    );
    println!(
        "  推理: 追加 {}  锁竞争 {}  请求 {}  完成 {}  失败 {}",
        m.ring_appends, m.ring_contention, m.inference_requests, m.inference_runs, m.inference_failures
    );
    println!("  模式切换: {}", m.mode_transitions);
}
