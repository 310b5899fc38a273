//! 持久化队列与写入线程
//!
//! 控制线程把格式化好的日志行放入有界队列，独立的写入线程负责落盘。
//! 存储设备的写入抖动（擦除、磨损均衡）因此不会拖慢控制周期。
//!
//! # 设计
//!
//! - **有界队列**: `bounded(capacity)`，内存占用有上限
//! - **非阻塞**: 数据行使用 `try_send`，队列满时丢弃并计数
//! - **哨兵**: 空记录表示"刷新并同步"，离开持久化模式时发送（有界等待）
//! - **批量刷新**: 每写入 K 条记录刷新一次缓冲区

use crate::error::DriverError;
use crate::metrics::RoverMetrics;
use crossbeam_channel::{Receiver, SendTimeoutError, Sender, TrySendError, bounded};
use rover_protocol::log_format;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// 会话计数文件名
pub const COUNTER_FILE: &str = "counter.txt";

/// 日志文件写缓冲大小（约 10 帧）
pub const FILE_BUFFER_SIZE: usize = 32 * 1024;

/// 持久化记录
///
/// 空记录是哨兵。
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PersistenceRecord {
    line: String,
}

impl PersistenceRecord {
    pub fn new(line: String) -> Self {
        Self { line }
    }

    /// 刷新/同步哨兵
    pub fn sentinel() -> Self {
        Self::default()
    }

    pub fn is_sentinel(&self) -> bool {
        self.line.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.line.as_bytes()
    }
}

/// 持久化队列（生产者端）
#[derive(Debug, Clone)]
pub struct PersistenceQueue {
    tx: Sender<PersistenceRecord>,
    dropped: Arc<AtomicU64>,
    sentinel_timeout: Duration,
}

impl PersistenceQueue {
    /// 创建队列
    ///
    /// # 参数
    ///
    /// - `capacity`: 队列容量（记录条数）
    /// - `sentinel_timeout`: 发送哨兵时的最长等待
    ///
    /// # 返回
    ///
    /// `(queue, rx)`，`rx` 交给 [`writer_loop`]。
    pub fn new(capacity: usize, sentinel_timeout: Duration) -> (Self, Receiver<PersistenceRecord>) {
        let (tx, rx) = bounded(capacity.max(1));
        (
            Self {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
                sentinel_timeout,
            },
            rx,
        )
    }

    /// 非阻塞入队
    ///
    /// 队列满或写入线程已退出时丢弃记录，丢弃计数加 1。
    pub fn enqueue(&self, record: PersistenceRecord) -> Result<(), DriverError> {
        match self.tx.try_send(record) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Err(DriverError::ChannelFull)
            },
            Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Err(DriverError::ChannelClosed)
            },
        }
    }

    /// 请求写入线程刷新并同步
    ///
    /// 哨兵排在所有已入队记录之后。队列持续满载超过 `sentinel_timeout` 时放弃。
    pub fn request_flush(&self) -> Result<(), DriverError> {
        match self
            .tx
            .send_timeout(PersistenceRecord::sentinel(), self.sentinel_timeout)
        {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => Err(DriverError::ChannelFull),
            Err(SendTimeoutError::Disconnected(_)) => Err(DriverError::ChannelClosed),
        }
    }

    /// 累计丢弃条数
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// 丢弃计数器（可跨线程持有）
    pub fn dropped_counter(&self) -> &Arc<AtomicU64> {
        &self.dropped
    }

    /// 当前排队条数
    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.tx.capacity().unwrap_or(0)
    }
}

/// 日志存储
pub trait LogStorage: Send {
    /// 追加字节（可缓冲）
    fn append(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// 把缓冲写入设备
    fn flush(&mut self) -> io::Result<()>;

    /// 刷新并等待设备确认落盘
    fn sync(&mut self) -> io::Result<()>;
}

impl<T: LogStorage + ?Sized> LogStorage for Box<T> {
    fn append(&mut self, bytes: &[u8]) -> io::Result<()> {
        (**self).append(bytes)
    }

    fn flush(&mut self) -> io::Result<()> {
        (**self).flush()
    }

    fn sync(&mut self) -> io::Result<()> {
        (**self).sync()
    }
}

/// 文件日志
pub struct FileLog {
    writer: BufWriter<File>,
    path: PathBuf,
}

impl FileLog {
    /// 在 `root` 下开启新的会话日志
    ///
    /// 递增 `counter.txt`，创建 `revised_log_NNNN.csv` 并写入文件头。
    pub fn open_session(root: &Path, binning_factor: u32) -> io::Result<Self> {
        let name = allocate_session_name(root)?;
        let path = root.join(&name);
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;

        let mut log = Self {
            writer: BufWriter::with_capacity(FILE_BUFFER_SIZE, file),
            path,
        };
        log.writer
            .write_all(log_format::header(binning_factor).as_bytes())?;
        log.writer.flush()?;
        info!("Logging to: {}", log.path.display());
        Ok(log)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 文件名（不含目录）
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

impl LogStorage for FileLog {
    fn append(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.writer.write_all(bytes)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }

    fn sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }
}

/// 会话日志文件名：`revised_log_NNNN.csv`
pub fn session_file_name(counter: u32) -> String {
    format!("revised_log_{counter:04}.csv")
}

/// 分配新的会话编号并返回日志文件名
///
/// 计数文件不存在时从 1 开始；存在时读取（非数字视为 0）并加 1。
/// 计数文件无法读取时返回错误，调用方应视为存储不可用。
/// 写回计数失败只记录警告。
pub fn allocate_session_name(root: &Path) -> io::Result<String> {
    let counter_path = root.join(COUNTER_FILE);
    let counter = match std::fs::read_to_string(&counter_path) {
        Ok(text) => text.trim().parse::<u32>().unwrap_or(0).saturating_add(1),
        Err(e) if e.kind() == io::ErrorKind::NotFound => 1,
        Err(e) => {
            error!("Failed to read {}: {}", counter_path.display(), e);
            return Err(e);
        },
    };

    if let Err(e) = std::fs::write(&counter_path, counter.to_string()) {
        warn!("Failed to write counter file {}: {}", counter_path.display(), e);
    }

    Ok(session_file_name(counter))
}

/// 写入线程主循环
///
/// 按顺序写出记录；每 `flush_every` 条刷新一次，收到哨兵时刷新并同步。
/// 所有发送端释放后做最后一次同步并退出。存储错误只记录日志并计数。
pub fn writer_loop(
    rx: Receiver<PersistenceRecord>,
    mut storage: impl LogStorage,
    flush_every: usize,
    metrics: Arc<RoverMetrics>,
) {
    info!("Persistence writer started");
    let flush_every = flush_every.max(1);
    let mut since_flush = 0usize;

    let report = |op: &str, result: io::Result<()>| {
        if let Err(e) = result {
            metrics.storage_errors.fetch_add(1, Ordering::Relaxed);
            warn!("Log {} failed: {}", op, e);
        }
    };

    while let Ok(record) = rx.recv() {
        if record.is_sentinel() {
            debug!("Persistence sentinel: flush + sync");
            report("sync", storage.sync());
            since_flush = 0;
            continue;
        }

        report("write", storage.append(record.as_bytes()));
        metrics.records_written.fetch_add(1, Ordering::Relaxed);

        since_flush += 1;
        if since_flush >= flush_every {
            report("flush", storage.flush());
            since_flush = 0;
        }
    }

    report("sync", storage.sync());
    info!("Persistence writer exited");
}
