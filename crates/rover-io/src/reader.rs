//! 基于后台读取线程的字节源
//!
//! 后台线程从任意 `std::io::Read` 读取数据块，通过有界通道交给控制线程。
//! 控制线程侧的 `try_read` 从不阻塞。

use crate::{ByteSource, TransportError};
use crossbeam_channel::{Receiver, TryRecvError, bounded};
use std::io::{ErrorKind, Read};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::spawn;
use std::time::Duration;
use tracing::{debug, error, info};

/// 读取线程配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderConfig {
    /// 单次读取的最大字节数
    pub chunk_size: usize,
    /// 通道容量（数据块个数），写满后读取线程阻塞
    pub queue_chunks: usize,
    /// 限速（字节/秒），用于按真实波特率回放录制数据；None 表示不限速
    pub bytes_per_sec: Option<u32>,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            chunk_size: 256,
            queue_chunks: 64,
            bytes_per_sec: None,
        }
    }
}

/// 后台读取线程字节源
pub struct ReaderSource {
    rx: Receiver<Vec<u8>>,
    current: Vec<u8>,
    pos: usize,
    stop: Arc<AtomicBool>,
}

impl ReaderSource {
    /// 启动读取线程
    pub fn spawn<R>(mut reader: R, config: ReaderConfig) -> Self
    where
        R: Read + Send + 'static,
    {
        let (tx, rx) = bounded::<Vec<u8>>(config.queue_chunks.max(1));
        let stop = Arc::new(AtomicBool::new(false));
        let stop_thread = stop.clone();
        let chunk_size = config.chunk_size.max(1);

        spawn(move || {
            info!("Sensor reader thread started");
            let mut buf = vec![0u8; chunk_size];
            loop {
                if stop_thread.load(Ordering::Acquire) {
                    break;
                }
                let n = match reader.read(&mut buf) {
                    Ok(0) => {
                        debug!("Sensor reader reached end of stream");
                        break;
                    },
                    Ok(n) => n,
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                        spin_sleep::sleep(Duration::from_millis(1));
                        continue;
                    },
                    Err(e) => {
                        error!("Sensor reader error: {}", e);
                        break;
                    },
                };

                if let Some(bps) = config.bytes_per_sec.filter(|bps| *bps > 0) {
                    spin_sleep::sleep(Duration::from_secs_f64(n as f64 / f64::from(bps)));
                }

                if tx.send(buf[..n].to_vec()).is_err() {
                    // 接收端已释放
                    break;
                }
            }
            info!("Sensor reader thread exited");
        });

        Self {
            rx,
            current: Vec::new(),
            pos: 0,
            stop,
        }
    }
}

impl ByteSource for ReaderSource {
    fn try_read(&mut self) -> Result<Option<u8>, TransportError> {
        if self.pos >= self.current.len() {
            match self.rx.try_recv() {
                Ok(chunk) => {
                    self.current = chunk;
                    self.pos = 0;
                },
                Err(TryRecvError::Empty) => return Ok(None),
                Err(TryRecvError::Disconnected) => return Err(TransportError::Disconnected),
            }
        }

        let byte = self.current.get(self.pos).copied();
        self.pos += 1;
        Ok(byte)
    }

    fn discard_pending(&mut self) -> usize {
        let mut discarded = self.current.len().saturating_sub(self.pos);
        self.current.clear();
        self.pos = 0;
        while let Ok(chunk) = self.rx.try_recv() {
            discarded += chunk.len();
        }
        discarded
    }
}

impl Drop for ReaderSource {
    fn drop(&mut self) {
        // 读取线程可能阻塞在 read() 上，这里只发出停止信号，不 join
        self.stop.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::time::Instant;

    fn read_all(source: &mut ReaderSource) -> Vec<u8> {
        let mut out = Vec::new();
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            match source.try_read() {
                Ok(Some(b)) => out.push(b),
                Ok(None) => std::thread::sleep(Duration::from_millis(1)),
                Err(TransportError::Disconnected) => break,
                Err(e) => panic!("unexpected error: {}", e),
            }
        }
        out
    }

    #[test]
    fn test_reads_whole_stream_then_disconnects() {
        let data: Vec<u8> = (0..=255).collect();
        let mut source = ReaderSource::spawn(
            Cursor::new(data.clone()),
            ReaderConfig {
                chunk_size: 10,
                ..Default::default()
            },
        );
        assert_eq!(read_all(&mut source), data);
    }

    #[test]
    fn test_discard_pending_counts_bytes() {
        let data = vec![0xAB; 100];
        let mut source = ReaderSource::spawn(Cursor::new(data), ReaderConfig::default());

        // 等待读取线程把数据放入通道
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(source.try_read().unwrap(), Some(0xAB));
        assert_eq!(source.discard_pending(), 99);
    }
}
