//! 脚本化字节源
//!
//! 字节由 [`ScriptedFeed`] 句柄在任意线程注入，模拟串口接收缓冲区。

use crate::{ByteSource, TransportError};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

#[derive(Debug, Default)]
struct Shared {
    bytes: VecDeque<u8>,
    closed: bool,
}

/// 脚本化字节源（读取端）
#[derive(Debug)]
pub struct ScriptedSource {
    shared: Arc<Mutex<Shared>>,
}

/// 脚本化字节源（注入端）
#[derive(Debug, Clone)]
pub struct ScriptedFeed {
    shared: Arc<Mutex<Shared>>,
}

impl ScriptedSource {
    /// 创建字节源及其注入句柄
    pub fn new() -> (Self, ScriptedFeed) {
        let shared = Arc::new(Mutex::new(Shared::default()));
        (
            Self {
                shared: shared.clone(),
            },
            ScriptedFeed { shared },
        )
    }
}

impl ScriptedFeed {
    /// 追加字节到接收缓冲区
    pub fn push(&self, bytes: &[u8]) {
        self.shared.lock().bytes.extend(bytes.iter().copied());
    }

    /// 标记数据源结束；缓冲区读空后读取端返回 `Disconnected`
    pub fn close(&self) {
        self.shared.lock().closed = true;
    }

    /// 尚未被读取的字节数
    pub fn pending(&self) -> usize {
        self.shared.lock().bytes.len()
    }
}

impl ByteSource for ScriptedSource {
    fn try_read(&mut self) -> Result<Option<u8>, TransportError> {
        let mut shared = self.shared.lock();
        match shared.bytes.pop_front() {
            Some(byte) => Ok(Some(byte)),
            None if shared.closed => Err(TransportError::Disconnected),
            None => Ok(None),
        }
    }

    fn discard_pending(&mut self) -> usize {
        let mut shared = self.shared.lock();
        let n = shared.bytes.len();
        shared.bytes.clear();
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_in_order_then_empty() {
        let (mut source, feed) = ScriptedSource::new();
        feed.push(&[0x00, 0xFF]);
        assert_eq!(source.try_read().unwrap(), Some(0x00));
        assert_eq!(source.try_read().unwrap(), Some(0xFF));
        assert_eq!(source.try_read().unwrap(), None);
    }

    #[test]
    fn test_close_after_drain() {
        let (mut source, feed) = ScriptedSource::new();
        feed.push(&[7]);
        feed.close();
        assert_eq!(source.try_read().unwrap(), Some(7));
        assert!(matches!(
            source.try_read(),
            Err(TransportError::Disconnected)
        ));
    }

    #[test]
    fn test_discard_pending() {
        let (mut source, feed) = ScriptedSource::new();
        feed.push(&[1, 2, 3]);
        assert_eq!(source.discard_pending(), 3);
        assert_eq!(feed.pending(), 0);
    }
}
