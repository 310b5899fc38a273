//! 字节流分帧状态机
//!
//! 把不可靠的串口字节流切分为以 `0x00 0xFF` 开头、`0xDD` 结尾的数据包。
//!
//! ```text
//!            0x00                 0xFF
//! WaitStart1 ────► WaitStart2 ────────► Collect ──(0xDD)──► WaitStart1 (Complete)
//!     ▲                │ 其他字节            │
//!     └────────────────┘                    └──(超出容量)──► WaitStart1 (Overflow)
//! ```
//!
//! `WaitStart2` 收到非 `0xFF` 字节时直接回到 `WaitStart1`，该字节被丢弃，
//! 不会再被当作潜在的 `0x00` 重新检查。

use crate::{DEFAULT_BUFFER_CAPACITY, END, START1, START2};

/// 分帧状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecoderState {
    /// 等待第一个起始字节
    #[default]
    WaitStart1,
    /// 等待第二个起始字节
    WaitStart2,
    /// 收集数据直到结束字节
    Collect,
}

/// 单字节推进的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// 数据包尚未完成
    Pending,
    /// 数据包完成，可通过 [`FrameDecoder::packet`] 读取
    Complete,
    /// 在结束字节之前缓冲区已满，数据包被丢弃
    Overflow,
}

/// 分帧解码器
///
/// 缓冲区在构造时一次性分配，之后不再增长。
///
/// # Example
///
/// ```
/// use rover_protocol::{FrameDecoder, Progress};
///
/// let mut decoder = FrameDecoder::new();
/// let mut done = false;
/// for byte in [0x00, 0xFF, 0x01, 0xDD] {
///     done = decoder.push(byte) == Progress::Complete;
/// }
/// assert!(done);
/// assert_eq!(decoder.packet(), &[0x00, 0xFF, 0x01, 0xDD]);
/// ```
#[derive(Debug)]
pub struct FrameDecoder {
    state: DecoderState,
    buffer: Vec<u8>,
    capacity: usize,
    /// 最近一次完成的数据包长度（0 表示没有可读数据包）
    complete_len: usize,
}

impl FrameDecoder {
    /// 使用默认容量（12000 字节）创建解码器
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUFFER_CAPACITY)
    }

    /// 指定缓冲区容量创建解码器
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(3);
        Self {
            state: DecoderState::WaitStart1,
            buffer: Vec::with_capacity(capacity),
            capacity,
            complete_len: 0,
        }
    }

    /// 当前状态
    pub fn state(&self) -> DecoderState {
        self.state
    }

    /// 缓冲区容量
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 推进一个字节
    pub fn push(&mut self, byte: u8) -> Progress {
        match self.state {
            DecoderState::WaitStart1 => {
                if byte == START1 {
                    self.buffer.clear();
                    self.complete_len = 0;
                    self.buffer.push(byte);
                    self.state = DecoderState::WaitStart2;
                }
                Progress::Pending
            },
            DecoderState::WaitStart2 => {
                if byte == START2 {
                    self.buffer.push(byte);
                    self.state = DecoderState::Collect;
                } else {
                    self.state = DecoderState::WaitStart1;
                }
                Progress::Pending
            },
            DecoderState::Collect => {
                self.buffer.push(byte);
                if byte == END {
                    self.state = DecoderState::WaitStart1;
                    self.complete_len = self.buffer.len();
                    Progress::Complete
                } else if self.buffer.len() >= self.capacity {
                    self.state = DecoderState::WaitStart1;
                    self.buffer.clear();
                    Progress::Overflow
                } else {
                    Progress::Pending
                }
            },
        }
    }

    /// 最近一次完成的数据包（包含起始与结束字节）
    ///
    /// 下一个 `0x00` 起始字节到来后失效。
    pub fn packet(&self) -> &[u8] {
        &self.buffer[..self.complete_len]
    }

    /// 丢弃所有中间状态，回到 `WaitStart1`
    pub fn reset(&mut self) {
        self.state = DecoderState::WaitStart1;
        self.buffer.clear();
        self.complete_len = 0;
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}
