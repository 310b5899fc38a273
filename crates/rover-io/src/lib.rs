//! # Rover IO Layer
//!
//! 传感器串口链路的硬件抽象层，提供统一的字节源接口。
//!
//! - [`ByteSource`]: 零超时读取单字节 + 丢弃积压输入
//! - [`ReaderSource`]: 后台线程读取任意 `std::io::Read`（串口设备文件、录制数据）
//! - [`ScriptedSource`]: 可在运行中注入字节的脚本化字节源（测试/仿真）

use thiserror::Error;

pub mod reader;
pub mod scripted;

pub use reader::{ReaderConfig, ReaderSource};
pub use scripted::{ScriptedFeed, ScriptedSource};

/// 传输层统一错误类型
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    /// 字节源已关闭且没有剩余数据
    #[error("Byte source disconnected")]
    Disconnected,
}

/// 字节源
///
/// 对应串口驱动的非阻塞读取：每次调用最多返回一个字节，没有数据时立即返回
/// `Ok(None)`（等效于零超时），由调用方在循环中按节拍重试。
pub trait ByteSource {
    /// 零超时读取一个字节
    fn try_read(&mut self) -> Result<Option<u8>, TransportError>;

    /// 丢弃所有已到达但尚未读取的字节，返回丢弃数量
    ///
    /// 每成功解码一帧后调用，保证处理的总是最新数据而不是积压数据。
    fn discard_pending(&mut self) -> usize;
}

impl<T: ByteSource + ?Sized> ByteSource for Box<T> {
    fn try_read(&mut self) -> Result<Option<u8>, TransportError> {
        (**self).try_read()
    }

    fn discard_pending(&mut self) -> usize {
        (**self).discard_pending()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_display() {
        assert_eq!(
            format!("{}", TransportError::Disconnected),
            "Byte source disconnected"
        );
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        let err: TransportError = io.into();
        assert!(format!("{}", err).contains("IO Error"));
    }

    #[test]
    fn test_boxed_source_delegates() {
        let (source, feed) = ScriptedSource::new();
        let mut boxed: Box<dyn ByteSource + Send> = Box::new(source);
        feed.push(&[1, 2]);
        assert_eq!(boxed.try_read().unwrap(), Some(1));
        assert_eq!(boxed.discard_pending(), 1);
        assert_eq!(boxed.try_read().unwrap(), None);
    }
}
