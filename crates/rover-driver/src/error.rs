//! 驱动层错误类型定义

use rover_io::TransportError;
use thiserror::Error;

/// 驱动层错误类型
#[derive(Error, Debug)]
pub enum DriverError {
    /// 传输层错误
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// 持久化通道已关闭（写入线程退出）
    #[error("Persistence channel closed")]
    ChannelClosed,

    /// 持久化通道已满
    #[error("Persistence channel full")]
    ChannelFull,

    /// 工作线程错误
    #[error("IO thread error: {0}")]
    IoThread(String),

    /// 无效输入
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
