//! # Rover Protocol
//!
//! 深度传感器串口协议定义（无硬件依赖）
//!
//! ## 模块
//!
//! - `header`: 固定 20 字节帧头解析与编码
//! - `frame`: 深度帧（`SensorFrame`）与单位换算律
//! - `decoder`: 字节流分帧状态机
//! - `encoder`: 数据包编码（测试与合成数据流使用）
//! - `log_format`: 持久化日志格式（CSV 行与注释头）
//!
//! ## 数据包格式
//!
//! ```text
//! 0x00 0xFF | header (18 bytes) | payload (rows*cols) | trailer (2 bytes) | 0xDD
//! \_________ FrameHeader (20 bytes) _________/
//! ```
//!
//! 多字节字段使用小端字节序。

pub mod decoder;
pub mod encoder;
pub mod frame;
pub mod header;
pub mod log_format;

// 重新导出常用类型
pub use decoder::{DecoderState, FrameDecoder, Progress};
pub use encoder::encode_packet;
pub use frame::{SensorFrame, UnitLaw, parse_frame};
pub use header::FrameHeader;

use thiserror::Error;

/// 帧起始字节 1
pub const START1: u8 = 0x00;

/// 帧起始字节 2
pub const START2: u8 = 0xFF;

/// 帧结束字节
pub const END: u8 = 0xDD;

/// 帧头长度（包含两个起始字节）
pub const HEADER_SIZE: usize = 20;

/// END 之前的尾部字节数（不做校验，仅跳过）
pub const TRAILER_SIZE: usize = 2;

/// 网格边长上限（行、列均不得超过此值）
pub const MAX_SIZE: usize = 100;

/// 分帧缓冲区默认容量（字节）
pub const DEFAULT_BUFFER_CAPACITY: usize = 12_000;

/// 协议解析错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Invalid packet length: expected at least {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("Invalid resolution {rows}x{cols} (max {max})")]
    InvalidResolution { rows: usize, cols: usize, max: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProtocolError::InvalidResolution {
            rows: 0,
            cols: 4,
            max: MAX_SIZE,
        };
        assert_eq!(format!("{}", err), "Invalid resolution 0x4 (max 100)");

        let err = ProtocolError::InvalidLength {
            expected: 23,
            actual: 5,
        };
        assert!(format!("{}", err).contains("expected at least 23"));
    }

    #[test]
    fn test_frame_markers_are_distinct() {
        assert_ne!(START1, START2);
        assert_ne!(START1, END);
        assert_ne!(START2, END);
    }
}
