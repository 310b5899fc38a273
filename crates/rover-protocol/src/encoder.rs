//! 数据包编码
//!
//! 用于合成数据流与测试。协议本身没有转义机制：帧头、负载或尾部中出现
//! `0xDD` 会被接收端当作结束字节，调用方需要自行避免。

use crate::header::FrameHeader;
use crate::{END, HEADER_SIZE, TRAILER_SIZE};

/// 编码一个完整数据包
///
/// 帧头按原样写出（包括 `frame_data_len`），不做一致性修正。
pub fn encode_packet(header: &FrameHeader, payload: &[u8], trailer: [u8; TRAILER_SIZE]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(HEADER_SIZE + payload.len() + TRAILER_SIZE + 1);
    packet.extend_from_slice(&header.to_bytes());
    packet.extend_from_slice(payload);
    packet.extend_from_slice(&trailer);
    packet.push(END);
    packet
}
