//! 深度帧定义与负载解析

use crate::header::FrameHeader;
use crate::{HEADER_SIZE, ProtocolError, TRAILER_SIZE};

/// 像素字节到毫米的换算律
///
/// 传感器通过 `AT+UNIT` 配置输出单位：
/// - `Linear { unit }`: 距离 = byte × unit（毫米）
/// - `Nonlinear`: 传感器原生律 byte = 5.1·√d，反算为 d = (byte / 5.1)²
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(tag = "law", rename_all = "snake_case")
)]
pub enum UnitLaw {
    Linear { unit: u16 },
    Nonlinear,
}

impl Default for UnitLaw {
    fn default() -> Self {
        UnitLaw::Linear { unit: 10 }
    }
}

impl UnitLaw {
    /// 单个像素字节换算为毫米
    #[inline]
    pub fn to_millimeters(self, byte: u8) -> f32 {
        match self {
            UnitLaw::Linear { unit } => f32::from(byte) * f32::from(unit),
            UnitLaw::Nonlinear => {
                let normalized = f32::from(byte) / 5.1;
                normalized * normalized
            },
        }
    }
}

/// 一帧完整的深度读数
///
/// `rows × cols` 网格，按行优先存储，单位为毫米。
/// 每次成功解码创建一帧，只在当前控制周期内有效，需要跨周期保留时由
/// 环形缓冲区或持久化记录显式复制。
#[derive(Debug, Clone, PartialEq)]
pub struct SensorFrame {
    /// 原始帧头（分辨率之外的元数据不解释）
    pub header: FrameHeader,
    /// 本帧使用的单位换算律
    pub unit: UnitLaw,
    rows: usize,
    cols: usize,
    samples: Vec<f32>,
}

impl SensorFrame {
    /// 由已换算的样本构建帧
    ///
    /// `samples.len()` 必须等于 `rows * cols`。
    pub fn from_samples(
        header: FrameHeader,
        unit: UnitLaw,
        samples: Vec<f32>,
    ) -> Result<Self, ProtocolError> {
        let rows = header.rows as usize;
        let cols = header.cols as usize;
        if samples.len() != rows * cols {
            return Err(ProtocolError::InvalidLength {
                expected: rows * cols,
                actual: samples.len(),
            });
        }
        Ok(Self {
            header,
            unit,
            rows,
            cols,
            samples,
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// 行优先的全部样本
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// 读取单个样本（越界返回 None）
    pub fn get(&self, row: usize, col: usize) -> Option<f32> {
        if row >= self.rows || col >= self.cols {
            return None;
        }
        self.samples.get(row * self.cols + col).copied()
    }

    /// 按行迭代
    pub fn iter_rows(&self) -> impl Iterator<Item = &[f32]> {
        self.samples.chunks(self.cols)
    }
}

/// 解析一个完整数据包为深度帧
///
/// 负载从帧头之后开始，到 2 字节尾部之前结束（尾部和 END 不参与解析，
/// 尾部内容不做校验）。负载按行优先映射到声明的网格：
/// - 超出 `rows × cols` 的字节被忽略
/// - 不足的样本保持 0 毫米
///
/// # 错误
/// - `InvalidLength`: 数据包短于帧头
/// - `InvalidResolution`: 声明的行/列为 0 或超过 `max_size`
pub fn parse_frame(
    packet: &[u8],
    unit: UnitLaw,
    max_size: usize,
) -> Result<SensorFrame, ProtocolError> {
    let header = FrameHeader::parse(packet)?;
    header.validate(max_size)?;

    let payload_end = packet
        .len()
        .saturating_sub(TRAILER_SIZE + 1)
        .max(HEADER_SIZE);
    let payload = &packet[HEADER_SIZE..payload_end];

    let mut samples = vec![0.0f32; header.sample_count()];
    for (sample, &byte) in samples.iter_mut().zip(payload) {
        *sample = unit.to_millimeters(byte);
    }

    SensorFrame::from_samples(header, unit, samples)
}
