//! 帧头解析
//!
//! 帧头位于数据包起始处，固定 20 字节，字段布局与传感器固件的 packed 结构一致。

use crate::{HEADER_SIZE, ProtocolError, START1, START2};

/// 传感器帧头
///
/// 除分辨率外的字段对流水线来说都是不透明的元数据，原样保留以便诊断。
///
/// # 字节布局（小端）
///
/// | 偏移 | 长度 | 字段 |
/// |------|------|------|
/// | 0    | 2    | `frame_begin_flag`（0x00 0xFF） |
/// | 2    | 2    | `frame_data_len` |
/// | 4    | 1    | 保留 |
/// | 5    | 1    | `output_mode` |
/// | 6    | 1    | `sensor_temp` |
/// | 7    | 1    | `driver_temp` |
/// | 8    | 4    | `exposure_time` |
/// | 12   | 1    | `error_code` |
/// | 13   | 1    | 保留 |
/// | 14   | 1    | `rows` |
/// | 15   | 1    | `cols` |
/// | 16   | 2    | `frame_id` |
/// | 18   | 1    | `isp_version` |
/// | 19   | 1    | 保留 |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FrameHeader {
    pub frame_begin_flag: u16,
    pub frame_data_len: u16,
    pub output_mode: u8,
    pub sensor_temp: u8,
    pub driver_temp: u8,
    pub exposure_time: u32,
    pub error_code: u8,
    /// 声明的行数
    pub rows: u8,
    /// 声明的列数
    pub cols: u8,
    pub frame_id: u16,
    pub isp_version: u8,
}

impl FrameHeader {
    /// 创建只声明分辨率的帧头（其余字段为 0）
    pub fn with_resolution(rows: u8, cols: u8) -> Self {
        Self {
            frame_begin_flag: u16::from_le_bytes([START1, START2]),
            rows,
            cols,
            ..Default::default()
        }
    }

    /// 从数据包起始处解析帧头
    ///
    /// 只检查长度，不检查分辨率；分辨率检查见 [`FrameHeader::validate`]。
    pub fn parse(packet: &[u8]) -> Result<Self, ProtocolError> {
        if packet.len() < HEADER_SIZE {
            return Err(ProtocolError::InvalidLength {
                expected: HEADER_SIZE,
                actual: packet.len(),
            });
        }

        let b = &packet[..HEADER_SIZE];
        Ok(Self {
            frame_begin_flag: u16::from_le_bytes([b[0], b[1]]),
            frame_data_len: u16::from_le_bytes([b[2], b[3]]),
            output_mode: b[5],
            sensor_temp: b[6],
            driver_temp: b[7],
            exposure_time: u32::from_le_bytes([b[8], b[9], b[10], b[11]]),
            error_code: b[12],
            rows: b[14],
            cols: b[15],
            frame_id: u16::from_le_bytes([b[16], b[17]]),
            isp_version: b[18],
        })
    }

    /// 校验声明的分辨率
    ///
    /// 行、列为 0 或超过 `max_size` 时返回 `InvalidResolution`。
    pub fn validate(&self, max_size: usize) -> Result<(), ProtocolError> {
        let rows = self.rows as usize;
        let cols = self.cols as usize;
        if rows == 0 || cols == 0 || rows > max_size || cols > max_size {
            return Err(ProtocolError::InvalidResolution {
                rows,
                cols,
                max: max_size,
            });
        }
        Ok(())
    }

    /// 声明的样本数（rows × cols）
    pub fn sample_count(&self) -> usize {
        self.rows as usize * self.cols as usize
    }

    /// 编码为 20 字节
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut b = [0u8; HEADER_SIZE];
        b[0..2].copy_from_slice(&self.frame_begin_flag.to_le_bytes());
        b[2..4].copy_from_slice(&self.frame_data_len.to_le_bytes());
        b[5] = self.output_mode;
        b[6] = self.sensor_temp;
        b[7] = self.driver_temp;
        b[8..12].copy_from_slice(&self.exposure_time.to_le_bytes());
        b[12] = self.error_code;
        b[14] = self.rows;
        b[15] = self.cols;
        b[16..18].copy_from_slice(&self.frame_id.to_le_bytes());
        b[18] = self.isp_version;
        b
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MAX_SIZE;

    #[test]
    fn test_parse_resolution_offsets() {
        let mut raw = [0u8; HEADER_SIZE];
        raw[0] = START1;
        raw[1] = START2;
        raw[14] = 25;
        raw[15] = 30;
        raw[16] = 0x34;
        raw[17] = 0x12;

        let header = FrameHeader::parse(&raw).unwrap();
        assert_eq!(header.rows, 25);
        assert_eq!(header.cols, 30);
        assert_eq!(header.frame_id, 0x1234);
        assert_eq!(header.frame_begin_flag, 0xFF00);
        assert_eq!(header.sample_count(), 750);
    }

    #[test]
    fn test_parse_too_short() {
        let err = FrameHeader::parse(&[0x00, 0xFF, 0x01]).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::InvalidLength {
                expected: HEADER_SIZE,
                actual: 3
            }
        );
    }

    #[test]
    fn test_validate_bounds() {
        assert!(FrameHeader::with_resolution(1, 1).validate(MAX_SIZE).is_ok());
        assert!(FrameHeader::with_resolution(100, 100).validate(MAX_SIZE).is_ok());
        assert!(FrameHeader::with_resolution(0, 10).validate(MAX_SIZE).is_err());
        assert!(FrameHeader::with_resolution(10, 0).validate(MAX_SIZE).is_err());
        assert!(FrameHeader::with_resolution(101, 10).validate(MAX_SIZE).is_err());
        assert!(FrameHeader::with_resolution(10, 255).validate(MAX_SIZE).is_err());
    }

    #[test]
    fn test_bytes_roundtrip_keeps_metadata() {
        let header = FrameHeader {
            frame_data_len: 640,
            output_mode: 1,
            sensor_temp: 40,
            driver_temp: 41,
            exposure_time: 0x0102_0304,
            error_code: 0,
            frame_id: 77,
            isp_version: 3,
            ..FrameHeader::with_resolution(25, 25)
        };
        assert_eq!(FrameHeader::parse(&header.to_bytes()).unwrap(), header);
    }
}
