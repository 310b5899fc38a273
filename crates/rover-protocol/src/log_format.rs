//! 持久化日志格式
//!
//! 纯文本文件：若干 `#` 开头的注释头，之后每帧一行 CSV：
//!
//! ```text
//! # Depth Sensor Log
//! # Binning Factor: 4
//! # Frame,Steering(millis),Throttle(millis),Width,Height,Data...
//! 0,250,-1000,2,2,50,100,150,200
//! ```
//!
//! 转向与油门以整数千分值记录，避免在热路径上格式化浮点数。

use crate::frame::SensorFrame;
use std::fmt::Write;

/// 日志格式名称
pub const FORMAT_NAME: &str = "Depth Sensor Log";

/// 列说明
pub const COLUMN_LEGEND: &str = "Frame,Steering(millis),Throttle(millis),Width,Height,Data...";

/// 生成文件头（三行，均以换行结尾）
pub fn header(binning_factor: u32) -> String {
    format!("# {FORMAT_NAME}\n# Binning Factor: {binning_factor}\n# {COLUMN_LEGEND}\n")
}

/// 归一化控制量转换为整数千分值（向零截断）
#[inline]
pub fn to_millis(value: f32) -> i32 {
    (value * 1000.0) as i32
}

/// 格式化一帧为一行 CSV（以换行结尾）
///
/// 列顺序：帧序号、转向千分值、油门千分值、宽（列数）、高（行数）、
/// 行优先的全部毫米样本（向零截断为整数）。
pub fn format_row(frame_index: u64, steering: f32, throttle: f32, frame: &SensorFrame) -> String {
    // 每个样本最多 6 字符（",25500"）
    let mut line = String::with_capacity(32 + frame.samples().len() * 6);
    let _ = write!(
        line,
        "{},{},{},{},{}",
        frame_index,
        to_millis(steering),
        to_millis(throttle),
        frame.cols(),
        frame.rows()
    );
    for &sample in frame.samples() {
        let _ = write!(line, ",{}", sample as i32);
    }
    line.push('\n');
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::UnitLaw;
    use crate::header::FrameHeader;

    #[test]
    fn test_header_lines() {
        let h = header(4);
        let lines: Vec<&str> = h.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "# Depth Sensor Log");
        assert_eq!(lines[1], "# Binning Factor: 4");
        assert!(lines[2].starts_with("# Frame,Steering(millis)"));
        assert!(h.ends_with('\n'));
    }

    #[test]
    fn test_to_millis_truncates() {
        assert_eq!(to_millis(0.25), 250);
        assert_eq!(to_millis(-1.0), -1000);
        assert_eq!(to_millis(0.0019), 1);
        assert_eq!(to_millis(-0.0019), -1);
    }

    #[test]
    fn test_format_row() {
        let frame = SensorFrame::from_samples(
            FrameHeader::with_resolution(2, 3),
            UnitLaw::Linear { unit: 10 },
            vec![10.0, 20.0, 30.0, 40.0, 50.0, 60.9],
        )
        .unwrap();

        let row = format_row(7, 0.5, -0.25, &frame);
        assert_eq!(row, "7,500,-250,3,2,10,20,30,40,50,60\n");
    }
}
