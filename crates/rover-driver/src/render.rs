//! 终端 ASCII 深度图
//!
//! 每个样本按深度映射到 10 级字符，近处稀疏、远处密集。
//! 输出以 `FRAME_START` / `FRAME_END` 行包围，便于主机侧脚本切分。

use rover_protocol::SensorFrame;
use std::io::{self, Write};

/// 由近到远的字符
pub const DEPTH_RAMP: &[u8] = b" .:-=+*#%@";

/// 映射范围下限（毫米）
pub const MIN_DEPTH_MM: f32 = 50.0;

/// 映射范围上限（毫米）
pub const MAX_DEPTH_MM: f32 = 1000.0;

pub const FRAME_START: &str = "FRAME_START";
pub const FRAME_END: &str = "FRAME_END";

/// 单个深度值对应的字符
#[inline]
pub fn depth_char(mm: f32) -> u8 {
    let d = if mm.is_nan() { MIN_DEPTH_MM } else { mm.clamp(MIN_DEPTH_MM, MAX_DEPTH_MM) };
    let norm = (d - MIN_DEPTH_MM) / (MAX_DEPTH_MM - MIN_DEPTH_MM);
    let idx = ((norm * (DEPTH_RAMP.len() - 1) as f32) as usize).min(DEPTH_RAMP.len() - 1);
    DEPTH_RAMP[idx]
}

/// 把一帧渲染到 `out`
pub fn render_ascii(frame: &SensorFrame, out: &mut impl Write) -> io::Result<()> {
    let mut text = Vec::with_capacity((frame.cols() + 1) * frame.rows() + 32);
    text.extend_from_slice(FRAME_START.as_bytes());
    text.push(b'\n');
    for row in frame.iter_rows() {
        text.extend(row.iter().map(|&mm| depth_char(mm)));
        text.push(b'\n');
    }
    text.extend_from_slice(FRAME_END.as_bytes());
    text.push(b'\n');

    out.write_all(&text)?;
    out.flush()
}
