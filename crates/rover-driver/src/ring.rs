//! 模型输入与环形帧缓冲区
//!
//! 推理模式下每帧先转换成模型输入（旋转、裁剪/补零、归一化），
//! 再写入固定容量的环形缓冲区。缓冲区满后覆盖最旧的帧。

use rover_protocol::SensorFrame;

/// 深度图旋转方向（作用于原始 rows × cols 网格）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rotation {
    None,
    /// 顺时针 90°（传感器侧装）
    #[default]
    Clockwise90,
    Rotate180,
    CounterClockwise90,
}

/// 模型输入转换参数
#[derive(Debug, Clone, PartialEq)]
pub struct ModelInputConfig {
    /// 模型输入边长（side × side）
    pub side: usize,
    pub rotation: Rotation,
    /// 归一化上限（毫米），超过则钳位为 1.0
    pub max_depth_mm: f32,
}

impl Default for ModelInputConfig {
    fn default() -> Self {
        Self {
            side: 24,
            rotation: Rotation::Clockwise90,
            max_depth_mm: 1000.0,
        }
    }
}

/// 归一化后的单通道模型输入帧（行优先）
#[derive(Debug, Clone, PartialEq)]
pub struct ModelFrame {
    side: usize,
    data: Vec<f32>,
}

impl ModelFrame {
    /// 从数据构造；长度不足 side² 补零，超出截断
    pub fn new(side: usize, mut data: Vec<f32>) -> Self {
        data.resize(side * side, 0.0);
        Self { side, data }
    }

    pub fn zeros(side: usize) -> Self {
        Self::new(side, Vec::new())
    }

    pub fn side(&self) -> usize {
        self.side
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn get(&self, row: usize, col: usize) -> Option<f32> {
        if row < self.side && col < self.side {
            self.data.get(row * self.side + col).copied()
        } else {
            None
        }
    }
}

/// 把传感器帧转换成模型输入
///
/// 先按 `rotation` 旋转，再取左上角 side × side（不足补零），
/// 最后按 `clamp(mm, 0, max) / max` 归一化到 0..=1。
pub fn to_model_input(frame: &SensorFrame, config: &ModelInputConfig) -> ModelFrame {
    let rows = frame.rows();
    let cols = frame.cols();
    let side = config.side;
    let max = if config.max_depth_mm > 0.0 {
        config.max_depth_mm
    } else {
        1.0
    };

    // 旋转后的尺寸
    let (out_rows, out_cols) = match config.rotation {
        Rotation::None | Rotation::Rotate180 => (rows, cols),
        Rotation::Clockwise90 | Rotation::CounterClockwise90 => (cols, rows),
    };

    let mut data = vec![0.0f32; side * side];
    for r in 0..side.min(out_rows) {
        for c in 0..side.min(out_cols) {
            let (src_r, src_c) = match config.rotation {
                Rotation::None => (r, c),
                Rotation::Clockwise90 => (rows - 1 - c, r),
                Rotation::Rotate180 => (rows - 1 - r, cols - 1 - c),
                Rotation::CounterClockwise90 => (c, cols - 1 - r),
            };
            let mm = frame.get(src_r, src_c).unwrap_or(0.0);
            data[r * side + c] = mm.clamp(0.0, max) / max;
        }
    }

    ModelFrame { side, data }
}

/// 固定容量环形帧缓冲区
///
/// 不加锁；由 [`crate::InferenceScheduler`] 在互斥锁内持有。
#[derive(Debug, Clone)]
pub struct RingFrameBuffer {
    slots: Vec<ModelFrame>,
    capacity: usize,
    /// 下一次写入位置
    cursor: usize,
}

impl RingFrameBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: Vec::with_capacity(capacity),
            capacity,
            cursor: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.slots.len() == self.capacity
    }

    /// 追加一帧，满时覆盖最旧的帧
    pub fn push(&mut self, frame: ModelFrame) {
        if self.slots.len() < self.capacity {
            self.slots.push(frame);
        } else {
            self.slots[self.cursor] = frame;
        }
        self.cursor = (self.cursor + 1) % self.capacity;
    }

    /// 按时间顺序（最旧在前）复制全部帧
    pub fn window(&self) -> Vec<ModelFrame> {
        if !self.is_full() {
            return self.slots.clone();
        }
        let mut out = Vec::with_capacity(self.capacity);
        out.extend_from_slice(&self.slots[self.cursor..]);
        out.extend_from_slice(&self.slots[..self.cursor]);
        out
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.cursor = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rover_protocol::{FrameHeader, UnitLaw};

    fn marker(i: usize) -> ModelFrame {
        ModelFrame::new(1, vec![i as f32])
    }

    fn markers(window: &[ModelFrame]) -> Vec<usize> {
        window.iter().map(|f| f.data()[0] as usize).collect()
    }

    /// rows × cols 帧，样本值 = 10 * (r * cols + c + 1) 毫米
    fn grid(rows: u8, cols: u8) -> SensorFrame {
        let samples = (0..rows as usize * cols as usize)
            .map(|i| 10.0 * (i as f32 + 1.0))
            .collect();
        SensorFrame::from_samples(
            FrameHeader::with_resolution(rows, cols),
            UnitLaw::default(),
            samples,
        )
        .unwrap()
    }

    #[test]
    fn test_window_after_wraparound() {
        let mut ring = RingFrameBuffer::new(20);
        for i in 1..=25 {
            ring.push(marker(i));
        }
        assert!(ring.is_full());
        assert_eq!(markers(&ring.window()), (6..=25).collect::<Vec<_>>());
    }

    #[test]
    fn test_window_before_full() {
        let mut ring = RingFrameBuffer::new(4);
        ring.push(marker(1));
        ring.push(marker(2));
        assert_eq!(markers(&ring.window()), vec![1, 2]);

        ring.clear();
        assert!(ring.is_empty());
        ring.push(marker(9));
        assert_eq!(markers(&ring.window()), vec![9]);
    }

    #[test]
    fn test_no_rotation_crop_and_pad() {
        let frame = grid(2, 3);
        let config = ModelInputConfig {
            side: 4,
            rotation: Rotation::None,
            max_depth_mm: 100.0,
        };
        let input = to_model_input(&frame, &config);
        assert_eq!(input.side(), 4);
        assert_eq!(input.get(0, 0), Some(0.1));
        assert_eq!(input.get(1, 2), Some(0.6));
        // 补零区域
        assert_eq!(input.get(0, 3), Some(0.0));
        assert_eq!(input.get(3, 3), Some(0.0));
        assert_eq!(input.get(4, 0), None);
    }

    #[test]
    fn test_clockwise_rotation() {
        // 原始 2 × 3:
        //   10 20 30
        //   40 50 60
        // 顺时针旋转后 3 × 2:
        //   40 10
        //   50 20
        //   60 30
        let frame = grid(2, 3);
        let config = ModelInputConfig {
            side: 3,
            rotation: Rotation::Clockwise90,
            max_depth_mm: 100.0,
        };
        let input = to_model_input(&frame, &config);
        assert_eq!(input.get(0, 0), Some(0.4));
        assert_eq!(input.get(0, 1), Some(0.1));
        assert_eq!(input.get(2, 0), Some(0.6));
        assert_eq!(input.get(2, 1), Some(0.3));
        assert_eq!(input.get(0, 2), Some(0.0));
    }

    #[test]
    fn test_other_rotations() {
        let frame = grid(2, 3);
        let cfg = |rotation| ModelInputConfig {
            side: 3,
            rotation,
            max_depth_mm: 100.0,
        };

        let half = to_model_input(&frame, &cfg(Rotation::Rotate180));
        assert_eq!(half.get(0, 0), Some(0.6));
        assert_eq!(half.get(1, 2), Some(0.1));

        let ccw = to_model_input(&frame, &cfg(Rotation::CounterClockwise90));
        assert_eq!(ccw.get(0, 0), Some(0.3));
        assert_eq!(ccw.get(2, 1), Some(0.4));
    }

    #[test]
    fn test_normalization_clamps() {
        let frame = SensorFrame::from_samples(
            FrameHeader::with_resolution(1, 2),
            UnitLaw::default(),
            vec![2550.0, 0.0],
        )
        .unwrap();
        let input = to_model_input(
            &frame,
            &ModelInputConfig {
                side: 2,
                rotation: Rotation::None,
                max_depth_mm: 1000.0,
            },
        );
        assert_eq!(input.data(), &[1.0, 0.0, 0.0, 0.0]);
    }
}
