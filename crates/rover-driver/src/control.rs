//! 遥控输入
//!
//! 控制线程每个周期采样一次遥控器：转向、油门和模式切换通道（ch3）。

use crate::indicator::{Color, IndicatorCommand, IndicatorPriority};
use arc_swap::ArcSwap;
use std::sync::Arc;
use std::time::Duration;

/// 油门死区，绝对值不超过此值视为静止
pub const THROTTLE_DEADBAND: f32 = 0.1;

/// 单次遥控采样
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ControlSample {
    /// 转向，-1.0..=1.0
    pub steering: f32,
    /// 油门，-1.0..=1.0
    pub throttle: f32,
    /// 模式切换通道，0.0..=1.0
    pub mode_signal: f32,
}

impl ControlSample {
    /// 创建采样并钳位到合法范围，NaN 视为 0
    pub fn new(steering: f32, throttle: f32, mode_signal: f32) -> Self {
        let clean = |v: f32, lo: f32, hi: f32| if v.is_nan() { 0.0 } else { v.clamp(lo, hi) };
        Self {
            steering: clean(steering, -1.0, 1.0),
            throttle: clean(throttle, -1.0, 1.0),
            mode_signal: clean(mode_signal, 0.0, 1.0),
        }
    }

    /// 行驶状态对应的指示灯命令
    ///
    /// 前进为蓝色，后退为红色，静止为黄色；普通优先级，常驻。
    pub fn drive_status(&self) -> IndicatorCommand {
        let color = if self.throttle > THROTTLE_DEADBAND {
            Color::BLUE
        } else if self.throttle < -THROTTLE_DEADBAND {
            Color::RED
        } else {
            Color::YELLOW
        };
        IndicatorCommand::solid(IndicatorPriority::Normal, color, Duration::ZERO)
    }
}

/// 遥控输入源
pub trait ControlSource {
    fn sample(&mut self) -> ControlSample;
}

impl<T: ControlSource + ?Sized> ControlSource for Box<T> {
    fn sample(&mut self) -> ControlSample {
        (**self).sample()
    }
}

/// 共享遥控输入
///
/// 任意线程通过 [`SharedControls::set`] 发布最新采样（例如串口命令 `CONTROLS:`），
/// 控制线程无锁读取。克隆后的句柄指向同一份数据。
#[derive(Debug, Clone, Default)]
pub struct SharedControls {
    inner: Arc<ArcSwap<ControlSample>>,
}

impl SharedControls {
    pub fn new(initial: ControlSample) -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(initial)),
        }
    }

    /// 发布最新采样
    pub fn set(&self, sample: ControlSample) {
        self.inner.store(Arc::new(sample));
    }

    /// 读取最新采样
    pub fn get(&self) -> ControlSample {
        **self.inner.load()
    }
}

impl ControlSource for SharedControls {
    fn sample(&mut self) -> ControlSample {
        self.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_is_clamped() {
        let s = ControlSample::new(2.0, -3.0, f32::NAN);
        assert_eq!(s.steering, 1.0);
        assert_eq!(s.throttle, -1.0);
        assert_eq!(s.mode_signal, 0.0);
    }

    #[test]
    fn test_drive_status_colors() {
        assert_eq!(ControlSample::new(0.0, 0.5, 0.0).drive_status().color, Color::BLUE);
        assert_eq!(ControlSample::new(0.0, -0.5, 0.0).drive_status().color, Color::RED);
        assert_eq!(ControlSample::new(0.0, 0.1, 0.0).drive_status().color, Color::YELLOW);
        assert_eq!(ControlSample::new(0.0, -0.1, 0.0).drive_status().color, Color::YELLOW);

        let cmd = ControlSample::default().drive_status();
        assert_eq!(cmd.priority, IndicatorPriority::Normal);
        assert!(cmd.is_indefinite());
    }

    #[test]
    fn test_shared_controls_clone_sees_updates() {
        let controls = SharedControls::default();
        let mut reader = controls.clone();
        assert_eq!(reader.sample(), ControlSample::default());

        controls.set(ControlSample::new(0.25, 0.5, 1.0));
        assert_eq!(reader.sample(), ControlSample::new(0.25, 0.5, 1.0));
    }
}
