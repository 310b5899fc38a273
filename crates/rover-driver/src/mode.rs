//! 运行模式状态机
//!
//! 模式只由遥控器 ch3 通道的**上升沿**驱动（上一周期 < 0.5，本周期 >= 0.5）。
//! 每次切换后进入冷却期，冷却期内的上升沿被忽略，用于消除开关抖动。
//!
//! ```text
//! Idle ──▶ TerminalEcho ──▶ Persisting ──▶ Inferring ──▶ Idle
//!               │ (无存储)
//!               ▼
//!            Faulted ──▶ TerminalEcho
//! ```

use crate::indicator::{Color, IndicatorCommand, IndicatorPriority};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::sync::atomic::{AtomicI8, Ordering};
use std::time::Duration;
use tracing::info;

/// 上升沿阈值
pub const EDGE_THRESHOLD: f32 = 0.5;

/// 错误状态闪烁速度（最快）
const FAULT_BLINK_SPEED: u16 = 100;

/// 运行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(i8)]
pub enum Mode {
    /// 空闲，只解码不处理
    Idle = 0,
    /// 终端回显：以 ASCII 灰度图打印每帧
    TerminalEcho = 1,
    /// 持久化：每帧格式化后写入存储
    Persisting = 2,
    /// 推理：归一化后送入环形缓冲区并请求推理
    Inferring = 3,
    /// 存储不可用
    Faulted = -1,
}

impl Mode {
    /// 状态机的下一个模式
    pub fn next(self, storage_available: bool) -> Mode {
        match self {
            Mode::Idle => Mode::TerminalEcho,
            Mode::TerminalEcho if storage_available => Mode::Persisting,
            Mode::TerminalEcho => Mode::Faulted,
            Mode::Persisting => Mode::Inferring,
            Mode::Inferring => Mode::Idle,
            Mode::Faulted => Mode::TerminalEcho,
        }
    }

    /// 从 i8 转换，无效值返回 Idle
    pub fn from_i8(value: i8) -> Self {
        Mode::try_from(value).unwrap_or(Mode::Idle)
    }

    pub fn as_i8(self) -> i8 {
        self.into()
    }
}

/// 模式（原子版本，用于线程间共享）
#[derive(Debug)]
pub struct AtomicMode {
    inner: AtomicI8,
}

impl AtomicMode {
    pub fn new(mode: Mode) -> Self {
        Self {
            inner: AtomicI8::new(mode.as_i8()),
        }
    }

    pub fn get(&self, ordering: Ordering) -> Mode {
        Mode::from_i8(self.inner.load(ordering))
    }

    pub fn set(&self, mode: Mode, ordering: Ordering) {
        self.inner.store(mode.as_i8(), ordering);
    }
}

/// 一次被接受的模式切换
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: Mode,
    pub to: Mode,
}

impl Transition {
    /// 进入新模式时显示的指示灯命令
    pub fn indicator(&self) -> IndicatorCommand {
        let two_seconds = Duration::from_secs(2);
        match (self.from, self.to) {
            (Mode::Faulted, Mode::TerminalEcho) => {
                IndicatorCommand::solid(IndicatorPriority::High, Color::YELLOW, two_seconds)
            },
            (_, Mode::TerminalEcho) => {
                IndicatorCommand::solid(IndicatorPriority::High, Color::BLUE, two_seconds)
            },
            (_, Mode::Persisting) => {
                IndicatorCommand::blink(IndicatorPriority::High, Color::PURPLE, 500, Duration::ZERO)
            },
            (_, Mode::Inferring) => {
                IndicatorCommand::blink(IndicatorPriority::High, Color::CYAN, 500, Duration::ZERO)
            },
            (_, Mode::Idle) => {
                IndicatorCommand::solid(IndicatorPriority::High, Color::GREEN, two_seconds)
            },
            (_, Mode::Faulted) => fault_indicator(),
        }
    }
}

/// 存储不可用时的指示灯：最快速红色闪烁，直到被替换
pub fn fault_indicator() -> IndicatorCommand {
    IndicatorCommand::blink(
        IndicatorPriority::High,
        Color::RED,
        FAULT_BLINK_SPEED,
        Duration::ZERO,
    )
}

/// 模式切换的副作用
///
/// 控制线程实现此 trait，把状态机与持久化队列、推理调度器、指示灯解耦。
pub trait TransitionEffects {
    /// 离开 Persisting：请求写入线程刷新并同步
    fn flush_persistence(&mut self);

    /// 进入或离开 Inferring：清空环形缓冲区
    fn reset_inference(&mut self);

    /// 清空指示灯仲裁器并提交新命令
    fn indicate(&mut self, command: IndicatorCommand);
}

/// 模式状态机
#[derive(Debug, Clone)]
pub struct ModeController {
    mode: Mode,
    prev_signal: f32,
    cooldown: u32,
    cooldown_cycles: u32,
    storage_available: bool,
}

impl ModeController {
    /// 创建状态机
    ///
    /// 存储可用时从 Idle 启动，否则从 Faulted 启动。
    pub fn new(cooldown_cycles: u32, storage_available: bool) -> Self {
        Self {
            mode: if storage_available {
                Mode::Idle
            } else {
                Mode::Faulted
            },
            prev_signal: 0.0,
            cooldown: 0,
            cooldown_cycles,
            storage_available,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// 剩余冷却周期
    pub fn cooldown(&self) -> u32 {
        self.cooldown
    }

    pub fn storage_available(&self) -> bool {
        self.storage_available
    }

    /// 每个成功解码的帧调用一次
    ///
    /// 检测上升沿并在冷却结束时执行切换；冷却计数在周期末递减。
    pub fn step(&mut self, signal: f32, effects: &mut impl TransitionEffects) -> Option<Transition> {
        let rising = self.prev_signal < EDGE_THRESHOLD && signal >= EDGE_THRESHOLD;
        self.prev_signal = signal;

        let mut accepted = None;
        if rising && self.cooldown == 0 {
            let transition = Transition {
                from: self.mode,
                to: self.mode.next(self.storage_available),
            };

            if transition.from == Mode::Persisting {
                effects.flush_persistence();
            }
            if transition.from == Mode::Inferring || transition.to == Mode::Inferring {
                effects.reset_inference();
            }
            effects.indicate(transition.indicator());

            info!("Mode {:?} -> {:?}", transition.from, transition.to);
            self.mode = transition.to;
            self.cooldown = self.cooldown_cycles;
            accepted = Some(transition);
        }

        self.cooldown = self.cooldown.saturating_sub(1);
        accepted
    }
}
