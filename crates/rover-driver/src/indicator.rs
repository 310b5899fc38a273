//! 状态指示灯仲裁模块
//!
//! 多个来源（模式切换、行驶状态）同时请求指示灯，[`IndicatorArbiter`] 按优先级
//! 决定当前由谁占用灯。只有控制线程会调用仲裁器，因此不需要任何锁。
//!
//! # 规则
//!
//! - 新命令的优先级低于当前**常驻**命令（`duration == 0`）时直接拒绝
//! - 当前命令有剩余时长时，低优先级命令进入等待队列，待其到期后接管
//! - 队列中每个优先级最多一条：同级新命令覆盖等待中的旧命令，到期后只显示最新状态
//! - 队列满时，只有当新命令的优先级高于队列中最低优先级条目时才替换该条目
//! - `update()` 先处理到期，再把队列中优先级最高的条目提升为当前命令
//! - `clear()` 清空队列并回到空闲基线（静态黄色）

use num_enum::{IntoPrimitive, TryFromPrimitive};
use smallvec::SmallVec;
use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// 等待队列默认容量
pub const DEFAULT_QUEUE_CAPACITY: usize = 10;

/// 指示灯命令优先级
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum IndicatorPriority {
    /// 空闲基线
    Low = 0,
    /// 行驶状态
    Normal = 1,
    /// 模式切换
    High = 2,
    /// 保留给紧急告警
    Critical = 3,
}

/// 灯效编号
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum PatternId {
    Static = 0,
    Blink = 1,
    Breath = 2,
}

impl Default for PatternId {
    fn default() -> Self {
        Self::Static
    }
}

/// 24 位 RGB 颜色
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Color(pub u32);

impl Color {
    pub const OFF: Color = Color(0x000000);
    pub const RED: Color = Color(0xFF0000);
    pub const GREEN: Color = Color(0x00FF00);
    pub const BLUE: Color = Color(0x0000FF);
    pub const YELLOW: Color = Color(0xFFFF00);
    pub const PURPLE: Color = Color(0x400080);
    pub const CYAN: Color = Color(0x00FFFF);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Color(((r as u32) << 16) | ((g as u32) << 8) | b as u32)
    }

    pub const fn r(self) -> u8 {
        (self.0 >> 16) as u8
    }

    pub const fn g(self) -> u8 {
        (self.0 >> 8) as u8
    }

    pub const fn b(self) -> u8 {
        self.0 as u8
    }

    /// 按亮度缩放（0.0..=1.0）
    pub fn scale(self, brightness: f32) -> Self {
        let k = brightness.clamp(0.0, 1.0);
        let ch = |v: u8| (f32::from(v) * k).round() as u8;
        Color::rgb(ch(self.r()), ch(self.g()), ch(self.b()))
    }
}

impl fmt::Debug for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:06X}", self.0 & 0xFF_FFFF)
    }
}

/// 指示灯命令
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndicatorCommand {
    pub priority: IndicatorPriority,
    pub pattern: PatternId,
    pub color: Color,
    /// 灯效速度（毫秒/周期），0 表示不修改设备当前速度
    pub speed: u16,
    /// 保持时长，`Duration::ZERO` 表示直到被替换
    pub duration: Duration,
}

impl IndicatorCommand {
    /// 空闲基线：低优先级静态黄色
    pub const fn baseline() -> Self {
        Self {
            priority: IndicatorPriority::Low,
            pattern: PatternId::Static,
            color: Color::YELLOW,
            speed: 0,
            duration: Duration::ZERO,
        }
    }

    /// 静态常亮
    pub const fn solid(priority: IndicatorPriority, color: Color, duration: Duration) -> Self {
        Self {
            priority,
            pattern: PatternId::Static,
            color,
            speed: 0,
            duration,
        }
    }

    /// 闪烁
    pub const fn blink(
        priority: IndicatorPriority,
        color: Color,
        speed: u16,
        duration: Duration,
    ) -> Self {
        Self {
            priority,
            pattern: PatternId::Blink,
            color,
            speed,
            duration,
        }
    }

    /// 是否常驻（直到被替换）
    pub fn is_indefinite(&self) -> bool {
        self.duration.is_zero()
    }
}

impl Default for IndicatorCommand {
    fn default() -> Self {
        Self::baseline()
    }
}

/// 指示灯设备抽象
pub trait IndicatorDevice {
    fn set_pattern(&mut self, pattern: PatternId);
    fn set_color(&mut self, color: Color);
    fn set_speed(&mut self, speed: u16);
}

impl<T: IndicatorDevice + ?Sized> IndicatorDevice for Box<T> {
    fn set_pattern(&mut self, pattern: PatternId) {
        (**self).set_pattern(pattern)
    }

    fn set_color(&mut self, color: Color) {
        (**self).set_color(color)
    }

    fn set_speed(&mut self, speed: u16) {
        (**self).set_speed(speed)
    }
}

/// 指示灯优先级仲裁器
pub struct IndicatorArbiter<D> {
    device: D,
    active: IndicatorCommand,
    started_at: Instant,
    pending: SmallVec<[IndicatorCommand; DEFAULT_QUEUE_CAPACITY]>,
    capacity: usize,
}

impl<D: IndicatorDevice> IndicatorArbiter<D> {
    /// 创建仲裁器，设备立即进入空闲基线
    pub fn new(device: D) -> Self {
        Self::with_capacity(device, DEFAULT_QUEUE_CAPACITY)
    }

    /// 指定等待队列容量
    pub fn with_capacity(device: D, capacity: usize) -> Self {
        let mut arbiter = Self {
            device,
            active: IndicatorCommand::baseline(),
            started_at: Instant::now(),
            pending: SmallVec::new(),
            capacity: capacity.max(1),
        };
        arbiter.clear();
        arbiter
    }

    /// 提交命令
    ///
    /// # 返回
    ///
    /// - `true`: 命令已进入等待队列（或覆盖了同级的等待命令），下一次 `update()` 时参与仲裁
    /// - `false`: 命令被拒绝（低于常驻命令，或队列已满且无可替换条目）
    pub fn submit(&mut self, command: IndicatorCommand) -> bool {
        if command.priority < self.active.priority && self.active.is_indefinite() {
            trace!(
                "Indicator command {:?} rejected by active {:?}",
                command.priority, self.active.priority
            );
            return false;
        }

        if let Some(queued) = self.pending.iter_mut().find(|q| q.priority == command.priority) {
            *queued = command;
            return true;
        }

        if self.pending.len() >= self.capacity {
            let mut lowest = 0;
            for (i, queued) in self.pending.iter().enumerate() {
                if queued.priority < self.pending[lowest].priority {
                    lowest = i;
                }
            }
            if command.priority <= self.pending[lowest].priority {
                debug!("Indicator queue full, command {:?} dropped", command.priority);
                return false;
            }
            self.pending.remove(lowest);
        }

        self.pending.push(command);
        true
    }

    /// 周期更新：处理到期并提升最高优先级的等待命令
    pub fn update(&mut self, now: Instant) {
        if !self.active.is_indefinite()
            && now.saturating_duration_since(self.started_at) >= self.active.duration
        {
            trace!("Indicator command {:?} expired", self.active.priority);
            self.activate(IndicatorCommand::baseline(), now);
        }

        let Some(best) = self.highest_pending() else {
            return;
        };

        if self.pending[best].priority >= self.active.priority {
            let winner = self.pending.remove(best);
            self.activate(winner, now);
        }
    }

    /// 清空等待队列，回到空闲基线
    pub fn clear(&mut self) {
        self.pending.clear();
        self.activate(IndicatorCommand::baseline(), Instant::now());
    }

    /// 当前占用指示灯的命令
    pub fn active(&self) -> &IndicatorCommand {
        &self.active
    }

    /// 等待队列（按提交顺序）
    pub fn pending(&self) -> &[IndicatorCommand] {
        &self.pending
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    fn highest_pending(&self) -> Option<usize> {
        let mut best: Option<usize> = None;
        for (i, queued) in self.pending.iter().enumerate() {
            match best {
                Some(b) if queued.priority <= self.pending[b].priority => {},
                _ => best = Some(i),
            }
        }
        best
    }

    fn activate(&mut self, command: IndicatorCommand, now: Instant) {
        self.device.set_pattern(command.pattern);
        self.device.set_color(command.color);
        if command.speed > 0 {
            self.device.set_speed(command.speed);
        }
        self.active = command;
        self.started_at = now;
    }
}

/// 灯效渲染器
///
/// 给定颜色、速度和灯效开始后经过的时间，返回此刻应显示的颜色。
pub trait PatternRenderer: Send + Sync {
    fn render(&self, color: Color, speed: u16, elapsed: Duration) -> Color;
}

/// 常亮
pub struct StaticPattern;

impl PatternRenderer for StaticPattern {
    fn render(&self, color: Color, _speed: u16, _elapsed: Duration) -> Color {
        color
    }
}

/// 默认周期（speed 为 0 时）
const DEFAULT_PERIOD_MS: u64 = 1000;

fn period_ms(speed: u16) -> u64 {
    if speed == 0 {
        DEFAULT_PERIOD_MS
    } else {
        u64::from(speed)
    }
}

/// 闪烁：前半周期亮，后半周期灭
pub struct BlinkPattern;

impl PatternRenderer for BlinkPattern {
    fn render(&self, color: Color, speed: u16, elapsed: Duration) -> Color {
        let period = period_ms(speed);
        let phase = elapsed.as_millis() as u64 % period;
        if phase * 2 < period { color } else { Color::OFF }
    }
}

/// 呼吸：亮度按三角波在 0 与 1 之间变化
pub struct BreathPattern;

impl PatternRenderer for BreathPattern {
    fn render(&self, color: Color, speed: u16, elapsed: Duration) -> Color {
        let period = period_ms(speed);
        let phase = (elapsed.as_millis() as u64 % period) as f32 / period as f32;
        let brightness = if phase < 0.5 {
            phase * 2.0
        } else {
            (1.0 - phase) * 2.0
        };
        color.scale(brightness)
    }
}

/// 灯效注册表
///
/// 新灯效只需实现 [`PatternRenderer`] 并注册，仲裁逻辑无需改动。
pub struct PatternRegistry {
    renderers: HashMap<PatternId, Box<dyn PatternRenderer>>,
}

impl PatternRegistry {
    /// 空注册表
    pub fn empty() -> Self {
        Self {
            renderers: HashMap::new(),
        }
    }

    /// 内置灯效：Static / Blink / Breath
    pub fn standard() -> Self {
        let mut registry = Self::empty();
        registry.register(PatternId::Static, Box::new(StaticPattern));
        registry.register(PatternId::Blink, Box::new(BlinkPattern));
        registry.register(PatternId::Breath, Box::new(BreathPattern));
        registry
    }

    pub fn register(&mut self, id: PatternId, renderer: Box<dyn PatternRenderer>) {
        self.renderers.insert(id, renderer);
    }

    /// 渲染；未注册的灯效返回 None
    pub fn render(&self, id: PatternId, color: Color, speed: u16, elapsed: Duration) -> Option<Color> {
        self.renderers.get(&id).map(|r| r.render(color, speed, elapsed))
    }
}

impl Default for PatternRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

/// 软件指示灯
///
/// 没有 LED 硬件时使用：记录当前灯效状态，按需采样颜色，并通过 tracing 输出变化。
pub struct SoftIndicator {
    registry: PatternRegistry,
    pattern: PatternId,
    color: Color,
    speed: u16,
    since: Instant,
}

impl SoftIndicator {
    pub fn new() -> Self {
        Self::with_registry(PatternRegistry::standard())
    }

    pub fn with_registry(registry: PatternRegistry) -> Self {
        Self {
            registry,
            pattern: PatternId::Static,
            color: Color::OFF,
            speed: 0,
            since: Instant::now(),
        }
    }

    pub fn pattern(&self) -> PatternId {
        self.pattern
    }

    pub fn color(&self) -> Color {
        self.color
    }

    pub fn speed(&self) -> u16 {
        self.speed
    }

    /// 采样 `now` 时刻的显示颜色
    pub fn sample(&self, now: Instant) -> Color {
        self.registry
            .render(
                self.pattern,
                self.color,
                self.speed,
                now.saturating_duration_since(self.since),
            )
            .unwrap_or(self.color)
    }
}

impl Default for SoftIndicator {
    fn default() -> Self {
        Self::new()
    }
}

impl IndicatorDevice for SoftIndicator {
    fn set_pattern(&mut self, pattern: PatternId) {
        if pattern != self.pattern {
            debug!("Indicator pattern -> {:?}", pattern);
        }
        self.pattern = pattern;
        self.since = Instant::now();
    }

    fn set_color(&mut self, color: Color) {
        if color != self.color {
            debug!("Indicator color -> {:?}", color);
        }
        self.color = color;
    }

    fn set_speed(&mut self, speed: u16) {
        self.speed = speed;
    }
}
