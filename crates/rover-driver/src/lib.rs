//! 驱动层模块
//!
//! 深度传感器流水线的运行时部分，运行在两个核心上：
//! - 核心 A（控制线程）：分帧、解析、模式状态机、终端回显、持久化入队、指示灯仲裁
//! - 核心 B（推理线程）：消费推理快照、调用推理引擎、发布结果
//! - 写入线程：把持久化队列中的记录写入存储
//!
//! # 使用场景
//!
//! 大多数调用方只需要 [`RoverBuilder`] 和 [`Rover`]；
//! [`ControlLoop`] 可以单独驱动，用于确定性测试或自定义线程模型。

mod builder;
pub mod commands;
pub mod control;
mod error;
pub mod indicator;
pub mod inference;
pub mod metrics;
pub mod mode;
pub mod persistence;
pub mod pipeline;
pub mod render;
pub mod ring;
mod rover;
pub mod stats;

pub use builder::RoverBuilder;
pub use commands::{Command, CommandContext, CommandProcessor};
pub use control::{ControlSample, ControlSource, SharedControls};
pub use error::DriverError;
pub use indicator::{
    Color, IndicatorArbiter, IndicatorCommand, IndicatorDevice, IndicatorPriority, PatternId,
    PatternRegistry, PatternRenderer, SoftIndicator,
};
pub use inference::{
    DisabledEngine, InferenceEngine, InferenceError, InferenceOutput, InferenceScheduler,
    QuantizedOutput, Snapshot, inference_loop,
};
pub use metrics::{MetricsSnapshot, RoverMetrics};
pub use mode::{AtomicMode, Mode, ModeController, Transition, TransitionEffects};
pub use persistence::{FileLog, LogStorage, PersistenceQueue, PersistenceRecord, writer_loop};
pub use pipeline::{
    ControlLoop, CycleOutcome, LoopHandles, PipelineConfig, RoverContext, control_loop,
};
pub use ring::{ModelFrame, ModelInputConfig, RingFrameBuffer, Rotation, to_model_input};
pub use rover::Rover;
pub use stats::{CycleReport, CycleStats};
