//! 命令定义和实现

pub mod config;
pub mod run;
pub mod synth;

pub use config::ConfigCommand;
pub use run::RunCommand;
pub use synth::SynthCommand;
