//! # Rover CLI
//!
//! 在主机上运行深度流水线：串口设备或录制文件作为传感器输入，
//! 本地目录作为存储卡，stdin/stdout 作为操作台串口。
//!
//! ```bash
//! # 生成一段合成数据流
//! rover-cli synth --output capture.bin --frames 500 --noise 8
//!
//! # 按 115200 波特率回放，会话日志写入 ./sdcard
//! rover-cli run --input capture.bin --baud 115200 --storage ./sdcard
//!
//! # 查看生效配置
//! rover-cli config show
//! ```
//!
//! 运行中在 stdin 输入 `CONTROLS:<steering>,<throttle>,<ch3>` 模拟遥控输入，
//! 例如 `CONTROLS:0,0,1` 后接 `CONTROLS:0,0,0` 产生一次模式切换。

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod settings;

use commands::{ConfigCommand, RunCommand, SynthCommand};
use settings::CliConfig;

/// Rover CLI - 深度流水线命令行工具
#[derive(Parser, Debug)]
#[command(name = "rover-cli")]
#[command(about = "Command-line runner for the depth rover pipeline", long_about = None)]
#[command(version)]
struct Cli {
    /// 配置文件（默认 <config_dir>/rover/config.toml，不存在时使用内置默认值）
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 运行流水线
    Run {
        #[command(flatten)]
        args: RunCommand,
    },

    /// 生成合成传感器数据流
    Synth {
        #[command(flatten)]
        args: SynthCommand,
    },

    /// 配置管理
    #[command(subcommand)]
    Config(ConfigCommand),
}

fn main() -> Result<()> {
    // 日志输出到 stderr，stdout 留给终端回显和操作台响应
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("rover_cli=info".parse()?)
                .add_directive("rover_driver=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let (config, source) = CliConfig::resolve(cli.config.as_deref())?;

    match cli.command {
        Commands::Run { args } => args.execute(&config),
        Commands::Synth { args } => args.execute(),
        Commands::Config(cmd) => cmd.execute(&config, source.as_deref()),
    }
}
