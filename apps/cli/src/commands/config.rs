//! 配置管理命令

use crate::settings::{CliConfig, default_config_file};
use anyhow::{Context, Result, bail};
use clap::Subcommand;
use std::fs;
use std::path::{Path, PathBuf};

/// 配置命令
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// 显示生效配置（默认值已展开）
    Show {
        /// 以 JSON 输出
        #[arg(long)]
        json: bool,
    },

    /// 显示配置文件路径
    Path,

    /// 写入一份包含全部默认值的配置文件
    Init {
        /// 目标路径（默认 <config_dir>/rover/config.toml）
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// 覆盖已存在的文件
        #[arg(long)]
        force: bool,
    },
}

impl ConfigCommand {
    pub fn execute(self, config: &CliConfig, source: Option<&Path>) -> Result<()> {
        match self {
            ConfigCommand::Show { json } => Self::show(config, json),
            ConfigCommand::Path => Self::path(source),
            ConfigCommand::Init { output, force } => Self::init(output, force),
        }
    }

    fn show(config: &CliConfig, json: bool) -> Result<()> {
        let effective = config.effective()?;
        if json {
            println!("{}", serde_json::to_string_pretty(&effective)?);
        } else {
            print!("{}", toml::to_string_pretty(&effective)?);
        }
        Ok(())
    }

    fn path(source: Option<&Path>) -> Result<()> {
        match source {
            Some(path) => println!("{}", path.display()),
            None => match default_config_file() {
                Some(path) => println!("{} (未创建，使用内置默认值)", path.display()),
                None => println!("(无法确定配置目录，使用内置默认值)"),
            },
        }
        Ok(())
    }

    fn init(output: Option<PathBuf>, force: bool) -> Result<()> {
        let path = match output {
            Some(path) => path,
            None => default_config_file().context("无法确定配置目录")?,
        };
        if path.exists() && !force {
            bail!("配置文件已存在: {}（使用 --force 覆盖）", path.display());
        }
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).context("创建配置目录失败")?;
        }

        let content = format!(
            "# Rover CLI Configuration\n\n{}",
            toml::to_string_pretty(&CliConfig::default().effective()?)?
        );
        fs::write(&path, content).context("写入配置文件失败")?;
        println!("✅ 已写入配置: {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_writes_loadable_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        ConfigCommand::Init {
            output: Some(path.clone()),
            force: false,
        }
        .execute(&CliConfig::default(), None)
        .unwrap();

        let loaded = CliConfig::load(&path).unwrap();
        assert_eq!(loaded, CliConfig::default().effective().unwrap());

        // 不覆盖已有文件
        let again = ConfigCommand::Init {
            output: Some(path),
            force: false,
        }
        .execute(&CliConfig::default(), None);
        assert!(again.is_err());
    }
}
