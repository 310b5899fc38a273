//! 配置文件（TOML）
//!
//! ```toml
//! [storage]
//! root = "/mnt/sdcard"
//!
//! [sensor]
//! device = "/dev/ttyUSB0"
//! baud = 115200
//! unit = 10
//!
//! [pipeline]
//! mode_cooldown_cycles = 10
//! rotation = "clockwise90"
//! ```
//!
//! 所有字段可省略，省略时使用 [`PipelineConfig::default`] 的取值。

use anyhow::{Context, Result};
use rover_driver::{PipelineConfig, Rotation};
use rover_protocol::UnitLaw;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// 默认配置文件路径
pub fn default_config_file() -> Option<PathBuf> {
    let mut path = dirs::config_dir()?;
    path.push("rover");
    path.push("config.toml");
    Some(path)
}

/// CLI 配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CliConfig {
    pub storage: StorageSection,
    pub sensor: SensorSection,
    pub pipeline: PipelineSection,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageSection {
    /// 存储根目录；未设置时流水线以 Faulted 模式运行
    pub root: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SensorSection {
    /// 串口设备或录制文件
    pub device: Option<PathBuf>,
    /// 回放限速（波特率，8N1）
    pub baud: Option<u32>,
    /// 线性换算单位（毫米/字节）
    pub unit: Option<u16>,
    /// 使用非线性换算律（忽略 `unit`）
    pub nonlinear: bool,
    pub binning_factor: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineSection {
    pub mode_cooldown_cycles: Option<u32>,
    pub ring_capacity: Option<usize>,
    pub model_side: Option<usize>,
    pub rotation: Option<RotationSetting>,
    pub max_depth_mm: Option<f32>,
    pub persistence_queue_capacity: Option<usize>,
    pub flush_every: Option<usize>,
    pub indicator_queue_capacity: Option<usize>,
}

/// 配置文件中的旋转方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationSetting {
    None,
    Clockwise90,
    Rotate180,
    CounterClockwise90,
}

impl From<RotationSetting> for Rotation {
    fn from(value: RotationSetting) -> Self {
        match value {
            RotationSetting::None => Rotation::None,
            RotationSetting::Clockwise90 => Rotation::Clockwise90,
            RotationSetting::Rotate180 => Rotation::Rotate180,
            RotationSetting::CounterClockwise90 => Rotation::CounterClockwise90,
        }
    }
}

impl From<Rotation> for RotationSetting {
    fn from(value: Rotation) -> Self {
        match value {
            Rotation::None => RotationSetting::None,
            Rotation::Clockwise90 => RotationSetting::Clockwise90,
            Rotation::Rotate180 => RotationSetting::Rotate180,
            Rotation::CounterClockwise90 => RotationSetting::CounterClockwise90,
        }
    }
}

impl CliConfig {
    /// 加载配置文件
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("读取配置文件失败: {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("解析配置文件失败: {}", path.display()))
    }

    /// 确定配置来源
    ///
    /// 显式指定的文件必须存在；默认路径下没有文件时使用内置默认值。
    /// 返回配置及其来源文件（None 表示内置默认值）。
    pub fn resolve(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>)> {
        if let Some(path) = explicit {
            return Ok((Self::load(path)?, Some(path.to_path_buf())));
        }
        match default_config_file() {
            Some(path) if path.exists() => Ok((Self::load(&path)?, Some(path))),
            _ => Ok((Self::default(), None)),
        }
    }

    /// 转换为流水线配置并校验
    pub fn pipeline_config(&self) -> Result<PipelineConfig> {
        let mut config = PipelineConfig::default();

        if self.sensor.nonlinear {
            config.unit = UnitLaw::Nonlinear;
        } else if let Some(unit) = self.sensor.unit {
            config.unit = UnitLaw::Linear { unit };
        }
        if let Some(binning) = self.sensor.binning_factor {
            config.binning_factor = binning;
        }

        let p = &self.pipeline;
        if let Some(v) = p.mode_cooldown_cycles {
            config.mode_cooldown_cycles = v;
        }
        if let Some(v) = p.ring_capacity {
            config.ring_capacity = v;
        }
        if let Some(v) = p.model_side {
            config.model_input.side = v;
        }
        if let Some(v) = p.rotation {
            config.model_input.rotation = v.into();
        }
        if let Some(v) = p.max_depth_mm {
            config.model_input.max_depth_mm = v;
        }
        if let Some(v) = p.persistence_queue_capacity {
            config.persistence_queue_capacity = v;
        }
        if let Some(v) = p.flush_every {
            config.flush_every = v;
        }
        if let Some(v) = p.indicator_queue_capacity {
            config.indicator_queue_capacity = v;
        }

        config.validate().context("配置无效")?;
        Ok(config)
    }

    /// 把生效的流水线配置写回全部字段（用于展示和生成模板）
    pub fn effective(&self) -> Result<Self> {
        let config = self.pipeline_config()?;
        let (unit, nonlinear) = match config.unit {
            UnitLaw::Linear { unit } => (Some(unit), false),
            UnitLaw::Nonlinear => (None, true),
        };
        Ok(Self {
            storage: self.storage.clone(),
            sensor: SensorSection {
                device: self.sensor.device.clone(),
                baud: self.sensor.baud,
                unit,
                nonlinear,
                binning_factor: Some(config.binning_factor),
            },
            pipeline: PipelineSection {
                mode_cooldown_cycles: Some(config.mode_cooldown_cycles),
                ring_capacity: Some(config.ring_capacity),
                model_side: Some(config.model_input.side),
                rotation: Some(config.model_input.rotation.into()),
                max_depth_mm: Some(config.model_input.max_depth_mm),
                persistence_queue_capacity: Some(config.persistence_queue_capacity),
                flush_every: Some(config.flush_every),
                indicator_queue_capacity: Some(config.indicator_queue_capacity),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config: CliConfig = toml::from_str("").unwrap();
        assert_eq!(config, CliConfig::default());
        assert_eq!(config.pipeline_config().unwrap(), PipelineConfig::default());
    }

    #[test]
    fn test_overrides_are_applied() {
        let config: CliConfig = toml::from_str(
            r#"
            [storage]
            root = "/mnt/sdcard"

            [sensor]
            nonlinear = true
            binning_factor = 2

            [pipeline]
            mode_cooldown_cycles = 3
            rotation = "rotate180"
            model_side = 16
            "#,
        )
        .unwrap();

        assert_eq!(config.storage.root, Some(PathBuf::from("/mnt/sdcard")));
        let pipeline = config.pipeline_config().unwrap();
        assert_eq!(pipeline.unit, UnitLaw::Nonlinear);
        assert_eq!(pipeline.binning_factor, 2);
        assert_eq!(pipeline.mode_cooldown_cycles, 3);
        assert_eq!(pipeline.model_input.rotation, Rotation::Rotate180);
        assert_eq!(pipeline.model_input.side, 16);
        assert_eq!(pipeline.ring_capacity, 20);
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        assert!(toml::from_str::<CliConfig>("[pipeline]\ncooldown = 3\n").is_err());
    }

    #[test]
    fn test_invalid_values_fail_validation() {
        let config: CliConfig = toml::from_str("[pipeline]\nring_capacity = 0\n").unwrap();
        assert!(config.pipeline_config().is_err());
    }

    #[test]
    fn test_effective_config_round_trips_through_toml() {
        let effective = CliConfig::default().effective().unwrap();
        assert_eq!(effective.sensor.unit, Some(10));
        assert_eq!(effective.pipeline.flush_every, Some(20));

        let text = toml::to_string_pretty(&effective).unwrap();
        let parsed: CliConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.pipeline_config().unwrap(), PipelineConfig::default());
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(CliConfig::resolve(Some(&dir.path().join("missing.toml"))).is_err());

        let path = dir.path().join("rover.toml");
        fs::write(&path, "[sensor]\nunit = 5\n").unwrap();
        let (config, source) = CliConfig::resolve(Some(&path)).unwrap();
        assert_eq!(config.sensor.unit, Some(5));
        assert_eq!(source, Some(path));
    }
}
