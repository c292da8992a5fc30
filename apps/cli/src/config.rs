//! CLI 配置文件
//!
//! 保存在 `<config_dir>/botlink/config.toml`：默认串口、波特率，以及
//! Pipeline 和仿真设备的参数。

use anyhow::{Context, Result};
use botlink_sdk::device::DeviceConfig;
use botlink_sdk::driver::PipelineConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// 配置文件路径
pub fn config_file() -> Result<PathBuf> {
    let mut path = dirs::config_dir().context("cannot determine the user config directory")?;
    path.push("botlink");
    path.push("config.toml");
    Ok(path)
}

/// CLI 配置
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// 默认串口
    pub port: Option<String>,
    /// 默认波特率
    pub baud_rate: Option<u32>,
    pub pipeline: PipelineConfig,
    /// `--sim` 模式下仿真设备的参数
    pub device: DeviceConfig,
}

impl CliConfig {
    /// 加载默认位置的配置；文件不存在时返回默认配置
    pub fn load() -> Result<Self> {
        Self::load_from(&config_file()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
    }

    pub fn save(&self) -> Result<PathBuf> {
        let path = config_file()?;
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).context("failed to create config directory")?;
        }
        let content = toml::to_string_pretty(self).context("failed to serialize config")?;
        fs::write(path, format!("# Botlink CLI Configuration\n\n{}", content))
            .with_context(|| format!("failed to write {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("botlink-cli-test-{}", std::process::id()))
            .join(name)
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let config = CliConfig::load_from(&temp_path("missing.toml")).unwrap();
        assert_eq!(config, CliConfig::default());
    }

    #[test]
    fn test_save_and_load() {
        let path = temp_path("roundtrip.toml");
        let mut config = CliConfig {
            port: Some("/dev/ttyUSB1".to_string()),
            baud_rate: Some(230_400),
            ..Default::default()
        };
        config.pipeline.watchdog_timeout_ms = 750;
        config.device.tick_period_us = 5_000;

        config.save_to(&path).unwrap();
        assert_eq!(CliConfig::load_from(&path).unwrap(), config);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let path = temp_path("partial.toml");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "port = \"COM3\"\n\n[pipeline]\nreceive_timeout_ms = 5\n").unwrap();

        let config = CliConfig::load_from(&path).unwrap();
        assert_eq!(config.port.as_deref(), Some("COM3"));
        assert_eq!(config.pipeline.receive_timeout_ms, 5);
        assert_eq!(config.pipeline.watchdog_timeout_ms, 500);
        assert_eq!(config.device, DeviceConfig::default());
        let _ = fs::remove_file(&path);
    }
}
