//! 配置管理命令

use crate::config::{CliConfig, config_file};
use anyhow::Result;
use clap::Subcommand;

/// 配置命令
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// 设置配置项
    Set {
        /// 默认串口（如 /dev/ttyUSB0, COM3）
        #[arg(long)]
        port: Option<String>,

        /// 默认波特率
        #[arg(long)]
        baud: Option<u32>,

        /// 看门狗超时（毫秒）
        #[arg(long)]
        watchdog_ms: Option<u64>,
    },

    /// 显示当前配置
    Show,

    /// 显示配置文件路径
    Path,

    /// 恢复默认配置
    Reset,
}

impl ConfigCommand {
    pub fn execute(self) -> Result<()> {
        match self {
            ConfigCommand::Set {
                port,
                baud,
                watchdog_ms,
            } => {
                let mut config = CliConfig::load()?;
                if let Some(port) = port {
                    println!("✅ Default port: {}", port);
                    config.port = Some(port);
                }
                if let Some(baud) = baud {
                    println!("✅ Default baud rate: {}", baud);
                    config.baud_rate = Some(baud);
                }
                if let Some(ms) = watchdog_ms {
                    println!("✅ Watchdog timeout: {} ms", ms);
                    config.pipeline.watchdog_timeout_ms = ms;
                }
                let path = config.save()?;
                println!("Saved to {}", path.display());
                Ok(())
            },

            ConfigCommand::Show => {
                let config = CliConfig::load()?;
                print!("{}", toml::to_string_pretty(&config)?);
                Ok(())
            },

            ConfigCommand::Path => {
                println!("{}", config_file()?.display());
                Ok(())
            },

            ConfigCommand::Reset => {
                let path = CliConfig::default().save()?;
                println!("✅ Reset {}", path.display());
                Ok(())
            },
        }
    }
}
