//! 连接管理
//!
//! 每个 one-shot 命令建立一次会话：真实串口，或 `--sim` 时的仿真总线 + 仿真设备。

use crate::config::CliConfig;
use anyhow::{Context, Result};
use botlink_sdk::sim::SimulatedDevice;
use botlink_sdk::{Botlink, BotlinkBuilder};
use botlink_sdk::link::SimBus;
use clap::Args;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::info;

/// 首帧遥测等待时间
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// 连接参数（所有设备命令共享）
#[derive(Args, Debug, Clone, Default)]
pub struct ConnectArgs {
    /// 串口（覆盖配置）
    #[arg(short, long, global = true)]
    pub port: Option<String>,

    /// 波特率（覆盖配置）
    #[arg(short, long, global = true)]
    pub baud: Option<u32>,

    /// 连接仿真设备而不是真实硬件
    #[arg(long, global = true)]
    pub sim: bool,
}

/// 一次 CLI 会话
pub struct Session {
    pub botlink: Botlink,
    /// 仿真模式下的设备线程（字段顺序保证它在 Botlink 之后释放）
    pub device: Option<SimulatedDevice>,
}

impl Session {
    pub fn open(args: &ConnectArgs, config: &CliConfig) -> Result<Self> {
        if args.sim {
            let (host, device) = SimBus::pair();
            let device = SimulatedDevice::spawn(config.device.clone(), device);
            let botlink = BotlinkBuilder::new()
                .pipeline_config(config.pipeline.clone())
                .adapter(Box::new(host))
                .build()?;
            info!("Connected to simulated device");
            return Self::ready(botlink, Some(device));
        }

        let mut builder = BotlinkBuilder::new().pipeline_config(config.pipeline.clone());
        if let Some(port) = args.port.as_ref().or(config.port.as_ref()) {
            builder = builder.port(port);
        }
        if let Some(baud) = args.baud.or(config.baud_rate) {
            builder = builder.baud_rate(baud);
        }
        let botlink = builder.build().context("failed to open the link")?;
        info!("Connected to {} at {} baud", botlink.port(), botlink.baud_rate());
        Self::ready(botlink, None)
    }

    fn ready(botlink: Botlink, device: Option<SimulatedDevice>) -> Result<Self> {
        botlink
            .wait_for_telemetry(CONNECT_TIMEOUT)
            .context("device did not send a valid frame")?;
        Ok(Self { botlink, device })
    }
}

/// 安装 Ctrl-C 处理器，返回运行标志
pub fn install_ctrlc() -> Result<Arc<AtomicBool>> {
    let running = Arc::new(AtomicBool::new(true));
    let flag = running.clone();
    ctrlc::set_handler(move || flag.store(false, Ordering::SeqCst))
        .context("failed to install Ctrl-C handler")?;
    Ok(running)
}
