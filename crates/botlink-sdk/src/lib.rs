//! Botlink SDK - 电机/传感器板 Rust SDK
//!
//! 设备与主机通过连续全双工字节流交换定长 StateFrame，设备端以 10 ms 周期
//! 运行反电动势测速与整数 PID 闭环。
//!
//! # 架构设计
//!
//! 从底层到高层：
//!
//! - **协议层** (`protocol`): StateFrame 编解码、魔数重同步、短命令编解码
//! - **链路层** (`link`): 主机/设备链路抽象，串口与仿真总线
//! - **设备层** (`device`): tick 调度器、测速、电机状态机
//! - **驱动层** (`driver`): 主机 IO 线程、共享记录、看门狗
//!
//! # 快速开始
//!
//! ```rust
//! use botlink_sdk::prelude::*;
//! use botlink_sdk::sim::SimulatedDevice;
//! use std::time::Duration;
//!
//! let (host, device) = SimBus::pair();
//! let sim = SimulatedDevice::spawn(DeviceConfig::default(), device);
//! let botlink = Botlink::new(host, None);
//!
//! botlink.wait_for_telemetry(Duration::from_secs(1)).unwrap();
//! botlink.set_motor_speed(0, 300).unwrap();
//! # drop(botlink);
//! # sim.stop();
//! ```

pub mod prelude;
pub mod sim;

pub use botlink_device as device;
pub use botlink_driver as driver;
pub use botlink_link as link;
pub use botlink_protocol as protocol;

pub use botlink_driver::{Botlink, BotlinkBuilder, DriverError, PipelineConfig, Telemetry};
pub use botlink_link::{LinkAdapter, LinkError};
pub use botlink_protocol::{ProtocolError, StateFrame};

/// 初始化日志
///
/// 安装 `tracing-subscriber` fmt 订阅者（`RUST_LOG` 未设置时默认 `info`），
/// 并把 `log` 记录桥接到 `tracing`。重复调用是无害的。
pub fn init_logger() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).finish();
    if tracing::subscriber::set_global_default(subscriber).is_ok() {
        let _ = tracing_log::LogTracer::init();
    }
}
