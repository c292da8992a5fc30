//! Prelude - 常用类型的便捷导入
//!
//! ```rust
//! use botlink_sdk::prelude::*;
//! ```

// 主机驱动
pub use botlink_driver::{Botlink, BotlinkBuilder, MetricsSnapshot, PipelineConfig, Telemetry};

// 设备运行时
pub use botlink_device::{DeviceConfig, SimBoard, SpinDelay, TickScheduler};

// 链路
pub use botlink_link::{DeviceLink, LinkAdapter, SimBus};

// 协议
pub use botlink_protocol::{PidGains, Reply, Request, StateFrame};

// 错误类型
pub use botlink_driver::DriverError;
pub use botlink_link::LinkError;
pub use botlink_protocol::ProtocolError;
