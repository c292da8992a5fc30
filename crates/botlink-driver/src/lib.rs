//! 驱动层模块
//!
//! 主机侧运行时，包括：
//! - IO 线程管理（帧交换、短命令事务、看门狗）
//! - 共享记录（ArcSwap 无锁遥测 + 命令记录）
//! - 链路指标与连接监控
//!
//! # 使用场景
//!
//! 应用通过 [`Botlink`] 读遥测、写目标值；需要自己驱动链路时可直接使用
//! [`LinkExchange`]。

mod botlink;
mod builder;
pub mod command;
mod error;
pub mod exchange;
pub mod health;
pub mod metrics;
pub mod pipeline;
pub mod shared;
mod util;

pub use botlink::Botlink;
pub use builder::{BotlinkBuilder, DEFAULT_BAUD_RATE};
pub use command::{CommandRequest, CommandResult};
pub use error::DriverError;
pub use exchange::{ExchangeOutcome, LinkExchange};
pub use health::LinkHealth;
pub use metrics::{LinkMetrics, MetricsSnapshot};
pub use pipeline::{PipelineConfig, PipelineContext, io_loop};
pub use shared::{PublishSummary, SharedRecord, Telemetry};
