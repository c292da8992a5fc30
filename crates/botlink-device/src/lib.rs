//! # Botlink Device Runtime
//!
//! 电机/传感器板上运行的实时部分：固定 10 ms 周期的 tick 调度器驱动
//! 舵机脉冲、传感器采样、反电动势测速和电机闭环控制，并在每个 tick 末尾
//! 与主机交换一次 StateFrame。
//!
//! 运行时只依赖 [`hal::Board`] / [`hal::BlockingDelay`] / [`botlink_link::DeviceLink`]
//! 三个 trait，既能跑在真实板卡上，也能用 [`sim_board::SimBoard`] 在主机上仿真。
//!
//! ## 模块
//!
//! - `config`: 设备配置（周期、延时、标定、限幅）
//! - `hal`: 板卡与阻塞延时抽象
//! - `context`: 设备上下文（替代全局状态）
//! - `sensing`: 传感器采样与反电动势测速
//! - `pid`: 整数 PID
//! - `motor`: 电机模式状态机
//! - `passthrough`: 串口透传
//! - `dispatch`: 短命令分发
//! - `exchange`: 设备侧链路交换
//! - `scheduler`: tick 调度器

pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod exchange;
pub mod hal;
pub mod motor;
pub mod passthrough;
pub mod pid;
pub mod scheduler;
pub mod sensing;
pub mod sim_board;

pub use config::DeviceConfig;
pub use context::{ControlInputs, DeviceContext};
pub use error::{CalibrationError, DeviceError};
pub use exchange::{DeviceExchange, Inbound};
pub use hal::{BlockingDelay, Board, CountingDelay, MAX_BLOCKING_DELAY_US, SpinDelay};
pub use motor::{Limits, MotorMode, MotorState, MotorTarget, Thresholds};
pub use pid::Pid;
pub use scheduler::{TickReport, TickScheduler, run_periodic};
pub use sensing::BemfSensor;
pub use sim_board::{SimBoard, SimPlant};
