//! 命令定义和实现

pub mod command;
pub mod config;
pub mod monitor;
pub mod motor;
pub mod sim;

pub use command::CmdCommand;
pub use config::ConfigCommand;
pub use monitor::MonitorCommand;
pub use motor::{ClearCommand, MotorCommand, PidCommand, ServoCommand};
pub use sim::SimCommand;
