//! # Botlink CLI
//!
//! Command-line interface for the botlink motor board.
//!
//! ```bash
//! # 配置默认串口
//! botlink-cli config set --port /dev/ttyUSB0
//!
//! # 监控遥测
//! botlink-cli monitor --frequency 20
//!
//! # 速度闭环 2 秒
//! botlink-cli motor speed 0 500 --hold 2
//!
//! # 短命令模式：读取状态
//! botlink-cli cmd 0x90
//!
//! # 无硬件：仿真设备上运行任意命令
//! botlink-cli --sim motor position 1 200 5000
//! botlink-cli sim --speed 300
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod config;
mod session;

use commands::{
    ClearCommand, CmdCommand, ConfigCommand, MonitorCommand, MotorCommand, PidCommand,
    ServoCommand, SimCommand,
};
use config::CliConfig;
use session::ConnectArgs;

/// Botlink CLI - 电机板命令行工具
#[derive(Parser, Debug)]
#[command(name = "botlink-cli")]
#[command(about = "Command-line interface for the botlink motor board", long_about = None)]
#[command(version)]
struct Cli {
    #[command(flatten)]
    connect: ConnectArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 配置管理
    #[command(subcommand)]
    Config(ConfigCommand),

    /// 列出可用串口
    Ports,

    /// 监控遥测
    Monitor {
        #[command(flatten)]
        args: MonitorCommand,
    },

    /// 电机控制
    #[command(subcommand)]
    Motor(MotorCommand),

    /// 设置 PID 增益
    Pid {
        #[command(flatten)]
        args: PidCommand,
    },

    /// 清零电机计数器
    Clear {
        #[command(flatten)]
        args: ClearCommand,
    },

    /// 舵机控制
    Servo {
        #[command(flatten)]
        args: ServoCommand,
    },

    /// 发送短命令
    Cmd {
        #[command(flatten)]
        args: CmdCommand,
    },

    /// 进程内仿真运行
    Sim {
        #[command(flatten)]
        args: SimCommand,
    },
}

fn main() -> Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("botlink_cli=info,warn")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Config(cmd) => cmd.execute(),

        Commands::Ports => list_ports(),

        command => {
            let config = CliConfig::load()?;
            let connect = &cli.connect;
            match command {
                Commands::Monitor { args } => args.execute(connect, &config),
                Commands::Motor(cmd) => cmd.execute(connect, &config),
                Commands::Pid { args } => args.execute(connect, &config),
                Commands::Clear { args } => args.execute(connect, &config),
                Commands::Servo { args } => args.execute(connect, &config),
                Commands::Cmd { args } => args.execute(connect, &config),
                Commands::Sim { args } => args.execute(&config),
                Commands::Config(_) | Commands::Ports => Ok(()),
            }
        },
    }
}

fn list_ports() -> Result<()> {
    let ports = botlink_sdk::link::list_ports()?;
    if ports.is_empty() {
        println!("(no serial ports found)");
    }
    for port in ports {
        println!("{}", port);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_motor_speed_with_global_sim() {
        let cli = Cli::try_parse_from(["botlink-cli", "--sim", "motor", "speed", "1", "-250"]).unwrap();
        assert!(cli.connect.sim);
        match cli.command {
            Commands::Motor(MotorCommand::Speed { motor, speed, hold }) => {
                assert_eq!(motor, 1);
                assert_eq!(speed, -250);
                assert!(!hold.keep);
            },
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_pid_gains() {
        let cli = Cli::try_parse_from(["botlink-cli", "pid", "2", "1,1,-1,2,8,4"]).unwrap();
        match cli.command {
            Commands::Pid { args } => {
                assert_eq!(args.motor, 2);
                assert_eq!(args.gains, botlink_sdk::protocol::PidGains::DEFAULT);
            },
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_raw_command() {
        let cli = Cli::try_parse_from(["botlink-cli", "cmd", "0x61", "1", "-300"]).unwrap();
        match cli.command {
            Commands::Cmd { args } => {
                assert_eq!(args.id, botlink_sdk::protocol::CommandId::PwmWrite);
                assert_eq!(args.payload, vec![1, (-300i16) as u16]);
            },
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_command_id_rejected() {
        assert!(Cli::try_parse_from(["botlink-cli", "cmd", "0x99"]).is_err());
    }
}
