//! 仿真运行命令
//!
//! 在进程内启动仿真设备和主机驱动，跑一段闭环速度控制并打印收敛过程，
//! 无需硬件即可检查整条链路。

use crate::config::CliConfig;
use crate::session::{ConnectArgs, Session, install_ctrlc};
use anyhow::Result;
use clap::Args;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

/// 仿真参数
#[derive(Args, Debug)]
pub struct SimCommand {
    /// 电机编号
    #[arg(long, default_value_t = 0)]
    pub motor: usize,

    /// 速度目标（计数/tick）
    #[arg(long, default_value_t = 500, allow_negative_numbers = true)]
    pub speed: i16,

    /// 运行时长（秒）
    #[arg(short, long, default_value_t = 3.0)]
    pub duration: f64,
}

impl SimCommand {
    pub fn execute(&self, config: &CliConfig) -> Result<()> {
        let running = install_ctrlc()?;
        let connect = ConnectArgs {
            sim: true,
            ..Default::default()
        };
        let session = Session::open(&connect, config)?;
        let botlink = &session.botlink;

        println!("🤖 Simulated device up, motor {} -> speed {}", self.motor, self.speed);
        botlink.set_motor_speed(self.motor, self.speed)?;

        let start = Instant::now();
        let deadline = start + Duration::from_secs_f64(self.duration.max(0.0));
        while running.load(Ordering::SeqCst) && Instant::now() < deadline {
            let telemetry = botlink.telemetry();
            let f = &telemetry.frame;
            println!(
                "{:>6.2}s  speed {:>5}  pwm {:>5}  counter {:>9}",
                start.elapsed().as_secs_f64(),
                f.motor_speed[self.motor],
                f.motor_pwm[self.motor],
                f.motor_counter[self.motor]
            );
            std::thread::sleep(Duration::from_millis(100));
        }
        botlink.stop_all();

        let metrics = botlink.metrics();
        println!(
            "exchanges: {}  resync events: {}  commands: {}",
            metrics.exchanges_total, metrics.resync_events, metrics.commands_total
        );
        Ok(())
    }
}
