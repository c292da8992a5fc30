//! 遥测监控命令

use crate::config::CliConfig;
use crate::session::{ConnectArgs, Session, install_ctrlc};
use anyhow::Result;
use botlink_sdk::StateFrame;
use botlink_sdk::driver::{MetricsSnapshot, Telemetry};
use clap::Args;
use serde_json::json;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

/// 监控参数
#[derive(Args, Debug)]
pub struct MonitorCommand {
    /// 刷新频率（Hz）
    #[arg(short, long, default_value_t = 10)]
    pub frequency: u32,

    /// 运行时长（秒），默认直到 Ctrl-C
    #[arg(short, long)]
    pub duration: Option<f64>,

    /// 以 JSON 行输出
    #[arg(long)]
    pub json: bool,
}

impl MonitorCommand {
    pub fn execute(&self, connect: &ConnectArgs, config: &CliConfig) -> Result<()> {
        let running = install_ctrlc()?;
        let session = Session::open(connect, config)?;
        let botlink = &session.botlink;

        let interval = Duration::from_secs_f64(1.0 / self.frequency.max(1) as f64);
        let deadline = self.duration.map(|s| Instant::now() + Duration::from_secs_f64(s));

        while running.load(Ordering::SeqCst) && deadline.is_none_or(|d| Instant::now() < d) {
            let telemetry = botlink.telemetry();
            if self.json {
                println!("{}", telemetry_json(&telemetry, &botlink.metrics()));
            } else {
                print_telemetry(&telemetry);
            }
            std::thread::sleep(interval);
        }

        let metrics = botlink.metrics();
        println!(
            "exchanges: {}  resync: {:.2}%  timeouts: {}  watchdog resets: {}",
            metrics.exchanges_total,
            metrics.resync_rate(),
            metrics.link_timeouts,
            metrics.watchdog_resets
        );
        Ok(())
    }
}

fn print_telemetry(telemetry: &Telemetry) {
    let f = &telemetry.frame;
    println!(
        "#{:<7} speed {:?} counter {:?} pwm {:?} motion {:04b} | battery {} mV digital {:08b}",
        telemetry.exchange,
        f.motor_speed,
        f.motor_counter,
        f.motor_pwm,
        f.motor_in_motion_bits,
        f.battery_voltage,
        f.digital_bits
    );
}

pub fn telemetry_json(telemetry: &Telemetry, metrics: &MetricsSnapshot) -> serde_json::Value {
    let f: &StateFrame = &telemetry.frame;
    json!({
        "exchange": telemetry.exchange,
        "valid": f.is_valid(),
        "motor_speed": f.motor_speed,
        "motor_speed_target": f.motor_speed_target,
        "motor_counter": f.motor_counter,
        "motor_pwm": f.motor_pwm,
        "in_motion_bits": f.motor_in_motion_bits,
        "analog": f.analog,
        "digital_bits": f.digital_bits,
        "accel": f.accel,
        "battery_voltage": f.battery_voltage,
        "button_state": f.button_state,
        "servo_target": f.servo_target,
        "metrics": metrics,
    })
}
