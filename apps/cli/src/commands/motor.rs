//! 电机、PID、清零与舵机命令
//!
//! 目标值写入命令记录后保持 `--hold` 秒并打印进度；结束时电机回到开环 0 输出，
//! 除非指定 `--keep`。

use crate::config::CliConfig;
use crate::session::{ConnectArgs, Session, install_ctrlc};
use anyhow::{Context, Result, bail};
use botlink_sdk::Botlink;
use botlink_sdk::protocol::{PID_GAIN_WORDS, PidGains};
use clap::{Args, Subcommand};
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

/// 清零确认等待时间
const CLEAR_TIMEOUT: Duration = Duration::from_secs(1);

/// 保持参数
#[derive(Args, Debug, Clone)]
pub struct HoldArgs {
    /// 保持时长（秒）
    #[arg(long, default_value_t = 2.0)]
    pub hold: f64,

    /// 退出时不停止电机
    #[arg(long)]
    pub keep: bool,
}

/// 电机命令
#[derive(Subcommand, Debug)]
pub enum MotorCommand {
    /// 速度闭环（计数/tick）
    Speed {
        motor: usize,
        #[arg(allow_negative_numbers = true)]
        speed: i16,
        #[command(flatten)]
        hold: HoldArgs,
    },

    /// 位置闭环：以不超过 |speed| 的步长移动到 target
    Position {
        motor: usize,
        speed: i16,
        #[arg(allow_negative_numbers = true)]
        target: i32,
        #[command(flatten)]
        hold: HoldArgs,
    },

    /// 开环 PWM（±1000）
    Pwm {
        motor: usize,
        #[arg(allow_negative_numbers = true)]
        pwm: i16,
        #[command(flatten)]
        hold: HoldArgs,
    },

    /// 所有电机开环 0 输出
    Stop,
}

impl MotorCommand {
    pub fn execute(&self, connect: &ConnectArgs, config: &CliConfig) -> Result<()> {
        let session = Session::open(connect, config)?;
        let botlink = &session.botlink;

        let (motor, hold) = match self {
            MotorCommand::Speed { motor, speed, hold } => {
                botlink.set_motor_speed(*motor, *speed)?;
                println!("🔄 Motor {} speed target {}", motor, speed);
                (*motor, hold)
            },
            MotorCommand::Position {
                motor,
                speed,
                target,
                hold,
            } => {
                botlink.set_motor_position(*motor, *speed, *target)?;
                println!("📍 Motor {} seeking {} at speed {}", motor, target, speed);
                (*motor, hold)
            },
            MotorCommand::Pwm { motor, pwm, hold } => {
                botlink.set_motor_pwm(*motor, *pwm)?;
                println!("⚡ Motor {} open-loop PWM {}", motor, pwm);
                (*motor, hold)
            },
            MotorCommand::Stop => {
                botlink.stop_all();
                flush(botlink)?;
                println!("🛑 All motors stopped");
                return Ok(());
            },
        };

        watch_motor(botlink, motor, hold)
    }
}

/// 打印电机进度直到保持时间结束或 Ctrl-C
fn watch_motor(botlink: &Botlink, motor: usize, hold: &HoldArgs) -> Result<()> {
    let running = install_ctrlc()?;
    let deadline = Instant::now() + Duration::from_secs_f64(hold.hold.max(0.0));
    while running.load(Ordering::SeqCst) && Instant::now() < deadline {
        let frame = botlink.telemetry().frame;
        println!(
            "  speed {:>6}  counter {:>10}  pwm {:>5}  in motion: {}",
            frame.motor_speed[motor],
            frame.motor_counter[motor],
            frame.motor_pwm[motor],
            (frame.motor_in_motion_bits >> motor) & 1 == 1
        );
        std::thread::sleep(Duration::from_millis(100));
    }

    if !hold.keep {
        botlink.stop_all();
        flush(botlink)?;
        println!("🛑 Motors stopped");
    }
    Ok(())
}

/// 等待命令记录至少随两次交换发出
fn flush(botlink: &Botlink) -> Result<()> {
    for _ in 0..2 {
        botlink
            .wait_for_next_telemetry(Duration::from_millis(500))
            .context("link stalled while flushing targets")?;
    }
    Ok(())
}

/// PID 增益命令参数
#[derive(Args, Debug)]
pub struct PidCommand {
    pub motor: usize,

    /// 六个增益：P乘,I乘,D乘,P除,I除,D除（如 1,1,-1,2,8,4）
    #[arg(allow_hyphen_values = true, value_parser = parse_gains)]
    pub gains: PidGains,
}

impl PidCommand {
    pub fn execute(&self, connect: &ConnectArgs, config: &CliConfig) -> Result<()> {
        let session = Session::open(connect, config)?;
        session.botlink.set_pid_gains(self.motor, self.gains)?;
        flush(&session.botlink)?;
        println!("✅ Motor {} gains {:?}", self.motor, self.gains.to_words());
        Ok(())
    }
}

pub fn parse_gains(s: &str) -> Result<PidGains> {
    let values = s
        .split(',')
        .map(|v| v.trim().parse::<i16>())
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("invalid gain list '{}'", s))?;
    let words: [i16; PID_GAIN_WORDS] = match values.try_into() {
        Ok(words) => words,
        Err(values) => bail!("expected {} gains, got {}", PID_GAIN_WORDS, values.len()),
    };
    Ok(PidGains::from_words(words))
}

/// 计数器清零命令参数
#[derive(Args, Debug)]
pub struct ClearCommand {
    /// 电机编号（可多个）
    #[arg(required = true)]
    pub motors: Vec<usize>,
}

impl ClearCommand {
    pub fn execute(&self, connect: &ConnectArgs, config: &CliConfig) -> Result<()> {
        let session = Session::open(connect, config)?;
        for &motor in &self.motors {
            session
                .botlink
                .clear_counter_blocking(motor, CLEAR_TIMEOUT)
                .with_context(|| format!("motor {} clear was not acknowledged", motor))?;
            println!("✅ Motor {} counter cleared", motor);
        }
        Ok(())
    }
}

/// 舵机命令参数
#[derive(Args, Debug)]
pub struct ServoCommand {
    /// 舵机编号
    pub servo: Option<usize>,

    /// 目标值（脉宽 = 比例 × (目标 + 偏移) 微秒）
    #[arg(allow_negative_numbers = true)]
    pub target: Option<i16>,

    /// 使能舵机输出
    #[arg(long, conflicts_with = "disable")]
    pub enable: bool,

    /// 关闭舵机输出
    #[arg(long)]
    pub disable: bool,
}

impl ServoCommand {
    pub fn execute(&self, connect: &ConnectArgs, config: &CliConfig) -> Result<()> {
        let session = Session::open(connect, config)?;
        let botlink = &session.botlink;

        match (self.servo, self.target) {
            (Some(servo), Some(target)) => {
                botlink.set_servo(servo, target)?;
                println!("✅ Servo {} target {}", servo, target);
            },
            (Some(_), None) => bail!("missing servo target"),
            _ => {},
        }
        if self.enable || self.disable {
            botlink.enable_servos(self.enable);
            println!("✅ Servos {}", if self.enable { "enabled" } else { "disabled" });
        }
        flush(botlink)
    }
}
