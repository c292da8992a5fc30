//! Tick 调度器
//!
//! 固定周期（默认 10 ms）驱动设备的全部实时工作。启动标志置位之前，
//! tick 只做计时；之后每个 tick 按固定顺序执行：
//!
//! 1. 收集并分类入站窗口，应用最新命令帧或分发短命令
//! 2. 舵机脉冲（轮询，每 tick 一个舵机）
//! 3. 采样按键、模拟量、数字量、加速度计、电池
//! 4. 反电动势测速并积分计数器
//! 5. 电机控制
//! 6. 串口透传
//! 7. 编码遥测并装载下一个发送窗口
//!
//! 测速在控制之前，控制在遥测发布之前。

use crate::config::DeviceConfig;
use crate::context::DeviceContext;
use crate::dispatch::dispatch;
use crate::error::CalibrationError;
use crate::exchange::{DeviceExchange, Inbound};
use crate::hal::{BlockingDelay, Board, MAX_BLOCKING_DELAY_US};
use crate::passthrough::{forward_host_bytes, publish_board_bytes};
use crate::sensing::{BemfSensor, sample_inputs};
use botlink_link::DeviceLink;
use botlink_protocol::{CommandId, MOTOR_COUNT, Reply, SERVO_COUNT};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// 单个 tick 的执行摘要
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub tick: u64,
    /// 启动标志未置位时为 `false`（仅计时）
    pub active: bool,
    /// 本 tick 收到并验证了新命令帧
    pub frame_valid: bool,
    pub realign_offset: Option<usize>,
    /// 本 tick 分发的短命令
    pub command: Option<CommandId>,
    pub command_rejected: bool,
    /// 本 tick 输出脉冲的舵机
    pub servo_pulsed: Option<usize>,
    /// 本 tick 处理的计数器清零请求掩码
    pub counters_cleared: u8,
}

/// Tick 调度器
pub struct TickScheduler<B, D, L> {
    ctx: DeviceContext,
    board: B,
    delay: D,
    exchange: DeviceExchange<L>,
    sensor: BemfSensor,
    last_report: TickReport,
}

impl<B, D, L> TickScheduler<B, D, L>
where
    B: Board,
    D: BlockingDelay,
    L: DeviceLink,
{
    pub fn new(config: DeviceConfig, board: B, delay: D, link: L) -> Self {
        let sensor = BemfSensor::new(&config);
        Self {
            ctx: DeviceContext::new(config),
            board,
            delay,
            exchange: DeviceExchange::new(link),
            sensor,
            last_report: TickReport::default(),
        }
    }

    /// 一次性启动：反电动势标定，装载第一帧遥测，置位启动标志
    ///
    /// 标定越界不阻止启动，错误原样返回给调用方记录。
    pub fn startup(&mut self) -> Result<(), CalibrationError> {
        let calibration = self.sensor.calibrate(&mut self.board, &mut self.delay);
        if let Err(e) = &calibration {
            warn!("Starting with out-of-range calibration: {}", e);
        }

        sample_inputs(&mut self.board, &mut self.ctx.telemetry);
        let telemetry = self.ctx.publish_telemetry();
        self.exchange.arm(&telemetry);
        self.ctx.startup_complete = true;
        info!("Device startup complete");
        calibration
    }

    /// 执行一个 tick
    pub fn tick(&mut self) -> &TickReport {
        self.ctx.tick_count += 1;
        let mut report = TickReport {
            tick: self.ctx.tick_count,
            ..Default::default()
        };

        if !self.ctx.startup_complete {
            self.last_report = report;
            return &self.last_report;
        }
        report.active = true;

        self.apply_inbound(&mut report);
        report.servo_pulsed = self.pulse_servo();

        self.board.write_digital(
            self.ctx.inputs.digital_output_enable,
            self.ctx.inputs.digital_output_value,
        );
        sample_inputs(&mut self.board, &mut self.ctx.telemetry);

        let speeds = self.sensor.sense_all(&mut self.board, &mut self.delay);
        for (motor, speed) in self.ctx.motors.iter_mut().zip(speeds) {
            motor.record_speed(speed);
        }

        report.counters_cleared = self.ctx.service_clear_requests();
        self.run_control();

        forward_host_bytes(&mut self.ctx, &mut self.board);
        publish_board_bytes(&mut self.ctx, &mut self.board);

        let telemetry = self.ctx.publish_telemetry();
        self.exchange.arm(&telemetry);

        trace!("tick {} done: {:?}", report.tick, report);
        self.last_report = report;
        &self.last_report
    }

    fn apply_inbound(&mut self, report: &mut TickReport) {
        match self.exchange.collect() {
            Inbound::Frame { offset } => {
                if let Some(frame) = self.exchange.command() {
                    self.ctx.inputs.apply_frame(&frame);
                }
                report.frame_valid = true;
                report.realign_offset = Some(offset);
            },
            Inbound::Command(Ok(request)) => {
                report.command = Some(request.id());
                let reply = dispatch(&mut self.ctx, &mut self.board, &request);
                self.queue_reply(&reply);
            },
            Inbound::Command(Err(e)) => {
                debug!("Rejecting command packet: {}", e);
                report.command_rejected = true;
                self.queue_reply(&Reply::rejected());
            },
            Inbound::Invalid => {
                trace!("Invalid inbound window, keeping previous command");
            },
            Inbound::Empty => {},
        }
    }

    fn queue_reply(&mut self, reply: &Reply) {
        if let Err(e) = self.exchange.queue_reply(reply) {
            warn!("Failed to encode reply: {}", e);
            // 空的拒绝应答总能编码
            let _ = self.exchange.queue_reply(&Reply::rejected());
        }
    }

    /// 轮询输出一个舵机脉冲：`pulse = scale * (target + offset)` 微秒
    fn pulse_servo(&mut self) -> Option<usize> {
        if !self.ctx.inputs.servos_enabled {
            return None;
        }
        let servo = self.ctx.servo_cursor;
        self.ctx.servo_cursor = (servo + 1) % SERVO_COUNT;

        let config = &self.ctx.config;
        let width = config.servo_scale as i64
            * (self.ctx.inputs.servo_target[servo] as i64 + config.servo_offset as i64);
        let width = width.clamp(0, MAX_BLOCKING_DELAY_US as i64) as u32;

        self.board.set_servo_line(servo, true);
        self.delay.delay_us(width);
        self.board.set_servo_line(servo, false);
        Some(servo)
    }

    fn run_control(&mut self) {
        let limits = self.ctx.limits();
        let thresholds = self.ctx.inputs.thresholds;
        for motor in 0..MOTOR_COUNT {
            let target = self.ctx.inputs.motor_target(motor);
            let gains = self.ctx.inputs.gains[motor];
            let pwm = self.ctx.motors[motor].update(&target, &gains, &thresholds, &limits);
            self.board.set_motor_pwm(motor, pwm);
        }
    }

    pub fn context(&self) -> &DeviceContext {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut DeviceContext {
        &mut self.ctx
    }

    pub fn board(&self) -> &B {
        &self.board
    }

    pub fn board_mut(&mut self) -> &mut B {
        &mut self.board
    }

    pub fn delay(&self) -> &D {
        &self.delay
    }

    pub fn exchange(&self) -> &DeviceExchange<L> {
        &self.exchange
    }

    pub fn link_mut(&mut self) -> &mut L {
        self.exchange.link_mut()
    }

    pub fn last_report(&self) -> &TickReport {
        &self.last_report
    }

    pub fn tick_count(&self) -> u64 {
        self.ctx.tick_count
    }

    /// 按 tick 计数换算的运行时间
    pub fn uptime(&self) -> Duration {
        self.ctx.config.tick_period() * self.ctx.tick_count as u32
    }
}

/// 以配置的周期驱动 tick，直到 `stop` 置位
///
/// 使用绝对截止时间累加，单个 tick 的抖动不会累积；超时的 tick 记录告警后立即追赶。
/// 返回执行的 tick 数。
pub fn run_periodic<B, D, L>(scheduler: &mut TickScheduler<B, D, L>, stop: &AtomicBool) -> u64
where
    B: Board,
    D: BlockingDelay,
    L: DeviceLink,
{
    let period = scheduler.context().config.tick_period();
    let sleeper = spin_sleep::SpinSleeper::default();
    let mut deadline = Instant::now() + period;
    let mut ticks = 0;

    while !stop.load(Ordering::Acquire) {
        scheduler.tick();
        ticks += 1;

        let now = Instant::now();
        if now > deadline {
            warn!(
                "Tick {} overran its period by {:?}",
                scheduler.tick_count(),
                now - deadline
            );
            deadline = now;
        } else {
            sleeper.sleep(deadline - now);
        }
        deadline += period;
    }
    ticks
}
