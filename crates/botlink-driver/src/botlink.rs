//! 主机 API 模块
//!
//! 提供对外的 `Botlink` 结构体，封装 IO 线程、共享记录和短命令通道。

use crate::command::CommandRequest;
use crate::error::DriverError;
use crate::health::LinkHealth;
use crate::metrics::{LinkMetrics, MetricsSnapshot};
use crate::pipeline::{PipelineConfig, PipelineContext, io_loop};
use crate::shared::{SharedRecord, Telemetry};
use crate::util::join_io_thread;
use botlink_link::LinkAdapter;
use botlink_protocol::{
    DIGITAL_COUNT, MOTOR_COUNT, PidGains, Reply, Request, SERIAL_PORT_COUNT, SERVO_COUNT,
    StateFrame,
};
use crossbeam_channel::{RecvTimeoutError, Sender, TrySendError};
use std::mem::ManuallyDrop;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{JoinHandle, spawn};
use std::time::{Duration, Instant};
use tracing::{error, info};

/// 命令通道容量
const COMMAND_CHANNEL_CAPACITY: usize = 8;

/// 电机板主机驱动（对外 API）
///
/// 后台 IO 线程独占链路；应用线程通过共享记录读遥测、写目标值，
/// 不参与链路时序。
pub struct Botlink {
    /// 短命令通道
    ///
    /// Drop 时必须在 join IO 线程之前关闭，否则 `io_loop` 收不到 `Disconnected`。
    cmd_tx: ManuallyDrop<Sender<CommandRequest>>,
    shared: Arc<SharedRecord>,
    metrics: Arc<LinkMetrics>,
    health: Arc<LinkHealth>,
    is_running: Arc<AtomicBool>,
    io_thread: Option<JoinHandle<()>>,
    config: PipelineConfig,
    /// 端口名称（诊断用）
    port: String,
    baud_rate: u32,
}

impl Botlink {
    /// 启动 IO 线程并返回驱动句柄
    ///
    /// # 参数
    /// - `link`: 链路适配器（会被移动到 IO 线程）
    /// - `config`: Pipeline 配置（可选）
    pub fn new(link: impl LinkAdapter + Send + 'static, config: Option<PipelineConfig>) -> Self {
        let config = config.unwrap_or_default();
        let (cmd_tx, cmd_rx) = crossbeam_channel::bounded(COMMAND_CHANNEL_CAPACITY);

        let ctx = PipelineContext {
            shared: Arc::new(SharedRecord::new()),
            metrics: Arc::new(LinkMetrics::new()),
            health: Arc::new(LinkHealth::new(config.watchdog_timeout())),
            is_running: Arc::new(AtomicBool::new(true)),
        };

        let io_ctx = ctx.clone();
        let io_config = config.clone();
        let io_thread = spawn(move || {
            io_loop(link, cmd_rx, io_ctx, io_config);
        });

        Self {
            cmd_tx: ManuallyDrop::new(cmd_tx),
            shared: ctx.shared,
            metrics: ctx.metrics,
            health: ctx.health,
            is_running: ctx.is_running,
            io_thread: Some(io_thread),
            config,
            port: "unknown".to_string(),
            baud_rate: 0,
        }
    }

    /// 设置元数据（由 Builder 调用）
    pub(crate) fn with_metadata(mut self, port: String, baud_rate: u32) -> Self {
        self.port = port;
        self.baud_rate = baud_rate;
        self
    }

    // ============================================================
    // 遥测
    // ============================================================

    /// 最近一次验证的遥测（无锁）
    pub fn telemetry(&self) -> Arc<Telemetry> {
        self.shared.telemetry()
    }

    /// 等待收到第一帧有效遥测
    ///
    /// 避免在控制循环开始前基于全零的初始遥测做决策。
    pub fn wait_for_telemetry(&self, timeout: Duration) -> Result<Arc<Telemetry>, DriverError> {
        self.wait_until(timeout, |telemetry| telemetry.is_received())
    }

    /// 等待一帧比当前更新的遥测
    pub fn wait_for_next_telemetry(&self, timeout: Duration) -> Result<Arc<Telemetry>, DriverError> {
        let current = self.shared.telemetry().exchange;
        self.wait_until(timeout, |telemetry| telemetry.exchange > current)
    }

    fn wait_until(
        &self,
        timeout: Duration,
        ready: impl Fn(&Telemetry) -> bool,
    ) -> Result<Arc<Telemetry>, DriverError> {
        let start = Instant::now();
        loop {
            let telemetry = self.shared.telemetry();
            if ready(&telemetry) {
                return Ok(telemetry);
            }
            if start.elapsed() >= timeout {
                return Err(DriverError::Timeout);
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    // ============================================================
    // 电机 / 舵机 / IO 目标
    // ============================================================

    /// 开环输出：速度目标清零，直接施加 `pwm`
    pub fn set_motor_pwm(&self, motor: usize, pwm: i16) -> Result<(), DriverError> {
        let motor = check_index("motor", motor, MOTOR_COUNT)?;
        self.shared.update_command(|cmd| {
            cmd.motor_speed_target[motor] = 0;
            cmd.motor_pwm[motor] = pwm;
        });
        Ok(())
    }

    /// 速度闭环；`speed` 为 0 时电机回到开环并输出 0
    pub fn set_motor_speed(&self, motor: usize, speed: i16) -> Result<(), DriverError> {
        let motor = check_index("motor", motor, MOTOR_COUNT)?;
        self.shared.update_command(|cmd| {
            cmd.motor_speed_target[motor] = speed;
            cmd.motor_pwm[motor] = 0;
            StateFrame::set_bit(&mut cmd.motor_position_mode_bits, motor, false);
        });
        Ok(())
    }

    /// 位置闭环：以不超过 |speed| 的步长逼近 `target`
    pub fn set_motor_position(
        &self,
        motor: usize,
        speed: i16,
        target: i32,
    ) -> Result<(), DriverError> {
        let motor = check_index("motor", motor, MOTOR_COUNT)?;
        if speed == 0 {
            return Err(DriverError::InvalidInput(
                "position mode needs a non-zero speed".to_string(),
            ));
        }
        self.shared.update_command(|cmd| {
            cmd.motor_speed_target[motor] = speed;
            cmd.motor_counter_target[motor] = target;
            cmd.motor_pwm[motor] = 0;
            StateFrame::set_bit(&mut cmd.motor_position_mode_bits, motor, true);
        });
        Ok(())
    }

    /// 所有电机回到开环并输出 0
    pub fn stop_all(&self) {
        self.shared.update_command(|cmd| {
            cmd.motor_speed_target = [0; MOTOR_COUNT];
            cmd.motor_pwm = [0; MOTOR_COUNT];
            cmd.motor_position_mode_bits = 0;
        });
    }

    pub fn set_pid_gains(&self, motor: usize, gains: PidGains) -> Result<(), DriverError> {
        let motor = check_index("motor", motor, MOTOR_COUNT)?;
        self.shared.update_command(|cmd| cmd.pid_gains[motor] = gains);
        Ok(())
    }

    /// 设置所有电机共享的到位阈值、速度容差和加速度限制
    pub fn set_thresholds(&self, position: i32, velocity: i32, accel: i32) {
        self.shared.update_command(|cmd| {
            cmd.position_threshold = position;
            cmd.velocity_threshold = velocity;
            cmd.accel_threshold = accel;
        });
    }

    pub fn set_servo(&self, servo: usize, target: i16) -> Result<(), DriverError> {
        let servo = check_index("servo", servo, SERVO_COUNT)?;
        self.shared.update_command(|cmd| cmd.servo_target[servo] = target);
        Ok(())
    }

    pub fn enable_servos(&self, enabled: bool) {
        self.shared
            .update_command(|cmd| cmd.servos_enabled = u8::from(enabled));
    }

    /// 设置数字输出使能掩码与输出值
    pub fn set_digital_outputs(&self, enable: u8, value: u8) {
        self.shared.update_command(|cmd| {
            cmd.digital_output_enable = enable;
            cmd.digital_output_value = value;
        });
    }

    /// 设置单个数字输出口（同时使能该口输出）
    pub fn set_digital_output(&self, port: usize, value: bool) -> Result<(), DriverError> {
        let port = check_index("digital port", port, DIGITAL_COUNT)?;
        self.shared.update_command(|cmd| {
            StateFrame::set_bit(&mut cmd.digital_output_enable, port, true);
            StateFrame::set_bit(&mut cmd.digital_output_value, port, value);
        });
        Ok(())
    }

    // ============================================================
    // 计数器清零握手
    // ============================================================

    /// 请求清零电机计数器（异步，用 [`pending_clears`](Self::pending_clears) 观察确认）
    pub fn clear_counter(&self, motor: usize) -> Result<(), DriverError> {
        let motor = check_index("motor", motor, MOTOR_COUNT)?;
        self.shared.request_clear(motor);
        Ok(())
    }

    /// 尚未确认的清零请求掩码
    pub fn pending_clears(&self) -> u8 {
        self.shared.pending_clears()
    }

    /// 请求清零并等待设备确认
    ///
    /// 返回完成确认的那一帧遥测（计数器已在设备侧清零）。
    pub fn clear_counter_blocking(
        &self,
        motor: usize,
        timeout: Duration,
    ) -> Result<Arc<Telemetry>, DriverError> {
        self.clear_counter(motor)?;
        let start = Instant::now();
        loop {
            if let Some(ack) = self.shared.clear_ack(motor) {
                return Ok(ack);
            }
            if start.elapsed() >= timeout {
                return Err(DriverError::Timeout);
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    // ============================================================
    // 串口透传
    // ============================================================

    /// 排队发往设备串口的字节，返回接受的字节数
    pub fn write_serial(&self, port: usize, bytes: &[u8]) -> Result<usize, DriverError> {
        let port = check_index("serial port", port, SERIAL_PORT_COUNT)?;
        Ok(self.shared.queue_serial(port, bytes))
    }

    /// 取走设备串口已收到的字节
    pub fn read_serial(&self, port: usize) -> Result<Vec<u8>, DriverError> {
        let port = check_index("serial port", port, SERIAL_PORT_COUNT)?;
        Ok(self.shared.take_serial(port))
    }

    // ============================================================
    // 短命令模式
    // ============================================================

    /// 发送短命令并阻塞等待应答
    ///
    /// 事务由 IO 线程在两次帧交换之间执行；超时上限为
    /// `command_timeout_ms` 加上排队等待的余量。
    ///
    /// # 错误
    /// - `DriverError::ChannelFull`: 命令队列已满
    /// - `DriverError::ChannelClosed`: IO 线程已退出
    /// - `DriverError::Timeout`: 设备未在超时内应答
    pub fn send_command(&self, request: Request) -> Result<Reply, DriverError> {
        let (command, reply_rx) = CommandRequest::new(request);
        self.cmd_tx.try_send(command).map_err(|e| match e {
            TrySendError::Full(_) => DriverError::ChannelFull(COMMAND_CHANNEL_CAPACITY),
            TrySendError::Disconnected(_) => DriverError::ChannelClosed,
        })?;

        let wait = self.config.command_timeout() * (COMMAND_CHANNEL_CAPACITY as u32 + 1);
        match reply_rx.recv_timeout(wait) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(DriverError::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(DriverError::ChannelClosed),
        }
    }

    // ============================================================
    // 健康与诊断
    // ============================================================

    /// 看门狗窗口内是否收到过有效帧
    pub fn is_connected(&self) -> bool {
        self.health.is_alive()
    }

    /// 自上次有效帧以来的时间
    pub fn connection_age(&self) -> Duration {
        self.health.silence()
    }

    /// IO 线程是否仍在运行
    pub fn is_healthy(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
            && self.io_thread.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// 共享记录（高级用法：直接读写命令帧）
    pub fn shared(&self) -> Arc<SharedRecord> {
        self.shared.clone()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }
}

fn check_index(kind: &str, index: usize, count: usize) -> Result<usize, DriverError> {
    if index < count {
        Ok(index)
    } else {
        Err(DriverError::InvalidInput(format!(
            "{} index {} out of range (0..{})",
            kind, index, count
        )))
    }
}

impl Drop for Botlink {
    fn drop(&mut self) {
        // Release：之前的所有写入对 IO 线程可见
        self.is_running.store(false, Ordering::Release);

        // 必须在 join 之前真正 drop 掉 Sender
        unsafe {
            ManuallyDrop::drop(&mut self.cmd_tx);
        }

        let join_timeout = Duration::from_secs(2);
        if let Some(handle) = self.io_thread.take()
            && let Err(e) = join_io_thread(handle, join_timeout)
        {
            error!("IO thread on {} did not shut down cleanly: {}", self.port, e);
        }
        info!("Botlink on {} closed", self.port);
    }
}
