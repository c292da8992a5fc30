//! Pipeline IO 循环模块
//!
//! 后台 IO 线程独占链路适配器，循环执行：
//!
//! 1. 处理排队的短命令事务（有数量和时间预算）
//! 2. 从共享记录取出命令帧，执行一次帧交换
//! 3. 发布遥测，登记链路健康状态
//! 4. 看门狗：距上一帧超过 `watchdog_timeout_ms` 时复位设备

use crate::command::CommandRequest;
use crate::exchange::LinkExchange;
use crate::health::LinkHealth;
use crate::metrics::LinkMetrics;
use crate::shared::SharedRecord;
use crossbeam_channel::{Receiver, TryRecvError};
use botlink_link::{LinkAdapter, LinkError};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{error, info, trace, warn};

/// Pipeline 配置
///
/// # Example
///
/// ```
/// use botlink_driver::PipelineConfig;
///
/// // 默认配置（20ms 接收超时，500ms 看门狗）
/// let config = PipelineConfig::default();
///
/// // 自定义配置
/// let config = PipelineConfig {
///     receive_timeout_ms: 50,
///     watchdog_timeout_ms: 1000,
///     idle_backoff_us: 200,
///     command_timeout_ms: 100,
/// };
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PipelineConfig {
    /// 链路单字节接收超时（毫秒）
    pub receive_timeout_ms: u64,
    /// 看门狗超时（毫秒）：超过此时间没有收到有效帧则复位设备
    pub watchdog_timeout_ms: u64,
    /// 非超时类链路错误后的退避时间（微秒）
    pub idle_backoff_us: u64,
    /// 短命令事务超时（毫秒）
    pub command_timeout_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            receive_timeout_ms: 20,
            watchdog_timeout_ms: 500,
            idle_backoff_us: 500,
            command_timeout_ms: 100,
        }
    }
}

impl PipelineConfig {
    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    pub fn watchdog_timeout(&self) -> Duration {
        Duration::from_millis(self.watchdog_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

/// IO 线程依赖的共享对象
#[derive(Clone)]
pub struct PipelineContext {
    pub shared: Arc<SharedRecord>,
    pub metrics: Arc<LinkMetrics>,
    pub health: Arc<LinkHealth>,
    /// 运行标志（Drop 时置为 false）
    pub is_running: Arc<AtomicBool>,
}

/// IO 线程循环
///
/// # 参数
/// - `link`: 链路适配器（在循环中独占）
/// - `cmd_rx`: 短命令请求通道
/// - `ctx`: 共享对象
/// - `config`: Pipeline 配置
///
/// 运行标志被清除、命令通道断开或链路出现致命错误时退出。
pub fn io_loop(
    mut link: impl LinkAdapter,
    cmd_rx: Receiver<CommandRequest>,
    ctx: PipelineContext,
    config: PipelineConfig,
) {
    #[cfg(feature = "realtime")]
    {
        use thread_priority::*;

        match set_current_thread_priority(ThreadPriority::Max) {
            Ok(_) => info!("IO thread priority set to MAX (realtime)"),
            Err(e) => warn!(
                "Failed to set IO thread priority: {}. \
                On Linux, you may need to run with CAP_SYS_NICE or use rtkit.",
                e
            ),
        }
    }

    link.set_receive_timeout(config.receive_timeout());
    let backoff = Duration::from_micros(config.idle_backoff_us);
    let mut exchange = LinkExchange::new();

    info!("IO loop started");
    loop {
        // Acquire: If we see false, we must see all cleanup writes from other threads
        if !ctx.is_running.load(Ordering::Acquire) {
            trace!("IO thread: is_running flag is false, exiting");
            break;
        }

        if drain_command_queue(&mut link, &mut exchange, &cmd_rx, &ctx, &config) {
            // 命令通道断开，退出循环
            break;
        }

        let index = exchange.exchange_count() + 1;
        let outbound = ctx.shared.prepare_outbound(index);
        match exchange.exchange(&mut link, &outbound) {
            Ok(outcome) => {
                let summary = ctx.shared.publish(outcome.telemetry, outcome.index);
                ctx.health.record_valid();

                let m = &ctx.metrics;
                m.exchanges_total.fetch_add(1, Ordering::Relaxed);
                if outcome.discarded > 0 {
                    m.resync_events.fetch_add(1, Ordering::Relaxed);
                    m.resync_discarded_bytes
                        .fetch_add(outcome.discarded as u64, Ordering::Relaxed);
                }
                m.serial_rx_bytes
                    .fetch_add(summary.serial_bytes as u64, Ordering::Relaxed);
                m.serial_tx_bytes
                    .fetch_add(summary.serial_sent as u64, Ordering::Relaxed);
            },
            Err(crate::DriverError::Link(LinkError::Timeout)) => {
                // 设备还没装载下一窗口，正常现象
                ctx.metrics.link_timeouts.fetch_add(1, Ordering::Relaxed);
            },
            Err(crate::DriverError::Link(e)) if e.is_fatal() => {
                error!("Fatal link error, IO loop exiting: {}", e);
                break;
            },
            Err(e) => {
                warn!("Exchange failed: {}", e);
                ctx.metrics.link_errors.fetch_add(1, Ordering::Relaxed);
                spin_sleep::sleep(backoff);
            },
        }

        check_watchdog(&mut link, &mut exchange, &ctx);
    }
    info!("IO loop stopped");
}

/// 每轮最多处理的短命令数
const MAX_COMMANDS_PER_CYCLE: usize = 4;

/// 处理排队的短命令事务
///
/// 每个事务至少占用一个设备 tick，限制单轮数量避免命令洪峰长时间阻塞帧交换。
///
/// # 返回值
/// 返回是否检测到通道已断开（Disconnected）。
fn drain_command_queue(
    link: &mut impl LinkAdapter,
    exchange: &mut LinkExchange,
    cmd_rx: &Receiver<CommandRequest>,
    ctx: &PipelineContext,
    config: &PipelineConfig,
) -> bool {
    for _ in 0..MAX_COMMANDS_PER_CYCLE {
        match cmd_rx.try_recv() {
            Ok(command) => {
                let result = exchange.command(link, &command.request, config.command_timeout());
                match &result {
                    Ok(reply) => {
                        ctx.metrics.commands_total.fetch_add(1, Ordering::Relaxed);
                        ctx.health.record_valid();
                        trace!("{:?} -> {:?}", command.request.id(), reply);
                    },
                    Err(e) => {
                        ctx.metrics.commands_failed.fetch_add(1, Ordering::Relaxed);
                        warn!("Command {:?} failed: {}", command.request.id(), e);
                    },
                }
                // 调用方可能已经放弃等待
                let _ = command.reply_tx.send(result);
            },
            Err(TryRecvError::Empty) => break,
            Err(TryRecvError::Disconnected) => return true,
        }
    }
    false
}

/// 看门狗：链路静默超时后复位设备，两次复位之间至少间隔一个超时周期
fn check_watchdog(
    link: &mut impl LinkAdapter,
    exchange: &mut LinkExchange,
    ctx: &PipelineContext,
) {
    let Some(silent) = ctx.health.watchdog_due() else {
        return;
    };

    warn!("No valid frame for {:?}, resetting device", silent);
    ctx.metrics.watchdog_resets.fetch_add(1, Ordering::Relaxed);
    if let Err(e) = link.reset_device() {
        error!("Device reset failed: {}", e);
    }
    exchange.reset_scan();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandRequest;
    use botlink_link::{DeviceLink, SimBus, SimDevice, SimHost};
    use botlink_protocol::{FRAME_SIZE, Reply, Request, StateFrame, realign_frame};
    use crossbeam_channel::Sender;
    use std::sync::atomic::AtomicI32;
    use std::thread::{self, JoinHandle};

    fn fast_config() -> PipelineConfig {
        PipelineConfig {
            receive_timeout_ms: 5,
            watchdog_timeout_ms: 40,
            idle_backoff_us: 100,
            command_timeout_ms: 100,
        }
    }

    fn context() -> PipelineContext {
        PipelineContext {
            shared: Arc::new(SharedRecord::new()),
            metrics: Arc::new(LinkMetrics::new()),
            health: Arc::new(LinkHealth::new(Duration::from_millis(40))),
            is_running: Arc::new(AtomicBool::new(true)),
        }
    }

    fn spawn_io(
        host: SimHost,
        ctx: &PipelineContext,
    ) -> (Sender<CommandRequest>, JoinHandle<()>) {
        let (cmd_tx, cmd_rx) = crossbeam_channel::bounded(4);
        let ctx = ctx.clone();
        let handle = thread::spawn(move || io_loop(host, cmd_rx, ctx, fast_config()));
        (cmd_tx, handle)
    }

    /// 最小设备仿真：每 5ms 收集一次窗口，回放收到的速度目标，或应答状态查询
    fn spawn_device(
        mut device: SimDevice,
        stop: Arc<AtomicBool>,
        seen_target: Arc<AtomicI32>,
    ) -> JoinHandle<()> {
        thread::spawn(move || {
            let mut tick = 0;
            while !stop.load(Ordering::Acquire) {
                let mut window = [0u8; FRAME_SIZE];
                let n = device.collect(&mut window);
                let mut reply = None;
                if n > 0 {
                    if realign_frame(&mut window).is_some() {
                        if let Ok(frame) = StateFrame::decode(&window) {
                            seen_target
                                .store(frame.motor_speed_target[0] as i32, Ordering::Release);
                        }
                    } else if let Some(start) =
                        botlink_protocol::find_marker(&window[..n], botlink_protocol::command::REQUEST_MARKER)
                    {
                        if Request::decode(&window[start..n]).is_ok() {
                            reply = Some(Reply::ok(vec![tick as u16]));
                        }
                    }
                }

                tick += 1;
                match reply {
                    Some(reply) => device.arm(&reply.encode().unwrap()),
                    None => {
                        let mut frame = StateFrame::new();
                        frame.motor_counter[0] = tick;
                        frame.mark_valid();
                        device.arm(&frame.to_bytes());
                    },
                }
                thread::sleep(Duration::from_millis(5));
            }
        })
    }

    fn stop_io(ctx: &PipelineContext, handle: JoinHandle<()>) {
        ctx.is_running.store(false, Ordering::Release);
        handle.join().unwrap();
    }

    #[test]
    fn test_exchanges_publish_telemetry_and_carry_commands() {
        let (host, device) = SimBus::pair();
        let stop = Arc::new(AtomicBool::new(false));
        let seen = Arc::new(AtomicI32::new(0));
        let device_thread = spawn_device(device, stop.clone(), seen.clone());

        let ctx = context();
        ctx.shared.update_command(|cmd| cmd.motor_speed_target[0] = 321);
        let (_cmd_tx, io) = spawn_io(host, &ctx);

        thread::sleep(Duration::from_millis(150));
        let telemetry = ctx.shared.telemetry();
        assert!(telemetry.is_received());
        assert!(telemetry.frame.is_valid());
        assert!(telemetry.frame.motor_counter[0] > 0);
        assert_eq!(seen.load(Ordering::Acquire), 321);
        assert!(ctx.metrics.snapshot().exchanges_total > 5);
        assert!(ctx.health.is_alive());
        assert!(ctx.health.valid_frames() > 5);

        stop_io(&ctx, io);
        stop.store(true, Ordering::Release);
        device_thread.join().unwrap();
    }

    #[test]
    fn test_command_transaction_through_io_loop() {
        let (host, device) = SimBus::pair();
        let stop = Arc::new(AtomicBool::new(false));
        let device_thread = spawn_device(device, stop.clone(), Arc::new(AtomicI32::new(0)));

        let ctx = context();
        let (cmd_tx, io) = spawn_io(host, &ctx);
        thread::sleep(Duration::from_millis(20));

        let (command, reply_rx) = CommandRequest::new(Request::StatusRead);
        cmd_tx.send(command).unwrap();
        let reply = reply_rx
            .recv_timeout(Duration::from_millis(500))
            .unwrap()
            .unwrap();
        assert!(!reply.error);
        assert_eq!(reply.words.len(), 1);
        assert_eq!(ctx.metrics.snapshot().commands_total, 1);

        stop_io(&ctx, io);
        stop.store(true, Ordering::Release);
        device_thread.join().unwrap();
    }

    #[test]
    fn test_watchdog_resets_silent_link() {
        let (host, _device) = SimBus::pair();
        let ctx = context();
        let (_cmd_tx, io) = spawn_io(host, &ctx);

        thread::sleep(Duration::from_millis(200));
        stop_io(&ctx, io);

        let snapshot = ctx.metrics.snapshot();
        assert!(snapshot.watchdog_resets >= 2, "{:?}", snapshot);
        assert!(snapshot.link_timeouts > 0);
        assert_eq!(snapshot.exchanges_total, 0);
        assert!(!ctx.shared.telemetry().is_received());
    }

    #[test]
    fn test_loop_exits_when_command_channel_closes() {
        let (host, _device) = SimBus::pair();
        let ctx = context();
        let (cmd_tx, io) = spawn_io(host, &ctx);
        drop(cmd_tx);
        io.join().unwrap();
        assert!(ctx.is_running.load(Ordering::Acquire));
    }

    #[test]
    fn test_loop_exits_on_device_disconnect() {
        let (host, device) = SimBus::pair();
        let ctx = context();
        let (_cmd_tx, io) = spawn_io(host, &ctx);
        thread::sleep(Duration::from_millis(10));
        drop(device);
        io.join().unwrap();
    }
}
