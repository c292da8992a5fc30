//! 主机侧共享记录
//!
//! IO 线程与应用线程之间唯一的共享状态：
//!
//! - **遥测**：`ArcSwap<Telemetry>`，IO 线程每次交换后整体替换，读取无锁
//! - **命令记录**：`parking_lot::Mutex`，应用线程写目标值，IO 线程每次交换前拷贝一次
//!
//! 计数器清零握手：应用置位请求后，请求位一直保持，直到一个比携带该请求的交换
//! 更晚的交换收到了该位已清除的遥测；此时 IO 线程在命令记录中清除请求位，
//! 应用看到请求位消失即为确认。

use arc_swap::ArcSwap;
use botlink_protocol::{
    DEFAULT_ACCEL_THRESHOLD, DEFAULT_POSITION_THRESHOLD, DEFAULT_VELOCITY_THRESHOLD,
    MOTOR_COUNT, SERIAL_BUFFER_SIZE, SERIAL_PORT_COUNT, StateFrame,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, warn};

/// 每个串口接收队列的容量（字节），超出时丢弃最旧的数据
pub const SERIAL_RX_CAPACITY: usize = 4096;

/// 最近一次验证的遥测
#[derive(Debug, Clone, Default)]
pub struct Telemetry {
    pub frame: StateFrame,
    /// 产生该帧的交换序号，0 表示尚未收到任何帧
    pub exchange: u64,
    /// 该帧确认的清零请求掩码
    pub acknowledged_clears: u8,
}

impl Telemetry {
    pub fn is_received(&self) -> bool {
        self.exchange > 0
    }
}

/// 一次发布的处理结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishSummary {
    /// 本次确认的清零请求掩码
    pub acknowledged_clears: u8,
    /// 本次收到的透传字节数
    pub serial_bytes: usize,
    /// 本次交换确认发出的透传字节数
    pub serial_sent: usize,
}

#[derive(Debug)]
struct CommandState {
    frame: StateFrame,
    /// 首次携带清零请求的交换序号
    clear_carried: [Option<u64>; MOTOR_COUNT],
    /// 最近一次确认清零的遥测，新请求时清空
    clear_acks: [Option<Arc<Telemetry>>; MOTOR_COUNT],
    serial_tx: [VecDeque<u8>; SERIAL_PORT_COUNT],
    /// 已装入命令帧、尚未随一次成功交换发出的透传块长度
    serial_unconfirmed: [usize; SERIAL_PORT_COUNT],
}

#[derive(Debug, Default)]
struct SerialInbound {
    queues: [VecDeque<u8>; SERIAL_PORT_COUNT],
    last_seq: [u8; SERIAL_PORT_COUNT],
}

/// 共享记录
pub struct SharedRecord {
    telemetry: ArcSwap<Telemetry>,
    command: Mutex<CommandState>,
    serial_rx: Mutex<SerialInbound>,
}

impl SharedRecord {
    pub fn new() -> Self {
        let mut frame = StateFrame::new();
        frame.position_threshold = DEFAULT_POSITION_THRESHOLD;
        frame.velocity_threshold = DEFAULT_VELOCITY_THRESHOLD;
        frame.accel_threshold = DEFAULT_ACCEL_THRESHOLD;
        Self {
            telemetry: ArcSwap::from_pointee(Telemetry::default()),
            command: Mutex::new(CommandState {
                frame,
                clear_carried: [None; MOTOR_COUNT],
                clear_acks: Default::default(),
                serial_tx: Default::default(),
                serial_unconfirmed: [0; SERIAL_PORT_COUNT],
            }),
            serial_rx: Mutex::new(SerialInbound::default()),
        }
    }

    /// 最新遥测快照（无锁）
    pub fn telemetry(&self) -> Arc<Telemetry> {
        self.telemetry.load_full()
    }

    /// 当前命令记录的副本
    pub fn command_frame(&self) -> StateFrame {
        self.command.lock().frame
    }

    /// 在锁内修改命令记录
    ///
    /// 闭包应当只做字段赋值，锁在闭包返回后立即释放。
    pub fn update_command<R>(&self, f: impl FnOnce(&mut StateFrame) -> R) -> R {
        f(&mut self.command.lock().frame)
    }

    /// 请求清零电机计数器
    pub fn request_clear(&self, motor: usize) {
        let mut cmd = self.command.lock();
        StateFrame::set_bit(&mut cmd.frame.motor_clear_counter_bits, motor, true);
        if let Some(ack) = cmd.clear_acks.get_mut(motor) {
            *ack = None;
        }
    }

    /// 确认电机 `motor` 最近一次清零请求的遥测帧
    pub fn clear_ack(&self, motor: usize) -> Option<Arc<Telemetry>> {
        self.command.lock().clear_acks.get(motor).cloned().flatten()
    }

    /// 尚未确认的清零请求掩码
    pub fn pending_clears(&self) -> u8 {
        self.command.lock().frame.motor_clear_counter_bits
    }

    /// 排队待发往设备串口的字节
    pub fn queue_serial(&self, port: usize, bytes: &[u8]) -> usize {
        match self.command.lock().serial_tx.get_mut(port) {
            Some(queue) => {
                queue.extend(bytes.iter().copied());
                bytes.len()
            },
            None => 0,
        }
    }

    /// 取走设备串口已收到的字节
    pub fn take_serial(&self, port: usize) -> Vec<u8> {
        self.serial_rx
            .lock()
            .queues
            .get_mut(port)
            .map(|queue| queue.drain(..).collect())
            .unwrap_or_default()
    }

    /// 准备第 `exchange` 次交换的出站帧（IO 线程调用）
    ///
    /// 装入新的透传块，记录清零请求首次被携带的交换序号，写入魔数。
    /// 交换失败后以同一序号再次调用是安全的：未发出的透传块不会被覆盖。
    pub fn prepare_outbound(&self, exchange: u64) -> StateFrame {
        let mut cmd = self.command.lock();
        let cmd = &mut *cmd;

        for port in 0..SERIAL_PORT_COUNT {
            if cmd.serial_unconfirmed[port] > 0 || cmd.serial_tx[port].is_empty() {
                continue;
            }
            let n = cmd.serial_tx[port].len().min(SERIAL_BUFFER_SIZE);
            let chunk: Vec<u8> = cmd.serial_tx[port].drain(..n).collect();
            cmd.serial_unconfirmed[port] = cmd.frame.serial[port].load(&chunk);
        }

        for motor in 0..MOTOR_COUNT {
            let requested = StateFrame::bit(cmd.frame.motor_clear_counter_bits, motor);
            match (requested, cmd.clear_carried[motor]) {
                (true, None) => cmd.clear_carried[motor] = Some(exchange),
                (false, Some(_)) => cmd.clear_carried[motor] = None,
                _ => {},
            }
        }

        cmd.frame.mark_valid();
        cmd.frame
    }

    /// 发布第 `exchange` 次交换收到的遥测（IO 线程调用）
    pub fn publish(&self, frame: StateFrame, exchange: u64) -> PublishSummary {
        let mut summary = PublishSummary::default();
        let telemetry = {
            let mut cmd = self.command.lock();
            let cmd = &mut *cmd;
            summary.serial_sent = cmd.serial_unconfirmed.iter().sum();
            cmd.serial_unconfirmed = [0; SERIAL_PORT_COUNT];

            for motor in 0..MOTOR_COUNT {
                let Some(carried) = cmd.clear_carried[motor] else {
                    continue;
                };
                if exchange > carried && !StateFrame::bit(frame.motor_clear_counter_bits, motor) {
                    StateFrame::set_bit(&mut cmd.frame.motor_clear_counter_bits, motor, false);
                    cmd.clear_carried[motor] = None;
                    summary.acknowledged_clears |= 1 << motor;
                }
            }

            let telemetry = Arc::new(Telemetry {
                frame,
                exchange,
                acknowledged_clears: summary.acknowledged_clears,
            });
            for motor in 0..MOTOR_COUNT {
                if StateFrame::bit(summary.acknowledged_clears, motor) {
                    cmd.clear_acks[motor] = Some(telemetry.clone());
                }
            }
            telemetry
        };
        if summary.acknowledged_clears != 0 {
            debug!(
                "Counter clear acknowledged: {:04b}",
                summary.acknowledged_clears
            );
        }

        {
            let mut rx = self.serial_rx.lock();
            for (port, buffer) in frame.serial.iter().enumerate() {
                if buffer.status == rx.last_seq[port] {
                    continue;
                }
                rx.last_seq[port] = buffer.status;
                let bytes = buffer.bytes();
                let queue = &mut rx.queues[port];
                queue.extend(bytes.iter().copied());
                if queue.len() > SERIAL_RX_CAPACITY {
                    let overflow = queue.len() - SERIAL_RX_CAPACITY;
                    queue.drain(..overflow);
                    warn!("Serial port {} receive queue full, dropped {} bytes", port, overflow);
                }
                summary.serial_bytes += bytes.len();
            }
        }

        self.telemetry.store(telemetry);
        summary
    }
}

impl Default for SharedRecord {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn telemetry_with_clear_bits(bits: u8) -> StateFrame {
        let mut frame = StateFrame::new();
        frame.motor_clear_counter_bits = bits;
        frame.mark_valid();
        frame
    }

    #[test]
    fn test_defaults_match_device() {
        let shared = SharedRecord::new();
        let cmd = shared.command_frame();
        assert_eq!(cmd.position_threshold, DEFAULT_POSITION_THRESHOLD);
        assert_eq!(cmd.pid_gains[0], botlink_protocol::PidGains::DEFAULT);
        assert!(!shared.telemetry().is_received());
    }

    #[test]
    fn test_clear_ack_needs_later_exchange() {
        let shared = SharedRecord::new();
        shared.request_clear(1);

        let out = shared.prepare_outbound(5);
        assert!(StateFrame::bit(out.motor_clear_counter_bits, 1));

        // 同一次交换收到的遥测是设备看到请求之前生成的，不算确认
        let summary = shared.publish(telemetry_with_clear_bits(0), 5);
        assert_eq!(summary.acknowledged_clears, 0);
        assert_eq!(shared.pending_clears(), 0b10);

        shared.prepare_outbound(6);
        let summary = shared.publish(telemetry_with_clear_bits(0), 6);
        assert_eq!(summary.acknowledged_clears, 0b10);
        assert_eq!(shared.telemetry().acknowledged_clears, 0b10);
        assert_eq!(shared.clear_ack(1).map(|t| t.exchange), Some(6));
        assert!(shared.clear_ack(0).is_none());

        // 新请求清除旧的确认
        shared.request_clear(1);
        assert!(shared.clear_ack(1).is_none());
        assert_eq!(shared.pending_clears(), 0);
        assert!(!StateFrame::bit(shared.prepare_outbound(7).motor_clear_counter_bits, 1));
    }

    #[test]
    fn test_clear_not_acked_while_device_reports_bit() {
        let shared = SharedRecord::new();
        shared.request_clear(0);
        shared.prepare_outbound(1);
        shared.publish(telemetry_with_clear_bits(0b01), 2);
        assert_eq!(shared.pending_clears(), 0b01);
    }

    #[test]
    fn test_serial_chunks_sent_once_each() {
        let shared = SharedRecord::new();
        let data: Vec<u8> = (0..40).collect();
        assert_eq!(shared.queue_serial(0, &data), 40);

        let first = shared.prepare_outbound(1);
        assert_eq!(first.serial[0].bytes(), &data[..32]);
        assert_eq!(first.serial[0].status, 1);

        // 交换失败后重试：同一块、同一序号
        let retry = shared.prepare_outbound(1);
        assert_eq!(retry.serial[0], first.serial[0]);

        assert_eq!(shared.publish(StateFrame::new(), 1).serial_sent, 32);
        let second = shared.prepare_outbound(2);
        assert_eq!(second.serial[0].bytes(), &data[32..]);
        assert_eq!(second.serial[0].status, 2);

        shared.publish(StateFrame::new(), 2);
        let idle = shared.prepare_outbound(3);
        assert_eq!(idle.serial[0].status, 2);
    }

    #[test]
    fn test_serial_rx_delivered_per_sequence() {
        let shared = SharedRecord::new();
        let mut frame = StateFrame::new();
        frame.serial[1].load(b"hello");

        assert_eq!(shared.publish(frame, 1).serial_bytes, 5);
        assert_eq!(shared.publish(frame, 2).serial_bytes, 0);
        assert_eq!(shared.take_serial(1), b"hello");
        assert!(shared.take_serial(1).is_empty());
        assert!(shared.take_serial(9).is_empty());
    }

    #[test]
    fn test_publish_replaces_telemetry() {
        let shared = SharedRecord::new();
        let mut frame = StateFrame::new();
        frame.motor_speed[3] = -12;
        frame.mark_valid();
        shared.publish(frame, 9);
        let t = shared.telemetry();
        assert_eq!(t.exchange, 9);
        assert_eq!(t.frame.motor_speed[3], -12);
    }
}
