//! 仿真板卡
//!
//! 确定性的电机/传感器模型，用于测试和 `botlink-cli sim`。
//!
//! 电机模型为一阶惯性：每个驱动区间结束（`motor_off`）时
//! `speed += (pwm - speed) / 4`，位置按速度积分。反电动势通道输出
//! `bias + |speed|`，转向决定落在哪个通道；奇数号电机的两个通道接线互换。

use crate::hal::Board;
use botlink_protocol::{ANALOG_COUNT, MOTOR_COUNT, SERIAL_PORT_COUNT, SERVO_COUNT};
use parking_lot::{Mutex, MutexGuard};
use std::collections::VecDeque;
use std::sync::Arc;

/// 电机时间常数（tick）
const MOTOR_TAU: i32 = 4;

/// 单个仿真电机
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimMotor {
    pub pwm: i16,
    pub driving: bool,
    /// 真实速度（计数/tick）
    pub speed: i32,
    /// 真实位置（计数）
    pub position: i64,
}

/// 仿真板卡的全部外设状态
#[derive(Debug, Clone)]
pub struct SimPlant {
    pub motors: [SimMotor; MOTOR_COUNT],
    /// 每电机 [正向, 反向] 通道静态偏置
    pub bemf_bias: [[u16; 2]; MOTOR_COUNT],
    pub analog: [u16; ANALOG_COUNT],
    pub digital_in: u8,
    pub digital_output_enable: u8,
    pub digital_output_value: u8,
    pub accel: [i16; 3],
    pub battery: u16,
    pub button: u8,
    pub servo_line: [bool; SERVO_COUNT],
    /// 每个舵机累计输出的脉冲数
    pub servo_pulses: [u64; SERVO_COUNT],
    /// 设备写出到串口的字节
    pub uart_out: [Vec<u8>; SERIAL_PORT_COUNT],
    /// 外部设备发来、等待设备读取的字节
    pub uart_in: [VecDeque<u8>; SERIAL_PORT_COUNT],
    pub uart_flags: [u16; SERIAL_PORT_COUNT],
}

impl Default for SimPlant {
    fn default() -> Self {
        Self {
            motors: [SimMotor::default(); MOTOR_COUNT],
            bemf_bias: [[6, 9]; MOTOR_COUNT],
            analog: [512; ANALOG_COUNT],
            digital_in: 0,
            digital_output_enable: 0,
            digital_output_value: 0,
            accel: [0, 0, 256],
            battery: 7400,
            button: 0,
            servo_line: [false; SERVO_COUNT],
            servo_pulses: [0; SERVO_COUNT],
            uart_out: Default::default(),
            uart_in: Default::default(),
            uart_flags: [0; SERIAL_PORT_COUNT],
        }
    }
}

impl SimPlant {
    pub fn set_bemf_bias(&mut self, motor: usize, bias: [u16; 2]) {
        self.bemf_bias[motor] = bias;
    }

    /// 直接设定电机真实速度（外力拖动）
    pub fn set_motor_speed(&mut self, motor: usize, speed: i32) {
        self.motors[motor].speed = speed;
    }

    /// 模拟外部设备向串口发送数据
    pub fn push_uart_input(&mut self, port: usize, bytes: &[u8]) {
        self.uart_in[port].extend(bytes.iter().copied());
    }

    /// 取走设备已经写出到串口的数据
    pub fn take_uart_output(&mut self, port: usize) -> Vec<u8> {
        std::mem::take(&mut self.uart_out[port])
    }

    fn advance(&mut self, motor: usize) {
        let m = &mut self.motors[motor];
        m.speed += (m.pwm as i32 - m.speed) / MOTOR_TAU;
        m.position += m.speed as i64;
    }
}

/// 仿真板卡
///
/// 外设状态放在 `Arc<Mutex<_>>` 中，测试或 CLI 可以在设备运行期间观察和注入。
#[derive(Debug, Clone, Default)]
pub struct SimBoard {
    plant: Arc<Mutex<SimPlant>>,
}

impl SimBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_plant(plant: SimPlant) -> Self {
        Self {
            plant: Arc::new(Mutex::new(plant)),
        }
    }

    /// 锁定外设状态
    pub fn lock(&self) -> MutexGuard<'_, SimPlant> {
        self.plant.lock()
    }

    /// 共享句柄（跨线程观察）
    pub fn handle(&self) -> Arc<Mutex<SimPlant>> {
        self.plant.clone()
    }
}

impl Board for SimBoard {
    fn set_motor_pwm(&mut self, motor: usize, pwm: i16) {
        let mut plant = self.plant.lock();
        plant.motors[motor].pwm = pwm;
        plant.motors[motor].driving = true;
    }

    fn motor_off(&mut self, motor: usize) {
        let mut plant = self.plant.lock();
        if plant.motors[motor].driving {
            plant.advance(motor);
            plant.motors[motor].driving = false;
        }
    }

    fn read_bemf_pair(&mut self, motor: usize) -> [u16; 2] {
        let plant = self.plant.lock();
        let speed = plant.motors[motor].speed;
        let forward = speed.max(0) as u32;
        let backward = (-speed).max(0) as u32;
        let (ch0, ch1) = if motor % 2 == 1 {
            (backward, forward)
        } else {
            (forward, backward)
        };
        let [b0, b1] = plant.bemf_bias[motor];
        [
            (b0 as u32 + ch0).min(u16::MAX as u32) as u16,
            (b1 as u32 + ch1).min(u16::MAX as u32) as u16,
        ]
    }

    fn read_analog(&mut self, channel: usize) -> u16 {
        self.plant.lock().analog[channel]
    }

    fn read_digital(&mut self) -> u8 {
        let plant = self.plant.lock();
        // 输出使能的引脚读回输出值
        (plant.digital_in & !plant.digital_output_enable)
            | (plant.digital_output_value & plant.digital_output_enable)
    }

    fn write_digital(&mut self, enable: u8, value: u8) {
        let mut plant = self.plant.lock();
        plant.digital_output_enable = enable;
        plant.digital_output_value = value;
    }

    fn read_accel(&mut self) -> [i16; 3] {
        self.plant.lock().accel
    }

    fn read_battery(&mut self) -> u16 {
        self.plant.lock().battery
    }

    fn read_button(&mut self) -> u8 {
        self.plant.lock().button
    }

    fn set_servo_line(&mut self, servo: usize, high: bool) {
        let mut plant = self.plant.lock();
        if high && !plant.servo_line[servo] {
            plant.servo_pulses[servo] += 1;
        }
        plant.servo_line[servo] = high;
    }

    fn uart_write(&mut self, port: usize, bytes: &[u8]) -> usize {
        self.plant.lock().uart_out[port].extend_from_slice(bytes);
        bytes.len()
    }

    fn uart_read(&mut self, port: usize, buf: &mut [u8]) -> usize {
        let mut plant = self.plant.lock();
        let queue = &mut plant.uart_in[port];
        let n = buf.len().min(queue.len());
        for (dst, src) in buf.iter_mut().zip(queue.drain(..n)) {
            *dst = src;
        }
        n
    }

    fn configure_uart(&mut self, port: usize, flags: u16) {
        self.plant.lock().uart_flags[port] = flags;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_motor_responds_to_pwm() {
        let mut board = SimBoard::new();
        for _ in 0..40 {
            board.set_motor_pwm(0, 400);
            board.motor_off(0);
        }
        let plant = board.lock();
        assert!((plant.motors[0].speed - 400).abs() < 4);
        assert!(plant.motors[0].position > 0);
    }

    #[test]
    fn test_motor_off_without_drive_does_not_advance() {
        let mut board = SimBoard::new();
        board.lock().set_motor_speed(1, 100);
        board.motor_off(1);
        board.motor_off(1);
        assert_eq!(board.lock().motors[1].speed, 100);
    }

    #[test]
    fn test_bemf_channels_follow_direction_and_parity() {
        let mut board = SimBoard::new();
        board.lock().set_bemf_bias(0, [0, 0]);
        board.lock().set_bemf_bias(1, [0, 0]);
        board.lock().set_motor_speed(0, 50);
        board.lock().set_motor_speed(1, 50);
        assert_eq!(board.read_bemf_pair(0), [50, 0]);
        assert_eq!(board.read_bemf_pair(1), [0, 50]);
        board.lock().set_motor_speed(0, -50);
        assert_eq!(board.read_bemf_pair(0), [0, 50]);
    }

    #[test]
    fn test_digital_outputs_read_back() {
        let mut board = SimBoard::new();
        board.lock().digital_in = 0b0000_0011;
        board.write_digital(0b0000_0110, 0b0000_0100);
        assert_eq!(board.read_digital(), 0b0000_0101);
    }

    #[test]
    fn test_uart_round_trip() {
        let mut board = SimBoard::new();
        board.lock().push_uart_input(1, b"abc");
        let mut buf = [0u8; 2];
        assert_eq!(board.uart_read(1, &mut buf), 2);
        assert_eq!(&buf, b"ab");
        assert_eq!(board.uart_write(0, b"xyz"), 3);
        assert_eq!(board.lock().take_uart_output(0), b"xyz");
        assert!(board.lock().take_uart_output(0).is_empty());
    }

    #[test]
    fn test_servo_pulse_counting() {
        let mut board = SimBoard::new();
        board.set_servo_line(2, true);
        board.set_servo_line(2, false);
        board.set_servo_line(2, true);
        assert_eq!(board.lock().servo_pulses[2], 2);
    }
}
