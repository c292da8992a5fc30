//! 设备上下文
//!
//! 设备侧的全部可变状态：主机下发的控制输入、各电机状态、遥测记录和 tick 计数。
//! 启动时创建一次，由调度器按引用传给各阶段。

use crate::config::DeviceConfig;
use crate::motor::{Limits, MotorState, MotorTarget, Thresholds};
use botlink_protocol::{
    MOTOR_COUNT, PidGains, SERIAL_PORT_COUNT, SERVO_COUNT, SerialBuffer, StateFrame,
};

/// 主机下发的控制输入
///
/// 来自最近一次验证通过的命令帧，或者短命令模式的写操作。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlInputs {
    pub pwm: [i16; MOTOR_COUNT],
    pub speed_target: [i16; MOTOR_COUNT],
    pub counter_target: [i32; MOTOR_COUNT],
    pub position_mode_bits: u8,
    pub clear_counter_bits: u8,
    pub gains: [PidGains; MOTOR_COUNT],
    pub thresholds: Thresholds,
    pub servo_target: [i16; SERVO_COUNT],
    pub servos_enabled: bool,
    pub digital_output_enable: u8,
    pub digital_output_value: u8,
    /// 主机→设备串口缓冲区
    pub serial: [SerialBuffer; SERIAL_PORT_COUNT],
}

impl ControlInputs {
    pub fn new(config: &DeviceConfig) -> Self {
        Self {
            pwm: [0; MOTOR_COUNT],
            speed_target: [0; MOTOR_COUNT],
            counter_target: [0; MOTOR_COUNT],
            position_mode_bits: 0,
            clear_counter_bits: 0,
            gains: [config.default_gains; MOTOR_COUNT],
            thresholds: Thresholds {
                position: config.position_threshold,
                velocity: config.velocity_threshold,
                accel: config.accel_threshold,
            },
            servo_target: [0; SERVO_COUNT],
            servos_enabled: false,
            digital_output_enable: 0,
            digital_output_value: 0,
            serial: [SerialBuffer::default(); SERIAL_PORT_COUNT],
        }
    }

    /// 用一条已验证的命令帧覆盖全部输入
    pub fn apply_frame(&mut self, frame: &StateFrame) {
        self.pwm = frame.motor_pwm;
        self.speed_target = frame.motor_speed_target;
        self.counter_target = frame.motor_counter_target;
        self.position_mode_bits = frame.motor_position_mode_bits;
        self.clear_counter_bits = frame.motor_clear_counter_bits;
        self.gains = frame.pid_gains;
        self.thresholds = Thresholds {
            position: frame.position_threshold,
            velocity: frame.velocity_threshold,
            accel: frame.accel_threshold,
        };
        self.servo_target = frame.servo_target;
        self.servos_enabled = frame.servos_enabled != 0;
        self.digital_output_enable = frame.digital_output_enable;
        self.digital_output_value = frame.digital_output_value;
        self.serial = frame.serial;
    }

    pub fn motor_target(&self, motor: usize) -> MotorTarget {
        MotorTarget {
            pwm: self.pwm[motor],
            speed_target: self.speed_target[motor],
            counter_target: self.counter_target[motor],
            position_mode: StateFrame::bit(self.position_mode_bits, motor),
        }
    }
}

/// 设备上下文
#[derive(Debug, Clone)]
pub struct DeviceContext {
    pub config: DeviceConfig,
    pub inputs: ControlInputs,
    pub motors: [MotorState; MOTOR_COUNT],
    /// 正在构建的遥测记录
    pub telemetry: StateFrame,
    pub startup_complete: bool,
    pub tick_count: u64,
    /// 下一个输出脉冲的舵机
    pub servo_cursor: usize,
    /// 已处理过的清零请求（上升沿锁存）
    pub clear_latch: u8,
    /// 每个串口最近一次消费的主机序号
    pub serial_seen: [u8; SERIAL_PORT_COUNT],
}

impl DeviceContext {
    pub fn new(config: DeviceConfig) -> Self {
        let inputs = ControlInputs::new(&config);
        Self {
            config,
            inputs,
            motors: Default::default(),
            telemetry: StateFrame::new(),
            startup_complete: false,
            tick_count: 0,
            servo_cursor: 0,
            clear_latch: 0,
            serial_seen: [0; SERIAL_PORT_COUNT],
        }
    }

    pub fn limits(&self) -> Limits {
        Limits {
            pwm: self.config.pwm_limit,
            integral: self.config.integral_bound,
        }
    }

    /// 处理计数器清零请求
    ///
    /// 每个请求位只在上升沿处理一次：主机在收到确认前会持续置位，
    /// 重复处理会吞掉两次交换之间的计数。返回本次清零的电机掩码。
    pub fn service_clear_requests(&mut self) -> u8 {
        let requested = self.inputs.clear_counter_bits;
        let fresh = requested & !self.clear_latch;
        for (motor, state) in self.motors.iter_mut().enumerate() {
            if StateFrame::bit(fresh, motor) {
                state.clear_counter();
            }
        }
        self.clear_latch = requested;
        fresh
    }

    /// 立即清零单个电机（短命令模式）
    pub fn clear_motor(&mut self, motor: usize) {
        if let Some(state) = self.motors.get_mut(motor) {
            state.clear_counter();
        }
    }

    /// 把电机状态和控制输入写入遥测记录并标记有效
    pub fn publish_telemetry(&mut self) -> StateFrame {
        let inputs = &self.inputs;
        let t = &mut self.telemetry;

        t.position_threshold = inputs.thresholds.position;
        t.velocity_threshold = inputs.thresholds.velocity;
        t.accel_threshold = inputs.thresholds.accel;
        t.pid_gains = inputs.gains;

        t.motor_in_motion_bits = 0;
        for (i, motor) in self.motors.iter().enumerate() {
            StateFrame::set_bit(&mut t.motor_in_motion_bits, i, motor.in_motion());
            t.motor_pwm[i] = motor.pwm();
            t.motor_speed[i] = motor.speed().clamp(i16::MIN as i32, i16::MAX as i32) as i16;
            t.motor_counter[i] = motor.counter();
        }
        // 已处理的请求在遥测中显示为清除
        t.motor_clear_counter_bits = inputs.clear_counter_bits & !self.clear_latch;
        t.motor_position_mode_bits = inputs.position_mode_bits;
        t.motor_speed_target = inputs.speed_target;
        t.motor_counter_target = inputs.counter_target;
        t.servo_target = inputs.servo_target;
        t.servos_enabled = inputs.servos_enabled as u8;
        t.digital_output_enable = inputs.digital_output_enable;
        t.digital_output_value = inputs.digital_output_value;

        t.mark_valid();
        *t
    }

    /// 运动中的电机掩码
    pub fn in_motion_bits(&self) -> u8 {
        let mut bits = 0;
        for (i, motor) in self.motors.iter().enumerate() {
            StateFrame::set_bit(&mut bits, i, motor.in_motion());
        }
        bits
    }
}
