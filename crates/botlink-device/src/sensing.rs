//! 传感器采样与反电动势测速
//!
//! 电机转速通过反电动势测得：断开驱动，等待绕组感应稳定，读正/反向通道差分，
//! 减去上电标定偏移。奇数号电机接线方向相反，极性取反；落在死区内的差分视为静止。

use crate::config::DeviceConfig;
use crate::error::CalibrationError;
use crate::hal::{BlockingDelay, Board};
use botlink_protocol::{ANALOG_COUNT, MOTOR_COUNT, StateFrame};
use tracing::{debug, warn};

/// 反电动势测速器
#[derive(Debug, Clone)]
pub struct BemfSensor {
    /// 每电机 [正向, 反向] 通道偏移
    offsets: [[i32; 2]; MOTOR_COUNT],
    settle_delay_us: u32,
    calibration_samples: u32,
    calibration_bound: i32,
    deadband: i32,
}

impl BemfSensor {
    pub fn new(config: &DeviceConfig) -> Self {
        Self {
            offsets: [[0; 2]; MOTOR_COUNT],
            settle_delay_us: config.settle_delay_us,
            calibration_samples: config.calibration_samples.max(1),
            calibration_bound: config.calibration_bound,
            deadband: config.deadband,
        }
    }

    /// 上电标定：电机静止时每通道平均多次读数作为偏移
    ///
    /// 偏移无论是否越界都会保存；越界时返回第一个越界的电机，调用方可以选择继续运行。
    pub fn calibrate<B, D>(&mut self, board: &mut B, delay: &mut D) -> Result<(), CalibrationError>
    where
        B: Board + ?Sized,
        D: BlockingDelay + ?Sized,
    {
        for motor in 0..MOTOR_COUNT {
            board.motor_off(motor);
        }
        delay.delay_us(self.settle_delay_us);

        let mut sums = [[0i64; 2]; MOTOR_COUNT];
        for _ in 0..self.calibration_samples {
            for (motor, sum) in sums.iter_mut().enumerate() {
                let [fwd, bwd] = board.read_bemf_pair(motor);
                sum[0] += fwd as i64;
                sum[1] += bwd as i64;
            }
        }

        let mut first_error = None;
        for (motor, sum) in sums.iter().enumerate() {
            for (channel, &total) in sum.iter().enumerate() {
                let offset = (total / self.calibration_samples as i64) as i32;
                self.offsets[motor][channel] = offset;
                if offset.abs() > self.calibration_bound {
                    warn!(
                        "Back-EMF calibration out of range: motor {} channel {} offset {}",
                        motor, channel, offset
                    );
                    first_error.get_or_insert(CalibrationError::OutOfRange {
                        motor,
                        channel,
                        offset,
                    });
                }
            }
        }
        debug!("Back-EMF offsets: {:?}", self.offsets);

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// 对所有电机做一次测速
    ///
    /// 所有驱动同时断开，共用一次稳定延时，然后逐个读取差分。
    pub fn sense_all<B, D>(&self, board: &mut B, delay: &mut D) -> [i32; MOTOR_COUNT]
    where
        B: Board + ?Sized,
        D: BlockingDelay + ?Sized,
    {
        for motor in 0..MOTOR_COUNT {
            board.motor_off(motor);
        }
        delay.delay_us(self.settle_delay_us);

        let mut speeds = [0; MOTOR_COUNT];
        for (motor, speed) in speeds.iter_mut().enumerate() {
            let raw = board.read_bemf_pair(motor);
            *speed = self.speed_from_raw(motor, raw);
        }
        speeds
    }

    /// 原始通道值换算为有符号速度
    pub fn speed_from_raw(&self, motor: usize, raw: [u16; 2]) -> i32 {
        let [off_f, off_b] = self.offsets[motor];
        let fwd = raw[0] as i32 - off_f;
        let bwd = raw[1] as i32 - off_b;
        apply_deadband(polarity(motor, fwd - bwd), self.deadband)
    }

    pub fn offsets(&self) -> &[[i32; 2]; MOTOR_COUNT] {
        &self.offsets
    }
}

/// 奇数号电机极性取反
pub fn polarity(motor: usize, differential: i32) -> i32 {
    if motor % 2 == 1 {
        -differential
    } else {
        differential
    }
}

/// 死区：`(-deadband, deadband)` 内归零
pub fn apply_deadband(value: i32, deadband: i32) -> i32 {
    if value.abs() < deadband { 0 } else { value }
}

/// 采样按键、模拟量、数字量、加速度计和电池电压到遥测记录
pub fn sample_inputs<B: Board + ?Sized>(board: &mut B, telemetry: &mut StateFrame) {
    telemetry.button_state = board.read_button();
    for channel in 0..ANALOG_COUNT {
        telemetry.analog[channel] = board.read_analog(channel);
    }
    telemetry.digital_bits = board.read_digital();
    telemetry.accel = board.read_accel();
    telemetry.battery_voltage = board.read_battery();
}
