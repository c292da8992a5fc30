//! 板卡硬件抽象
//!
//! 设备运行时只通过这里的 trait 访问硬件。所有阻塞等待都经过 [`BlockingDelay`]，
//! 单次等待不超过 [`MAX_BLOCKING_DELAY_US`]，保证一个 tick 内的阻塞时间有上界。

use std::time::Duration;

/// 单次阻塞延时上限（微秒）
pub const MAX_BLOCKING_DELAY_US: u32 = 5_000;

/// 阻塞延时
pub trait BlockingDelay {
    /// 阻塞 `us` 微秒；超过 [`MAX_BLOCKING_DELAY_US`] 的请求被截断
    fn delay_us(&mut self, us: u32);
}

/// 基于 `spin_sleep` 的高精度延时（有操作系统的主机上使用）
pub struct SpinDelay {
    sleeper: spin_sleep::SpinSleeper,
}

impl SpinDelay {
    pub fn new() -> Self {
        Self {
            sleeper: spin_sleep::SpinSleeper::default(),
        }
    }
}

impl Default for SpinDelay {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockingDelay for SpinDelay {
    fn delay_us(&mut self, us: u32) {
        let us = us.min(MAX_BLOCKING_DELAY_US);
        self.sleeper.sleep(Duration::from_micros(us as u64));
    }
}

/// 不真正等待、只累计请求时长的延时（测试与快速仿真）
#[derive(Debug, Default, Clone)]
pub struct CountingDelay {
    pub total_us: u64,
    pub calls: u64,
}

impl BlockingDelay for CountingDelay {
    fn delay_us(&mut self, us: u32) {
        self.total_us += us.min(MAX_BLOCKING_DELAY_US) as u64;
        self.calls += 1;
    }
}

/// 板卡外设
///
/// 索引参数由调用方保证在范围内（电机 0..4，舵机 0..4，模拟通道 0..8，串口 0..2）。
pub trait Board {
    /// 以给定 PWM（±1000）驱动电机
    fn set_motor_pwm(&mut self, motor: usize, pwm: i16);

    /// 断开电机驱动（反电动势测量前调用）
    fn motor_off(&mut self, motor: usize);

    /// 读取电机的正/反向反电动势通道原始值
    fn read_bemf_pair(&mut self, motor: usize) -> [u16; 2];

    fn read_analog(&mut self, channel: usize) -> u16;

    fn read_digital(&mut self) -> u8;

    /// 设置数字输出（`enable` 为输出使能掩码）
    fn write_digital(&mut self, enable: u8, value: u8);

    fn read_accel(&mut self) -> [i16; 3];

    fn read_battery(&mut self) -> u16;

    fn read_button(&mut self) -> u8;

    /// 舵机信号线电平
    fn set_servo_line(&mut self, servo: usize, high: bool);

    /// 写串口，返回实际接受的字节数
    fn uart_write(&mut self, port: usize, bytes: &[u8]) -> usize;

    /// 读串口（非阻塞），返回读到的字节数
    fn uart_read(&mut self, port: usize, buf: &mut [u8]) -> usize;

    fn configure_uart(&mut self, _port: usize, _flags: u16) {}
}
