//! 设备配置
//!
//! 所有时序、标定和限幅常量集中在 [`DeviceConfig`] 中，默认值即板卡出厂值。

use botlink_protocol::{
    DEFAULT_ACCEL_THRESHOLD, DEFAULT_POSITION_THRESHOLD, DEFAULT_VELOCITY_THRESHOLD, PidGains,
};
use std::time::Duration;

/// 设备运行时配置
///
/// # Example
///
/// ```
/// use botlink_device::DeviceConfig;
///
/// let config = DeviceConfig {
///     settle_delay_us: 250,
///     ..DeviceConfig::default()
/// };
/// assert_eq!(config.tick_period().as_millis(), 10);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct DeviceConfig {
    /// tick 周期（微秒）
    pub tick_period_us: u64,
    /// 反电动势测量前的感应稳定延时（微秒）
    pub settle_delay_us: u32,
    /// 每个通道的标定采样次数
    pub calibration_samples: u32,
    /// 标定偏移允许的最大绝对值（原始 ADC 单位）
    pub calibration_bound: i32,
    /// 测速死区（原始 ADC 单位）
    pub deadband: i32,
    /// PWM 输出范围 ±pwm_limit
    pub pwm_limit: i32,
    /// 积分累加器范围 ±integral_bound
    pub integral_bound: i32,
    /// 舵机脉宽 = servo_scale * (target + servo_offset)（微秒）
    pub servo_scale: i32,
    pub servo_offset: i32,
    /// 上电默认增益（主机下发第一帧之前使用）
    pub default_gains: PidGains,
    pub position_threshold: i32,
    pub velocity_threshold: i32,
    pub accel_threshold: i32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            tick_period_us: 10_000,
            settle_delay_us: 300,
            calibration_samples: 8,
            calibration_bound: 40,
            deadband: 12,
            pwm_limit: 1000,
            integral_bound: 20_000,
            servo_scale: 1,
            servo_offset: 1500,
            default_gains: PidGains::DEFAULT,
            position_threshold: DEFAULT_POSITION_THRESHOLD,
            velocity_threshold: DEFAULT_VELOCITY_THRESHOLD,
            accel_threshold: DEFAULT_ACCEL_THRESHOLD,
        }
    }
}

impl DeviceConfig {
    pub fn tick_period(&self) -> Duration {
        Duration::from_micros(self.tick_period_us)
    }
}
