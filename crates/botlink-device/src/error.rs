//! 设备侧错误类型

use botlink_protocol::ProtocolError;
use thiserror::Error;

/// 反电动势标定错误（非致命）
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationError {
    #[error("Back-EMF offset out of range on motor {motor} channel {channel}: {offset}")]
    OutOfRange {
        motor: usize,
        channel: usize,
        offset: i32,
    },
}

impl CalibrationError {
    pub fn motor(&self) -> usize {
        match self {
            CalibrationError::OutOfRange { motor, .. } => *motor,
        }
    }
}

/// 设备运行时错误
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Calibration error: {0}")]
    Calibration(#[from] CalibrationError),
}
