//! # Botlink Protocol
//!
//! 电机/传感器板与主机之间的链路协议定义（无硬件依赖）
//!
//! ## 模块
//!
//! - `constants`: 协议常量（魔数、帧长、端口数量）
//! - `frame`: StateFrame 定长记录的编解码
//! - `resync`: 魔数扫描重同步（接收端缓冲区扫描 + 主机端字节流扫描）
//! - `buffer`: 双缓冲帧对（索引翻转，无锁）
//! - `command`: 短命令/应答模式的报文编解码
//!
//! ## 字节序
//!
//! 板端为小端 MCU，线上所有多字节字段均为小端（LSB 在前）。

pub mod buffer;
pub mod command;
pub mod constants;
pub mod frame;
pub mod resync;

// 重新导出常用类型
pub use buffer::FramePair;
pub use command::{CommandId, Reply, Request, Word, find_marker};
pub use constants::*;
pub use frame::{PidGains, SerialBuffer, StateFrame};
pub use resync::{StreamScanner, TagScanner, find_tag, realign_frame};

use thiserror::Error;

/// 协议解析错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Invalid frame length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("Unknown command id: 0x{id:04X}")]
    UnknownCommand { id: u16 },

    #[error("Invalid payload for {command:?}: {reason}")]
    InvalidPayload { command: CommandId, reason: String },

    #[error("Payload too long: {len} words (max {max})")]
    PayloadTooLong { len: usize, max: usize },

    #[error("Packet start marker not found")]
    MissingMarker,
}

/// 字节序转换工具函数
///
/// 短命令模式以 16 位字为单位，32 位计数器拆成低/高两个字传输。
///
/// 32 位有符号数拆分为 `[lo, hi]`
pub fn split_i32(value: i32) -> [u16; 2] {
    let raw = value as u32;
    [raw as u16, (raw >> 16) as u16]
}

/// `[lo, hi]` 合并为 32 位有符号数
pub fn join_i32(lo: u16, hi: u16) -> i32 {
    ((hi as u32) << 16 | lo as u32) as i32
}

/// 小端字节序转 u32
pub fn bytes_to_u32_le(bytes: [u8; 4]) -> u32 {
    u32::from_le_bytes(bytes)
}
