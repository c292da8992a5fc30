//! # Botlink Link Layer
//!
//! 链路硬件抽象层。链路是连续的全双工字节流：主机每发出一个字节就同时收到一个字节，
//! 没有任何分隔符，对齐完全依靠 StateFrame 魔数重同步。
//!
//! - 主机侧：[`LinkAdapter`]，按字节或按块时钟驱动链路
//! - 设备侧：[`DeviceLink`]，类 DMA 的接收窗口收集 + 发送窗口装载

use std::time::Duration;
use thiserror::Error;

pub use botlink_protocol::{FRAME_SIZE, IDLE_FILL_BYTE};

#[cfg(feature = "serial")]
pub mod serial;

#[cfg(feature = "serial")]
pub use serial::{SerialLinkAdapter, list_ports};

pub mod sim;

pub use sim::{SimBus, SimDevice, SimHost};

/// 链路层统一错误类型
#[derive(Error, Debug)]
pub enum LinkError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Device Error: {0}")]
    Device(#[from] LinkDeviceError),
    #[error("Read timeout")]
    Timeout,
    #[error("Link disconnected")]
    Disconnected,
    #[error("Link not open")]
    NotOpen,
}

impl LinkError {
    /// 是否为致命错误（重试无意义，IO 线程应退出）
    pub fn is_fatal(&self) -> bool {
        match self {
            LinkError::Disconnected | LinkError::NotOpen => true,
            LinkError::Device(e) => e.is_fatal(),
            _ => false,
        }
    }
}

/// 设备/后端错误的结构化分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkDeviceErrorKind {
    Unknown,
    NotFound,
    NoDevice,
    AccessDenied,
    Busy,
    UnsupportedConfig,
    Backend,
}

/// 结构化设备错误
#[derive(Error, Debug, Clone)]
#[error("{kind:?}: {message}")]
pub struct LinkDeviceError {
    pub kind: LinkDeviceErrorKind,
    pub message: String,
}

impl LinkDeviceError {
    pub fn new(kind: LinkDeviceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind,
            LinkDeviceErrorKind::NoDevice
                | LinkDeviceErrorKind::AccessDenied
                | LinkDeviceErrorKind::NotFound
        )
    }
}

impl From<String> for LinkDeviceError {
    fn from(message: String) -> Self {
        Self::new(LinkDeviceErrorKind::Unknown, message)
    }
}

impl From<&str> for LinkDeviceError {
    fn from(message: &str) -> Self {
        Self::new(LinkDeviceErrorKind::Unknown, message)
    }
}

/// 主机侧链路适配器
///
/// 每次时钟驱动都是一次全双工交换：发出的字节数恒等于收到的字节数。
pub trait LinkAdapter {
    /// 交换一个字节；没有入站数据时阻塞到接收超时，返回 [`LinkError::Timeout`]
    fn transfer_byte(&mut self, out: u8) -> Result<u8, LinkError>;

    /// 块交换 `max(tx.len(), rx.len())` 个字节
    ///
    /// `tx` 较短时用 [`IDLE_FILL_BYTE`] 补齐，`rx` 较短时多余的入站字节丢弃。
    fn transfer(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<(), LinkError> {
        let len = tx.len().max(rx.len());
        for i in 0..len {
            let input = self.transfer_byte(tx.get(i).copied().unwrap_or(IDLE_FILL_BYTE))?;
            if let Some(slot) = rx.get_mut(i) {
                *slot = input;
            }
        }
        Ok(())
    }

    fn set_receive_timeout(&mut self, _timeout: Duration) {}

    /// 复位设备（看门狗触发时调用）；默认不做任何事
    fn reset_device(&mut self) -> Result<(), LinkError> {
        Ok(())
    }
}

impl<A: LinkAdapter + ?Sized> LinkAdapter for Box<A> {
    fn transfer_byte(&mut self, out: u8) -> Result<u8, LinkError> {
        (**self).transfer_byte(out)
    }

    fn transfer(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<(), LinkError> {
        (**self).transfer(tx, rx)
    }

    fn set_receive_timeout(&mut self, timeout: Duration) {
        (**self).set_receive_timeout(timeout)
    }

    fn reset_device(&mut self) -> Result<(), LinkError> {
        (**self).reset_device()
    }
}

/// 设备侧链路（类 DMA 接收/发送窗口）
pub trait DeviceLink {
    /// 取出自上次调用以来收到的字节（至多 [`FRAME_SIZE`]），写入 `window` 起始处
    ///
    /// 返回写入的字节数，`window` 其余部分清零。
    fn collect(&mut self, window: &mut [u8; FRAME_SIZE]) -> usize;

    /// 装载下一个发送窗口，主机下一次时钟驱动从其首字节开始读取
    fn arm(&mut self, bytes: &[u8]);
}
