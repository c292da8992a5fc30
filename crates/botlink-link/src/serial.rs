//! 串口链路适配器
//!
//! 板端通过 USB-UART 桥接时，全双工交换退化为"先写后读"：写出的每个字节对应
//! 读回一个字节，由桥接芯片保证两个方向的字节数一致。

use crate::{LinkAdapter, LinkDeviceError, LinkDeviceErrorKind, LinkError};
use serialport::SerialPort;
use std::io::{ErrorKind, Read, Write};
use std::time::Duration;
use tracing::{debug, info, warn};

/// 默认读超时
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(20);

/// DTR 复位脉冲宽度
const RESET_PULSE: Duration = Duration::from_millis(50);

/// 基于 `serialport` 的链路适配器
pub struct SerialLinkAdapter {
    port: Box<dyn SerialPort>,
    name: String,
}

impl SerialLinkAdapter {
    /// 打开串口
    pub fn open(name: &str, baud_rate: u32) -> Result<Self, LinkError> {
        let port = serialport::new(name, baud_rate)
            .timeout(DEFAULT_READ_TIMEOUT)
            .open()
            .map_err(map_serial_error)?;
        info!("Opened serial link {} at {} baud", name, baud_rate);
        Ok(Self {
            port,
            name: name.to_string(),
        })
    }

    /// 使用已打开的串口（测试或自定义配置）
    pub fn from_port(port: Box<dyn SerialPort>) -> Self {
        let name = port.name().unwrap_or_else(|| "<unnamed>".to_string());
        Self { port, name }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl LinkAdapter for SerialLinkAdapter {
    fn transfer_byte(&mut self, out: u8) -> Result<u8, LinkError> {
        self.port.write_all(&[out]).map_err(map_io_error)?;
        let mut input = [0u8; 1];
        self.port.read_exact(&mut input).map_err(map_io_error)?;
        Ok(input[0])
    }

    fn transfer(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<(), LinkError> {
        let len = tx.len().max(rx.len());
        let mut out = tx.to_vec();
        out.resize(len, crate::IDLE_FILL_BYTE);
        self.port.write_all(&out).map_err(map_io_error)?;

        let mut input = vec![0u8; len];
        self.port.read_exact(&mut input).map_err(map_io_error)?;
        let keep = rx.len();
        rx.copy_from_slice(&input[..keep]);
        Ok(())
    }

    fn set_receive_timeout(&mut self, timeout: Duration) {
        if let Err(e) = self.port.set_timeout(timeout) {
            warn!("Failed to set read timeout on {}: {}", self.name, e);
        }
    }

    /// 拉低 DTR 一段时间再恢复，板端复位电路据此重启
    fn reset_device(&mut self) -> Result<(), LinkError> {
        debug!("Pulsing DTR on {}", self.name);
        self.port
            .write_data_terminal_ready(false)
            .map_err(map_serial_error)?;
        std::thread::sleep(RESET_PULSE);
        self.port
            .write_data_terminal_ready(true)
            .map_err(map_serial_error)?;
        self.port
            .clear(serialport::ClearBuffer::All)
            .map_err(map_serial_error)?;
        Ok(())
    }
}

/// 列出系统中可用的串口
pub fn list_ports() -> Result<Vec<String>, LinkError> {
    let ports = serialport::available_ports().map_err(map_serial_error)?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}

fn map_serial_error(e: serialport::Error) -> LinkError {
    let kind = match e.kind() {
        serialport::ErrorKind::NoDevice => LinkDeviceErrorKind::NoDevice,
        serialport::ErrorKind::InvalidInput => LinkDeviceErrorKind::UnsupportedConfig,
        serialport::ErrorKind::Io(ErrorKind::NotFound) => LinkDeviceErrorKind::NotFound,
        serialport::ErrorKind::Io(ErrorKind::PermissionDenied) => {
            LinkDeviceErrorKind::AccessDenied
        },
        serialport::ErrorKind::Io(ErrorKind::ResourceBusy) => LinkDeviceErrorKind::Busy,
        serialport::ErrorKind::Io(_) => LinkDeviceErrorKind::Backend,
        serialport::ErrorKind::Unknown => LinkDeviceErrorKind::Unknown,
    };
    LinkError::Device(LinkDeviceError::new(kind, e.description))
}

fn map_io_error(e: std::io::Error) -> LinkError {
    match e.kind() {
        ErrorKind::TimedOut | ErrorKind::WouldBlock => LinkError::Timeout,
        ErrorKind::BrokenPipe | ErrorKind::NotConnected | ErrorKind::UnexpectedEof => {
            LinkError::Disconnected
        },
        _ => LinkError::Io(e),
    }
}
