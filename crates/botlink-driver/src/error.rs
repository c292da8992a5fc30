//! 驱动层错误类型定义

use botlink_link::LinkError;
use botlink_protocol::ProtocolError;
use thiserror::Error;

/// 驱动层错误类型
#[derive(Error, Debug)]
pub enum DriverError {
    /// 链路错误
    #[error("Link error: {0}")]
    Link(#[from] LinkError),

    /// 协议解析错误
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// 命令通道已关闭（IO 线程退出）
    #[error("Command channel closed")]
    ChannelClosed,

    /// 命令通道已满
    #[error("Command channel full (buffer size: {0})")]
    ChannelFull(usize),

    /// 操作超时
    #[error("Operation timeout")]
    Timeout,

    /// IO 线程错误
    #[error("IO thread error: {0}")]
    IoThread(String),

    /// 无效输入（如越界的电机编号）
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

#[cfg(test)]
mod tests {
    use super::DriverError;
    use botlink_link::LinkError;
    use botlink_protocol::ProtocolError;

    #[test]
    fn test_driver_error_display() {
        let driver_error = DriverError::Link(LinkError::Timeout);
        let msg = format!("{}", driver_error);
        assert!(msg.contains("Link error") && msg.contains("Read timeout"), "{}", msg);

        let driver_error = DriverError::Protocol(ProtocolError::InvalidLength {
            expected: 244,
            actual: 4,
        });
        let msg = format!("{}", driver_error);
        assert!(msg.contains("Invalid frame length"), "{}", msg);

        assert_eq!(
            format!("{}", DriverError::ChannelClosed),
            "Command channel closed"
        );
        assert!(format!("{}", DriverError::ChannelFull(8)).contains("buffer size: 8"));
        assert_eq!(format!("{}", DriverError::Timeout), "Operation timeout");

        let msg = format!("{}", DriverError::IoThread("test error".to_string()));
        assert!(msg.contains("IO thread") && msg.contains("test error"));

        let msg = format!("{}", DriverError::InvalidInput("motor 7".to_string()));
        assert!(msg.contains("Invalid input") && msg.contains("motor 7"));
    }

    #[test]
    fn test_from_link_error() {
        let driver_error: DriverError = LinkError::Disconnected.into();
        assert!(matches!(
            driver_error,
            DriverError::Link(LinkError::Disconnected)
        ));
    }

    #[test]
    fn test_from_protocol_error() {
        let driver_error: DriverError = ProtocolError::UnknownCommand { id: 0x123 }.into();
        match driver_error {
            DriverError::Protocol(ProtocolError::UnknownCommand { id }) => assert_eq!(id, 0x123),
            _ => panic!("Expected Protocol variant"),
        }
    }
}
