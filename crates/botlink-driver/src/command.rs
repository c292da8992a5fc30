//! 短命令请求
//!
//! 应用线程把请求和一次性应答通道一起交给 IO 线程，IO 线程在两次帧交换之间
//! 执行事务并把结果发回。

use crate::error::DriverError;
use botlink_protocol::{Reply, Request};
use crossbeam_channel::{Receiver, Sender};

/// 短命令事务的结果
pub type CommandResult = Result<Reply, DriverError>;

/// 排队中的短命令
#[derive(Debug)]
pub struct CommandRequest {
    pub request: Request,
    pub reply_tx: Sender<CommandResult>,
}

impl CommandRequest {
    /// 创建请求，同时返回应答接收端
    pub fn new(request: Request) -> (Self, Receiver<CommandResult>) {
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        (Self { request, reply_tx }, reply_rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_channel_pairs_with_request() {
        let (command, reply_rx) = CommandRequest::new(Request::StatusRead);
        assert_eq!(command.request, Request::StatusRead);
        command.reply_tx.send(Ok(Reply::ok(vec![7]))).unwrap();
        assert_eq!(reply_rx.recv().unwrap().unwrap().words, vec![7]);
    }

    #[test]
    fn test_dropped_request_closes_reply_channel() {
        let (command, reply_rx) = CommandRequest::new(Request::StatusRead);
        drop(command);
        assert!(reply_rx.recv().is_err());
    }
}
