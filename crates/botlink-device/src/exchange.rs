//! 设备侧链路交换
//!
//! 每个 tick 开头收集上一窗口收到的字节到非活动槽位，做接收端重同步；
//! 找到魔数则翻转，活动槽位即最新命令。tick 末尾装载遥测帧（或短命令应答）。
//!
//! 窗口分类：
//! - 偏移 `0..=PADDING_SIZE` 内有 StateFrame 魔数 → 命令帧
//! - 否则含请求标记 → 短命令请求
//! - 否则 → 无效窗口，上一条命令继续生效

use crate::error::DeviceError;
use botlink_link::DeviceLink;
use botlink_protocol::command::{REQUEST_MARKER, find_marker};
use botlink_protocol::{
    FRAME_SIZE, FramePair, ProtocolError, Reply, Request, StateFrame, realign_frame,
};
use tracing::{debug, trace};

/// 一个接收窗口的分类结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// 自上次收集以来没有收到任何字节
    Empty,
    /// 新的命令帧已验证并翻转，`offset` 为重同步偏移
    Frame { offset: usize },
    /// 短命令请求（解析结果）
    Command(Result<Request, ProtocolError>),
    /// 收到了字节但既不是命令帧也不是请求
    Invalid,
}

/// 设备侧交换管理器
pub struct DeviceExchange<L> {
    link: L,
    inbound: FramePair,
    /// 下一次装载的应答（替代遥测帧）
    pending_reply: Option<Vec<u8>>,
    valid_frames: u64,
    invalid_windows: u64,
}

impl<L: DeviceLink> DeviceExchange<L> {
    pub fn new(link: L) -> Self {
        Self {
            link,
            inbound: FramePair::new(),
            pending_reply: None,
            valid_frames: 0,
            invalid_windows: 0,
        }
    }

    /// 收集并分类本窗口
    pub fn collect(&mut self) -> Inbound {
        let slot = self.inbound.begin_fill();
        let received = self.link.collect(slot);
        if received == 0 {
            return Inbound::Empty;
        }

        if let Some(offset) = realign_frame(slot) {
            if self.inbound.commit() {
                if offset > 0 {
                    debug!("Command frame realigned by {} bytes", offset);
                }
                self.valid_frames += 1;
                return Inbound::Frame { offset };
            }
        }

        let window = &self.inbound.filling()[..received];
        if let Some(start) = find_marker(window, REQUEST_MARKER) {
            let request = Request::decode(&window[start..]).map(|(request, _)| request);
            trace!("Command window: {:?}", request);
            return Inbound::Command(request);
        }

        self.invalid_windows += 1;
        Inbound::Invalid
    }

    /// 最新的已验证命令帧（尚未收到时为 `None`）
    pub fn command(&self) -> Option<StateFrame> {
        self.inbound.active_frame()
    }

    /// 排队一个应答，下一次 [`DeviceExchange::arm`] 发送应答而不是遥测帧
    pub fn queue_reply(&mut self, reply: &Reply) -> Result<(), DeviceError> {
        self.pending_reply = Some(reply.encode()?);
        Ok(())
    }

    /// 装载发送窗口
    pub fn arm(&mut self, telemetry: &StateFrame) {
        match self.pending_reply.take() {
            Some(reply) => self.link.arm(&reply),
            None => {
                let bytes: [u8; FRAME_SIZE] = telemetry.to_bytes();
                self.link.arm(&bytes);
            },
        }
    }

    pub fn valid_frames(&self) -> u64 {
        self.valid_frames
    }

    pub fn invalid_windows(&self) -> u64 {
        self.invalid_windows
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }
}
