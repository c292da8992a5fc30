//! 主机侧链路交换
//!
//! 每个周期一次完整交换：
//!
//! 1. 以空闲字节时钟驱动链路，字节流扫描直到读到设备的魔数
//! 2. 块传输 `FRAME_SIZE` 字节：发出整条命令帧（魔数在前），收到的前
//!    `FRAME_SIZE - 4` 字节补全入站记录，末尾 4 字节属于下一窗口，丢弃
//! 3. 传输完整后封口（写魔数）并翻转；传输出错时槽位保持无效，索引不翻转
//!
//! 短命令事务复用同一条链路，但不会和帧交换混在一次交换里。

use crate::error::DriverError;
use botlink_link::{LinkAdapter, LinkError};
use botlink_protocol::command::{MAX_PAYLOAD_WORDS, REPLY_ERROR_FLAG, REPLY_MARKER};
use botlink_protocol::{
    FRAME_SIZE, FramePair, IDLE_FILL_BYTE, ProtocolError, Reply, Request, StateFrame,
    StreamScanner, TAG_SIZE,
};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// 等待应答标记时最多读取的字节数
const REPLY_SCAN_BUDGET: usize = 2 * FRAME_SIZE;

/// 一次成功交换的结果
#[derive(Debug, Clone)]
pub struct ExchangeOutcome {
    /// 新验证的遥测帧
    pub telemetry: StateFrame,
    /// 重同步丢弃的字节数
    pub discarded: usize,
    /// 交换序号（从 1 开始）
    pub index: u64,
}

/// 主机侧交换管理器
#[derive(Debug, Default)]
pub struct LinkExchange {
    scanner: StreamScanner,
    inbound: FramePair,
    exchanges: u64,
}

impl LinkExchange {
    pub fn new() -> Self {
        Self::default()
    }

    /// 执行一次帧交换
    ///
    /// `outbound` 原样发出，调用方负责 `mark_valid()`。扫描阶段的链路错误（包括读超时）
    /// 原样返回，扫描进度保留到下一次调用。
    pub fn exchange<A>(
        &mut self,
        link: &mut A,
        outbound: &StateFrame,
    ) -> Result<ExchangeOutcome, DriverError>
    where
        A: LinkAdapter + ?Sized,
    {
        let discarded = self.scanner.scan(|| link.transfer_byte(IDLE_FILL_BYTE))?;
        if discarded > 0 {
            debug!("Resynced after discarding {} bytes", discarded);
        }

        let tx = outbound.to_bytes();
        let slot = self.inbound.begin_fill();
        link.transfer(&tx, &mut slot[TAG_SIZE..])?;
        self.inbound.seal();
        self.exchanges += 1;

        let telemetry = StateFrame::decode(self.inbound.active_bytes())?;
        trace!("exchange {} complete", self.exchanges);
        Ok(ExchangeOutcome {
            telemetry,
            discarded,
            index: self.exchanges,
        })
    }

    /// 执行一次短命令事务
    ///
    /// 先对齐到一个窗口起点，在该窗口内发出请求（其余遥测字节丢弃），
    /// 然后读取直到应答标记。设备在下一个 tick 才会应答，所以等待以
    /// `timeout` 和 [`REPLY_SCAN_BUDGET`] 字节为界。
    pub fn command<A>(
        &mut self,
        link: &mut A,
        request: &Request,
        timeout: Duration,
    ) -> Result<Reply, DriverError>
    where
        A: LinkAdapter + ?Sized,
    {
        let window = FRAME_SIZE - TAG_SIZE;
        let mut tx = request.encode();
        if tx.len() > window {
            return Err(DriverError::InvalidInput(format!(
                "request of {} bytes does not fit in a {} byte window",
                tx.len(),
                window
            )));
        }
        tx.resize(window, IDLE_FILL_BYTE);

        let deadline = Instant::now() + timeout;
        self.scanner.reset();
        loop {
            match self.scanner.scan(|| link.transfer_byte(IDLE_FILL_BYTE)) {
                Ok(_) => break,
                Err(LinkError::Timeout) if Instant::now() < deadline => continue,
                Err(LinkError::Timeout) => return Err(DriverError::Timeout),
                Err(e) => return Err(e.into()),
            }
        }
        link.transfer(&tx, &mut [])?;
        trace!("sent {:?}, waiting for reply", request.id());

        self.read_reply(link, deadline)
    }

    fn read_reply<A>(&mut self, link: &mut A, deadline: Instant) -> Result<Reply, DriverError>
    where
        A: LinkAdapter + ?Sized,
    {
        let marker = REPLY_MARKER.to_le_bytes();
        let mut previous = None;
        let mut read = 0;
        loop {
            if read >= REPLY_SCAN_BUDGET || Instant::now() >= deadline {
                debug!("No reply marker after {} bytes", read);
                return Err(DriverError::Timeout);
            }
            let byte = match link.transfer_byte(IDLE_FILL_BYTE) {
                Ok(byte) => byte,
                Err(LinkError::Timeout) => continue,
                Err(e) => return Err(e.into()),
            };
            read += 1;
            if previous == Some(marker[0]) && byte == marker[1] {
                break;
            }
            previous = Some(byte);
        }

        let mut count = [0u8; 2];
        link.transfer(&[], &mut count)?;
        let words = (u16::from_le_bytes(count) & !REPLY_ERROR_FLAG) as usize;
        if words > MAX_PAYLOAD_WORDS {
            return Err(ProtocolError::PayloadTooLong {
                len: words,
                max: MAX_PAYLOAD_WORDS,
            }
            .into());
        }

        let mut packet = Vec::with_capacity(4 + words * 2);
        packet.extend_from_slice(&marker);
        packet.extend_from_slice(&count);
        packet.resize(4 + words * 2, 0);
        link.transfer(&[], &mut packet[4..])?;

        let (reply, _) = Reply::decode(&packet)?;
        Ok(reply)
    }

    /// 最近一次验证的遥测帧（尚无时为 `None`）
    pub fn latest(&self) -> Option<StateFrame> {
        self.inbound.active_frame()
    }

    /// 累计完成的交换次数
    pub fn exchange_count(&self) -> u64 {
        self.exchanges
    }

    /// 放弃当前扫描进度（看门狗复位后调用）
    pub fn reset_scan(&mut self) {
        self.scanner.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use botlink_protocol::magic_bytes;
    use std::collections::VecDeque;

    /// 脚本化适配器：入站字节预先排队，出站字节全部记录
    #[derive(Default)]
    struct ScriptedAdapter {
        incoming: VecDeque<u8>,
        sent: Vec<u8>,
    }

    impl ScriptedAdapter {
        fn feed(&mut self, bytes: &[u8]) {
            self.incoming.extend(bytes.iter().copied());
        }
    }

    impl LinkAdapter for ScriptedAdapter {
        fn transfer_byte(&mut self, out: u8) -> Result<u8, LinkError> {
            let byte = self.incoming.pop_front().ok_or(LinkError::Timeout)?;
            self.sent.push(out);
            Ok(byte)
        }
    }

    fn telemetry(speed: i16) -> StateFrame {
        let mut frame = StateFrame::new();
        frame.motor_speed[0] = speed;
        frame.mark_valid();
        frame
    }

    fn outbound() -> StateFrame {
        let mut frame = StateFrame::new();
        frame.motor_speed_target[2] = -40;
        frame.mark_valid();
        frame
    }

    #[test]
    fn test_exchange_after_noise() {
        let mut link = ScriptedAdapter::default();
        link.feed(&[0x11, 0x3C, 0x22, 0xA5]);
        link.feed(&telemetry(321).to_bytes());
        link.feed(&[0; TAG_SIZE]);

        let mut ex = LinkExchange::new();
        let outcome = ex.exchange(&mut link, &outbound()).unwrap();
        assert_eq!(outcome.discarded, 4);
        assert_eq!(outcome.index, 1);
        assert_eq!(outcome.telemetry.motor_speed[0], 321);
        assert!(outcome.telemetry.is_valid());

        // 扫描阶段发空闲字节，之后发整条命令帧
        let scan_len = 4 + TAG_SIZE;
        assert!(link.sent[..scan_len].iter().all(|&b| b == IDLE_FILL_BYTE));
        assert_eq!(&link.sent[scan_len..], &outbound().to_bytes()[..]);
    }

    #[test]
    fn test_exchange_after_random_noise() {
        use rand::Rng;

        let mut rng = rand::thread_rng();
        let noise: Vec<u8> = (0..rng.gen_range(1..600))
            .map(|_| rng.gen_range(0x3Du8..=0xFF))
            .collect();
        let mut link = ScriptedAdapter::default();
        link.feed(&noise);
        link.feed(&telemetry(-55).to_bytes());
        link.feed(&[0; TAG_SIZE]);

        let mut ex = LinkExchange::new();
        let outcome = ex.exchange(&mut link, &outbound()).unwrap();
        assert_eq!(outcome.discarded, noise.len());
        assert_eq!(outcome.telemetry.motor_speed[0], -55);
    }

    #[test]
    fn test_scan_timeout_keeps_progress() {
        let mut link = ScriptedAdapter::default();
        let frame = telemetry(7).to_bytes();
        link.feed(&frame[..2]);

        let mut ex = LinkExchange::new();
        assert!(matches!(
            ex.exchange(&mut link, &outbound()),
            Err(DriverError::Link(LinkError::Timeout))
        ));
        assert!(ex.latest().is_none());

        link.feed(&frame[2..]);
        link.feed(&[0; TAG_SIZE]);
        let outcome = ex.exchange(&mut link, &outbound()).unwrap();
        assert_eq!(outcome.telemetry.motor_speed[0], 7);
    }

    #[test]
    fn test_truncated_transfer_leaves_previous_frame() {
        let mut link = ScriptedAdapter::default();
        link.feed(&telemetry(1).to_bytes());
        link.feed(&[0; TAG_SIZE]);
        let mut ex = LinkExchange::new();
        ex.exchange(&mut link, &outbound()).unwrap();

        link.feed(&magic_bytes());
        link.feed(&[0xEE; 10]);
        assert!(ex.exchange(&mut link, &outbound()).is_err());
        assert_eq!(ex.latest().unwrap().motor_speed[0], 1);
        assert_eq!(ex.exchange_count(), 1);
    }

    #[test]
    fn test_command_round_trip() {
        let mut link = ScriptedAdapter::default();
        link.feed(&telemetry(0).to_bytes());
        link.feed(&[0x55; 3]);
        link.feed(&Reply::ok(vec![123, 456]).encode().unwrap());

        let mut ex = LinkExchange::new();
        let reply = ex
            .command(
                &mut link,
                &Request::PwmRead { motor: 1 },
                Duration::from_millis(50),
            )
            .unwrap();
        assert_eq!(reply, Reply::ok(vec![123, 456]));

        let request = Request::PwmRead { motor: 1 }.encode();
        assert_eq!(&link.sent[TAG_SIZE..TAG_SIZE + request.len()], &request[..]);
    }

    #[test]
    fn test_command_error_reply() {
        let mut link = ScriptedAdapter::default();
        link.feed(&magic_bytes());
        link.feed(&[0; FRAME_SIZE - TAG_SIZE]);
        link.feed(&Reply::rejected().encode().unwrap());

        let mut ex = LinkExchange::new();
        let reply = ex
            .command(&mut link, &Request::StatusRead, Duration::from_millis(50))
            .unwrap();
        assert!(reply.error);
    }

    #[test]
    fn test_command_without_reply_times_out() {
        let mut link = ScriptedAdapter::default();
        link.feed(&magic_bytes());
        link.feed(&[0x01; 3 * FRAME_SIZE]);

        let mut ex = LinkExchange::new();
        assert!(matches!(
            ex.command(&mut link, &Request::StatusRead, Duration::from_millis(50)),
            Err(DriverError::Timeout)
        ));
    }

    #[test]
    fn test_oversized_request_rejected() {
        let mut link = ScriptedAdapter::default();
        let request = Request::UartWrite {
            port: 0,
            data: vec![0; 120],
        };
        let mut ex = LinkExchange::new();
        assert!(matches!(
            ex.command(&mut link, &request, Duration::from_millis(10)),
            Err(DriverError::InvalidInput(_))
        ));
        assert!(link.sent.is_empty());
    }
}
