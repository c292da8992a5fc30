//! 仿真全双工总线
//!
//! 模拟 SPI 类从机：设备在每个 tick 末尾装载发送窗口，主机时钟驱动时逐字节读走；
//! 主机发出的字节累积在设备接收窗口中，下一个 tick 开头由设备一次性收集。
//!
//! 时序规则：
//! - `transfer_byte` 在设备发送窗口耗尽时阻塞等待下一次装载，超时返回 [`LinkError::Timeout`]
//! - 块 `transfer` 在锁内原子完成，耗尽的字节读为 [`IDLE_FILL_BYTE`]，从不等待
//! - 设备接收窗口最多保留 [`FRAME_SIZE`] 字节，多出的字节丢弃
//! - `collect` 在主机正处于窗口中途时做有界等待，避免把一次交换切成两半

use crate::{DeviceLink, FRAME_SIZE, IDLE_FILL_BYTE, LinkAdapter, LinkError};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::trace;

/// `collect` 等待主机完成当前窗口的上限
const COLLECT_WAIT: Duration = Duration::from_millis(2);

/// 主机侧默认接收超时
const DEFAULT_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Debug, Default)]
struct BusState {
    /// 设备已装载的发送窗口
    device_tx: Vec<u8>,
    /// 主机已读走的字节数
    tx_cursor: usize,
    /// 主机写入、等待设备收集的字节
    device_rx: Vec<u8>,
    /// 本窗口因溢出丢弃的字节数
    rx_overflow: usize,
    resets: u64,
    windows_armed: u64,
    device_closed: bool,
    host_closed: bool,
}

impl BusState {
    fn push_rx(&mut self, byte: u8) {
        if self.device_rx.len() < FRAME_SIZE {
            self.device_rx.push(byte);
        } else {
            self.rx_overflow += 1;
        }
    }

    fn pop_tx(&mut self) -> Option<u8> {
        let byte = self.device_tx.get(self.tx_cursor).copied()?;
        self.tx_cursor += 1;
        Some(byte)
    }

    fn host_mid_window(&self) -> bool {
        self.tx_cursor > 0 && self.tx_cursor < self.device_tx.len().min(FRAME_SIZE)
    }
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<BusState>,
    /// 设备装载新窗口 / 设备端关闭
    armed: Condvar,
    /// 主机推进了读游标
    progressed: Condvar,
}

/// 仿真总线构造器
pub struct SimBus;

impl SimBus {
    /// 创建一对相连的主机端与设备端
    pub fn pair() -> (SimHost, SimDevice) {
        let shared = Arc::new(Shared::default());
        (
            SimHost {
                shared: shared.clone(),
                timeout: DEFAULT_TIMEOUT,
            },
            SimDevice { shared },
        )
    }
}

/// 仿真总线主机端
pub struct SimHost {
    shared: Arc<Shared>,
    timeout: Duration,
}

impl SimHost {
    /// 累计收到的复位请求次数
    pub fn reset_count(&self) -> u64 {
        self.shared.state.lock().resets
    }
}

impl LinkAdapter for SimHost {
    fn transfer_byte(&mut self, out: u8) -> Result<u8, LinkError> {
        let deadline = Instant::now() + self.timeout;
        let mut state = self.shared.state.lock();
        loop {
            if let Some(byte) = state.pop_tx() {
                state.push_rx(out);
                drop(state);
                self.shared.progressed.notify_all();
                return Ok(byte);
            }
            if state.device_closed {
                return Err(LinkError::Disconnected);
            }
            if self
                .shared
                .armed
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return Err(LinkError::Timeout);
            }
        }
    }

    fn transfer(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<(), LinkError> {
        let len = tx.len().max(rx.len());
        {
            let mut state = self.shared.state.lock();
            if state.device_closed {
                return Err(LinkError::Disconnected);
            }
            for i in 0..len {
                let input = state.pop_tx().unwrap_or(IDLE_FILL_BYTE);
                state.push_rx(tx.get(i).copied().unwrap_or(IDLE_FILL_BYTE));
                if let Some(slot) = rx.get_mut(i) {
                    *slot = input;
                }
            }
        }
        self.shared.progressed.notify_all();
        Ok(())
    }

    fn set_receive_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    fn reset_device(&mut self) -> Result<(), LinkError> {
        let mut state = self.shared.state.lock();
        state.resets += 1;
        state.device_tx.clear();
        state.tx_cursor = 0;
        state.device_rx.clear();
        Ok(())
    }
}

impl Drop for SimHost {
    fn drop(&mut self) {
        self.shared.state.lock().host_closed = true;
        self.shared.progressed.notify_all();
    }
}

/// 仿真总线设备端
pub struct SimDevice {
    shared: Arc<Shared>,
}

impl SimDevice {
    /// 主机端是否已经断开
    pub fn host_closed(&self) -> bool {
        self.shared.state.lock().host_closed
    }

    /// 累计装载的窗口数
    pub fn windows_armed(&self) -> u64 {
        self.shared.state.lock().windows_armed
    }
}

impl DeviceLink for SimDevice {
    fn collect(&mut self, window: &mut [u8; FRAME_SIZE]) -> usize {
        let deadline = Instant::now() + COLLECT_WAIT;
        let mut state = self.shared.state.lock();
        while state.host_mid_window() && !state.host_closed {
            if self
                .shared
                .progressed
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                break;
            }
        }

        let n = state.device_rx.len();
        window[..n].copy_from_slice(&state.device_rx);
        window[n..].fill(0);
        if state.rx_overflow > 0 {
            trace!("sim bus dropped {} rx bytes past the window", state.rx_overflow);
        }
        state.device_rx.clear();
        state.rx_overflow = 0;
        n
    }

    fn arm(&mut self, bytes: &[u8]) {
        {
            let mut state = self.shared.state.lock();
            state.device_tx.clear();
            state.device_tx.extend_from_slice(bytes);
            state.tx_cursor = 0;
            state.windows_armed += 1;
        }
        self.shared.armed.notify_all();
    }
}

impl Drop for SimDevice {
    fn drop(&mut self) {
        self.shared.state.lock().device_closed = true;
        self.shared.armed.notify_all();
    }
}
