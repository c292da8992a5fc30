//! 链路性能指标
//!
//! 原子计数器，IO 线程更新，任意线程读取快照，不引入锁竞争。

use std::sync::atomic::{AtomicU64, Ordering};

/// 链路实时指标
///
/// # 使用示例
///
/// ```rust
/// use botlink_driver::LinkMetrics;
/// use std::sync::Arc;
/// use std::sync::atomic::Ordering;
///
/// let metrics = Arc::new(LinkMetrics::default());
///
/// // 在 IO 线程中更新指标
/// metrics.exchanges_total.fetch_add(1, Ordering::Relaxed);
///
/// // 在主线程中读取快照
/// let snapshot = metrics.snapshot();
/// println!("Exchanges: {}", snapshot.exchanges_total);
/// ```
#[derive(Debug, Default)]
pub struct LinkMetrics {
    /// 完成的帧交换次数
    pub exchanges_total: AtomicU64,

    /// 重同步累计丢弃的字节数
    pub resync_discarded_bytes: AtomicU64,

    /// 需要重同步（丢弃字节数 > 0）的交换次数
    pub resync_events: AtomicU64,

    /// 链路读超时次数（设备尚未装载下一窗口时属于正常现象）
    pub link_timeouts: AtomicU64,

    /// 其他链路错误次数
    pub link_errors: AtomicU64,

    /// 看门狗触发的设备复位次数
    pub watchdog_resets: AtomicU64,

    /// 完成的短命令事务次数
    pub commands_total: AtomicU64,

    /// 失败的短命令事务次数（超时或链路错误）
    pub commands_failed: AtomicU64,

    /// 主机→设备透传字节数
    pub serial_tx_bytes: AtomicU64,

    /// 设备→主机透传字节数
    pub serial_rx_bytes: AtomicU64,
}

impl LinkMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取指标快照
    ///
    /// 各计数器分别原子读取，之间可能有微小的时间差。
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            exchanges_total: self.exchanges_total.load(Ordering::Relaxed),
            resync_discarded_bytes: self.resync_discarded_bytes.load(Ordering::Relaxed),
            resync_events: self.resync_events.load(Ordering::Relaxed),
            link_timeouts: self.link_timeouts.load(Ordering::Relaxed),
            link_errors: self.link_errors.load(Ordering::Relaxed),
            watchdog_resets: self.watchdog_resets.load(Ordering::Relaxed),
            commands_total: self.commands_total.load(Ordering::Relaxed),
            commands_failed: self.commands_failed.load(Ordering::Relaxed),
            serial_tx_bytes: self.serial_tx_bytes.load(Ordering::Relaxed),
            serial_rx_bytes: self.serial_rx_bytes.load(Ordering::Relaxed),
        }
    }

    /// 重置所有计数器
    pub fn reset(&self) {
        self.exchanges_total.store(0, Ordering::Relaxed);
        self.resync_discarded_bytes.store(0, Ordering::Relaxed);
        self.resync_events.store(0, Ordering::Relaxed);
        self.link_timeouts.store(0, Ordering::Relaxed);
        self.link_errors.store(0, Ordering::Relaxed);
        self.watchdog_resets.store(0, Ordering::Relaxed);
        self.commands_total.store(0, Ordering::Relaxed);
        self.commands_failed.store(0, Ordering::Relaxed);
        self.serial_tx_bytes.store(0, Ordering::Relaxed);
        self.serial_rx_bytes.store(0, Ordering::Relaxed);
    }
}

/// 指标快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MetricsSnapshot {
    pub exchanges_total: u64,
    pub resync_discarded_bytes: u64,
    pub resync_events: u64,
    pub link_timeouts: u64,
    pub link_errors: u64,
    pub watchdog_resets: u64,
    pub commands_total: u64,
    pub commands_failed: u64,
    pub serial_tx_bytes: u64,
    pub serial_rx_bytes: u64,
}

impl MetricsSnapshot {
    /// 需要重同步的交换占比（百分比）
    ///
    /// 返回 0.0 到 100.0 之间的值。如果 `exchanges_total` 为 0，返回 0.0。
    pub fn resync_rate(&self) -> f64 {
        if self.exchanges_total == 0 {
            return 0.0;
        }
        (self.resync_events as f64 / self.exchanges_total as f64) * 100.0
    }
}
