//! 链路健康状态
//!
//! IO 线程在每个有效帧（或命令应答）之后登记，看门狗据此判断是否复位设备，
//! 应用线程通过 `Botlink::is_connected` 读取。

use parking_lot::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Default, Clone, Copy)]
struct HealthState {
    last_valid: Option<Instant>,
    valid_frames: u64,
    last_reset: Option<Instant>,
}

/// 链路健康状态（看门狗窗口、有效帧计数、上次复位时间）
pub struct LinkHealth {
    timeout: Duration,
    created: Instant,
    state: Mutex<HealthState>,
}

impl LinkHealth {
    /// # Example
    /// ```
    /// # use botlink_driver::LinkHealth;
    /// # use std::time::Duration;
    /// let health = LinkHealth::new(Duration::from_millis(500));
    /// assert!(!health.is_alive());
    /// health.record_valid();
    /// assert!(health.is_alive());
    /// ```
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            created: Instant::now(),
            state: Mutex::new(HealthState::default()),
        }
    }

    /// 登记一个已验证的帧或命令应答
    pub fn record_valid(&self) {
        let mut state = self.state.lock();
        state.last_valid = Some(Instant::now());
        state.valid_frames += 1;
    }

    /// 看门狗窗口内是否收到过有效帧
    pub fn is_alive(&self) -> bool {
        self.state
            .lock()
            .last_valid
            .is_some_and(|at| at.elapsed() < self.timeout)
    }

    /// 链路静默时长；从未收到有效帧时从创建时刻算起
    pub fn silence(&self) -> Duration {
        self.state.lock().last_valid.unwrap_or(self.created).elapsed()
    }

    pub fn valid_frames(&self) -> u64 {
        self.state.lock().valid_frames
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// 看门狗判定
    ///
    /// 静默超过超时、且距上次复位也超过一个超时周期时登记本次复位，
    /// 返回静默时长；否则返回 `None`。复位本身不算有效帧。
    pub fn watchdog_due(&self) -> Option<Duration> {
        let now = Instant::now();
        let mut state = self.state.lock();
        let silence = now.saturating_duration_since(state.last_valid.unwrap_or(self.created));
        if silence <= self.timeout {
            return None;
        }
        if state
            .last_reset
            .is_some_and(|at| now.saturating_duration_since(at) <= self.timeout)
        {
            return None;
        }
        state.last_reset = Some(now);
        Some(silence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_alive_only_after_valid_frame() {
        let health = LinkHealth::new(Duration::from_millis(30));
        assert!(!health.is_alive());
        assert_eq!(health.valid_frames(), 0);

        health.record_valid();
        health.record_valid();
        assert!(health.is_alive());
        assert_eq!(health.valid_frames(), 2);
        assert!(health.silence() < Duration::from_millis(30));

        thread::sleep(Duration::from_millis(60));
        assert!(!health.is_alive());
        assert!(health.silence() >= Duration::from_millis(60));
    }

    #[test]
    fn test_watchdog_fires_once_per_period() {
        let health = LinkHealth::new(Duration::from_millis(30));
        assert!(health.watchdog_due().is_none());

        thread::sleep(Duration::from_millis(40));
        assert!(health.watchdog_due().is_some());
        // 同一周期内不再复位
        assert!(health.watchdog_due().is_none());
        assert!(!health.is_alive());

        thread::sleep(Duration::from_millis(40));
        assert!(health.watchdog_due().is_some());
    }

    #[test]
    fn test_valid_frame_disarms_watchdog() {
        let health = LinkHealth::new(Duration::from_millis(30));
        thread::sleep(Duration::from_millis(40));
        health.record_valid();
        assert!(health.watchdog_due().is_none());
        assert!(health.is_alive());
    }
}
