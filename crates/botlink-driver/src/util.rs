//! `Botlink` 关闭时使用的线程工具

use crate::error::DriverError;
use std::thread::{JoinHandle, spawn};
use std::time::Duration;

/// 带超时地 join IO 线程
///
/// IO 线程可能正阻塞在链路读上（最长一个接收超时），`JoinHandle::join`
/// 本身不支持超时，这里交给一个辅助线程去 join。超时后 IO 线程被分离。
///
/// # Errors
/// - `DriverError::Timeout`: 超时内未退出
/// - `DriverError::IoThread`: IO 线程 panic
pub(crate) fn join_io_thread<T: Send + 'static>(
    handle: JoinHandle<T>,
    timeout: Duration,
) -> Result<(), DriverError> {
    let (done_tx, done_rx) = crossbeam_channel::bounded(1);
    spawn(move || {
        // 超时后接收端可能已经不在
        let _ = done_tx.send(handle.join().is_ok());
    });

    match done_rx.recv_timeout(timeout) {
        Ok(true) => Ok(()),
        Ok(false) => Err(DriverError::IoThread("IO thread panicked".to_string())),
        Err(_) => Err(DriverError::Timeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_join_finished_thread() {
        let handle = thread::spawn(|| 7);
        assert!(join_io_thread(handle, Duration::from_millis(200)).is_ok());
    }

    #[test]
    fn test_join_reports_panic() {
        let handle = thread::spawn(|| panic!("link lost"));
        assert!(matches!(
            join_io_thread(handle, Duration::from_millis(500)),
            Err(DriverError::IoThread(_))
        ));
    }

    #[test]
    fn test_join_times_out_on_stuck_thread() {
        let handle = thread::spawn(|| thread::sleep(Duration::from_millis(300)));
        assert!(matches!(
            join_io_thread(handle, Duration::from_millis(20)),
            Err(DriverError::Timeout)
        ));
    }
}
