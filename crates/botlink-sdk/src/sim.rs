//! 仿真设备
//!
//! 在后台线程上运行完整的设备运行时（[`TickScheduler`] + [`SimBoard`]），
//! 设备端挂在 [`SimBus`](botlink_link::SimBus) 上，主机端可以直接交给
//! [`Botlink`](botlink_driver::Botlink)。

use botlink_device::{DeviceConfig, SimBoard, SimPlant, SpinDelay, TickScheduler, run_periodic};
use botlink_link::SimDevice;
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use tracing::{info, warn};

/// 运行在后台线程上的仿真设备
pub struct SimulatedDevice {
    plant: Arc<Mutex<SimPlant>>,
    stop: Arc<AtomicBool>,
    ticks: Arc<AtomicU64>,
    handle: Option<JoinHandle<()>>,
}

impl SimulatedDevice {
    /// 启动设备线程（标定 + 周期 tick）
    pub fn spawn(config: DeviceConfig, link: SimDevice) -> Self {
        Self::spawn_with_plant(config, SimPlant::default(), link)
    }

    pub fn spawn_with_plant(config: DeviceConfig, plant: SimPlant, link: SimDevice) -> Self {
        let board = SimBoard::with_plant(plant);
        let plant = board.handle();
        let stop = Arc::new(AtomicBool::new(false));
        let ticks = Arc::new(AtomicU64::new(0));

        let thread_stop = stop.clone();
        let thread_ticks = ticks.clone();
        let handle = thread::spawn(move || {
            let mut scheduler = TickScheduler::new(config, board, SpinDelay::new(), link);
            if let Err(e) = scheduler.startup() {
                warn!("Simulated device calibration: {}", e);
            }
            info!("Simulated device running");
            let ticks = run_periodic(&mut scheduler, &thread_stop);
            thread_ticks.store(ticks, Ordering::Release);
            info!("Simulated device stopped after {} ticks", ticks);
        });

        Self {
            plant,
            stop,
            ticks,
            handle: Some(handle),
        }
    }

    /// 锁定仿真外设（注入串口输入、观察电机等）
    pub fn plant(&self) -> MutexGuard<'_, SimPlant> {
        self.plant.lock()
    }

    /// 停止设备线程，返回执行的 tick 数
    pub fn stop(mut self) -> u64 {
        self.shutdown();
        self.ticks.load(Ordering::Acquire)
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            warn!("Simulated device thread panicked");
        }
    }
}

impl Drop for SimulatedDevice {
    fn drop(&mut self) {
        self.shutdown();
    }
}
