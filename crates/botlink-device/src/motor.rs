//! 电机模式状态机
//!
//! 每个电机每个 tick 根据主机目标选择模式：
//!
//! | 速度目标 | 位置模式位 | 模式 |
//! |---|---|---|
//! | 0 | - | [`MotorMode::OpenLoop`]：直接输出主机 PWM |
//! | ≠0 | 0 | [`MotorMode::VelocityHold`]：PID 跟踪目标速度 |
//! | ≠0 | 1 | [`MotorMode::PositionSeek`]：斜坡设定点以 |速度目标| 为步长逼近目标计数 |
//!
//! 目标（速度、位置、模式）任一变化即为重新设定：积分与斜坡锚点清零，运动位置位。
//! 运动位在位置模式到位或回到开环时清除。

use crate::pid::Pid;
use botlink_protocol::PidGains;

/// 电机控制模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MotorMode {
    #[default]
    OpenLoop,
    VelocityHold,
    PositionSeek,
}

/// 单电机的主机目标
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MotorTarget {
    /// 开环 PWM
    pub pwm: i16,
    pub speed_target: i16,
    pub counter_target: i32,
    pub position_mode: bool,
}

impl MotorTarget {
    pub fn mode(&self) -> MotorMode {
        match (self.speed_target, self.position_mode) {
            (0, _) => MotorMode::OpenLoop,
            (_, false) => MotorMode::VelocityHold,
            (_, true) => MotorMode::PositionSeek,
        }
    }
}

/// 所有电机共享的容差 / 斜坡限制
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    /// 位置到位容差（计数）
    pub position: i32,
    /// 速度容差（计数/tick）
    pub velocity: i32,
    /// 速度设定点每 tick 最大变化量，0 表示不限制
    pub accel: i32,
}

/// 控制输出限幅
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub pwm: i32,
    pub integral: i32,
}

/// 单电机运行状态
#[derive(Debug, Clone, Default)]
pub struct MotorState {
    mode: MotorMode,
    pid: Pid,
    /// 本 tick 测得的速度（计数/tick）
    speed: i32,
    /// 位置计数器（速度积分）
    counter: i32,
    pwm: i16,
    in_motion: bool,
    /// 位置模式的斜坡设定点 / 速度模式的限速设定点
    setpoint: i32,
    settled: bool,
    last_target: Option<(i16, i32, MotorMode)>,
}

impl MotorState {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录本 tick 的测速结果并积分到计数器
    pub fn record_speed(&mut self, speed: i32) {
        self.speed = speed;
        self.counter = self.counter.wrapping_add(speed);
    }

    /// 计数器清零（同时清积分）
    pub fn clear_counter(&mut self) {
        self.counter = 0;
        self.pid.reset();
        if self.mode == MotorMode::PositionSeek {
            self.setpoint = 0;
        }
    }

    /// 运行一步控制，返回应施加的 PWM
    pub fn update(
        &mut self,
        target: &MotorTarget,
        gains: &PidGains,
        thresholds: &Thresholds,
        limits: &Limits,
    ) -> i16 {
        let mode = target.mode();
        let key = (target.speed_target, target.counter_target, mode);
        if self.last_target != Some(key) {
            self.retarget(mode);
            self.last_target = Some(key);
        }
        self.mode = mode;

        let pwm = match mode {
            MotorMode::OpenLoop => {
                self.in_motion = false;
                target.pwm as i32
            },
            MotorMode::VelocityHold => {
                let goal = target.speed_target as i32;
                self.setpoint = if thresholds.accel > 0 {
                    step_toward(self.setpoint, goal, thresholds.accel)
                } else {
                    goal
                };
                let error = self.setpoint - self.speed;
                self.pid.step(gains, error, limits.integral, limits.pwm)
            },
            MotorMode::PositionSeek => self.seek(target, gains, thresholds, limits),
        };

        self.pwm = pwm.clamp(-limits.pwm, limits.pwm) as i16;
        self.pwm
    }

    /// 位置闭环：设定点按速度上限逐 tick 逼近目标计数。到位后锁存，
    /// 此后输出 PWM 0 滑行、不再保持位置，直到下一次重新设定目标。
    fn seek(
        &mut self,
        target: &MotorTarget,
        gains: &PidGains,
        thresholds: &Thresholds,
        limits: &Limits,
    ) -> i32 {
        if self.settled {
            return 0;
        }

        let remaining = target.counter_target as i64 - self.counter as i64;
        if remaining.abs() <= thresholds.position.unsigned_abs() as i64 {
            // 到位：设定点钉在实际计数，刹车并清积分
            self.settled = true;
            self.in_motion = false;
            self.setpoint = self.counter;
            self.pid.reset();
            return 0;
        }

        let max_step = (target.speed_target as i32).abs();
        self.setpoint = step_toward(self.setpoint, target.counter_target, max_step);
        let error = self.setpoint.saturating_sub(self.counter);
        self.pid.step(gains, error, limits.integral, limits.pwm)
    }

    fn retarget(&mut self, mode: MotorMode) {
        self.pid.reset();
        self.settled = false;
        self.in_motion = mode != MotorMode::OpenLoop;
        self.setpoint = match mode {
            MotorMode::PositionSeek => self.counter,
            _ => self.speed,
        };
    }

    pub fn mode(&self) -> MotorMode {
        self.mode
    }

    pub fn speed(&self) -> i32 {
        self.speed
    }

    pub fn counter(&self) -> i32 {
        self.counter
    }

    pub fn pwm(&self) -> i16 {
        self.pwm
    }

    pub fn in_motion(&self) -> bool {
        self.in_motion
    }

    pub fn setpoint(&self) -> i32 {
        self.setpoint
    }

    pub fn integral(&self) -> i32 {
        self.pid.integral()
    }

    /// 速度模式下测速是否在容差内
    pub fn speed_within(&self, target: i32, tolerance: i32) -> bool {
        (self.speed - target).abs() <= tolerance
    }
}

/// `current` 向 `goal` 前进至多 `max_step`，剩余距离不超过一步时直接到达
fn step_toward(current: i32, goal: i32, max_step: i32) -> i32 {
    let remaining = goal as i64 - current as i64;
    let step = max_step.unsigned_abs() as i64;
    if remaining.abs() <= step {
        goal
    } else {
        (current as i64 + step * remaining.signum()) as i32
    }
}
