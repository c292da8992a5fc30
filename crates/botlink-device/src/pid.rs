//! 整数 PID
//!
//! ```text
//! sum    = clamp(sum + err, -bound, bound)
//! output = Pm*err/Pd + Im*sum/Id + Dm*(prev_err - err)/Dd
//! ```
//!
//! 微分项使用 `prev_err - err`，符号与常规定义相反，由默认增益中的负 D 乘数抵消。
//! 中间结果为 64 位，除法向零截断，除数为 0 时按 1 处理。

use botlink_protocol::PidGains;

/// 单电机 PID 状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pid {
    integral: i32,
    prev_error: i32,
}

impl Pid {
    pub fn new() -> Self {
        Self::default()
    }

    /// 计算一步输出
    ///
    /// - `integral_bound`: 积分累加器对称限幅
    /// - `output_limit`: 输出对称限幅
    pub fn step(
        &mut self,
        gains: &PidGains,
        error: i32,
        integral_bound: i32,
        output_limit: i32,
    ) -> i32 {
        let bound = integral_bound.unsigned_abs() as i64;
        let integral = (self.integral as i64 + error as i64).clamp(-bound, bound);
        self.integral = integral as i32;

        let err = error as i64;
        let p = gains.p_mult as i64 * err / divisor(gains.p_div);
        let i = gains.i_mult as i64 * integral / divisor(gains.i_div);
        let d = gains.d_mult as i64 * (self.prev_error as i64 - err) / divisor(gains.d_div);
        self.prev_error = error;

        let limit = output_limit.unsigned_abs() as i64;
        (p + i + d).clamp(-limit, limit) as i32
    }

    /// 清零积分与上一次误差
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn integral(&self) -> i32 {
        self.integral
    }

    pub fn prev_error(&self) -> i32 {
        self.prev_error
    }
}

fn divisor(d: i16) -> i64 {
    if d == 0 { 1 } else { d as i64 }
}
