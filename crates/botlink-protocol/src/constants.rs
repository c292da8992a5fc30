//! 协议常量定义

/// StateFrame 有效性魔数
///
/// 线上字节序列为 `3C C3 5A A5`。任意前缀与后缀都不重叠，
/// 半截魔数不会和下一个魔数拼出误匹配。
pub const FRAME_MAGIC: u32 = 0xA55A_C33C;

/// 魔数长度（字节）
pub const TAG_SIZE: usize = 4;

/// 帧尾填充长度（字节），即接收端可容忍的最大起点偏移
pub const PADDING_SIZE: usize = 16;

/// StateFrame 线上长度（字节）
pub const FRAME_SIZE: usize = 244;

/// 电机数量
pub const MOTOR_COUNT: usize = 4;

/// 舵机数量
pub const SERVO_COUNT: usize = 4;

/// 用户模拟量通道数量
pub const ANALOG_COUNT: usize = 8;

/// 数字端口数量
pub const DIGITAL_COUNT: usize = 8;

/// 串口透传通道数量
pub const SERIAL_PORT_COUNT: usize = 2;

/// 单个串口透传缓冲区长度（字节）
pub const SERIAL_BUFFER_SIZE: usize = 32;

/// PID 增益字数（每电机）
pub const PID_GAIN_WORDS: usize = 6;

/// 默认位置到位阈值（计数）
pub const DEFAULT_POSITION_THRESHOLD: i32 = 100;

/// 默认速度容差（计数/tick）
pub const DEFAULT_VELOCITY_THRESHOLD: i32 = 50;

/// 默认加速度限制（0 表示不限制）
pub const DEFAULT_ACCEL_THRESHOLD: i32 = 0;

/// 空闲填充字节（主机扫描阶段发送）
pub const IDLE_FILL_BYTE: u8 = 0x00;

/// 魔数的线上字节序列
pub const fn magic_bytes() -> [u8; TAG_SIZE] {
    FRAME_MAGIC.to_le_bytes()
}
