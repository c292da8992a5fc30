//! StateFrame 定长记录
//!
//! 设备与主机之间交换的唯一记录。遥测（设备→主机）和命令（主机→设备）
//! 两个方向使用同一布局：小端、紧凑排列，总长 [`FRAME_SIZE`] 字节。
//!
//! 有效性全部由 `tag` 决定：`tag == FRAME_MAGIC` 表示记录完整可信，
//! 其他任何值都表示无效或正在传输中。编解码本身不做字段级校验。

use crate::ProtocolError;
use crate::constants::*;
use bytes::{Buf, BufMut};

/// 单个电机的 PID 增益（整数乘除对）
///
/// 线上顺序：`{P-mult, I-mult, D-mult, P-div, I-div, D-div}`。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PidGains {
    pub p_mult: i16,
    pub i_mult: i16,
    pub d_mult: i16,
    pub p_div: i16,
    pub i_div: i16,
    pub d_div: i16,
}

impl PidGains {
    /// 出厂默认增益
    ///
    /// 微分项使用 `prevErr - err` 的反向符号约定，因此默认 D 乘数为负。
    pub const DEFAULT: Self = Self {
        p_mult: 1,
        i_mult: 1,
        d_mult: -1,
        p_div: 2,
        i_div: 8,
        d_div: 4,
    };

    /// 转换为线上字序
    pub fn to_words(self) -> [i16; PID_GAIN_WORDS] {
        [
            self.p_mult,
            self.i_mult,
            self.d_mult,
            self.p_div,
            self.i_div,
            self.d_div,
        ]
    }

    /// 从线上字序构造
    pub fn from_words(words: [i16; PID_GAIN_WORDS]) -> Self {
        Self {
            p_mult: words[0],
            i_mult: words[1],
            d_mult: words[2],
            p_div: words[3],
            i_div: words[4],
            d_div: words[5],
        }
    }
}

impl Default for PidGains {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// 串口透传缓冲区
///
/// `status` 作为 8 位序号使用：发送方每放入一批新数据就递增一次，
/// 接收方只在序号变化时消费 `data[..len]`。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialBuffer {
    pub data: [u8; SERIAL_BUFFER_SIZE],
    pub len: u8,
    pub status: u8,
}

impl SerialBuffer {
    /// 有效数据切片（`len` 越界时截断到缓冲区长度）
    pub fn bytes(&self) -> &[u8] {
        let len = (self.len as usize).min(SERIAL_BUFFER_SIZE);
        &self.data[..len]
    }

    /// 装入新数据并递增序号，返回实际装入的字节数
    pub fn load(&mut self, bytes: &[u8]) -> usize {
        let n = bytes.len().min(SERIAL_BUFFER_SIZE);
        self.data = [0; SERIAL_BUFFER_SIZE];
        self.data[..n].copy_from_slice(&bytes[..n]);
        self.len = n as u8;
        self.status = self.status.wrapping_add(1);
        n
    }
}

impl Default for SerialBuffer {
    fn default() -> Self {
        Self {
            data: [0; SERIAL_BUFFER_SIZE],
            len: 0,
            status: 0,
        }
    }
}

/// 设备与主机交换的定长状态记录
///
/// 字段顺序即线上顺序。传感器类字段由设备填写，目标/增益/阈值类字段由主机填写，
/// 两个方向的记录各自独立编码。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StateFrame {
    /// 有效性标记，见 [`FRAME_MAGIC`]
    pub tag: u32,

    // === 传感器 / IO ===
    pub analog: [u16; ANALOG_COUNT],
    pub digital_bits: u8,
    pub digital_output_enable: u8,
    pub digital_output_value: u8,
    pub button_state: u8,
    /// 加速度计 [X, Y, Z]
    pub accel: [i16; 3],
    pub battery_voltage: u16,

    // === 所有电机共享的容差 / 斜坡限制 ===
    pub position_threshold: i32,
    pub velocity_threshold: i32,
    pub accel_threshold: i32,

    pub pid_gains: [PidGains; MOTOR_COUNT],

    // === 电机 ===
    pub motor_in_motion_bits: u8,
    pub motor_clear_counter_bits: u8,
    /// Bit i 置位：电机 i 在非零速度目标下进入位置模式
    pub motor_position_mode_bits: u8,
    pub servos_enabled: u8,
    pub motor_pwm: [i16; MOTOR_COUNT],
    pub motor_speed: [i16; MOTOR_COUNT],
    pub motor_speed_target: [i16; MOTOR_COUNT],
    pub motor_counter: [i32; MOTOR_COUNT],
    pub motor_counter_target: [i32; MOTOR_COUNT],

    // === 舵机 ===
    pub servo_target: [i16; SERVO_COUNT],

    pub serial: [SerialBuffer; SERIAL_PORT_COUNT],

    /// 仅为重同步扫描预留的尾部空间，内容无意义
    pub padding: [u8; PADDING_SIZE],
}

impl StateFrame {
    /// 创建空记录（无效，tag = 0）
    pub fn new() -> Self {
        Self::default()
    }

    /// 写入魔数，标记为完整有效
    pub fn mark_valid(&mut self) {
        self.tag = FRAME_MAGIC;
    }

    /// 清零魔数，标记为无效 / 传输中
    pub fn invalidate(&mut self) {
        self.tag = 0;
    }

    /// 检查魔数
    pub fn is_valid(&self) -> bool {
        self.tag == FRAME_MAGIC
    }

    /// 读取 bitmask 中电机 `index` 对应的位
    pub fn bit(mask: u8, index: usize) -> bool {
        index < 8 && mask & (1 << index) != 0
    }

    /// 设置 / 清除 bitmask 中的一位
    pub fn set_bit(mask: &mut u8, index: usize, value: bool) {
        if index >= 8 {
            return;
        }
        if value {
            *mask |= 1 << index;
        } else {
            *mask &= !(1 << index);
        }
    }

    /// 编码到 `out` 的前 [`FRAME_SIZE`] 字节
    pub fn encode(&self, out: &mut [u8]) -> Result<(), ProtocolError> {
        if out.len() < FRAME_SIZE {
            return Err(ProtocolError::InvalidLength {
                expected: FRAME_SIZE,
                actual: out.len(),
            });
        }

        let mut buf = &mut out[..FRAME_SIZE];
        buf.put_u32_le(self.tag);

        for v in self.analog {
            buf.put_u16_le(v);
        }
        buf.put_u8(self.digital_bits);
        buf.put_u8(self.digital_output_enable);
        buf.put_u8(self.digital_output_value);
        buf.put_u8(self.button_state);
        for v in self.accel {
            buf.put_i16_le(v);
        }
        buf.put_u16_le(self.battery_voltage);

        buf.put_i32_le(self.position_threshold);
        buf.put_i32_le(self.velocity_threshold);
        buf.put_i32_le(self.accel_threshold);

        for gains in &self.pid_gains {
            for w in gains.to_words() {
                buf.put_i16_le(w);
            }
        }

        buf.put_u8(self.motor_in_motion_bits);
        buf.put_u8(self.motor_clear_counter_bits);
        buf.put_u8(self.motor_position_mode_bits);
        buf.put_u8(self.servos_enabled);
        put_i16s(&mut buf, &self.motor_pwm);
        put_i16s(&mut buf, &self.motor_speed);
        put_i16s(&mut buf, &self.motor_speed_target);
        for v in self.motor_counter {
            buf.put_i32_le(v);
        }
        for v in self.motor_counter_target {
            buf.put_i32_le(v);
        }
        put_i16s(&mut buf, &self.servo_target);

        for serial in &self.serial {
            buf.put_slice(&serial.data);
            buf.put_u8(serial.len);
            buf.put_u8(serial.status);
        }
        buf.put_slice(&self.padding);

        debug_assert!(buf.is_empty(), "StateFrame layout drifted from FRAME_SIZE");
        Ok(())
    }

    /// 编码为定长字节数组
    pub fn to_bytes(&self) -> [u8; FRAME_SIZE] {
        let mut out = [0u8; FRAME_SIZE];
        // 长度恒等于 FRAME_SIZE，不会失败
        let _ = self.encode(&mut out);
        out
    }

    /// 从字节切片解码（只读取前 [`FRAME_SIZE`] 字节）
    ///
    /// 不检查魔数，调用方需自行使用 [`StateFrame::is_valid`]。
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() < FRAME_SIZE {
            return Err(ProtocolError::InvalidLength {
                expected: FRAME_SIZE,
                actual: bytes.len(),
            });
        }

        let mut buf = &bytes[..FRAME_SIZE];
        let tag = buf.get_u32_le();

        let mut analog = [0u16; ANALOG_COUNT];
        for v in analog.iter_mut() {
            *v = buf.get_u16_le();
        }
        let digital_bits = buf.get_u8();
        let digital_output_enable = buf.get_u8();
        let digital_output_value = buf.get_u8();
        let button_state = buf.get_u8();
        let accel = get_i16s::<3>(&mut buf);
        let battery_voltage = buf.get_u16_le();

        let position_threshold = buf.get_i32_le();
        let velocity_threshold = buf.get_i32_le();
        let accel_threshold = buf.get_i32_le();

        let mut pid_gains = [PidGains::DEFAULT; MOTOR_COUNT];
        for gains in pid_gains.iter_mut() {
            *gains = PidGains::from_words(get_i16s::<PID_GAIN_WORDS>(&mut buf));
        }

        let motor_in_motion_bits = buf.get_u8();
        let motor_clear_counter_bits = buf.get_u8();
        let motor_position_mode_bits = buf.get_u8();
        let servos_enabled = buf.get_u8();
        let motor_pwm = get_i16s::<MOTOR_COUNT>(&mut buf);
        let motor_speed = get_i16s::<MOTOR_COUNT>(&mut buf);
        let motor_speed_target = get_i16s::<MOTOR_COUNT>(&mut buf);
        let motor_counter = get_i32s::<MOTOR_COUNT>(&mut buf);
        let motor_counter_target = get_i32s::<MOTOR_COUNT>(&mut buf);
        let servo_target = get_i16s::<SERVO_COUNT>(&mut buf);

        let mut serial = [SerialBuffer::default(); SERIAL_PORT_COUNT];
        for s in serial.iter_mut() {
            buf.copy_to_slice(&mut s.data);
            s.len = buf.get_u8();
            s.status = buf.get_u8();
        }

        let mut padding = [0u8; PADDING_SIZE];
        buf.copy_to_slice(&mut padding);

        Ok(Self {
            tag,
            analog,
            digital_bits,
            digital_output_enable,
            digital_output_value,
            button_state,
            accel,
            battery_voltage,
            position_threshold,
            velocity_threshold,
            accel_threshold,
            pid_gains,
            motor_in_motion_bits,
            motor_clear_counter_bits,
            motor_position_mode_bits,
            servos_enabled,
            motor_pwm,
            motor_speed,
            motor_speed_target,
            motor_counter,
            motor_counter_target,
            servo_target,
            serial,
            padding,
        })
    }

    /// 直接读取字节缓冲区中的魔数（不解码其余字段）
    pub fn tag_of(bytes: &[u8]) -> Option<u32> {
        let tag: [u8; TAG_SIZE] = bytes.get(..TAG_SIZE)?.try_into().ok()?;
        Some(u32::from_le_bytes(tag))
    }
}

fn put_i16s(buf: &mut &mut [u8], values: &[i16]) {
    for &v in values {
        buf.put_i16_le(v);
    }
}

fn get_i16s<const N: usize>(buf: &mut &[u8]) -> [i16; N] {
    let mut out = [0i16; N];
    for v in out.iter_mut() {
        *v = buf.get_i16_le();
    }
    out
}

fn get_i32s<const N: usize>(buf: &mut &[u8]) -> [i32; N] {
    let mut out = [0i32; N];
    for v in out.iter_mut() {
        *v = buf.get_i32_le();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_frame() -> StateFrame {
        let mut frame = StateFrame::new();
        frame.analog = [1, 2, 3, 4, 1020, 1021, 1022, 1023];
        frame.digital_bits = 0b1010_0101;
        frame.button_state = 1;
        frame.accel = [-100, 0, 512];
        frame.battery_voltage = 7400;
        frame.position_threshold = 100;
        frame.velocity_threshold = 50;
        frame.pid_gains[2] = PidGains::from_words([3, 0, -2, 1, 0, 7]);
        frame.motor_in_motion_bits = 0b0001;
        frame.motor_pwm = [-1000, 0, 250, 1000];
        frame.motor_speed = [500, -12, 13, 0];
        frame.motor_counter = [i32::MAX, -1, 0, i32::MIN];
        frame.motor_counter_target = [20_000, 0, -5, 7];
        frame.servo_target = [1024, 0, -1, 2047];
        frame.serial[1].load(b"hello");
        frame.padding[15] = 0xEE;
        frame.mark_valid();
        frame
    }

    #[test]
    fn test_frame_roundtrip_bit_identical() {
        let frame = sample_frame();
        let bytes = frame.to_bytes();
        let decoded = StateFrame::decode(&bytes).unwrap();
        assert_eq!(decoded, frame);
        assert_eq!(decoded.to_bytes(), bytes);
    }

    #[test]
    fn test_tag_is_first_four_bytes() {
        let frame = sample_frame();
        let bytes = frame.to_bytes();
        assert_eq!(&bytes[..TAG_SIZE], &magic_bytes());
        assert_eq!(StateFrame::tag_of(&bytes), Some(FRAME_MAGIC));
    }

    #[test]
    fn test_padding_is_trailing() {
        let frame = sample_frame();
        let bytes = frame.to_bytes();
        assert_eq!(bytes[FRAME_SIZE - 1], 0xEE);
        assert!(bytes[FRAME_SIZE - PADDING_SIZE..FRAME_SIZE - 1].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_valid_invalidate() {
        let mut frame = StateFrame::new();
        assert!(!frame.is_valid());
        frame.mark_valid();
        assert!(frame.is_valid());
        frame.invalidate();
        assert!(!frame.is_valid());
        assert_eq!(frame.tag, 0);
    }

    #[test]
    fn test_any_other_tag_is_invalid() {
        let mut frame = StateFrame::new();
        frame.tag = FRAME_MAGIC ^ 1;
        assert!(!frame.is_valid());
    }

    #[test]
    fn test_decode_short_buffer() {
        let err = StateFrame::decode(&[0u8; FRAME_SIZE - 1]).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::InvalidLength {
                expected: FRAME_SIZE,
                actual: FRAME_SIZE - 1
            }
        );
    }

    #[test]
    fn test_encode_short_buffer() {
        let frame = StateFrame::new();
        let mut out = [0u8; 10];
        assert!(frame.encode(&mut out).is_err());
    }

    #[test]
    fn test_decode_ignores_trailing_bytes() {
        let frame = sample_frame();
        let mut bytes = frame.to_bytes().to_vec();
        bytes.extend_from_slice(&[0xAB; 8]);
        assert_eq!(StateFrame::decode(&bytes).unwrap(), frame);
    }

    #[test]
    fn test_bit_helpers() {
        let mut mask = 0u8;
        StateFrame::set_bit(&mut mask, 3, true);
        assert!(StateFrame::bit(mask, 3));
        assert!(!StateFrame::bit(mask, 2));
        StateFrame::set_bit(&mut mask, 3, false);
        assert_eq!(mask, 0);
        // 越界索引被忽略
        StateFrame::set_bit(&mut mask, 9, true);
        assert_eq!(mask, 0);
        assert!(!StateFrame::bit(0xFF, 8));
    }

    #[test]
    fn test_serial_buffer_load_truncates_and_bumps_sequence() {
        let mut s = SerialBuffer::default();
        assert_eq!(s.load(&[7u8; 40]), SERIAL_BUFFER_SIZE);
        assert_eq!(s.bytes().len(), SERIAL_BUFFER_SIZE);
        assert_eq!(s.status, 1);
        s.load(b"ab");
        assert_eq!(s.bytes(), b"ab");
        assert_eq!(s.status, 2);
    }

    #[test]
    fn test_default_gains() {
        let frame = StateFrame::new();
        assert_eq!(frame.pid_gains[0], PidGains::DEFAULT);
        assert_eq!(PidGains::DEFAULT.to_words(), [1, 1, -1, 2, 8, 4]);
    }
}
