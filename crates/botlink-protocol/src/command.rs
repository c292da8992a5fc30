//! 短命令/应答模式
//!
//! 与 StateFrame 模式共用同一条物理链路的对等协议，用于简单的单端口操作。
//! 两种模式不会在同一次交换中混用。
//!
//! ## 报文格式（16 位小端字）
//!
//! ```text
//! 请求: [REQUEST_MARKER][command id][payload word count][payload ...]
//! 应答: [REPLY_MARKER][word count | REPLY_ERROR_FLAG?][payload ...]
//! ```
//!
//! 命令 ID 高 4 位为分组（DIGITAL/ANALOG/...），低 4 位为子操作
//! （0 = READ，1 = WRITE，2 = CONFIG）。

use crate::constants::*;
use crate::frame::PidGains;
use crate::{ProtocolError, join_i32, split_i32};
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// 协议字
pub type Word = u16;

/// 请求起始标记
pub const REQUEST_MARKER: Word = 0xC0DE;

/// 应答起始标记
pub const REPLY_MARKER: Word = 0xDEC0;

/// 请求头长度（字）
pub const HEADER_WORDS: usize = 3;

/// 单个请求的最大载荷（字）
pub const MAX_PAYLOAD_WORDS: usize = 128;

/// 应答计数字中的错误标志位
pub const REPLY_ERROR_FLAG: Word = 0x8000;

/// 命令 ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u16)]
pub enum CommandId {
    DigitalRead = 0x10,
    DigitalWrite = 0x11,
    DigitalConfig = 0x12,
    AnalogRead = 0x20,
    AccelRead = 0x30,
    SensorsRead = 0x40,
    UartRead = 0x50,
    UartWrite = 0x51,
    UartConfig = 0x52,
    PwmRead = 0x60,
    PwmWrite = 0x61,
    PidRead = 0x70,
    PidWrite = 0x71,
    PidConfig = 0x72,
    PidClear = 0x73,
    ServoRead = 0x80,
    ServoWrite = 0x81,
    ServoConfig = 0x82,
    StatusRead = 0x90,
}

/// 类型化请求
///
/// 设备侧分发器对该枚举做穷尽匹配，新增命令时编译器会指出所有未处理的位置。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    DigitalRead,
    DigitalWrite { port: u8, value: bool },
    DigitalConfig { output_enable: u8 },
    /// `channel` 为 `None` 时读取全部通道
    AnalogRead { channel: Option<u8> },
    AccelRead,
    SensorsRead,
    UartRead { port: u8 },
    UartWrite { port: u8, data: Vec<u8> },
    UartConfig { port: u8, flags: u16 },
    PwmRead { motor: u8 },
    PwmWrite { motor: u8, pwm: i16 },
    PidRead { motor: u8 },
    PidWrite {
        motor: u8,
        speed_target: i16,
        counter_target: i32,
        position_mode: bool,
    },
    PidConfig { motor: u8, gains: PidGains },
    PidClear { motor: u8 },
    ServoRead { servo: u8 },
    ServoWrite { servo: u8, target: i16 },
    ServoConfig { enabled: bool },
    StatusRead,
}

impl Request {
    /// 对应的命令 ID
    pub fn id(&self) -> CommandId {
        match self {
            Request::DigitalRead => CommandId::DigitalRead,
            Request::DigitalWrite { .. } => CommandId::DigitalWrite,
            Request::DigitalConfig { .. } => CommandId::DigitalConfig,
            Request::AnalogRead { .. } => CommandId::AnalogRead,
            Request::AccelRead => CommandId::AccelRead,
            Request::SensorsRead => CommandId::SensorsRead,
            Request::UartRead { .. } => CommandId::UartRead,
            Request::UartWrite { .. } => CommandId::UartWrite,
            Request::UartConfig { .. } => CommandId::UartConfig,
            Request::PwmRead { .. } => CommandId::PwmRead,
            Request::PwmWrite { .. } => CommandId::PwmWrite,
            Request::PidRead { .. } => CommandId::PidRead,
            Request::PidWrite { .. } => CommandId::PidWrite,
            Request::PidConfig { .. } => CommandId::PidConfig,
            Request::PidClear { .. } => CommandId::PidClear,
            Request::ServoRead { .. } => CommandId::ServoRead,
            Request::ServoWrite { .. } => CommandId::ServoWrite,
            Request::ServoConfig { .. } => CommandId::ServoConfig,
            Request::StatusRead => CommandId::StatusRead,
        }
    }

    /// 载荷字
    pub fn payload(&self) -> Vec<Word> {
        match self {
            Request::DigitalRead
            | Request::AccelRead
            | Request::SensorsRead
            | Request::StatusRead => Vec::new(),
            Request::DigitalWrite { port, value } => vec![*port as Word, *value as Word],
            Request::DigitalConfig { output_enable } => vec![*output_enable as Word],
            Request::AnalogRead { channel } => channel.iter().map(|&c| c as Word).collect(),
            Request::UartRead { port } => vec![*port as Word],
            Request::UartWrite { port, data } => std::iter::once(*port as Word)
                .chain(data.iter().map(|&b| b as Word))
                .collect(),
            Request::UartConfig { port, flags } => vec![*port as Word, *flags],
            Request::PwmRead { motor } => vec![*motor as Word],
            Request::PwmWrite { motor, pwm } => vec![*motor as Word, *pwm as Word],
            Request::PidRead { motor } => vec![*motor as Word],
            Request::PidWrite {
                motor,
                speed_target,
                counter_target,
                position_mode,
            } => {
                let [lo, hi] = split_i32(*counter_target);
                vec![
                    *motor as Word,
                    *speed_target as Word,
                    lo,
                    hi,
                    *position_mode as Word,
                ]
            },
            Request::PidConfig { motor, gains } => std::iter::once(*motor as Word)
                .chain(gains.to_words().iter().map(|&g| g as Word))
                .collect(),
            Request::PidClear { motor } => vec![*motor as Word],
            Request::ServoRead { servo } => vec![*servo as Word],
            Request::ServoWrite { servo, target } => vec![*servo as Word, *target as Word],
            Request::ServoConfig { enabled } => vec![*enabled as Word],
        }
    }

    /// 从命令 ID 与载荷构造请求，校验端口范围和载荷长度
    pub fn from_parts(id: CommandId, payload: &[Word]) -> Result<Self, ProtocolError> {
        let invalid = |reason: &str| ProtocolError::InvalidPayload {
            command: id,
            reason: reason.to_string(),
        };
        let expect_len = |n: usize| {
            if payload.len() == n {
                Ok(())
            } else {
                Err(invalid(&format!("expected {} words, got {}", n, payload.len())))
            }
        };
        let index = |word: Word, count: usize, what: &str| {
            if (word as usize) < count {
                Ok(word as u8)
            } else {
                Err(invalid(&format!("{} index {} out of range", what, word)))
            }
        };

        let request = match id {
            CommandId::DigitalRead => {
                expect_len(0)?;
                Request::DigitalRead
            },
            CommandId::DigitalWrite => {
                expect_len(2)?;
                Request::DigitalWrite {
                    port: index(payload[0], DIGITAL_COUNT, "digital port")?,
                    value: payload[1] != 0,
                }
            },
            CommandId::DigitalConfig => {
                expect_len(1)?;
                Request::DigitalConfig {
                    output_enable: payload[0] as u8,
                }
            },
            CommandId::AnalogRead => match payload {
                [] => Request::AnalogRead { channel: None },
                [c] => Request::AnalogRead {
                    channel: Some(index(*c, ANALOG_COUNT, "analog channel")?),
                },
                _ => return Err(invalid("expected 0 or 1 words")),
            },
            CommandId::AccelRead => {
                expect_len(0)?;
                Request::AccelRead
            },
            CommandId::SensorsRead => {
                expect_len(0)?;
                Request::SensorsRead
            },
            CommandId::UartRead => {
                expect_len(1)?;
                Request::UartRead {
                    port: index(payload[0], SERIAL_PORT_COUNT, "uart port")?,
                }
            },
            CommandId::UartWrite => {
                let (&port, data) = payload
                    .split_first()
                    .ok_or_else(|| invalid("missing uart port"))?;
                if data.len() > SERIAL_BUFFER_SIZE {
                    return Err(invalid("uart write longer than serial buffer"));
                }
                Request::UartWrite {
                    port: index(port, SERIAL_PORT_COUNT, "uart port")?,
                    data: data.iter().map(|&w| w as u8).collect(),
                }
            },
            CommandId::UartConfig => {
                expect_len(2)?;
                Request::UartConfig {
                    port: index(payload[0], SERIAL_PORT_COUNT, "uart port")?,
                    flags: payload[1],
                }
            },
            CommandId::PwmRead => {
                expect_len(1)?;
                Request::PwmRead {
                    motor: index(payload[0], MOTOR_COUNT, "motor")?,
                }
            },
            CommandId::PwmWrite => {
                expect_len(2)?;
                Request::PwmWrite {
                    motor: index(payload[0], MOTOR_COUNT, "motor")?,
                    pwm: payload[1] as i16,
                }
            },
            CommandId::PidRead => {
                expect_len(1)?;
                Request::PidRead {
                    motor: index(payload[0], MOTOR_COUNT, "motor")?,
                }
            },
            CommandId::PidWrite => {
                expect_len(5)?;
                Request::PidWrite {
                    motor: index(payload[0], MOTOR_COUNT, "motor")?,
                    speed_target: payload[1] as i16,
                    counter_target: join_i32(payload[2], payload[3]),
                    position_mode: payload[4] != 0,
                }
            },
            CommandId::PidConfig => {
                expect_len(1 + PID_GAIN_WORDS)?;
                let mut words = [0i16; PID_GAIN_WORDS];
                for (w, &p) in words.iter_mut().zip(&payload[1..]) {
                    *w = p as i16;
                }
                Request::PidConfig {
                    motor: index(payload[0], MOTOR_COUNT, "motor")?,
                    gains: PidGains::from_words(words),
                }
            },
            CommandId::PidClear => {
                expect_len(1)?;
                Request::PidClear {
                    motor: index(payload[0], MOTOR_COUNT, "motor")?,
                }
            },
            CommandId::ServoRead => {
                expect_len(1)?;
                Request::ServoRead {
                    servo: index(payload[0], SERVO_COUNT, "servo")?,
                }
            },
            CommandId::ServoWrite => {
                expect_len(2)?;
                Request::ServoWrite {
                    servo: index(payload[0], SERVO_COUNT, "servo")?,
                    target: payload[1] as i16,
                }
            },
            CommandId::ServoConfig => {
                expect_len(1)?;
                Request::ServoConfig {
                    enabled: payload[0] != 0,
                }
            },
            CommandId::StatusRead => {
                expect_len(0)?;
                Request::StatusRead
            },
        };
        Ok(request)
    }

    /// 编码为请求报文字节
    pub fn encode(&self) -> Vec<u8> {
        let payload = self.payload();
        let mut words = Vec::with_capacity(HEADER_WORDS + payload.len());
        words.push(REQUEST_MARKER);
        words.push(self.id().into());
        words.push(payload.len() as Word);
        words.extend_from_slice(&payload);
        words_to_bytes(&words)
    }

    /// 从字节缓冲区解码请求
    ///
    /// 缓冲区必须以 [`REQUEST_MARKER`] 开头（先用 [`find_marker`] 定位）。
    /// 返回请求和消耗的字节数。
    pub fn decode(bytes: &[u8]) -> Result<(Self, usize), ProtocolError> {
        let header = read_words(bytes, 0, HEADER_WORDS)?;
        if header[0] != REQUEST_MARKER {
            return Err(ProtocolError::MissingMarker);
        }
        let id = CommandId::try_from(header[1])
            .map_err(|_| ProtocolError::UnknownCommand { id: header[1] })?;
        let count = header[2] as usize;
        if count > MAX_PAYLOAD_WORDS {
            return Err(ProtocolError::PayloadTooLong {
                len: count,
                max: MAX_PAYLOAD_WORDS,
            });
        }
        let payload = read_words(bytes, HEADER_WORDS, count)?;
        let request = Request::from_parts(id, &payload)?;
        Ok((request, (HEADER_WORDS + count) * 2))
    }
}

/// 应答
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Reply {
    pub words: Vec<Word>,
    /// 请求被拒绝（无法解析或参数无效）
    pub error: bool,
}

impl Reply {
    /// 成功应答
    pub fn ok(words: Vec<Word>) -> Self {
        Self {
            words,
            error: false,
        }
    }

    /// 空的拒绝应答
    pub fn rejected() -> Self {
        Self {
            words: Vec::new(),
            error: true,
        }
    }

    /// 编码为应答报文字节
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        if self.words.len() > MAX_PAYLOAD_WORDS {
            return Err(ProtocolError::PayloadTooLong {
                len: self.words.len(),
                max: MAX_PAYLOAD_WORDS,
            });
        }
        let mut count = self.words.len() as Word;
        if self.error {
            count |= REPLY_ERROR_FLAG;
        }
        let mut words = Vec::with_capacity(2 + self.words.len());
        words.push(REPLY_MARKER);
        words.push(count);
        words.extend_from_slice(&self.words);
        Ok(words_to_bytes(&words))
    }

    /// 从以 [`REPLY_MARKER`] 开头的字节缓冲区解码
    pub fn decode(bytes: &[u8]) -> Result<(Self, usize), ProtocolError> {
        let header = read_words(bytes, 0, 2)?;
        if header[0] != REPLY_MARKER {
            return Err(ProtocolError::MissingMarker);
        }
        let error = header[1] & REPLY_ERROR_FLAG != 0;
        let count = (header[1] & !REPLY_ERROR_FLAG) as usize;
        if count > MAX_PAYLOAD_WORDS {
            return Err(ProtocolError::PayloadTooLong {
                len: count,
                max: MAX_PAYLOAD_WORDS,
            });
        }
        let words = read_words(bytes, 2, count)?;
        Ok((Self { words, error }, (2 + count) * 2))
    }
}

/// 在字节缓冲区中查找 16 位标记（小端），返回字节偏移
pub fn find_marker(bytes: &[u8], marker: Word) -> Option<usize> {
    let m = marker.to_le_bytes();
    bytes.windows(2).position(|w| w == m)
}

fn words_to_bytes(words: &[Word]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_le_bytes()).collect()
}

fn read_words(bytes: &[u8], word_offset: usize, count: usize) -> Result<Vec<Word>, ProtocolError> {
    let start = word_offset * 2;
    let end = start + count * 2;
    let raw = bytes.get(start..end).ok_or(ProtocolError::InvalidLength {
        expected: end,
        actual: bytes.len(),
    })?;
    Ok(raw
        .chunks_exact(2)
        .map(|c| Word::from_le_bytes([c[0], c[1]]))
        .collect())
}
