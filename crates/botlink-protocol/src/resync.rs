//! 魔数扫描重同步
//!
//! 链路是无分隔符的连续全双工字节流，记录可能从任意偏移开始
//! （丢字节、复位、传输引擎从帧中间启动）。两种扫描方式共享同一个
//! 4 字节移位寄存器 [`TagScanner`]：
//!
//! - **接收端缓冲区扫描**（设备侧）：[`realign_frame`] 在一次收到的窗口里定位魔数，
//!   把记录搬到槽位起点。帧尾的 [`PADDING_SIZE`] 字节保证偏移不超过填充长度时
//!   所有有意义的字段仍然完整。
//! - **字节流扫描**（主机侧）：[`StreamScanner`] 逐字节读取链路直到移位寄存器等于魔数，
//!   之前读到的字节全部丢弃。
//!
//! 两者都不校验魔数之后的载荷，那是消费方通过 `is_valid()` 做的事。

use crate::constants::*;

/// 4 字节移位寄存器
///
/// 按线上顺序推入字节，寄存器内容等价于最近 4 个字节的小端解释。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TagScanner {
    window: u32,
    filled: u8,
}

impl TagScanner {
    pub const fn new() -> Self {
        Self {
            window: 0,
            filled: 0,
        }
    }

    /// 推入一个字节；最近 4 个字节恰好组成魔数时返回 `true`
    #[inline]
    pub fn push(&mut self, byte: u8) -> bool {
        self.window = (self.window >> 8) | ((byte as u32) << 24);
        if (self.filled as usize) < TAG_SIZE {
            self.filled += 1;
        }
        self.filled as usize == TAG_SIZE && self.window == FRAME_MAGIC
    }

    /// 清空寄存器
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

/// 在缓冲区中查找第一个魔数，返回记录起点偏移
pub fn find_tag(buf: &[u8]) -> Option<usize> {
    let mut scanner = TagScanner::new();
    buf.iter()
        .position(|&b| scanner.push(b))
        .map(|i| i + 1 - TAG_SIZE)
}

/// 接收端重同步
///
/// 在 `slot` 的偏移 `0..=PADDING_SIZE` 范围内查找魔数：
/// - 偏移为 0：记录已对齐，原样保留；
/// - 偏移为 `k > 0`：把从 `k` 开始的 `FRAME_SIZE - k` 字节搬到槽位起点，
///   尾部属于下一帧的字节本周期丢弃（清零）；
/// - 未找到（或魔数更靠后，导致字段被截断）：返回 `None`，本周期视为无效帧。
///
/// `slot` 长度不足 [`FRAME_SIZE`] 时返回 `None`。
pub fn realign_frame(slot: &mut [u8]) -> Option<usize> {
    if slot.len() < FRAME_SIZE {
        return None;
    }

    let search_end = (PADDING_SIZE + TAG_SIZE).min(slot.len());
    let offset = find_tag(&slot[..search_end])?;
    if offset > 0 {
        let len = FRAME_SIZE - offset;
        slot.copy_within(offset..offset + len, 0);
        slot[len..FRAME_SIZE].fill(0);
    }
    Some(offset)
}

/// 主机侧字节流扫描器
///
/// 寄存器状态跨调用保留：字节源返回错误（例如读超时）后再次调用 [`StreamScanner::scan`]
/// 会从中断处继续，已经读到的半截魔数不会丢失。
#[derive(Debug, Clone, Default)]
pub struct StreamScanner {
    scanner: TagScanner,
    consumed: usize,
}

impl StreamScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// 阻塞读取字节源直到找到魔数
    ///
    /// 返回本次对齐过程中丢弃的字节数（不含魔数本身）。字节源的错误原样向上传播，
    /// 扫描器本身不会因内容失败，可以容忍任意多的不匹配字节。
    pub fn scan<E>(&mut self, mut next_byte: impl FnMut() -> Result<u8, E>) -> Result<usize, E> {
        loop {
            let byte = next_byte()?;
            self.consumed += 1;
            if self.scanner.push(byte) {
                let discarded = self.consumed - TAG_SIZE;
                self.scanner.reset();
                self.consumed = 0;
                return Ok(discarded);
            }
        }
    }

    /// 当前未完成的扫描已消耗的字节数
    pub fn pending(&self) -> usize {
        self.consumed
    }

    /// 放弃当前进度
    pub fn reset(&mut self) {
        self.scanner.reset();
        self.consumed = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_scanner_exact_match() {
        let mut s = TagScanner::new();
        let m = magic_bytes();
        assert!(!s.push(m[0]));
        assert!(!s.push(m[1]));
        assert!(!s.push(m[2]));
        assert!(s.push(m[3]));
    }

    #[test]
    fn test_tag_scanner_needs_four_bytes() {
        // 仅推入 3 个字节时，即使寄存器高位凑巧一致也不能匹配
        let mut s = TagScanner::new();
        let m = magic_bytes();
        for &b in &m[1..] {
            assert!(!s.push(b));
        }
    }

    #[test]
    fn test_find_tag_offsets() {
        let m = magic_bytes();
        let mut buf = vec![0x11u8; 40];
        buf[7..11].copy_from_slice(&m);
        assert_eq!(find_tag(&buf), Some(7));
        assert_eq!(find_tag(&[0u8; 40]), None);
        assert_eq!(find_tag(&m), Some(0));
    }

    #[test]
    fn test_find_tag_first_occurrence() {
        let m = magic_bytes();
        let mut buf = vec![0u8; 30];
        buf[2..6].copy_from_slice(&m);
        buf[20..24].copy_from_slice(&m);
        assert_eq!(find_tag(&buf), Some(2));
    }

    #[test]
    fn test_realign_aligned() {
        let mut slot = [0x42u8; FRAME_SIZE];
        slot[..TAG_SIZE].copy_from_slice(&magic_bytes());
        let before = slot;
        assert_eq!(realign_frame(&mut slot), Some(0));
        assert_eq!(slot, before);
    }

    #[test]
    fn test_realign_shifted() {
        let mut slot = [0u8; FRAME_SIZE];
        for (i, b) in slot.iter_mut().enumerate() {
            *b = (i % 251) as u8;
        }
        let offset = 4;
        slot[offset..offset + TAG_SIZE].copy_from_slice(&magic_bytes());
        let expected = slot[offset..].to_vec();

        assert_eq!(realign_frame(&mut slot), Some(offset));
        assert_eq!(&slot[..FRAME_SIZE - offset], &expected[..]);
        assert!(slot[FRAME_SIZE - offset..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_realign_max_offset() {
        let mut slot = [0u8; FRAME_SIZE];
        slot[PADDING_SIZE..PADDING_SIZE + TAG_SIZE].copy_from_slice(&magic_bytes());
        assert_eq!(realign_frame(&mut slot), Some(PADDING_SIZE));
        assert_eq!(&slot[..TAG_SIZE], &magic_bytes());
    }

    #[test]
    fn test_realign_rejects_truncating_offset() {
        let mut slot = [0u8; FRAME_SIZE];
        let offset = PADDING_SIZE + 1;
        slot[offset..offset + TAG_SIZE].copy_from_slice(&magic_bytes());
        assert_eq!(realign_frame(&mut slot), None);
    }

    #[test]
    fn test_realign_short_slot() {
        let mut slot = [0u8; 8];
        slot[..TAG_SIZE].copy_from_slice(&magic_bytes());
        assert_eq!(realign_frame(&mut slot), None);
    }

    #[test]
    fn test_stream_scanner_discards_noise() {
        let mut stream: Vec<u8> = vec![0xFF, 0x3C, 0xC3, 0x00, 0x12];
        stream.extend_from_slice(&magic_bytes());
        stream.push(0x99);
        let mut it = stream.into_iter();

        let mut scanner = StreamScanner::new();
        let discarded = scanner
            .scan(|| it.next().ok_or("eof"))
            .unwrap();
        assert_eq!(discarded, 5);
        assert_eq!(it.next(), Some(0x99));
    }

    #[test]
    fn test_stream_scanner_propagates_source_error() {
        let mut scanner = StreamScanner::new();
        let result: Result<usize, &str> = scanner.scan(|| Err("timeout"));
        assert_eq!(result, Err("timeout"));
    }

    #[test]
    fn test_stream_scanner_resumes_after_error() {
        let m = magic_bytes();
        let mut scanner = StreamScanner::new();

        // 前两个字节之后字节源超时
        let mut first = vec![0xAA, m[0], m[1]].into_iter();
        let result: Result<usize, &str> = scanner.scan(|| first.next().ok_or("timeout"));
        assert!(result.is_err());
        assert_eq!(scanner.pending(), 3);

        // 恢复后补齐剩余两个字节即可匹配
        let mut rest = vec![m[2], m[3]].into_iter();
        let discarded: Result<usize, &str> = scanner.scan(|| rest.next().ok_or("eof"));
        assert_eq!(discarded, Ok(1));
        assert_eq!(scanner.pending(), 0);
    }
}
