//! 双缓冲帧对
//!
//! 每一侧各持有两个 StateFrame 槽位和一个活动索引。传输引擎只写非活动槽位，
//! 控制逻辑只读活动槽位；一次交换完成且通过校验后翻转索引。
//! 两个槽位通过索引翻转交接，不需要锁。
//!
//! 填充期间非活动槽位的魔数始终为 0，任何在传输中途读取该槽位的消费者
//! 都只会看到一条无效记录。

use crate::constants::*;
use crate::frame::StateFrame;

/// 双缓冲帧对
#[derive(Debug, Clone)]
pub struct FramePair {
    slots: [[u8; FRAME_SIZE]; 2],
    active: usize,
    flips: u64,
}

impl FramePair {
    /// 创建帧对（两个槽位都是无效的全零记录）
    pub fn new() -> Self {
        Self {
            slots: [[0u8; FRAME_SIZE]; 2],
            active: 0,
            flips: 0,
        }
    }

    /// 开始填充非活动槽位
    ///
    /// 先清零魔数使其失效，再返回可写引用交给传输引擎。
    pub fn begin_fill(&mut self) -> &mut [u8; FRAME_SIZE] {
        let slot = &mut self.slots[1 - self.active];
        slot[..TAG_SIZE].fill(0);
        slot
    }

    /// 非活动槽位（只读，用于诊断）
    pub fn filling(&self) -> &[u8; FRAME_SIZE] {
        &self.slots[1 - self.active]
    }

    /// 非活动槽位的可写引用（不清魔数，供接收端原地重同步）
    pub fn filling_mut(&mut self) -> &mut [u8; FRAME_SIZE] {
        &mut self.slots[1 - self.active]
    }

    /// 提交：非活动槽位魔数有效时翻转索引
    ///
    /// 返回是否翻转。无效时槽位保持无效，活动槽位仍是上一条已验证记录。
    pub fn commit(&mut self) -> bool {
        if StateFrame::tag_of(self.filling()) == Some(FRAME_MAGIC) {
            self.flip();
            true
        } else {
            false
        }
    }

    /// 封口：为已完整传输的槽位写入魔数并翻转
    ///
    /// 用于主机侧，魔数已在扫描阶段被消耗，槽位中只写入了其余字节。
    pub fn seal(&mut self) {
        let slot = &mut self.slots[1 - self.active];
        slot[..TAG_SIZE].copy_from_slice(&magic_bytes());
        self.flip();
    }

    fn flip(&mut self) {
        self.active = 1 - self.active;
        self.flips += 1;
    }

    /// 活动槽位原始字节（最近一次验证通过的记录，启动时为全零）
    pub fn active_bytes(&self) -> &[u8; FRAME_SIZE] {
        &self.slots[self.active]
    }

    /// 解码活动槽位；尚无有效记录时返回 `None`
    pub fn active_frame(&self) -> Option<StateFrame> {
        StateFrame::decode(self.active_bytes())
            .ok()
            .filter(StateFrame::is_valid)
    }

    /// 活动槽位索引（0 或 1）
    pub fn active_index(&self) -> usize {
        self.active
    }

    /// 累计翻转次数
    pub fn flip_count(&self) -> u64 {
        self.flips
    }
}

impl Default for FramePair {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_bytes(marker: u8) -> [u8; FRAME_SIZE] {
        let mut frame = StateFrame::new();
        frame.battery_voltage = marker as u16;
        frame.mark_valid();
        frame.to_bytes()
    }

    #[test]
    fn test_new_pair_has_no_active_frame() {
        let pair = FramePair::new();
        assert!(pair.active_frame().is_none());
        assert_eq!(pair.flip_count(), 0);
    }

    #[test]
    fn test_begin_fill_invalidates_inactive_slot() {
        let mut pair = FramePair::new();
        let slot = pair.begin_fill();
        slot.copy_from_slice(&valid_bytes(1));
        assert!(pair.commit());

        // 再次填充之前写过的那个槽位：魔数必须先被清零
        let _ = pair.begin_fill();
        let _ = pair.begin_fill();
        assert_eq!(StateFrame::tag_of(pair.filling()), Some(0));
    }

    #[test]
    fn test_commit_flips_only_when_valid() {
        let mut pair = FramePair::new();
        pair.begin_fill().copy_from_slice(&valid_bytes(7));
        assert!(pair.commit());
        assert_eq!(pair.active_frame().unwrap().battery_voltage, 7);

        // 写入无效记录：不翻转，活动记录保持不变
        let slot = pair.begin_fill();
        slot.fill(0xAB);
        slot[..TAG_SIZE].fill(0);
        assert!(!pair.commit());
        assert_eq!(pair.active_frame().unwrap().battery_voltage, 7);
        assert_eq!(pair.flip_count(), 1);
    }

    #[test]
    fn test_filling_never_aliases_active() {
        let mut pair = FramePair::new();
        for i in 1..6u8 {
            let active = pair.active_index();
            pair.begin_fill().copy_from_slice(&valid_bytes(i));
            // 填充中的槽位不影响活动记录
            assert_eq!(pair.active_index(), active);
            assert_ne!(
                pair.active_frame().map(|f| f.battery_voltage),
                Some(i as u16)
            );
            assert!(pair.commit());
            assert_eq!(pair.active_index(), 1 - active);
            assert_eq!(pair.active_frame().unwrap().battery_voltage, i as u16);
        }
    }

    #[test]
    fn test_seal_writes_tag_and_flips() {
        let mut pair = FramePair::new();
        let mut body = valid_bytes(9);
        body[..TAG_SIZE].fill(0);
        pair.begin_fill()[TAG_SIZE..].copy_from_slice(&body[TAG_SIZE..]);
        pair.seal();
        let frame = pair.active_frame().unwrap();
        assert!(frame.is_valid());
        assert_eq!(frame.battery_voltage, 9);
    }
}
