//! 串口透传
//!
//! StateFrame 中每个串口缓冲区的 `status` 字节是 8 位序号。发送方每放入一批新数据
//! 递增一次，接收方只在序号变化时消费，重复收到同一帧（或命令帧过期未更新）
//! 不会重复转发。

use crate::context::DeviceContext;
use crate::hal::Board;
use botlink_protocol::{SERIAL_BUFFER_SIZE, SERIAL_PORT_COUNT};
use tracing::{trace, warn};

/// 主机→串口：序号变化时把命令帧中的字节写到板载串口
///
/// 返回本 tick 转发的字节数。
pub fn forward_host_bytes<B: Board + ?Sized>(ctx: &mut DeviceContext, board: &mut B) -> usize {
    let mut forwarded = 0;
    for port in 0..SERIAL_PORT_COUNT {
        let buffer = ctx.inputs.serial[port];
        if buffer.status == ctx.serial_seen[port] {
            continue;
        }
        ctx.serial_seen[port] = buffer.status;

        let bytes = buffer.bytes();
        if bytes.is_empty() {
            continue;
        }
        let accepted = board.uart_write(port, bytes);
        if accepted < bytes.len() {
            warn!(
                "UART {} accepted {} of {} pass-through bytes",
                port,
                accepted,
                bytes.len()
            );
        }
        trace!("UART {} <- {} bytes (seq {})", port, accepted, buffer.status);
        forwarded += accepted;
    }
    forwarded
}

/// 串口→主机：把板载串口新到的字节装入遥测缓冲区并递增序号
///
/// 返回本 tick 发布的字节数。
pub fn publish_board_bytes<B: Board + ?Sized>(ctx: &mut DeviceContext, board: &mut B) -> usize {
    let mut published = 0;
    for port in 0..SERIAL_PORT_COUNT {
        let mut buf = [0u8; SERIAL_BUFFER_SIZE];
        let n = board.uart_read(port, &mut buf);
        if n == 0 {
            continue;
        }
        let loaded = ctx.telemetry.serial[port].load(&buf[..n]);
        trace!(
            "UART {} -> {} bytes (seq {})",
            port, loaded, ctx.telemetry.serial[port].status
        );
        published += loaded;
    }
    published
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceConfig;
    use crate::sim_board::SimBoard;

    #[test]
    fn test_forward_once_per_sequence_bump() {
        let mut ctx = DeviceContext::new(DeviceConfig::default());
        let mut board = SimBoard::new();

        ctx.inputs.serial[0].load(b"hello");
        assert_eq!(forward_host_bytes(&mut ctx, &mut board), 5);
        // 同一序号再次出现（过期命令帧）：不重复转发
        assert_eq!(forward_host_bytes(&mut ctx, &mut board), 0);
        assert_eq!(board.lock().take_uart_output(0), b"hello");

        ctx.inputs.serial[0].load(b"!");
        assert_eq!(forward_host_bytes(&mut ctx, &mut board), 1);
        assert_eq!(board.lock().take_uart_output(0), b"!");
    }

    #[test]
    fn test_initial_empty_buffers_forward_nothing() {
        let mut ctx = DeviceContext::new(DeviceConfig::default());
        let mut board = SimBoard::new();
        assert_eq!(forward_host_bytes(&mut ctx, &mut board), 0);
        assert!(board.lock().take_uart_output(1).is_empty());
    }

    #[test]
    fn test_publish_bumps_sequence_only_with_data() {
        let mut ctx = DeviceContext::new(DeviceConfig::default());
        let mut board = SimBoard::new();

        assert_eq!(publish_board_bytes(&mut ctx, &mut board), 0);
        assert_eq!(ctx.telemetry.serial[1].status, 0);

        board.lock().push_uart_input(1, b"gps");
        assert_eq!(publish_board_bytes(&mut ctx, &mut board), 3);
        assert_eq!(ctx.telemetry.serial[1].status, 1);
        assert_eq!(ctx.telemetry.serial[1].bytes(), b"gps");
    }

    #[test]
    fn test_publish_splits_long_input() {
        let mut ctx = DeviceContext::new(DeviceConfig::default());
        let mut board = SimBoard::new();
        board.lock().push_uart_input(0, &[0x55; 40]);
        assert_eq!(publish_board_bytes(&mut ctx, &mut board), SERIAL_BUFFER_SIZE);
        assert_eq!(publish_board_bytes(&mut ctx, &mut board), 8);
        assert_eq!(ctx.telemetry.serial[0].status, 2);
    }
}
