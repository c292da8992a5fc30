//! 短命令分发
//!
//! 对 [`Request`] 做穷尽匹配。读操作返回上一个 tick 采样的数据，写操作修改控制输入，
//! 下一个 tick 的控制阶段生效；主机之后再发来的命令帧会覆盖这些输入。

use crate::context::DeviceContext;
use crate::hal::Board;
use botlink_protocol::{Reply, Request, SERIAL_BUFFER_SIZE, StateFrame, Word, split_i32};
use tracing::debug;

/// 执行一个请求并生成应答
pub fn dispatch<B: Board + ?Sized>(
    ctx: &mut DeviceContext,
    board: &mut B,
    request: &Request,
) -> Reply {
    debug!("Dispatching {:?}", request.id());
    let t = &ctx.telemetry;

    let words: Vec<Word> = match *request {
        Request::DigitalRead => vec![t.digital_bits as Word],
        Request::DigitalWrite { port, value } => {
            let inputs = &mut ctx.inputs;
            StateFrame::set_bit(&mut inputs.digital_output_enable, port as usize, true);
            StateFrame::set_bit(&mut inputs.digital_output_value, port as usize, value);
            board.write_digital(inputs.digital_output_enable, inputs.digital_output_value);
            vec![board.read_digital() as Word]
        },
        Request::DigitalConfig { output_enable } => {
            ctx.inputs.digital_output_enable = output_enable;
            board.write_digital(output_enable, ctx.inputs.digital_output_value);
            vec![output_enable as Word]
        },
        Request::AnalogRead { channel: None } => t.analog.to_vec(),
        Request::AnalogRead {
            channel: Some(channel),
        } => vec![t.analog[channel as usize]],
        Request::AccelRead => t.accel.iter().map(|&v| v as Word).collect(),
        Request::SensorsRead => {
            let mut words = t.analog.to_vec();
            words.push(t.digital_bits as Word);
            words.extend(t.accel.iter().map(|&v| v as Word));
            words.push(t.battery_voltage);
            words.push(t.button_state as Word);
            words
        },
        Request::UartRead { port } => {
            let mut buf = [0u8; SERIAL_BUFFER_SIZE];
            let n = board.uart_read(port as usize, &mut buf);
            std::iter::once(n as Word)
                .chain(buf[..n].iter().map(|&b| b as Word))
                .collect()
        },
        Request::UartWrite { port, ref data } => {
            vec![board.uart_write(port as usize, data) as Word]
        },
        Request::UartConfig { port, flags } => {
            board.configure_uart(port as usize, flags);
            vec![flags]
        },
        Request::PwmRead { motor } => vec![ctx.motors[motor as usize].pwm() as Word],
        Request::PwmWrite { motor, pwm } => {
            let m = motor as usize;
            ctx.inputs.pwm[m] = pwm;
            ctx.inputs.speed_target[m] = 0;
            vec![pwm as Word]
        },
        Request::PidRead { motor } => {
            let state = &ctx.motors[motor as usize];
            let [lo, hi] = split_i32(state.counter());
            vec![state.speed() as Word, lo, hi, state.in_motion() as Word]
        },
        Request::PidWrite {
            motor,
            speed_target,
            counter_target,
            position_mode,
        } => {
            let m = motor as usize;
            ctx.inputs.speed_target[m] = speed_target;
            ctx.inputs.counter_target[m] = counter_target;
            StateFrame::set_bit(&mut ctx.inputs.position_mode_bits, m, position_mode);
            Vec::new()
        },
        Request::PidConfig { motor, gains } => {
            ctx.inputs.gains[motor as usize] = gains;
            Vec::new()
        },
        Request::PidClear { motor } => {
            ctx.clear_motor(motor as usize);
            Vec::new()
        },
        Request::ServoRead { servo } => vec![ctx.inputs.servo_target[servo as usize] as Word],
        Request::ServoWrite { servo, target } => {
            ctx.inputs.servo_target[servo as usize] = target;
            vec![target as Word]
        },
        Request::ServoConfig { enabled } => {
            ctx.inputs.servos_enabled = enabled;
            vec![enabled as Word]
        },
        Request::StatusRead => {
            let ticks = ctx.tick_count as u32;
            vec![
                ticks as Word,
                (ticks >> 16) as Word,
                t.battery_voltage,
                ctx.startup_complete as Word,
                ctx.in_motion_bits() as Word,
            ]
        },
    };

    Reply::ok(words)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceConfig;
    use crate::sim_board::SimBoard;
    use botlink_protocol::{PidGains, join_i32};

    fn setup() -> (DeviceContext, SimBoard) {
        (DeviceContext::new(DeviceConfig::default()), SimBoard::new())
    }

    #[test]
    fn test_sensor_reads_come_from_telemetry() {
        let (mut ctx, mut board) = setup();
        ctx.telemetry.analog = [10, 11, 12, 13, 14, 15, 16, 17];
        ctx.telemetry.accel = [-1, 2, 3];
        ctx.telemetry.battery_voltage = 7000;

        let reply = dispatch(&mut ctx, &mut board, &Request::AnalogRead { channel: Some(3) });
        assert_eq!(reply.words, vec![13]);
        let reply = dispatch(&mut ctx, &mut board, &Request::AnalogRead { channel: None });
        assert_eq!(reply.words.len(), 8);
        let reply = dispatch(&mut ctx, &mut board, &Request::AccelRead);
        assert_eq!(reply.words, vec![0xFFFF, 2, 3]);
        let reply = dispatch(&mut ctx, &mut board, &Request::SensorsRead);
        assert_eq!(reply.words.len(), 8 + 1 + 3 + 2);
        assert_eq!(reply.words[12], 7000);
        assert!(!reply.error);
    }

    #[test]
    fn test_pwm_write_forces_open_loop() {
        let (mut ctx, mut board) = setup();
        ctx.inputs.speed_target[1] = 300;
        let reply = dispatch(&mut ctx, &mut board, &Request::PwmWrite { motor: 1, pwm: -250 });
        assert_eq!(reply.words, vec![(-250i16) as u16]);
        assert_eq!(ctx.inputs.pwm[1], -250);
        assert_eq!(ctx.inputs.speed_target[1], 0);
    }

    #[test]
    fn test_pid_write_and_read() {
        let (mut ctx, mut board) = setup();
        dispatch(
            &mut ctx,
            &mut board,
            &Request::PidWrite {
                motor: 2,
                speed_target: 400,
                counter_target: -70_000,
                position_mode: true,
            },
        );
        let target = ctx.inputs.motor_target(2);
        assert_eq!(target.speed_target, 400);
        assert_eq!(target.counter_target, -70_000);
        assert!(target.position_mode);

        ctx.motors[2].record_speed(-70_001);
        let reply = dispatch(&mut ctx, &mut board, &Request::PidRead { motor: 2 });
        assert_eq!(join_i32(reply.words[1], reply.words[2]), -70_001);
    }

    #[test]
    fn test_pid_config_and_clear() {
        let (mut ctx, mut board) = setup();
        let gains = PidGains::from_words([4, 0, 0, 1, 1, 1]);
        dispatch(&mut ctx, &mut board, &Request::PidConfig { motor: 0, gains });
        assert_eq!(ctx.inputs.gains[0], gains);

        ctx.motors[3].record_speed(55);
        dispatch(&mut ctx, &mut board, &Request::PidClear { motor: 3 });
        assert_eq!(ctx.motors[3].counter(), 0);
    }

    #[test]
    fn test_digital_write_drives_board() {
        let (mut ctx, mut board) = setup();
        let reply = dispatch(
            &mut ctx,
            &mut board,
            &Request::DigitalWrite {
                port: 5,
                value: true,
            },
        );
        assert_eq!(reply.words, vec![1 << 5]);
        let plant = board.lock();
        assert_eq!(plant.digital_output_enable, 1 << 5);
        assert_eq!(plant.digital_output_value, 1 << 5);
    }

    #[test]
    fn test_uart_commands() {
        let (mut ctx, mut board) = setup();
        board.lock().push_uart_input(0, b"ok");
        let reply = dispatch(&mut ctx, &mut board, &Request::UartRead { port: 0 });
        assert_eq!(reply.words, vec![2, b'o' as u16, b'k' as u16]);

        let reply = dispatch(
            &mut ctx,
            &mut board,
            &Request::UartWrite {
                port: 1,
                data: b"AT".to_vec(),
            },
        );
        assert_eq!(reply.words, vec![2]);
        assert_eq!(board.lock().take_uart_output(1), b"AT");

        dispatch(&mut ctx, &mut board, &Request::UartConfig { port: 1, flags: 9 });
        assert_eq!(board.lock().uart_flags[1], 9);
    }

    #[test]
    fn test_servo_commands() {
        let (mut ctx, mut board) = setup();
        dispatch(&mut ctx, &mut board, &Request::ServoConfig { enabled: true });
        dispatch(&mut ctx, &mut board, &Request::ServoWrite { servo: 3, target: 250 });
        let reply = dispatch(&mut ctx, &mut board, &Request::ServoRead { servo: 3 });
        assert_eq!(reply.words, vec![250]);
        assert!(ctx.inputs.servos_enabled);
    }

    #[test]
    fn test_status_read() {
        let (mut ctx, mut board) = setup();
        ctx.tick_count = 0x0001_0002;
        ctx.startup_complete = true;
        ctx.telemetry.battery_voltage = 7400;
        let reply = dispatch(&mut ctx, &mut board, &Request::StatusRead);
        assert_eq!(reply.words, vec![2, 1, 7400, 1, 0]);
    }
}
