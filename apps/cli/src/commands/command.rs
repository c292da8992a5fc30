//! 短命令模式
//!
//! `botlink-cli cmd 0x90` 发送一个原始命令并打印应答字。

use crate::config::CliConfig;
use crate::session::{ConnectArgs, Session};
use anyhow::{Context, Result, anyhow};
use botlink_sdk::protocol::{CommandId, Request, Word};
use clap::Args;

/// 短命令参数
#[derive(Args, Debug)]
pub struct CmdCommand {
    /// 命令 ID（十进制或 0x 前缀十六进制，如 0x90 = StatusRead）
    #[arg(value_parser = parse_command_id)]
    pub id: CommandId,

    /// 载荷字（十进制、负数或 0x 前缀十六进制）
    #[arg(allow_negative_numbers = true, value_parser = parse_word)]
    pub payload: Vec<Word>,
}

impl CmdCommand {
    pub fn execute(&self, connect: &ConnectArgs, config: &CliConfig) -> Result<()> {
        let request = Request::from_parts(self.id, &self.payload)?;
        let session = Session::open(connect, config)?;

        let reply = session
            .botlink
            .send_command(request.clone())
            .with_context(|| format!("{:?} failed", request))?;

        if reply.error {
            println!("❌ {:?} rejected by device", self.id);
            return Ok(());
        }
        println!("✅ {:?}: {} word(s)", self.id, reply.words.len());
        for (i, word) in reply.words.iter().enumerate() {
            println!("  [{:>3}] 0x{:04X} {:>6} {:>6}", i, word, word, *word as i16);
        }
        Ok(())
    }
}

pub fn parse_word(s: &str) -> Result<Word> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        return Word::from_str_radix(hex, 16).with_context(|| format!("invalid hex word '{}'", s));
    }
    if s.starts_with('-') {
        return Ok(s.parse::<i16>().with_context(|| format!("invalid word '{}'", s))? as Word);
    }
    s.parse::<Word>().with_context(|| format!("invalid word '{}'", s))
}

pub fn parse_command_id(s: &str) -> Result<CommandId> {
    let raw = parse_word(s)?;
    CommandId::try_from(raw).map_err(|_| anyhow!("unknown command id 0x{:04X}", raw))
}
