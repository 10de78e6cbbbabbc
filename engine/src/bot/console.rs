//! Line-oriented console transport
//!
//! Reads one message per line and writes each reply back. Used by
//! `parley chat` for local conversations with a single sender id.

use anyhow::Result;
use sdk::types::InboundMessage;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::assistant::Assistant;

const QUIT_COMMANDS: [&str; 2] = ["/quit", "/exit"];

/// Converse with `assistant` as `user` until EOF or `/quit`
pub async fn run_console<R, W>(
    assistant: &Assistant,
    user: &str,
    reader: R,
    mut writer: W,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    writer
        .write_all(b"Connected. Type /help for commands, /quit to leave.\n")
        .await?;
    writer.flush().await?;

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if QUIT_COMMANDS.contains(&line) {
            break;
        }

        match assistant.handle(InboundMessage::text(user, line)).await {
            Some(reply) => {
                writer.write_all(format!("bot> {}\n", reply).as_bytes()).await?;
            }
            None => debug!("Line not addressed to the assistant"),
        }
        writer.flush().await?;
    }

    Ok(())
}
