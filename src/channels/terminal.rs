//! Terminal channel: a line-based REPL for local testing.
//!
//! Each line typed is one turn spoken as the configured `user_name`. The
//! bot's reply is printed as `"{bot_name}: {reply}"`. `!quit` or end of
//! input ends the session.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::info;

use crate::error::Result;

use super::handler::SharedHandler;
use super::types::{InboundMessage, ReadyInfo};

/// Typing this ends the session.
pub const QUIT_COMMAND: &str = "!quit";

const TERMINAL_CHAT_ID: &str = "local";

pub struct TerminalChannel {
    user_name: String,
    bot_name: String,
    handler: SharedHandler,
}

impl TerminalChannel {
    pub fn new(user_name: &str, bot_name: &str, handler: SharedHandler) -> Self {
        Self {
            user_name: user_name.to_string(),
            bot_name: bot_name.to_string(),
            handler,
        }
    }

    /// Run the REPL on the process's stdin and stdout.
    pub async fn run(&self) -> Result<()> {
        let stdin = BufReader::new(tokio::io::stdin());
        let mut stdout = tokio::io::stdout();
        self.run_with(stdin, &mut stdout).await
    }

    /// Run the REPL over any line reader and writer.
    pub async fn run_with<R, W>(&self, reader: R, writer: &mut W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        self.handler
            .on_ready(&ReadyInfo {
                bot_id: TERMINAL_CHAT_ID.to_string(),
                bot_name: self.bot_name.clone(),
            })
            .await;

        let mut lines = reader.lines();
        loop {
            writer
                .write_all(format!("{}: ", self.user_name).as_bytes())
                .await?;
            writer.flush().await?;

            let Some(line) = lines.next_line().await? else {
                writer.write_all(b"\n").await?;
                break;
            };
            if line.trim() == QUIT_COMMAND {
                break;
            }

            let inbound = InboundMessage::new(
                "terminal",
                TERMINAL_CHAT_ID,
                &self.user_name,
                TERMINAL_CHAT_ID,
                &line,
            );
            if let Some(reply) = self.handler.on_message(&inbound).await {
                writer
                    .write_all(
                        format!("{}: {}\n", self.bot_name, reply.content.trim_start()).as_bytes(),
                    )
                    .await?;
            }
        }

        writer.flush().await?;
        info!("Terminal session ended");
        Ok(())
    }
}
