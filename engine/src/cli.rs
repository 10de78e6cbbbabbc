//! CLI interface for Parley
//!
//! Defines the commands and global flags using clap's derive API.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Parley conversational assistant
///
/// A chat assistant with per-user conversation memory, model fallback and
/// response caching.
#[derive(Parser, Debug)]
#[command(name = "parley")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Chat with the assistant in this terminal
    Chat {
        /// Sender id to chat as
        #[arg(short, long, default_value = "console")]
        user: String,

        /// Keep memory in-process only
        #[arg(long)]
        ephemeral: bool,
    },

    /// Ask a single question and print the answer
    Ask {
        /// Sender id to ask as
        #[arg(short, long, default_value = "console")]
        user: String,

        /// The question
        text: String,
    },

    /// Serve the assistant over Telegram long-polling
    Telegram,

    /// Show what the assistant remembers about a user
    Memory {
        /// Sender id
        user: String,
    },

    /// Erase a user's conversation memory
    Clear {
        /// Sender id
        user: String,
    },

    /// Validate configuration and check the environment
    Doctor,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ask() {
        let cli = Cli::parse_from(["parley", "ask", "--user", "42", "what is rust?"]);
        match cli.command {
            Command::Ask { user, text } => {
                assert_eq!(user, "42");
                assert_eq!(text, "what is rust?");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_chat_defaults_and_globals() {
        let cli = Cli::parse_from(["parley", "--json", "chat", "--ephemeral"]);
        assert!(cli.json);
        match cli.command {
            Command::Chat { user, ephemeral } => {
                assert_eq!(user, "console");
                assert!(ephemeral);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_clear_requires_user() {
        assert!(Cli::try_parse_from(["parley", "clear"]).is_err());
    }
}
