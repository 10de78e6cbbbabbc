//! Chat transports
//!
//! Adapters that turn a messaging surface into [`InboundMessage`]s for the
//! [`Assistant`](crate::assistant::Assistant) and deliver its replies.
//!
//! [`InboundMessage`]: sdk::types::InboundMessage

pub mod console;
pub mod telegram;

pub use console::run_console;
pub use telegram::TelegramBot;
