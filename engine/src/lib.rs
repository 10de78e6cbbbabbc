//! Parley Engine Library
//!
//! Core of the Parley conversational assistant. Used by the `parley` binary
//! and by integration tests.

/// Configuration management module
pub mod config;

/// Generation backends and model fallback
pub mod llm;

/// Exponential backoff for transient failures
pub mod retry;

/// Response cache with time-based expiry
pub mod cache;

/// Per-user task serialization
pub mod serializer;

/// Durable per-user records and the background writer
pub mod store;

/// Sliding-window conversation memory with summarization
pub mod memory;

/// Shared application state
pub mod context;

/// Request pipeline and built-in commands
pub mod assistant;

/// Chat transports (Telegram, console)
pub mod bot;

/// Telemetry and Observability
pub mod telemetry;

/// CLI interface module
pub mod cli;

/// Command handlers module
pub mod handlers;
