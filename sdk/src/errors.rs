//! Error types and handling
//!
//! This module provides the error taxonomy used throughout the Parley engine.
//! All errors implement the `ErrorExt` trait which provides user-friendly
//! hints and indicates whether errors are recoverable.
//!
//! # Propagation
//!
//! Only conditions that prevent producing *any* answer reach the user:
//! `EmptyInput`, `LockTimeout`, `ExhaustedFallback` and `GenerationTimeout`.
//! Memory and persistence faults (`SummarizationFailure`, `Persistence`) are
//! logged and swallowed by the component that hit them.
//!
//! # Security
//!
//! User hints are static strings. They never contain user ids, model errors,
//! API keys or file paths.

use thiserror::Error;

/// Trait for Parley error extensions
///
/// Provides additional context for errors, including a user-facing hint and
/// whether the condition is transient.
pub trait ErrorExt {
    /// Returns a user-friendly hint for the error
    ///
    /// The hint is safe to send back through a chat transport.
    fn user_hint(&self) -> &str;

    /// Returns whether the error is recoverable
    ///
    /// Recoverable errors go away on their own; the user may simply try again.
    fn is_recoverable(&self) -> bool;
}

/// Main engine error type
///
/// # Error Categories
///
/// - **Caller**: empty input
/// - **Scheduling**: queue-wait deadline exceeded, aborted tasks
/// - **Generation**: every candidate failed, overall timeout
/// - **Memory**: summarization and persistence faults (non-fatal)
/// - **Configuration**: invalid or missing configuration
///
/// # Examples
///
/// ```
/// use sdk::errors::{EngineError, ErrorExt};
///
/// let error = EngineError::LockTimeout {
///     user: "6281234567890".to_string(),
///     waited_ms: 5000,
/// };
/// assert!(error.is_recoverable());
/// println!("Hint: {}", error.user_hint());
///
/// let fatal = EngineError::Config("bad log level".to_string());
/// assert!(!fatal.is_recoverable());
/// ```
#[derive(Debug, Error)]
pub enum EngineError {
    // Caller errors
    #[error("Empty input")]
    EmptyInput,

    // Scheduling errors
    #[error("Lock timeout for {user} after {waited_ms}ms in queue")]
    LockTimeout { user: String, waited_ms: u64 },

    #[error("Task aborted before producing a result")]
    TaskAborted,

    // Generation errors
    #[error("All {attempted} candidates failed for purpose '{purpose}': {last_error}")]
    ExhaustedFallback {
        purpose: String,
        attempted: usize,
        last_error: String,
    },

    #[error("Generation timed out after {0}ms")]
    GenerationTimeout(u64),

    #[error("Generation cancelled")]
    Cancelled,

    #[error("LLM provider error: {0}")]
    LLMProvider(String),

    // Memory errors
    #[error("Summarization failed: {0}")]
    SummarizationFailure(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Network errors
    #[error("Network error: {0}")]
    Network(String),

    // Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ErrorExt for EngineError {
    fn user_hint(&self) -> &str {
        match self {
            Self::EmptyInput => "Your message was empty. Please send a question.",
            Self::LockTimeout { .. } => {
                "I'm still working on your previous message. Please try again in a moment."
            }
            Self::TaskAborted => "Something went wrong while handling your message. Please try again.",
            Self::ExhaustedFallback { .. } => {
                "Sorry, I couldn't get an answer right now. Please try again shortly."
            }
            Self::GenerationTimeout(_) => {
                "Sorry, that took too long to answer. Please try again shortly."
            }
            Self::Cancelled => "Your request was cancelled. Please try again.",
            Self::LLMProvider(_) => "The AI service is unavailable. Please try again shortly.",
            Self::SummarizationFailure(_) | Self::Persistence(_) => {
                "Your conversation history could not be updated, but your answer is fine."
            }
            Self::Config(_) => "The assistant is misconfigured. Please contact the administrator.",
            Self::Network(_) => "Network problem. Please try again shortly.",
            Self::Io(_) => "A storage problem occurred. Please try again.",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            // Require operator intervention
            Self::Config(_) => false,

            // Everything else is transient or caller-fixable
            _ => true,
        }
    }
}
