//! Parley SDK
//!
//! Shared library providing the error taxonomy and conversation types.
//! This crate is used by the engine and by transport adapters.

/// Error types and handling
pub mod errors;

/// Conversation and transport message types
pub mod types;

// Re-export commonly used types
pub use errors::{EngineError, ErrorExt};
pub use types::{ChatMessage, InboundMessage, Role};
