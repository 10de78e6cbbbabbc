//! Generation Backend Abstraction Layer
//!
//! This module provides the common interface for calling a generative model.
//! The `GenerationBackend` trait is the only contract a backend must
//! implement; model selection, retries and bookkeeping live in the
//! [`fallback`] invoker so that every backend gets them for free.

use async_trait::async_trait;
use sdk::types::ChatMessage;
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod fallback;
pub mod gemini;

#[cfg(test)]
pub(crate) mod testing;

/// Result type for backend operations
pub type Result<T> = std::result::Result<T, LLMError>;

/// Errors that can occur during a single backend call
#[derive(Debug, Clone, thiserror::Error)]
pub enum LLMError {
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Timeout")]
    Timeout,

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl LLMError {
    /// Whether repeating the same call can reasonably succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LLMError::ProviderUnavailable(_)
                | LLMError::RateLimitExceeded
                | LLMError::NetworkError(_)
                | LLMError::Timeout
        )
    }
}

/// What a model call is for; selects the candidate list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Purpose {
    Chat,
    Summary,
    Intent,
}

impl Purpose {
    pub const ALL: [Purpose; 3] = [Purpose::Chat, Purpose::Summary, Purpose::Intent];
}

impl fmt::Display for Purpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Purpose::Chat => write!(f, "chat"),
            Purpose::Summary => write!(f, "summary"),
            Purpose::Intent => write!(f, "intent"),
        }
    }
}

/// Relative price of a model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CostTier {
    Lowest,
    Low,
    Medium,
    High,
}

impl fmt::Display for CostTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CostTier::Lowest => write!(f, "lowest"),
            CostTier::Low => write!(f, "low"),
            CostTier::Medium => write!(f, "medium"),
            CostTier::High => write!(f, "high"),
        }
    }
}

fn default_max_output_tokens() -> u32 {
    65_536
}

/// One callable model in a candidate list
///
/// Lower `priority` is tried first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub name: String,

    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,

    pub priority: u32,

    pub cost_tier: CostTier,

    #[serde(default)]
    pub description: String,
}

impl ModelDescriptor {
    pub fn new(name: impl Into<String>, priority: u32, cost_tier: CostTier) -> Self {
        Self {
            name: name.into(),
            max_output_tokens: default_max_output_tokens(),
            priority,
            cost_tier,
            description: String::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Input for one generation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationRequest {
    /// System instruction (persona, profile, summaries, policy)
    pub system_instruction: Option<String>,

    /// Prior turns, oldest first
    pub history: Vec<ChatMessage>,

    /// The new user turn
    pub contents: String,
}

impl GenerationRequest {
    pub fn new(contents: impl Into<String>) -> Self {
        Self {
            contents: contents.into(),
            ..Default::default()
        }
    }

    pub fn with_system(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = Some(instruction.into());
        self
    }

    pub fn with_history(mut self, history: Vec<ChatMessage>) -> Self {
        self.history = history;
        self
    }
}

/// Successful generation and where it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    pub text: String,
    pub model_used: String,
    pub cost_tier: CostTier,
}

/// Backend trait that every model provider implements
///
/// Implementations perform exactly one call. Dropping the returned future
/// must abort any in-flight request.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Returns the name of the backend (e.g., "gemini")
    fn name(&self) -> &str;

    /// Generate text with `model`
    ///
    /// # Returns
    /// * `Ok(String)` - The raw model text (possibly empty)
    /// * `Err(LLMError)` - If the call fails
    async fn generate(&self, model: &ModelDescriptor, request: &GenerationRequest)
        -> Result<String>;

    /// Check if the backend is configured and usable
    /// Default implementation returns true.
    async fn check_health(&self) -> bool {
        true
    }
}
