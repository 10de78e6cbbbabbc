//! Configuration management
//!
//! This module handles loading, validation, and management of the Parley configuration.
//! Configuration is stored in TOML format at ~/.parley/config.toml.
//!
//! # Configuration Sections
//!
//! - **core**: Log level, data directory
//! - **assistant**: Persona, trigger prefix, reply limits, generation timeout, admins
//! - **memory**: Recent window and summary list bounds
//! - **cache**: Response cache lifetime and sweep threshold
//! - **serializer**: Per-user queue-wait deadline
//! - **retry**: Backoff settings for transient backend failures
//! - **gemini**: Generation backend endpoint
//! - **models**: Candidate model lists per purpose
//! - **telegram**: Telegram adapter settings (optional)
//!
//! Secrets (API keys, bot tokens) are never stored in the file. The config
//! only names the environment variables they are read from.
//!
//! # Examples
//!
//! ```no_run
//! use parley_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_or_create()?;
//!
//! println!("Data dir: {:?}", config.core.data_dir);
//! println!("Window size: {}", config.memory.window_max);
//! # Ok(())
//! # }
//! ```

use crate::llm::{CostTier, ModelDescriptor, Purpose};
use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
///
/// Only the `core` section is required; every other section falls back to
/// its defaults when omitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Core settings
    pub core: CoreConfig,

    /// Assistant behaviour
    #[serde(default)]
    pub assistant: AssistantConfig,

    /// Conversation memory bounds
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Response cache
    #[serde(default)]
    pub cache: CacheConfig,

    /// Per-user serializer
    #[serde(default)]
    pub serializer: SerializerConfig,

    /// Retry policy for transient backend errors
    #[serde(default)]
    pub retry: RetryConfig,

    /// Gemini backend settings
    #[serde(default)]
    pub gemini: GeminiConfig,

    /// Candidate model lists
    #[serde(default)]
    pub models: ModelsConfig,

    /// Telegram adapter settings
    #[serde(default)]
    pub telegram: TelegramConfig,
}

/// Core configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Data directory path (supports ~ expansion)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

/// Assistant behaviour configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantConfig {
    /// Persona and policy preamble placed at the top of every system instruction
    #[serde(default = "default_persona")]
    pub persona: String,

    /// Prefix that addresses the bot (e.g. "!")
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Ignore messages that don't start with `prefix`
    #[serde(default)]
    pub require_prefix: bool,

    /// Replies longer than this are truncated
    #[serde(default = "default_max_reply_chars")]
    pub max_reply_chars: usize,

    /// Overall deadline for producing one answer (milliseconds)
    #[serde(default = "default_generation_timeout_ms")]
    pub generation_timeout_ms: u64,

    /// Maximum number of recent messages sent as generation history
    #[serde(default = "default_history_max")]
    pub history_max: usize,

    /// Sender ids allowed to run admin commands. Empty means everyone.
    #[serde(default)]
    pub admin_ids: Vec<String>,
}

/// Conversation memory configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Maximum messages kept in the recent window
    #[serde(default = "default_window_max")]
    pub window_max: usize,

    /// Maximum summaries kept per user
    #[serde(default = "default_summary_max")]
    pub summary_max: usize,

    /// Number of most recent summaries included in the system instruction
    #[serde(default = "default_context_summaries")]
    pub context_summaries: usize,

    /// Hard cap on the window while summarization keeps failing
    #[serde(default = "default_overflow_hold_max")]
    pub overflow_hold_max: usize,
}

/// Response cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Entry lifetime in milliseconds
    #[serde(default = "default_ttl_ms")]
    pub ttl_ms: u64,

    /// Entry count above which `set` sweeps expired entries
    #[serde(default = "default_sweep_threshold")]
    pub sweep_threshold: usize,

    /// Number of reply-context characters folded into the fingerprint
    #[serde(default = "default_reply_context_chars")]
    pub reply_context_chars: usize,
}

/// Per-user serializer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerializerConfig {
    /// Maximum time a request may wait in its user's queue (milliseconds)
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

/// Retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt
    #[serde(default = "default_retry_max")]
    pub max_retries: u32,

    /// Base backoff delay in milliseconds
    #[serde(default = "default_retry_base_delay_ms")]
    pub base_delay_ms: u64,
}

/// Gemini backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiConfig {
    /// Base URL for the Gemini API
    #[serde(default = "default_gemini_base_url")]
    pub base_url: String,

    /// Environment variable holding the API key
    #[serde(default = "default_gemini_key_env")]
    pub api_key_env: String,
}

/// Candidate model lists per purpose
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    #[serde(default = "default_chat_models")]
    pub chat: Vec<ModelDescriptor>,

    #[serde(default = "default_summary_models")]
    pub summary: Vec<ModelDescriptor>,

    #[serde(default = "default_intent_models")]
    pub intent: Vec<ModelDescriptor>,
}

impl ModelsConfig {
    /// Candidate list for a purpose, as configured (unsorted)
    pub fn candidates(&self, purpose: Purpose) -> &[ModelDescriptor] {
        match purpose {
            Purpose::Chat => &self.chat,
            Purpose::Summary => &self.summary,
            Purpose::Intent => &self.intent,
        }
    }
}

/// Telegram adapter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Environment variable holding the bot token
    #[serde(default = "default_telegram_token_env")]
    pub token_env: String,

    /// Telegram user ids allowed to talk to the bot. Empty means everyone.
    #[serde(default)]
    pub allowed_users: Vec<i64>,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("~/.parley")
}

fn default_persona() -> String {
    "You are Parley, a friendly personal assistant. Answer naturally and briefly, \
     greet the user before dumping information, and format replies for a chat app \
     (short paragraphs, *bold* for emphasis, emoji sparingly)."
        .to_string()
}

fn default_prefix() -> String {
    "!".to_string()
}

fn default_max_reply_chars() -> usize {
    4000
}

fn default_generation_timeout_ms() -> u64 {
    30_000
}

fn default_history_max() -> usize {
    10
}

fn default_window_max() -> usize {
    4
}

fn default_summary_max() -> usize {
    5
}

fn default_context_summaries() -> usize {
    3
}

fn default_overflow_hold_max() -> usize {
    12
}

fn default_ttl_ms() -> u64 {
    3_600_000
}

fn default_sweep_threshold() -> usize {
    100
}

fn default_reply_context_chars() -> usize {
    50
}

fn default_lock_timeout_ms() -> u64 {
    5_000
}

fn default_retry_max() -> u32 {
    2
}

fn default_retry_base_delay_ms() -> u64 {
    1_000
}

fn default_gemini_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_gemini_key_env() -> String {
    "GEMINI_API_KEY".to_string()
}

fn default_telegram_token_env() -> String {
    "TELEGRAM_BOT_TOKEN".to_string()
}

fn default_chat_models() -> Vec<ModelDescriptor> {
    vec![
        ModelDescriptor::new("gemini-3-flash-preview", 1, CostTier::Low)
            .with_description("Fastest"),
        ModelDescriptor::new("gemini-2.5-flash", 2, CostTier::Medium)
            .with_description("Advanced"),
        ModelDescriptor::new("gemini-2.5-flash-lite", 3, CostTier::High)
            .with_description("Stable fallback"),
    ]
}

fn default_summary_models() -> Vec<ModelDescriptor> {
    vec![
        ModelDescriptor::new("gemini-2.5-flash-lite", 1, CostTier::Lowest)
            .with_description("Ultra cheap"),
        ModelDescriptor::new("gemini-2.5-flash", 2, CostTier::Low)
            .with_description("Fast & reliable"),
    ]
}

/// Intent detection only tries the two fastest chat candidates
fn default_intent_models() -> Vec<ModelDescriptor> {
    default_chat_models().into_iter().take(2).collect()
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            persona: default_persona(),
            prefix: default_prefix(),
            require_prefix: false,
            max_reply_chars: default_max_reply_chars(),
            generation_timeout_ms: default_generation_timeout_ms(),
            history_max: default_history_max(),
            admin_ids: Vec::new(),
        }
    }
}

impl AssistantConfig {
    pub fn generation_timeout(&self) -> Duration {
        Duration::from_millis(self.generation_timeout_ms)
    }

    /// Whether `sender_id` may run admin commands
    ///
    /// Transports decorate ids differently ("628123@c.us" vs "628123"), so
    /// the part before '@' is compared as well.
    pub fn is_admin(&self, sender_id: &str) -> bool {
        if self.admin_ids.is_empty() {
            return true;
        }
        let bare = sender_id.split('@').next().unwrap_or(sender_id);
        self.admin_ids
            .iter()
            .map(|id| id.trim())
            .any(|id| id == sender_id || id == bare)
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            window_max: default_window_max(),
            summary_max: default_summary_max(),
            context_summaries: default_context_summaries(),
            overflow_hold_max: default_overflow_hold_max(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_ms: default_ttl_ms(),
            sweep_threshold: default_sweep_threshold(),
            reply_context_chars: default_reply_context_chars(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

impl Default for SerializerConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: default_lock_timeout_ms(),
        }
    }
}

impl SerializerConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_retry_max(),
            base_delay_ms: default_retry_base_delay_ms(),
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            base_url: default_gemini_base_url(),
            api_key_env: default_gemini_key_env(),
        }
    }
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            chat: default_chat_models(),
            summary: default_summary_models(),
            intent: default_intent_models(),
        }
    }
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            token_env: default_telegram_token_env(),
            allowed_users: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from the default location (~/.parley/config.toml)
    ///
    /// If the configuration file doesn't exist, creates a default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration file cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    pub fn load_or_create() -> Result<Self, EngineError> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            Self::create_default(&config_path)
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, EngineError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Failed to read config file: {}", e)))?;

        let mut config: Config = toml::from_str(&contents)
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate_and_process()?;

        Ok(config)
    }

    /// Create default configuration and save to path
    fn create_default(path: &Path) -> Result<Self, EngineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                EngineError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let mut config = Self::default_config();
        config.validate_and_process()?;

        let toml_string = toml::to_string_pretty(&config)
            .map_err(|e| EngineError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| EngineError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(config)
    }

    /// Get the default configuration file path (~/.parley/config.toml)
    fn default_config_path() -> Result<PathBuf, EngineError> {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(".parley").join("config.toml"))
    }

    /// Create a default configuration (not validated, paths unexpanded)
    pub fn default_config() -> Self {
        Self {
            core: CoreConfig {
                log_level: default_log_level(),
                data_dir: default_data_dir(),
            },
            assistant: AssistantConfig::default(),
            memory: MemoryConfig::default(),
            cache: CacheConfig::default(),
            serializer: SerializerConfig::default(),
            retry: RetryConfig::default(),
            gemini: GeminiConfig::default(),
            models: ModelsConfig::default(),
            telegram: TelegramConfig::default(),
        }
    }

    /// Validate and process configuration
    ///
    /// This method:
    /// - Validates the log level and numeric bounds
    /// - Requires non-empty chat and summary candidate lists
    /// - Expands ~ in the data directory and creates it
    fn validate_and_process(&mut self) -> Result<(), EngineError> {
        self.validate()?;

        self.core.data_dir = expand_path(&self.core.data_dir)?;

        if !self.core.data_dir.exists() {
            fs::create_dir_all(&self.core.data_dir).map_err(|e| {
                EngineError::Config(format!("Failed to create data directory: {}", e))
            })?;
        }

        Ok(())
    }

    /// Check values without touching the file system
    pub fn validate(&self) -> Result<(), EngineError> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        if self.memory.window_max == 0 {
            return Err(EngineError::Config(
                "memory.window_max must be at least 1".to_string(),
            ));
        }
        if self.memory.summary_max == 0 {
            return Err(EngineError::Config(
                "memory.summary_max must be at least 1".to_string(),
            ));
        }
        if self.memory.overflow_hold_max < self.memory.window_max {
            return Err(EngineError::Config(
                "memory.overflow_hold_max must be >= memory.window_max".to_string(),
            ));
        }

        if self.cache.ttl_ms == 0 {
            return Err(EngineError::Config(
                "cache.ttl_ms must be greater than 0".to_string(),
            ));
        }
        if self.serializer.lock_timeout_ms == 0 {
            return Err(EngineError::Config(
                "serializer.lock_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.assistant.generation_timeout_ms == 0 {
            return Err(EngineError::Config(
                "assistant.generation_timeout_ms must be greater than 0".to_string(),
            ));
        }

        for purpose in [Purpose::Chat, Purpose::Summary] {
            if self.models.candidates(purpose).is_empty() {
                return Err(EngineError::Config(format!(
                    "models.{} must list at least one model",
                    purpose
                )));
            }
        }

        for purpose in Purpose::ALL {
            if let Some(bad) = self
                .models
                .candidates(purpose)
                .iter()
                .find(|m| m.name.trim().is_empty())
            {
                return Err(EngineError::Config(format!(
                    "models.{} has a model with an empty name (priority {})",
                    purpose, bad.priority
                )));
            }
        }

        Ok(())
    }
}

/// Expand ~ in path to user's home directory
fn expand_path(path: &Path) -> Result<PathBuf, EngineError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| EngineError::Config("Invalid UTF-8 in path".to_string()))?;

    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(rest))
    } else if path_str == "~" {
        dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))
    } else {
        Ok(path.to_path_buf())
    }
}
