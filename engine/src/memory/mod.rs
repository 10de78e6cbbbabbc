//! Conversation Memory Manager
//!
//! Keeps, per user, a bounded window of the most recent chat turns, a
//! bounded list of summaries of older turns, and a free-form profile.
//!
//! State is loaded lazily from the durable store on first reference and
//! every mutation is mirrored back through the ordered [`PersistWriter`].
//!
//! # Overflow
//!
//! When an append pushes the window past `window_max`, the oldest excess
//! turns are summarized (purpose `summary`). They stay in the window until
//! their summary is recorded and are then removed exactly once. While a
//! summarization is running for a user no second one is started. If
//! summarization keeps failing the window keeps growing up to
//! `overflow_hold_max`, beyond which the oldest turns are dropped unsummarized.
//!
//! The summary list keeps the `summary_max` newest records; older ones are
//! discarded for good.

use crate::config::MemoryConfig;
use crate::llm::fallback::FallbackInvoker;
use crate::llm::{CostTier, GenerationRequest, Purpose};
use crate::store::{PersistWriter, StoreKind};
use crate::telemetry::short_id;
use chrono::{DateTime, Utc};
use sdk::errors::EngineError;
use sdk::types::{ChatMessage, Role};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Closing clause of every system instruction
pub const POLICY_CLAUSE: &str = "Rules:\n\
• Answer only from data you actually have. When the user asks for facts, \
use the external data tools instead of memory or assumptions.\n\
• Never fabricate names, numbers or dates. If unsure, say so or ask.\n\
• Keep replies short and formatted for a chat app.";

/// One summary of evicted turns
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryRecord {
    pub timestamp: DateTime<Utc>,
    pub summary: String,
    pub model_used: String,
    pub cost_tier: CostTier,
}

/// What the assistant knows about the user
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default)]
    pub profile: String,

    #[serde(default)]
    pub preferences: String,

    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

/// Read-only copy of a user's memory
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MemorySnapshot {
    pub profile: UserProfile,
    pub window: Vec<ChatMessage>,
    pub summaries: Vec<SummaryRecord>,
}

#[derive(Default)]
struct UserSession {
    profile: UserProfile,
    window: Vec<ChatMessage>,
    summaries: VecDeque<SummaryRecord>,
    summarizing: bool,
}

pub struct ConversationMemory {
    sessions: Mutex<HashMap<String, UserSession>>,
    invoker: Arc<FallbackInvoker>,
    writer: PersistWriter,
    config: MemoryConfig,
    persona: String,
}

impl ConversationMemory {
    pub fn new(
        invoker: Arc<FallbackInvoker>,
        writer: PersistWriter,
        config: MemoryConfig,
        persona: impl Into<String>,
    ) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            invoker,
            writer,
            config,
            persona: persona.into(),
        }
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    fn lock_sessions(&self) -> std::sync::MutexGuard<'_, HashMap<String, UserSession>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append a turn, summarizing overflow when the window is full
    ///
    /// Summarization failures are logged and swallowed.
    pub async fn append(&self, user: &str, role: Role, text: &str) {
        self.ensure_loaded(user).await;

        let overflow = {
            let mut sessions = self.lock_sessions();
            let session = sessions.entry(user.to_string()).or_default();
            session.window.push(ChatMessage {
                role,
                content: text.to_string(),
            });
            self.persist_window(user, session);

            let len = session.window.len();
            debug!("[{}] Recent: {} messages", short_id(user), len);

            if len > self.config.window_max && !session.summarizing {
                session.summarizing = true;
                Some(session.window[..len - self.config.window_max].to_vec())
            } else {
                None
            }
        };

        let Some(overflow) = overflow else {
            return;
        };

        let outcome = self.summarize(user, &overflow).await;

        let mut sessions = self.lock_sessions();
        let Some(session) = sessions.get_mut(user) else {
            // Cleared while summarizing
            return;
        };
        session.summarizing = false;

        match outcome {
            Ok(()) => {
                if session.window.starts_with(&overflow) {
                    session.window.drain(..overflow.len());
                }
            }
            Err(e) => {
                warn!("[{}] {}", short_id(user), e);
                let hold = self.config.overflow_hold_max;
                if session.window.len() > hold {
                    let excess = session.window.len() - hold;
                    warn!(
                        "[{}] Dropping {} unsummarized messages over the hold limit",
                        short_id(user),
                        excess
                    );
                    session.window.drain(..excess);
                }
            }
        }
        self.persist_window(user, session);
    }

    /// Summarize `messages` and record the summary
    ///
    /// # Errors
    ///
    /// `SummarizationFailure` when no summary model answered or the answer
    /// was blank. The summary
    /// list is left unchanged in that case.
    pub async fn summarize(&self, user: &str, messages: &[ChatMessage]) -> Result<(), EngineError> {
        self.ensure_loaded(user).await;

        let transcript = messages
            .iter()
            .map(|m| format!("{}: {}", m.role.transcript_label(), m.content))
            .collect::<Vec<_>>()
            .join("\n");

        let request = GenerationRequest::new(format!(
            "Summarize this conversation in 1-2 sentences. Focus on the core topic:\n\n{}\n\nShort summary:",
            transcript
        ));

        info!("[{}] Summarizing {} messages", short_id(user), messages.len());
        let generation = self
            .invoker
            .generate(&request, Purpose::Summary, &CancellationToken::new())
            .await
            .map_err(|e| EngineError::SummarizationFailure(e.to_string()))?;

        let summary = generation.text.trim();
        if summary.is_empty() {
            return Err(EngineError::SummarizationFailure(format!(
                "{} returned an empty summary",
                generation.model_used
            )));
        }

        let record = SummaryRecord {
            timestamp: Utc::now(),
            summary: summary.to_string(),
            model_used: generation.model_used,
            cost_tier: generation.cost_tier,
        };
        info!("[{}] Summary recorded [{}]", short_id(user), record.model_used);

        let mut sessions = self.lock_sessions();
        let session = sessions.entry(user.to_string()).or_default();
        session.summaries.push_back(record);
        while session.summaries.len() > self.config.summary_max {
            session.summaries.pop_front();
        }
        self.persist(user, StoreKind::Summaries, &session.summaries);

        Ok(())
    }

    /// System instruction for the next generation
    ///
    /// Persona, then the profile (if any), then the newest summaries in
    /// insertion order, then the policy clause.
    pub async fn build_context(&self, user: &str) -> String {
        self.ensure_loaded(user).await;

        let sessions = self.lock_sessions();
        let mut prompt = self.persona.clone();

        if let Some(session) = sessions.get(user) {
            let profile = session.profile.profile.trim();
            if !profile.is_empty() {
                prompt.push_str("\n\nAbout the user:\n");
                prompt.push_str(profile);
            }

            let skip = session
                .summaries
                .len()
                .saturating_sub(self.config.context_summaries);
            let recent: Vec<&str> = session
                .summaries
                .iter()
                .skip(skip)
                .map(|s| s.summary.as_str())
                .filter(|s| !s.is_empty())
                .collect();
            if !recent.is_empty() {
                prompt.push_str("\n\nEarlier in this conversation:\n• ");
                prompt.push_str(&recent.join("\n• "));
            }
        }

        prompt.push_str("\n\n");
        prompt.push_str(POLICY_CLAUSE);
        prompt
    }

    /// Up to `max` most recent non-empty turns, oldest first
    pub async fn history(&self, user: &str, max: usize) -> Vec<ChatMessage> {
        self.ensure_loaded(user).await;

        let sessions = self.lock_sessions();
        let Some(session) = sessions.get(user) else {
            return Vec::new();
        };

        let valid: Vec<&ChatMessage> = session
            .window
            .iter()
            .filter(|m| !m.content.trim().is_empty())
            .collect();
        let skip = valid.len().saturating_sub(max);
        valid.into_iter().skip(skip).cloned().collect()
    }

    pub async fn snapshot(&self, user: &str) -> MemorySnapshot {
        self.ensure_loaded(user).await;

        let sessions = self.lock_sessions();
        sessions
            .get(user)
            .map(|s| MemorySnapshot {
                profile: s.profile.clone(),
                window: s.window.clone(),
                summaries: s.summaries.iter().cloned().collect(),
            })
            .unwrap_or_default()
    }

    pub async fn set_profile(&self, user: &str, profile: &str) {
        self.ensure_loaded(user).await;

        let mut sessions = self.lock_sessions();
        let session = sessions.entry(user.to_string()).or_default();
        session.profile.profile = profile.trim().to_string();
        session.profile.last_updated = Some(Utc::now());
        self.persist(user, StoreKind::Profile, &session.profile);
    }

    /// Forget everything about `user`, in memory and in the store
    pub async fn clear(&self, user: &str) {
        self.lock_sessions().remove(user);
        self.writer.clear(user);
        // A later lazy load must not observe the old records
        self.writer.flush().await;
        info!("[{}] Memory cleared", short_id(user));
    }

    async fn ensure_loaded(&self, user: &str) {
        if self.lock_sessions().contains_key(user) {
            return;
        }

        let window: Vec<ChatMessage> = self.load(user, StoreKind::Window).await.unwrap_or_default();
        let mut summaries: VecDeque<SummaryRecord> = self
            .load(user, StoreKind::Summaries)
            .await
            .unwrap_or_default();
        while summaries.len() > self.config.summary_max {
            summaries.pop_front();
        }
        let profile: UserProfile = self.load(user, StoreKind::Profile).await.unwrap_or_default();

        debug!(
            "[{}] Loaded memory: {} recent, {} summaries",
            short_id(user),
            window.len(),
            summaries.len()
        );

        self.lock_sessions()
            .entry(user.to_string())
            .or_insert(UserSession {
                profile,
                window,
                summaries,
                summarizing: false,
            });
    }

    async fn load<T: DeserializeOwned>(&self, user: &str, kind: StoreKind) -> Option<T> {
        match self.writer.store().load(user, kind).await {
            Ok(Some(value)) => match serde_json::from_value(value) {
                Ok(parsed) => Some(parsed),
                Err(e) => {
                    warn!("[{}] Ignoring unreadable {}: {}", short_id(user), kind, e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!("[{}] Failed to load {}: {}", short_id(user), kind, e);
                None
            }
        }
    }

    fn persist_window(&self, user: &str, session: &UserSession) {
        self.persist(user, StoreKind::Window, &session.window);
    }

    fn persist<T: Serialize>(&self, user: &str, kind: StoreKind, value: &T) {
        match serde_json::to_value(value) {
            Ok(json) => self.writer.save(user, kind, json),
            Err(e) => warn!("[{}] Failed to encode {}: {}", short_id(user), kind, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ModelsConfig, RetryConfig};
    use crate::llm::testing::ScriptedBackend;
    use crate::llm::{GenerationBackend, ModelDescriptor};
    use crate::store::{DurableStore, MemoryStore};
    use serde_json::json;

    const SUMMARY_MODEL: &str = "sum-model";

    struct Fixture {
        backend: Arc<ScriptedBackend>,
        store: Arc<MemoryStore>,
        writer: PersistWriter,
        memory: ConversationMemory,
    }

    fn fixture_with(config: MemoryConfig, store: Arc<MemoryStore>) -> Fixture {
        let backend = Arc::new(ScriptedBackend::new());
        let models = ModelsConfig {
            chat: vec![ModelDescriptor::new("chat-model", 1, CostTier::Low)],
            summary: vec![ModelDescriptor::new(SUMMARY_MODEL, 1, CostTier::Lowest)],
            intent: vec![],
        };
        let invoker = Arc::new(FallbackInvoker::new(
            Arc::clone(&backend) as Arc<dyn GenerationBackend>,
            &models,
            RetryConfig {
                max_retries: 0,
                base_delay_ms: 1,
            },
        ));
        let writer = PersistWriter::spawn(Arc::clone(&store) as Arc<dyn DurableStore>);
        let memory = ConversationMemory::new(invoker, writer.clone(), config, "You are Parley.");
        Fixture {
            backend,
            store,
            writer,
            memory,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(MemoryConfig::default(), Arc::new(MemoryStore::new()))
    }

    fn contents(messages: &[ChatMessage]) -> Vec<&str> {
        messages.iter().map(|m| m.content.as_str()).collect()
    }

    #[tokio::test]
    async fn test_window_overflow_summarizes_oldest_once() {
        let f = fixture();
        f.backend.push(SUMMARY_MODEL, Ok("talked about m1".to_string()));

        for i in 1..=5 {
            let role = if i % 2 == 1 { Role::User } else { Role::Model };
            f.memory.append("u1", role, &format!("m{i}")).await;
        }

        let snap = f.memory.snapshot("u1").await;
        assert_eq!(contents(&snap.window), vec!["m2", "m3", "m4", "m5"]);
        assert_eq!(snap.summaries.len(), 1);
        assert_eq!(snap.summaries[0].summary, "talked about m1");
        assert_eq!(snap.summaries[0].model_used, SUMMARY_MODEL);

        let calls = f.backend.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].1.contents.contains("User: m1"));
        assert!(!calls[0].1.contents.contains("m2"));
    }

    #[tokio::test]
    async fn test_summary_list_is_bounded() {
        let f = fixture();
        for i in 1..=6 {
            f.backend.push(SUMMARY_MODEL, Ok(format!("summary {i}")));
            f.memory
                .summarize("u1", &[ChatMessage::user(format!("turn {i}"))])
                .await
                .unwrap();
        }

        let snap = f.memory.snapshot("u1").await;
        let texts: Vec<_> = snap.summaries.iter().map(|s| s.summary.as_str()).collect();
        assert_eq!(
            texts,
            vec!["summary 2", "summary 3", "summary 4", "summary 5", "summary 6"]
        );
    }

    #[tokio::test]
    async fn test_failed_summary_keeps_overflow_until_success() {
        let f = fixture();
        f.backend.break_model(SUMMARY_MODEL);

        for i in 1..=6 {
            f.memory.append("u1", Role::User, &format!("m{i}")).await;
        }

        let snap = f.memory.snapshot("u1").await;
        assert_eq!(snap.window.len(), 6);
        assert!(snap.summaries.is_empty());

        // Second attempt covered both overflow turns
        let calls = f.backend.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[1].1.contents.contains("User: m1\nUser: m2"));
    }

    #[tokio::test]
    async fn test_blank_summary_is_a_failure() {
        let f = fixture();
        f.backend.push(SUMMARY_MODEL, Ok("   ".to_string()));

        for i in 1..=5 {
            f.memory.append("u1", Role::User, &format!("m{i}")).await;
        }

        // Overflow stays in the window and nothing is recorded
        let snap = f.memory.snapshot("u1").await;
        assert_eq!(snap.window.len(), 5);
        assert!(snap.summaries.is_empty());

        f.backend.push(SUMMARY_MODEL, Ok("   ".to_string()));
        let err = f
            .memory
            .summarize("u1", &[ChatMessage::user("m1")])
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::SummarizationFailure(_)));
        assert!(f.memory.snapshot("u1").await.summaries.is_empty());
    }

    #[tokio::test]
    async fn test_hold_limit_drops_oldest() {
        let config = MemoryConfig {
            window_max: 2,
            overflow_hold_max: 3,
            ..MemoryConfig::default()
        };
        let f = fixture_with(config, Arc::new(MemoryStore::new()));
        f.backend.break_model(SUMMARY_MODEL);

        for i in 1..=5 {
            f.memory.append("u1", Role::User, &format!("m{i}")).await;
        }

        let snap = f.memory.snapshot("u1").await;
        assert_eq!(contents(&snap.window), vec!["m3", "m4", "m5"]);
    }

    #[tokio::test]
    async fn test_state_mirrored_and_lazily_loaded() {
        let store = Arc::new(MemoryStore::new());
        let first = fixture_with(MemoryConfig::default(), Arc::clone(&store));
        first.memory.append("u1", Role::User, "hello").await;
        first.memory.set_profile("u1", "prefers short answers").await;
        first.writer.flush().await;

        assert_eq!(
            first.store.load("u1", StoreKind::Window).await.unwrap(),
            Some(json!([{"role": "user", "content": "hello"}]))
        );

        // Fresh manager over the same store
        let second = fixture_with(MemoryConfig::default(), store);
        let history = second.memory.history("u1", 10).await;
        assert_eq!(contents(&history), vec!["hello"]);
        let context = second.memory.build_context("u1").await;
        assert!(context.contains("prefers short answers"));
    }

    #[tokio::test]
    async fn test_build_context_order() {
        let f = fixture();
        f.memory.set_profile("u1", "Name: Ana").await;
        for i in 1..=4 {
            f.backend.push(SUMMARY_MODEL, Ok(format!("s{i}")));
            f.memory
                .summarize("u1", &[ChatMessage::user("x")])
                .await
                .unwrap();
        }

        let context = f.memory.build_context("u1").await;
        assert!(context.starts_with("You are Parley."));
        assert!(!context.contains("s1"));

        let profile_at = context.find("Name: Ana").unwrap();
        let s2 = context.find("s2").unwrap();
        let s3 = context.find("s3").unwrap();
        let s4 = context.find("s4").unwrap();
        let policy_at = context.find("Never fabricate").unwrap();
        assert!(profile_at < s2 && s2 < s3 && s3 < s4 && s4 < policy_at);
    }

    #[tokio::test]
    async fn test_history_limits_and_skips_blank() {
        let f = fixture();
        f.memory.append("u1", Role::User, "a").await;
        f.memory.append("u1", Role::Model, "  ").await;
        f.memory.append("u1", Role::User, "b").await;
        f.memory.append("u1", Role::Model, "c").await;

        assert_eq!(contents(&f.memory.history("u1", 2).await), vec!["b", "c"]);
        assert_eq!(contents(&f.memory.history("u1", 10).await), vec!["a", "b", "c"]);
        assert!(f.memory.history("nobody", 10).await.is_empty());
    }

    #[tokio::test]
    async fn test_clear_drops_memory_and_store() {
        let f = fixture();
        f.memory.append("u1", Role::User, "secret").await;
        f.memory.clear("u1").await;

        assert!(f.memory.snapshot("u1").await.window.is_empty());
        assert!(f
            .store
            .load("u1", StoreKind::Window)
            .await
            .unwrap()
            .is_none());
    }
}
