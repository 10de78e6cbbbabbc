//! Model Fallback Invoker
//!
//! Tries the candidate models for a purpose in ascending priority order
//! until one answers. Each candidate call is wrapped in the retry helper,
//! which only repeats transient backend errors. Per-model success and
//! failure counts are kept for the lifetime of the process.
//!
//! The candidate order is static: a model that failed a moment ago is still
//! tried first next time.

use super::{Generation, GenerationBackend, GenerationRequest, LLMError, ModelDescriptor, Purpose};
use crate::config::{ModelsConfig, RetryConfig};
use crate::retry::with_retry_if;
use chrono::{DateTime, Utc};
use sdk::errors::EngineError;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Substituted when a chat model answers with empty text
pub const EMPTY_REPLY_FALLBACK: &str = "Sorry, I couldn't come up with a proper answer.";

/// Per-model counters
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ModelStat {
    pub success_count: u64,
    pub failure_count: u64,
    pub last_used_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Ordered multi-candidate invoker
pub struct FallbackInvoker {
    backend: Arc<dyn GenerationBackend>,
    candidates: HashMap<Purpose, Vec<ModelDescriptor>>,
    stats: Mutex<BTreeMap<String, ModelStat>>,
    retry: RetryConfig,
}

impl FallbackInvoker {
    /// Create an invoker over `backend`
    ///
    /// Candidate lists are sorted by priority once here. Every known model
    /// starts with zeroed stats so `/models` lists idle ones too.
    pub fn new(backend: Arc<dyn GenerationBackend>, models: &ModelsConfig, retry: RetryConfig) -> Self {
        let mut candidates = HashMap::new();
        let mut stats = BTreeMap::new();

        for purpose in Purpose::ALL {
            let mut list = models.candidates(purpose).to_vec();
            list.sort_by_key(|m| m.priority);
            for model in &list {
                stats.entry(model.name.clone()).or_default();
            }
            candidates.insert(purpose, list);
        }

        Self {
            backend,
            candidates,
            stats: Mutex::new(stats),
            retry,
        }
    }

    /// Candidates for `purpose` in the order they are tried
    pub fn candidates(&self, purpose: Purpose) -> &[ModelDescriptor] {
        self.candidates
            .get(&purpose)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Produce a response for `request`
    ///
    /// # Errors
    ///
    /// - `EmptyInput` when the request body is blank (no model is called)
    /// - `Cancelled` when `cancel` fires before a candidate answers
    /// - `ExhaustedFallback` when every candidate failed
    pub async fn generate(
        &self,
        request: &GenerationRequest,
        purpose: Purpose,
        cancel: &CancellationToken,
    ) -> Result<Generation, EngineError> {
        if request.contents.trim().is_empty() {
            return Err(EngineError::EmptyInput);
        }

        // Intent detection is a stateless classification
        let stripped;
        let request = if purpose == Purpose::Intent && !request.history.is_empty() {
            stripped = GenerationRequest {
                history: Vec::new(),
                ..request.clone()
            };
            &stripped
        } else {
            request
        };

        let candidates = self.candidates(purpose);
        let mut last_error = String::from("no candidates configured");

        for model in candidates {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }

            debug!("Trying {} (purpose: {})", model.name, purpose);
            let started = Instant::now();

            let backend = &self.backend;
            let call = with_retry_if(
                || backend.generate(model, request),
                self.retry.max_retries,
                self.retry.base_delay(),
                LLMError::is_transient,
            );

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    warn!("{} cancelled after {}ms", model.name, started.elapsed().as_millis());
                    return Err(EngineError::Cancelled);
                }
                outcome = call => outcome,
            };

            match outcome {
                Ok(text) => {
                    self.record_success(&model.name);
                    info!(
                        "{} OK ({}ms, purpose: {})",
                        model.name,
                        started.elapsed().as_millis(),
                        purpose
                    );

                    // Only chat replies reach a person; other purposes see the blank
                    let text = if purpose == Purpose::Chat && text.trim().is_empty() {
                        EMPTY_REPLY_FALLBACK.to_string()
                    } else {
                        text
                    };

                    return Ok(Generation {
                        text,
                        model_used: model.name.clone(),
                        cost_tier: model.cost_tier,
                    });
                }
                Err(e) => {
                    warn!("{} failed: {}", model.name, e);
                    self.record_failure(&model.name, &e);
                    last_error = e.to_string();
                }
            }
        }

        Err(EngineError::ExhaustedFallback {
            purpose: purpose.to_string(),
            attempted: candidates.len(),
            last_error,
        })
    }

    fn record_success(&self, model: &str) {
        let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        let stat = stats.entry(model.to_string()).or_default();
        stat.success_count += 1;
        stat.last_used_at = Some(Utc::now());
    }

    fn record_failure(&self, model: &str, error: &LLMError) {
        let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        let stat = stats.entry(model.to_string()).or_default();
        stat.failure_count += 1;
        stat.last_error = Some(error.to_string());
    }

    /// Snapshot of the stats table
    pub fn stats(&self) -> BTreeMap<String, ModelStat> {
        self.stats.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// One line per model: `name: success/failure (recent|idle)`
    pub fn stats_report(&self) -> String {
        self.stats()
            .iter()
            .map(|(name, s)| {
                format!(
                    "{}: {}/{} ({})",
                    name,
                    s.success_count,
                    s.failure_count,
                    if s.last_used_at.is_some() { "recent" } else { "idle" }
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn backend(&self) -> &Arc<dyn GenerationBackend> {
        &self.backend
    }
}
