//! Request pipeline
//!
//! Turns one inbound message into one reply:
//!
//! 1. Prefix handling and built-in `/commands`
//! 2. Response cache lookup by fingerprint
//! 3. Per-user serialization
//! 4. Memory context, generation under a deadline, memory update
//!
//! Every admitted message gets a reply. Failures that prevent an answer are
//! turned into the error's user hint.

mod commands;

use crate::cache::fingerprint;
use crate::context::AppContext;
use crate::llm::fallback::EMPTY_REPLY_FALLBACK;
use crate::llm::{GenerationRequest, Purpose};
use crate::telemetry::short_id;
use futures::future::{self, BoxFuture};
use futures::FutureExt;
use sdk::errors::{EngineError, ErrorExt};
use sdk::types::{InboundMessage, Role};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Quoted reply text kept as generation context
const REPLY_CONTEXT_CHARS: usize = 200;

/// Appended to replies cut at the length limit
const TRUNCATION_NOTICE: &str = "\n\n... (message too long, truncated)";

/// Transport-neutral assistant
#[derive(Clone)]
pub struct Assistant {
    ctx: Arc<AppContext>,
}

impl Assistant {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &Arc<AppContext> {
        &self.ctx
    }

    /// Handle one inbound message
    ///
    /// Returns `None` when the message is not addressed to the assistant
    /// (prefix required but missing).
    pub async fn handle(&self, message: InboundMessage) -> Option<String> {
        self.dispatch(message).await
    }

    /// Admit one inbound message and return the future of its reply
    ///
    /// Everything up to taking a place in the sender's queue happens before
    /// this returns. Transports call it in arrival order and may then await
    /// the replies on separate tasks without reordering a user's turns.
    pub fn dispatch(&self, message: InboundMessage) -> BoxFuture<'static, Option<String>> {
        let Some(body) = self.addressed_body(&message.text) else {
            return future::ready(None).boxed();
        };
        let user = message.sender_id;

        if body.starts_with('/') {
            let ctx = Arc::clone(&self.ctx);
            let owner = user.clone();
            let input = body.to_string();
            let slot = self
                .ctx
                .serializer
                .schedule(&user, move || async move { commands::run(&ctx, &owner, &input).await });
            return async move { Some(slot.await.unwrap_or_else(|e| failure_hint(&user, e))) }
                .boxed();
        }

        let reply_context = message
            .quoted_text
            .as_deref()
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .map(|q| q.chars().take(REPLY_CONTEXT_CHARS).collect::<String>());

        let pending = self.start_answer(&user, body, reply_context);
        async move { Some(pending.await.unwrap_or_else(|e| failure_hint(&user, e))) }.boxed()
    }

    /// Message body with the prefix removed, or `None` if not addressed
    fn addressed_body<'a>(&self, text: &'a str) -> Option<&'a str> {
        let settings = &self.ctx.config.assistant;
        let raw = text.trim_start();

        if settings.prefix.is_empty() {
            Some(raw.trim())
        } else if let Some(rest) = raw.strip_prefix(settings.prefix.as_str()) {
            Some(rest.trim())
        } else if settings.require_prefix {
            None
        } else {
            Some(raw.trim())
        }
    }

    /// Answer a chat query, consulting the cache first
    ///
    /// # Errors
    ///
    /// `EmptyInput`, `LockTimeout`, `TaskAborted`, `ExhaustedFallback` or
    /// `GenerationTimeout`.
    pub async fn answer(
        &self,
        user: &str,
        query: &str,
        reply_context: Option<String>,
    ) -> Result<String, EngineError> {
        self.start_answer(user, query, reply_context).await
    }

    fn start_answer(
        &self,
        user: &str,
        query: &str,
        reply_context: Option<String>,
    ) -> BoxFuture<'static, Result<String, EngineError>> {
        let query = query.trim();
        if query.is_empty() {
            return future::ready(Err(EngineError::EmptyInput)).boxed();
        }

        let key = fingerprint(
            query,
            reply_context.as_deref(),
            self.ctx.config.cache.reply_context_chars,
        );
        if let Some(cached) = self.ctx.cache.get(&key) {
            info!("[{}] Cache hit", short_id(user));
            return future::ready(Ok(cached)).boxed();
        }

        let ctx = Arc::clone(&self.ctx);
        let owner = user.to_string();
        let query = query.to_string();

        let slot = self
            .ctx
            .serializer
            .schedule(user, move || answer_in_slot(ctx, owner, query, key, reply_context));
        async move { slot.await? }.boxed()
    }
}

fn failure_hint(user: &str, e: EngineError) -> String {
    if e.is_recoverable() {
        warn!("[{}] No answer: {}", short_id(user), e);
    } else {
        error!("[{}] No answer: {}", short_id(user), e);
    }
    e.user_hint().to_string()
}

/// Runs inside the user's serializer slot
async fn answer_in_slot(
    ctx: Arc<AppContext>,
    user: String,
    query: String,
    key: String,
    reply_context: Option<String>,
) -> Result<String, EngineError> {
    // An earlier queued duplicate may have answered already
    if let Some(cached) = ctx.cache.get(&key) {
        return Ok(cached);
    }

    let span = info_span!("answer", request_id = %Uuid::new_v4());
    let reply = generate_reply(&ctx, &user, &query, reply_context.as_deref())
        .instrument(span)
        .await?;
    // A stand-in for a blank model answer is not worth serving again
    if reply != EMPTY_REPLY_FALLBACK {
        ctx.cache.set(key, reply.clone());
    }
    Ok(reply)
}

async fn generate_reply(
    ctx: &AppContext,
    user: &str,
    query: &str,
    reply_context: Option<&str>,
) -> Result<String, EngineError> {
    let started = Instant::now();
    let settings = &ctx.config.assistant;

    let history = ctx.memory.history(user, settings.history_max).await;
    ctx.memory.append(user, Role::User, query).await;
    let system = ctx.memory.build_context(user).await;

    let contents = match reply_context {
        Some(quoted) => format!("{}\n\n--- IN REPLY TO ---\n{}", query, quoted),
        None => query.to_string(),
    };
    let request = GenerationRequest::new(contents)
        .with_system(system)
        .with_history(history);
    debug!(
        "[{}] Generating with {} history turns",
        short_id(user),
        request.history.len()
    );

    let cancel = CancellationToken::new();
    let timeout = settings.generation_timeout();
    let generation = tokio::select! {
        outcome = ctx.invoker.generate(&request, Purpose::Chat, &cancel) => outcome?,
        _ = tokio::time::sleep(timeout) => {
            cancel.cancel();
            return Err(EngineError::GenerationTimeout(timeout.as_millis() as u64));
        }
    };

    let reply = truncate_reply(generation.text.trim(), settings.max_reply_chars);
    ctx.memory.append(user, Role::Model, &reply).await;

    info!(
        "[{}] Answered with {} in {}ms",
        short_id(user),
        generation.model_used,
        started.elapsed().as_millis()
    );
    Ok(reply)
}

/// Cut `text` to at most `max_chars` characters, notice included
pub fn truncate_reply(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }

    let notice_len = TRUNCATION_NOTICE.chars().count();
    let keep = max_chars.saturating_sub(notice_len);
    let mut truncated: String = text.chars().take(keep).collect();
    truncated.push_str(TRUNCATION_NOTICE);
    truncated
}
