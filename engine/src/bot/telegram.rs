//! Telegram Bot Integration
//!
//! Provides a long-polling transport for the assistant. Messages from
//! authorized users are handed to [`Assistant::dispatch`] and the reply is
//! sent back to the originating chat.
//!
//! Updates of one batch are admitted in `update_id` order on the polling
//! task, which fixes each sender's queue position, and only then awaited on
//! their own tasks. On shutdown, polling stops and in-flight replies are
//! given a bounded time to finish.

use anyhow::Result;
use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::Client;
use sdk::types::InboundMessage;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::assistant::Assistant;
use crate::telemetry::short_id;

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Seconds Telegram holds a getUpdates request open
const LONG_POLL_SECS: u64 = 30;

/// Drain bound used when none is configured
const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct TelegramBot {
    token: String,
    allowed_users: Vec<i64>,
    client: Client,
    assistant: Assistant,
    api_base: String,
    drain_timeout: Duration,
}

impl std::fmt::Debug for TelegramBot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramBot")
            .field("allowed_users", &self.allowed_users)
            .field("api_base", &self.api_base)
            .field("drain_timeout", &self.drain_timeout)
            .finish()
    }
}

#[derive(Deserialize, Debug)]
pub struct Update {
    pub update_id: i64,
    message: Option<Message>,
}

#[derive(Deserialize, Debug)]
struct Message {
    chat: Chat,
    text: Option<String>,
    caption: Option<String>,
    from: Option<User>,
    #[serde(default)]
    photo: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    document: Option<serde_json::Value>,
    reply_to_message: Option<Box<Message>>,
}

#[derive(Deserialize, Debug)]
struct Chat {
    id: i64,
}

#[derive(Deserialize, Debug)]
struct User {
    id: i64,
}

#[derive(Deserialize, Debug)]
struct GetUpdatesResponse {
    ok: bool,
    result: Option<Vec<Update>>,
}

impl Message {
    fn body(&self) -> Option<&str> {
        self.text.as_deref().or(self.caption.as_deref())
    }

    fn to_inbound(&self, sender_id: i64) -> Option<InboundMessage> {
        let text = self.body()?.to_string();
        Some(InboundMessage {
            sender_id: sender_id.to_string(),
            text,
            has_attachment: self.photo.is_some() || self.document.is_some(),
            quoted_text: self
                .reply_to_message
                .as_ref()
                .and_then(|quoted| quoted.body())
                .map(str::to_string),
        })
    }
}

impl TelegramBot {
    pub fn new(token: String, allowed_users: Vec<i64>, assistant: Assistant) -> Self {
        Self {
            token,
            allowed_users,
            client: Client::builder()
                .timeout(Duration::from_secs(LONG_POLL_SECS + 30))
                .build()
                .unwrap_or_default(),
            assistant,
            api_base: TELEGRAM_API_BASE.to_string(),
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }

    /// How long shutdown waits for in-flight replies
    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    /// Point the bot at a different Bot API server
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    /// Start the long-polling loop
    ///
    /// Runs until `shutdown` resolves, then waits up to the drain timeout
    /// for replies already admitted.
    pub async fn start_polling(
        &self,
        shutdown: impl std::future::Future<Output = ()>,
    ) -> Result<()> {
        info!("Starting Telegram bot long-polling loop...");
        let mut offset = 0;
        let tracker = TaskTracker::new();
        tokio::pin!(shutdown);

        loop {
            let updates = tokio::select! {
                _ = &mut shutdown => break,
                updates = self.get_updates(offset) => updates,
            };

            match updates {
                Ok(updates) => {
                    for update in updates {
                        offset = update.update_id + 1;
                        if let Some(reply) = self.admit(update) {
                            tracker.spawn(reply);
                        }
                    }
                }
                Err(e) => {
                    error!("Failed to fetch Telegram updates: {}", e);
                    tokio::select! {
                        _ = &mut shutdown => break,
                        _ = tokio::time::sleep(Duration::from_secs(5)) => {}
                    }
                }
            }
        }

        tracker.close();
        info!(
            "Telegram polling stopped, waiting for {} in-flight replies",
            tracker.len()
        );
        if tokio::time::timeout(self.drain_timeout, tracker.wait())
            .await
            .is_err()
        {
            warn!(
                "Gave up on {} replies after {}s",
                tracker.len(),
                self.drain_timeout.as_secs()
            );
        }
        Ok(())
    }

    pub async fn get_updates(&self, offset: i64) -> Result<Vec<Update>> {
        let url = format!(
            "{}?offset={}&timeout={}",
            self.method_url("getUpdates"),
            offset,
            LONG_POLL_SECS
        );

        let response = self
            .client
            .get(&url)
            .send()
            .await?
            .json::<GetUpdatesResponse>()
            .await?;

        if !response.ok {
            return Err(anyhow::anyhow!("Telegram API returned ok=false"));
        }

        Ok(response.result.unwrap_or_default())
    }

    /// Answer one update
    pub async fn handle_update(&self, update: Update) {
        if let Some(reply) = self.admit(update) {
            reply.await;
        }
    }

    /// Check `update` and queue it with the assistant
    ///
    /// Returns the future that delivers the reply, or `None` when there is
    /// nothing to answer. The sender's queue position is taken before this
    /// returns.
    fn admit(&self, update: Update) -> Option<BoxFuture<'static, ()>> {
        let Some(msg) = update.message else {
            debug!("Update {} has no message", update.update_id);
            return None;
        };
        let chat_id = msg.chat.id;

        let user_id = match msg.from.as_ref() {
            Some(u) => u.id,
            None => {
                warn!("Message with no user info - ignoring");
                return None;
            }
        };

        let bot = self.clone();
        if !self.allowed_users.is_empty() && !self.allowed_users.contains(&user_id) {
            warn!("Unauthorized user {} attempted to use the bot", user_id);
            return Some(
                async move {
                    let _ = bot
                        .send_message(chat_id, "Unauthorized. Access denied.")
                        .await;
                }
                .boxed(),
            );
        }

        let Some(inbound) = msg.to_inbound(user_id) else {
            debug!("Ignoring non-text message from {}", user_id);
            return None;
        };

        info!("Message from {}", short_id(&inbound.sender_id));
        let reply = self.assistant.dispatch(inbound);
        Some(
            async move {
                if let Some(reply) = reply.await {
                    if let Err(e) = bot.send_message(chat_id, &reply).await {
                        error!("Failed to send reply to {}: {}", chat_id, e);
                    }
                }
            }
            .boxed(),
        )
    }

    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<()> {
        #[derive(Serialize)]
        struct SendMsgReq<'a> {
            chat_id: i64,
            text: &'a str,
        }

        let req = SendMsgReq { chat_id, text };

        self.client
            .post(self.method_url("sendMessage"))
            .json(&req)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
