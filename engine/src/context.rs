//! Shared application state
//!
//! `AppContext` is built once at start-up and handed to every component.
//! It owns all process-wide mutable state (response cache, model stats,
//! conversation memory, serializer queues) so tests can build a fresh,
//! isolated instance.

use crate::cache::ResponseCache;
use crate::config::Config;
use crate::llm::fallback::FallbackInvoker;
use crate::llm::GenerationBackend;
use crate::memory::ConversationMemory;
use crate::serializer::UserSerializer;
use crate::store::{DurableStore, PersistWriter};
use std::sync::Arc;
use tracing::info;

pub struct AppContext {
    pub config: Arc<Config>,
    pub cache: ResponseCache,
    pub serializer: UserSerializer,
    pub invoker: Arc<FallbackInvoker>,
    pub memory: Arc<ConversationMemory>,
    pub writer: PersistWriter,
}

impl AppContext {
    /// Wire every component from `config`
    ///
    /// Spawns the persistence writer, so it must run inside a tokio runtime.
    pub fn new(
        config: Config,
        backend: Arc<dyn GenerationBackend>,
        store: Arc<dyn DurableStore>,
    ) -> Arc<Self> {
        let config = Arc::new(config);

        let invoker = Arc::new(FallbackInvoker::new(
            backend,
            &config.models,
            config.retry.clone(),
        ));
        let writer = PersistWriter::spawn(store);
        let memory = Arc::new(ConversationMemory::new(
            Arc::clone(&invoker),
            writer.clone(),
            config.memory.clone(),
            config.assistant.persona.clone(),
        ));

        info!(
            "Context ready: window={}, summaries={}, lock timeout={}ms",
            config.memory.window_max, config.memory.summary_max, config.serializer.lock_timeout_ms
        );

        Arc::new(Self {
            cache: ResponseCache::with_sweep_threshold(
                config.cache.ttl(),
                config.cache.sweep_threshold,
            ),
            serializer: UserSerializer::new(config.serializer.lock_timeout()),
            invoker,
            memory,
            writer,
            config,
        })
    }

    /// Wait for pending persistence writes
    pub async fn shutdown(&self) {
        self.writer.flush().await;
        info!("Pending writes flushed");
    }
}
