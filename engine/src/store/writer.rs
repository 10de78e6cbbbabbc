//! Ordered persistence writer
//!
//! A single background task owns all store writes. Enqueueing never blocks
//! and never fails the caller; write errors are logged and dropped. Because
//! one task applies the queue in order, writes for a user land in the same
//! order as the mutations that produced them.

use super::{DurableStore, StoreKind};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, warn};

use crate::telemetry::short_id;

/// Writes waiting to be applied before enqueueing starts dropping them
const WRITE_QUEUE_CAPACITY: usize = 1024;

enum WriteOp {
    Save {
        user: String,
        kind: StoreKind,
        value: serde_json::Value,
    },
    Clear {
        user: String,
    },
    Flush(oneshot::Sender<()>),
}

/// Handle to the writer task
#[derive(Clone)]
pub struct PersistWriter {
    tx: mpsc::Sender<WriteOp>,
    store: Arc<dyn DurableStore>,
}

impl PersistWriter {
    /// Spawn the writer task over `store`
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(store: Arc<dyn DurableStore>) -> Self {
        let (tx, mut rx) = mpsc::channel::<WriteOp>(WRITE_QUEUE_CAPACITY);
        let worker_store = Arc::clone(&store);

        tokio::spawn(async move {
            while let Some(op) = rx.recv().await {
                match op {
                    WriteOp::Save { user, kind, value } => {
                        if let Err(e) = worker_store.save(&user, kind, &value).await {
                            error!("Failed to save {} for {}: {}", kind, short_id(&user), e);
                        }
                    }
                    WriteOp::Clear { user } => {
                        if let Err(e) = worker_store.clear(&user).await {
                            error!("Failed to clear data for {}: {}", short_id(&user), e);
                        }
                    }
                    WriteOp::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
        });

        Self { tx, store }
    }

    /// The store writes are applied to
    pub fn store(&self) -> &Arc<dyn DurableStore> {
        &self.store
    }

    /// Enqueue a record replacement
    pub fn save(&self, user: &str, kind: StoreKind, value: serde_json::Value) {
        self.enqueue(WriteOp::Save {
            user: user.to_string(),
            kind,
            value,
        });
    }

    /// Enqueue removal of every record of `user`
    pub fn clear(&self, user: &str) {
        self.enqueue(WriteOp::Clear {
            user: user.to_string(),
        });
    }

    /// Wait until every write enqueued before this call has been applied
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(WriteOp::Flush(done_tx)).await.is_err() {
            return;
        }
        let _ = done_rx.await;
    }

    fn enqueue(&self, op: WriteOp) {
        match self.tx.try_send(op) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Persistence queue full, dropping write");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("Persistence writer stopped, dropping write");
            }
        }
    }
}
