//! Per-user serializer
//!
//! Guarantees at most one in-flight task per user and runs a user's tasks
//! strictly in arrival order. Tasks of different users run concurrently.
//!
//! Every user with pending work has a FIFO queue and one drain loop (a
//! spawned tokio task) that runs entries one at a time. The loop exits and
//! the queue is forgotten as soon as the queue is empty.
//!
//! # Queue-wait deadline
//!
//! Each entry may wait at most `lock_timeout` before it *starts*. Once a
//! task has started it runs to completion regardless of the deadline. The
//! start/expire race is settled with a single compare-and-swap on the
//! entry's state, so an entry either runs or is rejected with
//! `LockTimeout`, never both.
//!
//! # Panics
//!
//! A panicking task resolves its own caller with `TaskAborted`. The drain
//! loop is unaffected and moves on to the next entry.

use futures::future::BoxFuture;
use futures::FutureExt;
use sdk::errors::EngineError;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::telemetry::short_id;

const PENDING: u8 = 0;
const STARTED: u8 = 1;
const EXPIRED: u8 = 2;

type Job = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

struct QueueEntry {
    job: Job,
    state: Arc<AtomicU8>,
}

#[derive(Default)]
struct UserQueue {
    entries: VecDeque<QueueEntry>,
    processing: bool,
}

type Queues = Arc<Mutex<HashMap<String, UserQueue>>>;

/// Snapshot of the serializer's queues
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct SerializerStats {
    /// Users that currently have a queue
    pub total_users: usize,

    /// Users whose drain loop is running
    pub active_users: usize,

    /// Pending (not yet started) entries per user
    pub queue_sizes: BTreeMap<String, usize>,
}

/// Occupies a user's slot until dropped
///
/// Obtained from [`UserSerializer::acquire`]. Work submitted for the same
/// user while the guard is alive waits behind it.
#[must_use = "the slot is released as soon as the guard is dropped"]
pub struct SlotGuard {
    _release: oneshot::Sender<()>,
}

impl SlotGuard {
    /// Release the slot explicitly
    pub fn release(self) {}
}

/// Per-user ordered, non-overlapping executor
#[derive(Clone)]
pub struct UserSerializer {
    queues: Queues,
    lock_timeout: Duration,
}

impl UserSerializer {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            queues: Arc::new(Mutex::new(HashMap::new())),
            lock_timeout,
        }
    }

    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    /// Run `task` in `user`'s queue and return its own outcome
    ///
    /// # Errors
    ///
    /// - `LockTimeout` if the task did not start within the queue-wait deadline
    /// - `TaskAborted` if the task panicked
    pub async fn submit<F, Fut, T>(&self, user: &str, task: F) -> Result<T, EngineError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.schedule(user, task).await
    }

    /// Queue `task` for `user` now and return a future for its outcome
    ///
    /// The queue position is taken before this returns, so callers that
    /// schedule in arrival order get their tasks run in arrival order even
    /// when the returned futures are awaited from different tokio tasks.
    pub fn schedule<F, Fut, T>(
        &self,
        user: &str,
        task: F,
    ) -> impl Future<Output = Result<T, EngineError>> + Send + 'static
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move || {
            async move {
                let outcome = AssertUnwindSafe(async move { task().await })
                    .catch_unwind()
                    .await
                    .map_err(|_| EngineError::TaskAborted);
                // Caller may have gone away; the task still ran
                let _ = tx.send(outcome);
            }
            .boxed()
        });

        let enqueued_at = Instant::now();
        let state = self.enqueue(user, job);
        let user = user.to_string();
        let lock_timeout = self.lock_timeout;

        async move {
            let outcome = wait_for_start(&user, lock_timeout, &state, rx, enqueued_at).await?;
            if let Err(EngineError::TaskAborted) = &outcome {
                error!("Task for {} panicked", short_id(&user));
            }
            outcome
        }
    }

    /// Occupy `user`'s slot until the returned guard is dropped
    ///
    /// The acquisition queues like any submitted task and is subject to the
    /// same queue-wait deadline.
    pub async fn acquire(&self, user: &str) -> Result<SlotGuard, EngineError> {
        let (started_tx, started_rx) = oneshot::channel::<()>();
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let job: Job = Box::new(move || {
            async move {
                if started_tx.send(()).is_ok() {
                    // Resolves on send or when the guard is dropped
                    let _ = release_rx.await;
                }
            }
            .boxed()
        });

        let enqueued_at = Instant::now();
        let state = self.enqueue(user, job);
        wait_for_start(user, self.lock_timeout, &state, started_rx, enqueued_at).await?;

        Ok(SlotGuard {
            _release: release_tx,
        })
    }

    /// Pending entries for `user` (the running one excluded)
    pub fn queue_len(&self, user: &str) -> usize {
        let queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        queues.get(user).map(|q| q.entries.len()).unwrap_or(0)
    }

    /// Whether a drain loop is running for `user`
    pub fn is_processing(&self, user: &str) -> bool {
        let queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        queues.get(user).map(|q| q.processing).unwrap_or(false)
    }

    pub fn stats(&self) -> SerializerStats {
        let queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        SerializerStats {
            total_users: queues.len(),
            active_users: queues.values().filter(|q| q.processing).count(),
            queue_sizes: queues
                .iter()
                .map(|(user, q)| (user.clone(), q.entries.len()))
                .collect(),
        }
    }

    fn enqueue(&self, user: &str, job: Job) -> Arc<AtomicU8> {
        let state = Arc::new(AtomicU8::new(PENDING));
        let start_drain = {
            let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
            let queue = queues.entry(user.to_string()).or_default();
            queue.entries.push_back(QueueEntry {
                job,
                state: Arc::clone(&state),
            });
            debug!(
                "Queued task for {} (position {})",
                short_id(user),
                queue.entries.len()
            );

            let idle = !queue.processing;
            queue.processing = true;
            idle
        };

        if start_drain {
            tokio::spawn(drain(Arc::clone(&self.queues), user.to_string()));
        }

        state
    }
}

async fn wait_for_start<R>(
    user: &str,
    lock_timeout: Duration,
    state: &AtomicU8,
    mut rx: oneshot::Receiver<R>,
    enqueued_at: Instant,
) -> Result<R, EngineError> {
    let deadline = enqueued_at + lock_timeout;

    tokio::select! {
        outcome = &mut rx => outcome.map_err(|_| EngineError::TaskAborted),
        _ = tokio::time::sleep_until(deadline) => {
            if state
                .compare_exchange(PENDING, EXPIRED, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                let waited_ms = enqueued_at.elapsed().as_millis() as u64;
                warn!("Lock timeout for {} after {}ms", short_id(user), waited_ms);
                Err(EngineError::LockTimeout {
                    user: user.to_string(),
                    waited_ms,
                })
            } else {
                // Started before the deadline; wait for its outcome
                rx.await.map_err(|_| EngineError::TaskAborted)
            }
        }
    }
}

async fn drain(queues: Queues, user: String) {
    loop {
        let entry = {
            let mut map = queues.lock().unwrap_or_else(|e| e.into_inner());
            let next = map.get_mut(&user).and_then(|q| q.entries.pop_front());
            match next {
                Some(entry) => entry,
                None => {
                    map.remove(&user);
                    debug!("Queue for {} drained", short_id(&user));
                    return;
                }
            }
        };

        if entry
            .state
            .compare_exchange(PENDING, STARTED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Skipping expired entry for {}", short_id(&user));
            continue;
        }

        (entry.job)().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::time::Instant as StdInstant;

    #[tokio::test]
    async fn test_same_user_runs_in_order_without_overlap() {
        let serializer = UserSerializer::new(Duration::from_secs(5));
        let log = Arc::new(Mutex::new(Vec::new()));

        let task = |label: &'static str, delay_ms: u64| {
            let log = Arc::clone(&log);
            move || async move {
                log.lock().unwrap().push(format!("start {label}"));
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                log.lock().unwrap().push(format!("end {label}"));
                label
            }
        };

        let (a, b, c) = tokio::join!(
            serializer.submit("u1", task("a", 30)),
            serializer.submit("u1", task("b", 5)),
            serializer.submit("u1", task("c", 10)),
        );

        assert_eq!(a.unwrap(), "a");
        assert_eq!(b.unwrap(), "b");
        assert_eq!(c.unwrap(), "c");
        assert_eq!(
            *log.lock().unwrap(),
            vec!["start a", "end a", "start b", "end b", "start c", "end c"]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_schedule_fixes_position_before_await() {
        let serializer = UserSerializer::new(Duration::from_secs(5));
        let log = Arc::new(Mutex::new(Vec::new()));

        let record = |label: &'static str| {
            let log = Arc::clone(&log);
            move || async move {
                log.lock().unwrap().push(label);
            }
        };

        let first = serializer.schedule("u1", record("first"));
        let second = serializer.schedule("u1", record("second"));

        // Awaited in the opposite order on separate tasks
        let second = tokio::spawn(second);
        let first = tokio::spawn(first);
        second.await.unwrap().unwrap();
        first.await.unwrap().unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_different_users_run_concurrently() {
        let serializer = UserSerializer::new(Duration::from_secs(5));
        let started = StdInstant::now();

        let (a, b) = tokio::join!(
            serializer.submit("u1", || tokio::time::sleep(Duration::from_millis(150))),
            serializer.submit("u2", || tokio::time::sleep(Duration::from_millis(150))),
        );

        assert!(a.is_ok() && b.is_ok());
        assert!(started.elapsed() < Duration::from_millis(280));
    }

    #[tokio::test]
    async fn test_queue_wait_deadline_rejects_and_never_runs() {
        let serializer = UserSerializer::new(Duration::from_millis(50));
        let ran = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&ran);
        let (first, second) = tokio::join!(
            serializer.submit("u1", || tokio::time::sleep(Duration::from_millis(200))),
            serializer.submit("u1", move || async move {
                flag.store(true, Ordering::SeqCst);
            }),
        );

        assert!(first.is_ok());
        match second {
            Err(EngineError::LockTimeout { user, waited_ms }) => {
                assert_eq!(user, "u1");
                assert!(waited_ms >= 50);
            }
            other => panic!("expected LockTimeout, got {other:?}"),
        }

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_started_task_outlives_deadline() {
        let serializer = UserSerializer::new(Duration::from_millis(20));
        let result = serializer
            .submit("u1", || async {
                tokio::time::sleep(Duration::from_millis(80)).await;
                42
            })
            .await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_panicking_task_is_isolated() {
        let serializer = UserSerializer::new(Duration::from_secs(5));

        let (boom, next) = tokio::join!(
            serializer.submit("u1", || async {
                panic!("boom");
            }),
            serializer.submit("u1", || async { "still alive" }),
        );

        let boom: Result<(), EngineError> = boom;
        assert!(matches!(boom, Err(EngineError::TaskAborted)));
        assert_eq!(next.unwrap(), "still alive");
    }

    #[tokio::test]
    async fn test_acquire_guard_blocks_until_dropped() {
        let serializer = UserSerializer::new(Duration::from_secs(5));
        let guard = serializer.acquire("u1").await.unwrap();

        let worker = serializer.clone();
        let handle = tokio::spawn(async move { worker.submit("u1", || async { "after" }).await });

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!handle.is_finished());
        assert_eq!(serializer.queue_len("u1"), 1);
        assert!(serializer.is_processing("u1"));

        guard.release();
        assert_eq!(handle.await.unwrap().unwrap(), "after");
    }

    #[tokio::test]
    async fn test_acquire_times_out_behind_busy_slot() {
        let serializer = UserSerializer::new(Duration::from_millis(40));
        let _held = serializer.acquire("u1").await.unwrap();

        let err = serializer.acquire("u1").await.err().unwrap();
        assert!(matches!(err, EngineError::LockTimeout { .. }));
    }

    #[tokio::test]
    async fn test_idle_queue_is_forgotten() {
        let serializer = UserSerializer::new(Duration::from_secs(5));
        serializer.submit("u1", || async {}).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let stats = serializer.stats();
        assert_eq!(stats.total_users, 0);
        assert_eq!(stats.active_users, 0);
        assert!(!serializer.is_processing("u1"));
    }

    #[tokio::test]
    async fn test_stats_report_pending_entries() {
        let serializer = UserSerializer::new(Duration::from_secs(5));
        let _guard = serializer.acquire("u1").await.unwrap();

        let worker = serializer.clone();
        let _pending = tokio::spawn(async move { worker.submit("u1", || async {}).await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let stats = serializer.stats();
        assert_eq!(stats.total_users, 1);
        assert_eq!(stats.active_users, 1);
        assert_eq!(stats.queue_sizes.get("u1"), Some(&1));
    }
}
