//! Background refresh queue for stale-while-revalidate
//!
//! Refresh work is submitted to a bounded queue with a drop-oldest policy
//! under overload and executed by a single worker task. A refresh failure is
//! logged and never propagated to the request that triggered it.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tracing::{debug, warn};

use crate::kv::KvClient;
use crate::types::Result;

use super::service::RefreshEnvelope;

/// Future computing a fresh value for a cache key
pub type RefreshFuture = Pin<Box<dyn Future<Output = Result<serde_json::Value>> + Send>>;

/// A queued recomputation for one cache key
pub struct RefreshTask {
    pub key: String,
    pub ttl: Duration,
    pub refresh_threshold: Duration,
    pub recompute: RefreshFuture,
}

struct QueueState {
    pending: Mutex<VecDeque<RefreshTask>>,
    notify: Notify,
    depth: usize,
    dropped: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

/// Handle for submitting refresh tasks
#[derive(Clone)]
pub struct RefreshQueue {
    state: Arc<QueueState>,
}

impl RefreshQueue {
    /// Create the queue and spawn its worker task
    pub fn new(depth: usize, kv: Arc<KvClient>) -> Self {
        let state = Arc::new(QueueState {
            pending: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            depth: depth.max(1),
            dropped: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        });

        let worker_state = Arc::clone(&state);
        tokio::spawn(async move {
            worker_loop(worker_state, kv).await;
        });

        Self { state }
    }

    /// Submit a task, dropping the oldest pending task when full
    pub async fn submit(&self, task: RefreshTask) {
        {
            let mut pending = self.state.pending.lock().await;
            if pending.len() >= self.state.depth {
                if let Some(dropped) = pending.pop_front() {
                    self.state.dropped.fetch_add(1, Ordering::Relaxed);
                    debug!(key = dropped.key, "Refresh queue full, dropped oldest task");
                }
            }
            pending.push_back(task);
        }
        self.state.notify.notify_one();
    }

    /// Pending task count (approximate)
    pub async fn depth(&self) -> usize {
        self.state.pending.lock().await.len()
    }

    pub fn completed(&self) -> u64 {
        self.state.completed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.state.failed.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.state.dropped.load(Ordering::Relaxed)
    }
}

async fn worker_loop(state: Arc<QueueState>, kv: Arc<KvClient>) {
    loop {
        let task = {
            let mut pending = state.pending.lock().await;
            pending.pop_front()
        };

        let Some(task) = task else {
            state.notify.notified().await;
            continue;
        };

        match task.recompute.await {
            Ok(value) => {
                let envelope = RefreshEnvelope::new(value, task.ttl, task.refresh_threshold);
                match serde_json::to_string(&envelope) {
                    Ok(json) => {
                        if kv.set(&task.key, &json, task.ttl).await {
                            state.completed.fetch_add(1, Ordering::Relaxed);
                            debug!(key = task.key, "Background refresh stored");
                        } else {
                            state.failed.fetch_add(1, Ordering::Relaxed);
                            debug!(key = task.key, "Background refresh store failed");
                        }
                    }
                    Err(e) => {
                        state.failed.fetch_add(1, Ordering::Relaxed);
                        warn!(key = task.key, error = %e, "Background refresh serialization failed");
                    }
                }
            }
            Err(e) => {
                // Never rethrown into the request path
                state.failed.fetch_add(1, Ordering::Relaxed);
                warn!(key = task.key, error = %e, "Background refresh failed");
            }
        }
    }
}
