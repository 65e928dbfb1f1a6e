//! Transport layer abstraction for sync operations.

use crate::error::{EngineResult, SyncError};
use async_trait::async_trait;
use carelog_sync_protocol::{SyncPayload, SyncResult, Timestamp};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// A sync transport performs the wire-level exchange with the sync server.
///
/// Implementations must give every request a finite timeout and report
/// failures as [`SyncError::Network`], [`SyncError::Timeout`] or
/// [`SyncError::Http`] so the retry executor can classify them.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Pushes local changes (`POST /sync/push`).
    async fn push(&self, payload: &SyncPayload) -> EngineResult<SyncResult>;

    /// Pulls server changes made after `since` (`GET /sync/pull`).
    async fn pull(&self, since: Option<Timestamp>) -> EngineResult<SyncPayload>;
}

/// A scripted transport for testing.
///
/// Push calls consume scripted outcomes in order; once the script is empty
/// every push answers with the default response.
#[derive(Debug)]
pub struct MockTransport {
    push_script: Mutex<VecDeque<EngineResult<SyncResult>>>,
    default_push: Mutex<SyncResult>,
    pull_response: Mutex<Option<SyncPayload>>,
    pushed: Mutex<Vec<SyncPayload>>,
    pulled_since: Mutex<Vec<Option<Timestamp>>>,
    push_calls: AtomicUsize,
    latency: Mutex<Option<Duration>>,
}

impl MockTransport {
    /// Creates a mock transport that accepts every push.
    pub fn new() -> Self {
        Self {
            push_script: Mutex::new(VecDeque::new()),
            default_push: Mutex::new(SyncResult::success()),
            pull_response: Mutex::new(None),
            pushed: Mutex::new(Vec::new()),
            pulled_since: Mutex::new(Vec::new()),
            push_calls: AtomicUsize::new(0),
            latency: Mutex::new(None),
        }
    }

    /// Queues the outcome of the next unscripted push.
    pub fn push_next(&self, outcome: EngineResult<SyncResult>) {
        self.push_script.lock().push_back(outcome);
    }

    /// Sets the response used once the script is exhausted.
    pub fn set_default_push(&self, response: SyncResult) {
        *self.default_push.lock() = response;
    }

    /// Sets the pull response.
    pub fn set_pull_response(&self, response: SyncPayload) {
        *self.pull_response.lock() = Some(response);
    }

    /// Makes every call wait before answering.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = Some(latency);
    }

    /// Number of push calls made, including failed ones.
    pub fn push_calls(&self) -> usize {
        self.push_calls.load(Ordering::SeqCst)
    }

    /// Payloads of all push calls, in call order.
    pub fn pushed(&self) -> Vec<SyncPayload> {
        self.pushed.lock().clone()
    }

    /// The `since` argument of every pull call, in call order.
    pub fn pulled_since(&self) -> Vec<Option<Timestamp>> {
        self.pulled_since.lock().clone()
    }

    async fn wait(&self) {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SyncTransport for MockTransport {
    async fn push(&self, payload: &SyncPayload) -> EngineResult<SyncResult> {
        self.push_calls.fetch_add(1, Ordering::SeqCst);
        self.pushed.lock().push(payload.clone());
        self.wait().await;

        let scripted = self.push_script.lock().pop_front();
        match scripted {
            Some(outcome) => outcome,
            None => Ok(self.default_push.lock().clone()),
        }
    }

    async fn pull(&self, since: Option<Timestamp>) -> EngineResult<SyncPayload> {
        self.pulled_since.lock().push(since);
        self.wait().await;
        self.pull_response
            .lock()
            .clone()
            .ok_or_else(|| SyncError::http(404, "no mock pull response set"))
    }
}
