//! Client-side persistence scheduler.
//!
//! Two independent debounce timers are restarted by every local edit:
//!
//! ```text
//! edit ─┬─► broadcast timer (500ms) ──► sink.broadcast(latest)
//!       └─► autosave timer  (3s)    ──► sink.persist(latest)
//! ```
//!
//! Only the content of the last edit before a quiet period is sent. Both
//! timers are aborted on teardown, so nothing fires after the editor has
//! left the document. Adopting remote content (a collaborator's change or a
//! revert) also aborts them, so stale local content never overwrites it.

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::error::CollabError;

/// Default broadcast debounce (500ms)
pub const BROADCAST_DEBOUNCE_MS: u64 = 500;

/// Default autosave debounce (3s)
pub const AUTOSAVE_DEBOUNCE_MS: u64 = 3_000;

/// Where debounced content goes.
#[async_trait]
pub trait EditSink: Send + Sync + 'static {
    /// Relay content to collaborators.
    async fn broadcast(&self, content: String) -> Result<(), CollabError>;

    /// Durably save content.
    async fn persist(&self, content: String) -> Result<(), CollabError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub broadcast_delay: Duration,
    pub autosave_delay: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            broadcast_delay: Duration::from_millis(BROADCAST_DEBOUNCE_MS),
            autosave_delay: Duration::from_millis(AUTOSAVE_DEBOUNCE_MS),
        }
    }
}

/// A restartable delayed task.
#[derive(Default)]
struct DebounceTimer {
    handle: Option<JoinHandle<()>>,
}

impl DebounceTimer {
    fn restart<F>(&mut self, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.cancel();
        self.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
        }));
    }

    fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    fn is_pending(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

/// Debounces local edits into broadcasts and autosaves.
///
/// Must be driven from inside a tokio runtime.
pub struct PersistenceScheduler<S: EditSink> {
    sink: Arc<S>,
    config: SchedulerConfig,
    broadcast: DebounceTimer,
    autosave: DebounceTimer,
    torn_down: bool,
}

impl<S: EditSink> PersistenceScheduler<S> {
    pub fn new(sink: Arc<S>, config: SchedulerConfig) -> Self {
        Self {
            sink,
            config,
            broadcast: DebounceTimer::default(),
            autosave: DebounceTimer::default(),
            torn_down: false,
        }
    }

    pub fn config(&self) -> SchedulerConfig {
        self.config
    }

    /// Record a local content mutation, restarting both timers.
    pub fn on_local_edit(&mut self, content: String) {
        if self.torn_down {
            log::debug!("Ignoring edit after teardown");
            return;
        }

        let sink = self.sink.clone();
        let latest = content.clone();
        self.broadcast.restart(self.config.broadcast_delay, async move {
            if let Err(e) = sink.broadcast(latest).await {
                log::warn!("Debounced broadcast failed: {e}");
            }
        });

        let sink = self.sink.clone();
        self.autosave.restart(self.config.autosave_delay, async move {
            // The next edit's cycle retries.
            if let Err(e) = sink.persist(content).await {
                log::warn!("Autosave failed: {e}");
            }
        });
    }

    /// Persist immediately, bypassing the autosave timer.
    pub async fn save_now(&mut self, content: String) -> Result<(), CollabError> {
        if self.torn_down {
            return Err(CollabError::Validation("editor session already torn down".into()));
        }
        self.autosave.cancel();
        self.sink.persist(content).await
    }

    /// The editor replaced its content with content from elsewhere.
    /// Pending local output is stale and is dropped.
    pub fn on_remote_content(&mut self) {
        if self.broadcast.is_pending() || self.autosave.is_pending() {
            log::debug!("Dropping pending local output after remote content");
        }
        self.broadcast.cancel();
        self.autosave.cancel();
    }

    pub fn has_pending_broadcast(&self) -> bool {
        self.broadcast.is_pending()
    }

    pub fn has_pending_autosave(&self) -> bool {
        self.autosave.is_pending()
    }

    /// Cancel both timers. Later edits are ignored.
    pub fn teardown(&mut self) {
        if !self.torn_down {
            self.broadcast.cancel();
            self.autosave.cancel();
            self.torn_down = true;
        }
    }
}

impl<S: EditSink> Drop for PersistenceScheduler<S> {
    fn drop(&mut self) {
        self.teardown();
    }
}
