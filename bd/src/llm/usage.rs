//! Process-wide usage tracker
//!
//! Every LLM call, success or failure, logs one row. Logging is best-effort:
//! a failed write never disturbs the call that produced it. The tracker is a
//! process singleton, injectable through [`UsageTracker::new`] for tests.

use memstore::{MemoryStore, UsageRecord};
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

/// Sink for per-call usage rows
pub struct UsageTracker {
    store: Option<Arc<MemoryStore>>,
}

impl UsageTracker {
    pub fn new(store: Option<Arc<MemoryStore>>) -> Self {
        Self { store }
    }

    /// Record one call. Failures are swallowed with a warning.
    pub fn record(&self, record: UsageRecord) {
        let Some(store) = &self.store else {
            debug!(agent = %record.agent, "Usage tracker has no store, dropping record");
            return;
        };
        if let Err(e) = store.log_usage(&record) {
            warn!(error = %e, "Failed to log usage record");
        }
    }
}

static TRACKER: OnceLock<Arc<UsageTracker>> = OnceLock::new();

/// Install the process-wide tracker. First caller wins; later calls are
/// ignored so tests and the daemon can both initialize defensively.
pub fn init_usage_tracker(store: Option<Arc<MemoryStore>>) {
    let _ = TRACKER.set(Arc::new(UsageTracker::new(store)));
}

/// The process-wide tracker. Before initialization this is a no-op sink.
pub fn usage_tracker() -> Arc<UsageTracker> {
    TRACKER.get_or_init(|| Arc::new(UsageTracker::new(None))).clone()
}
