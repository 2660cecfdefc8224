//! Work-queue domain core: registry, item store, lifecycle state machine,
//! placement/ordering and derived statistics.
//!
//! All mutations run against SQLite through one [`QueueStore`]. Multi-step
//! invariants (capacity check + transition, position renumbering, bulk
//! ticket+task moves) execute inside a single transaction; single-row status
//! flips additionally use a guarded `UPDATE ... WHERE status = ?` so racing
//! writers cannot both win.

pub mod error;
pub mod events;
pub mod items;
pub mod lifecycle;
pub mod model;
pub mod ordering;
pub mod registry;
pub mod stats;

pub use error::QueueError;
pub use model::{
    ItemStatus, Queue, QueueItem, QueueStats, QueueStatus, WorkRef,
};

use sqlx::SqlitePool;
use std::sync::Arc;

use crate::tickets::TicketDirectory;

/// Default timeout for individual SQLite queries.
const QUERY_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// Execute a future with the standard query timeout.
pub(crate) async fn with_timeout<T>(
    fut: impl std::future::Future<Output = Result<T, QueueError>>,
) -> Result<T, QueueError> {
    match tokio::time::timeout(QUERY_TIMEOUT, fut).await {
        Ok(result) => result,
        Err(_) => Err(QueueError::StorageUnavailable(format!(
            "database query timed out after {}s",
            QUERY_TIMEOUT.as_secs()
        ))),
    }
}

pub(crate) fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

// ─── QueueStore ──────────────────────────────────────────────────────────────

/// Queue domain store: owns the `queues`, `queue_items` and `queue_events`
/// tables and resolves tickets/tasks through the read-only
/// [`TicketDirectory`] contract.
#[derive(Clone)]
pub struct QueueStore {
    pool: SqlitePool,
    tickets: Arc<dyn TicketDirectory>,
}

impl QueueStore {
    pub fn new(pool: SqlitePool, tickets: Arc<dyn TicketDirectory>) -> Self {
        Self { pool, tickets }
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub(crate) fn tickets(&self) -> &dyn TicketDirectory {
        self.tickets.as_ref()
    }
}
