//! Append-only transition event log for queue items.
//!
//! One `queue_events` row per mutation, written inside the same transaction
//! as the mutation itself so the log can never drift from the item state.
//! The log is an audit/debugging aid; statistics never read from it.

use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;

use super::error::QueueError;
use super::model::{new_event_id, ItemStatus};
use super::{now_ts, with_timeout, QueueStore};

/// Distinct event kinds the queue core records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Enqueued,
    Dequeued,
    Moved,
    Reordered,
    StatusChanged,
    Retried,
    Claimed,
    Deleted,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Enqueued => "enqueued",
            EventKind::Dequeued => "dequeued",
            EventKind::Moved => "moved",
            EventKind::Reordered => "reordered",
            EventKind::StatusChanged => "status_changed",
            EventKind::Retried => "retried",
            EventKind::Claimed => "claimed",
            EventKind::Deleted => "deleted",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct QueueEventRow {
    pub id: String,
    pub item_id: i64,
    pub queue_id: Option<i64>,
    pub event_type: String,
    pub from_status: Option<String>,
    pub to_status: Option<String>,
    pub agent_id: Option<String>,
    pub detail: Option<String>,
    pub created_at: i64,
}

/// Append one event row. Transaction scope only.
pub(crate) async fn record_event(
    conn: &mut SqliteConnection,
    item_id: i64,
    queue_id: Option<i64>,
    kind: EventKind,
    from_status: Option<ItemStatus>,
    to_status: Option<ItemStatus>,
    agent_id: Option<&str>,
    detail: Option<&str>,
) -> Result<(), QueueError> {
    sqlx::query(
        "INSERT INTO queue_events \
         (id, item_id, queue_id, event_type, from_status, to_status, agent_id, detail, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(new_event_id())
    .bind(item_id)
    .bind(queue_id)
    .bind(kind.as_str())
    .bind(from_status.map(|s| s.as_str()))
    .bind(to_status.map(|s| s.as_str()))
    .bind(agent_id)
    .bind(detail)
    .bind(now_ts())
    .execute(conn)
    .await?;
    Ok(())
}

impl QueueStore {
    /// All recorded events for one item, oldest first.
    pub async fn list_item_events(&self, item_id: i64) -> Result<Vec<QueueEventRow>, QueueError> {
        with_timeout(async {
            Ok(sqlx::query_as(
                "SELECT * FROM queue_events WHERE item_id = ? ORDER BY created_at ASC, id ASC",
            )
            .bind(item_id)
            .fetch_all(self.pool())
            .await?)
        })
        .await
    }
}
