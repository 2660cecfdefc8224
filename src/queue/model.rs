//! Queue domain data model types.

use serde::{Deserialize, Serialize};

/// Generate a new ULID string (transition event ids).
pub fn new_event_id() -> String {
    ulid::Ulid::new().to_string()
}

// ─── Statuses ────────────────────────────────────────────────────────────────

/// Queue-level status. Pausing a queue blocks new `in_progress` transitions
/// for its items; enqueue, dequeue and reorder stay available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Active,
    Paused,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Active => "active",
            QueueStatus::Paused => "paused",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(QueueStatus::Active),
            "paused" => Some(QueueStatus::Paused),
            _ => None,
        }
    }
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-item processing status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Queued,
    InProgress,
    Completed,
    Failed,
    Cancelled,
    Timeout,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Queued => "queued",
            ItemStatus::InProgress => "in_progress",
            ItemStatus::Completed => "completed",
            ItemStatus::Failed => "failed",
            ItemStatus::Cancelled => "cancelled",
            ItemStatus::Timeout => "timeout",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(ItemStatus::Queued),
            "in_progress" => Some(ItemStatus::InProgress),
            "completed" => Some(ItemStatus::Completed),
            "failed" => Some(ItemStatus::Failed),
            "cancelled" => Some(ItemStatus::Cancelled),
            "timeout" => Some(ItemStatus::Timeout),
            _ => None,
        }
    }

    /// Terminal statuses accept no further transitions (only an explicit
    /// `retry` re-enters the machine, and `completed` is not retryable).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ItemStatus::Completed | ItemStatus::Failed | ItemStatus::Cancelled | ItemStatus::Timeout
        )
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Valid item status transitions.
///
/// `retry` is not a transition in this table: it is a separate operation
/// that resets failed/cancelled/timeout items back to `queued`.
pub fn valid_transition(from: ItemStatus, to: ItemStatus) -> bool {
    use ItemStatus::*;
    matches!(
        (from, to),
        (Queued, InProgress)
            | (Queued, Cancelled)
            | (InProgress, Completed)
            | (InProgress, Failed)
            | (InProgress, Timeout)
            | (InProgress, Cancelled)
    )
}

// ─── Work reference ──────────────────────────────────────────────────────────

/// What a queue item tracks: exactly one ticket, or exactly one task of a
/// ticket. Task items always know their parent ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "item_type", rename_all = "snake_case")]
pub enum WorkRef {
    Ticket { ticket_id: i64 },
    Task { task_id: i64, parent_ticket_id: i64 },
}

impl WorkRef {
    pub fn item_type(&self) -> &'static str {
        match self {
            WorkRef::Ticket { .. } => "ticket",
            WorkRef::Task { .. } => "task",
        }
    }
}

// ─── Records ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Queue {
    pub id: i64,
    pub project_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub status: String,
    pub max_parallel_items: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Queue {
    pub fn status(&self) -> QueueStatus {
        QueueStatus::parse(&self.status).unwrap_or(QueueStatus::Active)
    }
}

/// Raw `queue_items` row. `item_type` + the optional id columns encode the
/// ticket/task union; [`QueueItem`] is the typed view handed to callers.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct QueueItemRow {
    pub id: i64,
    pub queue_id: Option<i64>,
    pub item_type: String,
    pub ticket_id: Option<i64>,
    pub task_id: Option<i64>,
    pub parent_ticket_id: Option<i64>,
    pub position: Option<i64>,
    pub status: String,
    pub priority: i64,
    pub agent_id: Option<String>,
    pub error_message: Option<String>,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
}

/// A work item's placement and processing record.
///
/// `queue_id = None` means the item sits in the virtual unqueued pool:
/// unordered (`position = None`), uncapped, and always `queued`
/// (apart from pool items that were cancelled in place).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: i64,
    pub queue_id: Option<i64>,
    #[serde(flatten)]
    pub work: WorkRef,
    pub position: Option<i64>,
    pub status: ItemStatus,
    pub priority: i64,
    pub agent_id: Option<String>,
    pub error_message: Option<String>,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
}

impl TryFrom<QueueItemRow> for QueueItem {
    type Error = String;

    fn try_from(row: QueueItemRow) -> Result<Self, Self::Error> {
        let work = match row.item_type.as_str() {
            "ticket" => WorkRef::Ticket {
                ticket_id: row
                    .ticket_id
                    .ok_or_else(|| format!("queue item {}: ticket row without ticket_id", row.id))?,
            },
            "task" => WorkRef::Task {
                task_id: row
                    .task_id
                    .ok_or_else(|| format!("queue item {}: task row without task_id", row.id))?,
                parent_ticket_id: row.parent_ticket_id.ok_or_else(|| {
                    format!("queue item {}: task row without parent_ticket_id", row.id)
                })?,
            },
            other => return Err(format!("queue item {}: unknown item_type '{other}'", row.id)),
        };
        let status = ItemStatus::parse(&row.status)
            .ok_or_else(|| format!("queue item {}: unknown status '{}'", row.id, row.status))?;
        Ok(QueueItem {
            id: row.id,
            queue_id: row.queue_id,
            work,
            position: row.position,
            status,
            priority: row.priority,
            agent_id: row.agent_id,
            error_message: row.error_message,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
        })
    }
}

// ─── Statistics ──────────────────────────────────────────────────────────────

/// Per-queue derived statistics. Recomputed from `queue_items` on every
/// read; nothing here is stored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStats {
    pub total_items: i64,
    pub queued_items: i64,
    pub in_progress_items: i64,
    pub completed_items: i64,
    pub failed_items: i64,
    pub cancelled_items: i64,
    pub timeout_items: i64,
    /// Mean of (completed_at - started_at) over completed items with both
    /// stamps, in seconds. `None` when no such items exist.
    pub average_processing_secs: Option<f64>,
    /// Distinct non-null agent ids currently holding `in_progress` items.
    pub current_agents: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_table_allows_the_documented_edges() {
        use ItemStatus::*;
        assert!(valid_transition(Queued, InProgress));
        assert!(valid_transition(Queued, Cancelled));
        assert!(valid_transition(InProgress, Completed));
        assert!(valid_transition(InProgress, Failed));
        assert!(valid_transition(InProgress, Timeout));
        assert!(valid_transition(InProgress, Cancelled));
    }

    #[test]
    fn transition_table_rejects_everything_else() {
        use ItemStatus::*;
        let all = [Queued, InProgress, Completed, Failed, Cancelled, Timeout];
        let allowed = [
            (Queued, InProgress),
            (Queued, Cancelled),
            (InProgress, Completed),
            (InProgress, Failed),
            (InProgress, Timeout),
            (InProgress, Cancelled),
        ];
        for from in all {
            for to in all {
                let expect = allowed.contains(&(from, to));
                assert_eq!(valid_transition(from, to), expect, "{from} -> {to}");
            }
        }
    }

    #[test]
    fn terminal_statuses() {
        use ItemStatus::*;
        for s in [Completed, Failed, Cancelled, Timeout] {
            assert!(s.is_terminal());
        }
        for s in [Queued, InProgress] {
            assert!(!s.is_terminal());
        }
    }

    #[test]
    fn status_round_trips_through_strings() {
        use ItemStatus::*;
        for s in [Queued, InProgress, Completed, Failed, Cancelled, Timeout] {
            assert_eq!(ItemStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(ItemStatus::parse("done"), None);
    }

    #[test]
    fn row_to_item_requires_matching_union_fields() {
        let row = QueueItemRow {
            id: 1,
            queue_id: Some(2),
            item_type: "task".into(),
            ticket_id: None,
            task_id: Some(7),
            parent_ticket_id: Some(3),
            position: Some(0),
            status: "queued".into(),
            priority: 5,
            agent_id: None,
            error_message: None,
            created_at: 1700000000,
            started_at: None,
            completed_at: None,
        };
        let item = QueueItem::try_from(row.clone()).unwrap();
        assert_eq!(
            item.work,
            WorkRef::Task {
                task_id: 7,
                parent_ticket_id: 3
            }
        );

        let mut bad = row;
        bad.parent_ticket_id = None;
        assert!(QueueItem::try_from(bad).is_err());
    }

    #[test]
    fn work_ref_serialises_with_item_type_tag() {
        let json = serde_json::to_string(&WorkRef::Ticket { ticket_id: 9 }).unwrap();
        assert!(json.contains("\"item_type\":\"ticket\""));
        assert!(json.contains("\"ticket_id\":9"));
    }
}
