//! Typed error taxonomy for the queue domain.
//!
//! Every variant carries a human-readable message (`Display`) and a stable
//! machine code (`code()`) so callers can render targeted feedback instead
//! of parsing message text.

use super::model::ItemStatus;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// Caller-supplied data violates a data-model invariant.
    #[error("{0}")]
    Validation(String),

    /// Referenced queue, item, ticket or task does not exist.
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: i64 },

    /// Requested status transition is not allowed by the state machine.
    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition { from: ItemStatus, to: ItemStatus },

    /// The queue already runs `max_parallel_items` items in progress.
    /// Transient from the caller's perspective; retry later.
    #[error("queue {queue_id} already has {limit} item(s) in progress")]
    CapacityExceeded { queue_id: i64, limit: i64 },

    /// Structural conflict (non-empty queue delete without cascade, moving
    /// an in-progress item, duplicate queue membership, ...).
    #[error("{0}")]
    Conflict(String),

    /// Storage-layer failure (timeout, connectivity). The core never
    /// retries; callers apply their own backoff.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
}

impl QueueError {
    /// Stable machine-readable code for the REST layer and batch results.
    pub fn code(&self) -> &'static str {
        match self {
            QueueError::Validation(_) => "validation_error",
            QueueError::NotFound { .. } => "not_found",
            QueueError::InvalidTransition { .. } => "invalid_transition",
            QueueError::CapacityExceeded { .. } => "capacity_exceeded",
            QueueError::Conflict(_) => "conflict",
            QueueError::StorageUnavailable(_) => "storage_unavailable",
        }
    }

    pub(crate) fn not_found(kind: &'static str, id: i64) -> Self {
        QueueError::NotFound { kind, id }
    }
}

impl From<sqlx::Error> for QueueError {
    fn from(e: sqlx::Error) -> Self {
        QueueError::StorageUnavailable(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(QueueError::Validation("x".into()).code(), "validation_error");
        assert_eq!(QueueError::not_found("queue", 1).code(), "not_found");
        assert_eq!(
            QueueError::InvalidTransition {
                from: ItemStatus::Completed,
                to: ItemStatus::InProgress,
            }
            .code(),
            "invalid_transition"
        );
        assert_eq!(
            QueueError::CapacityExceeded { queue_id: 1, limit: 2 }.code(),
            "capacity_exceeded"
        );
        assert_eq!(QueueError::Conflict("x".into()).code(), "conflict");
        assert_eq!(
            QueueError::StorageUnavailable("down".into()).code(),
            "storage_unavailable"
        );
    }

    #[test]
    fn invalid_transition_names_both_statuses() {
        let e = QueueError::InvalidTransition {
            from: ItemStatus::Completed,
            to: ItemStatus::InProgress,
        };
        let msg = e.to_string();
        assert!(msg.contains("completed"));
        assert!(msg.contains("in_progress"));
    }
}
