//! Statistics Aggregator: derived per-queue counts, processing time and
//! active agents.
//!
//! This is the single aggregation path over `queue_items`; every caller
//! (queue listings, dashboards) goes through it, and nothing is cached, so
//! moves and deletes can never leave stale numbers behind.

use super::error::QueueError;
use super::model::QueueStats;
use super::{with_timeout, QueueStore};

async fn collect(
    pool: &sqlx::SqlitePool,
    queue_filter: Option<i64>,
) -> Result<QueueStats, QueueError> {
    // One GROUP BY pass for the counts keeps them mutually consistent.
    let counts: Vec<(String, i64)> = match queue_filter {
        Some(queue_id) => {
            sqlx::query_as(
                "SELECT status, COUNT(*) FROM queue_items WHERE queue_id = ? GROUP BY status",
            )
            .bind(queue_id)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query_as(
                "SELECT status, COUNT(*) FROM queue_items WHERE queue_id IS NULL GROUP BY status",
            )
            .fetch_all(pool)
            .await?
        }
    };

    let mut stats = QueueStats::default();
    for (status, count) in counts {
        stats.total_items += count;
        match status.as_str() {
            "queued" => stats.queued_items = count,
            "in_progress" => stats.in_progress_items = count,
            "completed" => stats.completed_items = count,
            "failed" => stats.failed_items = count,
            "cancelled" => stats.cancelled_items = count,
            "timeout" => stats.timeout_items = count,
            _ => {}
        }
    }

    // AVG over zero rows is NULL, never a division by zero.
    stats.average_processing_secs = match queue_filter {
        Some(queue_id) => {
            sqlx::query_scalar(
                "SELECT AVG(CAST(completed_at - started_at AS REAL)) FROM queue_items \
                 WHERE queue_id = ? AND status = 'completed' \
                   AND started_at IS NOT NULL AND completed_at IS NOT NULL",
            )
            .bind(queue_id)
            .fetch_one(pool)
            .await?
        }
        None => {
            sqlx::query_scalar(
                "SELECT AVG(CAST(completed_at - started_at AS REAL)) FROM queue_items \
                 WHERE queue_id IS NULL AND status = 'completed' \
                   AND started_at IS NOT NULL AND completed_at IS NOT NULL",
            )
            .fetch_one(pool)
            .await?
        }
    };

    stats.current_agents = match queue_filter {
        Some(queue_id) => {
            sqlx::query_scalar(
                "SELECT DISTINCT agent_id FROM queue_items \
                 WHERE queue_id = ? AND status = 'in_progress' AND agent_id IS NOT NULL \
                 ORDER BY agent_id ASC",
            )
            .bind(queue_id)
            .fetch_all(pool)
            .await?
        }
        None => Vec::new(),
    };

    Ok(stats)
}

impl QueueStore {
    /// Freshly computed statistics for one queue.
    pub async fn queue_stats(&self, queue_id: i64) -> Result<QueueStats, QueueError> {
        self.get_queue(queue_id).await?;
        with_timeout(collect(self.pool(), Some(queue_id))).await
    }

    /// Statistics for the virtual unqueued pool. The pool has no agents at
    /// work (unqueued items cannot be in progress), so only the counts and
    /// residual averages are meaningful.
    pub async fn unqueued_stats(&self) -> Result<QueueStats, QueueError> {
        with_timeout(collect(self.pool(), None)).await
    }
}
