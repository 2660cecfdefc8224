//! Queue Registry: queue definitions per project.

use tracing::info;

use super::error::QueueError;
use super::events::{record_event, EventKind};
use super::model::{ItemStatus, Queue, QueueItemRow, QueueStats, QueueStatus};
use super::{now_ts, with_timeout, QueueStore};

/// Partial update for [`QueueStore::update_queue`]. `None` fields are left
/// unchanged.
#[derive(Debug, Clone, Default)]
pub struct QueuePatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub max_parallel_items: Option<i64>,
    pub status: Option<QueueStatus>,
}

fn validate_name(name: &str) -> Result<(), QueueError> {
    if name.trim().is_empty() {
        return Err(QueueError::Validation("queue name must not be empty".into()));
    }
    Ok(())
}

fn validate_cap(max_parallel_items: i64) -> Result<(), QueueError> {
    if max_parallel_items < 1 {
        return Err(QueueError::Validation(
            "max_parallel_items must be at least 1".into(),
        ));
    }
    Ok(())
}

impl QueueStore {
    pub async fn create_queue(
        &self,
        project_id: i64,
        name: &str,
        description: Option<&str>,
        max_parallel_items: i64,
    ) -> Result<Queue, QueueError> {
        validate_name(name)?;
        validate_cap(max_parallel_items)?;
        with_timeout(async {
            let duplicate: Option<i64> =
                sqlx::query_scalar("SELECT id FROM queues WHERE project_id = ? AND name = ?")
                    .bind(project_id)
                    .bind(name)
                    .fetch_optional(self.pool())
                    .await?;
            if duplicate.is_some() {
                return Err(QueueError::Conflict(format!(
                    "queue '{name}' already exists in project {project_id}"
                )));
            }
            let now = now_ts();
            let id: i64 = sqlx::query_scalar(
                "INSERT INTO queues \
                 (project_id, name, description, status, max_parallel_items, created_at, updated_at) \
                 VALUES (?, ?, ?, 'active', ?, ?, ?) \
                 RETURNING id",
            )
            .bind(project_id)
            .bind(name)
            .bind(description)
            .bind(max_parallel_items)
            .bind(now)
            .bind(now)
            .fetch_one(self.pool())
            .await?;
            info!(queue_id = id, project_id, name, "queue created");
            self.get_queue(id).await
        })
        .await
    }

    pub async fn get_queue(&self, id: i64) -> Result<Queue, QueueError> {
        with_timeout(async {
            let row: Option<Queue> = sqlx::query_as("SELECT * FROM queues WHERE id = ?")
                .bind(id)
                .fetch_optional(self.pool())
                .await?;
            row.ok_or_else(|| QueueError::not_found("queue", id))
        })
        .await
    }

    /// A project's queues in creation order.
    pub async fn list_queues(&self, project_id: i64) -> Result<Vec<Queue>, QueueError> {
        with_timeout(async {
            Ok(sqlx::query_as(
                "SELECT * FROM queues WHERE project_id = ? ORDER BY created_at ASC, id ASC",
            )
            .bind(project_id)
            .fetch_all(self.pool())
            .await?)
        })
        .await
    }

    pub async fn update_queue(&self, id: i64, patch: QueuePatch) -> Result<Queue, QueueError> {
        if let Some(name) = patch.name.as_deref() {
            validate_name(name)?;
        }
        if let Some(cap) = patch.max_parallel_items {
            // Lowering the cap below the current in-progress count is
            // allowed; the cap gates new transitions only.
            validate_cap(cap)?;
        }
        with_timeout(async {
            let current = self.get_queue(id).await?;
            if let Some(name) = patch.name.as_deref() {
                let duplicate: Option<i64> = sqlx::query_scalar(
                    "SELECT id FROM queues WHERE project_id = ? AND name = ? AND id != ?",
                )
                .bind(current.project_id)
                .bind(name)
                .bind(id)
                .fetch_optional(self.pool())
                .await?;
                if duplicate.is_some() {
                    return Err(QueueError::Conflict(format!(
                        "queue '{name}' already exists in project {}",
                        current.project_id
                    )));
                }
            }
            sqlx::query(
                "UPDATE queues SET \
                   name = COALESCE(?, name), \
                   description = COALESCE(?, description), \
                   max_parallel_items = COALESCE(?, max_parallel_items), \
                   status = COALESCE(?, status), \
                   updated_at = ? \
                 WHERE id = ?",
            )
            .bind(patch.name.as_deref())
            .bind(patch.description.as_deref())
            .bind(patch.max_parallel_items)
            .bind(patch.status.map(|s| s.as_str()))
            .bind(now_ts())
            .bind(id)
            .execute(self.pool())
            .await?;
            self.get_queue(id).await
        })
        .await
    }

    /// Pause or resume a queue. Pausing blocks new `in_progress`
    /// transitions; running items, enqueue, dequeue and reorder are
    /// unaffected.
    pub async fn set_queue_status(&self, id: i64, status: QueueStatus) -> Result<Queue, QueueError> {
        with_timeout(async {
            let affected = sqlx::query("UPDATE queues SET status = ?, updated_at = ? WHERE id = ?")
                .bind(status.as_str())
                .bind(now_ts())
                .bind(id)
                .execute(self.pool())
                .await?
                .rows_affected();
            if affected == 0 {
                return Err(QueueError::not_found("queue", id));
            }
            info!(queue_id = id, status = %status, "queue status changed");
            self.get_queue(id).await
        })
        .await
    }

    /// Delete a queue. Without `cascade` the queue must be empty; with
    /// `cascade`, queued items return to the unqueued pool and terminal
    /// items are deleted. In-progress items always block deletion.
    pub async fn delete_queue(&self, id: i64, cascade: bool) -> Result<(), QueueError> {
        with_timeout(async {
            let mut tx = self.pool().begin().await?;
            let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM queues WHERE id = ?")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
            if exists.is_none() {
                return Err(QueueError::not_found("queue", id));
            }

            let rows: Vec<QueueItemRow> =
                sqlx::query_as("SELECT * FROM queue_items WHERE queue_id = ? ORDER BY position ASC")
                    .bind(id)
                    .fetch_all(&mut *tx)
                    .await?;
            if !rows.is_empty() && !cascade {
                return Err(QueueError::Conflict(format!(
                    "queue {id} still has {} item(s); dequeue them or pass cascade",
                    rows.len()
                )));
            }
            for row in &rows {
                match ItemStatus::parse(&row.status) {
                    Some(ItemStatus::InProgress) => {
                        return Err(QueueError::Conflict(format!(
                            "queue {id} has in-progress item {}; cancel it before deleting",
                            row.id
                        )));
                    }
                    Some(ItemStatus::Queued) => {
                        sqlx::query(
                            "UPDATE queue_items SET queue_id = NULL, position = NULL WHERE id = ?",
                        )
                        .bind(row.id)
                        .execute(&mut *tx)
                        .await?;
                        record_event(
                            &mut tx,
                            row.id,
                            Some(id),
                            EventKind::Dequeued,
                            Some(ItemStatus::Queued),
                            Some(ItemStatus::Queued),
                            None,
                            Some("queue deleted"),
                        )
                        .await?;
                    }
                    _ => {
                        // Terminal history has no home once the queue is gone.
                        sqlx::query("DELETE FROM queue_items WHERE id = ?")
                            .bind(row.id)
                            .execute(&mut *tx)
                            .await?;
                        record_event(
                            &mut tx,
                            row.id,
                            Some(id),
                            EventKind::Deleted,
                            ItemStatus::parse(&row.status),
                            None,
                            None,
                            Some("queue deleted"),
                        )
                        .await?;
                    }
                }
            }

            sqlx::query("DELETE FROM queues WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            info!(queue_id = id, cascade, "queue deleted");
            Ok(())
        })
        .await
    }

    /// A project's queues joined with freshly computed statistics.
    pub async fn list_queues_with_stats(
        &self,
        project_id: i64,
    ) -> Result<Vec<(Queue, QueueStats)>, QueueError> {
        let queues = self.list_queues(project_id).await?;
        let mut out = Vec::with_capacity(queues.len());
        for queue in queues {
            let stats = self.queue_stats(queue.id).await?;
            out.push((queue, stats));
        }
        Ok(out)
    }

    /// Items of a queue after an existence check; used by the REST layer so
    /// listing an unknown queue is a 404 rather than an empty list.
    pub async fn queue_items_checked(
        &self,
        queue_id: i64,
        status: Option<ItemStatus>,
    ) -> Result<Vec<super::model::QueueItem>, QueueError> {
        self.get_queue(queue_id).await?;
        self.list_items(queue_id, status).await
    }
}
