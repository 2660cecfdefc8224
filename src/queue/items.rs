//! Queue Item Store: creation, lookups and hard deletion of work items.
//!
//! Each ticket or task is tracked by at most one `queue_items` row at a
//! time. Dequeueing keeps the row and returns it to the unqueued pool;
//! deletion removes the row (and only the row — never the underlying
//! ticket/task record).

use sqlx::SqliteConnection;

use super::error::QueueError;
use super::events::{record_event, EventKind};
use super::model::{ItemStatus, QueueItem, QueueItemRow, WorkRef};
use super::{now_ts, ordering, with_timeout, QueueStore};

/// Spec for creating a work item directly in the item store.
///
/// `queue_id = None` creates the item in the unqueued pool.
/// `include_tasks` expands a ticket into the ticket item plus one item per
/// task, placed contiguously after the ticket; it is invalid for task refs.
#[derive(Debug, Clone)]
pub struct CreateItemSpec {
    pub work: WorkRef,
    pub queue_id: Option<i64>,
    pub priority: i64,
    pub include_tasks: bool,
}

pub(crate) fn into_item(row: QueueItemRow) -> Result<QueueItem, QueueError> {
    QueueItem::try_from(row).map_err(QueueError::StorageUnavailable)
}

// ─── Transaction-scope row helpers ───────────────────────────────────────────

pub(crate) async fn item_row(
    conn: &mut SqliteConnection,
    id: i64,
) -> Result<Option<QueueItemRow>, QueueError> {
    Ok(sqlx::query_as("SELECT * FROM queue_items WHERE id = ?")
        .bind(id)
        .fetch_optional(conn)
        .await?)
}

pub(crate) async fn item_row_for_ticket(
    conn: &mut SqliteConnection,
    ticket_id: i64,
) -> Result<Option<QueueItemRow>, QueueError> {
    Ok(
        sqlx::query_as("SELECT * FROM queue_items WHERE item_type = 'ticket' AND ticket_id = ?")
            .bind(ticket_id)
            .fetch_optional(conn)
            .await?,
    )
}

pub(crate) async fn item_row_for_task(
    conn: &mut SqliteConnection,
    task_id: i64,
) -> Result<Option<QueueItemRow>, QueueError> {
    Ok(
        sqlx::query_as("SELECT * FROM queue_items WHERE item_type = 'task' AND task_id = ?")
            .bind(task_id)
            .fetch_optional(conn)
            .await?,
    )
}

/// Queued task items belonging to `ticket_id`, queue then position order.
pub(crate) async fn queued_task_rows_for_ticket(
    conn: &mut SqliteConnection,
    ticket_id: i64,
) -> Result<Vec<QueueItemRow>, QueueError> {
    Ok(sqlx::query_as(
        "SELECT * FROM queue_items
         WHERE item_type = 'task' AND parent_ticket_id = ? AND status = 'queued'
           AND queue_id IS NOT NULL
         ORDER BY queue_id ASC, position ASC",
    )
    .bind(ticket_id)
    .fetch_all(conn)
    .await?)
}

/// Insert a fresh item row and return it.
pub(crate) async fn insert_item_row(
    conn: &mut SqliteConnection,
    work: WorkRef,
    queue_id: Option<i64>,
    position: Option<i64>,
    priority: i64,
) -> Result<QueueItemRow, QueueError> {
    let (ticket_id, task_id, parent_ticket_id) = match work {
        WorkRef::Ticket { ticket_id } => (Some(ticket_id), None, None),
        WorkRef::Task {
            task_id,
            parent_ticket_id,
        } => (None, Some(task_id), Some(parent_ticket_id)),
    };
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO queue_items \
         (queue_id, item_type, ticket_id, task_id, parent_ticket_id, position, status, priority, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, 'queued', ?, ?) \
         RETURNING id",
    )
    .bind(queue_id)
    .bind(work.item_type())
    .bind(ticket_id)
    .bind(task_id)
    .bind(parent_ticket_id)
    .bind(position)
    .bind(priority)
    .bind(now_ts())
    .fetch_one(&mut *conn)
    .await?;
    item_row(conn, id)
        .await?
        .ok_or_else(|| QueueError::StorageUnavailable("inserted queue item vanished".into()))
}

/// Place a pool row into `queue_id` at `position` with the given priority.
pub(crate) async fn place_pool_row(
    conn: &mut SqliteConnection,
    item_id: i64,
    queue_id: i64,
    position: i64,
    priority: i64,
) -> Result<(), QueueError> {
    sqlx::query("UPDATE queue_items SET queue_id = ?, position = ?, priority = ? WHERE id = ?")
        .bind(queue_id)
        .bind(position)
        .bind(priority)
        .bind(item_id)
        .execute(conn)
        .await?;
    Ok(())
}

/// Return a placed row to the unqueued pool (queue and position cleared).
pub(crate) async fn return_row_to_pool(
    conn: &mut SqliteConnection,
    item_id: i64,
) -> Result<(), QueueError> {
    sqlx::query("UPDATE queue_items SET queue_id = NULL, position = NULL WHERE id = ?")
        .bind(item_id)
        .execute(conn)
        .await?;
    Ok(())
}

/// Take one row out of its queue slot, closing the position gap. Works on
/// the current row snapshot; transaction scope only.
pub(crate) async fn unplace_row(
    conn: &mut SqliteConnection,
    row: &QueueItemRow,
) -> Result<(), QueueError> {
    if let (Some(queue_id), Some(position)) = (row.queue_id, row.position) {
        return_row_to_pool(&mut *conn, row.id).await?;
        ordering::close_gap(conn, queue_id, position).await?;
    }
    Ok(())
}

// ─── Public item store API ───────────────────────────────────────────────────

impl QueueStore {
    /// Create item(s) per `spec`. Returns the created items in placement
    /// order (ticket first, then its tasks when `include_tasks` is set).
    pub async fn create_item(&self, spec: CreateItemSpec) -> Result<Vec<QueueItem>, QueueError> {
        if spec.include_tasks && matches!(spec.work, WorkRef::Task { .. }) {
            return Err(QueueError::Validation(
                "include_tasks only applies to ticket items".into(),
            ));
        }
        with_timeout(self.create_item_inner(spec)).await
    }

    async fn create_item_inner(&self, spec: CreateItemSpec) -> Result<Vec<QueueItem>, QueueError> {
        // Resolve the work refs before opening the write transaction.
        let mut refs: Vec<WorkRef> = Vec::new();
        match spec.work {
            WorkRef::Ticket { ticket_id } => {
                self.resolve_ticket(ticket_id).await?;
                refs.push(spec.work);
                if spec.include_tasks {
                    for task in self.resolve_ticket_tasks(ticket_id).await? {
                        refs.push(WorkRef::Task {
                            task_id: task.id,
                            parent_ticket_id: ticket_id,
                        });
                    }
                }
            }
            WorkRef::Task { task_id, .. } => {
                let task = self.resolve_task(task_id).await?;
                refs.push(WorkRef::Task {
                    task_id: task.id,
                    parent_ticket_id: task.ticket_id,
                });
            }
        }

        let mut tx = self.pool().begin().await?;
        if let Some(queue_id) = spec.queue_id {
            if queue_row(&mut tx, queue_id).await?.is_none() {
                return Err(QueueError::not_found("queue", queue_id));
            }
        }

        let mut created = Vec::with_capacity(refs.len());
        for work in refs {
            ensure_untracked(&mut tx, work).await?;
            let position = match spec.queue_id {
                Some(queue_id) => Some(ordering::next_position(&mut tx, queue_id).await?),
                None => None,
            };
            let row = insert_item_row(&mut tx, work, spec.queue_id, position, spec.priority).await?;
            record_event(
                &mut tx,
                row.id,
                spec.queue_id,
                EventKind::Enqueued,
                None,
                Some(ItemStatus::Queued),
                None,
                None,
            )
            .await?;
            created.push(into_item(row)?);
        }
        tx.commit().await?;
        Ok(created)
    }

    pub async fn get_item(&self, id: i64) -> Result<QueueItem, QueueError> {
        with_timeout(async {
            let row: Option<QueueItemRow> = sqlx::query_as("SELECT * FROM queue_items WHERE id = ?")
                .bind(id)
                .fetch_optional(self.pool())
                .await?;
            into_item(row.ok_or_else(|| QueueError::not_found("queue item", id))?)
        })
        .await
    }

    /// Items placed in `queue_id`, position ascending.
    pub async fn list_items(
        &self,
        queue_id: i64,
        status: Option<ItemStatus>,
    ) -> Result<Vec<QueueItem>, QueueError> {
        with_timeout(async {
            let rows: Vec<QueueItemRow> = match status {
                Some(s) => {
                    sqlx::query_as(
                        "SELECT * FROM queue_items WHERE queue_id = ? AND status = ? ORDER BY position ASC",
                    )
                    .bind(queue_id)
                    .bind(s.as_str())
                    .fetch_all(self.pool())
                    .await?
                }
                None => {
                    sqlx::query_as("SELECT * FROM queue_items WHERE queue_id = ? ORDER BY position ASC")
                        .bind(queue_id)
                        .fetch_all(self.pool())
                        .await?
                }
            };
            rows.into_iter().map(into_item).collect()
        })
        .await
    }

    /// The unqueued pool, creation order (the pool is otherwise unordered).
    pub async fn list_unqueued(
        &self,
        status: Option<ItemStatus>,
    ) -> Result<Vec<QueueItem>, QueueError> {
        with_timeout(async {
            let rows: Vec<QueueItemRow> = match status {
                Some(s) => {
                    sqlx::query_as(
                        "SELECT * FROM queue_items WHERE queue_id IS NULL AND status = ?
                         ORDER BY created_at ASC, id ASC",
                    )
                    .bind(s.as_str())
                    .fetch_all(self.pool())
                    .await?
                }
                None => {
                    sqlx::query_as(
                        "SELECT * FROM queue_items WHERE queue_id IS NULL ORDER BY created_at ASC, id ASC",
                    )
                    .fetch_all(self.pool())
                    .await?
                }
            };
            rows.into_iter().map(into_item).collect()
        })
        .await
    }

    /// Hard-delete one item. Closes the source queue's position gap; the
    /// underlying ticket/task record is untouched. Deleted items no longer
    /// contribute to any statistics (stats are derived on read).
    pub async fn delete_item(&self, id: i64) -> Result<(), QueueError> {
        with_timeout(async {
            let mut tx = self.pool().begin().await?;
            let row = item_row(&mut tx, id)
                .await?
                .ok_or_else(|| QueueError::not_found("queue item", id))?;
            let queue_id = row.queue_id;
            let from_status = ItemStatus::parse(&row.status);
            sqlx::query("DELETE FROM queue_items WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            if let (Some(q), Some(p)) = (row.queue_id, row.position) {
                ordering::close_gap(&mut tx, q, p).await?;
            }
            record_event(
                &mut tx,
                id,
                queue_id,
                EventKind::Deleted,
                from_status,
                None,
                None,
                None,
            )
            .await?;
            tx.commit().await?;
            Ok(())
        })
        .await
    }

    // ─── Directory resolution ────────────────────────────────────────────────

    pub(crate) async fn resolve_ticket(
        &self,
        ticket_id: i64,
    ) -> Result<crate::tickets::TicketRow, QueueError> {
        self.tickets()
            .get_ticket(ticket_id)
            .await
            .map_err(|e| QueueError::StorageUnavailable(e.to_string()))?
            .ok_or_else(|| QueueError::not_found("ticket", ticket_id))
    }

    pub(crate) async fn resolve_task(
        &self,
        task_id: i64,
    ) -> Result<crate::tickets::TaskRow, QueueError> {
        self.tickets()
            .get_task(task_id)
            .await
            .map_err(|e| QueueError::StorageUnavailable(e.to_string()))?
            .ok_or_else(|| QueueError::not_found("task", task_id))
    }

    pub(crate) async fn resolve_ticket_tasks(
        &self,
        ticket_id: i64,
    ) -> Result<Vec<crate::tickets::TaskRow>, QueueError> {
        self.tickets()
            .get_tasks_for_ticket(ticket_id)
            .await
            .map_err(|e| QueueError::StorageUnavailable(e.to_string()))
    }
}

/// Reject creation when the ticket/task already has a live item row.
pub(crate) async fn ensure_untracked(
    conn: &mut SqliteConnection,
    work: WorkRef,
) -> Result<(), QueueError> {
    let existing = match work {
        WorkRef::Ticket { ticket_id } => item_row_for_ticket(conn, ticket_id).await?,
        WorkRef::Task { task_id, .. } => item_row_for_task(conn, task_id).await?,
    };
    if let Some(row) = existing {
        return Err(QueueError::Conflict(format!(
            "{} is already tracked by queue item {}",
            describe_work(work),
            row.id
        )));
    }
    Ok(())
}

pub(crate) fn describe_work(work: WorkRef) -> String {
    match work {
        WorkRef::Ticket { ticket_id } => format!("ticket {ticket_id}"),
        WorkRef::Task { task_id, .. } => format!("task {task_id}"),
    }
}

pub(crate) async fn queue_row(
    conn: &mut SqliteConnection,
    queue_id: i64,
) -> Result<Option<super::model::Queue>, QueueError> {
    Ok(sqlx::query_as("SELECT * FROM queues WHERE id = ?")
        .bind(queue_id)
        .fetch_optional(conn)
        .await?)
}
