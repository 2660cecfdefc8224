//! Lifecycle Engine: the item status state machine, queue capacity
//! enforcement, enqueue/dequeue, moves and retries.
//!
//! Every mutation here runs inside one transaction. Status flips are
//! additionally guarded (`WHERE id = ? AND status = ?`) so two racing
//! writers cannot both apply conflicting terminal states; the loser sees
//! zero affected rows and gets a `Conflict`.

use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use tracing::debug;

use super::error::QueueError;
use super::events::{record_event, EventKind};
use super::items::{
    self, into_item, item_row, item_row_for_task, item_row_for_ticket, place_pool_row, queue_row,
    queued_task_rows_for_ticket,
};
use super::model::{valid_transition, ItemStatus, QueueItem, QueueItemRow, QueueStatus, WorkRef};
use super::{now_ts, ordering, with_timeout, QueueStore};

/// One entry of a `batch_update_status` request.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusUpdate {
    pub item_id: i64,
    pub status: ItemStatus,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

/// Per-item outcome of a batch update. One failed entry never aborts the
/// rest of the batch.
#[derive(Debug, Serialize)]
pub struct BatchOutcome {
    pub item_id: i64,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item: Option<QueueItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<BatchError>,
}

#[derive(Debug, Serialize)]
pub struct BatchError {
    pub code: &'static str,
    pub message: String,
}

fn parse_status(row: &QueueItemRow) -> Result<ItemStatus, QueueError> {
    ItemStatus::parse(&row.status).ok_or_else(|| {
        QueueError::StorageUnavailable(format!(
            "queue item {}: unknown status '{}'",
            row.id, row.status
        ))
    })
}

async fn row_or_not_found(
    conn: &mut SqliteConnection,
    item_id: i64,
) -> Result<QueueItemRow, QueueError> {
    item_row(conn, item_id)
        .await?
        .ok_or_else(|| QueueError::not_found("queue item", item_id))
}

/// Place one work ref into `queue_id`: adopt its pool row when one exists,
/// insert a fresh row otherwise. Already-placed work is a conflict.
async fn place_work(
    conn: &mut SqliteConnection,
    work: WorkRef,
    queue_id: i64,
    priority: i64,
) -> Result<i64, QueueError> {
    let existing = match work {
        WorkRef::Ticket { ticket_id } => item_row_for_ticket(conn, ticket_id).await?,
        WorkRef::Task { task_id, .. } => item_row_for_task(conn, task_id).await?,
    };
    match existing {
        None => {
            let position = ordering::next_position(conn, queue_id).await?;
            let row = items::insert_item_row(conn, work, Some(queue_id), Some(position), priority)
                .await?;
            record_event(
                conn,
                row.id,
                Some(queue_id),
                EventKind::Enqueued,
                None,
                Some(ItemStatus::Queued),
                None,
                None,
            )
            .await?;
            Ok(row.id)
        }
        Some(row) if row.queue_id.is_none() && row.status == "queued" => {
            let position = ordering::next_position(conn, queue_id).await?;
            place_pool_row(conn, row.id, queue_id, position, priority).await?;
            record_event(
                conn,
                row.id,
                Some(queue_id),
                EventKind::Enqueued,
                Some(ItemStatus::Queued),
                Some(ItemStatus::Queued),
                None,
                None,
            )
            .await?;
            Ok(row.id)
        }
        Some(row) => Err(QueueError::Conflict(format!(
            "{} is already tracked by queue item {} (status {})",
            items::describe_work(work),
            row.id,
            row.status
        ))),
    }
}

/// Unplace rows from their queue slots, highest position first so each
/// snapshot position stays valid while earlier gaps close.
async fn unplace_rows(
    conn: &mut SqliteConnection,
    rows: &mut [QueueItemRow],
) -> Result<(), QueueError> {
    rows.sort_by_key(|r| (r.queue_id, std::cmp::Reverse(r.position)));
    for row in rows.iter() {
        if row.queue_id.is_none() {
            continue;
        }
        items::unplace_row(conn, row).await?;
        record_event(
            conn,
            row.id,
            row.queue_id,
            EventKind::Dequeued,
            ItemStatus::parse(&row.status),
            ItemStatus::parse(&row.status),
            None,
            None,
        )
        .await?;
    }
    Ok(())
}

async fn refreshed_items(
    conn: &mut SqliteConnection,
    ids: &[i64],
) -> Result<Vec<QueueItem>, QueueError> {
    let mut out = Vec::with_capacity(ids.len());
    for id in ids {
        let row = row_or_not_found(conn, *id).await?;
        out.push(into_item(row)?);
    }
    Ok(out)
}

impl QueueStore {
    // ─── Enqueue ─────────────────────────────────────────────────────────────

    /// Enqueue a ticket (and, with `include_tasks`, all of its tasks) into
    /// `queue_id`. Pool items are adopted in place; work already placed in
    /// any queue is a conflict and aborts the whole enqueue.
    pub async fn enqueue_ticket(
        &self,
        ticket_id: i64,
        queue_id: i64,
        priority: i64,
        include_tasks: bool,
    ) -> Result<Vec<QueueItem>, QueueError> {
        self.resolve_ticket(ticket_id).await?;
        let tasks = if include_tasks {
            self.resolve_ticket_tasks(ticket_id).await?
        } else {
            Vec::new()
        };

        with_timeout(async {
            let mut tx = self.pool().begin().await?;
            if queue_row(&mut tx, queue_id).await?.is_none() {
                return Err(QueueError::not_found("queue", queue_id));
            }

            let mut placed = Vec::with_capacity(1 + tasks.len());
            placed.push(place_work(&mut tx, WorkRef::Ticket { ticket_id }, queue_id, priority).await?);
            for task in &tasks {
                let work = WorkRef::Task {
                    task_id: task.id,
                    parent_ticket_id: ticket_id,
                };
                placed.push(place_work(&mut tx, work, queue_id, priority).await?);
            }

            let created = refreshed_items(&mut tx, &placed).await?;
            tx.commit().await?;
            debug!(ticket_id, queue_id, items = created.len(), "ticket enqueued");
            Ok(created)
        })
        .await
    }

    /// Enqueue a single task. Fails with a conflict when the task's parent
    /// ticket is itself an active (non-terminal) item in a different queue;
    /// a ticket's work must not silently split across queues.
    pub async fn enqueue_task(
        &self,
        task_id: i64,
        queue_id: i64,
        priority: i64,
    ) -> Result<QueueItem, QueueError> {
        let task = self.resolve_task(task_id).await?;

        with_timeout(async {
            let mut tx = self.pool().begin().await?;
            if queue_row(&mut tx, queue_id).await?.is_none() {
                return Err(QueueError::not_found("queue", queue_id));
            }

            if let Some(parent) = item_row_for_ticket(&mut tx, task.ticket_id).await? {
                let parent_active = ItemStatus::parse(&parent.status)
                    .map(|s| !s.is_terminal())
                    .unwrap_or(false);
                if parent_active && parent.queue_id.is_some() && parent.queue_id != Some(queue_id) {
                    return Err(QueueError::Conflict(format!(
                        "parent ticket {} is queued elsewhere (queue {})",
                        task.ticket_id,
                        parent.queue_id.unwrap_or_default()
                    )));
                }
            }

            let work = WorkRef::Task {
                task_id,
                parent_ticket_id: task.ticket_id,
            };
            let id = place_work(&mut tx, work, queue_id, priority).await?;
            let item = refreshed_items(&mut tx, &[id]).await?.remove(0);
            tx.commit().await?;
            debug!(task_id, queue_id, "task enqueued");
            Ok(item)
        })
        .await
    }

    // ─── Dequeue ─────────────────────────────────────────────────────────────

    /// Return a ticket's queued item and all of its currently-queued task
    /// items to the unqueued pool, atomically. An untracked or already
    /// unqueued ticket is a no-op returning the empty list. An in-progress
    /// ticket item must be cancelled first.
    pub async fn dequeue_ticket(&self, ticket_id: i64) -> Result<Vec<QueueItem>, QueueError> {
        with_timeout(async {
            let mut tx = self.pool().begin().await?;
            let mut rows: Vec<QueueItemRow> = Vec::new();

            if let Some(row) = item_row_for_ticket(&mut tx, ticket_id).await? {
                match ItemStatus::parse(&row.status) {
                    Some(ItemStatus::InProgress) if row.queue_id.is_some() => {
                        return Err(QueueError::Conflict(format!(
                            "ticket {ticket_id} is in progress (item {}); cancel it first",
                            row.id
                        )));
                    }
                    Some(ItemStatus::Queued) if row.queue_id.is_some() => rows.push(row),
                    _ => {}
                }
            }
            rows.extend(queued_task_rows_for_ticket(&mut tx, ticket_id).await?);

            let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
            unplace_rows(&mut tx, &mut rows).await?;
            let moved = refreshed_items(&mut tx, &ids).await?;
            tx.commit().await?;
            Ok(moved)
        })
        .await
    }

    /// Single-task dequeue with the same no-op and in-progress policies as
    /// [`QueueStore::dequeue_ticket`].
    pub async fn dequeue_task(&self, task_id: i64) -> Result<Vec<QueueItem>, QueueError> {
        with_timeout(async {
            let mut tx = self.pool().begin().await?;
            let mut rows: Vec<QueueItemRow> = Vec::new();
            if let Some(row) = item_row_for_task(&mut tx, task_id).await? {
                match ItemStatus::parse(&row.status) {
                    Some(ItemStatus::InProgress) if row.queue_id.is_some() => {
                        return Err(QueueError::Conflict(format!(
                            "task {task_id} is in progress (item {}); cancel it first",
                            row.id
                        )));
                    }
                    Some(ItemStatus::Queued) if row.queue_id.is_some() => rows.push(row),
                    _ => {}
                }
            }
            let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
            unplace_rows(&mut tx, &mut rows).await?;
            let moved = refreshed_items(&mut tx, &ids).await?;
            tx.commit().await?;
            Ok(moved)
        })
        .await
    }

    // ─── Move / reorder ──────────────────────────────────────────────────────

    /// Move an item (and, for a placed ticket item, its queued task items
    /// from the same queue) to another queue or back to the unqueued pool
    /// (`target_queue_id = None`). Group items keep their relative order and
    /// land contiguously at `position` (append when `None`). In-progress
    /// items cannot move. A same-queue target repositions the item only.
    pub async fn move_item(
        &self,
        item_id: i64,
        target_queue_id: Option<i64>,
        position: Option<i64>,
        priority: Option<i64>,
    ) -> Result<Vec<QueueItem>, QueueError> {
        with_timeout(async {
            let mut tx = self.pool().begin().await?;
            let row = row_or_not_found(&mut tx, item_id).await?;
            let status = parse_status(&row)?;
            if status == ItemStatus::InProgress {
                return Err(QueueError::Conflict(format!(
                    "queue item {item_id} is in progress; cancel it or wait for completion"
                )));
            }

            // Same-queue move is a reorder of the single item.
            if target_queue_id.is_some() && target_queue_id == row.queue_id {
                let queue_id = row.queue_id.unwrap_or_default();
                let len = ordering::queue_len(&mut tx, queue_id).await?;
                let target = position.unwrap_or(len - 1);
                if let Some(from) = row.position {
                    if let Some(plan) = ordering::plan_reorder(len, from, target) {
                        ordering::apply_reorder(&mut tx, queue_id, item_id, plan).await?;
                        record_event(
                            &mut tx,
                            item_id,
                            Some(queue_id),
                            EventKind::Reordered,
                            Some(status),
                            Some(status),
                            None,
                            None,
                        )
                        .await?;
                    }
                }
                let moved = refreshed_items(&mut tx, &[item_id]).await?;
                tx.commit().await?;
                return Ok(moved);
            }

            // The move group: a placed ticket item drags its queued task
            // items from the same queue along, ticket first.
            let mut group: Vec<QueueItemRow> = vec![row.clone()];
            if row.item_type == "ticket" {
                if let (Some(ticket_id), Some(source)) = (row.ticket_id, row.queue_id) {
                    for task_row in queued_task_rows_for_ticket(&mut tx, ticket_id).await? {
                        if task_row.queue_id == Some(source) {
                            group.push(task_row);
                        }
                    }
                }
            }
            let ids: Vec<i64> = group.iter().map(|r| r.id).collect();

            match target_queue_id {
                None => {
                    if status != ItemStatus::Queued {
                        return Err(QueueError::Conflict(format!(
                            "queue item {item_id} is {status}; only queued items return to the unqueued pool"
                        )));
                    }
                    unplace_rows(&mut tx, &mut group).await?;
                    if let Some(p) = priority {
                        for id in &ids {
                            sqlx::query("UPDATE queue_items SET priority = ? WHERE id = ?")
                                .bind(p)
                                .bind(id)
                                .execute(&mut *tx)
                                .await?;
                        }
                    }
                }
                Some(target) => {
                    if queue_row(&mut tx, target).await?.is_none() {
                        return Err(QueueError::not_found("queue", target));
                    }
                    let mut unplaced = group.clone();
                    unplace_rows(&mut tx, &mut unplaced).await?;

                    let len = ordering::queue_len(&mut tx, target).await?;
                    let at = position.map(|p| p.clamp(0, len)).unwrap_or(len);
                    ordering::open_gap(&mut tx, target, at, ids.len() as i64).await?;
                    for (offset, moved_row) in group.iter().enumerate() {
                        place_pool_row(
                            &mut tx,
                            moved_row.id,
                            target,
                            at + offset as i64,
                            priority.unwrap_or(moved_row.priority),
                        )
                        .await?;
                        record_event(
                            &mut tx,
                            moved_row.id,
                            Some(target),
                            EventKind::Moved,
                            ItemStatus::parse(&moved_row.status),
                            ItemStatus::parse(&moved_row.status),
                            None,
                            moved_row.queue_id.map(|q| format!("from queue {q}")).as_deref(),
                        )
                        .await?;
                    }
                }
            }

            let moved = refreshed_items(&mut tx, &ids).await?;
            tx.commit().await?;
            debug!(item_id, ?target_queue_id, moved = moved.len(), "item moved");
            Ok(moved)
        })
        .await
    }

    /// Reposition an item within its queue. Stable move-and-renumber:
    /// intervening items shift by one, positions stay contiguous. The
    /// target index is clamped to the queue bounds.
    pub async fn reorder_item(&self, item_id: i64, new_position: i64) -> Result<QueueItem, QueueError> {
        with_timeout(async {
            let mut tx = self.pool().begin().await?;
            let row = row_or_not_found(&mut tx, item_id).await?;
            let status = parse_status(&row)?;
            let (queue_id, from) = match (row.queue_id, row.position) {
                (Some(q), Some(p)) => (q, p),
                _ => {
                    return Err(QueueError::Validation(format!(
                        "queue item {item_id} is unqueued; the pool has no order"
                    )))
                }
            };
            let len = ordering::queue_len(&mut tx, queue_id).await?;
            if let Some(plan) = ordering::plan_reorder(len, from, new_position) {
                ordering::apply_reorder(&mut tx, queue_id, item_id, plan).await?;
                record_event(
                    &mut tx,
                    item_id,
                    Some(queue_id),
                    EventKind::Reordered,
                    Some(status),
                    Some(status),
                    None,
                    None,
                )
                .await?;
            }
            let item = refreshed_items(&mut tx, &[item_id]).await?.remove(0);
            tx.commit().await?;
            Ok(item)
        })
        .await
    }

    // ─── Status transitions ──────────────────────────────────────────────────

    /// Apply one status transition, enforcing the state machine, queue
    /// pause and the `max_parallel_items` cap. Cancelling an item that is
    /// already terminal is an idempotent no-op. `agent_id` is recorded on
    /// entry to `in_progress`; `error_message` on entry to `failed` or
    /// `timeout`.
    pub async fn update_status(
        &self,
        item_id: i64,
        new_status: ItemStatus,
        agent_id: Option<&str>,
        error_message: Option<&str>,
    ) -> Result<QueueItem, QueueError> {
        with_timeout(async {
            let mut tx = self.pool().begin().await?;
            let row = row_or_not_found(&mut tx, item_id).await?;
            let from = parse_status(&row)?;

            if new_status == ItemStatus::Cancelled && from.is_terminal() {
                // Repeated cancellation is harmless.
                return into_item(row);
            }
            if !valid_transition(from, new_status) {
                return Err(QueueError::InvalidTransition {
                    from,
                    to: new_status,
                });
            }

            if new_status == ItemStatus::InProgress {
                let queue_id = row.queue_id.ok_or_else(|| {
                    QueueError::Conflict(format!(
                        "queue item {item_id} is unqueued; enqueue it before starting"
                    ))
                })?;
                let queue = queue_row(&mut tx, queue_id)
                    .await?
                    .ok_or_else(|| QueueError::not_found("queue", queue_id))?;
                if queue.status() == QueueStatus::Paused {
                    return Err(QueueError::Conflict(format!(
                        "queue {queue_id} is paused; no new items may start"
                    )));
                }
                let in_progress: i64 = sqlx::query_scalar(
                    "SELECT COUNT(*) FROM queue_items WHERE queue_id = ? AND status = 'in_progress'",
                )
                .bind(queue_id)
                .fetch_one(&mut *tx)
                .await?;
                if in_progress >= queue.max_parallel_items {
                    return Err(QueueError::CapacityExceeded {
                        queue_id,
                        limit: queue.max_parallel_items,
                    });
                }
            }

            let now = now_ts();
            let started_at = if new_status == ItemStatus::InProgress {
                Some(now)
            } else {
                row.started_at
            };
            let completed_at = if new_status.is_terminal() {
                Some(now)
            } else {
                row.completed_at
            };
            let agent = agent_id.map(str::to_owned).or_else(|| row.agent_id.clone());
            let error = error_message
                .map(str::to_owned)
                .or_else(|| row.error_message.clone());

            let affected = sqlx::query(
                "UPDATE queue_items SET status = ?, agent_id = ?, error_message = ?, \
                 started_at = ?, completed_at = ? \
                 WHERE id = ? AND status = ?",
            )
            .bind(new_status.as_str())
            .bind(&agent)
            .bind(&error)
            .bind(started_at)
            .bind(completed_at)
            .bind(item_id)
            .bind(from.as_str())
            .execute(&mut *tx)
            .await?
            .rows_affected();
            if affected == 0 {
                return Err(QueueError::Conflict(format!(
                    "queue item {item_id} was modified concurrently"
                )));
            }

            record_event(
                &mut tx,
                item_id,
                row.queue_id,
                EventKind::StatusChanged,
                Some(from),
                Some(new_status),
                agent.as_deref(),
                error_message,
            )
            .await?;
            let item = refreshed_items(&mut tx, &[item_id]).await?.remove(0);
            tx.commit().await?;
            debug!(item_id, from = %from, to = %new_status, "status changed");
            Ok(item)
        })
        .await
    }

    /// Claim the most urgent queued item of a queue for `agent_id` and mark
    /// it in progress: highest priority value first, then lowest position.
    /// Returns `Ok(None)` when nothing is claimable right now (empty queue,
    /// paused queue, or the parallelism cap is filled).
    pub async fn claim_next(
        &self,
        queue_id: i64,
        agent_id: &str,
    ) -> Result<Option<QueueItem>, QueueError> {
        with_timeout(async {
            let mut tx = self.pool().begin().await?;
            let queue = queue_row(&mut tx, queue_id)
                .await?
                .ok_or_else(|| QueueError::not_found("queue", queue_id))?;
            if queue.status() == QueueStatus::Paused {
                return Ok(None);
            }
            let in_progress: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM queue_items WHERE queue_id = ? AND status = 'in_progress'",
            )
            .bind(queue_id)
            .fetch_one(&mut *tx)
            .await?;
            if in_progress >= queue.max_parallel_items {
                return Ok(None);
            }

            let candidate: Option<QueueItemRow> = sqlx::query_as(
                "SELECT * FROM queue_items WHERE queue_id = ? AND status = 'queued' \
                 ORDER BY priority DESC, position ASC LIMIT 1",
            )
            .bind(queue_id)
            .fetch_optional(&mut *tx)
            .await?;
            let Some(row) = candidate else {
                return Ok(None);
            };

            let affected = sqlx::query(
                "UPDATE queue_items SET status = 'in_progress', agent_id = ?, started_at = ? \
                 WHERE id = ? AND status = 'queued'",
            )
            .bind(agent_id)
            .bind(now_ts())
            .bind(row.id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
            if affected == 0 {
                return Err(QueueError::Conflict(format!(
                    "queue item {} was claimed concurrently",
                    row.id
                )));
            }

            record_event(
                &mut tx,
                row.id,
                Some(queue_id),
                EventKind::Claimed,
                Some(ItemStatus::Queued),
                Some(ItemStatus::InProgress),
                Some(agent_id),
                None,
            )
            .await?;
            let item = refreshed_items(&mut tx, &[row.id]).await?.remove(0);
            tx.commit().await?;
            debug!(queue_id, item_id = item.id, agent_id, "item claimed");
            Ok(Some(item))
        })
        .await
    }

    /// Reset a failed/cancelled/timeout item back to `queued`. Clears agent,
    /// error and both timestamps. A placed item re-enters at the back of its
    /// queue so repeated failures never starve the items behind it.
    pub async fn retry(&self, item_id: i64) -> Result<QueueItem, QueueError> {
        with_timeout(async {
            let mut tx = self.pool().begin().await?;
            let row = row_or_not_found(&mut tx, item_id).await?;
            let from = parse_status(&row)?;
            if !matches!(
                from,
                ItemStatus::Failed | ItemStatus::Cancelled | ItemStatus::Timeout
            ) {
                return Err(QueueError::InvalidTransition {
                    from,
                    to: ItemStatus::Queued,
                });
            }

            let new_position = match (row.queue_id, row.position) {
                (Some(queue_id), Some(position)) => {
                    sqlx::query("UPDATE queue_items SET position = NULL WHERE id = ?")
                        .bind(item_id)
                        .execute(&mut *tx)
                        .await?;
                    ordering::close_gap(&mut tx, queue_id, position).await?;
                    Some(ordering::next_position(&mut tx, queue_id).await?)
                }
                _ => None,
            };

            let affected = sqlx::query(
                "UPDATE queue_items SET status = 'queued', error_message = NULL, agent_id = NULL, \
                 started_at = NULL, completed_at = NULL, position = ? \
                 WHERE id = ? AND status = ?",
            )
            .bind(new_position)
            .bind(item_id)
            .bind(from.as_str())
            .execute(&mut *tx)
            .await?
            .rows_affected();
            if affected == 0 {
                return Err(QueueError::Conflict(format!(
                    "queue item {item_id} was modified concurrently"
                )));
            }

            record_event(
                &mut tx,
                item_id,
                row.queue_id,
                EventKind::Retried,
                Some(from),
                Some(ItemStatus::Queued),
                None,
                None,
            )
            .await?;
            let item = refreshed_items(&mut tx, &[item_id]).await?.remove(0);
            tx.commit().await?;
            debug!(item_id, from = %from, "item reset for retry");
            Ok(item)
        })
        .await
    }

    /// Apply `update_status` to each entry, collecting per-item outcomes.
    /// Each entry is independently atomic; the batch as a whole is not.
    pub async fn batch_update_status(&self, updates: Vec<StatusUpdate>) -> Vec<BatchOutcome> {
        let mut results = Vec::with_capacity(updates.len());
        for update in updates {
            let outcome = self
                .update_status(
                    update.item_id,
                    update.status,
                    update.agent_id.as_deref(),
                    update.error_message.as_deref(),
                )
                .await;
            results.push(match outcome {
                Ok(item) => BatchOutcome {
                    item_id: update.item_id,
                    ok: true,
                    item: Some(item),
                    error: None,
                },
                Err(e) => BatchOutcome {
                    item_id: update.item_id,
                    ok: false,
                    item: None,
                    error: Some(BatchError {
                        code: e.code(),
                        message: e.to_string(),
                    }),
                },
            });
        }
        results
    }
}
