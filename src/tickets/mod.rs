//! Read-only contract to the external ticket/task domain.
//!
//! The queue core resolves ticket existence and a ticket's task set through
//! [`TicketDirectory`]; it never owns or mutates ticket/task content. The
//! SQLite implementation reads a local mirror of the external records; the
//! `upsert_*` functions are the ingest surface the external system (and the
//! tests) use to keep that mirror current.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TicketRow {
    pub id: i64,
    pub project_id: i64,
    pub title: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TaskRow {
    pub id: i64,
    pub ticket_id: i64,
    pub title: String,
    pub created_at: i64,
}

/// Lookup seam between the queue core and the ticket domain.
#[async_trait]
pub trait TicketDirectory: Send + Sync {
    async fn get_ticket(&self, id: i64) -> Result<Option<TicketRow>>;

    async fn get_task(&self, id: i64) -> Result<Option<TaskRow>>;

    /// A ticket's tasks in stable (creation) order.
    async fn get_tasks_for_ticket(&self, ticket_id: i64) -> Result<Vec<TaskRow>>;
}

// ─── SQLite mirror ───────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct SqliteTicketDirectory {
    pool: SqlitePool,
}

fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

impl SqliteTicketDirectory {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Mirror a ticket record from the external system.
    pub async fn upsert_ticket(&self, id: i64, project_id: i64, title: &str) -> Result<TicketRow> {
        sqlx::query(
            "INSERT INTO tickets (id, project_id, title, created_at) VALUES (?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET project_id = excluded.project_id, title = excluded.title",
        )
        .bind(id)
        .bind(project_id)
        .bind(title)
        .bind(now_ts())
        .execute(&self.pool)
        .await?;
        Ok(sqlx::query_as("SELECT * FROM tickets WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await?)
    }

    /// Mirror a task record from the external system.
    pub async fn upsert_task(&self, id: i64, ticket_id: i64, title: &str) -> Result<TaskRow> {
        sqlx::query(
            "INSERT INTO tasks (id, ticket_id, title, created_at) VALUES (?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET ticket_id = excluded.ticket_id, title = excluded.title",
        )
        .bind(id)
        .bind(ticket_id)
        .bind(title)
        .bind(now_ts())
        .execute(&self.pool)
        .await?;
        Ok(sqlx::query_as("SELECT * FROM tasks WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await?)
    }
}

#[async_trait]
impl TicketDirectory for SqliteTicketDirectory {
    async fn get_ticket(&self, id: i64) -> Result<Option<TicketRow>> {
        Ok(sqlx::query_as("SELECT * FROM tickets WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn get_task(&self, id: i64) -> Result<Option<TaskRow>> {
        Ok(sqlx::query_as("SELECT * FROM tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn get_tasks_for_ticket(&self, ticket_id: i64) -> Result<Vec<TaskRow>> {
        Ok(
            sqlx::query_as("SELECT * FROM tasks WHERE ticket_id = ? ORDER BY created_at ASC, id ASC")
                .bind(ticket_id)
                .fetch_all(&self.pool)
                .await?,
        )
    }
}
