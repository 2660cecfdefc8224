use anyhow::{Context as _, Result};
use sqlx::{sqlite::SqliteConnectOptions, ConnectOptions, SqlitePool};
use std::{path::Path, str::FromStr};

#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    pub async fn new(data_dir: &Path) -> Result<Self> {
        Self::new_with_slow_query(data_dir, 0).await
    }

    /// Create storage with slow-query logging enabled.
    ///
    /// `slow_query_ms` is the threshold in milliseconds — queries exceeding
    /// it are logged at WARN level. Set to 0 to disable slow-query logging.
    pub async fn new_with_slow_query(data_dir: &Path, slow_query_ms: u64) -> Result<Self> {
        tokio::fs::create_dir_all(data_dir).await?;
        let db_path = data_dir.join("workqd.db");
        let mut opts =
            SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", db_path.display()))?
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
                .create_if_missing(true);

        if slow_query_ms > 0 {
            opts = opts.log_slow_statements(
                log::LevelFilter::Warn,
                std::time::Duration::from_millis(slow_query_ms),
            );
        }

        let pool = SqlitePool::connect_with(opts).await?;
        Self::bootstrap(&pool).await?;
        Ok(Self { pool })
    }

    /// Return a clone of the connection pool (cheap — Arc-backed).
    /// Used to create the queue store and ticket directory over the same
    /// SQLite connection.
    pub fn pool(&self) -> SqlitePool {
        self.pool.clone()
    }

    /// Idempotent schema bootstrap. SQLite lacks `ALTER TABLE IF NOT
    /// EXISTS`, so every statement is a `CREATE ... IF NOT EXISTS`.
    async fn bootstrap(pool: &SqlitePool) -> Result<()> {
        let stmts = [
            "CREATE TABLE IF NOT EXISTS queues (
                id                 INTEGER PRIMARY KEY AUTOINCREMENT,
                project_id         INTEGER NOT NULL,
                name               TEXT NOT NULL,
                description        TEXT,
                status             TEXT NOT NULL DEFAULT 'active',
                max_parallel_items INTEGER NOT NULL DEFAULT 1,
                created_at         INTEGER NOT NULL,
                updated_at         INTEGER NOT NULL,
                UNIQUE (project_id, name)
            )",
            "CREATE TABLE IF NOT EXISTS queue_items (
                id               INTEGER PRIMARY KEY AUTOINCREMENT,
                queue_id         INTEGER,
                item_type        TEXT NOT NULL,
                ticket_id        INTEGER,
                task_id          INTEGER,
                parent_ticket_id INTEGER,
                position         INTEGER,
                status           TEXT NOT NULL DEFAULT 'queued',
                priority         INTEGER NOT NULL DEFAULT 0,
                agent_id         TEXT,
                error_message    TEXT,
                created_at       INTEGER NOT NULL,
                started_at       INTEGER,
                completed_at     INTEGER
            )",
            "CREATE INDEX IF NOT EXISTS idx_queue_items_queue
                 ON queue_items (queue_id, position)",
            "CREATE INDEX IF NOT EXISTS idx_queue_items_status
                 ON queue_items (queue_id, status)",
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_queue_items_ticket
                 ON queue_items (ticket_id) WHERE item_type = 'ticket'",
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_queue_items_task
                 ON queue_items (task_id) WHERE item_type = 'task'",
            "CREATE TABLE IF NOT EXISTS tickets (
                id         INTEGER PRIMARY KEY,
                project_id INTEGER NOT NULL,
                title      TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS tasks (
                id         INTEGER PRIMARY KEY,
                ticket_id  INTEGER NOT NULL,
                title      TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_tasks_ticket ON tasks (ticket_id)",
            "CREATE TABLE IF NOT EXISTS queue_events (
                id          TEXT PRIMARY KEY,
                item_id     INTEGER NOT NULL,
                queue_id    INTEGER,
                event_type  TEXT NOT NULL,
                from_status TEXT,
                to_status   TEXT,
                agent_id    TEXT,
                detail      TEXT,
                created_at  INTEGER NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_queue_events_item
                 ON queue_events (item_id, created_at)",
        ];
        for stmt in stmts {
            sqlx::query(stmt)
                .execute(pool)
                .await
                .context("schema bootstrap statement failed")?;
        }
        Ok(())
    }
}
