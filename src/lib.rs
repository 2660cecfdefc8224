pub mod config;
pub mod queue;
pub mod rest;
pub mod storage;
pub mod tickets;

use std::sync::Arc;

use config::DaemonConfig;
use queue::QueueStore;
use storage::Storage;
use tickets::SqliteTicketDirectory;

/// Shared application state passed to every REST handler.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<DaemonConfig>,
    pub storage: Arc<Storage>,
    /// Queue domain store (queues, queue_items, queue_events).
    pub queues: QueueStore,
    /// Mirror of the external ticket/task domain; ingest surface for sync.
    pub tickets: Arc<SqliteTicketDirectory>,
    pub started_at: std::time::Instant,
}

impl AppContext {
    /// Wire the full context over one storage handle.
    pub fn new(config: Arc<DaemonConfig>, storage: Arc<Storage>) -> Self {
        let tickets = Arc::new(SqliteTicketDirectory::new(storage.pool()));
        let queues = QueueStore::new(storage.pool(), tickets.clone());
        Self {
            config,
            storage,
            queues,
            tickets,
            started_at: std::time::Instant::now(),
        }
    }
}
