mod schema;
pub mod queries;

pub use schema::init_db;

use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::agenda::AgendaGrant;
use crate::config::Config;
use crate::notify::Notify;

pub type DbPool = Pool<SqliteConnectionManager>;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub config: Arc<Config>,
    /// Outbound grant client for the external Agenda system
    pub agenda: Arc<dyn AgendaGrant>,
    /// Transactional email / ops alert dispatcher (best-effort)
    pub notifier: Arc<dyn Notify>,
}

pub fn create_pool(database_path: &str) -> Result<DbPool, r2d2::Error> {
    let manager = SqliteConnectionManager::file(database_path);
    Pool::builder().max_size(10).build(manager)
}

/// In-memory pool for tests. Uses a single connection so every handle sees
/// the same database.
pub fn create_memory_pool() -> Result<DbPool, r2d2::Error> {
    let manager = SqliteConnectionManager::memory();
    Pool::builder().max_size(1).build(manager)
}
