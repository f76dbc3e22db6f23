//! Relational persistence, grounded in the teacher workspace's
//! `race-local-db` / `race-facade::db` pattern: a `rusqlite::Connection`
//! behind a `tokio::sync::Mutex`, one `CREATE TABLE IF NOT EXISTS` per
//! table, plain functions for CRUD, `#[tokio::test]` for coverage.
//!
//! SQLite's single-writer model stands in for "serializable isolation
//! with row locks" (spec.md §4.1): every status-guarded transition uses
//! an explicit `rusqlite::Transaction` opened in `IMMEDIATE` mode, which
//! takes the write lock up front the way a `SELECT ... FOR UPDATE` would.

mod accounts;
mod error;
mod escrow;
mod migrate;
mod moves;
mod payments;
mod players;
mod queue;
mod sessions;
mod time;
mod webhooks;
mod withdrawals;

pub use accounts::*;
pub use error::{StoreError, StoreResult};
pub use escrow::*;
pub use moves::*;
pub use payments::*;
pub use players::*;
pub use queue::*;
pub use sessions::*;
pub use webhooks::*;
pub use withdrawals::*;

use std::sync::Arc;

use rusqlite::Connection;
use tokio::sync::Mutex;

/// Handle to the persistent store. Cheap to clone; the connection is
/// shared behind a mutex the way `LocalDbStorage` shares its `Connection`.
#[derive(Clone)]
pub struct Store {
    pub(crate) conn: Arc<Mutex<Connection>>,
}

impl Store {
    pub fn try_new(path: &str) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        migrate::migrate(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn try_new_mem() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        migrate::migrate(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn opens_in_memory_and_migrates() {
        let store = Store::try_new_mem().unwrap();
        let conn = store.conn.lock().await;
        let count: i64 = conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type = 'table'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert!(count >= 10);
    }
}
