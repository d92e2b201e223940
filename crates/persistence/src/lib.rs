#![deny(warnings)]

//! Persistence layer: the state store the economy commits into, and the
//! batch sync that copies dirty users into SQLite.

pub mod codec;
pub mod sqlite;
pub mod store;
pub mod sync;

pub use sqlite::{init_db, init_memory_db, SqliteSink, StoredUser};
pub use store::{MemoryStore, StateStore};
pub use sync::{FlushReport, SyncWorker, UserSnapshot};

/// Returns the default SQLite URL used for durable snapshots.
pub fn default_sqlite_url() -> &'static str {
    "sqlite://./saves/economy.db"
}
