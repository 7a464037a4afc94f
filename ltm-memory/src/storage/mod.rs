//! Storage backends for ltm-memory

mod sqlite;

pub use sqlite::SqliteStorage;
