//! Sifu Storage crate - the knowledge store and its persistence backends.
//!
//! Entries are served from memory and ranked lexically (plus an optional
//! semantic term). Every mutation writes a snapshot through a pluggable
//! backend: a JSON file, or a WAL-mode SQLite database with migrations.

pub mod backend;
pub mod db;
pub mod migrations;
pub mod ranking;
pub mod sqlite;
pub mod store;

pub use backend::{JsonFileBackend, KnowledgeBackend};
pub use db::Database;
pub use ranking::Ranker;
pub use sqlite::SqliteBackend;
pub use store::{Applied, KnowledgeStore};
