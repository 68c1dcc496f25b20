// SnapStore - Typed snapshot persistence for small single-document apps

pub mod config;
pub mod document;
pub mod domains;
pub mod error;
pub mod record;
pub mod sqlite;
pub mod storage;
pub mod store;
pub mod views;

// Re-export main types for convenience
pub use config::{Backend, Config};
pub use document::{Document, Holds, OnDelete, Relation};
pub use error::{Error, Refusal, Result, ValidationError};
pub use record::{Amount, Record};
pub use sqlite::SqliteStorage;
pub use storage::{FileStorage, MemoryStorage, Storage};
pub use store::{Removal, Store};

// Re-exported for the record macros
pub use chrono;
