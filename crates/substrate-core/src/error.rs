//! Crate-wide error types.
//!
//! Each fallible subsystem gets its own `thiserror` enum; this module holds the ones shared
//! across module boundaries (storage open/migration failures, which every caller eventually
//! has to handle).

use thiserror::Error;

/// Errors that can occur opening or migrating the storage engine.
///
/// Mirrors the fatal/degradable split in the error-handling design: variants here are either
/// fatal (abort startup) or represent a condition the caller explicitly chose to continue past
/// (`VectorIndexUnavailable` is recorded, never returned as an `Err`, once open succeeds).
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("migration {version} ({description}) failed: {source}")]
    Migration {
        version: i64,
        description: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    #[error("could not determine a data directory for this platform")]
    NoDataDir,

    #[error("not found")]
    NotFound,

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("content exceeds the 100,000 character limit ({0} chars)")]
    ContentTooLong(usize),

    #[error("content must not be empty")]
    EmptyContent,
}

pub type Result<T> = std::result::Result<T, StorageError>;
