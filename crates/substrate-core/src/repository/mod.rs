//! Repository layer.
//!
//! One repository per entity family, each bound at construction to `(connection, project_hash)`.
//! Every query implicitly scopes to that project; nothing here ever takes a project hash as a
//! per-call argument. Repositories are cheap to construct and hold no connection ownership, so
//! callers create and discard them per request rather than keeping them alive across ticks.

pub mod debug_paths;
pub mod graph;
pub mod notifications;
pub mod observations;
pub mod sessions;
pub mod stashes;
pub mod threshold;
pub mod tool_registry;

pub use debug_paths::DebugPathRepository;
pub use graph::GraphRepository;
pub use notifications::NotificationRepository;
pub use observations::{ListFilter, ObservationRepository};
pub use sessions::SessionRepository;
pub use stashes::StashRepository;
pub use threshold::ThresholdRepository;
pub use tool_registry::ToolRegistryRepository;

use rusqlite::Connection;

use crate::error::Result;

/// Default page size for paginated `list` calls.
pub const DEFAULT_LIST_LIMIT: i64 = 20;

/// Hard ceiling on `list` calls regardless of what the caller requests.
pub const MAX_LIST_LIMIT: i64 = 100;

pub(crate) fn clamp_limit(requested: Option<i64>) -> i64 {
    requested.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT)
}

/// Run `body` inside an explicit `BEGIN IMMEDIATE` write transaction: commits on success, rolls
/// back on any error. Every multi-statement write in this crate goes through this helper rather
/// than `rusqlite::Transaction`'s default deferred-mode `BEGIN`, because a deferred transaction
/// that later upgrades to a write lock can bypass `busy_timeout` and fail instantly instead of
/// waiting — exactly the bug the concurrency model's "never read-then-write in deferred mode"
/// rule exists to prevent.
pub(crate) fn immediate_transaction<T>(
    conn: &Connection,
    body: impl FnOnce() -> Result<T>,
) -> Result<T> {
    conn.execute_batch("BEGIN IMMEDIATE;")?;
    match body() {
        Ok(value) => {
            conn.execute_batch("COMMIT;")?;
            Ok(value)
        }
        Err(err) => {
            let _ = conn.execute_batch("ROLLBACK;");
            Err(err)
        }
    }
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn parse_timestamp(s: &str) -> Result<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(|e| crate::error::StorageError::InvalidTimestamp(format!("{s}: {e}")))
}

/// Generate a stable, opaque 16-hex-character text identifier (the format every entity's `id`
/// column uses), independent of the project hash so ids never collide in meaning with one.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_id_is_sixteen_hex_chars() {
        let id = new_id();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn clamp_limit_applies_default_and_ceiling() {
        assert_eq!(clamp_limit(None), DEFAULT_LIST_LIMIT);
        assert_eq!(clamp_limit(Some(1000)), MAX_LIST_LIMIT);
        assert_eq!(clamp_limit(Some(0)), 1);
    }
}
