//! `status`: a health snapshot — version, storage mode, and unread notifications.

use serde_json::Value;
use std::sync::Arc;

use substrate_core::repository::{GraphRepository, NotificationRepository, ObservationRepository};
use substrate_core::Storage;

pub fn schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {}
    })
}

pub async fn execute(storage: &Arc<Storage>, project_hash: &str, _args: Option<Value>) -> Result<Value, String> {
    let counts = storage
        .with_connection(|conn| {
            let observation_count = ObservationRepository::new(conn, project_hash)
                .list(Default::default())
                .map(|rows| rows.len())?;
            let node_count = GraphRepository::new(conn, project_hash).node_count()?;
            let unread = NotificationRepository::new(conn, project_hash).list_unread(100)?;
            Ok((observation_count, node_count, unread.len()))
        })
        .map_err(|e| e.to_string())?;

    Ok(serde_json::json!({
        "version": substrate_core::VERSION,
        "projectHash": project_hash,
        "vectorSearchAvailable": storage.vector_available(),
        "recentObservationCount": counts.0,
        "graphNodeCount": counts.1,
        "unreadNotificationCount": counts.2,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_storage() -> (Arc<Storage>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(Storage::open(Some(dir.path().join("test.db"))).unwrap());
        (storage, dir)
    }

    #[tokio::test]
    async fn reports_version_and_project_hash() {
        let (storage, _dir) = test_storage();
        let result = execute(&storage, "proj-a", None).await.unwrap();
        assert_eq!(result["version"], substrate_core::VERSION);
        assert_eq!(result["projectHash"], "proj-a");
        assert_eq!(result["recentObservationCount"], 0);
    }
}
