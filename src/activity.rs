use chrono::Utc;
use tracing::warn;
use uuid::Uuid;

use crate::db::{ActivityKind, Database, DbActivityEvent};

/// Append-only audit log of pipeline side effects.
///
/// The engine only ever writes here; `recent` exists for an outer layer
/// that wants to show a history feed. A failed write is logged and
/// swallowed: losing an audit line must never fail the operation that
/// produced it.
#[derive(Clone)]
pub struct ActivityLog {
    database: Database,
}

impl ActivityLog {
    pub fn new(database: Database) -> Self {
        Self { database }
    }

    pub async fn record(&self, kind: ActivityKind, book_id: Option<&str>, message: &str) {
        let event = DbActivityEvent {
            id: Uuid::new_v4().to_string(),
            kind,
            book_id: book_id.map(|id| id.to_string()),
            message: message.to_string(),
            created_at: Utc::now(),
        };

        if let Err(e) = self.database.insert_activity(&event).await {
            warn!("ActivityLog: failed to record '{}': {}", message, e);
        }
    }

    /// Convenience for configuration-fatal and unexpected errors
    pub async fn error(&self, book_id: Option<&str>, message: &str) {
        self.record(ActivityKind::Error, book_id, message).await;
    }

    /// Recent events, newest first
    pub async fn recent(&self, limit: i64) -> Result<Vec<DbActivityEvent>, sqlx::Error> {
        self.database.recent_activity(limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_record_and_read_back() {
        let temp = TempDir::new().unwrap();
        let db = Database::new(temp.path().join("test.db").to_str().unwrap())
            .await
            .unwrap();
        let log = ActivityLog::new(db);

        log.record(ActivityKind::Grabbed, Some("book-1"), "Grabbed release X")
            .await;
        log.error(None, "no download client configured").await;

        let events = log.recent(10).await.unwrap();
        assert_eq!(events.len(), 2);
        // Newest first
        assert_eq!(events[0].kind, ActivityKind::Error);
        assert_eq!(events[1].kind, ActivityKind::Grabbed);
        assert_eq!(events[1].book_id.as_deref(), Some("book-1"));
    }
}
