use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use sleuth_core::ids::SessionId;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionRow {
    pub id: SessionId,
    pub pcap_path: String,
    pub created_at: String,
    pub updated_at: String,
}

pub struct SessionRepo {
    db: Database,
}

impl SessionRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a new session bound to one capture file.
    #[instrument(skip(self))]
    pub fn create(&self, pcap_path: &str) -> Result<SessionRow, StoreError> {
        let id = SessionId::new();
        let now = row_helpers::now_timestamp();

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sessions (id, pcap_path, created_at, updated_at) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![id.as_str(), pcap_path, now, now],
            )?;

            Ok(SessionRow {
                id,
                pcap_path: pcap_path.to_string(),
                created_at: now.clone(),
                updated_at: now,
            })
        })
    }

    #[instrument(skip(self), fields(session_id = %id))]
    pub fn get(&self, id: &SessionId) -> Result<SessionRow, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, pcap_path, created_at, updated_at FROM sessions WHERE id = ?1",
            )?;
            let mut rows = stmt.query([id.as_str()])?;
            match rows.next()? {
                Some(row) => row_to_session(row),
                None => Err(StoreError::NotFound(format!("session {id}"))),
            }
        })
    }

    #[instrument(skip(self), fields(session_id = %id))]
    pub fn exists(&self, id: &SessionId) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row("SELECT 1 FROM sessions WHERE id = ?1", [id.as_str()], |row| row.get(0))
                .optional()?;
            Ok(found.is_some())
        })
    }

    /// Bump `updated_at` to now.
    #[instrument(skip(self), fields(session_id = %id))]
    pub fn touch(&self, id: &SessionId) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE sessions SET updated_at = ?1 WHERE id = ?2",
                rusqlite::params![row_helpers::now_timestamp(), id.as_str()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("session {id}")));
            }
            Ok(())
        })
    }

    #[instrument(skip(self), fields(session_id = %id))]
    pub fn round_count(&self, id: &SessionId) -> Result<u32, StoreError> {
        self.db.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM rounds WHERE session_id = ?1",
                [id.as_str()],
                |row| row.get(0),
            )?)
        })
    }

    /// Most recently active sessions first.
    #[instrument(skip(self))]
    pub fn list_recent(&self, limit: u32) -> Result<Vec<SessionRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, pcap_path, created_at, updated_at FROM sessions
                 ORDER BY updated_at DESC, id DESC LIMIT ?1",
            )?;
            let mut rows = stmt.query([limit])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_session(row)?);
            }
            Ok(results)
        })
    }
}

fn row_to_session(row: &rusqlite::Row<'_>) -> Result<SessionRow, StoreError> {
    Ok(SessionRow {
        id: SessionId::from_raw(row_helpers::get::<String>(row, 0, "sessions", "id")?),
        pcap_path: row_helpers::get(row, 1, "sessions", "pcap_path")?,
        created_at: row_helpers::get(row, 2, "sessions", "created_at")?,
        updated_at: row_helpers::get(row, 3, "sessions", "updated_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> SessionRepo {
        SessionRepo::new(Database::in_memory().unwrap())
    }

    #[test]
    fn create_and_get() {
        let repo = setup();
        let session = repo.create("/captures/dump.pcap").unwrap();
        assert!(session.id.as_str().starts_with("sess_"));

        let fetched = repo.get(&session.id).unwrap();
        assert_eq!(fetched.pcap_path, "/captures/dump.pcap");
        assert_eq!(fetched.created_at, session.created_at);
    }

    #[test]
    fn get_nonexistent_fails() {
        let repo = setup();
        let result = repo.get(&SessionId::from_raw("sess_nonexistent"));
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[test]
    fn exists_reports_presence() {
        let repo = setup();
        let session = repo.create("a.pcap").unwrap();
        assert!(repo.exists(&session.id).unwrap());
        assert!(!repo.exists(&SessionId::from_raw("sess_missing")).unwrap());
    }

    #[test]
    fn touch_updates_timestamp() {
        let repo = setup();
        let session = repo.create("a.pcap").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        repo.touch(&session.id).unwrap();
        let fetched = repo.get(&session.id).unwrap();
        assert!(fetched.updated_at > session.updated_at);
        assert!(repo.touch(&SessionId::from_raw("sess_missing")).is_err());
    }

    #[test]
    fn new_session_has_no_rounds() {
        let repo = setup();
        let session = repo.create("a.pcap").unwrap();
        assert_eq!(repo.round_count(&session.id).unwrap(), 0);
    }

    #[test]
    fn list_recent_orders_and_limits() {
        let repo = setup();
        let first = repo.create("one.pcap").unwrap();
        let _second = repo.create("two.pcap").unwrap();
        let _third = repo.create("three.pcap").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        repo.touch(&first.id).unwrap();

        let recent = repo.list_recent(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].id, first.id);
        assert_eq!(recent[1].pcap_path, "three.pcap");
    }
}
