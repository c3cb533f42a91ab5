use tokio::sync::mpsc;
use tracing::{debug, instrument, warn};

use sleuth_core::events::Event;
use sleuth_core::ids::{EventId, SessionId};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// A persisted lifecycle event.
#[derive(Clone, Debug)]
pub struct EventRow {
    pub id: EventId,
    pub event: Event,
}

pub struct EventRepo {
    db: Database,
}

impl EventRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self, event), fields(event_type = %event.event_type))]
    pub fn append(&self, event: &Event) -> Result<EventId, StoreError> {
        let id = EventId::new();
        let payload = serde_json::to_string(&event.data)?;
        let timestamp = event
            .timestamp
            .to_rfc3339_opts(chrono::SecondsFormat::Micros, true);

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO events (id, session_id, type, timestamp, payload) VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    id.as_str(),
                    event.session_id.as_ref().map(SessionId::as_str),
                    event.event_type.as_str(),
                    timestamp,
                    payload,
                ],
            )?;
            Ok(id)
        })
    }

    /// Events of one session in publication order.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub fn list_for_session(&self, session_id: &SessionId) -> Result<Vec<EventRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, session_id, type, timestamp, payload FROM events
                 WHERE session_id = ?1 ORDER BY timestamp ASC, rowid ASC",
            )?;
            let mut rows = stmt.query([session_id.as_str()])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_event(row)?);
            }
            Ok(results)
        })
    }
}

fn row_to_event(row: &rusqlite::Row<'_>) -> Result<EventRow, StoreError> {
    let type_str: String = row_helpers::get(row, 2, "events", "type")?;
    let timestamp: String = row_helpers::get(row, 3, "events", "timestamp")?;
    let payload: String = row_helpers::get(row, 4, "events", "payload")?;

    Ok(EventRow {
        id: EventId::from_raw(row_helpers::get::<String>(row, 0, "events", "id")?),
        event: Event {
            event_type: row_helpers::parse_enum(&type_str, "events", "type")?,
            session_id: row_helpers::get_opt::<String>(row, 1, "events", "session_id")?
                .map(SessionId::from_raw),
            timestamp: row_helpers::parse_timestamp(&timestamp, "events", "timestamp")?,
            data: row_helpers::parse_json(&payload, "events", "payload")?,
        },
    })
}

/// Drains one emitter subscription into the events table.
pub struct EventRecorder;

impl EventRecorder {
    /// Spawn the recording task. It ends when the emitter closes the channel
    /// and yields the number of events written. Write failures are logged
    /// and skipped.
    pub fn spawn(mut rx: mpsc::Receiver<Event>, repo: EventRepo) -> tokio::task::JoinHandle<usize> {
        tokio::spawn(async move {
            let mut written = 0;
            while let Some(event) = rx.recv().await {
                match repo.append(&event) {
                    Ok(_) => written += 1,
                    Err(e) => {
                        warn!(error = %e, event_type = %event.event_type, "failed to persist event");
                    }
                }
            }
            debug!(written, "event recorder stopped");
            written
        })
    }
}
