use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::field::{Field, Visit};
use tracing::span;
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

/// A log record persisted to SQLite.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogRecord {
    pub id: i64,
    pub timestamp: String,
    pub level: String,
    pub target: String,
    pub message: String,
    pub fields: Option<String>,
    pub span_id: Option<String>,
    pub session_id: Option<String>,
    pub phase: Option<String>,
    pub step_id: Option<i64>,
}

/// Query parameters for searching persisted logs.
#[derive(Clone, Debug, Default)]
pub struct LogQuery {
    pub level: Option<String>,
    pub target: Option<String>,
    pub session_id: Option<String>,
    pub phase: Option<String>,
    pub since: Option<String>,
    pub limit: Option<u32>,
}

/// SQLite sink that persists warn+ logs.
pub struct SqliteLogSink {
    conn: Mutex<Connection>,
}

impl SqliteLogSink {
    pub fn new(db_path: &Path) -> Result<Self, rusqlite::Error> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(db_path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             CREATE TABLE IF NOT EXISTS logs (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 timestamp TEXT NOT NULL,
                 level TEXT NOT NULL,
                 target TEXT NOT NULL,
                 message TEXT NOT NULL,
                 fields TEXT,
                 span_id TEXT,
                 session_id TEXT,
                 phase TEXT,
                 step_id INTEGER,
                 created_at TEXT NOT NULL DEFAULT (datetime('now'))
             );
             CREATE INDEX IF NOT EXISTS idx_logs_level ON logs(level);
             CREATE INDEX IF NOT EXISTS idx_logs_session ON logs(session_id);
             CREATE INDEX IF NOT EXISTS idx_logs_timestamp ON logs(timestamp);",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn insert(&self, record: &LogInsert) {
        let conn = self.conn.lock();
        // A failed log write has nowhere better to go.
        let _ = conn.execute(
            "INSERT INTO logs (timestamp, level, target, message, fields, span_id, session_id, phase, step_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            rusqlite::params![
                record.timestamp,
                record.level,
                record.target,
                record.message,
                record.fields,
                record.span_id,
                record.session_id,
                record.phase,
                record.step_id,
            ],
        );
    }

    pub fn query(&self, q: &LogQuery) -> Result<Vec<LogRecord>, rusqlite::Error> {
        let conn = self.conn.lock();
        let mut sql = String::from(
            "SELECT id, timestamp, level, target, message, fields, span_id, session_id, phase, step_id
             FROM logs WHERE 1=1",
        );
        let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(level) = &q.level {
            sql.push_str(&format!(" AND level = ?{}", params.len() + 1));
            params.push(Box::new(level.clone()));
        }
        if let Some(target) = &q.target {
            sql.push_str(&format!(" AND target LIKE ?{}", params.len() + 1));
            params.push(Box::new(format!("%{target}%")));
        }
        if let Some(session_id) = &q.session_id {
            sql.push_str(&format!(" AND session_id = ?{}", params.len() + 1));
            params.push(Box::new(session_id.clone()));
        }
        if let Some(phase) = &q.phase {
            sql.push_str(&format!(" AND phase = ?{}", params.len() + 1));
            params.push(Box::new(phase.clone()));
        }
        if let Some(since) = &q.since {
            sql.push_str(&format!(" AND timestamp >= ?{}", params.len() + 1));
            params.push(Box::new(since.clone()));
        }

        sql.push_str(" ORDER BY id DESC");

        let limit = q.limit.unwrap_or(100);
        sql.push_str(&format!(" LIMIT {limit}"));

        let param_refs: Vec<&dyn rusqlite::types::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(param_refs.as_slice(), |row| {
            Ok(LogRecord {
                id: row.get(0)?,
                timestamp: row.get(1)?,
                level: row.get(2)?,
                target: row.get(3)?,
                message: row.get(4)?,
                fields: row.get(5)?,
                span_id: row.get(6)?,
                session_id: row.get(7)?,
                phase: row.get(8)?,
                step_id: row.get(9)?,
            })
        })?;

        rows.collect()
    }

    pub fn count(&self) -> Result<i64, rusqlite::Error> {
        let conn = self.conn.lock();
        conn.query_row("SELECT COUNT(*) FROM logs", [], |row| row.get(0))
    }
}

struct LogInsert {
    timestamp: String,
    level: String,
    target: String,
    message: String,
    fields: Option<String>,
    span_id: Option<String>,
    session_id: Option<String>,
    phase: Option<String>,
    step_id: Option<i64>,
}

/// tracing Layer that writes warn+ events to SQLite.
pub struct SqliteLogLayer {
    sink: Arc<SqliteLogSink>,
}

impl SqliteLogLayer {
    pub fn new(sink: Arc<SqliteLogSink>) -> Self {
        Self { sink }
    }
}

/// Round context carried on spans and inherited by child events.
#[derive(Clone, Default)]
struct SpanFields {
    session_id: Option<String>,
    phase: Option<String>,
    step_id: Option<i64>,
}

impl SpanFields {
    fn is_empty(&self) -> bool {
        self.session_id.is_none() && self.phase.is_none() && self.step_id.is_none()
    }

    fn fill_from(&mut self, other: &SpanFields) {
        if self.session_id.is_none() {
            self.session_id.clone_from(&other.session_id);
        }
        if self.phase.is_none() {
            self.phase.clone_from(&other.phase);
        }
        if self.step_id.is_none() {
            self.step_id = other.step_id;
        }
    }
}

struct FieldVisitor {
    message: Option<String>,
    fields: serde_json::Map<String, serde_json::Value>,
    context: SpanFields,
}

impl FieldVisitor {
    fn new() -> Self {
        Self {
            message: None,
            fields: serde_json::Map::new(),
            context: SpanFields::default(),
        }
    }

    fn record_text(&mut self, name: &str, value: String) {
        match name {
            "message" => self.message = Some(value),
            "session_id" => self.context.session_id = Some(value),
            "phase" => self.context.phase = Some(value),
            "step_id" => match value.parse() {
                Ok(n) => self.context.step_id = Some(n),
                Err(_) => {
                    self.fields.insert(name.to_string(), serde_json::Value::String(value));
                }
            },
            _ => {
                self.fields.insert(name.to_string(), serde_json::Value::String(value));
            }
        }
    }
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let val = format!("{:?}", value);
        let val = if field.name() == "message" {
            val
        } else {
            val.trim_matches('"').to_string()
        };
        self.record_text(field.name(), val);
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.record_text(field.name(), value.to_string());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        if field.name() == "step_id" {
            self.context.step_id = Some(value);
        } else {
            self.fields
                .insert(field.name().to_string(), serde_json::Value::Number(value.into()));
        }
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        if field.name() == "step_id" {
            self.context.step_id = i64::try_from(value).ok();
        } else {
            self.fields
                .insert(field.name().to_string(), serde_json::Value::Number(value.into()));
        }
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        if let Some(n) = serde_json::Number::from_f64(value) {
            self.fields
                .insert(field.name().to_string(), serde_json::Value::Number(n));
        }
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields
            .insert(field.name().to_string(), serde_json::Value::Bool(value));
    }
}

impl<S> Layer<S> for SqliteLogLayer
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fn on_event(&self, event: &tracing::Event<'_>, ctx: Context<'_, S>) {
        let level = *event.metadata().level();
        if level > tracing::Level::WARN {
            return;
        }

        let mut visitor = FieldVisitor::new();
        event.record(&mut visitor);

        // Innermost span wins for each missing field.
        if let Some(scope) = ctx.event_scope(event) {
            for span in scope {
                if let Some(fields) = span.extensions().get::<SpanFields>() {
                    visitor.context.fill_from(fields);
                }
            }
        }

        let span_id = ctx
            .event_scope(event)
            .and_then(|mut scope| scope.next())
            .map(|span| format!("{:?}", span.id()));

        let fields_json = if visitor.fields.is_empty() {
            None
        } else {
            serde_json::to_string(&visitor.fields).ok()
        };

        let record = LogInsert {
            timestamp: Utc::now().to_rfc3339(),
            level: level.to_string().to_uppercase(),
            target: event.metadata().target().to_string(),
            message: visitor.message.unwrap_or_default(),
            fields: fields_json,
            span_id,
            session_id: visitor.context.session_id,
            phase: visitor.context.phase,
            step_id: visitor.context.step_id,
        };

        self.sink.insert(&record);
    }

    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let mut visitor = FieldVisitor::new();
        attrs.record(&mut visitor);

        if !visitor.context.is_empty() {
            if let Some(span) = ctx.span(id) {
                span.extensions_mut().insert(visitor.context);
            }
        }
    }

    fn on_record(&self, id: &span::Id, values: &span::Record<'_>, ctx: Context<'_, S>) {
        let mut visitor = FieldVisitor::new();
        values.record(&mut visitor);
        if visitor.context.is_empty() {
            return;
        }
        if let Some(span) = ctx.span(id) {
            let mut extensions = span.extensions_mut();
            match extensions.get_mut::<SpanFields>() {
                Some(existing) => {
                    // Late-recorded values overwrite what the span opened with.
                    let mut merged = visitor.context;
                    merged.fill_from(existing);
                    *existing = merged;
                }
                None => extensions.insert(visitor.context),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;

    fn temp_sink() -> (tempfile::TempDir, Arc<SqliteLogSink>) {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(SqliteLogSink::new(&dir.path().join("logs.db")).unwrap());
        (dir, sink)
    }

    fn insert(sink: &SqliteLogSink, level: &str, message: &str, session: Option<&str>, phase: Option<&str>) {
        sink.insert(&LogInsert {
            timestamp: Utc::now().to_rfc3339(),
            level: level.into(),
            target: "sleuth_engine::executor".into(),
            message: message.into(),
            fields: None,
            span_id: None,
            session_id: session.map(String::from),
            phase: phase.map(String::from),
            step_id: None,
        });
    }

    #[test]
    fn query_filters_compose() {
        let (_dir, sink) = temp_sink();
        insert(&sink, "WARN", "retrying", Some("sess_a"), Some("planner"));
        insert(&sink, "ERROR", "step failed", Some("sess_a"), Some("executor"));
        insert(&sink, "ERROR", "other session", Some("sess_b"), Some("executor"));

        assert_eq!(sink.count().unwrap(), 3);

        let errors = sink
            .query(&LogQuery {
                level: Some("ERROR".into()),
                session_id: Some("sess_a".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message, "step failed");

        let planner = sink
            .query(&LogQuery {
                phase: Some("planner".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(planner.len(), 1);
        assert_eq!(planner[0].message, "retrying");
    }

    #[test]
    fn query_limit_newest_first() {
        let (_dir, sink) = temp_sink();
        for i in 0..10 {
            insert(&sink, "WARN", &format!("msg {i}"), None, None);
        }
        let results = sink
            .query(&LogQuery {
                limit: Some(3),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].message, "msg 9");
    }

    #[test]
    fn layer_persists_warn_with_span_context() {
        let (_dir, sink) = temp_sink();
        let subscriber = tracing_subscriber::registry().with(SqliteLogLayer::new(sink.clone()));

        tracing::subscriber::with_default(subscriber, || {
            let round = tracing::info_span!("round", session_id = "sess_abc");
            let _r = round.enter();
            let step = tracing::info_span!("step", phase = "executor", step_id = 3i64);
            let _s = step.enter();
            tracing::info!("routine progress");
            tracing::warn!(attempt = 2u64, "agent call failed");
        });

        let rows = sink.query(&LogQuery::default()).unwrap();
        assert_eq!(rows.len(), 1, "info must not be persisted");
        let row = &rows[0];
        assert_eq!(row.level, "WARN");
        assert_eq!(row.message, "agent call failed");
        assert_eq!(row.session_id.as_deref(), Some("sess_abc"));
        assert_eq!(row.phase.as_deref(), Some("executor"));
        assert_eq!(row.step_id, Some(3));
        assert!(row.fields.as_deref().unwrap_or_default().contains("\"attempt\":2"));
    }

    #[test]
    fn event_fields_override_span_fields() {
        let (_dir, sink) = temp_sink();
        let subscriber = tracing_subscriber::registry().with(SqliteLogLayer::new(sink.clone()));

        tracing::subscriber::with_default(subscriber, || {
            let span = tracing::info_span!("round", session_id = "sess_outer", phase = "planner");
            let _g = span.enter();
            tracing::error!(phase = "final", "synthesis failed");
        });

        let rows = sink.query(&LogQuery::default()).unwrap();
        assert_eq!(rows[0].phase.as_deref(), Some("final"));
        assert_eq!(rows[0].session_id.as_deref(), Some("sess_outer"));
    }
}
