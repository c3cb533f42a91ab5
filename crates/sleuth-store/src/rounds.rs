use std::fmt::Write as _;

use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use sleuth_core::ids::SessionId;
use sleuth_core::plan::{Plan, RunResult, SessionHistory};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// Status written for every step of a round that reached the ledger.
pub const STEP_STATUS_COMPLETED: &str = "completed";

/// Everything one finished round hands to the ledger.
#[derive(Clone, Copy, Debug)]
pub struct NewRound<'a> {
    pub user_query: &'a str,
    pub plan: &'a Plan,
    pub result: &'a RunResult,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoundRow {
    pub id: i64,
    pub session_id: SessionId,
    pub round_num: u32,
    pub user_query: String,
    pub plan: Plan,
    pub table_schema: String,
    pub report: String,
    pub findings: String,
    pub operation_log: String,
    pub created_at: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRow {
    pub step_id: i64,
    pub intent: String,
    pub findings: Option<String>,
    pub actions: Option<String>,
    pub status: String,
}

pub struct RoundRepo {
    db: Database,
}

impl RoundRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Persist a round and its step rows atomically. Returns the new round
    /// number, assigned sequentially per session from 1.
    #[instrument(skip(self, round), fields(session_id = %session_id))]
    pub fn save_round(&self, session_id: &SessionId, round: NewRound<'_>) -> Result<u32, StoreError> {
        let plan_json = serde_json::to_string(round.plan)?;
        let now = row_helpers::now_timestamp();

        self.db.with_tx(|tx| {
            let known: Option<i64> = tx
                .query_row("SELECT 1 FROM sessions WHERE id = ?1", [session_id.as_str()], |row| row.get(0))
                .optional()?;
            if known.is_none() {
                return Err(StoreError::NotFound(format!("session {session_id}")));
            }

            let round_num: u32 = tx.query_row(
                "SELECT COALESCE(MAX(round_num), 0) + 1 FROM rounds WHERE session_id = ?1",
                [session_id.as_str()],
                |row| row.get(0),
            )?;

            tx.execute(
                "INSERT INTO rounds (session_id, round_num, user_query, plan_json, table_schema,
                                     report, findings, operation_log, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                rusqlite::params![
                    session_id.as_str(),
                    round_num,
                    round.user_query,
                    plan_json,
                    round.plan.table_schema,
                    round.result.report,
                    round.result.findings,
                    round.result.operation_log,
                    now,
                ],
            )?;
            let round_id = tx.last_insert_rowid();

            let mut stmt = tx.prepare(
                "INSERT INTO steps (round_id, step_id, intent, findings, actions, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for step in &round.plan.steps {
                let output = round.result.steps.iter().find(|o| o.step_id == step.step_id);
                stmt.execute(rusqlite::params![
                    round_id,
                    step.step_id,
                    step.intent,
                    output.map(|o| o.findings.as_str()),
                    output.map(|o| o.actions.as_str()),
                    STEP_STATUS_COMPLETED,
                ])?;
            }

            tx.execute(
                "UPDATE sessions SET updated_at = ?1 WHERE id = ?2",
                rusqlite::params![now, session_id.as_str()],
            )?;

            debug!(round_num, steps = round.plan.steps.len(), "round saved");
            Ok(round_num)
        })
    }

    /// All rounds of a session, oldest first.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub fn list(&self, session_id: &SessionId) -> Result<Vec<RoundRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, session_id, round_num, user_query, plan_json, table_schema,
                        report, findings, operation_log, created_at
                 FROM rounds WHERE session_id = ?1 ORDER BY round_num ASC",
            )?;
            let mut rows = stmt.query([session_id.as_str()])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_round(row)?);
            }
            Ok(results)
        })
    }

    #[instrument(skip(self))]
    pub fn list_steps(&self, round_id: i64) -> Result<Vec<StepRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT step_id, intent, findings, actions, status
                 FROM steps WHERE round_id = ?1 ORDER BY id ASC",
            )?;
            let mut rows = stmt.query([round_id])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(StepRow {
                    step_id: row_helpers::get(row, 0, "steps", "step_id")?,
                    intent: row_helpers::get(row, 1, "steps", "intent")?,
                    findings: row_helpers::get_opt(row, 2, "steps", "findings")?,
                    actions: row_helpers::get_opt(row, 3, "steps", "actions")?,
                    status: row_helpers::get(row, 4, "steps", "status")?,
                });
            }
            Ok(results)
        })
    }

    /// Fold every round of the session, in round order, into planner context.
    /// Recomputed on every call.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub fn load_history(&self, session_id: &SessionId) -> Result<SessionHistory, StoreError> {
        let mut history = SessionHistory::default();
        for round in self.list(session_id)? {
            if !round.findings.is_empty() {
                let _ = write!(history.findings, "## Round {}\n{}\n\n", round.round_num, round.findings);
            }
            if !round.operation_log.is_empty() {
                let _ = write!(
                    history.operation_log,
                    "## Round {}\n{}\n\n",
                    round.round_num, round.operation_log
                );
            }
            if !round.report.is_empty() {
                history.all_reports.push(round.report.clone());
                history.previous_report = round.report;
            }
        }
        Ok(history)
    }
}

fn row_to_round(row: &rusqlite::Row<'_>) -> Result<RoundRow, StoreError> {
    let plan_json: String = row_helpers::get(row, 4, "rounds", "plan_json")?;
    Ok(RoundRow {
        id: row_helpers::get(row, 0, "rounds", "id")?,
        session_id: SessionId::from_raw(row_helpers::get::<String>(row, 1, "rounds", "session_id")?),
        round_num: row_helpers::get(row, 2, "rounds", "round_num")?,
        user_query: row_helpers::get(row, 3, "rounds", "user_query")?,
        plan: row_helpers::parse_json(&plan_json, "rounds", "plan_json")?,
        table_schema: row_helpers::get(row, 5, "rounds", "table_schema")?,
        report: row_helpers::get(row, 6, "rounds", "report")?,
        findings: row_helpers::get(row, 7, "rounds", "findings")?,
        operation_log: row_helpers::get(row, 8, "rounds", "operation_log")?,
        created_at: row_helpers::get(row, 9, "rounds", "created_at")?,
    })
}
