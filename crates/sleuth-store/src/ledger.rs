use tracing::{info, instrument};

use sleuth_core::ids::SessionId;
use sleuth_core::plan::SessionHistory;

use crate::database::Database;
use crate::error::StoreError;
use crate::rounds::{NewRound, RoundRepo};
use crate::sessions::{SessionRepo, SessionRow};

/// Round/session ledger: the persistence contract the engine depends on.
pub struct Ledger {
    sessions: SessionRepo,
    rounds: RoundRepo,
}

impl Ledger {
    pub fn new(db: Database) -> Self {
        Self {
            sessions: SessionRepo::new(db.clone()),
            rounds: RoundRepo::new(db),
        }
    }

    pub fn sessions(&self) -> &SessionRepo {
        &self.sessions
    }

    pub fn rounds(&self) -> &RoundRepo {
        &self.rounds
    }

    pub fn create_session(&self, pcap_path: &str) -> Result<SessionId, StoreError> {
        let row = self.sessions.create(pcap_path)?;
        info!(session_id = %row.id, pcap_path, "session created");
        Ok(row.id)
    }

    pub fn session(&self, session_id: &SessionId) -> Result<SessionRow, StoreError> {
        self.sessions.get(session_id)
    }

    pub fn round_count(&self, session_id: &SessionId) -> Result<u32, StoreError> {
        self.sessions.round_count(session_id)
    }

    /// History folded from all prior rounds, or `None` before the first round.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub fn load_history(&self, session_id: &SessionId) -> Result<Option<SessionHistory>, StoreError> {
        if self.sessions.round_count(session_id)? == 0 {
            return Ok(None);
        }
        self.rounds.load_history(session_id).map(Some)
    }

    pub fn save_round(&self, session_id: &SessionId, round: NewRound<'_>) -> Result<u32, StoreError> {
        self.rounds.save_round(session_id, round)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sleuth_core::plan::{Plan, RunResult, Step};

    fn setup() -> Ledger {
        Ledger::new(Database::in_memory().unwrap())
    }

    fn save(ledger: &Ledger, id: &SessionId, findings: &str, report: &str) -> u32 {
        let plan = Plan {
            steps: vec![Step::new(1, "scan")],
            ..Default::default()
        };
        let result = RunResult {
            report: report.into(),
            findings: findings.into(),
            ..Default::default()
        };
        ledger
            .save_round(
                id,
                NewRound {
                    user_query: "q",
                    plan: &plan,
                    result: &result,
                },
            )
            .unwrap()
    }

    #[test]
    fn first_round_has_no_history() {
        let ledger = setup();
        let id = ledger.create_session("/tmp/x.pcap").unwrap();
        assert!(ledger.load_history(&id).unwrap().is_none());
    }

    #[test]
    fn third_round_sees_two_prior_rounds() {
        let ledger = setup();
        let id = ledger.create_session("/tmp/x.pcap").unwrap();
        assert_eq!(save(&ledger, &id, "F1", ""), 1);
        assert_eq!(save(&ledger, &id, "F2", "R2"), 2);

        let history = ledger.load_history(&id).unwrap().unwrap();
        assert_eq!(history.findings, "## Round 1\nF1\n\n## Round 2\nF2\n\n");
        assert_eq!(history.previous_report, "R2");
        assert_eq!(history.all_reports, vec!["R2".to_string()]);
        assert_eq!(ledger.round_count(&id).unwrap(), 2);
    }

    #[test]
    fn session_lookup() {
        let ledger = setup();
        let id = ledger.create_session("/tmp/x.pcap").unwrap();
        assert_eq!(ledger.session(&id).unwrap().pcap_path, "/tmp/x.pcap");
        assert!(ledger.session(&SessionId::from_raw("sess_nope")).is_err());
    }
}
