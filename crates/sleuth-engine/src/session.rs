use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use sleuth_core::agent::Agent;
use sleuth_core::events::{Emitter, Event, EventType, InfoData};
use sleuth_core::ids::SessionId;
use sleuth_core::plan::{Plan, RunResult, SessionHistory};
use sleuth_store::{Ledger, NewRound, StoreError};

use crate::error::RoundError;
use crate::executor::{ExecParams, Executor, ExecutorConfig};
use crate::planner::{PlanParams, Planner};

/// Shared collaborators every session is built from.
#[derive(Clone)]
pub struct SessionDeps {
    pub ledger: Arc<Ledger>,
    pub agent: Arc<dyn Agent>,
    pub emitter: Arc<dyn Emitter>,
    pub executor: ExecutorConfig,
}

/// What one round produced. The report survives a failed ledger write;
/// `ledger_error` says why it was not persisted.
#[derive(Debug)]
pub struct RoundOutcome {
    pub plan: Plan,
    pub result: RunResult,
    pub round_num: Option<u32>,
    pub ledger_error: Option<StoreError>,
}

impl RoundOutcome {
    pub fn persisted(&self) -> bool {
        self.ledger_error.is_none()
    }
}

/// One investigation over a single capture. Rounds run one at a time:
/// round N is saved before round N+1 reads history.
pub struct Session {
    id: SessionId,
    pcap_path: String,
    ledger: Arc<Ledger>,
    emitter: Arc<dyn Emitter>,
    planner: Planner,
    executor: Executor,
}

impl Session {
    pub fn create(deps: SessionDeps, pcap_path: &str) -> Result<Self, StoreError> {
        let id = deps.ledger.create_session(pcap_path)?;
        Ok(Self::build(deps, id, pcap_path.to_string()))
    }

    /// Reopen an existing session; fails with `NotFound` for an unknown id.
    pub fn resume(deps: SessionDeps, session_id: SessionId) -> Result<Self, StoreError> {
        let row = deps.ledger.session(&session_id)?;
        let rounds = deps.ledger.round_count(&session_id)?;
        info!(session_id = %session_id, rounds, pcap_path = %row.pcap_path, "session resumed");
        Ok(Self::build(deps, session_id, row.pcap_path))
    }

    fn build(deps: SessionDeps, id: SessionId, pcap_path: String) -> Self {
        Self {
            planner: Planner::new(deps.agent.clone(), deps.emitter.clone()),
            executor: Executor::new(deps.agent, deps.emitter.clone(), deps.executor),
            ledger: deps.ledger,
            emitter: deps.emitter,
            id,
            pcap_path,
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn pcap_path(&self) -> &str {
        &self.pcap_path
    }

    /// Context from all saved rounds, or `None` before the first one.
    pub fn history(&self) -> Result<Option<SessionHistory>, StoreError> {
        self.ledger.load_history(&self.id)
    }

    /// Plan, execute and persist one round. Nothing is saved unless the
    /// executor produced a result.
    #[instrument(skip(self, user_query, cancel), fields(session_id = %self.id))]
    pub async fn run_round(&self, user_query: &str, cancel: &CancellationToken) -> Result<RoundOutcome, RoundError> {
        let history = self.history()?;
        self.emitter.emit(Event::new(
            EventType::Info,
            Some(&self.id),
            InfoData {
                message: match &history {
                    Some(h) => format!("planning with context from {} previous round(s)", h.all_reports.len()),
                    None => "planning first round".to_string(),
                },
            },
        ));

        let plan = self
            .planner
            .run(PlanParams {
                user_query,
                pcap_path: &self.pcap_path,
                history: history.as_ref(),
                session_id: Some(&self.id),
                cancel,
            })
            .await?;

        let result = self
            .executor
            .run(ExecParams {
                plan: &plan,
                user_query,
                pcap_path: &self.pcap_path,
                session_id: Some(&self.id),
                cancel,
            })
            .await?;

        let saved = self.ledger.save_round(
            &self.id,
            NewRound {
                user_query,
                plan: &plan,
                result: &result,
            },
        );
        let (round_num, ledger_error) = match saved {
            Ok(n) => {
                info!(round_num = n, "round saved");
                (Some(n), None)
            }
            Err(e) => {
                warn!(error = %e, "round finished but was not saved");
                (None, Some(e))
            }
        };

        Ok(RoundOutcome {
            plan,
            result,
            round_num,
            ledger_error,
        })
    }
}
