use sleuth_core::errors::AgentError;
use sleuth_core::json::NoJsonObject;
use sleuth_store::StoreError;

/// Pipeline phase an error was raised in. Rendered into events and logs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Planner,
    Executor,
    Final,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planner => "planner",
            Self::Executor => "executor",
            Self::Final => "final",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("planner agent failed: {0}")]
    Agent(#[source] AgentError),

    #[error("planner output has no json object: {0}")]
    Extract(#[from] NoJsonObject),

    #[error("planner output is not a valid plan: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("planning cancelled")]
    Cancelled,
}

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("{phase} agent failed at step {step_id}: {source}")]
    Agent {
        step_id: i64,
        phase: Phase,
        #[source]
        source: AgentError,
    },

    #[error("step {step_id} output has no json object")]
    Extract { step_id: i64 },

    #[error("step {step_id} output could not be decoded: {source}")]
    Decode {
        step_id: i64,
        #[source]
        source: serde_json::Error,
    },

    #[error("step index {index} out of range for plan of {len} steps")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("plan has no steps")]
    EmptyPlan,

    #[error("executor exceeded {limit} transitions")]
    IterationLimit { limit: usize },

    #[error("execution cancelled at step {step_id}")]
    Cancelled { step_id: i64 },
}

impl StepError {
    pub fn step_id(&self) -> Option<i64> {
        match self {
            Self::Agent { step_id, .. }
            | Self::Extract { step_id }
            | Self::Decode { step_id, .. }
            | Self::Cancelled { step_id } => Some(*step_id),
            _ => None,
        }
    }
}

/// Why a round produced no report.
#[derive(Debug, thiserror::Error)]
pub enum RoundError {
    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Step(#[from] StepError),

    #[error("ledger error: {0}")]
    Ledger(#[from] StoreError),
}

impl RoundError {
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Self::Plan(PlanError::Cancelled) | Self::Step(StepError::Cancelled { .. })
        )
    }
}
