//! # sleuth-engine
//!
//! The investigation pipeline: [`planner::Planner`] turns a query into a
//! plan, [`executor::Executor`] walks it step by step and synthesizes the
//! report, and [`session::Session`] runs rounds and records them in the
//! ledger. [`context`] keeps the agent's message list inside its token
//! budget on every call.

mod call;
pub mod context;
pub mod error;
pub mod executor;
pub mod planner;
pub mod prompts;
pub mod session;

pub use context::{CompactingAgent, CompactionConfig, Compactor, EstimatingCounter, TokenCounter};
pub use error::{Phase, PlanError, RoundError, StepError};
pub use executor::{ExecParams, Executor, ExecutorConfig};
pub use planner::{PlanParams, Planner};
pub use session::{RoundOutcome, Session, SessionDeps};
