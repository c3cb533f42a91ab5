pub mod agent;
pub mod errors;
pub mod events;
pub mod ids;
pub mod json;
pub mod messages;
pub mod plan;

pub use agent::Agent;
pub use errors::{AgentError, CompactionError};
pub use events::{ChannelEmitter, Emitter, Event, EventType, NopEmitter};
pub use ids::{EventId, SessionId, ToolCallId};
pub use messages::{Message, Role, ToolCall};
pub use plan::{FlexString, NormalOutput, Plan, PlanState, RunResult, SessionHistory, Step, StepOutput};
