use tokio_util::sync::CancellationToken;

use sleuth_core::agent::Agent;
use sleuth_core::errors::AgentError;
use sleuth_core::messages::Message;

/// Invoke the agent unless `cancel` fires first. A cancelled call, whether
/// seen here or reported by the agent itself, comes back as
/// `AgentError::Cancelled`.
pub(crate) async fn generate(
    agent: &dyn Agent,
    messages: &[Message],
    cancel: &CancellationToken,
) -> Result<Message, AgentError> {
    if cancel.is_cancelled() {
        return Err(AgentError::Cancelled);
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AgentError::Cancelled),
        reply = agent.generate(messages) => reply,
    }
}
