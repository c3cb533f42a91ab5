use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::AgentError;
use crate::messages::Message;

/// The collaborator: a tool-calling model that turns a message list into one
/// assistant reply. Tool dispatch, if any, happens behind this call.
#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, messages: &[Message]) -> Result<Message, AgentError>;
}

#[async_trait]
impl<A: Agent + ?Sized> Agent for Arc<A> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn generate(&self, messages: &[Message]) -> Result<Message, AgentError> {
        (**self).generate(messages).await
    }
}
