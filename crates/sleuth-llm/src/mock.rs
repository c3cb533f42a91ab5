use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use sleuth_core::agent::Agent;
use sleuth_core::errors::AgentError;
use sleuth_core::messages::{Message, ToolCall};

/// Pre-programmed replies for deterministic testing without API calls.
#[derive(Clone, Debug)]
pub enum MockResponse {
    /// Return this assistant message.
    Reply(Message),
    /// Fail the call.
    Error(AgentError),
    /// Wait a duration, then resolve the inner response.
    Delay(Duration, Box<MockResponse>),
}

impl MockResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Reply(Message::assistant(text))
    }

    /// Reply with a JSON value rendered as the message content.
    pub fn json(value: serde_json::Value) -> Self {
        Self::Reply(Message::assistant(value.to_string()))
    }

    pub fn tool_calls(calls: Vec<ToolCall>) -> Self {
        Self::Reply(Message::assistant_tool_calls("", calls))
    }

    pub fn delayed(delay: Duration, inner: MockResponse) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Agent that returns scripted responses in order and records every message
/// list it was handed.
pub struct MockAgent {
    responses: Vec<MockResponse>,
    call_count: AtomicUsize,
    received: Mutex<Vec<Vec<Message>>>,
}

impl MockAgent {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            responses,
            call_count: AtomicUsize::new(0),
            received: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    /// Message lists received so far, oldest call first.
    pub fn received(&self) -> Vec<Vec<Message>> {
        self.received.lock().clone()
    }

    /// The last message of call `idx`, usually the rendered user prompt.
    pub fn last_prompt(&self, idx: usize) -> Option<String> {
        self.received
            .lock()
            .get(idx)
            .and_then(|msgs| msgs.last())
            .map(|m| m.content.clone())
    }
}

#[async_trait]
impl Agent for MockAgent {
    fn name(&self) -> &str {
        "mock"
    }

    async fn generate(&self, messages: &[Message]) -> Result<Message, AgentError> {
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);
        self.received.lock().push(messages.to_vec());

        let Some(response) = self.responses.get(idx) else {
            return Err(AgentError::InvalidRequest(format!(
                "MockAgent: no response configured for call {idx}"
            )));
        };

        let mut current = response;
        loop {
            match current {
                MockResponse::Reply(msg) => return Ok(msg.clone()),
                MockResponse::Error(e) => return Err(e.clone()),
                MockResponse::Delay(duration, inner) => {
                    tokio::time::sleep(*duration).await;
                    current = inner;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sequential_responses() {
        let mock = MockAgent::new(vec![MockResponse::text("first"), MockResponse::text("second")]);
        let a = mock.generate(&[Message::user("q1")]).await.unwrap();
        let b = mock.generate(&[Message::user("q2")]).await.unwrap();
        assert_eq!(a.content, "first");
        assert_eq!(b.content, "second");
        assert_eq!(mock.call_count(), 2);
        assert_eq!(mock.last_prompt(1).as_deref(), Some("q2"));
    }

    #[tokio::test]
    async fn exhausted_responses() {
        let mock = MockAgent::new(vec![MockResponse::text("only one")]);
        let _ = mock.generate(&[]).await;
        assert!(mock.generate(&[]).await.is_err());
        assert_eq!(mock.received().len(), 2);
    }

    #[tokio::test]
    async fn tool_call_reply_passthrough() {
        let mock = MockAgent::new(vec![MockResponse::tool_calls(vec![ToolCall::new(
            "c1",
            "bash",
            r#"{"cmd":"tshark -r x.pcap"}"#,
        )])]);
        let reply = mock.generate(&[]).await.unwrap();
        assert_eq!(reply.tool_calls[0].name, "bash");
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_error() {
        let mock = MockAgent::new(vec![MockResponse::delayed(
            Duration::from_secs(5),
            MockResponse::Error(AgentError::RateLimited { retry_after: None }),
        )]);
        let start = tokio::time::Instant::now();
        let result = mock.generate(&[]).await;
        assert!(start.elapsed() >= Duration::from_secs(5));
        assert!(matches!(result, Err(AgentError::RateLimited { .. })));
    }
}
