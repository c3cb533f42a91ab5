use sleuth_core::errors::CompactionError;
use sleuth_core::messages::Message;

/// Fixed cost charged per message for role and framing.
pub const MESSAGE_OVERHEAD: usize = 4;

/// Per-message token costs. Implementations must return exactly one count
/// per input message.
pub trait TokenCounter: Send + Sync {
    fn count(&self, messages: &[Message]) -> Result<Vec<usize>, CompactionError>;
}

/// Character-based estimate: ceil(chars / chars_per_token) over content,
/// tool call names and arguments, plus [`MESSAGE_OVERHEAD`].
#[derive(Clone, Copy, Debug)]
pub struct EstimatingCounter {
    chars_per_token: usize,
}

impl EstimatingCounter {
    pub fn new(chars_per_token: usize) -> Self {
        Self {
            chars_per_token: chars_per_token.max(1),
        }
    }

    pub fn estimate_text(&self, text: &str) -> usize {
        text.chars().count().div_ceil(self.chars_per_token)
    }

    pub fn estimate_message(&self, msg: &Message) -> usize {
        let calls: usize = msg
            .tool_calls
            .iter()
            .map(|tc| self.estimate_text(&tc.name) + self.estimate_text(&tc.arguments))
            .sum();
        MESSAGE_OVERHEAD + self.estimate_text(&msg.content) + calls
    }
}

impl Default for EstimatingCounter {
    fn default() -> Self {
        Self::new(4)
    }
}

impl TokenCounter for EstimatingCounter {
    fn count(&self, messages: &[Message]) -> Result<Vec<usize>, CompactionError> {
        Ok(messages.iter().map(|m| self.estimate_message(m)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sleuth_core::messages::ToolCall;

    #[test]
    fn text_estimation_rounds_up() {
        let counter = EstimatingCounter::default();
        assert_eq!(counter.estimate_text(""), 0);
        assert_eq!(counter.estimate_text("hello world"), 3);
        assert_eq!(counter.estimate_text(&"a".repeat(400)), 100);
    }

    #[test]
    fn counts_chars_not_bytes() {
        let counter = EstimatingCounter::default();
        assert_eq!(counter.estimate_text("数据包分析"), 2);
    }

    #[test]
    fn tool_calls_are_charged() {
        let counter = EstimatingCounter::default();
        let plain = Message::assistant("");
        let calling = Message::assistant_tool_calls("", vec![ToolCall::new("c1", "bash", "{\"cmd\":\"ls\"}")]);
        assert_eq!(counter.estimate_message(&plain), MESSAGE_OVERHEAD);
        assert_eq!(counter.estimate_message(&calling), MESSAGE_OVERHEAD + 1 + 3);
    }

    #[test]
    fn one_count_per_message() {
        let counter = EstimatingCounter::new(0);
        let counts = counter
            .count(&[Message::system("abcd"), Message::user("ab")])
            .unwrap();
        assert_eq!(counts, vec![MESSAGE_OVERHEAD + 4, MESSAGE_OVERHEAD + 2]);
    }
}
