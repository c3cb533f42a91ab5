use std::borrow::Cow;
use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, instrument};

use sleuth_core::agent::Agent;
use sleuth_core::errors::{AgentError, CompactionError};
use sleuth_core::messages::{Message, Role};

use super::blocks::{partition, split_recent, Block};
use super::tokens::{EstimatingCounter, TokenCounter};
use crate::prompts::{render, SUMMARIZER_PROMPT};

pub const DEFAULT_MAX_TOKENS_BEFORE_SUMMARY: usize = 128 * 1024;
pub const DEFAULT_MAX_TOKENS_FOR_RECENT_MESSAGES: usize = 25 * 1024;

/// User turn sent to the summarizer after the rendered instructions.
const SUMMARIZE_REQUEST: &str = "summarize 'older_messages': ";

/// Token budgets. Zero selects the default.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CompactionConfig {
    pub max_tokens_before_summary: usize,
    pub max_tokens_for_recent_messages: usize,
}

impl CompactionConfig {
    pub fn new(max_tokens_before_summary: usize, max_tokens_for_recent_messages: usize) -> Self {
        Self {
            max_tokens_before_summary: or_default(max_tokens_before_summary, DEFAULT_MAX_TOKENS_BEFORE_SUMMARY),
            max_tokens_for_recent_messages: or_default(
                max_tokens_for_recent_messages,
                DEFAULT_MAX_TOKENS_FOR_RECENT_MESSAGES,
            ),
        }
    }
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self::new(0, 0)
    }
}

fn or_default(value: usize, default: usize) -> usize {
    if value == 0 {
        default
    } else {
        value
    }
}

/// Replaces older history with a model-written summary once the message
/// list outgrows its budget. Holds no per-conversation state: the summary
/// marker travels on the message itself.
pub struct Compactor {
    config: CompactionConfig,
    counter: Arc<dyn TokenCounter>,
}

impl Compactor {
    pub fn new(config: CompactionConfig, counter: Arc<dyn TokenCounter>) -> Self {
        Self { config, counter }
    }

    pub fn with_defaults() -> Self {
        Self::new(CompactionConfig::default(), Arc::new(EstimatingCounter::default()))
    }

    pub fn config(&self) -> &CompactionConfig {
        &self.config
    }

    /// Return `messages` untouched when within budget, otherwise
    /// `system + user run + new summary + recent blocks`.
    #[instrument(skip_all, fields(messages = messages.len()))]
    pub async fn compact<'m>(
        &self,
        summarizer: &dyn Agent,
        messages: &'m [Message],
    ) -> Result<Cow<'m, [Message]>, CompactionError> {
        let counts = self.counter.count(messages)?;
        if counts.len() != messages.len() {
            return Err(CompactionError::CountMismatch {
                messages: messages.len(),
                counts: counts.len(),
            });
        }

        let total: usize = counts.iter().sum();
        if total <= self.config.max_tokens_before_summary {
            return Ok(Cow::Borrowed(messages));
        }

        let part = partition(messages, &counts);
        let boundary = split_recent(&part.blocks, self.config.max_tokens_for_recent_messages);
        let (older, recent) = part.blocks.split_at(boundary);

        let one = |b: &Option<Block>| render_blocks(messages, b.as_slice());
        let system_text = one(&part.system);
        let user_text = one(&part.user);
        let summary_text = one(&part.summary);
        let older_text = render_blocks(messages, older);
        let recent_text = render_blocks(messages, recent);

        let instructions = render(
            SUMMARIZER_PROMPT,
            &[
                ("system_prompt", &system_text),
                ("user_messages", &user_text),
                ("previous_summary", &summary_text),
                ("older_messages", &older_text),
                ("recent_messages", &recent_text),
            ],
        );

        debug!(
            total_tokens = total,
            older_blocks = older.len(),
            recent_blocks = recent.len(),
            "requesting summary"
        );
        let reply = summarizer
            .generate(&[Message::system(instructions), Message::user(SUMMARIZE_REQUEST)])
            .await
            .map_err(CompactionError::Summarize)?;
        if reply.content.trim().is_empty() {
            return Err(CompactionError::EmptySummary);
        }

        let mut out = Vec::with_capacity(messages.len());
        for block in [&part.system, &part.user].into_iter().flatten() {
            out.extend_from_slice(block.messages(messages));
        }
        out.push(Message::summary(reply.content));
        for block in recent {
            out.extend_from_slice(block.messages(messages));
        }

        let recent_tokens: usize = recent.iter().map(|b| b.tokens).sum();
        info!(
            before_messages = messages.len(),
            after_messages = out.len(),
            before_tokens = total,
            recent_tokens,
            "context compacted"
        );
        Ok(Cow::Owned(out))
    }
}

fn render_blocks(messages: &[Message], blocks: &[Block]) -> String {
    let mut out = String::new();
    for block in blocks {
        for msg in block.messages(messages) {
            render_message(&mut out, msg);
            out.push('\n');
        }
    }
    out
}

/// Flatten one message: role tag, content, then each tool call.
fn render_message(out: &mut String, msg: &Message) {
    match (msg.role, msg.name.as_deref()) {
        (Role::Tool, Some(name)) if !name.is_empty() => {
            let _ = writeln!(out, "[tool:{name}]");
        }
        (role, _) => {
            let _ = writeln!(out, "[{role}]");
        }
    }
    if !msg.content.is_empty() {
        out.push_str(&msg.content);
        out.push('\n');
    }
    if msg.role == Role::Assistant {
        for tc in &msg.tool_calls {
            if !tc.name.is_empty() {
                let _ = writeln!(out, "tool_call: {}", tc.name);
            }
            if !tc.arguments.is_empty() {
                let _ = writeln!(out, "args: {}", tc.arguments);
            }
        }
    }
}

/// Agent decorator that compacts the message list before every call. The
/// inner agent also writes the summaries.
pub struct CompactingAgent<A: Agent> {
    inner: A,
    compactor: Compactor,
}

impl<A: Agent> CompactingAgent<A> {
    pub fn new(inner: A, compactor: Compactor) -> Self {
        Self { inner, compactor }
    }

    pub fn inner(&self) -> &A {
        &self.inner
    }
}

#[async_trait]
impl<A: Agent> Agent for CompactingAgent<A> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn generate(&self, messages: &[Message]) -> Result<Message, AgentError> {
        let messages = self.compactor.compact(&self.inner, messages).await?;
        self.inner.generate(&messages).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sleuth_core::ids::ToolCallId;
    use sleuth_core::messages::ToolCall;
    use sleuth_llm::mock::{MockAgent, MockResponse};

    /// One token per byte of content, nothing else.
    struct ByteCounter;

    impl TokenCounter for ByteCounter {
        fn count(&self, messages: &[Message]) -> Result<Vec<usize>, CompactionError> {
            Ok(messages.iter().map(|m| m.content.len()).collect())
        }
    }

    struct ShortCounter;

    impl TokenCounter for ShortCounter {
        fn count(&self, _messages: &[Message]) -> Result<Vec<usize>, CompactionError> {
            Ok(vec![1])
        }
    }

    struct FailingCounter;

    impl TokenCounter for FailingCounter {
        fn count(&self, _messages: &[Message]) -> Result<Vec<usize>, CompactionError> {
            Err(CompactionError::Count("tokenizer unavailable".into()))
        }
    }

    fn compactor(before: usize, recent: usize) -> Compactor {
        Compactor::new(CompactionConfig::new(before, recent), Arc::new(ByteCounter))
    }

    /// Assistant call plus its reply, `size` bytes each.
    fn exchange(id: &str, size: usize) -> Vec<Message> {
        vec![
            Message::assistant_tool_calls("x".repeat(size), vec![ToolCall::new(id, "bash", "{}")]),
            Message::tool(ToolCallId::from_raw(id), Some("bash".into()), "y".repeat(size)),
        ]
    }

    fn conversation(prefix: &str, exchanges: usize, size: usize) -> Vec<Message> {
        let mut msgs = vec![Message::system("s".repeat(1000)), Message::user("u".repeat(1000))];
        for i in 0..exchanges {
            msgs.extend(exchange(&format!("{prefix}{i}"), size));
        }
        msgs
    }

    #[test]
    fn zero_budgets_fall_back_to_defaults() {
        let config = CompactionConfig::new(0, 0);
        assert_eq!(config.max_tokens_before_summary, 131_072);
        assert_eq!(config.max_tokens_for_recent_messages, 25_600);
        assert_eq!(CompactionConfig::new(10, 5).max_tokens_for_recent_messages, 5);
    }

    #[tokio::test]
    async fn under_budget_is_untouched() {
        let summarizer = MockAgent::new(vec![]);
        let msgs = conversation("c", 3, 100);
        let out = compactor(10_000, 1_000).compact(&summarizer, &msgs).await.unwrap();
        assert!(matches!(out, Cow::Borrowed(_)));
        assert!(std::ptr::eq(out.as_ptr(), msgs.as_ptr()));
        assert_eq!(summarizer.call_count(), 0);
    }

    #[tokio::test]
    async fn count_mismatch_is_fatal() {
        let summarizer = MockAgent::new(vec![]);
        let compactor = Compactor::new(CompactionConfig::default(), Arc::new(ShortCounter));
        let err = compactor
            .compact(&summarizer, &[Message::user("a"), Message::user("b")])
            .await
            .unwrap_err();
        assert!(matches!(err, CompactionError::CountMismatch { messages: 2, counts: 1 }));
    }

    #[tokio::test]
    async fn counting_failure_stops_before_summarizing() {
        let summarizer = MockAgent::new(vec![MockResponse::text("unused")]);
        let compactor = Compactor::new(CompactionConfig::default(), Arc::new(FailingCounter));
        let err = compactor
            .compact(&summarizer, &conversation("c", 2, 10))
            .await
            .unwrap_err();
        assert!(matches!(err, CompactionError::Count(ref msg) if msg == "tokenizer unavailable"));
        assert_eq!(summarizer.call_count(), 0);
    }

    #[tokio::test]
    async fn compacting_agent_refuses_call_when_counting_fails() {
        let inner = MockAgent::new(vec![MockResponse::text("unused")]);
        let agent = CompactingAgent::new(
            inner,
            Compactor::new(CompactionConfig::default(), Arc::new(FailingCounter)),
        );
        let err = agent.generate(&[Message::user("hi")]).await.unwrap_err();
        assert!(matches!(err, AgentError::Compaction(_)));
        assert_eq!(agent.inner().call_count(), 0);
    }

    #[tokio::test]
    async fn reassembles_system_user_summary_recent() {
        let summarizer = MockAgent::new(vec![MockResponse::text("SUMMARY")]);
        // 10 exchanges of 2000 tokens, recent budget fits two of them.
        let msgs = conversation("c", 10, 1000);
        let out = compactor(5_000, 4_500).compact(&summarizer, &msgs).await.unwrap();

        assert_eq!(out.len(), 2 + 1 + 4);
        assert_eq!(out[0].role, Role::System);
        assert_eq!(out[1].role, Role::User);
        assert!(out[2].is_summary());
        assert_eq!(out[2].content, "SUMMARY");
        assert_eq!(out[3].tool_calls[0].id.as_str(), "c8");
        assert_eq!(out[6].response_to().map(|id| id.as_str()), Some("c9"));
    }

    #[tokio::test]
    async fn summarizer_sees_five_sections() {
        let summarizer = MockAgent::new(vec![MockResponse::text("S")]);
        let msgs = conversation("c", 4, 1000);
        compactor(3_000, 2_000).compact(&summarizer, &msgs).await.unwrap();

        let received = summarizer.received();
        let call = &received[0];
        assert_eq!(call.len(), 2);
        assert_eq!(call[1].content, SUMMARIZE_REQUEST);
        let prompt = &call[0].content;
        assert!(prompt.contains("<previous_summary>\n\n</previous_summary>"));
        assert!(prompt.contains("<older_messages>\n[assistant]\nxxx"));
        assert!(prompt.contains("tool_call: bash\nargs: {}\n"));
        assert!(prompt.contains("[tool:bash]\nyyy"));
        assert!(prompt.contains("<system_prompt>\n[system]\nsss"));
    }

    #[tokio::test]
    async fn pairs_never_split_across_boundary() {
        let summarizer = MockAgent::new(vec![MockResponse::text("S")]);
        let mut msgs = conversation("c", 0, 0);
        msgs.push(Message::assistant_tool_calls(
            "a".repeat(100),
            vec![ToolCall::new("p", "bash", "{}"), ToolCall::new("q", "bash", "{}")],
        ));
        msgs.push(Message::tool(ToolCallId::from_raw("p"), None, "r".repeat(3000)));
        msgs.push(Message::tool(ToolCallId::from_raw("q"), None, "r".repeat(3000)));
        msgs.push(Message::assistant("tail"));

        // The pairing block (6100) exceeds the recent budget, so all three of
        // its messages go to the summary together.
        let out = compactor(5_000, 5_000).compact(&summarizer, &msgs).await.unwrap();
        assert_eq!(out.len(), 4);
        assert_eq!(out[3].content, "tail");
        assert!(out.iter().all(|m| m.role != Role::Tool));
    }

    #[tokio::test]
    async fn recent_suffix_within_budget() {
        let summarizer = MockAgent::new(vec![MockResponse::text("S")]);
        let mut msgs = conversation("c", 0, 0);
        for (i, size) in [3000usize, 200, 2500, 900, 800].iter().enumerate() {
            msgs.extend(exchange(&format!("c{i}"), *size));
        }
        let out = compactor(1_000, 4_000).compact(&summarizer, &msgs).await.unwrap();
        let recent: usize = out[3..].iter().map(|m| m.content.len()).sum();
        assert!(recent <= 4_000);
        // 1600 + 1800 fit; the 5000-token block stops the scan so the small
        // 400-token block before it is summarized too.
        assert_eq!(recent, 3_400);
        assert_eq!(out.len(), 3 + 4);
    }

    #[tokio::test]
    async fn recompaction_folds_previous_summary() {
        // 200 exchanges of 1000 tokens plus 2000 of preamble: 202K total.
        let summarizer = MockAgent::new(vec![MockResponse::text("FIRST"), MockResponse::text("SECOND")]);
        let compactor = compactor(128 * 1024, 25 * 1024);

        let first = conversation("a", 200, 500);
        let once = compactor.compact(&summarizer, &first).await.unwrap().into_owned();
        let recent: usize = once[3..].iter().map(|m| m.content.len()).sum();
        assert!(recent <= 25 * 1024);
        assert_eq!(once[2].content, "FIRST");

        let mut grown = once.clone();
        grown.extend(first[2..].iter().cloned());
        let twice = compactor.compact(&summarizer, &grown).await.unwrap();

        let received = summarizer.received();
        let prompt = &received[1][0].content;
        assert!(prompt.contains("<previous_summary>\n[assistant]\nFIRST\n"));
        assert_eq!(twice.iter().filter(|m| m.is_summary()).count(), 1);
        assert_eq!(twice[2].content, "SECOND");
    }

    #[tokio::test]
    async fn empty_summary_rejected() {
        let summarizer = MockAgent::new(vec![MockResponse::text("  ")]);
        let msgs = conversation("c", 4, 1000);
        let err = compactor(3_000, 2_000).compact(&summarizer, &msgs).await.unwrap_err();
        assert!(matches!(err, CompactionError::EmptySummary));
    }

    #[tokio::test]
    async fn compacting_agent_forwards_compacted_history() {
        let inner = MockAgent::new(vec![MockResponse::text("S"), MockResponse::text("answer")]);
        let agent = CompactingAgent::new(inner, compactor(3_000, 2_000));
        let reply = agent.generate(&conversation("c", 4, 1000)).await.unwrap();
        assert_eq!(reply.content, "answer");

        let received = agent.inner().received();
        let forwarded = &received[1];
        assert!(forwarded[2].is_summary());
        assert_eq!(forwarded.len(), 3 + 2);
    }

    #[tokio::test]
    async fn summarizer_failure_surfaces_as_agent_error() {
        let inner = MockAgent::new(vec![MockResponse::Error(AgentError::Cancelled)]);
        let agent = CompactingAgent::new(inner, compactor(3_000, 2_000));
        let err = agent.generate(&conversation("c", 4, 1000)).await.unwrap_err();
        assert!(matches!(err, AgentError::Cancelled));
    }
}
