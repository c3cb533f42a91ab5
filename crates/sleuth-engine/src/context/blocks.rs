use std::collections::HashSet;
use std::ops::Range;

use sleuth_core::ids::ToolCallId;
use sleuth_core::messages::{Message, Role};

/// A contiguous, never-split run of messages with its summed token cost.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub range: Range<usize>,
    pub tokens: usize,
}

impl Block {
    fn new(range: Range<usize>, counts: &[usize]) -> Self {
        let tokens = counts[range.clone()].iter().sum();
        Self { range, tokens }
    }

    pub fn messages<'a>(&self, all: &'a [Message]) -> &'a [Message] {
        &all[self.range.clone()]
    }
}

/// A message sequence grouped into the pieces compaction reasons about.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Partition {
    pub system: Option<Block>,
    pub user: Option<Block>,
    pub summary: Option<Block>,
    pub blocks: Vec<Block>,
}

/// Group `messages` into the leading system message, the user run, an
/// optional prior summary, then tool-call blocks. `counts` holds one token
/// cost per message.
pub fn partition(messages: &[Message], counts: &[usize]) -> Partition {
    debug_assert_eq!(messages.len(), counts.len());
    let n = messages.len();
    let mut idx = 0;
    let mut part = Partition::default();

    if messages.first().is_some_and(|m| m.role == Role::System) {
        part.system = Some(Block::new(0..1, counts));
        idx = 1;
    }

    let user_start = idx;
    while idx < n && messages[idx].role == Role::User {
        idx += 1;
    }
    if idx > user_start {
        part.user = Some(Block::new(user_start..idx, counts));
    }

    if idx < n && messages[idx].is_summary() {
        part.summary = Some(Block::new(idx..idx + 1, counts));
        idx += 1;
    }

    while idx < n {
        let end = pairing_end(messages, idx);
        part.blocks.push(Block::new(idx..end, counts));
        idx = end;
    }

    part
}

/// End (exclusive) of the block starting at `start`. An assistant message
/// with tool calls absorbs the tool replies that follow it; a reply with no
/// call id is absorbed unchecked, a reply to some other call ends the block.
fn pairing_end(messages: &[Message], start: usize) -> usize {
    let head = &messages[start];
    if head.role != Role::Assistant || !head.has_tool_calls() {
        return start + 1;
    }

    let call_ids: HashSet<&ToolCallId> = head.tool_calls.iter().map(|tc| &tc.id).collect();
    let mut end = start + 1;
    while let Some(next) = messages.get(end) {
        if next.role != Role::Tool {
            break;
        }
        match next.response_to() {
            None => {}
            Some(id) if call_ids.contains(id) => {}
            Some(_) => break,
        }
        end += 1;
    }
    end
}

/// Index splitting `blocks` into an older prefix and a recent suffix. Blocks
/// are taken newest first while the running total stays within `budget`; the
/// first block that would exceed it, and everything before it, is older.
pub fn split_recent(blocks: &[Block], budget: usize) -> usize {
    let mut used = 0;
    for (i, block) in blocks.iter().enumerate().rev() {
        if used + block.tokens > budget {
            return i + 1;
        }
        used += block.tokens;
    }
    0
}
