use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ids::ToolCallId;

/// Extras key marking an assistant message as a compaction summary.
pub const SUMMARY_MARKER: &str = "_sleuth_summary";

/// Name given to summary messages produced by compaction.
pub const SUMMARY_NAME: &str = "summary";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A function call requested by the assistant. `arguments` is the raw JSON
/// text exactly as the model produced it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: ToolCallId,
    pub name: String,
    pub arguments: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<ToolCallId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extras: Map<String, Value>,
}

// --- Convenience constructors ---

impl Message {
    fn with_role(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
            extras: Map::new(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content)
    }

    pub fn assistant_tool_calls(content: impl Into<String>, calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: calls,
            ..Self::with_role(Role::Assistant, content)
        }
    }

    pub fn tool(tool_call_id: ToolCallId, name: Option<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id),
            name,
            ..Self::with_role(Role::Tool, content)
        }
    }

    /// Build the assistant message that replaces compacted history.
    pub fn summary(content: impl Into<String>) -> Self {
        let mut msg = Self::assistant(content);
        msg.name = Some(SUMMARY_NAME.to_string());
        msg.mark_summary();
        msg
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// The tool call id this message responds to, treating an empty id as absent.
    pub fn response_to(&self) -> Option<&ToolCallId> {
        self.tool_call_id.as_ref().filter(|id| !id.as_str().is_empty())
    }

    pub fn mark_summary(&mut self) {
        self.extras.insert(SUMMARY_MARKER.to_string(), Value::Bool(true));
    }

    pub fn is_summary(&self) -> bool {
        self.role == Role::Assistant
            && self
                .extras
                .get(SUMMARY_MARKER)
                .and_then(Value::as_bool)
                .unwrap_or(false)
    }
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: ToolCallId::from_raw(id),
            name: name.into(),
            arguments: arguments.into(),
        }
    }
}
