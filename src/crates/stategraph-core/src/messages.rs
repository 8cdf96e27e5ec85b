//! Chat message types and the `add_messages` reducer
//!
//! Conversational graphs keep their history in a `messages` channel holding a
//! JSON array of [`Message`] values. Nodes append to it by returning
//! `{"messages": [ ... ]}`; the channel's reducer decides how the new items are
//! merged.
//!
//! ```rust
//! use stategraph_core::messages::{Message, ToolCall};
//! use serde_json::json;
//!
//! let question = Message::human("What's the weather in Paris?");
//! let request = Message::ai("")
//!     .with_tool_calls(vec![ToolCall::new("search", json!({"query": "weather Paris"}))]);
//!
//! assert!(request.has_tool_calls());
//! assert_eq!(question.text(), "What's the weather in Paris?");
//! ```
//!
//! # Reducers
//!
//! A plain [`ReducerKind::Append`](crate::ReducerKind::Append) channel is enough
//! for append-only history. [`add_messages_reducer`] additionally replaces a
//! message whose `id` is already present, which is how a node corrects an
//! earlier message without duplicating it:
//!
//! ```text
//! Before:   [human(id:1), ai(id:2, "draft")]
//! Update:   [ai(id:2, "final"), tool(id:3)]
//! After:    [human(id:1), ai(id:2, "final"), tool(id:3)]
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

use crate::state::{json_type, ReducerKind};

/// Conventional name of the message history channel
pub const MESSAGES_CHANNEL: &str = "messages";

/// Speaker of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// Instructions for the model
    System,
    /// End-user input
    #[serde(alias = "user")]
    Human,
    /// Model output, possibly requesting a tool call
    #[serde(alias = "ai")]
    Assistant,
    /// Result of a tool call
    Tool,
}

/// Tool invocation requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Identifier echoed back by the tool message answering this call
    pub id: String,
    /// Tool name
    pub name: String,
    /// Tool arguments (JSON object)
    #[serde(default)]
    pub args: Value,
}

impl ToolCall {
    /// Create a call with a generated id
    pub fn new(name: impl Into<String>, args: Value) -> Self {
        Self {
            id: format!("call_{}", Uuid::new_v4().simple()),
            name: name.into(),
            args,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}

/// Single message in a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique identifier, used by [`add_messages`] to replace in place
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    pub role: MessageRole,

    #[serde(default)]
    pub content: String,

    /// Tool name on tool messages, or a participant name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Tool calls requested by an assistant message
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    /// Call answered by a tool message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    /// Create a message with a generated id
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: Some(Uuid::new_v4().to_string()),
            role,
            content: content.into(),
            name: None,
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    pub fn human(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Human, content)
    }

    /// Create an assistant message
    pub fn ai(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    /// Create a tool message answering `tool_call_id`
    pub fn tool(content: impl Into<String>, tool_call_id: impl Into<String>) -> Self {
        let mut message = Self::new(MessageRole::Tool, content);
        message.tool_call_id = Some(tool_call_id.into());
        message
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCall>) -> Self {
        self.tool_calls = tool_calls;
        self
    }

    pub fn text(&self) -> &str {
        &self.content
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// Serialize for a channel update
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Assign a generated id if the message has none
    pub fn ensure_id(&mut self) {
        if self.id.is_none() {
            self.id = Some(Uuid::new_v4().to_string());
        }
    }
}

/// Merge two message lists
///
/// A message in `right` whose id already appears in the merged list replaces
/// that entry in place; everything else is appended in order. Messages without
/// an id get one.
pub fn add_messages(left: Vec<Message>, right: Vec<Message>) -> Vec<Message> {
    let mut merged = left;
    let mut index: HashMap<String, usize> = merged
        .iter()
        .enumerate()
        .filter_map(|(i, m)| m.id.clone().map(|id| (id, i)))
        .collect();

    for mut message in right {
        message.ensure_id();
        let id = message.id.clone().unwrap_or_default();
        match index.get(&id) {
            Some(&position) => merged[position] = message,
            None => {
                index.insert(id, merged.len());
                merged.push(message);
            }
        }
    }
    merged
}

/// Channel reducer applying [`add_messages`] to JSON message arrays
///
/// The update may be a single message object or an array of them.
pub fn add_messages_reducer() -> ReducerKind {
    ReducerKind::custom("add_messages", |current, update| {
        let left = match current {
            Value::Null => Vec::new(),
            other => parse_messages(other)?,
        };
        let right = match update {
            Value::Object(_) => vec![parse_message(update)?],
            other => parse_messages(other)?,
        };
        serde_json::to_value(add_messages(left, right)).map_err(|e| e.to_string())
    })
}

/// Decode the message history of `state`, if it has one
///
/// Returns `Ok(None)` when the channel is absent or null.
pub fn messages_in(state: &Value) -> Result<Option<Vec<Message>>, String> {
    match state.get(MESSAGES_CHANNEL) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => parse_messages(value).map(Some),
    }
}

/// Last message of the history in `state`
pub fn last_message(state: &Value) -> Result<Option<Message>, String> {
    Ok(messages_in(state)?.and_then(|mut messages| messages.pop()))
}

fn parse_messages(value: &Value) -> Result<Vec<Message>, String> {
    match value {
        Value::Array(items) => items.iter().map(parse_message).collect(),
        other => Err(format!("expected an array of messages, got {}", json_type(other))),
    }
}

fn parse_message(value: &Value) -> Result<Message, String> {
    serde_json::from_value(value.clone()).map_err(|e| format!("invalid message: {}", e))
}
