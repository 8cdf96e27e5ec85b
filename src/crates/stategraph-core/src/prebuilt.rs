//! Prebuilt nodes for the chat-model / tool-calling loop
//!
//! The most common graph shape is a chatbot that may ask for a tool, a tools
//! node that runs it, and a loop back to the chatbot:
//!
//! ```text
//!   START ──▶ chatbot ──tools_condition──▶ tools
//!               ▲   │                        │
//!               │   └────── END              │
//!               └────────────────────────────┘
//! ```
//!
//! - [`chat_node`] sends the message history to a [`ChatModel`] and appends the
//!   reply. A reply asking for more than one tool call fails the step with
//!   [`GraphError::TooManyToolCalls`]: each super-step performs at most one
//!   external action.
//! - [`tool_node`] runs the tool call of the last assistant message and appends
//!   a tool message with the result. Tool failures become error tool messages so
//!   the model can react; they do not fail the step.
//! - [`tools_condition`] routes to [`TOOLS_NODE`] when the last message requests
//!   a tool, otherwise to [`END`].
//!
//! A [`Tool`] receives the node's [`NodeContext`], so a tool can suspend the
//! thread for human input:
//!
//! ```rust
//! use async_trait::async_trait;
//! use serde_json::{json, Value};
//! use stategraph_core::prebuilt::{Tool, ToolError, ToolOutcome};
//! use stategraph_core::{Interrupt, NodeContext};
//!
//! struct HumanAssistance;
//!
//! #[async_trait]
//! impl Tool for HumanAssistance {
//!     fn name(&self) -> &str {
//!         "human_assistance"
//!     }
//!
//!     async fn call(&self, args: &Value, ctx: &mut NodeContext) -> Result<ToolOutcome, ToolError> {
//!         match ctx.interrupt(json!({"query": args["query"]})) {
//!             Interrupt::Resumed(answer) => Ok(ToolOutcome::Output(answer["data"].clone())),
//!             Interrupt::Pending(payload) => Ok(ToolOutcome::Interrupt(payload)),
//!         }
//!     }
//! }
//! ```

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::error::{GraphError, Result};
use crate::graph::{NodeFn, NodeFuture, END};
use crate::interrupt::NodeContext;
use crate::messages::{last_message, messages_in, Message, MessageRole, MESSAGES_CHANNEL};
use crate::node_result::NodeResult;
use crate::state::StateError;

/// Conventional name of the node created by [`tool_node`]
pub const TOOLS_NODE: &str = "tools";

/// Errors reported by a [`ChatModel`]
#[derive(Debug, Error)]
pub enum ModelError {
    /// The request to the model failed
    #[error("Model request failed: {0}")]
    Request(String),

    /// The model answered with something unusable
    #[error("Invalid model response: {0}")]
    InvalidResponse(String),
}

/// Errors reported by a [`Tool`]
#[derive(Debug, Error, Clone)]
pub enum ToolError {
    /// No tool with this name is bound to the node
    #[error("Tool '{name}' not found. Available tools: {available}")]
    NotFound { name: String, available: String },

    /// Arguments did not match what the tool expects
    #[error("Invalid arguments for tool '{tool}': {error}")]
    InvalidArguments { tool: String, error: String },

    /// Tool ran and failed
    #[error("Tool '{tool}' execution failed: {error}")]
    ExecutionFailed { tool: String, error: String },
}

/// Language model producing the next assistant message
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Generate a reply to `messages`
    async fn invoke(&self, messages: &[Message]) -> std::result::Result<Message, ModelError>;
}

/// What a tool call produced
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    /// Result to report back to the model
    Output(Value),
    /// Suspend the thread with this payload; the call runs again on resume
    Interrupt(Value),
}

/// Externally-effectful action the model can request
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// Run the tool
    ///
    /// `ctx` is the invoking node's context; call [`NodeContext::interrupt`] on
    /// it to ask for outside input.
    async fn call(&self, args: &Value, ctx: &mut NodeContext) -> std::result::Result<ToolOutcome, ToolError>;
}

/// Router for the chatbot's conditional edge
///
/// Returns [`TOOLS_NODE`] if the last message requests a tool call, [`END`]
/// otherwise. A state without messages is an error.
pub fn tools_condition(state: &Value) -> Result<String> {
    let last = last_message(state)
        .map_err(StateError::InvalidState)?
        .ok_or_else(|| {
            StateError::InvalidState(format!(
                "no messages found in '{}' channel for tools_condition",
                MESSAGES_CHANNEL
            ))
        })?;

    if last.has_tool_calls() {
        Ok(TOOLS_NODE.to_string())
    } else {
        Ok(END.to_string())
    }
}

/// Node that calls `model` with the message history and appends its reply
pub fn chat_node(model: Arc<dyn ChatModel>) -> NodeFn {
    Arc::new(move |ctx: NodeContext| -> NodeFuture {
        let model = Arc::clone(&model);
        Box::pin(async move {
            let history = messages_in(&ctx.state)
                .map_err(|e| GraphError::node_execution(&ctx.node, e))?
                .unwrap_or_default();

            let reply = model
                .invoke(&history)
                .await
                .map_err(|e| GraphError::node_execution(&ctx.node, e.to_string()))?;

            if reply.tool_calls.len() > 1 {
                return Err(GraphError::TooManyToolCalls {
                    count: reply.tool_calls.len(),
                });
            }

            tracing::debug!(
                node = %ctx.node,
                thread_id = %ctx.thread_id,
                tool_calls = reply.tool_calls.len(),
                "Model replied"
            );
            Ok(NodeResult::Update(json!({ "messages": [reply.to_value()] })))
        })
    })
}

/// Node that executes the tool call requested by the last assistant message
pub fn tool_node(tools: Vec<Arc<dyn Tool>>) -> NodeFn {
    let tools: Arc<HashMap<String, Arc<dyn Tool>>> = Arc::new(
        tools
            .into_iter()
            .map(|tool| (tool.name().to_string(), tool))
            .collect(),
    );

    Arc::new(move |mut ctx: NodeContext| -> NodeFuture {
        let tools = Arc::clone(&tools);
        Box::pin(async move {
            let last = last_message(&ctx.state)
                .map_err(|e| GraphError::node_execution(&ctx.node, e))?
                .filter(|m| m.role == MessageRole::Assistant && m.has_tool_calls())
                .ok_or_else(|| {
                    GraphError::node_execution(&ctx.node, "last message has no tool call to execute")
                })?;

            if last.tool_calls.len() > 1 {
                return Err(GraphError::TooManyToolCalls {
                    count: last.tool_calls.len(),
                });
            }
            let call = &last.tool_calls[0];

            let outcome = match tools.get(&call.name) {
                Some(tool) => tool.call(&call.args, &mut ctx).await,
                None => {
                    let mut available: Vec<&str> = tools.keys().map(String::as_str).collect();
                    available.sort_unstable();
                    Err(ToolError::NotFound {
                        name: call.name.clone(),
                        available: available.join(", "),
                    })
                }
            };

            let content = match outcome {
                Ok(ToolOutcome::Output(value)) => match value {
                    Value::String(text) => text,
                    other => other.to_string(),
                },
                Ok(ToolOutcome::Interrupt(payload)) => {
                    tracing::info!(node = %ctx.node, tool = %call.name, "Tool requested an interrupt");
                    return Ok(NodeResult::Interrupt(payload));
                }
                Err(e) => {
                    tracing::warn!(node = %ctx.node, tool = %call.name, error = %e, "Tool call failed");
                    format!("Error: {}", e)
                }
            };

            let message = Message::tool(content, call.id.clone()).with_name(call.name.clone());
            Ok(NodeResult::Update(json!({ "messages": [message.to_value()] })))
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interrupt::Interrupt;
    use crate::messages::ToolCall;

    struct EchoModel;

    #[async_trait]
    impl ChatModel for EchoModel {
        async fn invoke(&self, messages: &[Message]) -> std::result::Result<Message, ModelError> {
            let last = messages.last().map(|m| m.content.clone()).unwrap_or_default();
            Ok(Message::ai(format!("echo: {}", last)))
        }
    }

    struct GreedyModel;

    #[async_trait]
    impl ChatModel for GreedyModel {
        async fn invoke(&self, _messages: &[Message]) -> std::result::Result<Message, ModelError> {
            Ok(Message::ai("").with_tool_calls(vec![
                ToolCall::new("search", json!({})),
                ToolCall::new("search", json!({})),
            ]))
        }
    }

    struct Upper;

    #[async_trait]
    impl Tool for Upper {
        fn name(&self) -> &str {
            "upper"
        }

        async fn call(&self, args: &Value, _ctx: &mut NodeContext) -> std::result::Result<ToolOutcome, ToolError> {
            let text = args["text"].as_str().ok_or_else(|| ToolError::InvalidArguments {
                tool: "upper".into(),
                error: "missing 'text'".into(),
            })?;
            Ok(ToolOutcome::Output(json!(text.to_uppercase())))
        }
    }

    struct Ask;

    #[async_trait]
    impl Tool for Ask {
        fn name(&self) -> &str {
            "ask"
        }

        async fn call(&self, args: &Value, ctx: &mut NodeContext) -> std::result::Result<ToolOutcome, ToolError> {
            match ctx.interrupt(json!({"query": args["query"]})) {
                Interrupt::Resumed(answer) => Ok(ToolOutcome::Output(answer["data"].clone())),
                Interrupt::Pending(payload) => Ok(ToolOutcome::Interrupt(payload)),
            }
        }
    }

    fn request(name: &str, args: Value) -> Value {
        json!({
            "messages": [
                Message::human("hi").to_value(),
                Message::ai("").with_tool_calls(vec![ToolCall::new(name, args).with_id("c1")]).to_value(),
            ]
        })
    }

    fn single_message(result: NodeResult) -> Message {
        let update = result.state_update().cloned().unwrap();
        let mut messages = messages_in(&update).unwrap().unwrap();
        assert_eq!(messages.len(), 1);
        messages.remove(0)
    }

    #[test]
    fn test_tools_condition() {
        assert_eq!(tools_condition(&request("upper", json!({}))).unwrap(), TOOLS_NODE);
        let done = json!({"messages": [Message::ai("bye").to_value()]});
        assert_eq!(tools_condition(&done).unwrap(), END);
        assert!(tools_condition(&json!({})).is_err());
        assert!(tools_condition(&json!({"messages": []})).is_err());
    }

    #[tokio::test]
    async fn test_chat_node_appends_reply() {
        let node = chat_node(Arc::new(EchoModel));
        let state = json!({"messages": [Message::human("ping").to_value()]});
        let reply = single_message(node(NodeContext::new(state, "chatbot", "t", 0)).await.unwrap());
        assert_eq!(reply.role, MessageRole::Assistant);
        assert_eq!(reply.text(), "echo: ping");
    }

    #[tokio::test]
    async fn test_chat_node_rejects_parallel_tool_calls() {
        let node = chat_node(Arc::new(GreedyModel));
        let err = node(NodeContext::new(json!({}), "chatbot", "t", 0)).await.unwrap_err();
        assert!(matches!(err, GraphError::TooManyToolCalls { count: 2 }));
    }

    #[tokio::test]
    async fn test_tool_node_runs_call() {
        let node = tool_node(vec![Arc::new(Upper)]);
        let ctx = NodeContext::new(request("upper", json!({"text": "abc"})), "tools", "t", 1);
        let message = single_message(node(ctx).await.unwrap());
        assert_eq!(message.role, MessageRole::Tool);
        assert_eq!(message.text(), "ABC");
        assert_eq!(message.tool_call_id.as_deref(), Some("c1"));
        assert_eq!(message.name.as_deref(), Some("upper"));
    }

    #[tokio::test]
    async fn test_tool_errors_become_messages() {
        let node = tool_node(vec![Arc::new(Upper)]);

        let ctx = NodeContext::new(request("upper", json!({})), "tools", "t", 1);
        let message = single_message(node(ctx).await.unwrap());
        assert!(message.text().starts_with("Error: Invalid arguments for tool 'upper'"));

        let ctx = NodeContext::new(request("missing", json!({})), "tools", "t", 1);
        let message = single_message(node(ctx).await.unwrap());
        assert_eq!(
            message.text(),
            "Error: Tool 'missing' not found. Available tools: upper"
        );
    }

    #[tokio::test]
    async fn test_tool_node_interrupt_and_resume() {
        let node = tool_node(vec![Arc::new(Ask)]);
        let state = request("ask", json!({"query": "confirm?"}));

        let first = node(NodeContext::new(state.clone(), "tools", "t", 1)).await.unwrap();
        assert_eq!(first, NodeResult::Interrupt(json!({"query": "confirm?"})));

        let ctx = NodeContext::new(state, "tools", "t", 1).with_resume(json!({"data": "yes"}));
        let message = single_message(node(ctx).await.unwrap());
        assert_eq!(message.text(), "yes");
    }

    #[tokio::test]
    async fn test_tool_node_without_request_fails() {
        let node = tool_node(vec![Arc::new(Upper)]);
        let state = json!({"messages": [Message::ai("no tools").to_value()]});
        let err = node(NodeContext::new(state, "tools", "t", 1)).await.unwrap_err();
        assert!(matches!(err, GraphError::NodeExecution { ref node, .. } if node == "tools"));
    }
}
