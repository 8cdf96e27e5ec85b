//! Shared fixtures for the integration tests: a scripted chat model, a couple
//! of tools, and the chatbot graph wired the usual way.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use stategraph_core::messages::add_messages_reducer;
use stategraph_core::prebuilt::{
    chat_node, tool_node, tools_condition, ChatModel, ModelError, Tool, ToolError, ToolOutcome,
    TOOLS_NODE,
};
use stategraph_core::{
    CompiledGraph, Interrupt, Message, NodeContext, StateGraph, ToolCall, START,
};

/// Chat model that replays canned replies in order
pub struct ScriptedModel {
    replies: Mutex<VecDeque<Message>>,
    calls: AtomicUsize,
    seen: Mutex<Vec<usize>>,
}

impl ScriptedModel {
    pub fn new(replies: Vec<Message>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        })
    }

    /// Number of times the model was invoked
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// History length the model saw on each invocation
    pub fn history_lengths(&self) -> Vec<usize> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn invoke(&self, messages: &[Message]) -> Result<Message, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(messages.len());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ModelError::Request("script exhausted".to_string()))
    }
}

/// Search tool returning a fixed snippet per query
#[derive(Default)]
pub struct SearchTool {
    pub calls: AtomicUsize,
}

#[async_trait]
impl Tool for SearchTool {
    fn name(&self) -> &str {
        "search"
    }

    fn description(&self) -> &str {
        "Search the web"
    }

    async fn call(&self, args: &Value, _ctx: &mut NodeContext) -> Result<ToolOutcome, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let query = args["query"].as_str().ok_or_else(|| ToolError::InvalidArguments {
            tool: "search".to_string(),
            error: "missing 'query'".to_string(),
        })?;
        Ok(ToolOutcome::Output(json!(format!("results for {}", query))))
    }
}

/// Tool that hands the question to a human and returns their answer
pub struct HumanAssistance;

#[async_trait]
impl Tool for HumanAssistance {
    fn name(&self) -> &str {
        "human_assistance"
    }

    fn description(&self) -> &str {
        "Request assistance from a human"
    }

    async fn call(&self, args: &Value, ctx: &mut NodeContext) -> Result<ToolOutcome, ToolError> {
        match ctx.interrupt(json!({"query": args["query"]})) {
            Interrupt::Resumed(answer) => Ok(ToolOutcome::Output(answer["data"].clone())),
            Interrupt::Pending(payload) => Ok(ToolOutcome::Interrupt(payload)),
        }
    }
}

/// START -> chatbot -(tools_condition)-> tools -> chatbot
pub fn chatbot_graph(model: Arc<dyn ChatModel>, tools: Vec<Arc<dyn Tool>>) -> CompiledGraph {
    let mut graph = StateGraph::new();
    graph.add_channel("messages", add_messages_reducer()).unwrap();
    graph.add_node_fn("chatbot", chat_node(model)).unwrap();
    graph.add_node_fn(TOOLS_NODE, tool_node(tools)).unwrap();
    graph.add_edge(START, "chatbot").unwrap();
    graph.add_conditional_edge("chatbot", tools_condition).unwrap();
    graph.add_edge(TOOLS_NODE, "chatbot").unwrap();
    graph.compile().unwrap()
}

/// Input carrying a single user message
pub fn user_input(text: &str) -> Value {
    json!({"messages": [{"role": "user", "content": text}]})
}

/// Assistant reply requesting one tool call
pub fn tool_request(tool: &str, args: Value, call_id: &str) -> Message {
    Message::ai("").with_tool_calls(vec![ToolCall::new(tool, args).with_id(call_id)])
}

/// Decode the `messages` channel of a state
pub fn messages(state: &Value) -> Vec<Message> {
    serde_json::from_value(state["messages"].clone()).unwrap()
}
