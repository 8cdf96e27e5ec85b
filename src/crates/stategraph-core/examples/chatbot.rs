//! Interactive chatbot with a tool loop, human assistance and rate limiting
//!
//! The model is a small rule-based stand-in so the example runs offline:
//! mentioning "expert" makes it ask a human, mentioning "search" makes it call
//! the search tool, anything else gets a direct answer.
//!
//! ```text
//! cargo run --example chatbot
//! RUST_LOG=stategraph_core=debug cargo run --example chatbot
//! ```

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use std::sync::Arc;
use stategraph_core::messages::add_messages_reducer;
use stategraph_core::prebuilt::{
    chat_node, tool_node, tools_condition, ChatModel, ModelError, Tool, ToolError, ToolOutcome,
    TOOLS_NODE,
};
use stategraph_core::{
    Command, Engine, EngineConfig, EventStream, Interrupt, Message, MessageRole, NodeContext,
    StateGraph, StreamEvent, ToolCall, START,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

struct RuleModel;

#[async_trait]
impl ChatModel for RuleModel {
    async fn invoke(&self, messages: &[Message]) -> Result<Message, ModelError> {
        let last = messages
            .last()
            .ok_or_else(|| ModelError::InvalidResponse("empty history".to_string()))?;

        if last.role == MessageRole::Tool {
            return Ok(Message::ai(format!("Here is what I found: {}", last.text())));
        }

        let text = last.text().to_lowercase();
        if text.contains("expert") {
            Ok(Message::ai("").with_tool_calls(vec![ToolCall::new(
                "human_assistance",
                json!({"query": last.text()}),
            )]))
        } else if text.contains("search") {
            Ok(Message::ai("").with_tool_calls(vec![ToolCall::new(
                "search",
                json!({"query": last.text()}),
            )]))
        } else {
            Ok(Message::ai(format!("You said: {}", last.text())))
        }
    }
}

struct Search;

#[async_trait]
impl Tool for Search {
    fn name(&self) -> &str {
        "search"
    }

    async fn call(&self, args: &Value, _ctx: &mut NodeContext) -> Result<ToolOutcome, ToolError> {
        let query = args["query"].as_str().unwrap_or_default();
        Ok(ToolOutcome::Output(json!(format!(
            "Graph runtimes persist state between steps (2 results for '{}')",
            query
        ))))
    }
}

struct HumanAssistance;

#[async_trait]
impl Tool for HumanAssistance {
    fn name(&self) -> &str {
        "human_assistance"
    }

    async fn call(&self, args: &Value, ctx: &mut NodeContext) -> Result<ToolOutcome, ToolError> {
        match ctx.interrupt(json!({"query": args["query"]})) {
            Interrupt::Resumed(answer) => Ok(ToolOutcome::Output(answer["data"].clone())),
            Interrupt::Pending(payload) => Ok(ToolOutcome::Interrupt(payload)),
        }
    }
}

/// Print assistant output; report whether the run suspended
async fn drain(mut events: EventStream) -> bool {
    let mut suspended = false;
    while let Some(event) = events.next().await {
        match event {
            StreamEvent::Updates { node, update } if node == "chatbot" => {
                if let Some(reply) = update["messages"][0]["content"].as_str() {
                    if !reply.is_empty() {
                        println!("Assistant: {}", reply);
                    }
                }
            }
            StreamEvent::Interrupt { payload, .. } => {
                println!("Graph interrupted: {}", payload["query"]);
                suspended = true;
            }
            StreamEvent::Error { message } => eprintln!("Error: {}", message),
            _ => {}
        }
    }
    suspended
}

async fn prompt(lines: &mut tokio::io::Lines<BufReader<tokio::io::Stdin>>, label: &str) -> Option<String> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(label.as_bytes()).await.ok()?;
    stdout.flush().await.ok()?;
    lines.next_line().await.ok().flatten()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt().with_env_filter(rust_log).init();

    let mut graph = StateGraph::new();
    graph.add_channel("messages", add_messages_reducer())?;
    graph.add_node_fn("chatbot", chat_node(Arc::new(RuleModel)))?;
    let tools: Vec<Arc<dyn Tool>> = vec![Arc::new(Search), Arc::new(HumanAssistance)];
    graph.add_node_fn(TOOLS_NODE, tool_node(tools))?;
    graph.add_edge(START, "chatbot")?;
    graph.add_conditional_edge("chatbot", tools_condition)?;
    graph.add_edge(TOOLS_NODE, "chatbot")?;

    let config = EngineConfig::new().with_rate_limit("chatbot", 1.0, 2.0);
    let engine = Engine::from_config(graph.compile()?, &config).await?;
    let thread_id = "1";

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(input) = prompt(&mut lines, "User: ").await {
        let input = input.trim().to_string();
        if matches!(input.to_lowercase().as_str(), "quit" | "exit" | "q") {
            println!("Goodbye!");
            break;
        }

        let events = engine.stream(thread_id, json!({"messages": [{"role": "user", "content": input}]}));
        let mut suspended = drain(events).await;

        while suspended {
            let Some(answer) = prompt(&mut lines, "Please provide input to resume: ").await else {
                return Ok(());
            };
            let events = engine.stream_resume(thread_id, Command::resume(json!({"data": answer.trim()})));
            suspended = drain(events).await;
        }
    }

    Ok(())
}
