//! Event streams for started and resumed runs

use futures::StreamExt;
use serde_json::json;
use stategraph_core::{
    Command, Engine, GraphError, Interrupt, NodeContext, NodeFuture, NodeResult, ReducerKind,
    StateGraph, StreamEvent, ThreadStatus, END, START,
};

fn graph() -> Engine {
    let mut graph = StateGraph::new();
    graph.add_channel("log", ReducerKind::Append).unwrap();
    graph
        .add_update_node("plan", |_state| async { Ok(json!({"log": ["plan"]})) })
        .unwrap();
    graph
        .add_node("review", |mut ctx: NodeContext| -> NodeFuture {
            Box::pin(async move {
                if ctx.get("auto").and_then(|v| v.as_bool()) == Some(true) {
                    return Ok(NodeResult::Update(json!({"log": ["review"]})));
                }
                match ctx.interrupt(json!({"query": "ok?"})) {
                    Interrupt::Resumed(_) => Ok(NodeResult::Update(json!({"log": ["review"]}))),
                    Interrupt::Pending(payload) => Ok(NodeResult::Interrupt(payload)),
                }
            })
        })
        .unwrap();
    graph
        .add_update_node("fail", |state| async move {
            if state["explode"] == true {
                Err(GraphError::node_execution("fail", "boom"))
            } else {
                Ok(json!({"log": ["fail"]}))
            }
        })
        .unwrap();
    graph.add_edge(START, "plan").unwrap();
    graph.add_edge("plan", "review").unwrap();
    graph.add_edge("review", "fail").unwrap();
    graph.add_edge("fail", END).unwrap();
    Engine::new(graph.compile().unwrap())
}

#[tokio::test]
async fn test_stream_emits_steps_in_order() {
    let engine = graph();
    let events: Vec<StreamEvent> = engine.stream("t", json!({"auto": true})).collect().await;

    let kinds: Vec<String> = events
        .iter()
        .map(|e| match e {
            StreamEvent::Values { step, .. } => format!("values:{}", step),
            StreamEvent::Updates { node, .. } => format!("updates:{}", node),
            StreamEvent::Interrupt { node, .. } => format!("interrupt:{}", node),
            StreamEvent::Done { .. } => "done".to_string(),
            StreamEvent::Error { .. } => "error".to_string(),
        })
        .collect();
    assert_eq!(
        kinds,
        vec![
            "values:0",
            "updates:plan",
            "values:1",
            "updates:review",
            "values:2",
            "updates:fail",
            "values:3",
            "done"
        ]
    );

    match events.last().unwrap() {
        StreamEvent::Done { state } => assert_eq!(state["log"], json!(["plan", "review", "fail"])),
        other => panic!("unexpected final event: {:?}", other),
    }
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
}

#[tokio::test]
async fn test_stream_ends_with_interrupt_then_resumes() {
    let engine = graph();
    let events: Vec<StreamEvent> = engine.stream("t", json!({})).collect().await;
    assert_eq!(
        events.last(),
        Some(&StreamEvent::Interrupt {
            node: "review".to_string(),
            payload: json!({"query": "ok?"}),
        })
    );
    assert!(engine.is_suspended("t").await.unwrap());

    let events: Vec<StreamEvent> = engine
        .stream_resume("t", Command::resume(json!("yes")))
        .collect()
        .await;
    assert!(matches!(events.first(), Some(StreamEvent::Updates { node, .. }) if node == "review"));
    assert!(matches!(events.last(), Some(StreamEvent::Done { .. })));
}

#[tokio::test]
async fn test_stream_reports_failure_once() {
    let engine = graph();
    let events: Vec<StreamEvent> = engine
        .stream("t", json!({"auto": true, "explode": true}))
        .collect()
        .await;

    let errors: Vec<&StreamEvent> = events
        .iter()
        .filter(|e| matches!(e, StreamEvent::Error { .. }))
        .collect();
    assert_eq!(errors.len(), 1);
    match events.last().unwrap() {
        StreamEvent::Error { message } => assert!(message.contains("boom")),
        other => panic!("unexpected final event: {:?}", other),
    }
    assert_eq!(engine.thread_status("t").await.unwrap(), Some(ThreadStatus::Failed));

    // Rejected calls surface as a lone error event.
    let events: Vec<StreamEvent> = engine.stream_resume("missing", Command::new()).collect().await;
    assert_eq!(events.len(), 1);
    assert!(matches!(&events[0], StreamEvent::Error { message } if message.contains("missing")));
}

#[test]
fn test_event_wire_format() {
    let event = StreamEvent::Updates {
        node: "plan".to_string(),
        update: json!({"log": ["plan"]}),
    };
    assert_eq!(
        serde_json::to_value(&event).unwrap(),
        json!({"event": "updates", "node": "plan", "update": {"log": ["plan"]}})
    );
}
