//! End-to-end tests for the workflow execution engine.
//!
//! Graphs are built from catalog templates; action nodes are backed by the
//! built-in data nodes or by `MockNode` so delegate inputs can be inspected.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use nodes::mock::MockNode;
use nodes::{ExecutableNode, ExecutionContext, NodeError};

use crate::config::ExecutorConfig;
use crate::events::{EventBus, ExecutionEvent};
use crate::executor::{builtin_registry, WorkflowExecutor};
use crate::logs::{export_logs, LogLevel};
use crate::models::{Execution, ExecutionStatus, Graph, NodeStatus, Subflow};
use crate::subflow::SubflowLibrary;
use crate::testing::{add, link, node};
use crate::EngineError;

fn executor() -> WorkflowExecutor {
    WorkflowExecutor::new(builtin_registry(), ExecutorConfig::default())
}

fn executor_with(template: &str, mock: Arc<MockNode>) -> WorkflowExecutor {
    let mut executor = executor();
    executor.register(template, mock);
    executor
}

fn times_executed(execution: &Execution, node_id: &str) -> usize {
    execution.executed_nodes.iter().filter(|id| id.as_str() == node_id).count()
}

fn position(execution: &Execution, node_id: &str) -> usize {
    execution
        .executed_nodes
        .iter()
        .position(|id| id == node_id)
        .unwrap_or_else(|| panic!("{node_id} never executed"))
}

// ============================================================
// Basic runs
// ============================================================

#[tokio::test]
async fn graph_without_triggers_completes_empty() {
    let mut graph = Graph::new("no triggers");
    let a = add(&mut graph, node("log", json!({})));
    let b = add(&mut graph, node("log", json!({})));
    link(&mut graph, &a, "output", &b, "input");

    let execution = executor().run(&graph).await;

    assert!(execution.executed_nodes.is_empty());
    assert!(execution.errors.is_empty());
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert!(execution.finished_at.is_some());
}

#[tokio::test]
async fn payload_flows_along_a_chain() {
    let sink = Arc::new(MockNode::returning("sink", json!({})));
    let executor = executor_with("send-notification", sink.clone());

    let mut graph = Graph::new("chain");
    let t = add(&mut graph, node("manual-trigger", json!({})));
    let set = add(&mut graph, node("set-fields", json!({ "values": { "title": "hello" } })));
    let count = add(&mut graph, node("counter", json!({ "field": "n" })));
    let send = add(&mut graph, node("send-notification", json!({})));
    link(&mut graph, &t, "output", &set, "input");
    link(&mut graph, &set, "output", &count, "input");
    link(&mut graph, &count, "output", &send, "input");

    let execution = executor.run_with_input(&graph, json!({ "user": "u1" })).await;

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.executed_nodes, vec![t.clone(), set, count, send.clone()]);
    assert_eq!(sink.inputs(), vec![json!({ "user": "u1", "title": "hello", "n": 1 })]);
    assert_eq!(execution.node_states[&send], NodeStatus::Success);
    assert_eq!(execution.node_states[&t], NodeStatus::Success);
}

#[tokio::test]
async fn reruns_are_deterministic() {
    let mut graph = Graph::new("fan out");
    let t = add(&mut graph, node("manual-trigger", json!({})));
    for _ in 0..3 {
        let l = add(&mut graph, node("log", json!({})));
        link(&mut graph, &t, "output", &l, "input");
    }

    let executor = executor();
    let first = executor.run(&graph).await;
    let second = executor.run(&graph).await;

    assert_eq!(first.executed_nodes.len(), 4);
    assert_eq!(first.executed_nodes.len(), second.executed_nodes.len());
    assert_eq!(first.status, second.status);
    assert_ne!(first.id, second.id);
}

#[tokio::test]
async fn node_reached_twice_runs_once_per_activation() {
    let mut graph = Graph::new("repeated activations");
    let t = add(&mut graph, node("manual-trigger", json!({})));
    let each = add(&mut graph, node("for-loop", json!({})));
    let step = add(&mut graph, node("log", json!({})));
    let sink = add(&mut graph, node("log", json!({})));
    link(&mut graph, &t, "output", &each, "input");
    link(&mut graph, &each, "item", &step, "input");
    link(&mut graph, &step, "output", &sink, "input");

    let execution = executor().run_with_input(&graph, json!(["a", "b"])).await;

    assert_eq!(times_executed(&execution, &sink), 2);
    assert_eq!(execution.status, ExecutionStatus::Completed);
}

#[tokio::test]
async fn shared_input_is_rejected_before_running() {
    let mut graph = Graph::new("fan in");
    let t1 = add(&mut graph, node("manual-trigger", json!({})));
    let t2 = add(&mut graph, node("webhook-trigger", json!({})));
    let sink = add(&mut graph, node("log", json!({})));
    link(&mut graph, &t1, "output", &sink, "input");
    link(&mut graph, &t2, "output", &sink, "input");

    let execution = executor().run(&graph).await;

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert!(execution.executed_nodes.is_empty());
    assert!(execution.errors[0].message.contains("already connected"));
}

// ============================================================
// Branching nodes
// ============================================================

fn if_else_graph() -> (Graph, String, String) {
    let mut graph = Graph::new("if-else");
    let t = add(&mut graph, node("manual-trigger", json!({})));
    let cond = add(&mut graph, node("if-else", json!({ "condition": "data.value > 10" })));
    let yes = add(&mut graph, node("log", json!({})));
    let no = add(&mut graph, node("log", json!({})));
    link(&mut graph, &t, "output", &cond, "input");
    link(&mut graph, &cond, "true", &yes, "input");
    link(&mut graph, &cond, "false", &no, "input");
    (graph, yes, no)
}

#[tokio::test]
async fn if_else_fires_only_the_selected_branch() {
    let (graph, yes, no) = if_else_graph();
    let executor = executor();

    let high = executor.run_with_input(&graph, json!({ "value": 11 })).await;
    assert_eq!(times_executed(&high, &yes), 1);
    assert_eq!(times_executed(&high, &no), 0);

    let low = executor.run_with_input(&graph, json!({ "value": 5 })).await;
    assert_eq!(times_executed(&low, &yes), 0);
    assert_eq!(times_executed(&low, &no), 1);
}

#[tokio::test]
async fn switch_routes_to_matching_case() {
    let mut graph = Graph::new("switch");
    let t = add(&mut graph, node("manual-trigger", json!({})));
    let sw = add(
        &mut graph,
        node("switch", json!({ "cases": [{ "value": "a" }, { "value": "b" }] })),
    );
    let case2 = add(&mut graph, node("log", json!({})));
    let fallback = add(&mut graph, node("log", json!({})));
    link(&mut graph, &t, "output", &sw, "input");
    link(&mut graph, &sw, "case2", &case2, "input");
    link(&mut graph, &sw, "default", &fallback, "input");

    let executor = executor();
    let b = executor.run_with_input(&graph, json!("b")).await;
    assert_eq!(times_executed(&b, &case2), 1);
    assert_eq!(times_executed(&b, &fallback), 0);

    let z = executor.run_with_input(&graph, json!("z")).await;
    assert_eq!(times_executed(&z, &case2), 0);
    assert_eq!(times_executed(&z, &fallback), 1);
}

#[tokio::test]
async fn for_loop_runs_body_per_item_before_complete() {
    let body = Arc::new(MockNode::returning("body", json!({ "seen": true })));
    let executor = executor_with("send-notification", body.clone());

    let mut graph = Graph::new("for-loop");
    let t = add(&mut graph, node("manual-trigger", json!({})));
    let each = add(&mut graph, node("for-loop", json!({})));
    let item = add(&mut graph, node("send-notification", json!({})));
    let done = add(&mut graph, node("log", json!({})));
    link(&mut graph, &t, "output", &each, "input");
    link(&mut graph, &each, "item", &item, "input");
    link(&mut graph, &each, "complete", &done, "input");

    let execution = executor.run_with_input(&graph, json!([1, 2, 3])).await;

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(times_executed(&execution, &item), 3);
    let items: Vec<Value> = body.inputs().iter().map(|i| i["item"].clone()).collect();
    assert_eq!(items, vec![json!(1), json!(2), json!(3)]);

    // Every body activation precedes the completion branch.
    let last_item = execution.executed_nodes.iter().rposition(|id| *id == item).unwrap();
    assert!(last_item < position(&execution, &done));

    let completion = execution
        .logs
        .iter()
        .find(|l| l.node_id.as_deref() == Some(each.as_str()) && l.data.is_some())
        .unwrap();
    assert_eq!(completion.data.as_ref().unwrap()["ports"], json!(["complete"]));
}

#[tokio::test]
async fn switch_routes_beyond_the_default_three_cases() {
    let mut graph = Graph::new("wide switch");
    let t = add(&mut graph, node("manual-trigger", json!({})));
    let sw = add(
        &mut graph,
        node(
            "switch",
            json!({ "cases": [{ "value": "a" }, { "value": "b" }, { "value": "c" }, { "value": "d" }] }),
        ),
    );
    let case4 = add(&mut graph, node("log", json!({})));
    let fallback = add(&mut graph, node("log", json!({})));
    link(&mut graph, &t, "output", &sw, "input");
    link(&mut graph, &sw, "case4", &case4, "input");
    link(&mut graph, &sw, "default", &fallback, "input");

    let execution = executor().run_with_input(&graph, json!("d")).await;

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(times_executed(&execution, &case4), 1);
    assert_eq!(times_executed(&execution, &fallback), 0);
}

#[tokio::test]
async fn switch_without_a_matching_port_fails_the_node() {
    let mut graph = Graph::new("stale switch");
    let t = add(&mut graph, node("manual-trigger", json!({})));
    let mut stale = node("switch", json!({}));
    stale.config.insert(
        "cases".into(),
        json!([{ "value": 1 }, { "value": 2 }, { "value": 3 }, { "value": 4 }]),
    );
    let sw = add(&mut graph, stale);
    link(&mut graph, &t, "output", &sw, "input");

    let execution = executor().run_with_input(&graph, json!(4)).await;

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(execution.node_states[&sw], NodeStatus::Error);
    assert!(execution.errors[0].message.contains("case4"));
}

#[tokio::test]
async fn for_loop_complete_payload_carries_results() {
    let done = Arc::new(MockNode::returning("done", json!({})));
    let executor = executor_with("send-notification", done.clone());

    let mut graph = Graph::new("for-loop results");
    let t = add(&mut graph, node("manual-trigger", json!({})));
    let each = add(&mut graph, node("for-loop", json!({})));
    let item = add(&mut graph, node("counter", json!({ "field": "item" })));
    let sink = add(&mut graph, node("send-notification", json!({})));
    link(&mut graph, &t, "output", &each, "input");
    link(&mut graph, &each, "item", &item, "input");
    link(&mut graph, &each, "complete", &sink, "input");

    executor.run_with_input(&graph, json!({ "items": [1, 2, 3] })).await;

    let received = &done.inputs()[0];
    assert_eq!(received["count"], json!(3));
    let results = received["results"].as_array().unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(results[0]["item"], json!(2));
}

#[tokio::test]
async fn while_loop_iterates_until_condition_fails() {
    let exit = Arc::new(MockNode::returning("exit", json!({})));
    let executor = executor_with("send-notification", exit.clone());

    let mut graph = Graph::new("while");
    let t = add(&mut graph, node("manual-trigger", json!({})));
    let wl = add(&mut graph, node("while-loop", json!({ "condition": "data.count < 3" })));
    let inc = add(&mut graph, node("counter", json!({ "field": "count" })));
    let out = add(&mut graph, node("send-notification", json!({})));
    link(&mut graph, &t, "output", &wl, "input");
    link(&mut graph, &wl, "loop", &inc, "input");
    link(&mut graph, &wl, "exit", &out, "input");

    let execution = executor.run_with_input(&graph, json!({ "count": 0 })).await;

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(times_executed(&execution, &inc), 3);
    assert_eq!(exit.inputs()[0]["iterations"], json!(3));
    assert_eq!(exit.inputs()[0]["count"], json!(3));
    assert_eq!(execution.node_states[&wl], NodeStatus::Success);
}

#[tokio::test]
async fn always_true_while_loop_stops_at_cap() {
    let exit = Arc::new(MockNode::returning("exit", json!({})));
    let executor = executor_with("send-notification", exit.clone());

    let mut graph = Graph::new("while cap");
    let t = add(&mut graph, node("manual-trigger", json!({})));
    let wl = add(&mut graph, node("while-loop", json!({ "condition": "true", "maxIterations": 100 })));
    let body = add(&mut graph, node("log", json!({})));
    let out = add(&mut graph, node("send-notification", json!({})));
    link(&mut graph, &t, "output", &wl, "input");
    link(&mut graph, &wl, "loop", &body, "input");
    link(&mut graph, &wl, "exit", &out, "input");

    let execution = executor.run(&graph).await;

    assert_eq!(times_executed(&execution, &body), 100);
    assert_eq!(exit.inputs()[0]["iterations"], json!(100));
    assert!(execution.logs.iter().any(|l| l.level == LogLevel::Warn && l.message.contains("cap")));
}

#[tokio::test]
async fn for_loop_keeps_going_after_a_failed_iteration() {
    let mut executor = executor();
    executor.register("http-request", Arc::new(MockNode::failing_fatal("body", "rejected")));
    let done = Arc::new(MockNode::returning("done", json!({})));
    executor.register("send-notification", done.clone());

    let mut graph = Graph::new("for-loop failures");
    let t = add(&mut graph, node("manual-trigger", json!({})));
    let each = add(&mut graph, node("for-loop", json!({})));
    let call = add(&mut graph, node("http-request", json!({})));
    let sink = add(&mut graph, node("send-notification", json!({})));
    link(&mut graph, &t, "output", &each, "input");
    link(&mut graph, &each, "item", &call, "input");
    link(&mut graph, &each, "complete", &sink, "input");

    let execution = executor.run_with_input(&graph, json!([1, 2, 3])).await;

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(times_executed(&execution, &call), 3);
    assert_eq!(execution.errors.len(), 3);
    assert!(execution.errors.iter().all(|e| e.node_id.as_deref() == Some(call.as_str())));
    assert!(execution.errors[0].message.contains("rejected"));

    let received = &done.inputs()[0];
    assert_eq!(received["results"], json!([null, null, null]));
    assert_eq!(received["count"], json!(3));
    assert_eq!(execution.node_states[&each], NodeStatus::Success);
}

#[tokio::test(start_paused = true)]
async fn while_loop_keeps_going_after_a_timed_out_iteration() {
    let config = ExecutorConfig {
        node_timeout: Duration::from_millis(50),
        ..ExecutorConfig::default()
    };
    let mut executor = WorkflowExecutor::new(builtin_registry(), config);
    executor.register(
        "http-request",
        Arc::new(MockNode::delayed("hang", Duration::from_secs(10), json!({}))),
    );
    let exit = Arc::new(MockNode::returning("exit", json!({})));
    executor.register("send-notification", exit.clone());

    let mut graph = Graph::new("while timeouts");
    let t = add(&mut graph, node("manual-trigger", json!({})));
    let wl = add(&mut graph, node("while-loop", json!({ "condition": "true", "maxIterations": 3 })));
    let call = add(&mut graph, node("http-request", json!({})));
    let out = add(&mut graph, node("send-notification", json!({})));
    link(&mut graph, &t, "output", &wl, "input");
    link(&mut graph, &wl, "loop", &call, "input");
    link(&mut graph, &wl, "exit", &out, "input");

    let execution = executor.run(&graph).await;

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(times_executed(&execution, &call), 3);
    assert_eq!(execution.errors.len(), 3);
    assert!(execution.errors.iter().all(|e| e.message.contains("timed out")));
    assert_eq!(exit.inputs()[0]["iterations"], json!(3));
    assert_eq!(times_executed(&execution, &out), 1);
}

#[tokio::test]
async fn router_sends_memory_to_first_matching_rule() {
    let mut graph = Graph::new("router");
    let t = add(&mut graph, node("memory-created", json!({})));
    let router = add(
        &mut graph,
        node(
            "memory-router",
            json!({
                "rules": [
                    { "condition": "data.tags.length > 2", "output": "important" },
                    { "condition": "data.age > 30", "output": "archive" }
                ]
            }),
        ),
    );
    let important = add(&mut graph, node("log", json!({})));
    let archive = add(&mut graph, node("log", json!({})));
    link(&mut graph, &t, "memory", &router, "memory");
    link(&mut graph, &router, "important", &important, "input");
    link(&mut graph, &router, "archive", &archive, "input");

    let executor = executor();
    let run = executor
        .run_with_input(&graph, json!({ "tags": ["a", "b", "c"], "age": 40 }))
        .await;
    assert_eq!(times_executed(&run, &important), 1);
    assert_eq!(times_executed(&run, &archive), 0);

    // Default port has no connection: the router ends the branch.
    let run = executor.run_with_input(&graph, json!({ "tags": [], "age": 1 })).await;
    assert_eq!(run.executed_nodes.len(), 2);
    assert_eq!(run.status, ExecutionStatus::Completed);
}

// ============================================================
// Failure handling
// ============================================================

#[tokio::test]
async fn failing_branch_does_not_cancel_siblings() {
    let mut executor = executor();
    executor.register("http-request", Arc::new(MockNode::failing_fatal("bad", "boom")));
    executor.register(
        "send-notification",
        Arc::new(MockNode::delayed("slow", Duration::from_millis(20), json!({ "ok": true }))),
    );

    let mut graph = Graph::new("fail-soft");
    let t = add(&mut graph, node("manual-trigger", json!({})));
    let bad = add(&mut graph, node("http-request", json!({})));
    let slow = add(&mut graph, node("send-notification", json!({})));
    let after_bad = add(&mut graph, node("log", json!({})));
    let after_slow = add(&mut graph, node("log", json!({})));
    link(&mut graph, &t, "output", &bad, "input");
    link(&mut graph, &t, "output", &slow, "input");
    link(&mut graph, &bad, "response", &after_bad, "input");
    link(&mut graph, &slow, "output", &after_slow, "input");

    let execution = executor.run(&graph).await;

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(execution.errors.len(), 1);
    assert_eq!(execution.errors[0].node_id.as_deref(), Some(bad.as_str()));
    assert!(execution.errors[0].message.contains("boom"));

    assert_eq!(execution.node_states[&bad], NodeStatus::Error);
    assert_eq!(execution.node_states[&slow], NodeStatus::Success);
    assert_eq!(times_executed(&execution, &after_slow), 1);
    assert_eq!(times_executed(&execution, &after_bad), 0);
    assert!(execution.finished_at.is_some());
}

#[tokio::test(start_paused = true)]
async fn slow_delegate_times_out() {
    let config = ExecutorConfig {
        node_timeout: Duration::from_millis(50),
        ..ExecutorConfig::default()
    };
    let mut executor = WorkflowExecutor::new(builtin_registry(), config);
    executor.register(
        "http-request",
        Arc::new(MockNode::delayed("hang", Duration::from_secs(10), json!({}))),
    );

    let mut graph = Graph::new("timeout");
    let t = add(&mut graph, node("manual-trigger", json!({})));
    let call = add(&mut graph, node("http-request", json!({})));
    let fine = add(&mut graph, node("log", json!({})));
    link(&mut graph, &t, "output", &call, "input");
    link(&mut graph, &t, "output", &fine, "input");

    let execution = executor.run(&graph).await;

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert!(execution.errors[0].message.contains("timed out"));
    assert_eq!(execution.node_states[&call], NodeStatus::Error);
    assert_eq!(execution.node_states[&fine], NodeStatus::Success);
}

#[tokio::test]
async fn unregistered_action_fails_its_node() {
    let mut graph = Graph::new("unregistered");
    let t = add(&mut graph, node("manual-trigger", json!({})));
    let call = add(&mut graph, node("ai-summarize", json!({})));
    link(&mut graph, &t, "output", &call, "text");

    let execution = executor().run(&graph).await;

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(execution.errors[0].node_id.as_deref(), Some(call.as_str()));
    assert!(execution.errors[0].message.contains("no implementation"));
}

#[tokio::test]
async fn malformed_graph_fails_before_running() {
    let mut graph = Graph::new("broken");
    let t = add(&mut graph, node("manual-trigger", json!({})));
    let l = add(&mut graph, node("log", json!({})));
    link(&mut graph, &t, "output", &l, "input");
    graph.connections[0].target.node_id = "ghost".into();

    let execution = executor().run(&graph).await;

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert!(execution.executed_nodes.is_empty());
    assert_eq!(execution.errors[0].node_id, None);
    assert!(execution.finished_at.is_some());
}

#[tokio::test]
async fn self_referencing_subflow_is_bounded_by_max_depth() {
    let config = ExecutorConfig {
        max_depth: 5,
        ..ExecutorConfig::default()
    };

    let mut inner = node("subflow", json!({ "subflowId": "again" }));
    inner.outputs.retain(|p| p.key != "error");
    let mut library = SubflowLibrary::new();
    library.register(Subflow {
        id: "again".into(),
        name: "Again".into(),
        nodes: vec![inner],
        connections: Vec::new(),
        inputs: Vec::new(),
        outputs: Vec::new(),
        input_mapping: BTreeMap::new(),
        output_mapping: BTreeMap::new(),
        output_sources: BTreeMap::new(),
        reusable: true,
    });
    let executor = WorkflowExecutor::new(builtin_registry(), config).with_subflows(library);

    let mut graph = Graph::new("recursion");
    let t = add(&mut graph, node("manual-trigger", json!({})));
    let mut outer = node("subflow", json!({ "subflowId": "again" }));
    outer.outputs.retain(|p| p.key != "error");
    let sub = add(&mut graph, outer);
    link(&mut graph, &t, "output", &sub, "input");

    let execution = executor.run(&graph).await;

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(execution.executed_nodes.len(), 2);
    assert_eq!(execution.errors[0].node_id.as_deref(), Some(sub.as_str()));
    assert!(execution.errors[0].message.contains("depth"));
}

struct Panicking;

#[async_trait]
impl ExecutableNode for Panicking {
    async fn execute(&self, _input: Value, _ctx: &ExecutionContext) -> Result<Value, NodeError> {
        panic!("delegate bug");
    }
}

#[tokio::test]
async fn panicking_delegate_still_yields_a_finished_record() {
    let mut executor = executor();
    executor.register("http-request", Arc::new(Panicking));

    let mut graph = Graph::new("panic");
    let t = add(&mut graph, node("manual-trigger", json!({})));
    let call = add(&mut graph, node("http-request", json!({})));
    link(&mut graph, &t, "output", &call, "input");

    let execution = executor.run(&graph).await;

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert!(execution.finished_at.is_some());
    assert_eq!(execution.errors[0].node_id.as_deref(), Some(call.as_str()));
    assert!(execution.errors[0].message.contains("panicked"));
    assert_eq!(execution.node_states[&call], NodeStatus::Error);
}

#[tokio::test]
async fn panicking_delegate_does_not_cancel_siblings() {
    let mut executor = executor();
    executor.register("http-request", Arc::new(Panicking));
    executor.register(
        "send-notification",
        Arc::new(MockNode::delayed("slow", Duration::from_millis(20), json!({ "ok": true }))),
    );

    let mut graph = Graph::new("panic fan-out");
    let t = add(&mut graph, node("manual-trigger", json!({})));
    let call = add(&mut graph, node("http-request", json!({})));
    let slow = add(&mut graph, node("send-notification", json!({})));
    let after_slow = add(&mut graph, node("log", json!({})));
    link(&mut graph, &t, "output", &call, "input");
    link(&mut graph, &t, "output", &slow, "input");
    link(&mut graph, &slow, "output", &after_slow, "input");

    let execution = executor.run(&graph).await;

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(execution.errors.len(), 1);
    assert_eq!(execution.node_states[&call], NodeStatus::Error);
    assert_eq!(execution.node_states[&slow], NodeStatus::Success);
    assert_eq!(times_executed(&execution, &after_slow), 1);
}

// ============================================================
// Subflows
// ============================================================

#[tokio::test]
async fn subflow_node_runs_its_body_and_continues() {
    let sink = Arc::new(MockNode::returning("sink", json!({})));

    let mut body = Graph::new("tag");
    add(&mut body, node("set-fields", json!({ "values": { "tagged": true } })));
    let mut library = SubflowLibrary::new();
    library.register(Subflow {
        id: "tag".into(),
        name: "Tag".into(),
        nodes: body.nodes,
        connections: body.connections,
        inputs: Vec::new(),
        outputs: Vec::new(),
        input_mapping: BTreeMap::new(),
        output_mapping: BTreeMap::new(),
        output_sources: BTreeMap::new(),
        reusable: true,
    });
    let mut executor = executor().with_subflows(library);
    executor.register("send-notification", sink.clone());

    let mut graph = Graph::new("outer");
    let t = add(&mut graph, node("manual-trigger", json!({})));
    let sub = add(&mut graph, node("subflow", json!({ "subflowId": "tag" })));
    let out = add(&mut graph, node("send-notification", json!({})));
    let on_error = add(&mut graph, node("log", json!({})));
    link(&mut graph, &t, "output", &sub, "input");
    link(&mut graph, &sub, "output", &out, "input");
    link(&mut graph, &sub, "error", &on_error, "input");

    let execution = executor.run_with_input(&graph, json!({ "id": 7 })).await;

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(sink.inputs(), vec![json!({ "id": 7, "tagged": true })]);
    assert_eq!(times_executed(&execution, &on_error), 0);
    // Nested nodes are recorded on their own execution, not the caller's.
    assert_eq!(execution.executed_nodes.len(), 3);
}

#[tokio::test]
async fn unknown_subflow_fails_the_composite_node() {
    let mut graph = Graph::new("outer");
    let t = add(&mut graph, node("manual-trigger", json!({})));
    let sub = add(&mut graph, node("subflow", json!({ "subflowId": "missing" })));
    link(&mut graph, &t, "output", &sub, "input");

    let execution = executor().run(&graph).await;

    assert_eq!(execution.node_states[&sub], NodeStatus::Error);
    assert!(execution.errors[0].message.contains("missing"));
}

// ============================================================
// Events, logs, test entry points
// ============================================================

#[tokio::test]
async fn progress_events_bracket_the_run() {
    let bus = Arc::new(EventBus::new(64));
    let mut rx = bus.subscribe();
    let executor = executor().with_events(bus);

    let (graph, _, _) = if_else_graph();
    let execution = executor.run_with_input(&graph, json!({ "value": 11 })).await;

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }

    assert_eq!(
        events.first(),
        Some(&ExecutionEvent::RunStarted {
            execution_id: execution.id,
            graph_id: graph.id
        })
    );
    assert_eq!(
        events.last(),
        Some(&ExecutionEvent::RunFinished {
            execution_id: execution.id,
            status: ExecutionStatus::Completed
        })
    );
    let started = events
        .iter()
        .filter(|e| matches!(e, ExecutionEvent::NodeStarted { .. }))
        .count();
    assert_eq!(started, 3);
}

#[tokio::test]
async fn logs_export_as_a_json_array() {
    let (graph, _, _) = if_else_graph();
    let execution = executor().run_with_input(&graph, json!({ "value": 1 })).await;

    let exported: Vec<Value> = serde_json::from_str(&export_logs(&execution).unwrap()).unwrap();
    assert!(!exported.is_empty());
    for entry in &exported {
        assert_eq!(entry["executionId"], json!(execution.id));
        assert!(entry.get("timestamp").is_some());
        assert!(entry.get("level").is_some());
    }
}

#[tokio::test]
async fn test_node_evaluates_a_single_node() {
    let cond = node("if-else", json!({ "condition": "data.value > 10" }));
    let outcome = executor().test_node(&cond, json!({ "value": 11 })).await.unwrap();
    assert_eq!(outcome.ports, vec!["true"]);

    let call = node("http-request", json!({}));
    let err = executor().test_node(&call, json!({})).await.unwrap_err();
    assert!(matches!(err, EngineError::NodeExecution { .. }));
}

#[tokio::test]
async fn test_graph_starts_from_roots_without_triggers() {
    let mut graph = Graph::new("no trigger");
    let set = add(&mut graph, node("set-fields", json!({ "values": { "x": 1 } })));
    let l = add(&mut graph, node("log", json!({})));
    link(&mut graph, &set, "output", &l, "input");

    let execution = executor().test_graph(&graph, json!({ "seed": true })).await;

    assert_eq!(execution.executed_nodes, vec![set, l]);
    assert_eq!(execution.status, ExecutionStatus::Completed);
}
