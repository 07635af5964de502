//! Tests for `engine`.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::config::{EngineConfig, FailurePolicy, ParallelSuccessPolicy};
use crate::driver::{Driver, DriverTable, EchoDriver, FnDriver};
use crate::engine::ExecutionEngine;
use crate::ibl_parser::parse;
use crate::registry::NodeRegistry;
use crate::types::{
  ActionDescriptor, ActionHandler, ExecutionContext, NodeDescriptor, Params, ResultEnvelope, Step,
};

/// `math:*` on a driver that understands `add`, `fail` and `boom`, plus `source:*` echoed.
fn registry() -> Arc<NodeRegistry> {
  let mut pkg = ActionDescriptor::code("Package tool");
  pkg.handler = ActionHandler::Package {
    package_id: "weather-pkg".to_string(),
    tool: "forecast_tool".to_string(),
  };
  Arc::new(NodeRegistry::in_memory([
    NodeDescriptor::new("math")
      .with_action("add", ActionDescriptor::code("Add n to the previous result"))
      .with_action("fail", ActionDescriptor::code("Always fails"))
      .with_action("boom", ActionDescriptor::code("Panics"))
      .with_action("slow", ActionDescriptor::code("Sleeps")),
    NodeDescriptor::new("source")
      .with_action("echo", ActionDescriptor::code("Echo"))
      .with_action("weather", pkg),
  ]))
}

fn math_driver() -> FnDriver {
  FnDriver::new(|action, _target, params, _ctx| match action {
    "add" => {
      let base = params
        .get("_prev_result")
        .and_then(Value::as_i64)
        .unwrap_or(0);
      let n = params.get("n").and_then(Value::as_i64).unwrap_or(1);
      Ok(ResultEnvelope::success(base + n))
    }
    "fail" => Err("math says no".to_string()),
    "boom" => panic!("driver exploded"),
    other => Err(format!("unsupported action {}", other)),
  })
}

struct SlowDriver;

#[async_trait]
impl Driver for SlowDriver {
  async fn execute(
    &self,
    _action: &str,
    _target: Option<&str>,
    _params: &Params,
    _ctx: &ExecutionContext,
  ) -> Result<ResultEnvelope, String> {
    tokio::time::sleep(Duration::from_secs(5)).await;
    Ok(ResultEnvelope::empty_success())
  }
}

fn engine_with(config: EngineConfig) -> ExecutionEngine {
  let drivers = DriverTable::new()
    .with_node("math", Arc::new(math_driver()))
    .with_node("source", Arc::new(EchoDriver))
    .with_package("weather-pkg", Arc::new(EchoDriver));
  ExecutionEngine::new(registry(), drivers).with_config(config)
}

fn engine() -> ExecutionEngine {
  engine_with(EngineConfig::default())
}

async fn run(engine: &ExecutionEngine, code: &str) -> Vec<ResultEnvelope> {
  engine
    .execute_text(code, &ExecutionContext::new())
    .await
    .expect("program parses")
}

#[tokio::test]
async fn sequence_threads_previous_result() {
  let results = run(&engine(), r#"[math:add]{"n": 2} >> [math:add]{"n": 3} >> [math:add]"#).await;
  assert_eq!(results.len(), 1);
  assert!(results[0].success);
  assert_eq!(results[0].data, Some(json!(6)));
}

#[tokio::test]
async fn placeholder_replaces_injection() {
  let results = run(
    &engine(),
    r#"[math:add]{"n": 4} >> [source:echo]("got {{_prev_result}}"){"raw": "{{_prev_result}}"}"#,
  )
  .await;
  let data = results[0].data.as_ref().unwrap();
  assert_eq!(data["target"], json!("got 4"));
  assert_eq!(data["params"]["raw"], json!(4));
  assert!(data["params"].get("_prev_result").is_none());
}

#[tokio::test]
async fn parallel_collects_branches_in_order() {
  let results = run(&engine(), r#"[math:add]{"n": 1} & [math:fail] & [math:add]{"n": 3}"#).await;
  let result = &results[0];
  assert!(result.success);
  assert_eq!(result.summary.as_deref(), Some("2/3 parallel branches succeeded"));
  let branches = result.data.as_ref().unwrap().as_array().unwrap();
  assert_eq!(branches.len(), 3);
  assert_eq!(branches[0]["data"], json!(1));
  assert_eq!(branches[1]["success"], json!(false));
  assert_eq!(branches[2]["data"], json!(3));

  let strict = engine_with(EngineConfig::default().with_parallel_success(ParallelSuccessPolicy::All));
  let results = run(&strict, r#"[math:add] & [math:fail]"#).await;
  assert!(!results[0].success);
  assert!(results[0].error_message().contains("branch 2: math says no"));
}

#[tokio::test]
async fn fallback_returns_first_success() {
  let results = run(&engine(), r#"[math:fail] ?? [math:add]{"n": 7} ?? [math:boom]"#).await;
  assert!(results[0].success);
  assert_eq!(results[0].data, Some(json!(7)));

  let results = run(&engine(), "[math:fail] ?? [math:nope]").await;
  assert!(!results[0].success);
  let error = results[0].error_message();
  assert!(error.starts_with("all 2 fallback branches failed"));
  assert!(error.contains("unknown action 'nope'"));
}

#[tokio::test]
async fn binding_is_evaluated_once_at_first_use() {
  let calls = Arc::new(AtomicUsize::new(0));
  let counter = Arc::clone(&calls);
  let counting = FnDriver::new(move |_action, _target, _params, _ctx| {
    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
    Ok(ResultEnvelope::success(format!("v{}", n)))
  });
  let drivers = DriverTable::new()
    .with_node("math", Arc::new(counting))
    .with_node("source", Arc::new(EchoDriver));
  let engine = ExecutionEngine::new(registry(), drivers);

  let program = parse(
    "$x = [math:add]\n[source:echo]($x)\n[source:echo]($x) & [source:echo]{\"v\": \"$x\"}",
  )
  .unwrap();
  assert_eq!(calls.load(Ordering::SeqCst), 0);
  let run = engine.run_program(&program, &ExecutionContext::new()).await;
  assert!(run.success());
  assert_eq!(calls.load(Ordering::SeqCst), 1);
  assert_eq!(run.results[0].data.as_ref().unwrap()["target"], json!("v1"));
  let branches = run.results[1].data.as_ref().unwrap().as_array().unwrap();
  assert_eq!(branches[1]["data"]["params"]["v"], json!("v1"));
}

#[tokio::test]
async fn unused_binding_is_never_evaluated() {
  let results = run(&engine(), "$x = [math:boom]\n[math:add]").await;
  assert!(results[0].success);
}

#[tokio::test]
async fn failed_binding_fails_referencing_step() {
  let results = run(&engine(), "$x = [math:fail]\n[source:echo]($x)").await;
  assert!(!results[0].success);
  assert_eq!(results[0].error_message(), "variable '$x' failed: math says no");
}

#[tokio::test]
async fn routing_errors_become_failure_envelopes() {
  let results = run(&engine(), "[ghost:run]\n[math:nope]").await;
  assert_eq!(results.len(), 2);
  assert!(results[0].error_message().contains("ghost"));
  assert!(results[1].error_message().contains("nope"));
}

#[tokio::test]
async fn disallowed_node_is_not_dispatched() {
  let ctx = ExecutionContext::new().with_allowed_nodes(["source"]);
  let results = engine()
    .execute_text("[math:add]", &ctx)
    .await
    .unwrap();
  assert!(!results[0].success);
  assert!(results[0].error_message().contains("math"));
}

#[tokio::test]
async fn driver_panic_is_contained() {
  let results = run(&engine(), "[math:boom] >> [math:add]").await;
  assert!(!results[0].success);
  assert!(results[0].error_message().contains("driver exploded"));
}

#[tokio::test]
async fn driver_timeout_is_a_failure() {
  let drivers = DriverTable::new().with_node("math", Arc::new(SlowDriver));
  let engine = ExecutionEngine::new(registry(), drivers).with_config(
    EngineConfig::default().with_driver_timeout(Some(Duration::from_millis(20))),
  );
  let result = engine
    .execute_step(&Step::new("math", "slow"), &ExecutionContext::new())
    .await;
  assert!(!result.success);
  assert!(result.error_message().contains("timed out after 20 ms"));
}

#[tokio::test]
async fn continue_policy_runs_remaining_groups() {
  let code = r#"[math:fail] >> [math:add]{"n": 5}"#;
  let aborted = run(&engine(), code).await;
  assert!(!aborted[0].success);

  let lenient = engine_with(EngineConfig::default().with_failure_policy(FailurePolicy::Continue));
  let continued = run(&lenient, code).await;
  assert!(continued[0].success);
  assert_eq!(continued[0].data, Some(json!(5)));
}

#[tokio::test]
async fn package_actions_use_tool_name() {
  let result = engine()
    .execute_step(
      &Step::new("source", "weather").with_target("Seoul"),
      &ExecutionContext::new(),
    )
    .await;
  assert!(result.success);
  let data = result.data.unwrap();
  assert_eq!(data["action"], json!("forecast_tool"));
  assert_eq!(data["target"], json!("Seoul"));
}

#[tokio::test]
async fn execute_step_without_bindings_rejects_variables() {
  let result = engine()
    .execute_step(&Step::new("source", "echo").with_target("$x"), &ExecutionContext::new())
    .await;
  assert!(!result.success);
  assert!(result.error_message().contains("$x"));
}

#[tokio::test]
async fn run_program_records_log() {
  let program = parse("$x = [math:add]\n[source:echo]($x) >> [math:fail]\n[math:add]").unwrap();
  let ctx = ExecutionContext::new().with_agent("planner");
  let run = engine().run_program(&program, &ctx).await;
  assert!(!run.success());
  assert_eq!(run.log.run_id, ctx.run_id);
  assert_eq!(run.log.agent_id.as_deref(), Some("planner"));
  assert_eq!(run.log.final_status, "failed");

  let kinds: Vec<_> = run.log.entries.iter().map(|e| e.kind.as_str()).collect();
  assert_eq!(kinds, vec!["binding", "single", "single", "single"]);
  let seqs: Vec<_> = run.log.entries.iter().map(|e| e.seq).collect();
  assert_eq!(seqs, vec![1, 2, 3, 4]);
  assert_eq!(run.log.entries[0].label, "$x");
  assert_eq!(run.log.entries[2].pipeline, Some(0));
  assert_eq!(run.log.entries[2].group, Some(1));
  assert!(!run.log.entries[2].success);
  assert_eq!(run.log.entries[3].pipeline, Some(1));
}

#[test]
fn millis_saturates_instead_of_truncating() {
  use crate::engine::millis;
  assert_eq!(millis(Duration::from_millis(1500)), 1500);
  assert_eq!(millis(Duration::MAX), u64::MAX);
}
