//! Execution engine: runs parsed programs group by group, threads the previous result and
//! variable bindings between steps, and dispatches steps to drivers.
//!
//! Nothing a driver does escapes as an error or panic: every failure, including unknown
//! routes, driver errors, panics and timeouts, comes back as a failure [ResultEnvelope].

use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::{BoxFuture, join_all};
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument, warn};

use crate::binder::Substitutions;
use crate::config::{EngineConfig, FailurePolicy};
use crate::driver::DriverTable;
use crate::error::{DispatchError, SyntaxError};
use crate::ibl_parser::parse;
use crate::registry::NodeRegistry;
use crate::render::render_group;
use crate::types::{
  ExecutionContext, ExecutionLog, ExecutionLogEntry, Group, Pipeline, Program, ResultEnvelope,
  Step,
};

/// Results of one program run plus its execution log.
#[derive(Debug, Clone)]
pub struct ProgramRun {
  /// One envelope per pipeline, in source order.
  pub results: Vec<ResultEnvelope>,
  pub log: ExecutionLog,
}

impl ProgramRun {
  pub fn success(&self) -> bool {
    self.results.iter().all(|r| r.success)
  }
}

/// A binding's step and its memoized result for one run.
struct BindingCell {
  index: usize,
  name: String,
  step: Step,
  value: OnceCell<ResultEnvelope>,
}

/// Per-run state shared by every group of every pipeline in the run.
struct RunState {
  ctx: ExecutionContext,
  bindings: HashMap<String, BindingCell>,
  entries: Mutex<Vec<ExecutionLogEntry>>,
}

impl RunState {
  fn new(program: &Program, ctx: ExecutionContext) -> Self {
    let bindings = program
      .bindings
      .iter()
      .enumerate()
      .map(|(index, b)| {
        let cell = BindingCell {
          index,
          name: b.name.clone(),
          step: b.step.clone(),
          value: OnceCell::new(),
        };
        (b.name.clone(), cell)
      })
      .collect();
    Self {
      ctx,
      bindings,
      entries: Mutex::new(Vec::new()),
    }
  }

  #[allow(clippy::too_many_arguments)]
  fn record(
    &self,
    pipeline: Option<usize>,
    group: Option<usize>,
    kind: &str,
    label: String,
    result: &ResultEnvelope,
    started_at: DateTime<Utc>,
    elapsed: Duration,
  ) {
    let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
    let seq = u32::try_from(entries.len() + 1).unwrap_or(u32::MAX);
    entries.push(ExecutionLogEntry {
      seq,
      pipeline,
      group,
      kind: kind.to_string(),
      label,
      success: result.success,
      summary: result.summary.clone(),
      error: result.error.clone(),
      started_at: started_at.to_rfc3339(),
      duration_ms: millis(elapsed),
    });
  }

  fn into_entries(self) -> Vec<ExecutionLogEntry> {
    self
      .entries
      .into_inner()
      .unwrap_or_else(PoisonError::into_inner)
  }
}

/// Interprets programs against a [NodeRegistry] and a [DriverTable].
pub struct ExecutionEngine {
  registry: Arc<NodeRegistry>,
  drivers: DriverTable,
  config: EngineConfig,
}

impl ExecutionEngine {
  pub fn new(registry: Arc<NodeRegistry>, drivers: DriverTable) -> Self {
    Self {
      registry,
      drivers,
      config: EngineConfig::default(),
    }
  }

  pub fn with_config(mut self, config: EngineConfig) -> Self {
    self.config = config;
    self
  }

  pub fn config(&self) -> &EngineConfig {
    &self.config
  }

  pub fn registry(&self) -> &Arc<NodeRegistry> {
    &self.registry
  }

  /// One result per pipeline.
  pub async fn execute_program(
    &self,
    program: &Program,
    ctx: &ExecutionContext,
  ) -> Vec<ResultEnvelope> {
    self.run_program(program, ctx).await.results
  }

  /// Parses `code` and runs it. Only a [SyntaxError] is returned as `Err`.
  pub async fn execute_text(
    &self,
    code: &str,
    ctx: &ExecutionContext,
  ) -> Result<Vec<ResultEnvelope>, SyntaxError> {
    let program = parse(code)?;
    Ok(self.execute_program(&program, ctx).await)
  }

  /// Runs every pipeline in order and records an execution log.
  #[instrument(level = "trace", skip(self, program, ctx), fields(run_id = %ctx.run_id))]
  pub async fn run_program(&self, program: &Program, ctx: &ExecutionContext) -> ProgramRun {
    let mut log = ExecutionLog::start(ctx.run_id.clone(), ctx.agent_id.clone());
    let state = RunState::new(program, ctx.clone());
    let mut results = Vec::with_capacity(program.pipelines.len());
    for (idx, pipeline) in program.pipelines.iter().enumerate() {
      results.push(self.run_pipeline(&state, idx, pipeline).await);
    }
    let success = results.iter().all(|r| r.success);
    log.entries = state.into_entries();
    log.finish(success);
    info!(
      run_id = %log.run_id,
      pipelines = results.len(),
      success,
      "program finished"
    );
    ProgramRun { results, log }
  }

  /// Runs one pre-parsed step with no bindings and no previous result.
  #[instrument(level = "trace", skip(self, step, ctx), fields(route = %step.route_key()))]
  pub async fn execute_step(&self, step: &Step, ctx: &ExecutionContext) -> ResultEnvelope {
    let state = RunState::new(&Program::default(), ctx.clone());
    self.run_step(&state, step, None, None).await
  }

  async fn run_pipeline(&self, state: &RunState, idx: usize, pipeline: &Pipeline) -> ResultEnvelope {
    let mut prev: Option<ResultEnvelope> = None;
    for (group_idx, group) in pipeline.groups.iter().enumerate() {
      let prev_payload = prev.as_ref().map(ResultEnvelope::payload);
      let started_at = Utc::now();
      let clock = Instant::now();
      let result = self.run_group(state, group, prev_payload.as_ref()).await;
      state.record(
        Some(idx),
        Some(group_idx),
        group.kind(),
        render_group(group),
        &result,
        started_at,
        clock.elapsed(),
      );
      if !result.success && self.config.failure_policy == FailurePolicy::Abort {
        warn!(
          pipeline = idx,
          group = group_idx,
          error = %result.error_message(),
          "pipeline aborted"
        );
        return result;
      }
      prev = Some(result);
    }
    prev.unwrap_or_else(|| ResultEnvelope::failure("pipeline has no groups"))
  }

  fn run_group<'a>(
    &'a self,
    state: &'a RunState,
    group: &'a Group,
    prev: Option<&'a Value>,
  ) -> BoxFuture<'a, ResultEnvelope> {
    async move {
      match group {
        Group::Single(step) => self.run_step(state, step, prev, None).await,
        Group::Parallel(branches) => {
          let results = join_all(branches.iter().map(|b| self.run_group(state, b, prev))).await;
          self.aggregate_parallel(results)
        }
        Group::Fallback(branches) => {
          let mut errors = Vec::with_capacity(branches.len());
          for (idx, branch) in branches.iter().enumerate() {
            let result = self.run_group(state, branch, prev).await;
            if result.success {
              return result;
            }
            debug!(branch = idx, error = %result.error_message(), "fallback branch failed");
            errors.push(result.error_message());
          }
          let last = errors
            .last()
            .cloned()
            .unwrap_or_else(|| "no branches".to_string());
          ResultEnvelope::failure(format!(
            "all {} fallback branches failed; last error: {}",
            errors.len(),
            last
          ))
          .with_data(Value::from(errors))
        }
      }
    }
    .boxed()
  }

  /// `data` is every branch envelope in declared order.
  fn aggregate_parallel(&self, results: Vec<ResultEnvelope>) -> ResultEnvelope {
    let total = results.len();
    let succeeded = results.iter().filter(|r| r.success).count();
    let success = self.config.parallel_success.is_success(succeeded, total);
    let errors: Vec<String> = results
      .iter()
      .enumerate()
      .filter(|(_, r)| !r.success)
      .map(|(i, r)| format!("branch {}: {}", i + 1, r.error_message()))
      .collect();
    let data = Value::Array(
      results
        .iter()
        .map(|r| serde_json::to_value(r).unwrap_or(Value::Null))
        .collect(),
    );
    ResultEnvelope {
      success,
      data: Some(data),
      summary: Some(format!("{}/{} parallel branches succeeded", succeeded, total)),
      error: (!success).then(|| errors.join("; ")),
    }
  }

  /// Resolves variables and the previous result, then dispatches.
  ///
  /// `scope` limits which bindings are visible: a binding's right-hand side only sees
  /// bindings assigned before it.
  fn run_step<'a>(
    &'a self,
    state: &'a RunState,
    step: &'a Step,
    prev: Option<&'a Value>,
    scope: Option<usize>,
  ) -> BoxFuture<'a, ResultEnvelope> {
    async move {
      let mut variables = HashMap::new();
      for name in step.variables() {
        let cell = match state.bindings.get(&name) {
          Some(cell) if scope.is_none_or(|limit| cell.index < limit) => cell,
          _ => {
            return ResultEnvelope::failure(format!(
              "variable '${}' is not assigned before use",
              name
            ));
          }
        };
        let bound = self.evaluate_binding(state, cell).await;
        if !bound.success {
          return ResultEnvelope::failure(format!(
            "variable '${}' failed: {}",
            name,
            bound.error_message()
          ));
        }
        variables.insert(name, bound.payload());
      }
      let subs = Substitutions {
        variables: &variables,
        prev,
      };
      let resolved = subs.resolve_step(step, self.config.inject_prev_result);
      self.dispatch(&resolved, &state.ctx).await
    }
    .boxed()
  }

  /// Evaluates a binding on first use; later uses get the memoized envelope.
  fn evaluate_binding<'a>(
    &'a self,
    state: &'a RunState,
    cell: &'a BindingCell,
  ) -> BoxFuture<'a, ResultEnvelope> {
    async move {
      cell
        .value
        .get_or_init(|| async {
          let started_at = Utc::now();
          let clock = Instant::now();
          let result = self
            .run_step(state, &cell.step, None, Some(cell.index))
            .await;
          debug!(variable = %cell.name, success = result.success, "binding evaluated");
          state.record(
            None,
            None,
            "binding",
            format!("${}", cell.name),
            &result,
            started_at,
            clock.elapsed(),
          );
          result
        })
        .await
        .clone()
    }
    .boxed()
  }

  /// Routes a resolved step and calls its driver on a separate task.
  async fn dispatch(&self, step: &Step, ctx: &ExecutionContext) -> ResultEnvelope {
    let route = step.route_key();
    if !ctx.allows(&step.domain) {
      return dispatch_failure(DispatchError::NodeNotAllowed(step.domain.clone()));
    }
    let snapshot = self.registry.snapshot();
    let descriptor = match snapshot.route(&step.domain, &step.action) {
      Ok(descriptor) => descriptor,
      Err(e) => return dispatch_failure(e.into()),
    };
    let (driver, action) = match self.drivers.resolve(&step.domain, &step.action, descriptor) {
      Ok(resolved) => resolved,
      Err(e) => return dispatch_failure(e),
    };
    debug!(%route, %action, "dispatching step");

    let target = step.target.clone();
    let params = step.params.clone();
    let call_ctx = ctx.clone();
    let handle = tokio::spawn(async move {
      driver
        .execute(&action, target.as_deref(), &params, &call_ctx)
        .await
    });
    let abort = handle.abort_handle();
    let joined = match self.config.driver_timeout() {
      Some(limit) => match tokio::time::timeout(limit, handle).await {
        Ok(joined) => joined,
        Err(_) => {
          abort.abort();
          let timeout_ms = millis(limit);
          warn!(%route, timeout_ms, "driver timed out");
          return ResultEnvelope::failure(format!(
            "{} timed out after {} ms",
            route, timeout_ms
          ));
        }
      },
      None => handle.await,
    };

    match joined {
      Ok(Ok(envelope)) => envelope,
      Ok(Err(message)) => {
        debug!(%route, error = %message, "driver failed");
        ResultEnvelope::failure(message)
      }
      Err(e) if e.is_panic() => {
        let message = panic_message(e.into_panic());
        warn!(%route, panic = %message, "driver panicked");
        ResultEnvelope::failure(format!("driver for {} panicked: {}", route, message))
      }
      Err(_) => ResultEnvelope::failure(format!("driver for {} was cancelled", route)),
    }
  }
}

/// Whole milliseconds, saturating at `u64::MAX`.
pub(crate) fn millis(d: Duration) -> u64 {
  u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

fn dispatch_failure(e: DispatchError) -> ResultEnvelope {
  debug!(error = %e, "dispatch failed");
  ResultEnvelope::failure(e.to_string())
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
  if let Some(s) = payload.downcast_ref::<&str>() {
    (*s).to_string()
  } else if let Some(s) = payload.downcast_ref::<String>() {
    s.clone()
  } else {
    "unknown panic".to_string()
  }
}
