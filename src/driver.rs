//! Driver contract and the static table that maps routes to drivers.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::DispatchError;
use crate::types::{ActionDescriptor, ActionHandler, ExecutionContext, Params, ResultEnvelope};

/// Uniform contract of every capability handler.
///
/// `Err` is a handler failure; the engine turns it into a failure envelope, as it does
/// for panics and timeouts.
#[async_trait]
pub trait Driver: Send + Sync {
  async fn execute(
    &self,
    action: &str,
    target: Option<&str>,
    params: &Params,
    ctx: &ExecutionContext,
  ) -> Result<ResultEnvelope, String>;

  /// Actions this driver serves, for diagnostics.
  fn list_actions(&self) -> Vec<String> {
    Vec::new()
  }
}

/// Node and package drivers, looked up by route at dispatch time.
#[derive(Clone, Default)]
pub struct DriverTable {
  nodes: HashMap<String, Arc<dyn Driver>>,
  packages: HashMap<String, Arc<dyn Driver>>,
}

impl fmt::Debug for DriverTable {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let mut nodes: Vec<_> = self.nodes.keys().collect();
    let mut packages: Vec<_> = self.packages.keys().collect();
    nodes.sort();
    packages.sort();
    f.debug_struct("DriverTable")
      .field("nodes", &nodes)
      .field("packages", &packages)
      .finish()
  }
}

impl DriverTable {
  pub fn new() -> Self {
    Self::default()
  }

  /// Driver for actions of `node_id` implemented in code.
  pub fn register_node(&mut self, node_id: impl Into<String>, driver: Arc<dyn Driver>) {
    self.nodes.insert(node_id.into(), driver);
  }

  /// Driver for every tool of `package_id`.
  pub fn register_package(&mut self, package_id: impl Into<String>, driver: Arc<dyn Driver>) {
    self.packages.insert(package_id.into(), driver);
  }

  pub fn with_node(mut self, node_id: impl Into<String>, driver: Arc<dyn Driver>) -> Self {
    self.register_node(node_id, driver);
    self
  }

  pub fn with_package(mut self, package_id: impl Into<String>, driver: Arc<dyn Driver>) -> Self {
    self.register_package(package_id, driver);
    self
  }

  /// Driver and the action name to invoke it with. Package tools are invoked by tool name.
  pub fn resolve(
    &self,
    domain: &str,
    action: &str,
    descriptor: &ActionDescriptor,
  ) -> Result<(Arc<dyn Driver>, String), DispatchError> {
    match descriptor.handler {
      ActionHandler::Code => self
        .nodes
        .get(domain)
        .map(|d| (Arc::clone(d), action.to_string()))
        .ok_or_else(|| DispatchError::NoDriver(format!("node {}", domain))),
      ActionHandler::Package {
        ref package_id,
        ref tool,
      } => self
        .packages
        .get(package_id)
        .map(|d| (Arc::clone(d), tool.clone()))
        .ok_or_else(|| DispatchError::NoDriver(format!("package {}", package_id))),
    }
  }
}

type DriverFn = dyn Fn(&str, Option<&str>, &Params, &ExecutionContext) -> Result<ResultEnvelope, String>
  + Send
  + Sync;

/// Driver backed by a synchronous closure.
pub struct FnDriver {
  actions: Vec<String>,
  f: Box<DriverFn>,
}

impl FnDriver {
  pub fn new<F>(f: F) -> Self
  where
    F: Fn(&str, Option<&str>, &Params, &ExecutionContext) -> Result<ResultEnvelope, String>
      + Send
      + Sync
      + 'static,
  {
    Self {
      actions: Vec::new(),
      f: Box::new(f),
    }
  }

  pub fn with_actions<I, S>(mut self, actions: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.actions = actions.into_iter().map(Into::into).collect();
    self
  }
}

#[async_trait]
impl Driver for FnDriver {
  async fn execute(
    &self,
    action: &str,
    target: Option<&str>,
    params: &Params,
    ctx: &ExecutionContext,
  ) -> Result<ResultEnvelope, String> {
    (self.f)(action, target, params, ctx)
  }

  fn list_actions(&self) -> Vec<String> {
    self.actions.clone()
  }
}

/// Succeeds with `{action, target, params}` as data. Used for dry runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoDriver;

#[async_trait]
impl Driver for EchoDriver {
  async fn execute(
    &self,
    action: &str,
    target: Option<&str>,
    params: &Params,
    _ctx: &ExecutionContext,
  ) -> Result<ResultEnvelope, String> {
    let data = json!({
      "action": action,
      "target": target.map_or(Value::Null, |t| Value::String(t.to_string())),
      "params": Value::Object(params.clone()),
    });
    Ok(ResultEnvelope::success(data).with_summary(format!("echo {}", action)))
  }
}
