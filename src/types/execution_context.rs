//! Explicit per-run context handed to the engine and to every driver call.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Who is running a program and which nodes it may touch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionContext {
  pub run_id: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub agent_id: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub task_id: Option<String>,
  /// When set, steps on any other node fail to dispatch.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub allowed_nodes: Option<BTreeSet<String>>,
}

impl ExecutionContext {
  /// New context with a fresh random run id.
  pub fn new() -> Self {
    Self {
      run_id: uuid::Uuid::new_v4().to_string(),
      ..Self::default()
    }
  }

  pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
    self.agent_id = Some(agent_id.into());
    self
  }

  pub fn with_task(mut self, task_id: impl Into<String>) -> Self {
    self.task_id = Some(task_id.into());
    self
  }

  pub fn with_allowed_nodes<I, S>(mut self, nodes: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.allowed_nodes = Some(nodes.into_iter().map(Into::into).collect());
    self
  }

  pub fn allows(&self, node: &str) -> bool {
    self
      .allowed_nodes
      .as_ref()
      .is_none_or(|allowed| allowed.contains(node))
  }
}
