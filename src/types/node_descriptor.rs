//! Registry records for capability domains and their actions.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Capability domain or agent pseudo-domain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
  #[default]
  Capability,
  Agent,
}

/// How an action is implemented.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionHandler {
  /// Served by the driver registered for the node.
  #[default]
  Code,
  /// Served by the driver registered for `package_id`, invoked as `tool`.
  Package { package_id: String, tool: String },
}

impl ActionHandler {
  pub fn package_id(&self) -> Option<&str> {
    match self {
      ActionHandler::Code => None,
      ActionHandler::Package { package_id, .. } => Some(package_id),
    }
  }
}

/// Routing metadata plus discovery text for one action.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionDescriptor {
  #[serde(default)]
  pub handler: ActionHandler,
  #[serde(default)]
  pub description: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub example: Option<String>,
}

impl ActionDescriptor {
  pub fn code(description: impl Into<String>) -> Self {
    Self {
      handler: ActionHandler::Code,
      description: description.into(),
      example: None,
    }
  }

  pub fn with_example(mut self, example: impl Into<String>) -> Self {
    self.example = Some(example.into());
    self
  }
}

/// One capability domain (e.g. `source`, `system`, `messenger`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDescriptor {
  /// Filled from the map key when loaded from the node-definitions file.
  #[serde(default)]
  pub id: String,
  #[serde(default)]
  pub kind: NodeKind,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(default)]
  pub actions: BTreeMap<String, ActionDescriptor>,
  #[serde(default)]
  pub guides: Vec<String>,
}

impl NodeDescriptor {
  pub fn new(id: impl Into<String>) -> Self {
    Self {
      id: id.into(),
      ..Self::default()
    }
  }

  pub fn agent(id: impl Into<String>) -> Self {
    Self {
      kind: NodeKind::Agent,
      ..Self::new(id)
    }
  }

  pub fn with_action(mut self, name: impl Into<String>, action: ActionDescriptor) -> Self {
    self.actions.insert(name.into(), action);
    self
  }

  pub fn is_agent(&self) -> bool {
    self.kind == NodeKind::Agent
  }

  pub fn action_names(&self) -> Vec<String> {
    self.actions.keys().cloned().collect()
  }

  /// Adds `guide` unless already present. Returns true if it was added.
  pub fn add_guide(&mut self, guide: &str) -> bool {
    if self.guides.iter().any(|g| g == guide) {
      return false;
    }
    self.guides.push(guide.to_string());
    true
  }
}
