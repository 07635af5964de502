//! Package action manifests (`ibl_actions.json`).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{ActionDescriptor, ActionHandler};

/// One manifest action entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManifestAction {
  #[serde(default)]
  pub description: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub example: Option<String>,
  /// Package tool name; defaults to the action name.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub tool: Option<String>,
  /// Explicit handler; defaults to the contributing package's tool.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub handler: Option<ActionHandler>,
}

impl ManifestAction {
  /// Registry descriptor for this action as contributed by `package_id`.
  pub fn to_descriptor(&self, package_id: &str, action_name: &str) -> ActionDescriptor {
    let handler = self.handler.clone().unwrap_or_else(|| ActionHandler::Package {
      package_id: package_id.to_string(),
      tool: self.tool.clone().unwrap_or_else(|| action_name.to_string()),
    });
    ActionDescriptor {
      handler,
      description: self.description.clone(),
      example: self.example.clone(),
    }
  }
}

/// Actions and guides a package contributes to one node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManifestNode {
  #[serde(default)]
  pub actions: BTreeMap<String, ManifestAction>,
  #[serde(default)]
  pub guides: Vec<String>,
}

/// Either `{node, actions, guides}` or `{nodes: {id: {actions, guides}}}`.
///
/// Both forms may name a `command` that serves the package's tools (see
/// [crate::command_driver::CommandDriver]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ActionManifest {
  MultiNode {
    nodes: BTreeMap<String, ManifestNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    command: Option<String>,
  },
  SingleNode {
    node: String,
    #[serde(default)]
    actions: BTreeMap<String, ManifestAction>,
    #[serde(default)]
    guides: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    command: Option<String>,
  },
}

impl ActionManifest {
  /// Normalizes both forms into `(node_id, contribution)` pairs.
  pub fn into_nodes(self) -> Vec<(String, ManifestNode)> {
    match self {
      ActionManifest::MultiNode { nodes, .. } => nodes.into_iter().collect(),
      ActionManifest::SingleNode {
        node,
        actions,
        guides,
        ..
      } => vec![(node, ManifestNode { actions, guides })],
    }
  }

  /// Command line that serves this package's tools, if any.
  pub fn command(&self) -> Option<&str> {
    match self {
      ActionManifest::MultiNode { command, .. } | ActionManifest::SingleNode { command, .. } => {
        command.as_deref()
      }
    }
  }

  /// True when no node in the manifest declares any action.
  pub fn is_empty(&self) -> bool {
    match self {
      ActionManifest::MultiNode { nodes, .. } => nodes.values().all(|n| n.actions.is_empty()),
      ActionManifest::SingleNode { actions, .. } => actions.is_empty(),
    }
  }
}
