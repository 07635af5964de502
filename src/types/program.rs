//! Parse result for one IBL input text.

use serde::{Deserialize, Serialize};

use super::{Group, Step};

/// Ordered groups of one top-level statement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
  pub groups: Vec<Group>,
}

impl Pipeline {
  pub fn new(groups: Vec<Group>) -> Self {
    Self { groups }
  }
}

/// `$name = <step>`; the step is stored unevaluated and runs at most once per program run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Binding {
  pub name: String,
  pub step: Step,
}

/// Variable bindings plus one pipeline per top-level statement, both in source order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Program {
  pub bindings: Vec<Binding>,
  pub pipelines: Vec<Pipeline>,
}

impl Program {
  pub fn binding(&self, name: &str) -> Option<&Binding> {
    self.bindings.iter().find(|b| b.name == name)
  }

  /// Every step of every pipeline (binding right-hand sides excluded).
  pub fn steps(&self) -> impl Iterator<Item = &Step> {
    self
      .pipelines
      .iter()
      .flat_map(|p| p.groups.iter())
      .flat_map(|g| g.steps())
  }
}
