//! One `>>`-separated segment of a pipeline.

use serde::{Deserialize, Serialize};

use super::Step;

/// A single step, a concurrent fan-out (`&`) or an ordered fallback chain (`??`).
///
/// Branches are groups themselves, so nesting is representable even though the
/// parser only produces one level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Group {
  Single(Step),
  Parallel(Vec<Group>),
  Fallback(Vec<Group>),
}

impl Group {
  pub fn parallel(steps: impl IntoIterator<Item = Step>) -> Self {
    Group::Parallel(steps.into_iter().map(Group::Single).collect())
  }

  pub fn fallback(steps: impl IntoIterator<Item = Step>) -> Self {
    Group::Fallback(steps.into_iter().map(Group::Single).collect())
  }

  /// Short name of the composition kind, used in logs.
  pub fn kind(&self) -> &'static str {
    match self {
      Group::Single(_) => "single",
      Group::Parallel(_) => "parallel",
      Group::Fallback(_) => "fallback",
    }
  }

  pub fn is_single(&self) -> bool {
    matches!(self, Group::Single(_))
  }

  /// All steps in declaration order, flattening nested branches.
  pub fn steps(&self) -> Vec<&Step> {
    match self {
      Group::Single(step) => vec![step],
      Group::Parallel(branches) | Group::Fallback(branches) => {
        branches.iter().flat_map(Group::steps).collect()
      }
    }
  }
}
