//! One `[domain:action](target) { params }` invocation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::Params;

/// One capability invocation parsed from IBL text.
///
/// `target` and string values inside `params` may still hold `$name` variable tokens or
/// the `{{_prev_result}}` placeholder; those are resolved by the engine at run time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
  pub domain: String,
  pub action: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub target: Option<String>,
  #[serde(default, skip_serializing_if = "Params::is_empty")]
  pub params: Params,
}

impl Step {
  pub fn new(domain: impl Into<String>, action: impl Into<String>) -> Self {
    Self {
      domain: domain.into(),
      action: action.into(),
      target: None,
      params: Params::new(),
    }
  }

  pub fn with_target(mut self, target: impl Into<String>) -> Self {
    self.target = Some(target.into());
    self
  }

  pub fn with_param(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
    self.params.insert(key.into(), value.into());
    self
  }

  /// `domain:action`, as used in log fields and error messages.
  pub fn route_key(&self) -> String {
    format!("{}:{}", self.domain, self.action)
  }

  /// Names of every `$name` variable referenced from the target or params.
  pub fn variables(&self) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    if let Some(ref target) = self.target {
      crate::binder::collect_variables(target, &mut names);
    }
    for value in self.params.values() {
      crate::binder::collect_value_variables(value, &mut names);
    }
    names
  }
}
