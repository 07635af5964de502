//! Variable binder: `$name` token scanning, prior-binding checks and the run-time
//! substitution of variables and the previous-result placeholder.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};

use crate::error::SyntaxError;
use crate::types::Step;

/// Placeholder replaced with the previous group's payload.
pub const PREV_RESULT_PLACEHOLDER: &str = "{{_prev_result}}";

/// Param key used when the previous payload is injected implicitly.
pub const PREV_RESULT_PARAM: &str = "_prev_result";

static VARIABLE: Lazy<Regex> =
  Lazy::new(|| Regex::new(r"\$([A-Za-z_][A-Za-z0-9_]*)").expect("variable pattern must compile"));

static EXACT_VARIABLE: Lazy<Regex> = Lazy::new(|| {
  Regex::new(r"^\$([A-Za-z_][A-Za-z0-9_]*)$").expect("variable pattern must compile")
});

/// Either token in one pass, so substituted text is never scanned again.
static TOKEN: Lazy<Regex> = Lazy::new(|| {
  Regex::new(r"\{\{_prev_result\}\}|\$([A-Za-z_][A-Za-z0-9_]*)").expect("token pattern must compile")
});

/// True if `name` is a valid variable name (without the `$`).
pub fn is_variable_name(name: &str) -> bool {
  let mut chars = name.chars();
  chars
    .next()
    .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
    && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Adds every `$name` found in `text` to `out`.
pub fn collect_variables(text: &str, out: &mut BTreeSet<String>) {
  for caps in VARIABLE.captures_iter(text) {
    out.insert(caps[1].to_string());
  }
}

/// Adds every `$name` found in string leaves of `value` to `out`.
pub fn collect_value_variables(value: &Value, out: &mut BTreeSet<String>) {
  match value {
    Value::String(s) => collect_variables(s, out),
    Value::Array(items) => items.iter().for_each(|v| collect_value_variables(v, out)),
    Value::Object(map) => map.values().for_each(|v| collect_value_variables(v, out)),
    _ => {}
  }
}

/// Fails on the first variable `step` references that is not in `known`.
pub fn check_references(step: &Step, known: &BTreeSet<String>) -> Result<(), SyntaxError> {
  match step.variables().into_iter().find(|name| !known.contains(name)) {
    Some(name) => Err(SyntaxError::new(format!(
      "variable '${}' is used before it is assigned",
      name
    ))),
    None => Ok(()),
  }
}

/// True if the target or any param string mentions [PREV_RESULT_PLACEHOLDER].
pub fn mentions_prev_result(step: &Step) -> bool {
  fn in_value(value: &Value) -> bool {
    match value {
      Value::String(s) => s.contains(PREV_RESULT_PLACEHOLDER),
      Value::Array(items) => items.iter().any(in_value),
      Value::Object(map) => map.values().any(in_value),
      _ => false,
    }
  }
  step
    .target
    .as_deref()
    .is_some_and(|t| t.contains(PREV_RESULT_PLACEHOLDER))
    || step.params.values().any(in_value)
}

/// Text form used when a value is embedded in a longer string.
pub fn value_text(value: &Value) -> String {
  match value {
    Value::String(s) => s.clone(),
    Value::Null => String::new(),
    other => other.to_string(),
  }
}

/// Run-time values a step is resolved against.
#[derive(Debug, Clone, Copy)]
pub struct Substitutions<'a> {
  /// Binding payloads by variable name.
  pub variables: &'a HashMap<String, Value>,
  /// Payload of the previous group in the same pipeline.
  pub prev: Option<&'a Value>,
}

impl Substitutions<'_> {
  fn lookup(&self, caps: &Captures<'_>) -> Option<Value> {
    match caps.get(1) {
      Some(name) => self.variables.get(name.as_str()).cloned(),
      None => Some(self.prev.cloned().unwrap_or(Value::Null)),
    }
  }

  /// Replaces tokens embedded in `text` with their text form. Unknown variables stay as written.
  pub fn substitute_text(&self, text: &str) -> String {
    TOKEN
      .replace_all(text, |caps: &Captures<'_>| match self.lookup(caps) {
        Some(value) => value_text(&value),
        None => caps[0].to_string(),
      })
      .into_owned()
  }

  /// Resolves one value. A string that is exactly one token takes the token's JSON value.
  pub fn substitute_value(&self, value: &Value) -> Value {
    match value {
      Value::String(s) => {
        if s == PREV_RESULT_PLACEHOLDER {
          return self.prev.cloned().unwrap_or(Value::Null);
        }
        let bound = EXACT_VARIABLE
          .captures(s)
          .and_then(|caps| self.variables.get(&caps[1]));
        if let Some(bound) = bound {
          return bound.clone();
        }
        Value::String(self.substitute_text(s))
      }
      Value::Array(items) => Value::Array(items.iter().map(|v| self.substitute_value(v)).collect()),
      Value::Object(map) => Value::Object(
        map
          .iter()
          .map(|(k, v)| (k.clone(), self.substitute_value(v)))
          .collect(),
      ),
      other => other.clone(),
    }
  }

  /// Concrete copy of `step` with every token replaced.
  ///
  /// With `inject_prev` set, a step that never mentions the placeholder and has no
  /// `_prev_result` param of its own receives the previous payload under that key.
  pub fn resolve_step(&self, step: &Step, inject_prev: bool) -> Step {
    let target = step
      .target
      .as_deref()
      .map(|t| value_text(&self.substitute_value(&Value::String(t.to_string()))));
    let mut params: crate::types::Params = step
      .params
      .iter()
      .map(|(k, v)| (k.clone(), self.substitute_value(v)))
      .collect();
    if let Some(prev) = self.prev.filter(|_| inject_prev) {
      if !mentions_prev_result(step) && !params.contains_key(PREV_RESULT_PARAM) {
        params.insert(PREV_RESULT_PARAM.to_string(), prev.clone());
      }
    }
    Step {
      domain: step.domain.clone(),
      action: step.action.clone(),
      target,
      params,
    }
  }
}
