//! IBL parser: assignments, `>>` pipelines, `&` / `??` groups and
//! `[domain:action](target) { params }` steps.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeSet;
use tracing::{debug, instrument};

use crate::binder::{check_references, is_variable_name};
use crate::error::SyntaxError;
use crate::preprocess::{
  logical_lines, matching_close, split_top_level, strip_comments, top_level_positions,
};
use crate::types::{Binding, Group, Params, Pipeline, Program, Step};

/// Pipeline operators, loosest first.
pub const SEQUENCE_OP: &str = ">>";
pub const PARALLEL_OP: &str = "&";
pub const FALLBACK_OP: &str = "??";

static STEP_HEADER: Lazy<Regex> = Lazy::new(|| {
  Regex::new(r"^\[\s*([A-Za-z_][A-Za-z0-9_.-]*)\s*:\s*([A-Za-z_][A-Za-z0-9_.-]*)\s*\]")
    .expect("step header pattern must compile")
});

/// Parses IBL source into a [Program].
///
/// Assignments (`$name = [d:a](...)`) become bindings; every other statement becomes one
/// pipeline. Every `$name` must refer to a binding assigned on an earlier line.
#[instrument(level = "trace", skip(code))]
pub fn parse(code: &str) -> Result<Program, SyntaxError> {
  let stripped = strip_comments(code);
  let lines = logical_lines(&stripped);
  if lines.is_empty() {
    return Err(SyntaxError::new("program is empty"));
  }

  let mut program = Program::default();
  let mut known: BTreeSet<String> = BTreeSet::new();

  for line in lines {
    let at = |e: SyntaxError| e.with_line(line.line);
    if let Some((name, rhs)) = split_assignment(&line.text).map_err(at)? {
      if known.contains(name) {
        return Err(SyntaxError::at(
          line.line,
          format!("variable '${}' is already assigned", name),
        ));
      }
      let step = parse_binding_rhs(name, rhs).map_err(at)?;
      check_references(&step, &known).map_err(at)?;
      known.insert(name.to_string());
      program.bindings.push(Binding {
        name: name.to_string(),
        step,
      });
      continue;
    }

    let pipeline = parse_pipeline(&line.text).map_err(at)?;
    for step in pipeline.groups.iter().flat_map(Group::steps) {
      check_references(step, &known).map_err(at)?;
    }
    program.pipelines.push(pipeline);
  }

  debug!(
    bindings = program.bindings.len(),
    pipelines = program.pipelines.len(),
    "parsed IBL program"
  );
  Ok(program)
}

/// `$name = rhs` -> `Some((name, rhs))`; anything not starting with `$` and containing `=` -> `None`.
fn split_assignment(text: &str) -> Result<Option<(&str, &str)>, SyntaxError> {
  let Some(rest) = text.strip_prefix('$') else {
    return Ok(None);
  };
  let Some(eq) = rest.find('=') else {
    return Ok(None);
  };
  let name = rest[..eq].trim();
  if !is_variable_name(name) {
    return Err(SyntaxError::new(format!("invalid variable name '${}'", name)));
  }
  let rhs = rest[eq + 1..].trim();
  if rhs.is_empty() {
    return Err(SyntaxError::new(format!(
      "assignment to '${}' has no right-hand side",
      name
    )));
  }
  Ok(Some((name, rhs)))
}

fn parse_binding_rhs(name: &str, rhs: &str) -> Result<Step, SyntaxError> {
  for op in [SEQUENCE_OP, PARALLEL_OP, FALLBACK_OP] {
    if !top_level_positions(rhs, op)
      .map_err(SyntaxError::new)?
      .is_empty()
    {
      return Err(SyntaxError::new(format!(
        "right-hand side of '${}' must be a single step, found '{}'",
        name, op
      )));
    }
  }
  parse_step(rhs)
}

/// Splits one statement on top-level `>>` and parses each segment as a group.
pub fn parse_pipeline(text: &str) -> Result<Pipeline, SyntaxError> {
  let segments = split_top_level(text, SEQUENCE_OP).map_err(SyntaxError::new)?;
  let mut groups = Vec::with_capacity(segments.len());
  for (idx, segment) in segments.into_iter().enumerate() {
    if segment.is_empty() {
      return Err(SyntaxError::new(format!(
        "empty segment {} around '{}'",
        idx + 1,
        SEQUENCE_OP
      )));
    }
    groups.push(parse_group(segment)?);
  }
  Ok(Pipeline::new(groups))
}

/// Parses one `>>` segment: a single step, an `&` fan-out or a `??` chain.
pub fn parse_group(segment: &str) -> Result<Group, SyntaxError> {
  let parallel = !top_level_positions(segment, PARALLEL_OP)
    .map_err(SyntaxError::new)?
    .is_empty();
  let fallback = !top_level_positions(segment, FALLBACK_OP)
    .map_err(SyntaxError::new)?
    .is_empty();
  match (parallel, fallback) {
    (true, true) => Err(SyntaxError::new(format!(
      "cannot mix '{}' and '{}' in one segment: '{}'",
      PARALLEL_OP,
      FALLBACK_OP,
      preview(segment)
    ))),
    (true, false) => Ok(Group::parallel(parse_branches(segment, PARALLEL_OP)?)),
    (false, true) => Ok(Group::fallback(parse_branches(segment, FALLBACK_OP)?)),
    (false, false) => Ok(Group::Single(parse_step(segment)?)),
  }
}

fn parse_branches(segment: &str, op: &str) -> Result<Vec<Step>, SyntaxError> {
  split_top_level(segment, op)
    .map_err(SyntaxError::new)?
    .into_iter()
    .map(|branch| {
      if branch.is_empty() {
        Err(SyntaxError::new(format!("empty branch around '{}'", op)))
      } else {
        parse_step(branch)
      }
    })
    .collect()
}

/// Parses `[domain:action]`, an optional `(target)` and an optional `{...}` JSON object.
pub fn parse_step(text: &str) -> Result<Step, SyntaxError> {
  let text = text.trim();
  let caps = STEP_HEADER.captures(text).ok_or_else(|| {
    SyntaxError::new(format!("expected '[domain:action]' at '{}'", preview(text)))
  })?;
  let mut step = Step::new(&caps[1], &caps[2]);
  let header_end = caps.get(0).map_or(0, |m| m.end());
  let mut rest = text[header_end..].trim_start();

  if rest.starts_with('(') {
    let close = matching_close(rest).ok_or_else(|| {
      SyntaxError::new(format!("unclosed '(' in target of [{}]", step.route_key()))
    })?;
    step.target = parse_target(&rest[1..close])?;
    rest = rest[close + 1..].trim_start();
  }

  if rest.starts_with('{') {
    let close = matching_close(rest).ok_or_else(|| {
      SyntaxError::new(format!("unclosed '{{' in params of [{}]", step.route_key()))
    })?;
    step.params = parse_params(&rest[..=close], &step.route_key())?;
    rest = rest[close + 1..].trim_start();
  }

  if !rest.is_empty() {
    return Err(SyntaxError::new(format!(
      "unexpected text after [{}]: '{}'",
      step.route_key(),
      preview(rest)
    )));
  }
  Ok(step)
}

/// `"quoted"` uses JSON escapes, `'single'` is taken verbatim, bare text is trimmed.
fn parse_target(inner: &str) -> Result<Option<String>, SyntaxError> {
  let inner = inner.trim();
  if inner.is_empty() {
    return Ok(None);
  }
  if inner.starts_with('"') {
    let target: String = serde_json::from_str(inner)
      .map_err(|e| SyntaxError::new(format!("invalid quoted target {}: {}", inner, e)))?;
    return Ok(Some(target));
  }
  if inner.len() >= 2 && inner.starts_with('\'') && inner.ends_with('\'') {
    return Ok(Some(inner[1..inner.len() - 1].to_string()));
  }
  Ok(Some(inner.to_string()))
}

fn parse_params(text: &str, route: &str) -> Result<Params, SyntaxError> {
  match serde_json::from_str::<Value>(text) {
    Ok(Value::Object(map)) => Ok(map),
    Ok(_) => Err(SyntaxError::new(format!("params of [{}] must be an object", route))),
    Err(e) => Err(SyntaxError::new(format!("invalid params of [{}]: {}", route, e))),
  }
}

fn preview(text: &str) -> String {
  const MAX: usize = 40;
  if text.chars().count() <= MAX {
    return text.to_string();
  }
  let mut out: String = text.chars().take(MAX).collect();
  out.push_str("...");
  out
}
