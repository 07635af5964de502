//! Canonical IBL text for parsed programs. `parse(render(p))` yields `p` again.

use serde_json::Value;
use std::fmt;

use crate::ibl_parser::{FALLBACK_OP, PARALLEL_OP, SEQUENCE_OP};
use crate::types::{Binding, Group, Pipeline, Program, Step};

/// `[domain:action]("target") {"k":v}`; target always quoted, params compact and omitted when empty.
pub fn render_step(step: &Step) -> String {
  let mut out = format!("[{}:{}]", step.domain, step.action);
  if let Some(ref target) = step.target {
    out.push('(');
    out.push_str(&Value::String(target.clone()).to_string());
    out.push(')');
  }
  if !step.params.is_empty() {
    out.push(' ');
    out.push_str(&Value::Object(step.params.clone()).to_string());
  }
  out
}

pub fn render_group(group: &Group) -> String {
  match group {
    Group::Single(step) => render_step(step),
    Group::Parallel(branches) => join(branches, PARALLEL_OP),
    Group::Fallback(branches) => join(branches, FALLBACK_OP),
  }
}

fn join(branches: &[Group], op: &str) -> String {
  branches
    .iter()
    .map(render_group)
    .collect::<Vec<_>>()
    .join(&format!(" {} ", op))
}

pub fn render_pipeline(pipeline: &Pipeline) -> String {
  pipeline
    .groups
    .iter()
    .map(render_group)
    .collect::<Vec<_>>()
    .join(&format!(" {} ", SEQUENCE_OP))
}

pub fn render_binding(binding: &Binding) -> String {
  format!("${} = {}", binding.name, render_step(&binding.step))
}

/// Bindings first in source order, then one line per pipeline.
pub fn render_program(program: &Program) -> String {
  program
    .bindings
    .iter()
    .map(render_binding)
    .chain(program.pipelines.iter().map(render_pipeline))
    .collect::<Vec<_>>()
    .join("\n")
}

impl fmt::Display for Step {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&render_step(self))
  }
}

impl fmt::Display for Group {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&render_group(self))
  }
}

impl fmt::Display for Pipeline {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&render_pipeline(self))
  }
}

impl fmt::Display for Program {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&render_program(self))
  }
}
