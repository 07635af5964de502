//! DTOs for the JSON execution log of one program run.

use serde::{Deserialize, Serialize};

/// One recorded group execution or binding evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
  /// 1-based order in which the entry was recorded.
  pub seq: u32,
  /// Pipeline index; `None` for binding evaluations.
  pub pipeline: Option<usize>,
  /// Group index within the pipeline; `None` for binding evaluations.
  pub group: Option<usize>,
  /// "single", "parallel", "fallback" or "binding".
  pub kind: String,
  /// Rendered group text, or `$name` for bindings.
  pub label: String,
  pub success: bool,
  pub summary: Option<String>,
  pub error: Option<String>,
  /// RFC 3339 timestamp when execution started.
  pub started_at: String,
  pub duration_ms: u64,
}

/// Root structure of an execution log file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLog {
  /// Log format version.
  pub version: u32,
  pub run_id: String,
  pub agent_id: Option<String>,
  /// RFC 3339 timestamp when the run started.
  pub started_at: String,
  /// RFC 3339 timestamp when the run finished (None while running).
  pub finished_at: Option<String>,
  /// "success" when every pipeline succeeded, otherwise "failed".
  pub final_status: String,
  pub entries: Vec<ExecutionLogEntry>,
}

impl ExecutionLog {
  pub const VERSION: u32 = 1;

  pub fn start(run_id: impl Into<String>, agent_id: Option<String>) -> Self {
    Self {
      version: Self::VERSION,
      run_id: run_id.into(),
      agent_id,
      started_at: chrono::Utc::now().to_rfc3339(),
      finished_at: None,
      final_status: "running".to_string(),
      entries: Vec::new(),
    }
  }

  /// Marks the log finished with the given overall outcome.
  pub fn finish(&mut self, success: bool) {
    self.finished_at = Some(chrono::Utc::now().to_rfc3339());
    self.final_status = if success { "success" } else { "failed" }.to_string();
  }
}
