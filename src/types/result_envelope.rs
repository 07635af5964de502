//! Uniform result of a driver call, a group or a pipeline.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `{success, data?, summary?, error?}`. Failures are carried as data so the engine never
/// has to distinguish them by error type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEnvelope {
  pub success: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub data: Option<Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub summary: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}

impl ResultEnvelope {
  pub fn success(data: impl Into<Value>) -> Self {
    Self {
      success: true,
      data: Some(data.into()),
      summary: None,
      error: None,
    }
  }

  /// Successful envelope with no data payload.
  pub fn empty_success() -> Self {
    Self {
      success: true,
      data: None,
      summary: None,
      error: None,
    }
  }

  pub fn failure(error: impl Into<String>) -> Self {
    Self {
      success: false,
      data: None,
      summary: None,
      error: Some(error.into()),
    }
  }

  pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
    self.summary = Some(summary.into());
    self
  }

  pub fn with_data(mut self, data: impl Into<Value>) -> Self {
    self.data = Some(data.into());
    self
  }

  /// Value threaded into later steps: `data`, else `summary`, else `null`.
  pub fn payload(&self) -> Value {
    match (&self.data, &self.summary) {
      (Some(data), _) => data.clone(),
      (None, Some(summary)) => Value::String(summary.clone()),
      (None, None) => Value::Null,
    }
  }

  /// The error message, or a generic one for failures that carry none.
  pub fn error_message(&self) -> String {
    self
      .error
      .clone()
      .unwrap_or_else(|| "unknown error".to_string())
  }
}
