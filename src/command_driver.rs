//! Package driver that runs an external command per call: the request goes to stdin as
//! JSON, the result envelope is read from stdout.
//!
//! The child is killed when the call is dropped, so an engine timeout never leaves it
//! running.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, instrument};

use crate::driver::Driver;
use crate::types::{ExecutionContext, Params, ResultEnvelope};

/// Runs `program args...` once per call.
///
/// Stdin receives `{"action", "target", "params", "context"}`. Stdout is either a result
/// envelope, any other JSON value (success data) or plain text (success data). A non-zero
/// exit without an envelope on stdout is a failure carrying stderr.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandDriver {
  program: String,
  args: Vec<String>,
  working_dir: Option<PathBuf>,
}

impl CommandDriver {
  /// Splits `command_line` on whitespace. Returns `None` when it is empty.
  pub fn from_command_line(command_line: &str) -> Option<Self> {
    let mut parts = command_line.split_whitespace().map(str::to_string);
    let program = parts.next()?;
    Some(Self {
      program,
      args: parts.collect(),
      working_dir: None,
    })
  }

  pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
    self.working_dir = Some(dir.into());
    self
  }

  #[instrument(level = "trace", skip(self, request))]
  async fn run(&self, request: &[u8]) -> Result<ResultEnvelope, String> {
    let mut cmd = Command::new(&self.program);
    cmd
      .args(&self.args)
      .stdin(Stdio::piped())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .kill_on_drop(true);
    if let Some(ref dir) = self.working_dir {
      cmd.current_dir(dir);
    }
    let mut child = cmd
      .spawn()
      .map_err(|e| format!("spawn {}: {}", self.program, e))?;
    if let Some(mut stdin) = child.stdin.take() {
      // a command may exit without reading its input
      let _ = stdin.write_all(request).await;
    }
    let output = child
      .wait_with_output()
      .await
      .map_err(|e| format!("wait {}: {}", self.program, e))?;
    debug!(program = %self.program, status = ?output.status, "command finished");
    envelope_from_output(
      output.status.success(),
      output.status.code(),
      &output.stdout,
      &output.stderr,
    )
  }
}

/// Interprets a finished command's output.
pub(crate) fn envelope_from_output(
  success: bool,
  code: Option<i32>,
  stdout: &[u8],
  stderr: &[u8],
) -> Result<ResultEnvelope, String> {
  let text = String::from_utf8_lossy(stdout);
  let text = text.trim();
  let parsed: Option<Value> = serde_json::from_str(text).ok();
  let envelope = parsed
    .as_ref()
    .filter(|v| v.get("success").is_some_and(Value::is_boolean))
    .and_then(|v| serde_json::from_value::<ResultEnvelope>(v.clone()).ok());
  if let Some(envelope) = envelope {
    return Ok(envelope);
  }
  if success {
    return Ok(match parsed {
      Some(value) => ResultEnvelope::success(value),
      None if text.is_empty() => ResultEnvelope::empty_success(),
      None => ResultEnvelope::success(text.to_string()),
    });
  }
  let status = code
    .map(|c| format!("command exited with status {}", c))
    .unwrap_or_else(|| "command terminated by signal".to_string());
  let stderr = String::from_utf8_lossy(stderr);
  let stderr = stderr.trim();
  Err(if stderr.is_empty() {
    status
  } else {
    format!("{}: {}", status, stderr)
  })
}

#[async_trait]
impl Driver for CommandDriver {
  async fn execute(
    &self,
    action: &str,
    target: Option<&str>,
    params: &Params,
    ctx: &ExecutionContext,
  ) -> Result<ResultEnvelope, String> {
    let request = json!({
      "action": action,
      "target": target,
      "params": params,
      "context": ctx,
    });
    let request = serde_json::to_vec(&request).map_err(|e| e.to_string())?;
    self.run(&request).await
  }
}
