//! Engine configuration: JSON file plus `IBL_*` environment overrides.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

pub const ENV_FAILURE_POLICY: &str = "IBL_FAILURE_POLICY";
pub const ENV_PARALLEL_SUCCESS: &str = "IBL_PARALLEL_SUCCESS";
pub const ENV_DRIVER_TIMEOUT_MS: &str = "IBL_DRIVER_TIMEOUT_MS";

/// Driver timeout used when none is configured.
pub const DEFAULT_DRIVER_TIMEOUT_MS: u64 = 60_000;

/// What a pipeline does after a group fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
  /// Stop the pipeline; its result is the failed group's envelope.
  #[default]
  Abort,
  /// Run the remaining groups; the failure is passed on as the previous result.
  Continue,
}

impl FromStr for FailurePolicy {
  type Err = ConfigError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().as_str() {
      "abort" => Ok(Self::Abort),
      "continue" => Ok(Self::Continue),
      _ => Err(ConfigError::InvalidValue {
        key: "failure_policy".to_string(),
        value: s.to_string(),
      }),
    }
  }
}

/// When a parallel group counts as successful.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParallelSuccessPolicy {
  /// At least one branch succeeded.
  #[default]
  Any,
  /// Every branch succeeded.
  All,
}

impl ParallelSuccessPolicy {
  pub fn is_success(self, succeeded: usize, total: usize) -> bool {
    match self {
      Self::Any => succeeded > 0,
      Self::All => succeeded == total,
    }
  }
}

impl FromStr for ParallelSuccessPolicy {
  type Err = ConfigError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().as_str() {
      "any" => Ok(Self::Any),
      "all" => Ok(Self::All),
      _ => Err(ConfigError::InvalidValue {
        key: "parallel_success".to_string(),
        value: s.to_string(),
      }),
    }
  }
}

/// Per-deployment engine behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
  pub failure_policy: FailurePolicy,
  pub parallel_success: ParallelSuccessPolicy,
  /// Per driver call; `None` waits indefinitely.
  pub driver_timeout_ms: Option<u64>,
  /// Pass the previous payload as `_prev_result` to steps that do not reference it.
  pub inject_prev_result: bool,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      failure_policy: FailurePolicy::default(),
      parallel_success: ParallelSuccessPolicy::default(),
      driver_timeout_ms: Some(DEFAULT_DRIVER_TIMEOUT_MS),
      inject_prev_result: true,
    }
  }
}

impl EngineConfig {
  /// Reads a JSON config file. Missing keys take their defaults.
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let bytes = std::fs::read(path).map_err(|source| ConfigError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    serde_json::from_slice(&bytes).map_err(|source| ConfigError::Json {
      path: path.to_path_buf(),
      source,
    })
  }

  /// Applies `IBL_*` overrides looked up through `lookup`. A timeout of `0` disables it.
  pub fn apply_overrides(
    &mut self,
    lookup: impl Fn(&str) -> Option<String>,
  ) -> Result<(), ConfigError> {
    if let Some(v) = lookup(ENV_FAILURE_POLICY) {
      self.failure_policy = v.parse()?;
    }
    if let Some(v) = lookup(ENV_PARALLEL_SUCCESS) {
      self.parallel_success = v.parse()?;
    }
    if let Some(v) = lookup(ENV_DRIVER_TIMEOUT_MS) {
      let ms: u64 = v.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: ENV_DRIVER_TIMEOUT_MS.to_string(),
        value: v.clone(),
      })?;
      self.driver_timeout_ms = (ms > 0).then_some(ms);
    }
    Ok(())
  }

  /// [Self::apply_overrides] against the process environment.
  pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
    self.apply_overrides(|key| std::env::var(key).ok())
  }

  pub fn driver_timeout(&self) -> Option<Duration> {
    self.driver_timeout_ms.map(Duration::from_millis)
  }

  pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
    self.failure_policy = policy;
    self
  }

  pub fn with_parallel_success(mut self, policy: ParallelSuccessPolicy) -> Self {
    self.parallel_success = policy;
    self
  }

  pub fn with_driver_timeout(mut self, timeout: Option<Duration>) -> Self {
    self.driver_timeout_ms = timeout.map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX));
    self
  }

  pub fn with_inject_prev_result(mut self, inject: bool) -> Self {
    self.inject_prev_result = inject;
    self
  }
}
