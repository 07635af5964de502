//! Error types for parsing, lookup, dispatch, configuration and registry storage.
//!
//! Dispatch failures found while running a program never reach callers as `Err`; the
//! engine folds them into failure envelopes.

use std::path::PathBuf;
use thiserror::Error;

/// Malformed program text. Returned by [crate::parse]; a program that fails to parse is
/// never partially executed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", render_syntax_error(.line, .message))]
pub struct SyntaxError {
  /// 1-based source line of the statement that failed, when known.
  pub line: Option<usize>,
  pub message: String,
}

fn render_syntax_error(line: &Option<usize>, message: &str) -> String {
  match *line {
    Some(line) => format!("syntax error at line {}: {}", line, message),
    None => format!("syntax error: {}", message),
  }
}

impl SyntaxError {
  pub fn new(message: impl Into<String>) -> Self {
    Self {
      line: None,
      message: message.into(),
    }
  }

  pub fn at(line: usize, message: impl Into<String>) -> Self {
    Self {
      line: Some(line),
      message: message.into(),
    }
  }

  /// Attaches a line number unless one is already set.
  pub(crate) fn with_line(mut self, line: usize) -> Self {
    if self.line.is_none() {
      self.line = Some(line);
    }
    self
  }
}

/// A node or action id that the registry does not know.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LookupError {
  #[error("unknown node '{0}'")]
  UnknownNode(String),
  #[error("unknown action '{action}' on node '{node}'")]
  UnknownAction { node: String, action: String },
}

/// Why a step could not be routed to a driver.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
  #[error(transparent)]
  Lookup(#[from] LookupError),
  #[error("node '{0}' is not allowed in this execution context")]
  NodeNotAllowed(String),
  #[error("no driver registered for '{0}'")]
  NoDriver(String),
}

/// Unrecoverable failure reading or writing persisted registry files.
#[derive(Debug, Error)]
pub enum StoreError {
  #[error("i/o error on {}: {source}", .path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("invalid JSON in {}: {source}", .path.display())]
  Json {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },
}

impl StoreError {
  pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
    Self::Io {
      path: path.into(),
      source,
    }
  }

  pub(crate) fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
    Self::Json {
      path: path.into(),
      source,
    }
  }
}

/// Invalid engine configuration file or override value.
#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("cannot read config {}: {source}", .path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("invalid config {}: {source}", .path.display())]
  Json {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },
  #[error("invalid value '{value}' for {key}")]
  InvalidValue { key: String, value: String },
}
