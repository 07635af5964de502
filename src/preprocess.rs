//! Lexical preprocessing for IBL source: comments, line continuation and
//! depth-aware scanning shared by the statement and segment splitters.

/// Operators that continue a statement when they end (or start) a line.
pub(crate) const CONTINUATION_OPERATORS: [&str; 3] = [">>", "??", "&"];

/// One logical statement after comment stripping and continuation merging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalLine {
  /// 1-based line number where the statement starts.
  pub line: usize,
  pub text: String,
}

/// Strips `#` comments that start outside string literals and outside `(...)` targets,
/// at the start of a line or after whitespace.
pub(crate) fn strip_comments(s: &str) -> String {
  let mut out = String::with_capacity(s.len());
  let mut in_string = false;
  let mut escaped = false;
  let mut paren_depth = 0usize;
  let mut prev: Option<char> = None;
  let mut chars = s.chars();
  while let Some(c) = chars.next() {
    if in_string {
      if escaped {
        escaped = false;
      } else if c == '\\' {
        escaped = true;
      } else if c == '"' {
        in_string = false;
      } else if c == '\n' {
        // an unterminated string never spans lines
        in_string = false;
      }
      out.push(c);
      prev = Some(c);
      continue;
    }
    match c {
      '"' => in_string = true,
      '(' => paren_depth += 1,
      ')' => paren_depth = paren_depth.saturating_sub(1),
      '#' if paren_depth == 0 && prev.is_none_or(char::is_whitespace) => {
        for rest in chars.by_ref() {
          if rest == '\n' {
            out.push('\n');
            break;
          }
        }
        prev = Some('\n');
        continue;
      }
      '\n' => paren_depth = 0,
      _ => {}
    }
    out.push(c);
    prev = Some(c);
  }
  out
}

/// Net bracket depth of `s` ignoring string literals. Negative means an unmatched closer.
pub(crate) fn open_depth(s: &str) -> isize {
  let mut depth = 0isize;
  let mut in_string = false;
  let mut escaped = false;
  for c in s.chars() {
    if in_string {
      if escaped {
        escaped = false;
      } else if c == '\\' {
        escaped = true;
      } else if c == '"' {
        in_string = false;
      }
      continue;
    }
    match c {
      '"' => in_string = true,
      '(' | '[' | '{' => depth += 1,
      ')' | ']' | '}' => depth -= 1,
      _ => {}
    }
  }
  depth
}

/// True if the statement cannot end here: trailing operator or unclosed bracket.
fn needs_continuation(text: &str) -> bool {
  let t = text.trim_end();
  CONTINUATION_OPERATORS.iter().any(|op| t.ends_with(op)) || open_depth(t) > 0
}

/// True if the line starts with a pipeline operator and so belongs to the previous statement.
fn starts_with_operator(text: &str) -> bool {
  CONTINUATION_OPERATORS.iter().any(|op| text.starts_with(op))
}

/// Splits stripped source into logical statements, merging continuation lines.
pub(crate) fn logical_lines(source: &str) -> Vec<LogicalLine> {
  let mut lines = Vec::new();
  let mut current: Option<LogicalLine> = None;

  for (idx, raw) in source.lines().enumerate() {
    let line = raw.trim();
    if line.is_empty() {
      continue;
    }
    if let Some(ref mut cur) = current {
      if needs_continuation(&cur.text) || starts_with_operator(line) {
        cur.text.push(' ');
        cur.text.push_str(line);
        continue;
      }
    }
    if let Some(done) = current.take() {
      lines.push(done);
    }
    current = Some(LogicalLine {
      line: idx + 1,
      text: line.to_string(),
    });
  }
  if let Some(done) = current {
    lines.push(done);
  }
  lines
}

/// Byte offsets of every top-level occurrence of `op` in `s` (outside strings and brackets).
/// Fails on unbalanced or mismatched brackets and unterminated strings.
pub(crate) fn top_level_positions(s: &str, op: &str) -> Result<Vec<usize>, String> {
  let bytes = s.as_bytes();
  let mut stack: Vec<u8> = Vec::new();
  let mut positions = Vec::new();
  let mut in_string = false;
  let mut escaped = false;
  let mut i = 0;
  while i < bytes.len() {
    let b = bytes[i];
    if in_string {
      if escaped {
        escaped = false;
      } else if b == b'\\' {
        escaped = true;
      } else if b == b'"' {
        in_string = false;
      }
      i += 1;
      continue;
    }
    match b {
      b'"' => in_string = true,
      b'(' => stack.push(b')'),
      b'[' => stack.push(b']'),
      b'{' => stack.push(b'}'),
      b')' | b']' | b'}' => {
        if stack.pop() != Some(b) {
          return Err(format!("unbalanced '{}' at offset {}", b as char, i));
        }
      }
      _ => {
        if stack.is_empty() && bytes[i..].starts_with(op.as_bytes()) {
          positions.push(i);
          i += op.len();
          continue;
        }
      }
    }
    i += 1;
  }
  if in_string {
    return Err("unterminated string literal".to_string());
  }
  if let Some(close) = stack.last() {
    return Err(format!("missing closing '{}'", *close as char));
  }
  Ok(positions)
}

/// Splits `s` on top-level `op`, returning trimmed pieces.
pub(crate) fn split_top_level<'a>(s: &'a str, op: &str) -> Result<Vec<&'a str>, String> {
  let positions = top_level_positions(s, op)?;
  let mut parts = Vec::with_capacity(positions.len() + 1);
  let mut start = 0;
  for pos in positions {
    parts.push(s[start..pos].trim());
    start = pos + op.len();
  }
  parts.push(s[start..].trim());
  Ok(parts)
}

/// Given `s` starting with an opening bracket, returns the byte offset of its matching closer.
pub(crate) fn matching_close(s: &str) -> Option<usize> {
  let bytes = s.as_bytes();
  let mut stack: Vec<u8> = Vec::new();
  let mut in_string = false;
  let mut escaped = false;
  for (i, &b) in bytes.iter().enumerate() {
    if in_string {
      if escaped {
        escaped = false;
      } else if b == b'\\' {
        escaped = true;
      } else if b == b'"' {
        in_string = false;
      }
      continue;
    }
    match b {
      b'"' => in_string = true,
      b'(' => stack.push(b')'),
      b'[' => stack.push(b']'),
      b'{' => stack.push(b'}'),
      b')' | b']' | b'}' => {
        if stack.pop() != Some(b) {
          return None;
        }
        if stack.is_empty() {
          return Some(i);
        }
      }
      _ => {}
    }
    if i == 0 && stack.is_empty() {
      return None;
    }
  }
  None
}
