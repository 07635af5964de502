//! Keyword-overlap discovery: a short list of relevant nodes and actions for a
//! natural-language query.

use serde::Serialize;
use std::collections::BTreeSet;

use crate::registry::RegistrySnapshot;

/// Actions scoring below this are dropped.
pub const MIN_ACTION_SCORE: f64 = 1.0;
/// Action details kept per node.
pub const MAX_ACTIONS_PER_NODE: usize = 3;

const EXACT_HIT: f64 = 1.0;
const PREFIX_HIT: f64 = 0.5;
const NODE_NAME_HIT: f64 = 1.0;
const MIN_PREFIX_LEN: usize = 4;

const STOPWORDS: &[&str] = &[
  "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "in", "into", "is", "it", "me",
  "my", "of", "on", "or", "please", "the", "this", "to", "with",
];

/// One matching action.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionMatch {
  pub action: String,
  pub description: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub example: Option<String>,
  pub score: f64,
}

/// One matching node with its best actions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Discovery {
  pub node: String,
  pub score: f64,
  pub actions: Vec<ActionMatch>,
}

/// Lowercased alphanumeric words of at least two characters, stopwords removed.
pub fn keywords(text: &str) -> BTreeSet<String> {
  text
    .split(|c: char| !c.is_alphanumeric())
    .filter(|w| w.chars().count() >= 2)
    .map(str::to_lowercase)
    .filter(|w| !STOPWORDS.contains(&w.as_str()))
    .collect()
}

/// Exact keyword hits count fully; a query word and a text word sharing a prefix of
/// at least [MIN_PREFIX_LEN] characters count half.
fn overlap(query: &BTreeSet<String>, text: &BTreeSet<String>) -> f64 {
  query
    .iter()
    .map(|q| {
      if text.contains(q) {
        EXACT_HIT
      } else if text.iter().any(|t| shares_prefix(q, t)) {
        PREFIX_HIT
      } else {
        0.0
      }
    })
    .sum()
}

fn shares_prefix(a: &str, b: &str) -> bool {
  let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };
  short.chars().count() >= MIN_PREFIX_LEN && long.starts_with(short)
}

/// Scores every action of every non-agent node against `query` and returns at most
/// `limit` nodes, best first.
pub fn discover(snapshot: &RegistrySnapshot, query: &str, limit: usize) -> Vec<Discovery> {
  let query_words = keywords(query);
  if query_words.is_empty() || limit == 0 {
    return Vec::new();
  }

  let mut found: Vec<Discovery> = snapshot
    .nodes
    .values()
    .filter(|node| !node.is_agent())
    .filter_map(|node| {
      let mut actions: Vec<ActionMatch> = node
        .actions
        .iter()
        .filter_map(|(name, descriptor)| {
          let mut text = format!("{} {}", name.replace('_', " "), descriptor.description);
          if let Some(ref example) = descriptor.example {
            text.push(' ');
            text.push_str(example);
          }
          let score = overlap(&query_words, &keywords(&text));
          (score >= MIN_ACTION_SCORE).then(|| ActionMatch {
            action: name.clone(),
            description: descriptor.description.clone(),
            example: descriptor.example.clone(),
            score,
          })
        })
        .collect();
      if actions.is_empty() {
        return None;
      }
      actions.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.action.cmp(&b.action)));
      let mut score: f64 = actions.iter().map(|a| a.score).sum();
      if query_words.contains(&node.id.to_lowercase()) {
        score += NODE_NAME_HIT;
      }
      actions.truncate(MAX_ACTIONS_PER_NODE);
      Some(Discovery {
        node: node.id.clone(),
        score,
        actions,
      })
    })
    .collect();

  found.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.node.cmp(&b.node)));
  found.truncate(limit);
  found
}
