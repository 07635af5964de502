//! Ownership records: which package contributed which `(node, action)`, and which
//! packages contributed each guide.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// `node_id -> action_name -> package_id`. Persisted next to the node definitions and
/// always written in the same cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProvenanceTable(BTreeMap<String, BTreeMap<String, String>>);

impl ProvenanceTable {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn owner(&self, node: &str, action: &str) -> Option<&str> {
    self
      .0
      .get(node)
      .and_then(|actions| actions.get(action))
      .map(String::as_str)
  }

  pub fn record(&mut self, node: &str, action: &str, package_id: &str) {
    self
      .0
      .entry(node.to_string())
      .or_default()
      .insert(action.to_string(), package_id.to_string());
  }

  /// Removes one entry, dropping the node key once it has no actions left.
  pub fn remove(&mut self, node: &str, action: &str) -> Option<String> {
    let actions = self.0.get_mut(node)?;
    let removed = actions.remove(action);
    if actions.is_empty() {
      self.0.remove(node);
    }
    removed
  }

  /// Every `(node, action)` owned by `package_id`, sorted.
  pub fn owned_by(&self, package_id: &str) -> Vec<(String, String)> {
    self
      .entries()
      .filter(|(_, _, owner)| *owner == package_id)
      .map(|(node, action, _)| (node.to_string(), action.to_string()))
      .collect()
  }

  /// `(node, action, package_id)` triples in key order.
  pub fn entries(&self) -> impl Iterator<Item = (&str, &str, &str)> {
    self.0.iter().flat_map(|(node, actions)| {
      actions
        .iter()
        .map(move |(action, owner)| (node.as_str(), action.as_str(), owner.as_str()))
    })
  }

  pub fn len(&self) -> usize {
    self.0.values().map(BTreeMap::len).sum()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }
}

/// `node_id -> guide -> packages that contributed it`. A guide that is on a node but
/// absent here belongs to the node definition itself and no package may remove it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GuideOwners(BTreeMap<String, BTreeMap<String, BTreeSet<String>>>);

impl GuideOwners {
  pub fn new() -> Self {
    Self::default()
  }

  /// True when at least one package holds `guide` on `node`.
  pub fn is_owned(&self, node: &str, guide: &str) -> bool {
    self
      .0
      .get(node)
      .is_some_and(|guides| guides.contains_key(guide))
  }

  pub fn record(&mut self, node: &str, guide: &str, package_id: &str) {
    self
      .0
      .entry(node.to_string())
      .or_default()
      .entry(guide.to_string())
      .or_default()
      .insert(package_id.to_string());
  }

  /// Drops `package_id` from every guide it holds. Returns the `(node, guide)` pairs that
  /// no package holds any more.
  pub fn release(&mut self, package_id: &str) -> Vec<(String, String)> {
    let mut orphaned = Vec::new();
    for (node, guides) in self.0.iter_mut() {
      guides.retain(|guide, owners| {
        if owners.remove(package_id) && owners.is_empty() {
          orphaned.push((node.clone(), guide.clone()));
        }
        !owners.is_empty()
      });
    }
    self.0.retain(|_, guides| !guides.is_empty());
    orphaned
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }
}
