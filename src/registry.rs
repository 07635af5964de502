//! Node registry: immutable snapshots of node definitions plus provenance, swapped
//! atomically after every installer write.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{info, instrument, warn};

use crate::discovery::{self, Discovery};
use crate::error::{LookupError, StoreError};
use crate::registry_io::RegistryStore;
use crate::types::{ActionDescriptor, NodeDescriptor, ProvenanceTable};

/// One consistent view of node definitions and ownership. Never mutated once published.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegistrySnapshot {
  pub nodes: BTreeMap<String, NodeDescriptor>,
  pub provenance: ProvenanceTable,
}

impl RegistrySnapshot {
  pub fn new(nodes: impl IntoIterator<Item = NodeDescriptor>) -> Self {
    Self {
      nodes: nodes.into_iter().map(|n| (n.id.clone(), n)).collect(),
      provenance: ProvenanceTable::new(),
    }
  }

  pub fn from_parts(
    nodes: BTreeMap<String, NodeDescriptor>,
    provenance: ProvenanceTable,
  ) -> Self {
    Self { nodes, provenance }
  }

  pub fn node(&self, id: &str) -> Option<&NodeDescriptor> {
    self.nodes.get(id)
  }

  /// Resolves `domain:action` to its descriptor.
  pub fn route(&self, domain: &str, action: &str) -> Result<&ActionDescriptor, LookupError> {
    let node = self
      .nodes
      .get(domain)
      .ok_or_else(|| LookupError::UnknownNode(domain.to_string()))?;
    node
      .actions
      .get(action)
      .ok_or_else(|| LookupError::UnknownAction {
        node: domain.to_string(),
        action: action.to_string(),
      })
  }

  /// Every place where provenance and node definitions disagree. Empty when consistent.
  pub fn provenance_violations(&self) -> Vec<String> {
    let mut out = Vec::new();
    for (node, action, package_id) in self.provenance.entries() {
      if self.route(node, action).is_err() {
        out.push(format!(
          "provenance entry {}:{} -> {} has no action definition",
          node, action, package_id
        ));
      }
    }
    for (node_id, node) in &self.nodes {
      for (action, descriptor) in &node.actions {
        let Some(package_id) = descriptor.handler.package_id() else {
          continue;
        };
        if self.provenance.owner(node_id, action) != Some(package_id) {
          out.push(format!(
            "action {}:{} is handled by package {} without a matching provenance entry",
            node_id, action, package_id
          ));
        }
      }
    }
    out
  }
}

/// Process-wide registry service. Readers clone the current `Arc` snapshot and never block
/// on a write in progress.
#[derive(Debug)]
pub struct NodeRegistry {
  current: RwLock<Arc<RegistrySnapshot>>,
  store: Option<RegistryStore>,
}

impl NodeRegistry {
  /// Registry without backing files; [Self::reload] keeps the current snapshot.
  pub fn in_memory(nodes: impl IntoIterator<Item = NodeDescriptor>) -> Self {
    Self {
      current: RwLock::new(Arc::new(RegistrySnapshot::new(nodes))),
      store: None,
    }
  }

  /// Loads the registry from `store`.
  #[instrument(level = "trace", skip(store))]
  pub fn open(store: RegistryStore) -> Result<Self, StoreError> {
    let snapshot = load_snapshot(&store)?;
    info!(
      dir = %store.dir().display(),
      nodes = snapshot.nodes.len(),
      owned_actions = snapshot.provenance.len(),
      "node registry loaded"
    );
    Ok(Self {
      current: RwLock::new(Arc::new(snapshot)),
      store: Some(store),
    })
  }

  pub fn store(&self) -> Option<&RegistryStore> {
    self.store.as_ref()
  }

  /// The snapshot current at the time of the call.
  pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
    self
      .current
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .clone()
  }

  /// Publishes `snapshot` for all subsequent readers.
  pub fn replace(&self, snapshot: RegistrySnapshot) {
    *self
      .current
      .write()
      .unwrap_or_else(PoisonError::into_inner) = Arc::new(snapshot);
  }

  /// Re-reads the backing files and swaps in the result.
  #[instrument(level = "trace", skip(self))]
  pub fn reload(&self) -> Result<(), StoreError> {
    let Some(ref store) = self.store else {
      return Ok(());
    };
    let snapshot = load_snapshot(store)?;
    self.replace(snapshot);
    Ok(())
  }

  /// All nodes sorted by id; agent pseudo-domains only when `include_agents`.
  pub fn list_nodes(&self, include_agents: bool) -> Vec<NodeDescriptor> {
    self
      .snapshot()
      .nodes
      .values()
      .filter(|n| include_agents || !n.is_agent())
      .cloned()
      .collect()
  }

  pub fn get_node(&self, id: &str) -> Result<NodeDescriptor, LookupError> {
    self
      .snapshot()
      .node(id)
      .cloned()
      .ok_or_else(|| LookupError::UnknownNode(id.to_string()))
  }

  /// Keyword discovery over the current snapshot.
  pub fn discover(&self, query: &str, limit: usize) -> Vec<Discovery> {
    discovery::discover(&self.snapshot(), query, limit)
  }
}

fn load_snapshot(store: &RegistryStore) -> Result<RegistrySnapshot, StoreError> {
  let snapshot = RegistrySnapshot::from_parts(store.load_nodes()?, store.load_provenance()?);
  for violation in snapshot.provenance_violations() {
    warn!(%violation, "registry provenance mismatch");
  }
  Ok(snapshot)
}
