//! Action installer: merges a package's action manifest into the registry files, or
//! removes it again, with provenance and guide-ownership bookkeeping.
//!
//! Every mutation is one read-modify-write cycle over the registry files, serialized by a
//! single-writer lock and followed by a snapshot swap in the [NodeRegistry].

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{info, instrument, warn};

use crate::error::StoreError;
use crate::registry::{NodeRegistry, RegistrySnapshot};
use crate::registry_io::RegistryStore;
use crate::types::{ActionManifest, GuideOwners, NodeDescriptor, ProvenanceTable};

/// Manifest filename inside a package directory.
pub const MANIFEST_FILENAME: &str = "ibl_actions.json";

/// Why a package was not registered at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum SkipReason {
  ManifestMissing,
  ManifestEmpty,
  ManifestInvalid(String),
}

impl fmt::Display for SkipReason {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      SkipReason::ManifestMissing => f.write_str("no action manifest"),
      SkipReason::ManifestEmpty => f.write_str("action manifest declares no actions"),
      SkipReason::ManifestInvalid(detail) => write!(f, "invalid action manifest: {}", detail),
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegisterReport {
  pub package_id: String,
  pub registered: usize,
  pub guides_added: usize,
  pub warnings: Vec<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub skipped: Option<SkipReason>,
}

impl RegisterReport {
  fn skipped(package_id: &str, reason: SkipReason) -> Self {
    Self {
      package_id: package_id.to_string(),
      skipped: Some(reason),
      ..Self::default()
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UnregisterReport {
  pub package_id: String,
  pub removed: usize,
  pub guides_removed: usize,
}

/// Sole writer of the registry files.
#[derive(Debug)]
pub struct ActionInstaller {
  registry: Arc<NodeRegistry>,
  store: RegistryStore,
  packages_dir: PathBuf,
  write_lock: Mutex<()>,
}

impl ActionInstaller {
  pub fn new(
    registry: Arc<NodeRegistry>,
    store: RegistryStore,
    packages_dir: impl Into<PathBuf>,
  ) -> Self {
    Self {
      registry,
      store,
      packages_dir: packages_dir.into(),
      write_lock: Mutex::new(()),
    }
  }

  pub fn registry(&self) -> &Arc<NodeRegistry> {
    &self.registry
  }

  pub fn packages_dir(&self) -> &Path {
    &self.packages_dir
  }

  /// `<packages_dir>/<package_id>/ibl_actions.json`.
  pub fn manifest_path(&self, package_id: &str) -> PathBuf {
    self.packages_dir.join(package_id).join(MANIFEST_FILENAME)
  }

  /// Reads and validates a package's manifest.
  pub fn read_manifest(&self, package_id: &str) -> Result<ActionManifest, SkipReason> {
    if !is_valid_package_id(package_id) {
      return Err(SkipReason::ManifestInvalid(format!(
        "invalid package id '{}'",
        package_id
      )));
    }
    let path = self.manifest_path(package_id);
    let bytes = match std::fs::read(&path) {
      Ok(bytes) => bytes,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
        return Err(SkipReason::ManifestMissing);
      }
      Err(e) => {
        return Err(SkipReason::ManifestInvalid(format!(
          "{}: {}",
          path.display(),
          e
        )));
      }
    };
    let manifest: ActionManifest = serde_json::from_slice(&bytes)
      .map_err(|e| SkipReason::ManifestInvalid(format!("{}: {}", path.display(), e)))?;
    if manifest.is_empty() {
      return Err(SkipReason::ManifestEmpty);
    }
    Ok(manifest)
  }

  /// Merges `package_id`'s manifest into the registry.
  ///
  /// Unknown nodes and actions owned by other packages are skipped with a warning. A
  /// missing, empty or malformed manifest is reported in [RegisterReport::skipped].
  #[instrument(level = "trace", skip(self))]
  pub fn register_actions(&self, package_id: &str) -> Result<RegisterReport, StoreError> {
    let manifest = match self.read_manifest(package_id) {
      Ok(m) => m,
      Err(reason) => {
        info!(package_id, %reason, "package skipped");
        return Ok(RegisterReport::skipped(package_id, reason));
      }
    };

    let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
    let mut nodes = self.store.load_nodes()?;
    let mut provenance = self.store.load_provenance()?;
    let mut guides = self.store.load_guide_owners()?;
    let mut report = RegisterReport {
      package_id: package_id.to_string(),
      ..RegisterReport::default()
    };

    for (node_id, contribution) in manifest.into_nodes() {
      let Some(node) = nodes.get_mut(&node_id) else {
        for action in contribution.actions.keys() {
          report
            .warnings
            .push(format!("skipped {}:{}: node '{}' does not exist", node_id, action, node_id));
        }
        continue;
      };

      let mut contributed = false;
      for (action, entry) in &contribution.actions {
        match provenance.owner(&node_id, action) {
          Some(owner) if owner != package_id => {
            report.warnings.push(format!(
              "skipped {}:{}: already owned by package '{}'",
              node_id, action, owner
            ));
            continue;
          }
          None if node.actions.contains_key(action) => {
            report.warnings.push(format!(
              "{}:{} replaces a built-in definition",
              node_id, action
            ));
          }
          _ => {}
        }
        node
          .actions
          .insert(action.clone(), entry.to_descriptor(package_id, action));
        provenance.record(&node_id, action, package_id);
        report.registered += 1;
        contributed = true;
      }

      // A guide already on the node is only co-owned when another package added it.
      if contributed {
        for guide in &contribution.guides {
          if node.add_guide(guide) {
            guides.record(&node_id, guide, package_id);
            report.guides_added += 1;
          } else if guides.is_owned(&node_id, guide) {
            guides.record(&node_id, guide, package_id);
          }
        }
      }
    }

    for warning in &report.warnings {
      warn!(package_id, %warning, "action registration warning");
    }
    if report.registered > 0 {
      self.commit(nodes, provenance, &guides)?;
    }
    info!(
      package_id,
      registered = report.registered,
      guides_added = report.guides_added,
      warnings = report.warnings.len(),
      "actions registered"
    );
    Ok(report)
  }

  /// Removes every action `package_id` owns, plus guides it added that no other package
  /// still holds. Guides that were on a node before any package are never removed.
  #[instrument(level = "trace", skip(self))]
  pub fn unregister_actions(&self, package_id: &str) -> Result<UnregisterReport, StoreError> {
    let mut report = UnregisterReport {
      package_id: package_id.to_string(),
      ..UnregisterReport::default()
    };
    if !is_valid_package_id(package_id) {
      return Ok(report);
    }

    let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
    let mut nodes = self.store.load_nodes()?;
    let mut provenance = self.store.load_provenance()?;
    let mut guides = self.store.load_guide_owners()?;
    let owned = provenance.owned_by(package_id);
    if owned.is_empty() {
      info!(package_id, "package owns no actions");
      return Ok(report);
    }

    for (node_id, action) in &owned {
      provenance.remove(node_id, action);
      if let Some(node) = nodes.get_mut(node_id) {
        node.actions.remove(action);
      }
      report.removed += 1;
    }

    for (node_id, guide) in guides.release(package_id) {
      if let Some(node) = nodes.get_mut(&node_id) {
        let before = node.guides.len();
        node.guides.retain(|g| *g != guide);
        report.guides_removed += before - node.guides.len();
      }
    }

    self.commit(nodes, provenance, &guides)?;
    info!(
      package_id,
      removed = report.removed,
      guides_removed = report.guides_removed,
      "actions unregistered"
    );
    Ok(report)
  }

  /// Persists the registry files (with backups) and publishes the new snapshot.
  fn commit(
    &self,
    nodes: BTreeMap<String, NodeDescriptor>,
    provenance: ProvenanceTable,
    guides: &GuideOwners,
  ) -> Result<(), StoreError> {
    self.store.save(&nodes, &provenance, guides)?;
    self
      .registry
      .replace(RegistrySnapshot::from_parts(nodes, provenance));
    Ok(())
  }
}

/// A single, non-empty path component.
fn is_valid_package_id(package_id: &str) -> bool {
  !package_id.is_empty()
    && package_id != "."
    && package_id != ".."
    && !package_id.contains(['/', '\\'])
}
