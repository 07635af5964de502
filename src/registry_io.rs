//! Node-definition, provenance and guide-owner files under a registry directory (JSON).
//!
//! All three files are written in one cycle: backup the current files to `*.bak`, write
//! the new files to temporaries, then rename them into place.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

use crate::error::StoreError;
use crate::types::{GuideOwners, NodeDescriptor, ProvenanceTable};

/// Default filename for node definitions under a registry directory.
pub const NODES_FILENAME: &str = "nodes.json";
/// Default filename for the provenance table under a registry directory.
pub const PROVENANCE_FILENAME: &str = "provenance.json";
/// Default filename for the guide-owner map under a registry directory.
pub const GUIDES_FILENAME: &str = "guides.json";
/// Extension appended to a file's name for its single-slot backup.
pub const BACKUP_EXTENSION: &str = "bak";

/// On-disk shape of the node-definitions file.
#[derive(Debug, Default, Serialize, Deserialize)]
struct NodesFile {
  #[serde(default)]
  nodes: BTreeMap<String, NodeDescriptor>,
}

/// Registry directory holding [NODES_FILENAME], [PROVENANCE_FILENAME] and [GUIDES_FILENAME].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryStore {
  dir: PathBuf,
}

impl RegistryStore {
  pub fn new(dir: impl Into<PathBuf>) -> Self {
    Self { dir: dir.into() }
  }

  pub fn dir(&self) -> &Path {
    &self.dir
  }

  pub fn nodes_path(&self) -> PathBuf {
    self.dir.join(NODES_FILENAME)
  }

  pub fn provenance_path(&self) -> PathBuf {
    self.dir.join(PROVENANCE_FILENAME)
  }

  pub fn guides_path(&self) -> PathBuf {
    self.dir.join(GUIDES_FILENAME)
  }

  /// Loads node definitions. A missing file is an empty registry; ids come from the map keys.
  #[instrument(level = "trace", skip(self))]
  pub fn load_nodes(&self) -> Result<BTreeMap<String, NodeDescriptor>, StoreError> {
    let path = self.nodes_path();
    let Some(file) = read_json::<NodesFile>(&path)? else {
      return Ok(BTreeMap::new());
    };
    Ok(
      file
        .nodes
        .into_iter()
        .map(|(id, mut node)| {
          node.id = id.clone();
          (id, node)
        })
        .collect(),
    )
  }

  /// Loads the provenance table. A missing file is an empty table.
  #[instrument(level = "trace", skip(self))]
  pub fn load_provenance(&self) -> Result<ProvenanceTable, StoreError> {
    Ok(read_json(&self.provenance_path())?.unwrap_or_default())
  }

  /// Loads the guide-owner map. A missing file means no package owns any guide.
  #[instrument(level = "trace", skip(self))]
  pub fn load_guide_owners(&self) -> Result<GuideOwners, StoreError> {
    Ok(read_json(&self.guides_path())?.unwrap_or_default())
  }

  /// Backs up and replaces all three files.
  #[instrument(level = "trace", skip(self, nodes, provenance, guides))]
  pub fn save(
    &self,
    nodes: &BTreeMap<String, NodeDescriptor>,
    provenance: &ProvenanceTable,
    guides: &GuideOwners,
  ) -> Result<(), StoreError> {
    std::fs::create_dir_all(&self.dir).map_err(|e| StoreError::io(&self.dir, e))?;

    let nodes_path = self.nodes_path();
    let provenance_path = self.provenance_path();
    let guides_path = self.guides_path();
    backup(&nodes_path)?;
    backup(&provenance_path)?;
    backup(&guides_path)?;

    let nodes_file = NodesFile {
      nodes: nodes.clone(),
    };
    let nodes_tmp = write_tmp(&nodes_path, &nodes_file)?;
    let provenance_tmp = write_tmp(&provenance_path, provenance)?;
    let guides_tmp = write_tmp(&guides_path, guides)?;
    rename(&nodes_tmp, &nodes_path)?;
    rename(&provenance_tmp, &provenance_path)?;
    rename(&guides_tmp, &guides_path)?;

    debug!(
      dir = %self.dir.display(),
      nodes = nodes.len(),
      provenance = provenance.len(),
      "saved registry"
    );
    Ok(())
  }
}

/// `nodes.json` -> `nodes.json.bak`.
pub fn backup_path(path: &Path) -> PathBuf {
  with_suffix(path, BACKUP_EXTENSION)
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
  let mut name = path.file_name().unwrap_or_default().to_os_string();
  name.push(".");
  name.push(suffix);
  path.with_file_name(name)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
  let bytes = match std::fs::read(path) {
    Ok(bytes) => bytes,
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
    Err(e) => return Err(StoreError::io(path, e)),
  };
  serde_json::from_slice(&bytes)
    .map(Some)
    .map_err(|e| StoreError::json(path, e))
}

/// Copies the current file to its backup slot, overwriting the previous backup.
fn backup(path: &Path) -> Result<(), StoreError> {
  if !path.exists() {
    return Ok(());
  }
  let bak = backup_path(path);
  std::fs::copy(path, &bak).map_err(|e| StoreError::io(&bak, e))?;
  Ok(())
}

fn write_tmp<T: Serialize>(path: &Path, value: &T) -> Result<PathBuf, StoreError> {
  let json = serde_json::to_string_pretty(value).map_err(|e| StoreError::json(path, e))?;
  let tmp = with_suffix(path, "tmp");
  std::fs::write(&tmp, json).map_err(|e| StoreError::io(&tmp, e))?;
  Ok(tmp)
}

fn rename(from: &Path, to: &Path) -> Result<(), StoreError> {
  std::fs::rename(from, to).map_err(|e| StoreError::io(to, e))
}
