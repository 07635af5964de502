//! IBL data model: parsed programs, result envelopes and registry records.
//!
//! Parsed values (`Step`, `Group`, `Pipeline`, `Program`) are immutable once the parser
//! returns them. Registry records (`NodeDescriptor`, `ProvenanceTable`) are only mutated
//! by the installer and are read through immutable snapshots.

mod action_manifest;
mod execution_context;
mod execution_log;
mod group;
mod node_descriptor;
mod program;
mod provenance;
mod result_envelope;
mod step;

pub use action_manifest::{ActionManifest, ManifestAction, ManifestNode};
pub use execution_context::ExecutionContext;
pub use execution_log::{ExecutionLog, ExecutionLogEntry};
pub use group::Group;
pub use node_descriptor::{ActionDescriptor, ActionHandler, NodeDescriptor, NodeKind};
pub use program::{Binding, Pipeline, Program};
pub use provenance::{GuideOwners, ProvenanceTable};
pub use result_envelope::ResultEnvelope;
pub use step::Step;

/// Ordered parameter object of a step (source order is preserved).
pub type Params = serde_json::Map<String, serde_json::Value>;
