//! # ibl-engine
//!
//! Parser, capability registry and async execution engine for IBL, a small pipeline
//! language in which agents chain capability calls:
//!
//! ```text
//! $city = [system:profile]("home_city")
//! [source:weather]($city) & [source:news]("local") >> [messenger:send]{"to": "me"}
//! ```
//!
//! ## Architecture
//!
//! - [ibl_parser] turns source text into an immutable [Program]; [render] prints it back.
//! - [registry] holds node definitions as swappable snapshots, persisted by [registry_io].
//! - [installer] merges package action manifests into the registry with provenance.
//! - [engine] runs programs, dispatching each step through a [Driver] looked up in a
//!   [DriverTable]. Every failure becomes a [ResultEnvelope] with `success: false`.
//!
//! Set RUST_LOG=ibl_engine=trace for TRACE-level span enter/exit and events.

pub mod binder;
pub mod command_driver;
pub mod config;
pub mod discovery;
pub mod driver;
pub mod engine;
#[cfg(test)]
mod engine_test;
pub mod error;
pub mod execution_log_io;
pub mod ibl_parser;
#[cfg(test)]
mod ibl_parser_test;
pub mod installer;
pub mod preprocess;
pub mod registry;
pub mod registry_io;
pub mod render;
pub mod types;

pub use command_driver::CommandDriver;
pub use config::{EngineConfig, FailurePolicy, ParallelSuccessPolicy};
pub use discovery::Discovery;
pub use driver::{Driver, DriverTable, EchoDriver, FnDriver};
pub use engine::{ExecutionEngine, ProgramRun};
pub use error::{ConfigError, DispatchError, LookupError, StoreError, SyntaxError};
pub use ibl_parser::parse;
pub use installer::{ActionInstaller, RegisterReport, SkipReason, UnregisterReport};
pub use registry::{NodeRegistry, RegistrySnapshot};
pub use registry_io::RegistryStore;
pub use render::render_program;
pub use types::{ExecutionContext, Group, Pipeline, Program, ResultEnvelope, Step};
