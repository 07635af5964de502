//! CLI: parse, inspect and run IBL programs against a registry directory.
//!
//! Usage: `ibl [OPTIONS] <COMMAND>`
//! Example: ibl dry-run morning.ibl
//!
//! The registry lives in `--registry-dir` (nodes.json, provenance.json, guides.json); packages with an
//! `ibl_actions.json` manifest live under `--packages-dir`.
//!
//! Set RUST_LOG=ibl_engine=trace for TRACE-level span enter/exit and events.

use clap::{Parser, Subcommand};
use ibl_engine::execution_log_io::write_execution_log;
use ibl_engine::{
  ActionInstaller, CommandDriver, DriverTable, EchoDriver, EngineConfig, ExecutionContext,
  ExecutionEngine, NodeRegistry, Program, RegistryStore, parse, render_program,
};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt::Display;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt::format::FmtSpan};

/// Parse, inspect and run IBL programs.
#[derive(Parser, Debug)]
#[command(name = "ibl")]
#[command(
  after_help = r#"Environment variables:
  IBL_REGISTRY_DIR       Registry directory (same as --registry-dir).
  IBL_PACKAGES_DIR       Packages directory (same as --packages-dir).
  IBL_FAILURE_POLICY     abort | continue
  IBL_PARALLEL_SUCCESS   any | all
  IBL_DRIVER_TIMEOUT_MS  Per driver call; 0 disables the timeout.

Examples:
  ibl parse morning.ibl --json
  ibl dry-run morning.ibl --execution-log .ibl/runs/last.json
  ibl run morning.ibl --driver system="python3 drivers/system.py"
  ibl discover "weather forecast" --limit 3"#
)]
struct Args {
  /// Directory holding nodes.json, provenance.json and guides.json.
  #[arg(long, value_name = "DIR", env = "IBL_REGISTRY_DIR", default_value = ".ibl")]
  registry_dir: PathBuf,

  /// Directory holding one subdirectory per package.
  #[arg(long, value_name = "DIR", env = "IBL_PACKAGES_DIR", default_value = "packages")]
  packages_dir: PathBuf,

  /// JSON engine configuration; IBL_* variables override it.
  #[arg(long, value_name = "FILE")]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Parse a program and print it back in canonical form.
  Parse {
    /// Program file, or `-` for stdin.
    file: PathBuf,
    /// Print the parsed structure as JSON.
    #[arg(long)]
    json: bool,
  },
  /// Run a program with every action echoed instead of executed.
  DryRun {
    file: PathBuf,
    #[arg(long, value_name = "FILE")]
    execution_log: Option<PathBuf>,
  },
  /// Run a program. Package actions use the command from their manifest.
  Run {
    file: PathBuf,
    /// Command serving a node's built-in actions, as NODE=COMMAND. Repeatable.
    #[arg(long = "driver", value_name = "NODE=COMMAND")]
    drivers: Vec<String>,
    /// Agent id placed in the execution context.
    #[arg(long)]
    agent: Option<String>,
    #[arg(long, value_name = "FILE")]
    execution_log: Option<PathBuf>,
  },
  /// List registered nodes.
  Nodes {
    /// Include agent pseudo-nodes.
    #[arg(long)]
    agents: bool,
  },
  /// Rank nodes and actions for a natural-language query.
  Discover {
    query: String,
    #[arg(long, default_value_t = 5)]
    limit: usize,
  },
  /// Merge a package's action manifest into the registry.
  Register { package_id: String },
  /// Remove every action a package owns from the registry.
  Unregister { package_id: String },
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_span_events(FmtSpan::ENTER | FmtSpan::EXIT)
    .with_writer(std::io::stderr)
    .init();

  let args = Args::parse();
  info!(registry_dir = %args.registry_dir.display(), packages_dir = %args.packages_dir.display(), "ibl starting");

  let store = RegistryStore::new(&args.registry_dir);
  match args.command {
    Command::Parse { ref file, json } => {
      let program = read_program(file);
      if json {
        print_json(&program);
      } else {
        println!("{}", render_program(&program));
      }
    }
    Command::DryRun {
      ref file,
      ref execution_log,
    } => {
      let program = read_program(file);
      let registry = open_registry(store);
      let mut drivers = DriverTable::new();
      for node in registry.list_nodes(true) {
        drivers.register_node(node.id, Arc::new(EchoDriver));
      }
      for package_id in package_ids(&registry) {
        drivers.register_package(package_id, Arc::new(EchoDriver));
      }
      let engine = ExecutionEngine::new(registry, drivers).with_config(load_config(&args.config));
      execute(&engine, &program, ExecutionContext::new(), execution_log.as_deref()).await;
    }
    Command::Run {
      ref file,
      ref drivers,
      ref agent,
      ref execution_log,
    } => {
      let program = read_program(file);
      let registry = open_registry(store.clone());
      let installer = ActionInstaller::new(Arc::clone(&registry), store, &args.packages_dir);
      let mut table = DriverTable::new();
      for spec in drivers {
        let (node, command) = or_exit(parse_driver_spec(spec), "invalid --driver");
        table.register_node(node, Arc::new(command));
      }
      for package_id in package_ids(&registry) {
        let command = installer
          .read_manifest(&package_id)
          .ok()
          .and_then(|m| m.command().and_then(CommandDriver::from_command_line));
        match command {
          Some(driver) => {
            let dir = installer.packages_dir().join(&package_id);
            table.register_package(package_id, Arc::new(driver.with_working_dir(dir)));
          }
          None => info!(%package_id, "package has no command; its actions will fail"),
        }
      }
      let mut ctx = ExecutionContext::new();
      if let Some(agent) = agent {
        ctx = ctx.with_agent(agent.clone());
      }
      let engine = ExecutionEngine::new(registry, table).with_config(load_config(&args.config));
      execute(&engine, &program, ctx, execution_log.as_deref()).await;
    }
    Command::Nodes { agents } => {
      print_json(&open_registry(store).list_nodes(agents));
    }
    Command::Discover { ref query, limit } => {
      print_json(&open_registry(store).discover(query, limit));
    }
    Command::Register { ref package_id } => {
      let installer = ActionInstaller::new(open_registry(store.clone()), store, &args.packages_dir);
      let report = or_exit(installer.register_actions(package_id), "Registration failed");
      print_json(&report);
    }
    Command::Unregister { ref package_id } => {
      let installer = ActionInstaller::new(open_registry(store.clone()), store, &args.packages_dir);
      let report = or_exit(installer.unregister_actions(package_id), "Unregistration failed");
      print_json(&report);
    }
  }
}

async fn execute(
  engine: &ExecutionEngine,
  program: &Program,
  ctx: ExecutionContext,
  execution_log: Option<&Path>,
) {
  let run = engine.run_program(program, &ctx).await;
  if let Some(path) = execution_log {
    or_exit(write_execution_log(path, &run.log), "Error writing execution log");
  }
  print_json(&run.results);
  if !run.success() {
    process::exit(1);
  }
}

fn read_program(path: &Path) -> Program {
  let code = if path == Path::new("-") {
    let mut code = String::new();
    or_exit(std::io::stdin().read_to_string(&mut code), "Error reading stdin");
    code
  } else {
    or_exit(
      std::fs::read_to_string(path),
      &format!("Error reading {}", path.display()),
    )
  };
  or_exit(parse(&code), "Syntax error")
}

fn open_registry(store: RegistryStore) -> Arc<NodeRegistry> {
  Arc::new(or_exit(NodeRegistry::open(store), "Error loading registry"))
}

fn load_config(path: &Option<PathBuf>) -> EngineConfig {
  let mut config = match path {
    Some(path) => or_exit(EngineConfig::load(path), "Error loading config"),
    None => EngineConfig::default(),
  };
  or_exit(config.apply_env_overrides(), "Error in environment");
  config
}

/// Every package that currently handles at least one action.
fn package_ids(registry: &NodeRegistry) -> BTreeSet<String> {
  registry
    .snapshot()
    .nodes
    .values()
    .flat_map(|node| node.actions.values())
    .filter_map(|action| action.handler.package_id().map(str::to_string))
    .collect()
}

fn parse_driver_spec(spec: &str) -> Result<(String, CommandDriver), String> {
  let (node, command) = spec
    .split_once('=')
    .ok_or_else(|| format!("expected NODE=COMMAND, got '{}'", spec))?;
  let driver = CommandDriver::from_command_line(command)
    .ok_or_else(|| format!("empty command for node '{}'", node))?;
  Ok((node.trim().to_string(), driver))
}

fn print_json<T: Serialize>(value: &T) {
  let text = or_exit(serde_json::to_string_pretty(value), "Error encoding output");
  println!("{}", text);
}

fn or_exit<T, E: Display>(result: Result<T, E>, what: &str) -> T {
  match result {
    Ok(v) => v,
    Err(e) => {
      eprintln!("{}: {}", what, e);
      process::exit(1);
    }
  }
}
