//! Integration tests for the `ibl` CLI against temporary registry and package directories.

use serde_json::{Value, json};
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

/// Registry with `source` and `system` nodes plus one package manifest, all under a tempdir.
fn workspace() -> TempDir {
  let dir = tempfile::tempdir().expect("temp dir");
  let registry = dir.path().join("registry");
  std::fs::create_dir_all(&registry).expect("registry dir");
  std::fs::write(
    registry.join("nodes.json"),
    json!({"nodes": {
      "source": {"actions": {"web_search": {"description": "Search the web for a query"}}},
      "system": {"actions": {"file": {"description": "Write text to a file"}}},
      "planner": {"kind": "agent", "actions": {"ask": {"description": "Ask the planner"}}}
    }})
    .to_string(),
  )
  .expect("write nodes");
  let package = dir.path().join("packages").join("weather-pkg");
  std::fs::create_dir_all(&package).expect("package dir");
  std::fs::write(
    package.join("ibl_actions.json"),
    json!({
      "node": "source",
      "actions": {"weather": {"description": "Weather forecast for a city", "tool": "forecast"}},
      "guides": ["guides/weather.md"]
    })
    .to_string(),
  )
  .expect("write manifest");
  dir
}

fn ibl(dir: &Path, args: &[&str]) -> Output {
  Command::new(env!("CARGO_BIN_EXE_ibl"))
    .arg("--registry-dir")
    .arg(dir.join("registry"))
    .arg("--packages-dir")
    .arg(dir.join("packages"))
    .args(args)
    .env("RUST_LOG", "warn")
    .env_remove("IBL_FAILURE_POLICY")
    .env_remove("IBL_PARALLEL_SUCCESS")
    .env_remove("IBL_DRIVER_TIMEOUT_MS")
    .output()
    .expect("run ibl")
}

fn stdout_json(out: &Output) -> Value {
  serde_json::from_slice(&out.stdout).unwrap_or_else(|e| {
    panic!(
      "stdout is not JSON ({}): {}\nstderr: {}",
      e,
      String::from_utf8_lossy(&out.stdout),
      String::from_utf8_lossy(&out.stderr)
    )
  })
}

fn write_program(dir: &Path, code: &str) -> String {
  let path = dir.join("program.ibl");
  std::fs::write(&path, code).expect("write program");
  path.to_str().expect("path").to_string()
}

#[test]
fn ibl_prints_usage_without_args() {
  let out = Command::new(env!("CARGO_BIN_EXE_ibl")).output().expect("run ibl");
  assert!(!out.status.success());
  let stderr = String::from_utf8_lossy(&out.stderr);
  assert!(stderr.contains("Usage") || stderr.contains("usage"));
}

#[test]
fn parse_prints_canonical_form() {
  let dir = workspace();
  let program = write_program(
    dir.path(),
    "# morning digest\n$q = [source:web_search](rust)\n[source:web_search]($q) >>\n  [system:file](\"out.md\")\n",
  );
  let out = ibl(dir.path(), &["parse", &program]);
  assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
  let text = String::from_utf8_lossy(&out.stdout);
  assert_eq!(
    text.trim_end(),
    "$q = [source:web_search](\"rust\")\n[source:web_search](\"$q\") >> [system:file](\"out.md\")"
  );

  let out = ibl(dir.path(), &["parse", "--json", &program]);
  let ast = stdout_json(&out);
  assert_eq!(ast["bindings"][0]["name"], json!("q"));
}

#[test]
fn parse_exits_1_on_syntax_error() {
  let dir = workspace();
  let program = write_program(dir.path(), "[source:web_search](\"x\" >> [system:file]\n");
  let out = ibl(dir.path(), &["parse", &program]);
  assert!(!out.status.success());
  assert!(String::from_utf8_lossy(&out.stderr).contains("Syntax error"));
}

#[test]
fn parse_exits_1_for_missing_file() {
  let dir = workspace();
  let out = ibl(dir.path(), &["parse", "/nonexistent/program.ibl"]);
  assert!(!out.status.success());
  assert!(String::from_utf8_lossy(&out.stderr).contains("Error reading"));
}

#[test]
fn dry_run_echoes_every_step_and_writes_log() {
  let dir = workspace();
  let program = write_program(
    dir.path(),
    "[source:web_search](\"AI\") & [source:web_search](\"ML\") >> [system:file](\"out.md\")",
  );
  let log_path = dir.path().join("runs").join("execution.log.json");
  let out = ibl(
    dir.path(),
    &["dry-run", &program, "--execution-log", log_path.to_str().unwrap()],
  );
  assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
  let results = stdout_json(&out);
  assert_eq!(results[0]["success"], json!(true));
  assert_eq!(results[0]["data"]["action"], json!("file"));
  assert_eq!(results[0]["data"]["target"], json!("out.md"));
  assert!(results[0]["data"]["params"]["_prev_result"].is_array());

  let log: Value = serde_json::from_str(&std::fs::read_to_string(&log_path).unwrap()).unwrap();
  assert_eq!(log["final_status"], json!("success"));
  assert_eq!(log["entries"].as_array().unwrap().len(), 2);
}

#[test]
fn dry_run_exits_1_when_a_pipeline_fails() {
  let dir = workspace();
  let program = write_program(dir.path(), "[source:weather](\"Seoul\")");
  let out = ibl(dir.path(), &["dry-run", &program]);
  assert!(!out.status.success());
  let results = stdout_json(&out);
  assert_eq!(results[0]["success"], json!(false));
}

#[test]
fn register_then_unregister_package() {
  let dir = workspace();
  let out = ibl(dir.path(), &["register", "weather-pkg"]);
  assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
  let report = stdout_json(&out);
  assert_eq!(report["registered"], json!(1));
  assert_eq!(report["guides_added"], json!(1));

  let nodes = stdout_json(&ibl(dir.path(), &["nodes"]));
  let source = nodes
    .as_array()
    .unwrap()
    .iter()
    .find(|n| n["id"] == json!("source"))
    .expect("source node")
    .clone();
  assert_eq!(source["actions"]["weather"]["handler"]["tool"], json!("forecast"));

  let program = write_program(dir.path(), "[source:weather](\"Seoul\")");
  let out = ibl(dir.path(), &["dry-run", &program]);
  assert!(out.status.success());
  assert_eq!(stdout_json(&out)[0]["data"]["action"], json!("forecast"));

  let out = ibl(dir.path(), &["unregister", "weather-pkg"]);
  assert_eq!(stdout_json(&out)["removed"], json!(1));
  assert!(dir.path().join("registry").join("provenance.json").exists());
}

#[test]
fn register_missing_manifest_reports_skip() {
  let dir = workspace();
  let out = ibl(dir.path(), &["register", "ghost-pkg"]);
  assert!(out.status.success());
  assert_eq!(stdout_json(&out)["skipped"]["reason"], json!("manifest_missing"));
}

#[test]
fn nodes_hides_agents_unless_asked() {
  let dir = workspace();
  let ids = |out: &Output| -> Vec<String> {
    stdout_json(out)
      .as_array()
      .unwrap()
      .iter()
      .map(|n| n["id"].as_str().unwrap().to_string())
      .collect()
  };
  assert_eq!(ids(&ibl(dir.path(), &["nodes"])), vec!["source", "system"]);
  assert_eq!(
    ids(&ibl(dir.path(), &["nodes", "--agents"])),
    vec!["planner", "source", "system"]
  );
}

#[test]
fn discover_ranks_matching_node() {
  let dir = workspace();
  let out = ibl(dir.path(), &["discover", "search the web", "--limit", "1"]);
  assert!(out.status.success());
  let found = stdout_json(&out);
  assert_eq!(found.as_array().unwrap().len(), 1);
  assert_eq!(found[0]["node"], json!("source"));
  assert_eq!(found[0]["actions"][0]["action"], json!("web_search"));
}

#[cfg(unix)]
#[test]
fn run_uses_node_command_driver() {
  let dir = workspace();
  let program = write_program(dir.path(), "[system:file](\"out.md\"){\"text\": \"hi\"}");
  let out = ibl(
    dir.path(),
    &["run", &program, "--driver", "system=cat", "--agent", "planner"],
  );
  assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
  let results = stdout_json(&out);
  let request = &results[0]["data"];
  assert_eq!(request["action"], json!("file"));
  assert_eq!(request["params"]["text"], json!("hi"));
  assert_eq!(request["context"]["agent_id"], json!("planner"));
}
