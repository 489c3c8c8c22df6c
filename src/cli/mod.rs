//! SW-018: CLI subcommands — init, validate, plan, graph, apply, status, schema.

use crate::core::executor::{self, ApplyConfig, RunReport};
use crate::core::planner::{self, Compiled};
use crate::core::{parser, state, types};
use crate::provider::simulated::SimulatedProvisioner;
use clap::Subcommand;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new stackwire project
    Init {
        /// Directory to initialize (default: current)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Validate stack.yaml: parse, build the graph, order, and wire
    Validate {
        /// Path to stack.yaml
        #[arg(short, long, default_value = "stack.yaml")]
        file: PathBuf,
    },

    /// Show the deployment plan (diff declared stack vs lock)
    Plan {
        /// Path to stack.yaml
        #[arg(short, long, default_value = "stack.yaml")]
        file: PathBuf,

        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,

        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print materialization layers and the merged access edge set
    Graph {
        /// Path to stack.yaml
        #[arg(short, long, default_value = "stack.yaml")]
        file: PathBuf,
    },

    /// Materialize the stack
    Apply {
        /// Path to stack.yaml
        #[arg(short, long, default_value = "stack.yaml")]
        file: PathBuf,

        /// Use the simulated provisioner
        #[arg(long)]
        simulate: bool,

        /// Force re-materialization of unchanged nodes
        #[arg(long)]
        force: bool,

        /// Show the plan without executing it
        #[arg(long)]
        dry_run: bool,

        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,
    },

    /// Show current state from lock files
    Status {
        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,

        /// Target specific stack
        #[arg(short, long)]
        stack: Option<String>,
    },

    /// Print the JSON schema of the stack document
    Schema,

    /// Generate shell completions
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

/// Dispatch a CLI command.
pub fn dispatch(cmd: Commands) -> Result<(), String> {
    match cmd {
        Commands::Init { path } => cmd_init(&path),
        Commands::Validate { file } => cmd_validate(&file),
        Commands::Plan {
            file,
            state_dir,
            json,
        } => cmd_plan(&file, &state_dir, json),
        Commands::Graph { file } => cmd_graph(&file),
        Commands::Apply {
            file,
            simulate,
            force,
            dry_run,
            state_dir,
        } => cmd_apply(&file, &state_dir, simulate, force, dry_run),
        Commands::Status { state_dir, stack } => cmd_status(&state_dir, stack.as_deref()),
        Commands::Schema => cmd_schema(),
        Commands::Completions { shell } => {
            let mut cmd = Commands::augment_subcommands(clap::Command::new("stackwire"));
            clap_complete::generate(shell, &mut cmd, "stackwire", &mut std::io::stdout());
            Ok(())
        }
    }
}

const STARTER_NODES: &str = r#"nodes:
  db:
    kind: datastore
    attributes:
      engine: postgres
  app:
    kind: container
    attributes:
      image: "app:latest"
    environment:
      DB_HOST: "{{db.hostname}}"
      DB_PORT: "{{db.port}}"
    secrets:
      DB_PASSWORD:
        from: db
        field: password

edges: []

policy:
  failure: continue_independent
  conflict: flag
  auto_wire: true
  event_log: true
  lock_file: true
"#;

fn cmd_init(path: &Path) -> Result<(), String> {
    let config_path = path.join("stack.yaml");
    if config_path.exists() {
        return Err(format!("{} already exists", config_path.display()));
    }

    let state_dir = path.join("state");
    std::fs::create_dir_all(&state_dir).map_err(|e| format!("cannot create state dir: {}", e))?;

    let mut settings = indexmap::IndexMap::new();
    settings.insert("settings", types::Settings::default());
    let settings =
        serde_yaml_ng::to_string(&settings).map_err(|e| format!("serialize error: {}", e))?;

    let template = format!(
        "version: \"1.0\"\nname: my-stack\ndescription: \"Managed by stackwire\"\n\n{}\n{}",
        settings, STARTER_NODES
    );
    std::fs::write(&config_path, template)
        .map_err(|e| format!("cannot write {}: {}", config_path.display(), e))?;

    println!("Initialized stackwire project at {}", path.display());
    println!("  Created: {}", config_path.display());
    println!("  Created: {}/", state_dir.display());
    Ok(())
}

/// Parse and compile a stack file, printing every error on its own line.
fn load_and_compile(file: &Path) -> Result<Compiled, String> {
    let config = parser::parse_config_file(file)?;
    planner::compile(&config).map_err(|report| {
        for e in &report.errors {
            eprintln!("  ERROR: {}", e);
        }
        format!("validation failed: {} error(s)", report.len())
    })
}

fn cmd_validate(file: &Path) -> Result<(), String> {
    let compiled = load_and_compile(file)?;
    println!(
        "OK: {} ({} nodes, {} layers, {} access edges)",
        compiled.graph.name,
        compiled.graph.len(),
        compiled.order.layers.len(),
        compiled.wiring.edges.len()
    );
    for finding in &compiled.wiring.findings {
        println!("  WARNING: {}", finding);
    }
    Ok(())
}

fn cmd_plan(file: &Path, state_dir: &Path, json: bool) -> Result<(), String> {
    let compiled = load_and_compile(file)?;
    let lock = state::load_lock(state_dir, &compiled.graph.name)?;
    let plan = planner::plan(&compiled, lock.as_ref());

    if json {
        let out =
            serde_json::to_string_pretty(&plan).map_err(|e| format!("JSON error: {}", e))?;
        println!("{}", out);
    } else {
        print_plan(&plan);
    }
    Ok(())
}

/// Display a plan to stdout.
fn print_plan(plan: &types::DeploymentPlan) {
    println!("Planning: {} ({} nodes)", plan.name, plan.operations.len());
    println!();

    let mut current_layer = None;
    for op in &plan.operations {
        if current_layer != Some(op.layer) {
            current_layer = Some(op.layer);
            println!("layer {}:", op.layer);
        }
        println!("  {} {}", symbol(op.action), op.description);
    }
    if !plan.destroys.is_empty() {
        println!("destroy:");
        for op in &plan.destroys {
            println!("  {} {}", symbol(op.action), op.description);
        }
    }

    print_edges(&plan.edges, &plan.findings);

    println!();
    println!(
        "Plan: {} to add, {} to change, {} to destroy, {} unchanged.",
        plan.to_create, plan.to_update, plan.to_destroy, plan.unchanged
    );
}

fn symbol(action: types::PlanAction) -> &'static str {
    match action {
        types::PlanAction::Create => "+",
        types::PlanAction::Update => "~",
        types::PlanAction::Destroy => "-",
        types::PlanAction::NoOp => " ",
    }
}

fn print_edges(edges: &[types::AccessEdge], findings: &[types::WiringFinding]) {
    println!();
    println!("Access edges ({}):", edges.len());
    for edge in edges {
        let origin = match &edge.origin {
            types::EdgeOrigin::Explicit => "explicit".to_string(),
            types::EdgeOrigin::Synthesized { consumption } => format!("from {}", consumption),
        };
        println!("  {} ({})", edge, origin);
    }
    for finding in findings {
        println!("  WARNING: {}", finding);
    }
}

fn cmd_graph(file: &Path) -> Result<(), String> {
    let compiled = load_and_compile(file)?;
    println!("{}: {} nodes", compiled.graph.name, compiled.graph.len());
    for (i, layer) in compiled.order.layers.iter().enumerate() {
        println!("  layer {}: {}", i, layer.join(", "));
    }
    for id in compiled.order.linear() {
        let deps = compiled.graph.dependencies(&id);
        if !deps.is_empty() {
            println!("  {} <- {}", id, deps.join(", "));
        }
    }
    print_edges(&compiled.wiring.edges, &compiled.wiring.findings);
    Ok(())
}

fn cmd_apply(
    file: &Path,
    state_dir: &Path,
    simulate: bool,
    force: bool,
    dry_run: bool,
) -> Result<(), String> {
    if !simulate && !dry_run {
        return Err("no provisioner configured; pass --simulate or --dry-run".to_string());
    }
    let config = parser::parse_config_file(file)?;
    // report every compile error before apply flattens them
    load_and_compile(file)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("cannot start runtime: {}", e))?;

    let result = runtime.block_on(executor::apply(ApplyConfig {
        config: &config,
        state_dir,
        provisioner: Arc::new(SimulatedProvisioner::new(config.settings.clone())),
        force,
        dry_run,
    }))?;

    let report = match result.report {
        Some(report) => report,
        None => {
            print_plan(&result.plan);
            println!();
            println!("Dry run — no changes applied.");
            return Ok(());
        }
    };

    print_report(&config.name, &report);
    if report.is_success() {
        Ok(())
    } else {
        Err(format!(
            "{} failed, {} blocked, {} not started, {} edge(s) failed",
            report.failed.len(),
            report.blocked.len(),
            report.not_started.len(),
            report.failed_edges.len()
        ))
    }
}

fn print_report(stack: &str, report: &RunReport) {
    println!("{} (run {}):", stack, report.run_id);
    for id in &report.materialized {
        let duration = report
            .durations
            .get(id)
            .map(|d| format!(" ({:.2}s)", d))
            .unwrap_or_default();
        println!("  MATERIALIZED {}{}", id, duration);
    }
    for id in &report.unchanged {
        println!("  UNCHANGED    {}", id);
    }
    for (id, error) in &report.failed {
        println!("  FAILED       {}: {}", id, error);
    }
    for (id, by) in &report.blocked {
        println!("  BLOCKED      {} (by {})", id, by.join(", "));
    }
    for id in &report.not_started {
        println!("  NOT STARTED  {}", id);
    }
    for edge in &report.granted {
        println!("  GRANTED      {}", edge);
    }
    for failure in &report.failed_edges {
        println!("  EDGE FAILED  {}: {}", failure.edge, failure.error);
    }
    for edge in &report.pending_edges {
        println!("  PENDING      {}", edge);
    }
    for id in &report.destroyed {
        println!("  DESTROYED    {}", id);
    }
    for (id, error) in &report.failed_destroys {
        println!("  DESTROY FAILED {}: {}", id, error);
    }
    println!();
    println!(
        "Apply: {} materialized, {} unchanged, {} failed, {} blocked ({:.1}s)",
        report.materialized.len(),
        report.unchanged.len(),
        report.failed.len(),
        report.blocked.len(),
        report.total_seconds
    );
}

fn cmd_status(state_dir: &Path, stack_filter: Option<&str>) -> Result<(), String> {
    let entries = std::fs::read_dir(state_dir)
        .map_err(|e| format!("cannot read state dir {}: {}", state_dir.display(), e))?;

    let mut found = false;

    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        if let Some(filter) = stack_filter {
            if name != filter {
                continue;
            }
        }

        if !entry.path().is_dir() {
            continue;
        }

        if let Some(lock) = state::load_lock(state_dir, &name)? {
            found = true;
            println!("Stack: {}", lock.stack);
            println!("  Generated: {}", lock.generated_at);
            println!("  Generator: {}", lock.generator);
            println!("  Nodes: {}", lock.nodes.len());

            for (id, nl) in &lock.nodes {
                let duration = nl
                    .duration_seconds
                    .map(|d| format!(" ({:.2}s)", d))
                    .unwrap_or_default();
                println!("    {}: {} [{}]{}", id, nl.status, nl.kind, duration);
                for (attr, value) in &nl.outputs {
                    println!("      {} = {}", attr, value);
                }
            }
            println!();
        }
    }

    if !found {
        println!("No state found. Run `stackwire apply` first.");
    }

    Ok(())
}

fn cmd_schema() -> Result<(), String> {
    let schema = schemars::schema_for!(types::StackConfig);
    let out = serde_json::to_string_pretty(&schema).map_err(|e| format!("JSON error: {}", e))?;
    println!("{}", out);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const STACK: &str = r#"
version: "1.0"
name: shop
nodes:
  db:
    kind: datastore
    attributes: { engine: postgres }
  app:
    kind: container
    attributes: { image: "shop:1" }
    environment:
      DB_HOST: "{{db.hostname}}"
    secrets:
      DB_USER: { from: db, field: username }
"#;

    fn write_stack(dir: &Path, yaml: &str) -> PathBuf {
        let file = dir.join("stack.yaml");
        std::fs::write(&file, yaml).unwrap();
        file
    }

    #[test]
    fn test_sw018_init() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("test-project");
        std::fs::create_dir_all(&sub).unwrap();
        cmd_init(&sub).unwrap();
        assert!(sub.join("stack.yaml").exists());
        assert!(sub.join("state").is_dir());

        let config = parser::parse_config_file(&sub.join("stack.yaml")).unwrap();
        assert_eq!(config.settings, types::Settings::default());
        let compiled = planner::compile(&config).unwrap();
        assert_eq!(compiled.order.layers, vec![vec!["db"], vec!["app"]]);
    }

    #[test]
    fn test_sw018_init_already_exists() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("stack.yaml"), "exists").unwrap();
        assert!(cmd_init(dir.path()).is_err());
    }

    #[test]
    fn test_sw018_validate_valid() {
        let dir = tempfile::tempdir().unwrap();
        cmd_validate(&write_stack(dir.path(), STACK)).unwrap();
    }

    #[test]
    fn test_sw018_validate_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_stack(
            dir.path(),
            r#"
version: "1.0"
name: t
nodes:
  a: { kind: network, depends_on: [b] }
  b: { kind: network, depends_on: [a] }
"#,
        );
        let err = cmd_validate(&file).unwrap_err();
        assert!(err.contains("validation failed"));
    }

    #[test]
    fn test_sw018_validate_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(cmd_validate(&dir.path().join("nope.yaml")).is_err());
    }

    #[test]
    fn test_sw018_plan_and_graph() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_stack(dir.path(), STACK);
        let state = dir.path().join("state");
        cmd_plan(&file, &state, false).unwrap();
        cmd_plan(&file, &state, true).unwrap();
        cmd_graph(&file).unwrap();
    }

    #[test]
    fn test_sw018_apply_requires_provisioner() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_stack(dir.path(), STACK);
        let err = cmd_apply(&file, &dir.path().join("state"), false, false, false).unwrap_err();
        assert!(err.contains("--simulate"));
    }

    #[test]
    fn test_sw018_apply_dry_run() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_stack(dir.path(), STACK);
        let state = dir.path().join("state");
        cmd_apply(&file, &state, false, false, true).unwrap();
        assert!(!state::lock_file_path(&state, "shop").exists());
    }

    #[test]
    fn test_sw018_apply_simulated_then_status() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_stack(dir.path(), STACK);
        let state = dir.path().join("state");
        cmd_apply(&file, &state, true, false, false).unwrap();

        let lock = state::load_lock(&state, "shop").unwrap().unwrap();
        assert_eq!(lock.nodes.len(), 2);
        assert!(state.join("shop").join("events.jsonl").exists());

        cmd_status(&state, None).unwrap();
        cmd_status(&state, Some("shop")).unwrap();
        cmd_plan(&file, &state, false).unwrap();
    }

    #[test]
    fn test_sw018_status_empty() {
        let dir = tempfile::tempdir().unwrap();
        cmd_status(dir.path(), None).unwrap();
    }

    #[test]
    fn test_sw018_status_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(cmd_status(&dir.path().join("absent"), None).is_err());
    }

    #[test]
    fn test_sw018_schema() {
        cmd_schema().unwrap();
        let schema = schemars::schema_for!(types::StackConfig);
        let json = serde_json::to_value(&schema).unwrap();
        assert!(json["properties"]["nodes"].is_object());
    }

    #[test]
    fn test_sw018_dispatch() {
        let dir = tempfile::tempdir().unwrap();
        dispatch(Commands::Init {
            path: dir.path().to_path_buf(),
        })
        .unwrap();
        dispatch(Commands::Validate {
            file: dir.path().join("stack.yaml"),
        })
        .unwrap();
        dispatch(Commands::Apply {
            file: dir.path().join("stack.yaml"),
            simulate: true,
            force: false,
            dry_run: false,
            state_dir: dir.path().join("state"),
        })
        .unwrap();
        dispatch(Commands::Status {
            state_dir: dir.path().join("state"),
            stack: Some("my-stack".to_string()),
        })
        .unwrap();
    }
}
