// crates/cybercli/src/main.rs

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cybercore::services::Scheduler;
use cybercore::{
    ExecutionEvent, GraphStore, NodeConfig, NodeEvent, NodeSpec, NodeType, Role, WorkflowId,
    WorkflowSnapshot,
};
use cybernodes::Collaborators;
use cyberruntime::{
    CronScheduler, FlowRuntime, JsonlRunLog, NodeRegistry, RunRecorder, RuntimeConfig,
};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cyberflow")]
#[command(about = "Cyberflow workflow orchestrator", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a workflow file
    Run {
        /// Path to workflow JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Role to run as (admin, editor, viewer)
        #[arg(short, long, default_value = "editor")]
        role: Role,

        /// Runtime config (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Keep running scheduled jobs until Ctrl-C
        #[arg(short, long)]
        watch: bool,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Validate a workflow file
    Validate {
        /// Path to workflow JSON file
        file: PathBuf,
    },

    /// List available node types
    Nodes,

    /// Create a new example workflow
    Init {
        /// Output file path
        #[arg(short, long, default_value = "workflow.json")]
        output: PathBuf,
    },

    /// Summarise recorded runs
    Analytics {
        /// Path to the JSON-lines run log
        #[arg(short, long)]
        log: PathBuf,

        /// Only show runs of this workflow
        #[arg(short, long)]
        workflow: Option<WorkflowId>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            role,
            config,
            watch,
            verbose,
        } => {
            init_logging(verbose);
            run_workflow(file, role, config, watch).await?;
        }

        Commands::Validate { file } => {
            validate_workflow(&file)?;
        }

        Commands::Nodes => {
            list_nodes();
        }

        Commands::Init { output } => {
            create_example_workflow(&output)?;
        }

        Commands::Analytics { log, workflow } => {
            show_analytics(&log, workflow).await?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_snapshot(file: &Path) -> Result<WorkflowSnapshot> {
    let workflow_json = std::fs::read_to_string(file)
        .with_context(|| format!("reading {}", file.display()))?;
    let snapshot = serde_json::from_str(&workflow_json)
        .with_context(|| format!("parsing {}", file.display()))?;
    Ok(snapshot)
}

async fn run_workflow(file: PathBuf, role: Role, config: Option<PathBuf>, watch: bool) -> Result<()> {
    println!("🚀 Loading workflow from: {}", file.display());

    let config = match config {
        Some(path) => RuntimeConfig::load(&path)?,
        None => RuntimeConfig::default(),
    };
    let snapshot = load_snapshot(&file)?;

    println!("📋 Workflow: {}", snapshot.name);
    println!("   Nodes: {}", snapshot.nodes.len());
    println!("   Connections: {}", snapshot.edges.len());
    println!();

    // Create runtime with registered executors
    let scheduler = Arc::new(CronScheduler::new());
    let collaborators = Collaborators::from_config(&config, scheduler.clone());
    let mut registry = NodeRegistry::new();
    cybernodes::register_all(&mut registry, &collaborators);

    let mut runtime = FlowRuntime::new(registry, config.clone())
        .with_graph(GraphStore::from_snapshot(snapshot)?);
    if let Some(path) = &config.run_log_path {
        runtime = runtime.with_recorder(RunRecorder::restore(Arc::new(JsonlRunLog::new(path))).await?);
    }
    let runtime = Arc::new(runtime);

    // Spawn event listener
    let mut events = runtime.subscribe_events();
    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            print_event(event);
        }
    });

    let result = runtime.execute_workflow(role).await?;

    // Wait for events to finish printing
    tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;

    println!();
    println!("📊 Execution Summary:");
    println!("   Run ID: {}", result.run_id);
    println!("   {}", result.message);

    if !result.node_results.is_empty() {
        println!();
        println!("📤 Results:");
        for (node_id, value) in &result.node_results {
            let name = runtime
                .node(*node_id)
                .await
                .map(|n| n.name)
                .unwrap_or_else(|| node_id.to_string());
            println!("   {}: {}", name, value);
        }
    }

    if watch {
        let jobs = scheduler.list_jobs().await;
        if jobs.is_empty() {
            println!();
            println!("⏹️  No scheduled jobs, nothing to watch");
        } else {
            println!();
            println!("⏰ Watching {} scheduled job(s), press Ctrl-C to stop", jobs.len());
            for job in &jobs {
                if let Some(next) = job.next_run {
                    println!("   {} next run at {}", job.spec.name, next);
                }
            }
            let listener = runtime.spawn_trigger_listener(scheduler.subscribe());
            tokio::signal::ctrl_c().await?;
            scheduler.shutdown();
            listener.abort();
        }
    }

    event_task.abort();
    Ok(())
}

fn print_event(event: ExecutionEvent) {
    match event {
        ExecutionEvent::RunStarted { run_id, .. } => {
            println!("▶️  Run {} started", run_id);
        }
        ExecutionEvent::NodeStarted { node_id, node_type, .. } => {
            println!("  ⚡ Starting node: {} ({})", node_id, node_type);
        }
        ExecutionEvent::NodeCompleted { node_id, duration_ms, .. } => {
            println!("  ✅ Node {} completed in {}ms", node_id, duration_ms);
        }
        ExecutionEvent::NodeFailed { node_id, error, .. } => {
            println!("  ❌ Node {} failed: {}", node_id, error);
        }
        ExecutionEvent::NodeSkipped { node_id, .. } => {
            println!("  ⏭️  Node {} skipped", node_id);
        }
        ExecutionEvent::NodeEvent { node_id, event, .. } => match event {
            NodeEvent::Info { message } => {
                println!("     ℹ️  [{}] {}", node_id, message);
            }
            NodeEvent::Warning { message } => {
                println!("     ⚠️  [{}] {}", node_id, message);
            }
            NodeEvent::Progress { percent, message } => {
                if let Some(msg) = message {
                    println!("     📊 [{}] {}% - {}", node_id, percent, msg);
                } else {
                    println!("     📊 [{}] {}%", node_id, percent);
                }
            }
        },
        ExecutionEvent::RunCompleted { success, duration_ms, .. } => {
            if success {
                println!("✨ Workflow completed successfully in {}ms", duration_ms);
            } else {
                println!("💥 Workflow finished with failures after {}ms", duration_ms);
            }
        }
    }
}

fn validate_workflow(file: &Path) -> Result<()> {
    println!("🔍 Validating workflow: {}", file.display());

    let store = GraphStore::from_snapshot(load_snapshot(file)?)?;
    let order = cyberruntime::validate(store.nodes(), store.edges())?;
    standard_registry().check_coverage(store.nodes())?;

    println!("✅ Workflow is valid:");
    println!("   Name: {}", store.name());
    println!("   Nodes: {}", store.nodes().len());
    println!("   Connections: {}", store.edges().len());
    println!();
    println!("   Execution order:");
    for (position, id) in order.order().iter().enumerate() {
        if let Some(node) = store.node(*id) {
            let marker = if order.start_nodes().contains(id) { " (start)" } else { "" };
            println!("   {}. {} [{}]{}", position + 1, node.name, node.node_type(), marker);
        }
    }

    Ok(())
}

fn list_nodes() {
    println!("📦 Available Node Types:");
    println!();

    let registry = standard_registry();

    for node_type in registry.list_node_types() {
        if let Some(metadata) = registry.get_metadata(node_type) {
            println!("  • {} ({})", node_type, metadata.category);
            println!("    {}", metadata.description);
        } else {
            println!("  • {}", node_type);
        }
    }
}

/// Registry with the standard executors and default collaborators.
fn standard_registry() -> NodeRegistry {
    let collaborators =
        Collaborators::from_config(&RuntimeConfig::default(), Arc::new(CronScheduler::new()));
    let mut registry = NodeRegistry::new();
    cybernodes::register_all(&mut registry, &collaborators);
    registry
}

fn create_example_workflow(output: &Path) -> Result<()> {
    let mut workflow = WorkflowSnapshot::new("Example Shout Workflow");

    let input = NodeSpec::from_config(NodeConfig::with_overrides(
        NodeType::PinnedInput,
        &json!({ "value": "hello from cyberflow" }),
    )?)
    .with_name("Greeting");

    let shout = NodeSpec::from_config(NodeConfig::with_overrides(
        NodeType::Task,
        &json!({ "script": "return { shout: input.greeting.toUpperCase() };" }),
    )?)
    .with_name("Shout");

    let report = NodeSpec::from_config(NodeConfig::with_overrides(
        NodeType::Report,
        &json!({ "format": "markdown", "dashboard_section": "Examples" }),
    )?)
    .with_name("Report");

    let input_id = workflow.add_node(input);
    let shout_id = workflow.add_node(shout);
    let report_id = workflow.add_node(report);

    // Connect them
    workflow.connect(input_id, "greeting", shout_id, "input");
    workflow.connect(shout_id, "shout", report_id, "input");

    // Save to file
    let json = serde_json::to_string_pretty(&workflow)?;
    std::fs::write(output, json)?;

    println!("✨ Created example workflow: {}", output.display());
    println!();
    println!("Run it with:");
    println!("  cyberflow run --file {}", output.display());

    Ok(())
}

async fn show_analytics(log: &Path, workflow: Option<WorkflowId>) -> Result<()> {
    let recorder = RunRecorder::restore(Arc::new(JsonlRunLog::new(log))).await?;
    let runs = match workflow {
        Some(id) => recorder.runs_for(id).await,
        None => recorder.runs().await,
    };
    let summary = cyberruntime::summarize(&runs);

    println!("📈 Run analytics: {}", log.display());
    println!("   Runs: {} ({} succeeded, {} failed)", summary.total_runs, summary.successful_runs, summary.failed_runs);
    println!("   Average error rate: {:.1}%", summary.average_error_rate * 100.0);
    if let Some(avg) = summary.average_duration_ms {
        println!("   Average duration: {:.0}ms", avg);
    }

    if !runs.is_empty() {
        println!();
        for run in &runs {
            let failed: Vec<&str> = run
                .node_stats
                .iter()
                .filter(|s| s.error.is_some())
                .map(|s| s.node_name.as_str())
                .collect();
            println!(
                "   {} {:?} at {} error rate {:.0}%{}",
                run.id,
                run.status,
                run.started_at.format("%Y-%m-%d %H:%M:%S"),
                run.error_rate * 100.0,
                if failed.is_empty() {
                    String::new()
                } else {
                    format!(" (failed: {})", failed.join(", "))
                }
            );
        }
    }

    Ok(())
}
