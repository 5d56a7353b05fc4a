//! `marathon` CLI entry-point.
//!
//! Available sub-commands:
//! - `run`      — execute a graph definition once.
//! - `validate` — check a graph definition's structure.
//! - `catalog`  — list the node templates.
//! - `new`      — scaffold a linear graph from template ids.
//! - `schedule` — run a graph on a wall-clock schedule until Ctrl-C.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use engine::validate::topological_order;
use engine::{
    builtin_registry, export_logs, validate_graph, EngineConfig, ExecutionStatus, ExecutorConfig,
    Graph, GraphStore, Position, ScheduleEntry, ScheduleSpec, Scheduler, Subflow, SubflowLibrary,
    WorkflowExecutor,
};
use nodes::Category;

/// Horizontal spacing of scaffolded nodes on the canvas.
const NODE_SPACING: f64 = 240.0;

#[derive(Parser)]
#[command(
    name = "marathon",
    about = "Visual workflow graph execution engine",
    version
)]
struct Cli {
    /// Engine configuration file (TOML).
    #[arg(long, global = true, env = "MARATHON_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Execute a graph definition JSON file once.
    Run {
        path: PathBuf,
        /// JSON payload handed to every trigger.
        #[arg(long)]
        input: Option<String>,
        /// JSON file holding an array of subflow definitions.
        #[arg(long)]
        subflows: Option<PathBuf>,
        /// Write the execution log to this file.
        #[arg(long)]
        logs: Option<PathBuf>,
    },
    /// Validate a graph definition JSON file.
    Validate { path: PathBuf },
    /// List node templates.
    Catalog {
        #[arg(long, value_enum)]
        category: Option<CategoryArg>,
    },
    /// Build a linear graph from catalog template ids, wired in order.
    New {
        #[arg(long, default_value = "Untitled workflow")]
        name: String,
        #[arg(required = true)]
        templates: Vec<String>,
        /// Output file; stdout when omitted.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Run a graph on a schedule until interrupted.
    Schedule {
        path: PathBuf,
        /// Interval in whole minutes.
        #[arg(long, conflicts_with = "at", required_unless_present = "at")]
        every: Option<u32>,
        /// Single run at an RFC 3339 timestamp.
        #[arg(long)]
        at: Option<DateTime<Utc>>,
        #[arg(long)]
        subflows: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum CategoryArg {
    Triggers,
    Actions,
    Conditions,
    Data,
    Integrations,
    Ai,
}

impl From<CategoryArg> for Category {
    fn from(arg: CategoryArg) -> Self {
        match arg {
            CategoryArg::Triggers => Category::Triggers,
            CategoryArg::Actions => Category::Actions,
            CategoryArg::Conditions => Category::Conditions,
            CategoryArg::Data => Category::Data,
            CategoryArg::Integrations => Category::Integrations,
            CategoryArg::Ai => Category::Ai,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log.filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Command::Run {
            path,
            input,
            subflows,
            logs,
        } => {
            let graph = read_graph(&path)?;
            let input: Value = match input {
                Some(raw) => serde_json::from_str(&raw).context("--input is not valid JSON")?,
                None => json!({}),
            };
            let executor = build_executor(&config, subflows.as_deref())?;

            let mut store = GraphStore::new(graph);
            let execution = executor.run_with_input(store.graph(), input).await;
            store.apply_execution(&execution);

            for node in &store.graph().nodes {
                println!("{:<10} {} ({})", format!("{:?}", node.status), node.title, node.id);
            }
            for error in &execution.errors {
                eprintln!("error: {}", error.message);
            }
            println!(
                "execution {} {}: {} node activation(s)",
                execution.id,
                execution.status,
                execution.executed_nodes.len()
            );

            if let Some(out) = logs {
                std::fs::write(&out, export_logs(&execution)?)
                    .with_context(|| format!("cannot write logs to {}", out.display()))?;
                info!("logs written to {}", out.display());
            }

            if execution.status == ExecutionStatus::Failed {
                std::process::exit(1);
            }
        }

        Command::Validate { path } => {
            let graph = read_graph(&path)?;
            match validate_graph(&graph) {
                Ok(report) => {
                    println!("✅ Graph is valid. Triggers: {:?}", report.triggers);
                    match topological_order(&graph) {
                        Some(order) => println!("Node order: {order:?}"),
                        None => println!("Graph contains a cycle; loops are bounded at run time."),
                    }
                }
                Err(e) => {
                    eprintln!("❌ Validation failed: {e}");
                    std::process::exit(1);
                }
            }
        }

        Command::Catalog { category } => {
            let templates: Vec<_> = match category {
                Some(c) => nodes::catalog::templates_in(c.into()).collect(),
                None => nodes::catalog::catalog().iter().collect(),
            };
            for t in templates {
                let outputs: Vec<&str> = t.outputs().map(|p| p.key.as_str()).collect();
                println!("{:<18} {:<28} -> {}", t.id, t.title, outputs.join(", "));
            }
        }

        Command::New {
            name,
            templates,
            out,
        } => {
            let graph = scaffold(&name, &templates)?;
            let json = serde_json::to_string_pretty(&graph)?;
            match out {
                Some(path) => std::fs::write(&path, json)
                    .with_context(|| format!("cannot write {}", path.display()))?,
                None => println!("{json}"),
            }
        }

        Command::Schedule {
            path,
            every,
            at,
            subflows,
        } => {
            let graph = read_graph(&path)?;
            let spec = match (every, at) {
                (Some(every_minutes), _) => ScheduleSpec::Interval {
                    every_minutes,
                    start_at: None,
                },
                (None, Some(at)) => ScheduleSpec::Once { at },
                (None, None) => bail!("either --every or --at is required"),
            };

            let pool = db::pool::create_pool();
            engine::store::save_graph(&pool, &graph).await?;

            let executor = Arc::new(build_executor(&config, subflows.as_deref())?);
            let mut scheduler = Scheduler::new(
                executor,
                pool,
                Duration::from_secs(config.scheduler.tick_secs),
            );
            scheduler.add(ScheduleEntry::new(graph.id, spec, Utc::now())?);

            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    on_signal.cancel();
                }
            });

            scheduler.run(cancel).await;
        }
    }

    Ok(())
}

fn read_graph(path: &Path) -> Result<Graph> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read file {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("invalid graph JSON in {}", path.display()))
}

fn build_executor(config: &EngineConfig, subflows: Option<&Path>) -> Result<WorkflowExecutor> {
    let mut library = SubflowLibrary::new();
    if let Some(path) = subflows {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read file {}", path.display()))?;
        let defs: Vec<Subflow> = serde_json::from_str(&content)
            .with_context(|| format!("invalid subflow JSON in {}", path.display()))?;
        for def in defs {
            library.register(def);
        }
    }

    let bus = Arc::new(config.executor.event_bus());
    let mut events = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => debug!(?event, "run event"),
                Err(RecvError::Lagged(missed)) => warn!(missed, "run event tail fell behind"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let executor_config: ExecutorConfig = config.executor.clone().into();
    Ok(WorkflowExecutor::new(builtin_registry(), executor_config)
        .with_subflows(library)
        .with_events(bus))
}

/// Add each template left to right, wiring every node's first output to
/// the next node's first input.
fn scaffold(name: &str, templates: &[String]) -> Result<Graph> {
    let mut store = GraphStore::new(Graph::new(name));
    let mut previous: Option<String> = None;

    for (i, template) in templates.iter().enumerate() {
        let id = store.add_node_from_catalog(template, Position::new(i as f64 * NODE_SPACING, 0.0))?;

        if let Some(prev) = previous {
            let graph = store.graph();
            let output = graph.node(&prev).and_then(|n| n.outputs.first()).map(|p| p.key.clone());
            let input = graph.node(&id).and_then(|n| n.inputs.first()).map(|p| p.key.clone());
            match (output, input) {
                (Some(output), Some(input)) => {
                    store.connect(&prev, &output, &id, &input)?;
                }
                _ => warn!("cannot wire '{}' into '{}'; left unconnected", prev, template),
            }
        }
        previous = Some(id);
    }

    Ok(store.snapshot())
}
