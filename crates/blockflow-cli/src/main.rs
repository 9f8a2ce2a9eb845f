//! `blockflow`: check, preview and replay workflow files, or run the scripted demo.

mod demo;

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use blockflow_core::execution::{ExecutionTracker, RunnerEvent};
use blockflow_core::observability::init_observability;
use blockflow_core::ports::unsatisfied_tools;
use blockflow_core::template::{OutputCache, TemplateResolver, validate_references};
use blockflow_core::{BlockId, ExecutionId, SessionConfig, Workflow};
use clap::{Parser, Subcommand};
use serde::Serialize;

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[derive(Parser)]
#[command(name = "blockflow", version, about = "Block workflow editor core tools")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Report template references that match no block or variable, and undeclared tools.
    Check {
        workflow: PathBuf,
        /// Integrations available to the workflow; repeat per tool.
        #[arg(long = "tool")]
        tools: Vec<String>,
    },
    /// Resolve a template string against a workflow and a block-output JSON file.
    Preview {
        workflow: PathBuf,
        /// JSON object of normalized id (or block id) -> output value.
        #[arg(long)]
        outputs: PathBuf,
        text: String,
    },
    /// Feed a JSON-lines runner event log to a tracker; print states after each event.
    Replay {
        workflow: PathBuf,
        events: PathBuf,
    },
    /// Build a sample workflow and run it against the scripted runner.
    Demo {
        /// Where versions and executions are stored; a temp dir when omitted.
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
}

#[derive(Serialize)]
struct ReplayLine<'a> {
    line: usize,
    outcome: String,
    status: blockflow_core::WorkflowStatus,
    blocks: Vec<(&'a str, blockflow_core::BlockStatus)>,
}

fn load_workflow(path: &Path) -> CliResult<Workflow> {
    let raw = fs::read_to_string(path)?;
    let mut workflow: Workflow = serde_json::from_str(&raw)?;
    workflow.repair();
    Ok(workflow)
}

fn check(workflow: &Path, tools: Vec<String>) -> CliResult<bool> {
    let workflow = load_workflow(workflow)?;
    let warnings = validate_references(&workflow);
    for w in &warnings {
        println!("{}: {} ({})", w.block_name, w.reference, w.reason);
    }
    let registry: HashSet<String> = tools.into_iter().collect();
    let missing = unsatisfied_tools(&workflow, &registry);
    for m in &missing {
        println!("{}: tool '{}' is not available", m.block_name, m.tool);
    }
    if warnings.is_empty() && missing.is_empty() {
        println!("ok: {} blocks, {} connections", workflow.blocks().len(), workflow.connections().len());
    }
    Ok(warnings.is_empty() && missing.is_empty())
}

fn preview(workflow: &Path, outputs: &Path, text: &str) -> CliResult<()> {
    let workflow = load_workflow(workflow)?;
    let raw: serde_json::Map<String, serde_json::Value> =
        serde_json::from_str(&fs::read_to_string(outputs)?)?;
    let mut cache = OutputCache::new();
    for (key, value) in raw {
        let id = match workflow.block_by_normalized_id(&key) {
            Some(block) => block.id,
            None => match key.parse::<BlockId>() {
                Ok(id) => id,
                Err(_) => {
                    tracing::warn!(key = %key, "output key matches no block");
                    continue;
                }
            },
        };
        cache.insert(id, value);
    }
    let config = SessionConfig::from_env();
    let resolver =
        TemplateResolver::new(&workflow, &cache).with_preview_max_chars(config.preview_max_chars);
    for resolved in resolver.resolve(text) {
        println!("{} => {}", resolved.token.raw, serde_json::to_string(&resolved.resolution)?);
    }
    println!("{}", resolver.render_preview(text));
    Ok(())
}

fn replay(workflow: &Path, events: &Path) -> CliResult<()> {
    let workflow = load_workflow(workflow)?;
    let mut tracker = ExecutionTracker::new();
    tracker.start(ExecutionId::new("replay"), &workflow);
    let names: Vec<(BlockId, &str)> = workflow
        .blocks()
        .iter()
        .map(|b| (b.id, b.normalized_id.as_str()))
        .collect();

    for (idx, line) in fs::read_to_string(events)?.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let event: RunnerEvent = serde_json::from_str(line)?;
        let outcome = tracker.apply(event);
        let summary = ReplayLine {
            line: idx + 1,
            outcome: format!("{outcome:?}"),
            status: tracker.aggregate_status(),
            blocks: names
                .iter()
                .map(|(id, name)| {
                    let status = tracker.block_state(*id).map(|s| s.status).unwrap_or_default();
                    (*name, status)
                })
                .collect(),
        };
        println!("{}", serde_json::to_string(&summary)?);
    }
    Ok(())
}

fn main() -> CliResult<()> {
    let _ = dotenvy::dotenv();
    init_observability();
    let cli = Cli::parse();
    match cli.command {
        Command::Check { workflow, tools } => {
            if !check(&workflow, tools)? {
                std::process::exit(1);
            }
        }
        Command::Preview {
            workflow,
            outputs,
            text,
        } => preview(&workflow, &outputs, &text)?,
        Command::Replay { workflow, events } => replay(&workflow, &events)?,
        Command::Demo { data_dir } => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            runtime.block_on(demo::run(data_dir))?;
        }
    }
    Ok(())
}
