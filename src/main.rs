//! `prompty` — CLI front-end for the prompt-pipeline engine.
//!
//! Parses arguments, loads a job from a workspace directory, drives the
//! tree executor to completion (or a failure / stop), prints the block
//! tree and a closing summary, and maps the outcome to an exit code.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use prompty_core::BlockPath;
use prompty_events::{EventBus, PipelineEvent};
use prompty_executor::{ArtifactStore, Executor};
use prompty_hooks::BuiltinRegistry;
use prompty_jobs::expand_job;

#[derive(Parser)]
#[command(name = "prompty", version = env!("CARGO_PKG_VERSION"), about = "Prompt pipeline engine — job expansion, tree execution, artifact collection")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Workspace root containing `jobs/` and `ext/`
    #[arg(short, long, global = true, default_value = ".")]
    workspace: PathBuf,

    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Expand and execute one job to completion
    Run {
        /// Job id (directory name under `jobs/`)
        job_id: String,

        /// Restrict the run to a single prompt id
        #[arg(long)]
        prompt_id: Option<String>,

        /// Seed for deferred-random (`consumption_mode = 1`) wildcard picks
        #[arg(long, default_value_t = 1)]
        composition_id: u64,

        /// Print the block tree and composition counts without executing any hooks
        #[arg(long)]
        dry_run: bool,
    },
    /// Print the flat block-path / composition tree for a job without running it
    Tree {
        job_id: String,
        #[arg(long, default_value_t = 1)]
        composition_id: u64,
    },
    /// Validate a job document's wildcards, extensions, and hook references
    Validate { job_id: String },
    /// Start the HTTP/SSE gateway
    Serve {
        #[arg(long, default_value = "127.0.0.1")]
        bind: String,
        #[arg(long, default_value_t = 8765)]
        port: u16,
    },
}

fn init_logging(verbose: u8) {
    let default_directive = match verbose {
        0 => "prompty=info,prompty_executor=info,prompty_hooks=info",
        1 => "prompty=debug,prompty_executor=debug,prompty_hooks=debug",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_directive.into()),
        )
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let exit_code = match cli.command {
        Command::Run { job_id, prompt_id, composition_id, dry_run } => {
            run_job(&cli.workspace, &job_id, prompt_id.as_deref(), composition_id, dry_run).await?
        }
        Command::Tree { job_id, composition_id } => print_tree(&cli.workspace, &job_id, composition_id)?,
        Command::Validate { job_id } => validate_job(&cli.workspace, &job_id)?,
        Command::Serve { bind, port } => {
            prompty_gateway::start_gateway(prompty_gateway::GatewayConfig {
                bind,
                port,
                workspace_root: cli.workspace.clone(),
            })
            .await?;
            0
        }
    };

    std::process::exit(exit_code);
}

fn job_expander_config() -> prompty_jobs::ExpanderConfig<'static> {
    prompty_jobs::ExpanderConfig {
        lora_root: "/loras",
        range_increment: 0.1,
        default_params: serde_json::Map::new(),
    }
}

fn load_records(
    workspace: &std::path::Path,
    job_id: &str,
    composition_id: u64,
) -> anyhow::Result<Vec<prompty_jobs::JobRecord>> {
    let (doc, _raw) = prompty_config::load_job(workspace, job_id)?;
    let extensions = prompty_config::load_extension_table(workspace, job_id)?;
    let cfg = job_expander_config();
    Ok(expand_job(&doc, &extensions, &cfg, composition_id)?)
}

fn print_tree(workspace: &std::path::Path, job_id: &str, composition_id: u64) -> anyhow::Result<i32> {
    let records = match load_records(workspace, job_id, composition_id) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Error expanding job '{job_id}': {e}");
            return Ok(1);
        }
    };

    let mut by_block: std::collections::BTreeMap<BlockPath, Vec<&prompty_jobs::JobRecord>> =
        std::collections::BTreeMap::new();
    for record in &records {
        by_block.entry(record.block_path.clone()).or_default().push(record);
    }

    println!("=== Block tree for job '{job_id}' ({} compositions total) ===\n", records.len());
    for (path, jobs) in &by_block {
        let indent = "  ".repeat(path.depth());
        let leaf = if jobs.first().map(|j| j.is_leaf).unwrap_or(false) { "[leaf]" } else { "[node]" };
        println!("{indent}{path} {leaf} — {} composition(s), prompt \"{}\"", jobs.len(), jobs[0].prompt.id);
        if !jobs[0].depends_on.is_empty() {
            println!("{indent}    depends_on: {:?}", jobs[0].depends_on);
        }
    }
    println!("\nTotal blocks: {}", by_block.len());
    Ok(0)
}

fn validate_job(workspace: &std::path::Path, job_id: &str) -> anyhow::Result<i32> {
    let (doc, _raw) = match prompty_config::load_job(workspace, job_id) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("Error loading job '{job_id}': {e}");
            return Ok(1);
        }
    };
    let report = prompty_config::validate_job(&doc, &prompty_config::ext_dir(workspace));
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(if report.valid { 0 } else { 1 })
}

async fn run_job(
    workspace: &std::path::Path,
    job_id: &str,
    prompt_id: Option<&str>,
    composition_id: u64,
    dry_run: bool,
) -> anyhow::Result<i32> {
    let mut records = match load_records(workspace, job_id, composition_id) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Fatal: job expansion failed for '{job_id}': {e}");
            return Ok(1);
        }
    };

    if let Some(prompt_id) = prompt_id {
        records.retain(|r| r.prompt.id == prompt_id);
    }

    if records.is_empty() {
        eprintln!("No job records produced (prompt filter: {prompt_id:?})");
        return Ok(1);
    }

    if dry_run {
        return print_tree(workspace, job_id, composition_id);
    }

    let job_dir = prompty_config::job_dir(workspace, job_id);
    let artifacts_dir = prompty_config::artifacts_dir(workspace, job_id);
    let timestamp = unix_now();
    if let Err(e) = prompty_executor::touch_lock(&artifacts_dir, timestamp) {
        tracing::warn!(error = %e, "failed to write advisory lock file");
    }

    let bus = EventBus::default();
    let mut rx = bus.subscribe();

    let store = ArtifactStore::new(artifacts_dir.clone());
    let mut executor = Executor::new(
        records,
        job_dir,
        workspace.to_path_buf(),
        BuiltinRegistry::default(),
        bus,
        store,
    );

    let printer = tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            print_event(&event);
        }
    });

    let stats = executor.execute(job_id, prompt_id).await;
    printer.abort();

    prompty_executor::remove_lock(&artifacts_dir);

    println!("\n=== Run complete: {:?} ===", stats.state);
    println!(
        "compositions: {}/{}  blocks: {}/{} complete, {} blocked, {} failed",
        stats.completed_compositions,
        stats.total_compositions,
        stats.blocks_complete,
        stats.blocks_total,
        stats.blocks_blocked,
        stats.blocks_failed.len(),
    );
    for (path, detail) in &stats.blocks_failed {
        println!("  failed block {path}: {}/{} compositions completed", detail.completed, detail.total);
    }
    println!("artifacts: {} total", stats.artifacts_total);

    Ok(match stats.state {
        prompty_executor::RunState::Complete => 0,
        prompty_executor::RunState::Failed | prompty_executor::RunState::Paused => 1,
    })
}

fn print_event(event: &PipelineEvent) {
    match event {
        PipelineEvent::Init { job_id, total_jobs, .. } => {
            println!("[init] job={job_id} total_compositions={total_jobs}");
        }
        PipelineEvent::BlockStart { block_path } => println!("[block_start] {block_path}"),
        PipelineEvent::Stage { block_path, stage, time_ms, success } => {
            tracing::debug!(%block_path, %stage, time_ms, success, "stage");
        }
        PipelineEvent::Artifact { block_path, composition_idx, artifact } => {
            let name = artifact.get("name").and_then(|v| v.as_str()).unwrap_or("?");
            println!("[artifact] {block_path}:{composition_idx} {name}");
        }
        PipelineEvent::CompositionComplete { block_path, composition_idx, global_completed, global_total, .. } => {
            println!("[composition] {block_path}:{composition_idx} ({global_completed}/{global_total})");
        }
        PipelineEvent::ArtifactConsumed { consuming_block, source_block, artifact_count } => {
            println!("[artifact_consumed] {consuming_block} <- {source_block} ({artifact_count} artifacts)");
        }
        PipelineEvent::BlockComplete { block_path, artifacts_count, .. } => {
            println!("[block_complete] {block_path} ({artifacts_count} artifacts)");
        }
        PipelineEvent::BlockFailed { block_path, error } => {
            eprintln!("[block_failed] {block_path}: {error}");
        }
        PipelineEvent::BlockBlocked { block_path } => {
            eprintln!("[block_blocked] {block_path}");
        }
        PipelineEvent::RunComplete { .. } => {}
        PipelineEvent::Error { message } => eprintln!("[error] {message}"),
    }
}

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_expander_config_uses_standard_lora_root() {
        let cfg = job_expander_config();
        assert_eq!(cfg.lora_root, "/loras");
    }
}
