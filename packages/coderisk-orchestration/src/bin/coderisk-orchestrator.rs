//! Orchestrator CLI (§6 "A single command takes (owner, name, optional
//! window, optional stage list)"). Exit codes: 0 success, non-zero = the
//! 1-indexed stage number that failed.

use clap::{Parser, Subcommand};
use coderisk_clients::{HttpLlmClient, HttpSourceHostClient};
use coderisk_core::config::PipelineConfig;
use coderisk_core::model::StageId;
use coderisk_orchestration::{
    default_orchestrator, CheckpointManager, Job, JobState, Reconcile, ReconcileMode, StageContext,
};
use coderisk_storage::{Neo4jGraphStore, PostgresStagingStore};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "coderisk-orchestrator", about = "Runs the CodeRisk ingestion pipeline for one repository")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run S1..S7 (or a subset) for a repository.
    Run {
        owner: String,
        name: String,
        #[arg(long)]
        window_days: Option<u32>,
        /// Comma-separated stage names, e.g. "S1Stage,S2Ingest". Defaults to all seven.
        #[arg(long)]
        stages: Option<String>,
        #[arg(long)]
        incremental: bool,
    },
    /// §4.9 Reconcile.
    Reconcile {
        owner: String,
        name: String,
        #[arg(long)]
        mode: ReconcileModeArg,
    },
}

#[derive(Clone, clap::ValueEnum)]
enum ReconcileModeArg {
    ValidateOnly,
    Incremental,
    Full,
}

impl From<ReconcileModeArg> for ReconcileMode {
    fn from(arg: ReconcileModeArg) -> Self {
        match arg {
            ReconcileModeArg::ValidateOnly => ReconcileMode::ValidateOnly,
            ReconcileModeArg::Incremental => ReconcileMode::Incremental,
            ReconcileModeArg::Full => ReconcileMode::Full,
        }
    }
}

fn parse_stage(name: &str) -> Option<StageId> {
    StageId::ALL_IN_ORDER.into_iter().find(|s| s.as_str().eq_ignore_ascii_case(name) || format!("{s:?}").eq_ignore_ascii_case(name))
}

async fn build_context(config: Arc<PipelineConfig>, owner: &str, name: &str) -> anyhow::Result<StageContext> {
    let staging = Arc::new(PostgresStagingStore::connect(&config.store.staging_dsn).await?);
    let graph = Arc::new(Neo4jGraphStore::connect(
        &config.store.graph_uri,
        config.store.graph_user.as_deref().unwrap_or(""),
        config.store.graph_password.as_deref().unwrap_or(""),
    ).await?);

    let repo = staging.find_repository_by_full_name(owner, name).await?;
    let repo_id = match repo {
        Some(r) => r.id,
        None => staging
            .upsert_repository(&coderisk_core::model::Repository {
                id: 0,
                owner: owner.to_string(),
                name: name.to_string(),
                ingestion_status: coderisk_core::model::IngestionStatus::Pending,
                parent_shas_hash: None,
            })
            .await?,
    };

    Ok(StageContext {
        job_id: uuid::Uuid::new_v4(),
        repo_id,
        owner: owner.to_string(),
        name: name.to_string(),
        incremental_since: None,
        cache_keys: coderisk_orchestration::CacheKeyManager::new(repo_id),
        checkpoint_mgr: Arc::new(CheckpointManager::new_in_memory()),
        config: config.clone(),
        staging,
        graph,
        source_host: Arc::new(HttpSourceHostClient::new(config.source_host.base_url.clone(), config.source_host.token.clone())),
        llm: Arc::new(HttpLlmClient::new(config.llm.endpoint.clone(), config.llm.api_key.clone(), config.llm.primary_model.clone())),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();
    let env_vars: std::collections::HashMap<String, String> = std::env::vars().collect();
    let config = Arc::new(PipelineConfig::from_env_map(&env_vars)?);

    match cli.command {
        Command::Run { owner, name, window_days, stages, incremental } => {
            let mut ctx = build_context(config.clone(), &owner, &name).await?;
            if let Some(days) = window_days {
                ctx.incremental_since = if incremental {
                    Some(chrono::Utc::now() - chrono::Duration::days(days as i64))
                } else {
                    None
                };
            }

            let stage_subset: Option<Vec<StageId>> = stages.map(|s| {
                s.split(',').filter_map(|part| parse_stage(part.trim())).collect()
            });

            let orchestrator = default_orchestrator(ctx.checkpoint_mgr.clone());
            let job = Job::new_queued(ctx.repo_id, 0);
            let (final_job, result) = orchestrator.execute_job(job, ctx, stage_subset.as_deref()).await;

            for stage in &result.stages_run {
                println!("{:<20} ok", stage.as_str());
            }

            match final_job.state {
                JobState::Completed { duration_ms, .. } => {
                    println!("completed in {duration_ms}ms ({} units processed, {} dead-lettered)", result.metrics.units_processed, result.metrics.units_dead_lettered);
                    std::process::exit(0);
                }
                JobState::Failed { failed_stage, error, .. } => {
                    eprintln!("stage {} failed: {error}", failed_stage.as_str());
                    eprintln!("resume with: coderisk-orchestrator run {owner} {name}");
                    std::process::exit(failed_stage.ordinal() as i32);
                }
                _ => std::process::exit(1),
            }
        }
        Command::Reconcile { owner, name, mode } => {
            let mut ctx = build_context(config.clone(), &owner, &name).await?;
            let orchestrator = default_orchestrator(ctx.checkpoint_mgr.clone());
            let reconcile = Reconcile::new(orchestrator);
            let report = reconcile.run(mode.into(), &mut ctx).await?;

            for v in &report.variances {
                println!("{:<20} ratio={:.3} staging={} graph={}", v.entity_kind, v.variance.ratio(), v.variance.staging_count, v.variance.graph_count);
            }
            println!("abandoned dead letters: {}", report.abandoned_dead_letters);

            std::process::exit(report.exit_code());
        }
    }
}
