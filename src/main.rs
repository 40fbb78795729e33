mod agents;
mod cli;
mod config;
mod demo;
mod error;
mod job;
mod logging;
mod orchestrator;
mod retry;
mod store;
mod ui;
mod workflow;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use serde_json::{Map, Value};
use tracing::info;

use agents::{LoggingBackend, Stage};
use cli::{Cli, Command};
use config::AgentikConfig;
use error::AgentikError;
use orchestrator::{Orchestrator, OrchestratorSettings};
use store::RedisQueueStore;
use ui::JobProgress;
use workflow::WorkflowRegistry;

type Service = Orchestrator<RedisQueueStore, Stage<LoggingBackend>>;

const FOLLOW_INTERVAL: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.json_logs);

    let config = AgentikConfig::load(cli.config.as_deref())?
        .with_overrides(cli.redis_url.clone(), cli.max_retries);
    let settings = OrchestratorSettings::from(&config);

    match cli.command {
        Command::Demo => {
            let record = demo::run(settings).await?;
            ui::print_status(&record);
        }
        Command::Workflows => ui::print_workflows(&WorkflowRegistry::standard()),
        command => {
            let service = connect(&config, settings).await?;
            dispatch(&service, command).await?;
        }
    }
    Ok(())
}

async fn connect(config: &AgentikConfig, settings: OrchestratorSettings) -> Result<Service> {
    let store = RedisQueueStore::connect(&config.redis_url)
        .await
        .context("connecting to the queue store")?;
    Ok(Orchestrator::new(store, WorkflowRegistry::standard(), settings))
}

async fn dispatch(service: &Service, command: Command) -> Result<()> {
    match command {
        Command::Run => run(service).await?,
        Command::Submit {
            job_type,
            payload,
            user,
            follow,
        } => {
            let payload: Map<String, Value> =
                serde_json::from_str(&payload).context("--payload must be a JSON object")?;
            let job_id = service.submit(&job_type, payload, &user).await?;
            println!("{job_id}");
            if follow {
                follow_job(service, &job_id, &job_type).await?;
            }
        }
        Command::Status { job_id } => match service.get_status(&job_id).await? {
            Some(record) => ui::print_status(&record),
            None => return Err(AgentikError::JobNotFound(job_id).into()),
        },
        Command::Cancel { job_id } => {
            if !service.cancel(&job_id).await? {
                return Err(AgentikError::JobNotFound(job_id).into());
            }
            println!("cancelled {job_id}");
        }
        Command::Jobs {
            user_id,
            limit,
            job_type,
        } => {
            let records = service
                .list_recent_jobs_for_user(&user_id, job_type.as_deref(), limit)
                .await?;
            ui::print_job_list(&records);
        }
        Command::Audit { agent, limit } => {
            ui::print_audit(&agent, &service.agent_audit(&agent, limit).await?);
        }
        Command::Queues => ui::print_queues(&service.queue_depth_snapshot().await?),
        Command::Heartbeat => ui::print_heartbeat(service.latest_heartbeat().await?.as_ref()),
        Command::System => {
            let status = service.system_status().await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Command::ClearQueues => {
            let cleared = service.clear_queues().await?;
            println!("cleared {cleared} queues");
        }
        Command::Demo | Command::Workflows => bail!("command does not need the queue store"),
    }
    Ok(())
}

/// Runs every stage until Ctrl-C, then shuts down gracefully.
async fn run(service: &Service) -> Result<()> {
    let backend = Arc::new(LoggingBackend::new());
    for stage in Stage::all(backend) {
        service.register(stage)?;
    }
    service.start().await?;
    info!("press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    info!("shutdown requested");
    service.shutdown().await?;
    Ok(())
}

async fn follow_job(service: &Service, job_id: &str, job_type: &str) -> Result<()> {
    let mut progress = JobProgress::start(job_id, job_type);
    loop {
        let Some(record) = service.get_status(job_id).await? else {
            bail!("status record for {job_id} disappeared");
        };
        if record.status.is_terminal() {
            progress.complete(&record);
            return Ok(());
        }
        progress.update(&record);
        tokio::time::sleep(FOLLOW_INTERVAL).await;
    }
}
