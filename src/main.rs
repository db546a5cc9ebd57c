use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tokio::task::block_in_place;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use streamline::activity::EngineEvent;
use streamline::cli::{Cli, Command, FilterArgs, PulseAction, SpeedArg};
use streamline::config::StreamlineConfig;
use streamline::engine::AutoApplyEngine;
use streamline::jobs::{self, JobCandidate, JobIdentity};
use streamline::ledger::Ledger;
use streamline::pacing::SpeedTier;
use streamline::pulse::{PauseReason, PulseMonitor};
use streamline::state_machine::{ApprovalPolicy, ApprovalRequest};
use streamline::ui;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = StreamlineConfig::load(cli.config.as_deref())?;

    let level = if cli.verbose { "debug" } else { config.log_level.as_str() };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={level}", env!("CARGO_PKG_NAME")))
        }))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match cli.command {
        Command::Run {
            speed,
            resume,
            manual,
            filter,
        } => run_auto_apply(&config, speed, resume, manual, &filter).await,
        Command::Apply {
            company,
            title,
            jobs,
        } => apply_single(&config, JobIdentity::new(company, title), jobs).await,
        Command::Pulse { action } => update_pulse(&config, action),
        Command::Ledger { json } => {
            let ledger = open_ledger(&config)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&ledger.records())?);
            } else {
                ui::print_ledger(&ledger.rows(), &ledger.summary());
            }
            Ok(())
        }
    }
}

fn load_jobs(path: Option<&PathBuf>) -> Result<Vec<JobCandidate>> {
    match path {
        Some(path) => jobs::load_catalog(path)
            .with_context(|| format!("loading jobs from {}", path.display())),
        None => Ok(jobs::sample_catalog()),
    }
}

fn open_ledger(config: &StreamlineConfig) -> Result<Ledger> {
    Ledger::load(&config.ledger_path)
        .with_context(|| format!("loading ledger from {}", config.ledger_path.display()))
}

fn open_pulse(config: &StreamlineConfig) -> Result<PulseMonitor> {
    PulseMonitor::open(&config.pulse_path, config.batch_size)
        .with_context(|| format!("loading pulse from {}", config.pulse_path.display()))
}

fn update_pulse(config: &StreamlineConfig, action: Option<PulseAction>) -> Result<()> {
    let pulse = open_pulse(config)?;
    match action {
        Some(PulseAction::Health { value }) => pulse.set_health(value)?,
        Some(PulseAction::Approve) => pulse.approve_batch(config.cooldown_secs)?,
        Some(PulseAction::Halt) => pulse.halt()?,
        Some(PulseAction::Reset) => pulse.reset()?,
        None => {}
    }
    if action.is_some() {
        pulse.save(&config.pulse_path)?;
    }
    ui::print_pulse(&pulse.snapshot());
    Ok(())
}

async fn next_approval(rx: &mut Option<mpsc::Receiver<ApprovalRequest>>) -> Option<ApprovalRequest> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn run_auto_apply(
    config: &StreamlineConfig,
    speed: Option<SpeedArg>,
    resume: Option<PathBuf>,
    manual: bool,
    filter: &FilterArgs,
) -> Result<()> {
    let candidates = filter.to_filter().apply(&load_jobs(filter.jobs.as_ref())?);
    let ledger = open_ledger(config)?;
    let pulse = open_pulse(config)?;

    let mut settings = config.engine_settings();
    if manual {
        settings.approval = ApprovalPolicy::Manual;
    }
    let engine = AutoApplyEngine::new(settings, pulse.clone(), Arc::new(config.tailor()));
    match resume {
        Some(path) if path.exists() => engine.mark_profile_ready(),
        Some(path) => warn!("resume {} not found", path.display()),
        None => {}
    }

    let tier = speed.map(SpeedTier::from).unwrap_or(config.default_speed);
    let mut handle = engine.start(candidates, &ledger, tier)?;
    info!(run_id = %handle.run_id, eligible = handle.eligible, %tier, "auto-apply started");

    let ticker_stop = CancellationToken::new();
    let ticker = pulse.spawn_ticker(Duration::from_secs(1), ticker_stop.clone());
    let cancel = handle.cancel_token();
    let mut approvals = handle.approvals.take();
    let mut progress = ui::RunProgress::start(handle.eligible, config.log_window);

    loop {
        tokio::select! {
            event = handle.events.recv() => {
                let Some(event) = event else { break };
                progress.handle(&event);
                if event == EngineEvent::Paused(PauseReason::AwaitingApproval) {
                    if block_in_place(|| progress.suspend(ui::prompt_next_batch))? {
                        pulse.approve_batch(config.cooldown_secs)?;
                    } else {
                        cancel.cancel();
                    }
                }
            }
            Some(request) = next_approval(&mut approvals) => {
                if block_in_place(|| progress.suspend(|| ui::prompt_approval(&request)))? {
                    request.approve();
                } else {
                    request.skip();
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, stopping at the next safe point");
                cancel.cancel();
            }
        }
    }

    let outcome = handle.wait().await?;
    ticker_stop.cancel();
    ticker.await?;
    ledger.save(&config.ledger_path)?;
    pulse.save(&config.pulse_path)?;
    progress.complete(&outcome);
    println!("Ledger now holds {} applications.", ledger.len());
    Ok(())
}

async fn apply_single(
    config: &StreamlineConfig,
    identity: JobIdentity,
    jobs: Option<PathBuf>,
) -> Result<()> {
    let job = load_jobs(jobs.as_ref())?
        .into_iter()
        .find(|j| j.identity == identity)
        .with_context(|| format!("no listing for {identity}"))?;

    let ledger = open_ledger(config)?;
    let engine = AutoApplyEngine::new(config.engine_settings(), open_pulse(config)?, Arc::new(config.tailor()));
    let (tx, mut rx) = mpsc::channel(1);
    let cancel = CancellationToken::new();

    let apply = engine.apply_single(job, &ledger, tx, &cancel);
    tokio::pin!(apply);
    println!("Tailoring application for {identity}…");

    loop {
        tokio::select! {
            result = &mut apply => {
                match result? {
                    Some(record) => {
                        ledger.save(&config.ledger_path)?;
                        println!("Submitted {} ({})", record.identity, record.id);
                    }
                    None => println!("Skipped {identity}"),
                }
                return Ok(());
            }
            Some(request) = rx.recv() => {
                if block_in_place(|| ui::prompt_approval(&request))? {
                    request.approve();
                } else {
                    request.skip();
                }
            }
            _ = tokio::signal::ctrl_c() => cancel.cancel(),
        }
    }
}
