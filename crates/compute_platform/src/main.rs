//! Unified launcher.
//!
//! Wires the event bus, resource ledger, agent registry, scheduler,
//! marketplace matcher and job journal into one process alongside the
//! `compute_api` HTTP boundary, spawns every background sweep as a
//! cancellable task, and tears them all down on SIGINT/SIGTERM.
//!
//! Grounded on the teacher's `casparian` launcher: a `clap::Parser` CLI,
//! layered `tracing-subscriber` logging to both a rolling file and the
//! console, and graceful shutdown triggered from a `signal-hook` thread on
//! Unix (`ctrlc` on Windows), bridged into an async `Notify` since this
//! launcher, unlike the teacher's, is fully tokio-based.

mod shutdown;

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use compute_bus::InProcessBus;
use compute_protocol::PlatformConfig;

#[derive(Parser, Debug)]
#[command(name = "compute_platform", about = "Unified launcher for the compute marketplace")]
struct Cli {
    /// Enable verbose logging (debug to stderr)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Path to a TOML config file; unset keys fall back to documented defaults
    #[arg(long, global = true)]
    config: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start every component in-process: bus, ledger, registry, scheduler,
    /// matcher, journal, HTTP API, and (unless --no-dev-agent) a reference
    /// provider agent for local exercising.
    Serve {
        /// Skip spawning the bundled reference agent.
        #[arg(long)]
        no_dev_agent: bool,
    },
    /// Print the effective configuration and exit.
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    compute_logging::init_logging(compute_logging::LogConfig {
        app_name: "compute_platform",
        verbose: cli.verbose,
        tui_mode: false,
    })?;

    let platform_config = match &cli.config {
        Some(path) => {
            let contents = std::fs::read_to_string(path)?;
            PlatformConfig::from_toml_str(&contents)?
        }
        None => PlatformConfig::default(),
    };

    match cli.command {
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&platform_config)?);
            Ok(())
        }
        Commands::Serve { no_dev_agent } => {
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(serve(platform_config, !no_dev_agent))
        }
    }
}

async fn serve(config: PlatformConfig, spawn_dev_agent: bool) -> Result<()> {
    info!(listen_port = config.listen_port, "starting compute marketplace platform");

    let bus = InProcessBus::new();
    let clock = compute_protocol::system_clock();
    let ledger = resource_ledger::ResourceLedger::new();
    let registry = agent_registry::AgentRegistry::new(bus.clone(), ledger.clone(), clock.clone());
    let journal = job_journal::JobJournal::new(bus.clone());
    let cost_estimator = Arc::new(scheduler::LinearCostEstimator::default());
    let sched = scheduler::Scheduler::new(
        journal,
        registry.clone(),
        ledger.clone(),
        bus.clone(),
        clock.clone(),
        cost_estimator,
        config.default_job_timeout_secs,
        config.default_max_retries,
        config.assignment_timeout(),
    );
    let matcher = marketplace::MarketplaceMatcher::new(bus.clone(), clock.clone(), config.match_confirm_window_secs);

    let shutdown = shutdown::ShutdownSignal::install()?;
    let cancel = tokio_util::sync::CancellationToken::new();

    let mut tasks = Vec::new();

    tasks.push(tokio::spawn({
        let sched = sched.clone();
        let cancel = cancel.clone();
        async move { sched.run_terminal_listener(cancel).await }
    }));
    tasks.push(tokio::spawn({
        let sweeper = scheduler::ScheduleSweeper::new(sched.clone(), config.schedule_interval());
        let cancel = cancel.clone();
        async move { sweeper.run(cancel).await }
    }));
    tasks.push(tokio::spawn({
        let sweeper = marketplace::MatchingSweeper::new(matcher.clone(), config.match_interval());
        let cancel = cancel.clone();
        async move { sweeper.run(cancel).await }
    }));
    tasks.push(tokio::spawn({
        let registry = registry.clone();
        let cancel = cancel.clone();
        async move { registry.run_heartbeat_listener(cancel).await }
    }));
    tasks.push(tokio::spawn({
        let sweeper = agent_registry::LivenessSweeper::new(
            registry.clone(),
            config.heartbeat_interval(),
            config.liveness_window(),
            config.offline_grace(),
        );
        let cancel = cancel.clone();
        async move { sweeper.run(cancel).await }
    }));
    tasks.push(tokio::spawn({
        let reaper = resource_ledger::LeaseReaper::new(ledger.clone(), config.reap_interval());
        let cancel = cancel.clone();
        async move { reaper.run(cancel).await }
    }));
    tasks.push(tokio::spawn({
        let releaser = resource_ledger::TerminalAllocationReleaser::new(ledger.clone(), bus.clone());
        let cancel = cancel.clone();
        async move { releaser.run(cancel).await }
    }));
    tasks.push(tokio::spawn(run_capacity_reconciler(bus.clone(), ledger.clone(), cancel.clone())));

    if spawn_dev_agent {
        let agent_id = compute_protocol::AgentId::new();
        let agent_config = compute_agent::AgentConfig {
            heartbeat_interval: config.heartbeat_interval(),
            ..Default::default()
        };
        registry.register(compute_protocol::Agent {
            id: agent_id,
            state: compute_protocol::AgentState::Active,
            last_seen: clock.now(),
            capacity: agent_config.capacity.clone(),
            allocated: compute_protocol::ResourceVector::new(),
            capabilities: agent_config.capabilities.clone(),
            region: agent_config.region.clone(),
            price_per_hour: agent_config.price_per_hour.clone(),
            reputation: 0.8,
            active_jobs: Default::default(),
        });
        ledger.register_resource(agent_id, agent_config.capacity.clone(), serde_json::Value::Null);
        let agent = compute_agent::ReferenceAgent::new(agent_id, agent_config, bus.clone(), clock.clone());
        let cancel = cancel.clone();
        tasks.push(tokio::spawn(async move { agent.run(cancel).await }));
        info!(%agent_id, "spawned bundled reference agent for local exercising");
    }

    let api_state = compute_api::AppState {
        scheduler: sched,
        marketplace: matcher,
        ledger: ledger.clone(),
    };
    let router = compute_api::build_router(api_state);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.listen_port)).await?;
    info!(port = config.listen_port, "HTTP API listening");
    let server_cancel = cancel.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { server_cancel.cancelled().await })
            .await
    });

    shutdown.wait().await;
    info!("shutdown signal received, draining background workers");
    cancel.cancel();

    let _ = server.await;
    for task in tasks {
        let _ = task.await;
    }
    info!("shutdown complete");
    Ok(())
}

/// The single seam (§4.C open-question resolution) through which a
/// heartbeat's reported capacity reaches the ledger: re-subscribes
/// independently of `agent_registry::run_heartbeat_listener` so the
/// registry and the ledger each stay the sole writer of their own state.
async fn run_capacity_reconciler(
    bus: Arc<dyn compute_bus::EventBus>,
    ledger: Arc<resource_ledger::ResourceLedger>,
    cancel: tokio_util::sync::CancellationToken,
) {
    let mut heartbeats = bus.subscribe(compute_protocol::subjects::AGENT_HEARTBEAT);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("capacity reconciler shutting down");
                return;
            }
            envelope = heartbeats.recv() => {
                let Some(envelope) = envelope else { return };
                let Ok(heartbeat) = serde_json::from_value::<compute_protocol::Heartbeat>(envelope.payload) else {
                    warn!("malformed agent.heartbeat payload in capacity reconciler");
                    continue;
                };
                let result = ledger.query(&resource_ledger::QueryFilter {
                    agent_id: Some(heartbeat.agent_id),
                    ..Default::default()
                });
                if let Some(resource) = result.resources.into_iter().next() {
                    ledger.reconcile_capacity(resource.id, heartbeat.capacity);
                }
            }
        }
    }
}
