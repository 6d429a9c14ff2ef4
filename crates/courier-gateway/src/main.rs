use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{info, warn};

use courier_core::config::CourierConfig;
use courier_core::types::{RunStatus, Trigger};
use courier_ledger::Ledger;
use courier_mail::{DeliveryClient, GraphTransport};
use courier_scheduler::{DailySchedule, PipelineSettings, RunCoordinator, Scheduler};

mod app;
mod http;

/// Library crates whose log level follows `logging.level`.
const LOG_TARGETS: &[&str] = &[
    "courier_gateway",
    "courier_scheduler",
    "courier_mail",
    "courier_extract",
    "courier_ledger",
    "courier_core",
];

#[derive(Parser)]
#[command(name = "courier-gateway", version, about = "Daily e-invoice delivery")]
struct Cli {
    /// Config file (falls back to COURIER_CONFIG, then ~/.courier/courier.toml).
    #[arg(long, value_name = "PATH")]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Clone, Copy)]
enum Command {
    /// Arm the daily schedule and serve the HTTP API (default).
    Serve,
    /// Execute one manual run, print its record as JSON and exit.
    RunOnce,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // load config: --config > COURIER_CONFIG env > ~/.courier/courier.toml
    let config_path = cli.config.or_else(|| std::env::var("COURIER_CONFIG").ok());
    let loaded = CourierConfig::load(config_path.as_deref());
    let level = loaded
        .as_ref()
        .map(|c| c.logging.level.clone())
        .unwrap_or_else(|_| "info".to_string());

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter(&level).into()),
        )
        .init();

    let config = loaded.unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        CourierConfig::default()
    });

    let coordinator = build_coordinator(&config)?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config, coordinator).await,
        Command::RunOnce => run_once(coordinator).await,
    }
}

fn default_filter(level: &str) -> String {
    let mut directives: Vec<String> = LOG_TARGETS
        .iter()
        .map(|target| format!("{target}={level}"))
        .collect();
    directives.push("tower_http=info".to_string());
    directives.join(",")
}

/// Open the ledger and wire extraction, delivery and relocation together.
fn build_coordinator(config: &CourierConfig) -> anyhow::Result<Arc<RunCoordinator>> {
    let db_path = &config.database.path;
    ensure_parent_dir(db_path);
    info!(path = %db_path, "opening ledger");
    let ledger = Arc::new(Ledger::open(db_path)?);

    let transport = Arc::new(GraphTransport::from_config(&config.mail));
    let delivery = Arc::new(DeliveryClient::new(
        transport,
        Duration::from_secs(config.mail.timeout_secs.max(1)),
    ));
    info!(
        transport = delivery.transport_name(),
        configured = config.mail.is_configured(),
        sender = %config.mail.sender_address,
        "mail transport ready"
    );

    let settings = PipelineSettings::from_config(config)?;
    info!(
        source = %settings.source.display(),
        target = %settings.target.display(),
        prefix = %settings.prefix,
        time_zone = %settings.time_zone,
        "pipeline configured"
    );
    Ok(Arc::new(RunCoordinator::new(settings, ledger, delivery)))
}

async fn serve(config: CourierConfig, coordinator: Arc<RunCoordinator>) -> anyhow::Result<()> {
    let schedule = DailySchedule::from_config(&config.schedule)?;
    let scheduler = Scheduler::arm(coordinator.clone(), schedule, coordinator.clock().clone());

    let addr: SocketAddr = format!("{}:{}", config.gateway.bind, config.gateway.port).parse()?;
    let state = Arc::new(app::AppState::new(config, coordinator).with_scheduler(scheduler));
    let router = app::build_router(state.clone());

    info!("Courier gateway listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.shutdown().await;
    Ok(())
}

async fn run_once(coordinator: Arc<RunCoordinator>) -> anyhow::Result<()> {
    let record = coordinator.run(Trigger::Manual).await?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    if record.status == RunStatus::Aborted {
        anyhow::bail!(
            "run aborted: {}",
            record.detail.as_deref().unwrap_or("unknown reason")
        );
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("could not listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

/// Ensure the parent directory for a file path exists.
fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
