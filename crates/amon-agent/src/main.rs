use std::time::Duration;

use clap::Parser;
use tokio::sync::{mpsc, watch};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use amon_agent::config::AgentConfig;
use amon_agent::probes::RunnerContext;
use amon_agent::reconcile::ProbeManager;
use amon_agent::relay_client::RelayClient;
use amon_agent::update::{run_event_pump, run_update_loop};

const EVENT_QUEUE_CAPACITY: usize = 64;

#[derive(Parser, Debug)]
#[command(author, version, about = "Amon agent")]
struct Args {
    /// Path to the TOML configuration file; defaults apply without one
    #[arg(short, long)]
    config: Option<String>,
}

fn init_logging() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    init_logging();
    let args = Args::parse();
    let config = match args.config.as_deref() {
        Some(path) => match AgentConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                error!(error = %e, "Failed to load agent configuration.");
                return Err(e.to_string().into());
            }
        },
        None => AgentConfig::default(),
    };

    let client = RelayClient::new(&config.socket_path);
    let mut context = RunnerContext::default();
    if let Some(cmd) = &config.zone_list_cmd {
        context.zone_list_cmd = cmd.clone();
    }

    let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
    let mut manager = ProbeManager::new(context, events_tx);

    let pump_client = RelayClient::new(&config.socket_path);
    let pump = tokio::spawn(async move {
        run_event_pump(&pump_client, events_rx).await;
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutdown signal received.");
        let _ = shutdown_tx.send(true);
    });

    run_update_loop(
        &client,
        &mut manager,
        Duration::from_secs(config.poll_interval),
        shutdown_rx,
    )
    .await;

    drop(manager);
    let _ = pump.await;
    info!("Amon agent stopped.");
    Ok(())
}
