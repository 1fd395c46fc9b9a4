use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use amon_relay::config::RelayConfig;
use amon_relay::forward::EventForwarder;
use amon_relay::manifest::ManifestStore;
use amon_relay::poll::run_poll_loop;
use amon_relay::server::{serve_target, TargetState};

#[derive(Parser, Debug)]
#[command(author, version, about = "Amon relay")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long)]
    config: String,
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
    let config = match RelayConfig::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Failed to load relay configuration.");
            return Err(e.to_string().into());
        }
    };

    let store = Arc::new(ManifestStore::new(&config.data_dir)?);
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()?;
    let (forwarder, forward_task) =
        EventForwarder::start(client.clone(), config.master_url.clone());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut tasks = Vec::new();
    for target in config.targets() {
        tasks.push(tokio::spawn(run_poll_loop(
            client.clone(),
            config.master_url.clone(),
            store.clone(),
            target.clone(),
            Duration::from_secs(config.poll_interval),
            shutdown_rx.clone(),
        )));

        let state = Arc::new(TargetState {
            target: target.clone(),
            store: store.clone(),
            forwarder: forwarder.clone(),
        });
        let shutdown = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = serve_target(state, shutdown).await {
                error!(target = %target, error = %e, "Agent endpoint failed.");
            }
        }));
    }
    info!(
        targets = config.targets().len(),
        data_dir = %config.data_dir.display(),
        "Amon relay running."
    );

    let _ = tokio::signal::ctrl_c().await;
    info!("Shutdown signal received; stopping poll loops and agent endpoints.");
    let _ = shutdown_tx.send(true);
    for task in tasks {
        let _ = task.await;
    }
    forward_task.abort();
    if forwarder.dropped() > 0 {
        error!(dropped = forwarder.dropped(), "Events dropped during this run.");
    }
    info!("Amon relay stopped.");
    Ok(())
}
