use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use amon_common::ProbeTypeRegistry;
use amon_master::cache::MasterCaches;
use amon_master::config::MasterConfig;
use amon_master::directory::{Directory, LdapDirectory};
use amon_master::mapi::HttpMachineApi;
use amon_master::notify::NotifierRegistry;
use amon_master::web::{create_router, AppState};

#[derive(Parser, Debug)]
#[command(author, version, about = "Amon master API server")]
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
    let config = match MasterConfig::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Failed to load master configuration.");
            return Err(e.to_string().into());
        }
    };

    let directory = Arc::new(
        LdapDirectory::connect(
            &config.ufds.url,
            &config.ufds.root_dn,
            &config.ufds.password,
        )
        .await?,
    );
    let mapi = Arc::new(HttpMachineApi::new(
        &config.mapi.url,
        &config.mapi.username,
        &config.mapi.password,
    ));
    let notifiers = NotifierRegistry::from_config(&config.notification_plugins)?;
    let caches = MasterCaches::new(&config.account_cache, &config.probe_cache);

    let state = Arc::new(AppState {
        directory: directory.clone(),
        mapi,
        caches,
        probe_types: ProbeTypeRegistry::builtin(),
        notifiers,
    });
    let app = create_router(state);

    let addr: SocketAddr = ([0, 0, 0, 0], config.port).into();
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(address = %addr, "Amon master listening.");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received; draining in-flight requests.");
        })
        .await?;

    if let Err(e) = directory.unbind().await {
        error!(error = %e, "Directory unbind failed during shutdown.");
    }
    info!("Amon master stopped.");
    Ok(())
}
