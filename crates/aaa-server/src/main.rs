use aaa_server::config::Config;
use aaa_server::events::EventBus;
use aaa_server::reaper::Reaper;
use aaa_server::registry::{StaticAccountRegistry, StaticNasRegistry};
use aaa_server::server::AaaServer;
use aaa_server::store::SessionStore;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "aaa-server", about = "RADIUS AAA server for VPN access control")]
struct Args {
    /// Path to the JSON configuration file
    #[arg(short, long, default_value = "aaa-server.json")]
    config: PathBuf,

    /// Check the configuration and exit
    #[arg(long)]
    validate: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if !args.config.exists() {
        Config::example().to_file(&args.config)?;
        println!(
            "wrote example configuration to {}; edit it and restart",
            args.config.display()
        );
        return Ok(());
    }

    let config = Config::from_file(&args.config)?;
    if args.validate {
        println!("configuration OK");
        return Ok(());
    }

    let filter = match &config.log_level {
        Some(level) => EnvFilter::try_new(level)
            .unwrap_or_else(|_| EnvFilter::new("info")),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let nas = Arc::new(StaticNasRegistry::from_config(&config)?);
    let accounts = Arc::new(StaticAccountRegistry::from_config(&config));
    info!(
        nas_clients = nas.len(),
        accounts = accounts.len(),
        "registries loaded"
    );

    let store = Arc::new(SessionStore::new(Duration::from_secs(config.reservation_ttl)));
    let events = EventBus::default();

    let server = AaaServer::bind(
        &config,
        nas,
        accounts,
        store.clone(),
        events,
    )
    .await?;

    let reaper = Reaper::new(
        store,
        server.cache(),
        Duration::from_secs(config.reaper_interval),
        config.stale_after(),
        config.inactive_session_retention,
    );
    let reaper_handle = reaper.spawn();

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
        }
    }
    reaper_handle.abort();

    Ok(())
}
