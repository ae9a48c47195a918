use anyhow::Context;
use clap::Parser;
use lab_store::LabStore;
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tracing::{error, info};

mod api;
mod logging;

const DEFAULT_ADDR: &str = "127.0.0.1:5501";
const DEFAULT_DATA_DIR: &str = ".";
const DEFAULT_LOG_DIR: &str = ".lab/logs";

#[derive(Clone, Debug)]
struct Config {
    addr: String,
    data_dir: PathBuf,
    debug: bool,
    log_dir: String,
}

#[derive(Parser, Debug)]
#[command(name = "lab-hub", about = "Test-lab metadata service")]
struct Args {
    #[arg(long, default_value = "")]
    addr: String,
    #[arg(long, default_value = "")]
    data_dir: String,
    #[arg(long, default_value_t = false)]
    debug: bool,
    #[arg(long, default_value = "")]
    log_dir: String,
}

#[tokio::main]
async fn main() {
    let config = load_config();
    logging::init(&logging::LoggingOptions {
        debug: config.debug,
        log_dir: &config.log_dir,
        addr: &config.addr,
    });
    if let Err(err) = run(config).await {
        error!(event = "hub_error", error = %format!("{err:#}"));
        std::process::exit(1);
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    let addr: SocketAddr = config
        .addr
        .parse()
        .with_context(|| format!("invalid listen address {}", config.addr))?;

    let store = LabStore::open(&config.data_dir)
        .with_context(|| format!("failed to open data dir {}", config.data_dir.display()))?;
    let hub = Arc::new(api::HubState::new(store));
    let app = api::router(hub);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    info!(
        event = "hub_start",
        addr = %config.addr,
        data_dir = %config.data_dir.display()
    );

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("server stopped")?;
    info!(event = "hub_stop");
    Ok(())
}

fn load_config() -> Config {
    let args = Args::parse();
    Config {
        addr: resolve_setting(&args.addr, "LAB_HUB_ADDR", DEFAULT_ADDR),
        data_dir: PathBuf::from(resolve_setting(
            &args.data_dir,
            "LAB_DATA_DIR",
            DEFAULT_DATA_DIR,
        )),
        debug: args.debug || env_true("LAB_HUB_DEBUG"),
        log_dir: resolve_setting(&args.log_dir, "LAB_LOG_DIR", DEFAULT_LOG_DIR),
    }
}

/// Flag wins over environment, environment over the built-in default.
fn resolve_setting(flag: &str, env_key: &str, default: &str) -> String {
    if !flag.trim().is_empty() {
        return flag.to_string();
    }
    if let Ok(value) = std::env::var(env_key) {
        if !value.trim().is_empty() {
            return value;
        }
    }
    default.to_string()
}

fn env_true(key: &str) -> bool {
    match std::env::var(key) {
        Ok(value) => matches!(
            value.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => false,
    }
}
