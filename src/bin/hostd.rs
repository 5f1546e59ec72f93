//! hostd - REST facade for systemd units and timedated settings
//!
//! Reads /etc/hostd/hostd.conf (if present), then serves HTTP on the
//! configured address. Every request talks to the system bus (or the
//! session bus with --session) over its own connection.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use log::info;
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};

use hostd::config::{Config, DEFAULT_CONFIG_PATH};
use hostd::dbus::{BusConnector, BusKind};
use hostd::http::{router, AppState};

#[derive(Parser)]
#[command(name = "hostd")]
#[command(about = "REST facade for systemd unit control and timedated properties")]
struct Args {
    /// Configuration file
    #[arg(long, short = 'c', default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Address to listen on (overrides [Network] IPAddress)
    #[arg(long)]
    ip: Option<IpAddr>,

    /// Port to listen on (overrides [Network] Port)
    #[arg(long, short = 'p')]
    port: Option<u16>,

    /// Talk to the session bus instead of the system bus
    #[arg(long)]
    session: bool,

    /// Seconds to wait for a start/stop/restart job (overrides [Job] TimeoutSec)
    #[arg(long)]
    job_timeout: Option<u64>,

    /// Log filter, e.g. "debug" or "hostd=trace" (overrides RUST_LOG)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut logger =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if let Some(level) = &args.log_level {
        logger.parse_filters(level);
    }
    logger.init();

    let mut config = match Config::load(&args.config).await {
        Ok(config) => config,
        Err(e) => {
            log::error!("Failed to load {}: {} (using defaults)", args.config.display(), e);
            Config::default()
        }
    };

    if let Some(ip) = args.ip {
        config.listen.set_ip(ip);
    }
    if let Some(port) = args.port {
        config.listen.set_port(port);
    }
    if args.session {
        config.bus = BusKind::Session;
    }
    if let Some(secs) = args.job_timeout.filter(|s| *s > 0) {
        config.job_timeout = Duration::from_secs(secs);
    }

    info!(
        "Using {} bus, job timeout {:?}",
        config.bus.as_str(),
        config.job_timeout
    );

    let state = AppState::new(BusConnector::new(config.bus), config.job_timeout);
    let app = router(state);

    let listener = TcpListener::bind(config.listen).await.map_err(|e| {
        log::error!("Failed to bind {}: {}", config.listen, e);
        e
    })?;
    let local: SocketAddr = listener.local_addr()?;
    info!("Listening on http://{}", local);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shut down");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM
async fn shutdown_signal() {
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            log::warn!("Failed to install SIGTERM handler: {}", e);
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
        _ = sigterm.recv() => info!("Received SIGTERM"),
    }
}
