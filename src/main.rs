//! peerchat-core - Main entry point
//!
//! Demo binary: joins a session over the in-process signalling hub
//! with loopback transports and a headless media engine, so the whole
//! orchestration path runs without any network or devices. A second
//! participant joins the same hub to give the session a peer to meet.

use clap::Parser;
use log::{error, info, warn};
use peerchat_core::args::Args;
use peerchat_core::config::Config;
use peerchat_core::connection::LoopbackTransportFactory;
use peerchat_core::media::NullMediaEngine;
use peerchat_core::session::{Session, SessionObserver};
use peerchat_core::signalling::LocalSignallingHub;
use std::sync::Arc;
use tokio::signal;

struct LogObserver {
    tag: &'static str,
}

impl SessionObserver for LogObserver {
    fn on_peer_joined(&self, name: &str) {
        info!("[{}] {} joined", self.tag, name);
    }

    fn on_peer_left(&self, name: &str) {
        info!("[{}] {} left", self.tag, name);
    }

    fn on_received_text(&self, from: &str, body: &str) {
        info!("[{}] {}: {}", self.tag, from, body);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::new()
        .parse_filters(&std::env::var("PEERCHAT_LOG").unwrap_or_else(|_| log_level.to_string()))
        .init();

    info!("peerchat-core v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = match args.load_config() {
        Ok(cfg) => {
            info!("Loaded configuration from {:?}", args.config);
            cfg
        }
        Err(e) => {
            warn!("Failed to load config: {}, using defaults", e);
            Config::default()
        }
    };
    config.validate()?;

    // In-process collaborators; a real deployment wires network-backed
    // signalling, an ICE transport factory and a device media engine
    // here instead.
    let hub = LocalSignallingHub::new();
    let transports = Arc::new(LoopbackTransportFactory::new());
    let engine = Arc::new(NullMediaEngine::new());

    let mut peer_config = config.clone();
    peer_config.session.display_name = format!("{} (echo)", config.session.display_name);
    let peer = Session::join(
        &peer_config,
        Arc::new(hub.channel()),
        engine.clone(),
        transports.clone(),
        Arc::new(LogObserver { tag: "echo" }),
    )
    .await?;

    let session = Session::join(
        &config,
        Arc::new(hub.channel()),
        engine,
        transports,
        Arc::new(LogObserver { tag: "local" }),
    )
    .await?;

    info!(
        "joined {} as {} ({} mode), local media {}",
        config.session.session_id,
        session.local_participant().name,
        session.mode().as_str(),
        session.local_handle()
    );

    if let Err(e) = session.send_text("hello from the demo") {
        error!("send_text: {}", e);
    }

    signal::ctrl_c().await?;
    info!("Shutting down...");

    session.leave().await?;
    if let Err(e) = session.stop_local_media().await {
        warn!("stop local media: {}", e);
    }
    peer.leave().await?;

    Ok(())
}
