//! pose_api - HTTP front end for Pose Relay
//!
//! Serves `GET /` and `POST /detect`. Each detect request processes a
//! local file and broadcasts the results to every subscribed chat.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::{mpsc, Arc};

use pose_relay::{
    api::{ApiConfig, ApiServer},
    build_pipeline, JsonSubscriberStore, RelayConfig, TelegramClient, UsageStats,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Pose detection HTTP server")]
struct Args {
    /// TOML config file; environment variables override its values.
    #[arg(long, env = "POSE_CONFIG")]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let cfg = RelayConfig::load_from(args.config.as_deref())?;
    cfg.log_summary();

    let messenger = Arc::new(TelegramClient::new(&cfg.telegram)?);
    let subscribers = Arc::new(JsonSubscriberStore::open(&cfg.paths.subscribers_file)?);
    let pipeline = build_pipeline(&cfg)?;

    let api_config = ApiConfig {
        addr: cfg.api.addr.clone(),
    };
    let api_handle = ApiServer::new(
        api_config,
        pipeline,
        messenger,
        subscribers,
        Arc::new(UsageStats::new()),
    )
    .spawn()?;
    log::info!("detect api listening on {}", api_handle.addr);

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .expect("error setting Ctrl-C handler");

    log::info!("pose_api waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping API server...");
    api_handle.stop()?;
    log::info!("pose_api stopped");
    Ok(())
}
