//! pose_bot - chat bot front end for Pose Relay
//!
//! This daemon:
//! 1. Checks the bot token with `getMe`
//! 2. Long-polls the chat API for photos, videos and commands
//! 3. Replies to each chat with original, annotated and clip media

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use pose_relay::{
    bot::{self, BotService},
    build_pipeline, JsonSubscriberStore, RelayConfig, TelegramClient, UsageStats,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Pose detection chat bot")]
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

    let client = Arc::new(TelegramClient::new(&cfg.telegram)?);
    let username = bot::identify(&client)?;

    let pipeline = build_pipeline(&cfg)?;
    let subscribers = Arc::new(JsonSubscriberStore::open(&cfg.paths.subscribers_file)?);
    let mut service = BotService::new(
        client.clone(),
        pipeline,
        subscribers,
        Arc::new(UsageStats::new()),
        cfg.paths.detections_dir(),
    )
    .with_allowed_users(cfg.telegram.allowed_users.clone())
    .with_bot_username(username);

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    })
    .expect("error setting Ctrl-C handler");

    log::info!("pose_bot polling for updates (Ctrl-C stops after the current poll)...");
    bot::run_polling(
        client.as_ref(),
        &mut service,
        cfg.telegram.poll_timeout,
        &shutdown,
    )?;
    log::info!("pose_bot stopped");
    Ok(())
}
