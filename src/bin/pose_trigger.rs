//! pose_trigger - one-shot CLI front end for Pose Relay
//!
//! Processes a single image or video and sends the original and annotated
//! media to the configured chat (`TELEGRAM_CHAT_ID`).

use anyhow::{anyhow, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;

use pose_relay::{
    build_pipeline, deliver,
    ui::{Ui, UiMode},
    Messenger, ProcessOptions, RelayConfig, RequestPipeline, TelegramClient,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Detect poses in one file and send the results")]
struct Args {
    /// Image or video to process.
    file: PathBuf,

    /// Progress output: auto, plain or pretty.
    #[arg(long, env = "POSE_UI")]
    ui: Option<String>,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let ui = Ui::new(UiMode::parse(args.ui.as_deref()), std::io::stderr().is_terminal());

    let cfg = {
        let _stage = ui.stage("load configuration");
        RelayConfig::load()?
    };
    let chat_id = cfg.telegram.require_chat_id()?;
    let kind = RequestPipeline::check(&args.file)?;
    log::info!("processing {:?} {}", kind, args.file.display());

    let client = TelegramClient::new(&cfg.telegram)?;
    let mut pipeline = {
        let _stage = ui.stage("load pose backend");
        build_pipeline(&cfg)?
    };

    let processed = {
        let mut stage = ui.stage("detect poses");
        let processed = pipeline.process(&args.file, ProcessOptions::default());
        if processed.is_err() {
            stage.fail();
        }
        processed
    };
    let output = match processed {
        Ok(output) => output,
        Err(err) => {
            let text = format!("Error processing {}: {err:#}", args.file.display());
            if let Err(send_err) = client.send_text(chat_id, &text) {
                log::warn!("failed to report error to chat {}: {:#}", chat_id, send_err);
            }
            return Err(err);
        }
    };

    let report = {
        let mut stage = ui.stage("send results");
        let report = deliver(&client, &[chat_id], &output, cfg.clip.duration_secs);
        if !report.all_sent() {
            stage.fail();
        }
        report
    };
    if !report.all_sent() {
        return Err(anyhow!(
            "{} of {} sends failed: {}",
            report.failed,
            report.sent + report.failed,
            report.errors.join("; ")
        ));
    }
    log::info!("sent {} artifact(s) to chat {}", report.sent, chat_id);
    Ok(())
}
