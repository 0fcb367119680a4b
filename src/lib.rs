//! Pose Relay
//!
//! Receives images and videos from a chat bot, an HTTP endpoint or a one-shot
//! CLI trigger, runs a human-pose backend on them, overlays skeletons, labels
//! a coarse posture per person and relays the original and annotated media
//! to chat recipients.
//!
//! # Module Structure
//!
//! - `pose`: backends, detection results, skeleton overlay, posture heuristic
//! - `media`, `render`: frame I/O and derivative clips
//! - `pipeline`: one inbound file to its outbound artifacts
//! - `delivery`, `transport`: captions and chat transport
//! - `bot`, `api`: front ends (the CLI front end is the `pose_trigger` binary)
//! - `config`, `stats`, `subscribers`: ambient state

use anyhow::Result;

pub mod api;
pub mod bot;
pub mod config;
pub mod delivery;
pub mod media;
pub mod pipeline;
pub mod pose;
pub mod render;
pub mod stats;
pub mod subscribers;
pub mod transport;
pub mod ui;

pub use config::RelayConfig;
pub use delivery::{deliver, DeliveryReport};
pub use pipeline::{PipelineError, PipelineOutput, ProcessOptions, RequestPipeline};
pub use pose::{DetectionResult, PoseDetector, Posture, Topology};
pub use render::ClipRenderer;
pub use stats::{RequestTally, UsageSnapshot, UsageStats};
pub use subscribers::{InMemorySubscriberStore, JsonSubscriberStore, SubscriberStore};
pub use transport::{ChatId, Messenger, RecordingMessenger, TelegramClient};

/// Detector, renderer and pipeline for a loaded configuration. Output
/// directories are created here.
pub fn build_pipeline(cfg: &RelayConfig) -> Result<RequestPipeline> {
    cfg.paths.ensure_dirs()?;
    let detector = PoseDetector::from_settings(&cfg.pose)?;
    log::info!("pose detector ready: {}", detector.describe());
    let renderer = ClipRenderer::new(&cfg.clip, cfg.paths.videos_dir());
    Ok(RequestPipeline::new(detector, renderer, &cfg.paths))
}
