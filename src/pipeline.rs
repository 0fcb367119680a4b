//! One inbound file in, annotated artifacts out.

use anyhow::Result;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::PathSettings;
use crate::media::{self, MediaKind, VideoInfo};
use crate::pose::{PoseDetector, PoseStats, Posture};
use crate::render::ClipRenderer;
use crate::stats::RequestTally;

/// Request-level failures front ends map to user-facing answers.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("unsupported file type: {0}")]
    Unsupported(PathBuf),
    #[error("file not found: {0}")]
    NotFound(PathBuf),
    #[error("could not read {path}: {reason}")]
    Unreadable { path: PathBuf, reason: String },
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessOptions {
    /// Render a zoom clip for image requests.
    pub render_clip: bool,
}

#[derive(Clone, Debug)]
pub struct ImageOutcome {
    pub original: PathBuf,
    pub annotated: PathBuf,
    pub clip: Option<PathBuf>,
    pub postures: Vec<Posture>,
    pub stats: PoseStats,
}

#[derive(Clone, Debug)]
pub struct VideoOutcome {
    pub original: PathBuf,
    pub annotated: PathBuf,
    /// Persons found on the first frame.
    pub persons: usize,
    pub info: VideoInfo,
}

#[derive(Clone, Debug)]
pub enum PipelineOutput {
    Image(ImageOutcome),
    Video(VideoOutcome),
}

impl PipelineOutput {
    pub fn tally(&self) -> RequestTally {
        match self {
            PipelineOutput::Image(outcome) => RequestTally::image(outcome.stats.num_persons),
            PipelineOutput::Video(outcome) => RequestTally::video(outcome.persons),
        }
    }

    pub fn kind(&self) -> MediaKind {
        match self {
            PipelineOutput::Image(_) => MediaKind::Image,
            PipelineOutput::Video(_) => MediaKind::Video,
        }
    }
}

pub struct RequestPipeline {
    detector: PoseDetector,
    renderer: ClipRenderer,
    poses_dir: PathBuf,
}

impl RequestPipeline {
    pub fn new(detector: PoseDetector, renderer: ClipRenderer, paths: &PathSettings) -> Self {
        Self {
            detector,
            renderer,
            poses_dir: paths.poses_dir(),
        }
    }

    pub fn detector(&self) -> &PoseDetector {
        &self.detector
    }

    pub fn renderer(&self) -> &ClipRenderer {
        &self.renderer
    }

    /// Classify and check `path` without processing it.
    pub fn check(path: &Path) -> Result<MediaKind, PipelineError> {
        let kind = MediaKind::from_path(path)
            .ok_or_else(|| PipelineError::Unsupported(path.to_path_buf()))?;
        if !path.is_file() {
            return Err(PipelineError::NotFound(path.to_path_buf()));
        }
        Ok(kind)
    }

    /// Blocks until every artifact is on disk. `PipelineError`s travel inside
    /// the returned `anyhow::Error`.
    pub fn process(&mut self, path: &Path, options: ProcessOptions) -> Result<PipelineOutput> {
        match Self::check(path)? {
            MediaKind::Image => self.process_image(path, options).map(PipelineOutput::Image),
            MediaKind::Video => self.process_video(path).map(PipelineOutput::Video),
        }
    }

    fn process_image(&mut self, path: &Path, options: ProcessOptions) -> Result<ImageOutcome> {
        let image = media::load_image(path).map_err(|err| unreadable(path, err))?;
        let result = self.detector.detect(&image, None);
        let annotated = self.detector.draw(&image, Some(&result));
        let annotated_path = media::timestamped_path(&self.poses_dir, "pose", "jpg");
        media::save_image(&annotated_path, &annotated)?;

        let postures = self.detector.classify(&result);
        let stats = self.detector.summarize(&result);
        let clip = if options.render_clip {
            Some(self.renderer.render_clip(&self.detector, &image, &result, None)?)
        } else {
            None
        };
        log::info!(
            "image {} processed: {} person(s)",
            path.display(),
            stats.num_persons
        );
        Ok(ImageOutcome {
            original: path.to_path_buf(),
            annotated: annotated_path,
            clip,
            postures,
            stats,
        })
    }

    fn process_video(&mut self, path: &Path) -> Result<VideoOutcome> {
        let (original, annotated) = self
            .renderer
            .render_video(&mut self.detector, path)
            .map_err(|err| unreadable(path, err))?;
        let first = self.renderer.first_frame(&original)?;
        let persons = self.detector.detect(&first, None).num_persons();
        let info = self.renderer.video_info(&annotated)?;
        log::info!(
            "video {} processed: {} frames, {} person(s) on first frame",
            path.display(),
            info.frame_count,
            persons
        );
        Ok(VideoOutcome {
            original,
            annotated,
            persons,
            info,
        })
    }
}

fn unreadable(path: &Path, err: anyhow::Error) -> anyhow::Error {
    PipelineError::Unreadable {
        path: path.to_path_buf(),
        reason: format!("{err:#}"),
    }
    .into()
}
