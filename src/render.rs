//! Derivative clips: zoom-oscillation clips from a still, frame-by-frame
//! annotation of whole videos, and a few conversion helpers.

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use std::f32::consts::PI;
use std::path::{Path, PathBuf};

use crate::config::{ClipFormat, ClipSettings};
use crate::media::{self, FrameReader, FrameWriter, VideoInfo};
use crate::pose::draw::draw_caption;
use crate::pose::{DetectionResult, PoseDetector};

/// Frames between progress log lines while annotating a video.
const PROGRESS_EVERY: usize = 30;
const ZOOM_AMPLITUDE: f32 = 0.1;
const COMPARISON_LABELS: (&str, &str) = ("Original", "Pose");

pub struct ClipRenderer {
    fps: u32,
    duration_secs: f32,
    format: ClipFormat,
    videos_dir: PathBuf,
}

impl ClipRenderer {
    pub fn new(settings: &ClipSettings, videos_dir: impl Into<PathBuf>) -> Self {
        Self {
            fps: settings.fps.max(1),
            duration_secs: settings.duration_secs,
            format: settings.format,
            videos_dir: videos_dir.into(),
        }
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    pub fn duration_secs(&self) -> f32 {
        self.duration_secs
    }

    /// Draw `result` once, then write `floor(duration * fps)` zoom frames.
    pub fn render_clip(
        &self,
        detector: &PoseDetector,
        image: &RgbImage,
        result: &DetectionResult,
        duration_secs: Option<f32>,
    ) -> Result<PathBuf> {
        let duration = duration_secs.unwrap_or(self.duration_secs);
        let frame_count = (duration * self.fps as f32).floor() as usize;
        if frame_count == 0 {
            return Err(anyhow!(
                "a {}s clip at {} fps has no frames",
                duration,
                self.fps
            ));
        }

        let annotated = detector.draw(image, Some(result));
        let (width, height) = annotated.dimensions();
        let path = media::timestamped_path(&self.videos_dir, "clip", self.format.extension());
        let mut writer = FrameWriter::create(&path, width, height, self.fps as f32)?;
        for i in 0..frame_count {
            let phase = 2.0 * PI * i as f32 / frame_count as f32;
            let scale = 1.0 + ZOOM_AMPLITUDE * phase.sin();
            writer.write(&zoom_frame(&annotated, scale))?;
        }
        let written = writer.finish()?;
        log::info!("clip written: {} ({} frames)", path.display(), written);
        Ok(path)
    }

    /// Annotate every frame of `input`. Returns (original, annotated).
    pub fn render_video(
        &self,
        detector: &mut PoseDetector,
        input: &Path,
    ) -> Result<(PathBuf, PathBuf)> {
        let mut reader = FrameReader::open(input)?;
        let fps = reader.fps();
        let (width, height) = reader.dimensions();
        let ext = if is_gif(input) { "gif" } else { "mp4" };
        let output = media::timestamped_path(&self.videos_dir, "pose_detection", ext);

        log::info!(
            "annotating {} ({}x{} @ {:.1} fps)",
            input.display(),
            width,
            height,
            fps
        );
        let mut writer = FrameWriter::create(&output, width, height, fps)?;
        let mut processed = 0usize;
        while let Some(frame) = reader.next_frame()? {
            let result = detector.detect(&frame, None);
            writer.write(&detector.draw(&frame, Some(&result)))?;
            processed += 1;
            if processed % PROGRESS_EVERY == 0 {
                log::info!("annotated {} frames of {}", processed, input.display());
            }
        }
        if processed == 0 {
            return Err(anyhow!("{} contains no frames", input.display()));
        }
        writer.finish()?;
        log::info!("annotated video written: {} ({} frames)", output.display(), processed);
        Ok((input.to_path_buf(), output))
    }

    pub fn video_info(&self, path: &Path) -> Result<VideoInfo> {
        media::probe(path)
    }

    /// Decode up to `max_frames` frames (all when `None`).
    pub fn extract_frames(&self, path: &Path, max_frames: Option<usize>) -> Result<Vec<RgbImage>> {
        let mut reader = FrameReader::open(path)?;
        let mut frames = Vec::new();
        while max_frames.map_or(true, |max| frames.len() < max) {
            match reader.next_frame()? {
                Some(frame) => frames.push(frame),
                None => break,
            }
        }
        Ok(frames)
    }

    pub fn first_frame(&self, path: &Path) -> Result<RgbImage> {
        self.extract_frames(path, Some(1))?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("{} contains no frames", path.display()))
    }

    /// Side-by-side video of paired frames with labels over each half. Both
    /// sides must have the same number of frames.
    pub fn create_comparison_video(
        &self,
        originals: &[RgbImage],
        annotated: &[RgbImage],
    ) -> Result<PathBuf> {
        let (Some(left), Some(right)) = (originals.first(), annotated.first()) else {
            return Err(anyhow!("comparison needs at least one frame on each side"));
        };
        if originals.len() != annotated.len() {
            return Err(anyhow!(
                "comparison sides differ: {} original frame(s), {} annotated",
                originals.len(),
                annotated.len()
            ));
        }
        let (left_w, right_w) = (left.width(), right.width());
        let height = left.height().max(right.height());
        let path = media::timestamped_path(&self.videos_dir, "comparison", self.format.extension());
        let mut writer = FrameWriter::create(&path, left_w + right_w, height, self.fps as f32)?;

        for (original, pose) in originals.iter().zip(annotated) {
            let mut combined = RgbImage::new(left_w + right_w, height);
            imageops::replace(&mut combined, &fit(original, left_w, height), 0, 0);
            imageops::replace(&mut combined, &fit(pose, right_w, height), left_w as i64, 0);
            let white = Rgb([255, 255, 255]);
            draw_caption(&mut combined, COMPARISON_LABELS.0, (10, 14), 2, white);
            draw_caption(&mut combined, COMPARISON_LABELS.1, (left_w + 10, 14), 2, white);
            writer.write(&combined)?;
        }
        writer.finish()?;
        log::info!("comparison video written: {}", path.display());
        Ok(path)
    }

    /// Re-encode a video as `<stem>_<timestamp>.gif` next to the other outputs.
    pub fn convert_to_gif(&self, path: &Path) -> Result<PathBuf> {
        if is_gif(path) {
            return Err(anyhow!("{} is already a GIF", path.display()));
        }
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .context("video path has no file name")?;
        let mut reader = FrameReader::open(path)?;
        let (width, height) = reader.dimensions();
        let output = media::timestamped_path(&self.videos_dir, stem, "gif");
        let mut writer = FrameWriter::create(&output, width, height, self.fps as f32)?;
        while let Some(frame) = reader.next_frame()? {
            writer.write(&frame)?;
        }
        writer.finish()?;
        log::info!("GIF written: {}", output.display());
        Ok(output)
    }
}

fn is_gif(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("gif"))
}

fn fit(frame: &RgbImage, width: u32, height: u32) -> RgbImage {
    if frame.dimensions() == (width, height) {
        frame.clone()
    } else {
        imageops::resize(frame, width, height, FilterType::Triangle)
    }
}

/// Scale about the centre, keeping the original size: centre-crop when
/// zooming in, centred on black when zooming out.
pub fn zoom_frame(image: &RgbImage, scale: f32) -> RgbImage {
    let (width, height) = image.dimensions();
    let scaled_w = ((width as f32 * scale).round() as u32).max(1);
    let scaled_h = ((height as f32 * scale).round() as u32).max(1);
    if (scaled_w, scaled_h) == (width, height) {
        return image.clone();
    }
    let scaled = imageops::resize(image, scaled_w, scaled_h, FilterType::Triangle);

    if scaled_w >= width && scaled_h >= height {
        let x = (scaled_w - width) / 2;
        let y = (scaled_h - height) / 2;
        imageops::crop_imm(&scaled, x, y, width, height).to_image()
    } else {
        let mut canvas = RgbImage::new(width, height);
        let x = (width as i64 - scaled_w as i64) / 2;
        let y = (height as i64 - scaled_h as i64) / 2;
        imageops::replace(&mut canvas, &scaled, x, y);
        canvas
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zoom_keeps_size_both_ways() {
        let image = RgbImage::from_pixel(40, 30, Rgb([200, 10, 10]));
        let zoomed_in = zoom_frame(&image, 1.1);
        let zoomed_out = zoom_frame(&image, 0.9);
        assert_eq!(zoomed_in.dimensions(), (40, 30));
        assert_eq!(zoomed_out.dimensions(), (40, 30));
        // Zooming out leaves a black border.
        assert_eq!(*zoomed_out.get_pixel(0, 0), Rgb([0, 0, 0]));
        assert_eq!(*zoomed_in.get_pixel(0, 0), Rgb([200, 10, 10]));
    }

    #[test]
    fn unit_scale_is_identity() {
        let image = RgbImage::from_pixel(9, 7, Rgb([1, 2, 3]));
        assert_eq!(zoom_frame(&image, 1.0), image);
    }
}
