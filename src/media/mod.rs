//! Media files: kind detection, still images and frame-by-frame video I/O.
//!
//! Animated GIF is always available through `image`. Other containers go
//! through FFmpeg and need the `video-ffmpeg` feature.

mod gif;

#[cfg(feature = "video-ffmpeg")]
mod ffmpeg;

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use std::path::{Path, PathBuf};

use self::gif::{GifFrameReader, GifFrameWriter};
#[cfg(feature = "video-ffmpeg")]
use self::ffmpeg::{FfmpegFrameReader, FfmpegFrameWriter};

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "mkv", "gif"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    /// Kind by case-insensitive extension; `None` when unsupported.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = extension(path)?;
        if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            Some(MediaKind::Image)
        } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            Some(MediaKind::Video)
        } else {
            None
        }
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

fn is_gif(path: &Path) -> bool {
    extension(path).as_deref() == Some("gif")
}

/// Probed video metadata. Never cached; each probe reopens the file.
#[derive(Clone, Debug, PartialEq)]
pub struct VideoInfo {
    pub fps: f32,
    pub width: u32,
    pub height: u32,
    pub frame_count: usize,
    pub duration_secs: f32,
}

/// Local-time stamp used in output file names.
pub fn timestamp() -> String {
    chrono::Local::now().format("%Y%m%d_%H%M%S").to_string()
}

/// `<dir>/<prefix>_<timestamp>.<ext>`, with a numeric suffix when a file of
/// that name already exists.
pub fn timestamped_path(dir: &Path, prefix: &str, ext: &str) -> PathBuf {
    let stamp = timestamp();
    let candidate = dir.join(format!("{prefix}_{stamp}.{ext}"));
    if !candidate.exists() {
        return candidate;
    }
    let mut n = 1u32;
    loop {
        let candidate = dir.join(format!("{prefix}_{stamp}_{n}.{ext}"));
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

/// Frame rate as an exact `(numerator, denominator)` pair. NTSC-style rates
/// such as 29.97 map to `n*1000/1001`; others keep millihertz precision.
#[cfg_attr(not(feature = "video-ffmpeg"), allow(dead_code))]
pub(crate) fn frame_rate_ratio(fps: f32) -> (i32, i32) {
    // MPEG-4 rejects time base denominators above this.
    const MAX_TERM: i32 = 65_535;
    let fps = f64::from(fps);
    let whole = fps.round().max(1.0);
    if (fps - whole).abs() < 1e-3 {
        return (whole as i32, 1);
    }
    let ntsc = (fps * 1.001).round();
    if (fps * 1.001 - ntsc).abs() < 1e-3 && ntsc * 1000.0 <= f64::from(MAX_TERM) {
        return (ntsc as i32 * 1000, 1001);
    }
    let milli = (fps * 1000.0).round().max(1.0) as i32;
    let divisor = gcd(milli, 1000);
    let (numer, denom) = (milli / divisor, 1000 / divisor);
    if numer > MAX_TERM {
        return (whole as i32, 1);
    }
    (numer, denom)
}

fn gcd(mut a: i32, mut b: i32) -> i32 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

/// Decode by content; chat downloads do not always carry a matching extension.
pub fn load_image(path: &Path) -> Result<RgbImage> {
    let image = image::ImageReader::open(path)
        .with_context(|| format!("failed to open image {}", path.display()))?
        .with_guessed_format()
        .with_context(|| format!("failed to read image {}", path.display()))?
        .decode()
        .with_context(|| format!("failed to decode image {}", path.display()))?;
    Ok(image.to_rgb8())
}

pub fn save_image(path: &Path, image: &RgbImage) -> Result<()> {
    image
        .save(path)
        .with_context(|| format!("failed to write image {}", path.display()))
}

/// Sequential frame reader for a video file.
pub struct FrameReader {
    backend: ReaderBackend,
}

enum ReaderBackend {
    Gif(GifFrameReader),
    #[cfg(feature = "video-ffmpeg")]
    Ffmpeg(FfmpegFrameReader),
}

impl FrameReader {
    pub fn open(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(anyhow!("video file {} does not exist", path.display()));
        }
        if is_gif(path) {
            return Ok(Self {
                backend: ReaderBackend::Gif(GifFrameReader::open(path)?),
            });
        }
        #[cfg(feature = "video-ffmpeg")]
        {
            Ok(Self {
                backend: ReaderBackend::Ffmpeg(FfmpegFrameReader::open(path)?),
            })
        }
        #[cfg(not(feature = "video-ffmpeg"))]
        {
            Err(anyhow!(
                "reading {} requires the video-ffmpeg feature",
                path.display()
            ))
        }
    }

    pub fn fps(&self) -> f32 {
        match &self.backend {
            ReaderBackend::Gif(reader) => reader.fps(),
            #[cfg(feature = "video-ffmpeg")]
            ReaderBackend::Ffmpeg(reader) => reader.fps(),
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        match &self.backend {
            ReaderBackend::Gif(reader) => reader.dimensions(),
            #[cfg(feature = "video-ffmpeg")]
            ReaderBackend::Ffmpeg(reader) => reader.dimensions(),
        }
    }

    /// Container-reported frame count, when the container has one.
    pub fn frame_count_hint(&self) -> Option<usize> {
        match &self.backend {
            ReaderBackend::Gif(_) => None,
            #[cfg(feature = "video-ffmpeg")]
            ReaderBackend::Ffmpeg(reader) => reader.frame_count_hint(),
        }
    }

    /// Next decoded frame, `None` at end of stream.
    pub fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        match &mut self.backend {
            ReaderBackend::Gif(reader) => reader.next_frame(),
            #[cfg(feature = "video-ffmpeg")]
            ReaderBackend::Ffmpeg(reader) => reader.next_frame(),
        }
    }
}

/// Sequential frame writer. Frames must match the size given at creation.
pub struct FrameWriter {
    backend: WriterBackend,
    frames: usize,
}

enum WriterBackend {
    Gif(GifFrameWriter),
    #[cfg(feature = "video-ffmpeg")]
    Ffmpeg(FfmpegFrameWriter),
}

impl FrameWriter {
    pub fn create(path: &Path, width: u32, height: u32, fps: f32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(anyhow!("cannot write a {}x{} video", width, height));
        }
        if !(fps > 0.0) {
            return Err(anyhow!("video fps must be positive, got {}", fps));
        }
        let backend = if is_gif(path) {
            WriterBackend::Gif(GifFrameWriter::create(path, width, height, fps)?)
        } else {
            #[cfg(feature = "video-ffmpeg")]
            {
                WriterBackend::Ffmpeg(FfmpegFrameWriter::create(path, width, height, fps)?)
            }
            #[cfg(not(feature = "video-ffmpeg"))]
            {
                return Err(anyhow!(
                    "writing {} requires the video-ffmpeg feature",
                    path.display()
                ));
            }
        };
        Ok(Self { backend, frames: 0 })
    }

    pub fn write(&mut self, frame: &RgbImage) -> Result<()> {
        match &mut self.backend {
            WriterBackend::Gif(writer) => writer.write(frame)?,
            #[cfg(feature = "video-ffmpeg")]
            WriterBackend::Ffmpeg(writer) => writer.write(frame)?,
        }
        self.frames += 1;
        Ok(())
    }

    /// Flush and close the file; returns the number of frames written.
    pub fn finish(self) -> Result<usize> {
        match self.backend {
            WriterBackend::Gif(writer) => writer.finish()?,
            #[cfg(feature = "video-ffmpeg")]
            WriterBackend::Ffmpeg(writer) => writer.finish()?,
        }
        Ok(self.frames)
    }
}

/// Probe fps, size and frame count, decoding the stream when the container
/// does not report a frame count.
pub fn probe(path: &Path) -> Result<VideoInfo> {
    let mut reader = FrameReader::open(path)?;
    let fps = reader.fps();
    let (width, height) = reader.dimensions();
    let frame_count = match reader.frame_count_hint() {
        Some(count) => count,
        None => {
            let mut count = 0usize;
            while reader.next_frame()?.is_some() {
                count += 1;
            }
            count
        }
    };
    let duration_secs = if fps > 0.0 {
        frame_count as f32 / fps
    } else {
        0.0
    };
    Ok(VideoInfo {
        fps,
        width,
        height,
        frame_count,
        duration_secs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_by_extension() {
        assert_eq!(MediaKind::from_path(Path::new("a.JPG")), Some(MediaKind::Image));
        assert_eq!(MediaKind::from_path(Path::new("a.png")), Some(MediaKind::Image));
        assert_eq!(MediaKind::from_path(Path::new("a.mkv")), Some(MediaKind::Video));
        assert_eq!(MediaKind::from_path(Path::new("a.gif")), Some(MediaKind::Video));
        assert_eq!(MediaKind::from_path(Path::new("a.bmp")), None);
        assert_eq!(MediaKind::from_path(Path::new("noext")), None);
    }

    #[test]
    fn timestamped_paths_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let first = timestamped_path(dir.path(), "clip", "gif");
        std::fs::write(&first, b"x").unwrap();
        let second = timestamped_path(dir.path(), "clip", "gif");
        assert_ne!(first, second);
        let name = first.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("clip_") && name.ends_with(".gif"));
    }

    #[test]
    fn frame_rates_stay_exact() {
        assert_eq!(frame_rate_ratio(30.0), (30, 1));
        assert_eq!(frame_rate_ratio(29.97), (30000, 1001));
        assert_eq!(frame_rate_ratio(23.976), (24000, 1001));
        assert_eq!(frame_rate_ratio(59.94), (60000, 1001));
        assert_eq!(frame_rate_ratio(12.5), (25, 2));
        assert_eq!(frame_rate_ratio(0.5), (1, 2));
        let (numer, denom) = frame_rate_ratio(29.97);
        assert!((f64::from(numer) / f64::from(denom) - 29.97).abs() < 1e-3);
    }

    #[test]
    fn gif_round_trip_keeps_frames_and_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tiny.gif");
        let mut writer = FrameWriter::create(&path, 16, 12, 10.0).unwrap();
        for shade in [0u8, 120, 240] {
            writer
                .write(&RgbImage::from_pixel(16, 12, image::Rgb([shade, shade, shade])))
                .unwrap();
        }
        assert_eq!(writer.finish().unwrap(), 3);

        let info = probe(&path).unwrap();
        assert_eq!(info.frame_count, 3);
        assert_eq!((info.width, info.height), (16, 12));
        assert!((info.fps - 10.0).abs() < 0.5);
    }

    #[test]
    fn missing_video_is_an_error() {
        assert!(FrameReader::open(Path::new("/no/such/clip.gif")).is_err());
    }
}
