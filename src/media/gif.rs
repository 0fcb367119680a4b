use anyhow::{anyhow, Context, Result};
use image::codecs::gif::{GifDecoder, GifEncoder, Repeat};
use image::{AnimationDecoder, Delay, DynamicImage, Frame, Frames, ImageDecoder, RgbImage};
use std::fs::File;
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

/// Used when a GIF carries no frame delay.
const DEFAULT_GIF_FPS: f32 = 10.0;
/// Encoder speed 1..=30; higher trades palette quality for speed.
const GIF_ENCODER_SPEED: i32 = 10;

pub(crate) struct GifFrameReader {
    frames: Frames<'static>,
    pending: Option<RgbImage>,
    width: u32,
    height: u32,
    fps: f32,
}

impl GifFrameReader {
    pub(crate) fn open(path: &Path) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        let decoder = GifDecoder::new(BufReader::new(file))
            .with_context(|| format!("failed to decode GIF {}", path.display()))?;
        let (width, height) = decoder.dimensions();
        let mut frames = decoder.into_frames();

        // The first frame's delay stands in for the whole animation.
        let (pending, fps) = match frames.next() {
            Some(frame) => {
                let frame = frame.context("failed to decode first GIF frame")?;
                let fps = delay_to_fps(frame.delay());
                (Some(frame_to_rgb(frame)), fps)
            }
            None => (None, DEFAULT_GIF_FPS),
        };

        Ok(Self {
            frames,
            pending,
            width,
            height,
            fps,
        })
    }

    pub(crate) fn fps(&self) -> f32 {
        self.fps
    }

    pub(crate) fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub(crate) fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        if let Some(frame) = self.pending.take() {
            return Ok(Some(frame));
        }
        match self.frames.next() {
            Some(frame) => Ok(Some(frame_to_rgb(frame.context("failed to decode GIF frame")?))),
            None => Ok(None),
        }
    }
}

fn frame_to_rgb(frame: Frame) -> RgbImage {
    DynamicImage::ImageRgba8(frame.into_buffer()).to_rgb8()
}

fn delay_to_fps(delay: Delay) -> f32 {
    let (numer, denom) = delay.numer_denom_ms();
    if numer == 0 {
        return DEFAULT_GIF_FPS;
    }
    1000.0 * denom as f32 / numer as f32
}

/// Encoder sink. The encoder only emits its trailer on drop, so frames are
/// staged in memory and copied to the file in `finish`, where errors surface.
#[derive(Clone, Default)]
struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    fn take(&self) -> Vec<u8> {
        std::mem::take(&mut *self.0.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

pub(crate) struct GifFrameWriter {
    encoder: GifEncoder<SharedBuffer>,
    buffer: SharedBuffer,
    file: File,
    path: PathBuf,
    width: u32,
    height: u32,
    delay: Delay,
}

impl GifFrameWriter {
    pub(crate) fn create(path: &Path, width: u32, height: u32, fps: f32) -> Result<Self> {
        let file =
            File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
        let buffer = SharedBuffer::default();
        let mut encoder = GifEncoder::new_with_speed(buffer.clone(), GIF_ENCODER_SPEED);
        encoder
            .set_repeat(Repeat::Infinite)
            .context("failed to set GIF repeat")?;
        let delay_ms = (1000.0 / fps).round().max(1.0) as u32;
        Ok(Self {
            encoder,
            buffer,
            file,
            path: path.to_path_buf(),
            width,
            height,
            delay: Delay::from_numer_denom_ms(delay_ms, 1),
        })
    }

    pub(crate) fn write(&mut self, frame: &RgbImage) -> Result<()> {
        if frame.dimensions() != (self.width, self.height) {
            return Err(anyhow!(
                "frame is {}x{}, writer expects {}x{}",
                frame.width(),
                frame.height(),
                self.width,
                self.height
            ));
        }
        let rgba = DynamicImage::ImageRgb8(frame.clone()).to_rgba8();
        self.encoder
            .encode_frame(Frame::from_parts(rgba, 0, 0, self.delay))
            .context("failed to encode GIF frame")
    }

    pub(crate) fn finish(self) -> Result<()> {
        let Self {
            encoder,
            buffer,
            mut file,
            path,
            ..
        } = self;
        // Dropping the encoder appends the trailer to the buffer.
        drop(encoder);
        let bytes = buffer.take();
        file.write_all(&bytes)
            .and_then(|()| file.flush())
            .and_then(|()| file.sync_all())
            .with_context(|| format!("failed to write GIF {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn finish_writes_a_complete_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("two.gif");
        let mut writer = GifFrameWriter::create(&path, 8, 6, 5.0).unwrap();
        for shade in [30u8, 200] {
            writer.write(&RgbImage::from_pixel(8, 6, Rgb([shade, 0, 0]))).unwrap();
        }
        writer.finish().unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert!(bytes.starts_with(b"GIF89a"));
        // 0x3B is the GIF trailer byte.
        assert_eq!(bytes.last(), Some(&0x3B));

        let mut reader = GifFrameReader::open(&path).unwrap();
        assert!((reader.fps() - 5.0).abs() < 0.5);
        let mut count = 0;
        while reader.next_frame().unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 2);
    }

    #[test]
    fn rejects_frames_of_the_wrong_size() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = GifFrameWriter::create(&dir.path().join("x.gif"), 8, 6, 5.0).unwrap();
        assert!(writer.write(&RgbImage::new(6, 8)).is_err());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn finish_reports_a_device_that_rejects_writes() {
        let full = Path::new("/dev/full");
        if !full.exists() {
            return;
        }
        let mut writer = GifFrameWriter::create(full, 8, 6, 5.0).unwrap();
        for shade in [0u8, 100, 200] {
            writer.write(&RgbImage::from_pixel(8, 6, Rgb([shade, shade, shade]))).unwrap();
        }
        let err = writer.finish().unwrap_err();
        assert!(format!("{err:#}").contains("failed to write GIF"));
    }
}
