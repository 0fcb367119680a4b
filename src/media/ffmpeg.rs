//! FFmpeg-backed video decode and MPEG-4 encode.

use anyhow::{anyhow, Context, Result};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::software::scaling::{context::Context as Scaler, flag::Flags};
use ffmpeg_next::util::format::pixel::Pixel;
use image::{imageops, RgbImage};
use std::path::Path;

pub(crate) struct FfmpegFrameReader {
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: Scaler,
    fps: f32,
    frames_hint: Option<usize>,
    eof_sent: bool,
}

impl FfmpegFrameReader {
    pub(crate) fn open(path: &Path) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let input = ffmpeg::format::input(&path)
            .with_context(|| format!("failed to open video '{}' with ffmpeg", path.display()))?;
        let stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow!("{} has no video track", path.display()))?;
        let stream_index = stream.index();
        let mut rate = stream.avg_frame_rate();
        if rate.numerator() == 0 || rate.denominator() == 0 {
            rate = stream.rate();
        }
        let fps = if rate.numerator() > 0 && rate.denominator() > 0 {
            f64::from(rate) as f32
        } else {
            25.0
        };
        let frames_hint = usize::try_from(stream.frames()).ok().filter(|n| *n > 0);

        let context = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;
        let scaler = Scaler::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        Ok(Self {
            input,
            stream_index,
            decoder,
            scaler,
            fps,
            frames_hint,
            eof_sent: false,
        })
    }

    pub(crate) fn fps(&self) -> f32 {
        self.fps
    }

    pub(crate) fn dimensions(&self) -> (u32, u32) {
        (self.decoder.width(), self.decoder.height())
    }

    pub(crate) fn frame_count_hint(&self) -> Option<usize> {
        self.frames_hint
    }

    pub(crate) fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        let mut decoded = ffmpeg::frame::Video::empty();
        loop {
            match self.decoder.receive_frame(&mut decoded) {
                Ok(()) => {
                    let mut rgb = ffmpeg::frame::Video::empty();
                    self.scaler
                        .run(&decoded, &mut rgb)
                        .context("scale frame to RGB")?;
                    return frame_to_image(&rgb).map(Some);
                }
                Err(ffmpeg::Error::Eof) => return Ok(None),
                Err(err) if is_again(&err) => {}
                Err(err) => return Err(err).context("decode video frame"),
            }
            if self.eof_sent {
                return Ok(None);
            }
            let next = self
                .input
                .packets()
                .next()
                .map(|(stream, packet)| (stream.index(), packet));
            match next {
                Some((index, packet)) if index == self.stream_index => {
                    self.decoder
                        .send_packet(&packet)
                        .context("send packet to ffmpeg decoder")?;
                }
                Some(_) => {}
                None => {
                    self.decoder.send_eof().context("flush ffmpeg decoder")?;
                    self.eof_sent = true;
                }
            }
        }
    }
}

fn frame_to_image(frame: &ffmpeg::frame::Video) -> Result<RgbImage> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        pixels.extend_from_slice(
            data.get(start..start + row_bytes)
                .context("ffmpeg frame row is out of bounds")?,
        );
    }
    RgbImage::from_raw(width, height, pixels)
        .ok_or_else(|| anyhow!("decoded frame does not fit {}x{}", width, height))
}

pub(crate) struct FfmpegFrameWriter {
    output: ffmpeg::format::context::Output,
    encoder: ffmpeg::encoder::Video,
    scaler: Scaler,
    stream_index: usize,
    encoder_time_base: ffmpeg::Rational,
    width: u32,
    height: u32,
    next_pts: i64,
}

impl FfmpegFrameWriter {
    pub(crate) fn create(path: &Path, width: u32, height: u32, fps: f32) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let mut output = ffmpeg::format::output(&path)
            .with_context(|| format!("failed to create video '{}'", path.display()))?;
        let global_header = output
            .format()
            .flags()
            .contains(ffmpeg::format::Flags::GLOBAL_HEADER);

        let codec = ffmpeg::encoder::find(ffmpeg::codec::Id::MPEG4)
            .ok_or_else(|| anyhow!("ffmpeg has no MPEG-4 encoder"))?;
        let (numer, denom) = super::frame_rate_ratio(fps);
        let frame_rate = ffmpeg::Rational::new(numer, denom);
        let encoder_time_base = frame_rate.invert();

        let mut stream = output.add_stream(codec).context("add video stream")?;
        let stream_index = stream.index();

        let mut encoder = ffmpeg::codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()
            .context("create MPEG-4 encoder")?;
        encoder.set_width(width);
        encoder.set_height(height);
        encoder.set_format(Pixel::YUV420P);
        encoder.set_time_base(encoder_time_base);
        encoder.set_frame_rate(Some(frame_rate));
        encoder.set_bit_rate(2_000_000);
        if global_header {
            encoder.set_flags(ffmpeg::codec::Flags::GLOBAL_HEADER);
        }
        let encoder = encoder.open_as(codec).context("open MPEG-4 encoder")?;
        stream.set_parameters(&encoder);
        stream.set_time_base(encoder_time_base);

        output.write_header().context("write container header")?;

        let scaler = Scaler::get(
            Pixel::RGB24,
            width,
            height,
            Pixel::YUV420P,
            width,
            height,
            Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        Ok(Self {
            output,
            encoder,
            scaler,
            stream_index,
            encoder_time_base,
            width,
            height,
            next_pts: 0,
        })
    }

    pub(crate) fn write(&mut self, frame: &RgbImage) -> Result<()> {
        let resized;
        let frame = if frame.dimensions() == (self.width, self.height) {
            frame
        } else {
            resized = imageops::resize(frame, self.width, self.height, imageops::FilterType::Triangle);
            &resized
        };

        let mut rgb = ffmpeg::frame::Video::new(Pixel::RGB24, self.width, self.height);
        let row_bytes = self.width as usize * 3;
        let stride = rgb.stride(0);
        let raw = frame.as_raw();
        let data = rgb.data_mut(0);
        for row in 0..self.height as usize {
            data[row * stride..row * stride + row_bytes]
                .copy_from_slice(&raw[row * row_bytes..(row + 1) * row_bytes]);
        }

        let mut yuv = ffmpeg::frame::Video::empty();
        self.scaler
            .run(&rgb, &mut yuv)
            .context("convert frame to YUV420P")?;
        yuv.set_pts(Some(self.next_pts));
        self.next_pts += 1;

        self.encoder
            .send_frame(&yuv)
            .context("send frame to encoder")?;
        self.drain_packets()
    }

    pub(crate) fn finish(mut self) -> Result<()> {
        self.encoder.send_eof().context("flush encoder")?;
        self.drain_packets()?;
        self.output
            .write_trailer()
            .context("write container trailer")?;
        Ok(())
    }

    fn drain_packets(&mut self) -> Result<()> {
        let stream_time_base = self
            .output
            .stream(self.stream_index)
            .map(|stream| stream.time_base())
            .ok_or_else(|| anyhow!("output stream {} missing", self.stream_index))?;
        let mut packet = ffmpeg::Packet::empty();
        loop {
            match self.encoder.receive_packet(&mut packet) {
                Ok(()) => {}
                Err(ffmpeg::Error::Eof) => return Ok(()),
                Err(err) if is_again(&err) => return Ok(()),
                Err(err) => return Err(err).context("encode video frame"),
            }
            packet.set_stream(self.stream_index);
            packet.rescale_ts(self.encoder_time_base, stream_time_base);
            packet
                .write_interleaved(&mut self.output)
                .context("write video packet")?;
        }
    }
}

/// The codec wants more input before it can produce output.
fn is_again(err: &ffmpeg::Error) -> bool {
    matches!(err, ffmpeg::Error::Other { errno } if *errno == ffmpeg::util::error::EAGAIN)
}
