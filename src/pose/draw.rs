use font8x8::{UnicodeFonts, BASIC_FONTS};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_line_segment_mut};

use super::result::DetectionResult;

/// Colours and sizes for skeleton overlays.
#[derive(Clone, Copy, Debug)]
pub struct DrawStyle {
    pub skeleton_color: Rgb<u8>,
    pub keypoint_color: Rgb<u8>,
    pub text_color: Rgb<u8>,
    pub line_thickness: u32,
    pub keypoint_radius: i32,
    /// Caption glyphs are 8x8 cells scaled by this factor.
    pub text_scale: u32,
    pub caption_origin: (u32, u32),
}

impl Default for DrawStyle {
    fn default() -> Self {
        Self {
            skeleton_color: Rgb([0, 255, 0]),
            keypoint_color: Rgb([255, 0, 0]),
            text_color: Rgb([255, 255, 255]),
            line_thickness: 2,
            keypoint_radius: 4,
            text_scale: 2,
            caption_origin: (10, 14),
        }
    }
}

impl DrawStyle {
    /// Bounding box (x, y, width, height) a caption of `text` occupies.
    pub fn caption_bounds(&self, text: &str) -> (u32, u32, u32, u32) {
        let cell = 8 * self.text_scale;
        let (x, y) = self.caption_origin;
        (x, y, cell * text.chars().count() as u32, cell)
    }
}

pub fn person_caption(num_persons: usize) -> String {
    format!("Persons detected: {num_persons}")
}

/// Overlay skeletons, keypoints and the person-count caption on a copy.
pub fn draw_result(
    image: &RgbImage,
    result: &DetectionResult,
    threshold: f32,
    style: &DrawStyle,
) -> RgbImage {
    let mut canvas = image.clone();
    let edges = result.topology().skeleton();

    for (keypoints, scores) in result.persons() {
        for &(a, b) in edges {
            if scores[a] > threshold && scores[b] > threshold {
                draw_thick_line(&mut canvas, keypoints[a], keypoints[b], style);
            }
        }
        for (point, score) in keypoints.iter().zip(scores) {
            if *score > threshold {
                draw_filled_circle_mut(
                    &mut canvas,
                    (point[0].round() as i32, point[1].round() as i32),
                    style.keypoint_radius,
                    style.keypoint_color,
                );
            }
        }
    }

    draw_caption(
        &mut canvas,
        &person_caption(result.num_persons()),
        style.caption_origin,
        style.text_scale,
        style.text_color,
    );
    canvas
}

fn draw_thick_line(canvas: &mut RgbImage, from: [f32; 2], to: [f32; 2], style: &DrawStyle) {
    let dx = to[0] - from[0];
    let dy = to[1] - from[1];
    let len = (dx * dx + dy * dy).sqrt();
    let (nx, ny) = if len > f32::EPSILON {
        (-dy / len, dx / len)
    } else {
        (0.0, 0.0)
    };
    let thickness = style.line_thickness.max(1);
    for step in 0..thickness {
        let offset = step as f32 - (thickness - 1) as f32 / 2.0;
        draw_line_segment_mut(
            canvas,
            (from[0] + nx * offset, from[1] + ny * offset),
            (to[0] + nx * offset, to[1] + ny * offset),
            style.skeleton_color,
        );
    }
}

/// Render `text` with the built-in 8x8 bitmap font. Pixels outside the
/// canvas are skipped; unknown characters render as blanks.
pub fn draw_caption(canvas: &mut RgbImage, text: &str, origin: (u32, u32), scale: u32, color: Rgb<u8>) {
    let scale = scale.max(1);
    let (width, height) = canvas.dimensions();
    for (index, ch) in text.chars().enumerate() {
        let Some(glyph) = BASIC_FONTS.get(ch) else {
            continue;
        };
        let cell_x = origin.0 + index as u32 * 8 * scale;
        for (row, bits) in glyph.iter().enumerate() {
            for col in 0..8u32 {
                if bits & (1 << col) == 0 {
                    continue;
                }
                for sy in 0..scale {
                    for sx in 0..scale {
                        let x = cell_x + col * scale + sx;
                        let y = origin.1 + row as u32 * scale + sy;
                        if x < width && y < height {
                            canvas.put_pixel(x, y, color);
                        }
                    }
                }
            }
        }
    }
}
