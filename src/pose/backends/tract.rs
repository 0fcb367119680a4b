#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use image::RgbImage;
use tract_onnx::prelude::*;

use crate::pose::backend::PoseBackend;
use crate::pose::result::{DetectionResult, Keypoint, Region};
use crate::pose::topology::Topology;

const HEATMAP_INPUT_WIDTH: u32 = 192;
const HEATMAP_INPUT_HEIGHT: u32 = 256;
const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

const LANDMARK_INPUT_SIZE: u32 = 256;
const LANDMARK_STRIDE: usize = 5;
const PRESENCE_THRESHOLD: f32 = 0.5;

type Plan = TypedRunnableModel<TypedModel>;

fn load_plan(model_path: &Path, shape: [usize; 4]) -> Result<Plan> {
    let plan = tract_onnx::onnx()
        .model_for_path(model_path)
        .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
        .with_input_fact(
            0,
            InferenceFact::dt_shape(f32::datum_type(), tvec!(shape[0], shape[1], shape[2], shape[3])),
        )
        .context("failed to set input fact")?
        .into_optimized()
        .context("failed to optimize ONNX model")?
        .into_runnable()
        .context("failed to build runnable ONNX model")?;
    Ok(plan)
}

fn crop_region(image: &RgbImage, region: &Region) -> Result<(RgbImage, Region)> {
    let x1 = region.x1.clamp(0.0, image.width() as f32).floor() as u32;
    let y1 = region.y1.clamp(0.0, image.height() as f32).floor() as u32;
    let x2 = region.x2.clamp(0.0, image.width() as f32).ceil() as u32;
    let y2 = region.y2.clamp(0.0, image.height() as f32).ceil() as u32;
    if x2 <= x1 || y2 <= y1 {
        return Err(anyhow!(
            "region ({}, {}, {}, {}) is empty inside a {}x{} frame",
            region.x1,
            region.y1,
            region.x2,
            region.y2,
            image.width(),
            image.height()
        ));
    }
    let crop = imageops::crop_imm(image, x1, y1, x2 - x1, y2 - y1).to_image();
    Ok((crop, Region::new(x1 as f32, y1 as f32, x2 as f32, y2 as f32)))
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Top-down heatmap model (HRNet-style) producing COCO keypoints.
///
/// Input is 1x3x256x192 with ImageNet normalisation; output is one heatmap
/// per keypoint. One person is decoded per region.
pub struct TractHeatmapBackend {
    model: Plan,
}

impl TractHeatmapBackend {
    pub fn new<P: AsRef<Path>>(model_path: P) -> Result<Self> {
        let model = load_plan(
            model_path.as_ref(),
            [1, 3, HEATMAP_INPUT_HEIGHT as usize, HEATMAP_INPUT_WIDTH as usize],
        )?;
        Ok(Self { model })
    }

    fn build_input(&self, crop: &RgbImage) -> Tensor {
        let resized = imageops::resize(
            crop,
            HEATMAP_INPUT_WIDTH,
            HEATMAP_INPUT_HEIGHT,
            FilterType::Triangle,
        );
        tract_ndarray::Array4::from_shape_fn(
            (1, 3, HEATMAP_INPUT_HEIGHT as usize, HEATMAP_INPUT_WIDTH as usize),
            |(_, channel, y, x)| {
                let value = resized.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0;
                (value - IMAGENET_MEAN[channel]) / IMAGENET_STD[channel]
            },
        )
        .into_tensor()
    }

    fn decode_person(&self, outputs: TVec<TValue>, region: &Region) -> Result<(Vec<Keypoint>, Vec<f32>)> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let heatmaps = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?
            .into_dimensionality::<tract_ndarray::Ix4>()
            .context("heatmap output must be 4-dimensional")?;
        let (_, joints, rows, cols) = heatmaps.dim();
        let expected = Topology::Coco17.keypoint_count();
        if joints != expected {
            return Err(anyhow!(
                "heatmap model produced {} joints, expected {}",
                joints,
                expected
            ));
        }

        let mut keypoints = Vec::with_capacity(joints);
        let mut scores = Vec::with_capacity(joints);
        for joint in 0..joints {
            let mut best = (0usize, 0usize, f32::NEG_INFINITY);
            for y in 0..rows {
                for x in 0..cols {
                    let value = heatmaps[[0, joint, y, x]];
                    if value > best.2 {
                        best = (x, y, value);
                    }
                }
            }
            let (hx, hy, peak) = best;
            keypoints.push([
                region.x1 + (hx as f32 + 0.5) * region.width() / cols as f32,
                region.y1 + (hy as f32 + 0.5) * region.height() / rows as f32,
            ]);
            scores.push(if peak.is_finite() { peak } else { 0.0 });
        }
        Ok((keypoints, scores))
    }
}

impl PoseBackend for TractHeatmapBackend {
    fn name(&self) -> &'static str {
        "tract-heatmap"
    }

    fn topology(&self) -> Topology {
        Topology::Coco17
    }

    fn infer(&mut self, image: &RgbImage, regions: &[Region]) -> Result<DetectionResult> {
        let full = [Region::full_frame(image.width(), image.height())];
        let regions = if regions.is_empty() { &full[..] } else { regions };

        let mut keypoints = Vec::with_capacity(regions.len());
        let mut scores = Vec::with_capacity(regions.len());
        for region in regions {
            let (crop, clamped) = crop_region(image, region)?;
            let input = self.build_input(&crop);
            let outputs = self
                .model
                .run(tvec!(input.into()))
                .context("ONNX inference failed")?;
            let (kps, scs) = self.decode_person(outputs, &clamped)?;
            keypoints.push(kps);
            scores.push(scs);
        }
        DetectionResult::new(
            Topology::Coco17,
            image.width(),
            image.height(),
            keypoints,
            scores,
        )
    }
}

/// Single-person landmark model (BlazePose-style) producing 33 landmarks.
///
/// The model looks at the whole frame and yields at most one person. Region
/// hints are ignored.
pub struct TractLandmarkBackend {
    model: Plan,
}

impl TractLandmarkBackend {
    pub fn new<P: AsRef<Path>>(model_path: P) -> Result<Self> {
        let size = LANDMARK_INPUT_SIZE as usize;
        let model = load_plan(model_path.as_ref(), [1, size, size, 3])?;
        Ok(Self { model })
    }

    fn build_input(&self, image: &RgbImage) -> Tensor {
        let resized = imageops::resize(
            image,
            LANDMARK_INPUT_SIZE,
            LANDMARK_INPUT_SIZE,
            FilterType::Triangle,
        );
        let size = LANDMARK_INPUT_SIZE as usize;
        tract_ndarray::Array4::from_shape_fn((1, size, size, 3), |(_, y, x, channel)| {
            resized.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0
        })
        .into_tensor()
    }
}

impl PoseBackend for TractLandmarkBackend {
    fn name(&self) -> &'static str {
        "tract-landmark"
    }

    fn topology(&self) -> Topology {
        Topology::BlazePose33
    }

    fn infer(&mut self, image: &RgbImage, _regions: &[Region]) -> Result<DetectionResult> {
        let (width, height) = image.dimensions();
        let input = self.build_input(image);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;

        if let Some(presence) = outputs.get(1) {
            let logit = presence
                .to_array_view::<f32>()
                .context("presence output was not f32")?
                .iter()
                .copied()
                .next()
                .unwrap_or(f32::NEG_INFINITY);
            if sigmoid(logit) < PRESENCE_THRESHOLD {
                return Ok(DetectionResult::empty(Topology::BlazePose33, width, height));
            }
        }

        let landmarks = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?
            .to_array_view::<f32>()
            .context("landmark output was not f32")?
            .iter()
            .copied()
            .collect::<Vec<f32>>();
        let count = Topology::BlazePose33.keypoint_count();
        if landmarks.len() < count * LANDMARK_STRIDE {
            return Err(anyhow!(
                "landmark output has {} values, expected at least {}",
                landmarks.len(),
                count * LANDMARK_STRIDE
            ));
        }

        let sx = width as f32 / LANDMARK_INPUT_SIZE as f32;
        let sy = height as f32 / LANDMARK_INPUT_SIZE as f32;
        let mut keypoints = Vec::with_capacity(count);
        let mut scores = Vec::with_capacity(count);
        for chunk in landmarks.chunks_exact(LANDMARK_STRIDE).take(count) {
            keypoints.push([chunk[0] * sx, chunk[1] * sy]);
            scores.push(sigmoid(chunk[3]));
        }
        DetectionResult::new(
            Topology::BlazePose33,
            width,
            height,
            vec![keypoints],
            vec![scores],
        )
    }
}
