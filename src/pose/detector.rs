use anyhow::Result;
use image::RgbImage;
use serde::Deserialize;

use super::backend::PoseBackend;
use super::backends::{build_backend, SimulatedBackend};
use super::classify::{classify_person, Posture, PostureThresholds};
use super::draw::{draw_result, DrawStyle};
use super::result::{DetectionResult, PoseStats, Region};
use super::topology::Topology;
use crate::config::PoseSettings;

/// What `detect` returns when the backend fails.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Fallback {
    #[default]
    Simulated,
    Empty,
}

impl Fallback {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "simulated" => Some(Fallback::Simulated),
            "empty" => Some(Fallback::Empty),
            _ => None,
        }
    }
}

pub struct PoseDetector {
    backend: Box<dyn PoseBackend>,
    conf_threshold: f32,
    thresholds: PostureThresholds,
    fallback: Fallback,
    style: DrawStyle,
}

impl PoseDetector {
    pub fn new(backend: Box<dyn PoseBackend>, conf_threshold: f32) -> Self {
        Self {
            backend,
            conf_threshold,
            thresholds: PostureThresholds::default(),
            fallback: Fallback::default(),
            style: DrawStyle::default(),
        }
    }

    /// Detector with the configured backend, threshold and policies.
    pub fn from_settings(settings: &PoseSettings) -> Result<Self> {
        let backend = build_backend(settings)?;
        Ok(Self::new(backend, settings.conf_threshold)
            .with_thresholds(settings.thresholds)
            .with_fallback(settings.fallback))
    }

    pub fn with_thresholds(mut self, thresholds: PostureThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn with_fallback(mut self, fallback: Fallback) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn with_style(mut self, style: DrawStyle) -> Self {
        self.style = style;
        self
    }

    pub fn topology(&self) -> Topology {
        self.backend.topology()
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn conf_threshold(&self) -> f32 {
        self.conf_threshold
    }

    /// Run the backend. Errors are logged and replaced by the fallback
    /// result; this never fails.
    pub fn detect(&mut self, image: &RgbImage, regions: Option<&[Region]>) -> DetectionResult {
        let regions = regions.unwrap_or(&[]);
        match self.backend.infer(image, regions) {
            Ok(result) => result,
            Err(err) => {
                log::error!(
                    "pose backend {} failed: {:#}; using {:?} fallback",
                    self.backend.name(),
                    err,
                    self.fallback
                );
                let (width, height) = image.dimensions();
                let topology = self.backend.topology();
                match self.fallback {
                    Fallback::Simulated => {
                        SimulatedBackend::new(topology).simulate(width, height, regions)
                    }
                    Fallback::Empty => DetectionResult::empty(topology, width, height),
                }
            }
        }
    }

    /// Annotated copy of `image`. `None` returns the image unchanged.
    pub fn draw(&self, image: &RgbImage, result: Option<&DetectionResult>) -> RgbImage {
        match result {
            Some(result) => draw_result(image, result, self.conf_threshold, &self.style),
            None => image.clone(),
        }
    }

    pub fn classify(&self, result: &DetectionResult) -> Vec<Posture> {
        result
            .keypoints()
            .iter()
            .map(|kps| classify_person(result.topology(), kps, &self.thresholds))
            .collect()
    }

    pub fn summarize(&self, result: &DetectionResult) -> PoseStats {
        PoseStats::from_result(result)
    }

    pub fn describe(&self) -> String {
        format!(
            "{} ({}, threshold {:.2})",
            self.backend.name(),
            self.backend.topology(),
            self.conf_threshold
        )
    }
}
