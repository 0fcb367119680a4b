use anyhow::Result;
use image::RgbImage;

use crate::pose::backend::PoseBackend;
use crate::pose::result::{DetectionResult, Keypoint, Region};
use crate::pose::topology::Topology;

const SIMULATED_SCORE: f32 = 0.9;

/// COCO template as fractions of a person box: (x, y).
const COCO_TEMPLATE: [(f32, f32); 17] = [
    (0.50, 0.20), // nose
    (0.48, 0.18),
    (0.52, 0.18),
    (0.46, 0.20),
    (0.54, 0.20),
    (0.45, 0.35), // shoulders
    (0.55, 0.35),
    (0.42, 0.50),
    (0.58, 0.50),
    (0.40, 0.65),
    (0.60, 0.65),
    (0.46, 0.60), // hips
    (0.54, 0.60),
    (0.45, 0.75),
    (0.55, 0.75),
    (0.44, 0.90), // ankles
    (0.56, 0.90),
];

/// BlazePose template as fractions of a person box: (x, y).
const BLAZEPOSE_TEMPLATE: [(f32, f32); 33] = [
    (0.50, 0.20), // nose
    (0.49, 0.18),
    (0.48, 0.18),
    (0.47, 0.18),
    (0.51, 0.18),
    (0.52, 0.18),
    (0.53, 0.18),
    (0.46, 0.20),
    (0.54, 0.20),
    (0.49, 0.23),
    (0.51, 0.23),
    (0.45, 0.35), // shoulders
    (0.55, 0.35),
    (0.42, 0.50),
    (0.58, 0.50),
    (0.40, 0.65),
    (0.60, 0.65),
    (0.39, 0.68),
    (0.61, 0.68),
    (0.40, 0.69),
    (0.60, 0.69),
    (0.41, 0.67),
    (0.59, 0.67),
    (0.46, 0.60), // hips
    (0.54, 0.60),
    (0.45, 0.75),
    (0.55, 0.75),
    (0.44, 0.90), // ankles
    (0.56, 0.90),
    (0.43, 0.92),
    (0.57, 0.92),
    (0.45, 0.94),
    (0.55, 0.94),
];

/// Simulated backend for running without a model.
///
/// Produces a fixed upright-ish person template: one person centred in the
/// frame when no regions are given, otherwise one person per region.
pub struct SimulatedBackend {
    topology: Topology,
}

impl SimulatedBackend {
    pub fn new(topology: Topology) -> Self {
        Self { topology }
    }

    /// Simulated detection without going through the trait.
    pub fn simulate(&self, width: u32, height: u32, regions: &[Region]) -> DetectionResult {
        let boxes = if regions.is_empty() {
            vec![Region::full_frame(width, height)]
        } else {
            regions.to_vec()
        };
        let template: &[(f32, f32)] = match self.topology {
            Topology::Coco17 => &COCO_TEMPLATE,
            Topology::BlazePose33 => &BLAZEPOSE_TEMPLATE,
        };
        let keypoints: Vec<Vec<Keypoint>> = boxes
            .iter()
            .map(|region| {
                template
                    .iter()
                    .map(|(fx, fy)| {
                        [
                            region.x1 + fx * region.width(),
                            region.y1 + fy * region.height(),
                        ]
                    })
                    .collect()
            })
            .collect();
        let scores = vec![vec![SIMULATED_SCORE; template.len()]; keypoints.len()];
        // Template sizes are fixed per topology, so this cannot fail.
        DetectionResult::new(self.topology, width, height, keypoints, scores)
            .unwrap_or_else(|_| DetectionResult::empty(self.topology, width, height))
    }
}

impl PoseBackend for SimulatedBackend {
    fn name(&self) -> &'static str {
        "simulated"
    }

    fn topology(&self) -> Topology {
        self.topology
    }

    fn infer(&mut self, image: &RgbImage, regions: &[Region]) -> Result<DetectionResult> {
        Ok(self.simulate(image.width(), image.height(), regions))
    }
}
