use anyhow::{anyhow, Result};

use super::topology::Topology;

/// A 2D keypoint in source-image pixels.
pub type Keypoint = [f32; 2];

/// Person region in source-image pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Region {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl Region {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Region covering the whole frame.
    pub fn full_frame(width: u32, height: u32) -> Self {
        Self::new(0.0, 0.0, width as f32, height as f32)
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }
}

/// Raw output of one detection pass.
///
/// Fields are private so the per-person invariants hold for every value:
/// `keypoints` and `scores` have one entry per person in the same order, and
/// every entry has exactly `topology.keypoint_count()` elements. No confidence
/// threshold is applied here.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectionResult {
    topology: Topology,
    width: u32,
    height: u32,
    keypoints: Vec<Vec<Keypoint>>,
    scores: Vec<Vec<f32>>,
}

impl DetectionResult {
    pub fn new(
        topology: Topology,
        width: u32,
        height: u32,
        keypoints: Vec<Vec<Keypoint>>,
        scores: Vec<Vec<f32>>,
    ) -> Result<Self> {
        if keypoints.len() != scores.len() {
            return Err(anyhow!(
                "keypoint list has {} persons but score list has {}",
                keypoints.len(),
                scores.len()
            ));
        }
        let expected = topology.keypoint_count();
        for (person, (kps, scs)) in keypoints.iter().zip(&scores).enumerate() {
            if kps.len() != expected || scs.len() != expected {
                return Err(anyhow!(
                    "person {} has {} keypoints and {} scores; {} expects {}",
                    person,
                    kps.len(),
                    scs.len(),
                    topology,
                    expected
                ));
            }
        }
        Ok(Self {
            topology,
            width,
            height,
            keypoints,
            scores,
        })
    }

    /// Zero-person result.
    pub fn empty(topology: Topology, width: u32, height: u32) -> Self {
        Self {
            topology,
            width,
            height,
            keypoints: Vec::new(),
            scores: Vec::new(),
        }
    }

    pub fn topology(&self) -> Topology {
        self.topology
    }

    /// Source image dimensions as (width, height).
    pub fn image_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn num_persons(&self) -> usize {
        self.keypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }

    pub fn keypoints(&self) -> &[Vec<Keypoint>] {
        &self.keypoints
    }

    pub fn scores(&self) -> &[Vec<f32>] {
        &self.scores
    }

    /// Iterate persons as (keypoints, scores) pairs.
    pub fn persons(&self) -> impl Iterator<Item = (&[Keypoint], &[f32])> {
        self.keypoints
            .iter()
            .zip(&self.scores)
            .map(|(k, s)| (k.as_slice(), s.as_slice()))
    }
}

/// Summary returned by `PoseDetector::summarize`.
#[derive(Clone, Debug, PartialEq)]
pub struct PoseStats {
    pub num_persons: usize,
    pub total_keypoints: usize,
    /// Mean of per-person mean scores; 0.0 with no persons.
    pub avg_confidence: f32,
    pub keypoints_per_person: usize,
}

impl PoseStats {
    pub fn from_result(result: &DetectionResult) -> Self {
        let total_keypoints = result.keypoints().iter().map(Vec::len).sum();
        let per_person: Vec<f32> = result
            .scores()
            .iter()
            .filter(|s| !s.is_empty())
            .map(|s| s.iter().sum::<f32>() / s.len() as f32)
            .collect();
        let avg_confidence = if per_person.is_empty() {
            0.0
        } else {
            per_person.iter().sum::<f32>() / per_person.len() as f32
        };
        Self {
            num_persons: result.num_persons(),
            total_keypoints,
            avg_confidence,
            keypoints_per_person: result.topology().keypoint_count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person(topology: Topology, score: f32) -> (Vec<Keypoint>, Vec<f32>) {
        let n = topology.keypoint_count();
        (vec![[1.0, 2.0]; n], vec![score; n])
    }

    #[test]
    fn rejects_mismatched_person_lists() {
        let (kps, scores) = person(Topology::Coco17, 0.9);
        let err = DetectionResult::new(Topology::Coco17, 10, 10, vec![kps.clone(), kps], vec![scores])
            .unwrap_err();
        assert!(err.to_string().contains("2 persons"));
    }

    #[test]
    fn rejects_wrong_topology_size() {
        let (kps, scores) = person(Topology::Coco17, 0.9);
        let result = DetectionResult::new(Topology::BlazePose33, 10, 10, vec![kps], vec![scores]);
        assert!(result.is_err());
    }

    #[test]
    fn stats_average_per_person_means() {
        let (k1, s1) = person(Topology::Coco17, 0.8);
        let (k2, s2) = person(Topology::Coco17, 0.4);
        let result =
            DetectionResult::new(Topology::Coco17, 10, 10, vec![k1, k2], vec![s1, s2]).unwrap();
        let stats = PoseStats::from_result(&result);
        assert_eq!(stats.num_persons, 2);
        assert_eq!(stats.total_keypoints, 34);
        assert_eq!(stats.keypoints_per_person, 17);
        assert!((stats.avg_confidence - 0.6).abs() < 1e-5);
    }

    #[test]
    fn empty_result_has_zero_confidence() {
        let stats = PoseStats::from_result(&DetectionResult::empty(Topology::BlazePose33, 4, 4));
        assert_eq!(stats.num_persons, 0);
        assert_eq!(stats.avg_confidence, 0.0);
        assert_eq!(stats.keypoints_per_person, 33);
    }
}
