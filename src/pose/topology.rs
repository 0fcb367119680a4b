use anyhow::{anyhow, Result};

/// COCO body keypoints, in model output order.
pub const COCO_KEYPOINTS: [&str; 17] = [
    "nose",
    "left_eye",
    "right_eye",
    "left_ear",
    "right_ear",
    "left_shoulder",
    "right_shoulder",
    "left_elbow",
    "right_elbow",
    "left_wrist",
    "right_wrist",
    "left_hip",
    "right_hip",
    "left_knee",
    "right_knee",
    "left_ankle",
    "right_ankle",
];

pub const COCO_SKELETON: [(usize, usize); 16] = [
    // head
    (0, 1),
    (0, 2),
    (1, 3),
    (2, 4),
    // arms
    (5, 6),
    (5, 7),
    (7, 9),
    (6, 8),
    (8, 10),
    // torso
    (5, 11),
    (6, 12),
    (11, 12),
    // legs
    (11, 13),
    (13, 15),
    (12, 14),
    (14, 16),
];

/// BlazePose landmarks, in model output order.
pub const BLAZEPOSE_LANDMARKS: [&str; 33] = [
    "nose",
    "left_eye_inner",
    "left_eye",
    "left_eye_outer",
    "right_eye_inner",
    "right_eye",
    "right_eye_outer",
    "left_ear",
    "right_ear",
    "mouth_left",
    "mouth_right",
    "left_shoulder",
    "right_shoulder",
    "left_elbow",
    "right_elbow",
    "left_wrist",
    "right_wrist",
    "left_pinky",
    "right_pinky",
    "left_index",
    "right_index",
    "left_thumb",
    "right_thumb",
    "left_hip",
    "right_hip",
    "left_knee",
    "right_knee",
    "left_ankle",
    "right_ankle",
    "left_heel",
    "right_heel",
    "left_foot_index",
    "right_foot_index",
];

pub const BLAZEPOSE_SKELETON: [(usize, usize); 35] = [
    // face
    (0, 1),
    (1, 2),
    (2, 3),
    (3, 7),
    (0, 4),
    (4, 5),
    (5, 6),
    (6, 8),
    (9, 10),
    // arms and hands
    (11, 12),
    (11, 13),
    (13, 15),
    (15, 17),
    (15, 19),
    (15, 21),
    (17, 19),
    (12, 14),
    (14, 16),
    (16, 18),
    (16, 20),
    (16, 22),
    (18, 20),
    // torso
    (11, 23),
    (12, 24),
    (23, 24),
    // legs and feet
    (23, 25),
    (24, 26),
    (25, 27),
    (26, 28),
    (27, 29),
    (28, 30),
    (29, 31),
    (30, 32),
    (27, 31),
    (28, 32),
];

/// Keypoint indices the posture heuristic reads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PostureLandmarks {
    pub head: usize,
    pub left_shoulder: usize,
    pub right_shoulder: usize,
    pub left_hip: usize,
    pub right_hip: usize,
    pub left_ankle: usize,
    pub right_ankle: usize,
}

/// Skeleton layout produced by a pose backend.
///
/// A deployment runs exactly one topology. Results from different topologies
/// have different keypoint counts and index meanings and are never mixed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Topology {
    /// 17-point COCO layout (top-down heatmap models, MMPose style).
    Coco17,
    /// 33-point BlazePose layout (MediaPipe style).
    BlazePose33,
}

impl Topology {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "coco17" | "coco" | "mmpose" => Ok(Topology::Coco17),
            "blazepose33" | "blazepose" | "mediapipe" => Ok(Topology::BlazePose33),
            other => Err(anyhow!(
                "unknown pose topology '{}' (expected coco17 or blazepose33)",
                other
            )),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Topology::Coco17 => "coco17",
            Topology::BlazePose33 => "blazepose33",
        }
    }

    pub fn keypoint_count(self) -> usize {
        self.keypoint_names().len()
    }

    pub fn keypoint_names(self) -> &'static [&'static str] {
        match self {
            Topology::Coco17 => &COCO_KEYPOINTS,
            Topology::BlazePose33 => &BLAZEPOSE_LANDMARKS,
        }
    }

    pub fn skeleton(self) -> &'static [(usize, usize)] {
        match self {
            Topology::Coco17 => &COCO_SKELETON,
            Topology::BlazePose33 => &BLAZEPOSE_SKELETON,
        }
    }

    pub fn posture_landmarks(self) -> PostureLandmarks {
        match self {
            Topology::Coco17 => PostureLandmarks {
                head: 0,
                left_shoulder: 5,
                right_shoulder: 6,
                left_hip: 11,
                right_hip: 12,
                left_ankle: 15,
                right_ankle: 16,
            },
            Topology::BlazePose33 => PostureLandmarks {
                head: 0,
                left_shoulder: 11,
                right_shoulder: 12,
                left_hip: 23,
                right_hip: 24,
                left_ankle: 27,
                right_ankle: 28,
            },
        }
    }

    /// Index of a named keypoint in this topology.
    pub fn index_of(self, name: &str) -> Option<usize> {
        self.keypoint_names().iter().position(|n| *n == name)
    }
}

impl std::fmt::Display for Topology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skeleton_edges_stay_in_range() {
        for topology in [Topology::Coco17, Topology::BlazePose33] {
            let count = topology.keypoint_count();
            for &(a, b) in topology.skeleton() {
                assert!(a < count && b < count, "{topology}: edge ({a}, {b})");
            }
        }
    }

    #[test]
    fn posture_landmarks_match_names() {
        for topology in [Topology::Coco17, Topology::BlazePose33] {
            let lm = topology.posture_landmarks();
            assert_eq!(topology.index_of("nose"), Some(lm.head));
            assert_eq!(topology.index_of("left_shoulder"), Some(lm.left_shoulder));
            assert_eq!(topology.index_of("right_hip"), Some(lm.right_hip));
            assert_eq!(topology.index_of("right_ankle"), Some(lm.right_ankle));
        }
    }

    #[test]
    fn parses_aliases() {
        assert_eq!(Topology::parse("MMPose").unwrap(), Topology::Coco17);
        assert_eq!(Topology::parse("mediapipe").unwrap(), Topology::BlazePose33);
        assert!(Topology::parse("openpose").is_err());
    }
}
