//! Coarse posture heuristic.
//!
//! The thresholds have no calibration data behind them. They are kept as
//! configuration so deployments can tune them; the defaults reproduce the
//! values the relay has always shipped with.

use serde::Deserialize;

use super::result::Keypoint;
use super::topology::Topology;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Posture {
    Upright,
    BentSitting,
    FallenCrouched,
}

impl Posture {
    pub fn label(self) -> &'static str {
        match self {
            Posture::Upright => "upright",
            Posture::BentSitting => "bent/sitting",
            Posture::FallenCrouched => "fallen/crouched",
        }
    }
}

impl std::fmt::Display for Posture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct PostureThresholds {
    /// Head-to-ankle span in pixels below which a person counts as down.
    pub min_span_px: f32,
    /// Coco17: torso/span ratio above which a person is upright.
    pub upright_ratio: f32,
    /// Coco17: torso/span ratio above which a person is bent or sitting.
    pub bent_ratio: f32,
    /// BlazePose33: leg/torso ratio above which a person is upright.
    pub upright_leg_ratio: f32,
    /// BlazePose33: leg/torso ratio above which a person is bent or sitting.
    pub bent_leg_ratio: f32,
}

impl Default for PostureThresholds {
    fn default() -> Self {
        Self {
            min_span_px: 100.0,
            upright_ratio: 0.4,
            bent_ratio: 0.25,
            upright_leg_ratio: 1.2,
            bent_leg_ratio: 0.6,
        }
    }
}

fn midpoint(a: Keypoint, b: Keypoint) -> Keypoint {
    [(a[0] + b[0]) / 2.0, (a[1] + b[1]) / 2.0]
}

fn distance(a: Keypoint, b: Keypoint) -> f32 {
    ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2)).sqrt()
}

/// Classify one person. `keypoints` must follow `topology`.
pub fn classify_person(
    topology: Topology,
    keypoints: &[Keypoint],
    thresholds: &PostureThresholds,
) -> Posture {
    let lm = topology.posture_landmarks();
    let shoulder_mid = midpoint(keypoints[lm.left_shoulder], keypoints[lm.right_shoulder]);
    let hip_mid = midpoint(keypoints[lm.left_hip], keypoints[lm.right_hip]);
    let ankle_mid = midpoint(keypoints[lm.left_ankle], keypoints[lm.right_ankle]);

    let torso = distance(shoulder_mid, hip_mid);
    let span = distance(keypoints[lm.head], ankle_mid);
    if span < thresholds.min_span_px {
        return Posture::FallenCrouched;
    }

    match topology {
        Topology::Coco17 => {
            let ratio = torso / span;
            if ratio > thresholds.upright_ratio {
                Posture::Upright
            } else if ratio > thresholds.bent_ratio {
                Posture::BentSitting
            } else {
                Posture::FallenCrouched
            }
        }
        Topology::BlazePose33 => {
            if torso <= f32::EPSILON {
                return Posture::FallenCrouched;
            }
            let ratio = distance(hip_mid, ankle_mid) / torso;
            if ratio > thresholds.upright_leg_ratio {
                Posture::Upright
            } else if ratio > thresholds.bent_leg_ratio {
                Posture::BentSitting
            } else {
                Posture::FallenCrouched
            }
        }
    }
}
