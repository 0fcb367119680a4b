//! Pose estimation: backends, results, skeleton overlay and posture labels.

pub mod backend;
pub mod backends;
pub mod classify;
pub mod detector;
pub mod draw;
pub mod result;
pub mod topology;

pub use backend::PoseBackend;
pub use backends::{build_backend, SimulatedBackend};
pub use classify::{classify_person, Posture, PostureThresholds};
pub use detector::{Fallback, PoseDetector};
pub use draw::DrawStyle;
pub use result::{DetectionResult, Keypoint, PoseStats, Region};
pub use topology::Topology;
