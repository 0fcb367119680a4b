use anyhow::Result;
use image::RgbImage;

use super::result::{DetectionResult, Region};
use super::topology::Topology;

/// Pose backend trait.
///
/// One implementation is selected at startup from configuration and stays in
/// place for the life of the process. Implementations return raw detections;
/// confidence filtering happens at draw/classify time.
pub trait PoseBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Keypoint layout this backend produces.
    fn topology(&self) -> Topology;

    /// Run inference on an RGB frame.
    ///
    /// With an empty `regions` slice the backend decides how to find people
    /// (whole frame as one region, or its own person finder).
    fn infer(&mut self, image: &RgbImage, regions: &[Region]) -> Result<DetectionResult>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
