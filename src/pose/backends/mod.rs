pub mod simulated;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use simulated::SimulatedBackend;

#[cfg(feature = "backend-tract")]
pub use tract::{TractHeatmapBackend, TractLandmarkBackend};

use anyhow::Result;

use super::backend::PoseBackend;
use crate::config::PoseSettings;

/// Build the backend named by configuration.
///
/// Without a model path the simulated backend is used. A model path requires
/// the `backend-tract` feature; load failures are returned, not papered over.
pub fn build_backend(settings: &PoseSettings) -> Result<Box<dyn PoseBackend>> {
    let Some(model_path) = settings.model_path.as_ref() else {
        log::warn!(
            "no pose model configured; using simulated {} detections",
            settings.topology
        );
        return Ok(Box::new(SimulatedBackend::new(settings.topology)));
    };

    #[cfg(feature = "backend-tract")]
    {
        use crate::pose::topology::Topology;

        let mut backend: Box<dyn PoseBackend> = match settings.topology {
            Topology::Coco17 => Box::new(TractHeatmapBackend::new(model_path)?),
            Topology::BlazePose33 => Box::new(TractLandmarkBackend::new(model_path)?),
        };
        backend.warm_up()?;
        log::info!(
            "pose backend {} loaded from {} on {}",
            backend.name(),
            model_path.display(),
            settings.device
        );
        Ok(backend)
    }
    #[cfg(not(feature = "backend-tract"))]
    {
        Err(anyhow::anyhow!(
            "pose model {} requires the backend-tract feature",
            model_path.display()
        ))
    }
}
