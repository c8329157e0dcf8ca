mod backend;
mod backends;

pub use backend::{GeoProjector, MIN_ALTITUDE_M};
pub use backends::NadirProjector;

#[cfg(feature = "accelerated")]
pub use backends::PoseProjector;

use crate::backend::{select_backend, BackendKind};
use crate::camera::CameraParams;

/// Build the projector selected by configuration.
pub fn build_projector(use_accelerated: bool, camera: CameraParams) -> Box<dyn GeoProjector> {
    match select_backend(use_accelerated, "geo projector") {
        #[cfg(feature = "accelerated")]
        BackendKind::Accelerated => Box::new(PoseProjector::new(camera)),
        _ => Box::new(NadirProjector::new(camera)),
    }
}
