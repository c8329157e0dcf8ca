mod backend;
mod backends;

pub use backend::{SmoothedDetection, TrackSmoother, TrackState, TrackerParams};
pub use backends::BBoxSmoother;

#[cfg(feature = "accelerated")]
pub use backends::FastBBoxSmoother;

use crate::backend::{select_backend, BackendKind};

/// Build the smoother selected by configuration. One instance per camera stream.
pub fn build_smoother(use_accelerated: bool, params: TrackerParams) -> Box<dyn TrackSmoother> {
    match select_backend(use_accelerated, "bbox smoother") {
        #[cfg(feature = "accelerated")]
        BackendKind::Accelerated => Box::new(FastBBoxSmoother::new(params)),
        _ => Box::new(BBoxSmoother::new(params)),
    }
}
