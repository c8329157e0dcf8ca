pub mod nadir;

#[cfg(feature = "accelerated")]
pub mod pose;

pub use nadir::NadirProjector;

#[cfg(feature = "accelerated")]
pub use pose::PoseProjector;
