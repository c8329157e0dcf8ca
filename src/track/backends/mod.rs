pub mod reference;

#[cfg(feature = "accelerated")]
pub mod fast;

pub use reference::BBoxSmoother;

#[cfg(feature = "accelerated")]
pub use fast::FastBBoxSmoother;
