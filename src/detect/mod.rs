mod backend;
mod backends;
mod registry;
mod result;
pub mod roi;

pub use backend::DetectionTier;
pub use backends::{ContourTier, HogModel, HogPersonTier, PixelOccupancyTier};
pub use registry::PersonEstimator;
pub use result::{non_max_suppression, BoundingBox, DetectionMethod, TierEstimate};
pub use roi::RoiDetector;
