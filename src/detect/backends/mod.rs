pub mod contour;
pub mod hog;
pub mod pixel;

pub use contour::ContourTier;
pub use hog::{HogModel, HogPersonTier};
pub use pixel::PixelOccupancyTier;
