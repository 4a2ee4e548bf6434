//! Frame sources and pixel normalization.
//!
//! - Normalization of capture layouts (gray, gray+alpha, RGB, NV12) to luma/RGB
//! - Local image files (offline runs)
//! - Synthetic silhouette scenes (tests, dry runs)
//!
//! Sources produce caller-owned `Frame`s. Nothing here stores frames to disk or
//! fetches remote URLs.

pub mod file;
pub(crate) mod normalize;
pub mod synthetic;

pub use file::{FileConfig, FileSource};
pub use normalize::PixelFormat;
pub use synthetic::{noise_frame, SceneBuilder, SyntheticSource};
