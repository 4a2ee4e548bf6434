use anyhow::Result;
use image::GrayImage;

use crate::detect::result::{DetectionMethod, TierEstimate};

/// One strategy in the person-count cascade.
///
/// # Contract
///
/// - `Ok(Some(_))` is authoritative and stops the cascade.
/// - `Ok(None)` means the tier ran but has no confident answer; the next tier runs.
/// - `Err(_)` is a transient failure of this tier only; the next tier runs.
///
/// Implementations receive the analysis frame read-only and must not keep it
/// past the call, write to disk, or make network requests.
pub trait DetectionTier: Send + Sync {
    /// Tier identifier for logs.
    fn name(&self) -> &'static str;

    /// Method reported when this tier answers.
    fn method(&self) -> DetectionMethod;

    /// Estimate the number of people in `frame`.
    fn attempt(&self, frame: &GrayImage) -> Result<Option<TierEstimate>>;
}
