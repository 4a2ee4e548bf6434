//! Crowd frame preprocessing core
//!
//! Local, in-memory analysis that runs on every captured frame before (or
//! instead of) an expensive external vision API call.
//!
//! # Pipeline
//!
//! 1. **Motion**: blurred frame difference against the previous frame of the
//!    same source, classified none / low / medium / high.
//! 2. **Person estimate**: an ordered cascade of detection tiers (HOG
//!    pedestrian detector, contour heuristic, pixel occupancy). The first tier
//!    with an authoritative answer wins.
//! 3. **Regions of interest**: an independent count of person-shaped regions,
//!    used only to corroborate the cascade.
//! 4. **Decision**: confidence from tier, agreement and motion; frames that are
//!    both confident and stable are resolved locally.
//!
//! # Module Structure
//!
//! - `frame`: caller-owned frames and analysis-image derivation
//! - `ingest`: pixel normalization, file and synthetic frame sources
//! - `motion`: per-source motion estimation
//! - `detect`: detection tiers, the cascade and the ROI pass
//! - `engine`: `PreprocessingService`, the public entry point
//! - `quality`, `upload`: frame metrics and upload preparation
//! - `source`, `stats`: per-source state and service counters

use std::sync::OnceLock;

pub mod config;
pub mod detect;
pub mod engine;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod motion;
pub mod quality;
pub mod source;
mod stats;
pub mod upload;

pub use config::PreprocessConfig;
pub use detect::{DetectionMethod, DetectionTier, PersonEstimator, TierEstimate};
pub use engine::{
    confidence_score, decision_reasons, DecisionReason, LocalAnalysisResult, PreprocessingService,
};
pub use error::PreprocessError;
pub use frame::{Frame, PixelFormat};
pub use motion::{MotionEstimate, MotionEstimator, MotionLevel};
pub use quality::{CrowdDensity, FrameQuality};
pub use source::SourceStatistics;
pub use stats::AggregateStatistics;

/// Validate a source identifier.
///
/// Allowed: "cam_A", "gate-3", "site.north:entrance"
/// Disallowed: empty ids, whitespace, slashes, anything over 128 bytes.
pub fn validate_source_id(source_id: &str) -> Result<(), PreprocessError> {
    // Compile once for hot paths.
    static SOURCE_ID_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = SOURCE_ID_RE
        .get_or_init(|| regex::Regex::new(r"^[A-Za-z0-9_.:-]{1,128}$").expect("valid pattern"));

    if !re.is_match(source_id) {
        return Err(PreprocessError::InvalidInput(format!(
            "source id {:?} must match ^[A-Za-z0-9_.:-]{{1,128}}$",
            source_id
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_id_allowlist() {
        for ok in ["cam_A", "gate-3", "site.north:entrance", "Z"] {
            validate_source_id(ok).unwrap();
        }
        let too_long = "a".repeat(129);
        for bad in ["", "cam A", "cam/A", "cám", too_long.as_str()] {
            assert!(validate_source_id(bad).is_err(), "{:?} accepted", bad);
        }
    }
}
