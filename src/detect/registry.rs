use std::panic::{catch_unwind, AssertUnwindSafe};

use anyhow::{anyhow, Result};
use image::GrayImage;

use crate::config::PreprocessConfig;
use crate::detect::backend::DetectionTier;
use crate::detect::backends::{ContourTier, HogPersonTier, PixelOccupancyTier};
use crate::detect::result::TierEstimate;
use crate::error::PreprocessError;

/// Ordered cascade of detection tiers.
///
/// Tiers run in registration order until one returns an authoritative
/// estimate. A failing tier is logged and skipped; nothing is retried.
pub struct PersonEstimator {
    tiers: Vec<Box<dyn DetectionTier>>,
}

impl PersonEstimator {
    pub fn new() -> Self {
        Self { tiers: Vec::new() }
    }

    /// Standard cascade: HOG (when a model is configured), contour, pixel.
    pub fn from_config(config: &PreprocessConfig) -> Result<Self> {
        let mut estimator = Self::new();
        if let Some(hog) = HogPersonTier::from_config(&config.hog)? {
            estimator.register(hog);
        } else {
            log::info!("no HOG model configured; cascade starts at the contour tier");
        }
        estimator.register(ContourTier::new(config.contour.clone()));
        estimator.register(PixelOccupancyTier::new(config.pixel.clone()));
        Ok(estimator)
    }

    /// Append a tier to the end of the cascade.
    pub fn register<T: DetectionTier + 'static>(&mut self, tier: T) {
        self.tiers.push(Box::new(tier));
    }

    /// Tier names in cascade order.
    pub fn list(&self) -> Vec<&'static str> {
        self.tiers.iter().map(|tier| tier.name()).collect()
    }

    pub fn estimate(&self, frame: &GrayImage) -> Result<TierEstimate, PreprocessError> {
        for tier in &self.tiers {
            match attempt_guarded(tier.as_ref(), frame) {
                Ok(Some(estimate)) => {
                    log::trace!("{} tier estimated {} persons", tier.name(), estimate.persons);
                    return Ok(estimate);
                }
                Ok(None) => {
                    log::trace!("{} tier deferred", tier.name());
                }
                Err(e) => {
                    log::debug!("{} tier failed, falling through: {:#}", tier.name(), e);
                }
            }
        }
        Err(PreprocessError::EstimatorExhausted)
    }
}

impl Default for PersonEstimator {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs one tier, turning a panic inside it into an ordinary tier failure.
fn attempt_guarded(tier: &dyn DetectionTier, frame: &GrayImage) -> Result<Option<TierEstimate>> {
    catch_unwind(AssertUnwindSafe(|| tier.attempt(frame)))
        .unwrap_or_else(|_| Err(anyhow!("{} tier panicked", tier.name())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::result::DetectionMethod;
    use image::Luma;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct ScriptedTier {
        method: DetectionMethod,
        outcome: fn() -> Result<Option<TierEstimate>>,
        calls: Arc<AtomicUsize>,
    }

    impl DetectionTier for ScriptedTier {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn method(&self) -> DetectionMethod {
            self.method
        }

        fn attempt(&self, _frame: &GrayImage) -> Result<Option<TierEstimate>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.outcome)()
        }
    }

    fn scripted(
        method: DetectionMethod,
        outcome: fn() -> Result<Option<TierEstimate>>,
    ) -> (ScriptedTier, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            ScriptedTier {
                method,
                outcome,
                calls: Arc::clone(&calls),
            },
            calls,
        )
    }

    fn frame() -> GrayImage {
        GrayImage::from_pixel(8, 8, Luma([0]))
    }

    #[test]
    fn first_authoritative_tier_wins() {
        let (primary, primary_calls) = scripted(DetectionMethod::PrimaryDetector, || {
            Ok(Some(TierEstimate {
                persons: 4,
                method: DetectionMethod::PrimaryDetector,
            }))
        });
        let (fallback, fallback_calls) = scripted(DetectionMethod::ContourFallback, || {
            Ok(Some(TierEstimate {
                persons: 1,
                method: DetectionMethod::ContourFallback,
            }))
        });
        let mut estimator = PersonEstimator::new();
        estimator.register(primary);
        estimator.register(fallback);

        let estimate = estimator.estimate(&frame()).unwrap();
        assert_eq!(estimate.persons, 4);
        assert_eq!(primary_calls.load(Ordering::SeqCst), 1);
        assert_eq!(fallback_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn errors_and_deferrals_fall_through() {
        let (failing, _) = scripted(DetectionMethod::PrimaryDetector, || {
            Err(anyhow!("malformed frame"))
        });
        let (deferring, _) = scripted(DetectionMethod::ContourFallback, || Ok(None));
        let (last, last_calls) = scripted(DetectionMethod::PixelFallback, || {
            Ok(Some(TierEstimate {
                persons: 2,
                method: DetectionMethod::PixelFallback,
            }))
        });
        let mut estimator = PersonEstimator::new();
        estimator.register(failing);
        estimator.register(deferring);
        estimator.register(last);

        let estimate = estimator.estimate(&frame()).unwrap();
        assert_eq!(estimate.method, DetectionMethod::PixelFallback);
        assert_eq!(last_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_tier_is_contained() {
        let (panicking, _) = scripted(DetectionMethod::PrimaryDetector, || {
            panic!("detector bug")
        });
        let mut estimator = PersonEstimator::new();
        estimator.register(panicking);
        estimator.register(PixelOccupancyTier::new(Default::default()));

        let estimate = estimator.estimate(&frame()).unwrap();
        assert_eq!(estimate.method, DetectionMethod::PixelFallback);
    }

    #[test]
    fn exhausted_cascade_is_an_error() {
        let (failing, _) =
            scripted(DetectionMethod::PixelFallback, || Err(anyhow!("no pixels")));
        let mut estimator = PersonEstimator::new();
        estimator.register(failing);
        assert!(matches!(
            estimator.estimate(&frame()),
            Err(PreprocessError::EstimatorExhausted)
        ));
    }

    #[test]
    fn default_cascade_without_model() {
        let estimator = PersonEstimator::from_config(&PreprocessConfig::default()).unwrap();
        assert_eq!(estimator.list(), vec!["contour", "pixel"]);
    }
}
