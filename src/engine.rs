//! Preprocessing decision engine.
//!
//! `PreprocessingService` runs motion estimation, the person cascade, the ROI
//! pass and quality metrics over one frame, scores its own confidence and
//! decides whether the frame still needs the external analysis API.
//!
//! Callers only ever see an error for contract violations (bad source id,
//! empty frame). Every failure after validation is folded into a degraded,
//! low-confidence result that defers to the external API.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::PoisonError;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use image::GrayImage;
use serde::Serialize;

use crate::config::PreprocessConfig;
use crate::detect::{DetectionMethod, DetectionTier, PersonEstimator, PixelOccupancyTier, RoiDetector};
use crate::error::PreprocessError;
use crate::frame::Frame;
use crate::motion::{MotionEstimate, MotionEstimator, MotionLevel};
use crate::quality::{CrowdDensity, FrameQuality};
use crate::source::{SourceRegistry, SourceState, SourceStatistics};
use crate::stats::{AggregateStatistics, FrameOutcome, ServiceCounters};
use crate::validate_source_id;

/// Confidence reported for degraded results.
pub const DEGRADED_CONFIDENCE: f32 = 0.05;

/// Quality scores below this add [`DecisionReason::PoorQuality`].
pub const POOR_QUALITY_SCORE: f32 = 0.3;

/// Factor behind a send decision. Only some of them force a frame out to the
/// external API; the rest are reported for the caller's benefit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    /// Motion above `low`.
    UnstableMotion,
    /// Confidence under `high_confidence_threshold`.
    LowConfidence,
    /// The cascade and the ROI pass counted differently.
    TierDisagreement,
    PoorQuality,
    /// Local analysis failed and the result came from the fallback path.
    Degraded,
}

impl DecisionReason {
    pub fn forces_send(self) -> bool {
        matches!(
            self,
            DecisionReason::UnstableMotion | DecisionReason::LowConfidence | DecisionReason::Degraded
        )
    }
}

/// Reasons for a fully analysed frame, in a fixed order.
pub fn decision_reasons(
    confidence: f32,
    threshold: f32,
    motion: MotionLevel,
    persons: u32,
    roi_count: u32,
    quality: &FrameQuality,
) -> Vec<DecisionReason> {
    let mut reasons = Vec::new();
    if !motion.is_stable() {
        reasons.push(DecisionReason::UnstableMotion);
    }
    if confidence < threshold {
        reasons.push(DecisionReason::LowConfidence);
    }
    if persons != roi_count {
        reasons.push(DecisionReason::TierDisagreement);
    }
    if quality.quality_score < POOR_QUALITY_SCORE {
        reasons.push(DecisionReason::PoorQuality);
    }
    reasons
}

/// Structured local analysis of one frame.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LocalAnalysisResult {
    pub source_id: String,
    pub motion_level: MotionLevel,
    pub motion_score: f32,
    /// Changed regions large enough to be people or vehicles.
    pub moving_regions: u32,
    /// No earlier frame existed for this source.
    pub baseline_frame: bool,
    pub persons_estimated: u32,
    pub detection_method: DetectionMethod,
    pub roi_count: u32,
    pub confidence_score: f32,
    pub send_to_external_api: bool,
    pub reasons: Vec<DecisionReason>,
    pub quality: FrameQuality,
    pub crowd_density: CrowdDensity,
    /// Produced by the failure path rather than the full pipeline.
    pub degraded: bool,
    pub processing_time: Duration,
}

/// Trust in a local estimate.
///
/// Agreement between the cascade and the ROI pass lifts the score from half
/// of the tier cap up to the full cap; unstable motion scales it down.
pub fn confidence_score(
    method: DetectionMethod,
    persons: u32,
    roi_count: u32,
    motion: MotionLevel,
) -> f32 {
    let (p, r) = (persons as f32, roi_count as f32);
    let agreement = 1.0 - (p - r).abs() / p.max(r).max(1.0);
    let score = method.confidence_cap() * (0.5 + 0.5 * agreement) * motion_factor(motion);
    score.clamp(0.0, 1.0)
}

fn motion_factor(level: MotionLevel) -> f32 {
    match level {
        MotionLevel::None => 1.0,
        MotionLevel::Low => 0.9,
        MotionLevel::Medium => 0.7,
        MotionLevel::High => 0.5,
    }
}

// Whatever the pipeline produced before it failed.
#[derive(Default)]
struct Partial {
    luma: Option<GrayImage>,
    motion: Option<MotionEstimate>,
}

/// Shared, thread-safe preprocessing core. Wrap in an `Arc` to use from
/// several capture threads.
pub struct PreprocessingService {
    config: PreprocessConfig,
    motion: MotionEstimator,
    estimator: PersonEstimator,
    last_resort: PixelOccupancyTier,
    roi: RoiDetector,
    sources: SourceRegistry,
    counters: ServiceCounters,
}

impl PreprocessingService {
    /// Service with the standard cascade built from `config`.
    pub fn new(config: PreprocessConfig) -> Result<Self, PreprocessError> {
        config
            .validate()
            .map_err(|e| PreprocessError::Config(format!("{:#}", e)))?;
        let estimator = PersonEstimator::from_config(&config)
            .map_err(|e| PreprocessError::Config(format!("{:#}", e)))?;
        Self::with_estimator(config, estimator)
    }

    /// Service with a caller-assembled cascade.
    pub fn with_estimator(
        config: PreprocessConfig,
        estimator: PersonEstimator,
    ) -> Result<Self, PreprocessError> {
        config
            .validate()
            .map_err(|e| PreprocessError::Config(format!("{:#}", e)))?;
        log::info!(
            "preprocessing service ready: tiers {:?}, confidence threshold {:.2}, analysis width {}",
            estimator.list(),
            config.high_confidence_threshold,
            config.max_analysis_width
        );
        Ok(Self {
            motion: MotionEstimator::new(config.motion.clone()),
            last_resort: PixelOccupancyTier::new(config.pixel.clone()),
            roi: RoiDetector::new(config.roi.clone()),
            estimator,
            config,
            sources: SourceRegistry::new(),
            counters: ServiceCounters::default(),
        })
    }

    pub fn config(&self) -> &PreprocessConfig {
        &self.config
    }

    pub fn preprocess(
        &self,
        frame: &Frame,
        source_id: &str,
    ) -> Result<LocalAnalysisResult, PreprocessError> {
        let started = Instant::now();
        validate_source_id(source_id)?;
        if frame.is_empty() {
            return Err(PreprocessError::InvalidInput(format!(
                "frame from {} has no pixels",
                source_id
            )));
        }

        let handle = self.sources.get_or_create(source_id);
        let mut state = handle.lock().unwrap_or_else(PoisonError::into_inner);

        let mut partial = Partial::default();
        let analysed = catch_unwind(AssertUnwindSafe(|| {
            self.analyse(frame, source_id, &mut state, &mut partial)
        }))
        .unwrap_or_else(|_| Err(anyhow!("analysis panicked")));

        let mut result = match analysed {
            Ok(result) => result,
            Err(e) => {
                log::warn!("{}: local analysis failed, deferring to external API: {:#}", source_id, e);
                self.degraded_result(source_id, partial)
            }
        };
        result.processing_time = started.elapsed();

        state.frames_seen += 1;
        if !result.send_to_external_api {
            state.api_calls_saved += 1;
        }
        state.last_seen = Instant::now();
        drop(state);

        self.counters.record(&FrameOutcome {
            persons: result.persons_estimated,
            api_call_saved: !result.send_to_external_api,
            degraded: result.degraded,
            elapsed: result.processing_time,
        });

        log::debug!(
            "{}: motion {:?} ({:.4}, {} regions), {} persons via {:?}, roi {}, confidence {:.2}, send {} {:?}",
            source_id,
            result.motion_level,
            result.motion_score,
            result.moving_regions,
            result.persons_estimated,
            result.detection_method,
            result.roi_count,
            result.confidence_score,
            result.send_to_external_api,
            result.reasons
        );
        Ok(result)
    }

    fn analyse(
        &self,
        frame: &Frame,
        source_id: &str,
        state: &mut SourceState,
        partial: &mut Partial,
    ) -> Result<LocalAnalysisResult> {
        let luma = frame.analysis_luma(self.config.max_analysis_width)?;
        let luma = &*partial.luma.insert(luma);

        let motion = self.motion.estimate(luma, state);
        partial.motion = Some(motion);
        if motion.baseline {
            log::info!("{}: initialized motion tracking", source_id);
        }

        let estimate = self.estimator.estimate(luma)?;
        let roi_count = self.roi.count(luma);
        let quality = FrameQuality::measure(luma);

        let confidence_score =
            confidence_score(estimate.method, estimate.persons, roi_count, motion.level);
        let reasons = decision_reasons(
            confidence_score,
            self.config.high_confidence_threshold,
            motion.level,
            estimate.persons,
            roi_count,
            &quality,
        );
        let send_to_external_api = reasons.iter().any(|r| r.forces_send());

        Ok(LocalAnalysisResult {
            source_id: source_id.to_string(),
            motion_level: motion.level,
            motion_score: motion.score,
            moving_regions: motion.moving_regions,
            baseline_frame: motion.baseline,
            persons_estimated: estimate.persons,
            detection_method: estimate.method,
            roi_count,
            confidence_score,
            send_to_external_api,
            reasons,
            quality,
            crowd_density: CrowdDensity::estimate(estimate.persons, luma.width(), luma.height()),
            degraded: false,
            processing_time: Duration::ZERO,
        })
    }

    fn degraded_result(&self, source_id: &str, partial: Partial) -> LocalAnalysisResult {
        let (motion_level, motion_score, moving_regions, baseline_frame) = match partial.motion {
            Some(m) => (m.level, m.score, m.moving_regions, m.baseline),
            None => (MotionLevel::High, 1.0, 0, false),
        };

        let (persons, quality, density) = match partial.luma.as_ref() {
            Some(luma) => {
                let persons = catch_unwind(AssertUnwindSafe(|| self.last_resort.attempt(luma)))
                    .ok()
                    .and_then(|attempt| attempt.ok().flatten())
                    .map(|estimate| estimate.persons)
                    .unwrap_or(0);
                (
                    persons,
                    FrameQuality::measure(luma),
                    CrowdDensity::estimate(persons, luma.width(), luma.height()),
                )
            }
            None => (0, FrameQuality::default(), CrowdDensity::Sparse),
        };

        LocalAnalysisResult {
            source_id: source_id.to_string(),
            motion_level,
            motion_score,
            moving_regions,
            baseline_frame,
            persons_estimated: persons,
            detection_method: DetectionMethod::PixelFallback,
            roi_count: 0,
            confidence_score: DEGRADED_CONFIDENCE,
            send_to_external_api: true,
            reasons: vec![DecisionReason::Degraded],
            quality,
            crowd_density: density,
            degraded: true,
            processing_time: Duration::ZERO,
        }
    }

    pub fn get_statistics(&self) -> AggregateStatistics {
        self.counters.snapshot(self.sources.len())
    }

    pub fn source_statistics(&self, source_id: &str) -> Option<SourceStatistics> {
        self.sources.statistics(source_id)
    }

    /// Every tracked source, sorted by id.
    pub fn all_source_statistics(&self) -> Vec<(String, SourceStatistics)> {
        self.sources.all_statistics()
    }

    /// Zero all counters. Motion baselines are kept.
    pub fn reset_statistics(&self) {
        self.counters.reset();
        self.sources.reset_counters();
        log::info!("statistics reset");
    }

    pub fn evict_source(&self, source_id: &str) -> bool {
        self.sources.evict(source_id)
    }

    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        self.sources.evict_idle(max_idle)
    }

    /// JPEG bytes ready for the external analysis API.
    pub fn prepare_for_upload(&self, frame: &Frame) -> Result<Vec<u8>, PreprocessError> {
        crate::upload::prepare_for_upload(frame, &self.config.upload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::TierEstimate;
    use crate::ingest::SceneBuilder;
    use image::Luma;

    struct FailingTier;

    impl DetectionTier for FailingTier {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn method(&self) -> DetectionMethod {
            DetectionMethod::PrimaryDetector
        }

        fn attempt(&self, _frame: &GrayImage) -> Result<Option<TierEstimate>> {
            Err(anyhow!("detector offline"))
        }
    }

    fn service() -> PreprocessingService {
        PreprocessingService::new(PreprocessConfig::default()).unwrap()
    }

    #[test]
    fn confidence_follows_agreement_tier_and_motion() {
        let exact = confidence_score(DetectionMethod::ContourFallback, 3, 3, MotionLevel::None);
        assert!((exact - 0.85).abs() < 1e-6);

        let off_by_one = confidence_score(DetectionMethod::ContourFallback, 3, 2, MotionLevel::None);
        assert!(off_by_one < exact);

        let primary = confidence_score(DetectionMethod::PrimaryDetector, 3, 3, MotionLevel::None);
        let pixel = confidence_score(DetectionMethod::PixelFallback, 3, 3, MotionLevel::None);
        assert!(primary > exact && exact > pixel);

        let moving = confidence_score(DetectionMethod::ContourFallback, 3, 3, MotionLevel::High);
        assert!((moving - 0.425).abs() < 1e-6);
    }

    #[test]
    fn zero_persons_and_zero_regions_agree() {
        let score = confidence_score(DetectionMethod::ContourFallback, 0, 0, MotionLevel::Low);
        assert!((score - 0.765).abs() < 1e-6);
    }

    #[test]
    fn reasons_explain_the_send_decision() {
        let good = FrameQuality {
            quality_score: 0.8,
            ..FrameQuality::default()
        };
        assert!(decision_reasons(0.9, 0.75, MotionLevel::Low, 2, 2, &good).is_empty());

        let informational = decision_reasons(0.8, 0.75, MotionLevel::None, 3, 2, &FrameQuality::default());
        assert_eq!(
            informational,
            vec![DecisionReason::TierDisagreement, DecisionReason::PoorQuality]
        );
        assert!(!informational.iter().any(|r| r.forces_send()));

        let deferred = decision_reasons(0.4, 0.75, MotionLevel::High, 2, 2, &good);
        assert_eq!(
            deferred,
            vec![DecisionReason::UnstableMotion, DecisionReason::LowConfidence]
        );

        // Stable but unsure still goes out.
        let unsure = decision_reasons(0.5, 0.75, MotionLevel::None, 1, 1, &good);
        assert_eq!(unsure, vec![DecisionReason::LowConfidence]);
        assert!(unsure[0].forces_send());
    }

    #[test]
    fn uniform_frame_is_resolved_locally() {
        let svc = service();
        let frame = Frame::from_luma(GrayImage::from_pixel(320, 240, Luma([128])));
        let result = svc.preprocess(&frame, "cam_A").unwrap();

        assert!(result.baseline_frame);
        assert_eq!(result.persons_estimated, 0);
        assert_eq!(result.detection_method, DetectionMethod::ContourFallback);
        assert!(!result.send_to_external_api);
        assert!(result.reasons.is_empty());
        assert!(!result.degraded);
        assert_eq!(svc.get_statistics().api_calls_saved, 1);
    }

    #[test]
    fn exhausted_cascade_degrades_instead_of_failing() {
        let mut estimator = PersonEstimator::new();
        estimator.register(FailingTier);
        let svc =
            PreprocessingService::with_estimator(PreprocessConfig::default(), estimator).unwrap();

        let frame = Frame::from_luma(SceneBuilder::new(320, 240).render(2, 0));
        let result = svc.preprocess(&frame, "cam_B").unwrap();

        assert!(result.degraded);
        assert_eq!(result.detection_method, DetectionMethod::PixelFallback);
        assert_eq!(result.confidence_score, DEGRADED_CONFIDENCE);
        assert!(result.send_to_external_api);
        assert_eq!(result.reasons, vec![DecisionReason::Degraded]);
        assert_eq!(result.motion_level, MotionLevel::None);

        let stats = svc.get_statistics();
        assert_eq!(stats.frames_processed, 1);
        assert_eq!(stats.degraded_results, 1);
        assert_eq!(stats.api_calls_saved, 0);
    }

    #[test]
    fn contract_violations_are_errors() {
        let svc = service();
        let frame = Frame::from_luma(GrayImage::from_pixel(16, 16, Luma([0])));
        for bad in ["", "cam A", "cam/../A"] {
            let err = svc.preprocess(&frame, bad).unwrap_err();
            assert!(err.is_contract_violation(), "{:?} should be rejected", bad);
        }

        let empty = Frame::from_luma(GrayImage::new(0, 0));
        assert!(matches!(
            svc.preprocess(&empty, "cam_A"),
            Err(PreprocessError::InvalidInput(_))
        ));
        assert_eq!(svc.get_statistics().frames_processed, 0);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = PreprocessConfig {
            high_confidence_threshold: -0.1,
            ..PreprocessConfig::default()
        };
        assert!(matches!(
            PreprocessingService::new(config),
            Err(PreprocessError::Config(_))
        ));
    }

    #[test]
    fn per_source_counters_track_savings() {
        let svc = service();
        let frame = Frame::from_luma(GrayImage::from_pixel(128, 128, Luma([90])));
        svc.preprocess(&frame, "cam_A").unwrap();
        svc.preprocess(&frame, "cam_A").unwrap();

        let stats = svc.source_statistics("cam_A").unwrap();
        assert_eq!(stats.frames_seen, 2);
        assert_eq!(stats.api_calls_saved, 2);
        assert_eq!(stats.last_motion_score, 0.0);
        assert!(svc.source_statistics("cam_B").is_none());
    }
}
