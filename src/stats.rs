use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

/// Service-wide counters. Each counter is monotonic between resets; counters
/// are updated independently so a snapshot taken mid-call may be one frame
/// apart across fields.
#[derive(Debug, Default)]
pub(crate) struct ServiceCounters {
    frames_processed: AtomicU64,
    local_detections: AtomicU64,
    frames_with_persons: AtomicU64,
    api_calls_saved: AtomicU64,
    degraded_results: AtomicU64,
    processing_micros: AtomicU64,
}

/// Outcome of one `preprocess` call, as seen by the counters.
pub(crate) struct FrameOutcome {
    pub persons: u32,
    pub api_call_saved: bool,
    pub degraded: bool,
    pub elapsed: Duration,
}

impl ServiceCounters {
    pub(crate) fn record(&self, outcome: &FrameOutcome) {
        self.frames_processed.fetch_add(1, Ordering::Relaxed);
        self.local_detections.fetch_add(1, Ordering::Relaxed);
        if outcome.persons > 0 {
            self.frames_with_persons.fetch_add(1, Ordering::Relaxed);
        }
        if outcome.api_call_saved {
            self.api_calls_saved.fetch_add(1, Ordering::Relaxed);
        }
        if outcome.degraded {
            self.degraded_results.fetch_add(1, Ordering::Relaxed);
        }
        let micros = u64::try_from(outcome.elapsed.as_micros()).unwrap_or(u64::MAX);
        self.processing_micros.fetch_add(micros, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, sources_tracked: usize) -> AggregateStatistics {
        let frames_processed = self.frames_processed.load(Ordering::Relaxed);
        let api_calls_saved = self.api_calls_saved.load(Ordering::Relaxed);
        let total_processing_micros = self.processing_micros.load(Ordering::Relaxed);

        let (api_call_reduction_percentage, average_processing_ms) = if frames_processed == 0 {
            (0.0, 0.0)
        } else {
            (
                api_calls_saved as f64 / frames_processed as f64 * 100.0,
                total_processing_micros as f64 / frames_processed as f64 / 1000.0,
            )
        };

        AggregateStatistics {
            frames_processed,
            local_detections: self.local_detections.load(Ordering::Relaxed),
            frames_with_persons: self.frames_with_persons.load(Ordering::Relaxed),
            api_calls_saved,
            degraded_results: self.degraded_results.load(Ordering::Relaxed),
            total_processing_micros,
            average_processing_ms,
            api_call_reduction_percentage,
            sources_tracked,
        }
    }

    pub(crate) fn reset(&self) {
        for counter in [
            &self.frames_processed,
            &self.local_detections,
            &self.frames_with_persons,
            &self.api_calls_saved,
            &self.degraded_results,
            &self.processing_micros,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Point-in-time view of the service counters.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AggregateStatistics {
    pub frames_processed: u64,
    pub local_detections: u64,
    pub frames_with_persons: u64,
    pub api_calls_saved: u64,
    /// Results produced by the pixel fallback after a stage failure.
    pub degraded_results: u64,
    pub total_processing_micros: u64,
    pub average_processing_ms: f64,
    /// `api_calls_saved / frames_processed * 100`, or 0 before the first frame.
    pub api_call_reduction_percentage: f64,
    pub sources_tracked: usize,
}
