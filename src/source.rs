//! Per-source state.
//!
//! Each camera/feed gets its own `SourceState` behind its own mutex, so two
//! capture threads working on different sources never contend. The registry
//! map itself is only write-locked to insert or evict a source.

use image::GrayImage;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

/// Motion baseline and counters for one source.
#[derive(Debug)]
pub struct SourceState {
    /// Blurred analysis frame from the previous call.
    pub(crate) previous: Option<GrayImage>,
    /// SHA-256 of `previous`, used to skip differencing identical frames.
    pub(crate) previous_fingerprint: Option<[u8; 32]>,
    pub(crate) frames_seen: u64,
    pub(crate) api_calls_saved: u64,
    pub(crate) last_motion_score: f32,
    pub(crate) last_seen: Instant,
}

impl SourceState {
    pub fn new() -> Self {
        Self {
            previous: None,
            previous_fingerprint: None,
            frames_seen: 0,
            api_calls_saved: 0,
            last_motion_score: 0.0,
            last_seen: Instant::now(),
        }
    }

    pub fn has_baseline(&self) -> bool {
        self.previous.is_some()
    }

    pub fn statistics(&self) -> SourceStatistics {
        SourceStatistics {
            frames_seen: self.frames_seen,
            api_calls_saved: self.api_calls_saved,
            last_motion_score: self.last_motion_score,
        }
    }
}

impl Default for SourceState {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only view of one source's counters.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SourceStatistics {
    pub frames_seen: u64,
    pub api_calls_saved: u64,
    pub last_motion_score: f32,
}

/// Concurrent map from source id to state.
#[derive(Default)]
pub struct SourceRegistry {
    sources: RwLock<HashMap<String, Arc<Mutex<SourceState>>>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle for `source_id`, creating fresh state on first use.
    pub fn get_or_create(&self, source_id: &str) -> Arc<Mutex<SourceState>> {
        {
            let sources = self.sources.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(state) = sources.get(source_id) {
                return Arc::clone(state);
            }
        }
        let mut sources = self.sources.write().unwrap_or_else(PoisonError::into_inner);
        let state = sources.entry(source_id.to_string()).or_insert_with(|| {
            log::debug!("tracking new source {}", source_id);
            Arc::new(Mutex::new(SourceState::new()))
        });
        Arc::clone(state)
    }

    pub fn len(&self) -> usize {
        self.sources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn statistics(&self, source_id: &str) -> Option<SourceStatistics> {
        let state = self
            .sources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(source_id)
            .cloned()?;
        let guard = state.lock().unwrap_or_else(PoisonError::into_inner);
        Some(guard.statistics())
    }

    /// Snapshot of every tracked source's counters.
    pub fn all_statistics(&self) -> Vec<(String, SourceStatistics)> {
        let handles: Vec<(String, Arc<Mutex<SourceState>>)> = self
            .sources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, state)| (id.clone(), Arc::clone(state)))
            .collect();
        let mut out: Vec<(String, SourceStatistics)> = handles
            .into_iter()
            .map(|(id, state)| {
                let guard = state.lock().unwrap_or_else(PoisonError::into_inner);
                (id, guard.statistics())
            })
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Drop one source. Returns true if it was tracked.
    pub fn evict(&self, source_id: &str) -> bool {
        self.sources
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(source_id)
            .is_some()
    }

    /// Drop sources not seen for at least `max_idle`. Returns how many were removed.
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        let mut sources = self.sources.write().unwrap_or_else(PoisonError::into_inner);
        let before = sources.len();
        sources.retain(|id, state| {
            // A source locked by an in-flight call is active by definition.
            let keep = match state.try_lock() {
                Ok(guard) => guard.last_seen.elapsed() < max_idle,
                Err(_) => true,
            };
            if !keep {
                log::debug!("evicting idle source {}", id);
            }
            keep
        });
        before - sources.len()
    }

    /// Zero per-source counters while keeping motion baselines.
    pub fn reset_counters(&self) {
        let sources = self.sources.read().unwrap_or_else(PoisonError::into_inner);
        for state in sources.values() {
            let mut guard = state.lock().unwrap_or_else(PoisonError::into_inner);
            guard.frames_seen = 0;
            guard.api_calls_saved = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_id_shares_state() {
        let registry = SourceRegistry::new();
        let a = registry.get_or_create("cam_A");
        let b = registry.get_or_create("cam_A");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn evict_idle_keeps_recent_sources() {
        let registry = SourceRegistry::new();
        registry.get_or_create("cam_A");
        registry.get_or_create("cam_B");

        assert_eq!(registry.evict_idle(Duration::from_secs(3600)), 0);
        assert_eq!(registry.evict_idle(Duration::ZERO), 2);
        assert!(registry.is_empty());
    }

    #[test]
    fn reset_counters_keeps_baseline() {
        let registry = SourceRegistry::new();
        let state = registry.get_or_create("cam_A");
        {
            let mut guard = state.lock().unwrap();
            guard.frames_seen = 4;
            guard.api_calls_saved = 2;
            guard.previous = Some(GrayImage::new(2, 2));
        }
        registry.reset_counters();
        let guard = state.lock().unwrap();
        assert_eq!(guard.frames_seen, 0);
        assert_eq!(guard.api_calls_saved, 0);
        assert!(guard.has_baseline());
    }
}
