//! Last-access and last-requested-segment tracking, consulted by the
//! supervisor and by the periodic sweepers.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;

/// `hasSkippedAhead` is for internal bookkeeping only; this threshold is not
/// exposed outside the crate.
const SKIP_AHEAD_THRESHOLD: u32 = 3;

#[derive(Debug, Clone)]
pub struct Viewer {
    pub last_access_at_ms: u64,
    pub last_requested_segment: u32,
}

/// `(videoId, label) -> Viewer`.
#[derive(Default)]
pub struct ViewerTracker {
    viewers: DashMap<(String, String), Viewer>,
}

impl ViewerTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, video_id: &str, label: &str, segment: u32) {
        let now = now_ms();
        self.viewers
            .entry((video_id.to_string(), label.to_string()))
            .and_modify(|v| {
                v.last_access_at_ms = now;
                v.last_requested_segment = segment;
            })
            .or_insert(Viewer {
                last_access_at_ms: now,
                last_requested_segment: segment,
            });
    }

    pub fn get(&self, video_id: &str, label: &str) -> Option<Viewer> {
        self.viewers
            .get(&(video_id.to_string(), label.to_string()))
            .map(|r| r.clone())
    }

    pub fn remove(&self, video_id: &str, label: &str) {
        self.viewers.remove(&(video_id.to_string(), label.to_string()));
    }

    /// Whether `requested` jumps more than [`SKIP_AHEAD_THRESHOLD`] segments
    /// past the last recorded request for this key. Internal use only, as the
    /// spec marks it: not part of the seek-detection decision itself, only a
    /// signal sweepers and diagnostics may read.
    pub(crate) fn has_skipped_ahead(&self, video_id: &str, label: &str, requested: u32) -> bool {
        self.get(video_id, label)
            .map(|v| {
                requested.saturating_sub(v.last_requested_segment) > SKIP_AHEAD_THRESHOLD
            })
            .unwrap_or(false)
    }

    /// Every `(videoId, label)` whose last access exceeds `threshold`, paired
    /// with its current viewer snapshot. Used by the pause sweep.
    pub fn stale_entries(&self, threshold: Duration) -> Vec<((String, String), Viewer)> {
        let now = now_ms();
        let threshold_ms = threshold.as_millis() as u64;
        self.viewers
            .iter()
            .filter(|entry| now.saturating_sub(entry.value().last_access_at_ms) > threshold_ms)
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn has_entry(&self, video_id: &str, label: &str) -> bool {
        self.viewers.contains_key(&(video_id.to_string(), label.to_string()))
    }

    /// Whether `(video_id, label)` has no viewer entry at all, or its last
    /// access exceeds `threshold`. Used by the pause sweep, which acts on
    /// every running session rather than only on entries already in the
    /// table.
    pub fn is_stale_or_absent(&self, video_id: &str, label: &str, threshold: Duration) -> bool {
        match self.get(video_id, label) {
            None => true,
            Some(v) => {
                let now = now_ms();
                now.saturating_sub(v.last_access_at_ms) > threshold.as_millis() as u64
            }
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_then_get_round_trips() {
        let tracker = ViewerTracker::new();
        tracker.update("v1", "1080p", 5);
        let viewer = tracker.get("v1", "1080p").unwrap();
        assert_eq!(viewer.last_requested_segment, 5);
    }

    #[test]
    fn has_skipped_ahead_uses_threshold() {
        let tracker = ViewerTracker::new();
        tracker.update("v1", "1080p", 5);
        assert!(!tracker.has_skipped_ahead("v1", "1080p", 8));
        assert!(tracker.has_skipped_ahead("v1", "1080p", 9));
    }

    #[test]
    fn missing_entry_never_reports_skip() {
        let tracker = ViewerTracker::new();
        assert!(!tracker.has_skipped_ahead("unknown", "1080p", 100));
    }

    #[test]
    fn is_stale_or_absent_treats_missing_entries_as_stale() {
        let tracker = ViewerTracker::new();
        assert!(tracker.is_stale_or_absent("v1", "1080p", Duration::from_secs(60)));
        tracker.update("v1", "1080p", 0);
        assert!(!tracker.is_stale_or_absent("v1", "1080p", Duration::from_secs(60)));
    }

    #[test]
    fn stale_entries_respects_threshold() {
        let tracker = ViewerTracker::new();
        tracker.update("v1", "1080p", 0);
        assert!(tracker.stale_entries(Duration::from_secs(0)).len() <= 1);
        assert!(tracker.stale_entries(Duration::from_secs(3600)).is_empty());
    }
}
