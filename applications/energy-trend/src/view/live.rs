use serde::Serialize;
use tracing::debug;

pub const DEFAULT_LIVE_THRESHOLD_SEC: i64 = 120;

/// Visible time window, in epoch seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ViewWindow {
    pub min_sec: i64,
    pub max_sec: i64,
}

impl ViewWindow {
    pub fn width(&self) -> i64 {
        self.max_sec - self.min_sec
    }
}

/// Keeps the visible window pinned to the newest data while the viewer is
/// watching the live edge.
#[derive(Debug, Clone)]
pub struct LiveWindowTracker {
    view: Option<ViewWindow>,
    is_live_view: bool,
    live_threshold_sec: i64,
}

impl Default for LiveWindowTracker {
    fn default() -> Self {
        Self::new(DEFAULT_LIVE_THRESHOLD_SEC)
    }
}

impl LiveWindowTracker {
    pub fn new(live_threshold_sec: i64) -> Self {
        Self {
            view: None,
            is_live_view: true,
            live_threshold_sec,
        }
    }

    pub fn view(&self) -> Option<ViewWindow> {
        self.view
    }

    pub fn is_live_view(&self) -> bool {
        self.is_live_view
    }

    pub fn live_threshold_sec(&self) -> i64 {
        self.live_threshold_sec
    }

    /// Whether `edge_sec` lies within the live threshold of `latest_sec`.
    pub fn is_near(&self, edge_sec: i64, latest_sec: i64) -> bool {
        edge_sec >= latest_sec - self.live_threshold_sec
    }

    /// Replace the view (user zoom/scroll or a new selection). Windows without
    /// positive width are ignored.
    pub fn set_view(&mut self, min_sec: i64, max_sec: i64, latest_sec: Option<i64>) {
        if max_sec <= min_sec {
            return;
        }
        self.view = Some(ViewWindow { min_sec, max_sec });
        self.refresh(latest_sec);
    }

    pub fn clear_view(&mut self, latest_sec: Option<i64>) {
        self.view = None;
        self.refresh(latest_sec);
    }

    /// React to new data moving the latest timestamp from `prev_latest_sec` to
    /// `new_latest_sec`. Returns the shift applied to the view, if any.
    pub fn on_merge(
        &mut self,
        prev_latest_sec: Option<i64>,
        new_latest_sec: Option<i64>,
    ) -> Option<i64> {
        let mut shifted = None;

        if let (Some(view), Some(prev), Some(new)) =
            (self.view.as_mut(), prev_latest_sec, new_latest_sec)
        {
            let delta = new - prev;
            let following = view.max_sec >= prev - self.live_threshold_sec;
            if following && delta > 0 {
                view.min_sec += delta;
                view.max_sec += delta;
                shifted = Some(delta);
                debug!(delta, min = view.min_sec, max = view.max_sec, "view follows live data");
            }
        }

        self.refresh(new_latest_sec);
        shifted
    }

    fn refresh(&mut self, latest_sec: Option<i64>) {
        self.is_live_view = match (self.view, latest_sec) {
            (Some(view), Some(latest)) => self.is_near(view.max_sec, latest),
            // No explicit window means the whole series, which always ends at the latest sample
            (None, _) => true,
            (Some(_), None) => false,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_follows_when_near_live_edge() {
        let mut tracker = LiveWindowTracker::new(120);
        tracker.set_view(1000, 2000, Some(2050));
        assert!(tracker.is_live_view());

        let shift = tracker.on_merge(Some(2050), Some(2110));

        assert_eq!(shift, Some(60));
        assert_eq!(tracker.view(), Some(ViewWindow { min_sec: 1060, max_sec: 2060 }));
        assert_eq!(tracker.view().unwrap().width(), 1000);
        assert!(tracker.is_live_view());
    }

    #[test]
    fn test_stays_put_when_scrolled_away() {
        let mut tracker = LiveWindowTracker::new(120);
        tracker.set_view(1000, 2000, Some(2500));
        assert!(!tracker.is_live_view());

        let shift = tracker.on_merge(Some(2500), Some(2600));

        assert_eq!(shift, None);
        assert_eq!(tracker.view(), Some(ViewWindow { min_sec: 1000, max_sec: 2000 }));
        assert!(!tracker.is_live_view());
    }

    #[test]
    fn test_threshold_edge_is_inclusive() {
        let mut tracker = LiveWindowTracker::new(120);
        tracker.set_view(0, 880, Some(1000));

        assert_eq!(tracker.on_merge(Some(1000), Some(1010)), Some(10));
        assert_eq!(tracker.view().unwrap().max_sec, 890);
    }

    #[test]
    fn test_no_shift_without_new_data() {
        let mut tracker = LiveWindowTracker::new(120);
        tracker.set_view(0, 1000, Some(1000));

        assert_eq!(tracker.on_merge(Some(1000), Some(1000)), None);
        assert_eq!(tracker.view().unwrap().max_sec, 1000);
    }

    #[test]
    fn test_falls_out_of_live_when_data_outruns_view() {
        let mut tracker = LiveWindowTracker::new(120);
        tracker.set_view(0, 1000, Some(1000));
        // Manual zoom further back
        tracker.set_view(0, 500, Some(1000));

        tracker.on_merge(Some(1000), Some(1100));
        assert!(!tracker.is_live_view());
    }

    #[test]
    fn test_invalid_view_ignored() {
        let mut tracker = LiveWindowTracker::default();
        tracker.set_view(10, 10, Some(10));

        assert_eq!(tracker.view(), None);
        assert!(tracker.is_live_view());
    }
}
