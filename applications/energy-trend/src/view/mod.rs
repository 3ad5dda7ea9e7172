pub mod live;
pub mod selection;

pub use live::{LiveWindowTracker, ViewWindow, DEFAULT_LIVE_THRESHOLD_SEC};
pub use selection::{PeriodBounds, RangePreset, Selection, DAY_MS, HOUR_MS};
