//! Session controller
//!
//! Owns the series, the active selection and everything derived from them.
//! All mutation goes through `&mut Session`, so whoever holds the session
//! decides the order in which fetch results and user actions are applied.

use crate::analytics::{
    aggregate, align_daily, average_daily_usage, daily_breakdown, typical_energy_kwh,
    typical_trace, DailyBreakdown, Ema, StatsResult,
};
use crate::api::models::{DailyBucket, EnergySummary, LatestReading, Reading, RemoteStats};
use crate::config::Config;
use crate::error::{AppError, Result};
use crate::series::{TimeSeriesStore, DEFAULT_THRESHOLD};
use crate::view::{
    LiveWindowTracker, RangePreset, Selection, ViewWindow, DEFAULT_LIVE_THRESHOLD_SEC,
};
use chrono::{DateTime, TimeZone};
use serde::Serialize;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub max_points: usize,
    pub live_threshold_sec: i64,
    pub ema_alpha: f64,
    pub cost_per_kwh: f64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_points: DEFAULT_THRESHOLD,
            live_threshold_sec: DEFAULT_LIVE_THRESHOLD_SEC,
            ema_alpha: Ema::for_window(48.0 * 3600.0, 10.0).alpha(),
            cost_per_kwh: 0.3102,
        }
    }
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_points: config.chart.max_points,
            live_threshold_sec: config.chart.live_threshold_secs,
            ema_alpha: Ema::for_window(
                config.trend.ema_window_hours * 3600.0,
                config.trend.sample_period_secs,
            )
            .alpha(),
            cost_per_kwh: config.cost.per_kwh,
        }
    }
}

/// Issued when a full reload starts; only the newest ticket may apply its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FullLoadTicket {
    generation: u64,
}

/// Everything the rendering side needs for one redraw.
#[derive(Debug, Clone, Serialize)]
pub struct ChartFrame {
    pub timestamps_sec: Vec<i64>,
    pub power_w: Vec<Option<f64>>,
    pub energy_kwh: Vec<Option<f64>>,
    pub ema_power_w: Vec<Option<f64>>,
    pub daily_kwh: Vec<Option<f64>>,
    pub typical_daily_kwh: Vec<Option<f64>>,
    /// 30-day moving average of daily usage for the day each sample falls in
    pub moving_avg_kwh: Vec<Option<f64>>,
    pub stats: Option<StatsResult>,
    pub selection: Option<Selection>,
    pub view: Option<ViewWindow>,
    pub is_live_view: bool,
    pub connected: bool,
}

/// Sample under the pointer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HoverPoint {
    pub timestamp_sec: i64,
    pub power_w: Option<f64>,
    pub energy_kwh: Option<f64>,
}

/// Energy and cost for today, this week and this month, plus the meter total.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PeriodSummary {
    pub day_kwh: Option<f64>,
    pub day_cost: Option<f64>,
    pub week_kwh: Option<f64>,
    pub week_cost: Option<f64>,
    pub month_kwh: Option<f64>,
    pub month_cost: Option<f64>,
    pub meter_total_kwh: Option<f64>,
    pub meter_total_cost: Option<f64>,
}

impl PeriodSummary {
    pub fn from_remote(
        day: &RemoteStats,
        week: &RemoteStats,
        month: &RemoteStats,
        latest: &LatestReading,
        per_kwh: f64,
    ) -> Self {
        let cost = |kwh: Option<f64>| Some(kwh.unwrap_or(0.0) * per_kwh);
        Self {
            day_kwh: day.energy_used_kwh,
            day_cost: cost(day.energy_used_kwh),
            week_kwh: week.energy_used_kwh,
            week_cost: cost(week.energy_used_kwh),
            month_kwh: month.energy_used_kwh,
            month_cost: cost(month.energy_used_kwh),
            meter_total_kwh: latest.energy_in_kwh,
            meter_total_cost: cost(latest.energy_in_kwh),
        }
    }
}

pub struct Session<Tz: TimeZone> {
    settings: SessionSettings,
    tz: Tz,
    store: TimeSeriesStore,
    selection: Option<Selection>,
    stats: Option<StatsResult>,
    tracker: LiveWindowTracker,
    daily: Vec<DailyBucket>,
    moving_avg: Vec<DailyBucket>,
    avg_daily_kwh: Option<f64>,
    ema_power_w: Vec<Option<f64>>,
    daily_kwh: Vec<Option<f64>>,
    typical_daily_kwh: Vec<Option<f64>>,
    moving_avg_kwh: Vec<Option<f64>>,
    period_summary: Option<PeriodSummary>,
    connected: bool,
    generation: u64,
}

impl<Tz: TimeZone> Session<Tz> {
    pub fn new(settings: SessionSettings, tz: Tz) -> Self {
        Self {
            settings,
            tz,
            store: TimeSeriesStore::new(),
            selection: None,
            stats: None,
            tracker: LiveWindowTracker::new(settings.live_threshold_sec),
            daily: Vec::new(),
            moving_avg: Vec::new(),
            avg_daily_kwh: None,
            ema_power_w: Vec::new(),
            daily_kwh: Vec::new(),
            typical_daily_kwh: Vec::new(),
            moving_avg_kwh: Vec::new(),
            period_summary: None,
            connected: false,
            generation: 0,
        }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn tz(&self) -> &Tz {
        &self.tz
    }

    pub fn store(&self) -> &TimeSeriesStore {
        &self.store
    }

    pub fn selection(&self) -> Option<Selection> {
        self.selection
    }

    pub fn stats(&self) -> Option<StatsResult> {
        self.stats
    }

    pub fn view(&self) -> Option<ViewWindow> {
        self.tracker.view()
    }

    pub fn is_live_view(&self) -> bool {
        self.tracker.is_live_view()
    }

    pub fn connected(&self) -> bool {
        self.connected
    }

    pub fn period_summary(&self) -> Option<PeriodSummary> {
        self.period_summary
    }

    pub fn set_connected(&mut self, connected: bool) {
        if self.connected != connected {
            info!(connected, "backend connectivity changed");
        }
        self.connected = connected;
    }

    /// Lower bound for the next incremental fetch: one millisecond past the newest sample.
    pub fn incremental_start_ms(&self) -> Option<i64> {
        self.store.latest_timestamp_sec().map(|ts| ts * 1000 + 1)
    }

    pub fn begin_full_reload(&mut self) -> FullLoadTicket {
        self.generation += 1;
        FullLoadTicket {
            generation: self.generation,
        }
    }

    /// Replace the series with a full load. Results from superseded reloads are
    /// dropped and `false` is returned.
    pub fn apply_full_load(&mut self, ticket: FullLoadTicket, readings: &[Reading]) -> bool {
        if ticket.generation != self.generation {
            warn!(
                ticket = ticket.generation,
                current = self.generation,
                "discarding stale full reload"
            );
            return false;
        }

        let prev_latest = self.store.latest_timestamp_sec();
        self.store.replace(readings);
        self.store.downsample(self.settings.max_points);

        self.selection = None;
        self.stats = None;
        self.tracker.on_merge(prev_latest, self.store.latest_timestamp_sec());
        self.recompute_derived();
        self.set_connected(true);

        info!(
            received = readings.len(),
            points = self.store.len(),
            "full load applied"
        );
        true
    }

    /// Merge a polled batch. Returns the number of new samples.
    ///
    /// A batch arriving while nothing is loaded is treated as a full load and
    /// downsampled, without a reload ticket.
    pub fn apply_incremental(&mut self, readings: &[Reading]) -> usize {
        self.set_connected(true);

        if self.store.is_empty() {
            let stored = self.store.replace(readings);
            if stored == 0 {
                return 0;
            }
            self.store.downsample(self.settings.max_points);
            self.tracker.on_merge(None, self.store.latest_timestamp_sec());
            self.recompute_derived();
            self.recompute_stats();
            info!(
                received = readings.len(),
                points = self.store.len(),
                "first poll loaded into empty series"
            );
            return stored;
        }

        let prev_latest = self.store.latest_timestamp_sec();
        let prev_len = self.store.len();
        let appended = self.store.append_incremental(readings, prev_latest);
        if appended == 0 {
            return 0;
        }

        let new_latest = self.store.latest_timestamp_sec();
        self.tracker.on_merge(prev_latest, new_latest);

        if let (Some(selection), Some(prev), Some(new)) =
            (self.selection.as_mut(), prev_latest, new_latest)
        {
            let end_sec = selection.end_ms.div_euclid(1000);
            if (end_sec - prev).abs() < self.settings.live_threshold_sec {
                selection.end_ms = new * 1000;
                debug!(end_ms = selection.end_ms, "selection follows live data");
            }
        }

        self.extend_derived(prev_len);
        self.recompute_stats();
        appended
    }

    pub fn apply_summary(&mut self, summary: &EnergySummary) {
        self.daily = summary.daily_buckets(&self.tz);
        self.moving_avg = summary.moving_average_buckets(&self.tz);
        self.avg_daily_kwh = summary.avg_daily.filter(|v| v.is_finite());
        debug!(
            days = self.daily.len(),
            moving_avg_days = self.moving_avg.len(),
            avg_daily = ?self.avg_daily_kwh,
            "energy summary applied"
        );
        self.recompute_derived();
    }

    pub fn apply_period_summary(&mut self, summary: PeriodSummary) {
        self.period_summary = Some(summary);
    }

    /// Average daily usage from the summary, else estimated from the meter column.
    pub fn avg_daily_kwh(&self) -> Option<f64> {
        self.avg_daily_kwh
            .or_else(|| average_daily_usage(self.store.series()))
    }

    /// Make `[start_ms, end_ms]` the analysis window, optionally clamped to the
    /// loaded data. A rejected window leaves the previous selection in place.
    pub fn apply_selection(
        &mut self,
        start_ms: i64,
        end_ms: i64,
        clamp_to_data: bool,
    ) -> Result<Option<StatsResult>> {
        let selection = match (clamp_to_data, self.store.series().time_bounds()) {
            (true, Some((first, last))) => {
                Selection::clamped(start_ms, end_ms, first * 1000, last * 1000)?
            }
            _ => Selection::new(start_ms, end_ms)?,
        };
        Ok(self.set_selection(selection))
    }

    fn set_selection(&mut self, selection: Selection) -> Option<StatsResult> {
        self.selection = Some(selection);
        self.tracker.set_view(
            selection.start_ms.div_euclid(1000),
            selection.end_ms.div_euclid(1000),
            self.store.latest_timestamp_sec(),
        );
        self.recompute_stats();
        debug!(
            start_ms = selection.start_ms,
            end_ms = selection.end_ms,
            samples = self.stats.map(|s| s.sample_count).unwrap_or(0),
            "selection applied"
        );
        self.stats
    }

    /// Select the whole loaded dataset.
    pub fn select_all(&mut self) -> Result<Option<StatsResult>> {
        match self.store.series().time_bounds() {
            Some((first, last)) => self.apply_selection(first * 1000, last * 1000, false),
            None => Err(AppError::InvalidSelection("no data loaded".to_string())),
        }
    }

    pub fn select_preset(
        &mut self,
        preset: RangePreset,
        now: &DateTime<Tz>,
    ) -> Result<Option<StatsResult>> {
        let Some((first, last)) = self.store.series().time_bounds() else {
            return Err(AppError::InvalidSelection("no data loaded".to_string()));
        };

        let range = if preset.is_relative() {
            preset.relative_range(first * 1000, last * 1000)
        } else {
            preset.calendar_range(now)
        };
        let (start_ms, end_ms) = range.ok_or_else(|| {
            AppError::InvalidSelection(format!("cannot build range for {:?}", preset))
        })?;
        self.apply_selection(start_ms, end_ms, true)
    }

    pub fn clear_selection(&mut self) {
        self.selection = None;
        self.stats = None;
        self.tracker.clear_view(self.store.latest_timestamp_sec());
    }

    /// Show the full dataset and drop the selection.
    pub fn reset_view(&mut self) {
        self.clear_selection();
        if let Some((first, last)) = self.store.series().time_bounds() {
            self.tracker.set_view(first, last, Some(last));
        }
    }

    pub fn hover(&self, target_sec: f64) -> Option<HoverPoint> {
        let i = self.store.nearest_index(target_sec)?;
        let series = self.store.series();
        Some(HoverPoint {
            timestamp_sec: series.timestamps_sec[i],
            power_w: series.power_w[i],
            energy_kwh: series.energy_kwh[i],
        })
    }

    /// What an average day's usage would be over the selected span.
    pub fn typical_energy_kwh(&self) -> Option<f64> {
        let selection = self.selection?;
        typical_energy_kwh(self.avg_daily_kwh(), selection.duration_ms())
    }

    /// Daily usage for the days covered by the selection.
    pub fn daily_breakdown(&self) -> Option<DailyBreakdown> {
        let selection = self.selection?;
        let day_of = |ms: i64| {
            DateTime::from_timestamp_millis(ms).map(|dt| dt.with_timezone(&self.tz).date_naive())
        };
        Some(daily_breakdown(
            &self.daily,
            &self.moving_avg,
            self.avg_daily_kwh(),
            day_of(selection.start_ms)?,
            day_of(selection.end_ms)?,
            self.settings.cost_per_kwh,
        ))
    }

    pub fn frame(&self) -> ChartFrame {
        let series = self.store.series();
        ChartFrame {
            timestamps_sec: series.timestamps_sec.clone(),
            power_w: series.power_w.clone(),
            energy_kwh: series.energy_kwh.clone(),
            ema_power_w: self.ema_power_w.clone(),
            daily_kwh: self.daily_kwh.clone(),
            typical_daily_kwh: self.typical_daily_kwh.clone(),
            moving_avg_kwh: self.moving_avg_kwh.clone(),
            stats: self.stats,
            selection: self.selection,
            view: self.tracker.view(),
            is_live_view: self.tracker.is_live_view(),
            connected: self.connected,
        }
    }

    fn recompute_stats(&mut self) {
        self.stats = self
            .selection
            .and_then(|s| aggregate(self.store.series(), s.start_ms, s.end_ms));
    }

    fn recompute_derived(&mut self) {
        self.ema_power_w.clear();
        self.daily_kwh.clear();
        self.moving_avg_kwh.clear();
        self.extend_derived(0);
    }

    /// Bring the derived columns up to the store's length, starting at `from`.
    fn extend_derived(&mut self, from: usize) {
        let series = self.store.series();
        let from = from
            .min(self.ema_power_w.len())
            .min(self.daily_kwh.len())
            .min(self.moving_avg_kwh.len());
        self.ema_power_w.truncate(from);
        self.daily_kwh.truncate(from);
        self.moving_avg_kwh.truncate(from);

        let last = self.ema_power_w.last().copied().flatten();
        let mut ema = Ema::resume(self.settings.ema_alpha, last);
        self.ema_power_w
            .extend(series.power_w[from..].iter().map(|p| ema.update(*p)));
        self.daily_kwh
            .extend(align_daily(&self.daily, &series.timestamps_sec[from..], &self.tz));
        self.moving_avg_kwh
            .extend(align_daily(&self.moving_avg, &series.timestamps_sec[from..], &self.tz));
        self.typical_daily_kwh = typical_trace(self.avg_daily_kwh(), series.len());
    }
}
