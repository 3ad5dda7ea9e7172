//! Event loop driving a [`Session`]
//!
//! Fetches run as spawned tasks and post their results onto one queue. The
//! loop drains that queue and is the only place the session is mutated, so
//! each fetch result or user command is applied to completion before the next.

use crate::api::EnergySource;
use crate::api::models::{EnergySummary, Reading};
use crate::config::Config;
use crate::error::{AppError, Result};
use crate::session::{FullLoadTicket, PeriodSummary, Session};
use crate::view::{PeriodBounds, RangePreset, Selection, DAY_MS};
use chrono::{TimeZone, Utc};
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const QUEUE_CAPACITY: usize = 64;
const MAX_DAYS: u32 = 365;

/// Sending half of the event queue.
pub type EventSender = mpsc::Sender<Event>;

/// User actions, as typed on the console.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Clear the backend cache and reload everything
    Refresh,
    /// Show the whole dataset without a selection
    ResetView,
    ClearSelection,
    SelectAll,
    Preset(RangePreset),
    /// Reload the last N days once typing settles
    Days(u32),
    /// Select `[start, end]` in epoch milliseconds
    Range { start_ms: f64, end_ms: f64 },
    Hover(f64),
    /// Print the current chart frame as JSON
    Frame,
    /// Print the period summary and the daily breakdown
    Summary,
}

impl FromStr for Command {
    type Err = AppError;

    fn from_str(line: &str) -> Result<Self> {
        let mut parts = line.split_whitespace();
        let head = parts
            .next()
            .ok_or_else(|| AppError::InvalidCommand("empty input".to_string()))?;

        let mut number = |name: &str| -> Result<f64> {
            let raw = parts
                .next()
                .ok_or_else(|| AppError::InvalidCommand(format!("{} is missing", name)))?;
            raw.parse::<f64>()
                .map_err(|_| AppError::InvalidCommand(format!("{} is not a number: {}", name, raw)))
        };

        let command = match head.to_ascii_lowercase().as_str() {
            "r" | "refresh" => Command::Refresh,
            "esc" | "reset" => Command::ResetView,
            "clear" => Command::ClearSelection,
            "all" => Command::SelectAll,
            "1" => Command::Preset(RangePreset::LastHour),
            "2" => Command::Preset(RangePreset::LastDay),
            "3" => Command::Preset(RangePreset::ThisWeek),
            "4" => Command::Preset(RangePreset::LastMonth),
            "5" => Command::Preset(RangePreset::LastYear),
            "days" => {
                let days = number("days")?;
                if !days.is_finite() || days < 0.0 {
                    return Err(AppError::InvalidCommand(format!("bad day count: {}", days)));
                }
                Command::Days(days as u32)
            }
            "range" => Command::Range {
                start_ms: number("start")?,
                end_ms: number("end")?,
            },
            "hover" => Command::Hover(number("time")?),
            "frame" => Command::Frame,
            "summary" => Command::Summary,
            other => return Err(AppError::InvalidCommand(other.to_string())),
        };
        Ok(command)
    }
}

#[derive(Debug)]
pub enum Event {
    FullLoad {
        ticket: FullLoadTicket,
        result: Result<Vec<Reading>>,
    },
    /// The poll interval elapsed
    PollDue,
    Poll(Result<Vec<Reading>>),
    Summary(Result<EnergySummary>),
    PeriodSummary(Result<PeriodSummary>),
    /// A debounced day count settled
    DaysSettled(u32),
    Command(Command),
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub poll_interval: Duration,
    pub debounce: Duration,
    pub initial_days: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            debounce: Duration::from_millis(500),
            initial_days: 7,
        }
    }
}

impl SchedulerConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            poll_interval: config.polling.interval(),
            debounce: config.polling.debounce(),
            initial_days: config.session.initial_days,
        }
    }
}

/// Delayed event with cancel-and-resubmit semantics: submitting again drops
/// whatever was still waiting.
pub struct Debouncer {
    delay: Duration,
    pending: Option<JoinHandle<()>>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: None,
        }
    }

    pub fn submit(&mut self, tx: &EventSender, event: Event) {
        self.cancel();
        let tx = tx.clone();
        let delay = self.delay;
        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(event).await;
        }));
    }

    pub fn cancel(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.as_ref().is_some_and(|h| !h.is_finished())
    }
}

/// Post `PollDue` every `interval`, whether or not the previous poll succeeded.
pub fn spawn_poller(tx: EventSender, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Poller started (interval: {:?})", interval);
        loop {
            tokio::time::sleep(interval).await;
            if tx.send(Event::PollDue).await.is_err() {
                debug!("event queue closed, poller stopping");
                break;
            }
        }
    })
}

pub struct Scheduler<Tz: TimeZone> {
    session: Session<Tz>,
    source: Arc<dyn EnergySource>,
    config: SchedulerConfig,
    days: u32,
    tx: EventSender,
    rx: mpsc::Receiver<Event>,
    debouncer: Debouncer,
    poller: Option<JoinHandle<()>>,
}

impl<Tz: TimeZone> Scheduler<Tz> {
    pub fn new(
        session: Session<Tz>,
        source: Arc<dyn EnergySource>,
        config: SchedulerConfig,
    ) -> Self {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        Self {
            session,
            source,
            days: config.initial_days.clamp(1, MAX_DAYS),
            debouncer: Debouncer::new(config.debounce),
            config,
            tx,
            rx,
            poller: None,
        }
    }

    pub fn session(&self) -> &Session<Tz> {
        &self.session
    }

    pub fn sender(&self) -> EventSender {
        self.tx.clone()
    }

    pub fn days(&self) -> u32 {
        self.days
    }

    /// Kick off the initial loads and the poller.
    pub fn start(&mut self) {
        info!(days = self.days, "starting session");
        self.spawn_full_reload(false);
        self.spawn_summary();
        self.spawn_period_summary();
        if self.poller.is_none() {
            self.poller = Some(spawn_poller(self.tx.clone(), self.config.poll_interval));
        }
    }

    /// Handle events until `shutdown` resolves.
    pub async fn run<F: Future<Output = ()>>(&mut self, shutdown: F) {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, stopping event loop");
                    break;
                }
                event = self.rx.recv() => match event {
                    Some(event) => self.handle(event),
                    None => break,
                },
            }
        }
        self.stop();
    }

    /// Wait for and handle a single event.
    pub async fn step(&mut self) -> bool {
        match self.rx.recv().await {
            Some(event) => {
                self.handle(event);
                true
            }
            None => false,
        }
    }

    pub fn stop(&mut self) {
        self.debouncer.cancel();
        if let Some(poller) = self.poller.take() {
            poller.abort();
        }
    }

    pub fn handle(&mut self, event: Event) {
        match event {
            Event::FullLoad { ticket, result } => match result {
                Ok(rows) => {
                    if self.session.apply_full_load(ticket, &rows) {
                        if let Err(e) = self.session.select_all() {
                            debug!("No selection after full load: {}", e);
                        }
                        self.log_frame("full load");
                    }
                }
                Err(e) => self.fetch_failed("full reload", &e),
            },
            Event::PollDue => self.spawn_poll(),
            Event::Poll(result) => match result {
                Ok(rows) => {
                    if self.session.apply_incremental(&rows) > 0 {
                        self.log_frame("poll");
                        self.spawn_period_summary();
                    }
                }
                Err(e) => self.fetch_failed("poll", &e),
            },
            Event::Summary(result) => match result {
                Ok(summary) => self.session.apply_summary(&summary),
                Err(e) => self.fetch_failed("energy summary", &e),
            },
            Event::PeriodSummary(result) => match result {
                Ok(summary) => {
                    info!(
                        day_kwh = ?summary.day_kwh,
                        week_kwh = ?summary.week_kwh,
                        month_kwh = ?summary.month_kwh,
                        meter_total_kwh = ?summary.meter_total_kwh,
                        "period summary updated"
                    );
                    self.session.apply_period_summary(summary);
                }
                Err(e) => self.fetch_failed("period summary", &e),
            },
            Event::DaysSettled(days) => {
                self.days = days.clamp(1, MAX_DAYS);
                info!(days = self.days, "loading day range");
                self.spawn_full_reload(false);
            }
            Event::Command(command) => self.handle_command(command),
        }
    }

    fn handle_command(&mut self, command: Command) {
        debug!(?command, "handling command");
        let result = match command {
            Command::Refresh => {
                self.spawn_full_reload(true);
                self.spawn_summary();
                self.spawn_period_summary();
                Ok(())
            }
            Command::ResetView => {
                self.session.reset_view();
                Ok(())
            }
            Command::ClearSelection => {
                self.session.clear_selection();
                Ok(())
            }
            Command::SelectAll => self.session.select_all().map(|_| ()),
            Command::Preset(preset) => {
                let now = Utc::now().with_timezone(self.session.tz());
                self.session.select_preset(preset, &now).map(|_| ())
            }
            Command::Days(days) => {
                self.debouncer.submit(&self.tx, Event::DaysSettled(days));
                return;
            }
            Command::Range { start_ms, end_ms } => Selection::from_f64(start_ms, end_ms)
                .and_then(|s| self.session.apply_selection(s.start_ms, s.end_ms, true))
                .map(|_| ()),
            Command::Hover(target_sec) => {
                match self.session.hover(target_sec) {
                    Some(point) => info!(
                        timestamp_sec = point.timestamp_sec,
                        power_w = ?point.power_w,
                        energy_kwh = ?point.energy_kwh,
                        "hover"
                    ),
                    None => info!("No data to hover"),
                }
                return;
            }
            Command::Frame => {
                print_json(&self.session.frame());
                return;
            }
            Command::Summary => {
                print_json(&self.session.period_summary());
                print_json(&self.session.daily_breakdown());
                return;
            }
        };

        match result {
            Ok(()) => self.log_frame("command"),
            Err(e) => warn!("Command rejected: {}", e),
        }
    }

    fn fetch_failed(&mut self, what: &str, error: &AppError) {
        warn!("{} failed: {}", what, error);
        if error.is_connectivity() {
            self.session.set_connected(false);
        }
    }

    fn spawn_full_reload(&mut self, clear_cache: bool) {
        let ticket = self.session.begin_full_reload();
        let start_ms = Utc::now().timestamp_millis() - i64::from(self.days) * DAY_MS;
        let source = Arc::clone(&self.source);
        let tx = self.tx.clone();

        tokio::spawn(async move {
            if clear_cache {
                source.clear_cache().await;
            }
            let result = source.readings(Some(start_ms), None).await;
            let _ = tx.send(Event::FullLoad { ticket, result }).await;
        });
    }

    fn spawn_poll(&self) {
        // Nothing loaded yet: ask for the whole configured range
        let start_ms = self
            .session
            .incremental_start_ms()
            .unwrap_or_else(|| Utc::now().timestamp_millis() - i64::from(self.days) * DAY_MS);
        let source = Arc::clone(&self.source);
        let tx = self.tx.clone();

        tokio::spawn(async move {
            let result = source.readings(Some(start_ms), None).await;
            let _ = tx.send(Event::Poll(result)).await;
        });
    }

    fn spawn_summary(&self) {
        let source = Arc::clone(&self.source);
        let tx = self.tx.clone();

        tokio::spawn(async move {
            let result = source.energy_summary().await;
            let _ = tx.send(Event::Summary(result)).await;
        });
    }

    fn spawn_period_summary(&self) {
        let now = Utc::now().with_timezone(self.session.tz());
        let Some(bounds) = PeriodBounds::at(&now) else {
            warn!("Could not resolve local period boundaries");
            return;
        };
        let per_kwh = self.session.settings().cost_per_kwh;
        let source = Arc::clone(&self.source);
        let tx = self.tx.clone();

        tokio::spawn(async move {
            let result = async {
                let (day, week, month, latest) = futures::try_join!(
                    source.stats(bounds.day_start_ms, bounds.now_ms),
                    source.stats(bounds.week_start_ms, bounds.now_ms),
                    source.stats(bounds.month_start_ms, bounds.now_ms),
                    source.latest_reading(),
                )?;
                Ok::<_, AppError>(PeriodSummary::from_remote(&day, &week, &month, &latest, per_kwh))
            }
            .await;
            let _ = tx.send(Event::PeriodSummary(result)).await;
        });
    }

    fn log_frame(&self, reason: &str) {
        let stats = self.session.stats();
        let per_kwh = self.session.settings().cost_per_kwh;
        info!(
            reason,
            points = self.session.store().len(),
            live = self.session.is_live_view(),
            connected = self.session.connected(),
            samples = stats.map(|s| s.sample_count).unwrap_or(0),
            avg_w = ?stats.and_then(|s| s.avg_power_w),
            energy_kwh = ?stats.and_then(|s| s.energy_used_kwh),
            cost = ?stats.and_then(|s| s.cost(per_kwh)),
            typical_kwh = ?self.session.typical_energy_kwh(),
            "frame updated"
        );
    }
}

impl<Tz: TimeZone> Drop for Scheduler<Tz> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => warn!("Failed to serialize output: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::{LatestReading, RemoteStats};
    use crate::session::SessionSettings;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeSource {
        rows: Mutex<Vec<Reading>>,
        offline: AtomicBool,
        cache_clears: AtomicUsize,
        stats_calls: AtomicUsize,
    }

    impl FakeSource {
        fn with_minutes(minutes: i64) -> Self {
            let now_sec = Utc::now().timestamp();
            let rows = (0..minutes)
                .map(|i| {
                    let t = now_sec - (minutes - i) * 60;
                    Reading::new(t * 1000, Some(500.0), Some(10.0 + i as f64 * 0.01))
                })
                .collect();
            Self {
                rows: Mutex::new(rows),
                ..Self::default()
            }
        }

        fn push(&self, reading: Reading) {
            self.rows.lock().unwrap().push(reading);
        }

        fn check(&self) -> Result<()> {
            if self.offline.load(Ordering::SeqCst) {
                return Err(AppError::Status {
                    status: 503,
                    url: "fake".to_string(),
                });
            }
            Ok(())
        }
    }

    #[async_trait]
    impl EnergySource for FakeSource {
        async fn readings(
            &self,
            start_ms: Option<i64>,
            end_ms: Option<i64>,
        ) -> Result<Vec<Reading>> {
            self.check()?;
            let rows = self.rows.lock().unwrap();
            Ok(rows
                .iter()
                .filter(|r| {
                    start_ms.map_or(true, |s| r.t >= s) && end_ms.map_or(true, |e| r.t <= e)
                })
                .copied()
                .collect())
        }

        async fn stats(&self, _start_ms: i64, _end_ms: i64) -> Result<RemoteStats> {
            self.stats_calls.fetch_add(1, Ordering::SeqCst);
            self.check()?;
            Ok(RemoteStats {
                energy_used_kwh: Some(1.5),
                ..RemoteStats::default()
            })
        }

        async fn energy_summary(&self) -> Result<EnergySummary> {
            self.check()?;
            Ok(EnergySummary {
                avg_daily: Some(12.0),
                ..EnergySummary::default()
            })
        }

        async fn latest_reading(&self) -> Result<LatestReading> {
            self.check()?;
            Ok(LatestReading {
                energy_in_kwh: Some(1234.0),
            })
        }

        async fn clear_cache(&self) {
            self.cache_clears.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn scheduler(source: Arc<FakeSource>) -> Scheduler<Utc> {
        let session = Session::new(SessionSettings::default(), Utc);
        Scheduler::new(session, source, SchedulerConfig::default())
    }

    async fn drain(scheduler: &mut Scheduler<Utc>, events: usize) {
        for _ in 0..events {
            assert!(scheduler.step().await);
        }
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!("r".parse::<Command>().unwrap(), Command::Refresh);
        assert_eq!("ESC".parse::<Command>().unwrap(), Command::ResetView);
        assert_eq!("3".parse::<Command>().unwrap(), Command::Preset(RangePreset::ThisWeek));
        assert_eq!("days 30".parse::<Command>().unwrap(), Command::Days(30));
        assert_eq!(
            "range 1000 5000.5".parse::<Command>().unwrap(),
            Command::Range {
                start_ms: 1000.0,
                end_ms: 5000.5
            }
        );
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(matches!("".parse::<Command>(), Err(AppError::InvalidCommand(_))));
        assert!("days".parse::<Command>().is_err());
        assert!("days many".parse::<Command>().is_err());
        assert!("days -2".parse::<Command>().is_err());
        assert!("zoom".parse::<Command>().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_debouncer_keeps_last_submission() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut debouncer = Debouncer::new(Duration::from_millis(500));

        debouncer.submit(&tx, Event::DaysSettled(3));
        tokio::time::sleep(Duration::from_millis(200)).await;
        debouncer.submit(&tx, Event::DaysSettled(30));
        assert!(debouncer.is_pending());

        tokio::time::sleep(Duration::from_millis(1000)).await;

        assert!(matches!(rx.try_recv(), Ok(Event::DaysSettled(30))));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_poller_ticks_on_interval() {
        let (tx, mut rx) = mpsc::channel(8);
        let poller = spawn_poller(tx, Duration::from_secs(10));

        tokio::time::sleep(Duration::from_secs(25)).await;
        poller.abort();

        assert!(matches!(rx.try_recv(), Ok(Event::PollDue)));
        assert!(matches!(rx.try_recv(), Ok(Event::PollDue)));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_start_loads_and_selects_everything() {
        let source = Arc::new(FakeSource::with_minutes(60));
        let mut scheduler = scheduler(source);

        scheduler.start();
        drain(&mut scheduler, 3).await;

        let session = scheduler.session();
        assert_eq!(session.store().len(), 60);
        assert!(session.connected());
        assert_eq!(session.stats().unwrap().sample_count, 60);
        assert_eq!(session.avg_daily_kwh(), Some(12.0));
        assert_eq!(session.period_summary().unwrap().meter_total_kwh, Some(1234.0));
    }

    #[tokio::test]
    async fn test_poll_merges_new_readings() {
        let source = Arc::new(FakeSource::with_minutes(10));
        let mut scheduler = scheduler(Arc::clone(&source));
        scheduler.start();
        drain(&mut scheduler, 3).await;

        let latest = scheduler.session().store().latest_timestamp_sec().unwrap();
        source.push(Reading::new((latest + 10) * 1000, Some(800.0), Some(11.0)));
        scheduler.handle(Event::PollDue);
        drain(&mut scheduler, 1).await;

        assert_eq!(scheduler.session().store().len(), 11);
        // Selection covered everything, so it follows the new sample
        assert_eq!(scheduler.session().selection().unwrap().end_ms, (latest + 10) * 1000);

        // New data refreshes the day/week/month totals
        drain(&mut scheduler, 1).await;
        assert_eq!(source.stats_calls.load(Ordering::SeqCst), 6);
        assert!(scheduler.session().period_summary().is_some());
    }

    #[tokio::test]
    async fn test_empty_poll_skips_period_summary() {
        let source = Arc::new(FakeSource::with_minutes(10));
        let mut scheduler = scheduler(Arc::clone(&source));
        scheduler.start();
        drain(&mut scheduler, 3).await;

        scheduler.handle(Event::PollDue);
        drain(&mut scheduler, 1).await;

        assert_eq!(scheduler.session().store().len(), 10);
        assert_eq!(source.stats_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_failed_poll_marks_disconnected() {
        let source = Arc::new(FakeSource::with_minutes(10));
        let mut scheduler = scheduler(Arc::clone(&source));
        scheduler.start();
        drain(&mut scheduler, 3).await;

        source.offline.store(true, Ordering::SeqCst);
        scheduler.handle(Event::PollDue);
        drain(&mut scheduler, 1).await;

        assert!(!scheduler.session().connected());
        assert_eq!(scheduler.session().store().len(), 10);
    }

    #[tokio::test]
    async fn test_refresh_clears_cache() {
        let source = Arc::new(FakeSource::with_minutes(5));
        let mut scheduler = scheduler(Arc::clone(&source));

        scheduler.handle(Event::Command(Command::Refresh));
        drain(&mut scheduler, 3).await;

        assert_eq!(source.cache_clears.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.session().store().len(), 5);
    }

    #[tokio::test]
    async fn test_days_settled_is_clamped() {
        let source = Arc::new(FakeSource::with_minutes(5));
        let mut scheduler = scheduler(source);

        scheduler.handle(Event::DaysSettled(0));
        assert_eq!(scheduler.days(), 1);
        scheduler.handle(Event::DaysSettled(5000));
        assert_eq!(scheduler.days(), 365);

        // Only the newer reload applies
        drain(&mut scheduler, 2).await;
        assert_eq!(scheduler.session().store().len(), 5);
    }

    #[tokio::test]
    async fn test_invalid_range_keeps_selection() {
        let source = Arc::new(FakeSource::with_minutes(10));
        let mut scheduler = scheduler(source);
        scheduler.start();
        drain(&mut scheduler, 3).await;
        let before = scheduler.session().selection();

        scheduler.handle(Event::Command(Command::Range {
            start_ms: f64::NAN,
            end_ms: 0.0,
        }));

        assert_eq!(scheduler.session().selection(), before);
    }
}
