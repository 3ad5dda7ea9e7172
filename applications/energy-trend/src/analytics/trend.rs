use crate::api::models::DailyBucket;
use crate::series::Series;
use chrono::{DateTime, NaiveDate, TimeZone};
use serde::Serialize;
use std::collections::HashMap;

const SECS_PER_DAY: f64 = 86_400.0;

/// Exponential moving average with a fixed smoothing factor.
#[derive(Debug, Clone, Copy)]
pub struct Ema {
    alpha: f64,
    current: Option<f64>,
}

impl Ema {
    pub fn with_alpha(alpha: f64) -> Self {
        Self {
            alpha: alpha.clamp(f64::MIN_POSITIVE, 1.0),
            current: None,
        }
    }

    /// Smoothing factor `2 / (N + 1)` for an equivalent window of `N` samples,
    /// where `N = window_secs / sample_period_secs`.
    pub fn for_window(window_secs: f64, sample_period_secs: f64) -> Self {
        let samples = (window_secs / sample_period_secs).max(1.0);
        Self::with_alpha(2.0 / (samples + 1.0))
    }

    /// Continue an average whose last value is `last`.
    pub fn resume(alpha: f64, last: Option<f64>) -> Self {
        let mut ema = Self::with_alpha(alpha);
        ema.current = last.filter(|v| v.is_finite());
        ema
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Feed one sample. Non-finite values leave the average untouched.
    pub fn update(&mut self, value: Option<f64>) -> Option<f64> {
        if let Some(v) = value.filter(|v| v.is_finite()) {
            self.current = Some(match self.current {
                Some(prev) => self.alpha * v + (1.0 - self.alpha) * prev,
                None => v,
            });
        }
        self.current
    }

    pub fn value(&self) -> Option<f64> {
        self.current
    }
}

/// EMA of a power column, one output per input; `None` until the first finite sample.
pub fn ema_series(power_w: &[Option<f64>], alpha: f64) -> Vec<Option<f64>> {
    let mut ema = Ema::with_alpha(alpha);
    power_w.iter().map(|p| ema.update(*p)).collect()
}

/// For every timestamp, the kWh of the calendar day (in `tz`) it falls in.
pub fn align_daily<Tz: TimeZone>(
    buckets: &[DailyBucket],
    timestamps_sec: &[i64],
    tz: &Tz,
) -> Vec<Option<f64>> {
    if buckets.is_empty() {
        return vec![None; timestamps_sec.len()];
    }

    let by_day: HashMap<NaiveDate, f64> = buckets.iter().map(|b| (b.day, b.kwh)).collect();

    timestamps_sec
        .iter()
        .map(|&ts| {
            let day = DateTime::from_timestamp(ts, 0)?.with_timezone(tz).date_naive();
            by_day.get(&day).copied()
        })
        .collect()
}

/// Flat reference line at the average daily usage.
pub fn typical_trace(avg_daily_kwh: Option<f64>, len: usize) -> Vec<Option<f64>> {
    vec![avg_daily_kwh.filter(|v| v.is_finite()); len]
}

/// Average kWh per day over the trailing year of meter readings.
pub fn average_daily_usage(series: &Series) -> Option<f64> {
    let last_ts = series.last_timestamp_sec()?;
    let year_ago = last_ts - 365 * 86_400;

    let meter: Vec<(i64, f64)> = series
        .timestamps_sec
        .iter()
        .zip(&series.energy_kwh)
        .filter(|(ts, _)| **ts >= year_ago)
        .filter_map(|(ts, e)| e.filter(|v| v.is_finite()).map(|v| (*ts, v)))
        .collect();

    let (&(t0, e0), &(t1, e1)) = (meter.first()?, meter.last()?);
    let span_days = (t1 - t0) as f64 / SECS_PER_DAY;
    if meter.len() < 2 || span_days <= 0.0 {
        return None;
    }
    Some((e1 - e0) / span_days)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyBreakdownRow {
    pub day: NaiveDate,
    pub kwh: f64,
    pub cost: f64,
    pub is_partial: bool,
    /// Usage above (positive) or below the baseline
    pub diff_kwh: Option<f64>,
    pub diff_cost: Option<f64>,
}

/// Per-day usage compared against a 30-day moving average baseline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyBreakdown {
    pub baseline_kwh: Option<f64>,
    pub baseline_cost: Option<f64>,
    pub rows: Vec<DailyBreakdownRow>,
}

/// Build the breakdown for days in `[from, to]`, newest first.
///
/// The baseline is the moving average recorded for the newest listed day, or
/// the overall daily average when that day has none.
pub fn daily_breakdown(
    daily: &[DailyBucket],
    moving_avg: &[DailyBucket],
    avg_daily_kwh: Option<f64>,
    from: NaiveDate,
    to: NaiveDate,
    per_kwh: f64,
) -> DailyBreakdown {
    let mut days: Vec<&DailyBucket> = daily
        .iter()
        .filter(|d| d.day >= from && d.day <= to)
        .collect();
    days.sort_by(|a, b| b.day.cmp(&a.day));

    let avg_by_day: HashMap<NaiveDate, f64> = moving_avg.iter().map(|b| (b.day, b.kwh)).collect();
    let baseline_kwh = days
        .first()
        .and_then(|latest| avg_by_day.get(&latest.day).copied())
        .or(avg_daily_kwh);

    let rows = days
        .into_iter()
        .map(|d| {
            let diff_kwh = baseline_kwh.map(|b| d.kwh - b);
            DailyBreakdownRow {
                day: d.day,
                kwh: d.kwh,
                cost: d.kwh * per_kwh,
                is_partial: d.is_partial,
                diff_kwh,
                diff_cost: diff_kwh.map(|diff| diff * per_kwh),
            }
        })
        .collect();

    DailyBreakdown {
        baseline_kwh,
        baseline_cost: baseline_kwh.map(|b| b * per_kwh),
        rows,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, Utc};
    use pretty_assertions::assert_eq;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn bucket(y: i32, m: u32, d: u32, kwh: f64) -> DailyBucket {
        DailyBucket {
            day: day(y, m, d),
            kwh,
            is_partial: false,
        }
    }

    fn epoch(rfc3339: &str) -> i64 {
        DateTime::parse_from_rfc3339(rfc3339).unwrap().timestamp()
    }

    #[test]
    fn test_ema_carries_forward_through_null() {
        let out = ema_series(&[Some(100.0), None, Some(100.0), Some(100.0)], 0.1);

        assert_eq!(out[0], Some(100.0));
        assert_eq!(out[1], out[0]);
        assert_eq!(out[3], Some(100.0));
    }

    #[test]
    fn test_ema_converges_towards_constant_input() {
        let out = ema_series(&[Some(100.0), None, Some(200.0), Some(200.0)], 0.2);

        let (e2, e3) = (out[2].unwrap(), out[3].unwrap());
        assert!(e2 > 100.0 && e2 < 200.0);
        assert!(e3 > e2 && e3 < 200.0, "e2={} e3={}", e2, e3);
    }

    #[test]
    fn test_ema_null_before_first_value() {
        let out = ema_series(&[None, Some(f64::NAN), Some(50.0)], 0.5);

        assert_eq!(out, vec![None, None, Some(50.0)]);
    }

    #[test]
    fn test_ema_window_alpha() {
        // Two days of 10 s samples
        let ema = Ema::for_window(2.0 * 86_400.0, 10.0);
        assert!((ema.alpha() - 2.0 / 17_281.0).abs() < 1e-15);

        let mut ema = Ema::with_alpha(0.5);
        ema.update(Some(10.0));
        ema.update(Some(20.0));
        assert_eq!(ema.value(), Some(15.0));
    }

    #[test]
    fn test_align_daily_by_calendar_day() {
        let buckets = [bucket(2025, 3, 1, 7.5), bucket(2025, 3, 2, 9.0)];
        let ts = [
            epoch("2025-03-01T00:00:00Z"),
            epoch("2025-03-01T23:59:59Z"),
            epoch("2025-03-02T12:00:00Z"),
            epoch("2025-03-04T12:00:00Z"),
        ];

        let out = align_daily(&buckets, &ts, &Utc);
        assert_eq!(out, vec![Some(7.5), Some(7.5), Some(9.0), None]);
    }

    #[test]
    fn test_align_daily_respects_time_zone() {
        let buckets = [bucket(2025, 3, 1, 7.5), bucket(2025, 3, 2, 9.0)];
        // 23:30 UTC on the 1st is the 2nd in UTC+1
        let ts = [epoch("2025-03-01T23:30:00Z")];
        let plus_one = FixedOffset::east_opt(3600).unwrap();

        assert_eq!(align_daily(&buckets, &ts, &Utc), vec![Some(7.5)]);
        assert_eq!(align_daily(&buckets, &ts, &plus_one), vec![Some(9.0)]);
    }

    #[test]
    fn test_align_daily_without_buckets() {
        assert_eq!(align_daily(&[], &[1, 2, 3], &Utc), vec![None, None, None]);
    }

    #[test]
    fn test_typical_trace_broadcasts() {
        assert_eq!(typical_trace(Some(8.0), 3), vec![Some(8.0); 3]);
        assert_eq!(typical_trace(None, 2), vec![None, None]);
    }

    #[test]
    fn test_average_daily_usage() {
        let series = Series {
            timestamps_sec: vec![0, 86_400, 2 * 86_400],
            power_w: vec![Some(1.0); 3],
            energy_kwh: vec![Some(100.0), None, Some(120.0)],
        };

        assert_eq!(average_daily_usage(&series), Some(10.0));
        assert_eq!(average_daily_usage(&Series::default()), None);
    }

    #[test]
    fn test_daily_breakdown_against_moving_average() {
        let daily = [
            bucket(2025, 3, 1, 8.0),
            bucket(2025, 3, 2, 12.0),
            bucket(2025, 3, 3, 9.0),
        ];
        let moving = [bucket(2025, 3, 2, 10.0)];

        let breakdown = daily_breakdown(
            &daily,
            &moving,
            Some(11.0),
            day(2025, 3, 1),
            day(2025, 3, 2),
            0.5,
        );

        assert_eq!(breakdown.baseline_kwh, Some(10.0));
        assert_eq!(breakdown.rows.len(), 2);
        assert_eq!(breakdown.rows[0].day, day(2025, 3, 2));
        assert_eq!(breakdown.rows[0].diff_kwh, Some(2.0));
        assert_eq!(breakdown.rows[0].cost, 6.0);
        assert_eq!(breakdown.rows[1].diff_kwh, Some(-2.0));
        assert_eq!(breakdown.rows[1].diff_cost, Some(-1.0));
    }

    #[test]
    fn test_daily_breakdown_falls_back_to_average() {
        let daily = [bucket(2025, 3, 3, 9.0)];

        let breakdown = daily_breakdown(
            &daily,
            &[],
            Some(11.0),
            day(2025, 3, 1),
            day(2025, 3, 31),
            1.0,
        );

        assert_eq!(breakdown.baseline_kwh, Some(11.0));
        assert_eq!(breakdown.rows[0].diff_kwh, Some(-2.0));
    }
}
