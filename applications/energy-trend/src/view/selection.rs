use crate::error::{AppError, Result};
use chrono::{DateTime, Datelike, Duration, Months, TimeZone};
use serde::{Deserialize, Serialize};

pub const HOUR_MS: i64 = 60 * 60 * 1000;
pub const DAY_MS: i64 = 24 * HOUR_MS;

/// The analysis window, `end_ms > start_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub start_ms: i64,
    pub end_ms: i64,
}

impl Selection {
    pub fn new(start_ms: i64, end_ms: i64) -> Result<Self> {
        if end_ms <= start_ms {
            return Err(AppError::InvalidSelection(format!(
                "end {} must be after start {}",
                end_ms, start_ms
            )));
        }
        Ok(Self { start_ms, end_ms })
    }

    /// Build from pointer-derived bounds, which may be NaN or infinite.
    pub fn from_f64(start_ms: f64, end_ms: f64) -> Result<Self> {
        if !start_ms.is_finite() || !end_ms.is_finite() {
            return Err(AppError::InvalidSelection(
                "bounds must be finite".to_string(),
            ));
        }
        Self::new(start_ms.floor() as i64, end_ms.floor() as i64)
    }

    pub fn duration_ms(&self) -> i64 {
        self.end_ms - self.start_ms
    }

    /// Clamp both edges into `[min_ms, max_ms]`, keeping at least one millisecond
    /// of width where the data allows it.
    pub fn clamped(start_ms: i64, end_ms: i64, min_ms: i64, max_ms: i64) -> Result<Self> {
        let start = start_ms.clamp(min_ms, max_ms.max(min_ms));
        let mut end = end_ms.clamp(min_ms, max_ms.max(min_ms));
        if end <= start {
            end = max_ms.min(start + 1);
        }
        Self::new(start, end)
    }

}

/// Quick range choices offered to the viewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RangePreset {
    LastHour,
    LastDay,
    /// Since local midnight of the most recent Sunday
    ThisWeek,
    LastMonth,
    LastYear,
}

impl RangePreset {
    /// Relative presets end at the newest sample; calendar presets end at `now`.
    pub fn is_relative(&self) -> bool {
        matches!(self, RangePreset::LastHour | RangePreset::LastDay)
    }

    /// Window for a relative preset over data spanning `[first_ms, latest_ms]`.
    pub fn relative_range(&self, first_ms: i64, latest_ms: i64) -> Option<(i64, i64)> {
        let duration = match self {
            RangePreset::LastHour => HOUR_MS,
            RangePreset::LastDay => DAY_MS,
            _ => return None,
        };
        Some(((latest_ms - duration).max(first_ms), latest_ms))
    }

    /// Window for a calendar preset ending at `now`, evaluated in `now`'s zone.
    pub fn calendar_range<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Option<(i64, i64)> {
        let end = now.timestamp_millis();
        let start = match self {
            RangePreset::ThisWeek => {
                let back = now.weekday().num_days_from_sunday() as i64;
                let sunday = now.date_naive() - Duration::days(back);
                let midnight = sunday.and_hms_opt(0, 0, 0)?;
                now.timezone()
                    .from_local_datetime(&midnight)
                    .earliest()?
                    .timestamp_millis()
            }
            RangePreset::LastMonth => now
                .clone()
                .checked_sub_months(Months::new(1))?
                .timestamp_millis(),
            RangePreset::LastYear => now
                .clone()
                .checked_sub_months(Months::new(12))?
                .timestamp_millis(),
            _ => return None,
        };
        Some((start, end))
    }
}

/// Start instants (epoch ms) of the periods summarised alongside the chart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PeriodBounds {
    pub day_start_ms: i64,
    pub week_start_ms: i64,
    pub month_start_ms: i64,
    pub now_ms: i64,
}

impl PeriodBounds {
    pub fn at<Tz: TimeZone>(now: &DateTime<Tz>) -> Option<Self> {
        let tz = now.timezone();
        let local_midnight = |date: chrono::NaiveDate| -> Option<i64> {
            let midnight = date.and_hms_opt(0, 0, 0)?;
            Some(tz.from_local_datetime(&midnight).earliest()?.timestamp_millis())
        };

        let today = now.date_naive();
        let (week_start_ms, _) = RangePreset::ThisWeek.calendar_range(now)?;
        Some(Self {
            day_start_ms: local_midnight(today)?,
            week_start_ms,
            month_start_ms: local_midnight(today.with_day(1)?)?,
            now_ms: now.timestamp_millis(),
        })
    }
}
