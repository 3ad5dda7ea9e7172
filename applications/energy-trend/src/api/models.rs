use chrono::{DateTime, NaiveDate, TimeZone};
use serde::{Deserialize, Serialize};

/// A raw sensor reading as served by `/api/readings`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Epoch milliseconds
    pub t: i64,
    /// Instantaneous power in watts
    #[serde(default)]
    pub p: Option<f64>,
    /// Cumulative imported energy in kWh
    #[serde(default)]
    pub e: Option<f64>,
}

impl Reading {
    pub fn new(t: i64, p: Option<f64>, e: Option<f64>) -> Self {
        Self { t, p, e }
    }

    pub fn timestamp_sec(&self) -> i64 {
        self.t.div_euclid(1000)
    }
}

/// Body of `/api/stats`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsEnvelope {
    #[serde(default)]
    pub start: Option<i64>,
    #[serde(default)]
    pub end: Option<i64>,
    #[serde(default)]
    pub stats: RemoteStats,
}

/// Server-side statistics for a period.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteStats {
    #[serde(default)]
    pub energy_used_kwh: Option<f64>,
    #[serde(default)]
    pub avg_power_watts: Option<f64>,
    #[serde(default)]
    pub max_power_watts: Option<f64>,
    #[serde(default)]
    pub min_power_watts: Option<f64>,
    #[serde(default)]
    pub count: Option<u64>,
}

/// Body of `/api/energy_summary`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnergySummary {
    #[serde(default)]
    pub avg_daily: Option<f64>,
    #[serde(default)]
    pub daily: Vec<DailyEnergy>,
    #[serde(default)]
    pub moving_avg_30d: Vec<MovingAverageDay>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DailyEnergy {
    pub t: i64,
    pub kwh: f64,
    #[serde(default)]
    pub is_partial: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MovingAverageDay {
    pub t: i64,
    pub kwh: f64,
}

/// Body of `/api/latest_reading`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LatestReading {
    #[serde(default)]
    pub energy_in_kwh: Option<f64>,
}

/// One kWh figure per local calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DailyBucket {
    pub day: NaiveDate,
    pub kwh: f64,
    pub is_partial: bool,
}

impl DailyBucket {
    /// Map an epoch-ms stamped row onto the calendar day it falls in within `tz`.
    pub fn from_epoch_ms<Tz: TimeZone>(
        t: i64,
        kwh: f64,
        is_partial: bool,
        tz: &Tz,
    ) -> Option<Self> {
        let day = DateTime::from_timestamp_millis(t)?
            .with_timezone(tz)
            .date_naive();
        Some(Self {
            day,
            kwh,
            is_partial,
        })
    }
}

impl EnergySummary {
    pub fn daily_buckets<Tz: TimeZone>(&self, tz: &Tz) -> Vec<DailyBucket> {
        self.daily
            .iter()
            .filter_map(|d| DailyBucket::from_epoch_ms(d.t, d.kwh, d.is_partial, tz))
            .collect()
    }

    pub fn moving_average_buckets<Tz: TimeZone>(&self, tz: &Tz) -> Vec<DailyBucket> {
        self.moving_avg_30d
            .iter()
            .filter_map(|d| DailyBucket::from_epoch_ms(d.t, d.kwh, false, tz))
            .collect()
    }
}
