use crate::series::Series;
use serde::Serialize;

/// Watt-seconds per kWh
const WS_PER_KWH: f64 = 3_600_000.0;
const MS_PER_DAY: f64 = 86_400_000.0;

/// Summary of the samples inside an analysis window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StatsResult {
    pub avg_power_w: Option<f64>,
    pub max_power_w: Option<f64>,
    pub min_power_w: Option<f64>,
    pub sample_count: usize,
    pub energy_used_kwh: Option<f64>,
    pub duration_ms: i64,
}

impl StatsResult {
    pub fn cost(&self, per_kwh: f64) -> Option<f64> {
        self.energy_used_kwh.map(|kwh| kwh * per_kwh)
    }
}

/// Energy an average day's usage would amount to over `duration_ms`.
pub fn typical_energy_kwh(avg_daily_kwh: Option<f64>, duration_ms: i64) -> Option<f64> {
    avg_daily_kwh
        .filter(|v| v.is_finite())
        .map(|avg| avg * duration_ms as f64 / MS_PER_DAY)
}

/// Inclusive index range of samples with `start_sec <= t <= end_sec`.
pub fn index_bounds(timestamps: &[i64], start_sec: i64, end_sec: i64) -> Option<(usize, usize)> {
    let i0 = timestamps.partition_point(|&t| t < start_sec);
    let past_end = timestamps.partition_point(|&t| t <= end_sec);
    if past_end == 0 || past_end - 1 < i0 {
        return None;
    }
    Some((i0, past_end - 1))
}

fn finite(v: Option<f64>) -> Option<f64> {
    v.filter(|x| x.is_finite())
}

/// Compute statistics for `[start_ms, end_ms]`.
///
/// Returns `None` when the window is degenerate or holds no samples. Energy is
/// the meter delta between the first and last finite meter readings in the
/// window; only when the window has no meter readings is power integrated with
/// the trapezoidal rule.
pub fn aggregate(series: &Series, start_ms: i64, end_ms: i64) -> Option<StatsResult> {
    let start_sec = start_ms.div_euclid(1000);
    let end_sec = end_ms.div_euclid(1000);
    if series.is_empty() || end_sec <= start_sec {
        return None;
    }

    let (i0, i1) = index_bounds(&series.timestamps_sec, start_sec, end_sec)?;
    let ts = &series.timestamps_sec[i0..=i1];
    let power = &series.power_w[i0..=i1];
    let energy = &series.energy_kwh[i0..=i1];

    let mut count = 0usize;
    let mut sum = 0.0;
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for p in power.iter().filter_map(|p| finite(*p)) {
        count += 1;
        sum += p;
        min = min.min(p);
        max = max.max(p);
    }
    let (avg_power_w, min_power_w, max_power_w) = if count > 0 {
        (Some(sum / count as f64), Some(min), Some(max))
    } else {
        (None, None, None)
    };

    let first_meter = energy.iter().find_map(|e| finite(*e));
    let last_meter = energy.iter().rev().find_map(|e| finite(*e));
    let energy_used_kwh = match (first_meter, last_meter) {
        (Some(first), Some(last)) => last - first,
        _ => trapezoid_kwh(ts, power),
    };

    Some(StatsResult {
        avg_power_w,
        max_power_w,
        min_power_w,
        sample_count: count,
        energy_used_kwh: Some(energy_used_kwh),
        duration_ms: end_ms - start_ms,
    })
}

/// Integrate power over adjacent finite pairs, in kWh.
pub fn trapezoid_kwh(timestamps_sec: &[i64], power_w: &[Option<f64>]) -> f64 {
    let mut sum_ws = 0.0;
    for i in 1..timestamps_sec.len().min(power_w.len()) {
        let dt = timestamps_sec[i] - timestamps_sec[i - 1];
        if dt <= 0 {
            continue;
        }
        if let (Some(a), Some(b)) = (finite(power_w[i - 1]), finite(power_w[i])) {
            sum_ws += (a + b) / 2.0 * dt as f64;
        }
    }
    sum_ws / WS_PER_KWH
}
