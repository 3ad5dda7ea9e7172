use crate::api::models::Reading;
use crate::series::downsample::lttb_indices;
use serde::Serialize;
use tracing::debug;

/// Watt-milliseconds per kWh
const WMS_PER_KWH: f64 = 3.6e9;

/// Parallel sample columns sharing one ascending, duplicate-free time axis.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Series {
    pub timestamps_sec: Vec<i64>,
    pub power_w: Vec<Option<f64>>,
    pub energy_kwh: Vec<Option<f64>>,
}

impl Series {
    pub fn len(&self) -> usize {
        self.timestamps_sec.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps_sec.is_empty()
    }

    pub fn first_timestamp_sec(&self) -> Option<i64> {
        self.timestamps_sec.first().copied()
    }

    pub fn last_timestamp_sec(&self) -> Option<i64> {
        self.timestamps_sec.last().copied()
    }

    /// First and last timestamps, when the series is not empty.
    pub fn time_bounds(&self) -> Option<(i64, i64)> {
        self.first_timestamp_sec().zip(self.last_timestamp_sec())
    }

    fn push(&mut self, ts: i64, power: Option<f64>, energy: Option<f64>) {
        self.timestamps_sec.push(ts);
        self.power_w.push(power);
        self.energy_kwh.push(energy);
    }

    /// Build a new series from the given ascending indices.
    pub fn select(&self, indices: &[usize]) -> Series {
        let mut out = Series {
            timestamps_sec: Vec::with_capacity(indices.len()),
            power_w: Vec::with_capacity(indices.len()),
            energy_kwh: Vec::with_capacity(indices.len()),
        };
        for &i in indices {
            out.push(self.timestamps_sec[i], self.power_w[i], self.energy_kwh[i]);
        }
        out
    }
}

/// A reading that passed ingestion checks.
#[derive(Debug, Clone, Copy)]
struct ValidReading {
    ts: i64,
    power_w: f64,
    energy_kwh: f64,
}

fn validate(reading: &Reading) -> Option<ValidReading> {
    let p = reading.p.filter(|p| p.is_finite())?;
    let e = reading.e.filter(|e| e.is_finite() && *e > 0.0)?;
    Some(ValidReading {
        ts: reading.timestamp_sec(),
        power_w: p,
        energy_kwh: e,
    })
}

/// Rebuild power from cumulative-energy deltas when a batch carries no power at all.
///
/// Each derived reading sits at the later timestamp of its pair and keeps that
/// reading's meter value.
fn derive_power_from_energy(readings: &[Reading]) -> Vec<Reading> {
    readings
        .windows(2)
        .filter_map(|pair| {
            let (a, b) = (&pair[0], &pair[1]);
            let (ea, eb) = (a.e?, b.e?);
            let dt_ms = b.t - a.t;
            if dt_ms <= 0 {
                return None;
            }
            let watts = ((eb - ea) * WMS_PER_KWH / dt_ms as f64).max(0.0);
            Some(Reading::new(b.t, Some(watts), Some(eb)))
        })
        .collect()
}

/// Substitute derived power when every reading lacks it.
fn with_power(readings: &[Reading]) -> Vec<Reading> {
    if !readings.is_empty() && readings.iter().all(|r| r.p.is_none()) {
        let derived = derive_power_from_energy(readings);
        if !derived.is_empty() {
            debug!(
                raw = readings.len(),
                derived = derived.len(),
                "power missing from batch, derived from energy deltas"
            );
            return derived;
        }
    }
    readings.to_vec()
}

/// Owner of the canonical in-memory series.
#[derive(Debug, Clone, Default)]
pub struct TimeSeriesStore {
    series: Series,
}

impl TimeSeriesStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn series(&self) -> &Series {
        &self.series
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// Replace the whole series with the valid subset of `readings`.
    /// Returns the number of stored samples.
    pub fn replace(&mut self, readings: &[Reading]) -> usize {
        let mut series = Series::default();
        for valid in with_power(readings).iter().filter_map(validate) {
            if series.last_timestamp_sec().is_some_and(|last| valid.ts <= last) {
                continue;
            }
            series.push(valid.ts, Some(valid.power_w), Some(valid.energy_kwh));
        }

        debug!(
            received = readings.len(),
            stored = series.len(),
            "replaced series"
        );
        self.series = series;
        self.series.len()
    }

    /// Append readings newer than both `last_known_timestamp_sec` and the last
    /// stored sample. Returns the number of appended samples.
    pub fn append_incremental(
        &mut self,
        readings: &[Reading],
        last_known_timestamp_sec: Option<i64>,
    ) -> usize {
        let mut cutoff = match (last_known_timestamp_sec, self.latest_timestamp_sec()) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };

        let mut appended = 0;
        for valid in with_power(readings).iter().filter_map(validate) {
            if cutoff.is_some_and(|c| valid.ts <= c) {
                continue;
            }
            self.series
                .push(valid.ts, Some(valid.power_w), Some(valid.energy_kwh));
            cutoff = Some(valid.ts);
            appended += 1;
        }

        if appended > 0 {
            debug!(appended, total = self.series.len(), "appended readings");
        }
        appended
    }

    pub fn latest_timestamp_sec(&self) -> Option<i64> {
        self.series.last_timestamp_sec()
    }

    /// Index of the sample closest to `target_sec`; ties go to the lower index.
    pub fn nearest_index(&self, target_sec: f64) -> Option<usize> {
        let ts = &self.series.timestamps_sec;
        if ts.is_empty() || !target_sec.is_finite() {
            return None;
        }

        let lo = ts.partition_point(|&t| (t as f64) < target_sec);
        if lo >= ts.len() {
            return Some(ts.len() - 1);
        }
        if lo == 0 || ts[lo] as f64 == target_sec {
            return Some(lo);
        }

        let hi = lo - 1;
        if target_sec - ts[hi] as f64 <= ts[lo] as f64 - target_sec {
            Some(hi)
        } else {
            Some(lo)
        }
    }

    /// Reduce the series to at most `threshold` points with LTTB, keeping the
    /// energy column aligned with the chosen samples.
    pub fn downsample(&mut self, threshold: usize) {
        let before = self.series.len();
        let indices = lttb_indices(&self.series.timestamps_sec, &self.series.power_w, threshold);
        if indices.len() == before {
            return;
        }
        self.series = self.series.select(&indices);
        debug!(before, after = self.series.len(), "downsampled series");
    }
}
