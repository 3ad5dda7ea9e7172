pub mod trend;
pub mod window;

pub use trend::{
    align_daily, average_daily_usage, daily_breakdown, ema_series, typical_trace, DailyBreakdown,
    DailyBreakdownRow, Ema,
};
pub use window::{aggregate, index_bounds, trapezoid_kwh, typical_energy_kwh, StatsResult};
