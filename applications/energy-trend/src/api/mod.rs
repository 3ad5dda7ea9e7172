pub mod client;
pub mod models;

pub use client::{ApiClient, EnergySource};
pub use models::{
    DailyBucket, DailyEnergy, EnergySummary, LatestReading, MovingAverageDay, Reading,
    RemoteStats,
};
