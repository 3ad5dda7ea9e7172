pub mod analytics;
pub mod api;
pub mod config;
pub mod error;
pub mod scheduler;
pub mod series;
pub mod session;
pub mod view;

// Re-export commonly used items
pub use api::{ApiClient, EnergySource, Reading};
pub use config::Config;
pub use error::{AppError, Result};
pub use scheduler::{Command, Event, Scheduler, SchedulerConfig};
pub use session::{ChartFrame, PeriodSummary, Session, SessionSettings};
