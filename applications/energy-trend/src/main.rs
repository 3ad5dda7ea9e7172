use chrono::Local;
use energy_trend::{
    config::Config,
    scheduler::{Command, Event, EventSender, Scheduler, SchedulerConfig},
    session::{Session, SessionSettings},
    ApiClient,
};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const HELP: &str = "commands: r | esc | clear | all | 1-5 (hour/day/week/month/year) | \
                    days N | range START_MS END_MS | hover SEC | frame | summary";

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "energy_trend=debug".into());
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    info!("Starting energy-trend");

    // Load configuration
    let config_path =
        std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config/config.yaml".to_string());

    let config = Config::load(&config_path)?;
    info!("Configuration loaded from: {}", config_path);

    let client = ApiClient::new(&config.api)?;
    info!("Readings backend: {}", client.base_url());

    let session = Session::new(SessionSettings::from_config(&config), Local);
    let mut scheduler = Scheduler::new(
        session,
        Arc::new(client),
        SchedulerConfig::from_config(&config),
    );

    spawn_console(scheduler.sender());
    info!("{}", HELP);

    scheduler.start();
    scheduler.run(shutdown_signal()).await;

    info!("energy-trend stopped");
    Ok(())
}

/// Read commands from stdin on a plain thread so a pending read never holds up shutdown.
fn spawn_console(tx: EventSender) {
    std::thread::spawn(move || {
        for line in std::io::stdin().lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    error!("Failed to read stdin: {}", e);
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match line.parse::<Command>() {
                Ok(command) => {
                    if tx.blocking_send(Event::Command(command)).is_err() {
                        break;
                    }
                }
                Err(e) => warn!("{} ({})", e, HELP),
            }
        }
    });
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down gracefully");
        },
        _ = terminate => {
            info!("Received SIGTERM, shutting down gracefully");
        },
    }
}
