use crate::api::models::{EnergySummary, LatestReading, Reading, RemoteStats, StatsEnvelope};
use crate::config::ApiConfig;
use crate::error::{AppError, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};

/// The backend calls the session depends on.
#[async_trait]
pub trait EnergySource: Send + Sync {
    async fn readings(&self, start_ms: Option<i64>, end_ms: Option<i64>) -> Result<Vec<Reading>>;

    async fn stats(&self, start_ms: i64, end_ms: i64) -> Result<RemoteStats>;

    async fn energy_summary(&self) -> Result<EnergySummary>;

    async fn latest_reading(&self) -> Result<LatestReading>;

    /// Best-effort; implementations swallow failures.
    async fn clear_cache(&self);
}

/// `reqwest` client for the readings backend
#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    http: reqwest::Client,
}

impl ApiClient {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .http
            .get(&url)
            .header(reqwest::header::CACHE_CONTROL, "no-cache")
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Status {
                status: status.as_u16(),
                url,
            });
        }

        let body = response.json::<T>().await?;
        Ok(body)
    }
}

#[async_trait]
impl EnergySource for ApiClient {
    async fn readings(&self, start_ms: Option<i64>, end_ms: Option<i64>) -> Result<Vec<Reading>> {
        let mut query = Vec::new();
        if let Some(start) = start_ms {
            query.push(("start", start.to_string()));
        }
        if let Some(end) = end_ms {
            query.push(("end", end.to_string()));
        }

        let rows: Vec<Reading> = self.get_json("/api/readings", &query).await?;
        debug!(
            count = rows.len(),
            start = ?start_ms,
            end = ?end_ms,
            "fetched readings"
        );
        Ok(rows)
    }

    async fn stats(&self, start_ms: i64, end_ms: i64) -> Result<RemoteStats> {
        let query = [("start", start_ms.to_string()), ("end", end_ms.to_string())];
        let body: StatsEnvelope = self.get_json("/api/stats", &query).await?;
        Ok(body.stats)
    }

    async fn energy_summary(&self) -> Result<EnergySummary> {
        self.get_json("/api/energy_summary", &[]).await
    }

    async fn latest_reading(&self) -> Result<LatestReading> {
        self.get_json("/api/latest_reading", &[]).await
    }

    async fn clear_cache(&self) {
        let url = format!("{}/api/clear_cache", self.base_url);
        if let Err(e) = self.http.get(&url).send().await {
            warn!("Cache invalidation request failed: {}", e);
        }
    }
}
