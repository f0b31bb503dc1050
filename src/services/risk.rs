use crate::config::RiskConfig;
use crate::error::Error;
use anyhow::Result;
use log::debug;
use std::time::Duration;

/// Fire-and-forget trigger into the external risk aggregation function.
///
/// No retry or backoff here: the aggregator is independently schedulable
/// and idempotent, so a failed nudge only delays a recompute. Callers
/// surface the error in their response's error list instead of failing
/// their own request.
pub struct RiskRecomputeClient {
    client: reqwest::Client,
    config: RiskConfig,
}

impl RiskRecomputeClient {
    pub fn new(config: RiskConfig) -> Result<Self> {
        if !config.recompute_url.is_empty() {
            url::Url::parse(&config.recompute_url)
                .map_err(|e| Error::Config(format!("Invalid recompute URL: {}", e)))?;
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Config(format!("Failed to build risk client: {}", e)))?;

        Ok(Self { client, config })
    }

    /// Ask the aggregator to recompute scores for the given rooms
    pub async fn invoke(&self, room_ids: &[String]) -> Result<()> {
        if room_ids.is_empty() {
            return Ok(());
        }
        if self.config.recompute_url.is_empty() {
            debug!("Risk recompute not configured, skipping {} rooms", room_ids.len());
            return Ok(());
        }

        let response = self
            .client
            .post(&self.config.recompute_url)
            .bearer_auth(&self.config.service_key)
            .json(&serde_json::json!({ "room_ids": room_ids }))
            .send()
            .await
            .map_err(|e| Error::RiskRecompute(format!("Recompute request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(
                Error::RiskRecompute(format!("Recompute returned {}", response.status())).into(),
            );
        }

        Ok(())
    }
}
