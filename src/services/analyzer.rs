use crate::config::AnalyzerConfig;
use crate::error::Error;
use anyhow::Result;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Versioned analysis prompt. Behavior-only by contract: the model is
/// told to report occupancy and movement, never identity or biometrics.
const ANALYSIS_PROMPT_V2: &str = "\
hotelguard-frame-analysis/v2: You are given a single still frame from a \
hallway or room camera. Report only behavioral, non-biometric \
observations. Do not attempt to identify, age, or describe any person. \
Respond with JSON: {\"person_count\": <int>, \"entry\": <bool, true if a \
person appears to be entering the room>, \"confidence\": <0..1>, \
\"suspicion\": <0..1, likelihood the activity warrants human review>, \
\"anomalies\": [<short behavioral observations>], \"summary\": <one \
sentence or null>}.";

/// Versioned batch summary prompt, used only for untracked (legacy)
/// per-image batches.
const SUMMARY_PROMPT_V1: &str = "\
hotelguard-batch-summary/v1: Given the per-frame analysis results below, \
return one aggregate judgment as JSON: {\"summary\": <string>, \
\"risk_level\": <\"low\"|\"elevated\"|\"high\">, \"risk_score\": <0..1>, \
\"recommendation\": <string>}. Judge behavior only.";

const MAX_PERSON_COUNT: i64 = 100;
const MAX_ANOMALIES: usize = 16;
const MAX_ANOMALY_LEN: usize = 160;
const MAX_SUMMARY_LEN: usize = 500;

/// Validated per-frame output of the vision model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub person_count: i64,
    pub entry: bool,
    pub confidence: f64,
    pub suspicion: f64,
    #[serde(default)]
    pub anomalies: Vec<String>,
    #[serde(default)]
    pub summary: Option<String>,
}

/// Validated aggregate judgment over an untracked batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSummary {
    pub summary: String,
    pub risk_level: String,
    pub risk_score: f64,
    pub recommendation: String,
}

/// Validate an analyzer response against the frame-analysis schema.
///
/// Numeric ranges are strict; overlong strings and lists fail rather
/// than being silently truncated, so a misbehaving model version is
/// surfaced as a per-item error instead of corrupting stored data.
pub fn validate_analysis(value: &Value) -> Result<AnalysisResult> {
    let result: AnalysisResult = serde_json::from_value(value.clone())
        .map_err(|e| Error::Analyzer(format!("Malformed analysis response: {}", e)))?;

    if result.person_count < 0 || result.person_count > MAX_PERSON_COUNT {
        return Err(Error::Analyzer(format!(
            "person_count out of range: {}",
            result.person_count
        ))
        .into());
    }
    if !(0.0..=1.0).contains(&result.confidence) {
        return Err(Error::Analyzer(format!("confidence out of range: {}", result.confidence)).into());
    }
    if !(0.0..=1.0).contains(&result.suspicion) {
        return Err(Error::Analyzer(format!("suspicion out of range: {}", result.suspicion)).into());
    }
    if result.anomalies.len() > MAX_ANOMALIES {
        return Err(Error::Analyzer(format!(
            "anomaly list too long: {} entries",
            result.anomalies.len()
        ))
        .into());
    }
    if let Some(anomaly) = result.anomalies.iter().find(|a| a.len() > MAX_ANOMALY_LEN) {
        return Err(Error::Analyzer(format!(
            "anomaly entry too long: {} chars",
            anomaly.len()
        ))
        .into());
    }
    if let Some(summary) = &result.summary {
        if summary.len() > MAX_SUMMARY_LEN {
            return Err(
                Error::Analyzer(format!("summary too long: {} chars", summary.len())).into(),
            );
        }
    }

    Ok(result)
}

fn validate_batch_summary(value: &Value) -> Result<BatchSummary> {
    let summary: BatchSummary = serde_json::from_value(value.clone())
        .map_err(|e| Error::Analyzer(format!("Malformed batch summary: {}", e)))?;

    if !(0.0..=1.0).contains(&summary.risk_score) {
        return Err(Error::Analyzer(format!("risk_score out of range: {}", summary.risk_score)).into());
    }
    if !matches!(summary.risk_level.as_str(), "low" | "elevated" | "high") {
        return Err(Error::Analyzer(format!("unknown risk_level: {}", summary.risk_level)).into());
    }
    if summary.summary.len() > MAX_SUMMARY_LEN || summary.recommendation.len() > MAX_SUMMARY_LEN {
        return Err(Error::Analyzer("batch summary text too long".to_string()).into());
    }

    Ok(summary)
}

/// External vision analyzer seam. The model call is a black box that
/// returns a typed, schema-validated result.
#[async_trait]
pub trait FrameAnalyzer: Send + Sync {
    /// Analyze one frame. Must complete within the configured timeout;
    /// a timeout surfaces as a per-item error, never a hung batch.
    async fn analyze_frame(&self, image: &[u8], mime_type: &str) -> Result<AnalysisResult>;

    /// Aggregate judgment over an untracked batch
    async fn summarize_batch(&self, analyses: &[AnalysisResult]) -> Result<BatchSummary>;
}

/// HTTP client for the hosted vision model
pub struct VisionClient {
    client: reqwest::Client,
    config: AnalyzerConfig,
}

impl VisionClient {
    pub fn new(config: AnalyzerConfig) -> Result<Self> {
        if !config.url.is_empty() {
            url::Url::parse(&config.url)
                .map_err(|e| Error::Config(format!("Invalid analyzer URL: {}", e)))?;
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("Failed to build analyzer client: {}", e)))?;

        Ok(Self { client, config })
    }

    async fn post_prompt(&self, body: Value) -> Result<Value> {
        if self.config.url.is_empty() {
            return Err(Error::Analyzer("Analyzer URL not configured".to_string()).into());
        }

        let response = self
            .client
            .post(&self.config.url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Analyzer(format!("Analyzer request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(
                Error::Analyzer(format!("Analyzer returned {}", response.status())).into(),
            );
        }

        let value = response
            .json::<Value>()
            .await
            .map_err(|e| Error::Analyzer(format!("Analyzer response not JSON: {}", e)))?;

        Ok(value)
    }
}

#[async_trait]
impl FrameAnalyzer for VisionClient {
    async fn analyze_frame(&self, image: &[u8], mime_type: &str) -> Result<AnalysisResult> {
        let body = serde_json::json!({
            "prompt": ANALYSIS_PROMPT_V2,
            "mime_type": mime_type,
            "image_base64": STANDARD.encode(image),
        });

        let value = self.post_prompt(body).await?;
        validate_analysis(&value)
    }

    async fn summarize_batch(&self, analyses: &[AnalysisResult]) -> Result<BatchSummary> {
        let body = serde_json::json!({
            "prompt": SUMMARY_PROMPT_V1,
            "frames": analyses,
        });

        let value = self.post_prompt(body).await?;
        validate_batch_summary(&value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_well_formed_analysis() {
        let value = json!({
            "person_count": 2,
            "entry": true,
            "confidence": 0.9,
            "suspicion": 0.4,
            "anomalies": ["lingering at door"],
            "summary": "Two people at the door, one entering."
        });
        let result = validate_analysis(&value).unwrap();
        assert_eq!(result.person_count, 2);
        assert!(result.entry);
    }

    #[test]
    fn anomalies_and_summary_default_when_absent() {
        let value = json!({
            "person_count": 0,
            "entry": false,
            "confidence": 0.8,
            "suspicion": 0.0
        });
        let result = validate_analysis(&value).unwrap();
        assert!(result.anomalies.is_empty());
        assert!(result.summary.is_none());
    }

    #[test]
    fn rejects_out_of_range_numerics() {
        let base = json!({
            "person_count": 1, "entry": false, "confidence": 0.5, "suspicion": 0.5
        });

        let mut bad = base.clone();
        bad["person_count"] = json!(-1);
        assert!(validate_analysis(&bad).is_err());

        let mut bad = base.clone();
        bad["suspicion"] = json!(1.5);
        assert!(validate_analysis(&bad).is_err());

        let mut bad = base;
        bad["confidence"] = json!(-0.1);
        assert!(validate_analysis(&bad).is_err());
    }

    #[test]
    fn rejects_oversized_lists_and_strings() {
        let mut value = json!({
            "person_count": 1, "entry": false, "confidence": 0.5, "suspicion": 0.5
        });
        value["anomalies"] = json!(vec!["x"; MAX_ANOMALIES + 1]);
        assert!(validate_analysis(&value).is_err());

        let mut value = json!({
            "person_count": 1, "entry": false, "confidence": 0.5, "suspicion": 0.5
        });
        value["summary"] = json!("x".repeat(MAX_SUMMARY_LEN + 1));
        assert!(validate_analysis(&value).is_err());
    }

    #[test]
    fn rejects_missing_required_fields() {
        let value = json!({"person_count": 1, "confidence": 0.5, "suspicion": 0.5});
        assert!(validate_analysis(&value).is_err());
    }

    #[test]
    fn batch_summary_requires_known_level() {
        let value = json!({
            "summary": "quiet hallway",
            "risk_level": "catastrophic",
            "risk_score": 0.9,
            "recommendation": "none"
        });
        assert!(validate_batch_summary(&value).is_err());

        let value = json!({
            "summary": "quiet hallway",
            "risk_level": "low",
            "risk_score": 0.1,
            "recommendation": "none"
        });
        assert!(validate_batch_summary(&value).is_ok());
    }
}
