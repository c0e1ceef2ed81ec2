//! Optional language-model rewrite of alert wording
//!
//! Strictly cosmetic: a disabled, slow or malformed rewrite leaves the heuristic
//! alerts exactly as they were.

use async_trait::async_trait;
use guarded_query_core::{AnomalyAlert, Secret};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{GatewayError, Result};

/// Default Anthropic model
const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

/// Default Messages API endpoint
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

/// Messages API version header
const ANTHROPIC_VERSION: &str = "2023-06-01";

const SYSTEM_PROMPT: &str = "You rewrite database anomaly alerts for business users. \
Keep every number exactly as given. Respond with a JSON array only, one object per alert: \
{\"index\": <number>, \"metric_name\": <string>, \"description\": <string>, \"detail\": <string>}. \
No markdown code blocks, no explanations.";

/// Configuration for the language-model rewrite
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnhancementConfig {
    /// Whether alerts are sent for rewriting
    pub enabled: bool,

    /// Upper bound on one rewrite call
    pub timeout_secs: u64,

    /// Model name
    pub model: String,

    /// Environment variable holding the API key
    pub api_key_env: String,

    /// API base URL
    pub base_url: String,

    /// Response token budget
    pub max_tokens: u32,
}

impl Default for EnhancementConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            timeout_secs: 15,
            model: DEFAULT_MODEL.to_string(),
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            max_tokens: 2048,
        }
    }
}

/// Post-processing applied to heuristic alerts before persistence
#[async_trait]
pub trait AlertEnhancer: Send + Sync {
    /// Return the alerts to persist, in the same order
    async fn enhance(&self, alerts: Vec<AnomalyAlert>) -> Vec<AnomalyAlert>;
}

/// Keeps the heuristic wording
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicEnhancer;

#[async_trait]
impl AlertEnhancer for HeuristicEnhancer {
    async fn enhance(&self, alerts: Vec<AnomalyAlert>) -> Vec<AnomalyAlert> {
        alerts
    }
}

/// Text completion client
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Complete a prompt and return the text of the response
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String>;
}

/// Anthropic Messages API client
#[derive(Clone)]
pub struct AnthropicClient {
    api_key: Secret,
    client: reqwest::Client,
    model: String,
    base_url: String,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

impl AnthropicClient {
    /// Create a client with the given API key
    pub fn new(api_key: Secret, model: &str, base_url: &str, max_tokens: u32) -> Self {
        Self {
            api_key,
            client: reqwest::Client::new(),
            model: model.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            max_tokens,
        }
    }

    /// Create a client reading the API key from the configured environment variable
    pub fn from_config(config: &EnhancementConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            GatewayError::Config(format!("{} environment variable not set", config.api_key_env))
        })?;
        Ok(Self::new(
            Secret::new(api_key),
            &config.model,
            &config.base_url,
            config.max_tokens,
        ))
    }

    /// Model name
    pub fn model_name(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", self.api_key.expose())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&json!({
                "model": &self.model,
                "max_tokens": self.max_tokens,
                "system": system_prompt,
                "messages": [{"role": "user", "content": user_prompt}]
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Enhancement(format!("Anthropic API error {}: {}", status, body)));
        }

        first_text(response.json().await?)
    }
}

fn first_text(response: MessagesResponse) -> Result<String> {
    response
        .content
        .into_iter()
        .find_map(|block| block.text)
        .ok_or_else(|| GatewayError::Enhancement("Empty response from Anthropic".to_string()))
}

/// Replacement wording for one alert
#[derive(Debug, Deserialize)]
struct AlertRewrite {
    index: usize,
    metric_name: Option<String>,
    description: Option<String>,
    detail: Option<String>,
}

/// Rewrites alert wording through a language model, falling back to the input
pub struct LlmAlertRewriter {
    client: Arc<dyn LlmClient>,
    enabled: bool,
    timeout: Duration,
}

impl LlmAlertRewriter {
    /// Create a rewriter
    pub fn new(client: Arc<dyn LlmClient>, enabled: bool, timeout: Duration) -> Self {
        Self {
            client,
            enabled,
            timeout,
        }
    }

    /// Create a rewriter from configuration
    pub fn from_config(config: &EnhancementConfig, client: Arc<dyn LlmClient>) -> Self {
        Self::new(client, config.enabled, Duration::from_secs(config.timeout_secs))
    }

    async fn rewrite(&self, alerts: &[AnomalyAlert]) -> Result<Vec<AnomalyAlert>> {
        let prompt = build_prompt(alerts)?;
        let text = tokio::time::timeout(self.timeout, self.client.complete(SYSTEM_PROMPT, &prompt))
            .await
            .map_err(|_| {
                GatewayError::Enhancement(format!("rewrite timed out after {:?}", self.timeout))
            })??;
        apply_rewrites(alerts, parse_rewrites(&text)?)
    }
}

#[async_trait]
impl AlertEnhancer for LlmAlertRewriter {
    async fn enhance(&self, alerts: Vec<AnomalyAlert>) -> Vec<AnomalyAlert> {
        if !self.enabled || alerts.is_empty() {
            return alerts;
        }

        match self.rewrite(&alerts).await {
            Ok(rewritten) => {
                debug!("Rewrote wording of {} alert(s)", rewritten.len());
                rewritten
            }
            Err(e) => {
                warn!("Alert rewrite failed, keeping heuristic text: {}", e);
                alerts
            }
        }
    }
}

fn build_prompt(alerts: &[AnomalyAlert]) -> Result<String> {
    let items: Vec<_> = alerts
        .iter()
        .enumerate()
        .map(|(index, alert)| {
            json!({
                "index": index,
                "severity": alert.severity,
                "metric_name": alert.metric_name,
                "description": alert.description,
                "detail": alert.detail,
                "table": alert.table_name,
                "column": alert.column_name,
                "current_value": alert.current_value,
                "previous_value": alert.previous_value,
                "change_percent": alert.change_percent,
            })
        })
        .collect();

    Ok(format!(
        "Rewrite the wording of these alerts. Keep the index of each alert.\n\n{}",
        serde_json::to_string_pretty(&items)?
    ))
}

fn parse_rewrites(text: &str) -> Result<Vec<AlertRewrite>> {
    let start = text.find('[');
    let end = text.rfind(']');
    match (start, end) {
        (Some(start), Some(end)) if start < end => Ok(serde_json::from_str(&text[start..=end])?),
        _ => Err(GatewayError::Enhancement("response contains no JSON array".to_string())),
    }
}

/// Apply rewrites matched by index; any out-of-range or empty field rejects the whole response
fn apply_rewrites(alerts: &[AnomalyAlert], rewrites: Vec<AlertRewrite>) -> Result<Vec<AnomalyAlert>> {
    let mut out = alerts.to_vec();

    for rewrite in rewrites {
        let alert = out.get_mut(rewrite.index).ok_or_else(|| {
            GatewayError::Enhancement(format!("rewrite refers to unknown alert {}", rewrite.index))
        })?;

        for (field, value) in [
            (&mut alert.metric_name, rewrite.metric_name),
            (&mut alert.description, rewrite.description),
            (&mut alert.detail, rewrite.detail),
        ] {
            match value {
                Some(text) if !text.trim().is_empty() => *field = text,
                Some(_) => {
                    return Err(GatewayError::Enhancement(format!(
                        "empty text in rewrite of alert {}",
                        rewrite.index
                    )))
                }
                None => {}
            }
        }
    }

    Ok(out)
}
