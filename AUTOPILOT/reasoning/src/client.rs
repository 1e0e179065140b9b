use std::{env, fmt, time::Duration};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::ReasoningError;

/// Environment variable naming the reasoning endpoint.
pub const ENDPOINT_ENV: &str = "AUTOPILOT_REASONING_ENDPOINT";
/// Environment variable carrying the reasoning API key.
pub const API_KEY_ENV: &str = "AUTOPILOT_REASONING_API_KEY";

/// Prompt in, free text out.
#[async_trait]
pub trait ReasoningService: Send + Sync {
    /// Identifier used in logs and strategy attribution.
    fn name(&self) -> &str;

    /// Completes a prompt.
    async fn complete(&self, prompt: &str) -> Result<String, ReasoningError>;
}

/// Connection and sampling settings for [`HttpReasoningService`].
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReasoningSettings {
    /// Generation endpoint.
    pub endpoint: Option<String>,
    /// Sent as `x-api-key`.
    pub api_key: Option<String>,
    /// Sent as bearer authorization.
    pub bearer_token: Option<String>,
    /// Per-request deadline in seconds.
    pub timeout_secs: u64,
    /// Generation cap.
    pub max_tokens: usize,
    /// Sampling temperature.
    pub temperature: f32,
    /// Nucleus sampling.
    pub top_p: f32,
}

impl Default for ReasoningSettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            bearer_token: None,
            timeout_secs: 30,
            max_tokens: 1024,
            temperature: 0.1,
            top_p: 0.9,
        }
    }
}

impl fmt::Debug for ReasoningSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReasoningSettings")
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("bearer_token", &self.bearer_token.as_ref().map(|_| "***"))
            .field("timeout_secs", &self.timeout_secs)
            .field("max_tokens", &self.max_tokens)
            .finish_non_exhaustive()
    }
}

impl ReasoningSettings {
    /// Overlays endpoint and key from the environment when set.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(endpoint) = env::var(ENDPOINT_ENV) {
            if !endpoint.trim().is_empty() {
                self.endpoint = Some(endpoint);
            }
        }
        if let Ok(key) = env::var(API_KEY_ENV) {
            if !key.trim().is_empty() {
                self.api_key = Some(key);
            }
        }
        self
    }

    /// Whether enough is configured to attempt a call.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.endpoint.as_deref().is_some_and(|e| !e.trim().is_empty())
            && (self.api_key.is_some() || self.bearer_token.is_some())
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    prompt: &'a str,
    max_tokens: usize,
    temperature: f32,
    top_p: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    text: String,
}

/// Reasoning service over HTTP.
#[derive(Debug, Clone)]
pub struct HttpReasoningService {
    client: Client,
    endpoint: String,
    settings: ReasoningSettings,
}

impl HttpReasoningService {
    /// Builds the client.
    ///
    /// # Errors
    /// [`ReasoningError::NotConfigured`] when endpoint or credentials are missing.
    pub fn new(settings: ReasoningSettings) -> Result<Self, ReasoningError> {
        if !settings.is_configured() {
            return Err(ReasoningError::NotConfigured(format!(
                "set {ENDPOINT_ENV} and {API_KEY_ENV}"
            )));
        }
        let endpoint = settings.endpoint.clone().unwrap_or_default();
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs.max(1)))
            .build()?;
        Ok(Self {
            client,
            endpoint,
            settings,
        })
    }

    /// Builds the client from environment variables alone.
    ///
    /// # Errors
    /// See [`HttpReasoningService::new`].
    pub fn from_env() -> Result<Self, ReasoningError> {
        Self::new(ReasoningSettings::default().with_env_overrides())
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.settings.timeout_secs.max(1))
    }
}

#[async_trait]
impl ReasoningService for HttpReasoningService {
    fn name(&self) -> &str {
        "http"
    }

    async fn complete(&self, prompt: &str) -> Result<String, ReasoningError> {
        let payload = GenerateRequest {
            prompt,
            max_tokens: self.settings.max_tokens,
            temperature: self.settings.temperature,
            top_p: self.settings.top_p,
        };
        let mut req = self.client.post(&self.endpoint).json(&payload);
        if let Some(key) = &self.settings.api_key {
            req = req.header("x-api-key", key);
        }
        if let Some(token) = &self.settings.bearer_token {
            req = req.bearer_auth(token);
        }
        let deadline = self.timeout();
        let call = async move {
            let response = req.send().await?.error_for_status()?;
            let body: GenerateResponse = response.json().await?;
            Ok::<_, ReasoningError>(body.text)
        };
        let text = tokio::time::timeout(deadline, call)
            .await
            .map_err(|_| ReasoningError::Timeout(deadline))??;
        debug!(chars = text.len(), "reasoning completion received");
        if text.trim().is_empty() {
            return Err(ReasoningError::Malformed("empty completion".into()));
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_credentials_are_a_configuration_error() {
        let settings = ReasoningSettings {
            endpoint: Some("http://127.0.0.1:9/generate".into()),
            ..ReasoningSettings::default()
        };
        assert!(!settings.is_configured());
        assert!(matches!(
            HttpReasoningService::new(settings),
            Err(ReasoningError::NotConfigured(_))
        ));
    }

    #[test]
    fn debug_output_hides_secrets() {
        let settings = ReasoningSettings {
            endpoint: Some("http://localhost/generate".into()),
            api_key: Some("secret-key".into()),
            ..ReasoningSettings::default()
        };
        let rendered = format!("{settings:?}");
        assert!(!rendered.contains("secret-key"));
        assert!(settings.is_configured());
    }
}
