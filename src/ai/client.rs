//! HTTP provider for an Ollama-compatible generate API.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::rate::TokenBucket;
use super::{parse_json_response, AiProvider, AiTier};
use crate::config::AiConfig;
use crate::error::{EngineError, Result};

/// AI client with per-tier model selection and a process-wide token bucket.
pub struct HttpAiProvider {
    config: AiConfig,
    client: Client,
    bucket: TokenBucket,
}

#[derive(Debug, Serialize)]
struct GenerateRequest {
    model: String,
    prompt: String,
    stream: bool,
    format: &'static str,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

impl HttpAiProvider {
    pub fn new(config: AiConfig) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(300)) // slow models
            .build()
            .expect("Failed to create HTTP client");
        let bucket = TokenBucket::new(config.requests_per_second, 2.0);

        Self {
            config,
            client,
            bucket,
        }
    }

    fn model_for(&self, tier: AiTier) -> &str {
        match tier {
            AiTier::Cheap => &self.config.models.cheap,
            AiTier::Medium => &self.config.models.medium,
            AiTier::Expensive => &self.config.models.expensive,
        }
    }
}

#[async_trait]
impl AiProvider for HttpAiProvider {
    async fn analyze(&self, prompt: &str, tier: AiTier, schema: Option<&Value>) -> Result<Value> {
        if !self.config.enabled {
            return Err(EngineError::Ai("provider disabled".to_string()));
        }

        self.bucket.acquire().await;

        let mut full_prompt = prompt.to_string();
        if let Some(schema) = schema {
            full_prompt.push_str(&format!(
                "\n\nRespond with a single JSON object matching this schema, no other text:\n{}",
                schema
            ));
        } else {
            full_prompt.push_str("\n\nRespond with a single JSON object, no other text.");
        }

        let request = GenerateRequest {
            model: self.model_for(tier).to_string(),
            prompt: full_prompt,
            stream: false,
            format: "json",
            options: GenerateOptions {
                temperature: self.config.temperature,
                num_predict: self.config.max_tokens,
            },
        };

        debug!("ai call tier={} model={}", tier.as_str(), request.model);

        let url = format!("{}/api/generate", self.config.endpoint);
        let resp = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| EngineError::Ai(format!("connection: {}", e)))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(EngineError::Ai(format!("HTTP {}: {}", status, body)));
        }

        let generated: GenerateResponse = resp
            .json()
            .await
            .map_err(|e| EngineError::Ai(format!("response decode: {}", e)))?;

        parse_json_response(&generated.response)
    }

    async fn is_available(&self) -> bool {
        if !self.config.enabled {
            return false;
        }
        let url = format!("{}/api/tags", self.config.endpoint);
        match self.client.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_selection_by_tier() {
        let provider = HttpAiProvider::new(AiConfig::default());
        assert_eq!(provider.model_for(AiTier::Cheap), "llama3.2:3b");
        assert_eq!(provider.model_for(AiTier::Medium), "llama3.1:8b");
        assert_eq!(provider.model_for(AiTier::Expensive), "llama3.1:70b");
    }

    #[tokio::test]
    async fn test_disabled_provider_errors() {
        let config = AiConfig {
            enabled: false,
            ..AiConfig::default()
        };
        let provider = HttpAiProvider::new(config);
        assert!(!provider.is_available().await);
        let result = provider.analyze("hello", AiTier::Cheap, None).await;
        assert!(matches!(result, Err(EngineError::Ai(_))));
    }
}
