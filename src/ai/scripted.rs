//! Scripted provider: canned responses matched by prompt substring.
//!
//! Used by the test suite and by offline runs. Calls are counted per tier
//! so tests can assert exact AI cost.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use super::{AiProvider, AiTier};
use crate::error::{EngineError, Result};

struct Rule {
    needle: String,
    response: Value,
}

/// Provider that answers from a fixed script. The first rule whose needle
/// appears in the prompt wins; per-tier overrides take precedence over
/// any-tier rules.
#[derive(Default)]
pub struct ScriptedProvider {
    any_tier: Mutex<Vec<Rule>>,
    per_tier: Mutex<HashMap<&'static str, Vec<Rule>>>,
    calls: HashMap<&'static str, AtomicUsize>,
    available: bool,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        let mut calls = HashMap::new();
        for tier in [AiTier::Cheap, AiTier::Medium, AiTier::Expensive] {
            calls.insert(tier.as_str(), AtomicUsize::new(0));
        }
        Self {
            any_tier: Mutex::new(Vec::new()),
            per_tier: Mutex::new(HashMap::new()),
            calls,
            available: true,
        }
    }

    /// A provider that reports itself unavailable and fails every call.
    pub fn unavailable() -> Self {
        let mut provider = Self::new();
        provider.available = false;
        provider
    }

    /// Respond with `response` whenever `needle` appears in the prompt.
    pub fn respond(self, needle: &str, response: Value) -> Self {
        self.any_tier
            .lock()
            .expect("scripted provider lock")
            .push(Rule {
                needle: needle.to_string(),
                response,
            });
        self
    }

    /// Respond only for a specific tier.
    pub fn respond_at(self, tier: AiTier, needle: &str, response: Value) -> Self {
        self.per_tier
            .lock()
            .expect("scripted provider lock")
            .entry(tier.as_str())
            .or_default()
            .push(Rule {
                needle: needle.to_string(),
                response,
            });
        self
    }

    /// Calls made at a tier.
    pub fn calls_at(&self, tier: AiTier) -> usize {
        self.calls[tier.as_str()].load(Ordering::SeqCst)
    }

    /// Calls made across all tiers.
    pub fn total_calls(&self) -> usize {
        self.calls.values().map(|c| c.load(Ordering::SeqCst)).sum()
    }
}

#[async_trait]
impl AiProvider for ScriptedProvider {
    async fn analyze(&self, prompt: &str, tier: AiTier, _schema: Option<&Value>) -> Result<Value> {
        if !self.available {
            return Err(EngineError::Ai("provider disabled".to_string()));
        }
        self.calls[tier.as_str()].fetch_add(1, Ordering::SeqCst);

        let per_tier = self.per_tier.lock().expect("scripted provider lock");
        if let Some(rules) = per_tier.get(tier.as_str()) {
            if let Some(rule) = rules.iter().find(|r| prompt.contains(&r.needle)) {
                return Ok(rule.response.clone());
            }
        }
        drop(per_tier);

        let any_tier = self.any_tier.lock().expect("scripted provider lock");
        if let Some(rule) = any_tier.iter().find(|r| prompt.contains(&r.needle)) {
            return Ok(rule.response.clone());
        }

        Err(EngineError::Ai(format!(
            "no scripted response for tier {} prompt: {}",
            tier.as_str(),
            prompt.chars().take(80).collect::<String>()
        )))
    }

    async fn is_available(&self) -> bool {
        self.available
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_matches_by_needle_and_counts() {
        let provider = ScriptedProvider::new()
            .respond("score this job", json!({"score": 90}))
            .respond_at(AiTier::Expensive, "score this job", json!({"score": 85}));

        let medium = provider
            .analyze("please score this job", AiTier::Medium, None)
            .await
            .unwrap();
        assert_eq!(medium["score"], 90);

        let expensive = provider
            .analyze("please score this job", AiTier::Expensive, None)
            .await
            .unwrap();
        assert_eq!(expensive["score"], 85);

        assert_eq!(provider.calls_at(AiTier::Medium), 1);
        assert_eq!(provider.calls_at(AiTier::Expensive), 1);
        assert_eq!(provider.total_calls(), 2);
    }

    #[tokio::test]
    async fn test_unmatched_prompt_errors() {
        let provider = ScriptedProvider::new();
        assert!(provider.analyze("anything", AiTier::Cheap, None).await.is_err());
        // The failed call still counted (it reached the provider).
        assert_eq!(provider.total_calls(), 1);
    }

    #[tokio::test]
    async fn test_unavailable() {
        let provider = ScriptedProvider::unavailable();
        assert!(!provider.is_available().await);
        assert!(provider.analyze("x", AiTier::Cheap, None).await.is_err());
        assert_eq!(provider.total_calls(), 0);
    }
}
