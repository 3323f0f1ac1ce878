//! AI provider capability.
//!
//! The engine sees one operation: `analyze(prompt, tier, schema) -> JSON`.
//! Tiers are cost classes; the HTTP provider maps each to a configured
//! model. A scripted provider serves tests and offline runs.

mod client;
mod rate;
mod scripted;

pub use client::HttpAiProvider;
pub use rate::TokenBucket;
pub use scripted::ScriptedProvider;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{EngineError, Result};

/// Cost class of an AI call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AiTier {
    Cheap,
    Medium,
    Expensive,
}

impl AiTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cheap => "cheap",
            Self::Medium => "medium",
            Self::Expensive => "expensive",
        }
    }
}

/// Structured analysis capability.
#[async_trait]
pub trait AiProvider: Send + Sync {
    /// Run a prompt at the given tier and return parsed JSON. When a
    /// schema is supplied the provider asks for output matching it; the
    /// response is still validated by parsing on this side.
    async fn analyze(&self, prompt: &str, tier: AiTier, schema: Option<&Value>) -> Result<Value>;

    /// Whether the provider can currently serve calls.
    async fn is_available(&self) -> bool;
}

/// Extract a JSON value from a model response that may wrap it in code
/// fences or prose.
pub fn parse_json_response(text: &str) -> Result<Value> {
    let trimmed = text.trim();

    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }

    // Strip markdown fences.
    let unfenced = trimmed
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    if let Ok(value) = serde_json::from_str(unfenced) {
        return Ok(value);
    }

    // Last resort: first balanced object in the text.
    if let Some(start) = trimmed.find('{') {
        let mut depth = 0usize;
        for (offset, c) in trimmed[start..].char_indices() {
            match c {
                '{' => depth += 1,
                '}' => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        let candidate = &trimmed[start..start + offset + 1];
                        if let Ok(value) = serde_json::from_str(candidate) {
                            return Ok(value);
                        }
                        break;
                    }
                }
                _ => {}
            }
        }
    }

    Err(EngineError::Parse(format!(
        "no JSON found in model response: {}",
        &trimmed.chars().take(120).collect::<String>()
    )))
}
