//! Scrape source model with embedded health tracking.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of job board a source points at. Dispatch into the matching
/// extractor is a lookup on this tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Greenhouse,
    Workday,
    Rss,
    Api,
    Html,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Greenhouse => "greenhouse",
            Self::Workday => "workday",
            Self::Rss => "rss",
            Self::Api => "api",
            Self::Html => "html",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "greenhouse" => Some(Self::Greenhouse),
            "workday" => Some(Self::Workday),
            "rss" => Some(Self::Rss),
            "api" => Some(Self::Api),
            "html" => Some(Self::Html),
            _ => None,
        }
    }
}

/// How certain detection was about a source's type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

/// CSS selectors for generic HTML sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectorConfig {
    /// Selector matching one listing row.
    pub list: String,
    /// Selector for the title within a row.
    pub title: String,
    /// Selector for the link within a row.
    pub link: String,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            list: "li.job, div.job, tr.job, .posting".to_string(),
            title: "a, h2, h3".to_string(),
            link: "a".to_string(),
        }
    }
}

/// Rolling reliability stats for a source. The health score is a pure
/// function of this block plus the clock; it is recomputed on every update.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceHealth {
    #[serde(default)]
    pub last_scraped_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub success_count: u64,
    #[serde(default)]
    pub failure_count: u64,
    #[serde(default)]
    pub consecutive_failures: u32,
    #[serde(default)]
    pub avg_jobs_per_scrape: f64,
    #[serde(default)]
    pub avg_duration_ms: f64,
    /// In [0, 1].
    #[serde(default)]
    pub health_score: f64,
}

/// A scrapable locus: a company's board, an RSS feed, an aggregator API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: String,
    #[serde(default)]
    pub company_ref: Option<String>,
    pub source_type: SourceType,
    pub url: String,
    /// Greenhouse/Workday board token when the URL encodes one.
    #[serde(default)]
    pub board_token: Option<String>,
    #[serde(default)]
    pub selectors: Option<SelectorConfig>,
    pub enabled: bool,
    pub confidence: Confidence,
    /// Low-confidence sources are saved disabled until an operator checks them.
    #[serde(default)]
    pub manual_validation_required: bool,
    #[serde(default)]
    pub health: SourceHealth,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Source {
    pub fn new(id: String, source_type: SourceType, url: String, confidence: Confidence) -> Self {
        let now = Utc::now();
        Self {
            id,
            company_ref: None,
            source_type,
            url,
            board_token: None,
            selectors: None,
            enabled: confidence == Confidence::High,
            confidence,
            manual_validation_required: false,
            health: SourceHealth::default(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_type_roundtrip() {
        for t in [
            SourceType::Greenhouse,
            SourceType::Workday,
            SourceType::Rss,
            SourceType::Api,
            SourceType::Html,
        ] {
            assert_eq!(SourceType::from_str(t.as_str()), Some(t));
        }
        assert_eq!(SourceType::from_str("lever"), None);
    }

    #[test]
    fn test_enabled_follows_confidence() {
        let high = Source::new(
            "s1".into(),
            SourceType::Greenhouse,
            "https://boards.greenhouse.io/acme".into(),
            Confidence::High,
        );
        assert!(high.enabled);

        let low = Source::new(
            "s2".into(),
            SourceType::Html,
            "https://example.com/careers".into(),
            Confidence::Low,
        );
        assert!(!low.enabled);
    }
}
