//! Configuration for jobscout.
//!
//! A single validated mapping loaded at startup. The key set is closed:
//! unknown keys are rejected at load time. Files may be JSON, TOML, or YAML
//! (dispatched on extension), and a handful of environment variables take
//! precedence over file values.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{EngineError, Result};

/// Default database filename.
pub const DEFAULT_DATABASE_FILENAME: &str = "jobscout.db";

/// Queue behavior: retries, stale claims, per-type stage timeouts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct QueueConfig {
    pub max_retries: u32,
    /// A PROCESSING item whose claim is older than this is claimable again.
    pub stale_claim_seconds: u64,
    pub timeouts: TimeoutConfig,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            stale_claim_seconds: 900,
            timeouts: TimeoutConfig::default(),
        }
    }
}

/// Per-item-type stage timeouts in seconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct TimeoutConfig {
    pub job: u64,
    pub scrape: u64,
    pub company: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            job: 300,
            scrape: 600,
            company: 180,
        }
    }
}

/// Filter rules: tier-1 hard rejections plus tier-2 strike weights are
/// derived from these preferences.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct FilterConfig {
    /// Strike sum at or above this rejects the job.
    pub strike_threshold: u32,
    /// Skills ranked by importance; rank 0 is the primary skill.
    pub tech_ranks: Vec<String>,
    /// Companies rejected outright.
    pub stop_list: Vec<String>,
    /// Title/description tokens rejected outright.
    pub block_tokens: Vec<String>,
    /// Acceptable on-site regions (substring match on location).
    pub allowed_regions: Vec<String>,
    /// When true, a failing location clause is a hard rejection instead
    /// of a strike.
    pub location_required: bool,
    /// Acceptable seniority levels; empty accepts anything.
    pub target_seniority: Vec<String>,
    pub preferred_size_min: Option<u32>,
    pub preferred_size_max: Option<u32>,
    /// "permanent" or "contract"; None accepts both.
    pub role_type: Option<String>,
    /// HQ location granting a priority-score bonus to companies.
    pub hq_bonus_location: String,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            strike_threshold: 5,
            tech_ranks: Vec::new(),
            stop_list: Vec::new(),
            block_tokens: vec![
                "clearance required".to_string(),
                "security clearance".to_string(),
            ],
            allowed_regions: Vec::new(),
            location_required: false,
            target_seniority: Vec::new(),
            preferred_size_min: None,
            preferred_size_max: None,
            role_type: None,
            hq_bonus_location: "Portland".to_string(),
        }
    }
}

/// Rotation scheduling knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct RotationConfig {
    /// Sources at or past this many consecutive failures leave rotation
    /// until an operator re-enables them.
    pub max_consecutive_failures: u32,
    /// Window for the per-company fairness counter.
    pub fairness_window_days: i64,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 5,
            fairness_window_days: 30,
        }
    }
}

/// Model names per cost tier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct TierModels {
    pub cheap: String,
    pub medium: String,
    pub expensive: String,
}

impl Default for TierModels {
    fn default() -> Self {
        Self {
            cheap: "llama3.2:3b".to_string(),
            medium: "llama3.1:8b".to_string(),
            expensive: "llama3.1:70b".to_string(),
        }
    }
}

/// Scoring thresholds for the analyze stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct AiThresholds {
    /// Matches below this score are skipped.
    pub min_match_score: u32,
    /// Rescore with the expensive tier only when the preliminary score is
    /// within this band of the threshold.
    pub rescore_band: u32,
}

impl Default for AiThresholds {
    fn default() -> Self {
        Self {
            min_match_score: 80,
            rescore_band: 10,
        }
    }
}

/// AI provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct AiConfig {
    pub enabled: bool,
    /// Base endpoint of an Ollama-compatible API.
    pub endpoint: String,
    pub models: TierModels,
    pub thresholds: AiThresholds,
    /// Requests per second across all workers (token bucket).
    pub requests_per_second: f64,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Bound on content characters sent in a single prompt.
    pub max_content_chars: usize,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: std::env::var("JOBSCOUT_AI_ENDPOINT")
                .unwrap_or_else(|_| "http://localhost:11434".to_string()),
            models: TierModels::default(),
            thresholds: AiThresholds::default(),
            requests_per_second: 1.0,
            temperature: 0.2,
            max_tokens: 1024,
            max_content_chars: 24_000,
        }
    }
}

/// Daytime window for the scrape-cycle scheduler.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct DaytimeHours {
    /// Inclusive start hour (0-23).
    pub start: u32,
    /// Exclusive end hour (0-23).
    pub end: u32,
}

impl Default for DaytimeHours {
    fn default() -> Self {
        Self { start: 8, end: 20 }
    }
}

/// Scrape-cycle scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub daytime_hours: DaytimeHours,
    /// Fixed UTC offset, e.g. "-07:00".
    pub timezone: String,
    /// Stop enqueuing once this many matches landed today.
    pub target_matches: u32,
    /// Sources per cycle.
    pub max_sources: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            daytime_hours: DaytimeHours::default(),
            timezone: "+00:00".to_string(),
            target_matches: 10,
            max_sources: 6,
        }
    }
}

impl SchedulerConfig {
    /// Parse the configured timezone into a fixed offset, falling back to UTC.
    pub fn offset(&self) -> chrono::FixedOffset {
        self.timezone
            .parse::<chrono::FixedOffset>()
            .unwrap_or_else(|_| {
                chrono::FixedOffset::east_opt(0).expect("zero offset is valid")
            })
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    /// Base data directory; defaults to the platform data dir.
    pub data_dir: Option<String>,
    /// Database filename within the data directory.
    pub database: Option<String>,
    pub user_agent: String,
    pub request_timeout_secs: u64,
    pub queue: QueueConfig,
    pub filter: FilterConfig,
    pub rotation: RotationConfig,
    pub ai: AiConfig,
    pub scheduler: SchedulerConfig,
    /// Path this config was loaded from (not serialized).
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: None,
            database: None,
            user_agent: "jobscout/0.3 (job discovery)".to_string(),
            request_timeout_secs: 30,
            queue: QueueConfig::default(),
            filter: FilterConfig::default(),
            rotation: RotationConfig::default(),
            ai: AiConfig::default(),
            scheduler: SchedulerConfig::default(),
            source_path: None,
        }
    }
}

impl Config {
    /// Load configuration from a specific file path.
    /// Supports JSON, TOML, and YAML based on file extension. Unknown keys
    /// fail the load.
    pub async fn load_from_path(path: &Path) -> Result<Self> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| EngineError::Config(format!("failed to read config file: {}", e)))?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

        let mut config: Config = match ext {
            "toml" => toml::from_str(&contents)
                .map_err(|e| EngineError::Config(format!("failed to parse TOML config: {}", e)))?,
            "yaml" | "yml" => serde_yaml::from_str(&contents)
                .map_err(|e| EngineError::Config(format!("failed to parse YAML config: {}", e)))?,
            _ => serde_json::from_str(&contents)
                .map_err(|e| EngineError::Config(format!("failed to parse JSON config: {}", e)))?,
        };

        config.source_path = Some(path.to_path_buf());
        config.validate()?;
        Ok(config)
    }

    /// Load from an explicit path, the `JOBSCOUT_CONFIG` env var, or defaults.
    pub async fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load_from_path(path).await;
        }
        if let Ok(env_path) = std::env::var("JOBSCOUT_CONFIG") {
            if !env_path.is_empty() {
                return Self::load_from_path(Path::new(&env_path)).await;
            }
        }
        Ok(Self::default())
    }

    /// Sanity checks beyond what serde enforces.
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.daytime_hours.start > 23 || self.scheduler.daytime_hours.end > 24 {
            return Err(EngineError::Config(
                "scheduler.daytime_hours out of range".to_string(),
            ));
        }
        if self.ai.thresholds.min_match_score > 100 {
            return Err(EngineError::Config(
                "ai.thresholds.min_match_score must be <= 100".to_string(),
            ));
        }
        if self.ai.requests_per_second <= 0.0 {
            return Err(EngineError::Config(
                "ai.requests_per_second must be positive".to_string(),
            ));
        }
        if let Some(ref role) = self.filter.role_type {
            if role != "permanent" && role != "contract" {
                return Err(EngineError::Config(format!(
                    "filter.role_type must be permanent or contract, got {}",
                    role
                )));
            }
        }
        Ok(())
    }

    /// Resolve the data directory: config value (tilde-expanded) or the
    /// platform data dir, falling back to the current directory.
    pub fn resolved_data_dir(&self) -> PathBuf {
        if let Some(ref dir) = self.data_dir {
            let expanded = shellexpand::tilde(dir);
            return PathBuf::from(expanded.as_ref());
        }
        dirs::data_dir()
            .map(|d| d.join("jobscout"))
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Full path to the SQLite database file.
    pub fn database_path(&self) -> PathBuf {
        let filename = self
            .database
            .clone()
            .unwrap_or_else(|| DEFAULT_DATABASE_FILENAME.to_string());
        self.resolved_data_dir().join(filename)
    }

    /// Stage timeout in seconds for an item type.
    pub fn stage_timeout_secs(&self, item_type: crate::models::WorkItemType) -> u64 {
        use crate::models::WorkItemType;
        match item_type {
            WorkItemType::Job => self.queue.timeouts.job,
            WorkItemType::Scrape => self.queue.timeouts.scrape,
            WorkItemType::Company | WorkItemType::SourceDiscovery => self.queue.timeouts.company,
        }
    }
}

/// Shared, reloadable view of the config. The scheduler re-reads the
/// backing file between cycles; workers see the new snapshot on their
/// next access.
#[derive(Clone)]
pub struct ConfigHandle {
    inner: Arc<RwLock<Arc<Config>>>,
}

impl ConfigHandle {
    pub fn new(config: Config) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(config))),
        }
    }

    /// Current snapshot.
    pub async fn current(&self) -> Arc<Config> {
        self.inner.read().await.clone()
    }

    /// Re-read the backing file, if any. A failed reload keeps the old
    /// snapshot and reports the error.
    pub async fn reload(&self) -> Result<()> {
        let path = {
            let current = self.inner.read().await;
            current.source_path.clone()
        };
        let Some(path) = path else { return Ok(()) };
        let fresh = Config::load_from_path(&path).await?;
        *self.inner.write().await = Arc::new(fresh);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.queue.max_retries, 3);
        assert_eq!(config.queue.stale_claim_seconds, 900);
        assert_eq!(config.queue.timeouts.job, 300);
        assert_eq!(config.queue.timeouts.scrape, 600);
        assert_eq!(config.queue.timeouts.company, 180);
        assert_eq!(config.filter.strike_threshold, 5);
        assert_eq!(config.rotation.max_consecutive_failures, 5);
        assert_eq!(config.rotation.fairness_window_days, 30);
        assert_eq!(config.ai.thresholds.min_match_score, 80);
        assert_eq!(config.ai.thresholds.rescore_band, 10);
        assert!(!config.scheduler.enabled);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let json = r#"{"queue": {"max_retries": 5, "bogus_knob": 1}}"#;
        let parsed: std::result::Result<Config, _> = serde_json::from_str(json);
        assert!(parsed.is_err());

        let json = r#"{"not_a_key": true}"#;
        let parsed: std::result::Result<Config, _> = serde_json::from_str(json);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let json = r#"{"filter": {"strike_threshold": 7, "tech_ranks": ["rust", "go"]}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.filter.strike_threshold, 7);
        assert_eq!(config.filter.tech_ranks, vec!["rust", "go"]);
        assert_eq!(config.queue.max_retries, 3);
    }

    #[test]
    fn test_toml_parse() {
        let text = r#"
user_agent = "test/1.0"

[queue]
max_retries = 2

[queue.timeouts]
job = 60
"#;
        let config: Config = toml::from_str(text).unwrap();
        assert_eq!(config.user_agent, "test/1.0");
        assert_eq!(config.queue.max_retries, 2);
        assert_eq!(config.queue.timeouts.job, 60);
        assert_eq!(config.queue.timeouts.scrape, 600);
    }

    #[test]
    fn test_validate_role_type() {
        let mut config = Config::default();
        config.filter.role_type = Some("freelance".to_string());
        assert!(config.validate().is_err());
        config.filter.role_type = Some("contract".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_scheduler_offset_parse() {
        let mut config = SchedulerConfig::default();
        config.timezone = "-07:00".to_string();
        assert_eq!(config.offset().local_minus_utc(), -7 * 3600);
        config.timezone = "bogus".to_string();
        assert_eq!(config.offset().local_minus_utc(), 0);
    }

    #[tokio::test]
    async fn test_config_handle_snapshot() {
        let handle = ConfigHandle::new(Config::default());
        let snap = handle.current().await;
        assert_eq!(snap.filter.strike_threshold, 5);
        // Reload without a backing file is a no-op.
        handle.reload().await.unwrap();
    }
}
