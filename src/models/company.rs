//! Company model with priority tiering.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Coarse priority band derived from a company's priority score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompanyTier {
    S,
    A,
    B,
    C,
    D,
}

impl CompanyTier {
    /// Banding: S >= 90, A 70-89, B 50-69, C 30-49, D below.
    pub fn from_score(score: u32) -> Self {
        match score {
            90.. => Self::S,
            70..=89 => Self::A,
            50..=69 => Self::B,
            30..=49 => Self::C,
            _ => Self::D,
        }
    }

    /// Sort rank; smaller is better (S < A < B < C < D).
    pub fn rank(&self) -> u8 {
        match self {
            Self::S => 0,
            Self::A => 1,
            Self::B => 2,
            Self::C => 3,
            Self::D => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::S => "S",
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
            Self::D => "D",
        }
    }
}

/// Canonical form of a company name used as its dedup key and document id:
/// lowercase alphanumerics with single dashes.
pub fn normalize_company_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_dash = true;
    for c in name.trim().to_lowercase().chars() {
        if c.is_alphanumeric() {
            out.push(c);
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}

/// A company document, keyed by normalized name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Company {
    /// Document id (the normalized name).
    pub id: String,
    pub name: String,
    pub normalized_name: String,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub about: Option<String>,
    #[serde(default)]
    pub culture: Option<String>,
    #[serde(default)]
    pub mission: Option<String>,
    #[serde(default)]
    pub tech_stack: Vec<String>,
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub hq_location: Option<String>,
    #[serde(default)]
    pub industry: Option<String>,
    #[serde(default)]
    pub founded: Option<String>,
    /// Board URL discovered during analysis, if any.
    #[serde(default)]
    pub job_board_hint: Option<String>,
    pub tier: CompanyTier,
    /// 0-100 (capped).
    pub priority_score: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Company {
    pub fn new(name: &str) -> Self {
        let normalized = normalize_company_name(name);
        let now = Utc::now();
        Self {
            id: normalized.clone(),
            name: name.to_string(),
            normalized_name: normalized,
            website: None,
            about: None,
            culture: None,
            mission: None,
            tech_stack: Vec::new(),
            size: None,
            hq_location: None,
            industry: None,
            founded: None,
            job_board_hint: None,
            tier: CompanyTier::D,
            priority_score: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set score and derive tier in one step.
    pub fn set_score(&mut self, score: u32) {
        self.priority_score = score.min(100);
        self.tier = CompanyTier::from_score(self.priority_score);
        self.updated_at = Utc::now();
    }
}
