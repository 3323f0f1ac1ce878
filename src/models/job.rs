//! Job models: scraped records, listings, and analyzed matches.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A normalized job record produced by the scrape stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobRecord {
    pub url: String,
    pub title: String,
    pub company_name: String,
    #[serde(default)]
    pub company_website: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    /// None when the posting does not state a remote policy.
    #[serde(default)]
    pub remote: Option<bool>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub seniority: Option<String>,
    /// "permanent" or "contract" when stated.
    #[serde(default)]
    pub employment_type: Option<String>,
    /// Skills explicitly listed by the posting.
    #[serde(default)]
    pub skills: Vec<String>,
    /// Company headcount when the posting or board exposes it.
    #[serde(default)]
    pub company_size: Option<u32>,
    #[serde(default)]
    pub posted_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// Case-insensitive check whether a skill appears in the posting
    /// (listed skills or description body).
    pub fn mentions_skill(&self, skill: &str) -> bool {
        let needle = skill.to_lowercase();
        self.skills.iter().any(|s| s.to_lowercase() == needle)
            || self.description.to_lowercase().contains(&needle)
            || self.title.to_lowercase().contains(&needle)
    }
}

/// A listing enumerated from a source's board, before the job page itself
/// has been scraped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobListing {
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub company_hint: Option<String>,
}

/// Resume-intake block attached to a match: what to emphasize when applying.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResumeIntake {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub highlight_skills: Vec<String>,
    #[serde(default)]
    pub talking_points: Vec<String>,
}

/// Terminal output of the job pipeline: an analyzed, scored match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobMatch {
    /// Identifier, derived from the normalized URL hash.
    pub id: String,
    pub url: String,
    pub title: String,
    /// Company document id, or `pending:<normalized-name>` when the company
    /// pipeline has not landed yet.
    pub company_ref: String,
    pub company_name: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub remote: Option<bool>,
    /// Match score 0-100.
    pub match_score: u32,
    /// Strikes accumulated during filtering (informational on a match).
    pub strike_count: u32,
    #[serde(default)]
    pub matched_skills: Vec<String>,
    #[serde(default)]
    pub missing_skills: Vec<String>,
    #[serde(default)]
    pub resume_intake: ResumeIntake,
    pub analyzed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mentions_skill_in_list() {
        let record = JobRecord {
            skills: vec!["Rust".into(), "PostgreSQL".into()],
            ..Default::default()
        };
        assert!(record.mentions_skill("rust"));
        assert!(record.mentions_skill("postgresql"));
        assert!(!record.mentions_skill("go"));
    }

    #[test]
    fn test_mentions_skill_in_description() {
        let record = JobRecord {
            description: "We ship services written in Rust and TypeScript".into(),
            ..Default::default()
        };
        assert!(record.mentions_skill("rust"));
        assert!(record.mentions_skill("typescript"));
        assert!(!record.mentions_skill("java "));
    }
}
