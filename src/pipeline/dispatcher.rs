//! State-driven stage selection.
//!
//! The dispatcher is a pure function of the item's type and the keys
//! present in its pipeline state. Re-running a partially completed item
//! resumes at the first missing output; a crashed worker loses at most
//! the in-flight stage.

use serde_json::Value;

use crate::models::WorkItemType;

use super::keys;

/// One executable step of a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    JobScrape,
    JobFilter,
    JobAnalyze,
    JobSave,
    CompanyFetch,
    CompanyExtract,
    CompanyAnalyze,
    CompanySave,
    SourceDetect,
    SourceValidate,
    SourceSave,
    ScrapeRun,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::JobScrape => "job_scrape",
            Self::JobFilter => "job_filter",
            Self::JobAnalyze => "job_analyze",
            Self::JobSave => "job_save",
            Self::CompanyFetch => "company_fetch",
            Self::CompanyExtract => "company_extract",
            Self::CompanyAnalyze => "company_analyze",
            Self::CompanySave => "company_save",
            Self::SourceDetect => "source_detect",
            Self::SourceValidate => "source_validate",
            Self::SourceSave => "source_save",
            Self::ScrapeRun => "scrape_run",
        }
    }
}

/// Select the stage to run next. Total: every (type, state) reachable
/// from an empty state maps to exactly one stage.
pub fn select_stage(item_type: WorkItemType, state: &serde_json::Map<String, Value>) -> Stage {
    match item_type {
        WorkItemType::Job => {
            if !state.contains_key(keys::JOB_DATA) {
                Stage::JobScrape
            } else if !state.contains_key(keys::FILTER_RESULT) {
                Stage::JobFilter
            } else if !state.contains_key(keys::MATCH_RESULT) {
                Stage::JobAnalyze
            } else {
                Stage::JobSave
            }
        }
        WorkItemType::Company => {
            if !state.contains_key(keys::RAW_PAGES) {
                Stage::CompanyFetch
            } else if !state.contains_key(keys::EXTRACTED) {
                Stage::CompanyExtract
            } else if !state.contains_key(keys::ANALYSIS) {
                Stage::CompanyAnalyze
            } else {
                Stage::CompanySave
            }
        }
        WorkItemType::SourceDiscovery => {
            if !state.contains_key(keys::DETECTED) {
                Stage::SourceDetect
            } else if !state.contains_key(keys::VALIDATED) {
                Stage::SourceValidate
            } else {
                Stage::SourceSave
            }
        }
        WorkItemType::Scrape => Stage::ScrapeRun,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state_with(stage_keys: &[&str]) -> serde_json::Map<String, Value> {
        let mut state = serde_json::Map::new();
        for key in stage_keys {
            state.insert(key.to_string(), json!({}));
        }
        state
    }

    #[test]
    fn test_job_progression() {
        let empty = state_with(&[]);
        assert_eq!(select_stage(WorkItemType::Job, &empty), Stage::JobScrape);
        assert_eq!(
            select_stage(WorkItemType::Job, &state_with(&[keys::JOB_DATA])),
            Stage::JobFilter
        );
        assert_eq!(
            select_stage(
                WorkItemType::Job,
                &state_with(&[keys::JOB_DATA, keys::FILTER_RESULT])
            ),
            Stage::JobAnalyze
        );
        assert_eq!(
            select_stage(
                WorkItemType::Job,
                &state_with(&[keys::JOB_DATA, keys::FILTER_RESULT, keys::MATCH_RESULT])
            ),
            Stage::JobSave
        );
    }

    #[test]
    fn test_company_progression() {
        assert_eq!(
            select_stage(WorkItemType::Company, &state_with(&[])),
            Stage::CompanyFetch
        );
        assert_eq!(
            select_stage(WorkItemType::Company, &state_with(&[keys::RAW_PAGES])),
            Stage::CompanyExtract
        );
        assert_eq!(
            select_stage(
                WorkItemType::Company,
                &state_with(&[keys::RAW_PAGES, keys::EXTRACTED])
            ),
            Stage::CompanyAnalyze
        );
        assert_eq!(
            select_stage(
                WorkItemType::Company,
                &state_with(&[keys::RAW_PAGES, keys::EXTRACTED, keys::ANALYSIS])
            ),
            Stage::CompanySave
        );
    }

    #[test]
    fn test_source_progression() {
        assert_eq!(
            select_stage(WorkItemType::SourceDiscovery, &state_with(&[])),
            Stage::SourceDetect
        );
        assert_eq!(
            select_stage(WorkItemType::SourceDiscovery, &state_with(&[keys::DETECTED])),
            Stage::SourceValidate
        );
        assert_eq!(
            select_stage(
                WorkItemType::SourceDiscovery,
                &state_with(&[keys::DETECTED, keys::VALIDATED])
            ),
            Stage::SourceSave
        );
    }

    #[test]
    fn test_scrape_single_stage() {
        assert_eq!(
            select_stage(WorkItemType::Scrape, &state_with(&[])),
            Stage::ScrapeRun
        );
        assert_eq!(
            select_stage(WorkItemType::Scrape, &state_with(&[keys::SCRAPE_RESULT])),
            Stage::ScrapeRun
        );
    }

    #[test]
    fn test_totality_over_reachable_states() {
        // Every prefix of each pipeline's key sequence selects exactly
        // one stage; this enumerates all reachable states.
        let sequences: Vec<(WorkItemType, Vec<&str>)> = vec![
            (
                WorkItemType::Job,
                vec![
                    keys::JOB_DATA,
                    keys::FILTER_RESULT,
                    keys::MATCH_RESULT,
                    keys::SAVED_REF,
                ],
            ),
            (
                WorkItemType::Company,
                vec![keys::RAW_PAGES, keys::EXTRACTED, keys::ANALYSIS, keys::SAVED_REF],
            ),
            (
                WorkItemType::SourceDiscovery,
                vec![keys::DETECTED, keys::VALIDATED],
            ),
            (WorkItemType::Scrape, vec![keys::SCRAPE_RESULT]),
        ];

        for (item_type, sequence) in sequences {
            for prefix_len in 0..=sequence.len() {
                let state = state_with(&sequence[..prefix_len]);
                // Must not panic, and must be deterministic.
                let first = select_stage(item_type, &state);
                let second = select_stage(item_type, &state);
                assert_eq!(first, second);
            }
        }
    }
}
