//! Workday CXS API extractor.
//!
//! Tenant boards expose `/wday/cxs/<tenant>/<site>/jobs` returning a
//! `jobPostings` array with site-relative `externalPath` links.

use serde_json::Value;

use crate::error::{EngineError, Result};
use crate::models::JobListing;

pub fn extract_listings(base_url: &str, body: &str) -> Result<Vec<JobListing>> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| EngineError::Parse(format!("workday payload is not JSON: {}", e)))?;

    let postings = value
        .get("jobPostings")
        .and_then(|p| p.as_array())
        .ok_or_else(|| EngineError::Parse("workday payload has no jobPostings".to_string()))?;

    let base = url::Url::parse(base_url)
        .map_err(|e| EngineError::Parse(format!("bad workday base url {}: {}", base_url, e)))?;

    let mut listings = Vec::with_capacity(postings.len());
    for posting in postings {
        let Some(path) = posting.get("externalPath").and_then(|p| p.as_str()) else {
            continue;
        };
        let url = base
            .join(path)
            .map_err(|e| EngineError::Parse(format!("bad externalPath {}: {}", path, e)))?;
        let title = posting
            .get("title")
            .and_then(|t| t.as_str())
            .unwrap_or("untitled")
            .trim()
            .to_string();
        listings.push(JobListing {
            url: url.to_string(),
            title,
            company_hint: None,
        });
    }
    Ok(listings)
}
