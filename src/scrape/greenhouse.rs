//! Greenhouse boards API extractor.
//!
//! Board listings come from the public JSON API
//! (`/v1/boards/<token>/jobs`); individual postings are JSON objects with
//! HTML content. The same parser covers generic aggregator APIs that use
//! the `jobs`/`postings` array shape.

use serde_json::Value;

use super::html::strip_tags;
use crate::error::{EngineError, Result};
use crate::models::{JobListing, JobRecord};

/// Parse a board listings payload.
pub fn extract_listings(body: &str) -> Result<Vec<JobListing>> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| EngineError::Parse(format!("board payload is not JSON: {}", e)))?;

    let jobs = value
        .get("jobs")
        .or_else(|| value.get("postings"))
        .and_then(|j| j.as_array())
        .ok_or_else(|| EngineError::Parse("board payload has no jobs array".to_string()))?;

    let mut listings = Vec::with_capacity(jobs.len());
    for job in jobs {
        let Some(url) = job
            .get("absolute_url")
            .or_else(|| job.get("url"))
            .and_then(|u| u.as_str())
        else {
            continue;
        };
        let title = job
            .get("title")
            .and_then(|t| t.as_str())
            .unwrap_or("untitled")
            .trim()
            .to_string();
        let company_hint = job
            .get("company_name")
            .or_else(|| job.get("company"))
            .and_then(|c| c.as_str())
            .map(|c| c.to_string());
        listings.push(JobListing {
            url: url.to_string(),
            title,
            company_hint,
        });
    }
    Ok(listings)
}

/// Parse a single posting payload into a job record.
pub fn parse_job(url: &str, body: &str) -> Result<JobRecord> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| EngineError::Parse(format!("posting payload is not JSON: {}", e)))?;

    let title = value
        .get("title")
        .and_then(|t| t.as_str())
        .ok_or_else(|| EngineError::Parse("posting has no title".to_string()))?
        .trim()
        .to_string();

    let content_html = value
        .get("content")
        .and_then(|c| c.as_str())
        .unwrap_or_default();
    let description = strip_tags(content_html);

    let location = value
        .get("location")
        .and_then(|l| l.get("name"))
        .and_then(|n| n.as_str())
        .map(|s| s.trim().to_string());

    let company_name = value
        .get("company_name")
        .or_else(|| value.get("company"))
        .and_then(|c| c.as_str())
        .map(|c| c.trim().to_string())
        .unwrap_or_else(|| board_token_from_url(url).unwrap_or_else(|| "unknown".to_string()));

    let metadata = value.get("metadata").cloned().unwrap_or(Value::Null);
    let company_website = metadata
        .get("company_website")
        .and_then(|w| w.as_str())
        .map(String::from)
        .or_else(|| {
            value
                .get("company_website")
                .and_then(|w| w.as_str())
                .map(String::from)
        });
    let company_size = metadata
        .get("company_size")
        .and_then(|s| s.as_u64())
        .map(|s| s as u32);

    let remote = location
        .as_deref()
        .map(|l| l.to_lowercase().contains("remote"))
        .or_else(|| {
            let lower = description.to_lowercase();
            if lower.contains("fully remote") || lower.contains("remote-first") {
                Some(true)
            } else {
                None
            }
        });

    let seniority = detect_seniority(&title);
    let employment_type = detect_employment_type(&title, &description);

    Ok(JobRecord {
        url: url.to_string(),
        title,
        company_name,
        company_website,
        location,
        remote,
        description,
        seniority,
        employment_type,
        skills: Vec::new(),
        company_size,
        posted_at: None,
    })
}

/// Pull the board token out of a greenhouse URL.
pub fn board_token_from_url(url: &str) -> Option<String> {
    let lower = url.to_lowercase();
    let rest = lower
        .strip_prefix("https://boards.greenhouse.io/")
        .or_else(|| lower.strip_prefix("https://boards-api.greenhouse.io/v1/boards/"))?;
    let token = rest.split('/').next()?;
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// Seniority keyword in a title.
pub(crate) fn detect_seniority(title: &str) -> Option<String> {
    let lower = title.to_lowercase();
    for level in [
        "intern",
        "junior",
        "mid-level",
        "senior",
        "staff",
        "principal",
        "lead",
    ] {
        if lower.contains(level) {
            return Some(level.to_string());
        }
    }
    None
}

/// Contract/permanent keyword in title or description.
pub(crate) fn detect_employment_type(title: &str, description: &str) -> Option<String> {
    let haystack = format!("{} {}", title.to_lowercase(), description.to_lowercase());
    if haystack.contains("contract") || haystack.contains("contractor") {
        Some("contract".to_string())
    } else if haystack.contains("full-time") || haystack.contains("full time") {
        Some("permanent".to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOARD: &str = r#"{
        "jobs": [
            {"id": 1, "absolute_url": "https://boards.greenhouse.io/acme/jobs/1",
             "title": "Senior Rust Engineer", "location": {"name": "Remote"}},
            {"id": 2, "absolute_url": "https://boards.greenhouse.io/acme/jobs/2",
             "title": "Data Analyst", "company_name": "Acme"}
        ],
        "meta": {"total": 2}
    }"#;

    #[test]
    fn test_extract_listings() {
        let listings = extract_listings(BOARD).unwrap();
        assert_eq!(listings.len(), 2);
        assert_eq!(listings[0].title, "Senior Rust Engineer");
        assert_eq!(
            listings[0].url,
            "https://boards.greenhouse.io/acme/jobs/1"
        );
        assert_eq!(listings[1].company_hint.as_deref(), Some("Acme"));
    }

    #[test]
    fn test_extract_listings_bad_payload() {
        assert!(extract_listings("<html></html>").is_err());
        assert!(extract_listings(r#"{"meta": {}}"#).is_err());
    }

    #[test]
    fn test_parse_job() {
        let posting = r#"{
            "title": "Senior Rust Engineer",
            "company_name": "Acme",
            "location": {"name": "Remote - US"},
            "content": "<p>Build <b>Rust</b> services. Full-time.</p>",
            "metadata": {"company_website": "https://acme.example.com", "company_size": 250}
        }"#;
        let record = parse_job("https://boards.greenhouse.io/acme/jobs/1", posting).unwrap();
        assert_eq!(record.title, "Senior Rust Engineer");
        assert_eq!(record.company_name, "Acme");
        assert_eq!(record.remote, Some(true));
        assert!(record.description.contains("Build Rust services"));
        assert!(!record.description.contains('<'));
        assert_eq!(record.seniority.as_deref(), Some("senior"));
        assert_eq!(record.employment_type.as_deref(), Some("permanent"));
        assert_eq!(
            record.company_website.as_deref(),
            Some("https://acme.example.com")
        );
        assert_eq!(record.company_size, Some(250));
    }

    #[test]
    fn test_parse_job_company_falls_back_to_token() {
        let posting = r#"{"title": "Engineer", "content": ""}"#;
        let record = parse_job("https://boards.greenhouse.io/stripe/jobs/9", posting).unwrap();
        assert_eq!(record.company_name, "stripe");
    }

    #[test]
    fn test_board_token() {
        assert_eq!(
            board_token_from_url("https://boards.greenhouse.io/stripe/jobs/1").as_deref(),
            Some("stripe")
        );
        assert_eq!(board_token_from_url("https://example.com"), None);
    }
}
