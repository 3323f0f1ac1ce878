//! Source type detection.
//!
//! Greenhouse and Workday boards have strict URL shapes and classify with
//! high confidence from the URL alone. RSS and JSON APIs classify from a
//! content probe. Everything else is generic HTML at low confidence.

use crate::models::{Confidence, SourceType};

use super::FetchedPage;

/// Classify a source by URL pattern alone.
pub fn detect_from_url(url: &str) -> Option<(SourceType, Confidence, Option<String>)> {
    let lower = url.to_lowercase();

    // boards.greenhouse.io/<token> or boards-api variants
    if let Some(rest) = lower
        .strip_prefix("https://boards.greenhouse.io/")
        .or_else(|| lower.strip_prefix("https://boards-api.greenhouse.io/v1/boards/"))
        .or_else(|| lower.strip_prefix("http://boards.greenhouse.io/"))
    {
        let token = rest.split('/').next().unwrap_or("").to_string();
        if !token.is_empty() {
            return Some((SourceType::Greenhouse, Confidence::High, Some(token)));
        }
    }

    // <tenant>.myworkdayjobs.com/...
    if let Ok(parsed) = url::Url::parse(&lower) {
        if let Some(host) = parsed.host_str() {
            if let Some(tenant) = host.strip_suffix(".myworkdayjobs.com") {
                if !tenant.is_empty() {
                    return Some((
                        SourceType::Workday,
                        Confidence::High,
                        Some(tenant.to_string()),
                    ));
                }
            }
        }
    }

    None
}

/// Classify a source from a fetched probe page.
pub fn detect_from_probe(page: &FetchedPage) -> (SourceType, Confidence) {
    let content_type = page.content_type.as_deref().unwrap_or("").to_lowercase();
    let body = page.body.trim_start();

    if content_type.contains("rss")
        || content_type.contains("atom")
        || content_type.contains("xml") && body.contains("<rss")
        || body.starts_with("<?xml") && body.contains("<rss")
    {
        return (SourceType::Rss, Confidence::High);
    }

    if content_type.contains("json") || body.starts_with('{') || body.starts_with('[') {
        return (SourceType::Api, Confidence::High);
    }

    (SourceType::Html, Confidence::Low)
}
