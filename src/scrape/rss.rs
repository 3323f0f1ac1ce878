//! RSS feed extractor.
//!
//! Job feeds are simple enough that item extraction works on the
//! title/link pairs inside `<item>` blocks.

use regex::Regex;
use std::sync::OnceLock;

use crate::error::{EngineError, Result};
use crate::models::JobListing;

fn item_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)<item>(.*?)</item>").expect("static regex")
    })
}

fn tag_re(tag: &str) -> Regex {
    Regex::new(&format!(r"(?s)<{tag}>\s*(?:<!\[CDATA\[)?(.*?)(?:\]\]>)?\s*</{tag}>"))
        .expect("static regex")
}

pub fn extract_listings(body: &str) -> Result<Vec<JobListing>> {
    if !body.contains("<rss") && !body.contains("<channel") {
        return Err(EngineError::Parse("payload is not an RSS feed".to_string()));
    }

    let title_re = tag_re("title");
    let link_re = tag_re("link");

    let mut listings = Vec::new();
    for item in item_re().captures_iter(body) {
        let block = &item[1];
        let Some(link) = link_re.captures(block).map(|c| c[1].trim().to_string()) else {
            continue;
        };
        if link.is_empty() {
            continue;
        }
        let title = title_re
            .captures(block)
            .map(|c| c[1].trim().to_string())
            .unwrap_or_else(|| "untitled".to_string());
        listings.push(JobListing {
            url: link,
            title,
            company_hint: None,
        });
    }
    Ok(listings)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = r#"<?xml version="1.0"?>
<rss version="2.0">
  <channel>
    <title>Acme Jobs</title>
    <item>
      <title><![CDATA[Senior Rust Engineer]]></title>
      <link>https://example.com/jobs/1</link>
    </item>
    <item>
      <title>Data Analyst</title>
      <link>https://example.com/jobs/2</link>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn test_extract_listings() {
        let listings = extract_listings(FEED).unwrap();
        assert_eq!(listings.len(), 2);
        assert_eq!(listings[0].title, "Senior Rust Engineer");
        assert_eq!(listings[0].url, "https://example.com/jobs/1");
        assert_eq!(listings[1].title, "Data Analyst");
    }

    #[test]
    fn test_item_without_link_skipped() {
        let feed = r#"<rss><channel><item><title>No link</title></item></channel></rss>"#;
        let listings = extract_listings(feed).unwrap();
        assert!(listings.is_empty());
    }

    #[test]
    fn test_non_rss_rejected() {
        assert!(extract_listings("<html></html>").is_err());
    }
}
