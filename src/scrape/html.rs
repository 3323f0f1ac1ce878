//! Generic HTML extraction: selector-driven listings, job page parsing,
//! and page cleaning for the company pipeline.

use regex::Regex;
use scraper::{Html, Selector};
use std::sync::OnceLock;

use super::greenhouse::{detect_employment_type, detect_seniority};
use crate::error::{EngineError, Result};
use crate::models::{JobListing, JobRecord, SelectorConfig};

fn chrome_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?si)<(script|style|nav|footer|header|noscript)\b[^>]*>.*?</(script|style|nav|footer|header|noscript)>",
        )
        .expect("static regex")
    })
}

fn tag_strip_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^>]+>").expect("static regex"))
}

fn parse_selector(s: &str) -> Result<Selector> {
    Selector::parse(s).map_err(|e| EngineError::Parse(format!("bad selector {}: {:?}", s, e)))
}

/// Drop all tags from an HTML fragment, collapsing whitespace.
pub fn strip_tags(html: &str) -> String {
    let no_chrome = chrome_re().replace_all(html, " ");
    let text = tag_strip_re().replace_all(&no_chrome, " ");
    collapse_whitespace(&text)
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Clean a full page for analysis: remove script/style/nav/footer chrome,
/// keep body text, and bound the output length.
pub fn clean_page(html: &str, max_chars: usize) -> String {
    let no_chrome = chrome_re().replace_all(html, " ");
    let document = Html::parse_document(&no_chrome);
    let text: String = document
        .root_element()
        .text()
        .collect::<Vec<_>>()
        .join(" ");
    let mut cleaned = collapse_whitespace(&text);
    if cleaned.len() > max_chars {
        let mut end = max_chars;
        while end > 0 && !cleaned.is_char_boundary(end) {
            end -= 1;
        }
        cleaned.truncate(end);
    }
    cleaned
}

/// Extract listings from a board page using selectors.
pub fn extract_listings(
    base_url: &str,
    body: &str,
    selectors: &SelectorConfig,
) -> Result<Vec<JobListing>> {
    let document = Html::parse_document(body);
    let row_selector = parse_selector(&selectors.list)?;
    let title_selector = parse_selector(&selectors.title)?;
    let link_selector = parse_selector(&selectors.link)?;

    let base = url::Url::parse(base_url)
        .map_err(|e| EngineError::Parse(format!("bad base url {}: {}", base_url, e)))?;

    let mut listings = Vec::new();
    for row in document.select(&row_selector) {
        let Some(href) = row
            .select(&link_selector)
            .find_map(|a| a.value().attr("href"))
        else {
            continue;
        };
        let Ok(url) = base.join(href) else { continue };

        let title = row
            .select(&title_selector)
            .next()
            .map(|t| collapse_whitespace(&t.text().collect::<Vec<_>>().join(" ")))
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| super::title_from_url(url.as_str()));

        listings.push(JobListing {
            url: url.to_string(),
            title,
            company_hint: None,
        });
    }
    Ok(listings)
}

/// Parse a job posting page. Best-effort: title from h1 or <title>,
/// description from cleaned body text, company from og:site_name or host.
pub fn parse_job(url: &str, body: &str) -> Result<JobRecord> {
    let document = Html::parse_document(body);

    let h1 = parse_selector("h1")?;
    let title_tag = parse_selector("title")?;
    let title = document
        .select(&h1)
        .next()
        .or_else(|| document.select(&title_tag).next())
        .map(|t| collapse_whitespace(&t.text().collect::<Vec<_>>().join(" ")))
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| super::title_from_url(url));

    let og_site = parse_selector(r#"meta[property="og:site_name"]"#)?;
    let company_name = document
        .select(&og_site)
        .next()
        .and_then(|m| m.value().attr("content"))
        .map(|c| c.trim().to_string())
        .unwrap_or(super::host_of(url)?);

    let description = clean_page(body, 50_000);
    let lower = description.to_lowercase();
    let remote = if lower.contains("remote") {
        Some(true)
    } else {
        None
    };

    Ok(JobRecord {
        url: url.to_string(),
        title: title.clone(),
        company_name,
        company_website: None,
        location: None,
        remote,
        seniority: detect_seniority(&title),
        employment_type: detect_employment_type(&title, &description),
        description,
        skills: Vec::new(),
        company_size: None,
        posted_at: None,
    })
}

/// Find a job-board link buried in company pages, for source discovery.
pub fn find_board_hint(html: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(
            r#"https://(?:boards\.greenhouse\.io/[a-z0-9_-]+|[a-z0-9-]+\.myworkdayjobs\.com/[A-Za-z0-9/_-]+|jobs\.lever\.co/[a-z0-9_-]+)"#,
        )
        .expect("static regex")
    });
    re.find(html).map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_tags() {
        assert_eq!(
            strip_tags("<p>Build <b>Rust</b> services.</p>"),
            "Build Rust services."
        );
        assert_eq!(
            strip_tags("<script>alert(1)</script><p>hello</p>"),
            "hello"
        );
    }

    #[test]
    fn test_clean_page_removes_chrome_and_bounds() {
        let html = r#"<html><head><style>.x{}</style></head>
            <body><nav>Home About</nav><p>Actual content here</p>
            <footer>Copyright</footer></body></html>"#;
        let cleaned = clean_page(html, 1000);
        assert!(cleaned.contains("Actual content here"));
        assert!(!cleaned.contains("Copyright"));
        assert!(!cleaned.contains("Home About"));

        let bounded = clean_page(html, 6);
        assert!(bounded.len() <= 6);
    }

    #[test]
    fn test_extract_listings_with_selectors() {
        let html = r#"<html><body><ul>
            <li class="job"><a href="/jobs/1">Senior Rust Engineer</a></li>
            <li class="job"><a href="https://other.example.com/jobs/2">Go Developer</a></li>
            <li class="job"><span>No link here</span></li>
        </ul></body></html>"#;
        let selectors = SelectorConfig {
            list: "li.job".to_string(),
            title: "a".to_string(),
            link: "a".to_string(),
        };
        let listings =
            extract_listings("https://example.com/careers", html, &selectors).unwrap();
        assert_eq!(listings.len(), 2);
        assert_eq!(listings[0].url, "https://example.com/jobs/1");
        assert_eq!(listings[0].title, "Senior Rust Engineer");
        assert_eq!(listings[1].url, "https://other.example.com/jobs/2");
    }

    #[test]
    fn test_parse_job_html() {
        let html = r#"<html><head><title>Acme Careers</title>
            <meta property="og:site_name" content="Acme"></head>
            <body><h1>Senior Rust Engineer</h1>
            <p>Fully remote contract role working on Rust systems.</p></body></html>"#;
        let record = parse_job("https://acme.example.com/jobs/1", html).unwrap();
        assert_eq!(record.title, "Senior Rust Engineer");
        assert_eq!(record.company_name, "Acme");
        assert_eq!(record.remote, Some(true));
        assert_eq!(record.seniority.as_deref(), Some("senior"));
        assert_eq!(record.employment_type.as_deref(), Some("contract"));
    }

    #[test]
    fn test_find_board_hint() {
        let html = r#"<a href="https://boards.greenhouse.io/acme">Open roles</a>"#;
        assert_eq!(
            find_board_hint(html).as_deref(),
            Some("https://boards.greenhouse.io/acme")
        );
        assert!(find_board_hint("<p>no jobs</p>").is_none());
    }
}
