//! Page fetching capability.
//!
//! `Fetcher` is the seam between pipeline stages and the network: HTTP in
//! production, a static page map in tests. Transport errors surface as
//! engine errors; HTTP error statuses come back as pages so the caller can
//! classify them.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;

use super::politeness::Politeness;
use crate::error::{EngineError, Result};

/// A fetched page: status, declared content type, body text.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
    pub fetched_at: DateTime<Utc>,
}

impl FetchedPage {
    pub fn ok(url: &str, content_type: &str, body: &str) -> Self {
        Self {
            url: url.to_string(),
            status: 200,
            content_type: Some(content_type.to_string()),
            body: body.to_string(),
            fetched_at: Utc::now(),
        }
    }

    pub fn not_found(url: &str) -> Self {
        Self {
            url: url.to_string(),
            status: 404,
            content_type: None,
            body: String::new(),
            fetched_at: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Convert an error status into the matching engine error.
    pub fn error_for_status(&self) -> Result<()> {
        if self.is_success() {
            Ok(())
        } else {
            Err(EngineError::Http {
                status: Some(self.status),
                message: format!("GET {} returned {}", self.url, self.status),
            })
        }
    }
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedPage>;
}

/// HTTP fetcher with per-domain pacing.
pub struct HttpFetcher {
    client: Client,
    pacing: Politeness,
}

impl HttpFetcher {
    pub fn new(user_agent: &str, timeout_secs: u64) -> Self {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .expect("Failed to create HTTP client");
        Self {
            client,
            pacing: Politeness::default(),
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage> {
        let domain = super::host_of(url)?;
        self.pacing.acquire(&domain).await;

        let resp = self.client.get(url).send().await.map_err(|e| {
            let status = e.status().map(|s| s.as_u16());
            EngineError::Http {
                status,
                message: format!("GET {}: {}", url, e),
            }
        })?;

        let status = resp.status().as_u16();
        self.pacing.report(&domain, status).await;

        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let body = resp.text().await.map_err(|e| EngineError::Http {
            status: Some(status),
            message: format!("reading body of {}: {}", url, e),
        })?;

        Ok(FetchedPage {
            url: url.to_string(),
            status,
            content_type,
            body,
            fetched_at: Utc::now(),
        })
    }
}

/// Fetcher serving a fixed URL-to-page map; unknown URLs return 404.
#[derive(Default)]
pub struct StaticFetcher {
    pages: HashMap<String, FetchedPage>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, url: &str, content_type: &str, body: &str) -> Self {
        self.pages
            .insert(url.to_string(), FetchedPage::ok(url, content_type, body));
        self
    }

    pub fn with_status(mut self, url: &str, status: u16, body: &str) -> Self {
        self.pages.insert(
            url.to_string(),
            FetchedPage {
                url: url.to_string(),
                status,
                content_type: Some("text/html".to_string()),
                body: body.to_string(),
                fetched_at: Utc::now(),
            },
        );
        self
    }
}

#[async_trait]
impl Fetcher for StaticFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage> {
        Ok(self
            .pages
            .get(url)
            .cloned()
            .unwrap_or_else(|| FetchedPage::not_found(url)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_fetcher_serves_and_404s() {
        let fetcher = StaticFetcher::new().with_page(
            "https://example.com/a",
            "text/html",
            "<html>hi</html>",
        );
        let page = fetcher.fetch("https://example.com/a").await.unwrap();
        assert!(page.is_success());
        assert_eq!(page.body, "<html>hi</html>");

        let missing = fetcher.fetch("https://example.com/b").await.unwrap();
        assert_eq!(missing.status, 404);
        assert!(missing.error_for_status().is_err());
    }

    #[test]
    fn test_error_for_status_classification() {
        let page = FetchedPage {
            url: "https://example.com".into(),
            status: 503,
            content_type: None,
            body: String::new(),
            fetched_at: Utc::now(),
        };
        let err = page.error_for_status().unwrap_err();
        assert!(err.is_transient());

        let page404 = FetchedPage::not_found("https://example.com");
        let err = page404.error_for_status().unwrap_err();
        assert!(!err.is_transient());
    }
}
