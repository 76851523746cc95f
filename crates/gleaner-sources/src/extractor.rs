//! HTML page extraction.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use gleaner_core::config::ExtractorConfig;
use gleaner_scheduler::ContentExtractor;
use scraper::{Html, Selector};
use tracing::{debug, warn};

use crate::error::SourceError;

/// Elements whose text becomes a segment, in document order.
const CONTENT_SELECTOR: &str = "title, h1, h2, h3, h4, h5, h6, p, li, blockquote, td";

/// Fetches a page over HTTP and splits it into readable text segments.
pub struct HttpExtractor {
    client: reqwest::Client,
    selector: Selector,
    max_segments: usize,
}

impl HttpExtractor {
    pub fn new(config: &ExtractorConfig) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            selector: content_selector()?,
            max_segments: config.max_segments,
        })
    }

    async fn fetch_segments(&self, url: &str) -> Result<Vec<String>, SourceError> {
        let resp = self.client.get(url).send().await?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(SourceError::Api {
                status,
                message: text,
            });
        }

        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("text/html")
            .to_ascii_lowercase();
        let body = resp.text().await?;

        if content_type.contains("html") {
            Ok(extract_segments(&body, &self.selector, self.max_segments))
        } else if content_type.starts_with("text/plain") {
            Ok(plain_text_segments(&body, self.max_segments))
        } else {
            Err(SourceError::ContentType(content_type))
        }
    }
}

#[async_trait]
impl ContentExtractor for HttpExtractor {
    async fn fetch(&self, url: &str) -> Vec<String> {
        match self.fetch_segments(url).await {
            Ok(segments) => {
                debug!(url, segments = segments.len(), "page extracted");
                segments
            }
            Err(e) => {
                warn!(url, "content extraction failed: {e}");
                Vec::new()
            }
        }
    }
}

fn content_selector() -> Result<Selector, SourceError> {
    Selector::parse(CONTENT_SELECTOR)
        .map_err(|e| SourceError::Parse(format!("Failed to parse selector: {:?}", e)))
}

/// Whitespace-normalized text of every matching element, skipping empties
/// and exact repeats, capped at `max`.
pub fn extract_segments(html: &str, selector: &Selector, max: usize) -> Vec<String> {
    let document = Html::parse_document(html);
    let mut seen = HashSet::new();
    let mut segments = Vec::new();

    for element in document.select(selector) {
        if segments.len() >= max {
            break;
        }
        let text = normalize(&element.text().collect::<Vec<_>>().join(" "));
        if !text.is_empty() && seen.insert(text.clone()) {
            segments.push(text);
        }
    }
    segments
}

/// Blank-line separated paragraphs of a plain-text body.
fn plain_text_segments(body: &str, max: usize) -> Vec<String> {
    body.split("\n\n")
        .map(normalize)
        .filter(|s| !s.is_empty())
        .take(max)
        .collect()
}

fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
