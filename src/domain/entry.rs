use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One article as delivered by a feed.
///
/// Identity is the pair (`source_url`, `title`): the ledger keys on it and
/// the pipeline never renders the same pair twice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedEntry {
    /// URL of the feed the entry came from.
    pub source_url: String,
    pub title: String,
    /// Article permalink, used to resolve relative image references.
    pub link: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    /// Full content body, or the summary when the feed carries no body.
    pub content_html: Option<String>,
}

impl FeedEntry {
    pub fn new(source_url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            source_url: source_url.into(),
            title: title.into(),
            link: None,
            published_at: None,
            content_html: None,
        }
    }

    pub fn with_content(mut self, html: impl Into<String>) -> Self {
        self.content_html = Some(html.into());
        self
    }

    pub fn with_link(mut self, link: impl Into<String>) -> Self {
        self.link = Some(link.into());
        self
    }

    pub fn key(&self) -> (&str, &str) {
        (&self.source_url, &self.title)
    }
}
