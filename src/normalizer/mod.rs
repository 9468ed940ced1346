use chrono::Utc;
use feed_rs::parser;
use html_escape::decode_html_entities;

use crate::app::{KingsError, Result};
use crate::domain::FeedEntry;

const UNTITLED: &str = "(Untitled)";

#[derive(Clone)]
pub struct Normalizer;

impl Default for Normalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Normalizer {
    pub fn new() -> Self {
        Self
    }

    /// Parse an RSS, Atom or JSON feed into entries keyed by `feed_url`.
    ///
    /// An entry's body is its full content when present, otherwise its
    /// summary. Entries without a title fall back to their link.
    pub fn normalize(&self, feed_url: &str, body: &[u8]) -> Result<Vec<FeedEntry>> {
        let feed = parser::parse(body).map_err(|e| KingsError::FeedParse(e.to_string()))?;

        let entries = feed
            .entries
            .into_iter()
            .map(|entry| {
                let link = entry.links.first().map(|l| l.href.clone());
                let title = entry
                    .title
                    .map(|t| decode_html_entities(t.content.trim()).to_string())
                    .filter(|t| !t.is_empty())
                    .or_else(|| link.clone())
                    .unwrap_or_else(|| UNTITLED.to_string());

                let content_html = entry
                    .content
                    .and_then(|c| c.body)
                    .filter(|b| !b.trim().is_empty())
                    .or_else(|| entry.summary.map(|s| s.content));

                FeedEntry {
                    source_url: feed_url.to_string(),
                    title,
                    link,
                    published_at: entry
                        .published
                        .or(entry.updated)
                        .map(|dt| dt.with_timezone(&Utc)),
                    content_html,
                }
            })
            .collect();

        Ok(entries)
    }
}
