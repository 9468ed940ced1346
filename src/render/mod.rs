//! Turning feed entries into chapter documents.

pub mod xhtml;

use scraper::{Html, Selector};
use std::sync::LazyLock;
use thiserror::Error;
use url::Url;

use crate::domain::book::STYLE_HREF;
use crate::domain::{Chapter, FeedEntry};
use crate::embed::ImageEmbedder;
use xhtml::ImageMap;

static IMG_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("img[src], noscript").expect("static selector"));

/// Random bytes in a chapter file name; 4 bytes = 8 hex chars.
const CHAPTER_TOKEN_BYTES: usize = 4;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("entry {0:?} has neither content nor summary")]
    MissingContent(String),
}

pub struct ArticleRenderer {
    embedder: ImageEmbedder,
}

impl ArticleRenderer {
    pub fn new(embedder: ImageEmbedder) -> Self {
        Self { embedder }
    }

    /// Render `entry` as a chapter of the feed called `feed_name`.
    ///
    /// Images are embedded one at a time; an image that cannot be embedded
    /// is removed from the chapter. Only a missing body fails the entry.
    pub async fn render(&self, entry: &FeedEntry, feed_name: &str) -> Result<Chapter, RenderError> {
        let body = entry
            .content_html
            .as_deref()
            .ok_or_else(|| RenderError::MissingContent(entry.title.clone()))?;

        let sources = image_sources(body);
        let base = entry.link.as_deref().and_then(|link| Url::parse(link).ok());

        let mut images = Vec::new();
        let mut image_map = ImageMap::new();
        for src in sources {
            let Some(url) = resolve_image_url(base.as_ref(), &src) else {
                tracing::error!("Error processing image: unsupported reference {:?}", src);
                image_map.insert(src, None);
                continue;
            };

            match self.embedder.embed(url.as_str()).await {
                Ok(image) => {
                    image_map.insert(src, Some(image.file_name.clone()));
                    images.push(image);
                }
                Err(e) => {
                    tracing::error!("{}", e);
                    image_map.insert(src, None);
                }
            }
        }

        // Parsed again after the awaits above: `Html` is not `Send`.
        let fragment = Html::parse_fragment(body);
        let content = xhtml::fragment_to_xhtml(&fragment, &image_map);

        Ok(Chapter {
            title: entry.title.clone(),
            file_name: chapter_file_name(feed_name),
            html_content: document(&entry.title, Some(entry.title.as_str()), &content),
            images,
        })
    }
}

/// Distinct `<img src>` values in document order, including images inside
/// `<noscript>` fallbacks.
fn image_sources(body: &str) -> Vec<String> {
    let mut sources = Vec::new();
    collect_image_sources(&Html::parse_fragment(body), &mut sources);
    sources
}

fn collect_image_sources(fragment: &Html, sources: &mut Vec<String>) {
    for element in fragment.select(&IMG_SELECTOR) {
        if element.value().name() == "noscript" {
            if let Some(inner) = xhtml::noscript_markup(element) {
                collect_image_sources(&inner, sources);
            }
        } else if let Some(src) = element.value().attr("src") {
            if !sources.iter().any(|s| s == src) {
                sources.push(src.to_string());
            }
        }
    }
}

/// Absolute http(s) URL for an image reference, resolving relative ones
/// against the article link.
fn resolve_image_url(base: Option<&Url>, src: &str) -> Option<Url> {
    let src = src.trim();
    if src.is_empty() {
        return None;
    }

    let url = match Url::parse(src) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => base?.join(src).ok()?,
        Err(_) => return None,
    };

    matches!(url.scheme(), "http" | "https").then_some(url)
}

/// `<feed>_<8 hex>.xhtml`, with the feed name reduced to characters that
/// are safe in archive paths and XML ids.
pub fn chapter_file_name(feed_name: &str) -> String {
    let stem: String = feed_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    let stem = if stem.is_empty() { "feed".to_string() } else { stem };
    let token = hex::encode(rand::random::<[u8; CHAPTER_TOKEN_BYTES]>());
    format!("{stem}_{token}.xhtml")
}

/// Wrap an XHTML body in a chapter document that links the shared
/// stylesheet. `heading` becomes an `<h1>` above the body.
pub fn document(title: &str, heading: Option<&str>, body_xhtml: &str) -> String {
    let title = html_escape::encode_text(title);
    let heading = heading
        .map(|h| format!("<h1>{}</h1>\n", html_escape::encode_text(h)))
        .unwrap_or_default();

    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops">
<head>
<title>{title}</title>
<link rel="stylesheet" href="{STYLE_HREF}" type="text/css"/>
</head>
<body>
{heading}{body_xhtml}
</body>
</html>
"#
    )
}
