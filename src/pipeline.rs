//! One collection run: every configured feed, in order, into the book.
//!
//! Per feed the steps are fetch, filter against the ledger, load the book,
//! render, merge, save, record, mail. Entries are recorded only after the
//! book holding them has been saved, so anything lost to a failure is
//! picked up again on the next run.

use std::collections::HashSet;
use std::fmt;

use crate::app::AppContext;
use crate::config::FeedSource;
use crate::domain::FeedEntry;
use crate::epub::BookStore;
use crate::fetcher::Fetcher;
use crate::mailer::Mailer;
use crate::store::Ledger;

/// Step a feed stopped at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetch,
    Parse,
    Load,
    Persist,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Fetch => "fetch",
            Stage::Parse => "parse",
            Stage::Load => "load",
            Stage::Persist => "persist",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedOutcome {
    /// The book was saved with `chapters` new chapters.
    Persisted { chapters: usize },
    NoNewContent,
    Failed(Stage),
}

/// What happened to each feed of a run, in configuration order.
#[derive(Debug, Default)]
pub struct RunReport {
    pub feeds: Vec<(String, FeedOutcome)>,
}

impl RunReport {
    pub fn chapters_added(&self) -> usize {
        self.feeds
            .iter()
            .map(|(_, outcome)| match outcome {
                FeedOutcome::Persisted { chapters } => *chapters,
                _ => 0,
            })
            .sum()
    }

    pub fn failures(&self) -> usize {
        self.feeds
            .iter()
            .filter(|(_, outcome)| matches!(outcome, FeedOutcome::Failed(_)))
            .count()
    }
}

/// Process `feeds` one after another. A failing feed never stops the run.
pub async fn run(ctx: &AppContext, feeds: &[FeedSource]) -> RunReport {
    let mut report = RunReport::default();

    for feed in feeds {
        tracing::info!("Processing feed: {} ({})", feed.name, feed.url);
        let outcome = process_feed(ctx, feed).await;
        if let FeedOutcome::Failed(stage) = &outcome {
            tracing::warn!("Skipped feed {} after {} failure", feed.name, stage);
        }
        report.feeds.push((feed.name.clone(), outcome));
    }

    tracing::info!(
        "Run complete: {} feeds, {} new chapters, {} failures",
        report.feeds.len(),
        report.chapters_added(),
        report.failures()
    );
    report
}

pub async fn process_feed(ctx: &AppContext, feed: &FeedSource) -> FeedOutcome {
    let body = match ctx.fetcher.fetch(&feed.url).await {
        Ok(body) => body,
        Err(e) => {
            tracing::error!("Error fetching feed {}: {}", feed.url, e);
            return FeedOutcome::Failed(Stage::Fetch);
        }
    };

    let entries = match ctx.normalizer.normalize(&feed.url, &body) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::error!("Error parsing feed {}: {}", feed.url, e);
            return FeedOutcome::Failed(Stage::Parse);
        }
    };

    if entries.is_empty() {
        tracing::info!("No entries found in feed {}", feed.url);
        return FeedOutcome::NoNewContent;
    }

    let pending = unprocessed(ctx, entries);
    if pending.is_empty() {
        tracing::info!("No new articles to process");
        return FeedOutcome::NoNewContent;
    }

    let book = match ctx.books.load() {
        Ok(book) => book,
        Err(e) => {
            tracing::error!("Error loading book {}: {}", ctx.books.path().display(), e);
            return FeedOutcome::Failed(Stage::Load);
        }
    };

    let mut chapters = Vec::new();
    let mut rendered = Vec::new();
    for entry in &pending {
        match ctx.renderer.render(entry, &feed.name).await {
            Ok(chapter) => {
                tracing::info!("Processed article: {}", entry.title);
                chapters.push(chapter);
                rendered.push(entry);
            }
            Err(e) => tracing::error!("Error processing article {}: {}", entry.title, e),
        }
    }

    if chapters.is_empty() {
        tracing::info!("No new articles to process");
        return FeedOutcome::NoNewContent;
    }

    let merged = book.merge(&chapters, feed.section_title());
    if let Err(e) = ctx.books.save(&merged) {
        tracing::error!("Error saving book {}: {}", ctx.books.path().display(), e);
        return FeedOutcome::Failed(Stage::Persist);
    }
    tracing::info!(
        "Added {} chapters to section {:?} of {}",
        chapters.len(),
        feed.section_title(),
        ctx.books.path().display()
    );

    let keys: Vec<(&str, &str)> = rendered.iter().map(|entry| entry.key()).collect();
    if let Err(e) = ctx.ledger.record_all(&keys) {
        // The chapters are in the book; without a record they come back next run.
        tracing::error!("Error recording processed articles for {}: {}", feed.url, e);
    }

    if let Err(e) = ctx.mailer.send(ctx.books.path()).await {
        tracing::error!("Failed to send email: {}", e);
    }

    FeedOutcome::Persisted {
        chapters: chapters.len(),
    }
}

/// Entries neither in the ledger nor repeated earlier in `entries`.
fn unprocessed(ctx: &AppContext, entries: Vec<FeedEntry>) -> Vec<FeedEntry> {
    let mut seen = HashSet::new();
    entries
        .into_iter()
        .filter(|entry| {
            let (url, title) = entry.key();
            if !seen.insert((url.to_string(), title.to_string())) {
                return false;
            }
            match ctx.ledger.exists(url, title) {
                Ok(done) => !done,
                Err(e) => {
                    tracing::error!("Error checking ledger for {}: {}", title, e);
                    false
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::tests::{noise_image, png_bytes};
    use crate::epub::tests::FailingSave;
    use crate::epub::{BookTemplate, EpubStore};
    use crate::fetcher::testing::MemoryFetcher;
    use crate::mailer::testing::RecordingMailer;
    use crate::store::SqliteLedger;
    use std::fs;
    use std::path::Path;
    use std::sync::Arc;

    const FEED_A: &str = "https://a.example/feed.xml";
    const FEED_B: &str = "https://b.example/feed.xml";

    struct Harness {
        ctx: AppContext,
        fetcher: Arc<MemoryFetcher>,
        ledger: Arc<SqliteLedger>,
        mailer: Arc<RecordingMailer>,
        store: Arc<EpubStore>,
    }

    fn harness(dir: &Path) -> Harness {
        let fetcher = Arc::new(MemoryFetcher::new());
        let ledger = Arc::new(SqliteLedger::in_memory().unwrap());
        let mailer = Arc::new(RecordingMailer::default());
        let store = Arc::new(EpubStore::new(
            dir.join("kingsrss_test.epub"),
            BookTemplate::new("Test Collection", "en"),
        ));
        let ctx = AppContext::with_parts(
            ledger.clone(),
            fetcher.clone(),
            store.clone(),
            mailer.clone(),
            512 * 1024,
        );
        Harness {
            ctx,
            fetcher,
            ledger,
            mailer,
            store,
        }
    }

    /// RSS document with one item per `(title, html)` pair.
    fn rss(items: &[(&str, &str)]) -> String {
        let items: String = items
            .iter()
            .enumerate()
            .map(|(i, (title, html))| {
                format!(
                    "<item><title>{title}</title><link>https://example.com/posts/{i}</link>\
                     <description><![CDATA[{html}]]></description></item>"
                )
            })
            .collect();
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0"><channel><title>Test</title>{items}</channel></rss>"#
        )
    }

    #[tokio::test]
    async fn test_new_entries_become_chapters_and_records() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path());
        h.fetcher.insert(
            FEED_A,
            rss(&[("First", "<p>one</p>"), ("Second", "<p>two</p>")]),
        );

        let feed = FeedSource::new(FEED_A, "alpha").with_section("Tech");
        let outcome = process_feed(&h.ctx, &feed).await;

        assert_eq!(outcome, FeedOutcome::Persisted { chapters: 2 });
        let book = h.store.load().unwrap();
        let section = book.section("Tech").unwrap();
        assert_eq!(section.links.len(), 2);
        assert_eq!(section.links[0].title, "First");
        assert_eq!(book.spine.len(), 3);
        assert_eq!(h.ledger.records().unwrap().len(), 2);
        assert_eq!(h.mailer.sent(), vec![h.store.path().to_path_buf()]);
    }

    #[tokio::test]
    async fn test_broken_image_dropped_entry_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path());
        h.fetcher.insert(
            FEED_A,
            rss(&[(
                "Pictured",
                r#"<p>text</p><img src="https://img.example/404.png"><p>more</p>"#,
            )]),
        );

        let outcome = process_feed(&h.ctx, &FeedSource::new(FEED_A, "alpha")).await;

        assert_eq!(outcome, FeedOutcome::Persisted { chapters: 1 });
        let book = h.store.load().unwrap();
        let href = book.chapter_hrefs()[0].to_string();
        let chapter = book.resource_by_href(&href).unwrap();
        let html = std::str::from_utf8(&chapter.content).unwrap();
        assert!(!html.contains("<img"));
        assert!(html.contains("<p>text</p><p>more</p>"));
        assert!(h.ledger.exists(FEED_A, "Pictured").unwrap());
    }

    #[tokio::test]
    async fn test_embedded_image_stored_in_book() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path());
        h.fetcher
            .insert("https://img.example/cat.png", png_bytes(noise_image(24)));
        h.fetcher.insert(
            FEED_A,
            rss(&[("Cat", r#"<img src="https://img.example/cat.png">"#)]),
        );

        process_feed(&h.ctx, &FeedSource::new(FEED_A, "alpha")).await;

        let book = h.store.load().unwrap();
        let image = book
            .resources
            .iter()
            .find(|r| r.href.starts_with("images/img_"))
            .unwrap();
        assert_eq!(image.media_type, "image/jpeg");
        assert!(!book.spine.contains(&image.id));
    }

    #[tokio::test]
    async fn test_second_identical_run_adds_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path());
        h.fetcher.insert(FEED_A, rss(&[("First", "<p>one</p>")]));
        let feeds = [FeedSource::new(FEED_A, "alpha")];

        run(&h.ctx, &feeds).await;
        let book_before = h.store.load().unwrap();
        let records_before = h.ledger.records().unwrap();

        let report = run(&h.ctx, &feeds).await;

        assert_eq!(report.feeds[0].1, FeedOutcome::NoNewContent);
        assert_eq!(report.chapters_added(), 0);
        let book_after = h.store.load().unwrap();
        assert_eq!(book_after.spine, book_before.spine);
        assert_eq!(book_after.sections, book_before.sections);
        assert_eq!(h.ledger.records().unwrap(), records_before);
        assert_eq!(h.mailer.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_save_records_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path());
        h.fetcher.insert(FEED_A, rss(&[("First", "<p>one</p>")]));
        run(&h.ctx, &[FeedSource::new(FEED_A, "alpha")]).await;
        let file_before = fs::read(h.store.path()).unwrap();

        h.fetcher
            .insert(FEED_A, rss(&[("First", "<p>one</p>"), ("Second", "<p>two</p>")]));
        let failing = AppContext::with_parts(
            h.ledger.clone(),
            h.fetcher.clone(),
            Arc::new(FailingSave(EpubStore::new(
                h.store.path(),
                BookTemplate::new("Test Collection", "en"),
            ))),
            h.mailer.clone(),
            512 * 1024,
        );

        let outcome = process_feed(&failing, &FeedSource::new(FEED_A, "alpha")).await;

        assert_eq!(outcome, FeedOutcome::Failed(Stage::Persist));
        assert!(!h.ledger.exists(FEED_A, "Second").unwrap());
        assert_eq!(h.ledger.records().unwrap().len(), 1);
        assert_eq!(fs::read(h.store.path()).unwrap(), file_before);
        assert_eq!(h.mailer.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_feeds_sharing_section_title_share_section() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path());
        h.fetcher.insert(FEED_A, rss(&[("From A", "<p>a</p>")]));
        h.fetcher.insert(FEED_B, rss(&[("From B", "<p>b</p>")]));

        let feeds = [
            FeedSource::new(FEED_A, "alpha").with_section("News"),
            FeedSource::new(FEED_B, "beta").with_section("News"),
        ];
        let report = run(&h.ctx, &feeds).await;

        assert_eq!(report.chapters_added(), 2);
        let book = h.store.load().unwrap();
        assert_eq!(book.sections.len(), 1);
        let titles: Vec<&str> = book.sections[0]
            .links
            .iter()
            .map(|l| l.title.as_str())
            .collect();
        assert_eq!(titles, vec!["From A", "From B"]);
    }

    #[tokio::test]
    async fn test_duplicates_within_fetch_processed_once() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path());
        h.fetcher.insert(
            FEED_A,
            rss(&[("Same", "<p>1</p>"), ("Same", "<p>2</p>"), ("Other", "<p>3</p>")]),
        );

        let outcome = process_feed(&h.ctx, &FeedSource::new(FEED_A, "alpha")).await;

        assert_eq!(outcome, FeedOutcome::Persisted { chapters: 2 });
        let records = h.ledger.records().unwrap();
        let unique: HashSet<(String, String)> = records
            .iter()
            .map(|r| (r.url.clone(), r.title.clone()))
            .collect();
        assert_eq!(unique.len(), records.len());
        assert_eq!(records.len(), 2);
    }

    #[tokio::test]
    async fn test_entry_without_content_left_for_next_run() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path());
        h.fetcher.insert(
            FEED_A,
            r#"<?xml version="1.0"?><rss version="2.0"><channel><title>T</title>
<item><title>Bare</title><link>https://example.com/bare</link></item>
<item><title>Full</title><description>body</description></item>
</channel></rss>"#,
        );

        let outcome = process_feed(&h.ctx, &FeedSource::new(FEED_A, "alpha")).await;

        assert_eq!(outcome, FeedOutcome::Persisted { chapters: 1 });
        assert!(!h.ledger.exists(FEED_A, "Bare").unwrap());
        assert!(h.ledger.exists(FEED_A, "Full").unwrap());
    }

    #[tokio::test]
    async fn test_fetch_failure_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path());

        let report = run(&h.ctx, &[FeedSource::new(FEED_A, "alpha")]).await;

        assert_eq!(report.feeds[0].1, FeedOutcome::Failed(Stage::Fetch));
        assert_eq!(report.failures(), 1);
        assert!(!h.store.path().exists());
        assert!(h.ledger.records().unwrap().is_empty());
        assert!(h.mailer.sent().is_empty());
    }

    #[tokio::test]
    async fn test_unparseable_feed_is_parse_failure() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path());
        h.fetcher.insert(FEED_A, "this is not a feed");

        let outcome = process_feed(&h.ctx, &FeedSource::new(FEED_A, "alpha")).await;
        assert_eq!(outcome, FeedOutcome::Failed(Stage::Parse));
    }

    #[tokio::test]
    async fn test_corrupt_book_is_load_failure() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path());
        fs::write(h.store.path(), b"garbage").unwrap();
        h.fetcher.insert(FEED_A, rss(&[("First", "<p>one</p>")]));

        let outcome = process_feed(&h.ctx, &FeedSource::new(FEED_A, "alpha")).await;

        assert_eq!(outcome, FeedOutcome::Failed(Stage::Load));
        assert_eq!(fs::read(h.store.path()).unwrap(), b"garbage");
        assert!(h.ledger.records().unwrap().is_empty());
    }
}
