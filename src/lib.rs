//! # KingsRSS
//!
//! Collects RSS/Atom articles into a cumulative daily EPUB and mails it.
//!
//! ## Architecture
//!
//! Each run walks the configured feeds in order:
//!
//! ```text
//! Fetcher → Normalizer → Ledger filter → Renderer (+ Embedder) → Book Store → Ledger → Mailer
//! ```
//!
//! The book only ever grows: new chapters are appended to the reading order
//! and filed under their feed's section, and an article is recorded as
//! processed only once the book holding it has been saved.
//!
//! ## Modules
//!
//! - [`app`]: Application context and error types
//! - [`config`]: `srcconf.yml` loading and defaults
//! - [`domain`]: Core models (FeedEntry, Chapter, Section, Book)
//! - [`embed`]: Image download and JPEG re-encoding
//! - [`epub`]: Reading and atomically writing the book file
//! - [`fetcher`]: HTTP retrieval
//! - [`mailer`]: SMTP delivery of the book
//! - [`normalizer`]: Feed parsing
//! - [`pipeline`]: The per-feed run
//! - [`render`]: Article to chapter conversion
//! - [`store`]: Processed-article ledger

/// Application context and error handling.
///
/// The [`AppContext`](app::AppContext) struct wires together all components:
/// ledger, fetcher, book store, mailer, renderer.
pub mod app;

/// Configuration loaded from `srcconf.yml` (or `KINGSRSS_CONFIG`).
pub mod config;

/// Core domain models.
///
/// - [`FeedEntry`](domain::FeedEntry): one article from a feed
/// - [`Chapter`](domain::Chapter): a rendered article with its images
/// - [`Book`](domain::Book): the cumulative e-book and its merge rules
pub mod domain;

/// Image embedding under a byte budget.
pub mod embed;

/// EPUB container I/O.
///
/// - [`BookStore`](epub::BookStore): Trait for loading and saving the book
/// - [`EpubStore`](epub::EpubStore): Single-file implementation with
///   write-then-rename saves
pub mod epub;

/// HTTP fetching.
///
/// - [`Fetcher`](fetcher::Fetcher): Async trait for retrieving bytes
/// - [`HttpFetcher`](fetcher::http_fetcher::HttpFetcher): reqwest-based implementation
pub mod fetcher;

/// Email delivery via lettre.
pub mod mailer;

/// Feed parsing and normalization.
///
/// Converts RSS 0.9x/1.0/2.0, Atom 0.3/1.0, and JSON Feed 1.0
/// into [`FeedEntry`](domain::FeedEntry) values.
pub mod normalizer;

pub mod pipeline;

/// Chapter rendering and XHTML serialization.
pub mod render;

/// SQLite persistence for processed articles.
///
/// - [`Ledger`](store::Ledger): Trait defining ledger operations
/// - [`SqliteLedger`](store::SqliteLedger): SQLite implementation
pub mod store;
