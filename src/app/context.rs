use std::sync::Arc;
use std::time::Duration;

use chrono::Local;

use crate::app::error::Result;
use crate::config::Config;
use crate::embed::ImageEmbedder;
use crate::epub::{default_title, BookStore, BookTemplate, EpubStore};
use crate::fetcher::http_fetcher::HttpFetcher;
use crate::fetcher::Fetcher;
use crate::mailer::{Mailer, SmtpMailer};
use crate::normalizer::Normalizer;
use crate::render::ArticleRenderer;
use crate::store::sqlite::SqliteLedger;
use crate::store::Ledger;

pub struct AppContext {
    pub ledger: Arc<dyn Ledger + Send + Sync>,
    pub fetcher: Arc<dyn Fetcher + Send + Sync>,
    pub books: Arc<dyn BookStore + Send + Sync>,
    pub mailer: Arc<dyn Mailer + Send + Sync>,
    pub normalizer: Normalizer,
    pub renderer: ArticleRenderer,
}

impl AppContext {
    /// Production wiring: SQLite ledger, HTTP fetcher, today's book file and
    /// the SMTP mailer.
    pub fn new(config: &Config) -> Result<Self> {
        let today = Local::now().date_naive();

        let ledger: Arc<dyn Ledger + Send + Sync> = Arc::new(SqliteLedger::new(&config.database)?);
        let fetcher: Arc<dyn Fetcher + Send + Sync> = Arc::new(HttpFetcher::with_timeout(
            Duration::from_secs(config.request_timeout_secs),
        )?);

        let mut template = BookTemplate::new(default_title(today), &config.language)
            .with_cover_dir(&config.cover_dir);
        if let Some(prefix) = &config.prefix_html {
            template = template.with_prefix_html(prefix);
        }
        let books: Arc<dyn BookStore + Send + Sync> =
            Arc::new(EpubStore::new(config.book_path(today), template));

        let mailer: Arc<dyn Mailer + Send + Sync> = Arc::new(SmtpMailer::new(config.email.clone()));

        Ok(Self::with_parts(
            ledger,
            fetcher,
            books,
            mailer,
            config.max_image_bytes,
        ))
    }

    /// Wire arbitrary collaborators; images are fetched through `fetcher`
    /// too.
    pub fn with_parts(
        ledger: Arc<dyn Ledger + Send + Sync>,
        fetcher: Arc<dyn Fetcher + Send + Sync>,
        books: Arc<dyn BookStore + Send + Sync>,
        mailer: Arc<dyn Mailer + Send + Sync>,
        max_image_bytes: usize,
    ) -> Self {
        let renderer = ArticleRenderer::new(ImageEmbedder::new(fetcher.clone(), max_image_bytes));

        Self {
            ledger,
            fetcher,
            books,
            mailer,
            normalizer: Normalizer::new(),
            renderer,
        }
    }
}
