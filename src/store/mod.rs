pub mod sqlite;

use crate::app::Result;
use crate::domain::ProcessedRecord;

pub use sqlite::SqliteLedger;

/// Record of articles already collected into a book, keyed by
/// (feed url, title).
pub trait Ledger {
    fn exists(&self, url: &str, title: &str) -> Result<bool>;

    /// Returns `false` when the pair was already recorded.
    fn record(&self, url: &str, title: &str) -> Result<bool>;

    /// Record every pair in one transaction; returns how many were new.
    fn record_all(&self, keys: &[(&str, &str)]) -> Result<usize>;

    fn records(&self) -> Result<Vec<ProcessedRecord>>;
}
