use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Ledger row marking an article as already collected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedRecord {
    pub url: String,
    pub title: String,
    pub processed_at: DateTime<Utc>,
}
