use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use rusqlite_migration::{Migrations, M};

use crate::app::{KingsError, Result};
use crate::domain::ProcessedRecord;
use crate::store::Ledger;

const INSERT_RECORD: &str =
    "INSERT OR IGNORE INTO articles (url, title, processed_at) VALUES (?1, ?2, ?3)";

pub struct SqliteLedger {
    conn: Mutex<Connection>,
}

impl SqliteLedger {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let ledger = Self {
            conn: Mutex::new(conn),
        };
        ledger.run_migrations()?;
        Ok(ledger)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let ledger = Self {
            conn: Mutex::new(conn),
        };
        ledger.run_migrations()?;
        Ok(ledger)
    }

    fn run_migrations(&self) -> Result<()> {
        let migrations = Migrations::new(vec![M::up(include_str!(
            "../../migrations/001-initial/up.sql"
        ))]);

        let mut conn = self.conn()?;
        migrations.to_latest(&mut conn)?;

        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| KingsError::Other(format!("ledger lock poisoned: {e}")))
    }

    fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| s.parse::<DateTime<Utc>>().ok())
    }
}

impl Ledger for SqliteLedger {
    fn exists(&self, url: &str, title: &str) -> Result<bool> {
        let conn = self.conn()?;

        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM articles WHERE url = ?1 AND title = ?2",
            params![url, title],
            |row| row.get(0),
        )?;

        Ok(count > 0)
    }

    fn record(&self, url: &str, title: &str) -> Result<bool> {
        let conn = self.conn()?;

        let inserted = conn.execute(INSERT_RECORD, params![url, title, Utc::now().to_rfc3339()])?;

        Ok(inserted > 0)
    }

    fn record_all(&self, keys: &[(&str, &str)]) -> Result<usize> {
        let mut conn = self.conn()?;

        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();
        let mut count = 0;

        for (url, title) in keys {
            count += tx.execute(INSERT_RECORD, params![url, title, now])?;
        }

        tx.commit()?;
        Ok(count)
    }

    fn records(&self) -> Result<Vec<ProcessedRecord>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(
            "SELECT url, title, processed_at FROM articles ORDER BY processed_at, rowid",
        )?;

        let records = stmt
            .query_map([], |row| {
                Ok(ProcessedRecord {
                    url: row.get(0)?,
                    title: row.get(1)?,
                    processed_at: row
                        .get::<_, String>(2)
                        .ok()
                        .and_then(|s| Self::parse_datetime(&s))
                        .unwrap_or_else(Utc::now),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(records)
    }
}
