use thiserror::Error;

#[derive(Error, Debug)]
pub enum KingsError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] rusqlite_migration::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Feed parsing error: {0}")]
    FeedParse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Malformed EPUB: {0}")]
    Epub(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, KingsError>;
