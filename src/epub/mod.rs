//! The cumulative book on disk.
//!
//! [`EpubStore`] loads the book file if it exists, otherwise builds a fresh
//! one from a [`BookTemplate`], and saves by writing a complete container to
//! a temporary file next to the target before renaming it into place.

pub mod reader;
pub mod writer;

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, Utc};
use rand::seq::IndexedRandom;
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::app::Result;
use crate::domain::book::{STYLE_HREF, STYLE_ID, XHTML_MEDIA_TYPE};
use crate::domain::{Book, Resource};
use crate::render::{document, xhtml::to_xhtml};

pub const INTRO_ID: &str = "intro";
pub const INTRO_HREF: &str = "intro.xhtml";
pub const COVER_ID: &str = "cover-img";

/// Random bytes in a book identifier; 8 bytes = 16 hex chars.
const IDENTIFIER_BYTES: usize = 8;

const STYLESHEET: &str = r#"body {
    font-family: Times, serif;
    margin: 5%;
    text-align: justify;
}
img {
    max-width: 100%;
    height: auto;
}
"#;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("failed to stage book next to {path}: {source}")]
    Stage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write book archive: {0}")]
    Write(#[from] zip::result::ZipError),

    #[error("failed to replace {path}: {source}")]
    Replace {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("IO error while saving book: {0}")]
    Io(#[from] io::Error),
}

/// Where the cumulative book lives.
pub trait BookStore {
    /// The stored book, or a fresh one when nothing has been saved yet.
    fn load(&self) -> Result<Book>;

    /// Replace the stored book with `book`. On error the previously stored
    /// file is left as it was.
    fn save(&self, book: &Book) -> std::result::Result<(), PersistError>;

    fn path(&self) -> &Path;
}

/// What a new book starts with.
#[derive(Debug, Clone)]
pub struct BookTemplate {
    pub title: String,
    pub language: String,
    /// Directory a cover image is picked from at random.
    pub cover_dir: Option<PathBuf>,
    /// Shown as an introduction page ahead of every chapter.
    pub prefix_html: Option<String>,
}

impl BookTemplate {
    pub fn new(title: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            language: language.into(),
            cover_dir: None,
            prefix_html: None,
        }
    }

    pub fn with_cover_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cover_dir = Some(dir.into());
        self
    }

    pub fn with_prefix_html(mut self, html: impl Into<String>) -> Self {
        self.prefix_html = Some(html.into());
        self
    }

    /// A new, empty book: stylesheet, optional cover and introduction, and
    /// a spine holding the navigation document.
    pub fn create(&self) -> Book {
        let identifier = hex::encode(rand::random::<[u8; IDENTIFIER_BYTES]>());
        let mut book = Book::new(identifier, &self.title, &self.language);

        if let Some(dir) = &self.cover_dir {
            match pick_cover(dir) {
                Ok(Some(cover)) => {
                    book.cover_id = Some(cover.id.clone());
                    book.push_resource(cover);
                }
                Ok(None) => tracing::error!("No cover image found in {}", dir.display()),
                Err(e) => tracing::error!("Error reading cover directory {}: {}", dir.display(), e),
            }
        }

        book.push_resource(Resource::new(STYLE_ID, STYLE_HREF, "text/css", STYLESHEET));

        if let Some(prefix) = &self.prefix_html {
            let intro = document("Introduction", None, &to_xhtml(prefix));
            book.push_resource(Resource::new(INTRO_ID, INTRO_HREF, XHTML_MEDIA_TYPE, intro));
            book.spine.push(INTRO_ID.to_string());
        }

        book
    }
}

/// `KingsRSS Feed Collection <YYYYMMDD>`
pub fn default_title(date: NaiveDate) -> String {
    format!("KingsRSS Feed Collection {}", date.format("%Y%m%d"))
}

/// A random image file from `dir`, as the cover resource. `None` when the
/// directory holds no recognizable image.
fn pick_cover(dir: &Path) -> io::Result<Option<Resource>> {
    let mut candidates = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && image_media_type(&path).is_some() {
            candidates.push(path);
        }
    }
    candidates.sort();

    let Some(path) = candidates.choose(&mut rand::rng()) else {
        return Ok(None);
    };
    let Some((ext, media_type)) = image_media_type(path) else {
        return Ok(None);
    };

    tracing::info!("Using cover image {}", path.display());
    let content = fs::read(path)?;
    Ok(Some(
        Resource::new(COVER_ID, format!("cover.{ext}"), media_type, content)
            .with_properties("cover-image"),
    ))
}

fn image_media_type(path: &Path) -> Option<(&'static str, &'static str)> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => Some(("jpg", "image/jpeg")),
        "png" => Some(("png", "image/png")),
        "gif" => Some(("gif", "image/gif")),
        "webp" => Some(("webp", "image/webp")),
        _ => None,
    }
}

/// Book kept as a single EPUB file.
pub struct EpubStore {
    path: PathBuf,
    template: BookTemplate,
}

impl EpubStore {
    pub fn new(path: impl Into<PathBuf>, template: BookTemplate) -> Self {
        Self {
            path: path.into(),
            template,
        }
    }
}

impl BookStore for EpubStore {
    fn load(&self) -> Result<Book> {
        if !self.path.exists() {
            tracing::info!("Creating new book at {}", self.path.display());
            return Ok(self.template.create());
        }

        let file = File::open(&self.path)?;
        let book = reader::read_book(BufReader::new(file))?;
        tracing::info!(
            "Loaded existing book {} ({} chapters)",
            self.path.display(),
            book.chapter_hrefs().len()
        );
        Ok(book)
    }

    fn save(&self, book: &Book) -> std::result::Result<(), PersistError> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };

        let staged = NamedTempFile::new_in(dir).map_err(|source| PersistError::Stage {
            path: self.path.clone(),
            source,
        })?;

        // Dropping `staged` on any early return removes the temporary file.
        let writer = writer::write_book(book, Utc::now(), BufWriter::new(staged))?;
        let staged = writer.into_inner().map_err(|e| e.into_error())?;
        staged.as_file().sync_all()?;

        staged
            .persist(&self.path)
            .map_err(|e| PersistError::Replace {
                path: self.path.clone(),
                source: e.error,
            })?;

        tracing::info!("Saved book to {}", self.path.display());
        Ok(())
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::book::NAV_ID;
    use crate::domain::{Chapter, EmbeddedImage};

    /// Delegates loading but refuses every save.
    pub(crate) struct FailingSave<S>(pub(crate) S);

    impl<S: BookStore> BookStore for FailingSave<S> {
        fn load(&self) -> Result<Book> {
            self.0.load()
        }

        fn save(&self, _book: &Book) -> std::result::Result<(), PersistError> {
            Err(PersistError::Io(io::Error::other("disk full")))
        }

        fn path(&self) -> &Path {
            self.0.path()
        }
    }

    fn chapter(name: &str, with_image: bool) -> Chapter {
        let images = if with_image {
            vec![EmbeddedImage {
                internal_id: format!("{name}0000"),
                file_name: format!("images/img_{name}0000.jpg"),
                media_type: "image/jpeg".into(),
                content: vec![0xff, 0xd8, 0xff, 0xd9],
            }]
        } else {
            Vec::new()
        };
        Chapter {
            title: format!("Story {name}"),
            file_name: format!("feed_{name}.xhtml"),
            html_content: document(&format!("Story {name}"), None, "<p>text</p>"),
            images,
        }
    }

    fn store(dir: &Path) -> EpubStore {
        EpubStore::new(dir.join("book.epub"), BookTemplate::new("Digest", "en"))
    }

    #[test]
    fn test_fresh_book_has_style_and_nav_only() {
        let dir = tempfile::tempdir().unwrap();
        let book = store(dir.path()).load().unwrap();

        assert_eq!(book.identifier.len(), 16);
        assert_eq!(book.title, "Digest");
        assert_eq!(book.spine, vec![NAV_ID]);
        assert!(book.sections.is_empty());
        assert!(book.resource(STYLE_ID).is_some());
        assert!(book.cover_id.is_none());
    }

    #[test]
    fn test_fresh_book_with_cover_and_intro() {
        let dir = tempfile::tempdir().unwrap();
        let covers = dir.path().join("cover");
        fs::create_dir(&covers).unwrap();
        fs::write(covers.join("one.JPG"), [0xff, 0xd8, 0xff, 0xd9]).unwrap();
        fs::write(covers.join("notes.txt"), "not an image").unwrap();

        let template = BookTemplate::new("Digest", "en")
            .with_cover_dir(&covers)
            .with_prefix_html("<p>Good morning<br>reader</p>");
        let book = template.create();

        let cover = book.resource(COVER_ID).unwrap();
        assert_eq!(cover.href, "cover.jpg");
        assert_eq!(cover.properties.as_deref(), Some("cover-image"));
        assert_eq!(book.cover_id.as_deref(), Some(COVER_ID));

        let intro = book.resource(INTRO_ID).unwrap();
        let intro = std::str::from_utf8(&intro.content).unwrap();
        assert!(intro.contains("<p>Good morning<br/>reader</p>"));
        assert_eq!(book.spine, vec![NAV_ID, INTRO_ID]);
        assert!(book.sections.is_empty());
    }

    #[test]
    fn test_missing_cover_dir_means_no_cover() {
        let dir = tempfile::tempdir().unwrap();
        let book = BookTemplate::new("Digest", "en")
            .with_cover_dir(dir.path().join("absent"))
            .create();
        assert!(book.cover_id.is_none());
        assert!(book.resource(COVER_ID).is_none());
    }

    #[test]
    fn test_save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        let book = store
            .load()
            .unwrap()
            .merge(&[chapter("a", true), chapter("b", false)], "Tech & Science");
        store.save(&book).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.identifier, book.identifier);
        assert_eq!(loaded.title, book.title);
        assert_eq!(loaded.language, "en");
        assert_eq!(loaded.spine, book.spine);
        assert_eq!(loaded.sections, book.sections);
        assert_eq!(loaded.resources.len(), book.resources.len());
        let image = loaded.resource("image_a0000").unwrap();
        assert_eq!(&image.content[..], &[0xff, 0xd8, 0xff, 0xd9]);
    }

    #[test]
    fn test_spine_is_append_only_across_saves() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        let first = store.load().unwrap().merge(&[chapter("a", false)], "Tech");
        store.save(&first).unwrap();

        let second = store.load().unwrap().merge(&[chapter("b", false)], "Sport");
        store.save(&second).unwrap();

        let third = store.load().unwrap().merge(&[chapter("c", false)], "Tech");
        store.save(&third).unwrap();

        let loaded = store.load().unwrap();
        assert!(loaded.spine.starts_with(&first.spine));
        assert!(loaded.spine.starts_with(&second.spine));
        assert_eq!(
            loaded.spine,
            vec![NAV_ID, "chapter_feed_a", "chapter_feed_b", "chapter_feed_c"]
        );
        assert_eq!(loaded.sections.len(), 2);
        assert_eq!(loaded.section("Tech").unwrap().links.len(), 2);
    }

    #[test]
    fn test_failed_save_keeps_previous_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let first = store.load().unwrap().merge(&[chapter("a", false)], "Tech");
        store.save(&first).unwrap();
        let before = fs::read(store.path()).unwrap();

        let next = first.merge(&[chapter("b", false)], "Tech");
        let blocked = EpubStore::new(
            dir.path().join("missing").join("book.epub"),
            BookTemplate::new("Digest", "en"),
        );
        assert!(matches!(blocked.save(&next), Err(PersistError::Stage { .. })));

        assert_eq!(fs::read(store.path()).unwrap(), before);
        let leftovers: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[test]
    fn test_replace_failure_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        // A non-empty directory cannot be replaced by a file.
        let target = dir.path().join("book.epub");
        fs::create_dir(&target).unwrap();
        fs::write(target.join("keep"), "x").unwrap();

        let store = EpubStore::new(&target, BookTemplate::new("Digest", "en"));
        let book = Book::new("abc", "Digest", "en");
        assert!(matches!(store.save(&book), Err(PersistError::Replace { .. })));

        assert!(target.join("keep").exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_corrupt_book_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        fs::write(store.path(), b"not a zip").unwrap();
        assert!(store.load().is_err());
    }

    #[test]
    fn test_default_title() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        assert_eq!(default_title(date), "KingsRSS Feed Collection 20240309");
    }
}
