pub mod book;
pub mod entry;
pub mod record;

pub use book::{Book, Chapter, EmbeddedImage, NavLink, Resource, Section};
pub use entry::FeedEntry;
pub use record::ProcessedRecord;
