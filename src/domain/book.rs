use std::sync::Arc;

/// Manifest id of the navigation document. It is the first spine entry of
/// every book and is regenerated on each save.
pub const NAV_ID: &str = "nav";
pub const NAV_HREF: &str = "nav.xhtml";

/// Manifest id of the EPUB 2 NCX index, regenerated on each save.
pub const NCX_ID: &str = "ncx";
pub const NCX_HREF: &str = "toc.ncx";

/// Stylesheet shared by every chapter.
pub const STYLE_ID: &str = "style_nav";
pub const STYLE_HREF: &str = "style/nav.css";

pub const XHTML_MEDIA_TYPE: &str = "application/xhtml+xml";

/// A file stored in the book container, listed in the OPF manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub id: String,
    /// Path relative to the package document.
    pub href: String,
    pub media_type: String,
    pub properties: Option<String>,
    pub content: Arc<[u8]>,
}

impl Resource {
    pub fn new(
        id: impl Into<String>,
        href: impl Into<String>,
        media_type: impl Into<String>,
        content: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            id: id.into(),
            href: href.into(),
            media_type: media_type.into(),
            properties: None,
            content: Arc::from(content.into()),
        }
    }

    pub fn with_properties(mut self, properties: impl Into<String>) -> Self {
        self.properties = Some(properties.into());
        self
    }
}

/// Image downloaded and re-encoded for a chapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedImage {
    /// Random hex token shared by the manifest id and the file name.
    pub internal_id: String,
    /// `images/img_<token>.jpg`
    pub file_name: String,
    pub media_type: String,
    pub content: Vec<u8>,
}

impl EmbeddedImage {
    pub fn item_id(&self) -> String {
        format!("image_{}", self.internal_id)
    }

    fn to_resource(&self) -> Resource {
        Resource::new(
            self.item_id(),
            self.file_name.clone(),
            self.media_type.clone(),
            self.content.clone(),
        )
    }
}

/// A rendered article, ready to be merged into a book.
///
/// Images referenced by the chapter travel with it, so nothing reaches the
/// book until the chapter itself does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chapter {
    pub title: String,
    /// `<feed>_<token>.xhtml`, unique within the book.
    pub file_name: String,
    pub html_content: String,
    pub images: Vec<EmbeddedImage>,
}

impl Chapter {
    pub fn item_id(&self) -> String {
        let stem = self
            .file_name
            .strip_suffix(".xhtml")
            .unwrap_or(&self.file_name);
        format!("chapter_{stem}")
    }

    fn to_resource(&self) -> Resource {
        Resource::new(
            self.item_id(),
            self.file_name.clone(),
            XHTML_MEDIA_TYPE,
            self.html_content.as_bytes(),
        )
    }
}

/// Table-of-contents entry pointing at a chapter document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavLink {
    pub title: String,
    pub href: String,
}

/// Named group of chapter links in the table of contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub title: String,
    pub links: Vec<NavLink>,
}

impl Section {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            links: Vec::new(),
        }
    }
}

/// The cumulative e-book.
///
/// A `Book` is a snapshot: [`merge`](Book::merge) returns a new value and
/// leaves the receiver untouched, so a failed save never has to undo
/// anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Book {
    pub identifier: String,
    pub title: String,
    pub language: String,
    /// Manifest id of the cover image, if any.
    pub cover_id: Option<String>,
    /// Every stored file except the navigation documents.
    pub resources: Vec<Resource>,
    /// Reading order as manifest ids.
    pub spine: Vec<String>,
    pub sections: Vec<Section>,
}

impl Book {
    /// Empty book whose spine holds only the navigation document.
    pub fn new(
        identifier: impl Into<String>,
        title: impl Into<String>,
        language: impl Into<String>,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            title: title.into(),
            language: language.into(),
            cover_id: None,
            resources: Vec::new(),
            spine: vec![NAV_ID.to_string()],
            sections: Vec::new(),
        }
    }

    pub fn resource(&self, id: &str) -> Option<&Resource> {
        self.resources.iter().find(|r| r.id == id)
    }

    pub fn resource_by_href(&self, href: &str) -> Option<&Resource> {
        self.resources.iter().find(|r| r.href == href)
    }

    pub fn section(&self, title: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.title == title)
    }

    /// File names of every chapter listed in the table of contents.
    pub fn chapter_hrefs(&self) -> Vec<&str> {
        self.sections
            .iter()
            .flat_map(|s| s.links.iter().map(|l| l.href.as_str()))
            .collect()
    }

    pub(crate) fn push_resource(&mut self, resource: Resource) {
        self.resources.push(resource);
    }

    /// File `chapters` under `section_title` and append them to the reading
    /// order.
    ///
    /// Section titles match exactly and case-sensitively; the first match
    /// wins. Existing spine entries and section links are never reordered.
    pub fn merge(&self, chapters: &[Chapter], section_title: &str) -> Book {
        let mut book = self.clone();
        if chapters.is_empty() {
            return book;
        }

        let links = chapters.iter().map(|chapter| NavLink {
            title: chapter.title.clone(),
            href: chapter.file_name.clone(),
        });

        match book.sections.iter_mut().find(|s| s.title == section_title) {
            Some(section) => section.links.extend(links),
            None => book.sections.push(Section {
                title: section_title.to_string(),
                links: links.collect(),
            }),
        }

        for chapter in chapters {
            for image in &chapter.images {
                book.push_resource(image.to_resource());
            }
            book.push_resource(chapter.to_resource());
            book.spine.push(chapter.item_id());
        }

        book
    }
}
