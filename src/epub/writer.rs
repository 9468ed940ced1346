//! Serializing a [`Book`] as an EPUB 3 container.
//!
//! The navigation documents (`nav.xhtml` and the EPUB 2 `toc.ncx` index)
//! are generated from the book's sections on every write; they are never
//! stored in [`Book::resources`].

use std::io::{Seek, Write};

use chrono::{DateTime, Utc};
use html_escape::{encode_double_quoted_attribute as attr, encode_text as text};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::domain::book::{NAV_HREF, NAV_ID, NCX_HREF, NCX_ID, XHTML_MEDIA_TYPE};
use crate::domain::Book;

/// Directory holding the package document and every resource.
pub const PACKAGE_DIR: &str = "EPUB";
pub const PACKAGE_FILE: &str = "content.opf";

const CONTAINER_XML: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="EPUB/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>
"#;

/// Write `book` as a complete container into `sink`.
pub fn write_book<W: Write + Seek>(
    book: &Book,
    modified: DateTime<Utc>,
    sink: W,
) -> zip::result::ZipResult<W> {
    let mut zip = ZipWriter::new(sink);
    let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    let deflated = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    // The mimetype entry must come first and stay uncompressed.
    zip.start_file("mimetype", stored)?;
    zip.write_all(b"application/epub+zip")?;

    zip.start_file("META-INF/container.xml", deflated)?;
    zip.write_all(CONTAINER_XML.as_bytes())?;

    zip.start_file(format!("{PACKAGE_DIR}/{PACKAGE_FILE}"), deflated)?;
    zip.write_all(package_document(book, modified).as_bytes())?;

    zip.start_file(format!("{PACKAGE_DIR}/{NCX_HREF}"), deflated)?;
    zip.write_all(ncx_document(book).as_bytes())?;

    zip.start_file(format!("{PACKAGE_DIR}/{NAV_HREF}"), deflated)?;
    zip.write_all(nav_document(book).as_bytes())?;

    for resource in &book.resources {
        zip.start_file(format!("{PACKAGE_DIR}/{}", resource.href), deflated)?;
        zip.write_all(&resource.content)?;
    }

    zip.finish()
}

/// The OPF package document: metadata, manifest and spine.
pub fn package_document(book: &Book, modified: DateTime<Utc>) -> String {
    let mut opf = String::new();
    opf.push_str(r#"<?xml version="1.0" encoding="utf-8"?>"#);
    opf.push('\n');
    opf.push_str(&format!(
        r#"<package xmlns="http://www.idpf.org/2007/opf" version="3.0" unique-identifier="id" xml:lang="{}">"#,
        attr(&book.language)
    ));
    opf.push_str("\n  <metadata xmlns:dc=\"http://purl.org/dc/elements/1.1/\" xmlns:opf=\"http://www.idpf.org/2007/opf\">\n");
    opf.push_str(&format!(
        "    <dc:identifier id=\"id\">{}</dc:identifier>\n",
        text(&book.identifier)
    ));
    opf.push_str(&format!("    <dc:title>{}</dc:title>\n", text(&book.title)));
    opf.push_str(&format!(
        "    <dc:language>{}</dc:language>\n",
        text(&book.language)
    ));
    opf.push_str(&format!(
        "    <meta property=\"dcterms:modified\">{}</meta>\n",
        modified.format("%Y-%m-%dT%H:%M:%SZ")
    ));
    if let Some(cover_id) = &book.cover_id {
        opf.push_str(&format!(
            "    <meta name=\"cover\" content=\"{}\"/>\n",
            attr(cover_id)
        ));
    }
    opf.push_str("  </metadata>\n  <manifest>\n");

    opf.push_str(&format!(
        "    <item id=\"{NCX_ID}\" href=\"{NCX_HREF}\" media-type=\"application/x-dtbncx+xml\"/>\n"
    ));
    opf.push_str(&format!(
        "    <item id=\"{NAV_ID}\" href=\"{NAV_HREF}\" media-type=\"{XHTML_MEDIA_TYPE}\" properties=\"nav\"/>\n"
    ));
    for resource in &book.resources {
        opf.push_str(&format!(
            "    <item id=\"{}\" href=\"{}\" media-type=\"{}\"",
            attr(&resource.id),
            attr(&resource.href),
            attr(&resource.media_type)
        ));
        if let Some(properties) = &resource.properties {
            opf.push_str(&format!(" properties=\"{}\"", attr(properties)));
        }
        opf.push_str("/>\n");
    }

    opf.push_str(&format!("  </manifest>\n  <spine toc=\"{NCX_ID}\">\n"));
    for idref in &book.spine {
        opf.push_str(&format!("    <itemref idref=\"{}\"/>\n", attr(idref)));
    }
    opf.push_str("  </spine>\n</package>\n");
    opf
}

/// EPUB 2 NCX index. Each section is a top-level navPoint whose children are
/// its chapters.
pub fn ncx_document(book: &Book) -> String {
    let mut ncx = String::new();
    ncx.push_str(
        r#"<?xml version="1.0" encoding="utf-8"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
  <head>
"#,
    );
    ncx.push_str(&format!(
        "    <meta name=\"dtb:uid\" content=\"{}\"/>\n",
        attr(&book.identifier)
    ));
    ncx.push_str(
        r#"    <meta name="dtb:depth" content="2"/>
    <meta name="dtb:totalPageCount" content="0"/>
    <meta name="dtb:maxPageNumber" content="0"/>
  </head>
"#,
    );
    ncx.push_str(&format!(
        "  <docTitle>\n    <text>{}</text>\n  </docTitle>\n  <navMap>\n",
        text(&book.title)
    ));

    let mut play_order = 0;
    for (index, section) in book.sections.iter().enumerate() {
        play_order += 1;
        let first = section
            .links
            .first()
            .map(|l| l.href.as_str())
            .unwrap_or(NAV_HREF);
        ncx.push_str(&format!(
            "    <navPoint id=\"sep_{}\" playOrder=\"{}\">\n      <navLabel>\n        <text>{}</text>\n      </navLabel>\n      <content src=\"{}\"/>\n",
            index,
            play_order,
            text(&section.title),
            attr(first)
        ));
        for link in &section.links {
            play_order += 1;
            ncx.push_str(&format!(
                "      <navPoint id=\"np_{}\" playOrder=\"{}\">\n        <navLabel>\n          <text>{}</text>\n        </navLabel>\n        <content src=\"{}\"/>\n      </navPoint>\n",
                play_order,
                play_order,
                text(&link.title),
                attr(&link.href)
            ));
        }
        ncx.push_str("    </navPoint>\n");
    }

    ncx.push_str("  </navMap>\n</ncx>\n");
    ncx
}

/// EPUB 3 navigation document mirroring the NCX structure.
pub fn nav_document(book: &Book) -> String {
    let lang = attr(&book.language);
    let title = text(&book.title);

    let mut nav = format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops" lang="{lang}" xml:lang="{lang}">
<head>
<title>{title}</title>
</head>
<body>
<nav epub:type="toc" id="toc" role="doc-toc">
<h2>{title}</h2>
<ol>
"#
    );

    for section in &book.sections {
        nav.push_str(&format!("<li><span>{}</span>", text(&section.title)));
        if !section.links.is_empty() {
            nav.push_str("\n<ol>\n");
            for link in &section.links {
                nav.push_str(&format!(
                    "<li><a href=\"{}\">{}</a></li>\n",
                    attr(&link.href),
                    text(&link.title)
                ));
            }
            nav.push_str("</ol>\n");
        }
        nav.push_str("</li>\n");
    }

    nav.push_str("</ol>\n</nav>\n</body>\n</html>\n");
    nav
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Chapter, Resource};
    use std::io::Cursor;

    fn sample_book() -> Book {
        let mut book = Book::new("deadbeef", "Digest <1>", "en");
        book.push_resource(Resource::new(
            "style_nav",
            "style/nav.css",
            "text/css",
            b"body{}".to_vec(),
        ));
        book.merge(
            &[Chapter {
                title: "Cats & Dogs".into(),
                file_name: "pets_00aa11bb.xhtml".into(),
                html_content: "<html/>".into(),
                images: Vec::new(),
            }],
            "Pets",
        )
    }

    #[test]
    fn test_package_document_lists_manifest_and_spine() {
        let opf = package_document(&sample_book(), Utc::now());

        assert!(opf.contains(r#"<dc:identifier id="id">deadbeef</dc:identifier>"#));
        assert!(opf.contains("<dc:title>Digest &lt;1&gt;</dc:title>"));
        assert!(opf.contains(r#"properties="nav""#));
        assert!(opf.contains(r#"<item id="chapter_pets_00aa11bb" href="pets_00aa11bb.xhtml" media-type="application/xhtml+xml"/>"#));
        let nav = opf.find(r#"<itemref idref="nav"/>"#).unwrap();
        let chapter = opf.find(r#"<itemref idref="chapter_pets_00aa11bb"/>"#).unwrap();
        assert!(nav < chapter);
    }

    #[test]
    fn test_navigation_documents_escape_titles() {
        let book = sample_book();
        let ncx = ncx_document(&book);
        let nav = nav_document(&book);

        assert!(ncx.contains("<text>Cats &amp; Dogs</text>"));
        assert!(ncx.contains(r#"<content src="pets_00aa11bb.xhtml"/>"#));
        assert!(nav.contains(r#"<a href="pets_00aa11bb.xhtml">Cats &amp; Dogs</a>"#));
        assert!(nav.contains("<span>Pets</span>"));
    }

    #[test]
    fn test_mimetype_is_first_and_stored() {
        let bytes = write_book(&sample_book(), Utc::now(), Cursor::new(Vec::new()))
            .unwrap()
            .into_inner();

        // Local file header of the first entry: name starts at offset 30.
        assert_eq!(&bytes[..4], b"PK\x03\x04");
        assert_eq!(&bytes[30..38], b"mimetype");
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let first = archive.by_index(0).unwrap();
        assert_eq!(first.name(), "mimetype");
        assert_eq!(first.compression(), CompressionMethod::Stored);
    }
}
