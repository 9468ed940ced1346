//! Loading an existing EPUB container back into a [`Book`].
//!
//! Only what the writer needs to reproduce the book is recovered: package
//! metadata, every manifest item with its bytes, the spine, and the section
//! structure of the NCX. Navigation documents are dropped and regenerated
//! on the next save.

use std::io::{Read, Seek};

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use zip::ZipArchive;

use crate::app::{KingsError, Result};
use crate::domain::book::NAV_ID;
use crate::domain::{Book, NavLink, Resource, Section};

const CONTAINER_PATH: &str = "META-INF/container.xml";
const NCX_MEDIA_TYPE: &str = "application/x-dtbncx+xml";

#[derive(Debug, Default)]
struct ManifestItem {
    id: String,
    href: String,
    media_type: String,
    properties: Option<String>,
}

#[derive(Debug, Default)]
struct Package {
    identifier: String,
    title: String,
    language: String,
    cover_id: Option<String>,
    manifest: Vec<ManifestItem>,
    spine: Vec<String>,
    /// `toc` attribute of `<spine>`.
    toc_id: Option<String>,
}

/// Read a complete book from an EPUB archive.
pub fn read_book<R: Read + Seek>(source: R) -> Result<Book> {
    let mut archive = ZipArchive::new(source)?;

    let container = read_entry(&mut archive, CONTAINER_PATH)?;
    let opf_path = rootfile_path(&container)?;
    let base_dir = match opf_path.rsplit_once('/') {
        Some((dir, _)) => format!("{dir}/"),
        None => String::new(),
    };

    let package = parse_package(&read_entry(&mut archive, &opf_path)?)?;

    let ncx_item = package
        .manifest
        .iter()
        .find(|item| Some(&item.id) == package.toc_id.as_ref())
        .or_else(|| {
            package
                .manifest
                .iter()
                .find(|item| item.media_type == NCX_MEDIA_TYPE)
        });
    let nav_item = package.manifest.iter().find(|item| is_nav(item));

    let sections = match ncx_item {
        Some(item) => parse_ncx(&read_entry(&mut archive, &format!("{base_dir}{}", item.href))?)?,
        None => {
            tracing::warn!("Book at {} has no NCX index; table of contents starts empty", opf_path);
            Vec::new()
        }
    };

    let ncx_id = ncx_item.map(|item| item.id.as_str());
    let nav_id = nav_item.map(|item| item.id.as_str());

    let mut book = Book::new(package.identifier, package.title, package.language);
    book.cover_id = package.cover_id;
    book.sections = sections;

    for item in &package.manifest {
        if Some(item.id.as_str()) == ncx_id || Some(item.id.as_str()) == nav_id {
            continue;
        }
        let content = read_entry(&mut archive, &format!("{base_dir}{}", item.href))?;
        let mut resource = Resource::new(&item.id, &item.href, &item.media_type, content);
        resource.properties = item.properties.clone();
        book.push_resource(resource);
    }

    // The regenerated navigation document always takes the `nav` id.
    book.spine = package
        .spine
        .into_iter()
        .filter(|idref| Some(idref.as_str()) != ncx_id)
        .map(|idref| {
            if Some(idref.as_str()) == nav_id {
                NAV_ID.to_string()
            } else {
                idref
            }
        })
        .collect();
    if book.spine.first().map(String::as_str) != Some(NAV_ID) {
        book.spine.retain(|idref| idref != NAV_ID);
        book.spine.insert(0, NAV_ID.to_string());
    }

    Ok(book)
}

fn read_entry<R: Read + Seek>(archive: &mut ZipArchive<R>, name: &str) -> Result<Vec<u8>> {
    let mut file = archive
        .by_name(name)
        .map_err(|_| KingsError::Epub(format!("missing archive entry {name}")))?;
    let mut bytes = Vec::with_capacity(file.size() as usize);
    file.read_to_end(&mut bytes)?;
    Ok(bytes)
}

fn is_nav(item: &ManifestItem) -> bool {
    item.properties
        .as_deref()
        .is_some_and(|p| p.split_whitespace().any(|p| p == "nav"))
}

fn xml_error(e: quick_xml::Error) -> KingsError {
    KingsError::Epub(format!("XML error: {e}"))
}

fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

/// Attribute value by local name, with entities resolved.
fn attr(reader: &Reader<&[u8]>, e: &BytesStart<'_>, name: &str) -> Option<String> {
    e.attributes().flatten().find_map(|a| {
        if a.key.local_name().as_ref() != name.as_bytes() {
            return None;
        }
        let raw = reader.decoder().decode(&a.value).ok()?;
        let value = quick_xml::escape::unescape(&raw)
            .map(|v| v.into_owned())
            .unwrap_or_else(|_| raw.into_owned());
        Some(value)
    })
}

/// Append character data carried by `event` to `buf`. Other events are
/// ignored.
fn push_text(reader: &Reader<&[u8]>, event: &Event<'_>, buf: &mut String) -> Result<()> {
    match event {
        Event::Text(e) => {
            buf.push_str(&reader.decoder().decode(e).map_err(|e| xml_error(e.into()))?);
        }
        Event::CData(e) => {
            buf.push_str(&reader.decoder().decode(e).map_err(|e| xml_error(e.into()))?);
        }
        Event::GeneralRef(e) => {
            if let Some(c) = e.resolve_char_ref().map_err(xml_error)? {
                buf.push(c);
            } else {
                let name = reader.decoder().decode(e).map_err(|e| xml_error(e.into()))?;
                match quick_xml::escape::resolve_predefined_entity(&name) {
                    Some(value) => buf.push_str(value),
                    None => {
                        buf.push('&');
                        buf.push_str(&name);
                        buf.push(';');
                    }
                }
            }
        }
        _ => {}
    }
    Ok(())
}

fn rootfile_path(container: &[u8]) -> Result<String> {
    let mut reader = Reader::from_reader(container);
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf).map_err(xml_error)? {
            Event::Start(e) | Event::Empty(e) if local_name(&e) == "rootfile" => {
                if let Some(path) = attr(&reader, &e, "full-path") {
                    return Ok(path);
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Err(KingsError::Epub("container.xml names no rootfile".into()))
}

fn parse_package(opf: &[u8]) -> Result<Package> {
    let mut reader = Reader::from_reader(opf);
    let mut buf = Vec::new();
    let mut package = Package::default();
    let mut unique_id: Option<String> = None;
    let mut identifiers: Vec<(Option<String>, String)> = Vec::new();

    // Dublin Core element currently being read, with its id and text.
    let mut open: Option<(String, Option<String>, String)> = None;

    loop {
        buf.clear();
        let event = reader.read_event_into(&mut buf).map_err(xml_error)?;
        match &event {
            Event::Start(e) | Event::Empty(e) => {
                let is_empty = matches!(event, Event::Empty(_));
                match local_name(e).as_str() {
                    "package" => unique_id = attr(&reader, e, "unique-identifier"),
                    name @ ("identifier" | "title" | "language") if !is_empty => {
                        open = Some((name.to_string(), attr(&reader, e, "id"), String::new()));
                    }
                    "meta" => {
                        if attr(&reader, e, "name").as_deref() == Some("cover") {
                            package.cover_id = attr(&reader, e, "content");
                        }
                    }
                    "item" => package.manifest.push(ManifestItem {
                        id: attr(&reader, e, "id").unwrap_or_default(),
                        href: attr(&reader, e, "href").unwrap_or_default(),
                        media_type: attr(&reader, e, "media-type").unwrap_or_default(),
                        properties: attr(&reader, e, "properties"),
                    }),
                    "spine" => package.toc_id = attr(&reader, e, "toc"),
                    "itemref" => {
                        if let Some(idref) = attr(&reader, e, "idref") {
                            package.spine.push(idref);
                        }
                    }
                    _ => {}
                }
            }
            Event::End(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if let Some((field, id, text)) = open.take() {
                    if field != name {
                        open = Some((field, id, text));
                    } else {
                        let text = text.trim().to_string();
                        match field.as_str() {
                            "identifier" => identifiers.push((id, text)),
                            "title" if package.title.is_empty() => package.title = text,
                            "language" if package.language.is_empty() => package.language = text,
                            _ => {}
                        }
                    }
                }
            }
            Event::Eof => break,
            other => {
                if let Some((_, _, text)) = open.as_mut() {
                    push_text(&reader, other, text)?;
                }
            }
        }
    }

    package.identifier = identifiers
        .iter()
        .find(|(id, _)| id.is_some() && *id == unique_id)
        .or_else(|| identifiers.first())
        .map(|(_, value)| value.clone())
        .ok_or_else(|| KingsError::Epub("package has no dc:identifier".into()))?;

    if package.manifest.iter().any(|item| item.id.is_empty() || item.href.is_empty()) {
        return Err(KingsError::Epub("manifest item without id or href".into()));
    }

    Ok(package)
}

#[derive(Debug, Default)]
struct NavPoint {
    label: String,
    src: String,
    children: Vec<NavPoint>,
}

/// Sections from an NCX navMap. Each top-level navPoint is a section; its
/// descendants, flattened in document order, are the section's links.
fn parse_ncx(ncx: &[u8]) -> Result<Vec<Section>> {
    let mut reader = Reader::from_reader(ncx);
    let mut buf = Vec::new();

    let mut stack: Vec<NavPoint> = Vec::new();
    let mut roots: Vec<NavPoint> = Vec::new();
    let mut in_map = false;
    let mut in_label_text = false;

    loop {
        buf.clear();
        let event = reader.read_event_into(&mut buf).map_err(xml_error)?;
        match &event {
            Event::Start(e) => match local_name(e).as_str() {
                "navMap" => in_map = true,
                "navPoint" if in_map => stack.push(NavPoint::default()),
                "text" if !stack.is_empty() => in_label_text = true,
                "content" => set_src(&reader, e, &mut stack),
                _ => {}
            },
            Event::Empty(e) if local_name(e) == "content" => set_src(&reader, e, &mut stack),
            Event::End(e) => match e.local_name().as_ref() {
                b"navMap" => in_map = false,
                b"text" => in_label_text = false,
                b"navPoint" => {
                    if let Some(mut point) = stack.pop() {
                        point.label = point.label.trim().to_string();
                        match stack.last_mut() {
                            Some(parent) => parent.children.push(point),
                            None => roots.push(point),
                        }
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            other if in_label_text => {
                if let Some(point) = stack.last_mut() {
                    push_text(&reader, other, &mut point.label)?;
                }
            }
            _ => {}
        }
    }

    Ok(roots
        .into_iter()
        .map(|root| {
            let mut links = Vec::new();
            flatten(root.children, &mut links);
            Section {
                title: root.label,
                links,
            }
        })
        .collect())
}

fn set_src(reader: &Reader<&[u8]>, e: &BytesStart<'_>, stack: &mut [NavPoint]) {
    if let (Some(point), Some(src)) = (stack.last_mut(), attr(reader, e, "src")) {
        point.src = src;
    }
}

fn flatten(points: Vec<NavPoint>, links: &mut Vec<NavLink>) {
    for point in points {
        links.push(NavLink {
            title: point.label,
            href: point.src,
        });
        flatten(point.children, links);
    }
}
