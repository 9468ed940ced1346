//! XHTML serialization of html5ever trees.
//!
//! Chapter documents inside an EPUB must be well-formed XML, which plain
//! HTML serialization does not guarantee: void elements have to be
//! self-closed, every attribute value quoted and escaped, and every name
//! either unprefixed or bound in the chapter document.

use std::collections::HashMap;

use html_escape::{encode_double_quoted_attribute, encode_text};
use scraper::{ElementRef, Html, Node};

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

/// Dropped together with their content.
const SKIPPED_ELEMENTS: &[&str] = &["script"];

/// Default namespace of the chapter document.
const XHTML_NS: &str = "http://www.w3.org/1999/xhtml";

/// Prefixes bound in every chapter document.
const BOUND_PREFIXES: &[&str] = &["xml:", "epub:"];

/// Where each image source ends up in the output. Sources mapped to `None`,
/// or missing from the map, lose their `<img>` element.
pub type ImageMap = HashMap<String, Option<String>>;

/// Serialize the children of a parsed fragment's root as XHTML, rewriting
/// `<img src>` through `images`.
pub fn fragment_to_xhtml(fragment: &Html, images: &ImageMap) -> String {
    let mut out = String::new();
    write_children(fragment.root_element(), Some(images), XHTML_NS, &mut out);
    out
}

/// Parse an HTML snippet and return it as XHTML, leaving images untouched.
pub fn to_xhtml(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let mut out = String::new();
    write_children(fragment.root_element(), None, XHTML_NS, &mut out);
    out
}

/// The markup inside a `<noscript>` element. The parser keeps it as raw
/// text, so it is parsed again here. `None` when the element already holds
/// parsed children.
pub fn noscript_markup(element: ElementRef<'_>) -> Option<Html> {
    if element.children().any(|child| child.value().is_element()) {
        return None;
    }
    let text: String = element.text().collect();
    Some(Html::parse_fragment(&text))
}

/// `images` is `None` when `<img>` elements are copied unchanged. `ns` is the
/// default namespace in scope for `element`'s children.
fn write_children(element: ElementRef<'_>, images: Option<&ImageMap>, ns: &str, out: &mut String) {
    for child in element.children() {
        if let Some(child_element) = ElementRef::wrap(child) {
            write_element(child_element, images, ns, out);
        } else if let Node::Text(text) = child.value() {
            let text: &str = text;
            out.push_str(&encode_text(&strip_control(text)));
        }
    }
}

fn write_element(element: ElementRef<'_>, images: Option<&ImageMap>, ns: &str, out: &mut String) {
    let value = element.value();
    let name = value.name();

    if SKIPPED_ELEMENTS.contains(&name) {
        return;
    }

    if name == "noscript" {
        match noscript_markup(element) {
            Some(inner) => write_children(inner.root_element(), images, ns, out),
            None => write_children(element, images, ns, out),
        }
        return;
    }

    let mut replaced_src = None;
    if name == "img" {
        if let Some(images) = images {
            match value.attr("src").and_then(|src| images.get(src)).cloned().flatten() {
                Some(local) => replaced_src = Some(local),
                None => return,
            }
        }
    }

    if !is_xml_name(name) || !has_bound_prefix(name) {
        // Keep the text of elements that cannot be expressed in XML.
        write_children(element, images, ns, out);
        return;
    }

    out.push('<');
    out.push_str(name);

    let element_ns: &str = &value.name.ns;
    let child_ns = if element_ns.is_empty() { ns } else { element_ns };
    if child_ns != ns {
        out.push_str(" xmlns=\"");
        out.push_str(&encode_double_quoted_attribute(child_ns));
        out.push('"');
    }

    let mut written: Vec<&str> = Vec::new();
    for (attr, attr_value) in value.attrs() {
        if !is_xml_name(attr) || !has_bound_prefix(attr) || attr == "xmlns" {
            continue;
        }
        // Foreign attributes such as `xlink:href` lose their prefix in the
        // tree and may collide with a plain one.
        if written.contains(&attr) {
            continue;
        }
        let attr_value = match (&replaced_src, attr) {
            (Some(local), "src") => local.as_str(),
            // Responsive variants would point at the original host.
            (Some(_), "srcset") => continue,
            _ => attr_value,
        };
        written.push(attr);
        out.push(' ');
        out.push_str(attr);
        out.push_str("=\"");
        out.push_str(&encode_double_quoted_attribute(&strip_control(attr_value)));
        out.push('"');
    }

    if VOID_ELEMENTS.contains(&name) && child_ns == XHTML_NS {
        out.push_str("/>");
        return;
    }

    out.push('>');
    write_children(element, images, child_ns, out);
    out.push_str("</");
    out.push_str(name);
    out.push('>');
}

/// Conservative XML name check: ASCII letters, digits, `-`, `_`, `.` and
/// `:`, not starting with a digit, `-` or `.`.
fn is_xml_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'))
}

/// Unprefixed names, or a prefix the chapter document declares. Anything
/// else (`o:p` from word processors, `fb:like`) would be an unbound prefix.
fn has_bound_prefix(name: &str) -> bool {
    if !name.contains(':') {
        return true;
    }
    BOUND_PREFIXES.iter().any(|prefix| {
        name.strip_prefix(prefix)
            .is_some_and(|rest| !rest.is_empty() && !rest.contains(':'))
    })
}

/// Remove characters XML 1.0 forbids.
fn strip_control(s: &str) -> String {
    s.chars()
        .filter(|&c| !c.is_control() || matches!(c, '\t' | '\n' | '\r'))
        .collect()
}
