//! Minimal RSS 2.0 / Atom parsing shared by the XML-backed feeds.
//!
//! Extracts only the fields the normalizer consumes; everything else in a
//! feed document is ignored.

use quick_xml::Reader;
use quick_xml::events::Event;

/// One `<item>` (RSS) or `<entry>` (Atom) with the fields we care about.
#[derive(Debug, Clone, Default)]
pub(crate) struct XmlEntry {
    pub title: Option<String>,
    pub link: Option<String>,
    pub guid: Option<String>,
    pub description: Option<String>,
    /// RFC 2822 (`pubDate`) or RFC 3339 (`published`/`updated`), verbatim.
    pub published: Option<String>,
}

/// Parse an RSS or Atom document into its entries. Returns an error string
/// for documents that are not well-formed XML; unknown elements are skipped.
pub(crate) fn parse_feed(document: &str) -> Result<Vec<XmlEntry>, String> {
    let mut reader = Reader::from_str(document);
    reader.config_mut().trim_text(true);

    let mut entries: Vec<XmlEntry> = Vec::new();
    let mut current: Option<XmlEntry> = None;
    let mut field: Option<&'static str> = None;

    loop {
        match reader.read_event().map_err(|e| e.to_string())? {
            Event::Start(start) => {
                let name = local_name(start.name().as_ref());
                match name.as_str() {
                    "item" | "entry" => current = Some(XmlEntry::default()),
                    "title" => field = Some("title"),
                    "link" => {
                        field = Some("link");
                        // Atom links carry the URL in an href attribute.
                        if let Some(entry) = current.as_mut() {
                            if let Some(href) = attr_value(&start, b"href") {
                                entry.link.get_or_insert(href);
                            }
                        }
                    }
                    "guid" | "id" => field = Some("guid"),
                    "description" | "summary" | "content" => field = Some("description"),
                    "pubDate" | "published" | "updated" => field = Some("published"),
                    _ => field = None,
                }
            }
            Event::Empty(start) => {
                if local_name(start.name().as_ref()) == "link" {
                    if let Some(entry) = current.as_mut() {
                        if let Some(href) = attr_value(&start, b"href") {
                            entry.link.get_or_insert(href);
                        }
                    }
                }
            }
            Event::Text(text) => {
                if let (Some(entry), Some(field)) = (current.as_mut(), field) {
                    let value = text.unescape().map_err(|e| e.to_string())?.into_owned();
                    set_field(entry, field, value);
                }
            }
            Event::CData(cdata) => {
                if let (Some(entry), Some(field)) = (current.as_mut(), field) {
                    let value = String::from_utf8_lossy(&cdata.into_inner()).into_owned();
                    set_field(entry, field, value);
                }
            }
            Event::End(end) => {
                let name = local_name(end.name().as_ref());
                if name == "item" || name == "entry" {
                    if let Some(entry) = current.take() {
                        entries.push(entry);
                    }
                }
                field = None;
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(entries)
}

/// Strip a namespace prefix (`atom:link` → `link`).
fn local_name(name: &[u8]) -> String {
    let name = String::from_utf8_lossy(name);
    match name.rsplit_once(':') {
        Some((_, local)) => local.to_string(),
        None => name.into_owned(),
    }
}

fn attr_value(start: &quick_xml::events::BytesStart<'_>, key: &[u8]) -> Option<String> {
    start
        .attributes()
        .flatten()
        .find(|attr| attr.key.as_ref() == key)
        .and_then(|attr| attr.unescape_value().ok().map(|v| v.into_owned()))
}

fn set_field(entry: &mut XmlEntry, field: &str, value: String) {
    if value.is_empty() {
        return;
    }
    let slot = match field {
        "title" => &mut entry.title,
        "link" => &mut entry.link,
        "guid" => &mut entry.guid,
        "description" => &mut entry.description,
        "published" => &mut entry.published,
        _ => return,
    };
    slot.get_or_insert(value);
}
