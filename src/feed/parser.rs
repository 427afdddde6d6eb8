use chrono::Local;
use encoding_rs::{Encoding, UTF_8, WINDOWS_1251};
use once_cell::sync::Lazy;
use quick_xml::events::Event;
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::reader::NsReader;
use regex::Regex;

use crate::models::FeedItem;

const ATOM_NS: &[u8] = b"http://www.w3.org/2005/Atom";

/// Encoding declaration in the XML prolog, scanned over raw bytes because
/// the document can't be decoded before the declaration is known.
static ENCODING_DECL: Lazy<regex::bytes::Regex> = Lazy::new(|| {
    regex::bytes::Regex::new(r#"encoding=["']([a-zA-Z0-9-]+)["']"#).unwrap()
});

/// An `&` with an optional entity tail. Matches without the tail are bare
/// ampersands to repair; regex has no lookahead, so the tail is captured
/// instead of asserted.
static AMP_OR_ENTITY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"&(#x[0-9a-fA-F]+;|#[0-9]+;|[a-zA-Z0-9]+;)?").unwrap()
});

/// Decode, repair and parse one fetched feed body into normalized items,
/// stamped with the current capture time.
///
/// Never fails past this boundary: undecodable bytes degrade through the
/// fallback chain and unparseable XML yields an empty list, so one broken
/// feed can't take down the batch.
pub fn parse_feed(raw: &[u8]) -> Vec<FeedItem> {
    let text = decode_bytes(raw);
    let clean = escape_bare_ampersands(&strip_invalid_chars(&text));
    let save_date = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();

    match extract_items(&clean, &save_date) {
        Ok(items) => items,
        Err(e) => {
            tracing::warn!("Error parsing XML: {}", e);
            Vec::new()
        }
    }
}

/// Three-tier decode: declared encoding, then windows-1251, then lossy
/// UTF-8. Real-world feeds mis-declare or omit their encoding often
/// enough that the last tier must always succeed.
fn decode_bytes(raw: &[u8]) -> String {
    // An unknown declared label skips straight to the fallback tiers.
    let declared = match declared_label(raw) {
        Some(label) => Encoding::for_label(label),
        None => Some(UTF_8),
    };

    if let Some(encoding) = declared {
        if let Some(text) = decode_strict(encoding, raw) {
            return text;
        }
    }
    if let Some(text) = decode_strict(WINDOWS_1251, raw) {
        return text;
    }
    let (text, _, _) = UTF_8.decode(raw);
    text.into_owned()
}

fn declared_label(raw: &[u8]) -> Option<&[u8]> {
    let head = &raw[..raw.len().min(1024)];
    ENCODING_DECL
        .captures(head)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_bytes())
}

fn decode_strict(encoding: &'static Encoding, raw: &[u8]) -> Option<String> {
    encoding
        .decode_without_bom_handling_and_without_replacement(raw)
        .map(|text| text.into_owned())
}

/// Drop code points outside the XML 1.0 character ranges. Malformed feeds
/// embed raw control characters that a strict parser rejects wholesale.
fn strip_invalid_chars(text: &str) -> String {
    text.chars().filter(|&c| is_xml_char(c)).collect()
}

fn is_xml_char(c: char) -> bool {
    matches!(c, '\t' | '\n' | '\r')
        || ('\u{20}'..='\u{D7FF}').contains(&c)
        || ('\u{E000}'..='\u{FFFD}').contains(&c)
        || c >= '\u{10000}'
}

/// Escape bare ampersands (unescaped `&` in URLs and text) into `&amp;`,
/// leaving named entities and numeric character references alone.
fn escape_bare_ampersands(text: &str) -> String {
    AMP_OR_ENTITY
        .replace_all(text, |caps: &regex::Captures| {
            if caps.get(1).is_some() {
                caps[0].to_string()
            } else {
                "&amp;".to_string()
            }
        })
        .into_owned()
}

type XmlResult<T> = std::result::Result<T, quick_xml::Error>;

/// RSS 2.0 `item` elements first; Atom `entry` elements only when RSS
/// yields nothing. Feeds are assumed not to mix both formats.
fn extract_items(xml: &str, save_date: &str) -> XmlResult<Vec<FeedItem>> {
    let items = rss_items(xml, save_date)?;
    if !items.is_empty() {
        return Ok(items);
    }
    atom_entries(xml, save_date)
}

#[derive(Default)]
struct PartialItem {
    title: Option<String>,
    link: Option<String>,
    description: Option<String>,
    published: Option<String>,
    updated: Option<String>,
}

impl PartialItem {
    fn into_rss_item(self, save_date: &str) -> FeedItem {
        FeedItem {
            title: self.title.unwrap_or_default(),
            link: self.link.unwrap_or_default(),
            description: self.description.unwrap_or_default(),
            pub_date: self.published.unwrap_or_default(),
            save_date: save_date.to_string(),
        }
    }

    fn into_atom_item(self, save_date: &str) -> FeedItem {
        // `published` falls back to `updated`, including when present but
        // empty.
        let published = self.published.unwrap_or_default();
        let pub_date = if published.is_empty() {
            self.updated.unwrap_or_default()
        } else {
            published
        };
        FeedItem {
            title: self.title.unwrap_or_default(),
            link: self.link.unwrap_or_default(),
            description: self.description.unwrap_or_default(),
            pub_date,
            save_date: save_date.to_string(),
        }
    }
}

/// Which child element of the current item is being captured.
#[derive(Clone, Copy, PartialEq)]
enum Field {
    Title,
    Link,
    Description,
    Published,
    Updated,
}

fn rss_items(xml: &str, save_date: &str) -> XmlResult<Vec<FeedItem>> {
    let mut reader = NsReader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut items = Vec::new();
    let mut current: Option<PartialItem> = None;
    let mut depth = 0usize;
    let mut capture: Option<Field> = None;
    let mut text = String::new();

    loop {
        match reader.read_resolved_event()? {
            (ns, Event::Start(e)) => {
                let local = e.local_name();
                match current.as_mut() {
                    None => {
                        // RSS 2.0 items are unprefixed, at any depth.
                        if is_unbound(&ns) && local.as_ref() == b"item" {
                            current = Some(PartialItem::default());
                            depth = 1;
                        }
                    }
                    Some(item) => {
                        depth += 1;
                        if depth == 2 && capture.is_none() && is_unbound(&ns) {
                            // First occurrence of each field wins.
                            capture = rss_field(local.as_ref())
                                .filter(|f| field_slot(item, *f).is_none());
                            text.clear();
                        }
                    }
                }
            }
            (ns, Event::Empty(e)) => {
                if let Some(item) = current.as_mut() {
                    if depth == 1 && is_unbound(&ns) {
                        // Empty direct child, e.g. <link/>: field present
                        // but blank.
                        if let Some(f) = rss_field(e.local_name().as_ref()) {
                            let slot = field_slot(item, f);
                            if slot.is_none() {
                                *slot = Some(String::new());
                            }
                        }
                    }
                }
            }
            (_, Event::Text(e)) => {
                if capture.is_some() {
                    text.push_str(&e.unescape()?);
                }
            }
            (_, Event::CData(e)) => {
                if capture.is_some() {
                    text.push_str(&String::from_utf8_lossy(&e.into_inner()));
                }
            }
            (_, Event::End(_)) => {
                if let Some(item) = current.as_mut() {
                    if depth == 2 {
                        if let Some(f) = capture.take() {
                            *field_slot(item, f) = Some(std::mem::take(&mut text));
                        }
                    }
                    depth -= 1;
                    if depth == 0 {
                        if let Some(done) = current.take() {
                            items.push(done.into_rss_item(save_date));
                        }
                        capture = None;
                    }
                }
            }
            (_, Event::Eof) => break,
            _ => {}
        }
    }

    Ok(items)
}

fn atom_entries(xml: &str, save_date: &str) -> XmlResult<Vec<FeedItem>> {
    let mut reader = NsReader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut items = Vec::new();
    let mut current: Option<PartialItem> = None;
    let mut depth = 0usize;
    let mut capture: Option<Field> = None;
    let mut text = String::new();

    loop {
        match reader.read_resolved_event()? {
            (ns, Event::Start(e)) => {
                let local = e.local_name();
                match current.as_mut() {
                    None => {
                        if is_atom(&ns) && local.as_ref() == b"entry" {
                            current = Some(PartialItem::default());
                            depth = 1;
                        }
                    }
                    Some(item) => {
                        depth += 1;
                        if depth == 2 && is_atom(&ns) {
                            if local.as_ref() == b"link" {
                                // The link is the first <link>'s href
                                // attribute, not element text.
                                if item.link.is_none() {
                                    item.link = Some(link_href(&e)?);
                                }
                            } else if capture.is_none() {
                                capture = atom_field(local.as_ref())
                                    .filter(|f| field_slot(item, *f).is_none());
                                text.clear();
                            }
                        }
                    }
                }
            }
            (ns, Event::Empty(e)) => {
                if let Some(item) = current.as_mut() {
                    if depth == 1 && is_atom(&ns) && e.local_name().as_ref() == b"link" {
                        if item.link.is_none() {
                            item.link = Some(link_href(&e)?);
                        }
                    }
                }
            }
            (_, Event::Text(e)) => {
                if capture.is_some() {
                    text.push_str(&e.unescape()?);
                }
            }
            (_, Event::CData(e)) => {
                if capture.is_some() {
                    text.push_str(&String::from_utf8_lossy(&e.into_inner()));
                }
            }
            (_, Event::End(_)) => {
                if let Some(item) = current.as_mut() {
                    if depth == 2 {
                        if let Some(f) = capture.take() {
                            *field_slot(item, f) = Some(std::mem::take(&mut text));
                        }
                    }
                    depth -= 1;
                    if depth == 0 {
                        if let Some(done) = current.take() {
                            items.push(done.into_atom_item(save_date));
                        }
                        capture = None;
                    }
                }
            }
            (_, Event::Eof) => break,
            _ => {}
        }
    }

    Ok(items)
}

fn is_unbound(ns: &ResolveResult) -> bool {
    matches!(ns, ResolveResult::Unbound)
}

fn is_atom(ns: &ResolveResult) -> bool {
    matches!(ns, ResolveResult::Bound(Namespace(n)) if *n == ATOM_NS)
}

fn rss_field(local: &[u8]) -> Option<Field> {
    match local {
        b"title" => Some(Field::Title),
        b"link" => Some(Field::Link),
        b"description" => Some(Field::Description),
        b"pubDate" => Some(Field::Published),
        _ => None,
    }
}

fn atom_field(local: &[u8]) -> Option<Field> {
    match local {
        b"title" => Some(Field::Title),
        b"summary" => Some(Field::Description),
        b"published" => Some(Field::Published),
        b"updated" => Some(Field::Updated),
        _ => None,
    }
}

fn field_slot(item: &mut PartialItem, field: Field) -> &mut Option<String> {
    match field {
        Field::Title => &mut item.title,
        Field::Link => &mut item.link,
        Field::Description => &mut item.description,
        Field::Published => &mut item.published,
        Field::Updated => &mut item.updated,
    }
}

fn link_href(e: &quick_xml::events::BytesStart) -> XmlResult<String> {
    match e.try_get_attribute("href")? {
        Some(attr) => Ok(attr.unescape_value()?.into_owned()),
        None => Ok(String::new()),
    }
}
