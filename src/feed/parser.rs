//! Streaming feed entry parser.
//!
//! Normalizes the RSS 2.0 / Atom / RDF family of feed dialects into [`Post`]
//! records with a single forward pass over XML events. Dialect differences
//! are absorbed in two places: a substring-based tag simplifier that maps
//! vendor variants (`guid`, `dc:creator`, `content:encoded`, `updated`, ...)
//! onto canonical fields, and per-field readers that know the handful of
//! structural quirks (Atom `<link href=...>`, nested `<name>` in author
//! blocks).
//!
//! Namespace processing is off by design: tags are matched by their literal
//! qualified name, which is also what lets the `media:content` guard work.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

use crate::feed::dates::parse_date;
use crate::storage::Post;
use crate::util::{hash_to_i64, strip_html, truncate_chars};

/// Stored descriptions are summaries, not bodies.
const MAX_DESCRIPTION_CHARS: usize = 300;

/// Errors from parsing one feed document.
///
/// Malformed XML fails the whole document — no partial list of posts is
/// salvaged, so a caller never persists half a feed.
#[derive(Debug, Error)]
pub enum ParseError {
    /// XML parsing failed.
    #[error("XML parse error: {0}")]
    Xml(String),

    /// The document ended inside an entry.
    #[error("unexpected end of document")]
    UnexpectedEof,
}

/// Canonical entry field a tag name resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryField {
    Id,
    Title,
    Author,
    Link,
    PubDate,
    Description,
    Content,
    Other,
}

/// Optional fields accumulated while walking one `item`/`entry` subtree.
/// Defaults are applied in a single pass by [`assemble_post`] once the
/// entry's end tag is reached.
#[derive(Default)]
struct EntryFields {
    post_id: Option<i64>,
    title: Option<String>,
    author: Option<String>,
    link: Option<String>,
    timestamp: Option<i64>,
    description: Option<String>,
    content: Option<String>,
}

/// Parses one feed document into posts, in document order.
///
/// Wrapper tags (`rss`, `channel`, `feed`, `rdf:RDF`) are descended into;
/// each `item` or `entry` produces exactly one post; everything else is
/// skipped as one balanced subtree so the cursor never loses sync.
pub fn parse_feed(feed_id: i64, document: &str) -> Result<Vec<Post>, ParseError> {
    let mut reader = Reader::from_str(document);
    reader.config_mut().trim_text(true);

    let mut posts = Vec::new();
    let mut buf = Vec::new();

    loop {
        match read_event(&mut reader, &mut buf)? {
            Event::Start(e) => {
                let name = qname(&e);
                if is_wrapper(&name) {
                    // Transparent: keep walking into its children.
                } else if name == "item" || name == "entry" {
                    posts.push(read_entry(&mut reader, feed_id)?);
                } else {
                    consume_element(&mut reader)?;
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(posts)
}

/// Ordered substring rules mapping dialect tag variants onto canonical
/// fields. Rule order matters: the `content` rule must reject `media:`
/// extension tags before the literal fallthrough ever sees them.
fn classify_tag(name: &str) -> EntryField {
    if name.contains("id") {
        return EntryField::Id;
    }
    if name.contains("creator") {
        return EntryField::Author;
    }
    if name.contains("date") {
        return EntryField::PubDate;
    }
    if name.contains("content") && !name.contains("media") {
        return EntryField::Content;
    }
    match name {
        "title" => EntryField::Title,
        "author" => EntryField::Author,
        "link" => EntryField::Link,
        "description" => EntryField::Description,
        "pubDate" => EntryField::PubDate,
        _ => EntryField::Other,
    }
}

fn is_wrapper(name: &str) -> bool {
    matches!(name, "rss" | "channel" | "feed" | "rdf:RDF" | "RDF")
}

/// Reads the children of one `item`/`entry` element, accumulating optional
/// fields until the entry's own end tag.
///
/// Every child start tag is handed to a reader that consumes its entire
/// balanced subtree (nested depth is tracked inside those readers), so the
/// next end tag observed at this level always closes the entry itself.
fn read_entry(reader: &mut Reader<&[u8]>, feed_id: i64) -> Result<Post, ParseError> {
    let mut fields = EntryFields::default();
    let mut buf = Vec::new();

    loop {
        match read_event(reader, &mut buf)? {
            Event::Start(e) => match classify_tag(&qname(&e)) {
                EntryField::Id => {
                    let text = read_element_text(reader)?;
                    fields.post_id = Some(hash_to_i64(&text));
                }
                EntryField::Title => {
                    let text = read_element_text(reader)?;
                    fields.title = Some(strip_html(&text).into_owned());
                }
                EntryField::Author => {
                    fields.author = Some(read_author(reader)?);
                }
                EntryField::Link => {
                    fields.link = Some(read_link(reader, &e)?);
                }
                EntryField::PubDate => {
                    let text = read_element_text(reader)?;
                    fields.timestamp = parse_date(&text);
                }
                EntryField::Description => {
                    fields.description = Some(read_element_text(reader)?);
                }
                EntryField::Content => {
                    let text = read_element_text(reader)?;
                    // Feeds sometimes emit a second, blank content tag; it
                    // must not clobber a value already read.
                    if !text.trim().is_empty() || fields.content.is_none() {
                        fields.content = Some(text);
                    }
                }
                EntryField::Other => consume_element(reader)?,
            },
            Event::Empty(e) => {
                // Self-closing children carry no text. Only the Atom-style
                // <link href="..."/> is meaningful here.
                if classify_tag(&qname(&e)) == EntryField::Link {
                    if let Some(href) = attr_value(reader, &e, b"href")? {
                        fields.link = Some(href);
                    }
                }
            }
            Event::End(_) => break,
            Event::Eof => return Err(ParseError::UnexpectedEof),
            _ => {}
        }
        buf.clear();
    }

    Ok(assemble_post(feed_id, fields))
}

/// Applies the defaulting rules once all children are consumed and builds
/// the immutable post value.
fn assemble_post(feed_id: i64, fields: EntryFields) -> Post {
    // 0 is the stored sentinel for "no parseable date" (see feed::dates).
    let timestamp = fields.timestamp.unwrap_or(0);

    // No explicit id element: synthesize one deterministically so the same
    // logical entry dedups against itself on the next fetch.
    let post_id = fields.post_id.unwrap_or_else(|| {
        hash_to_i64(&format!(
            "{}{}",
            fields.title.as_deref().unwrap_or(""),
            timestamp
        ))
    });

    let mut content = fields.content;
    if content.is_none() {
        content = fields.description.clone();
    }

    // The summary prefers description text over content, stripped of markup
    // and bounded.
    let description = match fields.description.as_deref().or(content.as_deref()) {
        Some(text) => truncate_chars(&strip_html(text), MAX_DESCRIPTION_CHARS).into_owned(),
        None => String::new(),
    };

    Post {
        feed_id,
        post_id,
        title: fields.title.unwrap_or_else(|| "(no title)".to_string()),
        author: fields.author.unwrap_or_else(|| "(no author)".to_string()),
        link: fields.link.unwrap_or_default(),
        timestamp,
        description,
        content: content.unwrap_or_default(),
        read: false,
    }
}

/// Reads the text content of the current element, consuming everything up
/// to its matching end tag. Text inside nested elements is discarded but
/// the nesting is fully consumed, tracked by explicit depth.
fn read_element_text(reader: &mut Reader<&[u8]>) -> Result<String, ParseError> {
    let mut text = String::new();
    let mut depth = 0usize;
    let mut buf = Vec::new();

    loop {
        match read_event(reader, &mut buf)? {
            Event::Start(_) => depth += 1,
            Event::End(_) => {
                if depth == 0 {
                    return Ok(text);
                }
                depth -= 1;
            }
            Event::Text(t) => {
                if depth == 0 {
                    let unescaped = t.unescape().map_err(|e| ParseError::Xml(e.to_string()))?;
                    text.push_str(&unescaped);
                }
            }
            Event::CData(t) => {
                if depth == 0 {
                    text.push_str(&String::from_utf8_lossy(&t));
                }
            }
            Event::Eof => return Err(ParseError::UnexpectedEof),
            _ => {}
        }
        buf.clear();
    }
}

/// Reads an author element. Atom-style author blocks nest the display name
/// in a `<name>` child; when present it wins over any direct text.
fn read_author(reader: &mut Reader<&[u8]>) -> Result<String, ParseError> {
    let mut direct = String::new();
    let mut nested_name: Option<String> = None;
    let mut depth = 0usize;
    let mut name_depth: Option<usize> = None;
    let mut buf = Vec::new();

    loop {
        match read_event(reader, &mut buf)? {
            Event::Start(e) => {
                depth += 1;
                if nested_name.is_none()
                    && name_depth.is_none()
                    && e.local_name().as_ref() == b"name"
                {
                    name_depth = Some(depth);
                }
            }
            Event::End(_) => {
                if depth == 0 {
                    break;
                }
                if name_depth == Some(depth) {
                    name_depth = None;
                }
                depth -= 1;
            }
            Event::Text(t) => {
                let unescaped = t.unescape().map_err(|e| ParseError::Xml(e.to_string()))?;
                if name_depth == Some(depth) {
                    nested_name
                        .get_or_insert_with(String::new)
                        .push_str(&unescaped);
                } else if depth == 0 {
                    direct.push_str(&unescaped);
                }
            }
            Event::CData(t) => {
                let raw = String::from_utf8_lossy(&t).into_owned();
                if name_depth == Some(depth) {
                    nested_name.get_or_insert_with(String::new).push_str(&raw);
                } else if depth == 0 {
                    direct.push_str(&raw);
                }
            }
            Event::Eof => return Err(ParseError::UnexpectedEof),
            _ => {}
        }
        buf.clear();
    }

    Ok(nested_name.unwrap_or(direct))
}

/// Reads a link element: an `href` attribute wins (the rest of the element
/// is skipped); otherwise the element text is the link. With multiple link
/// variants in one entry, the last one read wins.
fn read_link(reader: &mut Reader<&[u8]>, start: &BytesStart<'_>) -> Result<String, ParseError> {
    if let Some(href) = attr_value(reader, start, b"href")? {
        consume_element(reader)?;
        return Ok(href);
    }
    read_element_text(reader)
}

/// Consumes exactly one balanced subtree: everything up to the end tag
/// matching the start tag already read. Keeps the cursor in sync across
/// unknown extension elements of any shape.
fn consume_element(reader: &mut Reader<&[u8]>) -> Result<(), ParseError> {
    let mut depth = 0usize;
    let mut buf = Vec::new();

    loop {
        match read_event(reader, &mut buf)? {
            Event::Start(_) => depth += 1,
            Event::End(_) => {
                if depth == 0 {
                    return Ok(());
                }
                depth -= 1;
            }
            Event::Eof => return Err(ParseError::UnexpectedEof),
            _ => {}
        }
        buf.clear();
    }
}

fn read_event<'b>(
    reader: &mut Reader<&[u8]>,
    buf: &'b mut Vec<u8>,
) -> Result<Event<'b>, ParseError> {
    reader
        .read_event_into(buf)
        .map_err(|e| ParseError::Xml(e.to_string()))
}

/// Qualified tag name as a string. Namespace prefixes are kept: the tag
/// simplifier matches on the literal name.
fn qname(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.name().as_ref()).into_owned()
}

fn attr_value(
    reader: &Reader<&[u8]>,
    e: &BytesStart<'_>,
    key: &[u8],
) -> Result<Option<String>, ParseError> {
    for attr_result in e.attributes() {
        let attr = match attr_result {
            Ok(attr) => attr,
            Err(err) => {
                tracing::warn!(error = %err, "Skipping malformed attribute");
                continue;
            }
        };
        if attr.key.as_ref() == key {
            let value = attr
                .decode_and_unescape_value(reader.decoder())
                .map_err(|e| ParseError::Xml(e.to_string()))?;
            return Ok(Some(value.to_string()));
        }
    }
    Ok(None)
}
