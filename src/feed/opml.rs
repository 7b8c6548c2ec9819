//! OPML 2.0 import and export of feed subscriptions.
//!
//! Import walks `<outline>` elements anywhere in the document: an outline
//! with an `xmlUrl` attribute is a feed, an outline without one is a
//! category whose name applies to every feed outline nested inside it.
//! Export reverses that shape, grouping feeds under one category outline
//! per distinct (case-insensitive) category name.

use std::collections::BTreeMap;
use std::io::Cursor;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use thiserror::Error;

use crate::storage::{Feed, DEFAULT_CATEGORY};

/// Maximum allowed nesting depth for OPML outline elements.
const MAX_OPML_DEPTH: usize = 50;

/// Errors that can occur during OPML import or export.
#[derive(Debug, Error)]
pub enum OpmlError {
    /// OPML nesting depth exceeds the safety limit.
    #[error("OPML nesting depth exceeds maximum of {0} levels")]
    MaxDepthExceeded(usize),

    /// XML parsing failed.
    #[error("XML parse error: {0}")]
    XmlParse(String),

    /// XML generation failed.
    #[error("Failed to generate OPML: {0}")]
    Generate(String),

    /// File I/O error.
    #[error("Failed to read OPML file: {0}")]
    Io(#[from] std::io::Error),
}

/// What an open `<outline>` element is, for matching end tags back to the
/// start tag they close.
enum OutlineKind {
    /// A grouping outline; its name is the category for nested feeds.
    Category(String),
    /// A feed outline (has `xmlUrl`); contributes no category context.
    Feed,
}

/// Reads an OPML file from disk and extracts feed subscriptions.
pub async fn import_from_file(path: &str) -> Result<Vec<Feed>, OpmlError> {
    let content = tokio::fs::read_to_string(path).await?;
    parse_opml(&content)
}

/// Parses OPML content and extracts feed subscriptions, in document order.
///
/// Each outline with a non-blank `xmlUrl` becomes a [`Feed`] whose category
/// is the name of the innermost enclosing category outline, or
/// [`DEFAULT_CATEGORY`] at body level. Display names fall back `title` →
/// `text` → the feed URL itself. Self-closing category outlines cannot
/// contain feeds and are ignored.
pub fn parse_opml(content: &str) -> Result<Vec<Feed>, OpmlError> {
    // quick-xml (0.37) never expands <!ENTITY> declarations, so a DOCTYPE
    // carrying external entities cannot leak anything into attribute values.
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut feeds = Vec::new();
    let mut buf = Vec::new();
    // Open outline elements, innermost last. The innermost Category entry
    // is the category context for feed outlines read here.
    let mut open: Vec<OutlineKind> = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"outline" => {
                if open.len() >= MAX_OPML_DEPTH {
                    return Err(OpmlError::MaxDepthExceeded(MAX_OPML_DEPTH));
                }
                let outline = read_outline(&e, &reader)?;
                match outline.xml_url {
                    Some(url) => {
                        feeds.push(make_feed(url, outline.title, outline.html_url, &open));
                        open.push(OutlineKind::Feed);
                    }
                    None => {
                        open.push(OutlineKind::Category(outline.title.unwrap_or_default()));
                    }
                }
            }
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"outline" => {
                let outline = read_outline(&e, &reader)?;
                if let Some(url) = outline.xml_url {
                    feeds.push(make_feed(url, outline.title, outline.html_url, &open));
                }
            }
            Ok(Event::End(e)) if e.local_name().as_ref() == b"outline" => {
                open.pop();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(OpmlError::XmlParse(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok(feeds)
}

/// Attributes of one outline element.
struct Outline {
    title: Option<String>,
    xml_url: Option<String>,
    html_url: Option<String>,
}

/// Extracts the attributes an outline can carry. Blank `xmlUrl` values are
/// treated as absent, which turns the outline into a category.
fn read_outline(e: &BytesStart<'_>, reader: &Reader<&[u8]>) -> Result<Outline, OpmlError> {
    let mut title = None;
    let mut text = None;
    let mut xml_url = None;
    let mut html_url = None;

    for attr_result in e.attributes() {
        let attr = match attr_result {
            Ok(attr) => attr,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed OPML attribute");
                continue;
            }
        };
        let decoder = reader.decoder();
        let value = |a: &quick_xml::events::attributes::Attribute<'_>| {
            a.decode_and_unescape_value(decoder)
                .map(|v| v.to_string())
                .map_err(|e| OpmlError::XmlParse(e.to_string()))
        };
        match attr.key.as_ref() {
            b"title" => title = Some(value(&attr)?),
            b"text" => text = Some(value(&attr)?),
            b"xmlUrl" => xml_url = Some(value(&attr)?),
            b"htmlUrl" => html_url = Some(value(&attr)?),
            _ => {}
        }
    }

    Ok(Outline {
        title: title.or(text),
        xml_url: xml_url.filter(|url| !url.trim().is_empty()),
        html_url,
    })
}

fn make_feed(
    url: String,
    title: Option<String>,
    html_url: Option<String>,
    open: &[OutlineKind],
) -> Feed {
    let category = open
        .iter()
        .rev()
        .find_map(|kind| match kind {
            OutlineKind::Category(name) => Some(name.clone()),
            OutlineKind::Feed => None,
        })
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_CATEGORY.to_string());

    let name = title.unwrap_or_else(|| url.clone());
    Feed::new(url, name, html_url.unwrap_or_default(), category)
}

/// Exports feed subscriptions as an OPML 2.0 XML string.
///
/// Every distinct category (compared case-insensitively, first-seen
/// spelling kept) becomes one wrapping outline; feeds with a blank stored
/// category land in the [`DEFAULT_CATEGORY`] group. Categories and the
/// feeds inside them are ordered case-insensitively by name, so the output
/// is stable regardless of the order feeds come out of the store.
pub fn export_opml(feeds: &[Feed]) -> Result<String, OpmlError> {
    fn w<E: std::fmt::Display>(what: &str, r: Result<(), E>) -> Result<(), OpmlError> {
        r.map_err(|err| OpmlError::Generate(format!("{}: {}", what, err)))
    }

    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);

    w(
        "xml declaration",
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None))),
    )?;

    let mut opml = BytesStart::new("opml");
    opml.push_attribute(("version", "2.0"));
    w("opml element", writer.write_event(Event::Start(opml)))?;

    w(
        "head element",
        writer.write_event(Event::Start(BytesStart::new("head"))),
    )?;
    w(
        "title element",
        writer.write_event(Event::Start(BytesStart::new("title"))),
    )?;
    w(
        "title text",
        writer.write_event(Event::Text(BytesText::new("sift subscriptions"))),
    )?;
    w(
        "title end",
        writer.write_event(Event::End(BytesEnd::new("title"))),
    )?;
    w(
        "head end",
        writer.write_event(Event::End(BytesEnd::new("head"))),
    )?;

    w(
        "body element",
        writer.write_event(Event::Start(BytesStart::new("body"))),
    )?;

    for (display_name, members) in group_by_category(feeds) {
        let mut outline = BytesStart::new("outline");
        outline.push_attribute(("text", display_name.as_str()));
        outline.push_attribute(("title", display_name.as_str()));
        w(
            "category outline",
            writer.write_event(Event::Start(outline)),
        )?;
        for feed in members {
            w(
                "outline element",
                writer.write_event(Event::Empty(feed_outline(feed))),
            )?;
        }
        w(
            "category outline end",
            writer.write_event(Event::End(BytesEnd::new("outline"))),
        )?;
    }

    w(
        "body end",
        writer.write_event(Event::End(BytesEnd::new("body"))),
    )?;
    w(
        "opml end",
        writer.write_event(Event::End(BytesEnd::new("opml"))),
    )?;

    let result = writer.into_inner().into_inner();
    String::from_utf8(result).map_err(|e| OpmlError::Generate(e.to_string()))
}

fn feed_outline(feed: &Feed) -> BytesStart<'static> {
    let mut outline = BytesStart::new("outline");
    outline.push_attribute(("type", "rss"));
    outline.push_attribute(("text", feed.name.as_str()));
    outline.push_attribute(("title", feed.name.as_str()));
    outline.push_attribute(("xmlUrl", feed.url.as_str()));
    if !feed.html_url.is_empty() {
        outline.push_attribute(("htmlUrl", feed.html_url.as_str()));
    }
    outline
}

/// Groups feeds by category. Names merge case-insensitively; the first
/// spelling seen is the display name. A blank stored category (possible for
/// rows written outside the importer) falls back to [`DEFAULT_CATEGORY`].
fn group_by_category(feeds: &[Feed]) -> Vec<(String, Vec<&Feed>)> {
    let mut groups: BTreeMap<String, (String, Vec<&Feed>)> = BTreeMap::new();

    for feed in feeds {
        let display = if feed.category.trim().is_empty() {
            DEFAULT_CATEGORY
        } else {
            feed.category.as_str()
        };
        groups
            .entry(display.to_lowercase())
            .or_insert_with(|| (display.to_string(), Vec::new()))
            .1
            .push(feed);
    }

    let mut categories: Vec<_> = groups.into_values().collect();
    for (_, members) in &mut categories {
        members.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
    }
    categories
}

/// Exports feed subscriptions to an OPML file atomically: write to a temp
/// file in the same directory, sync, then rename into place.
pub fn export_to_file(feeds: &[Feed], path: &std::path::Path) -> Result<(), OpmlError> {
    use std::time::{SystemTime, UNIX_EPOCH};

    let content = export_opml(feeds)?;

    let random_suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let temp_path = path.with_extension(format!("tmp.{:016x}", random_suffix));

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&temp_path)?;

    if let Err(e) = std::io::Write::write_all(&mut file, content.as_bytes()) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(e.into());
    }
    if let Err(e) = file.sync_all() {
        let _ = std::fs::remove_file(&temp_path);
        return Err(e.into());
    }
    drop(file);

    if let Err(e) = std::fs::rename(&temp_path, path) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(e.into());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_categorized_outlines() {
        let content = r#"<?xml version="1.0" encoding="UTF-8"?>
<opml version="2.0">
  <head><title>Subscriptions</title></head>
  <body>
    <outline text="Tech" title="Tech">
      <outline type="rss" text="A" title="A" xmlUrl="https://a.example/feed" htmlUrl="https://a.example"/>
      <outline type="rss" text="B" title="B" xmlUrl="https://b.example/feed"/>
    </outline>
    <outline type="rss" text="Loose" xmlUrl="https://loose.example/feed"/>
  </body>
</opml>"#;

        let feeds = parse_opml(content).unwrap();
        assert_eq!(feeds.len(), 3);

        assert_eq!(feeds[0].name, "A");
        assert_eq!(feeds[0].url, "https://a.example/feed");
        assert_eq!(feeds[0].html_url, "https://a.example");
        assert_eq!(feeds[0].category, "Tech");

        assert_eq!(feeds[1].name, "B");
        assert_eq!(feeds[1].category, "Tech");

        assert_eq!(feeds[2].name, "Loose");
        assert_eq!(feeds[2].category, "Uncategorized");
    }

    #[test]
    fn test_body_level_feed_defaults_to_uncategorized() {
        let content = r#"<opml version="2.0"><body>
    <outline type="rss" text="Solo" xmlUrl="https://solo.example/feed"/>
</body></opml>"#;

        let feeds = parse_opml(content).unwrap();
        assert_eq!(feeds.len(), 1);
        assert_eq!(feeds[0].category, "Uncategorized");
    }

    #[test]
    fn test_category_scope_ends_with_outline() {
        let content = r#"<opml version="2.0"><body>
    <outline text="News">
      <outline xmlUrl="https://inside.example/feed"/>
    </outline>
    <outline xmlUrl="https://after.example/feed"/>
</body></opml>"#;

        let feeds = parse_opml(content).unwrap();
        assert_eq!(feeds[0].category, "News");
        assert_eq!(feeds[1].category, "Uncategorized");
    }

    #[test]
    fn test_nested_categories_innermost_wins() {
        let content = r#"<opml version="2.0"><body>
    <outline text="Outer">
      <outline text="Inner">
        <outline xmlUrl="https://deep.example/feed"/>
      </outline>
      <outline xmlUrl="https://shallow.example/feed"/>
    </outline>
</body></opml>"#;

        let feeds = parse_opml(content).unwrap();
        assert_eq!(feeds[0].category, "Inner");
        assert_eq!(feeds[1].category, "Outer");
    }

    #[test]
    fn test_title_falls_back_to_text_then_url() {
        let content = r#"<opml version="2.0"><body>
    <outline type="rss" text="Text Only" xmlUrl="https://textonly.example/feed"/>
    <outline type="rss" xmlUrl="https://bare.example/feed"/>
</body></opml>"#;

        let feeds = parse_opml(content).unwrap();
        assert_eq!(feeds[0].name, "Text Only");
        assert_eq!(feeds[1].name, "https://bare.example/feed");
    }

    #[test]
    fn test_blank_xml_url_is_a_category() {
        let content = r#"<opml version="2.0"><body>
    <outline text="Group" xmlUrl="">
      <outline xmlUrl="https://real.example/feed"/>
    </outline>
</body></opml>"#;

        let feeds = parse_opml(content).unwrap();
        assert_eq!(feeds.len(), 1);
        assert_eq!(feeds[0].category, "Group");
    }

    #[test]
    fn test_self_closing_category_is_noop() {
        let content = r#"<opml version="2.0"><body>
    <outline text="Empty Group"/>
    <outline xmlUrl="https://after.example/feed"/>
</body></opml>"#;

        let feeds = parse_opml(content).unwrap();
        assert_eq!(feeds.len(), 1);
        assert_eq!(feeds[0].category, "Uncategorized");
    }

    #[test]
    fn test_empty_opml() {
        let feeds = parse_opml(r#"<opml version="2.0"><body></body></opml>"#).unwrap();
        assert!(feeds.is_empty());
    }

    #[test]
    fn test_malformed_xml_error() {
        assert!(parse_opml("<not valid xml").is_err());
    }

    #[test]
    fn test_deeply_nested_opml_rejected() {
        let mut opml = String::from(r#"<opml version="2.0"><body>"#);
        for _ in 0..100 {
            opml.push_str(r#"<outline text="level">"#);
        }
        for _ in 0..100 {
            opml.push_str("</outline>");
        }
        opml.push_str("</body></opml>");

        let result = parse_opml(&opml);
        assert!(matches!(result, Err(OpmlError::MaxDepthExceeded(_))));
    }

    #[test]
    fn test_entity_declarations_not_expanded() {
        let content = r#"<?xml version="1.0"?>
<!DOCTYPE opml [<!ENTITY internal "EXPANDED_VALUE">]>
<opml version="2.0">
    <body>
        <outline text="&internal;" xmlUrl="https://example.com/feed.xml"/>
    </body>
</opml>"#;

        match parse_opml(content) {
            Ok(feeds) => {
                for feed in &feeds {
                    assert!(
                        !feed.name.contains("EXPANDED_VALUE"),
                        "entity was expanded: {}",
                        feed.name
                    );
                }
            }
            // Rejecting the unrecognized entity is equally acceptable
            Err(_) => {}
        }
    }

    #[test]
    fn test_export_groups_by_category() {
        let feeds = vec![
            Feed::new("https://z.example/feed", "Zed", "", "tech"),
            Feed::new("https://a.example/feed", "Alpha", "https://a.example", "Tech"),
            Feed::new("https://n.example/feed", "News Site", "", "News"),
            Feed::new("https://u.example/feed", "Ungrouped", "", ""),
        ];

        let exported = export_opml(&feeds).unwrap();

        // One category outline per distinct name, first spelling wins
        assert_eq!(exported.matches(r#"text="tech""#).count(), 1);
        assert!(!exported.contains(r#"text="Tech""#));
        assert_eq!(exported.matches(r#"text="News""#).count(), 1);

        // A blank stored category exports inside the Uncategorized group
        assert_eq!(exported.matches(r#"text="Uncategorized""#).count(), 1);
        let round = parse_opml(&exported).unwrap();
        let ungrouped = round.iter().find(|f| f.name == "Ungrouped").unwrap();
        assert_eq!(ungrouped.category, "Uncategorized");
    }

    #[test]
    fn test_export_import_round_trip() {
        let original = vec![
            Feed::new("https://a.example/feed", "Alpha", "https://a.example", "Tech"),
            Feed::new("https://z.example/feed", "Zed", "", "Tech"),
            Feed::new("https://u.example/feed", "Solo", "", "Uncategorized"),
        ];

        let exported = export_opml(&original).unwrap();
        let round = parse_opml(&exported).unwrap();

        assert_eq!(round.len(), original.len());
        for orig in &original {
            let found = round.iter().find(|f| f.url == orig.url).unwrap();
            assert_eq!(found.name, orig.name);
            assert_eq!(found.html_url, orig.html_url);
            // Round-tripped category matches up to the case-insensitive merge
            assert_eq!(found.category.to_lowercase(), orig.category.to_lowercase());
        }
    }

    #[test]
    fn test_export_escapes_special_chars() {
        let feeds = vec![Feed::new(
            "https://example.com/feed?a=1&b=2",
            "Feed with <special> & \"chars\"",
            "",
            "",
        )];

        let exported = export_opml(&feeds).unwrap();
        let round = parse_opml(&exported).unwrap();

        assert_eq!(round.len(), 1);
        assert_eq!(round[0].name, "Feed with <special> & \"chars\"");
        assert_eq!(round[0].url, "https://example.com/feed?a=1&b=2");
    }

    #[test]
    fn test_export_to_file() {
        let feeds = vec![Feed::new(
            "https://example.com/feed.xml",
            "File Export Test",
            "https://example.com",
            "",
        )];

        let path = std::env::temp_dir().join("sift_test_export.opml");
        export_to_file(&feeds, &path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let parsed = parse_opml(&content).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].name, "File Export Test");

        let _ = std::fs::remove_file(&path);
    }
}
