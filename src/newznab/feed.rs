//! Newznab RSS feed parsing.
//!
//! Indexers answer `t=search` with an RSS 2.0 document where each `<item>`
//! is one candidate release. Alongside the plain RSS fields, Newznab adds
//! namespaced `<newznab:attr name="..." value="..."/>` elements for
//! category and size metadata. This parser is tolerant by design: items
//! missing required fields are skipped rather than failing the whole feed.

use chrono::{DateTime, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("XML parse error: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("XML attribute error: {0}")]
    Attribute(#[from] quick_xml::events::attributes::AttrError),
}

/// One release offered by an indexer, before scoring
#[derive(Debug, Clone, PartialEq)]
pub struct ReleaseCandidate {
    pub guid: String,
    pub title: String,
    /// NZB download URL, handed to the download backend on grab
    pub link: String,
    pub size: Option<i64>,
    pub categories: Vec<u32>,
    pub published_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Copy, PartialEq)]
enum ItemField {
    Guid,
    Title,
    Link,
    PubDate,
}

#[derive(Default)]
struct ItemBuilder {
    guid: Option<String>,
    title: Option<String>,
    link: Option<String>,
    size: Option<i64>,
    categories: Vec<u32>,
    published_at: Option<DateTime<Utc>>,
}

impl ItemBuilder {
    fn set_field(&mut self, field: ItemField, value: String) {
        match field {
            ItemField::Guid => self.guid = Some(value),
            ItemField::Title => self.title = Some(value),
            ItemField::Link => self.link = Some(value),
            ItemField::PubDate => {
                self.published_at = DateTime::parse_from_rfc2822(value.trim())
                    .ok()
                    .map(|dt| dt.with_timezone(&Utc));
            }
        }
    }

    /// `<enclosure url="..." length="..."/>`: the length is the NZB payload size
    fn apply_enclosure(&mut self, element: &BytesStart) -> Result<(), FeedError> {
        if let Some(length) = attribute_value(element, b"length")? {
            self.size = length.trim().parse::<i64>().ok().or(self.size);
        }
        Ok(())
    }

    /// `<newznab:attr name="..." value="..."/>` metadata pairs
    fn apply_newznab_attr(&mut self, element: &BytesStart) -> Result<(), FeedError> {
        let name = attribute_value(element, b"name")?;
        let value = attribute_value(element, b"value")?;
        let (Some(name), Some(value)) = (name, value) else {
            return Ok(());
        };

        match name.as_str() {
            "category" => {
                if let Ok(id) = value.trim().parse::<u32>() {
                    if !self.categories.contains(&id) {
                        self.categories.push(id);
                    }
                }
            }
            // Enclosure length wins when both are present
            "size" => {
                if self.size.is_none() {
                    self.size = value.trim().parse::<i64>().ok();
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn build(self) -> Option<ReleaseCandidate> {
        let link = self.link?;
        let guid = self.guid.unwrap_or_else(|| link.clone());
        Some(ReleaseCandidate {
            guid,
            title: self.title?,
            link,
            size: self.size,
            categories: self.categories,
            published_at: self.published_at,
        })
    }
}

/// Parse a Newznab search response into candidates, skipping malformed items
pub fn parse_search_feed(xml: &str) -> Result<Vec<ReleaseCandidate>, FeedError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut candidates = Vec::new();
    let mut current: Option<ItemBuilder> = None;
    let mut text_target: Option<ItemField> = None;

    loop {
        match reader.read_event()? {
            Event::Start(element) => match element.local_name().as_ref() {
                b"item" => current = Some(ItemBuilder::default()),
                b"guid" if current.is_some() => text_target = Some(ItemField::Guid),
                b"title" if current.is_some() => text_target = Some(ItemField::Title),
                b"link" if current.is_some() => text_target = Some(ItemField::Link),
                b"pubDate" if current.is_some() => text_target = Some(ItemField::PubDate),
                b"enclosure" => {
                    if let Some(item) = current.as_mut() {
                        item.apply_enclosure(&element)?;
                    }
                }
                b"attr" => {
                    if let Some(item) = current.as_mut() {
                        item.apply_newznab_attr(&element)?;
                    }
                }
                _ => {}
            },
            Event::Empty(element) => match element.local_name().as_ref() {
                b"enclosure" => {
                    if let Some(item) = current.as_mut() {
                        item.apply_enclosure(&element)?;
                    }
                }
                b"attr" => {
                    if let Some(item) = current.as_mut() {
                        item.apply_newznab_attr(&element)?;
                    }
                }
                _ => {}
            },
            Event::Text(text) => {
                if let (Some(item), Some(field)) = (current.as_mut(), text_target) {
                    item.set_field(field, text.unescape()?.into_owned());
                }
            }
            Event::CData(data) => {
                if let (Some(item), Some(field)) = (current.as_mut(), text_target) {
                    let value = String::from_utf8_lossy(&data.into_inner()).into_owned();
                    item.set_field(field, value);
                }
            }
            Event::End(element) => {
                if element.local_name().as_ref() == b"item" {
                    if let Some(candidate) = current.take().and_then(ItemBuilder::build) {
                        candidates.push(candidate);
                    }
                }
                text_target = None;
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(candidates)
}

fn attribute_value(element: &BytesStart, name: &[u8]) -> Result<Option<String>, FeedError> {
    for attribute in element.attributes() {
        let attribute = attribute?;
        if attribute.key.local_name().as_ref() == name {
            return Ok(Some(attribute.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const SAMPLE_FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:atom="http://www.w3.org/2005/Atom" xmlns:newznab="http://www.newznab.com/DTD/2010/feeds/attributes/">
  <channel>
    <title>indexer.example</title>
    <link>https://indexer.example/</link>
    <item>
      <title>Dune - Frank Herbert (1965) EPUB</title>
      <guid isPermaLink="true">https://indexer.example/details/abc123</guid>
      <link>https://indexer.example/getnzb/abc123.nzb&amp;r=key</link>
      <pubDate>Sat, 01 Feb 2025 10:30:00 +0000</pubDate>
      <enclosure url="https://indexer.example/getnzb/abc123.nzb" length="1048576" type="application/x-nzb"/>
      <newznab:attr name="category" value="7000"/>
      <newznab:attr name="category" value="7020"/>
      <newznab:attr name="size" value="999"/>
    </item>
    <item>
      <title><![CDATA[Project Hail Mary & Artemis - Andy Weir MOBI]]></title>
      <guid isPermaLink="false">def456</guid>
      <link>https://indexer.example/getnzb/def456.nzb</link>
      <pubDate>Mon, 03 Feb 2025 08:00:00 +0000</pubDate>
      <newznab:attr name="category" value="7010"/>
      <newznab:attr name="size" value="2097152"/>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn test_parses_items_with_all_fields() {
        let items = parse_search_feed(SAMPLE_FEED).expect("parse feed");
        assert_eq!(items.len(), 2);

        let first = &items[0];
        assert_eq!(first.guid, "https://indexer.example/details/abc123");
        assert_eq!(first.title, "Dune - Frank Herbert (1965) EPUB");
        // Entity-escaped ampersand in the link is decoded
        assert_eq!(first.link, "https://indexer.example/getnzb/abc123.nzb&r=key");
        assert_eq!(first.categories, vec![7000, 7020]);
        assert_eq!(
            first.published_at,
            Some(Utc.with_ymd_and_hms(2025, 2, 1, 10, 30, 0).unwrap())
        );
    }

    #[test]
    fn test_enclosure_length_wins_over_size_attr() {
        let items = parse_search_feed(SAMPLE_FEED).expect("parse feed");
        assert_eq!(items[0].size, Some(1_048_576));
    }

    #[test]
    fn test_size_attr_used_without_enclosure() {
        let items = parse_search_feed(SAMPLE_FEED).expect("parse feed");
        assert_eq!(items[1].size, Some(2_097_152));
    }

    #[test]
    fn test_cdata_title_preserved() {
        let items = parse_search_feed(SAMPLE_FEED).expect("parse feed");
        assert_eq!(items[1].title, "Project Hail Mary & Artemis - Andy Weir MOBI");
    }

    #[test]
    fn test_empty_channel_yields_no_candidates() {
        let xml = r#"<?xml version="1.0"?><rss><channel><title>empty</title></channel></rss>"#;
        let items = parse_search_feed(xml).expect("parse feed");
        assert!(items.is_empty());
    }

    #[test]
    fn test_item_without_link_is_skipped() {
        let xml = r#"<rss><channel>
          <item><title>No link here</title><guid>g1</guid></item>
          <item><title>Valid</title><link>https://x/get/1</link></item>
        </channel></rss>"#;
        let items = parse_search_feed(xml).expect("parse feed");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "Valid");
        // guid falls back to the link when the feed omits it
        assert_eq!(items[0].guid, "https://x/get/1");
    }

    #[test]
    fn test_unparseable_pub_date_becomes_none() {
        let xml = r#"<rss><channel>
          <item><title>T</title><link>https://x/1</link><pubDate>not a date</pubDate></item>
        </channel></rss>"#;
        let items = parse_search_feed(xml).expect("parse feed");
        assert_eq!(items[0].published_at, None);
    }
}
