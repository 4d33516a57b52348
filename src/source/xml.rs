//! XML result normalization
//!
//! CMS endpoints of site type 0 answer with
//! `<rss><list><video>...<dl><dd flag="...">...</dd></dl></video></list></rss>`.
//! Each `<video>` is mapped onto the JSON field names the JSON normalizer
//! already understands, so both dialects share one set of synonym rules.

use crate::source::normalize::{normalize_item, Category, HomeContent, VideoItem};
use crate::source::play::SOURCE_SEPARATOR;
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use serde_json::{Map, Value};

/// XML element name to the JSON key it corresponds to
fn json_key(tag: &[u8]) -> Option<&'static str> {
    Some(match tag {
        b"id" => "vod_id",
        b"name" => "vod_name",
        b"pic" => "vod_pic",
        b"note" => "vod_remarks",
        b"type" => "type_name",
        b"tid" => "type_id",
        b"year" => "vod_year",
        b"area" => "vod_area",
        b"actor" => "vod_actor",
        b"director" => "vod_director",
        b"des" => "vod_content",
        b"last" => "vod_time",
        _ => return None,
    })
}

#[derive(Default)]
struct VideoBuilder {
    fields: Map<String, Value>,
    flags: Vec<String>,
    urls: Vec<String>,
}

impl VideoBuilder {
    fn build(mut self) -> Option<VideoItem> {
        if !self.flags.is_empty() {
            self.fields.insert(
                "vod_play_from".to_string(),
                Value::String(self.flags.join(SOURCE_SEPARATOR)),
            );
            self.fields.insert(
                "vod_play_url".to_string(),
                Value::String(self.urls.join(SOURCE_SEPARATOR)),
            );
        }
        normalize_item(&Value::Object(self.fields))
    }
}

/// What the text currently being read belongs to
enum Target {
    Field(&'static str),
    Episodes,
    Category(String),
}

/// Normalize an XML result document
///
/// Parsing stops at the first XML error; items completed before it are kept.
pub fn normalize_xml(xml: &str) -> Vec<VideoItem> {
    parse(xml).0
}

/// Items of an XML home result, with categories from its
/// `<class><ty id="..">name</ty></class>` block
pub fn xml_home(xml: &str) -> HomeContent {
    let (items, categories) = parse(xml);
    HomeContent { categories, items }
}

fn parse(xml: &str) -> (Vec<VideoItem>, Vec<Category>) {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut items = Vec::new();
    let mut categories = Vec::new();
    let mut current: Option<VideoBuilder> = None;
    let mut target: Option<Target> = None;
    let mut text = String::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                text.clear();
                let name = e.local_name();
                match name.as_ref() {
                    b"video" => current = Some(VideoBuilder::default()),
                    b"dd" if current.is_some() => {
                        if let Some(video) = current.as_mut() {
                            video.flags.push(attribute(&e, "flag").unwrap_or_default());
                        }
                        target = Some(Target::Episodes);
                    }
                    b"ty" => {
                        target = attribute(&e, "id").map(Target::Category);
                    }
                    tag if current.is_some() => target = json_key(tag).map(Target::Field),
                    _ => {}
                }
            }
            Ok(Event::Text(e)) => match e.unescape() {
                Ok(t) => text.push_str(&t),
                Err(err) => tracing::debug!(error = %err, "Skipping undecodable XML text"),
            },
            Ok(Event::CData(e)) => text.push_str(&String::from_utf8_lossy(&e.into_inner())),
            Ok(Event::End(e)) => {
                let name = e.local_name();
                match (name.as_ref(), target.take()) {
                    (b"video", _) => {
                        if let Some(item) = current.take().and_then(VideoBuilder::build) {
                            items.push(item);
                        }
                    }
                    (_, Some(Target::Field(key))) => {
                        if let Some(video) = current.as_mut() {
                            video.fields.insert(key.to_string(), Value::String(text.trim().to_string()));
                        }
                    }
                    (_, Some(Target::Episodes)) => {
                        if let Some(video) = current.as_mut() {
                            video.urls.push(text.trim().to_string());
                        }
                    }
                    (_, Some(Target::Category(id))) => categories.push(Category {
                        id,
                        name: text.trim().to_string(),
                    }),
                    _ => {}
                }
                text.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                tracing::warn!(position = reader.buffer_position(), error = %e, "Malformed XML result");
                break;
            }
            _ => {}
        }
        buf.clear();
    }

    (items, categories)
}

fn attribute(e: &BytesStart<'_>, key: &str) -> Option<String> {
    e.try_get_attribute(key)
        .ok()
        .flatten()
        .and_then(|a| a.unescape_value().ok())
        .map(|v| v.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CMS_XML: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<rss version="5.1">
  <list page="1" pagecount="1" pagesize="20" recordcount="2">
    <video>
      <last>2024-05-01 10:00:00</last>
      <id>101</id>
      <tid>1</tid>
      <name><![CDATA[Big Movie]]></name>
      <type>Action</type>
      <pic>http://img.x.com/101.jpg</pic>
      <note><![CDATA[HD]]></note>
      <year>2023</year>
      <dl>
        <dd flag="m3u8"><![CDATA[ep1#http://v.x.com/1.m3u8$ep2#http://v.x.com/2.m3u8]]></dd>
        <dd flag="mp4"><![CDATA[full#http://v.x.com/full.mp4]]></dd>
      </dl>
      <des><![CDATA[<p>Plot &amp; more</p>]]></des>
    </video>
    <video>
      <id>102</id>
      <name>Second &amp; Last</name>
    </video>
  </list>
  <class>
    <ty id="1">Movies</ty>
    <ty id="2">Series</ty>
  </class>
</rss>"#;

    #[test]
    fn test_normalize_cms_xml() {
        let items = normalize_xml(CMS_XML);
        assert_eq!(items.len(), 2);

        let first = &items[0];
        assert_eq!(first.id, "101");
        assert_eq!(first.name, "Big Movie");
        assert_eq!(first.type_label, "1");
        assert_eq!(first.note, "HD");
        assert_eq!(first.last_updated, "2024-05-01 10:00:00");
        assert_eq!(first.description, "<p>Plot &amp; more</p>");

        let sources = first.play_sources();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].flag, "m3u8");
        assert_eq!(sources[0].episodes.len(), 2);
        assert_eq!(sources[1].episodes[0].url, "http://v.x.com/full.mp4");

        assert_eq!(items[1].name, "Second & Last");
    }

    #[test]
    fn test_xml_home() {
        let home = xml_home(CMS_XML);
        assert_eq!(home.items.len(), 2);
        assert_eq!(home.categories.len(), 2);
        assert_eq!(home.categories[1], Category { id: "2".into(), name: "Series".into() });
        assert_eq!(home.categories[0].name, "Movies");
    }

    #[test]
    fn test_malformed_xml_keeps_completed_items() {
        let xml = "<rss><list><video><id>1</id><name>A</name></video><video><id>2</id></list></rss>";
        let items = normalize_xml(xml);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, "1");
    }
}
