//! Result normalization
//!
//! Spiders and CMS endpoints answer in loosely related JSON dialects. Every
//! logical field is read from an ordered list of synonyms, first non-blank
//! value wins, independently per field.

use crate::source::play::{parse_play_sources, parse_single_url, PlaySource};
use serde::Serialize;
use serde_json::{Map, Value};

const ID_KEYS: &[&str] = &["vod_id", "id"];
const NAME_KEYS: &[&str] = &["vod_name", "name", "title"];
const PIC_KEYS: &[&str] = &["vod_pic", "pic", "image", "cover"];
const NOTE_KEYS: &[&str] = &["vod_remarks", "note", "remarks", "subtitle"];
const TYPE_KEYS: &[&str] = &["type_id", "type", "type_name"];
const YEAR_KEYS: &[&str] = &["vod_year", "year"];
const AREA_KEYS: &[&str] = &["vod_area", "area"];
const ACTOR_KEYS: &[&str] = &["vod_actor", "actor"];
const DIRECTOR_KEYS: &[&str] = &["vod_director", "director"];
const DESCRIPTION_KEYS: &[&str] = &["vod_content", "des", "content", "description"];
const LAST_UPDATED_KEYS: &[&str] = &["vod_time", "last", "update_time"];
const DIRECT_PLAY_KEYS: &[&str] = &["url"];
const PLAY_FROM_KEYS: &[&str] = &["vod_play_from", "play_from"];
const PLAY_URL_KEYS: &[&str] = &["vod_play_url", "play_url", "vod_play_urls"];

const ITEM_FIELDS: &[&[&str]] = &[
    ID_KEYS,
    NAME_KEYS,
    PIC_KEYS,
    NOTE_KEYS,
    TYPE_KEYS,
    YEAR_KEYS,
    AREA_KEYS,
    ACTOR_KEYS,
    DIRECTOR_KEYS,
    DESCRIPTION_KEYS,
    LAST_UPDATED_KEYS,
    DIRECT_PLAY_KEYS,
    PLAY_FROM_KEYS,
    PLAY_URL_KEYS,
];

const DEFAULT_SOURCE_FLAG: &str = "Default";

/// Canonical video record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VideoItem {
    pub id: String,
    pub name: String,
    pub pic: String,
    pub note: String,
    pub detail_url: String,
    pub type_label: String,
    pub year: String,
    pub area: String,
    pub actor: String,
    pub director: String,
    pub description: String,
    pub last_updated: String,
    pub direct_play_url: String,
    pub raw_play_source_field: String,
    pub raw_play_url_field: String,
}

impl VideoItem {
    /// Play sources of this item
    ///
    /// Falls back to a single source holding `direct_play_url` when the item
    /// carries no delimited play fields.
    pub fn play_sources(&self) -> Vec<PlaySource> {
        let sources = parse_play_sources(&self.raw_play_source_field, &self.raw_play_url_field);
        if !sources.is_empty() {
            return sources;
        }
        let episodes = parse_single_url(&self.name, &self.direct_play_url);
        if episodes.is_empty() {
            return Vec::new();
        }
        vec![PlaySource {
            flag: DEFAULT_SOURCE_FLAG.to_string(),
            episodes,
        }]
    }

    /// First non-empty episode URL, else the direct play URL
    pub fn first_play_url(&self) -> Option<String> {
        self.play_sources()
            .into_iter()
            .next()
            .and_then(|s| s.episodes.into_iter().next())
            .map(|e| e.url)
            .filter(|u| !u.trim().is_empty())
            .or_else(|| Some(self.direct_play_url.clone()).filter(|u| !u.trim().is_empty()))
    }
}

/// Category entry from a home result's `class` array
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Category {
    pub id: String,
    pub name: String,
}

/// Categories and items of a home result
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HomeContent {
    pub categories: Vec<Category>,
    pub items: Vec<VideoItem>,
}

impl HomeContent {
    pub fn from_value(value: &Value) -> Self {
        Self {
            categories: categories(value),
            items: normalize(value),
        }
    }

    /// Invalid JSON yields an empty home
    pub fn from_text(text: &str) -> Self {
        match serde_json::from_str::<Value>(text) {
            Ok(value) => Self::from_value(&value),
            Err(e) => {
                tracing::warn!(error = %e, "Home result is not valid JSON");
                Self::default()
            }
        }
    }
}

/// Normalize a decoded result value into canonical items
///
/// Arrays map element-wise, objects use their `list` array or are treated
/// as a single item. Malformed elements are dropped, never the batch.
pub fn normalize(value: &Value) -> Vec<VideoItem> {
    match value {
        Value::Array(items) => normalize_items(items),
        Value::Object(obj) => {
            let code = obj.get("code").and_then(as_i64).unwrap_or(1);
            if code != 1 {
                let msg = obj.get("msg").and_then(scalar).unwrap_or_default();
                tracing::warn!(code, msg = %msg, "Result reported a non-success code");
            }

            match obj.get("list") {
                Some(Value::Array(items)) => normalize_items(items),
                _ => normalize_item(value).into_iter().collect(),
            }
        }
        _ => Vec::new(),
    }
}

/// Normalize result text; invalid JSON yields no items
pub fn normalize_text(text: &str) -> Vec<VideoItem> {
    match serde_json::from_str::<Value>(text) {
        Ok(value) => normalize(&value),
        Err(e) => {
            tracing::warn!(error = %e, "Result is not valid JSON");
            Vec::new()
        }
    }
}

fn normalize_items(items: &[Value]) -> Vec<VideoItem> {
    let total = items.len();
    let normalized: Vec<VideoItem> = items.iter().filter_map(normalize_item).collect();
    if normalized.len() < total {
        tracing::debug!(total, kept = normalized.len(), "Dropped malformed result items");
    }
    normalized
}

/// Normalize a single item
///
/// `None` if the value is not an object, or if a recognised field holds an
/// array or object where a scalar belongs. Items without id or name are kept.
pub fn normalize_item(value: &Value) -> Option<VideoItem> {
    let obj = value.as_object()?;

    if let Some(key) = ITEM_FIELDS
        .iter()
        .flat_map(|keys| keys.iter())
        .find(|k| matches!(obj.get(**k), Some(Value::Array(_) | Value::Object(_))))
    {
        tracing::debug!(field = %key, "Dropping item with a non-scalar field");
        return None;
    }

    Some(VideoItem {
        id: first_of(obj, ID_KEYS),
        name: first_of(obj, NAME_KEYS),
        pic: first_of(obj, PIC_KEYS),
        note: first_of(obj, NOTE_KEYS),
        detail_url: first_of(obj, ID_KEYS),
        type_label: first_of(obj, TYPE_KEYS),
        year: first_of(obj, YEAR_KEYS),
        area: first_of(obj, AREA_KEYS),
        actor: first_of(obj, ACTOR_KEYS),
        director: first_of(obj, DIRECTOR_KEYS),
        description: first_of(obj, DESCRIPTION_KEYS),
        last_updated: first_of(obj, LAST_UPDATED_KEYS),
        direct_play_url: first_of(obj, DIRECT_PLAY_KEYS),
        raw_play_source_field: first_of(obj, PLAY_FROM_KEYS),
        raw_play_url_field: first_of(obj, PLAY_URL_KEYS),
    })
}

/// Categories from a home result
pub fn categories(value: &Value) -> Vec<Category> {
    value
        .get("class")
        .and_then(Value::as_array)
        .map(|classes| {
            classes
                .iter()
                .filter_map(|c| {
                    let obj = c.as_object()?;
                    let id = first_of(obj, &["type_id", "id"]);
                    let name = first_of(obj, &["type_name", "name"]);
                    (!id.is_empty()).then_some(Category { id, name })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn first_of(obj: &Map<String, Value>, keys: &[&str]) -> String {
    keys.iter()
        .filter_map(|k| obj.get(*k).and_then(scalar))
        .find(|v| !v.trim().is_empty())
        .unwrap_or_default()
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_malformed_item_dropped_from_list() {
        let value = json!({
            "code": 1,
            "list": [
                {"vod_id": 1, "vod_name": "One"},
                {"vod_id": "2", "vod_name": "Two"},
                "not an object",
                {"id": "4", "title": "Four"},
                {"name": "Five"}
            ]
        });
        let items = normalize(&value);
        assert_eq!(items.len(), 4);
        assert_eq!(items[0].id, "1");
        assert_eq!(items[2].name, "Four");
    }

    #[test]
    fn test_item_shape_rules() {
        let items = normalize(&json!([
            {"vod_pic": "http://x/p.jpg"},
            {"vod_id": "a"},
            {"vod_id": "b", "vod_actor": ["x", "y"]},
            {"vod_id": "c", "extra": {"nested": true}}
        ]));
        let ids: Vec<&str> = items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["", "a", "c"]);
        assert_eq!(items[0].pic, "http://x/p.jpg");
    }

    #[test]
    fn test_name_synonym_fallback() {
        let items = normalize(&json!({"name": "X"}));
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].name, "X");
    }

    #[test]
    fn test_synonyms_are_independent_per_field() {
        let item = normalize_item(&json!({
            "vod_name": "",
            "title": "T",
            "vod_pic": "P1",
            "cover": "P2",
            "remarks": "HD",
            "vod_content": " ",
            "description": "D"
        }))
        .unwrap();
        assert_eq!(item.name, "T");
        assert_eq!(item.pic, "P1");
        assert_eq!(item.note, "HD");
        assert_eq!(item.description, "D");
    }

    #[test]
    fn test_non_success_code_still_parses_list() {
        let items = normalize(&json!({"code": 0, "msg": "partial", "list": [{"vod_id": "1"}]}));
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn test_invalid_text_is_empty() {
        assert!(normalize_text("<html>").is_empty());
        assert!(normalize(&json!("string")).is_empty());
    }

    #[test]
    fn test_play_sources_and_first_url() {
        let item = normalize_item(&json!({
            "vod_id": "9",
            "vod_play_from": "A$$$B",
            "vod_play_url": "第1集#http://a/1.m3u8$第2集#http://a/2.m3u8$$$x#http://b/1.mp4"
        }))
        .unwrap();
        let sources = item.play_sources();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].episodes.len(), 2);
        assert_eq!(item.first_play_url().as_deref(), Some("http://a/1.m3u8"));
    }

    #[test]
    fn test_direct_play_url_fallback() {
        let item = normalize_item(&json!({"name": "Clip", "url": "http://a/c.mp4"})).unwrap();
        let sources = item.play_sources();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].episodes[0].name, "Clip");
        assert_eq!(item.first_play_url().as_deref(), Some("http://a/c.mp4"));

        let listed = normalize_item(&json!({"name": "Set", "url": "1#http://a/1.mp4$2#http://a/2.mp4"})).unwrap();
        let sources = listed.play_sources();
        assert_eq!(sources[0].flag, "Default");
        assert_eq!(sources[0].episodes.len(), 2);
        assert_eq!(sources[0].episodes[1].url, "http://a/2.mp4");

        let bare = normalize_item(&json!({"name": "Nothing"})).unwrap();
        assert!(bare.play_sources().is_empty());
        assert_eq!(bare.first_play_url(), None);
    }

    #[test]
    fn test_home_content() {
        let home = HomeContent::from_text(r#"{"class":[{"type_id":"2","type_name":"TV"}],"list":[{"vod_id":"1"}]}"#);
        assert_eq!(home.categories.len(), 1);
        assert_eq!(home.items.len(), 1);
        assert_eq!(HomeContent::from_text("oops"), HomeContent::default());
    }

    #[test]
    fn test_categories() {
        let cats = categories(&json!({"class": [{"type_id": 1, "type_name": "Movie"}, {"type_name": "no id"}]}));
        assert_eq!(cats, vec![Category { id: "1".into(), name: "Movie".into() }]);
    }
}
