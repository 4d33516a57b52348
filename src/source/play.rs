//! Play sources, episodes and play URL resolution
//!
//! Upstream encodes episode lists as delimited strings: `$$$` separates the
//! parallel source lists, `$` separates episodes of one source, and `#`
//! splits an episode into `name#url`.

use crate::core::url::AnnotatedUrl;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

pub const SOURCE_SEPARATOR: &str = "$$$";
pub const EPISODE_SEPARATOR: char = '$';
pub const NAME_URL_SEPARATOR: char = '#';

const MEDIA_EXTENSIONS: &[&str] = &[
    ".mp4", ".mkv", ".m3u8", ".flv", ".avi", ".webm", ".mov", ".wmv", ".ts", ".m3u",
];

lazy_static! {
    /// Media extension as its own token, e.g. `/x.mp4/`, `?type=m3u8&`, `/ts/`
    static ref MEDIA_HINT_REGEX: Regex =
        Regex::new(r"(?i)[./=_-](m3u8|mp4|flv|avi|mkv|webm|mov|wmv|ts)(?:$|[/?&#.=_-])").unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Episode {
    pub name: String,
    /// May be empty when the episode is known but not yet resolved
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlaySource {
    pub flag: String,
    pub episodes: Vec<Episode>,
}

/// Pair up a play-from field with its play-url field
///
/// Index `i` of `play_from` pairs with index `i` of `play_url`; sources past
/// the end of `play_url` get no episodes. Blank flags are skipped.
pub fn parse_play_sources(play_from: &str, play_url: &str) -> Vec<PlaySource> {
    if play_from.trim().is_empty() {
        return Vec::new();
    }

    let urls: Vec<&str> = play_url.split(SOURCE_SEPARATOR).collect();

    play_from
        .split(SOURCE_SEPARATOR)
        .enumerate()
        .filter_map(|(i, flag)| {
            let flag = flag.trim();
            if flag.is_empty() {
                return None;
            }
            let episodes = urls.get(i).map(|u| parse_episodes(u)).unwrap_or_default();
            Some(PlaySource {
                flag: flag.to_string(),
                episodes,
            })
        })
        .collect()
}

/// Split one source's episode string, preserving order
pub fn parse_episodes(encoded: &str) -> Vec<Episode> {
    encoded
        .split(EPISODE_SEPARATOR)
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(|token| match token.split_once(NAME_URL_SEPARATOR) {
            Some((name, url)) => Episode {
                name: name.trim().to_string(),
                url: url.trim().to_string(),
            },
            None => Episode {
                name: token.to_string(),
                url: String::new(),
            },
        })
        .collect()
}

/// Episodes for a lone play URL that may or may not be an episode list
pub fn parse_single_url(name: &str, url: &str) -> Vec<Episode> {
    if url.trim().is_empty() {
        return Vec::new();
    }
    if url.contains(EPISODE_SEPARATOR) {
        return parse_episodes(url);
    }
    let name = if name.trim().is_empty() { "Play" } else { name };
    vec![Episode {
        name: name.to_string(),
        url: url.trim().to_string(),
    }]
}

/// Whether `url` points straight at a media stream
pub fn is_direct_video_url(url: &str) -> bool {
    let path = url.split(['?', '#']).next().unwrap_or(url).to_ascii_lowercase();
    MEDIA_EXTENSIONS.iter().any(|ext| path.ends_with(ext)) || MEDIA_HINT_REGEX.is_match(url)
}

/// Playable address for an episode
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlayResolution {
    /// The URL can be handed to a player as is
    Direct {
        url: String,
        headers: BTreeMap<String, String>,
    },
    /// The URL is a page that still has to be sniffed or parsed
    NeedsParse {
        url: String,
        headers: BTreeMap<String, String>,
    },
}

impl PlayResolution {
    pub fn url(&self) -> &str {
        match self {
            PlayResolution::Direct { url, .. } | PlayResolution::NeedsParse { url, .. } => url,
        }
    }

    pub fn needs_parse(&self) -> bool {
        matches!(self, PlayResolution::NeedsParse { .. })
    }

    /// Classify a bare episode URL, splitting off any header annotations
    pub fn from_episode_url(raw: &str) -> Option<Self> {
        let target = AnnotatedUrl::parse(raw);
        if target.url.is_empty() {
            return None;
        }
        Some(if is_direct_video_url(&target.url) {
            PlayResolution::Direct {
                url: target.url,
                headers: target.headers,
            }
        } else {
            PlayResolution::NeedsParse {
                url: target.url,
                headers: target.headers,
            }
        })
    }

    /// Interpret a spider `play` result: `{"parse": 0|1, "url": "...", "header": {...}}`
    ///
    /// `header` may be an object or a JSON object encoded as a string. When
    /// `parse` is absent the URL itself decides.
    pub fn from_play_json(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let raw_url = obj.get("url").and_then(Value::as_str)?.trim();
        if raw_url.is_empty() {
            return None;
        }

        let target = AnnotatedUrl::parse(raw_url);
        let mut headers = target.headers;
        headers.extend(play_headers(obj.get("header")));

        let needs_parse = match obj.get("parse") {
            Some(Value::Number(n)) => n.as_i64() == Some(1),
            Some(Value::String(s)) => s.trim() == "1",
            Some(Value::Bool(b)) => *b,
            _ => !is_direct_video_url(&target.url),
        };

        Some(if needs_parse {
            PlayResolution::NeedsParse {
                url: target.url,
                headers,
            }
        } else {
            PlayResolution::Direct {
                url: target.url,
                headers,
            }
        })
    }
}

fn play_headers(value: Option<&Value>) -> BTreeMap<String, String> {
    let parsed;
    let obj = match value {
        Some(Value::Object(obj)) => obj,
        Some(Value::String(s)) if !s.trim().is_empty() => match serde_json::from_str::<Value>(s) {
            Ok(Value::Object(obj)) => {
                parsed = obj;
                &parsed
            }
            _ => return BTreeMap::new(),
        },
        _ => return BTreeMap::new(),
    };

    obj.iter()
        .map(|(k, v)| {
            let v = match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (crate::core::url::fix_header_name(k), v)
        })
        .collect()
}
