//! Source config parsing
//!
//! Decoded payloads are either a JSON config object (single on-demand or
//! live source), a multi-site catalog, or spider source text with the
//! endpoint URL embedded somewhere in it.

use crate::core::config::SourcesConfig;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value};

lazy_static! {
    /// First quoted http(s) URL in spider source text
    static ref QUOTED_URL_REGEX: Regex = Regex::new(r#"['"](https?://[^'"]+)['"]"#).unwrap();
}

/// Timeout for JSON configs that do not declare one
const JSON_CONFIG_TIMEOUT: u64 = 15;

/// Whether a spider serves live channels or on-demand titles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    OnDemand,
    Live,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceConfig {
    OnDemand {
        url: String,
        name: String,
        searchable: bool,
        changeable: bool,
        quick_search: bool,
        timeout_secs: u64,
    },
    Live {
        url: String,
        name: String,
        user_agent: Option<String>,
        origin: Option<String>,
        referer: Option<String>,
        timeout_secs: u64,
    },
    Plugin {
        url: String,
        name: String,
        source_text: String,
        kind: ContentKind,
        timeout_secs: u64,
    },
}

impl SourceConfig {
    pub fn url(&self) -> &str {
        match self {
            SourceConfig::OnDemand { url, .. }
            | SourceConfig::Live { url, .. }
            | SourceConfig::Plugin { url, .. } => url,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            SourceConfig::OnDemand { name, .. }
            | SourceConfig::Live { name, .. }
            | SourceConfig::Plugin { name, .. } => name,
        }
    }

    pub fn timeout_secs(&self) -> u64 {
        match self {
            SourceConfig::OnDemand { timeout_secs, .. }
            | SourceConfig::Live { timeout_secs, .. }
            | SourceConfig::Plugin { timeout_secs, .. } => *timeout_secs,
        }
    }

    /// Replace the URL, typically with the descriptor's when the payload had none
    pub fn with_url(mut self, new_url: impl Into<String>) -> Self {
        let new_url = new_url.into();
        match &mut self {
            SourceConfig::OnDemand { url, .. }
            | SourceConfig::Live { url, .. }
            | SourceConfig::Plugin { url, .. } => *url = new_url,
        }
        self
    }

    /// A config is usable once it has a URL, and a plugin config also needs its text
    pub fn is_valid(&self) -> bool {
        match self {
            SourceConfig::Plugin { url, source_text, .. } => {
                !url.trim().is_empty() && !source_text.trim().is_empty()
            }
            other => !other.url().trim().is_empty(),
        }
    }
}

/// Parser for decoded source payloads
#[derive(Debug, Clone)]
pub struct SourceConfigParser {
    live_type_synonyms: Vec<String>,
    live_keywords: Vec<String>,
    plugin_timeout: u64,
}

impl SourceConfigParser {
    pub fn new(config: &SourcesConfig) -> Self {
        Self {
            live_type_synonyms: config.live_type_synonyms.iter().map(|s| s.to_lowercase()).collect(),
            live_keywords: config.live_keywords.iter().map(|s| s.to_lowercase()).collect(),
            plugin_timeout: config.default_timeout,
        }
    }

    /// Parse decoded text into a config
    ///
    /// # Arguments
    /// * `decoded` - payload text as produced by the decoder
    /// * `name_hint` - display name to use when the payload does not carry one
    ///
    /// # Returns
    /// `None` when nothing usable could be recognised. The caller treats that
    /// source as absent.
    pub fn parse(&self, decoded: &str, name_hint: &str) -> Option<SourceConfig> {
        if decoded.trim().is_empty() {
            return None;
        }

        match serde_json::from_str::<Value>(decoded) {
            Ok(Value::Object(obj)) => {
                if let Some(config) = self.parse_json(&obj, decoded, name_hint) {
                    return Some(config);
                }
                tracing::debug!(name = %name_hint, "JSON payload has neither url nor sites, trying as spider text");
            }
            Ok(_) => {
                tracing::debug!(name = %name_hint, "JSON payload is not an object");
                return None;
            }
            Err(_) => {}
        }

        self.parse_plugin_text(decoded, name_hint)
    }

    fn parse_json(&self, obj: &Map<String, Value>, raw: &str, name_hint: &str) -> Option<SourceConfig> {
        if let Some(sites) = obj.get("sites").and_then(Value::as_array).filter(|s| !s.is_empty()) {
            let first_type = sites
                .first()
                .and_then(|s| s.get("type"))
                .and_then(as_int)
                .unwrap_or(0);
            let name = non_blank(name_hint)
                .or_else(|| str_field(obj, "name"))
                .unwrap_or_else(|| "catalog".to_string());

            return Some(SourceConfig::Plugin {
                url: String::new(),
                name,
                source_text: raw.to_string(),
                kind: if first_type == 2 { ContentKind::Live } else { ContentKind::OnDemand },
                timeout_secs: self.plugin_timeout,
            });
        }

        let url = str_field(obj, "url")?;
        let name = str_field(obj, "name").unwrap_or_else(|| name_hint.to_string());
        let timeout_secs = obj
            .get("timeout")
            .and_then(as_int)
            .and_then(|t| u64::try_from(t).ok())
            .unwrap_or(JSON_CONFIG_TIMEOUT);

        let is_live = str_field(obj, "type")
            .map(|t| self.live_type_synonyms.contains(&t.to_lowercase()))
            .unwrap_or(false);

        if is_live {
            Some(SourceConfig::Live {
                url,
                name,
                user_agent: str_field(obj, "ua"),
                origin: str_field(obj, "origin"),
                referer: str_field(obj, "referer"),
                timeout_secs,
            })
        } else {
            Some(SourceConfig::OnDemand {
                url,
                name,
                searchable: flag(obj, "searchable"),
                changeable: flag(obj, "changeable"),
                quick_search: flag(obj, "quickSearch"),
                timeout_secs,
            })
        }
    }

    fn parse_plugin_text(&self, text: &str, name_hint: &str) -> Option<SourceConfig> {
        let Some(url) = QUOTED_URL_REGEX.captures(text).map(|c| c[1].to_string()) else {
            tracing::debug!(name = %name_hint, "No embedded URL in spider text");
            return None;
        };

        let lowered = text.to_lowercase();
        let kind = if self.live_keywords.iter().any(|k| lowered.contains(k.as_str())) {
            ContentKind::Live
        } else {
            ContentKind::OnDemand
        };

        Some(SourceConfig::Plugin {
            url,
            name: name_hint.to_string(),
            source_text: text.to_string(),
            kind,
            timeout_secs: self.plugin_timeout,
        })
    }
}

fn non_blank(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}

/// String value of a scalar field; numbers are stringified
fn str_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    match obj.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn as_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Upstream flags are `1`/`0`, occasionally booleans; absent means enabled
fn flag(obj: &Map<String, Value>, key: &str) -> bool {
    match obj.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(other) => as_int(other).map(|v| v == 1).unwrap_or(true),
        None => true,
    }
}
