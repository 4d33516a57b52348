//! Multi-site catalog documents
//!
//! A catalog is the `{"spider": "...", "sites": [...]}` document most
//! sources publish. Each site becomes a `SourceDescriptor`; sites that do not
//! describe a usable source are skipped rather than failing the catalog.

use crate::core::error::{Result, VodError};
use crate::source::descriptor::{SourceDescriptor, SourceKind};
use serde::Deserialize;
use serde_json::Value;

const DEFAULT_SITE_TIMEOUT: u64 = 30;

#[derive(Debug, Deserialize)]
struct CatalogRecord {
    #[serde(default)]
    spider: Option<String>,
    #[serde(default)]
    sites: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct SiteRecord {
    key: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    api: String,
    #[serde(default)]
    ext: Option<Value>,
    #[serde(default)]
    jar: Option<String>,
    #[serde(default, rename = "type")]
    site_type: Option<Value>,
    #[serde(default)]
    hide: Option<Value>,
    #[serde(default)]
    searchable: Option<Value>,
    #[serde(default)]
    timeout: Option<Value>,
}

/// Parsed catalog
#[derive(Debug, Clone, Default)]
pub struct SiteCatalog {
    /// Artifact shared by every plugin-backed site without its own `jar`
    pub spider: Option<String>,
    pub sources: Vec<SourceDescriptor>,
}

impl SiteCatalog {
    /// Parse catalog text
    ///
    /// # Arguments
    /// * `text` - decoded catalog JSON
    /// * `entry_prefix` - reserved prefix marking spider entry names
    pub fn parse(text: &str, entry_prefix: &str) -> Result<Self> {
        let record: CatalogRecord = serde_json::from_str(text)
            .map_err(|e| VodError::ParseError(format!("invalid catalog: {}", e)))?;

        let spider = record.spider.filter(|s| !s.trim().is_empty());
        let mut sources = Vec::with_capacity(record.sites.len());

        for (index, raw) in record.sites.into_iter().enumerate() {
            match site_to_descriptor(raw, entry_prefix) {
                Ok(desc) => match desc.validate(spider.as_deref()) {
                    Ok(()) => sources.push(desc),
                    Err(e) => tracing::warn!(index, key = %desc.key, error = %e, "Skipping catalog site"),
                },
                Err(e) => tracing::warn!(index, error = %e, "Skipping malformed catalog site"),
            }
        }

        tracing::info!(sites = sources.len(), has_spider = spider.is_some(), "Parsed site catalog");
        Ok(Self { spider, sources })
    }
}

fn site_to_descriptor(raw: Value, entry_prefix: &str) -> Result<SourceDescriptor> {
    let site: SiteRecord =
        serde_json::from_value(raw).map_err(|e| VodError::ParseError(e.to_string()))?;

    if site.key.trim().is_empty() {
        return Err(VodError::ParseError("site key is empty".to_string()));
    }

    let type_code = site.site_type.as_ref().and_then(as_int).unwrap_or(0);
    let jar = site.jar.filter(|j| !j.trim().is_empty());

    let is_spider = type_code == 3
        || site.api.starts_with(entry_prefix)
        || site.api.contains(".js")
        || jar.is_some();

    let kind = if is_spider {
        SourceKind::PluginBacked
    } else {
        SourceKind::from_site_type(type_code)
            .ok_or_else(|| VodError::ParseError(format!("unknown site type {}", type_code)))?
    };

    let extension = match site.ext {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s,
        Some(other) => other.to_string(),
    };

    Ok(SourceDescriptor {
        name: if site.name.is_empty() { site.key.clone() } else { site.name },
        key: site.key,
        api_spec: site.api,
        extension,
        artifact_ref: jar,
        kind,
        hidden: site.hide.as_ref().and_then(as_int).unwrap_or(0) == 1,
        searchable: site.searchable.as_ref().and_then(as_int).map(|v| v == 1).unwrap_or(true),
        timeout_secs: site
            .timeout
            .as_ref()
            .and_then(as_int)
            .and_then(|t| u64::try_from(t).ok())
            .filter(|t| *t > 0)
            .unwrap_or(DEFAULT_SITE_TIMEOUT),
    })
}

fn as_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}
