//! Direct API dispatch for CMS-style sources
//!
//! Sources of kind `DirectJson` / `DirectXml` are plain HTTP endpoints. The
//! four listing operations map onto query parameters of the same endpoint.

use crate::core::error::{Result, VodError};
use crate::core::fetch::Fetcher;
use crate::source::descriptor::{SourceDescriptor, SourceKind};
use crate::source::normalize::{normalize_text, HomeContent, VideoItem};
use crate::source::xml::{normalize_xml, xml_home};
use std::collections::BTreeMap;
use std::time::Duration;
use url::Url;

/// A listing request against a CMS endpoint
#[derive(Debug, Clone, Copy)]
pub enum DirectQuery<'a> {
    Home,
    Category {
        tid: &'a str,
        page: u32,
        extend: &'a BTreeMap<String, String>,
    },
    Detail {
        ids: &'a [String],
    },
    Search {
        keyword: &'a str,
    },
}

impl DirectQuery<'_> {
    fn params(&self) -> Vec<(String, String)> {
        let mut params = Vec::new();
        match self {
            DirectQuery::Home => params.push(("ac".to_string(), "list".to_string())),
            DirectQuery::Category { tid, page, extend } => {
                params.push(("ac".to_string(), "videolist".to_string()));
                params.push(("t".to_string(), tid.to_string()));
                params.push(("pg".to_string(), page.max(&1).to_string()));
                params.extend(extend.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
            DirectQuery::Detail { ids } => {
                params.push(("ac".to_string(), "videolist".to_string()));
                params.push(("ids".to_string(), ids.join(",")));
            }
            DirectQuery::Search { keyword } => {
                params.push(("ac".to_string(), "videolist".to_string()));
                params.push(("wd".to_string(), keyword.to_string()));
            }
        }
        params
    }

    /// Full request URL for `api`, keeping any query the api already has
    pub fn url(&self, api: &str) -> String {
        let params = self.params();
        match Url::parse(api.trim()) {
            Ok(mut url) => {
                url.query_pairs_mut().extend_pairs(params.iter());
                url.to_string()
            }
            Err(_) => {
                let encoded: String = url::form_urlencoded::Serializer::new(String::new())
                    .extend_pairs(params.iter())
                    .finish();
                let joiner = if api.contains('?') { '&' } else { '?' };
                format!("{}{}{}", api.trim(), joiner, encoded)
            }
        }
    }
}

/// Normalize a CMS response according to the source's dialect
pub fn normalize_response(kind: SourceKind, body: &str) -> Vec<VideoItem> {
    match kind {
        SourceKind::DirectXml => normalize_xml(body),
        _ => normalize_text(body),
    }
}

/// Run `query` against a direct source
///
/// # Arguments
/// * `fetcher` - transport for the request
/// * `source` - a `DirectJson` or `DirectXml` descriptor
/// * `query` - listing to perform
pub async fn run_query(fetcher: &dyn Fetcher, source: &SourceDescriptor, query: DirectQuery<'_>) -> Result<Vec<VideoItem>> {
    let body = fetch_body(fetcher, source, query).await?;
    Ok(normalize_response(source.kind, &body))
}

/// Home listing of a direct source, with its categories
pub async fn home(fetcher: &dyn Fetcher, source: &SourceDescriptor) -> Result<HomeContent> {
    let body = fetch_body(fetcher, source, DirectQuery::Home).await?;
    Ok(match source.kind {
        SourceKind::DirectXml => xml_home(&body),
        _ => HomeContent::from_text(&body),
    })
}

async fn fetch_body(fetcher: &dyn Fetcher, source: &SourceDescriptor, query: DirectQuery<'_>) -> Result<String> {
    if !source.kind.is_direct() {
        return Err(VodError::Unsupported(format!(
            "source {} is not a direct API source",
            source.key
        )));
    }

    let url = query.url(&source.api_spec);
    tracing::debug!(source = %source.key, url = %url, "Querying direct API");

    let body = fetcher
        .fetch(&url, Duration::from_secs(source.timeout_secs))
        .await
        .map_err(|e| VodError::NetworkError(format!("{}: {}", url, e)))?;

    Ok(String::from_utf8_lossy(&body).into_owned())
}
