//! Source pipeline
//!
//! `SourcePipeline` ties the stages together: fetch, decode, parse, and for
//! each registered source dispatch the content operations either to a CMS
//! endpoint or to a spider loaded from a verified artifact. Failures are
//! contained per source; batch operations skip the sources that fail.

use crate::core::config::Config;
use crate::core::error::{DecodeError, DecodeStage, Result, VodError};
use crate::core::fetch::{Fetcher, HttpFetcher};
use crate::core::url::resolve;
use crate::plugin::artifact::ArtifactManager;
use crate::plugin::loader::{LoadedPlugin, PluginLoader};
use crate::plugin::native::NativeOpener;
use crate::plugin::types::ModuleOpener;
use crate::source::catalog::SiteCatalog;
use crate::source::config::{SourceConfig, SourceConfigParser};
use crate::source::decoder::{DecodedPayload, PayloadDecoder};
use crate::source::descriptor::{SourceDescriptor, SourceKind};
use crate::source::direct::{self, DirectQuery};
use crate::source::normalize::{normalize, HomeContent, VideoItem};
use crate::source::play::PlayResolution;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// A registered source and the catalog-level artifact it may fall back to
#[derive(Debug, Clone)]
struct RegisteredSource {
    descriptor: SourceDescriptor,
    catalog_artifact: Option<String>,
}

/// Results of one source in a fan-out search
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub source_key: String,
    pub source_name: String,
    pub items: Vec<VideoItem>,
}

pub struct SourcePipeline {
    fetcher: Arc<dyn Fetcher>,
    decoder: PayloadDecoder,
    parser: SourceConfigParser,
    artifacts: ArtifactManager,
    loader: PluginLoader,
    vip_flags: Vec<String>,
    default_timeout: Duration,
    max_concurrent: usize,
    sources: RwLock<Vec<RegisteredSource>>,
}

impl SourcePipeline {
    pub fn new(config: &Config, fetcher: Arc<dyn Fetcher>, opener: Arc<dyn ModuleOpener>) -> Self {
        Self {
            decoder: PayloadDecoder::new(),
            parser: SourceConfigParser::new(&config.sources),
            artifacts: ArtifactManager::new(
                config.plugins.cache_dir.clone(),
                fetcher.clone(),
                Duration::from_secs(config.http.request_timeout),
            ),
            loader: PluginLoader::new(opener, config.plugins.entry_prefix.clone()),
            fetcher,
            vip_flags: config.plugins.vip_flags.clone(),
            default_timeout: Duration::from_secs(config.sources.default_timeout),
            max_concurrent: config.sources.max_concurrent_sources.max(1),
            sources: RwLock::new(Vec::new()),
        }
    }

    /// Pipeline over HTTP with native spider modules
    pub fn from_config(config: &Config) -> Result<Self> {
        let fetcher = HttpFetcher::new(&config.http).map_err(|e| VodError::NetworkError(e.to_string()))?;
        Ok(Self::new(config, Arc::new(fetcher), Arc::new(NativeOpener)))
    }

    pub fn artifacts(&self) -> &ArtifactManager {
        &self.artifacts
    }

    pub fn loader(&self) -> &PluginLoader {
        &self.loader
    }

    /// Fetch and decode one payload
    ///
    /// A failed or timed-out fetch is reported as a decode failure at the
    /// fetch stage.
    pub async fn fetch_payload(&self, url: &str, timeout: Duration) -> std::result::Result<DecodedPayload, DecodeError> {
        let raw = self
            .fetcher
            .fetch(url, timeout)
            .await
            .map_err(|e| DecodeError::new(url, DecodeStage::Fetch, e.to_string()))?;
        self.decoder.decode(&raw, url)
    }

    /// Fetch, decode and parse the config behind `url`
    ///
    /// `Ok(None)` means the payload decoded but held no usable config. A
    /// config that does not carry its own URL takes `url`.
    pub async fn fetch_config(&self, url: &str, name_hint: &str) -> Result<Option<SourceConfig>> {
        let payload = self.fetch_payload(url, self.default_timeout).await?;
        Ok(self.parse_config(url, &payload.text, name_hint))
    }

    /// Parse an already decoded payload fetched from `url`
    pub fn parse_config(&self, url: &str, text: &str, name_hint: &str) -> Option<SourceConfig> {
        self.parser
            .parse(text, name_hint)
            .map(|config| {
                if config.url().trim().is_empty() {
                    config.with_url(url)
                } else {
                    config
                }
            })
            .filter(SourceConfig::is_valid)
    }

    /// Fetch configs for many URLs concurrently, keeping input order
    ///
    /// Sources that fail at any stage are logged and left out.
    pub async fn fetch_configs(&self, urls: &[String]) -> Vec<SourceConfig> {
        let results: Vec<(String, Result<Option<SourceConfig>>)> = stream::iter(urls.iter().cloned())
            .map(|url| async move {
                let result = self.fetch_config(&url, &url).await;
                (url, result)
            })
            .buffered(self.max_concurrent)
            .collect()
            .await;

        results
            .into_iter()
            .filter_map(|(url, result)| match result {
                Ok(Some(config)) => Some(config),
                Ok(None) => {
                    tracing::warn!(url = %url, "No usable config in payload");
                    None
                }
                Err(e) => {
                    tracing::warn!(
                        url = %url,
                        error_type = e.error_type(),
                        retryable = e.is_retryable(),
                        error = %e,
                        "Skipping source"
                    );
                    None
                }
            })
            .collect()
    }

    /// Load a site catalog from `url` and register its sources
    ///
    /// Relative artifact references are resolved against `url`. Returns the
    /// number of sources registered.
    pub async fn load_catalog(&self, url: &str) -> Result<usize> {
        let payload = self.fetch_payload(url, self.default_timeout).await?;
        let catalog = SiteCatalog::parse(&payload.text, self.loader.entry_prefix())?;
        Ok(self.register_catalog(url, catalog))
    }

    /// Register the sources of a catalog fetched from `url`
    pub fn register_catalog(&self, url: &str, catalog: SiteCatalog) -> usize {
        let spider = catalog.spider.as_deref().map(|s| resolve_artifact_ref(url, s));
        let mut registered = 0;
        for mut descriptor in catalog.sources {
            descriptor.artifact_ref = descriptor.artifact_ref.map(|a| resolve_artifact_ref(url, &a));
            match self.register(descriptor, spider.clone()) {
                Ok(()) => registered += 1,
                Err(e) => tracing::warn!(url = %url, error = %e, "Skipping catalog source"),
            }
        }

        tracing::info!(url = %url, sources = registered, "Catalog loaded");
        registered
    }

    /// Register a source, replacing any source with the same key
    pub fn register(&self, descriptor: SourceDescriptor, catalog_artifact: Option<String>) -> Result<()> {
        descriptor.validate(catalog_artifact.as_deref())?;

        let mut sources = self
            .sources
            .write()
            .map_err(|e| VodError::ConfigError(format!("source registry poisoned: {}", e)))?;
        let entry = RegisteredSource {
            descriptor,
            catalog_artifact,
        };
        match sources.iter_mut().find(|s| s.descriptor.key == entry.descriptor.key) {
            Some(existing) => *existing = entry,
            None => sources.push(entry),
        }
        Ok(())
    }

    /// Registered sources in registration order
    pub fn sources(&self) -> Vec<SourceDescriptor> {
        self.sources
            .read()
            .map(|s| s.iter().map(|r| r.descriptor.clone()).collect())
            .unwrap_or_default()
    }

    pub async fn home(&self, key: &str) -> Result<HomeContent> {
        let source = self.source(key)?;
        match source.descriptor.kind {
            SourceKind::PluginBacked => {
                let plugin = self.plugin(&source).await?;
                Ok(plugin
                    .home(true)
                    .await
                    .map(|value| HomeContent::from_value(&value))
                    .unwrap_or_default())
            }
            kind if kind.is_direct() => direct::home(self.fetcher.as_ref(), &source.descriptor).await,
            _ => Err(unsupported(&source.descriptor, "home")),
        }
    }

    pub async fn category(
        &self,
        key: &str,
        tid: &str,
        page: u32,
        filter: bool,
        extend: &BTreeMap<String, String>,
    ) -> Result<Vec<VideoItem>> {
        let source = self.source(key)?;
        match source.descriptor.kind {
            SourceKind::PluginBacked => {
                let plugin = self.plugin(&source).await?;
                let value = plugin.category(tid, &page.to_string(), filter, extend).await;
                Ok(value.map(|v| normalize(&v)).unwrap_or_default())
            }
            kind if kind.is_direct() => {
                let query = DirectQuery::Category { tid, page, extend };
                direct::run_query(self.fetcher.as_ref(), &source.descriptor, query).await
            }
            _ => Err(unsupported(&source.descriptor, "category")),
        }
    }

    pub async fn detail(&self, key: &str, ids: &[String]) -> Result<Vec<VideoItem>> {
        let source = self.source(key)?;
        match source.descriptor.kind {
            SourceKind::PluginBacked => {
                let plugin = self.plugin(&source).await?;
                Ok(plugin.detail(ids).await.map(|v| normalize(&v)).unwrap_or_default())
            }
            kind if kind.is_direct() => {
                direct::run_query(self.fetcher.as_ref(), &source.descriptor, DirectQuery::Detail { ids }).await
            }
            _ => Err(unsupported(&source.descriptor, "detail")),
        }
    }

    pub async fn search(&self, key: &str, keyword: &str, quick: bool) -> Result<Vec<VideoItem>> {
        let source = self.source(key)?;
        match source.descriptor.kind {
            SourceKind::PluginBacked => {
                let plugin = self.plugin(&source).await?;
                Ok(plugin.search(keyword, quick).await.map(|v| normalize(&v)).unwrap_or_default())
            }
            kind if kind.is_direct() => {
                let query = DirectQuery::Search { keyword };
                direct::run_query(self.fetcher.as_ref(), &source.descriptor, query).await
            }
            _ => Err(unsupported(&source.descriptor, "search")),
        }
    }

    /// Search every searchable source concurrently
    ///
    /// Failing sources and sources with no results are left out.
    pub async fn search_all(&self, keyword: &str, quick: bool) -> Vec<SearchHit> {
        let searchable: Vec<SourceDescriptor> = self
            .sources()
            .into_iter()
            .filter(|s| s.searchable && (s.kind.is_direct() || s.kind == SourceKind::PluginBacked))
            .collect();

        stream::iter(searchable)
            .map(|source| async move {
                match self.search(&source.key, keyword, quick).await {
                    Ok(items) => Some(SearchHit {
                        source_key: source.key,
                        source_name: source.name,
                        items,
                    }),
                    Err(e) => {
                        tracing::warn!(
                            source = %source.key,
                            error_type = e.error_type(),
                            retryable = e.is_retryable(),
                            error = %e,
                            "Search failed"
                        );
                        None
                    }
                }
            })
            .buffer_unordered(self.max_concurrent)
            .filter_map(|hit| async move { hit.filter(|h| !h.items.is_empty()) })
            .collect()
            .await
    }

    /// Resolve a playable address for an episode of `key`
    ///
    /// Plugin sources ask their spider; when it answers nothing usable, and
    /// for every other kind, the episode URL itself is classified.
    pub async fn resolve_play(&self, key: &str, flag: &str, episode_url: &str) -> Result<Option<PlayResolution>> {
        let source = self.source(key)?;
        if source.descriptor.kind == SourceKind::PluginBacked {
            let plugin = self.plugin(&source).await?;
            if let Some(resolution) = plugin
                .play(flag, episode_url, &self.vip_flags)
                .await
                .and_then(|value| PlayResolution::from_play_json(&value))
            {
                return Ok(Some(resolution));
            }
            tracing::debug!(source = %key, flag = %flag, "Spider gave no play result, classifying episode URL");
        }
        Ok(PlayResolution::from_episode_url(episode_url))
    }

    fn source(&self, key: &str) -> Result<RegisteredSource> {
        self.sources
            .read()
            .map_err(|e| VodError::ConfigError(format!("source registry poisoned: {}", e)))?
            .iter()
            .find(|s| s.descriptor.key == key)
            .cloned()
            .ok_or_else(|| VodError::SourceNotFound(key.to_string()))
    }

    /// Spider instance serving a plugin-backed source
    async fn plugin(&self, source: &RegisteredSource) -> Result<Arc<LoadedPlugin>> {
        let descriptor = &source.descriptor;
        let artifact_ref = descriptor
            .resolve_artifact(source.catalog_artifact.as_deref())
            .ok_or_else(|| VodError::ConfigError(format!("source {} has no artifact", descriptor.key)))?;
        let entry = descriptor
            .entry_name(self.loader.entry_prefix())
            .ok_or_else(|| unsupported(descriptor, "script spider"))?;

        let artifact = self.artifacts.ensure_local(artifact_ref).await?;
        let extend = Some(descriptor.extension.as_str()).filter(|e| !e.trim().is_empty());
        Ok(self.loader.load(&artifact, entry, extend).await?)
    }
}

fn unsupported(descriptor: &SourceDescriptor, operation: &str) -> VodError {
    VodError::Unsupported(format!(
        "{} is not available for source {} ({:?})",
        operation, descriptor.key, descriptor.kind
    ))
}

/// Resolve the URL part of an artifact reference against the catalog URL
fn resolve_artifact_ref(base: &str, artifact_ref: &str) -> String {
    match artifact_ref.split_once(';') {
        Some((url, rest)) => format!("{};{}", resolve(base, url.trim()), rest),
        None => resolve(base, artifact_ref.trim()),
    }
}
