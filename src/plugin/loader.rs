//! Spider loading and invocation
//!
//! The loader owns every opened module and every spider instance. Instances
//! are cached by `(artifact path, entry name)` for the life of the loader and
//! handed out as `Arc<LoadedPlugin>`.

use crate::core::error::{InvokeError, LoadError};
use crate::plugin::candidates::entry_candidates;
use crate::plugin::types::{ModuleOpener, PluginArtifact, Spider, SpiderMethod, SpiderModule, SpiderResult};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;

type InstanceKey = (PathBuf, String);

/// A spider instance ready for the five content operations
///
/// Calls into one instance are serialized; spider code is not assumed to be
/// reentrant.
pub struct LoadedPlugin {
    pub entry_name: String,
    /// Type name the entry resolved to
    pub type_name: String,
    pub artifact_path: PathBuf,
    /// Keeps the backing module alive as long as the instance
    _module: Arc<dyn SpiderModule>,
    instance: Arc<Mutex<Box<dyn Spider>>>,
}

impl std::fmt::Debug for LoadedPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedPlugin")
            .field("entry_name", &self.entry_name)
            .field("type_name", &self.type_name)
            .field("artifact_path", &self.artifact_path)
            .finish()
    }
}

impl LoadedPlugin {
    pub async fn home(&self, filter: bool) -> Option<Value> {
        self.call(SpiderMethod::Home, move |s| s.home_content(filter)).await
    }

    pub async fn category(&self, tid: &str, page: &str, filter: bool, extend: &BTreeMap<String, String>) -> Option<Value> {
        let (tid, page, extend) = (tid.to_string(), page.to_string(), extend.clone());
        self.call(SpiderMethod::Category, move |s| {
            s.category_content(&tid, &page, filter, &extend)
        })
        .await
    }

    pub async fn detail(&self, ids: &[String]) -> Option<Value> {
        let ids = ids.to_vec();
        self.call(SpiderMethod::Detail, move |s| s.detail_content(&ids)).await
    }

    pub async fn play(&self, flag: &str, id: &str, vip_flags: &[String]) -> Option<Value> {
        let (flag, id, vip_flags) = (flag.to_string(), id.to_string(), vip_flags.to_vec());
        self.call(SpiderMethod::Play, move |s| s.player_content(&flag, &id, &vip_flags))
            .await
    }

    pub async fn search(&self, key: &str, quick: bool) -> Option<Value> {
        let key = key.to_string();
        self.call(SpiderMethod::Search, move |s| s.search_content(&key, quick)).await
    }

    /// Run one spider method on the blocking pool
    ///
    /// Every failure is logged and becomes `None`.
    async fn call<F>(&self, method: SpiderMethod, f: F) -> Option<Value>
    where
        F: FnOnce(&mut dyn Spider) -> SpiderResult + Send + 'static,
    {
        let instance = self.instance.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            let mut spider = match instance.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            catch_unwind(AssertUnwindSafe(|| f(spider.as_mut())))
                .unwrap_or_else(|_| Err(InvokeError::Panicked(method.name().to_string())))
        })
        .await;

        let result = match outcome {
            Ok(result) => result,
            Err(e) => Err(InvokeError::Failed {
                method: method.name().to_string(),
                reason: e.to_string(),
            }),
        };

        match result.and_then(|text| parse_result(method, text)) {
            Ok(value) => value,
            Err(InvokeError::MissingMethod(_)) => {
                tracing::debug!(entry = %self.entry_name, method = %method, "Spider does not implement method");
                None
            }
            Err(e) => {
                tracing::warn!(entry = %self.entry_name, method = %method, error = %e, "Spider call failed");
                None
            }
        }
    }
}

fn parse_result(method: SpiderMethod, text: Option<String>) -> Result<Option<Value>, InvokeError> {
    let Some(text) = text.filter(|t| !t.trim().is_empty()) else {
        return Ok(None);
    };
    serde_json::from_str(&text)
        .map(Some)
        .map_err(|e| InvokeError::InvalidResult {
            method: method.name().to_string(),
            reason: e.to_string(),
        })
}

/// Loads spiders from verified artifacts and caches the instances
pub struct PluginLoader {
    opener: Arc<dyn ModuleOpener>,
    entry_prefix: String,
    modules: tokio::sync::Mutex<HashMap<PathBuf, Arc<dyn SpiderModule>>>,
    instances: Mutex<HashMap<InstanceKey, Arc<OnceCell<Arc<LoadedPlugin>>>>>,
}

impl PluginLoader {
    pub fn new(opener: Arc<dyn ModuleOpener>, entry_prefix: impl Into<String>) -> Self {
        Self {
            opener,
            entry_prefix: entry_prefix.into(),
            modules: tokio::sync::Mutex::new(HashMap::new()),
            instances: Mutex::new(HashMap::new()),
        }
    }

    pub fn entry_prefix(&self) -> &str {
        &self.entry_prefix
    }

    /// Load `entry_name` from `artifact`, reusing a cached instance
    ///
    /// The first load of a key instantiates and initializes the spider; a
    /// repeat load returns the same instance with no further side effects.
    pub async fn load(
        &self,
        artifact: &PluginArtifact,
        entry_name: &str,
        extend: Option<&str>,
    ) -> Result<Arc<LoadedPlugin>, LoadError> {
        let key = (artifact.local_path.clone(), entry_name.trim().to_string());
        let cell = {
            let mut instances = match self.instances.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            instances.entry(key).or_default().clone()
        };

        cell.get_or_try_init(|| self.instantiate(&artifact.local_path, entry_name.trim(), extend))
            .await
            .cloned()
    }

    /// Number of cached instances
    pub fn loaded_count(&self) -> usize {
        self.instances
            .lock()
            .map(|m| m.values().filter(|c| c.initialized()).count())
            .unwrap_or(0)
    }

    async fn instantiate(&self, path: &Path, entry_name: &str, extend: Option<&str>) -> Result<Arc<LoadedPlugin>, LoadError> {
        let module = self.module(path).await?;
        let candidates = entry_candidates(entry_name, &self.entry_prefix);
        tracing::debug!(entry = %entry_name, candidates = ?candidates, "Resolving spider entry");

        let entry = entry_name.to_string();
        let extend = extend.unwrap_or_default().to_string();
        let blocking_module = module.clone();

        let (type_name, spider) = tokio::task::spawn_blocking(move || {
            let (type_name, mut spider) = resolve_entry(blocking_module.as_ref(), &entry, candidates)?;
            init_spider(spider.as_mut(), &entry, &extend);
            Ok::<_, LoadError>((type_name, spider))
        })
        .await
        .map_err(|e| LoadError::InstantiationFailed {
            entry: entry_name.to_string(),
            reason: e.to_string(),
        })??;

        tracing::info!(entry = %entry_name, type_name = %type_name, path = ?path, "Spider loaded");

        Ok(Arc::new(LoadedPlugin {
            entry_name: entry_name.to_string(),
            type_name,
            artifact_path: path.to_path_buf(),
            _module: module,
            instance: Arc::new(Mutex::new(spider)),
        }))
    }

    /// Open a module once per path, running its module initializer on first open
    async fn module(&self, path: &Path) -> Result<Arc<dyn SpiderModule>, LoadError> {
        let mut modules = self.modules.lock().await;
        if let Some(module) = modules.get(path) {
            return Ok(module.clone());
        }

        let opener = self.opener.clone();
        let owned = path.to_path_buf();
        let module = tokio::task::spawn_blocking(move || {
            let module = opener.open(&owned)?;
            match catch_unwind(AssertUnwindSafe(|| module.init_module())) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(path = ?owned, error = %e, "Module initializer failed"),
                Err(_) => tracing::warn!(path = ?owned, "Module initializer panicked"),
            }
            Ok::<_, LoadError>(module)
        })
        .await
        .map_err(|e| LoadError::ModuleOpen {
            path: path.display().to_string(),
            reason: e.to_string(),
        })??;

        modules.insert(path.to_path_buf(), module.clone());
        Ok(module)
    }
}

/// Try candidates in order, stopping at the first type the module knows
fn resolve_entry(
    module: &dyn SpiderModule,
    entry: &str,
    candidates: Vec<String>,
) -> Result<(String, Box<dyn Spider>), LoadError> {
    for candidate in &candidates {
        let attempt = catch_unwind(AssertUnwindSafe(|| module.instantiate(candidate)))
            .unwrap_or_else(|_| Err("constructor panicked".to_string()));
        match attempt {
            Ok(Some(spider)) => return Ok((candidate.clone(), spider)),
            Ok(None) => tracing::trace!(entry = %entry, candidate = %candidate, "Candidate not present"),
            Err(reason) => {
                return Err(LoadError::InstantiationFailed {
                    entry: candidate.clone(),
                    reason,
                })
            }
        }
    }

    Err(LoadError::EntryNotFound {
        entry: entry.to_string(),
        candidates,
    })
}

/// Best-effort `init`; failures leave the instance usable
fn init_spider(spider: &mut dyn Spider, entry: &str, extend: &str) {
    match catch_unwind(AssertUnwindSafe(|| spider.init(extend))) {
        Ok(Ok(())) => tracing::debug!(entry = %entry, "Spider initialized"),
        Ok(Err(InvokeError::MissingMethod(_))) => tracing::debug!(entry = %entry, "Spider has no init"),
        Ok(Err(e)) => tracing::warn!(entry = %entry, error = %e, "Spider init failed, continuing with defaults"),
        Err(_) => tracing::warn!(entry = %entry, "Spider init panicked, continuing with defaults"),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counters shared by every fake spider of a module
    #[derive(Default)]
    pub(crate) struct Counters {
        pub(crate) module_inits: AtomicUsize,
        pub(crate) constructed: AtomicUsize,
        pub(crate) inits: AtomicUsize,
        pub(crate) opens: AtomicUsize,
    }

    pub(crate) struct FakeSpider {
        counters: Arc<Counters>,
        fail_init: bool,
        extend: String,
    }

    impl Spider for FakeSpider {
        fn init(&mut self, extend: &str) -> std::result::Result<(), InvokeError> {
            self.counters.inits.fetch_add(1, Ordering::SeqCst);
            self.extend = extend.to_string();
            if self.fail_init {
                return Err(InvokeError::Failed {
                    method: "init".into(),
                    reason: "no token".into(),
                });
            }
            Ok(())
        }

        fn home_content(&mut self, _filter: bool) -> SpiderResult {
            Ok(Some(format!(
                r#"{{"class":[{{"type_id":"1","type_name":"Movie"}}],"list":[{{"vod_id":"h1","vod_name":"Home {}"}}]}}"#,
                self.extend
            )))
        }

        fn detail_content(&mut self, ids: &[String]) -> SpiderResult {
            if ids.first().map(String::as_str) == Some("garbage") {
                return Ok(Some("<html>".to_string()));
            }
            Ok(Some(
                serde_json::json!({"list": [{
                    "vod_id": ids.join(","),
                    "vod_name": "Detail",
                    "vod_play_from": "line1",
                    "vod_play_url": "ep1#http://cdn/1.m3u8$ep2#http://site/play/2"
                }]})
                .to_string(),
            ))
        }

        fn player_content(&mut self, flag: &str, id: &str, vip_flags: &[String]) -> SpiderResult {
            let parse = i32::from(vip_flags.iter().any(|f| f == flag) || !id.ends_with(".m3u8"));
            Ok(Some(
                serde_json::json!({"parse": parse, "url": id, "header": {"referer": "http://site/"}}).to_string(),
            ))
        }

        fn search_content(&mut self, key: &str, _quick: bool) -> SpiderResult {
            if key == "boom" {
                panic!("spider bug");
            }
            Ok(Some(format!(r#"{{"list":[{{"vod_id":"s1","vod_name":"{}"}}]}}"#, key)))
        }
    }

    /// In-memory module exposing spiders under fixed type names
    pub(crate) struct FakeModule {
        types: Vec<String>,
        counters: Arc<Counters>,
    }

    impl SpiderModule for FakeModule {
        fn init_module(&self) -> std::result::Result<(), String> {
            self.counters.module_inits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn instantiate(&self, type_name: &str) -> std::result::Result<Option<Box<dyn Spider>>, String> {
            if type_name.ends_with("Broken") {
                return Err("constructor threw".to_string());
            }
            if !self.types.iter().any(|t| t == type_name) {
                return Ok(None);
            }
            self.counters.constructed.fetch_add(1, Ordering::SeqCst);
            Ok(Some(Box::new(FakeSpider {
                counters: self.counters.clone(),
                fail_init: type_name.ends_with("Grumpy"),
                extend: String::new(),
            })))
        }
    }

    /// Opener handing out one fake module for every path
    pub(crate) struct FakeOpener {
        module: Arc<FakeModule>,
        pub(crate) counters: Arc<Counters>,
    }

    impl FakeOpener {
        pub(crate) fn new(types: &[&str]) -> Self {
            let counters = Arc::new(Counters::default());
            Self {
                module: Arc::new(FakeModule {
                    types: types.iter().map(|t| t.to_string()).collect(),
                    counters: counters.clone(),
                }),
                counters,
            }
        }
    }

    impl ModuleOpener for FakeOpener {
        fn open(&self, _path: &Path) -> std::result::Result<Arc<dyn SpiderModule>, LoadError> {
            self.counters.opens.fetch_add(1, Ordering::SeqCst);
            Ok(self.module.clone())
        }
    }

    fn artifact(path: &str) -> PluginArtifact {
        PluginArtifact {
            source_url: "http://x/spider.so".to_string(),
            expected_checksum: None,
            local_path: PathBuf::from(path),
            verified: false,
        }
    }

    fn loader(types: &[&str]) -> (PluginLoader, Arc<Counters>) {
        let opener = FakeOpener::new(types);
        let counters = opener.counters.clone();
        (PluginLoader::new(Arc::new(opener), "csp_"), counters)
    }

    #[tokio::test]
    async fn test_load_is_cached_and_inits_once() {
        let (loader, counters) = loader(&["com.github.catvod.spider.Douban"]);
        let a = artifact("/tmp/spider_a.so");

        let first = loader.load(&a, "csp_Douban", Some("ext")).await.unwrap();
        let second = loader.load(&a, "csp_Douban", Some("other")).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.type_name, "com.github.catvod.spider.Douban");
        assert_eq!(counters.constructed.load(Ordering::SeqCst), 1);
        assert_eq!(counters.inits.load(Ordering::SeqCst), 1);
        assert_eq!(counters.module_inits.load(Ordering::SeqCst), 1);
        assert_eq!(loader.loaded_count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_loads_instantiate_once() {
        let (loader, counters) = loader(&["com.github.catvod.spider.Douban"]);
        let a = artifact("/tmp/spider_a.so");

        let (x, y) = tokio::join!(
            loader.load(&a, "csp_Douban", None),
            loader.load(&a, "csp_Douban", None)
        );
        assert!(Arc::ptr_eq(&x.unwrap(), &y.unwrap()));
        assert_eq!(counters.constructed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_module_opened_once_per_path() {
        let (loader, counters) = loader(&["com.github.catvod.spider.A", "com.github.catvod.spider.B"]);
        let a = artifact("/tmp/spider_a.so");
        loader.load(&a, "csp_A", None).await.unwrap();
        loader.load(&a, "csp_B", None).await.unwrap();
        loader.load(&artifact("/tmp/spider_b.so"), "csp_A", None).await.unwrap();

        assert_eq!(counters.opens.load(Ordering::SeqCst), 2);
        assert_eq!(counters.module_inits.load(Ordering::SeqCst), 2);
        assert_eq!(loader.loaded_count(), 3);
    }

    #[tokio::test]
    async fn test_legacy_candidate_fallback() {
        let (loader, _) = loader(&["com.catvod.spider.Old"]);
        let plugin = loader.load(&artifact("/tmp/s.so"), "csp_Old", None).await.unwrap();
        assert_eq!(plugin.type_name, "com.catvod.spider.Old");
    }

    #[tokio::test]
    async fn test_entry_not_found_lists_candidates() {
        let (loader, _) = loader(&[]);
        let err = loader.load(&artifact("/tmp/s.so"), "csp_Ghost", None).await.unwrap_err();
        match err {
            LoadError::EntryNotFound { entry, candidates } => {
                assert_eq!(entry, "csp_Ghost");
                assert_eq!(candidates.len(), 5);
                assert_eq!(candidates[0], "com.github.catvod.spider.Ghost");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(loader.loaded_count(), 0);
    }

    #[tokio::test]
    async fn test_constructor_failure() {
        let (loader, _) = loader(&[]);
        let err = loader.load(&artifact("/tmp/s.so"), "csp_Broken", None).await.unwrap_err();
        assert!(matches!(err, LoadError::InstantiationFailed { .. }));
    }

    #[tokio::test]
    async fn test_failed_init_keeps_instance_usable() {
        let (loader, counters) = loader(&["com.github.catvod.spider.Grumpy"]);
        let plugin = loader.load(&artifact("/tmp/s.so"), "csp_Grumpy", None).await.unwrap();
        assert_eq!(counters.inits.load(Ordering::SeqCst), 1);
        assert!(plugin.home(false).await.is_some());
    }

    #[tokio::test]
    async fn test_invoke_failures_become_none() {
        let (loader, _) = loader(&["com.github.catvod.spider.Douban"]);
        let plugin = loader.load(&artifact("/tmp/s.so"), "csp_Douban", Some("k")).await.unwrap();

        let home = plugin.home(true).await.unwrap();
        assert_eq!(home["list"][0]["vod_name"], "Home k");

        assert!(plugin.category("1", "1", false, &BTreeMap::new()).await.is_none());
        assert!(plugin.detail(&["garbage".to_string()]).await.is_none());
        assert!(plugin.search("boom", false).await.is_none());

        let found = plugin.search("after", true).await.unwrap();
        assert_eq!(found["list"][0]["vod_name"], "after");
    }
}
