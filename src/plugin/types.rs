//! Plugin type definitions
//!
//! This module defines the seams between the loader and whatever actually
//! hosts spider code:
//! - `Spider`: one instantiated spider and its five content methods
//! - `SpiderModule`: an opened plugin artifact that can instantiate spiders
//! - `ModuleOpener`: turns a verified artifact on disk into a module

use crate::core::crypto::Checksum;
use crate::core::error::{InvokeError, LoadError};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Raw JSON text returned by a spider method, `None` when it returned nothing
pub type SpiderResult = std::result::Result<Option<String>, InvokeError>;

/// Methods of the spider contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpiderMethod {
    Init,
    Home,
    Category,
    Detail,
    Play,
    Search,
}

impl SpiderMethod {
    /// Exported method name as spiders know it
    pub fn name(&self) -> &'static str {
        match self {
            SpiderMethod::Init => "init",
            SpiderMethod::Home => "homeContent",
            SpiderMethod::Category => "categoryContent",
            SpiderMethod::Detail => "detailContent",
            SpiderMethod::Play => "playerContent",
            SpiderMethod::Search => "searchContent",
        }
    }
}

impl fmt::Display for SpiderMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An instantiated spider
///
/// Every method defaults to `MissingMethod`, so a spider only implements what
/// it supports. Implementations are not assumed to be reentrant; the loader
/// serializes calls into one instance.
pub trait Spider: Send {
    /// Best-effort initialization with the source's extension string
    fn init(&mut self, _extend: &str) -> std::result::Result<(), InvokeError> {
        Err(InvokeError::MissingMethod(SpiderMethod::Init.name().to_string()))
    }

    fn home_content(&mut self, _filter: bool) -> SpiderResult {
        Err(InvokeError::MissingMethod(SpiderMethod::Home.name().to_string()))
    }

    fn category_content(
        &mut self,
        _tid: &str,
        _page: &str,
        _filter: bool,
        _extend: &BTreeMap<String, String>,
    ) -> SpiderResult {
        Err(InvokeError::MissingMethod(SpiderMethod::Category.name().to_string()))
    }

    fn detail_content(&mut self, _ids: &[String]) -> SpiderResult {
        Err(InvokeError::MissingMethod(SpiderMethod::Detail.name().to_string()))
    }

    fn player_content(&mut self, _flag: &str, _id: &str, _vip_flags: &[String]) -> SpiderResult {
        Err(InvokeError::MissingMethod(SpiderMethod::Play.name().to_string()))
    }

    fn search_content(&mut self, _key: &str, _quick: bool) -> SpiderResult {
        Err(InvokeError::MissingMethod(SpiderMethod::Search.name().to_string()))
    }
}

/// An opened plugin artifact
pub trait SpiderModule: Send + Sync {
    /// Module-wide initializer, run once when the module is first opened
    fn init_module(&self) -> std::result::Result<(), String> {
        Ok(())
    }

    /// Instantiate the spider type `type_name` with its no-argument constructor
    ///
    /// `Ok(None)` means the module has no such type, so the next candidate
    /// name should be tried. `Err` means the type exists but construction failed.
    fn instantiate(&self, type_name: &str) -> std::result::Result<Option<Box<dyn Spider>>, String>;
}

/// Opens verified artifacts as spider modules
pub trait ModuleOpener: Send + Sync {
    fn open(&self, path: &Path) -> std::result::Result<Arc<dyn SpiderModule>, LoadError>;
}

/// A plugin binary available on local disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginArtifact {
    pub source_url: String,
    pub expected_checksum: Option<Checksum>,
    pub local_path: PathBuf,
    /// Whether the local file was checked against `expected_checksum`
    pub verified: bool,
}
