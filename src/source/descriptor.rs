//! Source descriptors

use crate::core::error::{Result, VodError};

/// How a source is served
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    /// CMS endpoint answering JSON
    DirectJson,
    /// CMS endpoint answering XML
    DirectXml,
    /// Live channel list
    Live,
    /// Served by a spider loaded from a plugin artifact
    PluginBacked,
    /// Served through an extension config
    ExtConfig,
}

impl SourceKind {
    /// Map a catalog site `type` code
    pub fn from_site_type(code: i64) -> Option<Self> {
        match code {
            0 => Some(SourceKind::DirectXml),
            1 => Some(SourceKind::DirectJson),
            2 => Some(SourceKind::Live),
            3 => Some(SourceKind::PluginBacked),
            4 => Some(SourceKind::ExtConfig),
            _ => None,
        }
    }

    pub fn is_direct(&self) -> bool {
        matches!(self, SourceKind::DirectJson | SourceKind::DirectXml)
    }
}

/// One video source as declared by a catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDescriptor {
    pub key: String,
    pub name: String,
    /// Endpoint URL, inline script, or spider entry name
    pub api_spec: String,
    /// Free-form extension passed to the spider's `init`
    pub extension: String,
    /// `<url>[;<unused>;<checksum>]` of the spider artifact
    pub artifact_ref: Option<String>,
    pub kind: SourceKind,
    pub hidden: bool,
    pub searchable: bool,
    pub timeout_secs: u64,
}

impl SourceDescriptor {
    pub fn new(key: impl Into<String>, name: impl Into<String>, api_spec: impl Into<String>, kind: SourceKind) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
            api_spec: api_spec.into(),
            extension: String::new(),
            artifact_ref: None,
            kind,
            hidden: false,
            searchable: true,
            timeout_secs: 30,
        }
    }

    pub fn with_artifact(mut self, artifact_ref: impl Into<String>) -> Self {
        self.artifact_ref = Some(artifact_ref.into());
        self
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    /// Spider entry name carried by `api_spec`
    ///
    /// Prefixed names always qualify. An unprefixed identifier only counts
    /// when the source brings its own artifact.
    pub fn entry_name(&self, entry_prefix: &str) -> Option<&str> {
        let api = self.api_spec.trim();
        if api.starts_with(entry_prefix) {
            return Some(api);
        }
        let has_own_artifact = self.artifact_ref.as_deref().is_some_and(|a| !a.trim().is_empty());
        let is_identifier = !api.is_empty()
            && api.len() < 100
            && api.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
            && !api.starts_with(|c: char| c.is_ascii_digit());
        (has_own_artifact && is_identifier).then_some(api)
    }

    /// Artifact to load this source's spider from, falling back to the catalog's
    pub fn resolve_artifact<'a>(&'a self, catalog_artifact: Option<&'a str>) -> Option<&'a str> {
        self.artifact_ref
            .as_deref()
            .filter(|a| !a.trim().is_empty())
            .or_else(|| catalog_artifact.filter(|a| !a.trim().is_empty()))
    }

    /// Check the descriptor can be served
    ///
    /// A plugin-backed source needs an artifact of its own or one bundled
    /// with its catalog.
    pub fn validate(&self, catalog_artifact: Option<&str>) -> Result<()> {
        if self.key.trim().is_empty() {
            return Err(VodError::ParseError("source key is empty".to_string()));
        }
        if self.kind == SourceKind::PluginBacked && self.resolve_artifact(catalog_artifact).is_none() {
            return Err(VodError::ParseError(format!(
                "plugin source {} has no artifact",
                self.key
            )));
        }
        if self.kind.is_direct() && self.api_spec.trim().is_empty() {
            return Err(VodError::ParseError(format!("source {} has no api", self.key)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_site_type_mapping() {
        assert_eq!(SourceKind::from_site_type(0), Some(SourceKind::DirectXml));
        assert_eq!(SourceKind::from_site_type(1), Some(SourceKind::DirectJson));
        assert_eq!(SourceKind::from_site_type(3), Some(SourceKind::PluginBacked));
        assert_eq!(SourceKind::from_site_type(9), None);
    }

    #[test]
    fn test_entry_name() {
        let prefixed = SourceDescriptor::new("a", "A", "csp_Douban", SourceKind::PluginBacked);
        assert_eq!(prefixed.entry_name("csp_"), Some("csp_Douban"));

        let bare = SourceDescriptor::new("b", "B", "Douban", SourceKind::PluginBacked);
        assert_eq!(bare.entry_name("csp_"), None);
        let bare = bare.with_artifact("http://x/own.so");
        assert_eq!(bare.entry_name("csp_"), Some("Douban"));

        let url = SourceDescriptor::new("c", "C", "http://api/x", SourceKind::DirectJson).with_artifact("http://x/a.so");
        assert_eq!(url.entry_name("csp_"), None);
    }

    #[test]
    fn test_plugin_source_needs_artifact() {
        let desc = SourceDescriptor::new("a", "A", "csp_Foo", SourceKind::PluginBacked);
        assert!(desc.validate(None).is_err());
        assert!(desc.validate(Some("  ")).is_err());
        assert!(desc.validate(Some("http://x/spider.so")).is_ok());
        assert!(desc.with_artifact("http://x/own.so").validate(None).is_ok());
    }

    #[test]
    fn test_resolve_artifact_prefers_own() {
        let desc = SourceDescriptor::new("a", "A", "csp_Foo", SourceKind::PluginBacked).with_artifact("own");
        assert_eq!(desc.resolve_artifact(Some("shared")), Some("own"));
    }
}
