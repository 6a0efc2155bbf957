//! Loaders turn files into representations.
//!
//! Each loader owns a set of file extensions and converts one file into
//! zero or more [`Representation`]s. A loader returning an empty list is
//! a silent skip (file too large, empty, nothing indexable); returning an
//! error marks the file failed without stopping ingestion.
//!
//! The registry dispatches on the lowercased file extension. Files with
//! no extension fall back to the plain-text loader; files with an
//! extension no loader claims are skipped by the pipeline.

pub mod code;
pub mod tabular;
pub mod text;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::config::Config;
use crate::error::SemangoResult;
use crate::types::Representation;

/// Capability of turning one file into representations.
pub trait Loader: Send + Sync {
    /// Loader name, recorded in each representation's `source` meta.
    fn name(&self) -> &'static str;

    /// File extensions (lowercase, no dot) this loader claims.
    fn extensions(&self) -> &'static [&'static str];

    /// Load a file into representations.
    ///
    /// `rel` is the root-relative path (forward slashes) used for chunk
    /// identity; `abs` is the on-disk location to read.
    fn load(&self, rel: &str, abs: &Path) -> SemangoResult<Vec<Representation>>;
}

/// Extension-keyed loader dispatch.
pub struct LoaderRegistry {
    by_extension: HashMap<&'static str, Arc<dyn Loader>>,
    fallback: Option<Arc<dyn Loader>>,
}

impl LoaderRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            by_extension: HashMap::new(),
            fallback: None,
        }
    }

    /// Registry with the standard loader set wired from `config`.
    pub fn with_defaults(config: &Config) -> Self {
        let mut registry = Self::new();
        let text = Arc::new(text::TextLoader::new(
            config.files.chunk_size,
            config.files.chunk_overlap,
        ));
        registry.register(text.clone());
        registry.set_fallback(text);
        registry.register(Arc::new(code::CodeLoader::new()));
        registry.register(Arc::new(tabular::TabularLoader::new(config.tabular.clone())));
        registry
    }

    /// Register a loader for all of its extensions.
    pub fn register(&mut self, loader: Arc<dyn Loader>) {
        for ext in loader.extensions() {
            self.by_extension.insert(ext, loader.clone());
        }
    }

    /// Set the loader used for files without an extension.
    pub fn set_fallback(&mut self, loader: Arc<dyn Loader>) {
        self.fallback = Some(loader);
    }

    /// Resolve the loader for a root-relative path, if any.
    pub fn resolve(&self, rel: &str) -> Option<Arc<dyn Loader>> {
        match extension_of(rel) {
            Some(ext) => self.by_extension.get(ext.as_str()).cloned(),
            None => self.fallback.clone(),
        }
    }
}

impl Default for LoaderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Lowercased extension of a forward-slash relative path.
fn extension_of(rel: &str) -> Option<String> {
    let name = rel.rsplit('/').next().unwrap_or(rel);
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() {
        // Dotfiles like `.gitignore` have no extension.
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    struct Probe;

    impl Loader for Probe {
        fn name(&self) -> &'static str {
            "probe"
        }
        fn extensions(&self) -> &'static [&'static str] {
            &["abc"]
        }
        fn load(&self, _rel: &str, _abs: &Path) -> SemangoResult<Vec<Representation>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of("a/b/c.TXT"), Some("txt".into()));
        assert_eq!(extension_of("README"), None);
        assert_eq!(extension_of(".gitignore"), None);
        assert_eq!(extension_of("archive.tar.gz"), Some("gz".into()));
    }

    #[test]
    fn test_registry_dispatch_and_fallback() {
        let mut registry = LoaderRegistry::new();
        let probe = Arc::new(Probe);
        registry.register(probe.clone());
        assert!(registry.resolve("x.abc").is_some());
        assert!(registry.resolve("x.def").is_none());
        assert!(registry.resolve("README").is_none());
        registry.set_fallback(probe);
        assert!(registry.resolve("README").is_some());
    }

    #[test]
    fn test_default_registry_covers_known_formats() {
        let config = Config::defaults(Path::new("."));
        let registry = LoaderRegistry::with_defaults(&config);
        for path in [
            "a.txt", "a.md", "a.rs", "a.py", "a.csv", "a.tsv", "a.json", "a.jsonl", "a.xlsx",
            "a.parquet", "a.sqlite",
        ] {
            assert!(registry.resolve(path).is_some(), "no loader for {path}");
        }
    }
}
