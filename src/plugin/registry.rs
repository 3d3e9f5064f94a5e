//! Algorithm registry: name -> factory.
//!
//! Built-in algorithms are registered at startup. `*.plugin.json` manifests
//! found on the plugin search path add named variants of a built-in with
//! preset parameters:
//!
//! ```json
//! { "name": "manual-static", "base": "manual",
//!   "params": { "carry_forward": { "Bool": false } } }
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use log::{debug, info, warn};
use serde::Deserialize;

use super::manual::{MANUAL_TRACKER, ManualTracker};
use super::{AlgorithmError, AlgorithmPlugin};
use crate::entities::Attrs;

/// Builds a plugin instance from its registered name and parameters.
pub type PluginFactory = Arc<dyn Fn(&str, &Attrs) -> Box<dyn AlgorithmPlugin> + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub enum PluginOrigin {
    Builtin,
    Manifest(PathBuf),
}

impl fmt::Display for PluginOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PluginOrigin::Builtin => write!(f, "built-in"),
            PluginOrigin::Manifest(p) => write!(f, "{}", p.display()),
        }
    }
}

#[derive(Clone)]
struct Entry {
    factory: PluginFactory,
    params: Attrs,
    origin: PluginOrigin,
}

#[derive(Debug, Deserialize)]
struct PluginManifest {
    name: String,
    base: String,
    #[serde(default)]
    params: Attrs,
}

#[derive(Clone, Default)]
pub struct PluginRegistry {
    entries: IndexMap<String, Entry>,
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("names", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every compiled-in algorithm
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(
            MANUAL_TRACKER,
            Arc::new(|name: &str, params: &Attrs| Box::new(ManualTracker::new(name, params)) as Box<dyn AlgorithmPlugin>),
        );
        registry
    }

    /// Register (or replace) a built-in factory.
    pub fn register(&mut self, name: &str, factory: PluginFactory) {
        self.insert(name, factory, Attrs::new(), PluginOrigin::Builtin);
    }

    fn insert(&mut self, name: &str, factory: PluginFactory, params: Attrs, origin: PluginOrigin) {
        if let Some(old) = self.entries.get(name) {
            warn!("Algorithm '{}' from {} replaces the one from {}", name, origin, old.origin);
        }
        self.entries.insert(name.to_string(), Entry { factory, params, origin });
    }

    /// Scan every directory for manifests. Returns how many were registered.
    pub fn discover(&mut self, dirs: &[PathBuf]) -> usize {
        dirs.iter().map(|d| self.scan_dir(d)).sum()
    }

    /// Register manifests in `dir`. Bad manifests are logged and skipped.
    pub fn scan_dir(&mut self, dir: &Path) -> usize {
        if !dir.is_dir() {
            debug!("Plugin dir {} does not exist", dir.display());
            return 0;
        }
        let pattern = dir.join("*.plugin.json");
        let Some(pattern) = pattern.to_str() else {
            warn!("Skipping non UTF-8 plugin dir {}", dir.display());
            return 0;
        };
        let mut paths: Vec<PathBuf> = match glob::glob(pattern) {
            Ok(entries) => entries.filter_map(Result::ok).collect(),
            Err(e) => {
                warn!("Bad plugin pattern {}: {}", pattern, e);
                return 0;
            }
        };
        paths.sort();

        let mut count = 0;
        for path in paths {
            match self.register_manifest(&path) {
                Ok(name) => {
                    info!("Registered algorithm '{}' from {}", name, path.display());
                    count += 1;
                }
                Err(e) => warn!("Skipping plugin manifest {}: {}", path.display(), e),
            }
        }
        count
    }

    fn register_manifest(&mut self, path: &Path) -> Result<String, String> {
        let json = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
        let manifest: PluginManifest = serde_json::from_str(&json).map_err(|e| e.to_string())?;
        let base = self
            .entries
            .get(&manifest.base)
            .ok_or_else(|| format!("unknown base algorithm '{}'", manifest.base))?;

        let mut params = base.params.clone();
        params.merge(&manifest.params);
        let factory = Arc::clone(&base.factory);
        self.insert(&manifest.name, factory, params, PluginOrigin::Manifest(path.to_path_buf()));
        Ok(manifest.name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn origin(&self, name: &str) -> Option<&PluginOrigin> {
        self.entries.get(name).map(|e| &e.origin)
    }

    /// Instantiate `name` with its registered params.
    pub fn create(&self, name: &str) -> Result<Box<dyn AlgorithmPlugin>, AlgorithmError> {
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| AlgorithmError::Unknown(name.to_string()))?;
        Ok((entry.factory)(name, &entry.params))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_builtins() {
        let registry = PluginRegistry::with_builtins();
        assert_eq!(registry.names(), vec!["manual"]);
        assert_eq!(registry.create("manual").unwrap().name(), "manual");
        assert!(matches!(registry.create("nope"), Err(AlgorithmError::Unknown(_))));
    }

    #[test]
    fn test_manifest_variants() {
        let dir = std::env::temp_dir().join("trackplay_test_plugins");
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("static.plugin.json"),
            r#"{ "name": "manual-static", "base": "manual", "params": { "carry_forward": { "Bool": false } } }"#,
        )
        .unwrap();
        fs::write(dir.join("broken.plugin.json"), "{ nope").unwrap();
        fs::write(dir.join("orphan.plugin.json"), r#"{ "name": "x", "base": "missing" }"#).unwrap();
        fs::write(dir.join("ignored.json"), r#"{ "name": "y", "base": "manual" }"#).unwrap();

        let mut registry = PluginRegistry::with_builtins();
        let found = registry.discover(&[dir.clone(), dir.join("absent")]);
        assert_eq!(found, 1);
        assert_eq!(registry.names(), vec!["manual", "manual-static"]);
        assert!(matches!(registry.origin("manual-static"), Some(PluginOrigin::Manifest(_))));

        let plugin = registry.create("manual-static").unwrap();
        assert_eq!(plugin.name(), "manual-static");
        let params = plugin.params_panel().unwrap();
        assert!(params.controls.iter().any(|c| c.id == "carry_forward"
            && c.kind == super::super::ControlKind::Toggle { value: false }));

        let _ = fs::remove_dir_all(&dir);
    }
}
