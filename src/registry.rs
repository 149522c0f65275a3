use std::collections::btree_map::{self, BTreeMap};
use std::fs;
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::errors::{Result, TunerError};
use crate::http_request::RequestDefinition;
use crate::script_loader::{ScriptEngine, SCRIPT_EXTENSION};

/// Request definitions of one directory tree, keyed by file stem.
#[derive(Debug, Default, Clone)]
pub struct RequestRegistry {
    entries: BTreeMap<String, RequestDefinition>,
}

/// Collects every script below `dir`. Entries of a directory are visited in path order,
/// subdirectories depth first.
fn collect_scripts(dir: &Path, scripts: &mut Vec<PathBuf>) -> Result<()> {
    let read_dir = fs::read_dir(dir).map_err(|e| TunerError::script_load(dir, e))?;
    let mut paths = Vec::new();
    for entry in read_dir {
        paths.push(entry.map_err(|e| TunerError::script_load(dir, e))?.path());
    }
    paths.sort();
    for path in paths {
        if path.is_dir() {
            collect_scripts(&path, scripts)?;
        } else if path.extension().map(|ext| ext == SCRIPT_EXTENSION).unwrap_or(false) {
            scripts.push(path);
        }
    }
    return Ok(());
}

/// Loads every `.rhai` script below `dir`.
///
/// When two scripts share a file stem the one visited last replaces the earlier one,
/// e.g. `b/get_api.rhai` wins over `a/get_api.rhai`.
pub fn load_registry(dir: &Path) -> Result<RequestRegistry> {
    let mut scripts = Vec::new();
    collect_scripts(dir, &mut scripts)?;

    let engine = ScriptEngine::new();
    let mut entries: BTreeMap<String, RequestDefinition> = BTreeMap::new();
    for path in scripts {
        let definition = engine.load(&path)?;
        if let Some(previous) = entries.insert(definition.name().to_string(), definition) {
            warn!(
                "{} replaces {} for '{}'",
                path.display(),
                previous.source().map(|p| p.display().to_string()).unwrap_or_default(),
                previous.name()
            );
        }
    }
    info!("loaded {} request definitions from {}", entries.len(), dir.display());
    return Ok(RequestRegistry { entries });
}

impl RequestRegistry {
    pub fn get(&self, name: &str) -> Option<&RequestDefinition> {
        self.entries.get(name)
    }

    /// Mutable access, needed for `update`.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut RequestDefinition> {
        self.entries.get_mut(name)
    }

    /// An independent copy whose body `update` can change without touching the registry.
    pub fn checkout(&self, name: &str) -> Option<RequestDefinition> {
        self.entries.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, RequestDefinition> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
