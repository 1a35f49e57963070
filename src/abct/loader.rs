//! The `AbcLoader` capability: resolves an ABCT file reference to a parsed
//! [`AbcTree`], and the per-evaluation cache that keeps repeated references
//! to the same file identity-equal (spec §5's resource policy).
//!
//! The core never does file I/O itself; callers (the language-server/CLI
//! layer, or tests) provide a loader. `MemoryLoader` is this crate's own
//! synchronous in-memory implementation, named by the "Async loader" design
//! note in spec §9 as exactly the kind of thing a capability parameter
//! should make easy to substitute in tests.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use thiserror::Error;

use crate::abc::parser::parse;
use crate::abc::tree::AbcTree;
use crate::context::SourceContext;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LoaderError {
    #[error("file not found: {0}")]
    FileNotFound(String),
    #[error("io error reading {path}: {message}")]
    Io { path: String, message: String },
}

/// A capability for resolving ABCT file references to parsed ABC trees.
/// `load` takes the path exactly as written in the ABCT source (already
/// resolved against the source file's directory by the caller, per spec
/// §6) and returns a fresh parse of that file's contents.
pub trait AbcLoader {
    fn load(&self, path: &str) -> Result<AbcTree, LoaderError>;
}

/// Synchronous in-memory [`AbcLoader`] backed by a path -> source map.
/// Used by this crate's own tests and available to any embedder that wants
/// a loader without standing up real file I/O.
#[derive(Debug, Default, Clone)]
pub struct MemoryLoader {
    files: HashMap<String, String>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: impl Into<String>, source: impl Into<String>) -> Self {
        self.files.insert(path.into(), source.into());
        self
    }

    pub fn insert(&mut self, path: impl Into<String>, source: impl Into<String>) {
        self.files.insert(path.into(), source.into());
    }
}

impl AbcLoader for MemoryLoader {
    fn load(&self, path: &str) -> Result<AbcTree, LoaderError> {
        let source = self.files.get(path).ok_or_else(|| LoaderError::FileNotFound(path.to_string()))?;
        let mut ctx = SourceContext::new(source.clone());
        Ok(parse(&mut ctx))
    }
}

/// Resolves a relative ABCT file-ref path against the ABCT source's own
/// directory, per spec §6 ("MUST resolve relative paths against the
/// ABCT source's directory").
pub fn resolve_path(base_dir: &Path, relative: &str) -> String {
    if Path::new(relative).is_absolute() {
        return relative.to_string();
    }
    let joined: PathBuf = base_dir.join(relative);
    joined.to_string_lossy().into_owned()
}

/// A per-evaluation cache keyed by resolved absolute path, so repeated
/// references to the same file share the same tree (identity-equal, per
/// spec §5) within one `evaluate_abct` call. The cache is owned by the
/// evaluator and dropped when evaluation completes.
#[derive(Default)]
pub struct LoadCache {
    entries: HashMap<String, Rc<RefCell<AbcTree>>>,
}

impl LoadCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_load(
        &mut self,
        loader: &dyn AbcLoader,
        resolved_path: &str,
    ) -> Result<Rc<RefCell<AbcTree>>, LoaderError> {
        if let Some(tree) = self.entries.get(resolved_path) {
            return Ok(tree.clone());
        }
        let tree = loader.load(resolved_path)?;
        let shared = Rc::new(RefCell::new(tree));
        self.entries.insert(resolved_path.to_string(), shared.clone());
        Ok(shared)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_loader_round_trips_inserted_source() {
        let loader = MemoryLoader::new().with_file("song.abc", "X:1\nK:C\nCDEF|\n");
        let tree = loader.load("song.abc").expect("load should succeed");
        assert!(matches!(tree.root_node(), crate::abc::tree::Node::FileStructure { .. }));
    }

    #[test]
    fn missing_file_is_a_loader_error() {
        let loader = MemoryLoader::new();
        assert_eq!(loader.load("missing.abc"), Err(LoaderError::FileNotFound("missing.abc".to_string())));
    }

    #[test]
    fn cache_returns_identity_equal_tree_for_repeated_path() {
        let loader = MemoryLoader::new().with_file("song.abc", "X:1\nK:C\nCDEF|\n");
        let mut cache = LoadCache::new();
        let a = cache.get_or_load(&loader, "song.abc").unwrap();
        let b = cache.get_or_load(&loader, "song.abc").unwrap();
        assert!(Rc::ptr_eq(&a, &b));
    }

    #[test]
    fn resolve_path_joins_relative_against_base_dir() {
        let resolved = resolve_path(Path::new("/tunes"), "song.abc");
        assert_eq!(resolved, "/tunes/song.abc");
    }

    #[test]
    fn resolve_path_leaves_absolute_paths_untouched() {
        let resolved = resolve_path(Path::new("/tunes"), "/abs/song.abc");
        assert_eq!(resolved, "/abs/song.abc");
    }
}
