//! Script storage resolution.
//!
//! A plugin ships its scripts either as an inline bundle
//! (`<plugin>/dist/scripts.json`) or as files under `<plugin>/scripts`.
//! The strategy is picked once when the locator is built.

use std::{
    collections::HashMap,
    fs, io,
    path::{Component, Path, PathBuf},
};

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::compiler::{sanitize, TempArtifact};
use crate::error::{Error, Result};
use crate::template;

pub const SOURCE_EXT: &str = "applescript";
pub const COMPILED_EXT: &str = "scpt";
pub const BUNDLE_PATH: &str = "dist/scripts.json";
pub const SCRIPTS_DIR: &str = "scripts";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptReference {
    pub plugin_dir: PathBuf,
    pub name: String,
}

impl ScriptReference {
    pub fn new(plugin_dir: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self { plugin_dir: plugin_dir.into(), name: name.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedScript {
    InlineText { name: String, source: String, is_template: bool },
    InlineBinary { name: String, bytes: Vec<u8> },
    FileSource { path: PathBuf },
    FileCompiled { path: PathBuf },
}

impl ResolvedScript {
    pub fn origin(&self) -> &'static str {
        match self {
            ResolvedScript::InlineText { .. } => "inline-text",
            ResolvedScript::InlineBinary { .. } => "inline-binary",
            ResolvedScript::FileSource { .. } => "file-source",
            ResolvedScript::FileCompiled { .. } => "file-compiled",
        }
    }

    /// Only known for inline text. File sources are read by the runner,
    /// which checks for placeholders itself.
    pub fn is_template(&self) -> bool {
        matches!(self, ResolvedScript::InlineText { is_template: true, .. })
    }

    /// Write a binary payload to a temp `.scpt` the interpreter can open.
    /// Returns `None` for every other variant.
    pub fn materialize(&self) -> Result<Option<TempArtifact>> {
        let ResolvedScript::InlineBinary { name, bytes } = self else {
            return Ok(None);
        };
        let artifact = TempArtifact::with_contents(&format!("osabridge-{}-", sanitize(name)), COMPILED_EXT, bytes)?;
        debug!(script = %name, path = %artifact.path().display(), "materialized compiled script");
        Ok(Some(artifact))
    }
}

/// A place scripts can be looked up by logical name.
pub trait ScriptStore: Send + Sync {
    /// `Ok(None)` when the name is simply not present.
    fn lookup(&self, name: &str, prefer_compiled: bool) -> io::Result<Option<ResolvedScript>>;

    fn kind(&self) -> &'static str;
}

/// Extension order for one candidate stem.
fn extensions(prefer_compiled: bool) -> [&'static str; 2] {
    if prefer_compiled {
        [COMPILED_EXT, SOURCE_EXT]
    } else {
        [SOURCE_EXT, COMPILED_EXT]
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "lowercase")]
enum BlobType {
    Text,
    Binary,
}

#[derive(Debug, Clone, Deserialize)]
struct BlobEntry {
    #[serde(rename = "type")]
    kind: BlobType,
    content: String,
}

#[derive(Debug, Clone)]
enum Blob {
    Text(String),
    Binary(Vec<u8>),
}

/// Scripts bundled as an in-memory table keyed by relative name.
#[derive(Debug, Clone, Default)]
pub struct InlineStore {
    blobs: HashMap<String, Blob>,
}

impl InlineStore {
    pub fn from_json(text: &str) -> std::result::Result<Self, String> {
        let raw: HashMap<String, BlobEntry> =
            serde_json::from_str(text).map_err(|e| e.to_string())?;
        let mut blobs = HashMap::with_capacity(raw.len());
        for (key, entry) in raw {
            let blob = match entry.kind {
                BlobType::Text => Blob::Text(entry.content),
                BlobType::Binary => Blob::Binary(
                    STANDARD
                        .decode(entry.content.trim())
                        .map_err(|e| format!("{}: {}", key, e))?,
                ),
            };
            blobs.insert(normalize_key(&key), blob);
        }
        Ok(Self { blobs })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text).map_err(|reason| Error::InvalidBundle {
            path: path.to_path_buf(),
            reason,
        })
    }

    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let blobs = entries
            .into_iter()
            .map(|(k, v)| (normalize_key(&k), Blob::Text(v)))
            .collect();
        Self { blobs }
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    fn get(&self, key: &str) -> Option<ResolvedScript> {
        self.blobs.get(key).map(|blob| match blob {
            Blob::Text(source) => ResolvedScript::InlineText {
                name: key.to_string(),
                is_template: template::has_placeholders(source),
                source: source.clone(),
            },
            Blob::Binary(bytes) => ResolvedScript::InlineBinary {
                name: key.to_string(),
                bytes: bytes.clone(),
            },
        })
    }

    /// Directory prefixes one level deep, sorted for a stable lookup order.
    fn groups(&self) -> Vec<&str> {
        let mut dirs: Vec<&str> = self
            .blobs
            .keys()
            .filter_map(|k| k.split_once('/').map(|(dir, _)| dir))
            .collect();
        dirs.sort_unstable();
        dirs.dedup();
        dirs
    }
}

fn normalize_key(key: &str) -> String {
    key.trim_start_matches("./").replace('\\', "/")
}

impl ScriptStore for InlineStore {
    fn lookup(&self, name: &str, prefer_compiled: bool) -> io::Result<Option<ResolvedScript>> {
        if let Some(hit) = self.get(name) {
            return Ok(Some(hit));
        }
        let exts = extensions(prefer_compiled);
        for ext in exts {
            if let Some(hit) = self.get(&format!("{}.{}", name, ext)) {
                return Ok(Some(hit));
            }
        }
        for ext in exts {
            if let Some(hit) = self.get(&format!("{}/{}.{}", name, name, ext)) {
                return Ok(Some(hit));
            }
        }
        for dir in self.groups() {
            for ext in exts {
                if let Some(hit) = self.get(&format!("{}/{}.{}", dir, name, ext)) {
                    return Ok(Some(hit));
                }
            }
        }
        Ok(None)
    }

    fn kind(&self) -> &'static str {
        "inline"
    }
}

/// Scripts stored as files under a plugin's `scripts/` directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn candidate(&self, path: PathBuf) -> Option<ResolvedScript> {
        if !path.is_file() {
            return None;
        }
        if path.extension().and_then(|e| e.to_str()) == Some(COMPILED_EXT) {
            Some(ResolvedScript::FileCompiled { path })
        } else {
            Some(ResolvedScript::FileSource { path })
        }
    }

    fn groups(&self) -> io::Result<Vec<PathBuf>> {
        let read_dir = match fs::read_dir(&self.root) {
            Ok(rd) => rd,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut dirs = Vec::new();
        for entry in read_dir {
            let path = entry?.path();
            if path.is_dir() {
                dirs.push(path);
            }
        }
        dirs.sort();
        Ok(dirs)
    }
}

/// Relative names made only of plain segments; no root, `.` or `..`.
fn is_contained(name: &str) -> bool {
    !name.is_empty() && Path::new(name).components().all(|c| matches!(c, Component::Normal(_)))
}

impl ScriptStore for FileStore {
    fn lookup(&self, name: &str, prefer_compiled: bool) -> io::Result<Option<ResolvedScript>> {
        if !is_contained(name) {
            debug!(script = %name, "name leaves the scripts directory, ignored");
            return Ok(None);
        }
        let exts = extensions(prefer_compiled);
        for ext in exts {
            if let Some(hit) = self.candidate(self.root.join(format!("{}.{}", name, ext))) {
                return Ok(Some(hit));
            }
        }
        for ext in exts {
            let path = self.root.join(name).join(format!("{}.{}", name, ext));
            if let Some(hit) = self.candidate(path) {
                return Ok(Some(hit));
            }
        }
        for dir in self.groups()? {
            for ext in exts {
                if let Some(hit) = self.candidate(dir.join(format!("{}.{}", name, ext))) {
                    return Ok(Some(hit));
                }
            }
        }
        Ok(None)
    }

    fn kind(&self) -> &'static str {
        "file"
    }
}

pub struct ScriptLocator {
    store: Box<dyn ScriptStore>,
}

impl std::fmt::Debug for ScriptLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptLocator").field("store", &self.store.kind()).finish()
    }
}

impl ScriptLocator {
    /// Use the plugin's inline bundle if it loads, otherwise its scripts directory.
    pub fn for_plugin(plugin_dir: &Path) -> Self {
        let bundle = plugin_dir.join(BUNDLE_PATH);
        if bundle.is_file() {
            match InlineStore::load(&bundle) {
                Ok(store) => {
                    debug!(path = %bundle.display(), scripts = store.len(), "using inline script bundle");
                    return Self::with_store(store);
                }
                Err(e) => warn!(error = %e, "inline bundle unusable, falling back to files"),
            }
        }
        let root = plugin_dir.join(SCRIPTS_DIR);
        debug!(root = %root.display(), "using file script store");
        Self::with_store(FileStore::new(root))
    }

    pub fn with_store(store: impl ScriptStore + 'static) -> Self {
        Self { store: Box::new(store) }
    }

    pub fn strategy(&self) -> &'static str {
        self.store.kind()
    }

    pub fn resolve(&self, name: &str) -> Result<Option<ResolvedScript>> {
        self.resolve_with(name, false)
    }

    pub fn resolve_with(&self, name: &str, prefer_compiled: bool) -> Result<Option<ResolvedScript>> {
        Ok(self.store.lookup(name, prefer_compiled)?)
    }
}
