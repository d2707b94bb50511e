//! Host context — install-wide defaults and collaborator seams.
//!
//! The core never talks to storage, the network, or the obfuscation engine
//! directly. Each external collaborator sits behind a trait object on
//! [`HostContext`], which also carries the defaults bound into freshly
//! instantiated templates (staging key, bind address).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rand::RngCore;

/// A stored credential resolved by identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialRef {
    pub domain: String,
    pub username: String,
    pub password: String,
}

/// External credential store consumed by the generation pipeline.
pub trait CredentialStore: Send + Sync {
    fn is_valid(&self, id: &str) -> bool;
    fn get(&self, id: &str) -> Option<CredentialRef>;
}

/// External store of module source fragments.
pub trait SourceStore: Send + Sync {
    fn fetch(&self, path: &str) -> anyhow::Result<String>;
}

/// External output-transform ("obfuscation") collaborator.
///
/// The transform receives the composed script and the operator-supplied
/// transform command, and returns the rewritten text verbatim.
pub trait Obfuscator: Send + Sync {
    fn transform(&self, source: &str, command: &str) -> String;
}

/// In-memory credential store, useful for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    credentials: HashMap<String, CredentialRef>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: &str, cred: CredentialRef) {
        self.credentials.insert(id.to_string(), cred);
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn is_valid(&self, id: &str) -> bool {
        self.credentials.contains_key(id)
    }

    fn get(&self, id: &str) -> Option<CredentialRef> {
        self.credentials.get(id).cloned()
    }
}

/// Empty credential store; every lookup fails.
#[derive(Debug, Default)]
pub struct NullCredentialStore;

impl CredentialStore for NullCredentialStore {
    fn is_valid(&self, _id: &str) -> bool {
        false
    }

    fn get(&self, _id: &str) -> Option<CredentialRef> {
        None
    }
}

/// Source store reading fragments from a directory on disk.
#[derive(Debug)]
pub struct FileSourceStore {
    root: PathBuf,
}

impl FileSourceStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FileSourceStore { root: root.into() }
    }
}

impl SourceStore for FileSourceStore {
    fn fetch(&self, path: &str) -> anyhow::Result<String> {
        let full = self.root.join(path);
        Ok(std::fs::read_to_string(&full)?)
    }
}

/// Identity transform, used when no obfuscation engine is wired in.
#[derive(Debug, Default)]
pub struct PassthroughObfuscator;

impl Obfuscator for PassthroughObfuscator {
    fn transform(&self, source: &str, _command: &str) -> String {
        source.to_string()
    }
}

/// Generate a fresh 32-hex-character staging key.
pub fn random_staging_key() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Install-wide context handed to loaders and the script composer.
#[derive(Clone)]
pub struct HostContext {
    /// Root of the capability-definition tree.
    pub install_path: PathBuf,
    /// Default key for initial agent negotiation, bound into listener options.
    pub staging_key: String,
    /// Default bind address for listener options.
    pub bind_address: String,
    pub credentials: Arc<dyn CredentialStore>,
    pub sources: Arc<dyn SourceStore>,
    pub obfuscator: Arc<dyn Obfuscator>,
}

impl HostContext {
    /// Context rooted at `install_path` with a random staging key and
    /// passthrough collaborators.
    pub fn new(install_path: impl Into<PathBuf>) -> Self {
        let install_path = install_path.into();
        let sources = Arc::new(FileSourceStore::new(install_path.join("data")));
        HostContext {
            install_path,
            staging_key: random_staging_key(),
            bind_address: "0.0.0.0".to_string(),
            credentials: Arc::new(NullCredentialStore),
            sources,
            obfuscator: Arc::new(PassthroughObfuscator),
        }
    }

    pub fn with_staging_key(mut self, key: &str) -> Self {
        self.staging_key = key.to_string();
        self
    }

    pub fn with_bind_address(mut self, addr: &str) -> Self {
        self.bind_address = addr.to_string();
        self
    }

    pub fn with_credentials(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.credentials = store;
        self
    }

    pub fn with_sources(mut self, store: Arc<dyn SourceStore>) -> Self {
        self.sources = store;
        self
    }

    pub fn with_obfuscator(mut self, obfuscator: Arc<dyn Obfuscator>) -> Self {
        self.obfuscator = obfuscator;
        self
    }

    pub fn install_path(&self) -> &Path {
        &self.install_path
    }
}
