//! Template loader — disk scan, slug derivation, and isolated per-file loads.
//!
//! The loader walks one capability category at a time under the install
//! root, keeps YAML definition files, and skips anything matching the
//! abstract-template naming convention (a file stem ending in `template`
//! is a base definition, never directly instantiable).
//!
//! Every file loads behind its own `Result`: a malformed definition is
//! logged and skipped, and the scan continues. The only scan-fatal
//! condition is a category root that cannot be read at all.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use walkdir::WalkDir;

use crate::host::HostContext;

use super::descriptor::{TemplateDescriptor, TemplateInstance, TemplateKind};
use super::error::TemplateError;
use super::option::normalize_options;
use super::registry::TemplateRegistry;

/// Definition-file extensions accepted by the scan.
const DEFINITION_EXTENSIONS: [&str; 2] = ["yaml", "yml"];

fn is_definition(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| DEFINITION_EXTENSIONS.contains(&e))
        .unwrap_or(false)
}

fn is_abstract(path: &Path) -> bool {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(|s| s.ends_with("template"))
        .unwrap_or(false)
}

/// Candidate definition files under a category root.
///
/// The walk is sorted for deterministic load order, finite, and restarts
/// from scratch on every call.
pub fn discover(category_root: &Path) -> impl Iterator<Item = PathBuf> {
    WalkDir::new(category_root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                log::warn!("unreadable entry during template scan: {}", e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| is_definition(path) && !is_abstract(path))
}

/// Derive the canonical slug for a definition file.
///
/// The slug is the path relative to the category root, extension stripped,
/// lower-cased, with path separators replaced by underscores. Two files
/// normalizing to the same slug collide; see `TemplateRegistry::register`.
pub fn identifier(category_root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(category_root).unwrap_or(path);
    let relative = relative.with_extension("");
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_lowercase())
        .collect::<Vec<_>>()
        .join("_")
}

/// Load one definition file as an isolated unit.
pub fn load(path: &Path, kind: TemplateKind) -> Result<TemplateDescriptor, TemplateError> {
    let text = std::fs::read_to_string(path)?;
    TemplateDescriptor::from_yaml(kind, &text, path)
}

/// Bind host defaults into a descriptor's declared options and build the
/// normalized prototype instance.
///
/// Options the host provides defaults for (`StagingKey`, `BindIP`) are
/// filled only when the definition left them blank. Normalization runs
/// after binding and before the instance is handed to the registry, so
/// generation logic never sees a partially-shaped option.
pub fn instantiate(descriptor: TemplateDescriptor, host: &HostContext) -> TemplateInstance {
    let descriptor = Arc::new(descriptor);
    let mut options = descriptor.options.clone();

    if let Some(option) = options.get_mut("StagingKey") {
        if option.value.is_blank() {
            option.value = host.staging_key.as_str().into();
        }
    }
    if let Some(option) = options.get_mut("BindIP") {
        if option.value.is_blank() {
            option.value = host.bind_address.as_str().into();
        }
    }

    normalize_options(&mut options);
    TemplateInstance {
        descriptor,
        options,
    }
}

/// Scans the install tree and fills the registry.
#[derive(Debug)]
pub struct TemplateLoader {
    install_path: PathBuf,
}

impl TemplateLoader {
    pub fn new(install_path: impl Into<PathBuf>) -> Self {
        TemplateLoader {
            install_path: install_path.into(),
        }
    }

    /// Load every definition of one category into the registry.
    ///
    /// Returns the number of templates registered. Individual file
    /// failures are logged and skipped; an unreadable category root is
    /// fatal.
    pub fn load_kind(
        &self,
        kind: TemplateKind,
        host: &HostContext,
        registry: &mut TemplateRegistry,
    ) -> Result<usize, TemplateError> {
        let root = self.install_path.join(kind.dir_name());
        if !root.is_dir() {
            return Err(TemplateError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("template root not readable: {}", root.display()),
            )));
        }

        log::info!("loading {} templates from {}", kind.dir_name(), root.display());

        let mut count = 0;
        for path in discover(&root) {
            let slug = identifier(&root, &path);
            match load(&path, kind) {
                Ok(mut descriptor) => {
                    descriptor.id = slug.clone();
                    let instance = instantiate(descriptor, host);
                    registry.register(&slug, instance);
                    count += 1;
                }
                Err(e) => {
                    log::warn!("skipping template {}: {}", path.display(), e);
                }
            }
        }

        log::info!("registered {} {} template(s)", count, kind.dir_name());
        Ok(count)
    }

    /// One-shot startup scan over all capability categories.
    pub fn load_all(
        &self,
        host: &HostContext,
        registry: &mut TemplateRegistry,
    ) -> Result<usize, TemplateError> {
        let mut count = 0;
        for kind in [TemplateKind::Listener, TemplateKind::Stager, TemplateKind::Module] {
            count += self.load_kind(kind, host, registry)?;
        }
        Ok(count)
    }
}
