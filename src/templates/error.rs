//! Template system errors.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while loading, validating, or using a template.
///
/// Load failures are fatal for the file they occur in but never for the
/// overall scan; validation, launcher, and unsupported-target failures are
/// recoverable and surfaced to the caller as messages.
#[derive(Debug, Error)]
pub enum TemplateError {
    /// File I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing or serialization failed.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// The definition file does not carry the expected top-level key.
    #[error("no `{key}` definition found in {}", path.display())]
    MissingDefinition { key: &'static str, path: PathBuf },

    /// Template not found in the registry.
    #[error("template not found: {0}")]
    NotFound(String),

    /// Option validation failed.
    #[error("validation error: {0}")]
    Validation(String),

    /// The template does not implement an operation for the requested language.
    #[error("{template}: {operation} not implemented for {language}")]
    Unsupported {
        template: String,
        operation: &'static str,
        language: String,
    },

    /// Launcher generation produced no output.
    #[error("launcher generation failed: {0}")]
    Launcher(String),
}
