//! Script-generation errors.

use thiserror::Error;

use crate::templates::TemplateError;

/// Errors surfaced by the script composer.
///
/// Every variant is recoverable: generation aborts with a message and no
/// partial artifact, and the presentation layer renders `Display`
/// uniformly.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// A module interdependency or parameter rule was violated.
    #[error("{0}")]
    Validation(String),

    /// The supplied credential identifier did not resolve.
    #[error("invalid credential id: {0}")]
    InvalidCredential(String),

    /// The supplied listener name does not reference a live listener.
    #[error("invalid listener: {0}")]
    InvalidListener(String),

    /// The listener produced no launcher output.
    #[error("error creating launcher for listener: {0}")]
    Launcher(String),

    /// The module's source fragment could not be fetched.
    #[error("module source error: {0}")]
    Source(String),

    /// The module is disabled and cannot generate.
    #[error("module is disabled: {0}")]
    Disabled(String),

    /// A template-layer failure (lookup, option validation, ...).
    #[error(transparent)]
    Template(#[from] TemplateError),
}
