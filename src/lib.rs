//! # Kestrel
//!
//! Capability-template registry and script-generation core for a
//! remote-operations server. Kestrel discovers pluggable capability
//! definitions (listener protocols, payload stagers, task modules) from a
//! filesystem root, normalizes their self-declared option schemas, and
//! composes final executable artifacts: substituting runtime values,
//! resolving cross-template dependencies (a live listener's bootstrap
//! launcher, a stored credential), and forwarding the result to the
//! output-transform collaborator.
//!
//! Network transports, persistence, obfuscation internals, and the
//! request-facing API are external collaborators reached through the trait
//! seams on [`host::HostContext`].

pub mod generation;
pub mod host;
pub mod listeners;
pub mod templates;

pub use generation::{generate, GenerationError, GenerationRequest};
pub use host::{CredentialRef, CredentialStore, HostContext, Obfuscator, SourceStore};
pub use listeners::{Language, LauncherRequest, Listener, ListenerTracker};
pub use templates::{
    TemplateDescriptor, TemplateError, TemplateInstance, TemplateKind, TemplateLoader,
    TemplateOption, TemplateRegistry,
};

pub const VERSION: &str = "0.3.0";
