//! Template system — discovery, normalization, and registry of capability
//! definitions.
//!
//! A **template** is a YAML-declared capability: a listener protocol, a
//! payload stager, or a task module. Definitions are independently
//! authored and loaded without compile-time checking, so everything that
//! crosses the file boundary is defensively normalized and validated
//! before the rest of the server can see it.
//!
//! # Architecture
//!
//! ```text
//! <install>/listeners/**/*.yaml   (excluding *template.yaml)
//!   ↓  TemplateLoader::load_kind()      per-file Result, skip + warn
//! TemplateDescriptor  →  instantiate()  host defaults + option normalization
//!   ↓  TemplateRegistry::register()
//! prototype TemplateInstance
//!   ↓  TemplateRegistry::new_instance() deep copy, defaults only
//! configured TemplateInstance
//! ```

pub mod descriptor;
pub mod error;
pub mod loader;
pub mod option;
pub mod registry;

pub use descriptor::{Author, TemplateDescriptor, TemplateInstance, TemplateKind};
pub use error::TemplateError;
pub use loader::{discover, identifier, instantiate, load, TemplateLoader};
pub use option::{normalize_options, OptionValue, TemplateOption, ValueType};
pub use registry::TemplateRegistry;
