//! Script generation — the request-time composition pipeline.
//!
//! ```text
//! GenerationRequest
//!   ↓  generate()            capability gates, generator dispatch
//! ModuleGenerator            module-owned parameter + exclusion rules
//!   ↓                        credential store, live-listener launcher
//! composed script
//!   ↓  Obfuscator::transform
//! final artifact (or a structured GenerationError — never partial)
//! ```

pub mod composer;
pub mod error;

pub use composer::{escape_literal, generate, GenerationRequest, ModuleGenerator};
pub use error::GenerationError;
