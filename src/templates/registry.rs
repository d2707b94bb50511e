//! Template registry — slug-keyed prototypes and fresh-copy instantiation.
//!
//! The registry is populated once by the startup scan (or an explicit
//! reload) and is read-only afterwards. Concurrent readers are safe
//! without locking because neither `get` nor `new_instance` ever mutates a
//! prototype: runtime configuration always happens on the deep copy a
//! `new_instance` call hands back.

use std::collections::HashMap;

use super::descriptor::TemplateInstance;
use super::error::TemplateError;

/// In-memory mapping from canonical slug to loaded prototype.
#[derive(Debug, Default)]
pub struct TemplateRegistry {
    templates: HashMap<String, TemplateInstance>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a prototype.
    ///
    /// Two definition files can normalize to the same slug; the later load
    /// wins, and the collision is surfaced in the log rather than resolved.
    pub fn register(&mut self, slug: &str, instance: TemplateInstance) {
        if self.templates.contains_key(slug) {
            log::warn!(
                "template slug collision: \"{}\" overwritten by later load",
                slug
            );
        }
        self.templates.insert(slug.to_string(), instance);
    }

    /// Look up a prototype by slug.
    pub fn get(&self, slug: &str) -> Option<&TemplateInstance> {
        self.templates.get(slug)
    }

    /// Read-only view of the full mapping.
    pub fn all(&self) -> &HashMap<String, TemplateInstance> {
        &self.templates
    }

    /// Construct a fresh instance from a registered prototype.
    ///
    /// The returned instance carries default option values only, in its own
    /// option storage, re-normalized. Mutating it never affects the
    /// prototype or any sibling instance.
    pub fn new_instance(&self, slug: &str) -> Result<TemplateInstance, TemplateError> {
        let prototype = self
            .templates
            .get(slug)
            .ok_or_else(|| TemplateError::NotFound(slug.to_string()))?;
        let mut instance = prototype.clone();
        for option in instance.options.values_mut() {
            option.normalize();
        }
        Ok(instance)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}
