//! Template descriptors — the unit of YAML-declared capability.
//!
//! A descriptor is the parsed form of one definition file: display
//! metadata, capability flags, behavior selectors, and the declared option
//! schema. Descriptors are loaded once per process lifetime per file and
//! shared immutably; all runtime mutation happens on the option copy held
//! by a [`TemplateInstance`].
//!
//! Example definition:
//! ```yaml
//! listener:
//!   name: HTTP
//!   description: "HTTP[S] client/server communication channel"
//!   category: client_server
//!   protocol: http
//!   options:
//!     Name:
//!       description: "Name for the listener."
//!       required: true
//!       value: "http"
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::error::TemplateError;
use super::option::{normalize_options, OptionValue, TemplateOption};

/// Capability category a definition file belongs to.
///
/// The category determines both the directory scanned under the install
/// root and the top-level key the file must export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateKind {
    /// Communication-endpoint protocol definition.
    Listener,
    /// Payload-loader definition.
    Stager,
    /// Task-module definition.
    Module,
}

impl TemplateKind {
    /// Directory under the install root scanned for this category.
    pub fn dir_name(&self) -> &'static str {
        match self {
            TemplateKind::Listener => "listeners",
            TemplateKind::Stager => "stagers",
            TemplateKind::Module => "modules",
        }
    }

    /// Top-level key the definition file must export.
    pub fn wrapper_key(&self) -> &'static str {
        match self {
            TemplateKind::Listener => "listener",
            TemplateKind::Stager => "stager",
            TemplateKind::Module => "module",
        }
    }
}

impl Default for TemplateKind {
    fn default() -> Self {
        TemplateKind::Module
    }
}

/// Author credit on a definition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Author {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub handle: String,
    #[serde(default)]
    pub link: String,
}

/// A loaded capability definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateDescriptor {
    /// Canonical slug, derived from the file path by the loader.
    #[serde(skip)]
    pub id: String,

    /// Category, stamped by the loader from the scanned directory.
    #[serde(skip)]
    pub kind: TemplateKind,

    /// Display name.
    pub name: String,

    #[serde(default)]
    pub authors: Vec<Author>,

    #[serde(default)]
    pub description: String,

    /// Freeform category label (e.g. `client_server`, `lateral_movement`).
    #[serde(default)]
    pub category: String,

    #[serde(default)]
    pub comments: Vec<String>,

    #[serde(default)]
    pub software: Option<String>,

    #[serde(default)]
    pub techniques: Vec<String>,

    #[serde(default)]
    pub tactics: Vec<String>,

    /// Disabled templates stay in the registry but refuse generation.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Requires an elevated execution context on the target.
    #[serde(default)]
    pub needs_admin: bool,

    /// Safe to run without tipping off defensive tooling.
    #[serde(default = "default_true")]
    pub opsec_safe: bool,

    /// Runs as a long-lived background job on the target.
    #[serde(default)]
    pub background: bool,

    /// Listener definitions: compiled-in protocol behavior selector.
    #[serde(default)]
    pub protocol: Option<String>,

    /// Module definitions: compiled-in generator selector (`plain` when absent).
    #[serde(default)]
    pub generator: Option<String>,

    /// Module definitions: source fragment path, resolved via the source store.
    #[serde(default)]
    pub script_path: Option<String>,

    /// Module definitions: inline source fragment (takes precedence over the path).
    #[serde(default)]
    pub script: Option<String>,

    /// Module definitions: invocation trailer template with `{{ Option }}`
    /// placeholders, consumed by the default generator.
    #[serde(default)]
    pub script_end: Option<String>,

    /// Declared option schema; the loader normalizes before registration.
    #[serde(default)]
    pub options: HashMap<String, TemplateOption>,
}

fn default_true() -> bool {
    true
}

impl TemplateDescriptor {
    /// Parse a definition from YAML text.
    ///
    /// The file must export exactly one definition under the category's
    /// wrapper key; anything else is a per-file load error.
    pub fn from_yaml(kind: TemplateKind, yaml: &str, path: &Path) -> Result<Self, TemplateError> {
        let doc: serde_yaml::Value = serde_yaml::from_str(yaml)?;
        let inner = doc
            .as_mapping()
            .and_then(|m| m.get(kind.wrapper_key()))
            .ok_or_else(|| TemplateError::MissingDefinition {
                key: kind.wrapper_key(),
                path: path.to_path_buf(),
            })?;
        let mut descriptor: TemplateDescriptor = serde_yaml::from_value(inner.clone())?;
        descriptor.kind = kind;
        Ok(descriptor)
    }

    /// Short display name: the last segment of a path-style name.
    pub fn short_name(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }
}

/// A descriptor bound to its own independently-mutable copy of the options.
///
/// One instance exists per named listener or per generation-time clone.
/// Instances created from the same prototype never share option storage:
/// the option map is deep-copied on every construction.
#[derive(Debug, Clone)]
pub struct TemplateInstance {
    /// Shared, immutable definition.
    pub descriptor: Arc<TemplateDescriptor>,
    /// This instance's private option state.
    pub options: HashMap<String, TemplateOption>,
}

impl TemplateInstance {
    /// Build an instance from a descriptor's declared schema.
    ///
    /// The copied options are normalized before the instance is returned,
    /// so no un-normalized option is ever observable.
    pub fn from_descriptor(descriptor: Arc<TemplateDescriptor>) -> Self {
        let mut options = descriptor.options.clone();
        normalize_options(&mut options);
        TemplateInstance {
            descriptor,
            options,
        }
    }

    /// Canonical slug of the underlying template.
    pub fn id(&self) -> &str {
        &self.descriptor.id
    }

    pub fn kind(&self) -> TemplateKind {
        self.descriptor.kind
    }

    /// Rendered current value of an option, if declared.
    pub fn option_value(&self, name: &str) -> Option<String> {
        self.options.get(name).map(|o| o.value.to_string())
    }

    /// Set an option's current value.
    ///
    /// Strict options reject values outside their suggested set; unknown
    /// option names are an error rather than a silent insert, since the
    /// schema is fixed at load time.
    pub fn set_option(
        &mut self,
        name: &str,
        value: impl Into<OptionValue>,
    ) -> Result<(), TemplateError> {
        let option = self.options.get_mut(name).ok_or_else(|| {
            TemplateError::Validation(format!("unknown option \"{}\"", name))
        })?;
        let value = value.into();
        if option.strict.unwrap_or(false) {
            let allowed = option
                .suggested_values
                .as_ref()
                .map(|s| s.contains(&value))
                .unwrap_or(false);
            if !allowed {
                return Err(TemplateError::Validation(format!(
                    "option \"{}\" is strict and does not allow \"{}\"",
                    name, value
                )));
            }
        }
        option.value = value;
        Ok(())
    }

    /// Option schema rendered for the request-facing API layer.
    ///
    /// Only called after normalization, so every option serializes with
    /// `strict`, `suggested_values`, and `value_type` present.
    pub fn schema_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.options).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::templates::option::ValueType;

    const LISTENER_YAML: &str = r#"
listener:
  name: HTTP
  authors:
    - name: "Will Schroeder"
      handle: "@harmj0y"
  description: "HTTP[S] client/server communication channel"
  category: client_server
  protocol: http
  options:
    Name:
      description: "Name for the listener."
      required: true
      value: "http"
    Port:
      description: "Port for the listener."
      required: true
      value: 8080
"#;

    #[test]
    fn test_parse_listener_definition() {
        let descriptor = TemplateDescriptor::from_yaml(
            TemplateKind::Listener,
            LISTENER_YAML,
            Path::new("listeners/http.yaml"),
        )
        .unwrap();
        assert_eq!(descriptor.name, "HTTP");
        assert_eq!(descriptor.kind, TemplateKind::Listener);
        assert_eq!(descriptor.protocol.as_deref(), Some("http"));
        assert_eq!(descriptor.authors[0].handle, "@harmj0y");
        assert!(descriptor.enabled);
        assert!(descriptor.opsec_safe);
        assert_eq!(descriptor.options.len(), 2);
    }

    #[test]
    fn test_wrong_wrapper_key_is_missing_definition() {
        let err = TemplateDescriptor::from_yaml(
            TemplateKind::Module,
            LISTENER_YAML,
            Path::new("modules/http.yaml"),
        )
        .unwrap_err();
        assert!(matches!(err, TemplateError::MissingDefinition { key: "module", .. }));
    }

    #[test]
    fn test_instance_options_are_normalized() {
        let descriptor = TemplateDescriptor::from_yaml(
            TemplateKind::Listener,
            LISTENER_YAML,
            Path::new("listeners/http.yaml"),
        )
        .unwrap();
        let instance = TemplateInstance::from_descriptor(Arc::new(descriptor));
        for option in instance.options.values() {
            assert!(option.strict.is_some());
            assert!(option.suggested_values.is_some());
            assert!(option.value_type.is_some());
        }
        assert_eq!(
            instance.options["Port"].value_type,
            Some(ValueType::Integer)
        );
    }

    #[test]
    fn test_schema_json_carries_normalized_fields() {
        let descriptor = TemplateDescriptor::from_yaml(
            TemplateKind::Listener,
            LISTENER_YAML,
            Path::new("listeners/http.yaml"),
        )
        .unwrap();
        let instance = TemplateInstance::from_descriptor(Arc::new(descriptor));
        let schema = instance.schema_json();
        let name = &schema["Name"];
        assert_eq!(name["required"], serde_json::json!(true));
        assert_eq!(name["strict"], serde_json::json!(false));
        assert_eq!(name["suggested_values"], serde_json::json!([]));
        assert_eq!(name["value_type"], serde_json::json!("text"));
    }

    #[test]
    fn test_set_option_strict_rejects_unsuggested() {
        let yaml = r#"
listener:
  name: T
  options:
    Proxy:
      description: "Proxy to use"
      value: "default"
      strict: true
      suggested_values: ["default", "none"]
"#;
        let descriptor = TemplateDescriptor::from_yaml(
            TemplateKind::Listener,
            yaml,
            Path::new("listeners/t.yaml"),
        )
        .unwrap();
        let mut instance = TemplateInstance::from_descriptor(Arc::new(descriptor));
        assert!(instance.set_option("Proxy", "none").is_ok());
        assert!(instance.set_option("Proxy", "socks5://x").is_err());
        assert!(instance.set_option("NoSuchOption", "x").is_err());
    }
}
