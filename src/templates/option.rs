//! Template options — typed values, derived type tags, and normalization.
//!
//! Definition files declare options loosely: authors routinely omit
//! `strict`, `suggested_values`, or even `value`. Every option that reaches
//! generation logic must have a complete, uniform shape, so the normalizer
//! runs on each declared option before the owning instance becomes
//! reachable from the registry, and again on every `new_instance` copy.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A scalar option value as declared in a definition file.
///
/// Untagged: YAML `true`, `8080`, `0.5`, and `"http"` each map to their
/// natural variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Default for OptionValue {
    fn default() -> Self {
        OptionValue::Text(String::new())
    }
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionValue::Bool(b) => write!(f, "{}", b),
            OptionValue::Int(i) => write!(f, "{}", i),
            OptionValue::Float(x) => write!(f, "{}", x),
            OptionValue::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for OptionValue {
    fn from(s: &str) -> Self {
        OptionValue::Text(s.to_string())
    }
}

impl From<String> for OptionValue {
    fn from(s: String) -> Self {
        OptionValue::Text(s)
    }
}

impl OptionValue {
    /// Whether the rendered value is empty after trimming.
    ///
    /// Required-option validation treats whitespace-only text as unset;
    /// booleans and numbers always render non-empty.
    pub fn is_blank(&self) -> bool {
        match self {
            OptionValue::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }
}

/// Derived type tag for an option, computed during normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Text,
    Integer,
    Float,
    Boolean,
    /// Strict option with a non-empty suggested-value set.
    Choice,
}

/// A named, settable parameter on a template.
///
/// `strict`, `suggested_values`, and `value_type` are optional in the file
/// and mandatory after [`normalize`] — generation logic may rely on all
/// three being present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateOption {
    /// Human-readable description.
    #[serde(default)]
    pub description: String,

    /// Whether a non-blank value is required for validation to pass.
    #[serde(default)]
    pub required: bool,

    /// Current value; the declared value doubles as the default.
    #[serde(default)]
    pub value: OptionValue,

    /// When true, the value is constrained to `suggested_values`.
    #[serde(default)]
    pub strict: Option<bool>,

    /// Ordered suggestions presented to the operator.
    #[serde(default)]
    pub suggested_values: Option<Vec<OptionValue>>,

    /// Derived type tag; filled by normalization, never read from the file.
    #[serde(skip_deserializing)]
    pub value_type: Option<ValueType>,
}

impl TemplateOption {
    /// Shorthand used by built-in definitions and tests.
    pub fn new(description: &str, required: bool, value: impl Into<OptionValue>) -> Self {
        TemplateOption {
            description: description.to_string(),
            required,
            value: value.into(),
            strict: None,
            suggested_values: None,
            value_type: None,
        }
    }

    /// Fill in every attribute a definition file is allowed to omit.
    pub fn normalize(&mut self) {
        if self.strict.is_none() {
            self.strict = Some(false);
        }
        if self.suggested_values.is_none() {
            self.suggested_values = Some(Vec::new());
        }
        self.value_type = Some(self.derive_value_type());
    }

    fn derive_value_type(&self) -> ValueType {
        let strict = self.strict.unwrap_or(false);
        let has_suggestions = self
            .suggested_values
            .as_ref()
            .map(|s| !s.is_empty())
            .unwrap_or(false);
        if strict && has_suggestions {
            return ValueType::Choice;
        }
        match self.value {
            OptionValue::Bool(_) => ValueType::Boolean,
            OptionValue::Int(_) => ValueType::Integer,
            OptionValue::Float(_) => ValueType::Float,
            OptionValue::Text(_) => ValueType::Text,
        }
    }
}

/// Normalize every option in a declared schema in place.
pub fn normalize_options(options: &mut HashMap<String, TemplateOption>) {
    for option in options.values_mut() {
        option.normalize();
    }
}
