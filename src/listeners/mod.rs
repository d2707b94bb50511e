//! Listeners — the communication-endpoint template contract.
//!
//! Every protocol variant implements [`Listener`]: uniform option
//! validation, bootstrap-launcher generation, staged-payload generation,
//! and lifecycle control. Lifecycle states: Defined (loaded, unvalidated)
//! → Validated → Started (tracked by name in [`ListenerTracker`]) →
//! Stopped.
//!
//! Network bind and teardown belong to the external transport component;
//! the contract here only produces text and tracks liveness.

pub mod http;
pub mod tracker;

use crate::host::HostContext;
use crate::templates::{TemplateError, TemplateInstance};

pub use http::HttpListener;
pub use tracker::ListenerTracker;

/// Script language of a requested target environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    PowerShell,
    Python,
}

impl Language {
    /// Lenient parse matching operator input (`powershell`, `ps1`, `py`, ...).
    pub fn parse(s: &str) -> Option<Language> {
        let s = s.trim().to_lowercase();
        if s.starts_with("po") || s.starts_with("ps") {
            Some(Language::PowerShell)
        } else if s.starts_with("py") {
            Some(Language::Python)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::PowerShell => "powershell",
            Language::Python => "python",
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Evasion and encoding options forwarded into launcher generation.
#[derive(Debug, Clone)]
pub struct LauncherRequest {
    /// Target environment; launcher generation fails when absent.
    pub language: Option<Language>,
    /// Base64-encode the generated stage (PowerShell `-enc`).
    pub encode: bool,
    /// Run the stage through the output transform before encoding.
    pub obfuscate: bool,
    pub obfuscation_command: String,
    /// `default` (take from the listener profile), `none`, or a literal UA.
    pub user_agent: String,
    /// `default`, `none`, or a proxy URL.
    pub proxy: String,
    /// `default`, `none`, or `[domain\]username:password`.
    pub proxy_creds: String,
    /// AMSI/logging bypass fragments prepended to the stage.
    pub bypasses: Vec<String>,
}

impl Default for LauncherRequest {
    fn default() -> Self {
        LauncherRequest {
            language: None,
            encode: true,
            obfuscate: false,
            obfuscation_command: String::new(),
            user_agent: "default".to_string(),
            proxy: "default".to_string(),
            proxy_creds: "default".to_string(),
            bypasses: Vec::new(),
        }
    }
}

impl LauncherRequest {
    pub fn for_language(language: Language) -> Self {
        LauncherRequest {
            language: Some(language),
            ..Default::default()
        }
    }
}

/// The communication-endpoint template contract.
///
/// `generate_stager`, `generate_agent`, and `generate_comms` have
/// not-implemented defaults: a protocol that does not support staging for
/// some language returns an explicit [`TemplateError::Unsupported`]
/// (warn-logged) rather than an empty success, because callers branch
/// differently on the two.
pub trait Listener: Send + Sync {
    /// The configured template instance backing this listener.
    fn instance(&self) -> &TemplateInstance;

    fn instance_mut(&mut self) -> &mut TemplateInstance;

    /// Configured name, from the `Name` option.
    fn name(&self) -> String {
        self.instance().option_value("Name").unwrap_or_default()
    }

    /// Validate every option independently.
    ///
    /// All options are checked before returning (no short-circuit), so the
    /// error always names every real violation: a required option fails
    /// when, and only when, its trimmed current value is empty.
    fn validate_options(&self) -> Result<(), TemplateError> {
        let mut violations: Vec<&str> = Vec::new();
        for (name, option) in &self.instance().options {
            if option.required && option.value.is_blank() {
                violations.push(name);
            }
        }
        if violations.is_empty() {
            return Ok(());
        }
        violations.sort_unstable();
        let listed = violations
            .iter()
            .map(|name| format!("\"{}\"", name))
            .collect::<Vec<_>>()
            .join(", ");
        Err(TemplateError::Validation(format!(
            "required option(s) {} missing for {}",
            listed,
            self.instance().id()
        )))
    }

    /// Produce the minimal bootstrap command for a target environment.
    ///
    /// Fails when `request.language` is `None` or the variant does not
    /// support it. The entry path must be chosen uniformly at random per
    /// call from the listener's communication profile — never cached.
    fn generate_launcher(
        &self,
        host: &HostContext,
        request: &LauncherRequest,
    ) -> Result<String, TemplateError>;

    /// Stage-1 key-negotiation payload for the given language.
    fn generate_stager(
        &self,
        _host: &HostContext,
        language: Language,
    ) -> Result<String, TemplateError> {
        Err(self.unsupported("generate_stager", language))
    }

    /// Full staged-agent payload for the given language.
    fn generate_agent(
        &self,
        _host: &HostContext,
        language: Language,
    ) -> Result<String, TemplateError> {
        Err(self.unsupported("generate_agent", language))
    }

    /// Just the agent communication block, for live re-pointing of agents.
    fn generate_comms(&self, language: Language) -> Result<String, TemplateError> {
        Err(self.unsupported("generate_comms", language))
    }

    /// Response body the transport serves for non-protocol requests.
    fn default_response(&self) -> String {
        String::new()
    }

    /// Protocol-specific spin-up. The transport bind itself is delegated
    /// to the external endpoint-server component.
    fn on_start(&mut self, _host: &HostContext) -> Result<(), TemplateError> {
        Ok(())
    }

    /// Protocol-specific teardown.
    fn on_shutdown(&mut self) {}

    #[doc(hidden)]
    fn unsupported(&self, operation: &'static str, language: Language) -> TemplateError {
        log::warn!(
            "{}: {} not implemented for {}",
            self.instance().id(),
            operation,
            language
        );
        TemplateError::Unsupported {
            template: self.instance().id().to_string(),
            operation,
            language: language.to_string(),
        }
    }
}

/// Constructor for one protocol variant.
pub type ListenerFactory = fn(TemplateInstance) -> Box<dyn Listener>;

/// Compiled-in protocol behavior registry.
///
/// Listener definitions select behavior by identifier through their
/// `protocol` key; there is no dynamic code loading.
static PROTOCOLS: once_cell::sync::Lazy<std::collections::HashMap<&'static str, ListenerFactory>> =
    once_cell::sync::Lazy::new(|| {
        let mut protocols: std::collections::HashMap<&'static str, ListenerFactory> =
            std::collections::HashMap::new();
        protocols.insert("http", |instance| Box::new(HttpListener::new(instance)));
        protocols
    });

/// Look up the factory registered for a protocol identifier.
pub fn behavior_for(protocol: &str) -> Option<ListenerFactory> {
    PROTOCOLS.get(protocol).copied()
}

/// Construct the listener variant a template instance declares.
pub fn from_instance(instance: TemplateInstance) -> Result<Box<dyn Listener>, TemplateError> {
    let protocol = instance
        .descriptor
        .protocol
        .clone()
        .ok_or_else(|| {
            TemplateError::Validation(format!(
                "template {} declares no protocol",
                instance.id()
            ))
        })?;
    let factory = behavior_for(&protocol).ok_or_else(|| {
        TemplateError::Validation(format!(
            "no listener behavior registered for protocol \"{}\"",
            protocol
        ))
    })?;
    Ok(factory(instance))
}

/// Split a communication profile into its entry paths.
///
/// Profile format: a pipe-delimited record whose first field is a
/// comma-separated path list (the second, when present, is the default
/// user agent). Leading slashes are stripped.
pub fn profile_paths(profile: &str) -> Vec<String> {
    profile
        .split('|')
        .next()
        .unwrap_or("")
        .split(',')
        .map(|p| p.trim().trim_start_matches('/').to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

/// Default user agent carried in the profile's second field, if any.
pub fn profile_user_agent(profile: &str) -> Option<String> {
    profile
        .split('|')
        .nth(1)
        .map(str::trim)
        .filter(|ua| !ua.is_empty())
        .map(str::to_string)
}
