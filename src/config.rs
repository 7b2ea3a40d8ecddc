//! CLI configuration: where the agent lives and how to talk to it.
//!
//! Agent address priority: `--agent` flag > `MESOS_AGENT` env > config file.
//! Config file: `--config` > `MESOS_CLI_CONFIG` env > `~/.mesos/config.yaml`.
//!
//! ```yaml
//! agent:
//!   address: 10.0.0.5:5051
//!   timeout_secs: 5
//!   ssl_verify: true
//!   principal: ops
//!   secret: s3cret
//! ```

use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cmd::shared::AgentResolver;
use crate::mesos::{AgentAddress, ClientSettings, Credentials, parse_agent_address};

pub const AGENT_ENV: &str = "MESOS_AGENT";
pub const CONFIG_ENV: &str = "MESOS_CLI_CONFIG";

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub agent: AgentSection,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AgentSection {
    pub address: Option<String>,
    pub timeout_secs: u64,
    pub ssl_verify: bool,
    pub principal: Option<String>,
    pub secret: Option<String>,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            address: None,
            timeout_secs: 5,
            ssl_verify: true,
            principal: None,
            secret: None,
        }
    }
}

impl ConfigFile {
    pub fn parse(raw: &str, origin: &Path) -> Result<Self> {
        // An empty document deserializes as null; treat it as defaults.
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw)
            .with_context(|| format!("Failed to parse config file '{}'", origin.display()))
    }

    /// Load `path`. A missing file is an error only when `required`.
    pub fn load(path: &Path, required: bool) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(raw) => Self::parse(&raw, path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && !required => {
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::Error::new(e)
                .context(format!("Failed to read config file '{}'", path.display()))),
        }
    }
}

/// Resolved configuration for one CLI invocation.
///
/// Loading never fails; a broken config file is reported by `agent()`.
#[derive(Debug, Default)]
pub struct Config {
    flag_agent: Option<String>,
    env_agent: Option<String>,
    file: ConfigFile,
    origin: Option<PathBuf>,
    settings: ClientSettings,
    problem: Option<String>,
}

impl Config {
    /// Build from CLI flags plus the process environment.
    pub fn load(flag_agent: Option<String>, flag_config: Option<PathBuf>) -> Self {
        let env_agent = non_blank_env(AGENT_ENV);
        let explicit = flag_config.or_else(|| non_blank_env(CONFIG_ENV).map(PathBuf::from));

        let (loaded, origin) = match explicit {
            Some(path) => (ConfigFile::load(&path, true), Some(path)),
            None => match default_config_path() {
                Some(path) => (ConfigFile::load(&path, false), Some(path)),
                None => (Ok(ConfigFile::default()), None),
            },
        };
        if let Some(p) = &origin {
            crate::log_trace!("config file: {}", p.display());
        }

        match loaded {
            Ok(file) => Self::from_parts(flag_agent, env_agent, file, origin),
            Err(e) => {
                let mut config =
                    Self::from_parts(flag_agent, env_agent, ConfigFile::default(), origin);
                config.problem = Some(format!("{e:#}"));
                config
            }
        }
    }

    pub fn from_parts(
        flag_agent: Option<String>,
        env_agent: Option<String>,
        file: ConfigFile,
        origin: Option<PathBuf>,
    ) -> Self {
        let (settings, problem) = match build_settings(&file.agent) {
            Ok(settings) => (settings, None),
            Err(e) => (ClientSettings::default(), Some(format!("{e:#}"))),
        };
        Self {
            flag_agent,
            env_agent,
            file,
            origin,
            settings,
            problem,
        }
    }

    /// Connection settings. Defaults stand in while the config is broken;
    /// `agent()` refuses to resolve in that case.
    pub fn client_settings(&self) -> ClientSettings {
        self.settings.clone()
    }
}

fn build_settings(section: &AgentSection) -> Result<ClientSettings> {
    if section.timeout_secs == 0 {
        bail!("agent.timeout_secs must be greater than zero");
    }
    let credentials = match (&section.principal, &section.secret) {
        (Some(principal), Some(secret)) => Some(Credentials {
            principal: principal.clone(),
            secret: secret.clone(),
        }),
        (None, None) => None,
        _ => bail!("agent.principal and agent.secret must be set together"),
    };
    Ok(ClientSettings {
        timeout: Duration::from_secs(section.timeout_secs),
        ssl_verify: section.ssl_verify,
        credentials,
    })
}

impl AgentResolver for Config {
    fn agent(&self) -> Result<AgentAddress> {
        // Checked before --agent: the file also holds credentials and TLS settings.
        if let Some(problem) = &self.problem {
            bail!("{problem}");
        }
        if let Some(raw) = &self.flag_agent {
            return parse_agent_address(raw).context("Invalid --agent value");
        }
        if let Some(raw) = &self.env_agent {
            return parse_agent_address(raw).with_context(|| format!("Invalid {AGENT_ENV} value"));
        }
        if let Some(raw) = &self.file.agent.address {
            let origin = self
                .origin
                .as_deref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "config".into());
            return parse_agent_address(raw)
                .with_context(|| format!("Invalid agent.address in '{origin}'"));
        }
        Err(anyhow!(
            "no agent address configured (use --agent, set {AGENT_ENV}, or add agent.address to the config file)"
        ))
    }
}

fn non_blank_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.trim().is_empty())
}

fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".mesos").join("config.yaml"))
}
