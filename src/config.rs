//! Global configuration parsing, validation, and credential loading.

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::dispatch::wait::{FixedDelay, Quiescence, WaitPolicy};
use crate::{AppError, Result};

/// Keychain service under which RPC credentials are stored.
pub const KEYRING_SERVICE: &str = "agent-relay";

/// Terminal-multiplexer session settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SessionConfig {
    /// Session name used when no session is bound to `target_tty`.
    #[serde(default = "default_session_name")]
    pub name: String,
    /// Controlling terminal the operator is watching (e.g. `/dev/pts/0`).
    #[serde(default)]
    pub target_tty: Option<String>,
    /// Prefix for freshly created sessions (`<prefix>_<timestamp>`).
    #[serde(default = "default_session_name")]
    pub create_prefix: String,
    /// Program launched inside a freshly created session.
    #[serde(default = "default_bootstrap_command")]
    pub bootstrap_command: String,
    /// Scrollback depth passed to every buffer dump.
    #[serde(default = "default_scrollback_lines")]
    pub scrollback_lines: u32,
    /// Optional tmux socket path (`tmux -S`).
    #[serde(default)]
    pub socket: Option<PathBuf>,
    /// Settle delay after creating a session.
    #[serde(default = "default_create_settle_millis")]
    pub create_settle_millis: u64,
    /// Settle delay after sending the bootstrap command.
    #[serde(default = "default_bootstrap_settle_millis")]
    pub bootstrap_settle_millis: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            name: default_session_name(),
            target_tty: None,
            create_prefix: default_session_name(),
            bootstrap_command: default_bootstrap_command(),
            scrollback_lines: default_scrollback_lines(),
            socket: None,
            create_settle_millis: default_create_settle_millis(),
            bootstrap_settle_millis: default_bootstrap_settle_millis(),
        }
    }
}

fn default_session_name() -> String {
    "agent".into()
}

fn default_bootstrap_command() -> String {
    "agent".into()
}

fn default_scrollback_lines() -> u32 {
    10_000
}

fn default_create_settle_millis() -> u64 {
    1_000
}

fn default_bootstrap_settle_millis() -> u64 {
    3_000
}

/// How the dispatcher decides a command has finished responding.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum WaitMode {
    /// Sleep a fixed delay, then capture.
    #[default]
    Fixed,
    /// Poll the buffer until its line count stops changing.
    Quiescence,
}

/// Command dispatch settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct DispatchConfig {
    /// Wait strategy applied after each command.
    #[serde(default)]
    pub wait: WaitMode,
    /// Fixed delay between send and capture.
    #[serde(default = "default_delay_seconds")]
    pub delay_seconds: u64,
    /// Quiescence poll interval.
    #[serde(default = "default_poll_millis")]
    pub poll_millis: u64,
    /// Consecutive unchanged polls that count as settled.
    #[serde(default = "default_stable_polls")]
    pub stable_polls: u32,
    /// Minimum time before quiescence may be declared.
    #[serde(default = "default_min_wait_seconds")]
    pub min_wait_seconds: u64,
    /// Upper bound for quiescence polling.
    #[serde(default = "default_max_wait_seconds")]
    pub max_wait_seconds: u64,
    /// Directory receiving one file per captured response.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            wait: WaitMode::default(),
            delay_seconds: default_delay_seconds(),
            poll_millis: default_poll_millis(),
            stable_polls: default_stable_polls(),
            min_wait_seconds: default_min_wait_seconds(),
            max_wait_seconds: default_max_wait_seconds(),
            output_dir: default_output_dir(),
        }
    }
}

fn default_delay_seconds() -> u64 {
    2
}

fn default_poll_millis() -> u64 {
    1_000
}

fn default_stable_polls() -> u32 {
    3
}

fn default_min_wait_seconds() -> u64 {
    5
}

fn default_max_wait_seconds() -> u64 {
    120
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

impl DispatchConfig {
    /// Build the configured wait policy.
    #[must_use]
    pub fn wait_policy(&self) -> Box<dyn WaitPolicy> {
        match self.wait {
            WaitMode::Fixed => Box::new(FixedDelay::new(Duration::from_secs(self.delay_seconds))),
            WaitMode::Quiescence => Box::new(Quiescence {
                poll_interval: Duration::from_millis(self.poll_millis),
                stable_polls: self.stable_polls,
                min_wait: Duration::from_secs(self.min_wait_seconds),
                max_wait: Duration::from_secs(self.max_wait_seconds),
            }),
        }
    }
}

/// Stdio JSON-RPC tool server settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RpcConfig {
    /// Tool server executable.
    pub server: String,
    /// Arguments passed to the server.
    #[serde(default)]
    pub args: Vec<String>,
    /// Plain environment overrides (endpoint, connection options).
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Variables resolved from the keychain at runtime and injected as-is.
    #[serde(default)]
    pub credential_env: Vec<String>,
    /// Overall deadline for one tool call.
    #[serde(default = "default_rpc_timeout_seconds")]
    pub timeout_seconds: u64,
    /// Protocol version announced in `initialize`.
    #[serde(default = "default_protocol_version")]
    pub protocol_version: String,
    /// Client name announced in `initialize`.
    #[serde(default = "default_client_name")]
    pub client_name: String,
    /// Fail the call unless the server advertises `capabilities.tools`.
    #[serde(default)]
    pub require_tools_capability: bool,
}

fn default_rpc_timeout_seconds() -> u64 {
    120
}

fn default_protocol_version() -> String {
    "2024-11-05".into()
}

fn default_client_name() -> String {
    "agent-relay".into()
}

/// Secondary analysis CLI settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AgentConfig {
    /// Executable receiving the full prompt as its last argument.
    #[serde(default = "default_bootstrap_command")]
    pub program: String,
    /// Arguments placed before the prompt.
    #[serde(default)]
    pub args: Vec<String>,
    /// Deadline for one analysis run.
    #[serde(default = "default_agent_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            program: default_bootstrap_command(),
            args: Vec::new(),
            timeout_seconds: default_agent_timeout_seconds(),
        }
    }
}

fn default_agent_timeout_seconds() -> u64 {
    300
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Multiplexer session settings.
    #[serde(default)]
    pub session: SessionConfig,
    /// Dispatch and wait settings.
    #[serde(default)]
    pub dispatch: DispatchConfig,
    /// Tool server settings; absent when only the session path is used.
    #[serde(default)]
    pub rpc: Option<RpcConfig>,
    /// Secondary analysis CLI settings.
    #[serde(default)]
    pub agent: AgentConfig,
    /// Resolved credential values (populated at runtime).
    #[serde(skip)]
    pub credentials: BTreeMap<String, String>,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and validate it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve every `rpc.credential_env` entry from the OS keychain with
    /// env-var fallback.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if a credential is found in neither place.
    pub async fn load_credentials(&mut self) -> Result<()> {
        let Some(rpc) = self.rpc.as_ref() else {
            return Ok(());
        };
        let mut resolved = BTreeMap::new();
        for name in &rpc.credential_env {
            let value = load_credential(name).await?;
            resolved.insert(name.clone(), value);
        }
        self.credentials = resolved;
        Ok(())
    }

    /// Environment overrides for the RPC child: plain entries plus resolved
    /// credentials, credentials winning on conflict.
    #[must_use]
    pub fn rpc_environment(&self) -> BTreeMap<String, String> {
        let mut merged = self
            .rpc
            .as_ref()
            .map(|rpc| rpc.env.clone())
            .unwrap_or_default();
        merged.extend(
            self.credentials
                .iter()
                .map(|(key, value)| (key.clone(), value.clone())),
        );
        merged
    }

    /// Require the `[rpc]` section.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` when the section is absent.
    pub fn require_rpc(&self) -> Result<&RpcConfig> {
        self.rpc
            .as_ref()
            .ok_or_else(|| AppError::Config("missing [rpc] section".into()))
    }

    fn validate(&self) -> Result<()> {
        if self.session.name.trim().is_empty() {
            return Err(AppError::Config("session.name must not be empty".into()));
        }

        if self.session.scrollback_lines == 0 {
            return Err(AppError::Config(
                "session.scrollback_lines must be greater than zero".into(),
            ));
        }

        if self.dispatch.wait == WaitMode::Quiescence {
            if self.dispatch.poll_millis == 0 || self.dispatch.stable_polls == 0 {
                return Err(AppError::Config(
                    "dispatch.poll_millis and dispatch.stable_polls must be greater than zero"
                        .into(),
                ));
            }
            if self.dispatch.max_wait_seconds < self.dispatch.min_wait_seconds {
                return Err(AppError::Config(
                    "dispatch.max_wait_seconds must not be less than dispatch.min_wait_seconds"
                        .into(),
                ));
            }
        }

        if let Some(rpc) = &self.rpc {
            if rpc.server.trim().is_empty() {
                return Err(AppError::Config("rpc.server must not be empty".into()));
            }
            if rpc.timeout_seconds == 0 {
                return Err(AppError::Config(
                    "rpc.timeout_seconds must be greater than zero".into(),
                ));
            }
        }

        if self.agent.timeout_seconds == 0 {
            return Err(AppError::Config(
                "agent.timeout_seconds must be greater than zero".into(),
            ));
        }

        Ok(())
    }
}

/// Resolve one credential the RPC server expects in its environment.
///
/// A non-empty keychain entry under [`KEYRING_SERVICE`] wins; otherwise the
/// variable of the same name is taken from this process's environment.
async fn load_credential(name: &str) -> Result<String> {
    if let Some(secret) = keychain_secret(name).await? {
        return Ok(secret);
    }
    match env::var(name) {
        Ok(value) => Ok(value),
        Err(_) => Err(AppError::Config(format!(
            "rpc credential {name} is neither in the {KEYRING_SERVICE} keychain nor set in the environment"
        ))),
    }
}

/// Keychain value for `name`, or `None` when missing, empty or unreadable.
async fn keychain_secret(name: &str) -> Result<Option<String>> {
    let account = name.to_owned();
    let lookup = tokio::task::spawn_blocking(move || {
        keyring::Entry::new(KEYRING_SERVICE, &account)?.get_password()
    })
    .await
    .map_err(|err| AppError::Config(format!("keychain lookup for {name} did not complete: {err}")))?;

    match lookup {
        Ok(secret) if secret.is_empty() => {
            warn!(credential = name, "keychain holds an empty value; using environment");
            Ok(None)
        }
        Ok(secret) => Ok(Some(secret)),
        Err(keyring::Error::NoEntry) => Ok(None),
        Err(err) => {
            warn!(credential = name, %err, "keychain unavailable; using environment");
            Ok(None)
        }
    }
}
