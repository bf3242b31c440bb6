//! Out-of-process plugin runner.
//!
//! A plugin binary is started with the requested application protocol
//! version in its environment and answers with a single handshake line on
//! stdout:
//!
//! ```text
//! CORE-VERSION|APP-VERSION|NETWORK|ADDRESS|PROTOCOL
//! 1|5|tcp|127.0.0.1:41234|grpc
//! ```
//!
//! The runner then dials the advertised address with a gRPC channel.

use crate::error::{PluginError, PluginResult};
use rust_common::{RetryConfig, RetryPolicy};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tonic::transport::{Channel, Endpoint};
use tracing::{debug, info, warn};

/// Handshake protocol generation understood by this runner.
pub const CORE_PROTOCOL_VERSION: u32 = 1;

/// Environment variable carrying the application versions we can speak.
pub const PROTOCOL_VERSIONS_ENV: &str = "PLUGIN_PROTOCOL_VERSIONS";

/// Magic cookie key; plugins refuse to run when it is absent.
pub const MAGIC_COOKIE_KEY: &str = "VAULT_DATABASE_PLUGIN";

/// Magic cookie value.
pub const MAGIC_COOKIE_VALUE: &str = "926a0820-aea2-be28-51d6-83cdf00e8edb";

/// A plugin binary registered with the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginCommand {
    /// Plugin name, e.g. `postgresql-database-plugin`
    pub name: String,
    /// Semantic version; empty for an unversioned registration
    pub version: String,
    /// Executable path
    pub command: PathBuf,
    /// Arguments
    pub args: Vec<String>,
    /// Extra environment
    pub env: Vec<(String, String)>,
    /// Expected hex SHA-256 of the executable
    pub sha256: Option<String>,
}

impl PluginCommand {
    /// Command for `name` at `version` running `command`.
    #[must_use]
    pub fn new(name: impl Into<String>, version: impl Into<String>, command: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            command: command.into(),
            args: Vec::new(),
            env: Vec::new(),
            sha256: None,
        }
    }

    /// Set the arguments.
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Add an environment variable.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Set the expected checksum.
    #[must_use]
    pub fn with_sha256(mut self, sha256: impl Into<String>) -> Self {
        self.sha256 = Some(sha256.into());
        self
    }
}

/// A parsed handshake line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    /// Handshake protocol generation
    pub core_version: u32,
    /// Application protocol the plugin chose
    pub app_version: u32,
    /// Network, always `tcp` here
    pub network: String,
    /// Listen address
    pub addr: String,
    /// Wire protocol, always `grpc` here
    pub protocol: String,
}

impl Handshake {
    /// Parse a handshake line.
    ///
    /// # Errors
    ///
    /// Returns `PluginError::Spawn` for malformed or unsupported handshakes.
    pub fn parse(line: &str) -> PluginResult<Self> {
        let parts: Vec<&str> = line.trim().split('|').collect();
        if parts.len() < 4 {
            return Err(PluginError::Spawn(format!("malformed handshake {:?}", line.trim())));
        }
        let number = |s: &str, what: &str| {
            s.parse::<u32>()
                .map_err(|_| PluginError::Spawn(format!("invalid {what} version {s:?} in handshake")))
        };
        let handshake = Self {
            core_version: number(parts[0], "core")?,
            app_version: number(parts[1], "application")?,
            network: parts[2].to_string(),
            addr: parts[3].to_string(),
            protocol: parts.get(4).map_or("netrpc", |p| *p).to_string(),
        };
        if handshake.core_version != CORE_PROTOCOL_VERSION {
            return Err(PluginError::Spawn(format!(
                "incompatible core API version {}, expected {CORE_PROTOCOL_VERSION}",
                handshake.core_version
            )));
        }
        if handshake.network != "tcp" {
            return Err(PluginError::Spawn(format!("unsupported network {:?}", handshake.network)));
        }
        if handshake.protocol != "grpc" {
            return Err(PluginError::Spawn(format!("unsupported plugin protocol {:?}", handshake.protocol)));
        }
        Ok(handshake)
    }
}

/// A running plugin process.
#[derive(Debug)]
pub struct PluginProcess {
    name: String,
    addr: String,
    child: Mutex<Option<Child>>,
}

impl PluginProcess {
    fn new(name: &str, addr: String, child: Child) -> Self {
        Self {
            name: name.to_string(),
            addr,
            child: Mutex::new(Some(child)),
        }
    }

    /// Plugin name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Address the plugin listens on.
    #[must_use]
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Kill the process. Later calls do nothing.
    pub async fn kill(&self) {
        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(e) = child.kill().await {
                warn!(plugin = %self.name, error = %e, "failed to kill plugin process");
            } else {
                debug!(plugin = %self.name, "plugin process killed");
            }
        }
    }
}

/// Runner configuration.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// How long to wait for the handshake line
    pub handshake_timeout: Duration,
    /// Backoff for dialing the advertised address
    pub connect_retry: RetryConfig,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
            connect_retry: RetryConfig::default(),
        }
    }
}

/// Starts plugin processes and connects to them.
#[derive(Debug, Clone, Default)]
pub struct PluginRunner {
    config: RunnerConfig,
}

impl PluginRunner {
    /// Runner with `config`.
    #[must_use]
    pub const fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    /// Start `cmd` asking for application protocol `app_version`.
    ///
    /// # Errors
    ///
    /// `VersionMismatch` when the plugin picks another protocol version,
    /// `Spawn` when it cannot be started or hand-shaken, `Transport` when
    /// the advertised address cannot be dialed.
    pub async fn start(&self, cmd: &PluginCommand, app_version: u32) -> PluginResult<(Channel, PluginProcess)> {
        let mut command = Command::new(&cmd.command);
        command
            .args(&cmd.args)
            .envs(cmd.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .env(MAGIC_COOKIE_KEY, MAGIC_COOKIE_VALUE)
            .env(PROTOCOL_VERSIONS_ENV, app_version.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|e| PluginError::Spawn(format!("{}: {e}", cmd.name)))?;
        let Some(stdout) = child.stdout.take() else {
            let _ = child.kill().await;
            return Err(PluginError::Spawn(format!("{}: stdout not captured", cmd.name)));
        };
        let mut lines = BufReader::new(stdout).lines();

        let line = match tokio::time::timeout(self.config.handshake_timeout, lines.next_line()).await {
            Ok(Ok(Some(line))) => line,
            Ok(Ok(None)) => {
                let _ = child.kill().await;
                return Err(PluginError::Spawn(format!("{}: exited before handshake", cmd.name)));
            }
            Ok(Err(e)) => {
                let _ = child.kill().await;
                return Err(PluginError::Spawn(format!("{}: reading handshake: {e}", cmd.name)));
            }
            Err(_) => {
                let _ = child.kill().await;
                return Err(PluginError::Spawn(format!(
                    "{}: no handshake within {:?}",
                    cmd.name, self.config.handshake_timeout
                )));
            }
        };

        let handshake = match Handshake::parse(&line) {
            Ok(h) => h,
            Err(e) => {
                let _ = child.kill().await;
                return Err(e);
            }
        };
        if handshake.app_version != app_version {
            let _ = child.kill().await;
            return Err(PluginError::VersionMismatch(format!(
                "{} requested protocol {app_version}, plugin negotiated {}",
                cmd.name, handshake.app_version
            )));
        }

        // Keep draining stdout so the plugin never blocks on a full pipe.
        let name = cmd.name.clone();
        tokio::spawn(async move {
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(plugin = %name, "{line}");
            }
        });

        let channel = match self.connect(&handshake.addr).await {
            Ok(channel) => channel,
            Err(e) => {
                let _ = child.kill().await;
                return Err(e);
            }
        };
        info!(plugin = %cmd.name, version = %cmd.version, addr = %handshake.addr, app_version, "plugin started");
        Ok((channel, PluginProcess::new(&cmd.name, handshake.addr, child)))
    }

    async fn connect(&self, addr: &str) -> PluginResult<Channel> {
        let endpoint = Endpoint::from_shared(format!("http://{addr}"))
            .map_err(|e| PluginError::Spawn(format!("invalid plugin address {addr:?}: {e}")))?;
        RetryPolicy::new(self.config.connect_retry.clone())
            .execute(|| {
                let endpoint = endpoint.clone();
                async move { endpoint.connect().await.map_err(PluginError::from) }
            })
            .await
    }
}
