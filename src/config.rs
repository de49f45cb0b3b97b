//! Configuration for vault-unsealer
//!
//! CLI arguments and environment variables via clap, layered over a TOML
//! file describing the datacenters, their hosts and their unseal key shares.
//! Values given on the command line win over the file.

use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::types::{Result, UnsealerError};
use crate::vault::ConnectOptions;

/// Default Vault API port
pub const DEFAULT_VAULT_PORT: u16 = 8200;

/// vault-unsealer - unseal every Vault node in one or more datacenters
#[derive(Parser, Debug, Clone)]
#[command(name = "vault-unsealer")]
#[command(about = "Unseal Vault clusters across datacenters using configured key shares")]
pub struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "UNSEALER_CONFIG", default_value = "unsealer.toml")]
    pub config: PathBuf,

    /// Only process the datacenter with this name (empty = all datacenters)
    #[arg(short, long, env = "UNSEALER_DATACENTER", default_value = "")]
    pub datacenter: String,

    /// PEM bundle used to verify the Vault servers' TLS certificates
    #[arg(long, env = "UNSEALER_CA_PATH")]
    pub ca_path: Option<PathBuf>,

    /// Scheme used to reach the Vault API (overrides the config file)
    #[arg(long, env = "UNSEALER_PROTOCOL", value_enum)]
    pub protocol: Option<Protocol>,

    /// Treat every configured key as a base64 GPG-encrypted share
    #[arg(long, env = "UNSEALER_GPG", default_value = "false")]
    pub gpg: bool,

    /// Passphrase handed to gpg when decrypting key shares
    #[arg(long, env = "UNSEALER_GPG_PASSPHRASE", hide_env_values = true)]
    pub gpg_passphrase: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value = "text")]
    pub log_format: LogFormat,

    /// Per-request timeout against a Vault node, in seconds
    #[arg(long, env = "UNSEALER_REQUEST_TIMEOUT_SECS", default_value = "30")]
    pub request_timeout_secs: u64,

    /// Exit with a non-zero status when any host failed
    #[arg(long, env = "UNSEALER_FAIL_ON_ERROR", default_value = "false")]
    pub fail_on_error: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Operations available from the command line
#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Command {
    /// Submit the configured key shares to every selected host (default)
    #[default]
    Unseal,
    /// Report the seal status of every selected host without submitting keys
    Status,
}

impl Args {
    /// The subcommand to run, falling back to `unseal`
    pub fn command(&self) -> Command {
        self.command.unwrap_or_default()
    }
}

/// URL scheme used to reach a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    #[default]
    Https,
}

impl Protocol {
    pub fn scheme(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scheme())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// One unseal key share as written in the config file.
///
/// Either a literal share or an encrypted reference; see
/// [`crate::keys::KeyResolver`] for how the two are told apart.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRef {
    pub key: String,
}

impl KeyRef {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

// Key shares must never end up in logs.
impl fmt::Debug for KeyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyRef").field("key", &"<redacted>").finish()
    }
}

/// One Vault node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostRef {
    pub name: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl HostRef {
    pub fn new(name: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            port,
        }
    }
}

impl fmt::Display for HostRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.port)
    }
}

/// A named group of hosts sharing the same key shares
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Datacenter {
    pub name: String,
    #[serde(default)]
    pub keys: Vec<KeyRef>,
    #[serde(default)]
    pub hosts: Vec<HostRef>,
}

/// Contents of the TOML configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub protocol: Option<Protocol>,

    #[serde(default)]
    pub ca_path: Option<PathBuf>,

    /// Every key is a base64 GPG-encrypted share
    #[serde(default)]
    pub gpg: bool,

    #[serde(default)]
    pub datacenters: Vec<Datacenter>,
}

fn default_port() -> u16 {
    DEFAULT_VAULT_PORT
}

impl FileConfig {
    /// Parse a configuration document
    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Read and parse a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            UnsealerError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
    }
}

/// Effective settings for one run: file config with CLI overrides applied
#[derive(Debug, Clone)]
pub struct UnsealerConfig {
    pub datacenters: Vec<Datacenter>,
    /// Datacenter name filter; empty selects everything
    pub selector: String,
    pub connect: ConnectOptions,
    pub gpg: bool,
    pub gpg_passphrase: Option<String>,
}

impl UnsealerConfig {
    /// Load the file named by `args` and merge the CLI overrides
    pub fn load(args: &Args) -> Result<Self> {
        let file = FileConfig::load(&args.config)?;
        let config = Self::merge(file, args);
        config.validate()?;
        Ok(config)
    }

    /// Merge a parsed file with CLI arguments (CLI wins)
    pub fn merge(file: FileConfig, args: &Args) -> Self {
        Self {
            datacenters: file.datacenters,
            selector: args.datacenter.trim().to_string(),
            connect: ConnectOptions {
                protocol: args.protocol.or(file.protocol).unwrap_or_default(),
                ca_path: args.ca_path.clone().or(file.ca_path),
                timeout: Duration::from_secs(args.request_timeout_secs),
            },
            gpg: args.gpg || file.gpg,
            gpg_passphrase: args.gpg_passphrase.clone(),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.datacenters.is_empty() {
            return Err(UnsealerError::Config("no datacenters configured".to_string()));
        }

        let mut seen = HashSet::new();
        for dc in &self.datacenters {
            if dc.name.trim().is_empty() {
                return Err(UnsealerError::Config(
                    "datacenter with an empty name".to_string(),
                ));
            }
            if dc.name.trim() != dc.name {
                return Err(UnsealerError::Config(format!(
                    "datacenter name '{}' has surrounding whitespace",
                    dc.name
                )));
            }
            if !seen.insert(dc.name.as_str()) {
                return Err(UnsealerError::Config(format!(
                    "duplicate datacenter name '{}'",
                    dc.name
                )));
            }
            for host in &dc.hosts {
                if host.name.trim().is_empty() {
                    return Err(UnsealerError::Config(format!(
                        "datacenter '{}' has a host with an empty name",
                        dc.name
                    )));
                }
                if host.port == 0 {
                    return Err(UnsealerError::Config(format!(
                        "host '{}' in datacenter '{}' has port 0",
                        host.name, dc.name
                    )));
                }
            }
        }

        if self.connect.timeout.is_zero() {
            return Err(UnsealerError::Config(
                "request timeout must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}
