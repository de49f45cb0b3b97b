//! Node client abstraction.
//!
//! The orchestrator only needs three things from a secret-store node:
//! a connection, its status, and somewhere to submit a key share. Keeping
//! them behind traits lets the unseal flow run against a mock in tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::{HostRef, Protocol};
use crate::types::Result;

/// How to reach a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    pub protocol: Protocol,
    /// PEM bundle trusted in addition to the system roots; read once per run
    pub ca_path: Option<PathBuf>,
    pub timeout: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            protocol: Protocol::Https,
            ca_path: None,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Initialization and seal state of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub initialized: bool,
    pub sealed: bool,
    pub progress: u32,
    pub threshold: u32,
}

/// Seal state returned after submitting one key share
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealStatus {
    pub sealed: bool,
    pub progress: u32,
    pub threshold: u32,
}

/// Handle to a single node
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// Fetch the node's current status
    async fn status(&self) -> Result<NodeStatus>;

    /// Submit one unseal key share
    async fn unseal(&self, key_share: &str) -> Result<SealStatus>;
}

/// Builds a [`NodeClient`] for a host
pub trait NodeConnector: Send + Sync + 'static {
    type Client: NodeClient + 'static;

    fn connect(&self, host: &HostRef, options: &ConnectOptions) -> Result<Self::Client>;
}
