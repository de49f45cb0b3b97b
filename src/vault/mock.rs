//! Mock node connector for testing.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::traits::{ConnectOptions, NodeClient, NodeConnector, NodeStatus, SealStatus};
use crate::config::HostRef;
use crate::types::{Result, UnsealerError};

/// A call observed by the mock, in the order it happened
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    Connect { host: String },
    Status { host: String },
    Unseal { host: String, key: String },
}

impl MockCall {
    pub fn host(&self) -> &str {
        match self {
            MockCall::Connect { host } | MockCall::Status { host } | MockCall::Unseal { host, .. } => {
                host
            }
        }
    }
}

/// Scripted behavior of one mock node.
///
/// Each successful submission advances progress by one; reaching the
/// threshold unseals the node and resets progress, like Vault does.
#[derive(Debug, Clone)]
pub struct MockNode {
    initialized: bool,
    threshold: u32,
    connect_error: Option<String>,
    status_error: Option<String>,
    /// Zero-based submission indices that fail with a transport error
    failing_submissions: HashSet<usize>,
    latency: Duration,
}

impl MockNode {
    /// An initialized, sealed node needing `threshold` shares
    pub fn new(threshold: u32) -> Self {
        Self {
            initialized: true,
            threshold,
            connect_error: None,
            status_error: None,
            failing_submissions: HashSet::new(),
            latency: Duration::ZERO,
        }
    }

    pub fn uninitialized(mut self) -> Self {
        self.initialized = false;
        self
    }

    pub fn with_connect_error(mut self, message: impl Into<String>) -> Self {
        self.connect_error = Some(message.into());
        self
    }

    pub fn with_status_error(mut self, message: impl Into<String>) -> Self {
        self.status_error = Some(message.into());
        self
    }

    pub fn failing_submission(mut self, index: usize) -> Self {
        self.failing_submissions.insert(index);
        self
    }

    /// Delay applied to every status and unseal call
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }
}

#[derive(Debug, Default)]
struct NodeState {
    sealed: bool,
    progress: u32,
    submissions: usize,
}

#[derive(Debug, Default)]
struct MockState {
    calls: Vec<MockCall>,
    nodes: HashMap<String, NodeState>,
    in_flight: usize,
    max_in_flight: usize,
}

/// Connector handing out [`MockClient`]s for pre-registered hosts.
///
/// Hosts that were not registered fail to connect.
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    nodes: HashMap<String, MockNode>,
    state: Arc<Mutex<MockState>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node by host name
    pub fn with_node(mut self, host: impl Into<String>, node: MockNode) -> Self {
        let host = host.into();
        self.lock().nodes.insert(
            host.clone(),
            NodeState {
                sealed: true,
                ..Default::default()
            },
        );
        self.nodes.insert(host, node);
        self
    }

    /// Every call seen so far
    pub fn calls(&self) -> Vec<MockCall> {
        self.lock().calls.clone()
    }

    /// Calls made against one host
    pub fn calls_for(&self, host: &str) -> Vec<MockCall> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.host() == host)
            .cloned()
            .collect()
    }

    /// Keys submitted to one host, in submission order
    pub fn submitted_keys(&self, host: &str) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                MockCall::Unseal { host: h, key } if h == host => Some(key.clone()),
                _ => None,
            })
            .collect()
    }

    /// Highest number of status/unseal calls that were running at once
    pub fn max_in_flight(&self) -> usize {
        self.lock().max_in_flight
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        // A panicking test thread must not hide the recorded calls.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl NodeConnector for MockConnector {
    type Client = MockClient;

    fn connect(&self, host: &HostRef, _options: &ConnectOptions) -> Result<MockClient> {
        self.lock().calls.push(MockCall::Connect {
            host: host.name.clone(),
        });

        let node = self
            .nodes
            .get(&host.name)
            .ok_or_else(|| UnsealerError::Http(format!("unknown host {}", host)))?;
        if let Some(ref message) = node.connect_error {
            return Err(UnsealerError::Tls(message.clone()));
        }

        Ok(MockClient {
            host: host.name.clone(),
            node: node.clone(),
            connector: self.clone(),
        })
    }
}

/// Client for one mock node
#[derive(Debug)]
pub struct MockClient {
    host: String,
    node: MockNode,
    connector: MockConnector,
}

impl MockClient {
    async fn enter(&self, call: MockCall) {
        {
            let mut state = self.connector.lock();
            state.calls.push(call);
            state.in_flight += 1;
            state.max_in_flight = state.max_in_flight.max(state.in_flight);
        }
        if !self.node.latency.is_zero() {
            tokio::time::sleep(self.node.latency).await;
        }
    }

    fn leave(&self) {
        self.connector.lock().in_flight -= 1;
    }
}

#[async_trait]
impl NodeClient for MockClient {
    async fn status(&self) -> Result<NodeStatus> {
        self.enter(MockCall::Status {
            host: self.host.clone(),
        })
        .await;

        let result = if let Some(ref message) = self.node.status_error {
            Err(UnsealerError::Http(message.clone()))
        } else {
            let state = self.connector.lock();
            let node = state.nodes.get(&self.host);
            Ok(NodeStatus {
                initialized: self.node.initialized,
                sealed: node.map(|n| n.sealed).unwrap_or(true),
                progress: node.map(|n| n.progress).unwrap_or(0),
                threshold: self.node.threshold,
            })
        };

        self.leave();
        result
    }

    async fn unseal(&self, key_share: &str) -> Result<SealStatus> {
        self.enter(MockCall::Unseal {
            host: self.host.clone(),
            key: key_share.to_string(),
        })
        .await;

        let result = {
            let mut state = self.connector.lock();
            let node = state.nodes.entry(self.host.clone()).or_default();
            let index = node.submissions;
            node.submissions += 1;

            if self.node.failing_submissions.contains(&index) {
                Err(UnsealerError::Http(format!(
                    "connection reset while submitting share #{}",
                    index + 1
                )))
            } else {
                if node.sealed {
                    node.progress += 1;
                    if node.progress >= self.node.threshold {
                        node.sealed = false;
                        node.progress = 0;
                    }
                }
                Ok(SealStatus {
                    sealed: node.sealed,
                    progress: node.progress,
                    threshold: self.node.threshold,
                })
            }
        };

        self.leave();
        result
    }
}
