//! Drives a single host through connect, status check and share submission

use std::sync::Arc;
use tracing::{debug, warn};

use super::outcome::{
    HostFailure, HostResult, HostStatusResult, StatusReport, SubmitFailure, UnsealError,
    UnsealOutcome,
};
use crate::config::HostRef;
use crate::keys::ResolvedKeySet;
use crate::vault::{ConnectOptions, NodeClient, NodeConnector, SealStatus};

/// Unseals one host at a time; cheap to clone into host tasks
pub struct HostUnsealer<C> {
    connector: Arc<C>,
    options: ConnectOptions,
}

impl<C> Clone for HostUnsealer<C> {
    fn clone(&self) -> Self {
        Self {
            connector: Arc::clone(&self.connector),
            options: self.options.clone(),
        }
    }
}

impl<C: NodeConnector> HostUnsealer<C> {
    pub fn new(connector: Arc<C>, options: ConnectOptions) -> Self {
        Self { connector, options }
    }

    fn connect(&self, host: &HostRef) -> Result<C::Client, UnsealError> {
        self.connector
            .connect(host, &self.options)
            .map_err(|e| UnsealError::new(host, HostFailure::Connect(e.to_string())))
    }

    /// Submit every share in `keys` to `host`, in order.
    ///
    /// A failed submission does not stop the remaining ones. The outcome is
    /// built from the last successful response; if none succeeded the host
    /// reports `AllSubmissionsFailed`.
    pub async fn unseal(&self, host: &HostRef, keys: &ResolvedKeySet) -> HostResult {
        let client = self.connect(host)?;

        let status = client
            .status()
            .await
            .map_err(|e| UnsealError::new(host, HostFailure::StatusCheck(e.to_string())))?;

        if !status.initialized {
            return Err(UnsealError::new(host, HostFailure::NotInitialized));
        }
        if keys.is_empty() {
            return Err(UnsealError::new(host, HostFailure::NoKey));
        }

        let mut last_status: Option<SealStatus> = None;
        let mut failures = Vec::new();

        for (index, share) in keys.iter().enumerate() {
            match client.unseal(share).await {
                Ok(seal) => {
                    debug!(
                        host = %host.name,
                        key = index + 1,
                        sealed = seal.sealed,
                        progress = seal.progress,
                        threshold = seal.threshold,
                        "Key share accepted"
                    );
                    last_status = Some(seal);
                }
                Err(e) => {
                    warn!(host = %host.name, key = index + 1, error = %e, "Key share submission failed");
                    failures.push(SubmitFailure {
                        position: index + 1,
                        cause: e.to_string(),
                    });
                }
            }
        }

        let attempted = keys.len();
        match last_status {
            None => Err(UnsealError::new(
                host,
                HostFailure::AllSubmissionsFailed {
                    failures,
                    attempted,
                },
            )),
            Some(seal) if failures.is_empty() => Ok(UnsealOutcome::new(host, seal)),
            Some(seal) => Err(UnsealError::new(
                host,
                HostFailure::Submit {
                    failures,
                    attempted,
                    last_status: seal,
                },
            )),
        }
    }

    /// Connect and fetch the node status without submitting anything
    pub async fn status(&self, host: &HostRef) -> HostStatusResult {
        let client = self.connect(host)?;
        let status = client
            .status()
            .await
            .map_err(|e| UnsealError::new(host, HostFailure::StatusCheck(e.to_string())))?;

        Ok(StatusReport {
            host: host.name.clone(),
            port: host.port,
            status,
        })
    }
}
