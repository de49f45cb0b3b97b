//! Datacenter fan-out
//!
//! Datacenters are processed one after another. Within a datacenter the keys
//! are resolved once, then every host gets its own task; the next datacenter
//! starts only after all of them finished.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::task::{JoinError, JoinSet};
use tracing::{error, info, warn};

use super::host::HostUnsealer;
use super::outcome::{HostFailure, HostResult, HostStatusResult, RunSummary, UnsealError};
use crate::config::{Datacenter, HostRef};
use crate::keys::KeyResolver;
use crate::logging::ResultReporter;
use crate::vault::{ConnectOptions, NodeConnector};

/// Datacenter name filter; an empty selector matches every datacenter
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selector(String);

impl Selector {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into().trim().to_string())
    }

    pub fn all() -> Self {
        Self::default()
    }

    pub fn matches(&self, datacenter: &Datacenter) -> bool {
        self.0.is_empty() || self.0 == datacenter.name
    }

    pub fn is_all(&self) -> bool {
        self.0.is_empty()
    }
}

/// Runs unseal and status operations across datacenters
pub struct DatacenterOrchestrator<C> {
    unsealer: HostUnsealer<C>,
    resolver: KeyResolver,
    reporter: Arc<dyn ResultReporter>,
}

impl<C: NodeConnector> DatacenterOrchestrator<C> {
    pub fn new(
        connector: Arc<C>,
        options: ConnectOptions,
        resolver: KeyResolver,
        reporter: Arc<dyn ResultReporter>,
    ) -> Self {
        Self {
            unsealer: HostUnsealer::new(connector, options),
            resolver,
            reporter,
        }
    }

    fn selected<'a>(
        &self,
        datacenters: &'a [Datacenter],
        selector: &Selector,
    ) -> Vec<&'a Datacenter> {
        let selected: Vec<_> = datacenters.iter().filter(|dc| selector.matches(dc)).collect();
        if selected.is_empty() && !selector.is_all() {
            warn!(selector = %selector.0, "No configured datacenter matches the selector");
        }
        selected
    }

    /// Unseal every host of every selected datacenter.
    ///
    /// Results come back in configuration order. Each one is handed to the
    /// reporter as soon as its host finishes.
    pub async fn run(&self, datacenters: &[Datacenter], selector: &Selector) -> Vec<HostResult> {
        let mut results = Vec::new();

        for dc in self.selected(datacenters, selector) {
            info!(
                datacenter = %dc.name,
                hosts = dc.hosts.len(),
                keys = dc.keys.len(),
                "Unsealing datacenter"
            );
            results.extend(self.unseal_datacenter(dc).await);
        }

        self.reporter.report_summary(&RunSummary::from_results(&results));
        results
    }

    /// Fetch the status of every host of every selected datacenter
    pub async fn status(
        &self,
        datacenters: &[Datacenter],
        selector: &Selector,
    ) -> Vec<HostStatusResult> {
        let mut results = Vec::new();

        for dc in self.selected(datacenters, selector) {
            info!(datacenter = %dc.name, hosts = dc.hosts.len(), "Checking datacenter status");
            let unsealer = self.unsealer.clone();
            let reporter = Arc::clone(&self.reporter);
            let name = dc.name.clone();
            let batch = fan_out(
                &dc.hosts,
                move |host| {
                    let unsealer = unsealer.clone();
                    async move { unsealer.status(&host).await }
                },
                |result| reporter.report_status(&name, result),
            )
            .await;
            results.extend(batch);
        }

        results
    }

    async fn unseal_datacenter(&self, dc: &Datacenter) -> Vec<HostResult> {
        let keys = match self.resolver.resolve_all(&dc.keys).await {
            Ok(keys) => keys,
            Err(e) => {
                error!(datacenter = %dc.name, error = %e, "Key resolution failed, skipping datacenter");
                return dc
                    .hosts
                    .iter()
                    .map(|host| {
                        let result = Err(UnsealError::new(host, HostFailure::Resolution(e.clone())));
                        self.reporter.report(&dc.name, &result);
                        result
                    })
                    .collect();
            }
        };

        let unsealer = self.unsealer.clone();
        let reporter = Arc::clone(&self.reporter);
        fan_out(
            &dc.hosts,
            move |host| {
                let unsealer = unsealer.clone();
                let keys = keys.clone();
                async move { unsealer.unseal(&host, &keys).await }
            },
            |result| reporter.report(&dc.name, result),
        )
        .await
    }
}

/// Spawn one task per host and wait for all of them.
///
/// A task that panics is reported as `TaskAborted` for its host.
async fn fan_out<T, F, Fut, R>(hosts: &[HostRef], task: F, report: R) -> Vec<Result<T, UnsealError>>
where
    T: Send + 'static,
    F: Fn(HostRef) -> Fut,
    Fut: Future<Output = Result<T, UnsealError>> + Send + 'static,
    R: Fn(&Result<T, UnsealError>),
{
    let mut set = JoinSet::new();
    let mut task_hosts = HashMap::with_capacity(hosts.len());
    for (index, host) in hosts.iter().enumerate() {
        let fut = task(host.clone());
        let handle = set.spawn(async move { (index, fut.await) });
        task_hosts.insert(handle.id(), index);
    }

    let mut slots: Vec<Option<Result<T, UnsealError>>> = hosts.iter().map(|_| None).collect();
    while let Some(joined) = set.join_next().await {
        let (index, result) = match joined {
            Ok(finished) => finished,
            Err(e) => {
                let Some(&index) = task_hosts.get(&e.id()) else {
                    error!(error = %e, "Join error from an unknown host task");
                    continue;
                };
                let failure = HostFailure::TaskAborted(abort_cause(e));
                (index, Err(UnsealError::new(&hosts[index], failure)))
            }
        };
        report(&result);
        slots[index] = Some(result);
    }

    slots
        .into_iter()
        .zip(hosts)
        .map(|(slot, host)| {
            slot.unwrap_or_else(|| {
                let failure = HostFailure::TaskAborted("task did not complete".to_string());
                let result = Err(UnsealError::new(host, failure));
                report(&result);
                result
            })
        })
        .collect()
}

fn abort_cause(err: JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());
    format!("panicked: {}", message)
}
