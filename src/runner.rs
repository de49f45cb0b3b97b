//! Wires configuration, key resolution and the orchestrator into one run

use std::sync::Arc;

use crate::config::{Command, UnsealerConfig};
use crate::keys::{GpgDecryptor, KeyResolver};
use crate::logging::ResultReporter;
use crate::unseal::{DatacenterOrchestrator, RunSummary, Selector};
use crate::vault::NodeConnector;

/// What a finished run looked like
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOutcome {
    pub hosts: usize,
    pub failed: usize,
}

impl RunOutcome {
    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

/// Key resolver matching the configuration's GPG settings
pub fn key_resolver(config: &UnsealerConfig) -> KeyResolver {
    let decryptor =
        GpgDecryptor::new(config.gpg).with_passphrase(config.gpg_passphrase.clone());
    KeyResolver::new(Arc::new(decryptor))
}

/// Execute `command` over the selected datacenters
pub async fn run<C: NodeConnector>(
    config: &UnsealerConfig,
    command: Command,
    connector: Arc<C>,
    resolver: KeyResolver,
    reporter: Arc<dyn ResultReporter>,
) -> RunOutcome {
    let orchestrator =
        DatacenterOrchestrator::new(connector, config.connect.clone(), resolver, reporter);
    let selector = Selector::new(config.selector.as_str());

    match command {
        Command::Unseal => {
            let results = orchestrator.run(&config.datacenters, &selector).await;
            let summary = RunSummary::from_results(&results);
            RunOutcome {
                hosts: summary.total(),
                failed: summary.failed,
            }
        }
        Command::Status => {
            let results = orchestrator.status(&config.datacenters, &selector).await;
            RunOutcome {
                hosts: results.len(),
                failed: results.iter().filter(|r| r.is_err()).count(),
            }
        }
    }
}
