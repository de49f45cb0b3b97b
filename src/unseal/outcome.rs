//! Per-host results of an unseal or status run

use std::fmt;

use crate::config::HostRef;
use crate::keys::ResolutionError;
use crate::vault::{NodeStatus, SealStatus};

/// Stage of the per-host flow where a failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Resolve,
    Connect,
    StatusCheck,
    Submit,
    /// The host task itself died
    Runtime,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Resolve => "resolve",
            Phase::Connect => "connect",
            Phase::StatusCheck => "status_check",
            Phase::Submit => "submit",
            Phase::Runtime => "runtime",
        };
        f.write_str(name)
    }
}

/// A key share submission that failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitFailure {
    /// 1-based position of the share in the datacenter's key list
    pub position: usize,
    pub cause: String,
}

/// Why a host could not be (fully) unsealed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HostFailure {
    #[error("key resolution failed: {0}")]
    Resolution(ResolutionError),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("status check failed: {0}")]
    StatusCheck(String),

    #[error("Vault is not ready to be unsealed")]
    NotInitialized,

    #[error("No Key Provided")]
    NoKey,

    /// Some shares failed; `last_status` is the last successful response
    #[error("Error running unseal operation: {} of {attempted} submissions failed", .failures.len())]
    Submit {
        failures: Vec<SubmitFailure>,
        attempted: usize,
        last_status: SealStatus,
    },

    #[error("Error running unseal operation: all {attempted} submissions failed")]
    AllSubmissionsFailed {
        failures: Vec<SubmitFailure>,
        attempted: usize,
    },

    #[error("host task aborted: {0}")]
    TaskAborted(String),
}

impl HostFailure {
    pub fn phase(&self) -> Phase {
        match self {
            HostFailure::Resolution(_) | HostFailure::NoKey => Phase::Resolve,
            HostFailure::Connect(_) => Phase::Connect,
            HostFailure::StatusCheck(_) | HostFailure::NotInitialized => Phase::StatusCheck,
            HostFailure::Submit { .. } | HostFailure::AllSubmissionsFailed { .. } => Phase::Submit,
            HostFailure::TaskAborted(_) => Phase::Runtime,
        }
    }

    /// Failed submissions, if any were attempted
    pub fn submit_failures(&self) -> &[SubmitFailure] {
        match self {
            HostFailure::Submit { failures, .. }
            | HostFailure::AllSubmissionsFailed { failures, .. } => failures,
            _ => &[],
        }
    }
}

/// Seal state of a host after its shares were submitted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsealOutcome {
    pub host: String,
    pub port: u16,
    pub sealed: bool,
    pub progress: u32,
    pub threshold: u32,
}

impl UnsealOutcome {
    pub fn new(host: &HostRef, status: SealStatus) -> Self {
        Self {
            host: host.name.clone(),
            port: host.port,
            sealed: status.sealed,
            progress: status.progress,
            threshold: status.threshold,
        }
    }
}

/// A host that ended in an error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{host}:{port}: {failure}")]
pub struct UnsealError {
    pub host: String,
    pub port: u16,
    pub failure: HostFailure,
}

impl UnsealError {
    pub fn new(host: &HostRef, failure: HostFailure) -> Self {
        Self {
            host: host.name.clone(),
            port: host.port,
            failure,
        }
    }

    pub fn phase(&self) -> Phase {
        self.failure.phase()
    }
}

/// Status of a host as reported by the `status` command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub host: String,
    pub port: u16,
    pub status: NodeStatus,
}

pub type HostResult = Result<UnsealOutcome, UnsealError>;

pub type HostStatusResult = Result<StatusReport, UnsealError>;

/// Totals over a whole unseal run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub unsealed: usize,
    pub in_progress: usize,
    pub failed: usize,
}

impl RunSummary {
    pub fn from_results(results: &[HostResult]) -> Self {
        results.iter().fold(Self::default(), |mut summary, result| {
            match result {
                Ok(outcome) if outcome.sealed => summary.in_progress += 1,
                Ok(_) => summary.unsealed += 1,
                Err(_) => summary.failed += 1,
            }
            summary
        })
    }

    pub fn total(&self) -> usize {
        self.unsealed + self.in_progress + self.failed
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}
