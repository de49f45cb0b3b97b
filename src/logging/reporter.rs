//! Per-host outcome reporting
//!
//! Results are first turned into [`ReportRecord`]s and then emitted. The
//! tracing reporter writes them as structured log events keyed by host; the
//! memory reporter keeps them for inspection.

use std::sync::Mutex;
use tracing::{error, info, warn};

use crate::unseal::{HostFailure, HostResult, HostStatusResult, Phase, RunSummary};
use crate::vault::SealStatus;

/// Sink for per-host results. Implementations must not panic or block.
pub trait ResultReporter: Send + Sync {
    /// Report the result of unsealing one host
    fn report(&self, datacenter: &str, result: &HostResult);

    /// Report the status of one host
    fn report_status(&self, datacenter: &str, result: &HostStatusResult);

    /// Report totals once every datacenter was processed
    fn report_summary(&self, _summary: &RunSummary) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportLevel {
    Info,
    Error,
}

/// One log record about one host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportRecord {
    pub level: ReportLevel,
    pub datacenter: String,
    pub host: String,
    pub port: u16,
    pub message: String,
    pub progress: Option<u32>,
    pub threshold: Option<u32>,
    pub phase: Option<Phase>,
    pub detail: Option<String>,
}

impl ReportRecord {
    fn new(level: ReportLevel, datacenter: &str, host: &str, port: u16, message: &str) -> Self {
        Self {
            level,
            datacenter: datacenter.to_string(),
            host: host.to_string(),
            port,
            message: message.to_string(),
            progress: None,
            threshold: None,
            phase: None,
            detail: None,
        }
    }

    fn with_progress(mut self, progress: u32, threshold: u32) -> Self {
        self.progress = Some(progress);
        self.threshold = Some(threshold);
        self
    }

    fn with_failure(mut self, phase: Phase, detail: Option<String>) -> Self {
        self.phase = Some(phase);
        self.detail = detail;
        self
    }
}

fn seal_record(datacenter: &str, host: &str, port: u16, seal: &SealStatus) -> ReportRecord {
    let message = if seal.sealed {
        "Unseal operation performed"
    } else {
        "Vault is unsealed!"
    };
    ReportRecord::new(ReportLevel::Info, datacenter, host, port, message)
        .with_progress(seal.progress, seal.threshold)
}

fn failure_records(
    datacenter: &str,
    host: &str,
    port: u16,
    failure: &HostFailure,
) -> Vec<ReportRecord> {
    let phase = failure.phase();
    let record = |message: &str, detail: Option<String>| {
        ReportRecord::new(ReportLevel::Error, datacenter, host, port, message)
            .with_failure(phase, detail)
    };

    match failure {
        HostFailure::Resolution(e) => vec![record("Failed to resolve unseal keys", Some(e.to_string()))],
        HostFailure::Connect(cause) => vec![record("Failed to connect to Vault", Some(cause.clone()))],
        HostFailure::StatusCheck(cause) => {
            vec![record("Failed to fetch Vault status", Some(cause.clone()))]
        }
        HostFailure::NotInitialized => vec![record("Vault is not ready to be unsealed", None)],
        HostFailure::NoKey => vec![record("No Key Provided", None)],
        HostFailure::Submit { last_status, .. } => {
            let mut records = submission_records(failure, &record);
            records.push(seal_record(datacenter, host, port, last_status));
            records
        }
        HostFailure::AllSubmissionsFailed { failures, attempted } => {
            let mut records = submission_records(failure, &record);
            records.push(record(
                "No unseal submission succeeded",
                Some(format!("{} of {} submissions failed", failures.len(), attempted)),
            ));
            records
        }
        HostFailure::TaskAborted(cause) => vec![record("Unseal task aborted", Some(cause.clone()))],
    }
}

fn submission_records(
    failure: &HostFailure,
    record: &impl Fn(&str, Option<String>) -> ReportRecord,
) -> Vec<ReportRecord> {
    failure
        .submit_failures()
        .iter()
        .map(|f| {
            record(
                "Error running unseal operation",
                Some(format!("key #{}: {}", f.position, f.cause)),
            )
        })
        .collect()
}

/// Records describing the result of unsealing one host
pub fn unseal_records(datacenter: &str, result: &HostResult) -> Vec<ReportRecord> {
    match result {
        Ok(outcome) => vec![seal_record(
            datacenter,
            &outcome.host,
            outcome.port,
            &SealStatus {
                sealed: outcome.sealed,
                progress: outcome.progress,
                threshold: outcome.threshold,
            },
        )],
        Err(e) => failure_records(datacenter, &e.host, e.port, &e.failure),
    }
}

/// Records describing the status of one host
pub fn status_records(datacenter: &str, result: &HostStatusResult) -> Vec<ReportRecord> {
    match result {
        Ok(report) => {
            let status = &report.status;
            let message = if !status.initialized {
                "Vault is not initialized"
            } else if status.sealed {
                "Vault is sealed"
            } else {
                "Vault is unsealed"
            };
            vec![
                ReportRecord::new(ReportLevel::Info, datacenter, &report.host, report.port, message)
                    .with_progress(status.progress, status.threshold),
            ]
        }
        Err(e) => failure_records(datacenter, &e.host, e.port, &e.failure),
    }
}

/// Writes records as tracing events
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl TracingReporter {
    fn emit(record: &ReportRecord) {
        let phase = record.phase.map(tracing::field::display);
        match record.level {
            ReportLevel::Info => info!(
                datacenter = %record.datacenter,
                host = %record.host,
                port = record.port,
                progress = record.progress,
                threshold = record.threshold,
                "{}",
                record.message
            ),
            ReportLevel::Error => error!(
                datacenter = %record.datacenter,
                host = %record.host,
                port = record.port,
                phase,
                error = record.detail.as_deref(),
                "{}",
                record.message
            ),
        }
    }
}

impl ResultReporter for TracingReporter {
    fn report(&self, datacenter: &str, result: &HostResult) {
        unseal_records(datacenter, result).iter().for_each(Self::emit);
    }

    fn report_status(&self, datacenter: &str, result: &HostStatusResult) {
        status_records(datacenter, result).iter().for_each(Self::emit);
    }

    fn report_summary(&self, summary: &RunSummary) {
        if summary.has_failures() {
            warn!(
                hosts = summary.total(),
                unsealed = summary.unsealed,
                in_progress = summary.in_progress,
                failed = summary.failed,
                "Unseal run complete with failures"
            );
        } else {
            info!(
                hosts = summary.total(),
                unsealed = summary.unsealed,
                in_progress = summary.in_progress,
                failed = summary.failed,
                "Unseal run complete"
            );
        }
    }
}

/// Keeps every record in memory, in the order it was reported
#[derive(Debug, Default)]
pub struct MemoryReporter {
    records: Mutex<Vec<ReportRecord>>,
    summary: Mutex<Option<RunSummary>>,
}

impl MemoryReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<ReportRecord> {
        self.records
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    /// Messages reported for one host, in order
    pub fn messages_for(&self, host: &str) -> Vec<String> {
        self.records()
            .into_iter()
            .filter(|r| r.host == host)
            .map(|r| r.message)
            .collect()
    }

    pub fn summary(&self) -> Option<RunSummary> {
        self.summary.lock().ok().and_then(|s| *s)
    }

    fn push(&self, records: Vec<ReportRecord>) {
        if let Ok(mut stored) = self.records.lock() {
            stored.extend(records);
        }
    }
}

impl ResultReporter for MemoryReporter {
    fn report(&self, datacenter: &str, result: &HostResult) {
        self.push(unseal_records(datacenter, result));
    }

    fn report_status(&self, datacenter: &str, result: &HostStatusResult) {
        self.push(status_records(datacenter, result));
    }

    fn report_summary(&self, summary: &RunSummary) {
        if let Ok(mut stored) = self.summary.lock() {
            *stored = Some(*summary);
        }
    }
}
