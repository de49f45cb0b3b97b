//! Logging infrastructure for vault-unsealer
//!
//! Subscriber setup plus the per-host result reporters.

pub mod reporter;

pub use reporter::{
    status_records, unseal_records, MemoryReporter, ReportLevel, ReportRecord, ResultReporter,
    TracingReporter,
};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LogFormat;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise `log_level` applies to this crate and
/// everything else logs at info.
pub fn init_tracing(log_level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("vault_unsealer={},info", log_level).into());

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().flatten_event(true))
            .init(),
    }
}
