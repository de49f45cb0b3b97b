//! Unseal orchestration
//!
//! ## Flow
//!
//! ```text
//! config --select--> Datacenter --resolve keys once--> ResolvedKeySet
//!                                  |
//!                    one task per host (HostUnsealer)
//!                    connect -> status -> submit shares in order
//!                                  |
//!                          ResultReporter, per host
//! ```
//!
//! ## Modules
//!
//! - `host` - the per-host state machine
//! - `orchestrator` - datacenter selection and host fan-out
//! - `outcome` - result and failure types

pub mod host;
pub mod orchestrator;
pub mod outcome;

pub use host::HostUnsealer;
pub use orchestrator::{DatacenterOrchestrator, Selector};
pub use outcome::{
    HostFailure, HostResult, HostStatusResult, Phase, RunSummary, StatusReport, SubmitFailure,
    UnsealError, UnsealOutcome,
};
