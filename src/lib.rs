//! vault-unsealer - unseal Vault clusters across datacenters
//!
//! Reads a list of datacenters, each with its hosts and unseal key shares,
//! and submits the shares to every host. Hosts in a datacenter are unsealed
//! concurrently; datacenters are handled one at a time.
//!
//! ## Modules
//!
//! - **config**: CLI arguments and the TOML datacenter file
//! - **keys**: plaintext/encrypted key share resolution (GPG)
//! - **vault**: node client seam and the Vault HTTP client
//! - **unseal**: per-host unseal flow and datacenter fan-out
//! - **logging**: tracing setup and per-host result reporting

pub mod config;
pub mod keys;
pub mod logging;
pub mod runner;
pub mod types;
pub mod unseal;
pub mod vault;

pub use config::{Args, UnsealerConfig};
pub use runner::{key_resolver, run, RunOutcome};
pub use types::{Result, UnsealerError};
