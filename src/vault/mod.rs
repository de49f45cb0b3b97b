//! Secret-store node access
//!
//! - `traits` - the `NodeClient`/`NodeConnector` seam used by the unseal flow
//! - `client` - reqwest implementation against the Vault sys API
//! - `mock` - scripted in-memory nodes for tests

pub mod client;
pub mod mock;
pub mod traits;

pub use client::{CaBundle, VaultClient, VaultConnector};
pub use mock::{MockCall, MockClient, MockConnector, MockNode};
pub use traits::{ConnectOptions, NodeClient, NodeConnector, NodeStatus, SealStatus};
