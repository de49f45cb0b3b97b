//! Unseal key shares: classification, decryption and per-datacenter key sets

pub mod gpg;
pub mod resolver;

pub use gpg::{GpgDecryptor, GPG_PREFIX};
pub use resolver::{
    KeyDecryptor, KeyMaterial, KeyResolver, PlaintextOnly, ResolutionError, ResolvedKey,
    ResolvedKeySet,
};
