//! Key share resolution.
//!
//! Every configured key is classified as plaintext or as a reference to an
//! encrypted share before anything touches it. Plaintext passes through
//! untouched; encrypted references go to a [`KeyDecryptor`]. A datacenter's
//! keys are resolved once into a [`ResolvedKeySet`] that all host tasks share.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use zeroize::Zeroizing;

use crate::config::KeyRef;
use crate::types::Result;

/// Decryption mechanism for encrypted key shares
#[async_trait]
pub trait KeyDecryptor: Send + Sync {
    /// Whether `raw` points at an encrypted share
    fn is_encrypted_reference(&self, raw: &str) -> bool;

    /// Produce the plaintext share for an encrypted reference
    async fn decrypt(&self, raw: &str) -> Result<String>;
}

/// Decryptor for configurations without encrypted shares
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaintextOnly;

#[async_trait]
impl KeyDecryptor for PlaintextOnly {
    fn is_encrypted_reference(&self, _raw: &str) -> bool {
        false
    }

    async fn decrypt(&self, _raw: &str) -> Result<String> {
        Err(crate::types::UnsealerError::Decrypt(
            "no decryptor configured".to_string(),
        ))
    }
}

/// How a raw key value has to be treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyMaterial<'a> {
    Plaintext(&'a str),
    EncryptedReference(&'a str),
}

/// One resolved key share
pub struct ResolvedKey {
    pub encrypted: bool,
    pub value: Zeroizing<String>,
}

impl fmt::Debug for ResolvedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedKey")
            .field("encrypted", &self.encrypted)
            .field("value", &"<redacted>")
            .finish()
    }
}

/// A key that could not be resolved. Tagged by its 1-based position in the
/// datacenter's key list so the share itself never reaches a log.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("key #{position} could not be resolved: {cause}")]
pub struct ResolutionError {
    pub position: usize,
    pub cause: String,
}

/// Plaintext shares for one datacenter, in configured order
#[derive(Clone, Default)]
pub struct ResolvedKeySet {
    shares: Arc<[Zeroizing<String>]>,
}

impl ResolvedKeySet {
    pub fn new(shares: Vec<Zeroizing<String>>) -> Self {
        Self {
            shares: shares.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.shares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shares.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.shares.iter().map(|s| s.as_str())
    }
}

impl fmt::Debug for ResolvedKeySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedKeySet")
            .field("len", &self.shares.len())
            .finish()
    }
}

impl<S: Into<String>> FromIterator<S> for ResolvedKeySet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self::new(iter.into_iter().map(|s| Zeroizing::new(s.into())).collect())
    }
}

/// Turns configured [`KeyRef`]s into plaintext shares
#[derive(Clone)]
pub struct KeyResolver {
    decryptor: Arc<dyn KeyDecryptor>,
}

impl KeyResolver {
    pub fn new(decryptor: Arc<dyn KeyDecryptor>) -> Self {
        Self { decryptor }
    }

    /// Resolver that treats every key as plaintext
    pub fn plaintext() -> Self {
        Self::new(Arc::new(PlaintextOnly))
    }

    /// Decide how `raw` must be handled without touching it
    pub fn classify<'a>(&self, raw: &'a str) -> KeyMaterial<'a> {
        if self.decryptor.is_encrypted_reference(raw) {
            KeyMaterial::EncryptedReference(raw)
        } else {
            KeyMaterial::Plaintext(raw)
        }
    }

    /// Resolve a single key
    pub async fn resolve(&self, key: &KeyRef) -> Result<ResolvedKey> {
        match self.classify(&key.key) {
            KeyMaterial::Plaintext(value) => Ok(ResolvedKey {
                encrypted: false,
                value: Zeroizing::new(value.to_string()),
            }),
            KeyMaterial::EncryptedReference(reference) => {
                let value = self.decryptor.decrypt(reference).await?;
                Ok(ResolvedKey {
                    encrypted: true,
                    value: Zeroizing::new(value),
                })
            }
        }
    }

    /// Resolve a datacenter's keys, in order. Fails on the first key that
    /// cannot be resolved; a partial set is never returned.
    pub async fn resolve_all(
        &self,
        keys: &[KeyRef],
    ) -> std::result::Result<ResolvedKeySet, ResolutionError> {
        let mut shares = Vec::with_capacity(keys.len());
        for (index, key) in keys.iter().enumerate() {
            let resolved = self.resolve(key).await.map_err(|e| ResolutionError {
                position: index + 1,
                cause: e.to_string(),
            })?;
            shares.push(resolved.value);
        }
        Ok(ResolvedKeySet::new(shares))
    }
}

impl fmt::Debug for KeyResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyResolver").finish_non_exhaustive()
    }
}
