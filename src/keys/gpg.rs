//! GPG-backed key share decryption.
//!
//! Encrypted shares are stored base64-encoded, either behind a `gpg:` prefix
//! or bare when GPG mode is switched on for the whole configuration. The
//! ciphertext is piped to the local `gpg` binary, so keys come from the
//! caller's keyring or agent.

use async_trait::async_trait;
use base64::Engine;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;
use zeroize::Zeroizing;

use super::resolver::KeyDecryptor;
use crate::types::{Result, UnsealerError};

/// Prefix marking a single key as GPG-encrypted
pub const GPG_PREFIX: &str = "gpg:";

const DEFAULT_DECRYPT_TIMEOUT: Duration = Duration::from_secs(60);

/// Decrypts key shares by shelling out to `gpg --decrypt`
#[derive(Debug, Clone)]
pub struct GpgDecryptor {
    /// Treat every key as encrypted, prefixed or not
    encrypt_all: bool,
    passphrase: Option<Zeroizing<String>>,
    program: String,
    base_args: Vec<String>,
    timeout: Duration,
}

impl GpgDecryptor {
    pub fn new(encrypt_all: bool) -> Self {
        Self {
            encrypt_all,
            passphrase: None,
            program: "gpg".to_string(),
            base_args: Vec::new(),
            timeout: DEFAULT_DECRYPT_TIMEOUT,
        }
    }

    /// Passphrase for the secret key, fed through `--passphrase-fd 0`
    pub fn with_passphrase(mut self, passphrase: Option<String>) -> Self {
        self.passphrase = passphrase.map(Zeroizing::new);
        self
    }

    /// Replace the program (and leading arguments) used instead of `gpg`
    pub fn with_command(
        mut self,
        program: impl Into<String>,
        args: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.program = program.into();
        self.base_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn ciphertext(raw: &str) -> Result<Vec<u8>> {
        let payload = raw.strip_prefix(GPG_PREFIX).unwrap_or(raw).trim();
        if payload.is_empty() {
            return Err(UnsealerError::Decrypt("empty encrypted payload".to_string()));
        }
        Ok(base64::engine::general_purpose::STANDARD.decode(payload)?)
    }

    async fn run_gpg(&self, ciphertext: Vec<u8>) -> Result<Zeroizing<Vec<u8>>> {
        let mut command = Command::new(&self.program);
        command.args(&self.base_args);
        command.args(["--batch", "--quiet", "--no-tty"]);
        if self.passphrase.is_some() {
            command.args(["--pinentry-mode", "loopback", "--passphrase-fd", "0"]);
        }
        command.arg("--decrypt");

        command.stdin(Stdio::piped());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());
        command.kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|e| UnsealerError::Decrypt(format!("failed to start {}: {}", self.program, e)))?;

        // gpg reads the passphrase line first, then the message.
        let mut input = Zeroizing::new(Vec::with_capacity(ciphertext.len() + 64));
        if let Some(ref passphrase) = self.passphrase {
            input.extend_from_slice(passphrase.as_bytes());
            input.push(b'\n');
        }
        input.extend_from_slice(&ciphertext);

        // Feed stdin while stdout is drained so large payloads cannot fill
        // both pipes and stall.
        let stdin = child.stdin.take();
        let feed = async move {
            let Some(mut stdin) = stdin else {
                return Ok::<(), std::io::Error>(());
            };
            stdin.write_all(&input).await?;
            stdin.shutdown().await
        };

        let (written, output) =
            match timeout(self.timeout, async { tokio::join!(feed, child.wait_with_output()) }).await {
                Ok(finished) => finished,
                Err(_) => {
                    return Err(UnsealerError::Decrypt(format!(
                        "{} timed out after {:?}",
                        self.program, self.timeout
                    )))
                }
            };

        let output = output.map_err(|e| {
            UnsealerError::Decrypt(format!("failed to run {}: {}", self.program, e))
        })?;

        // An early exit closes the pipe; its exit status says why.
        if let Err(e) = written {
            if e.kind() != std::io::ErrorKind::BrokenPipe {
                return Err(e.into());
            }
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(UnsealerError::Decrypt(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        Ok(Zeroizing::new(output.stdout))
    }
}

#[async_trait]
impl KeyDecryptor for GpgDecryptor {
    fn is_encrypted_reference(&self, raw: &str) -> bool {
        self.encrypt_all || raw.starts_with(GPG_PREFIX)
    }

    async fn decrypt(&self, raw: &str) -> Result<String> {
        let ciphertext = Self::ciphertext(raw)?;
        debug!(bytes = ciphertext.len(), "Decrypting key share with gpg");

        let plaintext = self.run_gpg(ciphertext).await?;
        let share = std::str::from_utf8(&plaintext)
            .map_err(|_| UnsealerError::Decrypt("decrypted share is not UTF-8".to_string()))?
            .trim_end_matches(['\r', '\n'])
            .to_string();

        if share.is_empty() {
            return Err(UnsealerError::Decrypt("decrypted share is empty".to_string()));
        }
        Ok(share)
    }
}
