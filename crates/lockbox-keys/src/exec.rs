//! External command provider.
//!
//! Runs `sh -c <command>` and reads a base64 key from its stdout. Useful for
//! password managers (`pass show lockbox`, `op read ...`) and HSM wrappers.

use std::process::Stdio;
use std::time::Duration;

use zeroize::Zeroizing;

use lockbox_core::config::DEFAULT_EXEC_TIMEOUT_SECS;
use lockbox_crypto::EncryptionKey;

use crate::error::{KeyError, KeyResult};
use crate::provider::{KeyContext, KeySource};

const PROVIDER: &str = "exec";

#[derive(Debug, Clone)]
pub struct ExecProvider {
    command: String,
    default_timeout: Duration,
}

impl ExecProvider {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            default_timeout: Duration::from_secs(DEFAULT_EXEC_TIMEOUT_SECS),
        }
    }

    /// Bound applied when the caller's context carries no deadline.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    fn unavailable(&self, detail: String) -> KeyError {
        KeyError::ProviderSourceUnavailable {
            provider: PROVIDER,
            detail,
        }
    }
}

impl KeySource for ExecProvider {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn get_key(&self, ctx: &KeyContext) -> KeyResult<EncryptionKey> {
        use tokio::process::Command;

        let limit = ctx.deadline.unwrap_or(self.default_timeout);

        let child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.unavailable(format!("spawning {:?}: {e}", self.command)))?;

        // Dropping the wait future on timeout or cancellation drops the child,
        // which kills it.
        let output = tokio::select! {
            res = tokio::time::timeout(limit, child.wait_with_output()) => match res {
                Ok(out) => out.map_err(|e| {
                    self.unavailable(format!("waiting for {:?}: {e}", self.command))
                })?,
                Err(_) => {
                    return Err(self.unavailable(format!(
                        "command {:?} timed out after {}s",
                        self.command,
                        limit.as_secs_f64()
                    )))
                }
            },
            _ = ctx.cancel.cancelled() => {
                return Err(self.unavailable(format!("command {:?} cancelled", self.command)));
            }
        };

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let stdout = Zeroizing::new(output.stdout);

        if !output.status.success() {
            return Err(self.unavailable(format!(
                "command {:?} failed ({}): {stderr}",
                self.command, output.status
            )));
        }

        let text = std::str::from_utf8(&stdout).map_err(|_| {
            self.unavailable(format!(
                "command {:?} printed non-UTF-8 output (stderr: {stderr})",
                self.command
            ))
        })?;

        EncryptionKey::from_base64(text.trim()).map_err(|e| {
            match KeyError::from_crypto(PROVIDER, e) {
                KeyError::Crypto { source, .. } => self.unavailable(format!(
                    "command {:?} output is not a valid key: {source} (stderr: {stderr})",
                    self.command
                )),
                other => other,
            }
        })
    }
}
