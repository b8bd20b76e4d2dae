//! Fabric adapter: article generation through the `fabric` CLI.
//!
//! The prompt is piped to `fabric -p <pattern>` on stdin and the article is
//! read back from stdout.

use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;

use super::{Adapter, AdapterOutput, GenerationError};

/// Fabric adapter using subprocess mode
pub struct FabricAdapter {
    /// Path to the fabric binary
    binary_path: String,

    /// Model passed with `-m`, if any
    model: Option<String>,
}

impl FabricAdapter {
    /// Create an adapter for `binary_path` (`fabric` or `fabric-ai`)
    pub fn new(binary_path: impl Into<String>, model: Option<String>) -> Self {
        Self {
            binary_path: binary_path.into(),
            model,
        }
    }

    fn command(&self, pattern: &str) -> Command {
        let mut command = Command::new(&self.binary_path);
        command.args(["-p", pattern]);
        if let Some(model) = &self.model {
            command.args(["-m", model]);
        }
        command
    }
}

#[async_trait]
impl Adapter for FabricAdapter {
    fn name(&self) -> &str {
        "fabric"
    }

    async fn execute(&self, action: &str, input: &str, limit: Duration) -> Result<AdapterOutput> {
        let mut child = self
            .command(action)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn {} for pattern '{}'", self.binary_path, action))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(input.as_bytes())
                .await
                .context("Failed to write prompt to fabric stdin")?;
        }

        let output = timeout(limit, child.wait_with_output())
            .await
            .map_err(|_| GenerationError::Timeout(limit))?
            .with_context(|| format!("Failed to wait for fabric pattern '{}'", action))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "Fabric pattern '{}' failed with exit code {}: {}",
                action,
                output.status.code().unwrap_or(-1),
                stderr.trim()
            );
        }

        let content = String::from_utf8(output.stdout).context("Fabric output is not valid UTF-8")?;
        Ok(AdapterOutput::new(content))
    }

    async fn health_check(&self) -> Result<()> {
        let output = Command::new(&self.binary_path)
            .arg("-l")
            .output()
            .await
            .context("Failed to run fabric health check")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("Fabric health check failed: {}", stderr);
        }

        Ok(())
    }
}
