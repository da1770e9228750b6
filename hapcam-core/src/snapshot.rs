use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("command failed ({command}): {stderr}")]
    CommandFailure {
        command: String,
        status: Option<i32>,
        stderr: String,
    },
    #[error("snapshot command produced no image data")]
    EmptyImage,
}

#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn run(&self, program: &Path, args: &[String]) -> std::io::Result<Output>;
}

#[derive(Debug, Default)]
pub struct SystemCommandExecutor;

#[async_trait]
impl CommandExecutor for SystemCommandExecutor {
    async fn run(&self, program: &Path, args: &[String]) -> std::io::Result<Output> {
        Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
    }
}

/// One-shot still image capture; independent of the session registry.
#[derive(Clone)]
pub struct SnapshotCapture {
    binary: PathBuf,
    source: String,
    executor: Arc<dyn CommandExecutor>,
}

impl fmt::Debug for SnapshotCapture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnapshotCapture")
            .field("binary", &self.binary)
            .field("source", &self.source)
            .finish()
    }
}

impl SnapshotCapture {
    pub fn new(
        binary: impl Into<PathBuf>,
        source: impl Into<String>,
        executor: Option<Arc<dyn CommandExecutor>>,
    ) -> Self {
        let executor = executor.unwrap_or_else(|| Arc::new(SystemCommandExecutor));
        Self {
            binary: binary.into(),
            source: source.into(),
            executor,
        }
    }

    pub fn args(&self, width: u32, height: u32) -> Vec<String> {
        let mut args: Vec<String> = self.source.split_whitespace().map(str::to_string).collect();
        args.push("-t".to_string());
        args.push("1".to_string());
        args.push("-s".to_string());
        args.push(format!("{width}x{height}"));
        args.push("-f".to_string());
        args.push("image2".to_string());
        args.push("-".to_string());
        args
    }

    pub async fn capture(&self, width: u32, height: u32) -> Result<Vec<u8>, SnapshotError> {
        let args = self.args(width, height);
        let output = self.executor.run(&self.binary, &args).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            warn!(status = output.status.code(), width, height, "snapshot command failed");
            return Err(SnapshotError::CommandFailure {
                command: format!("{} {}", self.binary.display(), args.join(" ")),
                status: output.status.code(),
                stderr,
            });
        }
        if output.stdout.is_empty() {
            return Err(SnapshotError::EmptyImage);
        }
        debug!(bytes = output.stdout.len(), width, height, "snapshot captured");
        Ok(output.stdout)
    }
}
