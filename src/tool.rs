//! External tools: the compiler and the version-control client.
//!
//! The pipeline never builds a `Command` itself. It asks an [`ExternalTool`]
//! to run an argument list in a working directory and gets back the exit
//! status and captured output. [`CommandTool`] is the real implementation;
//! tests substitute doubles that write compiler output directly.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Result of running an external tool to completion.
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    /// Exit code, `None` when the process was killed by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

/// Something that can be run with a working directory and arguments.
#[async_trait]
pub trait ExternalTool: Send + Sync {
    /// Program name used in logs and error messages.
    fn program(&self) -> String;

    /// Run to completion. `Err` means the process could not be started.
    async fn run(&self, cwd: &Path, args: &[&str]) -> std::io::Result<ToolOutput>;
}

/// Runs a program found on disk (or on `PATH`) via `tokio::process`.
#[derive(Debug, Clone)]
pub struct CommandTool {
    program: PathBuf,
}

impl CommandTool {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl ExternalTool for CommandTool {
    fn program(&self) -> String {
        self.program.display().to_string()
    }

    async fn run(&self, cwd: &Path, args: &[&str]) -> std::io::Result<ToolOutput> {
        debug!("Running {} {:?} in {}", self.program.display(), args, cwd.display());
        let output = Command::new(&self.program)
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        Ok(ToolOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
