//! Compilation of submissions, generators, graders and source verifiers
//!
//! Each program gets its own directory so that languages with fixed output
//! names (e.g. Java's `Main.class`) do not clash within one job.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::process::Command;
use tracing::debug;

use crate::languages::LanguageConfig;

/// A program ready to run inside the sandbox
#[derive(Debug, Clone)]
pub struct Program {
    pub language: Arc<LanguageConfig>,
    pub dir: PathBuf,
}

impl Program {
    pub fn command(&self) -> Vec<String> {
        self.language.run_argv(&self.dir)
    }

    pub fn allowed_files(&self) -> Vec<String> {
        self.language.allowed_files(&self.dir)
    }

    pub fn allowed_prefixes(&self) -> Vec<String> {
        self.language.allowed_prefixes(&self.dir)
    }
}

/// Result of a compilation attempt
#[derive(Debug)]
pub enum CompileOutcome {
    Ready(Program),
    Failed(String),
}

/// Write `source` into `dir` and compile it with the language's compile command.
///
/// Interpreted languages are ready as soon as the source is written.
pub async fn compile(
    language: &Arc<LanguageConfig>,
    source: &str,
    dir: &Path,
    time_limit: Duration,
) -> Result<CompileOutcome> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create program directory {}", dir.display()))?;
    tokio::fs::write(language.source_path(dir), source)
        .await
        .context("Failed to write source file")?;

    let program = Program {
        language: language.clone(),
        dir: dir.to_path_buf(),
    };

    let Some(command) = language.compile_argv(dir) else {
        return Ok(CompileOutcome::Ready(program));
    };
    let Some((binary, args)) = command.split_first() else {
        return Ok(CompileOutcome::Ready(program));
    };

    debug!("Compiling {} with {:?}", language.name, command);

    let child = Command::new(binary)
        .args(args)
        .current_dir(dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("Failed to spawn compiler {}", binary))?;

    let output = match tokio::time::timeout(time_limit, child.wait_with_output()).await {
        Ok(output) => output.context("Failed to wait for compiler")?,
        Err(_) => return Ok(CompileOutcome::Failed("Compilation timed out".to_string())),
    };

    if output.status.success() {
        Ok(CompileOutcome::Ready(program))
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let message = if !stderr.is_empty() {
            stderr
        } else {
            format!(
                "Compilation failed with exit code {}",
                output.status.code().unwrap_or(-1)
            )
        };
        Ok(CompileOutcome::Failed(message))
    }
}
