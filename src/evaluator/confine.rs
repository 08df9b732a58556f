//! Driver for the external `confine` sandbox
//!
//! A run is described by a JSON profile written next to the job's files and
//! invoked as `confine -c <profile> -- <command...>`. The sandbox writes a JSON
//! report that is parsed into an `ExecutionReport`. Limits are enforced by
//! `confine` itself.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tokio::process::Command;
use tracing::{debug, error, warn};

use super::compiler::Program;
use crate::models::JobVerdict;

const PROFILE_FILE: &str = "confine.json";
const REPORT_FILE: &str = "report";

/// Outcome of one sandboxed run
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionReport {
    pub execution_ok: bool,
    /// Verdict matching the sandbox error, when the run failed
    pub execution_error: Option<JobVerdict>,
    pub exitcode: i32,
    /// Wall-clock seconds
    pub realtime: f64,
    /// CPU seconds
    pub cputime: f64,
    pub memory: i64,
}

#[derive(Debug, Deserialize)]
struct RawReport {
    execution_ok: bool,
    execution_error_code: Option<RawErrorCode>,
    exitcode: i32,
    realtime: f64,
    cputime: f64,
    memory: i64,
}

#[derive(Debug, Deserialize)]
struct RawErrorCode {
    code: String,
}

impl ExecutionReport {
    /// Report used whenever the sandbox itself misbehaved
    pub fn error_report() -> Self {
        Self {
            execution_ok: false,
            execution_error: Some(JobVerdict::JudgeError),
            exitcode: -1,
            realtime: 0.0,
            cputime: 0.0,
            memory: 0,
        }
    }

    pub fn from_json(content: &str) -> Self {
        let raw: RawReport = match serde_json::from_str(content) {
            Ok(raw) => raw,
            Err(e) => {
                error!("Failed to load execution report from json: {}", e);
                return Self::error_report();
            }
        };

        let execution_error = match raw.execution_error_code {
            Some(error_code) => match verdict_for_error(&error_code.code) {
                Some(verdict) => Some(verdict),
                None => {
                    error!("Unknown sandbox error code {}", error_code.code);
                    return Self::error_report();
                }
            },
            None => None,
        };

        Self {
            execution_ok: raw.execution_ok,
            execution_error,
            exitcode: raw.exitcode,
            realtime: raw.realtime,
            cputime: raw.cputime,
            memory: raw.memory,
        }
    }
}

fn verdict_for_error(code: &str) -> Option<JobVerdict> {
    match code {
        "InternalError" => Some(JobVerdict::JudgeError),
        "RuntimeError" => Some(JobVerdict::RuntimeError),
        "TimeLimitExceeded" => Some(JobVerdict::TimeLimitExceeded),
        "MemoryLimitExceeded" => Some(JobVerdict::MemoryLimitExceeded),
        "IllegalSyscall" | "IllegalOpen" | "IllegalWrite" => Some(JobVerdict::IllegalSyscall),
        _ => None,
    }
}

/// Files and limits for one sandboxed run
#[derive(Debug, Clone)]
pub struct ExecutionProfile {
    /// Seconds of CPU time
    pub time_limit: f64,
    pub stdin_file: PathBuf,
    pub stdout_file: PathBuf,
    pub stderr_file: PathBuf,
}

impl ExecutionProfile {
    /// Profile reading `input` and writing `output`/`error`, all inside `workdir`
    pub fn new(workdir: &Path, time_limit: f64, input: &str, output: &str, error: &str) -> Self {
        Self {
            time_limit,
            stdin_file: workdir.join(input),
            stdout_file: workdir.join(output),
            stderr_file: workdir.join(error),
        }
    }

    pub fn to_json(&self, program: &Program, report_file: &Path) -> serde_json::Value {
        json!({
            "cputime_limit": self.time_limit,
            "realtime_limit": self.time_limit * 1000.0,
            "allowed_files": program.allowed_files(),
            "allowed_prefixes": program.allowed_prefixes(),
            "stdin_file": self.stdin_file,
            "stdout_file": self.stdout_file,
            "stderr_file": self.stderr_file,
            "json_report_file": report_file,
        })
    }
}

/// Handle on the `confine` binary
#[derive(Debug, Clone)]
pub struct Sandbox {
    confine_path: PathBuf,
}

impl Sandbox {
    pub fn new(confine_path: impl Into<PathBuf>) -> Self {
        Self {
            confine_path: confine_path.into(),
        }
    }

    /// Run `program` under the sandbox. Sandbox failures become `error_report()`.
    pub async fn execute(
        &self,
        workdir: &Path,
        program: &Program,
        profile: &ExecutionProfile,
    ) -> ExecutionReport {
        let profile_path = workdir.join(PROFILE_FILE);
        let report_path = workdir.join(REPORT_FILE);

        let profile_json = profile.to_json(program, &report_path).to_string();
        if let Err(e) = tokio::fs::write(&profile_path, profile_json).await {
            error!("Failed to write sandbox profile: {}", e);
            return ExecutionReport::error_report();
        }
        // A report left by a previous run must not be mistaken for this one
        if let Err(e) = tokio::fs::remove_file(&report_path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove stale sandbox report: {}", e);
            }
        }

        let command = program.command();
        debug!("Running {:?} under {:?}", command, self.confine_path);

        let child = Command::new(&self.confine_path)
            .arg("-c")
            .arg(&profile_path)
            .arg("--")
            .args(&command)
            .current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();
        let child = match child {
            Ok(child) => child,
            Err(e) => {
                error!("Failed to spawn sandbox {:?}: {}", self.confine_path, e);
                return ExecutionReport::error_report();
            }
        };

        let timeout = Duration::try_from_secs_f64(profile.time_limit * 2.0).unwrap_or_default();
        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) if output.status.success() => {}
            Ok(Ok(output)) => {
                warn!(
                    "Sandbox exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                );
                return ExecutionReport::error_report();
            }
            Ok(Err(e)) => {
                error!("Failed to wait for sandbox: {}", e);
                return ExecutionReport::error_report();
            }
            Err(_) => {
                warn!("Sandbox did not finish within {:?}", timeout);
                return ExecutionReport::error_report();
            }
        }

        match tokio::fs::read_to_string(&report_path).await {
            Ok(content) => ExecutionReport::from_json(&content),
            Err(e) => {
                error!("Failed to read sandbox report: {}", e);
                ExecutionReport::error_report()
            }
        }
    }
}
