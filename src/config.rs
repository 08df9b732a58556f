//! Worker configuration
//!
//! Loaded from environment variables (a `.env` file is honored by `main`).

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;

use crate::evaluator::PartialSubmitPolicy;

/// Worker configuration
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Judge API base URL (default: http://localhost:5000)
    pub judge_url: String,
    /// Value of the `api_key` header sent with every request
    pub api_key: String,
    /// Seconds between attempts while the judge API is unreachable (default: 1)
    pub retry_freq_secs: u64,
    /// Seconds to wait after an empty claim before polling again (default: 1)
    pub idle_poll_secs: u64,
    /// Path of the `confine` sandbox binary
    pub confine_path: PathBuf,
    /// Compilation time limit in seconds (default: 10)
    pub compilation_time_limit_secs: u64,
    /// Time limit for generator, grader and source verifier runs, in seconds (default: 10)
    pub grader_time_limit_secs: f64,
    /// Minimum seconds between partial submissions (default: 2)
    pub partial_submit_time_threshold_secs: f64,
    /// Maximum cases between partial submissions (default: 10)
    pub partial_submit_cases_threshold: u32,
    /// Language table overriding the built-in one
    pub languages_config: Option<PathBuf>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            judge_url: "http://localhost:5000".into(),
            api_key: String::new(),
            retry_freq_secs: 1,
            idle_poll_secs: 1,
            confine_path: PathBuf::from("./confine"),
            compilation_time_limit_secs: 10,
            grader_time_limit_secs: 10.0,
            partial_submit_time_threshold_secs: 2.0,
            partial_submit_cases_threshold: 10,
            languages_config: None,
        }
    }
}

impl WorkerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        Ok(Self {
            judge_url: lookup("JUDGE_URL").unwrap_or(defaults.judge_url),
            api_key: lookup("JUDGE_API_KEY").unwrap_or(defaults.api_key),
            retry_freq_secs: parse_or(&lookup, "JUDGE_RETRY_FREQ", defaults.retry_freq_secs)?,
            idle_poll_secs: parse_or(&lookup, "JUDGE_IDLE_POLL", defaults.idle_poll_secs)?,
            confine_path: lookup("CONFINE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.confine_path),
            compilation_time_limit_secs: parse_or(
                &lookup,
                "COMPILATION_TIME_LIMIT",
                defaults.compilation_time_limit_secs,
            )?,
            grader_time_limit_secs: parse_or(
                &lookup,
                "GRADER_TIME_LIMIT",
                defaults.grader_time_limit_secs,
            )?,
            partial_submit_time_threshold_secs: parse_or(
                &lookup,
                "PARTIAL_JOB_SUBMIT_TIME_THRESHOLD",
                defaults.partial_submit_time_threshold_secs,
            )?,
            partial_submit_cases_threshold: parse_or(
                &lookup,
                "PARTIAL_JOB_SUBMIT_CASES_THRESHOLD",
                defaults.partial_submit_cases_threshold,
            )?,
            languages_config: lookup("LANGUAGES_CONFIG").map(PathBuf::from),
        })
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_secs(self.idle_poll_secs)
    }

    pub fn partial_submit_policy(&self) -> PartialSubmitPolicy {
        PartialSubmitPolicy {
            time_threshold: Duration::try_from_secs_f64(self.partial_submit_time_threshold_secs)
                .unwrap_or_default(),
            cases_threshold: self.partial_submit_cases_threshold,
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> anyhow::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("Invalid value for {}: {}", key, raw)),
        None => Ok(default),
    }
}
