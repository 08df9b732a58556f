use std::sync::Arc;

use serde::{Deserialize, Deserializer};

use crate::error::ApiError;
use crate::languages::{LanguageConfig, LanguageTable};

/// Problem body as served by `GET /problems` and `GET /problems/{id}`
#[derive(Debug, Clone, Deserialize)]
pub struct ProblemPayload {
    /// Absent on some single-problem responses; the requested id is used then
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(deserialize_with = "whole_seconds")]
    pub last_modified: i64,
    pub test_cases: u32,
    /// Seconds
    pub time_limit: f64,
    pub memory_limit: i64,
    pub generator_code: String,
    pub generator_language: String,
    pub grader_code: String,
    pub grader_language: String,
    #[serde(default)]
    pub source_verifier_code: Option<String>,
    #[serde(default)]
    pub source_verifier_language: Option<String>,
}

/// Problem definition with its languages resolved against the language table
#[derive(Debug, Clone)]
pub struct Problem {
    pub id: i64,
    /// Seconds since the epoch; sent back verbatim in `If-Modified-Since`
    pub last_modified: i64,
    pub test_cases: u32,
    pub time_limit: f64,
    pub memory_limit: i64,
    pub generator_code: String,
    pub generator_language: Arc<LanguageConfig>,
    pub grader_code: String,
    pub grader_language: Arc<LanguageConfig>,
    pub source_verifier_code: Option<String>,
    pub source_verifier_language: Option<Arc<LanguageConfig>>,
}

impl Problem {
    /// Build a problem from its wire form. Any unknown language fails the whole conversion.
    pub fn resolve(
        payload: ProblemPayload,
        id: i64,
        languages: &LanguageTable,
    ) -> Result<Self, ApiError> {
        let generator_language = languages.resolve(&payload.generator_language)?;
        let grader_language = languages.resolve(&payload.grader_language)?;
        let source_verifier_language = match payload.source_verifier_language.as_deref() {
            Some(name) if !name.is_empty() => Some(languages.resolve(name)?),
            _ => None,
        };

        Ok(Self {
            id,
            last_modified: payload.last_modified,
            test_cases: payload.test_cases,
            time_limit: payload.time_limit,
            memory_limit: payload.memory_limit,
            generator_code: payload.generator_code,
            generator_language,
            grader_code: payload.grader_code,
            grader_language,
            source_verifier_code: payload.source_verifier_code.filter(|code| !code.is_empty()),
            source_verifier_language,
        })
    }

    /// Source verifier code and language, when the problem has a usable verifier
    pub fn source_verifier(&self) -> Option<(&str, &Arc<LanguageConfig>)> {
        match (&self.source_verifier_code, &self.source_verifier_language) {
            (Some(code), Some(language)) => Some((code.as_str(), language)),
            _ => None,
        }
    }
}

/// Timestamps may arrive as floats; they are kept at whole-second granularity
fn whole_seconds<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = f64::deserialize(deserializer)?;
    Ok(value.trunc() as i64)
}
