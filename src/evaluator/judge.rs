//! Judging pipeline backed by the `confine` sandbox
//!
//! For each job: optional source verification, compilation of the submission,
//! generator and grader, then one generator/program/grader round per test case.
//! Partial results are emitted between accepted cases per `PartialSubmitPolicy`.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use super::compiler::{self, CompileOutcome, Program};
use super::confine::{ExecutionProfile, Sandbox};
use super::{Evaluator, PartialSubmitPolicy, PartialThrottle};
use crate::config::WorkerConfig;
use crate::languages::LanguageConfig;
use crate::models::{ExecutionResult, Job, JobVerdict, Problem};

/// Evaluator compiling and running programs through `confine`
#[derive(Debug, Clone)]
pub struct ConfineEvaluator {
    sandbox: Sandbox,
    policy: PartialSubmitPolicy,
    compilation_time_limit: Duration,
    /// Seconds; applies to generator, grader and source verifier runs
    grader_time_limit: f64,
}

impl ConfineEvaluator {
    pub fn new(
        sandbox: Sandbox,
        policy: PartialSubmitPolicy,
        compilation_time_limit: Duration,
        grader_time_limit: f64,
    ) -> Self {
        Self {
            sandbox,
            policy,
            compilation_time_limit,
            grader_time_limit,
        }
    }

    pub fn from_config(config: &WorkerConfig) -> Self {
        Self::new(
            Sandbox::new(&config.confine_path),
            config.partial_submit_policy(),
            Duration::from_secs(config.compilation_time_limit_secs),
            config.grader_time_limit_secs,
        )
    }

    async fn run_job(&self, job: Arc<Job>, results: &mpsc::Sender<ExecutionResult>) -> Result<()> {
        let mut result = ExecutionResult::new(job.clone(), Some(JobVerdict::JudgeError));

        let Some(problem) = job.problem.clone() else {
            error!("Job {} has no problem to judge against", job.id);
            return emit(results, result).await;
        };
        debug!(
            "Judging job {} against problem {}: {} cases, time limit {}s, memory limit {}",
            job.id, problem.id, problem.test_cases, problem.time_limit, problem.memory_limit
        );

        let workdir = tempfile::Builder::new()
            .prefix("jury-")
            .tempdir()
            .context("Failed to create work directory")?;
        let work = workdir.path();

        if let Some((code, language)) = problem.source_verifier() {
            if let Some(verdict) = self
                .verify_source(&job, &problem, code, language, work)
                .await?
            {
                result.verdict = Some(verdict);
                return emit(results, result).await;
            }
        }

        let program = match compiler::compile(
            &job.language,
            &job.code,
            &work.join("program"),
            self.compilation_time_limit,
        )
        .await?
        {
            CompileOutcome::Ready(program) => program,
            CompileOutcome::Failed(message) => {
                debug!("Job {} failed to compile: {}", job.id, message);
                result.verdict = Some(JobVerdict::CompilationError);
                return emit(results, result).await;
            }
        };

        let generator = self
            .compile_support(
                &problem,
                "generator",
                &problem.generator_language,
                &problem.generator_code,
                work,
            )
            .await?;
        let Some(generator) = generator else {
            return emit(results, result).await;
        };
        let grader = self
            .compile_support(
                &problem,
                "grader",
                &problem.grader_language,
                &problem.grader_code,
                work,
            )
            .await?;
        let Some(grader) = grader else {
            return emit(results, result).await;
        };

        result.verdict = None;
        let mut throttle = PartialThrottle::new(self.policy);

        for case in 1..=problem.test_cases {
            result.last_ran_case = case;
            let case_result = self
                .run_test_case(&job, &problem, case, work, &program, &generator, &grader)
                .await?;

            if case_result.verdict != Some(JobVerdict::Accepted) {
                result = case_result;
                break;
            }
            result.execution_time = result.execution_time.max(case_result.execution_time);
            result.execution_memory = result.execution_memory.max(case_result.execution_memory);

            if throttle.should_emit(case, problem.test_cases) {
                emit(results, result.clone()).await?;
                throttle.mark(case);
            }
        }

        if result.verdict.is_none() {
            result.verdict = Some(JobVerdict::Accepted);
        }
        info!(
            "Job {} judged: verdict={}, case={}, time={:.2}, memory={}",
            job.id,
            result.verdict.unwrap_or(JobVerdict::Accepted),
            result.last_ran_case,
            result.execution_time,
            result.execution_memory
        );
        emit(results, result).await
    }

    /// Compile a problem-side program. `None` means it failed and the job is a judge error.
    async fn compile_support(
        &self,
        problem: &Problem,
        role: &str,
        language: &Arc<LanguageConfig>,
        code: &str,
        work: &Path,
    ) -> Result<Option<Program>> {
        let dir = work.join(role);
        match compiler::compile(language, code, &dir, self.compilation_time_limit).await? {
            CompileOutcome::Ready(program) => Ok(Some(program)),
            CompileOutcome::Failed(message) => {
                error!(
                    "The {} failed to compile for problem {}: {}",
                    role, problem.id, message
                );
                Ok(None)
            }
        }
    }

    /// Run the problem's source verifier over the submission.
    /// Returns the verdict ending the job, or `None` when the source is acceptable.
    async fn verify_source(
        &self,
        job: &Job,
        problem: &Problem,
        code: &str,
        language: &Arc<LanguageConfig>,
        work: &Path,
    ) -> Result<Option<JobVerdict>> {
        let Some(verifier) = self
            .compile_support(problem, "source_verifier", language, code, work)
            .await?
        else {
            return Ok(Some(JobVerdict::JudgeError));
        };

        tokio::fs::write(work.join("source"), &job.code)
            .await
            .context("Failed to write submission for source verifier")?;

        let profile = ExecutionProfile::new(
            work,
            self.grader_time_limit,
            "source",
            "source_verifier_result",
            "source_verifier_error",
        );
        let report = self.sandbox.execute(work, &verifier, &profile).await;
        if !report.execution_ok {
            error!(
                "Source verifier failed for job {} of problem {}",
                job.id, problem.id
            );
            return Ok(Some(JobVerdict::JudgeError));
        }

        let verdict = tokio::fs::read_to_string(work.join("source_verifier_result"))
            .await
            .context("Failed to read source verifier result")?;
        if verdict.trim() != "OK" {
            debug!("Job {} rejected by source verifier", job.id);
            return Ok(Some(JobVerdict::InvalidSource));
        }
        Ok(None)
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_test_case(
        &self,
        job: &Arc<Job>,
        problem: &Problem,
        case: u32,
        work: &Path,
        program: &Program,
        generator: &Program,
        grader: &Program,
    ) -> Result<ExecutionResult> {
        let mut result = ExecutionResult::new(job.clone(), Some(JobVerdict::JudgeError));
        result.last_ran_case = case;

        tokio::fs::write(work.join("case_number"), case.to_string())
            .await
            .context("Failed to write case number")?;

        let profile = ExecutionProfile::new(
            work,
            self.grader_time_limit,
            "case_number",
            "input",
            "generator_error",
        );
        let report = self.sandbox.execute(work, generator, &profile).await;
        if !report.execution_ok {
            error!(
                "Generator failed for test case {} of problem {} with error {:?}",
                case, problem.id, report.execution_error
            );
            return Ok(result);
        }

        let profile = ExecutionProfile::new(
            work,
            problem.time_limit,
            "input",
            "program_output",
            "program_error",
        );
        let report = self.sandbox.execute(work, program, &profile).await;
        result.execution_time = report.realtime;
        result.execution_memory = report.memory;
        if !report.execution_ok {
            result.verdict = Some(report.execution_error.unwrap_or(JobVerdict::RuntimeError));
            return Ok(result);
        }

        let profile = ExecutionProfile::new(
            work,
            self.grader_time_limit,
            "input",
            "grader_output",
            "grader_error",
        );
        let report = self.sandbox.execute(work, grader, &profile).await;
        if !report.execution_ok {
            error!(
                "Grader failed for test case {} of problem {} with error {:?}",
                case, problem.id, report.execution_error
            );
            return Ok(result);
        }

        let actual = tokio::fs::read(work.join("program_output"))
            .await
            .context("Failed to read program output")?;
        let expected = tokio::fs::read(work.join("grader_output"))
            .await
            .context("Failed to read grader output")?;

        result.verdict = Some(if compare_output(&actual, &expected) {
            JobVerdict::Accepted
        } else {
            JobVerdict::WrongAnswer
        });
        Ok(result)
    }
}

impl Evaluator for ConfineEvaluator {
    fn evaluate(&self, job: Arc<Job>) -> mpsc::Receiver<ExecutionResult> {
        let (tx, rx) = mpsc::channel(1);
        let evaluator = self.clone();

        tokio::spawn(async move {
            if let Err(e) = evaluator.run_job(job.clone(), &tx).await {
                error!("Failed to judge job {}: {:#}", job.id, e);
                let _ = tx
                    .send(ExecutionResult::new(job, Some(JobVerdict::JudgeError)))
                    .await;
            }
        });

        rx
    }
}

async fn emit(results: &mpsc::Sender<ExecutionResult>, result: ExecutionResult) -> Result<()> {
    results
        .send(result)
        .await
        .map_err(|_| anyhow::anyhow!("Result receiver dropped"))
}

/// Compare program output with expected output.
///
/// Outputs are compared byte for byte once surrounding ASCII whitespace is trimmed.
pub fn compare_output(actual: &[u8], expected: &[u8]) -> bool {
    actual.trim_ascii() == expected.trim_ascii()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::languages::LanguageTable;

    #[test]
    fn test_compare_output_exact_match() {
        assert!(compare_output(b"hello\nworld\n", b"hello\nworld\n"));
    }

    #[test]
    fn test_compare_output_surrounding_whitespace() {
        assert!(compare_output(b"\n42\n", b"42\n"));
        assert!(compare_output(b" 42", b"42"));
        assert!(compare_output(b"hello\nworld\n\n\n", b"hello\nworld"));
    }

    #[test]
    fn test_compare_output_inner_whitespace_matters() {
        assert!(!compare_output(b"1 \n2", b"1\n2"));
        assert!(!compare_output(b"1  2", b"1 2"));
    }

    #[test]
    fn test_compare_output_different() {
        assert!(!compare_output(b"hello\nworld\n", b"hello\nearth\n"));
    }

    #[test]
    fn test_compare_output_invalid_utf8_compared_by_bytes() {
        assert!(!compare_output(b"\xff\n", b"\xfe\n"));
        assert!(compare_output(b"\xff\n", b"\xff"));
    }

    /// Stand-in for `confine`: runs the command with the profile's redirections
    /// and writes a report with fixed metrics
    #[cfg(unix)]
    const FAKE_CONFINE: &str = r##"#!/bin/sh
cfg="$2"
shift 3
field() { sed -n "s/.*\"$1\":\"\([^\"]*\)\".*/\1/p" "$cfg"; }
"$@" < "$(field stdin_file)" > "$(field stdout_file)" 2> "$(field stderr_file)"
status=$?
if [ "$status" -eq 0 ]; then
  printf '{"execution_ok":true,"execution_error_code":null,"exitcode":0,"realtime":0.5,"cputime":0.25,"memory":1024}' > "$(field json_report_file)"
else
  printf '{"execution_ok":false,"execution_error_code":{"code":"RuntimeError"},"exitcode":%s,"realtime":0.1,"cputime":0.1,"memory":512}' "$status" > "$(field json_report_file)"
fi
"##;

    const DOUBLER: &str = "read n; echo $((n * 2))";

    #[cfg(unix)]
    struct Fixture {
        _dir: tempfile::TempDir,
        evaluator: ConfineEvaluator,
        languages: LanguageTable,
    }

    #[cfg(unix)]
    fn fixture(cases_threshold: u32) -> Fixture {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let confine = dir.path().join("confine");
        std::fs::write(&confine, FAKE_CONFINE).unwrap();
        std::fs::set_permissions(&confine, std::fs::Permissions::from_mode(0o755)).unwrap();

        let evaluator = ConfineEvaluator::new(
            Sandbox::new(&confine),
            PartialSubmitPolicy {
                time_threshold: Duration::from_secs(3600),
                cases_threshold,
            },
            Duration::from_secs(5),
            5.0,
        );
        let languages = LanguageTable::from_toml_str(
            "[sh]\nsource_file = \"main.sh\"\nrun_command = \"/bin/sh {source}\"\n",
        )
        .unwrap();

        Fixture {
            _dir: dir,
            evaluator,
            languages,
        }
    }

    #[cfg(unix)]
    fn job(fixture: &Fixture, code: &str, test_cases: u32, verifier: Option<&str>) -> Arc<Job> {
        let sh = fixture.languages.resolve("sh").unwrap();
        let problem = Problem {
            id: 7,
            last_modified: 1000,
            test_cases,
            time_limit: 5.0,
            memory_limit: 65536,
            generator_code: "read n; echo $n".into(),
            generator_language: sh.clone(),
            grader_code: DOUBLER.into(),
            grader_language: sh.clone(),
            source_verifier_code: verifier.map(str::to_string),
            source_verifier_language: verifier.map(|_| sh.clone()),
        };

        Arc::new(Job {
            id: 42,
            verification_code: "abc".into(),
            problem: Some(Arc::new(problem)),
            code: code.into(),
            language: sh,
        })
    }

    async fn collect(mut rx: mpsc::Receiver<ExecutionResult>) -> Vec<ExecutionResult> {
        let mut results = Vec::new();
        while let Some(result) = rx.recv().await {
            results.push(result);
        }
        results
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_accepted_with_partials() {
        let fixture = fixture(0);
        let results = collect(fixture.evaluator.evaluate(job(&fixture, DOUBLER, 3, None))).await;

        let cases: Vec<u32> = results.iter().map(|r| r.last_ran_case).collect();
        assert_eq!(cases, vec![1, 2, 3]);
        assert!(results[..2].iter().all(|r| r.verdict.is_none()));

        let terminal = results.last().unwrap();
        assert_eq!(terminal.verdict, Some(JobVerdict::Accepted));
        assert_eq!(terminal.execution_time, 0.5);
        assert_eq!(terminal.execution_memory, 1024);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_surrounding_blank_lines_accepted() {
        let fixture = fixture(100);
        let code = "read n; echo; echo \"  $((n * 2))\"; echo";
        let results = collect(fixture.evaluator.evaluate(job(&fixture, code, 2, None))).await;

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].verdict, Some(JobVerdict::Accepted));
        assert_eq!(results[0].last_ran_case, 2);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_wrong_answer_stops_early() {
        let fixture = fixture(0);
        let code = r#"read n; if [ "$n" = 2 ]; then echo 0; else echo $((n * 2)); fi"#;
        let results = collect(fixture.evaluator.evaluate(job(&fixture, code, 5, None))).await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].verdict, None);
        assert_eq!(results[1].verdict, Some(JobVerdict::WrongAnswer));
        assert_eq!(results[1].last_ran_case, 2);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_runtime_error_from_report() {
        let fixture = fixture(10);
        let results = collect(fixture.evaluator.evaluate(job(&fixture, "exit 3", 4, None))).await;

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].verdict, Some(JobVerdict::RuntimeError));
        assert_eq!(results[0].last_ran_case, 1);
        assert_eq!(results[0].execution_memory, 512);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_source_verifier_rejects() {
        let fixture = fixture(10);
        let results = collect(
            fixture
                .evaluator
                .evaluate(job(&fixture, DOUBLER, 3, Some("cat > /dev/null; echo NO"))),
        )
        .await;

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].verdict, Some(JobVerdict::InvalidSource));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_source_verifier_accepts() {
        let fixture = fixture(10);
        let results = collect(
            fixture
                .evaluator
                .evaluate(job(&fixture, DOUBLER, 2, Some("cat > /dev/null; echo OK"))),
        )
        .await;

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].verdict, Some(JobVerdict::Accepted));
    }

    #[tokio::test]
    async fn test_job_without_problem_is_judge_error() {
        let languages = LanguageTable::from_toml_str(
            "[sh]\nsource_file = \"main.sh\"\nrun_command = \"/bin/sh {source}\"\n",
        )
        .unwrap();
        let evaluator = ConfineEvaluator::new(
            Sandbox::new("/nonexistent/confine"),
            PartialSubmitPolicy {
                time_threshold: Duration::from_secs(2),
                cases_threshold: 10,
            },
            Duration::from_secs(5),
            5.0,
        );
        let job = Arc::new(Job {
            id: 1,
            verification_code: "x".into(),
            problem: None,
            code: String::new(),
            language: languages.resolve("sh").unwrap(),
        });

        let results = collect(evaluator.evaluate(job)).await;

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].verdict, Some(JobVerdict::JudgeError));
    }
}
