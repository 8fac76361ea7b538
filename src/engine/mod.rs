//! Step execution: retries, continue-on-fail, includes and the run report.
//!
//! The engine is synchronous. It blocks on driver calls and on its own
//! inter-attempt and inter-step delays; callers on an async runtime run it
//! under `spawn_blocking`.

pub mod actions;
pub mod step;

use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::config::{RunOptions, Variables, substitute_vars};
use crate::driver::Page;
use crate::error::{RunError, RunResult, StepError};
use crate::report::{RunReport, StepStatus};
use crate::scenario::read_document;
use crate::schema::{validate_scenario, validate_steps};
use crate::suite::{StepSpec, TestSuite};

pub use actions::ActionContext;
pub use step::{Step, WaitState};

/// Inter-attempt delay when a step does not set `retry_delay_ms`.
pub const DEFAULT_ATTEMPT_DELAY_MS: u64 = 500;
pub const MAX_INCLUDE_DEPTH: usize = 8;

/// What a failed test case means for the rest of the suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SuitePolicy {
    #[default]
    StopOnFailure,
    RunAllCases,
}

pub struct Executor<'a, P: Page + ?Sized> {
    page: &'a P,
    timeout: Duration,
    speed: Duration,
    variables: Variables,
    include_root: Option<PathBuf>,
}

impl<'a, P: Page + ?Sized> Executor<'a, P> {
    pub fn new(page: &'a P, timeout: Duration) -> Self {
        Self {
            page,
            timeout,
            speed: Duration::ZERO,
            variables: Variables::new(),
            include_root: None,
        }
    }

    pub fn from_options(page: &'a P, options: &RunOptions) -> Self {
        Self::new(page, options.timeout)
            .with_speed(options.speed)
            .with_variables(options.variables.clone())
    }

    pub fn with_variables(mut self, variables: Variables) -> Self {
        self.variables = variables;
        self
    }

    /// Pause after every step.
    pub fn with_speed(mut self, speed: Duration) -> Self {
        self.speed = speed;
        self
    }

    /// Directory relative include paths are resolved against.
    pub fn with_include_root(mut self, root: &Path) -> Self {
        self.include_root = Some(root.to_path_buf());
        self
    }

    pub fn run_steps(
        &self,
        steps: &[StepSpec],
        base_url: Option<&str>,
        report: &mut RunReport,
    ) -> RunResult<()> {
        self.run_steps_in(steps, base_url, self.include_root.as_deref(), report, "", 0)
    }

    /// `prefix` is the position of the including step, empty at the top level.
    fn run_steps_in(
        &self,
        steps: &[StepSpec],
        base_url: Option<&str>,
        root: Option<&Path>,
        report: &mut RunReport,
        prefix: &str,
        depth: usize,
    ) -> RunResult<()> {
        for (i, spec) in steps.iter().enumerate() {
            let index = i + 1;
            let at = if prefix.is_empty() {
                index.to_string()
            } else {
                format!("{prefix}.{index}")
            };
            match &spec.include {
                Some(include) => {
                    for path in include.paths() {
                        self.include(&at, path, base_url, root, report, depth)?;
                    }
                }
                None => self.run_step(&at, index, spec, base_url, report)?,
            }
        }
        Ok(())
    }

    /// Load, validate and run an included file's steps in place.
    fn include(
        &self,
        at: &str,
        path: &str,
        base_url: Option<&str>,
        root: Option<&Path>,
        report: &mut RunReport,
        depth: usize,
    ) -> RunResult<()> {
        if depth >= MAX_INCLUDE_DEPTH {
            return Err(RunError::step(
                at,
                "include",
                StepError::Include(format!("includes nested deeper than {MAX_INCLUDE_DEPTH}")),
            ));
        }
        let path = match root {
            Some(root) if Path::new(path).is_relative() => root.join(path),
            _ => PathBuf::from(path),
        };
        if !path.is_file() {
            return Err(RunError::IncludeNotFound(path));
        }

        let doc = read_document(&path)?;
        validate_scenario(&doc)?;
        let sub_base = doc
            .get("base_url")
            .or_else(|| doc.get("url"))
            .and_then(Value::as_str)
            .filter(|b| !b.trim().is_empty())
            .or(base_url)
            .map(str::to_string);
        let steps: Vec<StepSpec> = serde_json::from_value(doc["steps"].clone())?;
        info!(path = %path.display(), steps = steps.len(), "including scenario");

        let sub_root = path.parent().map(Path::to_path_buf);
        self.run_steps_in(&steps, sub_base.as_deref(), sub_root.as_deref(), report, at, depth + 1)
    }

    fn run_step(
        &self,
        at: &str,
        index: usize,
        spec: &StepSpec,
        base_url: Option<&str>,
        report: &mut RunReport,
    ) -> RunResult<()> {
        let raw_kind = spec.kind().unwrap_or("").trim().to_lowercase();
        let shown_value = spec
            .value_text()
            .map(|v| substitute_vars(&v, &self.variables));
        let continue_on_fail = spec.continue_on_fail.unwrap_or(false);
        let handle = report.begin_step(
            at,
            &raw_kind,
            spec.selector.as_deref(),
            shown_value.as_deref(),
            continue_on_fail,
        );

        let ctx = ActionContext {
            base_url,
            timeout: self.timeout,
            reports_dir: report.reports_dir(),
        };
        let mut attempts = 0;
        let outcome = Step::from_spec(spec, index, &self.variables)
            .and_then(|step| self.attempt(&step, spec, &ctx, &mut attempts));

        match outcome {
            Ok(artifact) => {
                if let Some(path) = artifact {
                    report.attach("screenshot", &path);
                }
                report.finish_step(handle, StepStatus::Passed, None, attempts);
                debug!(at, step = %raw_kind, attempts, "step passed");
            }
            Err(e @ StepError::Validation(_)) => {
                report.finish_step(handle, StepStatus::Failed, Some(e.to_string()), attempts);
                return Err(RunError::step(at, &raw_kind, e));
            }
            Err(e) if continue_on_fail => {
                warn!(at, step = %raw_kind, error = %e, "step failed, continuing");
                report.finish_step(handle, StepStatus::FailedContinued, Some(e.to_string()), attempts);
                self.failure_screenshot(report);
            }
            Err(e) => {
                error!(at, step = %raw_kind, error = %e, attempts, "step failed");
                report.finish_step(handle, StepStatus::Failed, Some(e.to_string()), attempts);
                return Err(RunError::step(at, &raw_kind, e));
            }
        }

        if !self.speed.is_zero() {
            thread::sleep(self.speed);
        }
        Ok(())
    }

    /// Up to `retry + 1` attempts with a fixed delay between them.
    fn attempt(
        &self,
        step: &Step,
        spec: &StepSpec,
        ctx: &ActionContext<'_>,
        attempts: &mut u32,
    ) -> Result<Option<PathBuf>, StepError> {
        let allowed = spec.retry.unwrap_or(0).saturating_add(1);
        let delay = Duration::from_millis(spec.retry_delay_ms.unwrap_or(DEFAULT_ATTEMPT_DELAY_MS));
        loop {
            *attempts += 1;
            match actions::perform(self.page, step, ctx) {
                Ok(artifact) => return Ok(artifact),
                Err(e) if e.is_retryable() && *attempts < allowed => {
                    debug!(step = step.kind(), attempt = *attempts, error = %e, "retrying step");
                    thread::sleep(delay);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Best effort; a page that cannot be captured is not a second failure.
    pub fn failure_screenshot(&self, report: &mut RunReport) -> Option<PathBuf> {
        let path = report
            .reports_dir()
            .join(format!("fail_{}.png", Utc::now().timestamp_millis()));
        match self.page.screenshot(&path) {
            Ok(()) => {
                report.attach("screenshot", &path);
                Some(path)
            }
            Err(e) => {
                debug!(error = %e, "failure screenshot not captured");
                None
            }
        }
    }

    /// Run every case in order. Each case is validated before its first step.
    pub fn run_suite(
        &self,
        suite: &TestSuite,
        base_url: Option<&str>,
        report: &mut RunReport,
        policy: SuitePolicy,
    ) -> RunResult<()> {
        let mut first_failure = None;
        for (n, case) in suite.cases.iter().enumerate() {
            let label = case.id.as_deref().unwrap_or(&case.name);
            if case.steps.is_empty() {
                warn!(case = %label, "skipping test case with no steps");
                continue;
            }
            report.set_case(Some(label));
            info!(case = %label, n = n + 1, of = suite.cases.len(), "running test case");

            let result = serde_json::to_value(&case.steps)
                .map_err(RunError::from)
                .and_then(|raw| match raw {
                    Value::Array(steps) => validate_steps(&steps).map_err(RunError::from),
                    _ => Ok(()),
                })
                .and_then(|()| self.run_steps(&case.steps, base_url, report));

            match result {
                Ok(()) => info!(case = %label, "test case passed"),
                Err(e) => {
                    error!(case = %label, error = %e, "test case failed");
                    if first_failure.is_none() {
                        first_failure = Some(e);
                    }
                    if policy == SuitePolicy::StopOnFailure {
                        break;
                    }
                }
            }
        }
        report.set_case(None);
        first_failure.map_or(Ok(()), Err)
    }
}
