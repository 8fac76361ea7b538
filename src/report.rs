//! The structured record of one run.
//!
//! A [`RunReport`] is owned by exactly one run and threaded through the
//! engine by `&mut`; nothing else writes to it.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::RunError;

pub const RESULT_FILE: &str = "result.json";
pub const SUMMARY_FILE: &str = "report_summary.txt";
pub const TRACE_FILE: &str = "trace.jsonl";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepStatus {
    Running,
    Passed,
    Failed,
    FailedContinued,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Passed,
    Failed,
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            StepStatus::Running => "running",
            StepStatus::Passed => "passed",
            StepStatus::Failed => "failed",
            StepStatus::FailedContinued => "failed-continued",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    /// Position in the report, counting every executed step once.
    pub index: usize,
    /// Position in the scenario, dotted inside includes (`3.2`).
    pub at: String,
    #[serde(rename = "type")]
    pub step_type: String,
    pub selector: Option<String>,
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case: Option<String>,
    pub status: StepStatus,
    pub error: Option<String>,
    pub attempts: u32,
    pub continue_on_fail: bool,
    pub started: DateTime<Utc>,
    pub ended: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    #[serde(rename = "type")]
    pub kind: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub name: String,
    pub base_url: Option<String>,
    pub browser: String,
    pub headful: bool,
    pub started: DateTime<Utc>,
    pub ended: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub status: RunStatus,
    pub error: Option<String>,
    pub steps: Vec<StepRecord>,
    pub artifacts: Vec<Artifact>,
    #[serde(skip)]
    reports_dir: PathBuf,
    #[serde(skip)]
    trace: Option<PathBuf>,
    #[serde(skip)]
    current_case: Option<String>,
}

impl RunReport {
    pub fn new(
        name: &str,
        base_url: Option<&str>,
        browser: &str,
        headful: bool,
        reports_dir: &Path,
    ) -> Self {
        Self {
            name: name.to_string(),
            base_url: base_url.map(str::to_string),
            browser: browser.to_string(),
            headful,
            started: Utc::now(),
            ended: None,
            duration_ms: None,
            status: RunStatus::Running,
            error: None,
            steps: Vec::new(),
            artifacts: Vec::new(),
            reports_dir: reports_dir.to_path_buf(),
            trace: None,
            current_case: None,
        }
    }

    pub fn reports_dir(&self) -> &Path {
        &self.reports_dir
    }

    /// Append every finished step to `trace.jsonl` in the reports directory.
    pub fn enable_trace(&mut self) {
        let path = self.reports_dir.join(TRACE_FILE);
        self.attach("trace", &path);
        self.trace = Some(path);
    }

    /// Label subsequent step records with a test case name.
    pub fn set_case(&mut self, name: Option<&str>) {
        self.current_case = name.map(str::to_string);
    }

    /// Open a record in `running` state and return its handle.
    pub fn begin_step(
        &mut self,
        at: &str,
        step_type: &str,
        selector: Option<&str>,
        value: Option<&str>,
        continue_on_fail: bool,
    ) -> usize {
        let index = self.steps.len() + 1;
        self.steps.push(StepRecord {
            index,
            at: at.to_string(),
            step_type: step_type.to_string(),
            selector: selector.map(str::to_string),
            value: value.map(str::to_string),
            case: self.current_case.clone(),
            status: StepStatus::Running,
            error: None,
            attempts: 0,
            continue_on_fail,
            started: Utc::now(),
            ended: None,
            duration_ms: None,
        });
        index - 1
    }

    pub fn finish_step(
        &mut self,
        handle: usize,
        status: StepStatus,
        error: Option<String>,
        attempts: u32,
    ) {
        let Some(rec) = self.steps.get_mut(handle) else {
            return;
        };
        let now = Utc::now();
        rec.status = status;
        rec.error = error;
        rec.attempts = attempts;
        rec.ended = Some(now);
        rec.duration_ms = Some((now - rec.started).num_milliseconds());
        let line = serde_json::to_string(rec);

        if let (Some(path), Ok(line)) = (&self.trace, line) {
            if let Err(e) = append_line(path, &line) {
                warn!(path = %path.display(), error = %e, "could not append to trace");
            }
        }
    }

    pub fn attach(&mut self, kind: &str, path: &Path) {
        self.artifacts.push(Artifact {
            kind: kind.to_string(),
            path: path.to_path_buf(),
        });
    }

    pub fn step_count(&self, status: StepStatus) -> usize {
        self.steps.iter().filter(|s| s.status == status).count()
    }

    /// Close the run and write `result.json` plus a plain-text summary.
    pub fn finalize(&mut self, status: RunStatus, error: Option<String>) -> Result<PathBuf, RunError> {
        let now = Utc::now();
        self.status = status;
        self.error = error;
        self.ended = Some(now);
        self.duration_ms = Some((now - self.started).num_milliseconds());

        fs::create_dir_all(&self.reports_dir)?;
        let out = self.reports_dir.join(RESULT_FILE);
        fs::write(&out, serde_json::to_string_pretty(self)?)?;
        fs::write(self.reports_dir.join(SUMMARY_FILE), self.render_summary())?;
        info!(
            name = %self.name,
            status = ?self.status,
            steps = self.steps.len(),
            failed = self.step_count(StepStatus::Failed),
            continued = self.step_count(StepStatus::FailedContinued),
            path = %out.display(),
            "run finalized"
        );
        Ok(out)
    }

    pub fn render_summary(&self) -> String {
        let mut lines = vec![
            format!("Run: {}", self.name),
            format!("Base URL: {}", self.base_url.as_deref().unwrap_or("-")),
            format!("Browser: {} | Headful: {}", self.browser, self.headful),
            format!("Status: {:?}", self.status),
            format!("Error: {}", self.error.as_deref().unwrap_or("-")),
            format!(
                "Duration: {:.2}s",
                self.duration_ms.unwrap_or(0) as f64 / 1000.0
            ),
            String::new(),
            "Steps:".to_string(),
        ];
        for s in &self.steps {
            lines.push(format!(
                "  [{}] {}  ({:.2}s)  -> {}  sel={:?} val={:?}",
                s.at,
                s.step_type,
                s.duration_ms.unwrap_or(0) as f64 / 1000.0,
                s.status,
                s.selector,
                s.value
            ));
            if let Some(err) = &s.error {
                lines.push(format!("       error: {err}"));
            }
        }
        lines.join("\n")
    }
}

fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{line}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finalize_writes_result_record() {
        let dir = tempfile::tempdir().unwrap();
        let mut report = RunReport::new("login", Some("https://a.test"), "chromium", false, dir.path());
        let h = report.begin_step("2.1", "click", Some("#go"), None, true);
        report.finish_step(h, StepStatus::FailedContinued, Some("no element".into()), 2);
        report.attach("screenshot", &dir.path().join("fail_1.png"));
        let out = report.finalize(RunStatus::Passed, None).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(out).unwrap()).unwrap();
        assert_eq!(raw["status"], "passed");
        assert_eq!(raw["steps"][0]["status"], "failed-continued");
        assert_eq!(raw["steps"][0]["type"], "click");
        assert_eq!(raw["steps"][0]["index"], 1);
        assert_eq!(raw["steps"][0]["at"], "2.1");
        assert_eq!(raw["steps"][0]["attempts"], 2);
        assert_eq!(raw["artifacts"][0]["type"], "screenshot");
        assert!(dir.path().join(SUMMARY_FILE).exists());
    }

    #[test]
    fn test_trace_appends_each_finished_step() {
        let dir = tempfile::tempdir().unwrap();
        let mut report = RunReport::new("t", None, "chromium", false, dir.path());
        report.enable_trace();
        for (at, kind) in ["goto", "screenshot"].into_iter().enumerate() {
            let h = report.begin_step(&(at + 1).to_string(), kind, None, None, false);
            report.finish_step(h, StepStatus::Passed, None, 1);
        }
        let trace = std::fs::read_to_string(dir.path().join(TRACE_FILE)).unwrap();
        assert_eq!(trace.lines().count(), 2);
        assert_eq!(report.artifacts[0].kind, "trace");
    }

    #[test]
    fn test_summary_lists_errors() {
        let dir = tempfile::tempdir().unwrap();
        let mut report = RunReport::new("t", None, "chromium", true, dir.path());
        let h = report.begin_step("1", "fill", Some("#u"), Some("bob"), false);
        report.finish_step(h, StepStatus::Failed, Some("boom".into()), 1);
        let text = report.render_summary();
        assert!(text.contains("[1] fill"));
        assert!(text.contains("-> failed"));
        assert!(text.contains("error: boom"));
    }
}
