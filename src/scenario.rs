//! Hand-written scenario files and the per-browser run loop.
//!
//! A scenario is YAML or JSON:
//!
//! ```yaml
//! name: checkout
//! base_url: https://shop.test
//! options:
//!   browsers: [chromium, firefox]
//!   timeout_ms: 5000
//! variables:
//!   USERNAME: standard_user
//! steps:
//!   - { type: goto, selector: / }
//!   - { include: login.yaml }
//!   - { type: assert_url_contains, value: /inventory }
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::config::{EnvSource, RunOptions, ScenarioOptions};
use crate::driver::Launcher;
use crate::engine::Executor;
use crate::error::{RunError, RunResult};
use crate::report::{RunReport, RunStatus};
use crate::schema::validate_scenario;
use crate::suite::StepSpec;

/// Parse a YAML or JSON document into a JSON value. A leading BOM is ignored.
pub fn read_document(path: &Path) -> RunResult<Value> {
    let raw = fs::read_to_string(path)?;
    let raw = raw.trim_start_matches('\u{feff}');
    let is_json = path
        .extension()
        .map(|e| e.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if is_json {
        Ok(serde_json::from_str(raw)?)
    } else {
        Ok(serde_yaml::from_str(raw)?)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub options: ScenarioOptions,
    #[serde(default)]
    pub variables: BTreeMap<String, Value>,
    pub steps: Vec<StepSpec>,
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

impl Scenario {
    /// Read and validate a scenario file. Nothing runs if validation fails.
    pub fn load(path: &Path) -> RunResult<Self> {
        let doc = read_document(path)?;
        validate_scenario(&doc)?;
        let mut scenario: Scenario = serde_json::from_value(doc)?;
        if scenario.name.as_deref().is_none_or(|n| n.trim().is_empty()) {
            scenario.name = path.file_stem().map(|s| s.to_string_lossy().into_owned());
        }
        scenario.source = Some(path.to_path_buf());
        Ok(scenario)
    }

    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or("scenario")
    }

    pub fn base_url(&self) -> Option<&str> {
        self.base_url
            .as_deref()
            .or(self.url.as_deref())
            .filter(|u| !u.trim().is_empty())
    }

    /// Directory includes are resolved against.
    pub fn include_root(&self) -> Option<&Path> {
        self.source.as_deref().and_then(Path::parent)
    }
}

/// Run `body` in a fresh browser session and always finalize a result record,
/// even when the browser never starts.
pub fn run_in_session<L, F>(
    launcher: &L,
    options: &RunOptions,
    browser: &str,
    include_root: Option<&Path>,
    mut report: RunReport,
    body: F,
) -> RunStatus
where
    L: Launcher,
    F: FnOnce(&Executor<'_, L::Session>, &mut RunReport) -> RunResult<()>,
{
    if options.tracing {
        report.enable_trace();
    }

    let (status, failure) = match launcher.launch(&options.browser_options(browser)) {
        Err(e) => {
            let err = RunError::Launch {
                browser: browser.to_string(),
                reason: format!("{e:#}"),
            };
            error!(%browser, error = %err, "browser launch failed");
            (RunStatus::Failed, Some(err.to_string()))
        }
        Ok(page) => {
            let mut exec = Executor::from_options(&page, options);
            if let Some(root) = include_root {
                exec = exec.with_include_root(root);
            }
            match body(&exec, &mut report) {
                Ok(()) => (RunStatus::Passed, None),
                Err(e) => {
                    error!(%browser, error = %e, "run failed");
                    if let Some(shot) = exec.failure_screenshot(&mut report) {
                        info!(path = %shot.display(), "failure screenshot saved");
                    }
                    (RunStatus::Failed, Some(e.to_string()))
                }
            }
        }
    };

    match report.finalize(status, failure) {
        Ok(path) => info!(%browser, ?status, result = %path.display(), "run complete"),
        Err(e) => error!(%browser, error = %e, "could not write result record"),
    }
    status
}

/// Run a loaded scenario once per requested browser. Multi-browser runs write
/// to `<reports_root>/<browser>`, single runs straight into `reports_root`.
pub fn run_scenario<L: Launcher>(
    launcher: &L,
    scenario: &Scenario,
    env: &dyn EnvSource,
    reports_root: &Path,
) -> RunStatus {
    let options = RunOptions::load(&scenario.options, &scenario.variables, env);
    if options.browsers.is_empty() {
        let browser = options.browser.clone();
        return run_single(launcher, scenario, &options, &browser, reports_root);
    }

    let mut overall = RunStatus::Passed;
    for browser in &options.browsers {
        info!(%browser, "running scenario on browser");
        let dir = reports_root.join(browser);
        if run_single(launcher, scenario, &options, browser, &dir) == RunStatus::Failed {
            overall = RunStatus::Failed;
        }
    }
    overall
}

fn run_single<L: Launcher>(
    launcher: &L,
    scenario: &Scenario,
    options: &RunOptions,
    browser: &str,
    reports_dir: &Path,
) -> RunStatus {
    if let Err(e) = fs::create_dir_all(reports_dir) {
        warn!(dir = %reports_dir.display(), error = %e, "could not create reports directory");
    }
    let report = RunReport::new(
        scenario.name(),
        scenario.base_url(),
        browser,
        options.headful,
        reports_dir,
    );
    run_in_session(
        launcher,
        options,
        browser,
        scenario.include_root(),
        report,
        |exec, report| exec.run_steps(&scenario.steps, scenario.base_url(), report),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_yaml_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("login.yaml");
        fs::write(
            &path,
            "url: https://shop.test\nsteps:\n  - type: goto\n    selector: /\n  - type: wait\n    value: 250ms\n",
        )
        .unwrap();
        let scenario = Scenario::load(&path).unwrap();
        assert_eq!(scenario.name(), "login");
        assert_eq!(scenario.base_url(), Some("https://shop.test"));
        assert_eq!(scenario.steps.len(), 2);
        assert_eq!(scenario.include_root(), Some(dir.path()));
    }

    #[test]
    fn test_invalid_scenario_is_rejected_before_running() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, r##"{"steps": [{"type": "fill", "selector": "#u"}]}"##).unwrap();
        assert!(matches!(Scenario::load(&path), Err(RunError::Validation(_))));
    }

    #[test]
    fn test_read_document_strips_bom() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.json");
        fs::write(&path, "\u{feff}{\"steps\": []}").unwrap();
        assert!(read_document(&path).unwrap()["steps"].is_array());
    }
}
