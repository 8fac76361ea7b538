//! Explore, plan, execute: the hands-off path from a URL to a result record.
//!
//! Browser work is blocking and runs on the blocking pool; planning is async
//! because the model-backed planner talks HTTP.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use crate::config::RunOptions;
use crate::crawler::{CrawlLimits, GRAPH_FILE, explore_and_save};
use crate::driver::Launcher;
use crate::engine::SuitePolicy;
use crate::error::{RunError, RunResult};
use crate::graph::SiteGraph;
use crate::llm::TextGenerator;
use crate::planner::{HeuristicConfig, Plan, plan_suite};
use crate::report::{RunReport, RunStatus};
use crate::scenario::run_in_session;

pub const AI_DIR: &str = "ai";
pub const SUITE_FILE: &str = "test_suite.json";
pub const AI_RUN_NAME: &str = "AI Suite";

/// Everything one hands-off run needs besides the launcher and the generator.
#[derive(Debug, Clone)]
pub struct AiRun {
    pub url: String,
    pub options: RunOptions,
    pub limits: CrawlLimits,
    /// Crawl again even when a graph is already on disk.
    pub reexplore: bool,
    pub policy: SuitePolicy,
    pub heuristics: HeuristicConfig,
    pub reports_root: PathBuf,
}

impl AiRun {
    pub fn dir(&self) -> PathBuf {
        self.reports_root.join(AI_DIR)
    }

    pub fn graph_path(&self) -> PathBuf {
        self.dir().join(GRAPH_FILE)
    }

    pub fn suite_path(&self) -> PathBuf {
        self.dir().join(SUITE_FILE)
    }
}

/// Launch a browser, crawl from `url` and save the graph into `out_dir`.
pub fn explore<L: Launcher>(
    launcher: &L,
    options: &RunOptions,
    url: &str,
    limits: &CrawlLimits,
    out_dir: &Path,
) -> RunResult<PathBuf> {
    let page = launcher
        .launch(&options.browser_options(&options.browser))
        .map_err(|e| RunError::Launch {
            browser: options.browser.clone(),
            reason: format!("{e:#}"),
        })?;
    let path = explore_and_save(&page, url, out_dir, limits)?;
    info!(path = %path.display(), "site graph saved");
    Ok(path)
}

/// Make sure a graph exists at `run.graph_path()`. A failed crawl leaves a
/// page-less graph behind so planning can still fall back to defaults.
pub fn ensure_graph<L: Launcher>(launcher: &L, run: &AiRun) -> RunResult<PathBuf> {
    let path = run.graph_path();
    if path.is_file() && !run.reexplore {
        info!(path = %path.display(), "reusing existing site graph");
        return Ok(path);
    }
    match explore(launcher, &run.options, &run.url, &run.limits, &run.dir()) {
        Ok(path) => Ok(path),
        Err(e) => {
            warn!(error = %e, "exploration failed, writing an empty graph");
            SiteGraph::new(&run.url).save(&path)?;
            Ok(path)
        }
    }
}

/// Run every case of the plan in one session; the record lands in `run.dir()`.
pub fn execute_plan<L: Launcher>(launcher: &L, run: &AiRun, plan: &Plan) -> RunStatus {
    let report = RunReport::new(
        AI_RUN_NAME,
        Some(&run.url),
        &run.options.browser,
        run.options.headful,
        &run.dir(),
    );
    run_in_session(
        launcher,
        &run.options,
        &run.options.browser,
        None,
        report,
        |exec, report| exec.run_suite(&plan.suite, Some(&run.url), report, run.policy),
    )
}

/// Explore (if needed), plan, save the suite and execute it.
pub async fn run_ai<L>(
    launcher: Arc<L>,
    generator: Option<&dyn TextGenerator>,
    run: AiRun,
) -> anyhow::Result<RunStatus>
where
    L: Launcher + Send + Sync + 'static,
{
    let run = Arc::new(run);

    let graph_path = {
        let (launcher, run) = (Arc::clone(&launcher), Arc::clone(&run));
        tokio::task::spawn_blocking(move || ensure_graph(launcher.as_ref(), &run))
            .await
            .context("exploration task panicked")??
    };

    let plan = plan_suite(
        &graph_path,
        &run.options.variables,
        generator,
        &run.heuristics,
    )
    .await;
    plan.suite
        .save(&run.suite_path())
        .with_context(|| format!("writing {}", run.suite_path().display()))?;
    info!(
        source = %plan.source,
        cases = plan.suite.cases.len(),
        path = %run.suite_path().display(),
        "suite saved"
    );

    let status = tokio::task::spawn_blocking(move || execute_plan(launcher.as_ref(), &run, &plan))
        .await
        .context("execution task panicked")?;
    Ok(status)
}
