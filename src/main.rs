use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use dotenvy::dotenv;
use serde_json::Value;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use rpa_autotest::chrome::ChromeLauncher;
use rpa_autotest::config::{
    self, EnvSource, ProcessEnv, ProxySpec, RunOptions, ScenarioOptions, ViewportSpec,
};
use rpa_autotest::crawler::CrawlLimits;
use rpa_autotest::engine::SuitePolicy;
use rpa_autotest::llm::{TextGenerator, build_generator};
use rpa_autotest::pipeline::{self, AI_DIR, AiRun};
use rpa_autotest::planner::plan_suite;
use rpa_autotest::report::RunStatus;
use rpa_autotest::scenario::{Scenario, run_scenario};

#[derive(Parser)]
#[command(name = "rpa-autotest")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Root directory for results, screenshots, graphs and suites
    #[arg(long, global = true, env = "RPA_REPORTS_DIR")]
    reports_dir: Option<PathBuf>,

    /// Debug logging (RUST_LOG wins when set)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a YAML or JSON scenario file
    Run {
        scenario: PathBuf,
    },

    /// Crawl a site and save its graph
    Explore {
        #[arg(long)]
        url: String,
        #[command(flatten)]
        crawl: CrawlArgs,
        #[command(flatten)]
        browser: BrowserArgs,
    },

    /// Plan a test suite from a saved site graph
    Plan {
        /// Defaults to <reports-dir>/ai/site_graph.json
        #[arg(long)]
        graph: Option<PathBuf>,
        /// Defaults to <reports-dir>/ai/test_suite.json
        #[arg(long)]
        out: Option<PathBuf>,
        /// Ask the model planner first
        #[arg(long)]
        llm: bool,
        #[arg(long)]
        model: Option<String>,
        #[arg(long = "var", value_parser = parse_var)]
        vars: Vec<(String, String)>,
    },

    /// Explore, plan and run in one go
    Ai {
        #[arg(long)]
        url: String,
        /// Crawl again even when a graph already exists
        #[arg(long)]
        explore: bool,
        /// Keep running the remaining cases after one fails
        #[arg(long)]
        keep_going: bool,
        #[arg(long = "var", value_parser = parse_var)]
        vars: Vec<(String, String)>,
        #[command(flatten)]
        llm: LlmArgs,
        #[command(flatten)]
        crawl: CrawlArgs,
        #[command(flatten)]
        browser: BrowserArgs,
    },
}

#[derive(Args, Clone)]
struct LlmArgs {
    /// Plan with heuristics only
    #[arg(long)]
    no_llm: bool,
    /// Model name for the planner endpoint
    #[arg(long)]
    model: Option<String>,
}

#[derive(Args, Clone)]
struct CrawlArgs {
    #[arg(long, default_value_t = 10)]
    max_pages: usize,
    #[arg(long, default_value_t = 2)]
    max_depth: usize,
}

impl CrawlArgs {
    fn limits(&self) -> CrawlLimits {
        CrawlLimits {
            max_pages: self.max_pages,
            max_depth: self.max_depth,
            ..Default::default()
        }
    }
}

#[derive(Args, Clone, Default)]
struct BrowserArgs {
    #[arg(long)]
    browser: Option<String>,
    #[arg(long)]
    headful: bool,
    #[arg(long)]
    video: bool,
    #[arg(long)]
    timeout_ms: Option<u64>,
    /// WxH, e.g. 1366x900
    #[arg(long)]
    viewport: Option<String>,
    #[arg(long)]
    slow_mo: Option<u64>,
    #[arg(long)]
    proxy: Option<String>,
    #[arg(long)]
    user_agent: Option<String>,
}

impl BrowserArgs {
    /// Flags given on the command line; anything absent falls back to the environment.
    fn scenario_options(&self) -> ScenarioOptions {
        ScenarioOptions {
            headful: self.headful.then_some(true),
            browser: self.browser.clone(),
            timeout_ms: self.timeout_ms,
            slow_mo: self.slow_mo,
            video: self.video.then_some(true),
            viewport: self.viewport.clone().map(ViewportSpec::Text),
            user_agent: self.user_agent.clone(),
            proxy: self.proxy.clone().map(ProxySpec::Server),
            ..Default::default()
        }
    }

    fn run_options(&self, vars: &[(String, String)]) -> RunOptions {
        let vars: BTreeMap<String, Value> = vars
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        RunOptions::load(&self.scenario_options(), &vars, &ProcessEnv)
    }
}

fn parse_var(raw: &str) -> Result<(String, String), String> {
    let (k, v) = raw
        .split_once('=')
        .ok_or_else(|| format!("--var expects KEY=VALUE, got '{raw}'"))?;
    let k = k.trim();
    if k.is_empty() {
        return Err(format!("--var expects KEY=VALUE, got '{raw}'"));
    }
    Ok((k.to_string(), v.to_string()))
}

fn init_logging(verbose: bool) {
    let default = if verbose { "rpa_autotest=debug" } else { "rpa_autotest=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    if ProcessEnv.var("RPA_LOG_JSON").as_deref() == Some("1") {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
    }
}

/// The configured planner endpoint, unless disabled or misconfigured.
fn generator(enabled: bool, model: Option<&str>) -> Option<Box<dyn TextGenerator>> {
    if !enabled {
        info!("model planner disabled");
        return None;
    }
    let settings = config::LlmSettings::from_env(&ProcessEnv, model);
    match build_generator(&settings) {
        Ok(g) => Some(g),
        Err(e) => {
            warn!(error = %e, "model planner unavailable, using heuristics");
            None
        }
    }
}

fn exit_code(status: RunStatus) -> ExitCode {
    match status {
        RunStatus::Passed => ExitCode::SUCCESS,
        _ => ExitCode::FAILURE,
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let reports_root = cli
        .reports_dir
        .clone()
        .unwrap_or_else(|| config::reports_dir(&ProcessEnv));

    match cli.command {
        Commands::Run { scenario } => {
            let scenario = Scenario::load(&scenario)
                .with_context(|| format!("loading scenario {}", scenario.display()))?;
            info!(name = %scenario.name(), steps = scenario.steps.len(), "scenario loaded");
            let status = tokio::task::spawn_blocking(move || {
                run_scenario(&ChromeLauncher::new(), &scenario, &ProcessEnv, &reports_root)
            })
            .await
            .context("scenario task panicked")?;
            Ok(exit_code(status))
        }

        Commands::Explore { url, crawl, browser } => {
            let options = browser.run_options(&[]);
            let out_dir = reports_root.join(AI_DIR);
            let path = tokio::task::spawn_blocking(move || {
                pipeline::explore(&ChromeLauncher::new(), &options, &url, &crawl.limits(), &out_dir)
            })
            .await
            .context("exploration task panicked")??;
            println!("{}", path.display());
            Ok(ExitCode::SUCCESS)
        }

        Commands::Plan {
            graph,
            out,
            llm,
            model,
            vars,
        } => {
            let graph = graph.unwrap_or_else(|| reports_root.join(AI_DIR).join("site_graph.json"));
            let out = out.unwrap_or_else(|| reports_root.join(AI_DIR).join(pipeline::SUITE_FILE));
            let mut variables: config::Variables = vars.into_iter().collect();
            config::inject_defaults(&mut variables);

            let generator = generator(llm, model.as_deref());
            let plan = plan_suite(
                &graph,
                &variables,
                generator.as_deref(),
                &config::heuristic_config(&ProcessEnv),
            )
            .await;
            plan.suite
                .save(&out)
                .with_context(|| format!("writing {}", out.display()))?;
            info!(source = %plan.source, cases = plan.suite.cases.len(), "suite written");
            println!("{}", out.display());
            Ok(ExitCode::SUCCESS)
        }

        Commands::Ai {
            url,
            explore,
            keep_going,
            vars,
            llm,
            crawl,
            browser,
        } => {
            let options = browser.run_options(&vars);
            let limits = crawl.limits();
            let run = AiRun {
                url,
                options,
                limits,
                reexplore: explore,
                policy: if keep_going {
                    SuitePolicy::RunAllCases
                } else {
                    SuitePolicy::StopOnFailure
                },
                heuristics: config::heuristic_config(&ProcessEnv),
                reports_root,
            };
            let generator = generator(!llm.no_llm, llm.model.as_deref());
            let status =
                pipeline::run_ai(Arc::new(ChromeLauncher::new()), generator.as_deref(), run).await?;
            Ok(exit_code(status))
        }
    }
}
