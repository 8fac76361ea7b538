use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde_json::{Value, json};

use rpa_autotest::config::{RunOptions, ScenarioOptions};
use rpa_autotest::crawler::CrawlLimits;
use rpa_autotest::engine::SuitePolicy;
use rpa_autotest::graph::SiteGraph;
use rpa_autotest::mock::{MockDocument, MockElement, MockLauncher, MockSite};
use rpa_autotest::pipeline::{AiRun, run_ai};
use rpa_autotest::planner::HeuristicConfig;
use rpa_autotest::report::{RESULT_FILE, RunStatus, TRACE_FILE};
use rpa_autotest::scenario::{Scenario, run_scenario};

fn shop() -> MockSite {
    MockSite::new().page(
        "https://shop.test/",
        MockDocument::new("Shop")
            .with(MockElement::new("input").attr("id", "user-name").attr("type", "text"))
            .with(MockElement::new("input").attr("id", "password").attr("type", "password"))
            .with(MockElement::new("button").attr("id", "login-button").text("Login"))
            .with(MockElement::new("span").text("Products")),
    )
}

fn result(dir: &Path) -> Value {
    serde_json::from_str(&fs::read_to_string(dir.join(RESULT_FILE)).unwrap()).unwrap()
}

fn quiet_env() -> BTreeMap<String, String> {
    BTreeMap::from([("TIMEOUT_MS".to_string(), "300".to_string())])
}

#[test]
fn test_multi_browser_run_records_each_browser_separately() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("smoke.yaml");
    fs::write(
        &path,
        "base_url: https://shop.test\noptions:\n  browsers: [chromium, firefox]\nsteps:\n  - type: goto\n    selector: /\n  - type: assert_visible\n    selector: \"#login-button\"\n",
    )
    .unwrap();
    let scenario = Scenario::load(&path).unwrap();
    let launcher = MockLauncher::new(shop()).failing("firefox");
    let reports = dir.path().join("reports");

    let status = run_scenario(&launcher, &scenario, &quiet_env(), &reports);

    assert_eq!(status, RunStatus::Failed);
    let chromium = result(&reports.join("chromium"));
    assert_eq!(chromium["status"], "passed");
    assert_eq!(chromium["browser"], "chromium");
    assert_eq!(chromium["steps"].as_array().unwrap().len(), 2);
    assert!(reports.join("chromium").join(TRACE_FILE).is_file());

    let firefox = result(&reports.join("firefox"));
    assert_eq!(firefox["status"], "failed");
    assert!(firefox["error"].as_str().unwrap().contains("firefox"));
    assert!(firefox["steps"].as_array().unwrap().is_empty());

    let launched: Vec<String> = launcher.launched().into_iter().map(|(b, _)| b).collect();
    assert_eq!(launched, vec!["chromium".to_string()]);
}

#[test]
fn test_failed_step_finalizes_with_failure_screenshot() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.json");
    fs::write(
        &path,
        json!({
            "name": "broken",
            "url": "https://shop.test",
            "options": {"tracing": false},
            "steps": [
                {"type": "goto", "selector": "/"},
                {"type": "assert_text", "selector": "span", "value": "Cart"}
            ]
        })
        .to_string(),
    )
    .unwrap();
    let scenario = Scenario::load(&path).unwrap();
    let launcher = MockLauncher::new(shop());
    let reports = dir.path().join("out");

    assert_eq!(run_scenario(&launcher, &scenario, &quiet_env(), &reports), RunStatus::Failed);

    let record = result(&reports);
    assert_eq!(record["name"], "broken");
    assert_eq!(record["status"], "failed");
    assert_eq!(record["steps"][1]["status"], "failed");
    let shots: Vec<&str> = record["artifacts"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|a| a["type"] == "screenshot")
        .filter_map(|a| a["path"].as_str())
        .collect();
    assert_eq!(shots.len(), 1);
    assert!(Path::new(shots[0]).is_file());
    assert!(!reports.join(TRACE_FILE).exists());
}

fn ai_run(root: &Path) -> AiRun {
    let env = quiet_env();
    let vars = BTreeMap::from([
        ("USERNAME".to_string(), json!("standard_user")),
        ("PASSWORD".to_string(), json!("secret_sauce")),
    ]);
    AiRun {
        url: "https://shop.test/".into(),
        options: RunOptions::load(&ScenarioOptions::default(), &vars, &env),
        limits: CrawlLimits::default(),
        reexplore: false,
        policy: SuitePolicy::StopOnFailure,
        heuristics: HeuristicConfig::default(),
        reports_root: root.to_path_buf(),
    }
}

#[tokio::test]
async fn test_ai_run_explores_plans_and_executes() {
    let dir = tempfile::tempdir().unwrap();
    let run = ai_run(dir.path());
    let (graph, suite, out) = (run.graph_path(), run.suite_path(), run.dir());
    let launcher = Arc::new(MockLauncher::new(shop()));

    let status = run_ai(Arc::clone(&launcher), None, run).await.unwrap();

    assert_eq!(status, RunStatus::Passed);
    assert_eq!(SiteGraph::load(&graph).unwrap().nodes.len(), 1);
    let planned: Value = serde_json::from_str(&fs::read_to_string(&suite).unwrap()).unwrap();
    assert_eq!(planned[0]["id"], "AI-AUTO-LOGIN");
    let record = result(&out);
    assert_eq!(record["name"], "AI Suite");
    assert_eq!(record["status"], "passed");
    assert_eq!(record["steps"][0]["case"], "AI-AUTO-LOGIN");
    // one session to explore, one to execute
    assert_eq!(launcher.launched().len(), 2);
}

#[tokio::test]
async fn test_ai_run_reuses_graph_unless_asked_to_explore() {
    let dir = tempfile::tempdir().unwrap();
    let run = ai_run(dir.path());
    SiteGraph::new("https://shop.test").save(&run.graph_path()).unwrap();
    let launcher = Arc::new(MockLauncher::new(shop()));

    let status = run_ai(Arc::clone(&launcher), None, run).await.unwrap();

    // page-less graph: default smoke suite, executed in a single session
    assert_eq!(status, RunStatus::Passed);
    assert_eq!(launcher.launched().len(), 1);
}

#[tokio::test]
async fn test_ai_run_without_a_browser_still_writes_a_result() {
    let dir = tempfile::tempdir().unwrap();
    let run = ai_run(dir.path());
    let (graph, out) = (run.graph_path(), run.dir());
    let launcher = Arc::new(MockLauncher::new(shop()).failing("chromium"));

    let status = run_ai(launcher, None, run).await.unwrap();

    assert_eq!(status, RunStatus::Failed);
    assert!(SiteGraph::load(&graph).unwrap().nodes.is_empty());
    let record = result(&out);
    assert_eq!(record["status"], "failed");
    assert!(record["error"].as_str().unwrap().contains("chromium"));
}
