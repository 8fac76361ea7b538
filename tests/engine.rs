use std::collections::BTreeMap;
use std::fs;
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::{Value, json};

use rpa_autotest::config::{RunOptions, ScenarioOptions};
use rpa_autotest::engine::{Executor, SuitePolicy};
use rpa_autotest::error::{RunError, StepError};
use rpa_autotest::mock::{MockDocument, MockElement, MockPage, MockSite};
use rpa_autotest::report::{RunReport, StepStatus};
use rpa_autotest::suite::{StepSpec, TestSuite};

const TIMEOUT: Duration = Duration::from_millis(200);

fn steps(raw: Value) -> Vec<StepSpec> {
    serde_json::from_value(raw).unwrap()
}

fn site() -> MockSite {
    MockSite::new()
        .page(
            "https://app.test/",
            MockDocument::new("App")
                .with(MockElement::new("input").attr("id", "q"))
                .with(MockElement::new("button").attr("id", "go").text("Go")),
        )
        .page(
            "https://auth.test/login",
            MockDocument::new("Sign in")
                .with(MockElement::new("input").attr("name", "user"))
                .with(MockElement::new("button").attr("id", "signin").text("Sign in")),
        )
}

fn report(dir: &std::path::Path) -> RunReport {
    RunReport::new("engine", Some("https://app.test"), "chromium", false, dir)
}

#[test]
fn test_include_runs_in_place_with_its_own_base_url() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("login.yaml"),
        "base_url: https://auth.test\nsteps:\n  - type: goto\n    selector: /login\n  - type: fill\n    selector: \"[name=user]\"\n    value: ${USER}\n  - type: click\n    selector: \"#signin\"\n",
    )
    .unwrap();

    let page = MockPage::new(site());
    let mut report = report(dir.path());
    Executor::new(&page, TIMEOUT)
        .with_variables(BTreeMap::from([("USER".to_string(), "ada".to_string())]))
        .with_include_root(dir.path())
        .run_steps(
            &steps(json!([
                {"include": "login.yaml"},
                {"type": "goto", "selector": "/"},
                {"type": "assert_url_contains", "value": "app.test"}
            ])),
            Some("https://app.test"),
            &mut report,
        )
        .unwrap();

    assert_eq!(
        page.visits(),
        vec!["https://auth.test/login".to_string(), "https://app.test/".to_string()]
    );
    assert!(page.log().contains(&"fill:[name=user]=ada".to_string()));
    let kinds: Vec<_> = report.steps.iter().map(|s| s.step_type.as_str()).collect();
    assert_eq!(kinds, vec!["goto", "fill", "click", "goto", "assert_url_contains"]);
}

#[test]
fn test_nested_include_resolves_against_including_file() {
    let dir = tempfile::tempdir().unwrap();
    let shared = dir.path().join("shared");
    fs::create_dir_all(&shared).unwrap();
    fs::write(
        shared.join("outer.json"),
        r##"{"steps": [{"include": "inner.json"}, {"type": "click", "selector": "#go"}]}"##,
    )
    .unwrap();
    fs::write(
        shared.join("inner.json"),
        r##"{"steps": [{"type": "fill", "selector": "#q", "value": "shoes"}]}"##,
    )
    .unwrap();

    let page = MockPage::new(site());
    let mut report = report(dir.path());
    Executor::new(&page, TIMEOUT)
        .with_include_root(dir.path())
        .run_steps(
            &steps(json!([
                {"type": "goto", "selector": "/"},
                {"include": ["shared/outer.json"]}
            ])),
            Some("https://app.test"),
            &mut report,
        )
        .unwrap();

    assert_eq!(page.value_of("#q").as_deref(), Some("shoes"));
    assert_eq!(page.log().last().unwrap(), "click:#go");
}

#[test]
fn test_steps_inside_includes_report_dotted_positions() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("search.yaml"),
        "steps:\n  - type: fill\n    selector: \"#q\"\n    value: shoes\n  - type: click\n    selector: \"#missing\"\n",
    )
    .unwrap();

    let page = MockPage::new(site());
    let mut report = report(dir.path());
    let err = Executor::new(&page, TIMEOUT)
        .with_include_root(dir.path())
        .run_steps(
            &steps(json!([
                {"type": "goto", "selector": "/"},
                {"type": "click", "selector": "#go"},
                {"include": "search.yaml"}
            ])),
            Some("https://app.test"),
            &mut report,
        )
        .unwrap_err();

    assert!(matches!(&err, RunError::StepFailed { at, .. } if at == "3.2"), "{err}");
    assert!(err.to_string().starts_with("step 3.2 (click)"), "{err}");
    let positions: Vec<_> = report.steps.iter().map(|s| s.at.as_str()).collect();
    assert_eq!(positions, vec!["1", "2", "3.1", "3.2"]);
    let indices: Vec<_> = report.steps.iter().map(|s| s.index).collect();
    assert_eq!(indices, vec![1, 2, 3, 4]);
}

#[test]
fn test_self_include_hits_depth_cap() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("loop.yaml"), "steps:\n  - include: loop.yaml\n").unwrap();

    let page = MockPage::new(site());
    let mut report = report(dir.path());
    let err = Executor::new(&page, TIMEOUT)
        .with_include_root(dir.path())
        .run_steps(&steps(json!([{"include": "loop.yaml"}])), None, &mut report)
        .unwrap_err();
    assert!(
        matches!(&err, RunError::StepFailed { source: StepError::Include(_), .. }),
        "{err}"
    );
}

#[test]
fn test_invalid_include_stops_before_any_of_its_steps() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("bad.yaml"),
        "steps:\n  - type: goto\n    selector: /\n  - type: fill\n    selector: \"#q\"\n",
    )
    .unwrap();

    let page = MockPage::new(site());
    let mut report = report(dir.path());
    let err = Executor::new(&page, TIMEOUT)
        .with_include_root(dir.path())
        .run_steps(&steps(json!([{"include": "bad.yaml"}])), Some("https://app.test"), &mut report)
        .unwrap_err();
    assert!(matches!(err, RunError::Validation(_)));
    assert!(page.visits().is_empty());
}

fn two_case_suite() -> TestSuite {
    serde_json::from_value(json!([
        {"id": "BROKEN", "name": "broken", "steps": [
            {"type": "goto", "selector": "/"},
            {"type": "click", "selector": "#missing"}
        ]},
        {"id": "EMPTY", "name": "nothing", "steps": []},
        {"id": "FINE", "name": "fine", "steps": [
            {"type": "goto", "selector": "/"},
            {"type": "click", "selector": "#go"}
        ]}
    ]))
    .unwrap()
}

#[test]
fn test_suite_stops_on_first_failure_by_default() {
    let dir = tempfile::tempdir().unwrap();
    let page = MockPage::new(site());
    let mut report = report(dir.path());
    let err = Executor::new(&page, TIMEOUT)
        .run_suite(&two_case_suite(), Some("https://app.test"), &mut report, SuitePolicy::default())
        .unwrap_err();

    assert!(matches!(&err, RunError::StepFailed { at, .. } if at == "2"));
    assert_eq!(report.steps.len(), 2);
    assert_eq!(report.steps[1].case.as_deref(), Some("BROKEN"));
    assert!(!page.log().contains(&"click:#go".to_string()));
}

#[test]
fn test_run_all_cases_keeps_going_and_reports_first_failure() {
    let dir = tempfile::tempdir().unwrap();
    let page = MockPage::new(site());
    let mut report = report(dir.path());
    let err = Executor::new(&page, TIMEOUT)
        .run_suite(
            &two_case_suite(),
            Some("https://app.test"),
            &mut report,
            SuitePolicy::RunAllCases,
        )
        .unwrap_err();

    assert!(matches!(&err, RunError::StepFailed { at, .. } if at == "2"));
    assert_eq!(report.steps.len(), 4);
    assert_eq!(report.step_count(StepStatus::Passed), 3);
    assert_eq!(report.steps[3].case.as_deref(), Some("FINE"));
    assert!(page.log().contains(&"click:#go".to_string()));
}

#[test]
fn test_suite_case_is_validated_before_running() {
    let dir = tempfile::tempdir().unwrap();
    let suite: TestSuite = serde_json::from_value(json!([
        {"name": "typo", "steps": [
            {"type": "goto", "selector": "/"},
            {"type": "hover", "selector": "#go"}
        ]}
    ]))
    .unwrap();
    let page = MockPage::new(site());
    let mut report = report(dir.path());
    let err = Executor::new(&page, TIMEOUT)
        .run_suite(&suite, Some("https://app.test"), &mut report, SuitePolicy::RunAllCases)
        .unwrap_err();
    assert!(matches!(err, RunError::Validation(_)));
    assert!(report.steps.is_empty());
}

#[test]
fn test_intent_click_looks_inside_open_modal_first() {
    let dir = tempfile::tempdir().unwrap();
    let site = MockSite::new().page(
        "https://app.test/",
        MockDocument::new("App")
            .with(MockElement::new("button").attr("id", "header-login").text("Log in"))
            .with(MockElement::new("div").attr("role", "dialog"))
            .with(
                MockElement::new("button")
                    .attr("id", "modal-login")
                    .text("Log in")
                    .inside(1),
            ),
    );
    let page = MockPage::new(site);
    let mut report = report(dir.path());
    Executor::new(&page, TIMEOUT)
        .run_steps(
            &steps(json!([
                {"type": "goto", "selector": "/"},
                {"type": "click", "value": "log in"}
            ])),
            Some("https://app.test"),
            &mut report,
        )
        .unwrap();
    assert_eq!(page.log().last().unwrap(), "click:#modal-login");
}

#[test]
fn test_click_through_nested_modal_markup() {
    let dir = tempfile::tempdir().unwrap();
    let site = MockSite::new().page(
        "https://app.test/",
        MockDocument::from_html(
            r#"<body>
              <button id="cta" class="btn-primary">Log in</button>
              <div class="modal show" id="logInModal" role="dialog">
                <div class="modal-body"><input id="loginusername"></div>
                <div class="modal-footer">
                  <button class="btn btn-secondary">Close</button>
                  <button class="btn btn-primary" onclick="logIn()">Log in</button>
                </div>
              </div>
            </body>"#,
        ),
    );
    let page = MockPage::new(site);
    let mut report = report(dir.path());
    Executor::new(&page, TIMEOUT)
        .run_steps(
            &steps(json!([
                {"type": "goto", "selector": "/"},
                {"type": "fill", "selector": "#logInModal .modal-body > input", "value": "ada"},
                {"type": "click", "selector": "#logInModal .modal-footer .btn-primary"},
                {"type": "assert_visible", "selector": "div.modal-footer > button:not(.btn-primary)"}
            ])),
            Some("https://app.test"),
            &mut report,
        )
        .unwrap();

    assert_eq!(
        page.log()[1..],
        ["fill:#loginusername=ada".to_string(), "click:Log in".to_string()]
    );
}

#[test]
fn test_scenario_variables_flow_from_options_into_steps() {
    let dir = tempfile::tempdir().unwrap();
    let options: ScenarioOptions = serde_json::from_value(json!({
        "timeout_ms": 200,
        "variables": {"TERM": "boots"}
    }))
    .unwrap();
    let env: BTreeMap<String, String> = BTreeMap::new();
    let run = RunOptions::load(&options, &BTreeMap::from([("N".to_string(), json!(3))]), &env);

    let page = MockPage::new(site());
    let mut report = report(dir.path());
    Executor::from_options(&page, &run)
        .run_steps(
            &steps(json!([
                {"type": "goto", "selector": "/"},
                {"type": "fill", "selector": "#q", "value": "${TERM} x${N} ${RAND}"}
            ])),
            Some("https://app.test"),
            &mut report,
        )
        .unwrap();

    let expected = format!("boots x3 {}", run.variables["RAND"]);
    assert_eq!(page.value_of("#q"), Some(expected.clone()));
    assert_eq!(report.steps[1].value, Some(expected));
}

#[test]
fn test_failed_assertion_is_recorded_with_expected_and_actual() {
    let dir = tempfile::tempdir().unwrap();
    let page = MockPage::new(site());
    let mut report = report(dir.path());
    let err = Executor::new(&page, TIMEOUT)
        .run_steps(
            &steps(json!([
                {"type": "goto", "selector": "/"},
                {"type": "assert_url_contains", "value": "/checkout"}
            ])),
            Some("https://app.test"),
            &mut report,
        )
        .unwrap_err();
    assert!(err.to_string().contains("/checkout"), "{err}");
    let rec = &report.steps[1];
    assert_eq!(rec.status, StepStatus::Failed);
    assert!(rec.error.as_deref().unwrap().contains("https://app.test/"));
}
