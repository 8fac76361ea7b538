use std::collections::BTreeMap;
use std::time::Duration;

use proptest::prelude::*;
use serde_json::json;

use rpa_autotest::crawler::{CrawlLimits, explore_and_save};
use rpa_autotest::engine::{Executor, SuitePolicy};
use rpa_autotest::mock::{MockDocument, MockElement, MockPage, MockSite};
use rpa_autotest::observation::{ElementDescriptor, ElementRole, Observation};
use rpa_autotest::planner::heuristic::{
    DESTRUCTIVE_WORDS, HeuristicConfig, clickable_candidates, find_login_triplet, pick_selector,
};
use rpa_autotest::planner::{PlanSource, build_suite_from_graph, plan_suite};
use rpa_autotest::report::RunReport;
use rpa_autotest::suite::{TestSuite, normalize_suite};

fn login_site() -> MockSite {
    MockSite::new().page(
        "https://shop.test/",
        MockDocument::new("Swag Labs")
            .with(MockElement::new("input").attr("id", "user-name").attr("type", "text"))
            .with(MockElement::new("input").attr("id", "password").attr("type", "password"))
            .with(
                MockElement::new("input")
                    .attr("id", "login-button")
                    .attr("type", "submit")
                    .attr("value", "Login"),
            )
            .with(MockElement::new("span").text("Products")),
    )
}

fn variables() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("USERNAME".to_string(), "standard_user".to_string()),
        ("PASSWORD".to_string(), "secret_sauce".to_string()),
    ])
}

#[tokio::test]
async fn test_login_page_plans_and_runs_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let page = MockPage::new(login_site());
    let graph_path =
        explore_and_save(&page, "https://shop.test/", dir.path(), &CrawlLimits::default()).unwrap();

    let plan = plan_suite(&graph_path, &variables(), None, &HeuristicConfig::default()).await;
    assert_eq!(plan.source, PlanSource::Heuristic);

    let login = &plan.suite.cases[0];
    assert_eq!(login.id.as_deref(), Some("AI-AUTO-LOGIN"));
    assert_eq!(login.steps.len(), 8);
    assert_eq!(login.steps[5].step_type.as_deref(), Some("click"));
    assert_eq!(login.steps[5].selector.as_deref(), Some("#login-button"));
    assert_eq!(login.steps[3].value, Some(json!("${USERNAME}")));

    let mut report = RunReport::new("AI Suite", Some("https://shop.test"), "chromium", false, dir.path());
    Executor::new(&page, Duration::from_millis(500))
        .with_variables(variables())
        .run_suite(&plan.suite, Some("https://shop.test"), &mut report, SuitePolicy::StopOnFailure)
        .unwrap();

    let log = page.log();
    assert!(log.contains(&"fill:#user-name=standard_user".to_string()));
    assert!(log.contains(&"fill:#password=secret_sauce".to_string()));
    assert!(log.contains(&"click:#login-button".to_string()));
    assert!(report.steps.iter().all(|s| s.case.is_some()));
}

#[tokio::test]
async fn test_missing_graph_falls_back_to_default_suite() {
    let dir = tempfile::tempdir().unwrap();
    let plan = plan_suite(
        &dir.path().join("nope.json"),
        &BTreeMap::new(),
        None,
        &HeuristicConfig::default(),
    )
    .await;
    assert_eq!(plan.source, PlanSource::Default);
    assert_eq!(plan.suite.cases.len(), 1);
    assert_eq!(plan.suite.cases[0].steps[0].selector.as_deref(), Some("/"));
}

#[test]
fn test_graph_without_login_gets_smoke_then_browse() {
    let dir = tempfile::tempdir().unwrap();
    let site = MockSite::new().page(
        "https://app.test/",
        MockDocument::new("Home")
            .with(MockElement::new("button").attr("id", "logout").text("Log out"))
            .with(MockElement::new("button").attr("id", "start").text("Get started")),
    );
    let page = MockPage::new(site);
    let path = explore_and_save(&page, "https://app.test/", dir.path(), &CrawlLimits::default()).unwrap();
    let graph = rpa_autotest::graph::SiteGraph::load(&path).unwrap();

    let suite = build_suite_from_graph(&graph, &HeuristicConfig::default()).unwrap();
    let ids: Vec<_> = suite.cases.iter().filter_map(|c| c.id.as_deref()).collect();
    assert_eq!(ids, vec!["AI-AUTO-SMOKE", "AI-AUTO-BROWSE-1"]);
    assert_eq!(suite.cases[0].steps[2].selector.as_deref(), Some("#start"));
    assert!(
        suite.cases[1]
            .steps
            .iter()
            .all(|s| s.selector.as_deref() != Some("#logout"))
    );
}

fn button(id: Option<String>, text: String) -> ElementDescriptor {
    ElementDescriptor {
        role: ElementRole::Button,
        id,
        text: Some(text),
        ..Default::default()
    }
}

fn input(id: &str, ty: &str) -> ElementDescriptor {
    ElementDescriptor {
        role: ElementRole::Input,
        id: Some(id.to_string()),
        input_type: Some(ty.to_string()),
        ..Default::default()
    }
}

fn arb_step() -> impl Strategy<Value = serde_json::Value> {
    prop_oneof![
        "[a-z#./]{1,12}".prop_map(|s| json!({"url": s})),
        ("[a-z#]{1,8}", "[a-z]{0,8}").prop_map(|(s, v)| json!({"selector": s, "value": v})),
        "[a-z#]{1,8}".prop_map(|s| json!({"action": "CLICK", "selector": s})),
        "[a-z#]{1,8}".prop_map(|s| json!({"type": "wait_for_selector", "selector": s})),
        "[a-z/]{1,8}".prop_map(|v| json!({"type": "assert_url", "value": v})),
        Just(json!({"selector": "#orphan"})),
        Just(json!({"include": "shared.yaml"})),
    ]
}

fn arb_suite() -> impl Strategy<Value = TestSuite> {
    prop::collection::vec(
        ("[A-Za-z ]{0,10}", prop::collection::vec(arb_step(), 0..6)),
        0..4,
    )
    .prop_map(|cases| {
        let raw: Vec<_> = cases
            .into_iter()
            .map(|(name, steps)| json!({"name": name, "steps": steps}))
            .collect();
        serde_json::from_value(json!(raw)).unwrap()
    })
}

proptest! {
    #[test]
    fn prop_destructive_labels_are_never_candidates(
        word in prop::sample::select(DESTRUCTIVE_WORDS.to_vec()),
        prefix in "[a-z ]{0,6}",
        suffix in "[a-z ]{0,6}",
    ) {
        let obs = Observation {
            buttons: vec![button(Some("b1".into()), format!("{prefix}{word}{suffix}"))],
            ..Default::default()
        };
        prop_assert!(clickable_candidates(&obs).is_empty());
    }

    #[test]
    fn prop_normalization_is_idempotent(suite in arb_suite()) {
        let once = normalize_suite(suite);
        prop_assert_eq!(normalize_suite(once.clone()), once);
    }

    #[test]
    fn prop_plain_ids_win_over_text(id in "[a-z][a-z0-9_-]{0,10}", text in "[A-Za-z ]{1,12}") {
        let d = button(Some(id.clone()), text);
        prop_assert_eq!(pick_selector(&d), Some(format!("#{id}")));
    }

    #[test]
    fn prop_login_triplet_from_one_password_field(
        user in "u[a-z]{0,6}",
        pass in "p[a-z]{0,6}",
        submit in "s[a-z]{0,6}",
    ) {
        let obs = Observation {
            inputs: vec![input(&user, "text"), input(&pass, "password")],
            buttons: vec![button(Some(submit.clone()), "Sign in".into())],
            ..Default::default()
        };
        let tri = find_login_triplet(&obs).unwrap();
        prop_assert_eq!(tri.user, format!("#{user}"));
        prop_assert_eq!(tri.pass, format!("#{pass}"));
        prop_assert_eq!(tri.submit, format!("#{submit}"));
    }
}
