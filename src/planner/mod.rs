//! Turning a site graph into an executable suite.
//!
//! Planners are tried model first, then heuristics, then a static default;
//! whatever wins is normalized before it is handed back.

pub mod heuristic;
pub mod model;

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use tracing::{info, warn};

use crate::graph::SiteGraph;
use crate::llm::TextGenerator;
use crate::observation::Observation;
use crate::suite::{StepSpec, TestCase, TestSuite, normalize_suite};

pub use heuristic::{HeuristicConfig, build_suite_from_graph};
pub use model::{coerce_suite, plan_with_model};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanSource {
    Model,
    Heuristic,
    Default,
}

impl fmt::Display for PlanSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PlanSource::Model => "model",
            PlanSource::Heuristic => "heuristic",
            PlanSource::Default => "default",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub suite: TestSuite,
    pub source: PlanSource,
}

fn mentions(obs: &Observation, words: &[&str]) -> bool {
    obs.visible_texts
        .iter()
        .chain(obs.buttons.iter().filter_map(|b| b.text.as_ref()))
        .any(|t| {
            let t = t.to_lowercase();
            words.iter().any(|w| t.contains(w))
        })
}

/// Smoke case plus an intent-driven login or signup case when the home page
/// hints at one. Needs nothing but the home observation, if that.
pub fn default_suite(home: Option<&Observation>) -> TestSuite {
    let mut cases = vec![TestCase {
        id: Some("AI-DEFAULT-SMOKE".into()),
        name: "Open home page".into(),
        steps: vec![
            StepSpec::new("goto").selector("/"),
            StepSpec::new("screenshot").value("home.png"),
        ],
    }];
    let Some(obs) = home else {
        return TestSuite::new(cases);
    };

    let user = "input[type=email], input[type=text], [name*=user i], [name*=email i]";
    let pass = "input[type=password]";
    if obs.flags.has_password || mentions(obs, heuristic::LOGIN_WORDS) {
        let mut steps = vec![StepSpec::new("goto").selector("/")];
        if !obs.flags.has_password {
            steps.push(StepSpec::new("click").value("log in").continue_on_fail());
        }
        steps.extend([
            StepSpec::new("wait_for_selector").selector(pass).value("visible"),
            StepSpec::new("fill").selector(user).value("${USERNAME}"),
            StepSpec::new("fill").selector(pass).value("${PASSWORD}"),
            StepSpec::new("click").value("log in"),
            StepSpec::new("screenshot").value("after_login.png"),
        ]);
        cases.push(TestCase {
            id: Some("AI-DEFAULT-LOGIN".into()),
            name: "Log in".into(),
            steps,
        });
    } else if mentions(obs, heuristic::SIGNUP_WORDS) {
        cases.push(TestCase {
            id: Some("AI-DEFAULT-SIGNUP".into()),
            name: "Sign up".into(),
            steps: vec![
                StepSpec::new("goto").selector("/"),
                StepSpec::new("click").value("sign up"),
                StepSpec::new("wait_for_selector").selector(pass).value("visible"),
                StepSpec::new("fill").selector(user).value("${NEW_USERNAME}"),
                StepSpec::new("fill").selector(pass).value("${NEW_PASSWORD}"),
                StepSpec::new("click").value("sign up").continue_on_fail(),
                StepSpec::new("screenshot").value("after_signup.png"),
            ],
        });
    }
    TestSuite::new(cases)
}

/// Model (when a generator is given), else heuristics over the saved graph,
/// else the default suite. Never fails.
pub async fn plan_suite(
    graph_path: &Path,
    variables: &BTreeMap<String, String>,
    generator: Option<&dyn TextGenerator>,
    config: &HeuristicConfig,
) -> Plan {
    if let Some(generator) = generator {
        if let Some(suite) = plan_with_model(generator, graph_path, variables).await {
            return finish(suite, PlanSource::Model);
        }
        warn!("model planner produced no suite, falling back to heuristics");
    }

    let graph = match SiteGraph::load(graph_path) {
        Ok(graph) => Some(graph),
        Err(e) => {
            warn!(path = %graph_path.display(), error = %e, "graph not loadable for heuristics");
            None
        }
    };
    if let Some(suite) = graph.as_ref().and_then(|g| build_suite_from_graph(g, config)) {
        return finish(suite, PlanSource::Heuristic);
    }

    let home = graph
        .as_ref()
        .and_then(|g| g.nodes.values().next())
        .map(|n| &n.snapshot);
    finish(default_suite(home), PlanSource::Default)
}

fn finish(suite: TestSuite, source: PlanSource) -> Plan {
    let suite = normalize_suite(suite);
    info!(%source, cases = suite.cases.len(), "suite planned");
    Plan { suite, source }
}
