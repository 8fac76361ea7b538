//! Rule-based suite synthesis.
//!
//! Every choice here (which selector, which button, which strategy) is a
//! ranked list of rules evaluated top to bottom; the first hit wins.

use std::collections::HashSet;

use crate::graph::SiteGraph;
use crate::observation::{ElementDescriptor, Observation, SELECTOR_RULES};
use crate::suite::{StepSpec, TestCase, TestSuite};

pub const LOGIN_WORDS: &[&str] = &[
    "login", "log in", "signin", "sign in", "כניסה", "התחבר", "התחברות", "היכנס",
];

pub const SIGNUP_WORDS: &[&str] = &[
    "signup", "sign up", "register", "create account", "הרשמה", "הירשם", "צור חשבון",
];

/// Never clicked by generated exploration steps.
pub const DESTRUCTIVE_WORDS: &[&str] = &[
    "logout", "log out", "sign out", "delete", "remove", "unsubscribe", "cancel",
    "close account", "pay", "purchase", "buy", "checkout", "erase", "refund",
    "התנתק", "יציאה", "מחק", "הסר", "בטל", "ביטול", "תשלום", "רכישה", "קנה", "החזר",
];

pub const CTA_WORDS: &[&str] = &[
    "start", "get started", "shop", "products", "continue", "צפה", "התחל", "המשך",
];

const USERNAME_HINTS: &[&str] = &["user", "username", "email", "login", "mail", "שם משתמש", "מייל"];

const GENERIC_USER_FIELD: &str =
    "input[type=text], input[type=email], [name*=user i], [name*=email i]";
const GENERIC_PASS_FIELD: &str = "input[type=password], [name*=pass i]";
const GENERIC_SIGNUP_SUBMIT: &str = "text=/sign up|register|create/i";

pub const DEFAULT_SUCCESS_PROBE: &str =
    "text=/products|dashboard|welcome|my account|log ?out|sign ?out|ברוך הבא|התנתק/i";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeuristicConfig {
    /// Selector that becomes visible after a successful login.
    pub success_probe: String,
    /// Clickables exercised per page by the browse suites.
    pub browse_limit: usize,
}

impl Default for HeuristicConfig {
    fn default() -> Self {
        Self {
            success_probe: DEFAULT_SUCCESS_PROBE.to_string(),
            browse_limit: 5,
        }
    }
}

/// A ranked rule over `T`.
type Rule<'r, T> = &'r dyn Fn(&T) -> bool;

/// First item satisfying the highest-ranked rule that anything satisfies.
fn first_ranked<'a, T>(items: &'a [T], rules: &[Rule<'_, T>]) -> Option<&'a T> {
    rules
        .iter()
        .find_map(|rule| items.iter().find(|item| rule(item)))
}

fn mentions_any(text: &str, words: &[&str]) -> bool {
    let text = text.to_lowercase();
    words.iter().any(|w| text.contains(w))
}

fn text_of(d: &ElementDescriptor) -> &str {
    d.text.as_deref().unwrap_or("")
}

pub fn is_destructive(d: &ElementDescriptor) -> bool {
    mentions_any(text_of(d), DESTRUCTIVE_WORDS)
        || d.aria_label
            .as_deref()
            .is_some_and(|label| mentions_any(label, DESTRUCTIVE_WORDS))
}

/// Explicit override, then identifier rules, then text rules, then input type.
pub fn pick_selector(d: &ElementDescriptor) -> Option<String> {
    let hint = d
        .selector_hint
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    hint.or_else(|| SELECTOR_RULES.iter().find_map(|rule| rule(d)))
}

fn looks_like_username(d: &ElementDescriptor) -> bool {
    !d.is_password() && mentions_any(&d.label_probe(), USERNAME_HINTS)
}

fn first_username_input(obs: &Observation) -> Option<&ElementDescriptor> {
    first_ranked(
        &obs.inputs,
        &[&looks_like_username, &|d: &ElementDescriptor| !d.is_password()],
    )
}

fn first_password_input(obs: &Observation) -> Option<&ElementDescriptor> {
    obs.inputs.iter().find(|d| d.is_password())
}

fn first_button_with<'a>(buttons: &'a [ElementDescriptor], words: &[&str]) -> Option<&'a ElementDescriptor> {
    buttons.iter().find(|b| mentions_any(text_of(b), words))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginTriplet {
    pub user: String,
    pub pass: String,
    pub submit: String,
}

/// Username field, password field and submit button of an inline login form.
/// Requires exactly one password input.
pub fn find_login_triplet(obs: &Observation) -> Option<LoginTriplet> {
    if obs.inputs.iter().filter(|d| d.is_password()).count() != 1 {
        return None;
    }
    let pass = first_password_input(obs)?;
    let user = first_username_input(obs)?;
    let submit_words: Vec<&str> = LOGIN_WORDS
        .iter()
        .copied()
        .chain(["submit", "continue"])
        .collect();
    let submit = first_ranked(
        &obs.buttons,
        &[
            &|b: &ElementDescriptor| mentions_any(text_of(b), &submit_words),
            &|_: &ElementDescriptor| true,
        ],
    )?;
    Some(LoginTriplet {
        user: pick_selector(user)?,
        pass: pick_selector(pass)?,
        submit: pick_selector(submit)?,
    })
}

fn find_login_trigger(obs: &Observation) -> Option<String> {
    first_button_with(&obs.buttons, LOGIN_WORDS).and_then(pick_selector)
}

fn find_signup_trigger(obs: &Observation) -> Option<String> {
    first_button_with(&obs.buttons, SIGNUP_WORDS).and_then(pick_selector)
}

struct SignupFields {
    user: String,
    pass: String,
    submit: String,
}

fn find_signup_fields(obs: &Observation) -> Option<SignupFields> {
    let user = pick_selector(first_username_input(obs)?)?;
    let pass = pick_selector(first_password_input(obs)?)?;
    let submit_words: Vec<&str> = SIGNUP_WORDS
        .iter()
        .copied()
        .chain(["submit", "continue", "create"])
        .collect();
    let submit = first_button_with(&obs.buttons, &submit_words)
        .and_then(pick_selector)
        .unwrap_or_else(|| "button".to_string());
    Some(SignupFields { user, pass, submit })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clickable {
    pub selector: String,
    pub label: String,
}

/// Safe buttons then links, deduplicated by selector.
pub fn clickable_candidates(obs: &Observation) -> Vec<Clickable> {
    let mut seen = HashSet::new();
    obs.buttons
        .iter()
        .chain(obs.links.iter())
        .filter(|d| !is_destructive(d))
        .filter_map(|d| {
            let selector = pick_selector(d)?;
            Some(Clickable {
                label: text_of(d).to_string(),
                selector,
            })
        })
        .filter(|c| seen.insert(c.selector.clone()))
        .collect()
}

fn wait_visible(selector: &str) -> StepSpec {
    StepSpec::new("wait_for_selector").selector(selector).value("visible")
}

fn case(id: &str, name: &str, steps: Vec<StepSpec>) -> TestSuite {
    TestSuite::new(vec![TestCase {
        id: Some(id.to_string()),
        name: name.to_string(),
        steps,
    }])
}

/// Eight steps: open home, wait for both fields, fill them, submit, wait for
/// the success probe, screenshot.
pub fn login_suite(obs: &Observation, config: &HeuristicConfig) -> Option<TestSuite> {
    let tri = find_login_triplet(obs)?;
    let steps = vec![
        StepSpec::new("goto").selector("/"),
        wait_visible(&tri.user),
        wait_visible(&tri.pass),
        StepSpec::new("fill").selector(&tri.user).value("${USERNAME}"),
        StepSpec::new("fill").selector(&tri.pass).value("${PASSWORD}"),
        StepSpec::new("click").selector(&tri.submit),
        wait_visible(&config.success_probe),
        StepSpec::new("screenshot").value("after_login.png"),
    ];
    Some(case("AI-AUTO-LOGIN", "AI Login (page)", steps))
}

pub fn signup_then_login_suite(obs: &Observation, config: &HeuristicConfig) -> Option<TestSuite> {
    let trigger = find_signup_trigger(obs)?;
    let fields = find_signup_fields(obs).unwrap_or_else(|| SignupFields {
        user: GENERIC_USER_FIELD.to_string(),
        pass: GENERIC_PASS_FIELD.to_string(),
        submit: GENERIC_SIGNUP_SUBMIT.to_string(),
    });

    let mut steps = vec![
        StepSpec::new("goto").selector("/"),
        wait_visible(&trigger),
        StepSpec::new("click").selector(&trigger),
        wait_visible(&fields.user),
        wait_visible(&fields.pass),
        StepSpec::new("fill").selector(&fields.user).value("${NEW_USERNAME}"),
        StepSpec::new("fill").selector(&fields.pass).value("${NEW_PASSWORD}"),
        StepSpec::new("click").selector(&fields.submit).continue_on_fail(),
        StepSpec::new("wait").value("1200ms").continue_on_fail(),
        StepSpec::new("screenshot").value("after_signup.png").continue_on_fail(),
    ];

    if let Some(login_trigger) = find_login_trigger(obs) {
        steps.extend([
            StepSpec::new("click").selector(&login_trigger),
            wait_visible(GENERIC_USER_FIELD),
            wait_visible(GENERIC_PASS_FIELD),
            StepSpec::new("fill").selector(GENERIC_USER_FIELD).value("${NEW_USERNAME}"),
            StepSpec::new("fill").selector(GENERIC_PASS_FIELD).value("${NEW_PASSWORD}"),
            StepSpec::new("click").value("log in").continue_on_fail(),
        ]);
    } else if let Some(tri) = find_login_triplet(obs) {
        steps.extend([
            wait_visible(&tri.user),
            wait_visible(&tri.pass),
            StepSpec::new("fill").selector(&tri.user).value("${NEW_USERNAME}"),
            StepSpec::new("fill").selector(&tri.pass).value("${NEW_PASSWORD}"),
            StepSpec::new("click").selector(&tri.submit),
        ]);
    } else {
        steps.push(StepSpec::new("screenshot").value("no_login_path.png"));
        return Some(case(
            "AI-AUTO-SIGNUP",
            "AI Sign up (no login path found)",
            steps,
        ));
    }

    steps.extend([
        wait_visible(&config.success_probe).continue_on_fail(),
        StepSpec::new("screenshot").value("after_login.png"),
    ]);
    Some(case("AI-AUTO-SIGNUP-LOGIN", "AI Sign up → Login", steps))
}

pub fn smoke_suite(obs: &Observation) -> TestSuite {
    let safe: Vec<&ElementDescriptor> = obs.buttons.iter().filter(|b| !is_destructive(b)).collect();
    let cta = first_ranked(
        &safe,
        &[
            &|b: &&ElementDescriptor| mentions_any(text_of(b), CTA_WORDS),
            &|_: &&ElementDescriptor| true,
        ],
    )
    .and_then(|b| pick_selector(b));

    let mut steps = vec![StepSpec::new("goto").selector("/")];
    match cta {
        Some(selector) => steps.extend([
            wait_visible(&selector),
            StepSpec::new("click").selector(&selector),
            StepSpec::new("screenshot").value("after_cta.png"),
        ]),
        None => steps.push(StepSpec::new("screenshot").value("home.png")),
    }
    case("AI-AUTO-SMOKE", "AI Smoke (from graph)", steps)
}

fn file_safe(label: &str) -> String {
    let mut out = String::new();
    let mut gap = false;
    for c in label.chars() {
        if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
            out.push(c);
            gap = false;
        } else if !gap {
            out.push('_');
            gap = true;
        }
    }
    if out.is_empty() { "element".to_string() } else { out }
}

/// One exploratory case per page: wait, click, pause and screenshot each safe
/// clickable, never aborting on a bad element.
pub fn browse_suites(graph: &SiteGraph, config: &HeuristicConfig) -> TestSuite {
    let mut cases = Vec::new();
    for (idx, node) in graph.nodes.values().enumerate() {
        let candidates: Vec<Clickable> = clickable_candidates(&node.snapshot)
            .into_iter()
            .take(config.browse_limit)
            .collect();
        if candidates.is_empty() {
            continue;
        }
        let mut steps = vec![StepSpec::new("goto").selector(&node.url)];
        for c in &candidates {
            steps.extend([
                wait_visible(&c.selector).retry(1, 400).continue_on_fail(),
                StepSpec::new("click").selector(&c.selector).continue_on_fail(),
                StepSpec::new("wait").value("800ms").continue_on_fail(),
                StepSpec::new("screenshot")
                    .value(format!("clicked_{}.png", file_safe(&c.label)))
                    .continue_on_fail(),
            ]);
        }
        cases.push(TestCase {
            id: Some(format!("AI-AUTO-BROWSE-{}", idx + 1)),
            name: format!("AI Browse clickables on page #{}", idx + 1),
            steps,
        });
    }
    TestSuite::new(cases)
}

/// Login, else signup-then-login, else smoke; browse suites always appended.
/// `None` for a graph without pages.
pub fn build_suite_from_graph(graph: &SiteGraph, config: &HeuristicConfig) -> Option<TestSuite> {
    let home = graph.nodes.values().next()?;
    let obs = &home.snapshot;
    let mut suite = login_suite(obs, config)
        .or_else(|| signup_then_login_suite(obs, config))
        .unwrap_or_else(|| smoke_suite(obs));
    suite.extend(browse_suites(graph, config));
    Some(suite)
}
