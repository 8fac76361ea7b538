//! What each step does against a live page.
//!
//! Element lookups go through an ordered list of [`Strategy`]s sharing one
//! deadline, the step timeout. Each one polls for a visible, enabled
//! candidate within its share of what is left; the first hit wins. A
//! malformed selector ends the lookup at once.

use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::debug;

use crate::config::resolve_url;
use crate::driver::{DriverError, DriverResult, ElementRef, OptionMatch, Page, Role};
use crate::engine::step::{Step, WaitState};
use crate::error::StepError;
use crate::observation::visible_modal;
use crate::planner::heuristic::{LOGIN_WORDS, SIGNUP_WORDS};
use crate::selector::normalize_ws;

pub const POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const MIN_STRATEGY_BUDGET: Duration = Duration::from_millis(500);

/// Extra confirmation verbs accepted by intent clicks.
const SUBMIT_WORDS: &[&str] = &[
    "continue", "submit", "ok", "confirm", "שלח", "המשך", "אישור",
];

const STANDARD_BUTTONS: &str = "button, [role=button], input[type=submit]";

/// Per-step execution context.
#[derive(Debug, Clone, Copy)]
pub struct ActionContext<'a> {
    pub base_url: Option<&'a str>,
    pub timeout: Duration,
    pub reports_dir: &'a Path,
}

/// One way of finding the element a step acts on.
#[derive(Debug, Clone, PartialEq)]
pub enum Strategy {
    /// `selector` inside the open modal; skipped when no modal is open.
    InModal(String),
    PageWide(String),
    /// Buttons or links named by any of the words, inside the open modal.
    IntentInModal(Vec<String>),
    IntentPageWide(Vec<String>),
    /// First match regardless of visibility, probed once.
    FirstAttached(String),
}

impl Strategy {
    fn probe<P: Page + ?Sized>(
        &self,
        page: &P,
        modal: Option<&ElementRef>,
    ) -> Result<Option<ElementRef>, DriverError> {
        Ok(match self {
            Strategy::InModal(selector) => usable(page, lookup(page.query(modal, selector, 50))?),
            Strategy::PageWide(selector) => usable(page, lookup(page.query(None, selector, 50))?),
            Strategy::IntentInModal(words) => by_intent(page, modal, words),
            Strategy::IntentPageWide(words) => by_intent(page, None, words),
            Strategy::FirstAttached(selector) => {
                lookup(page.query(None, selector, 1))?.into_iter().next()
            }
        })
    }

    fn polls(&self) -> bool {
        !matches!(self, Strategy::FirstAttached(_))
    }

    fn needs_modal(&self) -> bool {
        matches!(self, Strategy::InModal(_) | Strategy::IntentInModal(_))
    }
}

/// A malformed selector is an error; any other failed query reads as no match.
fn lookup(found: DriverResult<Vec<ElementRef>>) -> Result<Vec<ElementRef>, DriverError> {
    match found {
        Err(e @ DriverError::InvalidSelector { .. }) => Err(e),
        Err(_) => Ok(Vec::new()),
        Ok(found) => Ok(found),
    }
}

fn usable<P: Page + ?Sized>(page: &P, found: Vec<ElementRef>) -> Option<ElementRef> {
    found.into_iter().find(|el| {
        page.is_visible(el).unwrap_or(false) && page.is_enabled(el).unwrap_or(false)
    })
}

fn by_intent<P: Page + ?Sized>(page: &P, scope: Option<&ElementRef>, words: &[String]) -> Option<ElementRef> {
    for word in words {
        for role in [Role::Button, Role::Link] {
            if let Ok(found) = page.query_by_role(scope, role, word, 10) {
                if let Some(el) = usable(page, found) {
                    return Some(el);
                }
            }
        }
    }
    None
}

/// Call `probe` every [`POLL_INTERVAL`] until it yields, fails, or `budget`
/// runs out. It is always called at least once.
pub fn try_poll<T, E>(
    budget: Duration,
    mut probe: impl FnMut() -> Result<Option<T>, E>,
) -> Result<Option<T>, E> {
    let deadline = Instant::now() + budget;
    loop {
        if let Some(hit) = probe()? {
            return Ok(Some(hit));
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL.min(deadline - now));
    }
}

pub fn poll<T>(budget: Duration, mut probe: impl FnMut() -> Option<T>) -> Option<T> {
    match try_poll(budget, || Ok::<_, Infallible>(probe())) {
        Ok(hit) => hit,
        Err(never) => match never {},
    }
}

/// Run the strategies in order against a single deadline `total` from now.
///
/// Modal strategies are skipped when no modal is open at the time they come
/// up. A polling strategy gets half of `total` (at least
/// [`MIN_STRATEGY_BUDGET`]) capped by what remains, and the last one gets
/// everything that remains. Strategies reached after the deadline still
/// probe once.
pub fn resolve<P: Page + ?Sized>(
    page: &P,
    strategies: &[Strategy],
    total: Duration,
) -> Result<Option<ElementRef>, DriverError> {
    let deadline = Instant::now() + total;
    let share = (total / 2).max(MIN_STRATEGY_BUDGET);
    let last_polling = strategies.iter().rposition(Strategy::polls);
    for (n, strategy) in strategies.iter().enumerate() {
        let modal = if strategy.needs_modal() {
            match visible_modal(page) {
                Some(modal) => Some(modal),
                None => continue,
            }
        } else {
            None
        };
        let remaining = deadline.saturating_duration_since(Instant::now());
        let budget = if Some(n) == last_polling {
            remaining
        } else {
            share.min(remaining)
        };
        let hit = if strategy.polls() {
            try_poll(budget, || strategy.probe(page, modal.as_ref()))?
        } else {
            strategy.probe(page, None)?
        };
        if let Some(el) = hit {
            debug!(?strategy, element = %el, "element resolved");
            return Ok(Some(el));
        }
    }
    Ok(None)
}

/// Intent first, then the built-in vocabulary, without repeats.
pub fn intent_words(intent: Option<&str>) -> Vec<String> {
    let mut words: Vec<String> = Vec::new();
    let intent = intent.map(|i| i.trim().to_lowercase()).filter(|i| !i.is_empty());
    for word in intent
        .into_iter()
        .chain(LOGIN_WORDS.iter().chain(SUBMIT_WORDS).chain(SIGNUP_WORDS).map(|w| w.to_string()))
    {
        if !words.contains(&word) {
            words.push(word);
        }
    }
    words
}

fn unresolved(target: &str, ctx: &ActionContext<'_>) -> StepError {
    StepError::ElementResolution {
        target: target.to_string(),
        reason: format!(
            "no visible, enabled match within {} ms",
            ctx.timeout.as_millis()
        ),
    }
}

fn find_target<P: Page + ?Sized>(
    page: &P,
    selector: &str,
    ctx: &ActionContext<'_>,
) -> Result<ElementRef, StepError> {
    let strategies = [
        Strategy::InModal(selector.to_string()),
        Strategy::PageWide(selector.to_string()),
    ];
    resolve(page, &strategies, ctx.timeout)?.ok_or_else(|| unresolved(selector, ctx))
}

/// Perform one step. Returns the path of any file it produced.
pub fn perform<P: Page + ?Sized>(
    page: &P,
    step: &Step,
    ctx: &ActionContext<'_>,
) -> Result<Option<PathBuf>, StepError> {
    match step {
        Step::Goto { target } => {
            let url = resolve_url(ctx.base_url, target);
            page.goto(&url, ctx.timeout)?;
        }
        Step::Click { selector, intent } => click(page, selector.as_deref(), intent.as_deref(), ctx)?,
        Step::Fill { selector, value } => fill(page, selector, value, ctx)?,
        Step::Press { selector, key } => {
            let el = find_target(page, selector, ctx)?;
            page.press(&el, key)?;
        }
        Step::SelectOption { selector, value } => {
            let el = find_target(page, selector, ctx)?;
            match page.select_option(&el, &OptionMatch::Value(value.clone())) {
                Err(DriverError::NoSuchOption(_)) => {
                    page.select_option(&el, &OptionMatch::Label(value.clone()))?
                }
                other => other?,
            }
        }
        Step::Wait { duration } => thread::sleep(*duration),
        Step::WaitForSelector { selector, state } => wait_for(page, selector, *state, ctx)?,
        Step::Screenshot { path } => {
            let path = screenshot_path(path.as_deref(), ctx.reports_dir);
            page.screenshot(&path)?;
            return Ok(Some(path));
        }
        Step::AssertVisible { selector } => assert_visible(page, selector, ctx)?,
        Step::AssertText { selector, expected } => {
            assert_text(page, selector, expected, TextCheck::Equals, ctx)?
        }
        Step::AssertContains { selector, expected } => {
            assert_text(page, selector, expected, TextCheck::Contains, ctx)?
        }
        Step::AssertUrlContains { expected } => assert_url_contains(page, expected, ctx)?,
        Step::Include { .. } => {
            return Err(StepError::Include(
                "include steps are expanded by the executor".into(),
            ));
        }
    }
    Ok(None)
}

fn click<P: Page + ?Sized>(
    page: &P,
    selector: Option<&str>,
    intent: Option<&str>,
    ctx: &ActionContext<'_>,
) -> Result<(), StepError> {
    if let Some(selector) = selector {
        let el = find_target(page, selector, ctx)?;
        page.click(&el)?;
        return Ok(());
    }

    let words = intent_words(intent);
    let strategies = [
        Strategy::IntentInModal(words.clone()),
        Strategy::IntentPageWide(words),
        Strategy::PageWide(STANDARD_BUTTONS.to_string()),
    ];
    let el = resolve(page, &strategies, ctx.timeout)?.ok_or_else(|| StepError::ElementResolution {
        target: format!("click intent '{}'", intent.unwrap_or_default()),
        reason: "no visible button or link matched; give the step an explicit selector".into(),
    })?;
    page.click(&el)?;
    Ok(())
}

/// Assign, then type, then inject through the DOM.
fn fill<P: Page + ?Sized>(
    page: &P,
    selector: &str,
    value: &str,
    ctx: &ActionContext<'_>,
) -> Result<(), StepError> {
    let strategies = [
        Strategy::InModal(selector.to_string()),
        Strategy::PageWide(selector.to_string()),
        Strategy::FirstAttached(selector.to_string()),
    ];
    let el = resolve(page, &strategies, ctx.timeout)?.ok_or_else(|| unresolved(selector, ctx))?;

    if let Err(e) = page.fill(&el, value) {
        debug!(selector, error = %e, "fill rejected, typing instead");
        if let Err(e) = page.type_text(&el, value) {
            debug!(selector, error = %e, "typing rejected, injecting value");
            page.inject_value(&el, value)?;
        }
    }
    Ok(())
}

fn wait_for<P: Page + ?Sized>(
    page: &P,
    selector: &str,
    state: WaitState,
    ctx: &ActionContext<'_>,
) -> Result<(), StepError> {
    let reached = try_poll(ctx.timeout, || {
        let found = lookup(page.query(None, selector, 50))?;
        let any_visible = || found.iter().any(|el| page.is_visible(el).unwrap_or(false));
        let ok = match state {
            WaitState::Visible => any_visible(),
            WaitState::Attached => !found.is_empty(),
            WaitState::Hidden => !any_visible(),
            WaitState::Detached => found.is_empty(),
        };
        Ok::<_, DriverError>(ok.then_some(()))
    })?;
    reached.ok_or_else(|| StepError::ElementResolution {
        target: selector.to_string(),
        reason: format!(
            "did not become {state:?} within {} ms",
            ctx.timeout.as_millis()
        )
        .to_lowercase(),
    })
}

/// Relative names land in the reports directory; no name gets a timestamped one.
pub fn screenshot_path(name: Option<&str>, reports_dir: &Path) -> PathBuf {
    let name = name
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("screenshot_{}.png", Utc::now().format("%Y%m%d_%H%M%S_%3f")));
    let path = PathBuf::from(name);
    if path.is_absolute() {
        path
    } else {
        reports_dir.join(path)
    }
}

fn assert_visible<P: Page + ?Sized>(
    page: &P,
    selector: &str,
    ctx: &ActionContext<'_>,
) -> Result<(), StepError> {
    let mut seen = 0;
    let hit = try_poll(ctx.timeout, || {
        let found = lookup(page.query(None, selector, 50))?;
        seen = found.len();
        Ok::<_, DriverError>(
            found
                .into_iter()
                .find(|el| page.is_visible(el).unwrap_or(false)),
        )
    })?;
    match hit {
        Some(_) => Ok(()),
        None => Err(StepError::Assertion {
            check: "assert_visible",
            expected: format!("{selector} visible"),
            actual: if seen == 0 {
                "no matching element".into()
            } else {
                format!("{seen} matching element(s), none visible")
            },
        }),
    }
}

#[derive(Debug, Clone, Copy)]
enum TextCheck {
    Equals,
    Contains,
}

fn assert_text<P: Page + ?Sized>(
    page: &P,
    selector: &str,
    expected: &str,
    check: TextCheck,
    ctx: &ActionContext<'_>,
) -> Result<(), StepError> {
    let want = normalize_ws(expected);
    let mut actual: Option<String> = None;
    let hit = try_poll(ctx.timeout, || {
        let Some(el) = lookup(page.query(None, selector, 1))?.into_iter().next() else {
            return Ok(None);
        };
        let Ok(text) = page.inner_text(&el) else {
            return Ok(None);
        };
        let text = normalize_ws(&text);
        let ok = match check {
            TextCheck::Equals => text == want,
            TextCheck::Contains => text.contains(&want),
        };
        actual = Some(text);
        Ok::<_, DriverError>(ok.then_some(()))
    })?;
    match hit {
        Some(()) => Ok(()),
        None => Err(StepError::Assertion {
            check: match check {
                TextCheck::Equals => "assert_text",
                TextCheck::Contains => "assert_contains",
            },
            expected: format!("{want:?}"),
            actual: actual
                .map(|a| format!("{a:?}"))
                .unwrap_or_else(|| "<unavailable>".into()),
        }),
    }
}

fn assert_url_contains<P: Page + ?Sized>(
    page: &P,
    expected: &str,
    ctx: &ActionContext<'_>,
) -> Result<(), StepError> {
    let mut current = String::new();
    let hit = poll(ctx.timeout, || {
        current = page.current_url().ok()?;
        current.contains(expected).then_some(())
    });
    hit.ok_or_else(|| StepError::Assertion {
        check: "assert_url_contains",
        expected: format!("URL containing {expected:?}"),
        actual: current,
    })
}
