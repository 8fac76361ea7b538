//! Distils a live page into a compact [`Observation`].
//!
//! Collection is bounded per page and every attribute read is individually
//! fault tolerant: a failed read leaves that field empty instead of aborting
//! the whole observation.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::driver::{ElementRef, MODAL_SELECTOR, Page};
use crate::selector::{css_quote, normalize_ws};

pub const MAX_BUTTONS: usize = 80;
pub const MAX_INPUTS: usize = 100;
pub const MAX_LINKS: usize = 80;
pub const MAX_VISIBLE_TEXTS: usize = 80;
pub const BANNER_MAX_CHARS: usize = 200;

const BUTTON_SELECTOR: &str = "button, [role=button], input[type=submit], a";
const INPUT_SELECTOR: &str = "input, textarea, [role=textbox], select";
const LINK_SELECTOR: &str = "a[href]";
const ERROR_BANNER: &str = "text=/error|invalid|failed|wrong|שגיאה|נכשל/i";
const SUCCESS_BANNER: &str = "text=/success|welcome|הצלחה|בוצע|נשמר|נשלח/i";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementRole {
    #[default]
    Button,
    Input,
    Link,
}

/// One interactive element, reduced to what a planner needs to target it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElementDescriptor {
    pub role: ElementRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aria_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_testid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_test: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub input_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selector_hint: Option<String>,
}

/// A selector-producing rule; rules are tried top to bottom.
pub type SelectorRule = fn(&ElementDescriptor) -> Option<String>;

fn non_empty(v: &Option<String>) -> Option<&str> {
    v.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn by_id(d: &ElementDescriptor) -> Option<String> {
    non_empty(&d.id).map(|id| {
        let plain = id
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic())
            && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if plain {
            format!("#{id}")
        } else {
            format!("[id={}]", css_quote(id))
        }
    })
}

fn by_test_id(d: &ElementDescriptor) -> Option<String> {
    non_empty(&d.data_testid)
        .map(|v| format!("[data-testid={}]", css_quote(v)))
        .or_else(|| non_empty(&d.data_test).map(|v| format!("[data-test={}]", css_quote(v))))
}

fn by_name(d: &ElementDescriptor) -> Option<String> {
    non_empty(&d.name).map(|v| format!("[name={}]", css_quote(v)))
}

fn by_placeholder(d: &ElementDescriptor) -> Option<String> {
    non_empty(&d.placeholder).map(|v| format!("[placeholder={}]", css_quote(v)))
}

fn by_exact_text(d: &ElementDescriptor) -> Option<String> {
    if d.role == ElementRole::Input {
        return None;
    }
    non_empty(&d.text).map(|t| format!("text={}", normalize_ws(t)))
}

fn by_text_pattern(d: &ElementDescriptor) -> Option<String> {
    if d.role == ElementRole::Input {
        return None;
    }
    non_empty(&d.text).map(|t| format!("text=/{}/i", regex::escape(&normalize_ws(t))))
}

fn by_input_type(d: &ElementDescriptor) -> Option<String> {
    if d.role != ElementRole::Input {
        return None;
    }
    non_empty(&d.input_type).map(|t| format!("input[type={}]", css_quote(&t.to_lowercase())))
}

/// Identifier-based rules first, text-based rules after, type last.
pub const SELECTOR_RULES: &[SelectorRule] = &[
    by_id,
    by_test_id,
    by_name,
    by_placeholder,
    by_exact_text,
    by_text_pattern,
    by_input_type,
];

impl ElementDescriptor {
    /// Recompute `selector_hint` from the identifiers present.
    pub fn with_hint(mut self) -> Self {
        self.selector_hint = SELECTOR_RULES[..5].iter().find_map(|rule| rule(&self));
        self
    }

    pub fn is_password(&self) -> bool {
        self.input_type
            .as_deref()
            .is_some_and(|t| t.eq_ignore_ascii_case("password"))
    }

    /// Lower-cased text of every attribute a human would read as a label.
    pub fn label_probe(&self) -> String {
        [
            &self.name,
            &self.placeholder,
            &self.aria_label,
            &self.id,
            &self.text,
        ]
        .iter()
        .filter_map(|v| v.as_deref())
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageFlags {
    pub modal_open: bool,
    pub has_password: bool,
    pub has_form: bool,
    pub error_banner: Option<String>,
    pub success_banner: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Observation {
    pub url: String,
    pub title: Option<String>,
    pub visible_texts: Vec<String>,
    pub buttons: Vec<ElementDescriptor>,
    pub inputs: Vec<ElementDescriptor>,
    pub links: Vec<ElementDescriptor>,
    pub flags: PageFlags,
}

/// Snapshot the page the driver currently shows.
pub fn observe<P: Page + ?Sized>(page: &P) -> Observation {
    let url = page.current_url().unwrap_or_default();
    let title = page
        .title()
        .ok()
        .map(|t| normalize_ws(&t))
        .filter(|t| !t.is_empty());

    let obs = Observation {
        flags: detect_flags(page),
        visible_texts: visible_texts(page),
        buttons: collect_buttons(page),
        inputs: collect_inputs(page),
        links: collect_links(page),
        url,
        title,
    };
    debug!(
        url = %obs.url,
        buttons = obs.buttons.len(),
        inputs = obs.inputs.len(),
        links = obs.links.len(),
        "observed page"
    );
    obs
}

fn read<P: Page + ?Sized>(page: &P, el: &ElementRef, attr: &str) -> Option<String> {
    page.attribute(el, attr)
        .ok()
        .flatten()
        .map(|v| normalize_ws(&v))
        .filter(|v| !v.is_empty())
}

fn describe<P: Page + ?Sized>(page: &P, el: &ElementRef, role: ElementRole) -> ElementDescriptor {
    ElementDescriptor {
        role,
        text: None,
        id: read(page, el, "id"),
        name: read(page, el, "name"),
        aria_label: read(page, el, "aria-label"),
        data_testid: read(page, el, "data-testid"),
        data_test: read(page, el, "data-test"),
        placeholder: read(page, el, "placeholder"),
        input_type: read(page, el, "type"),
        href: None,
        selector_hint: None,
    }
}

fn collect_buttons<P: Page + ?Sized>(page: &P) -> Vec<ElementDescriptor> {
    let found = page.query(None, BUTTON_SELECTOR, MAX_BUTTONS).unwrap_or_default();
    found
        .iter()
        .map(|el| {
            let mut d = describe(page, el, ElementRole::Button);
            let text = page
                .inner_text(el)
                .ok()
                .map(|t| normalize_ws(&t))
                .filter(|t| !t.is_empty())
                .or_else(|| read(page, el, "value"))
                .or_else(|| d.aria_label.clone());
            d.text = text;
            d.with_hint()
        })
        .collect()
}

fn collect_inputs<P: Page + ?Sized>(page: &P) -> Vec<ElementDescriptor> {
    let found = page.query(None, INPUT_SELECTOR, MAX_INPUTS).unwrap_or_default();
    found
        .iter()
        .map(|el| {
            let mut d = describe(page, el, ElementRole::Input);
            d.text = d
                .placeholder
                .clone()
                .or_else(|| d.aria_label.clone())
                .or_else(|| d.name.clone())
                .or_else(|| d.id.clone())
                .or_else(|| d.input_type.clone());
            d.with_hint()
        })
        .collect()
}

fn collect_links<P: Page + ?Sized>(page: &P) -> Vec<ElementDescriptor> {
    let found = page.query(None, LINK_SELECTOR, MAX_LINKS).unwrap_or_default();
    found
        .iter()
        .map(|el| {
            let mut d = describe(page, el, ElementRole::Link);
            d.href = page.attribute(el, "href").ok().flatten();
            d.text = page
                .inner_text(el)
                .ok()
                .map(|t| normalize_ws(&t))
                .filter(|t| !t.is_empty());
            d.with_hint()
        })
        .collect()
}

fn first_visible_text<P: Page + ?Sized>(page: &P, selector: &str) -> Option<String> {
    let found = page.query(None, selector, 20).ok()?;
    let el = found
        .into_iter()
        .find(|el| page.is_visible(el).unwrap_or(false))?;
    let text = normalize_ws(&page.inner_text(&el).ok()?);
    Some(text.chars().take(BANNER_MAX_CHARS).collect())
}

/// True when any modal container is currently shown.
pub fn modal_open<P: Page + ?Sized>(page: &P) -> bool {
    visible_modal(page).is_some()
}

/// The first visible modal container, if one is open.
pub fn visible_modal<P: Page + ?Sized>(page: &P) -> Option<ElementRef> {
    page.query(None, MODAL_SELECTOR, 10)
        .ok()?
        .into_iter()
        .find(|el| page.is_visible(el).unwrap_or(false))
}

fn detect_flags<P: Page + ?Sized>(page: &P) -> PageFlags {
    let exists = |selector: &str| {
        page.query(None, selector, 1)
            .map(|found| !found.is_empty())
            .unwrap_or(false)
    };
    PageFlags {
        modal_open: modal_open(page),
        has_password: exists("input[type=password]"),
        has_form: exists("form"),
        error_banner: first_visible_text(page, ERROR_BANNER),
        success_banner: first_visible_text(page, SUCCESS_BANNER),
    }
}

fn visible_texts<P: Page + ?Sized>(page: &P) -> Vec<String> {
    let Ok(body) = page.body_text() else {
        return Vec::new();
    };
    let mut out: Vec<String> = Vec::new();
    for line in body.lines() {
        let line = normalize_ws(line);
        let len = line.chars().count();
        if (3..=150).contains(&len) && !out.contains(&line) {
            out.push(line);
            if out.len() >= MAX_VISIBLE_TEXTS {
                break;
            }
        }
    }
    out
}

/// One-line digest of an observation for logs.
pub fn summarize(obs: &Observation) -> String {
    let clip = |s: &str, n: usize| s.chars().take(n).collect::<String>();
    let mut parts = vec![format!("URL: {}", obs.url)];
    if let Some(title) = &obs.title {
        parts.push(format!("Title: {title}"));
    }
    parts.push(format!(
        "Form: {}, Password: {}, Modal: {}",
        obs.flags.has_form, obs.flags.has_password, obs.flags.modal_open
    ));
    if let Some(err) = &obs.flags.error_banner {
        parts.push(format!("Error: {}", clip(err, 120)));
    }
    if let Some(ok) = &obs.flags.success_banner {
        parts.push(format!("Success: {}", clip(ok, 120)));
    }
    if !obs.visible_texts.is_empty() {
        let sample = obs.visible_texts[..obs.visible_texts.len().min(3)].join("; ");
        parts.push(format!("Texts: {}", clip(&sample, 160)));
    }
    parts.join(" | ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockDocument, MockElement, MockPage, MockSite};
    use std::time::Duration;

    fn login_page() -> MockPage {
        let site = MockSite::new().page(
            "http://shop.test/",
            MockDocument::new("  Swag   Labs ")
                .with(MockElement::new("form"))
                .with(MockElement::new("input").attr("id", "user-name").attr("placeholder", "Username").inside(0))
                .with(MockElement::new("input").attr("type", "password").attr("data-test", "password").inside(0))
                .with(MockElement::new("input").attr("type", "submit").attr("value", "Login").inside(0))
                .with(MockElement::new("h3").text("Epic sadface: Username is required").hidden())
                .with(MockElement::new("div").text("Invalid credentials, try again"))
                .with(MockElement::new("a").attr("href", "/about#team").text("About us"))
                .body("Swag Labs\nAccepted usernames are:\nok\nSwag Labs\nAbout us"),
        );
        let page = MockPage::new(site);
        page.goto("http://shop.test/", Duration::from_secs(1)).unwrap();
        page
    }

    #[test]
    fn test_observe_collects_elements_and_flags() {
        let obs = observe(&login_page());
        assert_eq!(obs.title.as_deref(), Some("Swag Labs"));
        assert_eq!(obs.inputs.len(), 3);
        assert_eq!(obs.inputs[0].selector_hint.as_deref(), Some("#user-name"));
        assert_eq!(obs.inputs[1].selector_hint.as_deref(), Some("[data-test='password']"));
        assert!(obs.inputs[1].is_password());
        assert!(obs.flags.has_password);
        assert!(obs.flags.has_form);
        assert!(!obs.flags.modal_open);
        assert_eq!(
            obs.flags.error_banner.as_deref(),
            Some("Invalid credentials, try again")
        );
        assert_eq!(obs.flags.success_banner, None);
    }

    #[test]
    fn test_submit_input_text_falls_back_to_value() {
        let obs = observe(&login_page());
        let submit = obs
            .buttons
            .iter()
            .find(|b| b.input_type.as_deref() == Some("submit"))
            .unwrap();
        assert_eq!(submit.text.as_deref(), Some("Login"));
        assert_eq!(submit.selector_hint.as_deref(), Some("text=Login"));
    }

    #[test]
    fn test_visible_texts_bounded_and_deduplicated() {
        let obs = observe(&login_page());
        assert_eq!(
            obs.visible_texts,
            vec!["Swag Labs", "Accepted usernames are:", "About us"]
        );
    }

    #[test]
    fn test_links_keep_href() {
        let obs = observe(&login_page());
        assert_eq!(obs.links.len(), 1);
        assert_eq!(obs.links[0].href.as_deref(), Some("/about#team"));
    }

    #[test]
    fn test_blank_page_defaults_to_negative_flags() {
        let page = MockPage::new(MockSite::new());
        let obs = observe(&page);
        assert_eq!(obs.url, "about:blank");
        assert!(obs.buttons.is_empty());
        assert_eq!(obs.flags, PageFlags::default());
    }

    #[test]
    fn test_hint_prefers_id_over_text() {
        let d = ElementDescriptor {
            role: ElementRole::Button,
            id: Some("go".into()),
            text: Some("Go".into()),
            ..Default::default()
        }
        .with_hint();
        assert_eq!(d.selector_hint.as_deref(), Some("#go"));
    }

    #[test]
    fn test_odd_ids_are_quoted() {
        let d = ElementDescriptor {
            id: Some("form:user".into()),
            ..Default::default()
        };
        assert_eq!(by_id(&d).as_deref(), Some("[id='form:user']"));
    }

    #[test]
    fn test_summarize_mentions_flags() {
        let obs = observe(&login_page());
        let line = summarize(&obs);
        assert!(line.starts_with("URL: http://shop.test/"));
        assert!(line.contains("Password: true"));
        assert!(line.contains("Error: Invalid credentials"));
    }
}
