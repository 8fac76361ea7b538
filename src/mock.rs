//! In-memory site and page for exercising the crawler and engine without a browser.
//!
//! A [`MockSite`] maps URLs to [`MockDocument`]s; a [`MockPage`] navigates between
//! them and records every interaction so tests can assert on what happened.
//! CSS selectors are matched by `scraper` against the document rendered as HTML;
//! values, visibility and the interaction log live on top of that.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use regex::RegexBuilder;
use scraper::{Html, Selector as CssSelector};

use crate::driver::{
    BrowserOptions, DriverError, DriverResult, ElementRef, Launcher, OptionMatch, Page, Role,
};
use crate::selector::{Selector, normalize_ws};

#[derive(Debug, Clone)]
pub struct MockElement {
    pub tag: String,
    pub attrs: BTreeMap<String, String>,
    pub text: String,
    pub visible: bool,
    pub enabled: bool,
    pub parent: Option<usize>,
    /// `(value, label)` pairs for `<select>`.
    pub options: Vec<(String, String)>,
    pub rejects_fill: bool,
    pub rejects_typing: bool,
}

impl MockElement {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_lowercase(),
            attrs: BTreeMap::new(),
            text: String::new(),
            visible: true,
            enabled: true,
            parent: None,
            options: Vec::new(),
            rejects_fill: false,
            rejects_typing: false,
        }
    }

    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.insert(name.to_string(), value.to_string());
        self
    }

    pub fn text(mut self, text: &str) -> Self {
        self.text = text.to_string();
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Nest under the element at `parent` (its index in the document).
    pub fn inside(mut self, parent: usize) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn option(mut self, value: &str, label: &str) -> Self {
        self.options.push((value.to_string(), label.to_string()));
        self
    }

    /// Behave like a custom widget that ignores direct value assignment.
    pub fn rejects_fill(mut self) -> Self {
        self.rejects_fill = true;
        self
    }

    pub fn rejects_typing(mut self) -> Self {
        self.rejects_typing = true;
        self
    }

    fn describe(&self) -> String {
        if let Some(id) = self.attrs.get("id") {
            return format!("#{id}");
        }
        if let Some(name) = self.attrs.get("name") {
            return format!("[name={name}]");
        }
        let text = normalize_ws(&self.text);
        if text.is_empty() { self.tag.clone() } else { text }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MockDocument {
    pub title: String,
    pub elements: Vec<MockElement>,
    pub body_text: Option<String>,
}

impl MockDocument {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            ..Default::default()
        }
    }

    /// Append an element; its index is the number of elements added before it.
    pub fn with(mut self, element: MockElement) -> Self {
        self.elements.push(element);
        self
    }

    pub fn body(mut self, text: &str) -> Self {
        self.body_text = Some(text.to_string());
        self
    }

    /// Build a document from markup.
    ///
    /// Every element under `<body>` becomes a [`MockElement`] in document order, with
    /// its full text content as text. `hidden` or an inline `display:none` hides it,
    /// `disabled` disables it, and the `<option>`s of a `<select>` become its options.
    pub fn from_html(markup: &str) -> Self {
        let html = Html::parse_document(markup);
        let mut doc = MockDocument::default();
        if let Ok(title) = CssSelector::parse("title") {
            if let Some(el) = html.select(&title).next() {
                doc.title = normalize_ws(&el.text().collect::<String>());
            }
        }
        if let Ok(body) = CssSelector::parse("body") {
            if let Some(body) = html.select(&body).next() {
                collect_elements(body, None, &mut doc.elements);
            }
        }
        doc
    }

    fn children(&self, idx: usize) -> impl Iterator<Item = usize> + '_ {
        // parents always come first, which also rules out cycles
        (idx + 1..self.elements.len()).filter(move |&child| self.elements[child].parent == Some(idx))
    }

    /// The element tree as HTML, each element tagged with its index.
    fn markup(&self) -> String {
        let mut out = String::from("<!DOCTYPE html><html><head></head><body>");
        for idx in 0..self.elements.len() {
            let root = match self.elements[idx].parent {
                Some(parent) => parent >= idx,
                None => true,
            };
            if root {
                self.render(idx, &mut out);
            }
        }
        out.push_str("</body></html>");
        out
    }

    fn render(&self, idx: usize, out: &mut String) {
        let el = &self.elements[idx];
        out.push('<');
        out.push_str(&el.tag);
        out.push_str(&format!(" {INDEX_ATTR}=\"{idx}\""));
        for (name, value) in &el.attrs {
            out.push_str(&format!(" {name}=\"{}\"", escape_attr(value)));
        }
        if !el.enabled && !el.attrs.contains_key("disabled") {
            out.push_str(" disabled");
        }
        if !el.visible && !el.attrs.contains_key("hidden") {
            out.push_str(" hidden");
        }
        out.push('>');
        if VOID_TAGS.contains(&el.tag.as_str()) {
            return;
        }
        for child in self.children(idx) {
            self.render(child, out);
        }
        out.push_str(&format!("</{}>", el.tag));
    }

    /// Indices of the elements matching `css`, in document order, optionally only
    /// the descendants of `scope`.
    fn select(&self, css: &str, scope: Option<usize>) -> DriverResult<Vec<usize>> {
        let invalid = |reason: String| DriverError::InvalidSelector {
            selector: css.to_string(),
            reason,
        };
        let selector = CssSelector::parse(css).map_err(|e| invalid(e.to_string()))?;
        let html = Html::parse_document(&self.markup());
        let index_of = |el: scraper::ElementRef<'_>| {
            el.value()
                .attr(INDEX_ATTR)
                .and_then(|v| v.parse::<usize>().ok())
        };
        let hits: Vec<usize> = match scope {
            None => html.select(&selector).filter_map(index_of).collect(),
            Some(root) => {
                let root_selector = CssSelector::parse(&format!("[{INDEX_ATTR}=\"{root}\"]"))
                    .map_err(|e| invalid(e.to_string()))?;
                match html.select(&root_selector).next() {
                    Some(root) => root.select(&selector).filter_map(index_of).collect(),
                    None => Vec::new(),
                }
            }
        };
        Ok(hits)
    }
}

const INDEX_ATTR: &str = "data-mock-idx";

const VOID_TAGS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

fn escape_attr(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
}

fn collect_elements(
    parent_el: scraper::ElementRef<'_>,
    parent: Option<usize>,
    out: &mut Vec<MockElement>,
) {
    for node in parent_el.children() {
        let Some(child) = scraper::ElementRef::wrap(node) else {
            continue;
        };
        let value = child.value();
        let mut el = MockElement::new(value.name());
        if el.tag == "option" {
            continue;
        }
        for (name, v) in value.attrs() {
            el.attrs.insert(name.to_string(), v.to_string());
        }
        el.text = normalize_ws(&child.text().collect::<String>());
        let style = value
            .attr("style")
            .unwrap_or_default()
            .replace(' ', "")
            .to_lowercase();
        el.visible = value.attr("hidden").is_none() && !style.contains("display:none");
        el.enabled = value.attr("disabled").is_none();
        el.parent = parent;
        if el.tag == "select" {
            for option in child.children().filter_map(scraper::ElementRef::wrap) {
                let label = normalize_ws(&option.text().collect::<String>());
                let v = option.value().attr("value").map_or_else(|| label.clone(), str::to_string);
                el.options.push((v, label));
            }
        }
        let idx = out.len();
        let is_select = el.tag == "select";
        out.push(el);
        if !is_select {
            collect_elements(child, Some(idx), out);
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MockSite {
    pages: HashMap<String, MockDocument>,
}

impl MockSite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, url: &str, doc: MockDocument) -> Self {
        self.pages.insert(url.to_string(), doc);
        self
    }

    fn lookup(&self, url: &str) -> Option<(&String, &MockDocument)> {
        let bare = url.split('#').next().unwrap_or(url);
        let alt = if bare.ends_with('/') {
            bare.trim_end_matches('/').to_string()
        } else {
            format!("{bare}/")
        };
        self.pages
            .get_key_value(bare)
            .or_else(|| self.pages.get_key_value(alt.as_str()))
    }
}

#[derive(Debug, Default)]
struct MockState {
    site: MockSite,
    url: Option<String>,
    values: HashMap<usize, String>,
    log: Vec<String>,
    visits: Vec<String>,
}

impl MockState {
    fn doc(&self) -> DriverResult<&MockDocument> {
        let url = self
            .url
            .as_deref()
            .ok_or_else(|| DriverError::Other("no page loaded".into()))?;
        self.site
            .lookup(url)
            .map(|(_, doc)| doc)
            .ok_or_else(|| DriverError::Other(format!("unknown page {url}")))
    }

    fn element(&self, el: &ElementRef) -> DriverResult<(usize, &MockElement)> {
        let idx = parse_ref(el)?;
        let doc = self.doc()?;
        doc.elements
            .get(idx)
            .map(|e| (idx, e))
            .ok_or_else(|| DriverError::Detached(el.to_string()))
    }

    fn navigate(&mut self, url: &str) -> DriverResult<()> {
        match self.site.lookup(url) {
            Some((key, _)) => {
                let key = key.clone();
                self.url = Some(key.clone());
                self.values.clear();
                self.visits.push(key);
                Ok(())
            }
            None => Err(DriverError::Navigation {
                url: url.to_string(),
                reason: "net::ERR_NAME_NOT_RESOLVED".into(),
            }),
        }
    }
}

fn parse_ref(el: &ElementRef) -> DriverResult<usize> {
    el.0.strip_prefix('e')
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| DriverError::Detached(el.to_string()))
}

/// A page over a [`MockSite`]. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MockPage {
    state: Arc<Mutex<MockState>>,
}

impl MockPage {
    pub fn new(site: MockSite) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                site,
                ..Default::default()
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Interaction log, e.g. `click:#submit`, `fill:[name=user]=bob`.
    pub fn log(&self) -> Vec<String> {
        self.lock().log.clone()
    }

    /// Every URL successfully loaded, in order.
    pub fn visits(&self) -> Vec<String> {
        self.lock().visits.clone()
    }

    /// Current value of the first element matching `selector`.
    pub fn value_of(&self, selector: &str) -> Option<String> {
        let found = self.query(None, selector, 1).ok()?.into_iter().next()?;
        let idx = parse_ref(&found).ok()?;
        self.lock().values.get(&idx).cloned()
    }

    fn record(&self, entry: String) {
        self.lock().log.push(entry);
    }
}

fn is_descendant(elements: &[MockElement], mut idx: usize, ancestor: usize) -> bool {
    let mut guard = 0;
    while let Some(parent) = elements[idx].parent {
        if parent == ancestor {
            return true;
        }
        idx = parent;
        guard += 1;
        if guard > elements.len() {
            break;
        }
    }
    false
}

impl Page for MockPage {
    fn goto(&self, url: &str, _timeout: Duration) -> DriverResult<()> {
        let mut state = self.lock();
        state.log.push(format!("goto:{url}"));
        state.navigate(url)
    }

    fn current_url(&self) -> DriverResult<String> {
        Ok(self
            .lock()
            .url
            .clone()
            .unwrap_or_else(|| "about:blank".to_string()))
    }

    fn title(&self) -> DriverResult<String> {
        Ok(self.lock().doc()?.title.clone())
    }

    fn query(
        &self,
        scope: Option<&ElementRef>,
        selector: &str,
        limit: usize,
    ) -> DriverResult<Vec<ElementRef>> {
        let parsed = Selector::parse(selector)?;
        let state = self.lock();
        let doc = state.doc()?;
        let scope_idx = scope.map(parse_ref).transpose()?;

        let hits = match &parsed {
            Selector::Css(css) => doc.select(css, scope_idx)?,
            // innermost elements whose text matches, like the browser driver
            _ => (0..doc.elements.len())
                .filter(|&idx| scope_idx.is_none_or(|root| is_descendant(&doc.elements, idx, root)))
                .filter(|&idx| parsed.matches_text(&doc.elements[idx].text))
                .filter(|&idx| {
                    !doc.children(idx)
                        .any(|child| parsed.matches_text(&doc.elements[child].text))
                })
                .collect(),
        };
        Ok(hits
            .into_iter()
            .take(limit)
            .map(|idx| ElementRef(format!("e{idx}")))
            .collect())
    }

    fn query_by_role(
        &self,
        scope: Option<&ElementRef>,
        role: Role,
        word: &str,
        limit: usize,
    ) -> DriverResult<Vec<ElementRef>> {
        let pattern = RegexBuilder::new(&format!(r"\b{}\b", regex::escape(word.trim())))
            .case_insensitive(true)
            .build()
            .map_err(|e| DriverError::Other(e.to_string()))?;
        let candidates = self.query(scope, role.css(), usize::MAX)?;
        let state = self.lock();
        let mut out = Vec::new();
        for el in candidates {
            let (_, element) = state.element(&el)?;
            let name = element
                .attrs
                .get("aria-label")
                .cloned()
                .filter(|s| !s.trim().is_empty())
                .or_else(|| Some(element.text.clone()).filter(|s| !s.trim().is_empty()))
                .or_else(|| element.attrs.get("value").cloned())
                .unwrap_or_default();
            if pattern.is_match(&name) {
                out.push(el);
                if out.len() >= limit {
                    break;
                }
            }
        }
        Ok(out)
    }

    fn attribute(&self, el: &ElementRef, name: &str) -> DriverResult<Option<String>> {
        let state = self.lock();
        let (idx, element) = state.element(el)?;
        if name == "value" {
            if let Some(v) = state.values.get(&idx) {
                return Ok(Some(v.clone()));
            }
        }
        Ok(element.attrs.get(name).cloned())
    }

    fn inner_text(&self, el: &ElementRef) -> DriverResult<String> {
        let state = self.lock();
        Ok(state.element(el)?.1.text.clone())
    }

    fn is_visible(&self, el: &ElementRef) -> DriverResult<bool> {
        let state = self.lock();
        let (idx, element) = state.element(el)?;
        let doc = state.doc()?;
        let mut visible = element.visible;
        let mut cursor = idx;
        while let Some(parent) = doc.elements[cursor].parent {
            visible &= doc.elements[parent].visible;
            cursor = parent;
            if !visible {
                break;
            }
        }
        Ok(visible)
    }

    fn is_enabled(&self, el: &ElementRef) -> DriverResult<bool> {
        let state = self.lock();
        Ok(state.element(el)?.1.enabled)
    }

    fn click(&self, el: &ElementRef) -> DriverResult<()> {
        let mut state = self.lock();
        let (label, href) = {
            let (_, element) = state.element(el)?;
            if !element.enabled {
                return Err(DriverError::Action {
                    action: "click",
                    reason: "element is disabled".into(),
                });
            }
            (element.describe(), element.attrs.get("href").cloned())
        };
        state.log.push(format!("click:{label}"));
        if let Some(href) = href {
            let base = state.url.clone().unwrap_or_default();
            if let Ok(target) = url::Url::parse(&base).and_then(|b| b.join(&href)) {
                let _ = state.navigate(target.as_str());
            }
        }
        Ok(())
    }

    fn fill(&self, el: &ElementRef, value: &str) -> DriverResult<()> {
        let mut state = self.lock();
        let (idx, element) = state.element(el)?;
        if element.rejects_fill {
            return Err(DriverError::Action {
                action: "fill",
                reason: "element is not an <input>, <textarea> or <select>".into(),
            });
        }
        let label = element.describe();
        state.values.insert(idx, value.to_string());
        state.log.push(format!("fill:{label}={value}"));
        Ok(())
    }

    fn type_text(&self, el: &ElementRef, value: &str) -> DriverResult<()> {
        let mut state = self.lock();
        let (idx, element) = state.element(el)?;
        if element.rejects_typing {
            return Err(DriverError::Action {
                action: "type",
                reason: "element did not receive focus".into(),
            });
        }
        let label = element.describe();
        state.values.insert(idx, value.to_string());
        state.log.push(format!("type:{label}={value}"));
        Ok(())
    }

    fn inject_value(&self, el: &ElementRef, value: &str) -> DriverResult<()> {
        let mut state = self.lock();
        let (idx, element) = state.element(el)?;
        let label = element.describe();
        state.values.insert(idx, value.to_string());
        state.log.push(format!("inject:{label}={value}"));
        Ok(())
    }

    fn press(&self, el: &ElementRef, key: &str) -> DriverResult<()> {
        let mut state = self.lock();
        let label = state.element(el)?.1.describe();
        state.log.push(format!("press:{label}={key}"));
        Ok(())
    }

    fn select_option(&self, el: &ElementRef, choice: &OptionMatch) -> DriverResult<()> {
        let mut state = self.lock();
        let (idx, element) = state.element(el)?;
        let picked = element
            .options
            .iter()
            .find(|(value, label)| match choice {
                OptionMatch::Value(v) => value == v,
                OptionMatch::Label(l) => normalize_ws(label) == normalize_ws(l),
            })
            .map(|(value, _)| value.clone());
        let label = element.describe();
        match picked {
            Some(value) => {
                state.log.push(format!("select:{label}={value}"));
                state.values.insert(idx, value);
                Ok(())
            }
            None => Err(DriverError::NoSuchOption(format!("{choice:?}"))),
        }
    }

    fn screenshot(&self, path: &Path) -> DriverResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, b"\x89PNG mock")?;
        self.record(format!("screenshot:{}", path.display()));
        Ok(())
    }

    fn body_text(&self) -> DriverResult<String> {
        let state = self.lock();
        let doc = state.doc()?;
        if let Some(body) = &doc.body_text {
            return Ok(body.clone());
        }
        Ok(doc
            .elements
            .iter()
            .filter(|e| e.visible && !e.text.trim().is_empty())
            .map(|e| e.text.clone())
            .collect::<Vec<_>>()
            .join("\n"))
    }
}

/// Hands out [`MockPage`]s over one site; engines listed in `failing` refuse to launch.
#[derive(Debug, Default)]
pub struct MockLauncher {
    site: MockSite,
    failing: HashSet<String>,
    launched: Mutex<Vec<(String, MockPage)>>,
}

impl MockLauncher {
    pub fn new(site: MockSite) -> Self {
        Self {
            site,
            ..Default::default()
        }
    }

    pub fn failing(mut self, browser: &str) -> Self {
        self.failing.insert(browser.to_string());
        self
    }

    /// `(browser, page)` for every successful launch.
    pub fn launched(&self) -> Vec<(String, MockPage)> {
        self.launched
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl Launcher for MockLauncher {
    type Session = MockPage;

    fn launch(&self, options: &BrowserOptions) -> anyhow::Result<MockPage> {
        if self.failing.contains(&options.browser) {
            anyhow::bail!("failed to launch {}: executable not found", options.browser);
        }
        let page = MockPage::new(self.site.clone());
        self.launched
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((options.browser.clone(), page.clone()));
        Ok(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page() -> MockPage {
        let site = MockSite::new().page(
            "http://site.test/",
            MockDocument::new("Home")
                .with(MockElement::new("div").attr("role", "dialog"))
                .with(MockElement::new("button").text("Log in").inside(0))
                .with(MockElement::new("button").text("Log in"))
                .with(MockElement::new("input").attr("name", "Email").attr("type", "email"))
                .with(MockElement::new("a").attr("href", "/about").text("About")),
        );
        let page = MockPage::new(site);
        page.goto("http://site.test/", Duration::from_secs(1)).unwrap();
        page
    }

    #[test]
    fn test_css_selection_and_scope() {
        let p = page();
        assert_eq!(p.query(None, "button", 10).unwrap().len(), 2);
        let modal = p.query(None, "[role=dialog]", 1).unwrap();
        let inside = p.query(Some(&modal[0]), "button", 10).unwrap();
        assert_eq!(inside, vec![ElementRef("e1".into())]);
        assert_eq!(p.query(None, "input[type=email], a[href]", 10).unwrap().len(), 2);
    }

    fn login_modal() -> MockPage {
        let doc = MockDocument::from_html(
            r##"<html><head><title>Store</title></head><body>
              <nav><a id="login2" href="#">Log in</a></nav>
              <div class="modal" id="logInModal" role="dialog">
                <div class="modal-body">
                  <input id="loginusername" type="text">
                  <select name="size"><option value="s">Small</option><option>Large</option></select>
                </div>
                <div class="modal-footer">
                  <button class="btn btn-secondary" disabled>Close</button>
                  <button class="btn btn-primary">Log in</button>
                </div>
              </div>
              <p style="display: none">Welcome back</p>
            </body></html>"##,
        );
        let page = MockPage::new(MockSite::new().page("http://store.test/", doc));
        page.goto("http://store.test/", Duration::from_secs(1)).unwrap();
        page
    }

    fn describe_all(p: &MockPage, found: &[ElementRef]) -> Vec<String> {
        found
            .iter()
            .map(|el| p.lock().element(el).unwrap().1.describe())
            .collect()
    }

    #[test]
    fn test_descendant_and_child_combinators() {
        let p = login_modal();
        let primary = p.query(None, "#logInModal .modal-footer .btn-primary", 10).unwrap();
        assert_eq!(describe_all(&p, &primary), vec!["Log in"]);
        assert_eq!(p.query(None, "div > button", 10).unwrap().len(), 2);
        assert!(p.query(None, "#logInModal > button", 10).unwrap().is_empty());

        let modal = p.query(None, ".modal", 1).unwrap();
        let inputs = p.query(Some(&modal[0]), ".modal-body > input", 10).unwrap();
        assert_eq!(describe_all(&p, &inputs), vec!["#loginusername"]);
    }

    #[test]
    fn test_pseudo_classes() {
        let p = login_modal();
        let enabled = p.query(None, "button:not([disabled])", 10).unwrap();
        assert_eq!(describe_all(&p, &enabled), vec!["Log in"]);
        let last = p.query(None, ".modal-footer button:last-child", 10).unwrap();
        assert_eq!(enabled, last);
    }

    #[test]
    fn test_markup_fixture_keeps_state_on_top() {
        let p = login_modal();
        assert_eq!(p.title().unwrap(), "Store");

        let input = p.query(None, "#loginusername", 1).unwrap();
        p.fill(&input[0], "ada").unwrap();
        assert_eq!(p.value_of("#logInModal input").as_deref(), Some("ada"));

        let select = p.query(None, "select[name=size]", 1).unwrap();
        p.select_option(&select[0], &OptionMatch::Label("Large".into())).unwrap();
        assert_eq!(p.value_of("select").as_deref(), Some("Large"));

        let closed = p.query(None, ".btn-secondary", 1).unwrap();
        assert!(!p.is_enabled(&closed[0]).unwrap());
        let welcome = p.query(None, "text=Welcome back", 1).unwrap();
        assert!(!p.is_visible(&welcome[0]).unwrap());
    }

    #[test]
    fn test_text_selector_picks_innermost_element() {
        let p = login_modal();
        let found = p.query(None, "text=/^log in$/i", 10).unwrap();
        assert_eq!(describe_all(&p, &found), vec!["#login2", "Log in"]);
    }

    #[test]
    fn test_malformed_css_is_an_invalid_selector() {
        let p = page();
        assert!(matches!(
            p.query(None, "button[", 1),
            Err(DriverError::InvalidSelector { .. })
        ));
    }

    #[test]
    fn test_case_insensitive_contains_attr() {
        let p = page();
        assert_eq!(p.query(None, "[name*=EMAIL i]", 10).unwrap().len(), 1);
        assert_eq!(p.query(None, "[name*=EMAIL]", 10).unwrap().len(), 0);
    }

    #[test]
    fn test_query_by_role_word_boundary() {
        let p = page();
        assert_eq!(p.query_by_role(None, Role::Button, "log in", 10).unwrap().len(), 2);
        assert!(p.query_by_role(None, Role::Button, "log", 10).unwrap().len() == 2);
        assert!(p.query_by_role(None, Role::Button, "login", 10).unwrap().is_empty());
    }

    #[test]
    fn test_click_anchor_navigates() {
        let site = MockSite::new()
            .page(
                "http://site.test/",
                MockDocument::new("Home").with(MockElement::new("a").attr("href", "/about")),
            )
            .page("http://site.test/about", MockDocument::new("About"));
        let p = MockPage::new(site);
        p.goto("http://site.test/", Duration::from_secs(1)).unwrap();
        let link = p.query(None, "a", 1).unwrap();
        p.click(&link[0]).unwrap();
        assert_eq!(p.current_url().unwrap(), "http://site.test/about");
    }

    #[test]
    fn test_unknown_page_fails_navigation() {
        let p = MockPage::new(MockSite::new());
        assert!(matches!(
            p.goto("http://nowhere.test/", Duration::from_secs(1)),
            Err(DriverError::Navigation { .. })
        ));
    }
}
