//! [`Page`] over a real Chrome via the DevTools protocol.
//!
//! Lookups run as injected JavaScript. Every element handed out is tagged with
//! a `data-rpa-id` attribute, and later calls find it again by that tag.
//! Scripts return JSON text so that arrays and nulls survive the trip.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use headless_chrome::protocol::cdp::Page::CaptureScreenshotFormatOption;
use headless_chrome::{Browser, LaunchOptions, Tab};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::driver::{
    BrowserOptions, DriverError, DriverResult, ElementRef, Launcher, OptionMatch, Page, Role,
};
use crate::selector::Selector;

const CHROMIUM_NAMES: &[&str] = &["chromium", "chrome", "google-chrome"];

const QUERY_JS: &str = r#"
(scopeId, mode, source, flags, limit) => {
  const root = scopeId ? document.querySelector(`[data-rpa-id="${scopeId}"]`) : document;
  if (!root) return JSON.stringify(null);
  const norm = s => (s || '').replace(/\s+/g, ' ').trim();
  let found;
  if (mode === 'css') {
    found = Array.from(root.querySelectorAll(source));
  } else {
    const re = mode === 'regex' ? new RegExp(source, flags) : null;
    const hit = el => {
      const t = norm(el.innerText !== undefined ? el.innerText : el.textContent);
      return re ? re.test(t) : t === source;
    };
    found = Array.from(root.querySelectorAll('body *'))
      .filter(el => hit(el) && !Array.from(el.children).some(hit));
  }
  window.__rpaSeq = window.__rpaSeq || 0;
  return JSON.stringify(found.slice(0, limit).map(el => {
    if (!el.dataset.rpaId) el.dataset.rpaId = 'r' + (++window.__rpaSeq);
    return el.dataset.rpaId;
  }));
}
"#;

const ROLE_JS: &str = r#"
(scopeId, css, word, limit) => {
  const root = scopeId ? document.querySelector(`[data-rpa-id="${scopeId}"]`) : document;
  if (!root) return JSON.stringify(null);
  const esc = word.replace(/[.*+?^${}()|[\]\\]/g, '\\$&');
  const re = new RegExp('(^|[^\\p{L}\\p{N}_])' + esc + '($|[^\\p{L}\\p{N}_])', 'iu');
  const name = el => (el.getAttribute('aria-label') || '').trim()
    || (el.innerText || '').trim() || (el.value || '');
  window.__rpaSeq = window.__rpaSeq || 0;
  return JSON.stringify(Array.from(root.querySelectorAll(css))
    .filter(el => re.test(name(el)))
    .slice(0, limit)
    .map(el => {
      if (!el.dataset.rpaId) el.dataset.rpaId = 'r' + (++window.__rpaSeq);
      return el.dataset.rpaId;
    }));
}
"#;

/// Wraps an element-level script body; `el` is bound, `arg` is the argument.
const ELEMENT_JS: &str = r#"
(id, arg, body) => {
  const el = document.querySelector(`[data-rpa-id="${id}"]`);
  if (!el) return JSON.stringify({detached: true});
  return JSON.stringify({value: new Function('el', 'arg', body)(el, arg)});
}
"#;

const VISIBLE_BODY: &str = r#"
  if (!el.isConnected) return false;
  const s = getComputedStyle(el);
  if (s.display === 'none' || s.visibility === 'hidden' || s.opacity === '0') return false;
  for (let p = el.parentElement; p; p = p.parentElement) {
    const ps = getComputedStyle(p);
    if (ps.display === 'none' || ps.visibility === 'hidden') return false;
  }
  return el.getClientRects().length > 0;
"#;

const FILL_BODY: &str = r#"
  const tag = el.tagName.toLowerCase();
  if (!['input', 'textarea', 'select'].includes(tag) && !el.isContentEditable) {
    return 'not fillable: <' + tag + '>';
  }
  el.focus();
  if (el.isContentEditable) { el.textContent = arg; }
  else {
    const proto = tag === 'textarea' ? HTMLTextAreaElement.prototype
      : tag === 'select' ? HTMLSelectElement.prototype : HTMLInputElement.prototype;
    Object.getOwnPropertyDescriptor(proto, 'value').set.call(el, arg);
  }
  el.dispatchEvent(new Event('input', {bubbles: true}));
  el.dispatchEvent(new Event('change', {bubbles: true}));
  return null;
"#;

const INJECT_BODY: &str = r#"
  el.value = arg;
  el.dispatchEvent(new Event('input', {bubbles: true}));
  return null;
"#;

const SELECT_BODY: &str = r#"
  const norm = s => (s || '').replace(/\s+/g, ' ').trim();
  const opt = Array.from(el.options || []).find(o =>
    arg.by === 'value' ? o.value === arg.want : norm(o.label || o.text) === norm(arg.want));
  if (!opt) return false;
  el.value = opt.value;
  el.dispatchEvent(new Event('input', {bubbles: true}));
  el.dispatchEvent(new Event('change', {bubbles: true}));
  return true;
"#;

#[derive(serde::Deserialize)]
struct ElementReply<T> {
    #[serde(default)]
    detached: bool,
    value: Option<T>,
}

/// One Chrome process with one tab.
pub struct ChromePage {
    _browser: Browser,
    tab: Arc<Tab>,
    timeout: Duration,
    slow_mo: Duration,
}

impl ChromePage {
    fn settle(&self) {
        if !self.slow_mo.is_zero() {
            thread::sleep(self.slow_mo);
        }
    }

    /// Evaluate `expr` and decode the JSON text it returns.
    fn eval_json<T: DeserializeOwned>(&self, action: &'static str, expr: &str) -> DriverResult<T> {
        let result = self.tab.evaluate(expr, false).map_err(|e| DriverError::Action {
            action,
            reason: e.to_string(),
        })?;
        let text = result
            .value
            .as_ref()
            .and_then(Value::as_str)
            .ok_or_else(|| DriverError::Other(format!("{action}: script returned no text")))?;
        serde_json::from_str(text).map_err(|e| DriverError::Other(format!("{action}: {e}")))
    }

    fn on_element<T: DeserializeOwned>(
        &self,
        action: &'static str,
        el: &ElementRef,
        arg: Value,
        body: &str,
    ) -> DriverResult<Option<T>> {
        let expr = format!("({ELEMENT_JS})({}, {}, {})", json!(el.0), arg, json!(body));
        let reply: ElementReply<T> = self.eval_json(action, &expr)?;
        if reply.detached {
            return Err(DriverError::Detached(el.to_string()));
        }
        Ok(reply.value)
    }

    fn handles(&self, raw: Option<Vec<String>>, scope: Option<&ElementRef>) -> DriverResult<Vec<ElementRef>> {
        match raw {
            Some(ids) => Ok(ids.into_iter().map(ElementRef).collect()),
            None => Err(DriverError::Detached(
                scope.map(ToString::to_string).unwrap_or_default(),
            )),
        }
    }

    fn native(&self, el: &ElementRef) -> DriverResult<headless_chrome::Element<'_>> {
        self.tab
            .find_element(&format!("[data-rpa-id='{}']", el.0))
            .map_err(|_| DriverError::Detached(el.to_string()))
    }
}

impl Page for ChromePage {
    fn goto(&self, url: &str, timeout: Duration) -> DriverResult<()> {
        let nav_err = |e: anyhow::Error| DriverError::Navigation {
            url: url.to_string(),
            reason: e.to_string(),
        };
        self.tab.set_default_timeout(timeout);
        let result = self
            .tab
            .navigate_to(url)
            .and_then(|tab| tab.wait_until_navigated())
            .map(|_| ())
            .map_err(nav_err);
        self.tab.set_default_timeout(self.timeout);
        self.settle();
        result
    }

    fn current_url(&self) -> DriverResult<String> {
        Ok(self.tab.get_url())
    }

    fn title(&self) -> DriverResult<String> {
        self.tab.get_title().map_err(|e| DriverError::Other(e.to_string()))
    }

    fn query(
        &self,
        scope: Option<&ElementRef>,
        selector: &str,
        limit: usize,
    ) -> DriverResult<Vec<ElementRef>> {
        let (mode, source, flags) = match Selector::parse(selector)? {
            Selector::Css(css) => ("css", css, String::new()),
            Selector::Text(text) => ("text", text, String::new()),
            Selector::TextPattern {
                source,
                case_insensitive,
                ..
            } => ("regex", source, if case_insensitive { "i".into() } else { String::new() }),
        };
        let expr = format!(
            "({QUERY_JS})({}, {}, {}, {}, {})",
            json!(scope.map(|s| &s.0)),
            json!(mode),
            json!(source),
            json!(flags),
            limit.min(10_000)
        );
        let raw: Option<Vec<String>> = self.eval_json("query", &expr)?;
        self.handles(raw, scope)
    }

    fn query_by_role(
        &self,
        scope: Option<&ElementRef>,
        role: Role,
        word: &str,
        limit: usize,
    ) -> DriverResult<Vec<ElementRef>> {
        let expr = format!(
            "({ROLE_JS})({}, {}, {}, {})",
            json!(scope.map(|s| &s.0)),
            json!(role.css()),
            json!(word.trim()),
            limit.min(10_000)
        );
        let raw: Option<Vec<String>> = self.eval_json("query_by_role", &expr)?;
        self.handles(raw, scope)
    }

    fn attribute(&self, el: &ElementRef, name: &str) -> DriverResult<Option<String>> {
        let body = "return arg === 'value' && 'value' in el ? String(el.value) : el.getAttribute(arg);";
        self.on_element("attribute", el, json!(name), body)
    }

    fn inner_text(&self, el: &ElementRef) -> DriverResult<String> {
        let body = "return el.innerText !== undefined ? el.innerText : el.textContent;";
        Ok(self
            .on_element::<String>("inner_text", el, Value::Null, body)?
            .unwrap_or_default())
    }

    fn is_visible(&self, el: &ElementRef) -> DriverResult<bool> {
        Ok(self
            .on_element::<bool>("is_visible", el, Value::Null, VISIBLE_BODY)?
            .unwrap_or(false))
    }

    fn is_enabled(&self, el: &ElementRef) -> DriverResult<bool> {
        let body = "return !el.disabled && !el.closest('fieldset[disabled]') \
                    && el.getAttribute('aria-disabled') !== 'true';";
        Ok(self
            .on_element::<bool>("is_enabled", el, Value::Null, body)?
            .unwrap_or(false))
    }

    fn click(&self, el: &ElementRef) -> DriverResult<()> {
        self.native(el)?
            .click()
            .map_err(|e| DriverError::Action {
                action: "click",
                reason: e.to_string(),
            })?;
        self.settle();
        Ok(())
    }

    fn fill(&self, el: &ElementRef, value: &str) -> DriverResult<()> {
        let rejected: Option<String> = self.on_element("fill", el, json!(value), FILL_BODY)?;
        self.settle();
        match rejected {
            Some(reason) => Err(DriverError::Action {
                action: "fill",
                reason,
            }),
            None => Ok(()),
        }
    }

    fn type_text(&self, el: &ElementRef, value: &str) -> DriverResult<()> {
        let action_err = |e: anyhow::Error| DriverError::Action {
            action: "type",
            reason: e.to_string(),
        };
        self.native(el)?.click().map_err(action_err)?;
        self.on_element::<Value>("type", el, Value::Null, "if ('value' in el) el.value = ''; return null;")?;
        self.tab.type_str(value).map_err(action_err)?;
        self.settle();
        Ok(())
    }

    fn inject_value(&self, el: &ElementRef, value: &str) -> DriverResult<()> {
        self.on_element::<Value>("inject", el, json!(value), INJECT_BODY)?;
        self.settle();
        Ok(())
    }

    fn press(&self, el: &ElementRef, key: &str) -> DriverResult<()> {
        let action_err = |e: anyhow::Error| DriverError::Action {
            action: "press",
            reason: e.to_string(),
        };
        self.native(el)?.focus().map_err(action_err)?;
        self.tab.press_key(key).map_err(action_err)?;
        self.settle();
        Ok(())
    }

    fn select_option(&self, el: &ElementRef, choice: &OptionMatch) -> DriverResult<()> {
        let arg = match choice {
            OptionMatch::Value(v) => json!({"by": "value", "want": v}),
            OptionMatch::Label(l) => json!({"by": "label", "want": l}),
        };
        let picked: Option<bool> = self.on_element("select_option", el, arg, SELECT_BODY)?;
        self.settle();
        if picked.unwrap_or(false) {
            Ok(())
        } else {
            Err(DriverError::NoSuchOption(format!("{choice:?}")))
        }
    }

    fn screenshot(&self, path: &Path) -> DriverResult<()> {
        let png = self
            .tab
            .capture_screenshot(CaptureScreenshotFormatOption::Png, None, None, true)
            .map_err(|e| DriverError::Action {
                action: "screenshot",
                reason: e.to_string(),
            })?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, png)?;
        debug!(path = %path.display(), "screenshot written");
        Ok(())
    }

    fn body_text(&self) -> DriverResult<String> {
        let text: Option<String> = self.eval_json(
            "body_text",
            "JSON.stringify(document.body ? document.body.innerText : null)",
        )?;
        Ok(text.unwrap_or_default())
    }
}

/// Starts Chrome or Chromium. Other engine names are refused.
#[derive(Debug, Clone, Default)]
pub struct ChromeLauncher {
    /// Explicit executable; otherwise `CHROME_PATH`, then the usual install locations.
    pub chrome_path: Option<PathBuf>,
}

impl ChromeLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    fn find_chrome(&self) -> anyhow::Result<PathBuf> {
        if let Some(path) = &self.chrome_path {
            return Ok(path.clone());
        }
        if let Some(path) = std::env::var_os("CHROME_PATH").map(PathBuf::from) {
            if path.exists() {
                return Ok(path);
            }
        }
        headless_chrome::browser::default_executable().map_err(|e| {
            anyhow::anyhow!("Chrome executable not found ({e}); set CHROME_PATH")
        })
    }
}

/// Whether the Chrome driver can serve `browser`.
pub fn supports(browser: &str) -> bool {
    CHROMIUM_NAMES.contains(&browser.trim().to_lowercase().as_str())
}

impl Launcher for ChromeLauncher {
    type Session = ChromePage;

    fn launch(&self, options: &BrowserOptions) -> anyhow::Result<ChromePage> {
        if !supports(&options.browser) {
            anyhow::bail!(
                "browser engine '{}' is not available in the Chrome driver; use chromium",
                options.browser
            );
        }
        if options.video {
            warn!("video recording is not supported by the Chrome driver, skipping");
        }

        let chrome_path = self.find_chrome()?;
        let launch_options = LaunchOptions {
            headless: !options.headful,
            path: Some(chrome_path),
            window_size: options.viewport,
            proxy_server: options.proxy.as_ref().map(|p| p.server.as_str()),
            args: vec![
                OsStr::new("--no-first-run"),
                OsStr::new("--no-default-browser-check"),
                OsStr::new("--disable-blink-features=AutomationControlled"),
                OsStr::new("--disable-infobars"),
            ],
            idle_browser_timeout: Duration::from_secs(300),
            ..Default::default()
        };

        info!(browser = %options.browser, headful = options.headful, "starting Chrome");
        let browser = Browser::new(launch_options)
            .map_err(|e| anyhow::anyhow!("Browser launch failed: {e}"))?;
        let tab = browser.new_tab()?;
        tab.set_default_timeout(options.timeout);

        if let Some(agent) = &options.user_agent {
            tab.set_user_agent(agent, None, None)?;
        }
        if let Some(proxy) = &options.proxy {
            if proxy.username.is_some() || proxy.password.is_some() {
                tab.enable_fetch(None, Some(true))?;
                tab.authenticate(proxy.username.clone(), proxy.password.clone())?;
            }
        }

        Ok(ChromePage {
            _browser: browser,
            tab,
            timeout: options.timeout,
            slow_mo: options.slow_mo,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supported_engine_names() {
        assert!(supports("chromium"));
        assert!(supports(" Chrome "));
        assert!(!supports("firefox"));
        assert!(!supports("webkit"));
    }

    #[test]
    fn test_other_engines_fail_before_touching_chrome() {
        let options = BrowserOptions {
            browser: "webkit".into(),
            headful: false,
            viewport: None,
            user_agent: None,
            timeout: Duration::from_secs(1),
            slow_mo: Duration::ZERO,
            proxy: None,
            video: false,
        };
        let err = ChromeLauncher::new().launch(&options).err().unwrap();
        assert!(err.to_string().contains("'webkit'"));
    }
}
