//! The browser-automation collaborator.
//!
//! Everything above this module (observation, crawler, engine) talks to a live
//! page only through [`Page`]. The Chrome implementation lives in
//! [`crate::chrome`], the in-memory one used by tests in [`crate::mock`].

use std::path::Path;
use std::time::Duration;

use thiserror::Error;

/// Selector matching any open modal or dialog container.
pub const MODAL_SELECTOR: &str = "[role=dialog], .modal.show, .modal";

/// Errors raised by a driver primitive.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("element {0} is no longer attached")]
    Detached(String),

    #[error("invalid selector '{selector}': {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("{action} failed: {reason}")]
    Action { action: &'static str, reason: String },

    #[error("no option matching {0}")]
    NoSuchOption(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type DriverResult<T> = Result<T, DriverError>;

/// Opaque handle to an element found by [`Page::query`].
///
/// Handles are only valid until the next navigation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementRef(pub String);

impl std::fmt::Display for ElementRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Accessible roles used for intent-based lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Button,
    Link,
}

impl Role {
    /// CSS matching every element that carries this role implicitly or explicitly.
    pub fn css(self) -> &'static str {
        match self {
            Role::Button => {
                "button, [role=button], input[type=submit], input[type=button], input[type=reset]"
            }
            Role::Link => "a[href], [role=link]",
        }
    }
}

/// How `select_option` picks the option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionMatch {
    Value(String),
    Label(String),
}

/// A live page owned by one browser session.
///
/// All calls are blocking. Lookups never wait: polling and timeouts are the
/// caller's business.
pub trait Page {
    fn goto(&self, url: &str, timeout: Duration) -> DriverResult<()>;

    fn current_url(&self) -> DriverResult<String>;

    fn title(&self) -> DriverResult<String>;

    /// Elements matching `selector`, in document order, optionally restricted
    /// to descendants of `scope`. At most `limit` handles are returned.
    fn query(
        &self,
        scope: Option<&ElementRef>,
        selector: &str,
        limit: usize,
    ) -> DriverResult<Vec<ElementRef>>;

    /// Elements with `role` whose accessible name contains `word` as a whole
    /// word, compared case-insensitively.
    fn query_by_role(
        &self,
        scope: Option<&ElementRef>,
        role: Role,
        word: &str,
        limit: usize,
    ) -> DriverResult<Vec<ElementRef>>;

    fn attribute(&self, el: &ElementRef, name: &str) -> DriverResult<Option<String>>;

    fn inner_text(&self, el: &ElementRef) -> DriverResult<String>;

    fn is_visible(&self, el: &ElementRef) -> DriverResult<bool>;

    fn is_enabled(&self, el: &ElementRef) -> DriverResult<bool>;

    fn click(&self, el: &ElementRef) -> DriverResult<()>;

    /// Replace the element's value in one operation.
    fn fill(&self, el: &ElementRef, value: &str) -> DriverResult<()>;

    /// Focus the element and send the value as keystrokes.
    fn type_text(&self, el: &ElementRef, value: &str) -> DriverResult<()>;

    /// Assign `value` through the DOM and dispatch a bubbling `input` event.
    fn inject_value(&self, el: &ElementRef, value: &str) -> DriverResult<()>;

    fn press(&self, el: &ElementRef, key: &str) -> DriverResult<()>;

    fn select_option(&self, el: &ElementRef, choice: &OptionMatch) -> DriverResult<()>;

    fn screenshot(&self, path: &Path) -> DriverResult<()>;

    /// Rendered text of the whole document body.
    fn body_text(&self) -> DriverResult<String>;
}

/// Browser engine and context settings for one session.
#[derive(Debug, Clone, PartialEq)]
pub struct BrowserOptions {
    pub browser: String,
    pub headful: bool,
    pub viewport: Option<(u32, u32)>,
    pub user_agent: Option<String>,
    pub timeout: Duration,
    pub slow_mo: Duration,
    pub proxy: Option<ProxySettings>,
    pub video: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxySettings {
    pub server: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Opens exclusive browser sessions.
pub trait Launcher {
    type Session: Page;

    fn launch(&self, options: &BrowserOptions) -> anyhow::Result<Self::Session>;
}
