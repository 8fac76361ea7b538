//! Selector strings understood by every driver.
//!
//! Three forms are accepted:
//! - `text=Sign in` / `text="Sign in"`: exact match on whitespace-normalized text
//! - `text=/sign\s+in/i`: regex match on the text, `i` for case-insensitive
//! - anything else is handed to the driver as CSS

use regex::{Regex, RegexBuilder};

use crate::driver::DriverError;

#[derive(Debug, Clone)]
pub enum Selector {
    Css(String),
    Text(String),
    TextPattern {
        source: String,
        case_insensitive: bool,
        regex: Regex,
    },
}

impl Selector {
    pub fn parse(raw: &str) -> Result<Self, DriverError> {
        let raw = raw.trim();
        let Some(body) = raw.strip_prefix("text=") else {
            if raw.is_empty() {
                return Err(DriverError::InvalidSelector {
                    selector: raw.to_string(),
                    reason: "empty selector".into(),
                });
            }
            return Ok(Selector::Css(raw.to_string()));
        };

        if let Some(rest) = body.strip_prefix('/') {
            if let Some(end) = rest.rfind('/') {
                let source = &rest[..end];
                let flags = &rest[end + 1..];
                let case_insensitive = flags.contains('i');
                let regex = RegexBuilder::new(source)
                    .case_insensitive(case_insensitive)
                    .build()
                    .map_err(|e| DriverError::InvalidSelector {
                        selector: raw.to_string(),
                        reason: e.to_string(),
                    })?;
                return Ok(Selector::TextPattern {
                    source: source.to_string(),
                    case_insensitive,
                    regex,
                });
            }
        }

        let unquoted = body
            .strip_prefix('"')
            .and_then(|s| s.strip_suffix('"'))
            .or_else(|| body.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')))
            .unwrap_or(body);
        Ok(Selector::Text(normalize_ws(unquoted)))
    }

    /// Whether an element whose rendered text is `text` satisfies a text selector.
    /// Always false for CSS selectors.
    pub fn matches_text(&self, text: &str) -> bool {
        match self {
            Selector::Css(_) => false,
            Selector::Text(expected) => normalize_ws(text) == *expected,
            Selector::TextPattern { regex, .. } => regex.is_match(text),
        }
    }

    pub fn is_text(&self) -> bool {
        !matches!(self, Selector::Css(_))
    }
}

/// Collapse runs of whitespace and trim.
pub fn normalize_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Quote a value for use inside a CSS attribute selector.
pub fn css_quote(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_css() {
        assert!(matches!(Selector::parse("#login").unwrap(), Selector::Css(s) if s == "#login"));
    }

    #[test]
    fn test_parse_exact_text() {
        let sel = Selector::parse("text=  Sign   in ").unwrap();
        assert!(sel.matches_text("Sign in"));
        assert!(sel.matches_text("  Sign\nin"));
        assert!(!sel.matches_text("Sign in now"));
    }

    #[test]
    fn test_parse_quoted_text() {
        let sel = Selector::parse("text=\"Log in\"").unwrap();
        assert!(sel.matches_text("Log in"));
    }

    #[test]
    fn test_parse_regex_text() {
        let sel = Selector::parse("text=/error|invalid/i").unwrap();
        assert!(sel.is_text());
        assert!(sel.matches_text("Invalid password"));
        assert!(!sel.matches_text("All good"));
    }

    #[test]
    fn test_regex_without_flag_is_case_sensitive() {
        let sel = Selector::parse("text=/Products/").unwrap();
        assert!(sel.matches_text("Products"));
        assert!(!sel.matches_text("products"));
    }

    #[test]
    fn test_empty_selector_rejected() {
        assert!(Selector::parse("  ").is_err());
    }

    #[test]
    fn test_css_quote_escapes() {
        assert_eq!(css_quote("it's"), "'it\\'s'");
    }
}
