//! Typed steps over the fixed step vocabulary.

use std::time::Duration;

use serde_json::Value;

use crate::config::{Variables, substitute_vars};
use crate::error::{StepError, ValidationError};
use crate::suite::StepSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitState {
    Visible,
    Attached,
    Hidden,
    Detached,
}

impl WaitState {
    /// Unknown or empty states fall back to `visible`.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_lowercase()).as_deref() {
            Some("attached") => WaitState::Attached,
            Some("hidden") => WaitState::Hidden,
            Some("detached") => WaitState::Detached,
            _ => WaitState::Visible,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Goto { target: String },
    /// Without a selector the click is resolved from `intent` and the
    /// built-in login/signup vocabulary.
    Click { selector: Option<String>, intent: Option<String> },
    Fill { selector: String, value: String },
    Press { selector: String, key: String },
    SelectOption { selector: String, value: String },
    Wait { duration: Duration },
    WaitForSelector { selector: String, state: WaitState },
    Screenshot { path: Option<String> },
    AssertVisible { selector: String },
    AssertText { selector: String, expected: String },
    AssertContains { selector: String, expected: String },
    AssertUrlContains { expected: String },
    Include { paths: Vec<String> },
}

impl Step {
    /// Build the typed step for `spec`, substituting variables into its value.
    /// `index` is the 1-based position used in error messages.
    pub fn from_spec(spec: &StepSpec, index: usize, variables: &Variables) -> Result<Self, StepError> {
        if let Some(include) = &spec.include {
            return Ok(Step::Include {
                paths: include.paths().into_iter().map(str::to_string).collect(),
            });
        }

        let kind = spec
            .kind()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .ok_or(ValidationError::MissingType { index })?;
        let selector = spec
            .selector
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        let value = spec
            .value_text()
            .map(|v| substitute_vars(&v, variables));

        let missing = |field: &'static str| {
            StepError::Validation(ValidationError::MissingField {
                index,
                step_type: kind.clone(),
                field,
            })
        };
        let need_selector = || selector.clone().ok_or_else(|| missing("selector"));
        let need_value = || value.clone().ok_or_else(|| missing("value"));

        let step = match kind.as_str() {
            "goto" => Step::Goto {
                target: selector
                    .clone()
                    .or_else(|| spec.url.clone())
                    .ok_or_else(|| missing("selector"))?,
            },
            "click" => Step::Click {
                selector: selector.clone(),
                intent: value.clone().filter(|v| !v.trim().is_empty()),
            },
            "fill" => Step::Fill {
                selector: need_selector()?,
                value: need_value()?,
            },
            "press" => Step::Press {
                selector: need_selector()?,
                key: need_value()?,
            },
            "select_option" => Step::SelectOption {
                selector: need_selector()?,
                value: need_value()?,
            },
            "wait" => Step::Wait {
                duration: parse_wait(spec.value.as_ref(), value.as_deref()).ok_or_else(|| {
                    ValidationError::WrongType {
                        index,
                        step_type: kind.clone(),
                        field: "value",
                        expected: "a number of seconds or a string like '500ms'",
                    }
                })?,
            },
            "wait_for_selector" => Step::WaitForSelector {
                selector: need_selector()?,
                state: WaitState::parse(value.as_deref()),
            },
            "screenshot" => Step::Screenshot {
                path: value.clone().filter(|v| !v.trim().is_empty()),
            },
            "assert_visible" => Step::AssertVisible {
                selector: need_selector()?,
            },
            "assert_text" => Step::AssertText {
                selector: need_selector()?,
                expected: need_value()?,
            },
            "assert_contains" => Step::AssertContains {
                selector: need_selector()?,
                expected: need_value()?,
            },
            "assert_url_contains" | "assert_url" => Step::AssertUrlContains {
                expected: need_value()?,
            },
            other => return Err(StepError::UnknownStepType(other.to_string())),
        };
        Ok(step)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Step::Goto { .. } => "goto",
            Step::Click { .. } => "click",
            Step::Fill { .. } => "fill",
            Step::Press { .. } => "press",
            Step::SelectOption { .. } => "select_option",
            Step::Wait { .. } => "wait",
            Step::WaitForSelector { .. } => "wait_for_selector",
            Step::Screenshot { .. } => "screenshot",
            Step::AssertVisible { .. } => "assert_visible",
            Step::AssertText { .. } => "assert_text",
            Step::AssertContains { .. } => "assert_contains",
            Step::AssertUrlContains { .. } => "assert_url_contains",
            Step::Include { .. } => "include",
        }
    }
}

/// Seconds as a number or numeric string, or milliseconds as `"<n>ms"`.
fn parse_wait(raw: Option<&Value>, text: Option<&str>) -> Option<Duration> {
    let secs = match raw {
        Some(Value::Number(n)) => n.as_f64()?,
        _ => {
            let text = text?.trim().to_lowercase();
            match text.strip_suffix("ms") {
                Some(ms) => ms.trim().parse::<f64>().ok()? / 1000.0,
                None => text.parse::<f64>().ok()?,
            }
        }
    };
    (secs.is_finite() && secs >= 0.0).then(|| Duration::from_secs_f64(secs.min(3600.0)))
}
