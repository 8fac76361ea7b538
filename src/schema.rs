//! Scenario validation, run before any step executes.
//!
//! Works on the raw document so that wrong field types surface as
//! [`ValidationError`]s rather than opaque parse failures.

use serde_json::{Map, Value};

use crate::error::ValidationError;

pub const STEP_TYPES: &[&str] = &[
    "goto",
    "click",
    "fill",
    "press",
    "select_option",
    "wait",
    "wait_for_selector",
    "screenshot",
    "assert_visible",
    "assert_text",
    "assert_contains",
    "assert_url_contains",
];

pub const WAIT_STATES: &[&str] = &["visible", "attached", "hidden", "detached"];

/// `(type, selector required, value required)`
const REQUIREMENTS: &[(&str, bool, bool)] = &[
    ("goto", true, false),
    ("click", false, false),
    ("fill", true, true),
    ("press", true, true),
    ("select_option", true, true),
    ("wait", false, true),
    ("wait_for_selector", true, false),
    ("screenshot", false, false),
    ("assert_visible", true, false),
    ("assert_text", true, true),
    ("assert_contains", true, true),
    ("assert_url_contains", false, true),
];

/// Validate a whole scenario document (`{steps: [...]}`).
pub fn validate_scenario(doc: &Value) -> Result<(), ValidationError> {
    let obj = doc
        .as_object()
        .ok_or_else(|| ValidationError::Malformed("scenario must be a mapping".into()))?;
    match obj.get("steps") {
        Some(Value::Array(steps)) => validate_steps(steps),
        Some(_) => Err(ValidationError::Malformed("'steps' must be a list".into())),
        None => Err(ValidationError::Empty),
    }
}

/// Validate a step list; steps are numbered from 1 in errors.
pub fn validate_steps(steps: &[Value]) -> Result<(), ValidationError> {
    if steps.is_empty() {
        return Err(ValidationError::Empty);
    }
    for (i, raw) in steps.iter().enumerate() {
        let index = i + 1;
        let step = raw.as_object().ok_or_else(|| {
            ValidationError::Malformed(format!("step {index} must be a mapping"))
        })?;
        validate_step(index, step)?;
    }
    Ok(())
}

fn present(step: &Map<String, Value>, key: &str) -> bool {
    match step.get(key) {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(_) => true,
    }
}

fn is_ms_string(v: &str) -> bool {
    let v = v.trim().to_ascii_lowercase();
    v.strip_suffix("ms")
        .map(|n| {
            let n = n.trim();
            !n.is_empty() && n.chars().all(|c| c.is_ascii_digit())
        })
        .unwrap_or(false)
}

fn validate_step(index: usize, step: &Map<String, Value>) -> Result<(), ValidationError> {
    if let Some(include) = step.get("include") {
        let ok = match include {
            Value::String(s) => !s.trim().is_empty(),
            Value::Array(items) => !items.is_empty() && items.iter().all(Value::is_string),
            _ => false,
        };
        if !ok {
            return Err(ValidationError::WrongType {
                index,
                step_type: "include".into(),
                field: "include",
                expected: "a path or a list of paths",
            });
        }
        return Ok(());
    }

    let step_type = match step.get("type") {
        Some(Value::String(t)) if !t.trim().is_empty() => t.trim().to_lowercase(),
        _ => return Err(ValidationError::MissingType { index }),
    };
    let Some(&(_, needs_selector, needs_value)) =
        REQUIREMENTS.iter().find(|(t, _, _)| *t == step_type)
    else {
        return Err(ValidationError::UnknownType { index, step_type });
    };

    let missing = |field: &'static str| ValidationError::MissingField {
        index,
        step_type: step_type.clone(),
        field,
    };
    let has_target = present(step, "selector") || (step_type == "goto" && present(step, "url"));
    if needs_selector && !has_target {
        return Err(missing("selector"));
    }
    if needs_value && !present(step, "value") {
        return Err(missing("value"));
    }

    if step_type == "wait" {
        let ok = match step.get("value") {
            Some(Value::Number(_)) => true,
            Some(Value::String(s)) => is_ms_string(s),
            _ => false,
        };
        if !ok {
            return Err(ValidationError::WrongType {
                index,
                step_type,
                field: "value",
                expected: "a number of seconds or a string like '500ms'",
            });
        }
    }

    if step_type == "wait_for_selector" {
        if let Some(Value::String(state)) = step.get("value") {
            let state = state.trim().to_lowercase();
            if !state.is_empty() && !WAIT_STATES.contains(&state.as_str()) {
                return Err(ValidationError::BadValue {
                    index,
                    step_type,
                    field: "value",
                    reason: format!("'{state}' is not one of {}", WAIT_STATES.join("/")),
                });
            }
        }
    }

    let wrong = |field: &'static str, expected: &'static str| ValidationError::WrongType {
        index,
        step_type: step_type.clone(),
        field,
        expected,
    };
    if let Some(v) = step.get("retry") {
        if !v.is_u64() {
            return Err(wrong("retry", "a non-negative integer"));
        }
    }
    if let Some(v) = step.get("retry_delay_ms") {
        if !v.is_u64() {
            return Err(wrong("retry_delay_ms", "a non-negative integer"));
        }
    }
    if let Some(v) = step.get("continue_on_fail") {
        if !v.is_boolean() {
            return Err(wrong("continue_on_fail", "a boolean"));
        }
    }
    Ok(())
}
