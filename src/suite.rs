//! Test suites as planners emit them, and the normalizer that makes any of
//! them executable.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::RunError;

pub const DEFAULT_RETRY: u32 = 1;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 400;

/// One or more sub-scenario files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Include {
    One(String),
    Many(Vec<String>),
}

impl Include {
    pub fn paths(&self) -> Vec<&str> {
        match self {
            Include::One(p) => vec![p.as_str()],
            Include::Many(ps) => ps.iter().map(String::as_str).collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepSpec {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub step_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Free-form: strings, numbers (wait seconds) and booleans all occur.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_delay_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continue_on_fail: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include: Option<Include>,
}

impl StepSpec {
    pub fn new(step_type: &str) -> Self {
        Self {
            step_type: Some(step_type.to_string()),
            ..Default::default()
        }
    }

    pub fn selector(mut self, selector: impl Into<String>) -> Self {
        self.selector = Some(selector.into());
        self
    }

    pub fn value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(Value::String(value.into()));
        self
    }

    pub fn retry(mut self, retry: u32, delay_ms: u64) -> Self {
        self.retry = Some(retry);
        self.retry_delay_ms = Some(delay_ms);
        self
    }

    pub fn continue_on_fail(mut self) -> Self {
        self.continue_on_fail = Some(true);
        self
    }

    pub fn kind(&self) -> Option<&str> {
        self.step_type.as_deref()
    }

    /// `value` rendered as text; null and absent are both `None`.
    pub fn value_text(&self) -> Option<String> {
        match self.value.as_ref()? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub steps: Vec<StepSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TestSuite {
    pub cases: Vec<TestCase>,
}

impl TestSuite {
    pub fn new(cases: Vec<TestCase>) -> Self {
        Self { cases }
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    pub fn save(&self, path: &Path) -> Result<(), RunError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, RunError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Append another suite's cases after this one's.
    pub fn extend(&mut self, other: TestSuite) {
        self.cases.extend(other.cases);
    }
}

/// Bring one step to the canonical schema. `None` when no type can be
/// resolved; include steps pass through untyped.
pub fn normalize_step(mut step: StepSpec) -> Option<StepSpec> {
    let declared = step
        .step_type
        .as_deref()
        .or(step.action.as_deref())
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty());

    let mut kind = match declared {
        Some(kind) => kind,
        None if step.url.is_some() => "goto".to_string(),
        None if step.selector.is_some() && step.value.is_some() => "fill".to_string(),
        None if step.include.is_some() => {
            step.action = None;
            return Some(step);
        }
        None => return None,
    };
    if kind == "assert_url" {
        kind = "assert_url_contains".to_string();
    }

    if kind == "goto" && step.selector.is_none() {
        step.selector = step.url.take();
    }
    if matches!(kind.as_str(), "click" | "fill" | "wait_for_selector") {
        step.retry.get_or_insert(DEFAULT_RETRY);
        step.retry_delay_ms.get_or_insert(DEFAULT_RETRY_DELAY_MS);
    }
    if kind == "wait_for_selector" && step.value_text().is_none() {
        step.value = Some(Value::String("visible".into()));
    }

    step.step_type = Some(kind);
    step.action = None;
    Some(step)
}

pub fn normalize_case(case: TestCase) -> TestCase {
    let name = if case.name.trim().is_empty() {
        "test".to_string()
    } else {
        case.name
    };
    let steps = case
        .steps
        .into_iter()
        .filter_map(|step| {
            let shown = format!("{step:?}");
            let normalized = normalize_step(step);
            if normalized.is_none() {
                warn!(test = %name, step = %shown, "skipping step with no type");
            }
            normalized
        })
        .collect();
    TestCase {
        id: case.id,
        name,
        steps,
    }
}

/// Idempotent: normalizing a normalized suite changes nothing.
pub fn normalize_suite(suite: TestSuite) -> TestSuite {
    TestSuite::new(suite.cases.into_iter().map(normalize_case).collect())
}
