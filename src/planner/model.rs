//! Suite planning delegated to a text generator.
//!
//! Model output is untrusted. It passes through a pipeline of recovery stages
//! (strip fences, extract the array, parse, repair fields), each of which may
//! give up; giving up anywhere means "no suite", never an error.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde_json::{Map, Value, json};
use tracing::{info, warn};

use crate::llm::TextGenerator;
use crate::schema::STEP_TYPES;
use crate::suite::{DEFAULT_RETRY, DEFAULT_RETRY_DELAY_MS, TestSuite};

pub const MAX_PROMPT_PAGES: usize = 8;

const SYSTEM_PROMPT: &str = "You are a senior QA planner. Given a website model (buttons, inputs, links), \
output ONLY a STRICT JSON array of tests. Each test has: \
{id, name, steps:[{type, selector?, value?, continue_on_fail?, retry?, retry_delay_ms?}]}. \
Use selectors like text=..., [data-test='...'], input[placeholder='...']. \
Prefer non-destructive flows and add basic assertions with wait_for_selector. \
NO prose, NO markdown fences, ONLY the JSON array.";

fn minimal_graph() -> Value {
    json!({"pages": [{"url": "/"}]})
}

/// Read a graph file, degrading to a single-page graph when it is missing,
/// empty or malformed.
pub fn read_graph_lenient(path: &Path) -> Value {
    let raw = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "graph unreadable, using minimal graph");
            return minimal_graph();
        }
    };
    let text = String::from_utf8_lossy(&raw);
    let text = text.trim_start_matches('\u{feff}').trim();
    if text.is_empty() {
        return minimal_graph();
    }
    match serde_json::from_str::<Value>(text) {
        Ok(v @ Value::Object(_)) => v,
        Ok(_) => minimal_graph(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "graph is not valid JSON, using minimal graph");
            minimal_graph()
        }
    }
}

fn field<'a>(obj: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| obj.get(*k).filter(|v| !v.is_null()))
}

/// At most `max_pages` pages, each reduced to what matters for planning.
pub fn prune_graph(graph: &Value, max_pages: usize) -> Value {
    let pages = field(graph, &["pages", "nodes"])
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let slim: Vec<Value> = pages
        .iter()
        .take(max_pages)
        .map(|page| {
            let model = field(page, &["model", "snapshot"]).cloned().unwrap_or(Value::Null);
            let list = |keys: &[&str]| {
                field(&model, keys).cloned().unwrap_or_else(|| Value::Array(vec![]))
            };
            json!({
                "url": field(page, &["url", "path"]).cloned().unwrap_or_else(|| json!("/")),
                "buttons": list(&["buttons"]),
                "inputs": list(&["inputs"]),
                "links": list(&["links"]),
                "texts": list(&["visible_texts", "texts"]),
            })
        })
        .collect();
    if slim.is_empty() {
        return minimal_graph();
    }
    json!({ "pages": slim })
}

/// Variable names are offered as `${NAME}` tokens; values never leave the process.
pub fn build_prompt(pruned: &Value, variables: &BTreeMap<String, String>) -> String {
    let names: Vec<String> = variables.keys().map(|k| format!("${{{k}}}")).collect();
    format!(
        "{SYSTEM_PROMPT}\n\n\
SITE_MODEL_JSON:\n{model}\n\n\
VARIABLES (use if relevant): {vars}\n\
ALLOWED STEP TYPES: {types}\n\n\
Guidelines:\n\
- Start with goto '/' if the path is unclear.\n\
- Insert 'wait_for_selector' before every 'click' or 'fill'.\n\
- Use ${{USERNAME}} and ${{PASSWORD}} if a login flow is detected.\n\
- Never click logout, delete, purchase or payment controls.\n\
- Keep each test 5-12 steps.\n\
- Return ONLY a JSON array (no markdown fences).\n",
        model = pruned,
        vars = if names.is_empty() { "none".to_string() } else { names.join(", ") },
        types = STEP_TYPES.join(", "),
    )
}

/// Drop a leading ```lang fence and a trailing ``` fence.
pub fn strip_fences(raw: &str) -> &str {
    let mut s = raw.trim();
    if let Some(rest) = s.strip_prefix("```") {
        let lang_end = rest
            .find(|c: char| !c.is_ascii_alphanumeric())
            .unwrap_or(rest.len());
        s = rest[lang_end..].trim();
        if let Some(body) = s.strip_suffix("```") {
            s = body.trim();
        }
    }
    s
}

/// End of the bracketed span opening at `start`, skipping brackets inside strings.
fn matching_bracket(text: &str, start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '[' => depth += 1,
            ']' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(start + i);
                }
            }
            _ => {}
        }
    }
    None
}

/// The first bracketed span that parses as a JSON array.
pub fn extract_array(text: &str) -> Option<Vec<Value>> {
    text.match_indices('[').find_map(|(start, _)| {
        let end = matching_bracket(text, start)?;
        match serde_json::from_str::<Value>(&text[start..=end]) {
            Ok(Value::Array(items)) => Some(items),
            _ => None,
        }
    })
}

fn repair_step(step: &mut Map<String, Value>) {
    if !step.contains_key("type") {
        if let Some(action) = step.remove("action") {
            step.insert("type".into(), action);
        }
    }
    let kind = step
        .get("type")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_default();
    if matches!(kind.as_str(), "click" | "fill") {
        step.entry("continue_on_fail").or_insert(Value::Bool(true));
    }
    if kind == "wait_for_selector" {
        step.entry("value").or_insert_with(|| json!("visible"));
    }
    if matches!(kind.as_str(), "click" | "wait_for_selector") {
        step.entry("retry").or_insert_with(|| json!(DEFAULT_RETRY));
        step.entry("retry_delay_ms").or_insert_with(|| json!(DEFAULT_RETRY_DELAY_MS));
    }
}

/// Every element must be a test case with a `steps` list of step objects.
pub fn repair_cases(mut items: Vec<Value>) -> Option<Vec<Value>> {
    for item in items.iter_mut() {
        let case = item.as_object_mut()?;
        if let Some(id) = case.get("id").filter(|v| !v.is_string() && !v.is_null()) {
            let id = id.to_string();
            case.insert("id".into(), Value::String(id));
        }
        let steps = case.get_mut("steps")?.as_array_mut()?;
        for step in steps.iter_mut() {
            repair_step(step.as_object_mut()?);
        }
    }
    Some(items)
}

/// Raw model text to a suite, or `None` if the text cannot be recovered.
pub fn coerce_suite(raw: &str) -> Option<TestSuite> {
    let text = strip_fences(raw);
    let items = extract_array(text)?;
    let repaired = repair_cases(items)?;
    let suite: TestSuite = serde_json::from_value(Value::Array(repaired)).ok()?;
    (!suite.is_empty()).then_some(suite)
}

/// Plan from the graph at `graph_path`. Generator failures and unusable
/// output both yield `None`.
pub async fn plan_with_model(
    generator: &dyn TextGenerator,
    graph_path: &Path,
    variables: &BTreeMap<String, String>,
) -> Option<TestSuite> {
    let graph = read_graph_lenient(graph_path);
    let pruned = prune_graph(&graph, MAX_PROMPT_PAGES);
    let prompt = build_prompt(&pruned, variables);
    info!(generator = %generator.describe(), prompt_chars = prompt.len(), "requesting plan");

    let text = match generator.generate(&prompt).await {
        Ok(text) => text,
        Err(e) => {
            warn!(error = %e, "text generator failed");
            return None;
        }
    };
    let suite = coerce_suite(&text);
    if suite.is_none() {
        let preview: String = text.chars().take(200).collect();
        warn!(%preview, "model output could not be coerced into a suite");
    }
    suite
}
